//! AWS binding of the remote connection traits

pub mod ec2;
pub mod error;

pub use ec2::{AwsConnection, AwsConnector};
pub use error::{classify_code, to_remote_error};
