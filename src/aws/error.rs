//! Classification of AWS SDK errors into the closed error taxonomy
//!
//! The reconciler only ever branches on [`ErrorCode`]; everything the
//! remote API can say is folded into that closed set here, at the SDK
//! boundary.

use crate::remote::{ErrorCode, RemoteError};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

/// Map an EC2 API error code string onto the closed taxonomy
pub fn classify_code(code: Option<&str>) -> ErrorCode {
    match code {
        Some("InvalidGroup.NotFound") | Some("InvalidPermission.NotFound") => ErrorCode::NotFound,
        Some("InvalidGroup.Duplicate") => ErrorCode::DuplicateResource,
        Some("InvalidPermission.Duplicate") => ErrorCode::DuplicatePermission,
        Some("DependencyViolation") => ErrorCode::DependencyViolation,
        _ => ErrorCode::Other,
    }
}

/// Convert an SDK operation error into a [`RemoteError`]
pub fn to_remote_error<E>(err: SdkError<E>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = classify_code(err.code());
    RemoteError::new(code, DisplayErrorContext(err).to_string())
}

/// Re-tag a not-found error as a visibility race
///
/// During authorize, "group not found" means the referenced source
/// group is not yet visible to the API, which the caller retries.
pub fn not_found_as_not_visible(err: RemoteError) -> RemoteError {
    if err.is_not_found() {
        RemoteError::new(ErrorCode::NotVisibleYet, err.message().to_string())
    } else {
        err
    }
}
