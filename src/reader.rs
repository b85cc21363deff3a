//! Remote state reader
//!
//! Fetches the current remote group for an identity, mapping the
//! "resource not found" response to a legitimate [`RemoteObservation`]
//! state instead of an error. Groups attached to a network scope are
//! looked up by remote id; unscoped groups by name.

use crate::remote::{Connection, RemoteError, RemoteGroup};
use tracing::debug;

/// What a consistency read observed on the remote side
#[derive(Debug, Clone)]
pub enum RemoteObservation {
    Found(RemoteGroup),
    NotFound,
}

/// Read the remote group for `(name, scope, remote_id)`
///
/// When scoped to a network, the lookup goes by remote id; a scoped
/// group with no recorded id cannot exist remotely under this identity
/// and reads as `NotFound`. All errors other than not-found surface
/// unchanged.
pub async fn read_remote<C: Connection>(
    conn: &C,
    name: &str,
    scope: Option<&str>,
    remote_id: Option<&str>,
) -> Result<RemoteObservation, RemoteError> {
    let result = match (scope, remote_id) {
        (Some(_), Some(id)) => conn.lookup_by_id(id).await,
        (Some(_), None) => {
            debug!(group = %name, "scoped group has no remote id yet");
            return Ok(RemoteObservation::NotFound);
        }
        (None, _) => conn.lookup_by_name(name).await,
    };

    match result {
        Ok(group) => {
            debug!(group = %name, id = %group.id, rules = group.rules.len(), "remote group found");
            Ok(RemoteObservation::Found(group))
        }
        Err(e) if e.is_not_found() => {
            debug!(group = %name, "remote group not found");
            Ok(RemoteObservation::NotFound)
        }
        Err(e) => Err(e),
    }
}
