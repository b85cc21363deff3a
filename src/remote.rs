//! Remote client interface and error taxonomy
//!
//! The reconciler talks to the cloud through the [`Connector`] and
//! [`Connection`] traits; the production binding lives in [`crate::aws`]
//! and tests use the in-memory mock. Every remote failure carries a
//! machine-readable [`ErrorCode`]; the reconciler branches on a small
//! closed set of codes and treats everything else as fatal.

use crate::rule::{Rule, RuleSet};
use async_trait::async_trait;
use thiserror::Error;

/// Closed set of error codes the reconciler branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The resource (or permission) does not exist
    NotFound,
    /// A resource with this identity already exists
    DuplicateResource,
    /// The permission being authorized already exists
    DuplicatePermission,
    /// Deletion blocked because dependents still reference the resource
    DependencyViolation,
    /// A just-created referenced resource is not yet visible to the API
    NotVisibleYet,
    /// Anything else; never retried, never tolerated
    Other,
}

/// A failed remote call
#[derive(Debug, Clone, Error)]
#[error("remote error ({code:?}): {message}")]
pub struct RemoteError {
    code: ErrorCode,
    message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        RemoteError {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_duplicate_resource(&self) -> bool {
        self.code == ErrorCode::DuplicateResource
    }

    pub fn is_duplicate_permission(&self) -> bool {
        self.code == ErrorCode::DuplicatePermission
    }

    pub fn is_transient_for_authorize(&self) -> bool {
        self.code == ErrorCode::NotVisibleYet
    }

    pub fn is_transient_for_delete(&self) -> bool {
        self.code == ErrorCode::DependencyViolation
    }
}

/// Remote security group in canonical form
///
/// Lookups translate peer-group ids back to human names before building
/// the rule set, so `rules` is directly comparable against a resolved
/// desired rule set.
#[derive(Debug, Clone)]
pub struct RemoteGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Network scope the group is attached to, if any
    pub scope: Option<String>,
    pub rules: RuleSet,
}

/// Factory for per-pass, per-region connections
///
/// A connection is scoped to one reconcile pass and one region; it is
/// never cached across passes or shared between resource instances.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    async fn connect(
        &self,
        region: &str,
        credentials: Option<&str>,
    ) -> Result<Self::Conn, RemoteError>;
}

/// One connection to the remote API in a single region
#[async_trait]
pub trait Connection: Send + Sync {
    /// Look a group up by remote id; `NotFound` when absent
    async fn lookup_by_id(&self, id: &str) -> Result<RemoteGroup, RemoteError>;

    /// Look a group up by name; `NotFound` when absent
    async fn lookup_by_name(&self, name: &str) -> Result<RemoteGroup, RemoteError>;

    /// Create a group, returning its remote id
    async fn create(
        &self,
        name: &str,
        description: &str,
        scope: Option<&str>,
    ) -> Result<String, RemoteError>;

    /// Authorize one ingress rule on the group
    ///
    /// Implementations map "referenced group not visible yet" races to
    /// [`ErrorCode::NotVisibleYet`] so the caller can retry them.
    async fn authorize(&self, group: &RemoteGroup, rule: &Rule) -> Result<(), RemoteError>;

    /// Revoke one ingress rule from the group
    async fn revoke(&self, group: &RemoteGroup, rule: &Rule) -> Result<(), RemoteError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), RemoteError>;

    async fn delete_by_name(&self, name: &str) -> Result<(), RemoteError>;

    /// Translate an opaque peer-group id to its human name
    async fn translate_peer_id_to_name(&self, id: &str) -> Result<String, RemoteError>;
}
