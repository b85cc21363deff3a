//! sg-sync - declarative security-group reconciliation
//!
//! This crate converges a declared cloud firewall rule-set (an EC2-style
//! security group) against remote state: it diffs desired vs. observed
//! ingress rules, applies the minimal set of mutations with
//! transient-error retry, and persists observed state in SQLite.
//!
//! ## Entry points
//!
//! - [`reconciler::Reconciler::reconcile`]: one converge pass for a
//!   [`reconciler::Definition`]
//! - [`reconciler::Reconciler::post_activate`]: deferred deletion of
//!   identities superseded by a rename or region move
//! - [`reconciler::Reconciler::destroy`]: idempotent teardown
//!
//! The remote side is reached through the [`remote::Connector`] trait;
//! [`aws::AwsConnector`] is the production binding. Symbolic references
//! to sibling resources resolve through [`reference::SiblingResolver`],
//! supplied by the orchestrator that owns the deployment.

pub mod aws;
pub mod diff;
pub mod reader;
pub mod reconciler;
pub mod reference;
pub mod remote;
pub mod rule;
pub mod state;

#[cfg(test)]
pub mod testing;

pub use diff::{diff, RuleDiff};
pub use reconciler::{Definition, Reconciler};
pub use reference::{ReferenceError, SiblingKind, SiblingResolver, Value};
pub use remote::{Connection, Connector, ErrorCode, RemoteError, RemoteGroup};
pub use rule::{Protocol, Rule, RuleError, RuleSet, RuleSpec, SourceSpec};
pub use state::{LifecycleState, ResourceState, RetiredIdentity, StateStore};
