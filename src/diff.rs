//! Rule-set diff engine
//!
//! Computes the additions and removals needed to move a remote rule set
//! to the desired one. When the underlying group was created during the
//! current pass there is no meaningful baseline, so the full desired set
//! is added and nothing is removed. Additions are always applied before
//! removals to minimize the window where replaced traffic is blocked.

use crate::rule::RuleSet;

/// Result of diffing current against desired rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDiff {
    pub to_add: RuleSet,
    pub to_remove: RuleSet,
}

impl RuleDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff two canonical rule sets
///
/// `current_is_authoritative` is false when the remote object was
/// freshly created this pass: the prior baseline is meaningless and the
/// desired set is applied in full.
pub fn diff(current: &RuleSet, desired: &RuleSet, current_is_authoritative: bool) -> RuleDiff {
    if !current_is_authoritative {
        return RuleDiff {
            to_add: desired.clone(),
            to_remove: RuleSet::new(),
        };
    }
    RuleDiff {
        to_add: desired.difference(current).cloned().collect(),
        to_remove: current.difference(desired).cloned().collect(),
    }
}
