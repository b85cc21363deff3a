//! Security-group reconciler
//!
//! Converges one declared security group against its remote state: runs
//! identity-change detection, reference resolution, the optional
//! consistency read, creation, rule diff/apply with transient-error
//! retry, and the final state commit. Deferred deletion of superseded
//! identities happens in [`Reconciler::post_activate`]; teardown in
//! [`Reconciler::destroy`].

use crate::diff::diff;
use crate::reader::{read_remote, RemoteObservation};
use crate::reference::{resolve_scope, SiblingResolver, Value};
use crate::remote::{Connection, Connector, RemoteError, RemoteGroup};
use crate::rule::{Rule, RuleSet, RuleSpec};
use crate::state::{LifecycleState, ResourceState, RetiredIdentity, StateStore};
use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Desired specification of one security group
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub description: String,
    pub region: String,
    /// Credential identifier passed to the connector; `None` means the
    /// connector's ambient credentials
    pub credentials: Option<String>,
    /// Network scope, literal id or symbolic reference
    pub scope: Option<Value>,
    pub rules: Vec<RuleSpec>,
}

impl Definition {
    /// Sibling declarations this definition references
    ///
    /// The partial-order hint for the orchestrator: this resource must
    /// be reconciled after every id returned here.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let mut push = |target: &str| {
            if !deps.iter().any(|d| d == target) {
                deps.push(target.to_string());
            }
        };
        if let Some(target) = self.scope.as_ref().and_then(Value::target) {
            push(target);
        }
        for spec in &self.rules {
            if let Some(target) = spec.reference_target() {
                push(target);
            }
        }
        deps
    }
}

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(10)
}

/// Reconciler for a single logical security-group resource
///
/// Holds the persisted-state store, the connection factory and the
/// sibling resolver. One instance per logical resource; a pass is
/// sequential and opens its own connections.
pub struct Reconciler<C, R> {
    logical_id: String,
    store: StateStore,
    connector: C,
    resolver: R,
}

impl<C: Connector, R: SiblingResolver> Reconciler<C, R> {
    pub fn new(logical_id: impl Into<String>, store: StateStore, connector: C, resolver: R) -> Self {
        Reconciler {
            logical_id: logical_id.into(),
            store,
            connector,
            resolver,
        }
    }

    /// Current persisted state, for orchestrators
    pub async fn state(&self) -> Result<Option<ResourceState>> {
        self.store.load(&self.logical_id).await
    }

    /// Converge the remote group to `defn`
    ///
    /// `check_remote` requests a consistency read of the remote side
    /// before diffing; without it the persisted rule set is trusted as
    /// the baseline. `allow_recreate` is accepted for interface parity
    /// and currently unused: an identity change always provisions a
    /// replacement before the original is retired.
    pub async fn reconcile(
        &self,
        defn: &Definition,
        check_remote: bool,
        _allow_recreate: bool,
    ) -> Result<()> {
        let mut state = self.store.load(&self.logical_id).await?.unwrap_or_default();

        // A changed name or region denotes a different physical group:
        // queue the old identity for retirement and treat the remote
        // side as unknown.
        if let Some((name, region)) = state.identity() {
            if name != defn.name || region != defn.region {
                let retired = RetiredIdentity {
                    name: name.to_string(),
                    region: region.to_string(),
                };
                info!(
                    old = %retired.name,
                    new = %defn.name,
                    "group identity changed, scheduling retirement of prior group"
                );
                // A pass can abort between this commit and the field
                // commit below; the next pass then observes the same
                // stale identity again.
                if !state.pending_retirement.contains(&retired) {
                    state.pending_retirement.push(retired);
                }
                state.lifecycle = LifecycleState::Unknown;
                self.store.save(&self.logical_id, &state).await?;
            }
        }

        let scope = match &defn.scope {
            Some(value) => Some(resolve_scope(&self.resolver, value)?),
            None => None,
        };

        state.region = Some(defn.region.clone());
        state.credentials = defn.credentials.clone();
        state.name = Some(defn.name.clone());
        state.description = Some(defn.description.clone());
        state.scope_id = scope;
        self.store.save(&self.logical_id, &state).await?;

        let conn = self
            .connector
            .connect(&defn.region, defn.credentials.as_deref())
            .await?;

        let mut observed: Option<RemoteGroup> = None;
        if check_remote {
            match read_remote(
                &conn,
                &defn.name,
                state.scope_id.as_deref(),
                state.remote_id.as_deref(),
            )
            .await?
            {
                RemoteObservation::Found(group) => {
                    state.lifecycle = LifecycleState::Up;
                    state.remote_id = Some(group.id.clone());
                    state.description = Some(group.description.clone());
                    state.rules = group.rules.clone();
                    observed = Some(group);
                }
                RemoteObservation::NotFound => {
                    state.lifecycle = LifecycleState::Missing;
                }
            }
            self.store.save(&self.logical_id, &state).await?;
        }

        // Resolve every symbolic rule source before mutating anything
        // remote; a single failure aborts the pass here.
        let desired: RuleSet = defn
            .rules
            .iter()
            .map(|spec| spec.resolve(&self.resolver))
            .collect::<Result<_, _>>()?;

        let mut was_created = false;
        if matches!(
            state.lifecycle,
            LifecycleState::Missing | LifecycleState::Unknown
        ) {
            info!(group = %defn.name, "creating security group");
            match conn
                .create(&defn.name, &defn.description, state.scope_id.as_deref())
                .await
            {
                Ok(id) => {
                    observed = Some(RemoteGroup {
                        id: id.clone(),
                        name: defn.name.clone(),
                        description: defn.description.clone(),
                        scope: state.scope_id.clone(),
                        rules: RuleSet::new(),
                    });
                    state.remote_id = Some(id);
                    // Creation succeeded, so the group wasn't there
                    // before and its rules must be created in full.
                    was_created = true;
                }
                Err(e)
                    if e.is_duplicate_resource()
                        && state.lifecycle == LifecycleState::Unknown =>
                {
                    // An earlier pass created it and this retry raced a
                    // second create; reuse the existing group.
                    debug!(group = %defn.name, "create reported duplicate, reusing existing group");
                }
                Err(e) => return Err(e.into()),
            }
            state.lifecycle = LifecycleState::Starting;
            self.store.save(&self.logical_id, &state).await?;
        }

        let d = diff(&state.rules, &desired, !was_created);
        if !d.is_empty() {
            // Fetch the live group lazily: a pass whose rule set already
            // matches never needs this round trip.
            let group = match observed {
                Some(group) => group,
                None => self.fetch_group(&conn, defn, &state).await?,
            };

            if !d.to_add.is_empty() {
                info!(group = %defn.name, count = d.to_add.len(), "adding rules");
                for rule in &d.to_add {
                    self.authorize_one(&conn, &group, rule).await?;
                }
            }
            if !d.to_remove.is_empty() {
                info!(group = %defn.name, count = d.to_remove.len(), "removing rules");
                for rule in &d.to_remove {
                    match conn.revoke(&group, rule).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() || e.is_duplicate_permission() => {
                            debug!(rule = %rule, "rule already absent");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        state.rules = desired;
        state.lifecycle = LifecycleState::Up;
        self.store.save(&self.logical_id, &state).await?;

        Ok(())
    }

    /// Authorize one rule, retrying while a just-created referenced
    /// group or scope is not yet visible; an already-present permission
    /// counts as success.
    async fn authorize_one(&self, conn: &C::Conn, group: &RemoteGroup, rule: &Rule) -> Result<()> {
        let attempt = || async { conn.authorize(group, rule).await };
        let result = attempt
            .retry(retry_policy())
            .when(RemoteError::is_transient_for_authorize)
            .notify(|e, dur| {
                warn!(
                    delay = ?dur,
                    error = %e,
                    "referenced group not yet visible, retrying"
                );
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_duplicate_permission() => {
                debug!(rule = %rule, "rule already present");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_group(
        &self,
        conn: &C::Conn,
        defn: &Definition,
        state: &ResourceState,
    ) -> Result<RemoteGroup> {
        match read_remote(
            conn,
            &defn.name,
            state.scope_id.as_deref(),
            state.remote_id.as_deref(),
        )
        .await?
        {
            RemoteObservation::Found(group) => Ok(group),
            RemoteObservation::NotFound => anyhow::bail!(
                "security group `{}` disappeared before rules could be applied",
                defn.name
            ),
        }
    }

    /// Delete superseded identities queued by prior renames/region moves
    ///
    /// Entries are drained in order and removed only after their delete
    /// succeeds; any failure other than "already gone" aborts, leaving
    /// the rest queued for the next call. Retired entries may live in a
    /// different region than the current group, so a fresh connection is
    /// opened per distinct region encountered.
    pub async fn post_activate(&self) -> Result<()> {
        let Some(mut state) = self.store.load(&self.logical_id).await? else {
            return Ok(());
        };
        if state.pending_retirement.is_empty() {
            return Ok(());
        }

        let mut region = state
            .region
            .clone()
            .context("resource has no region recorded")?;
        let mut conn = self
            .connector
            .connect(&region, state.credentials.as_deref())
            .await?;

        while let Some(entry) = state.pending_retirement.first().cloned() {
            if entry.region != region {
                region = entry.region.clone();
                conn = self
                    .connector
                    .connect(&region, state.credentials.as_deref())
                    .await?;
            }
            info!(group = %entry.name, region = %entry.region, "deleting superseded security group");
            match conn.delete_by_name(&entry.name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(group = %entry.name, "superseded group already gone");
                }
                Err(e) => {
                    return Err(anyhow::Error::from(e).context(format!(
                        "failed to retire security group `{}`",
                        entry.name
                    )));
                }
            }
            state.pending_retirement.remove(0);
            self.store.save(&self.logical_id, &state).await?;
        }

        Ok(())
    }

    /// Tear the remote group down
    ///
    /// Idempotent: reports success even when the remote object is
    /// already absent. Deletion retries while dependents are still
    /// detaching.
    pub async fn destroy(&self) -> Result<()> {
        let Some(mut state) = self.store.load(&self.logical_id).await? else {
            return Ok(());
        };
        if !matches!(
            state.lifecycle,
            LifecycleState::Up | LifecycleState::Starting
        ) {
            return Ok(());
        }
        let Some((name, region)) = state.identity() else {
            return Ok(());
        };
        let (name, region) = (name.to_string(), region.to_string());

        info!(group = %name, id = ?state.remote_id, "deleting security group");
        let conn = self
            .connector
            .connect(&region, state.credentials.as_deref())
            .await?;

        let remote_id = state.remote_id.clone();
        let attempt = || async {
            match &remote_id {
                Some(id) => conn.delete_by_id(id).await,
                None => conn.delete_by_name(&name).await,
            }
        };
        let result = attempt
            .retry(retry_policy())
            .when(RemoteError::is_transient_for_delete)
            .notify(|e, dur| {
                warn!(
                    delay = ?dur,
                    error = %e,
                    "group still referenced by dependents, retrying delete"
                );
            })
            .await;

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(group = %name, "group already gone");
            }
            Err(e) => return Err(e.into()),
        }

        state.lifecycle = LifecycleState::Missing;
        state.remote_id = None;
        self.store.save(&self.logical_id, &state).await?;

        Ok(())
    }
}
