//! Centralized test fixtures and mocks
//!
//! Provides an in-memory cloud (`MockCloud`) implementing the remote
//! connection traits, a map-backed sibling resolver, and definition
//! fixtures shared across test modules.

use crate::reconciler::Definition;
use crate::reference::{ReferenceError, SiblingHandle, SiblingKind, SiblingResolver, Value};
use crate::remote::{Connection, Connector, ErrorCode, RemoteError, RemoteGroup};
use crate::rule::{Protocol, Rule, RuleSet, RuleSource, RuleSpec, SourceSpec};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// One group in the mock cloud
#[derive(Debug, Clone)]
pub struct MockGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scope: Option<String>,
    pub rules: RuleSet,
}

impl MockGroup {
    fn to_remote(&self) -> RemoteGroup {
        RemoteGroup {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            scope: self.scope.clone(),
            rules: self.rules.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct CloudState {
    /// Groups keyed by (region, name)
    groups: HashMap<(String, String), MockGroup>,
    next_id: u32,
    /// Scripted failures per operation name, consumed in order
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    calls: Vec<String>,
}

impl CloudState {
    fn take_failure(&mut self, op: &'static str) -> Option<RemoteError> {
        self.failures.get_mut(op).and_then(|queue| queue.pop_front())
    }

    /// Canonicalize a looked-up group, performing the extra peer
    /// translation round trip for scoped groups like the production
    /// binding does
    fn convert_group(&mut self, group: &MockGroup) -> Result<RemoteGroup, RemoteError> {
        if group.scope.is_some() {
            for rule in &group.rules {
                if let RuleSource::Group { name, .. } = &rule.source {
                    self.calls.push(format!("translate {}", name));
                    if let Some(err) = self.take_failure("translate") {
                        return Err(err);
                    }
                }
            }
        }
        Ok(group.to_remote())
    }
}

/// In-memory remote API with scripted failure injection
#[derive(Debug, Clone, Default)]
pub struct MockCloud {
    state: Arc<Mutex<CloudState>>,
}

impl MockCloud {
    pub fn new() -> Self {
        MockCloud::default()
    }

    /// Pre-populate a group, returning its assigned id
    pub fn seed_group(
        &self,
        region: &str,
        name: &str,
        description: &str,
        scope: Option<&str>,
        rules: RuleSet,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("sg-{:08x}", state.next_id);
        state.groups.insert(
            (region.to_string(), name.to_string()),
            MockGroup {
                id: id.clone(),
                name: name.to_string(),
                description: description.to_string(),
                scope: scope.map(str::to_string),
                rules,
            },
        );
        id
    }

    /// Queue a failure for the next call of `op`
    /// (`connect`, `lookup`, `create`, `authorize`, `revoke`, `delete`,
    /// `translate`)
    pub fn fail_next(&self, op: &'static str, code: ErrorCode, message: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .entry(op)
            .or_default()
            .push_back(RemoteError::new(code, message));
    }

    /// Current group under (region, name), if any
    pub fn group(&self, region: &str, name: &str) -> Option<MockGroup> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(&(region.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of all calls made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(op))
            .count()
    }
}

#[async_trait]
impl Connector for MockCloud {
    type Conn = MockConnection;

    async fn connect(
        &self,
        region: &str,
        _credentials: Option<&str>,
    ) -> Result<MockConnection, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("connect {}", region));
        if let Some(err) = state.take_failure("connect") {
            return Err(err);
        }
        Ok(MockConnection {
            region: region.to_string(),
            state: self.state.clone(),
        })
    }
}

/// Region-scoped handle into the mock cloud
#[derive(Debug, Clone)]
pub struct MockConnection {
    region: String,
    state: Arc<Mutex<CloudState>>,
}

impl MockConnection {
    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn lookup_by_id(&self, id: &str) -> Result<RemoteGroup, RemoteError> {
        self.record(format!("lookup id {}", id));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("lookup") {
            return Err(err);
        }
        let group = state
            .groups
            .values()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, format!("no group {}", id)))?;
        state.convert_group(&group)
    }

    async fn lookup_by_name(&self, name: &str) -> Result<RemoteGroup, RemoteError> {
        self.record(format!("lookup name {}", name));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("lookup") {
            return Err(err);
        }
        let group = state
            .groups
            .get(&(self.region.clone(), name.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, format!("no group {}", name)))?;
        state.convert_group(&group)
    }

    async fn create(
        &self,
        name: &str,
        description: &str,
        scope: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.record(format!("create {}", name));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("create") {
            return Err(err);
        }
        let key = (self.region.clone(), name.to_string());
        if state.groups.contains_key(&key) {
            return Err(RemoteError::new(
                ErrorCode::DuplicateResource,
                format!("group {} already exists", name),
            ));
        }
        state.next_id += 1;
        let id = format!("sg-{:08x}", state.next_id);
        state.groups.insert(
            key,
            MockGroup {
                id: id.clone(),
                name: name.to_string(),
                description: description.to_string(),
                scope: scope.map(str::to_string),
                rules: RuleSet::new(),
            },
        );
        Ok(id)
    }

    async fn authorize(&self, group: &RemoteGroup, rule: &Rule) -> Result<(), RemoteError> {
        self.record(format!("authorize {} {}", group.id, rule));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("authorize") {
            return Err(err);
        }
        let id = group.id.clone();
        let target = state
            .groups
            .values_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, format!("no group {}", id)))?;
        if !target.rules.insert(rule.clone()) {
            return Err(RemoteError::new(
                ErrorCode::DuplicatePermission,
                format!("rule {} already present", rule),
            ));
        }
        Ok(())
    }

    async fn revoke(&self, group: &RemoteGroup, rule: &Rule) -> Result<(), RemoteError> {
        self.record(format!("revoke {} {}", group.id, rule));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("revoke") {
            return Err(err);
        }
        let id = group.id.clone();
        let target = state
            .groups
            .values_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, format!("no group {}", id)))?;
        if !target.rules.remove(rule) {
            return Err(RemoteError::new(
                ErrorCode::NotFound,
                format!("rule {} not present", rule),
            ));
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), RemoteError> {
        self.record(format!("delete id {}", id));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("delete") {
            return Err(err);
        }
        let key = state
            .groups
            .iter()
            .find(|(_, g)| g.id == id)
            .map(|(k, _)| k.clone());
        match key {
            Some(key) => {
                state.groups.remove(&key);
                Ok(())
            }
            None => Err(RemoteError::new(
                ErrorCode::NotFound,
                format!("no group {}", id),
            )),
        }
    }

    async fn delete_by_name(&self, name: &str) -> Result<(), RemoteError> {
        self.record(format!("delete name {}@{}", name, self.region));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("delete") {
            return Err(err);
        }
        let key = (self.region.clone(), name.to_string());
        if state.groups.remove(&key).is_none() {
            return Err(RemoteError::new(
                ErrorCode::NotFound,
                format!("no group {}", name),
            ));
        }
        Ok(())
    }

    async fn translate_peer_id_to_name(&self, id: &str) -> Result<String, RemoteError> {
        self.record(format!("translate {}", id));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure("translate") {
            return Err(err);
        }
        state
            .groups
            .values()
            .find(|g| g.id == id)
            .map(|g| g.name.clone())
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, format!("no group {}", id)))
    }
}

/// Map-backed sibling resolver
#[derive(Debug, Default)]
pub struct MapResolver {
    entries: HashMap<String, (SiblingKind, SiblingHandle)>,
}

impl MapResolver {
    pub fn new() -> Self {
        MapResolver::default()
    }

    pub fn with_scope(mut self, target: &str, scope_id: &str) -> Self {
        self.entries.insert(
            target.to_string(),
            (
                SiblingKind::NetworkScope,
                SiblingHandle {
                    scope_id: Some(scope_id.to_string()),
                    allocated_address: None,
                },
            ),
        );
        self
    }

    pub fn with_address(mut self, target: &str, address: &str) -> Self {
        self.entries.insert(
            target.to_string(),
            (
                SiblingKind::Address,
                SiblingHandle {
                    scope_id: None,
                    allocated_address: Some(address.to_string()),
                },
            ),
        );
        self
    }
}

impl SiblingResolver for MapResolver {
    fn lookup(&self, target: &str, kind: SiblingKind) -> Result<SiblingHandle, ReferenceError> {
        let (actual, handle) = self
            .entries
            .get(target)
            .ok_or_else(|| ReferenceError::NotFound(target.to_string()))?;
        if *actual != kind {
            return Err(ReferenceError::WrongKind {
                target: target.to_string(),
                expected: kind.as_str(),
            });
        }
        Ok(handle.clone())
    }
}

/// A minimal unscoped definition with one SSH rule
pub fn web_definition() -> Definition {
    Definition {
        name: "web".to_string(),
        description: "web servers".to_string(),
        region: "us-east-1".to_string(),
        credentials: None,
        scope: None,
        rules: vec![RuleSpec {
            protocol: Protocol::Tcp,
            from_port: 22,
            to_port: 22,
            source: SourceSpec::Cidr(Value::literal("0.0.0.0/0")),
        }],
    }
}

/// Desired rule set of [`web_definition`] in canonical form
pub fn web_rules() -> RuleSet {
    let mut rules = RuleSet::new();
    rules.insert(Rule::cidr(Protocol::Tcp, 22, 22, "0.0.0.0/0"));
    rules
}
