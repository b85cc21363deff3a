//! Symbolic cross-resource references and their resolution
//!
//! A definition may point at values owned by sibling resources instead of
//! carrying literals: a network scope id produced by a VPC declaration,
//! or an address allocated by an elastic-IP declaration. References are
//! written as `res-<target>` with an optional `.<field>` suffix and are
//! resolved once per reconcile pass, against the resolver's current
//! view. An unresolvable reference aborts the pass before any remote
//! mutation.

use thiserror::Error;

/// Reference-resolution failures; always fatal for the current pass
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("referenced resource `{0}` not found")]
    NotFound(String),
    #[error("referenced resource `{target}` is not a {expected}")]
    WrongKind {
        target: String,
        expected: &'static str,
    },
    #[error("referenced resource `{target}` has no {property} yet")]
    MissingProperty {
        target: String,
        property: &'static str,
    },
    #[error("expected a reference, found literal `{0}`")]
    ExpectedReference(String),
}

/// A literal value or a symbolic reference to a sibling resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Literal(String),
    Reference {
        target: String,
        field: Option<String>,
    },
}

impl Value {
    /// Parse the string form: `res-<target>[.<field>]` is a reference,
    /// anything else a literal.
    pub fn parse(s: &str) -> Value {
        match s.strip_prefix("res-") {
            Some(rest) => match rest.split_once('.') {
                Some((target, field)) => Value::Reference {
                    target: target.to_string(),
                    field: Some(field.to_string()),
                },
                None => Value::Reference {
                    target: rest.to_string(),
                    field: None,
                },
            },
            None => Value::Literal(s.to_string()),
        }
    }

    pub fn literal(s: impl Into<String>) -> Value {
        Value::Literal(s.into())
    }

    pub fn reference(target: impl Into<String>) -> Value {
        Value::Reference {
            target: target.into(),
            field: None,
        }
    }

    /// Target id when this is a reference
    pub fn target(&self) -> Option<&str> {
        match self {
            Value::Reference { target, .. } => Some(target),
            Value::Literal(_) => None,
        }
    }
}

/// Kind of sibling resource a reference may point at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingKind {
    /// A network scope (VPC) declaration
    NetworkScope,
    /// An allocated-address (elastic IP) declaration
    Address,
}

impl SiblingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiblingKind::NetworkScope => "network scope",
            SiblingKind::Address => "address",
        }
    }
}

/// Concrete properties read off a resolved sibling resource
#[derive(Debug, Clone, Default)]
pub struct SiblingHandle {
    /// Remote id of the network scope, for scope siblings
    pub scope_id: Option<String>,
    /// Allocated public address, for address siblings
    pub allocated_address: Option<String>,
}

/// Lookup of sibling resources by declaration id
///
/// Implemented by the deployment layer that owns all declarations of a
/// deployment; this crate only consumes it.
pub trait SiblingResolver {
    fn lookup(&self, target: &str, kind: SiblingKind) -> Result<SiblingHandle, ReferenceError>;
}

/// Resolve a network-scope value to a concrete remote scope id
pub fn resolve_scope(
    resolver: &impl SiblingResolver,
    value: &Value,
) -> Result<String, ReferenceError> {
    match value {
        Value::Literal(id) => Ok(id.clone()),
        Value::Reference { target, .. } => {
            let handle = resolver.lookup(target, SiblingKind::NetworkScope)?;
            handle
                .scope_id
                .ok_or_else(|| ReferenceError::MissingProperty {
                    target: target.clone(),
                    property: "scope id",
                })
        }
    }
}

/// Resolve an address value to a concrete `/32` CIDR string
pub fn resolve_address(
    resolver: &impl SiblingResolver,
    value: &Value,
) -> Result<String, ReferenceError> {
    match value {
        Value::Literal(cidr) => Ok(cidr.clone()),
        Value::Reference { target, .. } => {
            let handle = resolver.lookup(target, SiblingKind::Address)?;
            let address = handle
                .allocated_address
                .ok_or_else(|| ReferenceError::MissingProperty {
                    target: target.clone(),
                    property: "allocated address",
                })?;
            Ok(format!("{}/32", address))
        }
    }
}
