//! Ingress rule model and canonical form
//!
//! A rule is a `(protocol, from, to, source)` tuple where the source is
//! exactly one of a CIDR block or a peer security group. Canonical rules
//! derive `Ord`/`Eq`, so set membership over a [`RuleSet`] is the
//! comparison the diff engine relies on. For ICMP the two numeric fields
//! carry (type, code) rather than a port range.

use crate::reference::{ReferenceError, SiblingResolver, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when canonicalizing a loosely-typed rule definition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule specifies both a source CIDR and a source group")]
    AmbiguousSource,
    #[error("rule specifies neither a source CIDR nor a source group")]
    MissingSource,
    #[error("invalid protocol `{0}`")]
    InvalidProtocol(String),
}

/// IP protocol of an ingress rule
///
/// Numeric protocol strings for TCP (6), UDP (17) and ICMP (1) normalize
/// to their named variants so that remote and desired representations
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Other(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for Protocol {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            other => match other.parse::<u8>() {
                Ok(6) => Ok(Protocol::Tcp),
                Ok(17) => Ok(Protocol::Udp),
                Ok(1) => Ok(Protocol::Icmp),
                Ok(n) => Ok(Protocol::Other(n)),
                Err(_) => Err(RuleError::InvalidProtocol(other.to_string())),
            },
        }
    }
}

/// Traffic source of a canonical rule: exactly one of CIDR or peer group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleSource {
    /// A CIDR block, e.g. `10.0.0.0/8`
    Cidr(String),
    /// A peer security group, identified by human name (canonical form
    /// uses names, never opaque ids) and an optional owner account
    Group {
        name: String,
        owner_id: Option<String>,
    },
}

/// One canonical ingress rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub protocol: Protocol,
    /// Start of the port range; ICMP type for ICMP rules
    pub from_port: i32,
    /// End of the port range; ICMP code for ICMP rules
    pub to_port: i32,
    pub source: RuleSource,
}

/// Typed view of the two numeric fields of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ports {
    Range { from: i32, to: i32 },
    IcmpTypeCode { icmp_type: i32, icmp_code: i32 },
}

impl Rule {
    pub fn cidr(protocol: Protocol, from_port: i32, to_port: i32, cidr: impl Into<String>) -> Self {
        Rule {
            protocol,
            from_port,
            to_port,
            source: RuleSource::Cidr(cidr.into()),
        }
    }

    pub fn group(
        protocol: Protocol,
        from_port: i32,
        to_port: i32,
        name: impl Into<String>,
        owner_id: Option<String>,
    ) -> Self {
        Rule {
            protocol,
            from_port,
            to_port,
            source: RuleSource::Group {
                name: name.into(),
                owner_id,
            },
        }
    }

    /// Interpret the numeric fields according to the protocol
    pub fn ports(&self) -> Ports {
        match self.protocol {
            Protocol::Icmp => Ports::IcmpTypeCode {
                icmp_type: self.from_port,
                icmp_code: self.to_port,
            },
            _ => Ports::Range {
                from: self.from_port,
                to: self.to_port,
            },
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            RuleSource::Cidr(cidr) => {
                write!(f, "{}/{}-{}/{}", self.protocol, self.from_port, self.to_port, cidr)
            }
            RuleSource::Group { name, owner_id } => match owner_id {
                Some(owner) => write!(
                    f,
                    "{}/{}-{}/group:{}@{}",
                    self.protocol, self.from_port, self.to_port, name, owner
                ),
                None => write!(
                    f,
                    "{}/{}-{}/group:{}",
                    self.protocol, self.from_port, self.to_port, name
                ),
            },
        }
    }
}

/// Unordered, duplicate-free set of canonical rules
pub type RuleSet = BTreeSet<Rule>;

/// Desired-state form of a rule, as it appears in a [`Definition`]
///
/// The CIDR may be a symbolic [`Value`] referencing an address owned by
/// a sibling resource; [`RuleSpec::resolve`] produces the canonical
/// [`Rule`] once all references are resolvable.
///
/// [`Definition`]: crate::reconciler::Definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub protocol: Protocol,
    pub from_port: i32,
    pub to_port: i32,
    pub source: SourceSpec,
}

/// Desired-state form of a rule source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// CIDR, possibly a symbolic reference to a sibling's address
    Cidr(Value),
    Group {
        name: String,
        owner_id: Option<String>,
    },
}

impl RuleSpec {
    /// Build a spec from the loose definition form, where CIDR and group
    /// arrive as independent optional fields. Exactly one must be set.
    ///
    /// For ICMP rules the two numeric fields are the ICMP type and code.
    pub fn from_parts(
        protocol: Protocol,
        from_port: i32,
        to_port: i32,
        cidr: Option<Value>,
        group: Option<(String, Option<String>)>,
    ) -> Result<Self, RuleError> {
        let source = match (cidr, group) {
            (Some(_), Some(_)) => return Err(RuleError::AmbiguousSource),
            (None, None) => return Err(RuleError::MissingSource),
            (Some(cidr), None) => SourceSpec::Cidr(cidr),
            (None, Some((name, owner_id))) => SourceSpec::Group { name, owner_id },
        };
        Ok(RuleSpec {
            protocol,
            from_port,
            to_port,
            source,
        })
    }

    /// Resolve any symbolic CIDR reference and canonicalize
    pub fn resolve(&self, resolver: &impl SiblingResolver) -> Result<Rule, ReferenceError> {
        let source = match &self.source {
            SourceSpec::Cidr(value) => {
                RuleSource::Cidr(crate::reference::resolve_address(resolver, value)?)
            }
            SourceSpec::Group { name, owner_id } => RuleSource::Group {
                name: name.clone(),
                owner_id: owner_id.clone(),
            },
        };
        Ok(Rule {
            protocol: self.protocol,
            from_port: self.from_port,
            to_port: self.to_port,
            source,
        })
    }

    /// Target id of the symbolic reference in this rule's source, if any
    pub fn reference_target(&self) -> Option<&str> {
        match &self.source {
            SourceSpec::Cidr(Value::Reference { target, .. }) => Some(target),
            _ => None,
        }
    }
}
