//! Virtual link definitions
//!
//! A link joins two endpoints (host or switch). Impairment, when present,
//! applies to both directions.

use crate::impairment::ImpairmentProfile;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// One side of a link
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Endpoint {
    Node(String),
    Switch(String),
}

impl Endpoint {
    pub fn node(name: impl Into<String>) -> Self {
        Endpoint::Node(name.into())
    }

    pub fn switch(id: impl Into<String>) -> Self {
        Endpoint::Switch(id.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Endpoint::Node(name) | Endpoint::Switch(name) => name,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Purpose of a link in the failover topology
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Switch backbone for API/directory signalling
    Control,
    /// Relay to subscriber data path
    Delivery,
    /// Publisher to relay data path
    Ingress,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkKind::Control => "control",
            LinkKind::Delivery => "delivery",
            LinkKind::Ingress => "ingress",
        };
        f.write_str(name)
    }
}

/// Link between two endpoints
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkSpec {
    a: Endpoint,
    b: Endpoint,
    kind: LinkKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    impairment: Option<Arc<ImpairmentProfile>>,
}

impl LinkSpec {
    /// Unimpaired link
    pub fn ideal(kind: LinkKind, a: Endpoint, b: Endpoint) -> Self {
        Self {
            a,
            b,
            kind,
            impairment: None,
        }
    }

    /// Link sharing `profile` with any other link holding the same `Arc`.
    /// An empty profile yields an ideal link.
    pub fn impaired(
        kind: LinkKind,
        a: Endpoint,
        b: Endpoint,
        profile: Arc<ImpairmentProfile>,
    ) -> Self {
        let impairment = if profile.is_empty() {
            None
        } else {
            Some(profile)
        };
        Self {
            a,
            b,
            kind,
            impairment,
        }
    }

    pub fn a(&self) -> &Endpoint {
        &self.a
    }

    pub fn b(&self) -> &Endpoint {
        &self.b
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn impairment(&self) -> Option<&Arc<ImpairmentProfile>> {
        self.impairment.as_ref()
    }

    pub fn is_impaired(&self) -> bool {
        self.impairment.is_some()
    }

    pub fn touches(&self, endpoint: &Endpoint) -> bool {
        &self.a == endpoint || &self.b == endpoint
    }

    /// The other side of the link, if `endpoint` is one of its ends
    pub fn peer_of(&self, endpoint: &Endpoint) -> Option<&Endpoint> {
        if &self.a == endpoint {
            Some(&self.b)
        } else if &self.b == endpoint {
            Some(&self.a)
        } else {
            None
        }
    }

    /// Same unordered endpoint pair
    pub fn same_pair(&self, other: &LinkSpec) -> bool {
        (self.a == other.a && self.b == other.b) || (self.a == other.b && self.b == other.a)
    }
}

impl fmt::Display for LinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {} [{}", self.a, self.b, self.kind)?;
        if let Some(profile) = &self.impairment {
            write!(f, ", {}", profile)?;
        }
        write!(f, "]")
    }
}
