//! Validated topology graph

use crate::addr::AddressPlan;
use crate::link::{Endpoint, LinkKind, LinkSpec};
use crate::node::{is_valid_name, NodeSpec};
use crate::ValidationError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use tracing::debug;

/// Peers of one host, in link definition order
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HostConnections {
    pub host: String,
    pub peers: Vec<String>,
}

/// Immutable description of hosts, switches and links
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Topology {
    block: String,
    nodes: Vec<NodeSpec>,
    switches: Vec<String>,
    links: Vec<LinkSpec>,
}

impl Topology {
    /// Validate and assemble a topology. Definition order of nodes and links
    /// is preserved; it is also the realization order.
    pub fn new(
        plan: &AddressPlan,
        nodes: Vec<NodeSpec>,
        switches: Vec<String>,
        links: Vec<LinkSpec>,
    ) -> Result<Self, ValidationError> {
        let mut names = HashSet::new();
        let mut addresses: HashMap<Ipv4Addr, &str> = HashMap::new();

        for node in &nodes {
            if !names.insert(node.name()) {
                return Err(ValidationError::DuplicateName(node.name().to_string()));
            }
            if let Some(first) = addresses.insert(node.address(), node.name()) {
                return Err(ValidationError::DuplicateAddress {
                    address: node.address(),
                    first: first.to_string(),
                    second: node.name().to_string(),
                });
            }
            if !plan.contains(node.address()) {
                return Err(ValidationError::AddressOutsideBlock {
                    node: node.name().to_string(),
                    address: node.address(),
                    block: plan.block().to_string(),
                });
            }
        }

        let mut switch_ids = HashSet::new();
        for switch in &switches {
            if !is_valid_name(switch) {
                return Err(ValidationError::InvalidName(switch.clone()));
            }
            if names.contains(switch.as_str()) || !switch_ids.insert(switch.as_str()) {
                return Err(ValidationError::DuplicateSwitch(switch.clone()));
            }
        }

        for (i, link) in links.iter().enumerate() {
            for endpoint in [link.a(), link.b()] {
                let known = match endpoint {
                    Endpoint::Node(name) => names.contains(name.as_str()),
                    Endpoint::Switch(id) => switch_ids.contains(id.as_str()),
                };
                if !known {
                    return Err(ValidationError::UnknownEndpoint {
                        link: i,
                        endpoint: endpoint.to_string(),
                    });
                }
            }
            if link.a() == link.b() {
                return Err(ValidationError::SelfLoop {
                    link: i,
                    endpoint: link.a().to_string(),
                });
            }
            // Parallel links are allowed only when they differ in purpose or
            // in impairment; an exact repeat is a definition mistake.
            let repeated = links[..i].iter().any(|prev| {
                prev.same_pair(link)
                    && prev.kind() == link.kind()
                    && prev.impairment() == link.impairment()
            });
            if repeated {
                return Err(ValidationError::DuplicateLink {
                    a: link.a().to_string(),
                    b: link.b().to_string(),
                });
            }
        }

        debug!(
            nodes = nodes.len(),
            switches = switches.len(),
            links = links.len(),
            "topology validated"
        );

        Ok(Self {
            block: plan.block().to_string(),
            nodes,
            switches,
            links,
        })
    }

    /// Address block the hosts were allocated from, e.g. `10.0.0.0/24`
    pub fn block(&self) -> &str {
        &self.block
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn switches(&self) -> &[String] {
        &self.switches
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn links_of(&self, endpoint: &Endpoint) -> Vec<&LinkSpec> {
        self.links.iter().filter(|l| l.touches(endpoint)).collect()
    }

    pub fn links_of_kind(&self, kind: LinkKind) -> Vec<&LinkSpec> {
        self.links.iter().filter(|l| l.kind() == kind).collect()
    }

    /// Per-host adjacency listing
    pub fn connections(&self) -> Vec<HostConnections> {
        self.nodes
            .iter()
            .map(|node| {
                let me = Endpoint::node(node.name());
                let peers = self
                    .links
                    .iter()
                    .filter_map(|l| l.peer_of(&me))
                    .map(|p| p.to_string())
                    .collect();
                HostConnections {
                    host: node.name().to_string(),
                    peers,
                }
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
