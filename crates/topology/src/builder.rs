//! Builder for the relay failover topology
//!
//! ```text
//!                 api   dir
//!                   \   /
//!                  api_sw ---------.
//!                   /              |
//!   pub1 ------ relay1   ...    relayN
//!                   \~~~~~~~~~~~~~~/
//!                        sub1          (~ = impaired delivery links)
//! ```
//!
//! The control plane (API, directory, every relay) hangs off one ideal
//! switch. The subscriber reaches every relay over its own link, and all of
//! those links share one impairment profile instance, so the paths are
//! equally degraded by construction. The publisher feeds relay 1 only.

use crate::addr::{AddressPlan, Slot};
use crate::command::{HarnessPaths, RelayAdvertise, RoleCommands};
use crate::graph::Topology;
use crate::impairment::ImpairmentProfile;
use crate::link::{Endpoint, LinkKind, LinkSpec};
use crate::node::{NodeSpec, Role};
use crate::ValidationError;
use std::sync::Arc;
use tracing::debug;

pub const API_NAME: &str = "api";
pub const DIRECTORY_NAME: &str = "dir";
pub const PUBLISHER_NAME: &str = "pub1";
pub const SUBSCRIBER_NAME: &str = "sub1";
pub const CONTROL_SWITCH: &str = "api_sw";

pub fn relay_name(index: usize) -> String {
    format!("relay{}", index + 1)
}

/// Builds the failover [`Topology`]; `build()` is pure and repeatable
#[derive(Clone, Debug)]
pub struct TopologyBuilder {
    plan: AddressPlan,
    paths: HarnessPaths,
    relays: usize,
    delivery: Arc<ImpairmentProfile>,
    advertise: RelayAdvertise,
    switch: String,
}

impl TopologyBuilder {
    pub fn new(plan: AddressPlan, paths: HarnessPaths) -> Self {
        Self {
            plan,
            paths,
            relays: 2,
            delivery: Arc::new(ImpairmentProfile::degraded_delivery()),
            advertise: RelayAdvertise::default(),
            switch: CONTROL_SWITCH.to_string(),
        }
    }

    pub fn relays(mut self, count: usize) -> Self {
        self.relays = count;
        self
    }

    pub fn delivery_impairment(mut self, profile: ImpairmentProfile) -> Self {
        self.delivery = Arc::new(profile);
        self
    }

    pub fn relay_advertise(mut self, advertise: RelayAdvertise) -> Self {
        self.advertise = advertise;
        self
    }

    pub fn control_switch(mut self, name: impl Into<String>) -> Self {
        self.switch = name.into();
        self
    }

    pub fn build(&self) -> Result<Topology, ValidationError> {
        if self.relays == 0 {
            return Err(ValidationError::InvalidRelayCount(0));
        }

        let commands = RoleCommands::new(&self.paths);
        let api_ip = self.plan.address_of(Slot::Api)?;
        let dir_ip = self.plan.address_of(Slot::Directory)?;
        let pub_ip = self.plan.address_of(Slot::Publisher)?;
        let sub_ip = self.plan.address_of(Slot::Subscriber)?;
        let relay_ips = (0..self.relays)
            .map(|i| self.plan.address_of(Slot::Relay(i)))
            .collect::<Result<Vec<_>, _>>()?;
        let primary = relay_ips[0];
        let secondary = relay_ips.get(1).copied().unwrap_or(primary);

        let mut nodes = vec![
            NodeSpec::new(API_NAME, api_ip, Role::Api, commands.api())?,
            NodeSpec::new(DIRECTORY_NAME, dir_ip, Role::Directory, commands.directory())?,
            NodeSpec::new(PUBLISHER_NAME, pub_ip, Role::Publisher, commands.publisher(primary))?,
        ];
        for (i, &ip) in relay_ips.iter().enumerate() {
            let advertised = match self.advertise {
                RelayAdvertise::PrimaryRelay => primary,
                RelayAdvertise::OwnAddress => ip,
            };
            nodes.push(NodeSpec::new(
                relay_name(i),
                ip,
                Role::Relay,
                commands.relay(api_ip, dir_ip, advertised),
            )?);
        }
        nodes.push(NodeSpec::new(
            SUBSCRIBER_NAME,
            sub_ip,
            Role::Subscriber,
            commands.subscriber(primary, secondary),
        )?);

        let switch = Endpoint::switch(self.switch.clone());
        let relays: Vec<Endpoint> = (0..self.relays).map(|i| Endpoint::node(relay_name(i))).collect();
        let subscriber = Endpoint::node(SUBSCRIBER_NAME);

        // Control backbone
        let mut links = vec![
            LinkSpec::ideal(LinkKind::Control, switch.clone(), Endpoint::node(API_NAME)),
            LinkSpec::ideal(LinkKind::Control, switch.clone(), Endpoint::node(DIRECTORY_NAME)),
        ];
        for relay in &relays {
            links.push(LinkSpec::ideal(LinkKind::Control, switch.clone(), relay.clone()));
        }

        // Subscriber fan-out, one shared profile for every path
        for relay in &relays {
            links.push(LinkSpec::impaired(
                LinkKind::Delivery,
                relay.clone(),
                subscriber.clone(),
                Arc::clone(&self.delivery),
            ));
        }

        links.push(LinkSpec::ideal(
            LinkKind::Ingress,
            Endpoint::node(PUBLISHER_NAME),
            relays[0].clone(),
        ));

        debug!(
            relays = self.relays,
            delivery = %self.delivery,
            "building failover topology"
        );

        Topology::new(&self.plan, nodes, vec![self.switch.clone()], links)
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new(AddressPlan::default(), HarnessPaths::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_is_repeatable() {
        let builder = TopologyBuilder::default();
        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_relays_rejected() {
        let err = TopologyBuilder::default().relays(0).build().unwrap_err();
        assert_eq!(err, ValidationError::InvalidRelayCount(0));
    }

    #[test]
    fn test_relay_advertise_policy() {
        let primary = TopologyBuilder::default().build().unwrap();
        let relay2 = primary.node("relay2").unwrap();
        assert!(relay2.command().stages()[0]
            .get_args()
            .contains(&"https://10.0.0.5".to_string()));

        let own = TopologyBuilder::default()
            .relay_advertise(RelayAdvertise::OwnAddress)
            .build()
            .unwrap();
        let relay2 = own.node("relay2").unwrap();
        assert!(relay2.command().stages()[0]
            .get_args()
            .contains(&"https://10.0.0.6".to_string()));
    }

    #[test]
    fn test_single_relay_subscriber_uses_it_twice() {
        let topo = TopologyBuilder::default().relays(1).build().unwrap();
        let sub = topo.node(SUBSCRIBER_NAME).unwrap();
        let args = sub.command().stages()[0].get_args();
        let count = args.iter().filter(|a| a.as_str() == "https://10.0.0.5/bbb").count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_ideal_delivery_profile() {
        let topo = TopologyBuilder::default()
            .delivery_impairment(ImpairmentProfile::default())
            .build()
            .unwrap();
        assert!(topo.links().iter().all(|l| !l.is_impaired()));
    }

    #[test]
    fn test_renamed_control_switch() {
        let topo = TopologyBuilder::default().control_switch("ctl0").build().unwrap();
        assert_eq!(topo.switches(), ["ctl0".to_string()]);
        let control = topo.links_of(&Endpoint::switch("ctl0"));
        assert_eq!(control.len(), 4);
        assert!(topo.links_of(&Endpoint::switch("api_sw")).is_empty());
    }
}
