//! Integration tests for the failover topology definition
//!
//! These exercise the builder end to end: shape of the canonical six-host
//! topology, shared delivery impairment, and name/address uniqueness over
//! randomly generated node sets.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use topology::{
    AddressPlan, CommandStage, Endpoint, HarnessPaths, ImpairmentProfile, LaunchCommand, LinkKind,
    NodeSpec, Role, Topology, TopologyBuilder, ValidationError,
};

#[test]
fn test_canonical_topology_shape() {
    let topo = TopologyBuilder::default().build().expect("canonical topology");

    assert_eq!(topo.nodes().len(), 6);
    assert_eq!(topo.switches(), ["api_sw".to_string()]);
    assert_eq!(topo.links_of_kind(LinkKind::Control).len(), 4);
    assert_eq!(topo.links_of_kind(LinkKind::Delivery).len(), 2);
    assert_eq!(topo.links_of_kind(LinkKind::Ingress).len(), 1);
    assert_eq!(topo.links().len(), 7);

    // Control links are ideal, delivery links are not
    assert!(topo
        .links_of_kind(LinkKind::Control)
        .iter()
        .all(|l| !l.is_impaired()));

    let publisher_links = topo.links_of(&Endpoint::node("pub1"));
    assert_eq!(publisher_links.len(), 1);
    assert_eq!(
        publisher_links[0].peer_of(&Endpoint::node("pub1")),
        Some(&Endpoint::node("relay1"))
    );

    let subscriber_links = topo.links_of(&Endpoint::node("sub1"));
    assert_eq!(subscriber_links.len(), 2);
    let peers: Vec<&str> = subscriber_links
        .iter()
        .filter_map(|l| l.peer_of(&Endpoint::node("sub1")))
        .map(|p| p.name())
        .collect();
    assert_eq!(peers, vec!["relay1", "relay2"]);

    for link in &subscriber_links {
        let profile = link.impairment().expect("delivery link is impaired");
        assert!(profile.loss_percent().unwrap_or(0.0) > 0.0);
        assert!(profile.delay().unwrap_or_default() > Duration::ZERO);
    }
}

#[test]
fn test_delivery_links_share_one_profile() {
    let topo = TopologyBuilder::default()
        .relays(4)
        .build()
        .expect("four relay topology");

    let delivery = topo.links_of_kind(LinkKind::Delivery);
    assert_eq!(delivery.len(), 4);

    let first = delivery[0].impairment().expect("impaired");
    for link in &delivery[1..] {
        let profile = link.impairment().expect("impaired");
        assert_eq!(profile.bandwidth_mbps(), first.bandwidth_mbps());
        assert_eq!(profile.delay(), first.delay());
        assert_eq!(profile.loss_percent(), first.loss_percent());
        assert!(Arc::ptr_eq(profile, first), "profile must be shared, not copied");
    }
}

#[test]
fn test_canonical_addresses() {
    let topo = TopologyBuilder::default().build().unwrap();
    let expected = [
        ("api", Role::Api, 1),
        ("dir", Role::Directory, 2),
        ("pub1", Role::Publisher, 3),
        ("relay1", Role::Relay, 5),
        ("relay2", Role::Relay, 6),
        ("sub1", Role::Subscriber, 4),
    ];
    for (node, (name, role, last)) in topo.nodes().iter().zip(expected) {
        assert_eq!(node.name(), name);
        assert_eq!(node.role(), role);
        assert_eq!(node.address(), Ipv4Addr::new(10, 0, 0, last));
    }
}

#[test]
fn test_custom_plan_and_profile() {
    let plan = AddressPlan::from_base(Ipv4Addr::new(172, 16, 5, 0)).unwrap();
    let profile = ImpairmentProfile::builder()
        .bandwidth_mbps(2.5)
        .delay_ms(40)
        .loss_percent(1.0)
        .build()
        .unwrap();
    let topo = TopologyBuilder::new(plan, HarnessPaths::default())
        .delivery_impairment(profile.clone())
        .build()
        .unwrap();

    assert_eq!(topo.block(), "172.16.5.0/24");
    for link in topo.links_of_kind(LinkKind::Delivery) {
        assert_eq!(link.impairment().map(|p| p.as_ref()), Some(&profile));
    }
    let sub = topo.node("sub1").unwrap();
    assert!(sub.command().stages()[0]
        .get_args()
        .contains(&"https://172.16.5.5/bbb".to_string()));
}

#[test]
fn test_topology_json_dump() {
    let topo = TopologyBuilder::default().build().unwrap();
    let json: serde_json::Value = serde_json::from_str(&topo.to_json().unwrap()).unwrap();

    assert_eq!(json["nodes"].as_array().map(Vec::len), Some(6));
    assert_eq!(json["links"].as_array().map(Vec::len), Some(7));
    assert_eq!(json["links"][4]["kind"], "delivery");
    assert_eq!(json["links"][4]["impairment"]["loss_percent"], 5.0);
    assert_eq!(json["links"][0]["a"]["type"], "switch");
}

/// Random node sets drawn from small name/address pools so that
/// collisions are frequent; validation must fail exactly when one occurs.
#[test]
fn test_name_and_address_uniqueness_property() {
    let plan = AddressPlan::default();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..500 {
        let count = rng.gen_range(1..8);
        let mut nodes = Vec::with_capacity(count);
        let mut names = HashSet::new();
        let mut addrs = HashSet::new();
        let mut collision = false;

        for _ in 0..count {
            let name = format!("h{}", rng.gen_range(0..10));
            let addr = Ipv4Addr::new(10, 0, 0, rng.gen_range(1..12));
            collision |= !names.insert(name.clone());
            collision |= !addrs.insert(addr);
            nodes.push(
                NodeSpec::new(
                    name,
                    addr,
                    Role::Relay,
                    LaunchCommand::single(CommandStage::new("true")),
                )
                .unwrap(),
            );
        }

        match Topology::new(&plan, nodes, vec![], vec![]) {
            Ok(topo) => {
                assert!(!collision, "collision accepted");
                let unique: HashSet<_> = topo.nodes().iter().map(|n| n.address()).collect();
                assert_eq!(unique.len(), topo.nodes().len());
            }
            Err(ValidationError::DuplicateName(_)) | Err(ValidationError::DuplicateAddress { .. }) => {
                assert!(collision, "unique set rejected");
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
}
