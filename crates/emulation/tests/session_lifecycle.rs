//! Session lifecycle against the in-memory substrate
//!
//! Covers start/stop semantics, cleanup after partial realization, launch
//! failures, best-effort teardown and the scripted operator console.

use async_trait::async_trait;
use emulation::{
    Console, EmulationSession, Event, ExecOutput, HostHandle, InMemorySubstrate, LinkHandle,
    LinkRequest, Operation, ProcessHandle, SessionError, SessionState, Substrate, SubstrateError,
    SwitchHandle,
};
use std::net::Ipv4Addr;
use topology::{LaunchCommand, LinkKind, TopologyBuilder, ValidationError};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn canonical(substrate: InMemorySubstrate) -> EmulationSession<InMemorySubstrate> {
    EmulationSession::new(
        TopologyBuilder::default().build().expect("canonical topology"),
        substrate,
    )
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    init_logging();
    let mut session = canonical(InMemorySubstrate::new());

    session.stop().await.expect("stop on a built session");
    assert_eq!(session.state(), SessionState::Built);
    assert!(session.substrate().events().is_empty());
}

#[tokio::test]
async fn test_start_stop_stop() {
    init_logging();
    let mut session = canonical(InMemorySubstrate::new());

    session.start().await.expect("start");
    assert_eq!(session.state(), SessionState::Interactive);

    session.stop().await.expect("first stop");
    let after_first = session.substrate().events().len();
    assert!(session.substrate().is_clean());

    session.stop().await.expect("second stop");
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.substrate().events().len(), after_first);
    assert!(session.substrate().is_clean());
}

#[tokio::test]
async fn test_fault_on_second_link_cleans_up() {
    init_logging();
    let mut session = canonical(InMemorySubstrate::new().fail_on(Operation::CreateLink, 2));

    let err = session.start().await.expect_err("second link fails");
    match &err {
        SessionError::Realization { entity, .. } => assert!(entity.starts_with("link #1"), "{}", entity),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(session.state(), SessionState::Stopped);

    let substrate = session.substrate();
    assert!(substrate.is_clean(), "leftovers: {:?}", substrate.live_hosts());
    assert!(substrate.events().contains(&Event::LinkDeleted(0)));
    assert_eq!(
        substrate
            .events()
            .iter()
            .filter(|e| matches!(e, Event::HostDeleted(_)))
            .count(),
        6
    );
    assert!(substrate.events().contains(&Event::SwitchDeleted("api_sw".to_string())));
    assert!(!substrate
        .events()
        .iter()
        .any(|e| matches!(e, Event::ProcessSpawned(_))));

    // A failed session cannot be restarted
    assert!(matches!(
        session.start().await,
        Err(SessionError::InvalidState {
            state: SessionState::Stopped,
            ..
        })
    ));
}

#[tokio::test]
async fn test_launch_failure_names_node() {
    init_logging();
    // api, dir, pub1, relay1: the fourth spawn is the first relay
    let mut session = canonical(InMemorySubstrate::new().fail_on(Operation::Spawn, 4));

    let err = session.start().await.expect_err("relay launch fails");
    match &err {
        SessionError::Launch(launch) => assert_eq!(launch.node(), "relay1"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("relay1"));

    let substrate = session.substrate();
    assert!(substrate.is_clean());
    let killed = substrate
        .events()
        .iter()
        .filter(|e| matches!(e, Event::ProcessKilled(_)))
        .count();
    assert_eq!(killed, 3);
}

#[tokio::test]
async fn test_teardown_is_best_effort() {
    init_logging();
    let mut session = canonical(InMemorySubstrate::new().fail_on(Operation::DeleteSwitch, 1));
    session.start().await.expect("start");

    let err = session.stop().await.expect_err("switch deletion fails");
    assert_eq!(err.entities().collect::<Vec<_>>(), vec!["switch 'api_sw'"]);
    assert_eq!(session.state(), SessionState::Stopped);

    let substrate = session.substrate();
    assert_eq!(substrate.live_switches(), vec!["api_sw"]);
    assert!(substrate.live_hosts().is_empty());
    assert!(substrate.live_links().is_empty());
    assert!(substrate.live_processes().is_empty());

    // Already stopped: nothing more to report
    session.stop().await.expect("second stop");
}

#[tokio::test]
async fn test_canonical_scenario() {
    init_logging();
    let mut session = canonical(InMemorySubstrate::new());
    session.start().await.expect("start");

    let substrate = session.substrate();
    assert_eq!(substrate.live_hosts().len(), 6);
    assert_eq!(substrate.live_switches(), vec!["api_sw"]);
    assert_eq!(substrate.live_links().len(), 7);
    assert_eq!(substrate.live_processes().len(), 6);

    let delivery: Vec<usize> = session
        .topology()
        .links()
        .iter()
        .enumerate()
        .filter(|(_, l)| l.kind() == LinkKind::Delivery)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(delivery, vec![4, 5]);

    let first = substrate.link_impairment(4).expect("impaired");
    let second = substrate.link_impairment(5).expect("impaired");
    assert_eq!(first, second);
    assert!(first.loss_percent().unwrap_or(0.0) > 0.0);
    assert!(first.delay().is_some());
    assert!(substrate.link_impairment(0).is_none());
    assert!(substrate.link_impairment(6).is_none());

    let subscriber = substrate.command_of("sub1").expect("subscriber running");
    let args = subscriber.stages()[0].get_args();
    assert!(args.contains(&"https://10.0.0.5/bbb".to_string()));
    assert!(args.contains(&"https://10.0.0.6/bbb".to_string()));
    assert_eq!(subscriber.stages()[1].program(), "ffplay");

    let connections = session.connections().await.expect("connections");
    let sub = connections.iter().find(|c| c.host == "sub1").expect("sub1 listed");
    assert_eq!(sub.peers, vec!["sub1-eth4:relay1", "sub1-eth5:relay2"]);

    session.stop().await.expect("stop");
    assert!(session.substrate().is_clean());
}

#[tokio::test]
async fn test_scripted_console() {
    init_logging();
    let mut session = canonical(InMemorySubstrate::new());
    session.start().await.expect("start");

    let script = b"help\nnodes\n\nlinks\nnet\ndump\nexec sub1 ping -c 1 10.0.0.5\nexec nowhere true\nbogus\nexit\nnodes\n";
    let mut console = Console::new(&script[..], Vec::new());
    session.interact(&mut console).await.expect("console");
    assert_eq!(session.state(), SessionState::Interactive);

    let output = String::from_utf8(console.into_writer()).expect("utf8");
    assert!(output.contains("exec <host> <program> [args]"));
    assert!(output.contains("relay2"));
    assert!(output.contains("10.0.0.6"));
    assert!(output.contains("#4 relay1 <-> sub1 [delivery, 10Mbit 5ms 5% loss]"));
    assert!(output.contains("sub1: sub1-eth4:relay1 sub1-eth5:relay2"));
    assert!(output.contains("<Host relay1: 10.0.0.5"));
    assert!(output.contains("sub1: ping -c 1 10.0.0.5"));
    assert!(output.contains("error: "));
    assert!(output.contains("unknown command 'bogus'"));
    // Nothing after exit is read
    assert_eq!(output.matches("publisher").count(), 1);

    session.stop().await.expect("stop");
}

#[tokio::test]
async fn test_console_stops_at_eof() {
    let mut session = canonical(InMemorySubstrate::new());
    session.start().await.expect("start");

    let mut console = Console::new(&b"nodes\n"[..], Vec::new()).with_prompt("> ");
    session.interact(&mut console).await.expect("console");
    let output = String::from_utf8(console.into_writer()).expect("utf8");
    assert!(output.starts_with("> "));
    assert!(output.ends_with("> \n"));

    session.stop().await.expect("stop");
}

#[tokio::test]
async fn test_transitions_require_state() {
    let mut session = canonical(InMemorySubstrate::new());
    let mut console = Console::new(&b""[..], Vec::new());

    assert!(matches!(
        session.interact(&mut console).await,
        Err(SessionError::InvalidState {
            state: SessionState::Built,
            ..
        })
    ));

    session.realize().await.expect("realize");
    assert!(matches!(
        session.realize().await,
        Err(SessionError::InvalidState {
            state: SessionState::Running,
            ..
        })
    ));
    assert!(matches!(
        session.interact(&mut console).await,
        Err(SessionError::InvalidState { .. })
    ));

    session.attach_processes().await.expect("attach");
    session.stop().await.expect("stop");
    assert!(session.substrate().is_clean());
}

#[test]
fn test_invalid_topology_is_a_session_error() {
    let err = TopologyBuilder::default().relays(0).build().unwrap_err();
    assert_eq!(err, ValidationError::InvalidRelayCount(0));
    assert!(matches!(SessionError::from(err), SessionError::Validation(_)));
}

/// Backend that never refuses a host or switch deletion, like `ip netns del`
/// which removes a namespace even while processes or veths live in it
struct Unguarded {
    inner: InMemorySubstrate,
    failing_kill: &'static str,
    deleted_hosts: Vec<String>,
    deleted_switches: Vec<String>,
}

impl Unguarded {
    fn new(inner: InMemorySubstrate, failing_kill: &'static str) -> Self {
        Self {
            inner,
            failing_kill,
            deleted_hosts: Vec::new(),
            deleted_switches: Vec::new(),
        }
    }
}

#[async_trait]
impl Substrate for Unguarded {
    async fn create_host(&mut self, name: &str, address: Ipv4Addr) -> Result<HostHandle, SubstrateError> {
        self.inner.create_host(name, address).await
    }

    async fn create_switch(&mut self, name: &str) -> Result<SwitchHandle, SubstrateError> {
        self.inner.create_switch(name).await
    }

    async fn create_link(&mut self, request: LinkRequest<'_>) -> Result<LinkHandle, SubstrateError> {
        self.inner.create_link(request).await
    }

    async fn spawn(&mut self, host: &HostHandle, command: &LaunchCommand) -> Result<ProcessHandle, SubstrateError> {
        self.inner.spawn(host, command).await
    }

    async fn kill(&mut self, process: &ProcessHandle) -> Result<(), SubstrateError> {
        if process.node == self.failing_kill {
            return Err(SubstrateError::Injected(format!("kill {}", process.node)));
        }
        self.inner.kill(process).await
    }

    async fn delete_link(&mut self, link: &LinkHandle) -> Result<(), SubstrateError> {
        self.inner.delete_link(link).await
    }

    async fn delete_switch(&mut self, switch: &SwitchHandle) -> Result<(), SubstrateError> {
        self.deleted_switches.push(switch.name.clone());
        Ok(())
    }

    async fn delete_host(&mut self, host: &HostHandle) -> Result<(), SubstrateError> {
        self.deleted_hosts.push(host.name.clone());
        Ok(())
    }

    async fn connections(&self, host: &HostHandle) -> Result<Vec<String>, SubstrateError> {
        self.inner.connections(host).await
    }

    async fn exec(&self, host: &HostHandle, program: &str, args: &[String]) -> Result<ExecOutput, SubstrateError> {
        self.inner.exec(host, program, args).await
    }
}

#[tokio::test]
async fn test_host_with_surviving_process_is_not_deleted() {
    init_logging();
    let topology = TopologyBuilder::default().build().expect("canonical topology");
    let mut session = EmulationSession::new(topology, Unguarded::new(InMemorySubstrate::new(), "sub1"));
    session.start().await.expect("start");

    let err = session.stop().await.expect_err("sub1 keeps running");
    assert!(err.to_string().contains("host 'sub1': skipped, process still live"));

    let substrate = session.substrate();
    assert!(!substrate.deleted_hosts.contains(&"sub1".to_string()));
    assert_eq!(
        substrate.deleted_hosts,
        vec!["relay2", "relay1", "pub1", "dir", "api"]
    );
    assert_eq!(substrate.deleted_switches, vec!["api_sw"]);
    assert_eq!(substrate.inner.live_processes(), vec!["sub1"]);
}

#[tokio::test]
async fn test_link_failure_keeps_both_endpoints() {
    init_logging();
    let topology = TopologyBuilder::default().build().expect("canonical topology");
    // Links are released in reverse; the first one deleted is the ingress link
    let inner = InMemorySubstrate::new().fail_on(Operation::DeleteLink, 1);
    let mut session = EmulationSession::new(topology, Unguarded::new(inner, ""));
    session.start().await.expect("start");

    let err = session.stop().await.expect_err("ingress link survives");
    let text = err.to_string();
    assert!(text.contains("host 'pub1': skipped, link still attached"), "{}", text);
    assert!(text.contains("host 'relay1': skipped, link still attached"), "{}", text);

    let substrate = session.substrate();
    assert_eq!(substrate.deleted_hosts, vec!["sub1", "relay2", "dir", "api"]);
    assert_eq!(substrate.deleted_switches, vec!["api_sw"]);
    assert_eq!(substrate.inner.live_links(), vec![6]);
}
