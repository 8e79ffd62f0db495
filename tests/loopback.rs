//! Integration tests for complete probe runs over loopback.
//!
//! Each test binds real `tokio::net::UdpSocket`s on 127.0.0.1 with
//! OS-assigned ports.  Path limits are imposed by wrapping the prober's socket
//! in a [`Simulator`], since loopback itself never drops anything.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use udp_probe::echo::EchoReceiver;
use udp_probe::orchestrator::{Orchestrator, OrchestratorError};
use udp_probe::prober::Prober;
use udp_probe::protocol::{address, Arg, Message, Signal};
use udp_probe::session::{SessionError, SessionHandle};
use udp_probe::simulator::{FaultConfig, Simulator};
use udp_probe::socket::{Socket, Transport};
use udp_probe::{ProbeConfig, Role, RoleSet};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Bind a socket to an OS-assigned port on loopback.
async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// A fast-ticking config whose ports point at the given sockets.
fn config_for(prober: &Socket, receiver: &Socket) -> ProbeConfig {
    ProbeConfig {
        data_port: receiver.local_addr.port(),
        feedback_port: prober.local_addr.port(),
        tick_interval: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        ..ProbeConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Test 1: full ladder against a 1467-byte boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn both_roles_converge_on_boundary() {
    let prober_sock = ephemeral().await;
    let receiver_sock = ephemeral().await;
    let config = config_for(&prober_sock, &receiver_sock);

    let lossy = Simulator::new(prober_sock, FaultConfig::boundary(1467));
    let run = Orchestrator::with_transports(config, LOCALHOST, Some(lossy), Some(receiver_sock));

    let report = tokio::time::timeout(Duration::from_secs(10), run.run())
        .await
        .expect("run timed out")
        .expect("run failed");

    assert_eq!(report.max_safe_size, 1466);
    assert_eq!(report.source, Role::Receiver);
}

// ---------------------------------------------------------------------------
// Test 2: a lossless path never stops
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lossless_path_keeps_growing() {
    let prober_sock = ephemeral().await;
    let receiver_sock = ephemeral().await;
    let data_peer = receiver_sock.local_addr;
    let feedback_peer = prober_sock.local_addr;

    let prober = SessionHandle::spawn(
        Prober::new(1, 100),
        prober_sock,
        data_peer,
        Some(Duration::from_millis(5)),
    );
    let receiver = SessionHandle::spawn(EchoReceiver::new(), receiver_sock, feedback_peer, None);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(prober.is_running());
    assert!(receiver.is_running());
    let (size, step) = prober.inspect(|p| (p.current_size(), p.step()));
    assert!(size > 1, "prober never advanced");
    assert_eq!(step, 100);
    assert_eq!((size - 1) % 100, 0);
    assert_eq!(receiver.final_size(), None);

    prober.shutdown().await.unwrap();
    receiver.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Test 3: malformed datagrams are discarded by a live receiver
// ---------------------------------------------------------------------------

#[tokio::test]
async fn receiver_discards_malformed_messages() {
    let receiver_sock = ephemeral().await;
    let receiver_addr = receiver_sock.local_addr;
    let client = ephemeral().await;

    let receiver =
        SessionHandle::spawn(EchoReceiver::new(), receiver_sock, client.local_addr, None);

    // One good probe first so the state is not trivially zero.
    client.send_to(&Message::payload(64), receiver_addr).await.unwrap();
    client
        .send_to(&Message::announcement(64).unwrap(), receiver_addr)
        .await
        .unwrap();
    let (verdict, _) = client.recv_from().await.unwrap();
    assert_eq!(verdict, Message::signal(Signal::Success));
    let before = receiver.inspect(EchoReceiver::clone);

    client.send_raw(b"garbage", receiver_addr).await.unwrap();
    let blob_on_size = Message {
        address: address::SIZE.to_owned(),
        args: vec![Arg::Blob(vec![1, 2, 3, 4])],
    };
    client.send_to(&blob_on_size, receiver_addr).await.unwrap();
    client
        .send_to(&Message::signal(Signal::Stop), receiver_addr)
        .await
        .unwrap();

    // A following valid probe is still judged normally.
    client.send_to(&Message::payload(128), receiver_addr).await.unwrap();
    client
        .send_to(&Message::announcement(128).unwrap(), receiver_addr)
        .await
        .unwrap();
    let (verdict, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from())
        .await
        .expect("no verdict")
        .unwrap();
    assert_eq!(verdict, Message::signal(Signal::Success));

    let after = receiver.inspect(EchoReceiver::clone);
    assert_eq!(after.expected_size(), 128);
    assert_eq!(before.expected_size(), 64);
    assert!(receiver.is_running());
    receiver.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Test 4: run timeout ends a run that can never converge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_timeout_reports_prober_progress() {
    let prober_sock = ephemeral().await;
    let receiver_sock = ephemeral().await;
    let config = ProbeConfig {
        run_timeout: Some(Duration::from_millis(200)),
        ..config_for(&prober_sock, &receiver_sock)
    };

    let run =
        Orchestrator::with_transports(config, LOCALHOST, Some(prober_sock), Some(receiver_sock));
    let err = tokio::time::timeout(Duration::from_secs(5), run.run())
        .await
        .expect("timeout not enforced")
        .unwrap_err();

    match err {
        OrchestratorError::TimedOut { prober_size, .. } => {
            assert!(prober_size.unwrap_or(0) > 1);
        }
        other => panic!("expected TimedOut, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Test 5: an unframeable probe is a fatal prober error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unframeable_probe_is_fatal() {
    let prober_sock = ephemeral().await;
    let receiver_sock = ephemeral().await;
    let config = ProbeConfig {
        initial_size: i32::MAX as u32 + 1,
        ..config_for(&prober_sock, &receiver_sock)
    };

    let run =
        Orchestrator::with_transports(config, LOCALHOST, Some(prober_sock), Some(receiver_sock));
    let err = tokio::time::timeout(Duration::from_secs(5), run.run())
        .await
        .expect("run hung")
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Session(SessionError::Transport {
            role: Role::Prober,
            ..
        })
    ));
}

// ---------------------------------------------------------------------------
// Test 6: split roles, each in its own orchestrator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_and_receive_roles_cooperate_across_orchestrators() {
    let prober_sock = ephemeral().await;
    let receiver_sock = ephemeral().await;
    let base = config_for(&prober_sock, &receiver_sock);

    let sender_cfg = ProbeConfig {
        roles: RoleSet::Send,
        ..base.clone()
    };
    let receiver_cfg = ProbeConfig {
        roles: RoleSet::Receive,
        ..base
    };

    let lossy = Simulator::new(prober_sock, FaultConfig::boundary(300));
    let sender = Orchestrator::with_transports(sender_cfg, LOCALHOST, Some(lossy), None::<Socket>);
    let receiver =
        Orchestrator::with_transports(receiver_cfg, LOCALHOST, None::<Socket>, Some(receiver_sock));

    let (sent, received) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(sender.run(), receiver.run())
    })
    .await
    .expect("split run timed out");

    let received = received.expect("receiver run failed");
    assert_eq!(received.max_safe_size, 299);
    assert_eq!(received.source, Role::Receiver);

    let sent = sent.expect("sender run failed");
    assert_eq!(sent.source, Role::Prober);
    assert_eq!(sent.max_safe_size, 299);
}

// ---------------------------------------------------------------------------
// Test 7: default ladder on plain loopback stops at the datagram size limit
// ---------------------------------------------------------------------------

/// Largest blob whose framed `/probe/data` message fits one IPv4 datagram.
#[cfg(target_os = "linux")]
fn largest_sendable_payload() -> u32 {
    use udp_probe::socket::MAX_IPV4_PAYLOAD;

    let n = (0..=MAX_IPV4_PAYLOAD)
        .rev()
        .find(|&n| Message::payload(n).encoded_len() <= MAX_IPV4_PAYLOAD)
        .unwrap();
    u32::try_from(n).unwrap()
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn default_ladder_converges_on_datagram_limit() {
    let prober_sock = ephemeral().await;
    let receiver_sock = ephemeral().await;
    let config = config_for(&prober_sock, &receiver_sock);
    assert_eq!((config.initial_size, config.initial_step), (1, 10_000));

    let run =
        Orchestrator::with_transports(config, LOCALHOST, Some(prober_sock), Some(receiver_sock));
    let report = tokio::time::timeout(Duration::from_secs(10), run.run())
        .await
        .expect("run timed out")
        .expect("oversized payload ended the run");

    assert_eq!(largest_sendable_payload(), 65_484);
    assert_eq!(report.max_safe_size, largest_sendable_payload());
    assert_eq!(report.source, Role::Receiver);
}

#[tokio::test]
async fn transport_trait_reports_bound_address() {
    let sock = ephemeral().await;
    let addr = sock.local_addr;
    let sim = Simulator::new(sock, FaultConfig::default());
    assert_eq!(Transport::local_addr(&sim), addr);
}
