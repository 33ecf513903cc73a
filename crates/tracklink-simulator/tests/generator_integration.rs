//! Generator against a real ProtocolServer on 127.0.0.1:0.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracklink_network::{ProtocolServer, ServerConfig};
use tracklink_protocol::{DomainEvent, EventKind, StatusReason};
use tracklink_simulator::{DeviceLink, GeneratorConfig, GeneratorError, Timing, TrafficGenerator};

async fn start_server() -> (
    std::net::SocketAddr,
    mpsc::UnboundedReceiver<DomainEvent>,
    CancellationToken,
) {
    let (tx, events) = mpsc::unbounded_channel();
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    let server = ProtocolServer::bind(config, Arc::new(tx)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move { server.run(token).await });
    (addr, events, shutdown)
}

fn fast_timing() -> Timing {
    Timing {
        location_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(100),
        status_interval: Duration::from_millis(150),
        request_timeout: Duration::from_secs(2),
        reconnect_initial: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
    }
}

fn generator_config(port: u16) -> GeneratorConfig {
    GeneratorConfig {
        server_port: port,
        ..GeneratorConfig::default()
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<DomainEvent>) -> DomainEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event timeout")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_generator_session_lifecycle() {
    let (addr, mut events, server_shutdown) = start_server().await;
    let generator = Arc::new(
        TrafficGenerator::new(&generator_config(addr.port()))
            .unwrap()
            .with_timing(fast_timing())
            .unwrap(),
    );

    let stop = CancellationToken::new();
    let task = {
        let generator = Arc::clone(&generator);
        let stop = stop.clone();
        tokio::spawn(async move { generator.run(stop).await })
    };

    assert!(matches!(next_event(&mut events).await.kind, EventKind::Registration(_)));
    assert!(matches!(next_event(&mut events).await.kind, EventKind::Authentication));

    // The first gate evaluation always publishes.
    let first = next_event(&mut events).await;
    assert!(matches!(first.kind, EventKind::Location(_)));
    assert_eq!(first.phone, generator.phone());

    // Heartbeats and status reports keep flowing; fast-tier gating holds
    // back gated locations for 5 s, so every further 0x0200 here is a status report.
    let mut heartbeats = 0;
    let mut status_reports = 0;
    while heartbeats < 2 || status_reports < 1 {
        match next_event(&mut events).await.kind {
            EventKind::Heartbeat => heartbeats += 1,
            EventKind::Location(_) => status_reports += 1,
            other => panic!("unexpected event {}", other.name()),
        }
    }
    assert!(generator.stats().suppressed() > 0);
    assert_eq!(generator.stats().locations_sent(), 1);

    stop.cancel();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Drain anything acknowledged before the stop, then expect the logout.
    loop {
        let event = next_event(&mut events).await;
        if let EventKind::Status(change) = &event.kind {
            assert!(!change.online);
            assert_eq!(change.reason, StatusReason::Logout);
            break;
        }
    }
    assert!(
        timeout(Duration::from_millis(300), events.recv()).await.is_err(),
        "event after logout"
    );

    server_shutdown.cancel();
}

#[tokio::test]
async fn test_generator_batch_mode() {
    let (addr, mut events, server_shutdown) = start_server().await;
    let config = GeneratorConfig {
        batch_enabled: true,
        batch_size: 1,
        ..generator_config(addr.port())
    };
    let timing = Timing {
        heartbeat_interval: Duration::from_secs(60),
        status_interval: Duration::from_secs(60),
        ..fast_timing()
    };
    let generator = TrafficGenerator::new(&config)
        .unwrap()
        .with_timing(timing)
        .unwrap();

    let stop = CancellationToken::new();
    let runner = stop.clone();
    let task = tokio::spawn(async move {
        generator.run(runner).await.map(|()| generator.stats().batches_sent())
    });

    assert!(matches!(next_event(&mut events).await.kind, EventKind::Registration(_)));
    assert!(matches!(next_event(&mut events).await.kind, EventKind::Authentication));
    match next_event(&mut events).await.kind {
        EventKind::BatchLocation(batch) => assert_eq!(batch.items.len(), 1),
        other => panic!("expected batch, got {}", other.name()),
    }

    stop.cancel();
    let batches = timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(batches, 1);
    server_shutdown.cancel();
}

#[tokio::test]
async fn test_generator_reconnects_after_server_restart() {
    let (addr, mut events, server_shutdown) = start_server().await;
    let generator = Arc::new(
        TrafficGenerator::new(&generator_config(addr.port()))
            .unwrap()
            .with_timing(fast_timing())
            .unwrap(),
    );
    let stop = CancellationToken::new();
    let task = {
        let generator = Arc::clone(&generator);
        let stop = stop.clone();
        tokio::spawn(async move { generator.run(stop).await })
    };

    assert!(matches!(next_event(&mut events).await.kind, EventKind::Registration(_)));
    server_shutdown.cancel();

    // No server: the generator backs off instead of failing.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!task.is_finished());

    stop.cancel();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(generator.stats().reconnects() >= 1);
}

#[tokio::test]
async fn test_link_requires_authentication() {
    let (addr, _events, server_shutdown) = start_server().await;
    let config = generator_config(addr.port());
    let mut link = DeviceLink::new(addr, Duration::from_secs(2), config.device.phone().unwrap());

    let err = link
        .request(&tracklink_protocol::Body::Heartbeat)
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::NotAuthenticated));

    link.open(&config.device.registration()).await.unwrap();
    assert!(link.is_authenticated());
    assert!(link.auth_code().is_some());
    link.request(&tracklink_protocol::Body::Heartbeat)
        .await
        .unwrap();
    link.logout().await.unwrap();
    assert!(!link.is_authenticated());
    link.close().await;
    server_shutdown.cancel();
}
