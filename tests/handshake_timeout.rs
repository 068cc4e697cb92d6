//! Handshake timeout guard and post-handshake idle policy, end to end over an
//! in-memory transport on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use wss_gateway::bootstrap::{BootstrapConfigError, ConnectionError, GuardState};
use wss_gateway::net::connection::{CloseReason, ConnectionPhase, HandshakeOutcome};
use wss_gateway::observability::AuditEventKind;
use wss_gateway::pipeline::names;

mod common;

use common::{
    idle_timeouts, spawn_connection, tls_listener, upgrade_client, DelayedNegotiator,
    GreetingNegotiator, MissingMaterial, StaticMaterial, HELLO, LISTENER_NAME,
};

#[tokio::test(start_paused = true)]
async fn silent_client_is_closed_after_handshake_timeout() {
    let start = Instant::now();
    let mut h = spawn_connection(
        tls_listener(5000),
        idle_timeouts(10_000),
        Arc::new(StaticMaterial),
        Arc::new(GreetingNegotiator),
    );

    let status = h.handle.wait_closed().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(5000), "closed after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5100), "closed after {:?}", elapsed);

    assert_eq!(status.close_reason(), Some(CloseReason::HandshakeTimeout));
    assert_eq!(status.outcome, Some(HandshakeOutcome::TimedOut));
    assert!(status.stages.is_empty());

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditEventKind::HandshakeTimeout);
    assert_eq!(events[0].listener.name(), LISTENER_NAME);

    let result = h.task.await.unwrap();
    assert!(matches!(
        result,
        Err(ConnectionError::HandshakeTimeout { timeout }) if timeout == Duration::from_millis(5000)
    ));

    // The transport is released with the negotiation.
    let mut buf = [0u8; 1];
    assert_eq!(h.client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_tolerates_slow_handshake() {
    let mut h = spawn_connection(
        tls_listener(0),
        idle_timeouts(10_000),
        Arc::new(StaticMaterial),
        Arc::new(GreetingNegotiator),
    );

    let handshaking = h
        .handle
        .wait_for(|status| status.phase == ConnectionPhase::Handshaking)
        .await;
    assert_eq!(handshaking.stages, vec![names::TLS_HANDLER, names::WEBSOCKET_UPGRADE_HANDLER]);
    assert_eq!(handshaking.guard, GuardState::Unarmed);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!h.handle.status().is_closed());

    let mut client = h.client;
    client.write_all(HELLO).await.unwrap();
    let mut ws = upgrade_client(client).await.unwrap();

    let session = h.sessions.recv().await.unwrap();
    assert_eq!(session.listener.name(), LISTENER_NAME);
    assert!(session.tls.is_some());

    let status = h.handle.wait_for(|status| status.phase == ConnectionPhase::Active).await;
    assert_eq!(status.outcome, Some(HandshakeOutcome::Success));
    assert!(!status.stages.contains(&names::HANDSHAKE_IDLE_TIMER));
    assert!(!status.stages.contains(&names::HANDSHAKE_TIMEOUT_HANDLER));
    assert!(h.events.events().is_empty());

    ws.close(None).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn completed_handshake_disarms_the_guard() {
    let mut h = spawn_connection(
        tls_listener(5000),
        idle_timeouts(60_000),
        Arc::new(StaticMaterial),
        Arc::new(GreetingNegotiator),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    let mut client = h.client;
    client.write_all(HELLO).await.unwrap();
    let mut ws = upgrade_client(client).await.unwrap();
    let _session = h.sessions.recv().await.unwrap();

    // Well past the first guard deadline.
    tokio::time::sleep(Duration::from_secs(10)).await;

    let status = h.handle.status();
    assert_eq!(status.phase, ConnectionPhase::Active);
    assert_eq!(status.guard, GuardState::Disarmed);
    assert_eq!(status.outcome, Some(HandshakeOutcome::Success));
    assert_eq!(
        status.stages,
        vec![
            names::TLS_HANDLER,
            names::CONNECT_IDLE_TIMER,
            names::CONNECT_IDLE_HANDLER,
            names::WEBSOCKET_UPGRADE_HANDLER,
        ]
    );
    assert!(h.events.events().is_empty());

    ws.close(None).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn guard_precedes_tls_which_precedes_websocket() {
    let mut h = spawn_connection(
        tls_listener(5000),
        idle_timeouts(10_000),
        Arc::new(StaticMaterial),
        Arc::new(GreetingNegotiator),
    );

    let status = h
        .handle
        .wait_for(|status| status.phase == ConnectionPhase::Handshaking)
        .await;
    assert_eq!(status.guard, GuardState::Armed);

    let timer = status.position(names::HANDSHAKE_IDLE_TIMER).unwrap();
    let handler = status.position(names::HANDSHAKE_TIMEOUT_HANDLER).unwrap();
    let tls = status.position(names::TLS_HANDLER).unwrap();
    let websocket = status.position(names::WEBSOCKET_UPGRADE_HANDLER).unwrap();
    assert!(timer < handler);
    assert!(handler < tls);
    assert!(tls < websocket);
}

#[tokio::test(start_paused = true)]
async fn handshake_finishing_on_the_deadline_tick_wins() {
    for _ in 0..10 {
        let mut h = spawn_connection(
            tls_listener(5000),
            idle_timeouts(60_000),
            Arc::new(StaticMaterial),
            Arc::new(DelayedNegotiator {
                delay: Duration::from_millis(5000),
            }),
        );

        let status = h.handle.wait_for(|status| status.outcome.is_some()).await;
        assert_eq!(status.outcome, Some(HandshakeOutcome::Success));
        assert_eq!(status.phase, ConnectionPhase::Upgrading);
        assert_eq!(status.guard, GuardState::Disarmed);
        assert_eq!(
            status.stages,
            vec![
                names::TLS_HANDLER,
                names::CONNECT_IDLE_TIMER,
                names::CONNECT_IDLE_HANDLER,
                names::WEBSOCKET_UPGRADE_HANDLER,
            ]
        );
        assert!(h.events.events().is_empty());

        // Nothing changes the verdict afterwards.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.handle.status().outcome, Some(HandshakeOutcome::Success));
        assert!(!h.handle.status().is_closed());
        assert!(h.events.events().is_empty());
        h.task.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn missing_material_fails_bootstrap_with_empty_pipeline() {
    let mut h = spawn_connection(
        tls_listener(5000),
        idle_timeouts(10_000),
        Arc::new(MissingMaterial),
        Arc::new(GreetingNegotiator),
    );

    let status = h.handle.wait_closed().await;
    assert_eq!(status.close_reason(), Some(CloseReason::BootstrapFailed));
    assert!(status.stages.is_empty());
    assert_eq!(status.guard, GuardState::Disarmed);
    assert!(h.events.events().is_empty());

    let result = h.task.await.unwrap();
    assert!(matches!(
        result,
        Err(ConnectionError::BootstrapConfiguration(BootstrapConfigError::Material(_)))
    ));

    let mut buf = [0u8; 1];
    assert_eq!(h.client.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_negotiation_is_audited_once() {
    let mut h = spawn_connection(
        tls_listener(5000),
        idle_timeouts(10_000),
        Arc::new(StaticMaterial),
        Arc::new(GreetingNegotiator),
    );

    h.client.write_all(b"NOPE!\n").await.unwrap();

    let status = h.handle.wait_closed().await;
    assert_eq!(status.close_reason(), Some(CloseReason::HandshakeFailed));
    assert_eq!(status.guard, GuardState::Disarmed);
    assert!(matches!(status.outcome, Some(HandshakeOutcome::Failure(_))));

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditEventKind::HandshakeFailure);
    assert_eq!(events[0].reason, "unexpected greeting");

    // The guard deadline passing later does not add a timeout event.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.events.events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_negotiated_connection_is_closed() {
    let mut h = spawn_connection(
        tls_listener(5000),
        idle_timeouts(2000),
        Arc::new(StaticMaterial),
        Arc::new(GreetingNegotiator),
    );

    let mut client = h.client;
    client.write_all(HELLO).await.unwrap();
    let mut ws = upgrade_client(client).await.unwrap();
    let mut session = h.sessions.recv().await.unwrap();

    ws.send(Message::text("ping")).await.unwrap();
    assert_eq!(session.inbound.recv().await, Some(Message::text("ping")));

    let status = h.handle.wait_closed().await;
    assert_eq!(status.close_reason(), Some(CloseReason::IdleTimeout));
    assert!(h.events.events().is_empty());

    // The gateway said goodbye with a close frame.
    let frame = ws.next().await;
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
}
