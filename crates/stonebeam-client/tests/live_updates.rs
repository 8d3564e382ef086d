mod common;

use common::{client, config, next, tap, user, wait_for};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stonebeam_client::{
    ClientConfig, ClientError, Counter, LinkEvent, LiveUpdates, MemoryUi, PageEvent, SendError,
    StatusColor,
};
use stonebeam_core::{
    Action, Channel, ClientMessage, ConnectionStatus, MessageBody, MessageKind,
    NotificationUpdate, OrderUpdate, TransportKind,
};
use stonebeam_live_server::{Endpoint, Options, SocketMode, spawn};

fn order(action: Action) -> MessageBody {
    MessageBody::Order(OrderUpdate {
        action,
        order_id: Some("ORD-1".into()),
        status: None,
    })
}

fn notification() -> MessageBody {
    MessageBody::Notification(NotificationUpdate {
        action: Action::New,
        title: Some("Site visit".into()),
        message: None,
    })
}

#[tokio::test]
async fn prefers_socket_and_subscribes() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));

    assert_eq!(live.connect().await.unwrap(), TransportKind::WebSocket);
    assert_eq!(live.transport().await, TransportKind::WebSocket);

    // The handshake is written before connect() returns, but the server
    // records it asynchronously.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let received = backend.received().await;
    assert_eq!(
        received.first(),
        Some(&ClientMessage::Subscribe {
            user_id: user(),
            channels: Channel::ALL.to_vec(),
        })
    );
    live.dispose().await;
}

#[tokio::test]
async fn falls_back_in_order_one_attempt_at_a_time() {
    let (addr, backend) = spawn(Options {
        socket: SocketMode::Refuse,
        event_stream: false,
        polling: true,
    })
    .await
    .unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));
    let mut events = live.events();

    assert_eq!(live.connect().await.unwrap(), TransportKind::Polling);

    let seen = wait_for(&mut events, |e| matches!(e, LinkEvent::Connected(_))).await;
    assert_eq!(
        seen,
        vec![
            LinkEvent::AttemptStarted(TransportKind::WebSocket),
            LinkEvent::AttemptFailed(TransportKind::WebSocket),
            LinkEvent::AttemptStarted(TransportKind::EventStream),
            LinkEvent::AttemptFailed(TransportKind::EventStream),
            LinkEvent::AttemptStarted(TransportKind::Polling),
            LinkEvent::Connected(TransportKind::Polling),
        ]
    );
    let hits = backend.hits().await;
    assert_eq!(&hits[..2], &[Endpoint::Socket, Endpoint::EventStream]);
    live.dispose().await;
}

#[tokio::test]
async fn event_stream_delivers_updates() {
    let (addr, backend) = spawn(Options {
        socket: SocketMode::Refuse,
        ..Options::default()
    })
    .await
    .unwrap();
    let ui = Arc::new(MemoryUi::new().with_counter(Counter::Orders, 2));
    let live = client(config(addr), ui.clone());
    let mut orders = tap(&live, MessageKind::Order);

    assert_eq!(live.connect().await.unwrap(), TransportKind::EventStream);
    // Give the server a moment to register the stream subscriber.
    tokio::time::sleep(Duration::from_millis(100)).await;

    backend.publish(order(Action::New)).await;
    let msg = next(&mut orders).await;
    assert_eq!(msg.id, Some(1));
    assert_eq!(ui.counter(Counter::Orders), Some(3));
    assert_eq!(live.dispatcher().watermark(), 1);

    let events = ui.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "orderUpdate");
    live.dispose().await;
}

#[tokio::test]
async fn socket_delivers_updates_and_unclamped_counts() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let ui = Arc::new(MemoryUi::new().with_counter(Counter::Orders, 1));
    let live = client(config(addr), ui.clone());
    let mut orders = tap(&live, MessageKind::Order);

    live.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    for _ in 0..3 {
        backend.publish(order(Action::Delete)).await;
        next(&mut orders).await;
    }
    assert_eq!(ui.counter(Counter::Orders), Some(-2));
    assert_eq!(ui.toasts().len(), 3);
    live.dispose().await;
}

#[tokio::test]
async fn polling_advances_watermark_without_redelivery() {
    let (addr, backend) = spawn(Options {
        socket: SocketMode::Refuse,
        event_stream: false,
        polling: true,
    })
    .await
    .unwrap();
    backend.publish(notification()).await;
    backend.publish(notification()).await;

    let ui = Arc::new(MemoryUi::new().with_counter(Counter::Notifications, 0));
    let live = client(config(addr), ui.clone());
    let mut notes = tap(&live, MessageKind::Notification);

    assert_eq!(live.connect().await.unwrap(), TransportKind::Polling);
    next(&mut notes).await;
    next(&mut notes).await;
    assert_eq!(live.dispatcher().watermark(), 2);

    // Several more polls go by; nothing new arrives.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(notes.try_recv().is_err());
    assert_eq!(ui.counter(Counter::Notifications), Some(2));

    backend.publish(notification()).await;
    assert_eq!(next(&mut notes).await.id, Some(3));
    live.dispose().await;
}

#[tokio::test]
async fn polling_survives_failed_requests() {
    let (addr, backend) = spawn(Options {
        socket: SocketMode::Refuse,
        event_stream: false,
        polling: true,
    })
    .await
    .unwrap();
    backend.set_fail_polls(true);

    let live = client(config(addr), Arc::new(MemoryUi::new()));
    let mut notes = tap(&live, MessageKind::Notification);
    assert_eq!(live.connect().await.unwrap(), TransportKind::Polling);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(live.is_connected().await);

    backend.set_fail_polls(false);
    backend.publish(notification()).await;
    assert_eq!(next(&mut notes).await.id, Some(1));
    live.dispose().await;
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (addr, _backend) = spawn(Options::default()).await.unwrap();
    let ui = Arc::new(MemoryUi::new());
    let live = client(config(addr), ui.clone());
    let status = live.status();

    live.connect().await.unwrap();
    assert_eq!(*status.borrow(), ConnectionStatus::Connected);

    live.disconnect().await;
    live.disconnect().await;
    assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
    assert_eq!(live.transport().await, TransportKind::None);

    let colors: Vec<StatusColor> = ui.statuses().iter().map(|s| s.color).collect();
    assert_eq!(
        colors,
        [
            StatusColor::Red,
            StatusColor::Amber,
            StatusColor::Green,
            StatusColor::Red
        ]
    );
}

#[tokio::test]
async fn connect_when_connected_is_a_no_op() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));

    live.connect().await.unwrap();
    assert_eq!(live.connect().await.unwrap(), TransportKind::WebSocket);
    assert_eq!(backend.hits().await, vec![Endpoint::Socket]);
    live.dispose().await;
}

#[tokio::test]
async fn unclean_socket_close_schedules_reconnect() {
    let (addr, _backend) = spawn(Options {
        socket: SocketMode::DropAfterHandshake,
        ..Options::default()
    })
    .await
    .unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));
    let mut events = live.events();

    assert_eq!(live.connect().await.unwrap(), TransportKind::WebSocket);
    let seen = wait_for(&mut events, |e| {
        matches!(e, LinkEvent::ReconnectScheduled { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&LinkEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(1000),
        })
    );
    assert!(seen.contains(&LinkEvent::Disconnected));
    assert_eq!(live.retry_state().await, (Duration::from_millis(2000), 1));

    // A manual disconnect cancels the pending reconnect.
    live.disconnect().await;
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(!live.is_connected().await);
}

#[tokio::test]
async fn clean_socket_close_does_not_reconnect() {
    let (addr, _backend) = spawn(Options {
        socket: SocketMode::CloseAfterHandshake,
        ..Options::default()
    })
    .await
    .unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));
    let mut events = live.events();

    live.connect().await.unwrap();
    wait_for(&mut events, |e| *e == LinkEvent::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, LinkEvent::ReconnectScheduled { .. }));
    }
    assert!(!live.is_connected().await);
    assert_eq!(live.retry_state().await.1, 0);
}

fn fast_backoff(addr: std::net::SocketAddr) -> ClientConfig {
    ClientConfig {
        reconnect_base_ms: 20,
        reconnect_cap_ms: 10_000,
        ..config(addr)
    }
}

fn scheduled(events: &[LinkEvent]) -> Vec<(u32, u64)> {
    events
        .iter()
        .filter_map(|e| match e {
            LinkEvent::ReconnectScheduled { attempt, delay } => {
                Some((*attempt, delay.as_millis() as u64))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn failed_reconnects_double_the_delay_until_the_limit() {
    let (addr, backend) = spawn(Options {
        event_stream: false,
        ..Options::default()
    })
    .await
    .unwrap();
    let live = client(fast_backoff(addr), Arc::new(MemoryUi::new()));
    let mut events = live.events();

    assert_eq!(live.connect().await.unwrap(), TransportKind::WebSocket);
    // Let the server finish setting up the accepted socket.
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend.set_socket_mode(SocketMode::Refuse).await;
    backend.drop_sockets();

    let seen = wait_for(&mut events, |e| {
        *e == LinkEvent::Connected(TransportKind::Polling)
    })
    .await;
    assert_eq!(
        scheduled(&seen),
        vec![(1, 20), (2, 40), (3, 80), (4, 160), (5, 320)]
    );
    assert_eq!(live.retry_state().await, (Duration::from_millis(640), 5));

    // Retries are spent: nothing further is scheduled.
    tokio::time::sleep(Duration::from_millis(800)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, LinkEvent::ReconnectScheduled { .. }));
    }
    assert_eq!(live.transport().await, TransportKind::Polling);
    live.dispose().await;
}

#[tokio::test]
async fn reconnect_retries_the_socket_only() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let live = client(fast_backoff(addr), Arc::new(MemoryUi::new()));
    let mut events = live.events();

    live.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend.set_socket_mode(SocketMode::Refuse).await;
    backend.drop_sockets();

    let seen = wait_for(&mut events, |e| {
        matches!(e, LinkEvent::ReconnectScheduled { attempt: 2, .. })
    })
    .await;
    assert!(!seen.contains(&LinkEvent::AttemptStarted(TransportKind::EventStream)));
    assert!(!live.is_connected().await);
    live.dispose().await;
}

#[tokio::test]
async fn successful_reconnect_resets_the_backoff() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let live = client(fast_backoff(addr), Arc::new(MemoryUi::new()));

    live.connect().await.unwrap();
    let mut events = live.events();
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend.drop_sockets();
    let seen = wait_for(&mut events, |e| {
        *e == LinkEvent::Connected(TransportKind::WebSocket)
    })
    .await;
    assert_eq!(scheduled(&seen), vec![(1, 20)]);
    assert_eq!(live.retry_state().await, (Duration::from_millis(20), 0));

    tokio::time::sleep(Duration::from_millis(100)).await;
    backend.drop_sockets();
    let seen = wait_for(&mut events, |e| {
        matches!(e, LinkEvent::ReconnectScheduled { .. })
    })
    .await;
    assert_eq!(scheduled(&seen), vec![(1, 20)]);
    live.dispose().await;
}

#[tokio::test]
async fn zero_intervals_are_refused_before_connecting() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let cfg = ClientConfig {
        poll_interval_ms: 0,
        ..config(addr)
    };
    let live = client(cfg, Arc::new(MemoryUi::new()));

    assert!(matches!(
        live.connect().await,
        Err(ClientError::InvalidConfig(_))
    ));
    assert!(!live.is_connected().await);
    assert_eq!(*live.status().borrow(), ConnectionStatus::Disconnected);
    assert!(backend.hits().await.is_empty());
}

#[tokio::test]
async fn base_url_scheme_is_case_insensitive() {
    let (addr, _backend) = spawn(Options::default()).await.unwrap();
    let cfg = ClientConfig::default().with_base_url(format!("HTTP://{addr}"));
    let live = client(cfg, Arc::new(MemoryUi::new()));
    assert_eq!(live.connect().await.unwrap(), TransportKind::WebSocket);
    live.dispose().await;
}

#[tokio::test]
async fn heartbeats_pause_while_hidden() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let cfg = ClientConfig {
        heartbeat_interval_ms: 100,
        ..config(addr)
    };
    let live = client(cfg, Arc::new(MemoryUi::new()));

    live.connect().await.unwrap();
    live.handle_page_event(PageEvent::Hidden).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    let beats = |msgs: &[ClientMessage]| {
        msgs.iter()
            .filter(|m| matches!(m, ClientMessage::Heartbeat { .. }))
            .count()
    };
    assert_eq!(beats(&backend.received().await), 0);

    let mut events = live.events();
    live.handle_page_event(PageEvent::Visible).await;
    wait_for(&mut events, |e| *e == LinkEvent::HeartbeatSent).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(beats(&backend.received().await) >= 1);
    live.dispose().await;
}

#[tokio::test]
async fn send_without_connection_makes_no_request() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));

    let result = live.send_user_action("acceptQuote", json!({"quotationId": "Q-1"})).await;
    assert!(matches!(result, Err(SendError::NotConnected)));
    assert!(backend.hits().await.is_empty());
}

#[tokio::test]
async fn send_without_user_is_rejected() {
    let (addr, backend) = spawn(Options {
        socket: SocketMode::Refuse,
        event_stream: false,
        polling: true,
    })
    .await
    .unwrap();
    let live = LiveUpdates::create(
        config(addr),
        Arc::new(MemoryUi::new()),
        Arc::new(None::<stonebeam_core::UserId>),
    );
    live.connect().await.unwrap();

    let result = live.send_user_action("acceptQuote", json!({})).await;
    assert!(matches!(result, Err(SendError::NoUser)));
    assert!(!backend.hits().await.contains(&Endpoint::UserAction));
    live.dispose().await;
}

#[tokio::test]
async fn send_goes_over_socket_when_available() {
    let (addr, backend) = spawn(Options::default()).await.unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));
    live.connect().await.unwrap();

    live.send_user_action("acceptQuote", json!({"quotationId": "Q-1"}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let action = backend
        .received()
        .await
        .into_iter()
        .find(|m| matches!(m, ClientMessage::UserAction { .. }))
        .expect("user action recorded");
    let ClientMessage::UserAction { user_id, action, data, .. } = action else {
        unreachable!();
    };
    assert_eq!(user_id, user());
    assert_eq!(action, "acceptQuote");
    assert_eq!(data["quotationId"], "Q-1");
    assert!(!backend.hits().await.contains(&Endpoint::UserAction));
    live.dispose().await;
}

#[tokio::test]
async fn send_posts_when_not_on_socket() {
    let (addr, backend) = spawn(Options {
        socket: SocketMode::Refuse,
        ..Options::default()
    })
    .await
    .unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));
    assert_eq!(live.connect().await.unwrap(), TransportKind::EventStream);

    live.send_user_action("declineQuote", json!({"quotationId": "Q-2"}))
        .await
        .unwrap();
    assert!(backend.hits().await.contains(&Endpoint::UserAction));
    assert_eq!(backend.received().await.len(), 1);
    live.dispose().await;
}

#[tokio::test]
async fn online_and_offline_drive_the_connection() {
    let (addr, _backend) = spawn(Options::default()).await.unwrap();
    let live = client(config(addr), Arc::new(MemoryUi::new()));

    live.handle_page_event(PageEvent::Online).await;
    assert!(live.is_connected().await);
    live.handle_page_event(PageEvent::Offline).await;
    assert!(!live.is_connected().await);
    live.handle_page_event(PageEvent::Online).await;
    assert!(live.is_connected().await);
    live.handle_page_event(PageEvent::Unload).await;
    assert!(!live.is_connected().await);
}

/// Accepts TCP connections and never answers.
async fn black_hole() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

#[tokio::test]
async fn attempts_time_out_into_polling() {
    let addr = black_hole().await;
    let cfg = ClientConfig {
        connect_timeout_ms: Some(100),
        ..config(addr)
    };
    let live = client(cfg, Arc::new(MemoryUi::new()));
    assert_eq!(live.connect().await.unwrap(), TransportKind::Polling);
    live.dispose().await;
}

#[tokio::test]
async fn disconnect_during_negotiation_discards_the_attempt() {
    let addr = black_hole().await;
    let cfg = ClientConfig {
        connect_timeout_ms: Some(300),
        ..config(addr)
    };
    let live = client(cfg, Arc::new(MemoryUi::new()));

    let pending = {
        let live = live.clone();
        tokio::spawn(async move { live.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    live.disconnect().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(ClientError::Superseded)));
    assert!(!live.is_connected().await);
    assert_eq!(live.transport().await, TransportKind::None);
}

#[tokio::test]
async fn concurrent_connect_is_refused() {
    let addr = black_hole().await;
    let cfg = ClientConfig {
        connect_timeout_ms: Some(200),
        ..config(addr)
    };
    let live = client(cfg, Arc::new(MemoryUi::new()));

    let first = {
        let live = live.clone();
        tokio::spawn(async move { live.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        live.connect().await,
        Err(ClientError::AlreadyConnecting)
    ));
    assert_eq!(first.await.unwrap().unwrap(), TransportKind::Polling);
    live.dispose().await;
}
