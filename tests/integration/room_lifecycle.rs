//! Room connection lifecycle integration tests
//!
//! These tests drive single rooms through the supervisor over the scripted
//! transport: dispatch order, malformed frames, keepalive, reconnect backoff
//! and the different ways a room can close.

use racetime_bot::room::ConnectionStatus;
use racetime_bot::supervisor::SpawnOutcome;
use racetime_bot::types::{CloseReason, RaceStatus};
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::assert_ok;

use crate::fixtures::{
    chat_frame, chat_history_frame, error_frame, race_data_frame, room_url, settle,
    test_room_config, test_supervisor, wait_for_status, wait_until_removed, ConnectPlan, Event,
    MockTransport, RecordingFactory,
};

const SLUG: &str = "ex/abc-123";

#[tokio::test(start_paused = true)]
async fn test_frames_dispatch_in_arrival_order() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_eq!(
        assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await),
        SpawnOutcome::Spawned
    );
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    transport.push(race_data_frame(SLUG, "open"));
    transport.push(chat_frame("m1", "hello"));
    transport.push(chat_frame("m2", "!Ping a B"));
    transport.push(error_frame(&["Not allowed"]));
    transport.push(chat_frame("m3", "bye"));
    settle().await;

    assert_eq!(
        factory.events(SLUG),
        vec![
            Event::Open,
            Event::RaceData(RaceStatus::Open),
            Event::Chat("hello".to_string()),
            Event::Command("ping".to_string(), vec!["a".to_string(), "B".to_string()]),
            Event::Error("Server reported errors: Not allowed".to_string()),
            Event::Chat("bye".to_string()),
        ]
    );

    let sent = transport.sent_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["action"], "message");
    assert_eq!(sent[0]["data"]["message"], "pong");
    assert!(sent[0]["data"]["guid"].is_string());

    let handle = supervisor.handle(SLUG).await.unwrap();
    assert_eq!(handle.chat_log().len(), 3);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_and_malformed_frames_keep_room_open() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    transport.push(r#"{"type":"bogus"}"#);
    transport.push("not json at all");
    transport.push(r#"{"no_type": true}"#);
    transport.push(chat_frame("m1", "still here"));
    settle().await;

    let state = supervisor.state(SLUG).await.unwrap();
    assert_eq!(state.status, ConnectionStatus::Open);
    assert_eq!(
        factory.events(SLUG),
        vec![Event::Open, Event::Chat("still here".to_string())]
    );
    assert_eq!(metrics.rooms().frames_dropped_total.get(), 2);
    assert_eq!(
        metrics
            .rooms()
            .frames_received_total
            .with_label_values(&["unknown"])
            .get(),
        1
    );
    assert_eq!(transport.opened(), 1);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_handler_errors_do_not_close_room() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    transport.push(chat_frame("m1", "!fail"));
    transport.push(chat_frame("m2", "!ping"));
    settle().await;

    assert_eq!(
        supervisor.state(SLUG).await.unwrap().status,
        ConnectionStatus::Open
    );
    assert_eq!(
        metrics
            .service()
            .handler_errors_total
            .with_label_values(&["on_command"])
            .get(),
        1
    );
    assert_eq!(transport.sent_json()[0]["data"]["message"], "pong");

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_race_data_is_idempotent() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;
    let handle = supervisor.handle(SLUG).await.unwrap();

    transport.push(race_data_frame(SLUG, "in_progress"));
    settle().await;
    let first = handle.race().unwrap();

    transport.push(race_data_frame(SLUG, "in_progress"));
    settle().await;
    let second = handle.race().unwrap();

    assert_eq!(first, second);
    assert_eq!(second.status(), RaceStatus::InProgress);
    assert_eq!(second.entrants.len(), 1);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_chat_history_seeds_log_once_per_session() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;
    let handle = supervisor.handle(SLUG).await.unwrap();

    transport.push(chat_history_frame(&["one", "two"]));
    transport.push(chat_frame("m1", "three"));
    transport.push(chat_history_frame(&["ignored"]));
    settle().await;

    let texts: Vec<String> = handle.chat_log().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_back_off_exponentially() {
    let transport = MockTransport::scripted(vec![
        ConnectPlan::Fail,
        ConnectPlan::Fail,
        ConnectPlan::Fail,
        ConnectPlan::Fail,
        ConnectPlan::Open,
    ]);
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.backoff.base = Duration::from_secs(1);
    config.backoff.max_delay = Duration::from_secs(16);
    let (supervisor, metrics) = test_supervisor(&transport, &factory, config);

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    let attempts = transport.attempt_times();
    assert_eq!(attempts.len(), 5);
    let delays: Vec<u64> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect();
    for (delay, expected) in delays.iter().zip([1000u64, 2000, 4000, 8000]) {
        assert!(
            (expected..=expected + 5).contains(delay),
            "delay {}ms, expected about {}ms",
            delay,
            expected
        );
    }
    assert_eq!(metrics.rooms().reconnects_total.get(), 4);
    assert_eq!(factory.events(SLUG), vec![Event::Open]);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_long_session_resets_backoff_to_base() {
    let transport = MockTransport::scripted(vec![
        ConnectPlan::Fail,
        ConnectPlan::Fail,
        ConnectPlan::Fail,
        ConnectPlan::Open,
    ]);
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.backoff.base = Duration::from_secs(1);
    config.backoff.max_delay = Duration::from_secs(16);
    config.backoff.reset_after = Duration::from_secs(60);
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, config);

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;
    assert_eq!(transport.attempt_times().len(), 4);

    // Stay open past the reset threshold, answering keepalive along the way
    for _ in 0..5 {
        sleep(Duration::from_secs(14)).await;
        transport.push(r#"{"type":"pong"}"#);
    }
    assert_eq!(transport.opened(), 1);

    let hung_up_at = tokio::time::Instant::now();
    transport.hang_up();
    sleep(Duration::from_secs(3)).await;

    let attempts = transport.attempt_times();
    assert_eq!(attempts.len(), 5);
    assert_eq!(transport.opened(), 2);
    let delay = (attempts[4] - hung_up_at).as_millis() as u64;
    assert!(
        (1000..=1005).contains(&delay),
        "reconnected after {}ms, expected the 1000ms base delay",
        delay
    );

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_is_dispatched_after_teardown_signal() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    for i in 0..5 {
        transport.push(chat_frame(&format!("m{}", i), &format!("c{}", i)));
    }
    assert!(assert_ok!(supervisor.teardown(SLUG).await));
    settle().await;

    let events = factory.events(SLUG);
    assert_eq!(events.first(), Some(&Event::Open));
    assert_eq!(events.last(), Some(&Event::Close(CloseReason::Teardown)));

    // Whatever was dispatched before the signal arrived in order; nothing after
    let chats = &events[1..events.len() - 1];
    for (i, event) in chats.iter().enumerate() {
        assert_eq!(event, &Event::Chat(format!("c{}", i)));
    }
    assert!(chats.len() < 5);
}

#[tokio::test(start_paused = true)]
async fn test_reconnecting_state_is_observable() {
    let transport = MockTransport::scripted(vec![ConnectPlan::Fail, ConnectPlan::Open]);
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    settle().await;

    let state = supervisor.state(SLUG).await.unwrap();
    assert_eq!(state.status, ConnectionStatus::Reconnecting);
    assert_eq!(state.retry_count, 1);
    assert!(state.next_retry_at.is_some());

    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;
    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_server_hang_up_reconnects_and_reopens() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    transport.hang_up();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(transport.opened(), 2);
    assert_eq!(factory.events(SLUG), vec![Event::Open, Event::Open]);
    assert_eq!(factory.created(), 1);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_is_pinged_then_replaced() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    // Idle for 20s triggers a ping
    sleep(Duration::from_secs(21)).await;
    assert_eq!(transport.pings_sent(), 1);
    assert_eq!(transport.opened(), 1);

    // No answer within 10s drops the session; reconnect follows after 1s
    sleep(Duration::from_secs(11)).await;
    assert_eq!(transport.opened(), 2);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_any_frame_answers_keepalive() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    sleep(Duration::from_secs(21)).await;
    assert_eq!(transport.pings_sent(), 1);
    transport.push(r#"{"type":"pong"}"#);
    sleep(Duration::from_secs(15)).await;

    assert_eq!(transport.opened(), 1);
    assert_eq!(
        supervisor.state(SLUG).await.unwrap().status,
        ConnectionStatus::Open
    );

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_calls_on_close_and_closes_channel() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    assert!(assert_ok!(supervisor.teardown(SLUG).await));
    assert!(!assert_ok!(supervisor.teardown(SLUG).await));

    assert_eq!(
        factory.events(SLUG).last(),
        Some(&Event::Close(CloseReason::Teardown))
    );
    assert_eq!(transport.closed(), 1);
    assert_eq!(supervisor.room_count().await, 0);
    assert!(supervisor.retired_reason(SLUG).await.is_none());
    assert_eq!(supervisor.stats().rooms_torn_down, 1);
    assert_eq!(
        metrics
            .rooms()
            .rooms_closed_total
            .with_label_values(&["teardown"])
            .get(),
        1
    );

    // A torn down room may be spawned again
    assert_eq!(
        assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await),
        SpawnOutcome::Spawned
    );
    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_finished_race_closes_and_retires_room() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;

    transport.push(race_data_frame(SLUG, "finished"));
    wait_until_removed(&supervisor, SLUG).await;

    assert_eq!(
        factory.events(SLUG),
        vec![
            Event::Open,
            Event::RaceData(RaceStatus::Finished),
            Event::Close(CloseReason::RaceFinished),
        ]
    );
    assert_eq!(
        supervisor.retired_reason(SLUG).await,
        Some(CloseReason::RaceFinished)
    );
    assert_eq!(
        assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await),
        SpawnOutcome::Retired(CloseReason::RaceFinished)
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_are_fatal() {
    let transport = MockTransport::scripted(vec![
        ConnectPlan::Fail,
        ConnectPlan::Fail,
        ConnectPlan::Fail,
    ]);
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.backoff.max_attempts = Some(2);
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, config);

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_until_removed(&supervisor, SLUG).await;

    assert_eq!(transport.attempts_for(&room_url(SLUG)), 3);
    let expected = CloseReason::Fatal("gave up after 2 failed attempts".to_string());
    assert_eq!(factory.events(SLUG), vec![Event::Close(expected.clone())]);
    assert_eq!(supervisor.retired_reason(SLUG).await, Some(expected));
    assert_eq!(supervisor.stats().rooms_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_are_fatal_without_retry() {
    let transport = MockTransport::scripted(vec![ConnectPlan::Reject]);
    let factory = RecordingFactory::new();
    let (supervisor, _metrics) = test_supervisor(&transport, &factory, test_room_config());

    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_until_removed(&supervisor, SLUG).await;

    assert_eq!(transport.attempts_for(&room_url(SLUG)), 1);
    assert!(matches!(
        supervisor.retired_reason(SLUG).await,
        Some(CloseReason::Fatal(reason)) if reason.contains("401")
    ));
}
