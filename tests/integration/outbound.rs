//! Outbound traffic integration tests
//!
//! Rate limiting, queue overflow, action priority and message shaping as
//! observed on the wire of the scripted transport.

use racetime_bot::error::BotError;
use racetime_bot::protocol::{Action, InfoMerge, MessageOptions, RaceAction};
use racetime_bot::rate_limit::OverflowPolicy;
use racetime_bot::room::{ConnectionStatus, OversizePolicy, RoomHandle};
use racetime_bot::supervisor::Supervisor;
use racetime_bot::RoomConfig;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

use crate::fixtures::{
    chat_frame, race_data_frame, room_url, settle, test_room_config, test_supervisor,
    wait_for_status, wait_until_removed, Event, MockTransport, RecordingFactory,
};

const SLUG: &str = "ex/quick-race-0001";

async fn open_room(
    transport: &MockTransport,
    factory: &RecordingFactory,
    config: RoomConfig,
) -> (Supervisor, RoomHandle) {
    let (supervisor, _metrics) = test_supervisor(transport, factory, config);
    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;
    let handle = supervisor.handle(SLUG).await.unwrap();
    (supervisor, handle)
}

/// Send times of chat messages relative to `start`, in milliseconds
fn message_offsets(transport: &MockTransport, start: Instant) -> Vec<u64> {
    transport
        .sent()
        .into_iter()
        .filter(|(_, text)| text.contains("\"message\""))
        .map(|(at, _)| (at - start).as_millis() as u64)
        .collect()
}

fn assert_near(actual: u64, expected: u64) {
    assert!(
        actual >= expected && actual <= expected + 5,
        "sent at +{}ms, expected +{}ms",
        actual,
        expected
    );
}

#[tokio::test(start_paused = true)]
async fn test_burst_then_drain_at_refill_rate() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.chat_limit.capacity = 3;
    config.chat_limit.refill_per_second = 0.5;
    let (supervisor, handle) = open_room(&transport, &factory, config).await;

    let start = Instant::now();
    for i in 0..5 {
        assert_ok!(handle.send_message(&format!("line {}", i)));
    }
    sleep(Duration::from_secs(5)).await;

    let offsets = message_offsets(&transport, start);
    assert_eq!(offsets.len(), 5);
    for (actual, expected) in offsets.into_iter().zip([0, 0, 0, 2000, 4000]) {
        assert_near(actual, expected);
    }

    let texts: Vec<String> = transport
        .sent_json()
        .iter()
        .map(|frame| frame["data"]["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_replies_from_handlers_are_rate_limited() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.chat_limit.capacity = 2;
    config.chat_limit.refill_per_second = 1.0;
    let (supervisor, _handle) = open_room(&transport, &factory, config).await;

    let start = Instant::now();
    transport.push(chat_frame("m1", "!spam"));
    sleep(Duration::from_secs(4)).await;

    let offsets = message_offsets(&transport, start);
    assert_eq!(offsets.len(), 5);
    for (actual, expected) in offsets.into_iter().zip([0, 0, 1000, 2000, 3000]) {
        assert_near(actual, expected);
    }

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_actions_are_sent_before_queued_chat() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.chat_limit.capacity = 1;
    let (supervisor, handle) = open_room(&transport, &factory, config).await;

    assert_ok!(handle.send_message("first"));
    assert_ok!(handle.send_message("second"));
    assert_ok!(handle.send_action(RaceAction::Ready));
    settle().await;

    let sent = transport.sent_json();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["action"], "ready");
    assert_eq!(sent[1]["data"]["message"], "first");

    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.sent_json()[2]["data"]["message"], "second");

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_drops_oldest_and_reports_to_handler() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.chat_limit.capacity = 1;
    config.chat_limit.refill_per_second = 0.1;
    config.chat_limit.max_queue_depth = 2;
    let (supervisor, metrics) = test_supervisor(&transport, &factory, config);
    assert_ok!(supervisor.spawn(SLUG, &room_url(SLUG)).await);
    wait_for_status(&supervisor, SLUG, ConnectionStatus::Open).await;
    let handle = supervisor.handle(SLUG).await.unwrap();

    for i in 0..5 {
        assert_ok!(handle.send_message(&format!("line {}", i)));
    }
    settle().await;

    let errors: Vec<Event> = factory
        .events(SLUG)
        .into_iter()
        .filter(|event| matches!(event, Event::Error(_)))
        .collect();
    assert_eq!(errors.len(), 3);
    assert!(matches!(&errors[0], Event::Error(text) if text.starts_with("Rate limit overflow")));
    assert_eq!(
        metrics
            .outbound()
            .dropped_total
            .with_label_values(&["message"])
            .get(),
        3
    );

    let sent = transport.sent_json();
    assert_eq!(sent[0]["data"]["message"], "line 3");

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_reject_new_policy_refuses_the_caller() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.chat_limit.capacity = 1;
    config.chat_limit.max_queue_depth = 2;
    config.chat_limit.overflow = OverflowPolicy::RejectNew;
    let (supervisor, handle) = open_room(&transport, &factory, config).await;

    assert_ok!(handle.send_message("one"));
    assert_ok!(handle.send_message("two"));
    let err = assert_err!(handle.send_message("three"));
    assert!(matches!(
        err.downcast_ref::<BotError>(),
        Some(BotError::RateLimitOverflow { .. })
    ));
    assert_eq!(handle.pending_outbound(), 2);

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_oversize_messages_follow_policy() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let mut config = test_room_config();
    config.max_message_length = 10;
    let (supervisor, handle) = open_room(&transport, &factory, config).await;

    assert_ok!(handle.send_message("abcdefghijklmnop"));
    settle().await;
    assert_eq!(transport.sent_json()[0]["data"]["message"], "abcdefghij");
    assert_ok!(supervisor.shutdown().await);

    let transport = MockTransport::new();
    let mut config = test_room_config();
    config.max_message_length = 10;
    config.oversize_policy = OversizePolicy::Reject;
    let (supervisor, handle) = open_room(&transport, &factory, config).await;

    let err = assert_err!(handle.send_message("abcdefghijklmnop"));
    assert!(matches!(
        err.downcast_ref::<BotError>(),
        Some(BotError::InvalidMessage { .. })
    ));
    assert_err!(handle.send_message("   "));
    assert_eq!(handle.pending_outbound(), 0);
    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_message_options_reach_the_wire() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, handle) = open_room(&transport, &factory, test_room_config()).await;

    let options = MessageOptions::pinned()
        .with_actions(vec![Action::new("Roll seed", "!seed").help("Rolls a new seed").into()]);
    assert_ok!(handle.send_message_with("Ready when you are", options));
    assert_ok!(handle.send_message_with("psst", MessageOptions::direct_to("u1")));
    settle().await;

    let sent = transport.sent_json();
    assert_eq!(sent[0]["data"]["pinned"], true);
    assert_eq!(sent[0]["data"]["actions"]["Roll seed"]["message"], "!seed");
    assert_eq!(sent[0]["data"]["actions"]["Roll seed"]["help"], "Rolls a new seed");
    assert_eq!(sent[1]["data"]["direct_to"], "u1");
    assert!(sent[1]["data"].get("pinned").is_none());

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_user_info_merges_with_race_state() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, handle) = open_room(&transport, &factory, test_room_config()).await;

    transport.push(
        race_data_frame(SLUG, "open").replace(
            r#""info":null"#,
            r#""info":null,"info_user":"Seed 1234""#,
        ),
    );
    settle().await;
    assert_eq!(
        handle.race().and_then(|race| race.info_user).as_deref(),
        Some("Seed 1234")
    );

    assert_ok!(handle.set_user_info("Hash ABC", InfoMerge::Suffix));
    assert_ok!(handle.set_bot_info("Bot is watching"));
    settle().await;

    let sent = transport.sent_json();
    assert_eq!(sent[0]["action"], "setinfo");
    assert_eq!(sent[0]["data"]["info_user"], "Seed 1234 | Hash ABC");
    assert_eq!(sent[1]["data"]["info_bot"], "Bot is watching");

    assert_ok!(supervisor.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn test_handle_outliving_its_room_refuses_sends() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, handle) = open_room(&transport, &factory, test_room_config()).await;

    assert_ok!(supervisor.teardown(SLUG).await);
    let sent_before = transport.sent_json().len();
    assert!(handle.is_closed());

    let err = assert_err!(handle.send_action(RaceAction::Forfeit));
    assert!(matches!(
        err.downcast_ref::<BotError>(),
        Some(BotError::RoomClosed { .. })
    ));
    assert_err!(handle.send_message("anyone there?"));
    assert_eq!(handle.pending_outbound(), 0);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.sent_json().len(), sent_before);
}

#[tokio::test(start_paused = true)]
async fn test_handle_of_finished_race_refuses_sends() {
    let transport = MockTransport::new();
    let factory = RecordingFactory::new();
    let (supervisor, handle) = open_room(&transport, &factory, test_room_config()).await;

    transport.push(race_data_frame(SLUG, "finished"));
    wait_until_removed(&supervisor, SLUG).await;

    assert!(handle.is_closed());
    assert_err!(handle.send_action(RaceAction::Ready));
    assert_eq!(handle.pending_outbound(), 0);
}
