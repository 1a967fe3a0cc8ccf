#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the Chalkcast session task.
//!
//! Uses the scripted mocks from `tests/common` to play server traffic at a
//! real client and verify connection lifecycle, reconnection, roster and
//! progress reconciliation, and event delivery.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use chalkcast_client::{
    BackoffPolicy, ChalkcastClient, ChalkcastConfig, ChalkcastError, ChalkcastEvent,
    ClientMessage, ConnectionState, LobbyStatus,
};

use common::{
    answer_received_json, current_question_json, decode_sent, heartbeat_json, lobby_closed_json,
    lobby_updated_json, message, next_event, next_event_where, next_question_json,
    participant_answered_json, participants_list_json, participants_updated_json, recv_error,
    server_close, show_correct_answer_json, stream_end, sync_response_json, test_finished_json,
    test_started_json, toggle_answers_json, user_joined_json, user_kicked_json, user_left_json,
    user_status_json, MockConnector, MockDirectory, MockTransport, ScriptItem,
    SequentialCredentials,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

/// Config tuned for tests: heartbeats far away, short backoff.
fn test_config() -> ChalkcastConfig {
    ChalkcastConfig::new("https://chalkcast.test", "lobby-1")
        .with_heartbeat_interval(Duration::from_secs(60))
        .with_backoff(BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(40),
            10,
        ))
        .with_shutdown_timeout(Duration::from_millis(500))
}

/// Starts a client against a single scripted transport.
#[allow(clippy::type_complexity)]
fn start_session(
    script: Vec<ScriptItem>,
    config: ChalkcastConfig,
) -> (
    ChalkcastClient,
    mpsc::Receiver<ChalkcastEvent>,
    Arc<StdMutex<Vec<String>>>,
    Arc<StdMutex<Option<(u16, String)>>>,
    Arc<StdMutex<Vec<String>>>,
) {
    let (transport, sent, closed) = MockTransport::new(script);
    let (connector, dialed) = MockConnector::new(vec![Ok(transport)]);
    let (credentials, _calls) = SequentialCredentials::new();
    let (directory, _lookups) = MockDirectory::new(&[]);
    let (client, events) = ChalkcastClient::start(connector, credentials, directory, config);
    (client, events, sent, closed, dialed)
}

// ════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connect_requests_sync_with_a_fresh_token() {
    let (mut client, mut events, sent, closed, dialed) = start_session(vec![], test_config());

    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 1 }
    );
    assert!(client.is_connected());
    assert_eq!(client.generation(), 1);

    // The dial URL carries the freshly fetched token.
    assert_eq!(dialed.lock().unwrap().len(), 1);
    assert!(dialed.lock().unwrap()[0].contains("token=tok-1"));

    // The first outbound frame is always the sync request.
    let outbound = decode_sent(&sent);
    assert_eq!(outbound[0], ClientMessage::RequestSync);

    client.shutdown().await;
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Disconnected { reason: None }
    );
    assert!(events.recv().await.is_none());
    assert_eq!(
        *closed.lock().unwrap(),
        Some((1000, "client shutting down".to_owned()))
    );
}

#[tokio::test]
async fn clean_close_ends_the_session_without_retry() {
    let (client, mut events, _sent, closed, dialed) =
        start_session(vec![server_close(1000, "")], test_config());

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Disconnected { reason: None }
    );
    assert!(events.recv().await.is_none());

    // One dial, no reconnect, and the transport was closed back.
    assert_eq!(dialed.lock().unwrap().len(), 1);
    assert_eq!(*closed.lock().unwrap(), Some((1000, String::new())));
    assert_eq!(client.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn being_kicked_ends_the_session() {
    let (_client, mut events, _sent, _closed, dialed) =
        start_session(vec![message(user_kicked_json(None))], test_config());

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Kicked { reason: None }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Disconnected {
            reason: Some("removed from lobby".to_owned())
        }
    );
    assert!(events.recv().await.is_none());
    assert_eq!(dialed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn lobby_close_ends_the_session() {
    let (_client, mut events, _sent, _closed, _dialed) = start_session(
        vec![message(lobby_closed_json(Some("maintenance window")))],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::LobbyClosed {
            reason: Some("maintenance window".to_owned())
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Disconnected {
            reason: Some("maintenance window".to_owned())
        }
    );
    assert!(events.recv().await.is_none());
}

// ════════════════════════════════════════════════════════════════════
// Heartbeats and liveness
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn inbound_heartbeats_produce_no_events() {
    let (client, mut events, _sent, _closed, _dialed) = start_session(
        vec![
            message(heartbeat_json()),
            message(user_joined_json("p1", "Alice", true)),
        ],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    // The keep-alive is swallowed; the join is the next thing observed.
    match next_event(&mut events).await {
        ChalkcastEvent::RosterChanged { roster } => {
            assert_eq!(roster.len(), 1);
            assert_eq!(roster[0].name, "Alice");
            assert!(roster[0].is_host);
        }
        other => panic!("expected RosterChanged, got {other:?}"),
    }
    assert_eq!(client.roster().await.len(), 1);
}

#[tokio::test]
async fn outbound_heartbeats_flow_on_the_interval() {
    let config = test_config().with_heartbeat_interval(Duration::from_millis(20));
    let (mut client, mut events, sent, _closed, _dialed) = start_session(vec![], config);

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    tokio::time::sleep(Duration::from_millis(110)).await;

    let outbound = decode_sent(&sent);
    assert_eq!(outbound[0], ClientMessage::RequestSync);
    let heartbeats = outbound
        .iter()
        .filter(|message| matches!(message, ClientMessage::Heartbeat))
        .count();
    assert!(heartbeats >= 2, "expected heartbeats, saw {heartbeats}");

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Question and answer flow
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn question_pushes_move_the_cursor_exactly_once() {
    let (mut client, mut events, _sent, _closed, _dialed) = start_session(
        vec![
            message(current_question_json(0, "q1")),
            message(next_question_json(1, "q2")),
            // Repeat push: dropped.
            message(next_question_json(1, "q2")),
            // Reveal for the already-passed question: dropped.
            message(show_correct_answer_json("q1", 0, Some(1))),
            message(show_correct_answer_json("q2", 1, Some(3))),
            // Backward push: dropped.
            message(next_question_json(0, "q1")),
        ],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::QuestionChanged {
            index: 0,
            id: "q1".to_owned()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::QuestionChanged {
            index: 1,
            id: "q2".to_owned()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::CorrectAnswerRevealed {
            id: "q2".to_owned(),
            index: 1,
            correct_index: Some(3)
        }
    );

    let progress = client.progress().await;
    assert_eq!(progress.question_index, Some(1));
    assert_eq!(progress.question_id, Some("q2".to_owned()));
    assert!(progress.correct_answer_revealed);

    // Nothing was emitted for the dropped frames: shutdown follows the
    // reveal directly.
    client.shutdown().await;
    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Disconnected { .. }
    ));
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn phase_only_moves_forward_on_pushes() {
    let (mut client, mut events, _sent, _closed, _dialed) = start_session(
        vec![
            message(lobby_updated_json("in_progress")),
            // Already in progress: dropped.
            message(test_started_json()),
            // Backward push: dropped.
            message(lobby_updated_json("waiting")),
            message(test_finished_json()),
        ],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::PhaseChanged {
            status: LobbyStatus::InProgress
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::PhaseChanged {
            status: LobbyStatus::Finished
        }
    );
    assert_eq!(
        client.progress().await.lobby_status,
        LobbyStatus::Finished
    );

    // `test_finished` does not end the session; the server still owns
    // the socket.
    assert!(client.is_connected());
    client.shutdown().await;
}

#[tokio::test]
async fn answer_records_merge_richer_data_wins() {
    let (mut client, mut events, _sent, _closed, _dialed) = start_session(
        vec![
            message(participant_answered_json("p1", "q1")),
            message(answer_received_json("p1", "q1", Some(2))),
            // Marker after the full record: downgrade, dropped.
            message(participant_answered_json("p1", "q1")),
            message(toggle_answers_json(true)),
        ],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::AnswerRecorded {
            participant_id: "p1".to_owned(),
            question_id: "q1".to_owned()
        }
    );
    // The full record upgrades the marker and re-announces.
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::AnswerRecorded {
            participant_id: "p1".to_owned(),
            question_id: "q1".to_owned()
        }
    );
    // The stale marker emitted nothing; the toggle is next.
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::AnswerVisibilityChanged { visible: true }
    );

    let answers = client.answers().await;
    let record = answers
        .get(&("p1".to_owned(), "q1".to_owned()))
        .expect("answer record");
    assert!(record.answered);
    assert_eq!(record.answer_index, Some(2));
    assert_eq!(record.submitted_at.as_deref(), Some("2026-03-01T10:00:00Z"));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Roster reconciliation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn bulk_ids_resolve_names_through_the_directory() {
    let (t1, _sent, _closed) = MockTransport::new(vec![
        message(participants_updated_json(&["p1", "p2"])),
        message(user_joined_json("p2", "Bo", false)),
    ]);
    let (connector, _dialed) = MockConnector::new(vec![Ok(t1)]);
    let (credentials, _calls) = SequentialCredentials::new();
    // Only p1 is known to the directory; p2 must wait for its join.
    let (directory, lookups) = MockDirectory::new(&[("p1", "Alice")]);
    let (mut client, mut events) =
        ChalkcastClient::start(connector, credentials, directory, test_config());

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));

    // Eventually the roster holds both: p1 from the directory lookup,
    // p2 from the later join.
    next_event_where(&mut events, "a roster with Alice and Bo", |event| {
        matches!(
            event,
            ChalkcastEvent::RosterChanged { roster }
                if roster.iter().any(|p| p.name == "Alice")
                    && roster.iter().any(|p| p.name == "Bo")
        )
    })
    .await;

    let roster = client.roster().await;
    assert_eq!(roster.len(), 2);
    assert_eq!(roster[0].id, "p1");
    assert_eq!(roster[0].name, "Alice");
    assert_eq!(roster[1].id, "p2");
    assert_eq!(roster[1].name, "Bo");

    // Both bare ids were looked up.
    let mut seen = lookups.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["p1".to_owned(), "p2".to_owned()]);

    client.shutdown().await;
}

#[tokio::test]
async fn repeated_bulk_lists_are_idempotent() {
    let roster_json = json!([
        { "id": "p1", "name": "Alice" },
        { "id": "p2", "name": "Bo" },
    ]);
    let (mut client, mut events, _sent, _closed, _dialed) = start_session(
        vec![
            message(participants_list_json(roster_json.clone())),
            // Same list again: no change, no event.
            message(participants_list_json(roster_json)),
            message(user_left_json("p2")),
        ],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    match next_event(&mut events).await {
        ChalkcastEvent::RosterChanged { roster } => assert_eq!(roster.len(), 2),
        other => panic!("expected RosterChanged, got {other:?}"),
    }
    // The duplicate list emitted nothing; the departure is next.
    match next_event(&mut events).await {
        ChalkcastEvent::RosterChanged { roster } => {
            assert_eq!(roster.len(), 1);
            assert_eq!(roster[0].id, "p1");
        }
        other => panic!("expected RosterChanged, got {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn placeholder_names_never_overwrite_learned_ones() {
    let (mut client, mut events, _sent, _closed, _dialed) = start_session(
        vec![
            message(user_joined_json("p1", "Alice", false)),
            // The server degrades names to placeholders under load;
            // neither of these may touch the learned name.
            message(participants_list_json(json!([
                { "id": "p1", "name": "Unknown User" },
            ]))),
            message(user_joined_json("p1", "unknown", false)),
            message(user_status_json("p1", "offline")),
            message(user_left_json("p1")),
        ],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    match next_event(&mut events).await {
        ChalkcastEvent::RosterChanged { roster } => {
            assert_eq!(roster[0].name, "Alice");
            assert!(roster[0].online);
        }
        other => panic!("expected RosterChanged, got {other:?}"),
    }
    // The placeholder frames changed nothing; the offline flip is the
    // next roster event, with the name intact.
    match next_event(&mut events).await {
        ChalkcastEvent::RosterChanged { roster } => {
            assert_eq!(roster[0].name, "Alice");
            assert!(!roster[0].online);
        }
        other => panic!("expected RosterChanged, got {other:?}"),
    }
    match next_event(&mut events).await {
        ChalkcastEvent::RosterChanged { roster } => assert!(roster.is_empty()),
        other => panic!("expected RosterChanged, got {other:?}"),
    }

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unexpected_close_reconnects_with_a_fresh_credential() {
    let (t1, sent1, _closed1) =
        MockTransport::new(vec![server_close(1006, "network blip")]);
    let (t2, sent2, _closed2) = MockTransport::new(vec![]);
    let (connector, dialed) = MockConnector::new(vec![Ok(t1), Ok(t2)]);
    let (credentials, calls) = SequentialCredentials::new();
    let (directory, _lookups) = MockDirectory::new(&[]);
    let (mut client, mut events) =
        ChalkcastClient::start(connector, credentials, directory, test_config());

    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 1 }
    );
    match next_event(&mut events).await {
        ChalkcastEvent::ConnectionLost { reason } => {
            assert!(reason.contains("1006"), "unexpected reason: {reason}");
        }
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(10)
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 2 }
    );

    // Each attempt fetched its own token and dialed with it.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    {
        let dialed = dialed.lock().unwrap();
        assert_eq!(dialed.len(), 2);
        assert!(dialed[0].contains("token=tok-1"));
        assert!(dialed[1].contains("token=tok-2"));
    }

    // Both connections opened with a sync request.
    assert_eq!(decode_sent(&sent1)[0], ClientMessage::RequestSync);
    assert_eq!(decode_sent(&sent2)[0], ClientMessage::RequestSync);

    assert_eq!(client.generation(), 2);
    assert_eq!(client.reconnect_attempts(), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn sync_snapshot_restores_state_after_reconnect() {
    let (t1, _sent1, _closed1) = MockTransport::new(vec![
        message(current_question_json(2, "q3")),
        recv_error("connection reset by peer"),
    ]);
    let (t2, _sent2, _closed2) = MockTransport::new(vec![message(sync_response_json(json!({
        "index": 1,
        "id": "q2",
        "lobby_status": "in_progress",
        "participants": [ { "id": "p1", "name": "Alice" } ],
    })))]);
    let (connector, _dialed) = MockConnector::new(vec![Ok(t1), Ok(t2)]);
    let (credentials, _calls) = SequentialCredentials::new();
    let (directory, _lookups) = MockDirectory::new(&[]);
    let (mut client, mut events) =
        ChalkcastClient::start(connector, credentials, directory, test_config());

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 1 }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::QuestionChanged {
            index: 2,
            id: "q3".to_owned()
        }
    );
    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::ConnectionLost { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectScheduled { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 2 }
    ));

    // The pulled snapshot is authoritative: phase first, then the cursor
    // (backward moves allowed here), then the roster.
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::PhaseChanged {
            status: LobbyStatus::InProgress
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::QuestionChanged {
            index: 1,
            id: "q2".to_owned()
        }
    );
    match next_event(&mut events).await {
        ChalkcastEvent::RosterChanged { roster } => {
            assert_eq!(roster.len(), 1);
            assert_eq!(roster[0].name, "Alice");
        }
        other => panic!("expected RosterChanged, got {other:?}"),
    }

    let progress = client.progress().await;
    assert_eq!(progress.question_index, Some(1));
    assert_eq!(progress.question_id, Some("q2".to_owned()));
    assert_eq!(progress.lobby_status, LobbyStatus::InProgress);

    client.shutdown().await;
}

#[tokio::test]
async fn retries_exhaust_then_manual_reconnect_recovers() {
    let (t1, _sent, _closed) = MockTransport::new(vec![]);
    let (connector, dialed) = MockConnector::new(vec![
        Err(ChalkcastError::TransportSend("dial refused".to_owned())),
        Err(ChalkcastError::TransportSend("dial refused".to_owned())),
        Ok(t1),
    ]);
    let (credentials, _calls) = SequentialCredentials::new();
    let (directory, _lookups) = MockDirectory::new(&[]);
    let config = test_config().with_backoff(BackoffPolicy::new(
        Duration::from_millis(5),
        Duration::from_millis(20),
        2,
    ));
    let (mut client, mut events) =
        ChalkcastClient::start(connector, credentials, directory, config);

    // A failed attempt is not a lost connection; the first events are
    // the retry schedule, then the give-up.
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(5)
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectFailed { attempts: 2 }
    );

    assert_eq!(client.connection_state(), ConnectionState::Errored);
    assert_eq!(client.reconnect_attempts(), 2);
    let last_error = client.last_error().await.expect("a recorded error");
    assert!(last_error.contains("exhausted"), "got: {last_error}");

    // Sends are refused while errored.
    assert!(matches!(
        client.submit_answer("q1", 0),
        Err(ChalkcastError::NotConnected)
    ));

    // A manual reconnect resets the budget and dials again.
    client.reconnect().expect("session still running");
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 1 }
    );
    assert_eq!(client.reconnect_attempts(), 0);
    assert!(client.is_connected());
    assert_eq!(dialed.lock().unwrap().len(), 3);

    client.shutdown().await;
}

#[tokio::test]
async fn visibility_regained_cuts_the_backoff_short() {
    let (t1, _sent, _closed) = MockTransport::new(vec![]);
    let (connector, dialed) = MockConnector::new(vec![
        Err(ChalkcastError::TransportSend("dial refused".to_owned())),
        Ok(t1),
    ]);
    let (credentials, _calls) = SequentialCredentials::new();
    let (directory, _lookups) = MockDirectory::new(&[]);
    // A backoff long enough that only the visibility signal can explain
    // the prompt reconnect.
    let config = test_config().with_backoff(BackoffPolicy::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
        10,
    ));
    let (mut client, mut events) =
        ChalkcastClient::start(connector, credentials, directory, config);

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectScheduled { attempt: 1, .. }
    ));

    client
        .notify_visibility_regained()
        .expect("session still running");
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 1 }
    );
    assert_eq!(client.reconnect_attempts(), 0);

    // While connected the signal is a no-op.
    client
        .notify_visibility_regained()
        .expect("session still running");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(client.is_connected());
    assert_eq!(dialed.lock().unwrap().len(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn reconnect_during_backoff_retries_now_and_resets_the_count() {
    let (t1, _sent, _closed) = MockTransport::new(vec![]);
    let (connector, dialed) = MockConnector::new(vec![
        Err(ChalkcastError::TransportSend("dial refused".to_owned())),
        Err(ChalkcastError::TransportSend("dial refused".to_owned())),
        Ok(t1),
    ]);
    let (credentials, _calls) = SequentialCredentials::new();
    let (directory, _lookups) = MockDirectory::new(&[]);
    // Waits long enough that only the manual reconnects can explain the
    // prompt dials.
    let config = test_config().with_backoff(BackoffPolicy::new(
        Duration::from_secs(5),
        Duration::from_secs(30),
        10,
    ));
    let (mut client, mut events) =
        ChalkcastClient::start(connector, credentials, directory, config);

    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_secs(5)
        }
    );

    // Cutting the wait short restarts the failure count: the next failed
    // dial schedules as attempt 1 again, not attempt 2.
    client.reconnect().expect("session still running");
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_secs(5)
        }
    );

    client.reconnect().expect("session still running");
    assert_eq!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { generation: 1 }
    );
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(dialed.lock().unwrap().len(), 3);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Failure modes
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn sends_are_refused_between_connections() {
    let (t1, _sent, _closed) = MockTransport::new(vec![stream_end()]);
    let (connector, _dialed) = MockConnector::new(vec![Ok(t1)]);
    let (credentials, _calls) = SequentialCredentials::new();
    let (directory, _lookups) = MockDirectory::new(&[]);
    // A long backoff holds the session in the disconnected window.
    let config = test_config().with_backoff(BackoffPolicy::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
        10,
    ));
    let (mut client, mut events) =
        ChalkcastClient::start(connector, credentials, directory, config);

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    match next_event(&mut events).await {
        ChalkcastEvent::ConnectionLost { reason } => {
            assert_eq!(reason, "transport stream ended");
        }
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::ReconnectScheduled { .. }
    ));

    assert!(!client.is_connected());
    assert!(matches!(
        client.submit_answer("q1", 2),
        Err(ChalkcastError::NotConnected)
    ));
    assert!(matches!(
        client.request_participants(),
        Err(ChalkcastError::NotConnected)
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_are_counted_and_skipped() {
    let (mut client, mut events, _sent, _closed, _dialed) = start_session(
        vec![
            message("{this is not json"),
            message(user_joined_json("p1", "Alice", false)),
        ],
        test_config(),
    );

    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::Connected { .. }
    ));
    // The bad frame is dropped; the session keeps going.
    assert!(matches!(
        next_event(&mut events).await,
        ChalkcastEvent::RosterChanged { .. }
    ));
    assert_eq!(client.parse_failures(), 1);
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn event_overflow_drops_updates_but_delivers_disconnected() {
    let mut script: Vec<ScriptItem> = (1..=5)
        .map(|n| {
            message(user_joined_json(
                &format!("p{n}"),
                &format!("Player {n}"),
                false,
            ))
        })
        .collect();
    script.push(server_close(1000, ""));

    let config = test_config().with_event_channel_capacity(1);
    let (_client, mut events, _sent, _closed, _dialed) = start_session(script, config);

    // Sit idle while the whole session plays out. The tiny channel must
    // shed the roster churn instead of stalling the session task, and
    // the terminal notice must wait for us.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let delivered = tokio::time::timeout(Duration::from_secs(2), async {
        let mut delivered = Vec::new();
        while let Some(event) = events.recv().await {
            delivered.push(event);
        }
        delivered
    })
    .await
    .expect("the session should wrap up once the consumer drains");

    // Five joins were shed; only the bookends made it through.
    assert_eq!(
        delivered,
        vec![
            ChalkcastEvent::Connected { generation: 1 },
            ChalkcastEvent::Disconnected { reason: None },
        ]
    );
}
