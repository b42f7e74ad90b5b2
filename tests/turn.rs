//! Turn orchestration integration tests
//!
//! Exercises full turns against scripted collaborators: no audio hardware,
//! no live backend.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast;

use parley_client::services::VoiceReply;
use parley_client::{
    Error, FALLBACK_REPLY, MessageStatus, Role, TurnEvent, TurnState,
};

mod common;

use common::{harness, harness_with_pacing, segmented_reply, simple_reply};

fn drain_events(rx: &mut broadcast::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn state_changes(events: &[TurnEvent]) -> Vec<TurnState> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_text_turn_happy_path() {
    let h = harness(false, Vec::new());
    h.backend.push_reply(simple_reply("hi!"));
    let mut rx = h.events.subscribe();

    h.orchestrator.submit_text("hello").await.unwrap();

    let messages = h.orchestrator.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text, "hi!");
    assert_eq!(messages[1].status, MessageStatus::Committed);

    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
    assert_eq!(*h.backend.sent.lock().unwrap(), vec!["hello".to_string()]);

    let events = drain_events(&mut rx);
    assert_eq!(
        state_changes(&events),
        vec![TurnState::Sending, TurnState::StreamingResponse, TurnState::Idle]
    );
}

#[tokio::test]
async fn test_submit_while_active_rejected() {
    let h = harness(false, Vec::new());
    let gate = h.backend.gate_send();
    h.backend.push_reply(simple_reply("done"));

    let orchestrator = Arc::clone(&h.orchestrator);
    let turn = tokio::spawn(async move { orchestrator.submit_text("first").await });

    // Wait for the first turn to reach the send
    let mut tries = 0;
    while h.orchestrator.state().await != TurnState::Sending {
        tokio::time::sleep(Duration::from_millis(2)).await;
        tries += 1;
        assert!(tries < 500, "first turn never reached sending");
    }

    let err = h.orchestrator.submit_text("second").await.unwrap_err();
    assert!(matches!(err, Error::AlreadyActiveTurn));

    gate.notify_one();
    turn.await.unwrap().unwrap();

    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
    let messages = h.orchestrator.messages().await;
    let user_texts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(user_texts, vec!["first"]);
}

#[tokio::test]
async fn test_send_failure_appends_fallback() {
    let h = harness(false, Vec::new());
    h.backend.push_send_error(Error::Service("request timeout".to_string()));
    let mut rx = h.events.subscribe();

    h.orchestrator.submit_text("hello?").await.unwrap();

    let messages = h.orchestrator.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text, FALLBACK_REPLY);
    assert_eq!(messages[1].status, MessageStatus::Error);
    assert!(messages[1].id.is_none());

    assert_eq!(h.orchestrator.state().await, TurnState::Idle);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::TurnFailed { .. })));
    let states = state_changes(&events);
    assert_eq!(states.last(), Some(&TurnState::Idle));
    assert!(states.contains(&TurnState::Failed));
}

#[tokio::test]
async fn test_segmented_reply_plays_in_arrival_order() {
    let h = harness(true, Vec::new());
    let (a, b, c) = (vec![1_u8, 1], vec![2_u8, 2], vec![3_u8, 3]);
    h.backend.push_reply(segmented_reply(&[
        ("a", Some(a.clone())),
        ("b", Some(b.clone())),
        ("c", Some(c.clone())),
    ]));
    let mut rx = h.events.subscribe();

    h.orchestrator.submit_text("tell me a story").await.unwrap();

    let messages = h.orchestrator.messages().await;
    let assistant_texts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(assistant_texts, vec!["a", "b", "c"]);

    assert_eq!(h.sink.played(), vec![a, b, c]);
    assert!(!h.sink.overlap_detected.load(Ordering::SeqCst));

    let events = drain_events(&mut rx);
    let now_playing: Vec<Option<String>> = events
        .into_iter()
        .filter_map(|e| match e {
            TurnEvent::NowPlaying(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(
        now_playing,
        vec![
            Some("a".to_string()),
            None,
            Some("b".to_string()),
            None,
            Some("c".to_string()),
            None
        ]
    );

    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_cancel_mid_reveal_keeps_prefix() {
    let h = harness_with_pacing(false, Vec::new(), Duration::from_millis(15));
    let full_text = "The quick brown fox jumps over the lazy dog";
    h.backend.push_reply(simple_reply(full_text));
    let mut rx = h.events.subscribe();

    let orchestrator = Arc::clone(&h.orchestrator);
    let turn = tokio::spawn(async move { orchestrator.submit_text("go").await });

    // Wait for the reveal to start emitting
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reveal never started")
            .unwrap();
        if matches!(event, TurnEvent::RevealProgress { .. }) {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    h.orchestrator.cancel().await;
    turn.await.unwrap().unwrap();

    let messages = h.orchestrator.messages().await;
    let reply = messages.last().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.status, MessageStatus::Committed);
    assert!(!reply.text.is_empty());
    assert!(reply.text.len() < full_text.len());
    assert!(full_text.starts_with(&reply.text));

    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_empty_clip_rejected_before_network() {
    let h = harness(true, Vec::new());

    h.orchestrator.begin_voice_capture().await.unwrap();
    let err = h.orchestrator.finish_voice_capture().await.unwrap_err();

    assert!(matches!(err, Error::EmptyClip(_)));
    assert_eq!(h.backend.transcribe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_voice_turn_with_folded_reply() {
    let h = harness(true, vec![0.1; 1600]);
    h.backend.push_transcription(VoiceReply {
        transcript: "what time is it".to_string(),
        reply: Some(simple_reply("late")),
    });

    h.orchestrator.begin_voice_capture().await.unwrap();
    h.orchestrator.finish_voice_capture().await.unwrap();

    let messages = h.orchestrator.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text, "what time is it");
    assert_eq!(messages[1].text, "late");

    // The folded reply skips the separate send
    assert!(h.backend.sent.lock().unwrap().is_empty());
    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_voice_turn_without_folded_reply_sends_transcript() {
    let h = harness(true, vec![0.1; 1600]);
    h.backend.push_transcription(VoiceReply {
        transcript: "good evening".to_string(),
        reply: None,
    });
    h.backend.push_reply(simple_reply("evening!"));

    h.orchestrator.begin_voice_capture().await.unwrap();
    h.orchestrator.finish_voice_capture().await.unwrap();

    assert_eq!(
        *h.backend.sent.lock().unwrap(),
        vec!["good evening".to_string()]
    );

    let messages = h.orchestrator.messages().await;
    assert_eq!(messages[0].text, "good evening");
    assert_eq!(messages[1].text, "evening!");
    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_server_ids_adopted_without_reordering() {
    let h = harness(false, Vec::new());
    let mut reply = simple_reply("hi!");
    reply.user_message_id = Some("10".to_string());
    reply.segments[0].id = Some("11".to_string());
    h.backend.push_reply(reply);

    h.orchestrator.submit_text("hello").await.unwrap();

    let messages = h.orchestrator.messages().await;
    assert_eq!(messages[0].id.as_deref(), Some("10"));
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[1].id.as_deref(), Some("11"));
    assert_eq!(messages[1].text, "hi!");
}

#[tokio::test]
async fn test_missing_audio_is_synthesized_lazily() {
    let h = harness(true, Vec::new());
    h.backend.push_reply(simple_reply("spoken reply"));
    h.backend.push_synthesis(vec![9_u8, 9, 9]);

    h.orchestrator.submit_text("speak up").await.unwrap();

    assert_eq!(h.backend.synth_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.played(), vec![vec![9_u8, 9, 9]]);
    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_synthesis_failure_degrades_to_text_only() {
    let h = harness(true, Vec::new());
    h.backend.push_reply(simple_reply("quiet reply"));
    h.backend
        .push_synthesis_error(Error::Service("tts down".to_string()));

    h.orchestrator.submit_text("speak up").await.unwrap();

    assert_eq!(h.backend.synth_calls.load(Ordering::SeqCst), 1);
    assert!(h.sink.played().is_empty());

    let messages = h.orchestrator.messages().await;
    assert_eq!(messages[1].text, "quiet reply");
    assert_eq!(messages[1].status, MessageStatus::Committed);
    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_voice_disabled_never_plays_audio() {
    let h = harness(false, Vec::new());
    h.backend
        .push_reply(segmented_reply(&[("hello there", Some(vec![7_u8]))]));

    h.orchestrator.submit_text("hi").await.unwrap();

    assert!(h.sink.played().is_empty());
    assert_eq!(h.backend.synth_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.orchestrator.state().await, TurnState::Idle);
}

#[tokio::test]
async fn test_suggestion_and_companionship_surfaced() {
    let h = harness(false, Vec::new());
    let mut reply = simple_reply("sure");
    reply.suggestion = Some("ask about the weather".to_string());
    reply.companionship_score = Some(5);
    h.backend.push_reply(reply);
    let mut rx = h.events.subscribe();

    h.orchestrator.submit_text("hey").await.unwrap();

    let events = drain_events(&mut rx);
    assert!(events.iter().any(
        |e| matches!(e, TurnEvent::SuggestionOffered(topic) if topic == "ask about the weather")
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::CompanionshipUpdated(5))));
}

#[tokio::test]
async fn test_history_seeds_the_log() {
    use parley_client::services::HistoryEntry;

    let h = harness(false, Vec::new());
    *h.backend.history.lock().unwrap() = vec![
        HistoryEntry {
            id: Some("1".to_string()),
            role: Role::User,
            text: "earlier question".to_string(),
            emotion: None,
        },
        HistoryEntry {
            id: Some("2".to_string()),
            role: Role::Assistant,
            text: "earlier answer".to_string(),
            emotion: None,
        },
    ];

    let count = h.orchestrator.open_conversation().await.unwrap();
    assert_eq!(count, 2);

    let messages = h.orchestrator.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "earlier question");
    assert_eq!(messages[1].text, "earlier answer");
    assert_eq!(messages[1].status, MessageStatus::Committed);
}
