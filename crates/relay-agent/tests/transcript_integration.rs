mod support;

use relay_agent::{
    AgentId, BufferedEventEmitter, ContextVariables, Engine, EventKind, RunConfig,
    TerminationReason, TranscriptWriter, read_transcript,
};
use relay_llm::Message;
use serde_json::json;
use std::sync::Arc;
use support::{client_with_adapter, enqueue_all, text_response, tool_call_response, weather_registry};
use tempfile::tempdir;

#[tokio::test(flavor = "current_thread")]
async fn transcript_replays_to_the_same_history() {
    let dir = tempdir().expect("temp dir should be created");
    let path = dir.path().join("runs").join("weather.jsonl");

    let (client, steps, _requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [
            tool_call_response(
                "resp-1",
                vec![("call-1", "get_weather", json!({ "location": "Springfield" }))],
            ),
            text_response("resp-2", "Sunny."),
        ],
    );
    let engine = Engine::new(client, RunConfig::default())
        .expect("engine should initialize")
        .with_transcript(TranscriptWriter::create(&path).expect("transcript should open"));

    let result = engine
        .run(
            &weather_registry(),
            &AgentId::new("Weather"),
            vec![Message::user("weather?")],
            ContextVariables::new(),
        )
        .await
        .expect("run should finish");

    let transcript = read_transcript(&path).expect("transcript should replay");
    assert_eq!(transcript.history, result.history);
    let summary = transcript.summary.expect("finished run has a summary");
    assert_eq!(summary.run_id, result.run_id);
    assert_eq!(summary.reason, TerminationReason::Completed);
    assert_eq!(summary.turns, 2);
    assert_eq!(summary.active_agent, AgentId::new("Weather"));
}

#[tokio::test(flavor = "current_thread")]
async fn replayed_transcript_seeds_a_follow_up_run() {
    let dir = tempdir().expect("temp dir should be created");
    let path = dir.path().join("session.jsonl");

    let (client, steps, requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [
            text_response("resp-1", "Hello!"),
            text_response("resp-2", "Still here."),
        ],
    );
    let first = Engine::new(client.clone(), RunConfig::default())
        .expect("engine should initialize")
        .with_transcript(TranscriptWriter::create(&path).expect("transcript should open"));
    first
        .run(
            &weather_registry(),
            &AgentId::new("Weather"),
            vec![Message::user("hi")],
            ContextVariables::new(),
        )
        .await
        .expect("first run should finish");

    let mut seed = read_transcript(&path)
        .expect("transcript should replay")
        .history
        .into_messages();
    seed.push(Message::user("are you there?"));

    let second = Engine::new(client, RunConfig::default()).expect("engine should initialize");
    let result = second
        .run(
            &weather_registry(),
            &AgentId::new("Weather"),
            seed,
            ContextVariables::new(),
        )
        .await
        .expect("second run should finish");

    assert_eq!(result.history.len(), 4);
    let last_request = requests
        .lock()
        .expect("requests mutex")
        .last()
        .cloned()
        .expect("a request was sent");
    let texts: Vec<&str> = last_request.messages.iter().map(Message::text).collect();
    assert_eq!(
        texts,
        vec!["You answer weather questions.", "hi", "Hello!", "are you there?"]
    );
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "current_thread")]
async fn transcript_failures_do_not_abort_the_run() {
    let writer = TranscriptWriter::append("/dev/full").expect("device should open");

    let (client, steps, _requests) = client_with_adapter();
    enqueue_all(&steps, [text_response("resp-1", "ok")]);
    let emitter = Arc::new(BufferedEventEmitter::default());
    let engine = Engine::new(client, RunConfig::default())
        .expect("engine should initialize")
        .with_emitter(emitter.clone())
        .with_transcript(writer);

    let result = engine
        .run(
            &weather_registry(),
            &AgentId::new("Weather"),
            vec![Message::user("hi")],
            ContextVariables::new(),
        )
        .await
        .expect("run should finish");

    assert_eq!(result.reason, TerminationReason::Completed);
    assert_eq!(result.history.len(), 2);
    let kinds = emitter.kinds();
    assert!(kinds.contains(&EventKind::Warning));
    assert_eq!(kinds.last(), Some(&EventKind::RunEnd));
}
