mod support;

use relay_agent::{
    AbortHandle, Agent, AgentId, AgentRegistry, BufferedEventEmitter, ContextVariables,
    DEFAULT_NUDGE_MESSAGE, Engine, EventKind, FlagPatternProbe, History, PriceTable, RetryPolicy,
    RunConfig, TerminationReason, ToolOutput, ToolSpec,
};
use relay_llm::{LlmError, Message, Role, Usage};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{
    MODEL, Step, client_with_adapter, delayed_text_response, enqueue_all, recorded,
    text_response, tool_call_response, tool_call_response_with_usage, tool_result_by_call_id,
    weather_registry,
};

fn weather_call(id: &str, call_id: &str) -> Step {
    tool_call_response(
        id,
        vec![(call_id, "get_weather", json!({ "location": "Springfield" }))],
    )
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        jitter: false,
        ..RetryPolicy::default()
    }
}

#[tokio::test(flavor = "current_thread")]
async fn max_turns_stops_after_one_round() {
    let (client, steps, requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [weather_call("resp-1", "call-1"), text_response("resp-2", "unused")],
    );
    let engine = Engine::new(
        client,
        RunConfig {
            max_turns: Some(1),
            ..RunConfig::default()
        },
    )
    .expect("engine should initialize");

    let result = engine
        .run(
            &weather_registry(),
            &AgentId::new("Weather"),
            vec![Message::user("weather?")],
            ContextVariables::new(),
        )
        .await
        .expect("run should finish");

    assert_eq!(result.reason, TerminationReason::MaxTurns);
    assert_eq!(recorded(&requests).len(), 1);
    assert_eq!(result.turns.len(), 1);
    assert_eq!(result.history.len(), 3);
    assert_eq!(result.history.last().map(|m| m.role), Some(Role::Tool));
}

#[tokio::test(flavor = "current_thread")]
async fn price_limit_stops_after_tool_results_are_recorded() {
    let (client, steps, requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [
            tool_call_response_with_usage(
                "resp-1",
                vec![("call-1", "get_weather", json!({ "location": "Springfield" }))],
                Usage::new(600_000, 0),
            ),
            text_response("resp-2", "unused"),
        ],
    );
    let pricing = PriceTable::new().with_model(MODEL, 1.0, 4.0);
    let emitter = Arc::new(BufferedEventEmitter::default());
    let engine = Engine::new(
        client,
        RunConfig {
            price_limit: Some(0.5),
            ..RunConfig::default()
        },
    )
    .expect("engine should initialize")
    .with_pricing(Arc::new(pricing))
    .with_emitter(emitter.clone());

    let result = engine
        .run(&weather_registry(), &AgentId::new("Weather"), vec![], ContextVariables::new())
        .await
        .expect("run should finish");

    assert_eq!(result.reason, TerminationReason::PriceLimit);
    assert!((result.cost - 0.6).abs() < 1e-9, "cost was {}", result.cost);
    assert_eq!(recorded(&requests).len(), 1);
    let last = result.history.last().expect("history is not empty");
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.text(), "sunny");
    assert!(emitter.kinds().contains(&EventKind::CostUpdated));
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_model_is_free() {
    let (client, steps, _requests) = client_with_adapter();
    enqueue_all(&steps, [text_response("resp-1", "hi")]);
    let engine = Engine::new(
        client,
        RunConfig {
            price_limit: Some(0.0001),
            ..RunConfig::default()
        },
    )
    .expect("engine should initialize")
    .with_pricing(Arc::new(PriceTable::new().with_model("some-other-model", 5.0, 5.0)));

    let result = engine
        .run(&weather_registry(), &AgentId::new("Weather"), vec![], ContextVariables::new())
        .await
        .expect("run should finish");

    assert_eq!(result.cost, 0.0);
    assert_eq!(result.reason, TerminationReason::Completed);
}

#[tokio::test(flavor = "current_thread")]
async fn exhausted_backend_reports_failure_with_history_intact() {
    let (client, steps, requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [
            weather_call("resp-1", "call-1"),
            Step::Fail(LlmError::provider(Some(503), "overloaded")),
            Step::Fail(LlmError::provider(Some(503), "overloaded")),
            Step::Fail(LlmError::provider(Some(503), "still overloaded")),
        ],
    );
    let emitter = Arc::new(BufferedEventEmitter::default());
    let engine = Engine::new(
        client,
        RunConfig {
            retry: fast_retry(3),
            ..RunConfig::default()
        },
    )
    .expect("engine should initialize")
    .with_emitter(emitter.clone());

    let result = engine
        .run(
            &weather_registry(),
            &AgentId::new("Weather"),
            vec![Message::user("weather?")],
            ContextVariables::new(),
        )
        .await
        .expect("backend failure is a run outcome");

    assert_eq!(result.reason, TerminationReason::BackendFailure);
    assert!(result.reason.is_failure());
    assert_eq!(recorded(&requests).len(), 4);
    assert_eq!(result.history.len(), 3);
    assert!(
        result
            .failure
            .as_deref()
            .is_some_and(|failure| failure.contains("still overloaded"))
    );
    assert!(emitter.kinds().contains(&EventKind::Error));
}

#[tokio::test(flavor = "current_thread")]
async fn abort_interrupts_pending_completion() {
    let (client, steps, _requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [delayed_text_response("resp-1", "too late", Duration::from_secs(30))],
    );
    let engine = Engine::new(client, RunConfig::default()).expect("engine should initialize");
    let abort = AbortHandle::new();
    let registry = weather_registry();
    let seed = vec![Message::user("weather?")];

    let agent_id = AgentId::new("Weather");
    let run = engine.run_with_abort(
        &registry,
        &agent_id,
        seed.clone(),
        ContextVariables::new(),
        abort.clone(),
    );
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.request_abort();
    };
    let (result, ()) = tokio::join!(run, cancel);
    let result = result.expect("run should finish");

    assert_eq!(result.reason, TerminationReason::Interrupted);
    assert_eq!(result.history.messages(), seed.as_slice());
    assert!(result.turns.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn abort_before_start_runs_no_rounds() {
    let (client, _steps, requests) = client_with_adapter();
    let engine = Engine::new(client, RunConfig::default()).expect("engine should initialize");
    let abort = AbortHandle::new();
    abort.request_abort();

    let result = engine
        .run_with_abort(
            &weather_registry(),
            &AgentId::new("Weather"),
            vec![],
            ContextVariables::new(),
            abort,
        )
        .await
        .expect("run should finish");

    assert_eq!(result.reason, TerminationReason::Interrupted);
    assert!(recorded(&requests).is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn engine_runs_normally_after_an_aborted_run() {
    let (client, steps, requests) = client_with_adapter();
    enqueue_all(&steps, [text_response("resp-1", "back again")]);
    let engine = Engine::new(client, RunConfig::default()).expect("engine should initialize");
    let registry = weather_registry();

    let abort = AbortHandle::new();
    abort.request_abort();
    let interrupted = engine
        .run_with_abort(
            &registry,
            &AgentId::new("Weather"),
            vec![Message::user("weather?")],
            ContextVariables::new(),
            abort,
        )
        .await
        .expect("aborted run should finish");
    assert_eq!(interrupted.reason, TerminationReason::Interrupted);
    assert!(recorded(&requests).is_empty());

    let result = engine
        .run(
            &registry,
            &AgentId::new("Weather"),
            interrupted.history.into_messages(),
            ContextVariables::new(),
        )
        .await
        .expect("follow-up run should finish");

    assert_eq!(result.reason, TerminationReason::Completed);
    assert_eq!(recorded(&requests).len(), 1);
    assert_eq!(result.final_text(), Some("back again"));
}

fn slow_registry() -> AgentRegistry {
    let slow_tool = |name: &str| {
        ToolSpec::builder(name).handler(|_args, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("finished"))
        })
    };
    let mut registry = AgentRegistry::new();
    registry
        .register(
            Agent::new("Crawler", MODEL)
                .with_tool(slow_tool("crawl_site"))
                .with_tool(slow_tool("crawl_archive")),
        )
        .expect("agent should register");
    registry
}

#[tokio::test(flavor = "current_thread")]
async fn abort_during_tool_batch_answers_every_call() {
    let (client, steps, requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [
            tool_call_response(
                "resp-1",
                vec![
                    ("call-site", "crawl_site", json!({})),
                    ("call-archive", "crawl_archive", json!({})),
                ],
            ),
            text_response("resp-2", "unused"),
        ],
    );
    let engine = Engine::new(client, RunConfig::default()).expect("engine should initialize");
    let abort = AbortHandle::new();
    let registry = slow_registry();

    let agent_id = AgentId::new("Crawler");
    let run = engine.run_with_abort(
        &registry,
        &agent_id,
        vec![Message::user("crawl everything")],
        ContextVariables::new(),
        abort.clone(),
    );
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        abort.request_abort();
    };
    let (result, ()) = tokio::join!(run, cancel);
    let result = result.expect("run should finish");

    assert_eq!(result.reason, TerminationReason::Interrupted);
    assert_eq!(recorded(&requests).len(), 1);
    let messages = result.history.messages();
    assert_eq!(messages.len(), 4);
    for call_id in ["call-site", "call-archive"] {
        assert_eq!(
            tool_result_by_call_id(messages, call_id).map(Message::text),
            Some("Error: tool call cancelled")
        );
    }
    assert!(History::from_seed(messages.to_vec()).is_ok());
}

#[tokio::test(flavor = "current_thread")]
async fn force_mode_nudges_until_flag_appears() {
    let (client, steps, requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [
            text_response("resp-1", "I could not find anything."),
            weather_call("resp-2", "call-1"),
            text_response("resp-3", "Got it: FLAG{sunny_days}"),
            text_response("resp-4", "unused"),
        ],
    );
    let emitter = Arc::new(BufferedEventEmitter::default());
    let engine = Engine::new(
        client,
        RunConfig {
            force_until_success: true,
            ..RunConfig::default()
        },
    )
    .expect("engine should initialize")
    .with_success_probe(Arc::new(
        FlagPatternProbe::ctf_default().expect("default pattern compiles"),
    ))
    .with_emitter(emitter.clone());

    let result = engine
        .run(
            &weather_registry(),
            &AgentId::new("Weather"),
            vec![Message::user("find the flag")],
            ContextVariables::new(),
        )
        .await
        .expect("run should finish");

    assert_eq!(result.reason, TerminationReason::Succeeded);
    assert_eq!(recorded(&requests).len(), 3);
    let messages = result.history.messages();
    assert_eq!(messages[2].role, Role::User);
    assert_eq!(messages[2].text(), DEFAULT_NUDGE_MESSAGE);
    let nudges = emitter
        .kinds()
        .into_iter()
        .filter(|kind| *kind == EventKind::NudgeInjected)
        .count();
    assert_eq!(nudges, 1);
    assert!(History::from_seed(messages.to_vec()).is_ok());

    let nudged_turn = &result.turns[0].appended;
    assert_eq!(nudged_turn.len(), 2);
    assert_eq!(nudged_turn[1].text(), DEFAULT_NUDGE_MESSAGE);
    let mut rebuilt = vec![Message::user("find the flag")];
    for turn in &result.turns {
        rebuilt.extend(turn.appended.iter().cloned());
    }
    assert_eq!(rebuilt.as_slice(), messages);
}

#[tokio::test(flavor = "current_thread")]
async fn success_probe_outranks_completion() {
    let (client, steps, _requests) = client_with_adapter();
    enqueue_all(&steps, [text_response("resp-1", "the answer is ctf{42}")]);
    let probe = |history: &History| {
        history
            .last_assistant()
            .is_some_and(|message| message.text().contains("ctf{"))
    };
    let engine = Engine::new(client, RunConfig::default())
        .expect("engine should initialize")
        .with_success_probe(Arc::new(probe));

    let result = engine
        .run(&weather_registry(), &AgentId::new("Weather"), vec![], ContextVariables::new())
        .await
        .expect("run should finish");

    assert_eq!(result.reason, TerminationReason::Succeeded);
}

#[tokio::test(flavor = "current_thread")]
async fn max_turns_caps_force_mode() {
    let (client, steps, _requests) = client_with_adapter();
    enqueue_all(
        &steps,
        [
            text_response("resp-1", "nothing"),
            text_response("resp-2", "still nothing"),
        ],
    );
    let engine = Engine::new(
        client,
        RunConfig {
            force_until_success: true,
            nudge_message: "Keep going.".to_string(),
            max_turns: Some(2),
            ..RunConfig::default()
        },
    )
    .expect("engine should initialize");

    let result = engine
        .run(&weather_registry(), &AgentId::new("Weather"), vec![], ContextVariables::new())
        .await
        .expect("run should finish");

    assert_eq!(result.reason, TerminationReason::MaxTurns);
    let texts: Vec<&str> = result.history.messages().iter().map(Message::text).collect();
    assert_eq!(texts, vec!["nothing", "Keep going.", "still nothing"]);
}
