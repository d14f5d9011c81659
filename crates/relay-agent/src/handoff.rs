use crate::{
    AgentId, AgentRegistry, EventEmitter, EventKind, RunEvent, ToolCallOutcome, ToolError,
    ToolOutput,
};
use serde_json::json;

/// Handoff decision for one batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandoffResolution {
    /// Agent that becomes active for the next round.
    pub target: Option<AgentId>,
    pub discarded: Vec<AgentId>,
}

/// Pick at most one handoff from a batch of outcomes.
///
/// The handoff with the lowest batch position wins and is reported with a
/// `Handoff` event by the caller. Later handoffs are rewritten into plain text
/// saying they were not performed and keep their context updates. Handoffs to
/// agents missing from `registry` become error outcomes, which like any failed
/// tool call carry no context updates; each emits a `Warning` event.
pub fn resolve_handoffs(
    outcomes: &mut [ToolCallOutcome],
    registry: &AgentRegistry,
    emitter: &dyn EventEmitter,
    run_id: &str,
) -> HandoffResolution {
    let mut resolution = HandoffResolution::default();
    outcomes.sort_by_key(|outcome| outcome.position);

    for outcome in outcomes.iter_mut() {
        let Some(requested) = outcome.handoff_target().cloned() else {
            continue;
        };

        if !registry.contains(&requested) {
            tracing::warn!(
                run_id,
                call_id = %outcome.call.id,
                target = %requested,
                "handoff to unknown agent"
            );
            let error =
                ToolError::execution(format!("cannot hand off to unknown agent '{requested}'"));
            emitter.emit(RunEvent::with_json(
                EventKind::Warning,
                run_id,
                json!({
                    "call_id": outcome.call.id,
                    "message": error.to_string(),
                }),
            ));
            outcome.result = Err(error);
            continue;
        }

        match &resolution.target {
            None => resolution.target = Some(requested),
            Some(winner) => {
                tracing::warn!(
                    run_id,
                    call_id = %outcome.call.id,
                    discarded = %requested,
                    winner = %winner,
                    "discarding additional handoff in batch"
                );
                emitter.emit(RunEvent::with_json(
                    EventKind::HandoffDiscarded,
                    run_id,
                    json!({
                        "call_id": outcome.call.id,
                        "discarded": requested.as_str(),
                        "winner": winner.as_str(),
                    }),
                ));
                let replacement = ToolOutput {
                    context_updates: outcome
                        .result
                        .as_ref()
                        .map(|output| output.context_updates.clone())
                        .unwrap_or_default(),
                    ..ToolOutput::text(format!(
                        "Handoff to agent '{requested}' was not performed; control passes to '{winner}'."
                    ))
                };
                outcome.result = Ok(replacement);
                resolution.discarded.push(requested);
            }
        }
    }

    resolution
}
