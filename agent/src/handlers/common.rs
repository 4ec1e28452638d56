use crate::agent::Agent;
use agent_core::types::{ChangeSummary, UnitState};
use agent_core::AgentError;
use serde_json::Value;

/// Narrows a flat key→value slice (spec §3 Slice) to the entries whose
/// key contains `needle`, the pattern every handler in
/// `original_source/watcher.py`'s `handle_commit()` uses to build its
/// per-subsystem memoization payload (e.g. `{k: v for k, v in
/// node.items() if "/easytier/" in k}`).
pub fn filter_contains(map: &Value, needle: &str) -> Value {
    let Value::Object(obj) = map else {
        return Value::Object(Default::default());
    };
    Value::Object(
        obj.iter()
            .filter(|(k, _)| k.contains(needle))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// Narrows a slice to the entries whose key starts with `prefix`.
pub fn filter_prefix(map: &Value, prefix: &str) -> Value {
    let Value::Object(obj) = map else {
        return Value::Object(Default::default());
    };
    Value::Object(
        obj.iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// Merges the entries of `src` whose key starts with `prefix` into `dst`
/// in place. Used to fold a `/global/<subsystem>/*` slice into a
/// `/nodes/<self>/<subsystem>/*` one before handing both to a single
/// `HashMemo::changed` call.
pub fn merge_prefix(dst: &mut Value, src: &Value, prefix: &str) {
    let Value::Object(d) = dst else { return };
    let Value::Object(s) = src else { return };
    for (k, v) in s {
        if k.starts_with(prefix) {
            d.insert(k.clone(), v.clone());
        }
    }
}

/// What a handler should do to a supervised unit after materialising a
/// fresh artifact bundle (spec §4.5 common protocol, §9 Design Notes
/// "hot-reload via signal vs restart").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NoOp,
    HotReload,
    Restart,
    Start,
}

/// Decides the action purely from what changed on disk and whether the
/// unit is already running. Any created/removed file forces a restart
/// (new/removed files usually mean a daemon needs to reopen more than
/// its config, e.g. a new peer socket); in-place content changes alone
/// are eligible for a hot reload.
pub fn decide_action(summary: &ChangeSummary, was_running: bool) -> Action {
    if !was_running {
        return Action::Start;
    }
    if summary.is_empty() {
        return Action::NoOp;
    }
    if summary.created > 0 || summary.removed > 0 {
        Action::Restart
    } else {
        Action::HotReload
    }
}

/// Carries out a decided action. `HotReload` falls back to `restart` if
/// the unit (or this supervisor adapter) doesn't support `signal`.
pub async fn apply_action(agent: &Agent, unit: &str, action: Action) -> anyhow::Result<()> {
    match action {
        Action::NoOp => Ok(()),
        Action::Start => agent.supervisor.start(unit).await,
        Action::Restart => agent.supervisor.restart(unit).await,
        Action::HotReload => {
            if agent.supervisor.signal(unit, "HUP").await.is_err() {
                agent.supervisor.restart(unit).await
            } else {
                Ok(())
            }
        }
    }
}

/// Wraps a handler-local failure as [`AgentError::Renderer`] so
/// `reconcile.rs`'s `run_handler` recognizes it as scoped to this one
/// handler rather than a reason to abort the whole pass (spec §4.3,
/// §7 "Renderer errors abort only their own handler").
pub fn scoped_error(subsystem: &str, err: impl std::fmt::Display) -> anyhow::Error {
    AgentError::Renderer { subsystem: subsystem.to_string(), reason: err.to_string() }.into()
}

/// Stops `unit` if it's currently running or fatal, reporting whether a
/// stop actually happened (used as the "did apply" signal for the
/// disabled-subsystem branch of the common protocol).
pub async fn stop_if_running(agent: &Agent, unit: &str) -> anyhow::Result<bool> {
    let running = matches!(
        agent.supervisor.status(unit).await?,
        UnitState::Running | UnitState::Fatal
    );
    if running {
        agent.supervisor.stop(unit).await?;
    }
    Ok(running)
}
