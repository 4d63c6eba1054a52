use std::io::{self, BufRead, Write};

use serde::Serialize;
use shopper_agent::{AgentRuntime, TurnStatus};
use shopper_core::config::LoadOptions;
use shopper_core::conversation::ConversationState;
use tokio::runtime::Runtime;

use crate::commands::{async_runtime, load_config, CommandResult};
use crate::logging;
use crate::wiring::{build_runtime, WiringOptions};

const EXIT_WORDS: &[&str] = &["exit", "quit", "bye"];

#[derive(Debug, Serialize)]
struct Transcript {
    command: &'static str,
    status: &'static str,
    session_id: String,
    turns: Vec<TranscriptTurn>,
}

#[derive(Debug, Serialize)]
struct TranscriptTurn {
    user: String,
    status: &'static str,
    response: String,
}

/// Runs `messages` as scripted turns, or an interactive session on stdin when there are none.
pub fn run(options: &LoadOptions, messages: Vec<String>, offline: bool) -> CommandResult {
    let config = match load_config("chat", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    logging::init(&config.logging);
    let runtime = match async_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let agent = match runtime.block_on(build_runtime(&config, WiringOptions { offline })) {
        Ok(agent) => agent,
        Err(error) => {
            return CommandResult::failure("chat", "wiring", format!("{error:#}"), 4);
        }
    };
    let state = ConversationState::with_history_limit(config.routing.max_turn_history);

    if messages.is_empty() {
        interactive(&runtime, &agent, state)
    } else {
        scripted(&runtime, &agent, state, messages)
    }
}

fn scripted(
    runtime: &Runtime,
    agent: &AgentRuntime,
    mut state: ConversationState,
    messages: Vec<String>,
) -> CommandResult {
    let session_id = state.session_id().to_string();
    let mut turns = Vec::with_capacity(messages.len());
    for message in messages {
        let outcome = runtime.block_on(agent.handle_turn(state, &message));
        turns.push(TranscriptTurn {
            user: message,
            status: status_label(outcome.status),
            response: outcome.response,
        });
        state = outcome.state;
    }
    CommandResult::payload(&Transcript { command: "chat", status: "ok", session_id, turns })
}

fn interactive(runtime: &Runtime, agent: &AgentRuntime, mut state: ConversationState) -> CommandResult {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let _ = writeln!(stdout, "What are you shopping for today? (type \"exit\" to leave)");

    let mut lines = stdin.lock().lines();
    loop {
        let _ = write!(stdout, "> ");
        let _ = stdout.flush();
        let Some(line) = lines.next() else {
            break;
        };
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                return CommandResult::failure("chat", "stdin", error.to_string(), 5);
            }
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&text.to_ascii_lowercase().as_str()) {
            break;
        }

        let outcome = runtime.block_on(agent.handle_turn(state, text));
        let _ = writeln!(stdout, "{}\n", outcome.response);
        state = outcome.state;
    }

    CommandResult {
        exit_code: 0,
        output: format!("session {} ended after {} turns", state.session_id(), state.turn_count()),
    }
}

fn status_label(status: TurnStatus) -> &'static str {
    match status {
        TurnStatus::Answered => "answered",
        TurnStatus::Clarified => "clarified",
        TurnStatus::Aborted => "aborted",
        TurnStatus::Defect => "defect",
    }
}
