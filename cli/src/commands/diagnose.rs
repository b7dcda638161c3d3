//! Interactive yes/no walk through a crop's symptom hierarchy.
//!
//! Reads one command per line from stdin and prints the session view after
//! every transition. Commands are checked against the current state before
//! they reach the session, so the session only ever sees valid operations.

use std::io::Write;
use std::sync::Arc;

use cropdoc_core::{
    CropId, DiagnosticSession, SessionError, SessionHandle, SessionSnapshot, SessionState,
    SymptomId, TraversalPolicy,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::repository::HttpSymptomRepository;
use crate::util::{
    EXIT_OK, EXIT_SERVER_ERROR, EXIT_USAGE_ERROR, error_body, pretty, report_transport_error,
};

const HELP: &str = "Commands: yes|y N, no|n N, confirm|c, back|b, reset|r, retry, show|s, quit|q";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// 1-based candidate index
    Yes(usize),
    No(usize),
    Confirm,
    Back,
    Reset,
    Retry,
    Show,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Initialize,
    SelectYes(SymptomId),
    Reject(SymptomId),
    Confirm,
    Cancel,
    Reset,
    Show,
    Quit,
}

pub fn parse_answer(line: &str) -> Result<Answer, String> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Err(HELP.to_string());
    };
    let index = |parts: &mut std::str::SplitWhitespace<'_>| -> Result<usize, String> {
        parts
            .next()
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("'{command}' needs a candidate number, e.g. '{command} 1'"))
    };

    let answer = match command.to_lowercase().as_str() {
        "yes" | "y" => Answer::Yes(index(&mut parts)?),
        "no" | "n" => Answer::No(index(&mut parts)?),
        "confirm" | "c" => Answer::Confirm,
        "back" | "b" => Answer::Back,
        "reset" | "r" => Answer::Reset,
        "retry" => Answer::Retry,
        "show" | "s" => Answer::Show,
        "quit" | "q" | "exit" => Answer::Quit,
        other => return Err(format!("Unknown command '{other}'. {HELP}")),
    };
    Ok(answer)
}

/// Map an answer onto a session operation that the current state permits.
pub fn plan(answer: Answer, snapshot: &SessionSnapshot) -> Result<Action, String> {
    let candidate = |n: usize| -> Result<SymptomId, String> {
        if snapshot.state != SessionState::AwaitingAnswer {
            return Err(format!(
                "No question is open right now (session is {}).",
                snapshot.state
            ));
        }
        n.checked_sub(1)
            .and_then(|i| snapshot.candidates.get(i))
            .map(|symptom| symptom.sid.clone())
            .ok_or_else(|| {
                format!(
                    "Pick a number between 1 and {}.",
                    snapshot.candidates.len()
                )
            })
    };
    let awaiting_confirmation = || {
        if snapshot.state == SessionState::AwaitingConfirmation {
            Ok(())
        } else {
            Err("Nothing to confirm. Answer 'yes N' to a symptom first.".to_string())
        }
    };

    match answer {
        Answer::Yes(n) => candidate(n).map(Action::SelectYes),
        Answer::No(n) => candidate(n).map(Action::Reject),
        Answer::Confirm => awaiting_confirmation().map(|_| Action::Confirm),
        Answer::Back => awaiting_confirmation().map(|_| Action::Cancel),
        Answer::Reset => Ok(Action::Reset),
        Answer::Retry if snapshot.state == SessionState::Loading => Ok(Action::Initialize),
        Answer::Retry => {
            Err("Nothing to retry. Pick a symptom again to retry a failed step.".to_string())
        }
        Answer::Show => Ok(Action::Show),
        Answer::Quit => Ok(Action::Quit),
    }
}

pub fn render_text(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    if !snapshot.history.is_empty() {
        let confirmed: Vec<&str> = snapshot
            .history
            .iter()
            .map(|symptom| symptom.question.as_str())
            .collect();
        out.push_str(&format!("Confirmed: {}\n", confirmed.join(" > ")));
    }

    match snapshot.state {
        SessionState::Loading => {
            out.push_str("Symptoms could not be loaded. Type 'retry' or 'quit'.\n");
        }
        SessionState::Resolving => out.push_str("Waiting for the knowledge base...\n"),
        SessionState::AwaitingAnswer => {
            out.push_str(&format!(
                "Level {} - which of these do you observe?\n",
                snapshot.current_level
            ));
            for (i, symptom) in snapshot.candidates.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", i + 1, symptom.question));
            }
            out.push_str("Answer 'yes N' or 'no N'.\n");
        }
        SessionState::AwaitingConfirmation => {
            if let Some(pending) = &snapshot.pending {
                out.push_str(&format!("You observed: {}\n", pending.question));
            }
            out.push_str("Type 'confirm' to continue or 'back' to choose again.\n");
        }
        SessionState::Resolved => {
            if let Some(disease) = &snapshot.diagnosis {
                out.push_str(&format!(
                    "Disease identified: {} (id {})\n",
                    disease.name, disease.id
                ));
                if let Some(description) = &disease.description {
                    out.push_str(&format!("{description}\n"));
                }
            }
        }
        SessionState::Exhausted => {
            out.push_str("No disease could be identified from these answers.\n");
        }
    }
    if snapshot.state.is_terminal() {
        out.push_str("Type 'reset' to start over or 'quit'.\n");
    }
    out
}

fn show(snapshot: &SessionSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("failed to encode session: {e}"),
        }
    } else {
        print!("{}", render_text(snapshot));
    }
}

fn prompt(json: bool) {
    if !json {
        eprint!("> ");
        let _ = std::io::stderr().flush();
    }
}

async fn apply(handle: &SessionHandle, action: Action) -> Result<SessionSnapshot, SessionError> {
    match action {
        Action::Initialize => handle.initialize().await,
        Action::SelectYes(sid) => handle.select_yes(sid).await,
        Action::Reject(sid) => handle.reject(sid).await,
        Action::Confirm => handle.confirm().await,
        Action::Cancel => handle.cancel_confirmation().await,
        Action::Reset => handle.reset().await,
        Action::Show | Action::Quit => Ok(handle.snapshot()),
    }
}

/// Returns an exit code when the error ends the session.
fn on_error(err: &SessionError, handle: &SessionHandle, json: bool) -> Option<i32> {
    match err {
        SessionError::Transport(transport) => {
            report_transport_error(transport);
            show(&handle.snapshot(), json);
            None
        }
        SessionError::Superseded => None,
        SessionError::Closed => {
            eprintln!("{}", pretty(&error_body("session_closed", &err.to_string(), None)));
            Some(EXIT_SERVER_ERROR)
        }
        SessionError::InvalidState { .. } | SessionError::UnknownSymptom(_) => {
            tracing::error!(error = %err, "diagnostic session contract violated");
            eprintln!("{}", pretty(&error_body("contract_violation", &err.to_string(), None)));
            Some(EXIT_USAGE_ERROR)
        }
    }
}

pub async fn run(
    repo: Arc<HttpSymptomRepository>,
    crop: i64,
    policy: TraversalPolicy,
    json: bool,
) -> i32 {
    tracing::info!(crop, max_level = policy.max_level(), "starting diagnosis");
    let handle = SessionHandle::spawn(repo, DiagnosticSession::new(CropId(crop), policy));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if !json {
        eprintln!("{HELP}");
    }

    let mut outcome = handle.initialize().await;
    loop {
        match &outcome {
            Ok(snapshot) => show(snapshot, json),
            Err(err) => {
                if let Some(code) = on_error(err, &handle, json) {
                    return code;
                }
            }
        }

        let action = loop {
            prompt(json);
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return EXIT_OK,
                Err(e) => {
                    let message = format!("Failed to read stdin: {e}");
                    eprintln!("{}", pretty(&error_body("cli_error", &message, None)));
                    return EXIT_USAGE_ERROR;
                }
            };
            match parse_answer(&line).and_then(|answer| plan(answer, &handle.snapshot())) {
                Ok(action) => break action,
                Err(message) => eprintln!("{message}"),
            }
        };

        if action == Action::Quit {
            return EXIT_OK;
        }
        outcome = apply(&handle, action).await;
    }
}
