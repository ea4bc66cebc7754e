//! Interactive console for operator-confirmed remote commands.
//!
//! Run with: cargo run -p console-demo -- remote-ops.json
//!
//! Each line typed at the prompt is treated as a goal. The built-in planner
//! simply proposes the line itself as a command, so the confirm / execute /
//! recover cycle can be tried without a model behind it. Ctrl-C cancels a
//! streaming command and quits at the goal prompt; at a y/n prompt it is
//! ignored.

use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use remote_ops_core::{
    ChatMessage, CommandRequest, ContextStore, ElevationCredential, ExecutionContext,
    ExecutionResult, OutputChunk, Planner, PlannerError, PlannerReply, RawToolCall, Role,
    request::EXECUTE_COMMAND,
};
use remote_ops_executor::{Approval, ExecutionOrchestrator, Operator, OperatorError};
use remote_ops_session::{AppConfig, FileLogStorage, GoalOutcome, SessionManager};
use remote_ops_ssh::{RemoteSession, RusshConnector};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{Mutex, mpsc},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the elevation credential, if any.
const ELEVATION_ENV: &str = "REMOTE_OPS_ELEVATION";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("remote-ops.json"), PathBuf::from);
    let config = AppConfig::load(&path).context("Failed to load configuration")?;
    tracing::debug!(path = %path.display(), endpoint = %config.session.endpoint(), "Loaded configuration");

    let session = Arc::new(RemoteSession::new(RusshConnector::new()));
    session
        .connect(&config.session)
        .await
        .with_context(|| format!("Failed to connect to {}", config.session.endpoint()))?;

    let mut ctx = ExecutionContext::new(config.session.host.clone())
        .with_timeout(config.orchestrator.command_timeout());
    if let Ok(secret) = std::env::var(ELEVATION_ENV) {
        ctx.set_elevation(ElevationCredential::new(secret));
    }

    let lines = Arc::new(Mutex::new(spawn_stdin_reader()));
    let operator = Arc::new(ConsoleOperator {
        lines: Arc::clone(&lines),
    });
    let store = Arc::new(ContextStore::new(config.context));
    let manager = SessionManager::new(
        ExecutionOrchestrator::new(Arc::clone(&session), operator),
        EchoPlanner,
        FileLogStorage::new(&config.log_dir),
        Arc::clone(&store),
        ctx,
    )
    .with_max_planner_rounds(config.orchestrator.max_planner_rounds);

    println!(
        "Connected to {}. Logs go to {}. Type a command, /stats, /clear or /quit.",
        config.session.endpoint(),
        config.log_dir.display()
    );

    loop {
        prompt("> ");
        // Streaming cancellation installs a SIGINT handler, so the prompt
        // has to listen for Ctrl-C itself.
        let Some(line) = next_line(&lines, interrupted()).await else {
            break;
        };
        match line.trim() {
            "" => {}
            "/quit" | "/exit" => break,
            "/stats" => println!("{}", store.stats().to_log_string()),
            "/clear" => {
                store.clear();
                println!("Context cleared.");
            }
            goal => match manager.run_goal(goal).await {
                Ok(GoalOutcome::Answered(text)) => println!("{text}"),
                Ok(GoalOutcome::AbortedByOperator) => println!("Stopped."),
                Ok(GoalOutcome::RoundLimit) => println!("Planner round limit reached."),
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Next input line, or `None` on end of input or interrupt.
async fn next_line(
    lines: &Mutex<mpsc::Receiver<String>>,
    interrupt: impl Future<Output = ()>,
) -> Option<String> {
    tokio::select! {
        line = async { lines.lock().await.recv().await } => line,
        () = interrupt => None,
    }
}

/// Forward stdin lines so prompts and the goal loop can share them.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Terminal operator: y/n prompts on stdin, output on stdout.
struct ConsoleOperator {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl ConsoleOperator {
    async fn ask(&self, question: &str) -> Result<bool, OperatorError> {
        prompt(question);
        let line = self
            .lines
            .lock()
            .await
            .recv()
            .await
            .ok_or(OperatorError::Unavailable)?;
        Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn present(&self, request: &CommandRequest) {
        println!();
        println!("  $ {}", request.command);
        println!("  {}", request.explanation);
        if request.requires_elevation {
            println!("  (runs with elevated privileges)");
        }
    }

    async fn confirm(&self, _request: &CommandRequest) -> Result<Approval, OperatorError> {
        if self.ask("Run this command? [y/N] ").await? {
            Ok(Approval::Approved)
        } else {
            Ok(Approval::declined())
        }
    }

    async fn confirm_continue(
        &self,
        request: &CommandRequest,
        result: &ExecutionResult,
    ) -> Result<bool, OperatorError> {
        println!("`{}` failed with exit code {}.", request.command, result.exit_code);
        if !result.stderr.is_empty() {
            println!("{}", result.stderr);
        }
        self.ask("Continue with the remaining commands? [y/N] ").await
    }

    async fn show_output(&self, chunk: &OutputChunk) {
        match chunk {
            OutputChunk::Stdout(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            OutputChunk::Stderr(text) => eprint!("{text}"),
        }
    }

    async fn cancel_requested(&self) {
        interrupted().await;
    }
}

/// Proposes the operator's own goal as the command, then reports its result.
struct EchoPlanner;

#[async_trait]
impl Planner for EchoPlanner {
    async fn plan(
        &self,
        messages: &[ChatMessage],
        goal: &str,
    ) -> Result<PlannerReply, PlannerError> {
        match messages.last() {
            Some(last) if last.role == Role::Tool => {
                Ok(PlannerReply::Text(format!("Finished `{goal}`.")))
            }
            _ => Ok(PlannerReply::ToolCalls(vec![RawToolCall {
                name: EXECUTE_COMMAND.to_owned(),
                arguments: command_arguments(goal),
            }])),
        }
    }
}

fn command_arguments(command: &str) -> serde_json::Value {
    serde_json::json!({
        "command": command,
        "explanation": "Typed by the operator",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_at_prompt_ends_input() {
        let (_tx, rx) = mpsc::channel::<String>(1);
        let lines = Mutex::new(rx);
        assert_eq!(next_line(&lines, std::future::ready(())).await, None);
    }

    #[tokio::test]
    async fn typed_line_is_returned() {
        let (tx, rx) = mpsc::channel(1);
        tx.send("uptime".to_owned()).await.unwrap();
        let lines = Mutex::new(rx);
        assert_eq!(
            next_line(&lines, std::future::pending()).await,
            Some("uptime".to_owned())
        );
    }

    #[test]
    fn typed_goal_becomes_command_arguments() {
        let args = command_arguments("df -h");
        assert_eq!(args["command"], "df -h");
    }
}
