mod backup;
mod calc;
mod completion;
mod db;
mod error;
mod grading;
mod ipc;
mod marks;
mod registry;
mod reportcards;
mod settings;
#[cfg(test)]
mod testutil;
mod workflow;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exam results and report-card workflow daemon. Speaks JSON lines on stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "reportcardd", version)]
struct Cli {
    /// Workspace directory to open at startup (same as a `workspace.select` call).
    #[arg(long, env = "REPORTCARDD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// How long a write waits on another process holding the database lock.
    #[arg(long, env = "REPORTCARDD_BUSY_TIMEOUT_MS", default_value_t = 250)]
    busy_timeout_ms: u64,
}

fn init_tracing() {
    // stdout carries the protocol; logs go to stderr.
    let log_format = std::env::var("REPORTCARDD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reportcardd=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(false),
                )
                .init();
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut state = ipc::AppState::new(Duration::from_millis(cli.busy_timeout_ms));
    if let Some(path) = cli.workspace {
        match db::open_db(&path, state.busy_timeout) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "workspace opened");
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(workspace = %path.display(), error = %message, "failed to open workspace");
                std::process::exit(1);
            }
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
        let resp = span.in_scope(|| ipc::handle_request(&mut state, req));
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::debug!("stdin closed; exiting");
}
