//! Terminal viewer: follows a live quiz and prints every visible change.
//!
//! Commands are read from stdin, one per line: `start`, `stop`, `vote <A-D>`,
//! `retry` or `resume`.

use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use live_quiz_sync::{
    Command, SessionController, SessionHandle, SyncConfig, Transports,
    dao::file_store::FileSnapshotStore,
    state::OptionKey,
    transport::{http::HttpPollClient, ws::WsPushConnector},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SyncConfig::load();
    let push = WsPushConnector::new(config.push_url()).context("configuring push endpoint")?;
    let poll = HttpPollClient::new(&config.server.base_url, config.poll.request_timeout)
        .context("configuring poll endpoint")?;
    let store = FileSnapshotStore::new(config.session.state_path.clone());

    info!(push = %push.url(), poll = %config.server.base_url, "starting quiz viewer");
    let session = SessionController::new(
        config,
        Transports {
            push: Arc::new(push),
            poll: Arc::new(poll),
        },
        Arc::new(store),
    )
    .start()
    .await;

    if let Some(snapshot) = session.current_snapshot() {
        print_json(&snapshot);
    }

    let printer = tokio::spawn(print_updates(session.clone()));
    tokio::select! {
        _ = shutdown_signal() => info!("shutdown requested"),
        _ = read_commands(session.clone()) => info!("stdin closed"),
    }

    session.shutdown().await.context("stopping session")?;
    printer.abort();
    Ok(())
}

async fn print_updates(session: SessionHandle) {
    let mut updates = session.updates();
    while let Some(update) = updates.next().await {
        match update {
            Ok(update) => print_json(&update),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "output fell behind; updates dropped");
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!(error = %err, "failed to render update"),
    }
}

async fn read_commands(session: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "failed to read stdin");
                return;
            }
        };
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("start"), None) => session.issue_command(Command::StartQuiz),
            (Some("stop"), None) => session.issue_command(Command::StopQuiz),
            (Some("retry"), None) => session.retry_push(),
            (Some("resume"), None) => session.reactivate(),
            (Some("vote"), Some(option)) => match OptionKey::parse(option) {
                Some(option) => session.issue_command(Command::CastVote(option)),
                None => {
                    warn!(option, "unknown option; expected A, B, C or D");
                    continue;
                }
            },
            _ => {
                warn!(input = %line, "unrecognised command");
                continue;
            }
        };
        if let Err(err) = result {
            warn!(error = %err, "session no longer accepts commands");
            return;
        }
    }
}

/// Configure tracing subscribers; logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,live_quiz_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
