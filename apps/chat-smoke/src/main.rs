//! Drives the chat runtime end to end against the loopback transport.
//!
//! Every CLI argument is sent as one message. A message from another
//! participant is injected, failed sends are retried once, and the final
//! projection is printed as JSON on stdout.

mod config;
mod logging;

use std::{env, sync::Arc, time::Duration};

use chat_core::{
    LocalMessageState, MessageEntry, MessagePart, ProjectionStream, SenderIdentity, ServerMessage,
    TEXT_PART_TYPE, project,
};
use chat_runtime::{ChatRuntimeHandle, LoopbackDelivery, RuntimeError, spawn_runtime};
use config::SmokeConfig;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const SETTLE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MESSAGES: [&str; 2] = ["hello", "is anyone there?"];

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    debug!(?config, "loaded smoke configuration");

    let mut texts: Vec<String> = env::args().skip(1).collect();
    if texts.is_empty() {
        texts = DEFAULT_MESSAGES.iter().map(|text| (*text).to_owned()).collect();
    }

    if let Err(err) = run(config, texts).await {
        eprintln!("Smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig, texts: Vec<String>) -> Result<(), RuntimeError> {
    let (delivery, inbound) = LoopbackDelivery::new(
        config.loopback_sender(),
        config.loopback_echo,
        config.event_buffer,
    );
    delivery.fail_next(config.loopback_fail_first);
    let delivery = Arc::new(delivery);

    let handle = spawn_runtime(
        config.current_user(),
        Arc::clone(&delivery),
        inbound,
        config.runtime_config(),
    );
    let renderer = tokio::spawn(log_updates(handle.subscribe()));

    for text in texts {
        match handle.compose(text).await {
            Ok(key) => debug!(%key, "composed message"),
            Err(RuntimeError::Compose(err)) => warn!(%err, "skipping message"),
            Err(err) => return Err(err),
        }
    }

    let other = ServerMessage::new(
        delivery.next_message_id(),
        SenderIdentity::new("bob", Some("Bob".to_owned()), None),
        vec![MessagePart::inline(TEXT_PART_TYPE, "hi from bob")],
    );
    if delivery.inbound_sender().send(other).await.is_err() {
        warn!("runtime closed inbound stream before injected message");
    }

    tokio::time::sleep(SETTLE_DELAY).await;
    retry_failed(&handle).await?;
    tokio::time::sleep(SETTLE_DELAY).await;

    let snapshot = handle.snapshot().await?;
    let rows = project(&snapshot);
    info!(row_count = rows.len(), "final projection");
    match serde_json::to_string_pretty(&rows) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(%err, "failed to render projection"),
    }

    renderer.abort();
    Ok(())
}

async fn retry_failed(handle: &ChatRuntimeHandle) -> Result<(), RuntimeError> {
    let snapshot = handle.snapshot().await?;
    for (index, entry) in snapshot.entries.iter().enumerate() {
        if let MessageEntry::Local {
            state: LocalMessageState::Failed,
            ..
        } = entry
        {
            info!(index, "retrying failed message");
            handle.retry_at(index).await?;
        }
    }
    Ok(())
}

async fn log_updates(mut updates: ProjectionStream) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                let row = update.items.get(update.change.index());
                info!(
                    change = ?update.change,
                    scroll = update.change.reveals_new_row(),
                    category = ?row.map(|row| row.category),
                    text = row.map(|row| row.text.as_str()).unwrap_or_default(),
                    "projection updated"
                );
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "renderer lagged behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
