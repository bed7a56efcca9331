use std::sync::Arc;

use anyhow::{Context, Result};
use device_agent::cloud::{CloudLink, CloudSession, StateChangeQueue};
use device_agent::command::{CommandManager, SystemClock};
use device_agent::AgentConfig;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = AgentConfig::from_env()?;

    info!("Device agent starting: {}", config.device_id);
    info!("  Cloud endpoint: {}", config.cloud_address);

    let mut manager = CommandManager::new(Arc::new(SystemClock), config.command_retention());
    load_definitions(&mut manager, &config)?;
    manager.add_on_command_removed(Box::new(|instance| {
        debug!("Command {} final state: {}", instance.id(), instance.status());
    }));

    let states = Arc::new(StateChangeQueue::new(config.state_queue_size));
    let link = Arc::new(CloudLink::new(config.link_config()));
    let mut session = CloudSession::new(states.clone(), link, config.backoff.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut cleanup = tokio::time::interval(config.cleanup_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Main event loop
    loop {
        tokio::select! {
            _ = cleanup.tick() => {
                manager.cleanup();
                session.prune_finished();
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    handle_input(&line, &mut manager, &mut session, &states).await;
                }
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },

            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn load_definitions(manager: &mut CommandManager, config: &AgentConfig) -> Result<()> {
    if let Some(path) = &config.base_definitions {
        let doc = read_json(path)?;
        manager
            .load_base_commands(&doc)
            .with_context(|| format!("Invalid base definitions in {}", path.display()))?;
        info!("Loaded base definitions from {}", path.display());
    }

    for source in &config.definitions {
        let doc = read_json(&source.path)?;
        manager
            .load_commands(&doc, &source.category)
            .with_context(|| {
                format!(
                    "Invalid definitions for '{}' in {}",
                    source.category,
                    source.path.display()
                )
            })?;
    }
    Ok(())
}

fn read_json(path: &std::path::Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// One line of input:
/// - an array is the command list fetched after connecting
/// - `{"deviceState": {...}}` records a local state change
/// - `{"stateAck": id}` acknowledges state changes up to `id`
/// - any other object is a single cloud command
async fn handle_input(
    line: &str,
    manager: &mut CommandManager,
    session: &mut CloudSession,
    states: &StateChangeQueue,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let doc: Value = match serde_json::from_str(line) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Ignoring malformed input: {}", e);
            return;
        }
    };

    if let Value::Array(commands) = &doc {
        session.process_initial_command_list(manager, commands).await;
        return;
    }

    if let Some(Value::Object(changed)) = doc.get("deviceState") {
        let id = states.record_state_change(device_agent_shared::now_ms(), changed.clone());
        info!("Recorded device state change {}", id);
        return;
    }

    if let Some(id) = doc.get("stateAck").and_then(Value::as_u64) {
        states.notify_state_updated_on_server(id);
        return;
    }

    match session.publish_command(manager, &doc) {
        Ok(Some(id)) => info!("Queued cloud command {}", id),
        Ok(None) => debug!("Duplicate cloud command ignored"),
        Err(err) => warn!("Rejected cloud command: {}", err.chain_message()),
    }
}
