//! dSS event server
//!
//! Loads the server configuration, wires the event interpreter to the
//! trigger engine and runs until interrupted.
//!
//! The configuration file is the first argument, or `DSS_CONFIG`. Without
//! either the built-in defaults are used.

use anyhow::{Context, Result};
use dss_config::ServerConfig;
use dss_core::{events, Event, MonotonicClock};
use dss_event_bus::{EventInterpreter, InterpreterOptions};
use dss_triggers::{MemoryRuleStore, RuleStore, SystemTriggerPlugin};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("DSS_CONFIG"))
        .map(PathBuf::from)
}

/// Build the interpreter with the trigger plugin and the configured
/// subscriptions installed. Nothing is started yet.
fn build_interpreter(config: &ServerConfig) -> Result<Arc<EventInterpreter>> {
    let store: Arc<dyn RuleStore> = match &config.triggers.rules_file {
        Some(path) => Arc::new(
            MemoryRuleStore::load_file(path)
                .with_context(|| format!("failed to load trigger rules from {}", path.display()))?,
        ),
        None => {
            warn!("No rules file configured, trigger engine starts empty");
            Arc::new(MemoryRuleStore::new())
        }
    };

    let interpreter = Arc::new(EventInterpreter::new(
        InterpreterOptions {
            wait_timeout: config.event_bus.wait_timeout(),
            runner_max_sleep: config.event_bus.runner_max_sleep(),
        },
        MonotonicClock::shared(),
    ));
    interpreter.add_plugin(Arc::new(
        SystemTriggerPlugin::new(interpreter.bus().clone(), store)
            .with_root(config.triggers.root.clone()),
    ));

    let loaded = interpreter.load_subscriptions(&config.subscriptions);
    info!(
        loaded,
        configured = config.subscriptions.len(),
        "Installed configured subscriptions"
    );
    Ok(interpreter)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match config_path() {
        Some(path) => ServerConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting dSS event server");

    let interpreter = build_interpreter(&config)?;
    interpreter.start();
    interpreter.bus().push_event(Event::new(events::RUNNING)?);

    info!("dSS event server is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    interpreter.shutdown().await;

    Ok(())
}
