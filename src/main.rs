//! taskforge worker process
//!
//! Loads configuration, connects the broker and the LLM provider, then runs
//! the health server and the queue worker until SIGINT/SIGTERM.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use taskforge::agent::{AgentConfig, AgentController};
use taskforge::health::{self, HealthState};
use taskforge::llm::{AnthropicClient, LlmProvider};
use taskforge::progress::ProgressPublisher;
use taskforge::telemetry::{init_tracing, shutdown_tracing};
use taskforge::tools::{ToolRegistry, TOOL_CATALOGUE_VERSION};
use taskforge::worker::{Worker, WorkerConfig, WorkerStatus};
use taskforge::workspace::Workspace;
use taskforge::{broker, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load_with_dotenv()?;
    init_tracing("taskforge", &config.telemetry)?;

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        shutdown_tracing();
        return Err(e.into());
    }
    let health_addr = config.health_addr()?;

    let broker = broker::connect(&config.broker.url).await?;
    info!(backend = broker.backend(), "Broker connected");

    let provider: Arc<dyn LlmProvider> = Arc::new(AnthropicClient::from_settings(&config.llm));
    let tools = Arc::new(ToolRegistry::with_default_tools());
    info!(
        tools = ?tools.names(),
        catalogue_version = TOOL_CATALOGUE_VERSION,
        model = provider.model(),
        "Tool catalogue loaded"
    );

    tokio::fs::create_dir_all(&config.workspace.root).await?;
    let workspace = Arc::new(Workspace::new(&config.workspace.root));
    let publisher = ProgressPublisher::new(broker.clone());

    let controller = Arc::new(AgentController::new(
        provider.clone(),
        tools,
        workspace,
        publisher.clone(),
        AgentConfig {
            max_iterations: config.worker.max_iterations,
            system_prompt: None,
            command_timeout: config.workspace.shell_timeout(),
        },
    ));

    let status = Arc::new(WorkerStatus::new());
    let worker = Worker::new(
        broker,
        controller,
        publisher,
        WorkerConfig::from_settings(&config.worker),
        status.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_state = HealthState {
        agent_type: config.worker.agent_type,
        llm_configured: provider.is_configured(),
        status,
    };
    let health_rx = shutdown_rx.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health::serve(health_addr, health_state, health_rx).await {
            error!(error = %e, "Health server failed");
        }
    });

    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    wait_for_signal().await;
    info!("Shutdown requested, finishing current task");
    let _ = shutdown_tx.send(true);

    if let Err(e) = worker_handle.await {
        warn!(error = %e, "Worker task ended abnormally");
    }
    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    shutdown_tracing();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
