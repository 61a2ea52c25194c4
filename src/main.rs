use fedsim::agent::{AgentRegistry, Collaborators, Host, ServerConfig, load_agents};
use fedsim::comm::{Comm, CommConfig};
use fedsim::invoker::{HttpAgentInvoker, HttpToolInvoker};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{Level, error, info};
use tracing_subscriber::fmt;

/// Tokio runtime with signal handling
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_max_level(Level::DEBUG)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting fedsim daemon...");

    let server_config = ServerConfig::from_env();
    let comm_config = CommConfig::from_env();

    info!(
        comm_port = comm_config.listen_port,
        host_label = %server_config.host_label,
        agents_file = %server_config.config_path.display(),
        "Configuration loaded"
    );

    let deps = Collaborators {
        host_label: server_config.host_label.clone(),
        tools: Arc::new(HttpToolInvoker::new(server_config.invoker.clone())?),
        agents: Arc::new(HttpAgentInvoker::new(server_config.invoker.clone())?),
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(server_config.invoker.request_timeout_secs))
            .build()?,
    };

    let registry = Arc::new(AgentRegistry::new(deps));
    for spec in load_agents(&server_config.config_path)? {
        let name = spec.name.clone();
        if let Err(e) = registry.create(spec) {
            error!(agent = %name, error = %e, "Agent preparation failed");
            process::exit(1);
        }
    }
    info!(agents = registry.len(), "Registry initialized");

    let (comm, mut user_rx) = Comm::new(comm_config).await?;
    info!(addr = %comm.local_addr()?, "Comm initialized");

    let comm_handle = tokio::spawn(async move {
        if let Err(e) = comm.run().await {
            error!(error = %e, "Comm server error");
        }
    });

    let host = Host::new(registry.clone(), server_config.request_timeout_secs);

    info!("Entering main loop...");

    loop {
        tokio::select! {
            Some(req) = user_rx.recv() => {
                let host = host.clone();
                tokio::spawn(async move {
                    host.handle_user_request(req).await;
                });
            }
            _ = async {
                signal::ctrl_c().await.ok();
            } => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Shutting down...");
    registry.clear();
    comm_handle.abort();

    info!("Goodbye!");
    Ok(())
}
