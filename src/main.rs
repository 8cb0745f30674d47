//! Process entrypoint: load configuration, wire the upstream client and
//! cluster runtime, and run the agent loop until a shutdown signal arrives.
//! Everything below this point is plumbing; the reconciliation logic itself
//! lives in `policy_agent::{translator,reconciler,agent}`.

use std::sync::Arc;

use anyhow::Context;
use policy_agent::agent::Agent;
use policy_agent::config::Config;
use policy_agent::policy_client::HttpPolicyServerClient;
use policy_agent::runtime::KubeRuntime;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load();

    let policy_client =
        Arc::new(HttpPolicyServerClient::new(&config).context("building policy service client")?);

    let kube_client = kube::Client::try_default()
        .await
        .context("building kubernetes client")?;

    let store = Arc::new(KubeRuntime::new(kube_client, &config.namespace).await);

    let cancellation = CancellationToken::new();
    let shutdown = cancellation.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.cancel();
    });

    let agent = Agent::new(store, policy_client, &config);
    agent.run(cancellation).await;

    Ok(())
}

/// Resolves on `SIGINT` or `SIGTERM`, whichever arrives first.
async fn wait_for_shutdown_signal() {
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
