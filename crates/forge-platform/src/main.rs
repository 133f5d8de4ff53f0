// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forge Platform - Agent Control Plane Server
//!
//! An HTTP server responsible for:
//! - Agent lifecycle (create, get, list, delete pods via the cluster API)
//! - Command dispatch (send-message, interrupt) over agent RPC streams
//! - Webhook fan-out of agent events with signing, retries, and circuit
//!   breaking

use std::sync::Arc;
use tracing::{info, warn};

use forge_platform::cluster::{ClusterApi, MockCluster, PodManager};
use forge_platform::config::Config;
use forge_platform::processor::Processor;
use forge_platform::server::{self, AppState};
use forge_platform::store::DeliveryStore;
use forge_platform::webhook::delivery::{DeliveryConfig, DeliveryEngine};
use forge_platform::migrations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_platform=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        port = config.port,
        agent_namespace = %config.agent_namespace,
        agent_image = %config.agent_image(),
        kube_config_path = ?config.kube_config_path,
        "Starting Forge Platform"
    );

    // Connect to the delivery store
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run(&pool).await?;

    info!("Database schema verified");

    // Cluster backend. The orchestrator client is deployment-specific and
    // plugs in through the ClusterApi trait; without one the in-memory
    // backend keeps local development self-contained.
    let cluster: Arc<dyn ClusterApi> = Arc::new(MockCluster::auto_ready());
    warn!("No cluster backend configured; using the in-memory cluster (development only)");

    let pods = PodManager::from_config(cluster, &config);
    let webhooks = Arc::new(DeliveryEngine::new(DeliveryConfig::from(&config))?);
    let store = DeliveryStore::new(pool);
    let processor = Arc::new(Processor::new(pods, webhooks, store.clone()));

    let state = AppState { processor, store };

    // Serve until ctrl-c, then drain within the shutdown budget.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown_timeout = config.shutdown_timeout;
    let server = tokio::spawn(server::serve(config, state, async {
        let _ = shutdown_rx.await;
    }));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(result) => result??,
        Err(_) => warn!("Graceful shutdown timed out; exiting"),
    }

    info!("Forge Platform shut down");

    Ok(())
}
