//! Warpath binary: load config, open the store, bring up every component,
//! and run until interrupted.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use warpath::config::WarpathConfig;
use warpath::database;
use warpath::engine::Engine;
use warpath::logging;
use warpath::messaging::{Consumer, MessagingClient, OutboxDrainer};
use warpath::nodestate::{Manager, RedisStore};
use warpath::rds::{Client as RdsClient, RdsApi};

#[derive(Parser)]
#[command(name = "warpath")]
#[command(about = "Factory-floor order orchestration and dispatch coordinator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "warpath.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging();

    let config = if std::path::Path::new(&cli.config).exists() {
        WarpathConfig::load(&cli.config).context("load config")?
    } else {
        warn!(path = %cli.config, "config file not found, using defaults");
        WarpathConfig::from_env()
    };

    // Database
    let pool = database::connect(&config.database)
        .await
        .context("open database")?;
    database::run_migrations(&pool).await.context("migrate")?;

    // Redis (optional; warpath degrades to direct store reads)
    let redis = match RedisStore::connect(&config.redis).await {
        Ok(redis) => {
            info!(address = %config.redis.address, "redis connected");
            Some(redis)
        }
        Err(e) => {
            warn!(error = %e, "redis not available, running without cache");
            None
        }
    };

    // Node state manager
    let nodestate = Arc::new(Manager::new(pool.clone(), redis));
    if let Err(e) = nodestate.sync_from_store().await {
        warn!(error = %e, "node state cache rebuild failed");
    }

    // RDS client
    let rds_client = Arc::new(
        RdsClient::new(&config.rds.base_url, config.rds_timeout()).context("build RDS client")?,
    );
    match rds_client.ping().await {
        Ok(ping) => info!(product = %ping.product, version = %ping.version, "RDS Core connected"),
        Err(e) => warn!(error = %e, "RDS Core not available"),
    }

    // Messaging client
    let msg_client = Arc::new(
        MessagingClient::new(config.messaging.clone(), Some(pool.clone()))
            .context("build messaging client")?,
    );
    match msg_client.connect().await {
        Ok(()) => info!(backend = %config.messaging.backend, "messaging connected"),
        Err(e) => warn!(error = %e, "messaging connect failed"),
    }

    // Engine
    let engine = Engine::new(
        config.clone(),
        pool.clone(),
        Arc::clone(&rds_client),
        Arc::clone(&nodestate),
        Arc::clone(&msg_client),
    );
    engine.start().await;

    // Inbound consumer (orders from Edge)
    let consumer = Consumer::new(
        Arc::clone(&msg_client),
        config.messaging.orders_topic.clone(),
        engine.dispatcher(),
    );
    let consumer_handle = consumer.start();

    // Outbox drainer (replies to Edge)
    let drainer = OutboxDrainer::new(pool.clone(), Arc::clone(&msg_client), &config.messaging);
    let drainer_handle = drainer.start();

    info!(factory_id = %config.factory_id, "warpath running");
    tokio::signal::ctrl_c().await.context("wait for shutdown")?;
    info!("shutdown signal received");

    // Cooperative shutdown: stop intake first, finish outbound work, then the
    // engine's loops.
    consumer_handle.stop().await;
    drainer_handle.stop().await;
    engine.stop().await;
    msg_client.close().await;
    tokio::time::timeout(Duration::from_secs(5), pool.close())
        .await
        .ok();

    info!("warpath stopped");
    Ok(())
}
