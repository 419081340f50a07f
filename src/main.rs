//! corrflow - correlated workflow engine demo host
//!
//! Wires the order fulfilment and loyalty workflows into an in-process
//! delivery pipeline, replays a scripted order stream, and relays committed
//! commands to simulated external systems until the outbox drains.

mod config;
mod demo;
mod host;

use config::Config;
use corrflow_core::{CancellationToken, Services};
use corrflow_storage::MemoryStore;
use demo::{MemoryLedger, OrderCancelled, OrderPlaced, PaymentCaptured, PointsLedger};
use host::Host;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Upper bound on relay rounds, in case replies keep producing commands.
const MAX_RELAY_ROUNDS: usize = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (from file if CORRFLOW_CONFIG is set, then env overrides)
    let loaded = Config::load();
    let filter = loaded
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting corrflow");
    tracing::info!(
        "  Persist unchanged state: {}",
        config.dispatch.persist_unchanged_state
    );
    tracing::info!(
        "  Optimistic concurrency: {}",
        config.storage.optimistic_concurrency
    );

    let store = Arc::new(MemoryStore::with_options(config.storage.options()));
    if let Some(path) = &config.storage.snapshot_path {
        if path.exists() {
            let restored = store.load_snapshot(path)?;
            tracing::info!("  Restored {} instances from {}", restored, path.display());
        } else {
            tracing::info!("  No snapshot at {}, starting empty", path.display());
        }
    }

    let ledger = Arc::new(MemoryLedger::default());
    let services = Services::new().with::<dyn PointsLedger>(ledger.clone());
    let mut host = Host::new(store.clone(), config.dispatch.options()).with_services(services);
    demo::subscribe(&mut host)?;
    tracing::info!("  Compiled blueprints: {}", host.registry().len());

    // Cancel in-flight work on Ctrl-C
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal, cancelling...");
            cancel.cancel();
        });
    }

    replay(&host, &cancel).await?;

    for row in store.instances() {
        tracing::info!(
            "Instance {} state={} version={}",
            row.record.key,
            row.record.state,
            row.record.version
        );
    }
    for customer in ["alice", "bob"] {
        tracing::info!("Customer {} has {} points", customer, ledger.balance(customer));
    }

    if let Some(path) = &config.storage.snapshot_path {
        let meta = store.save_snapshot(path)?;
        tracing::info!(
            "Saved {} instances to {} (checksum {})",
            meta.instance_count,
            path.display(),
            meta.checksum
        );
    }

    tracing::info!("Done after {} commits", store.commit_count());
    Ok(())
}

async fn replay(host: &Host, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orders = [
        ("o-1", "alice", 4200),
        ("o-2", "bob", 1500),
        ("o-3", "alice", 990),
    ];
    for (order_id, customer_id, amount_cents) in orders {
        host.deliver(
            OrderPlaced {
                order_id: order_id.to_string(),
                customer_id: customer_id.to_string(),
                amount_cents,
            },
            cancel,
        )
        .await;
    }

    // Cancelled before the warehouse answers
    host.deliver(
        OrderCancelled {
            order_id: "o-2".to_string(),
        },
        cancel,
    )
    .await;

    // Nobody placed this one
    host.deliver(
        PaymentCaptured {
            order_id: "o-404".to_string(),
        },
        cancel,
    )
    .await;

    for round in 1..=MAX_RELAY_ROUNDS {
        cancel.check()?;
        let envelopes = host.store().drain_outbox();
        if envelopes.is_empty() {
            tracing::info!("Outbox drained after {} relay rounds", round - 1);
            return Ok(());
        }
        for envelope in &envelopes {
            demo::respond(host, envelope, cancel).await?;
        }
    }

    tracing::warn!(
        "Outbox still busy after {} relay rounds, {} messages pending",
        MAX_RELAY_ROUNDS,
        host.store().outbox().len()
    );
    Ok(())
}
