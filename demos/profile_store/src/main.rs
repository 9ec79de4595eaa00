//! Profile store walkthrough.
//!
//! Joins a player, edits their profile, then takes the document store
//! offline for a while. Reads keep being served from cache, writes queue up
//! and are delivered once the store comes back; shutdown flushes whatever is
//! left.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use niveria::framework::MemoryStore;
use niveria::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Wallet {
    coins: u64,
    bank: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::named("demo"));
    let runtime = NiveriaRuntime::builder().store(store.clone()).build()?;
    runtime.start().await;

    let ctx = runtime.context();
    ctx.subscribe(Delivery::Background, |event: &CapabilityEvent| {
        info!(?event, "Capability event");
    });

    let steve = EntityKey::new(Uuid::from_u128(0x5745_5645));
    ctx.player_joined(&steve, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))).await?;

    ctx.set_field(
        &steve,
        CapabilityKind::ProfileStore,
        "wallet",
        &Wallet { coins: 120, bank: 0 },
    )
    .await?;
    let wallet: Option<Wallet> = ctx.get_field(&steve, CapabilityKind::ProfileStore, "wallet").await?;
    info!(?wallet, "Wallet after join");

    // ─── Outage ──────────────────────────────────────────────────────────────

    store.set_reachable(false);
    info!("Store is offline");

    ctx.set_field(&steve, CapabilityKind::ProfileStore, "wallet.bank", &100).await?;
    ctx.set_field(&steve, CapabilityKind::ProfileStore, "wallet.coins", &20).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let wallet: Option<Wallet> = ctx.get_field(&steve, CapabilityKind::ProfileStore, "wallet").await?;
    let queue = ctx.stats().queue;
    info!(?wallet, pending = queue.pending, failed = queue.failed, "Served from cache during outage");

    store.set_reachable(true);
    info!("Store is back");
    tokio::time::sleep(Duration::from_secs(3)).await;

    ctx.player_left(&steve);
    let report = runtime.shutdown().await?;
    info!(
        written = report.written,
        store_writes = store.write_count(),
        failed_attempts = store.failed_attempts(),
        "Shut down"
    );

    if let Some(document) = store.document(&steve, CapabilityKind::ProfileStore) {
        info!(profile = %document.value, "Persisted profile");
    }
    Ok(())
}
