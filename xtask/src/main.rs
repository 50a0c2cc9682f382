use anyhow::{ensure, Result};
use bistro_core::credentials::{CredentialBundle, CredentialStore};
use bistro_core::feed::{FeedEvent, OrderFeed};
use bistro_core::order::{Order, OrderStatus, RecordId};
use bistro_core::telemetry;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Bistro")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an offline smoke test of the order feed and credential store.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::filter_from_env("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    runtime.block_on(replay_kitchen_scenario())?;

    let temp_dir = TempDir::new()?;
    let store = CredentialStore::open(temp_dir.path())?;
    store.establish(
        CredentialBundle {
            access_token: Some("smoke-access".into()),
            refresh_token: Some("smoke-refresh".into()),
        },
        None,
    );
    let reloaded = CredentialStore::open(temp_dir.path())?;
    ensure!(
        reloaded.access_token().as_deref() == Some("smoke-access"),
        "credentials did not survive a reload"
    );
    info!("credential store round trip ok");
    Ok(())
}

async fn replay_kitchen_scenario() -> Result<()> {
    let feed = OrderFeed::new();
    let mut updates = feed.subscribe();
    let order = |id: u64, status| Order {
        id: RecordId::from(id),
        status,
        created_at: Utc::now(),
        table: None,
        items: Vec::new(),
        notes: None,
    };

    feed.apply(FeedEvent::Snapshot(vec![
        order(1, OrderStatus::Pending),
        order(2, OrderStatus::Preparing),
        order(3, OrderStatus::Ready),
    ]));
    feed.apply(FeedEvent::Updated(order(1, OrderStatus::Preparing)));
    feed.apply(FeedEvent::Updated(order(2, OrderStatus::Ready)));
    updates.changed().await?;

    let state = updates.borrow_and_update().clone();
    ensure!(state.open_orders().is_empty(), "open column should be empty");
    ensure!(
        state.preparing_orders().len() == 1 && state.preparing_orders()[0].id == RecordId::from(1),
        "preparing column should hold only order 1"
    );
    info!(
        "open" = state.open_orders().len(),
        "preparing" = state.preparing_orders().len(),
        "kitchen scenario replayed"
    );
    Ok(())
}
