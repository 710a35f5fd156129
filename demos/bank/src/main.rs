mod application;
mod domain;

use anyhow::Context;
use application::Application;
use chronicle::AggregateStore;
use chronicle_serde::json::JsonEncoderBuilder;
use chronicle_sql::{Config, SqlEventLog};
use domain::{AccountClosed, AccountOpened, AmountDeposited, AmountWithdrawn};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = match std::env::var("BANK_POSTGRES_DSN") {
        Ok(dsn) => Config::postgres(dsn),
        Err(_) => Config::sqlite(std::env::var("BANK_SQLITE_PATH").unwrap_or_else(|_| ":memory:".into())),
    };

    let encoder = JsonEncoderBuilder::new()
        .register::<AccountOpened>()
        .register::<AmountDeposited>()
        .register::<AmountWithdrawn>()
        .register::<AccountClosed>()
        .build();

    let event_log = SqlEventLog::connect(config, encoder.clone())
        .await
        .context("connecting the event log")?;
    let store = AggregateStore::new(event_log, encoder);
    let app = Application::new(store);

    info!("opening accounts");
    app.open_account("alice", "Alice", 500).await?;
    app.open_account("bob", "Bob", 0).await?;

    app.deposit("alice", 150).await?;
    app.withdraw("alice", 200).await?;

    info!("transferring 100 from alice to bob");
    app.transfer("alice", "bob", 100).await?;

    let alice_balance = app.balance("alice").await?;
    let bob_balance = app.balance("bob").await?;
    println!("alice: {alice_balance}");
    println!("bob: {bob_balance}");

    app.close_account("alice").await?;
    match app.deposit("alice", 10).await {
        Ok(()) => unreachable!("a closed account must reject deposits"),
        Err(err) => info!(%err, "deposit into closed account rejected, as expected"),
    }

    Ok(())
}
