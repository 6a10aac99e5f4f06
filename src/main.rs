use std::str::FromStr;

use sqlx::sqlite::SqliteConnectOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flow_sentinel::agent::Agent;
use flow_sentinel::config::Config;
use flow_sentinel::db::SignalStore;
use flow_sentinel::error::Result;
use flow_sentinel::providers::select_source;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.db_path))?
        .create_if_missing(true);
    let pool = sqlx::SqlitePool::connect_with(opts).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let store = SignalStore::new(pool);
    if cfg.purge_mock_on_start {
        let purged = store.purge_mock_signals().await?;
        info!("[AGENT] purged {purged} leftover mock signal(s)");
    }

    let source = select_source(&cfg)?;
    Agent::new(source, store, cfg).run_forever().await;
    Ok(())
}
