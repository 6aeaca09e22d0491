mod cli;
#[cfg(feature = "desktop")]
mod desktop;

use anyhow::Result;
use autostep_util::{EngineSettings, SettingsStore};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let (store, load_error) = match SettingsStore::load() {
        Ok(store) => (store, None),
        Err(error) => (SettingsStore::ephemeral(), Some(error)),
    };
    init_tracing(&store.settings());
    if let Some(error) = load_error {
        warn!(%error, "settings unavailable; using defaults");
    }

    cli.run(store).await
}

fn init_tracing(settings: &EngineSettings) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| settings.log_filter.clone())
        .unwrap_or_else(|| "info".into());
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
