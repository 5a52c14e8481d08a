use anyhow::Context;
use clap::Parser;
use resilient_cache::cli::{Cli, Runner};
use resilient_cache::infrastructure::logging;
use resilient_cache::{AppConfig, CacheManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(provider) = cli.provider {
        config.cache.cache_type = provider;
    }

    logging::init_logging(&config.logging);

    let manager = CacheManager::from_config(&config.cache)?;
    let runner = Runner::new(manager.clone(), &config);

    let output = runner.run(cli.command).await;
    manager.close().await?;

    println!("{}", serde_json::to_string_pretty(&output?)?);

    Ok(())
}
