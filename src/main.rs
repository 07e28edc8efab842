mod app;
mod bot;
mod cache;
mod commerce;
mod config;
mod db;
mod fb;
mod geo;
mod geocode;
mod models;
mod telemetry;
#[cfg(test)]
mod testutil;
mod tg;
mod util;
mod watchdog;

use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  telemetry::init()?;
  let config = config::Config::from_env()?;
  info!(listen_addr = %config.listen_addr, "starting storefront bot");
  app::run(config).await
}
