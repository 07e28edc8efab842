use std::env;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;

const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOCATION_FLOW: &str = "fulfillment-location";

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub courier_bot_token: String,
  pub payment_token: String,
  pub database_url: String,
  pub commerce_client_id: String,
  pub commerce_client_secret: String,
  pub geocoder_key: String,
  pub fb_page_token: String,
  pub fb_verify_token: String,
  pub front_page_category: String,
  pub location_flow: String,
  pub delivery_timeout: Duration,
  pub listen_addr: String,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let bot_token = env::var("TG_BOT_TOKEN").context("TG_BOT_TOKEN must be set")?;
    let courier_bot_token = env::var("TG_COURIER_BOT_TOKEN").context("TG_COURIER_BOT_TOKEN must be set")?;
    let payment_token = env::var("TG_PAYMENT_TOKEN").context("TG_PAYMENT_TOKEN must be set")?;
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let commerce_client_id = env::var("COMMERCE_CLIENT_ID").context("COMMERCE_CLIENT_ID must be set")?;
    let commerce_client_secret = env::var("COMMERCE_CLIENT_SECRET").context("COMMERCE_CLIENT_SECRET must be set")?;
    let geocoder_key = env::var("GEOCODER_KEY").context("GEOCODER_KEY must be set")?;
    let fb_page_token = env::var("FB_PAGE_ACCESS_TOKEN").context("FB_PAGE_ACCESS_TOKEN must be set")?;
    let fb_verify_token = env::var("FB_VERIFY_TOKEN").context("FB_VERIFY_TOKEN must be set")?;
    let front_page_category = env::var("FRONT_PAGE_CATEGORY_ID").context("FRONT_PAGE_CATEGORY_ID must be set")?;
    let location_flow = env::var("LOCATION_FLOW").unwrap_or_else(|_| DEFAULT_LOCATION_FLOW.to_string());
    let delivery_timeout = parse_delivery_timeout(env::var("DELIVERY_TIMEOUT_SECS").ok().as_deref());
    let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

    Ok(Self {
      bot_token,
      courier_bot_token,
      payment_token,
      database_url,
      commerce_client_id,
      commerce_client_secret,
      geocoder_key,
      fb_page_token,
      fb_verify_token,
      front_page_category,
      location_flow,
      delivery_timeout,
      listen_addr,
    })
  }
}

fn parse_delivery_timeout(raw: Option<&str>) -> Duration {
  let secs = match raw {
    None => DEFAULT_DELIVERY_TIMEOUT_SECS,
    Some(value) => match value.trim().parse::<u64>() {
      Ok(parsed) if parsed > 0 => parsed,
      _ => {
        tracing::warn!(value, "invalid DELIVERY_TIMEOUT_SECS, using default");
        DEFAULT_DELIVERY_TIMEOUT_SECS
      },
    },
  };
  Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::parse_delivery_timeout;

  #[test]
  fn parses_valid_timeout() {
    assert_eq!(parse_delivery_timeout(Some("120")), Duration::from_secs(120));
  }

  #[test]
  fn falls_back_on_missing_or_invalid() {
    assert_eq!(parse_delivery_timeout(None), Duration::from_secs(300));
    assert_eq!(parse_delivery_timeout(Some("abc")), Duration::from_secs(300));
    assert_eq!(parse_delivery_timeout(Some("0")), Duration::from_secs(300));
  }
}
