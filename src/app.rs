use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::dptree;
use teloxide::prelude::*;
use tracing::info;

use crate::bot::Machine;
use crate::bot::Outbound;
use crate::cache::CatalogCache;
use crate::commerce::CommerceApi;
use crate::commerce::MoltinClient;
use crate::config::Config;
use crate::db::Db;
use crate::fb;
use crate::fb::FbApp;
use crate::fb::FbOutbound;
use crate::geo::DeliveryResolver;
use crate::geocode::YandexGeocoder;
use crate::models::Channel;
use crate::models::ConversationId;
use crate::models::Coordinates;
use crate::models::OutboundPayload;
use crate::tg;
use crate::tg::TgOutbound;
use crate::watchdog::DeliveryWatchdog;

/// Multiplexes outbound traffic by channel. Courier notifications always
/// go out over Telegram, whichever channel the customer ordered from.
pub struct OutboundRouter {
  telegram: TgOutbound,
  facebook: FbOutbound,
}

impl OutboundRouter {
  pub fn new(telegram: TgOutbound, facebook: FbOutbound) -> Self {
    Self { telegram, facebook }
  }
}

#[async_trait]
impl Outbound for OutboundRouter {
  async fn send(&self, conversation: &ConversationId, payload: &OutboundPayload) -> Result<()> {
    match conversation.channel {
      Channel::Telegram => self.telegram.send(conversation, payload).await,
      Channel::Facebook => self.facebook.send(conversation, payload).await,
    }
  }

  async fn send_courier_notification(
    &self,
    courier_id: &str,
    order_summary: &str,
    coordinates: &Coordinates,
  ) -> Result<()> {
    self
      .telegram
      .send_courier_notification(courier_id, order_summary, coordinates)
      .await
  }

  async fn request_payment(&self, conversation: &ConversationId, amount: i64, payload: &str) -> Result<()> {
    match conversation.channel {
      Channel::Telegram => self.telegram.request_payment(conversation, amount, payload).await,
      Channel::Facebook => self.facebook.request_payment(conversation, amount, payload).await,
    }
  }
}

pub async fn run(config: Config) -> Result<()> {
  let db = Db::connect(&config.database_url).await?;
  let store = Arc::new(db);
  let commerce: Arc<dyn CommerceApi> = Arc::new(MoltinClient::new(
    config.commerce_client_id.clone(),
    config.commerce_client_secret.clone(),
  ));
  let geocoder = Arc::new(YandexGeocoder::new(config.geocoder_key.clone()));

  let bot = Bot::new(config.bot_token.clone());
  let courier_bot = Bot::new(config.courier_bot_token.clone());
  let outbound = Arc::new(OutboundRouter::new(
    TgOutbound::new(bot.clone(), courier_bot, config.payment_token.clone()),
    FbOutbound::new(config.fb_page_token.clone()),
  ));

  let cache = Arc::new(CatalogCache::new(
    commerce.clone(),
    store.clone(),
    config.front_page_category.clone(),
  ));
  cache.ensure_ready().await?;

  let locations = commerce.list_locations(&config.location_flow).await?;
  info!(count = locations.len(), "loaded fulfillment locations");
  let resolver = DeliveryResolver::new(locations);

  let watchdog = DeliveryWatchdog::new(outbound.clone(), config.delivery_timeout);
  let machine = Arc::new(Machine::new(
    store,
    commerce,
    geocoder,
    outbound.clone(),
    cache.clone(),
    resolver,
    watchdog,
    config.front_page_category.clone(),
  ));

  let fb_app = Arc::new(FbApp {
    machine: machine.clone(),
    cache,
    outbound,
    verify_token: config.fb_verify_token.clone(),
  });
  let http_router = fb::router(fb_app);
  let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
  info!(addr = %config.listen_addr, "webhook server listening");

  let mut dispatcher = Dispatcher::builder(bot, tg::build_schema())
    .dependencies(dptree::deps![machine.clone()])
    .enable_ctrlc_handler()
    .build();

  tokio::select! {
    _ = dispatcher.dispatch() => info!("telegram dispatcher stopped"),
    result = async { axum::serve(listener, http_router).await } => result?,
  }

  machine.shutdown();
  Ok(())
}
