use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::bot::Event;
use crate::bot::Machine;
use crate::bot::Outbound;
use crate::cache::CatalogCache;
use crate::models::Button;
use crate::models::ConversationId;
use crate::models::Coordinates;
use crate::models::OutboundPayload;

const GRAPH_MESSAGES_URL: &str = "https://graph.facebook.com/v7.0/me/messages";
/// Messenger button templates allow at most three buttons per element.
const MAX_TEMPLATE_BUTTONS: usize = 3;
const RETRY_TEXT: &str = "Something went wrong on our side, please try again.";

/// Shared dependencies of the HTTP surface: the Messenger webhook pair
/// plus the catalog-sync hook the e-commerce backend calls on changes.
pub struct FbApp {
  pub machine: Arc<Machine>,
  pub cache: Arc<CatalogCache>,
  pub outbound: Arc<dyn Outbound>,
  pub verify_token: String,
}

pub fn router(app: Arc<FbApp>) -> Router {
  Router::new()
    .route("/webhook", get(verify_webhook).post(receive_webhook))
    .route("/catalog-sync", post(catalog_sync))
    .with_state(app)
}

#[instrument(skip(app, params))]
async fn verify_webhook(State(app): State<Arc<FbApp>>, Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
  let mode = params.get("hub.mode").map(String::as_str);
  let token = params.get("hub.verify_token").map(String::as_str);
  match (mode, token, params.get("hub.challenge")) {
    (Some("subscribe"), Some(token), Some(challenge)) if token == app.verify_token => {
      info!("webhook verification succeeded");
      (StatusCode::OK, challenge.clone())
    },
    _ => {
      warn!("webhook verification rejected");
      (StatusCode::FORBIDDEN, "verification failed".to_string())
    },
  }
}

#[instrument(skip(app, body))]
async fn receive_webhook(State(app): State<Arc<FbApp>>, axum::Json(body): axum::Json<Value>) -> StatusCode {
  if body.pointer("/object").and_then(Value::as_str) != Some("page") {
    return StatusCode::OK;
  }

  for (sender_id, event) in extract_events(&body) {
    let conversation = ConversationId::facebook(sender_id);
    if let Err(err) = app.machine.handle(&conversation, event).await {
      // Messenger retries on non-2xx, which would replay the whole batch;
      // log, tell the user to retry, and move on instead.
      error!(error = %err, conversation = %conversation, "webhook event handling failed");
      let retry = OutboundPayload::Text(RETRY_TEXT.to_string());
      if let Err(err) = app.outbound.send(&conversation, &retry).await {
        warn!(error = %err, conversation = %conversation, "failed to deliver retry prompt");
      }
    }
  }
  StatusCode::OK
}

#[instrument(skip(app))]
async fn catalog_sync(State(app): State<Arc<FbApp>>) -> StatusCode {
  info!("catalog sync requested");
  match app.cache.rebuild().await {
    Ok(()) => StatusCode::NO_CONTENT,
    Err(err) => {
      error!(error = %err, "catalog cache rebuild failed");
      StatusCode::INTERNAL_SERVER_ERROR
    },
  }
}

/// Flattens a page webhook batch into per-sender events. Unsupported
/// messaging entries (reads, delivery receipts) are skipped.
fn extract_events(body: &Value) -> Vec<(String, Event)> {
  let mut events = Vec::new();
  let entries = body
    .pointer("/entry")
    .and_then(Value::as_array)
    .cloned()
    .unwrap_or_default();
  for entry in &entries {
    let Some(messagings) = entry.pointer("/messaging").and_then(Value::as_array) else {
      continue;
    };
    for messaging in messagings {
      let Some(sender_id) = messaging.pointer("/sender/id").and_then(Value::as_str) else {
        continue;
      };
      let event = if let Some(payload) = messaging.pointer("/postback/payload").and_then(Value::as_str) {
        Event::Callback(payload.to_string())
      } else if let Some(payload) = messaging
        .pointer("/message/quick_reply/payload")
        .and_then(Value::as_str)
      {
        Event::Callback(payload.to_string())
      } else if let Some(text) = messaging.pointer("/message/text").and_then(Value::as_str) {
        Event::from_text(text)
      } else {
        continue;
      };
      events.push((sender_id.to_string(), event));
    }
  }
  events
}

/// Messenger rendering over the Graph send API.
pub struct FbOutbound {
  http: reqwest::Client,
  page_token: String,
}

impl FbOutbound {
  pub fn new(page_token: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      page_token: page_token.into(),
    }
  }

  async fn send_api(&self, recipient_id: &str, message: Value) -> Result<()> {
    self
      .http
      .post(GRAPH_MESSAGES_URL)
      .query(&[("access_token", self.page_token.as_str())])
      .json(&json!({
        "recipient": { "id": recipient_id },
        "message": message,
      }))
      .send()
      .await?
      .error_for_status()?;
    Ok(())
  }
}

fn postback_button(button: &Button) -> Value {
  json!({
    "type": "postback",
    "title": button.label,
    "payload": button.data,
  })
}

fn render_message(payload: &OutboundPayload) -> Value {
  match payload {
    OutboundPayload::Text(text) => json!({ "text": text }),
    OutboundPayload::Reply { text, buttons } => {
      let flat: Vec<Value> = buttons
        .iter()
        .flatten()
        .take(MAX_TEMPLATE_BUTTONS)
        .map(postback_button)
        .collect();
      json!({
        "attachment": {
          "type": "template",
          "payload": {
            "template_type": "button",
            "text": text,
            "buttons": flat,
          }
        }
      })
    },
    OutboundPayload::Cards { text, cards, buttons } => {
      let mut elements: Vec<Value> = cards
        .iter()
        .map(|card| {
          json!({
            "title": card.title,
            "image_url": card.image_url,
            "subtitle": card.subtitle,
            "buttons": [{
              "type": "postback",
              "title": card.button_label,
              "payload": card.button_data,
            }],
          })
        })
        .collect();
      // Navigation lands on a trailing element since carousel cards
      // cannot share a footer keyboard.
      let nav: Vec<Value> = buttons
        .iter()
        .flatten()
        .take(MAX_TEMPLATE_BUTTONS)
        .map(postback_button)
        .collect();
      if !nav.is_empty() {
        elements.push(json!({
          "title": text,
          "buttons": nav,
        }));
      }
      json!({
        "attachment": {
          "type": "template",
          "payload": {
            "template_type": "generic",
            "elements": elements,
          }
        }
      })
    },
  }
}

#[async_trait]
impl Outbound for FbOutbound {
  #[instrument(skip(self, payload), fields(conversation = %conversation))]
  async fn send(&self, conversation: &ConversationId, payload: &OutboundPayload) -> Result<()> {
    self.send_api(&conversation.user_id, render_message(payload)).await
  }

  async fn send_courier_notification(&self, courier_id: &str, _order_summary: &str, _coordinates: &Coordinates) -> Result<()> {
    anyhow::bail!("courier {courier_id} cannot be reached over messenger")
  }

  /// Messenger has no invoice flow here; fall back to a manual handoff
  /// message so the conversation is not left hanging.
  #[instrument(skip(self), fields(conversation = %conversation))]
  async fn request_payment(&self, conversation: &ConversationId, amount: i64, _payload: &str) -> Result<()> {
    warn!(amount, "in-chat payment unavailable on messenger, sending handoff text");
    let text = format!(
      "Online payment is not available here yet. Our operator will contact you to settle {}.",
      crate::util::format_price(amount)
    );
    self.send_api(&conversation.user_id, json!({ "text": text })).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use axum::extract::State;
  use axum::http::StatusCode;
  use serde_json::json;

  use super::FbApp;
  use super::RETRY_TEXT;
  use super::extract_events;
  use super::receive_webhook;
  use super::render_message;
  use crate::bot::Event;
  use crate::bot::Machine;
  use crate::cache::CatalogCache;
  use crate::db::StateStore;
  use crate::geo::DeliveryResolver;
  use crate::models::Button;
  use crate::models::Card;
  use crate::models::OutboundPayload;
  use crate::testutil::FakeCommerce;
  use crate::testutil::FakeGeocoder;
  use crate::testutil::MemoryStore;
  use crate::testutil::RecordingOutbound;
  use crate::watchdog::DeliveryWatchdog;

  #[test]
  fn extracts_text_and_postback_events() {
    let body = json!({
      "object": "page",
      "entry": [{
        "messaging": [
          { "sender": { "id": "111" }, "message": { "text": "/start" } },
          { "sender": { "id": "222" }, "postback": { "payload": "cart" } },
          { "sender": { "id": "333" }, "delivery": { "mids": [] } },
        ]
      }]
    });
    let events = extract_events(&body);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ("111".to_string(), Event::Start));
    assert_eq!(events[1], ("222".to_string(), Event::Callback("cart".to_string())));
  }

  #[test]
  fn quick_reply_payloads_become_callbacks() {
    let body = json!({
      "object": "page",
      "entry": [{
        "messaging": [
          { "sender": { "id": "111" }, "message": { "text": "ignored", "quick_reply": { "payload": "pay" } } },
        ]
      }]
    });
    let events = extract_events(&body);
    assert_eq!(events, vec![("111".to_string(), Event::Callback("pay".to_string()))]);
  }

  #[tokio::test]
  async fn handler_failure_sends_retry_prompt() {
    let commerce = Arc::new(FakeCommerce::with_sample_catalog());
    let store = Arc::new(MemoryStore::default());
    let outbound = Arc::new(RecordingOutbound::default());
    let cache = Arc::new(CatalogCache::new(commerce.clone(), store.clone(), "front".to_string()));
    let machine = Arc::new(Machine::new(
      store.clone(),
      commerce.clone(),
      Arc::new(FakeGeocoder::default()),
      outbound.clone(),
      cache.clone(),
      DeliveryResolver::new(Vec::new()),
      DeliveryWatchdog::new(outbound.clone(), Duration::from_secs(300)),
      "front".to_string(),
    ));
    let app = Arc::new(FbApp {
      machine,
      cache,
      outbound: outbound.clone(),
      verify_token: "verify".to_string(),
    });

    store.set("fb-99", "VIEWING_PRODUCT").await.expect("seed state");
    commerce.fail_on("add_cart_item");

    let body = json!({
      "object": "page",
      "entry": [{
        "messaging": [
          { "sender": { "id": "99" }, "postback": { "payload": "p-1,2" } },
        ]
      }]
    });
    let status = receive_webhook(State(app), axum::Json(body)).await;

    // The batch is still acknowledged so Messenger does not replay it.
    assert_eq!(status, StatusCode::OK);
    let sent = outbound.sent_to("fb-99");
    assert!(matches!(sent.last(), Some(OutboundPayload::Text(text)) if text == RETRY_TEXT));
  }

  #[test]
  fn button_template_caps_at_three_buttons() {
    let payload = OutboundPayload::Reply {
      text: "Pick one".to_string(),
      buttons: vec![
        vec![Button::new("A", "a"), Button::new("B", "b")],
        vec![Button::new("C", "c"), Button::new("D", "d")],
      ],
    };
    let message = render_message(&payload);
    let buttons = message
      .pointer("/attachment/payload/buttons")
      .and_then(|value| value.as_array())
      .expect("buttons array");
    assert_eq!(buttons.len(), 3);
    assert_eq!(message.pointer("/attachment/payload/template_type").unwrap(), "button");
  }

  #[test]
  fn cards_render_as_generic_template_with_nav_element() {
    let payload = OutboundPayload::Cards {
      text: "Choose a product:".to_string(),
      cards: vec![Card {
        title: "Margherita | 550 RUB".to_string(),
        image_url: "https://files.test/img-1".to_string(),
        subtitle: "Classic".to_string(),
        button_label: "View details".to_string(),
        button_data: "p-1".to_string(),
      }],
      buttons: vec![vec![Button::new("Cart", "cart")]],
    };
    let message = render_message(&payload);
    let elements = message
      .pointer("/attachment/payload/elements")
      .and_then(|value| value.as_array())
      .expect("elements array");
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].pointer("/buttons/0/payload").unwrap(), "p-1");
    assert_eq!(elements[1].pointer("/buttons/0/payload").unwrap(), "cart");
  }
}
