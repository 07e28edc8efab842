use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Chat platform a conversation lives on. The prefix is part of the
/// conversation key, so changing it invalidates all stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
  Telegram,
  Facebook,
}

impl Channel {
  pub fn prefix(&self) -> &'static str {
    match self {
      Self::Telegram => "tg",
      Self::Facebook => "fb",
    }
  }
}

/// Identifies a single user's session on one channel. The string form
/// (`tg-123456`) doubles as the state-store key and the remote cart key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationId {
  pub channel: Channel,
  pub user_id: String,
}

impl ConversationId {
  pub fn new(channel: Channel, user_id: impl Into<String>) -> Self {
    Self {
      channel,
      user_id: user_id.into(),
    }
  }

  pub fn telegram(chat_id: i64) -> Self {
    Self::new(Channel::Telegram, chat_id.to_string())
  }

  pub fn facebook(sender_id: impl Into<String>) -> Self {
    Self::new(Channel::Facebook, sender_id)
  }

  pub fn key(&self) -> String {
    format!("{}-{}", self.channel.prefix(), self.user_id)
  }
}

impl fmt::Display for ConversationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.channel.prefix(), self.user_id)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
  pub id: String,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
  pub id: String,
  pub name: String,
  pub description: String,
  pub price_amount: i64,
  pub price_formatted: String,
  pub main_image_id: Option<String>,
}

/// One line of a remote cart. All money fields are formatted upstream;
/// the core never recomputes line totals.
#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
  pub id: String,
  pub product_id: String,
  pub name: String,
  pub description: String,
  pub quantity: i64,
  pub unit_price_formatted: String,
  pub line_total_formatted: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartTotals {
  pub amount: i64,
  pub formatted: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
  pub latitude: f64,
  pub longitude: f64,
}

/// A physical pickup/dispatch point with an assigned courier.
#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentLocation {
  pub id: String,
  pub address: String,
  pub latitude: f64,
  pub longitude: f64,
  pub courier_id: String,
}

impl FulfillmentLocation {
  pub fn coordinates(&self) -> Coordinates {
    Coordinates {
      latitude: self.latitude,
      longitude: self.longitude,
    }
  }
}

/// Pre-rendered product browse card. Serialized as a whole into the
/// catalog cache; the byte-identical rebuild property depends on field
/// order staying stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
  pub title: String,
  pub image_url: String,
  pub subtitle: String,
  pub button_label: String,
  pub button_data: String,
}

/// Aggregate "browse other categories" card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoriesCard {
  pub title: String,
  pub subtitle: String,
  pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
  pub label: String,
  pub data: String,
}

impl Button {
  pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      data: data.into(),
    }
  }
}

/// Platform-neutral outbound content. Adapters own the actual rendering
/// (inline keyboards, card carousels); the core only decides what to say.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
  Text(String),
  Reply {
    text: String,
    buttons: Vec<Vec<Button>>,
  },
  Cards {
    text: String,
    cards: Vec<Card>,
    buttons: Vec<Vec<Button>>,
  },
}

/// Everything the watchdog and the courier notification need about an
/// in-flight delivery. Not persisted beyond the conversation's lifetime.
#[derive(Debug, Clone)]
pub struct OrderContext {
  pub conversation: ConversationId,
  pub delivery_price: i64,
  pub courier_id: String,
}
