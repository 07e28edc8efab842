use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use teloxide::dispatching::UpdateHandler;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::types::ChatId;
use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::types::LabeledPrice;
use teloxide::types::Message;
use teloxide::types::PreCheckoutQuery;
use tracing::error;
use tracing::info;
use tracing::instrument;

use crate::bot::Command;
use crate::bot::Event;
use crate::bot::HandlerResult;
use crate::bot::Machine;
use crate::bot::Outbound;
use crate::models::Button;
use crate::models::ConversationId;
use crate::models::Coordinates;
use crate::models::OutboundPayload;
use crate::util::to_minor_units;
use crate::util::truncate_button_text;

const RETRY_TEXT: &str = "Something went wrong on our side, please try again.";
const BUTTON_MAX_CHARS: usize = 48;
const INVOICE_CURRENCY: &str = "RUB";

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .branch(command_branch())
    .branch(dptree::endpoint(handle_message));

  let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);
  let pre_checkout_handler = Update::filter_pre_checkout_query().endpoint(handle_pre_checkout);

  dptree::entry()
    .branch(message_handler)
    .branch(callback_handler)
    .branch(pre_checkout_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start].endpoint(handle_start_command))
    .branch(dptree::case![Command::Cancel].endpoint(handle_cancel_command))
}

#[instrument(skip(bot, machine, msg))]
async fn handle_start_command(bot: Bot, machine: Arc<Machine>, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /start command");
  let conversation = ConversationId::telegram(msg.chat.id.0);
  dispatch(&bot, &machine, &conversation, msg.chat.id, Event::Start).await
}

#[instrument(skip(bot, machine, msg))]
async fn handle_cancel_command(bot: Bot, machine: Arc<Machine>, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /cancel command");
  let conversation = ConversationId::telegram(msg.chat.id.0);
  dispatch(&bot, &machine, &conversation, msg.chat.id, Event::Cancel).await
}

#[instrument(skip(bot, machine, msg))]
async fn handle_message(bot: Bot, machine: Arc<Machine>, msg: Message) -> HandlerResult {
  let conversation = ConversationId::telegram(msg.chat.id.0);

  let event = if let Some(payment) = msg.successful_payment() {
    info!(chat_id = %msg.chat.id, "received successful payment");
    Event::PaymentConfirmed {
      total_amount: payment.total_amount as i64 / 100,
    }
  } else if let Some(location) = msg.location() {
    Event::Location(Coordinates {
      latitude: location.latitude,
      longitude: location.longitude,
    })
  } else if let Some(text) = msg.text() {
    Event::from_text(text)
  } else {
    return Ok(());
  };

  dispatch(&bot, &machine, &conversation, msg.chat.id, event).await
}

#[instrument(skip(bot, machine, query))]
async fn handle_callback_query(bot: Bot, machine: Arc<Machine>, query: CallbackQuery) -> HandlerResult {
  bot.answer_callback_query(query.id.clone()).await?;
  let Some(data) = query.data.clone() else {
    return Ok(());
  };
  // Private conversations only, so the chat id equals the user id.
  let chat_id = ChatId(query.from.id.0 as i64);
  let conversation = ConversationId::telegram(chat_id.0);
  info!(chat_id = %chat_id, callback = data, "handling callback query");
  dispatch(&bot, &machine, &conversation, chat_id, Event::Callback(data)).await
}

#[instrument(skip(bot, query))]
async fn handle_pre_checkout(bot: Bot, query: PreCheckoutQuery) -> HandlerResult {
  info!(total_amount = query.total_amount, "approving pre-checkout query");
  bot.answer_pre_checkout_query(query.id, true).await?;
  Ok(())
}

/// A handler failure must not wedge the chat: log it, tell the user to
/// retry, and leave the stored state as it was.
async fn dispatch(
  bot: &Bot,
  machine: &Machine,
  conversation: &ConversationId,
  chat: ChatId,
  event: Event,
) -> HandlerResult {
  if let Err(err) = machine.handle(conversation, event).await {
    error!(error = %err, conversation = %conversation, "event handling failed");
    bot.send_message(chat, RETRY_TEXT).await?;
  }
  Ok(())
}

/// Telegram rendering of the platform-neutral payloads. Customer messages
/// go through the storefront bot; couriers are reached via a separate bot
/// so their chat history stays clean.
pub struct TgOutbound {
  bot: Bot,
  courier_bot: Bot,
  payment_token: String,
}

impl TgOutbound {
  pub fn new(bot: Bot, courier_bot: Bot, payment_token: impl Into<String>) -> Self {
    Self {
      bot,
      courier_bot,
      payment_token: payment_token.into(),
    }
  }

  fn chat_id(conversation: &ConversationId) -> Result<ChatId> {
    let id = conversation
      .user_id
      .parse::<i64>()
      .with_context(|| format!("non-numeric telegram chat id {}", conversation.user_id))?;
    Ok(ChatId(id))
  }
}

fn keyboard(buttons: &[Vec<Button>]) -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(buttons.iter().map(|row| {
    row
      .iter()
      .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.data.clone()))
      .collect::<Vec<_>>()
  }))
}

#[async_trait]
impl Outbound for TgOutbound {
  #[instrument(skip(self, payload), fields(conversation = %conversation))]
  async fn send(&self, conversation: &ConversationId, payload: &OutboundPayload) -> Result<()> {
    let chat = Self::chat_id(conversation)?;
    match payload {
      OutboundPayload::Text(text) => {
        self.bot.send_message(chat, text.clone()).await?;
      },
      OutboundPayload::Reply { text, buttons } => {
        self
          .bot
          .send_message(chat, text.clone())
          .reply_markup(keyboard(buttons))
          .await?;
      },
      OutboundPayload::Cards { text, cards, buttons } => {
        // Card carousels have no Telegram equivalent; each card collapses
        // into one keyboard row opening its detail view.
        let mut rows: Vec<Vec<InlineKeyboardButton>> = cards
          .iter()
          .map(|card| {
            vec![InlineKeyboardButton::callback(
              truncate_button_text(&card.title, BUTTON_MAX_CHARS),
              card.button_data.clone(),
            )]
          })
          .collect();
        for row in buttons {
          rows.push(
            row
              .iter()
              .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.data.clone()))
              .collect(),
          );
        }
        self
          .bot
          .send_message(chat, text.clone())
          .reply_markup(InlineKeyboardMarkup::new(rows))
          .await?;
      },
    }
    Ok(())
  }

  #[instrument(skip(self, order_summary))]
  async fn send_courier_notification(
    &self,
    courier_id: &str,
    order_summary: &str,
    coordinates: &Coordinates,
  ) -> Result<()> {
    let chat = ChatId(
      courier_id
        .parse::<i64>()
        .with_context(|| format!("non-numeric courier id {courier_id}"))?,
    );
    self.courier_bot.send_message(chat, order_summary.to_string()).await?;
    self
      .courier_bot
      .send_location(chat, coordinates.latitude, coordinates.longitude)
      .await?;
    info!(courier_id, "courier notified with order and drop-off location");
    Ok(())
  }

  #[instrument(skip(self), fields(conversation = %conversation))]
  async fn request_payment(&self, conversation: &ConversationId, amount: i64, payload: &str) -> Result<()> {
    let chat = Self::chat_id(conversation)?;
    let prices = vec![LabeledPrice::new("Your order", to_minor_units(amount) as u32)];
    self
      .bot
      .send_invoice(
        chat,
        "Order payment",
        "Cart total plus delivery",
        payload.to_string(),
        INVOICE_CURRENCY,
        prices,
      )
      .provider_token(self.payment_token.clone())
      .await?;
    info!(amount, "invoice sent");
    Ok(())
  }
}
