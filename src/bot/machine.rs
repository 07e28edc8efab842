use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::bot::Outbound;
use crate::bot::event::CartAction;
use crate::bot::event::DeliveryAction;
use crate::bot::event::Event;
use crate::bot::event::MenuAction;
use crate::bot::event::ProductAction;
use crate::bot::event::parse_cart_action;
use crate::bot::event::parse_delivery_action;
use crate::bot::event::parse_menu_action;
use crate::bot::event::parse_payment_action;
use crate::bot::event::parse_product_action;
use crate::bot::state::ConversationState;
use crate::cache::CatalogCache;
use crate::commerce::CommerceApi;
use crate::db::StateStore;
use crate::geo::DeliveryResolver;
use crate::geo::DeliveryTier;
use crate::geocode::Geocoder;
use crate::models::Button;
use crate::models::Channel;
use crate::models::ConversationId;
use crate::models::OrderContext;
use crate::models::OutboundPayload;
use crate::util::format_price;
use crate::watchdog::DeliveryWatchdog;

const PRODUCTS_PER_PAGE: usize = 8;
const ADDRESS_PROMPT: &str = "Send us your address as text, or share your location.";
const ADDRESS_RETRY: &str = "We could not recognize that address, please try again.";
const DELIVERY_CHOICE_PROMPT: &str = "Choose delivery or pickup using the buttons.";
const PAYMENT_WAIT_PROMPT: &str = "Waiting for your payment confirmation.";

/// Per-conversation finite-state dispatcher. Handlers are pure functions
/// of (current state, event) over the injected collaborators: they
/// perform side effects through them and return exactly one next state.
pub struct Machine {
  store: Arc<dyn StateStore>,
  commerce: Arc<dyn CommerceApi>,
  geocoder: Arc<dyn Geocoder>,
  outbound: Arc<dyn Outbound>,
  cache: Arc<CatalogCache>,
  resolver: DeliveryResolver,
  watchdog: DeliveryWatchdog,
  front_page_category: String,
}

impl Machine {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    store: Arc<dyn StateStore>,
    commerce: Arc<dyn CommerceApi>,
    geocoder: Arc<dyn Geocoder>,
    outbound: Arc<dyn Outbound>,
    cache: Arc<CatalogCache>,
    resolver: DeliveryResolver,
    watchdog: DeliveryWatchdog,
    front_page_category: String,
  ) -> Self {
    Self {
      store,
      commerce,
      geocoder,
      outbound,
      cache,
      resolver,
      watchdog,
      front_page_category,
    }
  }

  /// Dispatch contract: resolve the stored tag (reset events override it),
  /// run the handler for that state, then persist the returned tag
  /// unconditionally. A failed handler leaves the stored tag untouched so
  /// the event counts as unprocessed.
  #[instrument(skip(self, event), fields(conversation = %conversation))]
  pub async fn handle(&self, conversation: &ConversationId, event: Event) -> Result<()> {
    let state = self.resolve_state(conversation, &event).await?;
    debug!(state = state.as_tag(), "dispatching event");
    let next = self.dispatch(conversation, state, event).await?;
    self.store.set(&conversation.key(), next.as_tag()).await?;
    debug!(next = next.as_tag(), "conversation state updated");
    Ok(())
  }

  /// Aborts pending watchdog tasks; process shutdown only.
  pub fn shutdown(&self) {
    self.watchdog.shutdown();
  }

  async fn resolve_state(&self, conversation: &ConversationId, event: &Event) -> Result<ConversationState> {
    match event {
      Event::Start => Ok(ConversationState::Start),
      Event::Cancel => {
        self.commerce.clear_cart(&conversation.key()).await?;
        info!(conversation = %conversation, "cart discarded on /cancel");
        Ok(ConversationState::Start)
      },
      _ => match self.store.get(&conversation.key()).await? {
        None => Ok(ConversationState::Start),
        Some(tag) => match ConversationState::from_tag(&tag) {
          Some(state) => Ok(state),
          None => {
            // A tag this build has no handler for is a configuration
            // fault; recover by restarting the conversation.
            error!(conversation = %conversation, tag, "stored state tag has no handler, resetting to START");
            Ok(ConversationState::Start)
          },
        },
      },
    }
  }

  async fn dispatch(
    &self,
    conversation: &ConversationId,
    state: ConversationState,
    event: Event,
  ) -> Result<ConversationState> {
    match state {
      ConversationState::Start => self.handle_start(conversation).await,
      ConversationState::BrowsingMenu => self.handle_browsing_menu(conversation, event).await,
      ConversationState::ViewingProduct => self.handle_viewing_product(conversation, event).await,
      ConversationState::ViewingCart => self.handle_viewing_cart(conversation, event).await,
      ConversationState::WaitingAddress => self.handle_waiting_address(conversation, event).await,
      ConversationState::WaitingDeliveryChoice => self.handle_waiting_delivery_choice(conversation, event).await,
      ConversationState::WaitingPayment => self.handle_waiting_payment(conversation, event).await,
      ConversationState::WaitingPaymentConfirmation => {
        self.handle_waiting_payment_confirmation(conversation, event).await
      },
    }
  }

  async fn handle_start(&self, conversation: &ConversationId) -> Result<ConversationState> {
    self.send_menu(conversation, &self.front_page_category, 0).await?;
    Ok(ConversationState::BrowsingMenu)
  }

  async fn handle_browsing_menu(&self, conversation: &ConversationId, event: Event) -> Result<ConversationState> {
    if let Event::Callback(data) = &event {
      match parse_menu_action(data) {
        Some(MenuAction::Cart) => {
          self.send_cart(conversation).await?;
          return Ok(ConversationState::ViewingCart);
        },
        Some(MenuAction::Pagination { category_id, page }) => {
          self.send_menu(conversation, &category_id, page).await?;
          return Ok(ConversationState::BrowsingMenu);
        },
        Some(MenuAction::Category(category_id)) => {
          self.send_menu(conversation, &category_id, 0).await?;
          return Ok(ConversationState::BrowsingMenu);
        },
        Some(MenuAction::Product(product_id)) => {
          self.send_product(conversation, &product_id).await?;
          return Ok(ConversationState::ViewingProduct);
        },
        None => warn!(conversation = %conversation, data, "unparseable menu callback"),
      }
    }
    self.send_menu(conversation, &self.front_page_category, 0).await?;
    Ok(ConversationState::BrowsingMenu)
  }

  async fn handle_viewing_product(&self, conversation: &ConversationId, event: Event) -> Result<ConversationState> {
    if let Event::Callback(data) = &event {
      match parse_product_action(data) {
        Some(ProductAction::Menu) => {
          self.send_menu(conversation, &self.front_page_category, 0).await?;
          return Ok(ConversationState::BrowsingMenu);
        },
        Some(ProductAction::Cart) => {
          self.send_cart(conversation).await?;
          return Ok(ConversationState::ViewingCart);
        },
        Some(ProductAction::Add { product_id, quantity }) => {
          self
            .commerce
            .add_cart_item(&conversation.key(), &product_id, quantity)
            .await?;
          info!(conversation = %conversation, product_id, quantity, "added product to cart");
          let text = format!("Added {quantity} to your cart.");
          self.outbound.send(conversation, &OutboundPayload::Text(text)).await?;
          return Ok(ConversationState::ViewingProduct);
        },
        None => warn!(conversation = %conversation, data, "unparseable product callback"),
      }
    }
    let prompt = "Use the product buttons, or go back to the menu.".to_string();
    self.outbound.send(conversation, &OutboundPayload::Text(prompt)).await?;
    Ok(ConversationState::ViewingProduct)
  }

  async fn handle_viewing_cart(&self, conversation: &ConversationId, event: Event) -> Result<ConversationState> {
    if let Event::Callback(data) = &event {
      match parse_cart_action(data) {
        Some(CartAction::Menu) => {
          self.send_menu(conversation, &self.front_page_category, 0).await?;
          return Ok(ConversationState::BrowsingMenu);
        },
        Some(CartAction::Pay) => {
          self
            .outbound
            .send(conversation, &OutboundPayload::Text(ADDRESS_PROMPT.to_string()))
            .await?;
          return Ok(ConversationState::WaitingAddress);
        },
        Some(CartAction::Remove(item_id)) => {
          self.commerce.remove_cart_item(&conversation.key(), &item_id).await?;
          info!(conversation = %conversation, item_id, "removed cart item");
          self.send_cart(conversation).await?;
          return Ok(ConversationState::ViewingCart);
        },
        None => warn!(conversation = %conversation, data, "unparseable cart callback"),
      }
    }
    self.send_cart(conversation).await?;
    Ok(ConversationState::ViewingCart)
  }

  async fn handle_waiting_address(&self, conversation: &ConversationId, event: Event) -> Result<ConversationState> {
    let coordinates = match &event {
      Event::Location(coordinates) => Some(*coordinates),
      Event::Text(text) => self.geocoder.resolve_address(text).await?,
      _ => None,
    };

    let Some(coordinates) = coordinates else {
      self
        .outbound
        .send(conversation, &OutboundPayload::Text(ADDRESS_RETRY.to_string()))
        .await?;
      return Ok(ConversationState::WaitingAddress);
    };

    let address_id = self.commerce.create_address_entry(&coordinates).await?;
    let resolution = self
      .resolver
      .resolve(&coordinates)
      .context("no fulfillment locations configured")?;
    info!(
      conversation = %conversation,
      location = resolution.location.id,
      distance_km = resolution.distance_km,
      "resolved nearest fulfillment location"
    );

    let Some(price) = resolution.tier.delivery_price() else {
      let text = format!(
        "Sorry, the nearest point is {:.1} km away — too far for delivery.\n\
         Maybe the address has a typo? Try again.",
        resolution.distance_km
      );
      self.outbound.send(conversation, &OutboundPayload::Text(text)).await?;
      return Ok(ConversationState::WaitingAddress);
    };

    let text = match resolution.tier {
      DeliveryTier::WalkingDistance => format!(
        "Our point at {} is only {} m from you — pickup is the quickest option.\n\
         We can also deliver for free.",
        resolution.location.address,
        (resolution.distance_km * 1000.0).round() as i64
      ),
      _ => format!(
        "Delivery to your address will cost {}. Delivery or pickup?",
        format_price(price)
      ),
    };
    let buttons = vec![
      vec![Button::new("Delivery", format!("delivery,{address_id},{price}"))],
      vec![Button::new("Pickup", format!("pickup,{}", resolution.location.id))],
    ];
    self
      .outbound
      .send(conversation, &OutboundPayload::Reply { text, buttons })
      .await?;
    Ok(ConversationState::WaitingDeliveryChoice)
  }

  async fn handle_waiting_delivery_choice(
    &self,
    conversation: &ConversationId,
    event: Event,
  ) -> Result<ConversationState> {
    if let Event::Callback(data) = &event {
      match parse_delivery_action(data) {
        Some(DeliveryAction::Pickup { location_id }) => {
          let Some(location) = self.resolver.location(&location_id) else {
            warn!(conversation = %conversation, location_id, "pickup callback for unknown location");
            return self.reprompt_delivery_choice(conversation).await;
          };
          let text = format!(
            "We started preparing your order. Pick it up at:\n{}",
            location.address
          );
          self.outbound.send(conversation, &OutboundPayload::Text(text)).await?;
          self.send_payment_prompt(conversation, 0).await?;
          return Ok(ConversationState::WaitingPayment);
        },
        Some(DeliveryAction::Delivery { address_id, price }) => {
          let coordinates = self.commerce.get_address_entry(&address_id).await?;
          let resolution = self
            .resolver
            .resolve(&coordinates)
            .context("no fulfillment locations configured")?;
          let summary = self.order_summary(&conversation.key(), price).await?;
          self
            .outbound
            .send_courier_notification(&resolution.location.courier_id, &summary, &coordinates)
            .await?;
          self.watchdog.arm(OrderContext {
            conversation: conversation.clone(),
            delivery_price: price,
            courier_id: resolution.location.courier_id.clone(),
          });
          info!(
            conversation = %conversation,
            courier_id = resolution.location.courier_id,
            price,
            "courier notified, watchdog armed"
          );
          let text = "A courier will deliver your order within 60 minutes.".to_string();
          self.outbound.send(conversation, &OutboundPayload::Text(text)).await?;
          self.send_payment_prompt(conversation, price).await?;
          return Ok(ConversationState::WaitingPayment);
        },
        None => warn!(conversation = %conversation, data, "unparseable delivery callback"),
      }
    }
    self.reprompt_delivery_choice(conversation).await
  }

  async fn reprompt_delivery_choice(&self, conversation: &ConversationId) -> Result<ConversationState> {
    self
      .outbound
      .send(conversation, &OutboundPayload::Text(DELIVERY_CHOICE_PROMPT.to_string()))
      .await?;
    Ok(ConversationState::WaitingDeliveryChoice)
  }

  async fn handle_waiting_payment(&self, conversation: &ConversationId, event: Event) -> Result<ConversationState> {
    match &event {
      Event::Callback(data) => {
        if let Some(delivery_price) = parse_payment_action(data) {
          let totals = self.commerce.get_cart_totals(&conversation.key()).await?;
          let total = totals.amount + delivery_price;
          let payload = format!("order-{}-{total}", conversation.key());
          self.outbound.request_payment(conversation, total, &payload).await?;
          info!(conversation = %conversation, total, delivery_price, "payment requested");
          return Ok(match conversation.channel {
            Channel::Telegram => ConversationState::WaitingPaymentConfirmation,
            // No confirmation event ever arrives over messenger; the
            // operator handoff ends the in-chat checkout.
            Channel::Facebook => ConversationState::Start,
          });
        }
        warn!(conversation = %conversation, data, "unparseable payment callback");
        let text = "Press «Pay» on the message above to pay for your order.".to_string();
        self.outbound.send(conversation, &OutboundPayload::Text(text)).await?;
        return Ok(ConversationState::WaitingPayment);
      },
      // A user can complete the invoice before the initiation round-trip
      // lands; accept the confirmation here too.
      Event::PaymentConfirmed { total_amount } => {
        return self.finish_paid_order(conversation, *total_amount).await;
      },
      _ => {},
    }
    let text = "Press «Pay» on the message above to pay for your order.".to_string();
    self.outbound.send(conversation, &OutboundPayload::Text(text)).await?;
    Ok(ConversationState::WaitingPayment)
  }

  async fn handle_waiting_payment_confirmation(
    &self,
    conversation: &ConversationId,
    event: Event,
  ) -> Result<ConversationState> {
    if let Event::PaymentConfirmed { total_amount } = &event {
      return self.finish_paid_order(conversation, *total_amount).await;
    }
    self
      .outbound
      .send(conversation, &OutboundPayload::Text(PAYMENT_WAIT_PROMPT.to_string()))
      .await?;
    Ok(ConversationState::WaitingPaymentConfirmation)
  }

  async fn finish_paid_order(&self, conversation: &ConversationId, total_amount: i64) -> Result<ConversationState> {
    self.ensure_customer_record(conversation).await?;
    self.commerce.clear_cart(&conversation.key()).await?;
    let text = format!(
      "Your order for {} is paid. Send /start whenever you are hungry again!",
      format_price(total_amount)
    );
    self.outbound.send(conversation, &OutboundPayload::Text(text)).await?;
    info!(conversation = %conversation, total_amount, "order paid, conversation reset");
    Ok(ConversationState::Start)
  }

  /// Keeps the backend customer record in sync with this conversation;
  /// the store holds the conversation-to-customer-id mapping.
  async fn ensure_customer_record(&self, conversation: &ConversationId) -> Result<()> {
    let key = conversation.key();
    let customer_key = format!("customer:{key}");
    let email = format!("{key}@customers.local");
    match self.store.get(&customer_key).await? {
      Some(customer_id) => {
        self.commerce.update_customer(&customer_id, &email, &key).await?;
        debug!(conversation = %conversation, customer_id, "customer record refreshed");
      },
      None => {
        let customer_id = self.commerce.create_customer(&email, &key).await?;
        self.store.set(&customer_key, &customer_id).await?;
        info!(conversation = %conversation, customer_id, "customer record created");
      },
    }
    Ok(())
  }

  async fn send_menu(&self, conversation: &ConversationId, category_id: &str, page: usize) -> Result<()> {
    let cards = self.cache.category_cards(category_id).await?;
    let categories_card = self.cache.categories_card().await?;

    let total_pages = cards.len().div_ceil(PRODUCTS_PER_PAGE).max(1);
    let page = page.min(total_pages - 1);
    let start = page * PRODUCTS_PER_PAGE;
    let end = (start + PRODUCTS_PER_PAGE).min(cards.len());

    let mut buttons: Vec<Vec<Button>> = Vec::new();
    let mut pagination = Vec::new();
    if page > 0 {
      pagination.push(Button::new("← Prev page", format!("pagination,{category_id},{}", page - 1)));
    }
    if end < cards.len() {
      pagination.push(Button::new("Next page →", format!("pagination,{category_id},{}", page + 1)));
    }
    if !pagination.is_empty() {
      buttons.push(pagination);
    }
    for chunk in categories_card.categories.chunks(2) {
      buttons.push(
        chunk
          .iter()
          .map(|category| Button::new(category.name.clone(), format!("category,{}", category.id)))
          .collect(),
      );
    }
    buttons.push(vec![Button::new("Cart", "cart")]);

    let payload = OutboundPayload::Cards {
      text: "Choose a product:".to_string(),
      cards: cards[start .. end].to_vec(),
      buttons,
    };
    self.outbound.send(conversation, &payload).await?;
    debug!(conversation = %conversation, category_id, page, "menu sent");
    Ok(())
  }

  async fn send_product(&self, conversation: &ConversationId, product_id: &str) -> Result<()> {
    let product = self.commerce.get_product(product_id).await?;
    let text = format!(
      "{}\n\n{}\n\n{}",
      product.name, product.price_formatted, product.description
    );
    let buttons = vec![
      vec![Button::new("Add to cart", format!("{},1", product.id))],
      vec![Button::new("Menu", "menu"), Button::new("Cart", "cart")],
    ];
    self
      .outbound
      .send(conversation, &OutboundPayload::Reply { text, buttons })
      .await?;
    debug!(conversation = %conversation, product_id, "product detail sent");
    Ok(())
  }

  async fn send_cart(&self, conversation: &ConversationId) -> Result<()> {
    let key = conversation.key();
    let items = self.commerce.get_cart_items(&key).await?;

    if items.is_empty() {
      let payload = OutboundPayload::Reply {
        text: "Your cart is empty.".to_string(),
        buttons: vec![vec![Button::new("Menu", "menu")]],
      };
      self.outbound.send(conversation, &payload).await?;
      return Ok(());
    }

    let totals = self.commerce.get_cart_totals(&key).await?;
    let mut text = String::from("Your cart:\n\n");
    let mut buttons: Vec<Vec<Button>> = Vec::new();
    for item in &items {
      text.push_str(&format!(
        "{}\n{}\n{} each\n{} pcs for {}\n\n",
        item.name, item.description, item.unit_price_formatted, item.quantity, item.line_total_formatted
      ));
      buttons.push(vec![Button::new(format!("Remove {}", item.name), item.id.clone())]);
    }
    text.push_str(&format!("Total: {}", totals.formatted));
    buttons.push(vec![Button::new("Checkout", "pay"), Button::new("Menu", "menu")]);

    self
      .outbound
      .send(conversation, &OutboundPayload::Reply { text, buttons })
      .await?;
    debug!(conversation = %conversation, items = items.len(), "cart sent");
    Ok(())
  }

  async fn send_payment_prompt(&self, conversation: &ConversationId, delivery_price: i64) -> Result<()> {
    let payload = OutboundPayload::Reply {
      text: "Press «Pay» to pay for your order.".to_string(),
      buttons: vec![vec![Button::new("Pay", format!("payment,{delivery_price}"))]],
    };
    self.outbound.send(conversation, &payload).await
  }

  async fn order_summary(&self, cart_key: &str, delivery_price: i64) -> Result<String> {
    let items = self.commerce.get_cart_items(cart_key).await?;
    let totals = self.commerce.get_cart_totals(cart_key).await?;
    let mut text = format!("Order from {cart_key}:\n");
    for item in &items {
      text.push_str(&format!(
        "{} — {} pcs, {}\n",
        item.name, item.quantity, item.line_total_formatted
      ));
    }
    text.push_str(&format!(
      "Total with delivery: {}",
      format_price(totals.amount + delivery_price)
    ));
    Ok(text)
  }
}
