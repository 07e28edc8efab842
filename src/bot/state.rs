/// Tag governing which handler sees the next event of a conversation.
/// The string form is what goes into the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
  Start,
  BrowsingMenu,
  ViewingProduct,
  ViewingCart,
  WaitingAddress,
  WaitingDeliveryChoice,
  WaitingPayment,
  WaitingPaymentConfirmation,
}

impl ConversationState {
  pub fn as_tag(&self) -> &'static str {
    match self {
      Self::Start => "START",
      Self::BrowsingMenu => "BROWSING_MENU",
      Self::ViewingProduct => "VIEWING_PRODUCT",
      Self::ViewingCart => "VIEWING_CART",
      Self::WaitingAddress => "WAITING_ADDRESS",
      Self::WaitingDeliveryChoice => "WAITING_DELIVERY_CHOICE",
      Self::WaitingPayment => "WAITING_PAYMENT",
      Self::WaitingPaymentConfirmation => "WAITING_PAYMENT_CONFIRMATION",
    }
  }

  /// `None` for tags this build does not know; callers must treat that
  /// as a configuration fault, not as ordinary input.
  pub fn from_tag(tag: &str) -> Option<Self> {
    match tag {
      "START" => Some(Self::Start),
      "BROWSING_MENU" => Some(Self::BrowsingMenu),
      "VIEWING_PRODUCT" => Some(Self::ViewingProduct),
      "VIEWING_CART" => Some(Self::ViewingCart),
      "WAITING_ADDRESS" => Some(Self::WaitingAddress),
      "WAITING_DELIVERY_CHOICE" => Some(Self::WaitingDeliveryChoice),
      "WAITING_PAYMENT" => Some(Self::WaitingPayment),
      "WAITING_PAYMENT_CONFIRMATION" => Some(Self::WaitingPaymentConfirmation),
      _ => None,
    }
  }
}
