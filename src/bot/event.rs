use crate::models::Coordinates;

/// Platform-neutral event. Adapters normalize raw platform updates into
/// exactly one of these before the state machine sees them.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  /// Universal reset.
  Start,
  /// Universal reset that additionally discards the cart.
  Cancel,
  Text(String),
  Location(Coordinates),
  /// Raw button-callback payload; parsed per state, malformed data is a
  /// no-op rather than an error.
  Callback(String),
  /// Out-of-band confirmation from the payment collaborator.
  PaymentConfirmed { total_amount: i64 },
}

impl Event {
  pub fn from_text(text: &str) -> Self {
    match text.trim() {
      "/start" => Self::Start,
      "/cancel" => Self::Cancel,
      other => Self::Text(other.to_string()),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuAction {
  Cart,
  Pagination { category_id: String, page: usize },
  Category(String),
  Product(String),
}

/// Menu callbacks: `cart`, `pagination,{category},{page}`,
/// `category,{id}`, or a bare product id.
pub fn parse_menu_action(data: &str) -> Option<MenuAction> {
  if data == "cart" {
    return Some(MenuAction::Cart);
  }
  if let Some(rest) = data.strip_prefix("pagination,") {
    let (category_id, page) = rest.split_once(',')?;
    return Some(MenuAction::Pagination {
      category_id: category_id.to_string(),
      page: page.parse().ok()?,
    });
  }
  if let Some(category_id) = data.strip_prefix("category,") {
    if category_id.is_empty() {
      return None;
    }
    return Some(MenuAction::Category(category_id.to_string()));
  }
  if data.is_empty() || data.contains(',') {
    return None;
  }
  Some(MenuAction::Product(data.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductAction {
  Menu,
  Cart,
  Add { product_id: String, quantity: i64 },
}

/// Product-view callbacks: `menu`, `cart`, or `{product_id},{quantity}`.
pub fn parse_product_action(data: &str) -> Option<ProductAction> {
  match data {
    "menu" => Some(ProductAction::Menu),
    "cart" => Some(ProductAction::Cart),
    other => {
      let (product_id, quantity) = other.split_once(',')?;
      let quantity: i64 = quantity.parse().ok()?;
      if product_id.is_empty() || quantity <= 0 {
        return None;
      }
      Some(ProductAction::Add {
        product_id: product_id.to_string(),
        quantity,
      })
    },
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CartAction {
  Menu,
  Pay,
  Remove(String),
}

/// Cart callbacks: `menu`, `pay`, or a bare cart-item id to remove.
pub fn parse_cart_action(data: &str) -> Option<CartAction> {
  match data {
    "menu" => Some(CartAction::Menu),
    "pay" => Some(CartAction::Pay),
    "" => None,
    item_id => Some(CartAction::Remove(item_id.to_string())),
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryAction {
  Pickup { location_id: String },
  Delivery { address_id: String, price: i64 },
}

/// Delivery-choice callbacks: `pickup,{location}` or
/// `delivery,{address},{price}`.
pub fn parse_delivery_action(data: &str) -> Option<DeliveryAction> {
  if let Some(location_id) = data.strip_prefix("pickup,") {
    if location_id.is_empty() {
      return None;
    }
    return Some(DeliveryAction::Pickup {
      location_id: location_id.to_string(),
    });
  }
  if let Some(rest) = data.strip_prefix("delivery,") {
    let (address_id, price) = rest.split_once(',')?;
    if address_id.is_empty() {
      return None;
    }
    return Some(DeliveryAction::Delivery {
      address_id: address_id.to_string(),
      price: price.parse().ok()?,
    });
  }
  None
}

/// Payment callbacks: `payment,{delivery_price}`.
pub fn parse_payment_action(data: &str) -> Option<i64> {
  let price = data.strip_prefix("payment,")?;
  price.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::CartAction;
  use super::DeliveryAction;
  use super::Event;
  use super::MenuAction;
  use super::ProductAction;
  use super::parse_cart_action;
  use super::parse_delivery_action;
  use super::parse_menu_action;
  use super::parse_payment_action;
  use super::parse_product_action;

  #[test]
  fn classifies_reset_commands() {
    assert_eq!(Event::from_text("/start"), Event::Start);
    assert_eq!(Event::from_text(" /cancel "), Event::Cancel);
    assert_eq!(Event::from_text("hello"), Event::Text("hello".to_string()));
  }

  #[test]
  fn parses_menu_actions() {
    assert_eq!(parse_menu_action("cart"), Some(MenuAction::Cart));
    assert_eq!(
      parse_menu_action("pagination,front,2"),
      Some(MenuAction::Pagination {
        category_id: "front".to_string(),
        page: 2,
      })
    );
    assert_eq!(
      parse_menu_action("category,abc"),
      Some(MenuAction::Category("abc".to_string()))
    );
    assert_eq!(parse_menu_action("p-17"), Some(MenuAction::Product("p-17".to_string())));
  }

  #[test]
  fn malformed_menu_payloads_are_rejected() {
    assert_eq!(parse_menu_action(""), None);
    assert_eq!(parse_menu_action("pagination,front"), None);
    assert_eq!(parse_menu_action("pagination,front,NaN"), None);
    assert_eq!(parse_menu_action("category,"), None);
    assert_eq!(parse_menu_action("stray,comma"), None);
  }

  #[test]
  fn parses_product_actions() {
    assert_eq!(parse_product_action("menu"), Some(ProductAction::Menu));
    assert_eq!(
      parse_product_action("p-17,2"),
      Some(ProductAction::Add {
        product_id: "p-17".to_string(),
        quantity: 2,
      })
    );
    assert_eq!(parse_product_action("p-17"), None);
    assert_eq!(parse_product_action("p-17,zero"), None);
    assert_eq!(parse_product_action("p-17,0"), None);
  }

  #[test]
  fn parses_cart_actions() {
    assert_eq!(parse_cart_action("pay"), Some(CartAction::Pay));
    assert_eq!(
      parse_cart_action("line-3"),
      Some(CartAction::Remove("line-3".to_string()))
    );
    assert_eq!(parse_cart_action(""), None);
  }

  #[test]
  fn parses_delivery_actions() {
    assert_eq!(
      parse_delivery_action("pickup,loc-1"),
      Some(DeliveryAction::Pickup {
        location_id: "loc-1".to_string(),
      })
    );
    assert_eq!(
      parse_delivery_action("delivery,addr-9,100"),
      Some(DeliveryAction::Delivery {
        address_id: "addr-9".to_string(),
        price: 100,
      })
    );
    assert_eq!(parse_delivery_action("delivery,addr-9"), None);
    assert_eq!(parse_delivery_action("walk"), None);
  }

  #[test]
  fn parses_payment_actions() {
    assert_eq!(parse_payment_action("payment,100"), Some(100));
    assert_eq!(parse_payment_action("payment,"), None);
    assert_eq!(parse_payment_action("pay"), None);
  }
}
