use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;

use crate::bot::Outbound;
use crate::commerce::CommerceApi;
use crate::db::StateStore;
use crate::geocode::Geocoder;
use crate::models::CartItem;
use crate::models::CartTotals;
use crate::models::Category;
use crate::models::ConversationId;
use crate::models::Coordinates;
use crate::models::FulfillmentLocation;
use crate::models::OutboundPayload;
use crate::models::Product;
use crate::util::format_price;

/// In-memory stand-in for the durable store.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn snapshot(&self) -> HashMap<String, String> {
    self.entries.lock().expect("store lock").clone()
  }
}

#[async_trait]
impl StateStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.entries.lock().expect("store lock").get(key).cloned())
  }

  async fn set(&self, key: &str, value: &str) -> Result<()> {
    self
      .entries
      .lock()
      .expect("store lock")
      .insert(key.to_string(), value.to_string());
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.entries.lock().expect("store lock").remove(key);
    Ok(())
  }
}

fn sample_product(id: &str, name: &str, price: i64, image: &str) -> Product {
  Product {
    id: id.to_string(),
    name: name.to_string(),
    description: format!("{name} description"),
    price_amount: price,
    price_formatted: format_price(price),
    main_image_id: Some(image.to_string()),
  }
}

/// Scripted commerce backend. Records every call in order; individual
/// methods can be told to fail by name.
pub struct FakeCommerce {
  categories: Mutex<Vec<Category>>,
  products: Mutex<HashMap<String, Vec<Product>>>,
  calls: Mutex<Vec<String>>,
  failing_method: Mutex<Option<String>>,
  cart: Mutex<Vec<CartItem>>,
  cart_total: Mutex<i64>,
  addresses: Mutex<HashMap<String, Coordinates>>,
  locations: Vec<FulfillmentLocation>,
}

impl FakeCommerce {
  pub fn with_sample_catalog() -> Self {
    let categories = vec![
      Category {
        id: "front".to_string(),
        name: "Front page".to_string(),
      },
      Category {
        id: "drinks".to_string(),
        name: "Drinks".to_string(),
      },
    ];
    let mut products = HashMap::new();
    products.insert(
      "front".to_string(),
      vec![
        sample_product("p-1", "Margherita", 550, "img-1"),
        sample_product("p-2", "Pepperoni", 650, "img-2"),
      ],
    );
    products.insert(
      "drinks".to_string(),
      vec![sample_product("p-3", "Lemonade", 90, "img-3")],
    );
    Self {
      categories: Mutex::new(categories),
      products: Mutex::new(products),
      calls: Mutex::new(Vec::new()),
      failing_method: Mutex::new(None),
      cart: Mutex::new(Vec::new()),
      cart_total: Mutex::new(550),
      addresses: Mutex::new(HashMap::new()),
      locations: Vec::new(),
    }
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().expect("calls lock").clone()
  }

  pub fn call_count(&self, method: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|entry| entry.as_str() == method || entry.starts_with(&format!("{method}:")))
      .count()
  }

  pub fn fail_on(&self, method: &str) {
    *self.failing_method.lock().expect("fail lock") = Some(method.to_string());
  }

  pub fn set_cart_total(&self, amount: i64) {
    *self.cart_total.lock().expect("total lock") = amount;
  }

  pub fn drop_category(&self, category_id: &str) {
    self
      .categories
      .lock()
      .expect("catalog lock")
      .retain(|category| category.id != category_id);
    self.products.lock().expect("catalog lock").remove(category_id);
  }

  pub fn seed_address(&self, coordinates: Coordinates) -> String {
    let mut addresses = self.addresses.lock().expect("addresses lock");
    let id = format!("addr-{}", addresses.len() + 1);
    addresses.insert(id.clone(), coordinates);
    id
  }

  fn record(&self, entry: impl Into<String>) -> Result<()> {
    let entry = entry.into();
    let method = entry.split(':').next().unwrap_or(&entry).to_string();
    self.calls.lock().expect("calls lock").push(entry);
    if self.failing_method.lock().expect("fail lock").as_deref() == Some(method.as_str()) {
      bail!("scripted {method} failure");
    }
    Ok(())
  }
}

#[async_trait]
impl CommerceApi for FakeCommerce {
  async fn list_categories(&self) -> Result<Vec<Category>> {
    self.record("list_categories")?;
    Ok(self.categories.lock().expect("catalog lock").clone())
  }

  async fn list_products(&self, category_id: &str) -> Result<Vec<Product>> {
    self.record(format!("list_products:{category_id}"))?;
    Ok(
      self
        .products
        .lock()
        .expect("catalog lock")
        .get(category_id)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn get_product(&self, product_id: &str) -> Result<Product> {
    self.record(format!("get_product:{product_id}"))?;
    self
      .products
      .lock()
      .expect("catalog lock")
      .values()
      .flatten()
      .find(|product| product.id == product_id)
      .cloned()
      .ok_or_else(|| anyhow::anyhow!("no such product {product_id}"))
  }

  async fn get_file_url(&self, file_id: &str) -> Result<String> {
    self.record(format!("get_file_url:{file_id}"))?;
    Ok(format!("https://files.test/{file_id}"))
  }

  async fn get_cart_totals(&self, cart_key: &str) -> Result<CartTotals> {
    self.record(format!("get_cart_totals:{cart_key}"))?;
    let amount = *self.cart_total.lock().expect("total lock");
    Ok(CartTotals {
      amount,
      formatted: format_price(amount),
    })
  }

  async fn get_cart_items(&self, cart_key: &str) -> Result<Vec<CartItem>> {
    self.record(format!("get_cart_items:{cart_key}"))?;
    Ok(self.cart.lock().expect("cart lock").clone())
  }

  async fn add_cart_item(&self, cart_key: &str, product_id: &str, quantity: i64) -> Result<()> {
    self.record(format!("add_cart_item:{cart_key}:{product_id}:{quantity}"))?;
    let product = self
      .products
      .lock()
      .expect("catalog lock")
      .values()
      .flatten()
      .find(|product| product.id == product_id)
      .cloned()
      .ok_or_else(|| anyhow::anyhow!("no such product {product_id}"))?;
    let mut cart = self.cart.lock().expect("cart lock");
    let line_number = cart.len() + 1;
    cart.push(CartItem {
      id: format!("line-{line_number}"),
      product_id: product.id,
      name: product.name,
      description: product.description,
      quantity,
      unit_price_formatted: product.price_formatted,
      line_total_formatted: format_price(product.price_amount * quantity),
    });
    Ok(())
  }

  async fn remove_cart_item(&self, cart_key: &str, item_id: &str) -> Result<()> {
    self.record(format!("remove_cart_item:{cart_key}:{item_id}"))?;
    self.cart.lock().expect("cart lock").retain(|item| item.id != item_id);
    Ok(())
  }

  async fn clear_cart(&self, cart_key: &str) -> Result<()> {
    self.record(format!("clear_cart:{cart_key}"))?;
    self.cart.lock().expect("cart lock").clear();
    Ok(())
  }

  async fn create_address_entry(&self, coordinates: &Coordinates) -> Result<String> {
    self.record("create_address_entry")?;
    Ok(self.seed_address(*coordinates))
  }

  async fn get_address_entry(&self, entry_id: &str) -> Result<Coordinates> {
    self.record(format!("get_address_entry:{entry_id}"))?;
    self
      .addresses
      .lock()
      .expect("addresses lock")
      .get(entry_id)
      .copied()
      .ok_or_else(|| anyhow::anyhow!("no such address {entry_id}"))
  }

  async fn list_locations(&self, flow_slug: &str) -> Result<Vec<FulfillmentLocation>> {
    self.record(format!("list_locations:{flow_slug}"))?;
    Ok(self.locations.clone())
  }

  async fn create_customer(&self, email: &str, _name: &str) -> Result<String> {
    self.record(format!("create_customer:{email}"))?;
    Ok("cust-1".to_string())
  }

  async fn update_customer(&self, customer_id: &str, _email: &str, _name: &str) -> Result<()> {
    self.record(format!("update_customer:{customer_id}"))?;
    Ok(())
  }
}

/// Geocoder returning whatever the test scripted last.
#[derive(Default)]
pub struct FakeGeocoder {
  result: Mutex<Option<Coordinates>>,
}

impl FakeGeocoder {
  pub fn set_result(&self, result: Option<Coordinates>) {
    *self.result.lock().expect("geocoder lock") = result;
  }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
  async fn resolve_address(&self, _query: &str) -> Result<Option<Coordinates>> {
    Ok(*self.result.lock().expect("geocoder lock"))
  }
}

/// Records every outbound interaction instead of talking to a platform.
#[derive(Default)]
pub struct RecordingOutbound {
  sent: Mutex<Vec<(String, OutboundPayload)>>,
  couriers: Mutex<Vec<(String, String, Coordinates)>>,
  payments: Mutex<Vec<(String, i64, String)>>,
}

impl RecordingOutbound {
  pub fn sent_to(&self, conversation_key: &str) -> Vec<OutboundPayload> {
    self
      .sent
      .lock()
      .expect("sent lock")
      .iter()
      .filter(|(key, _)| key == conversation_key)
      .map(|(_, payload)| payload.clone())
      .collect()
  }

  pub fn courier_notifications(&self) -> Vec<(String, String, Coordinates)> {
    self.couriers.lock().expect("couriers lock").clone()
  }

  pub fn payment_requests(&self) -> Vec<(String, i64, String)> {
    self.payments.lock().expect("payments lock").clone()
  }
}

#[async_trait]
impl Outbound for RecordingOutbound {
  async fn send(&self, conversation: &ConversationId, payload: &OutboundPayload) -> Result<()> {
    self
      .sent
      .lock()
      .expect("sent lock")
      .push((conversation.key(), payload.clone()));
    Ok(())
  }

  async fn send_courier_notification(
    &self,
    courier_id: &str,
    order_summary: &str,
    coordinates: &Coordinates,
  ) -> Result<()> {
    self
      .couriers
      .lock()
      .expect("couriers lock")
      .push((courier_id.to_string(), order_summary.to_string(), *coordinates));
    Ok(())
  }

  async fn request_payment(&self, conversation: &ConversationId, amount: i64, payload: &str) -> Result<()> {
    self
      .payments
      .lock()
      .expect("payments lock")
      .push((conversation.key(), amount, payload.to_string()));
    Ok(())
  }
}
