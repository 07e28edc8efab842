use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::instrument;

use crate::models::CartItem;
use crate::models::CartTotals;
use crate::models::Category;
use crate::models::Coordinates;
use crate::models::FulfillmentLocation;
use crate::models::Product;

const DEFAULT_BASE_URL: &str = "https://api.moltin.com";
/// Refresh slightly before the advertised expiry to absorb request latency.
const TOKEN_EXPIRY_RESERVE_SECS: i64 = 10;

/// Catalog/cart/customer operations of the e-commerce backend. Every
/// failure means "this event could not be fully handled" for the caller.
#[async_trait]
pub trait CommerceApi: Send + Sync {
  async fn list_categories(&self) -> Result<Vec<Category>>;
  async fn list_products(&self, category_id: &str) -> Result<Vec<Product>>;
  async fn get_product(&self, product_id: &str) -> Result<Product>;
  async fn get_file_url(&self, file_id: &str) -> Result<String>;
  async fn get_cart_totals(&self, cart_key: &str) -> Result<CartTotals>;
  async fn get_cart_items(&self, cart_key: &str) -> Result<Vec<CartItem>>;
  async fn add_cart_item(&self, cart_key: &str, product_id: &str, quantity: i64) -> Result<()>;
  async fn remove_cart_item(&self, cart_key: &str, item_id: &str) -> Result<()>;
  async fn clear_cart(&self, cart_key: &str) -> Result<()>;
  async fn create_address_entry(&self, coordinates: &Coordinates) -> Result<String>;
  async fn get_address_entry(&self, entry_id: &str) -> Result<Coordinates>;
  async fn list_locations(&self, flow_slug: &str) -> Result<Vec<FulfillmentLocation>>;
  async fn create_customer(&self, email: &str, name: &str) -> Result<String>;
  async fn update_customer(&self, customer_id: &str, email: &str, name: &str) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum CommerceError {
  #[error("commerce API request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("unexpected commerce API payload: missing {0}")]
  Payload(String),
}

struct AccessToken {
  value: String,
  expires_at: i64,
}

impl AccessToken {
  fn expired(&self) -> bool {
    Utc::now().timestamp() >= self.expires_at - TOKEN_EXPIRY_RESERVE_SECS
  }
}

/// Moltin-style client. The OAuth token cache is owned by the client
/// instance, which is constructed once and injected where needed.
pub struct MoltinClient {
  http: reqwest::Client,
  base_url: String,
  client_id: String,
  client_secret: String,
  token: Mutex<Option<AccessToken>>,
}

impl MoltinClient {
  pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
    Self::with_base_url(DEFAULT_BASE_URL, client_id, client_secret)
  }

  pub fn with_base_url(
    base_url: impl Into<String>,
    client_id: impl Into<String>,
    client_secret: impl Into<String>,
  ) -> Self {
    Self {
      http: reqwest::Client::new(),
      base_url: base_url.into(),
      client_id: client_id.into(),
      client_secret: client_secret.into(),
      token: Mutex::new(None),
    }
  }

  async fn bearer(&self) -> Result<String, CommerceError> {
    let mut guard = self.token.lock().await;
    let refresh = match guard.as_ref() {
      Some(token) => token.expired(),
      None => true,
    };
    if refresh {
      *guard = Some(self.fetch_token().await?);
      debug!("refreshed commerce access token");
    }
    Ok(guard.as_ref().map(|token| token.value.clone()).unwrap_or_default())
  }

  async fn fetch_token(&self) -> Result<AccessToken, CommerceError> {
    let response = self
      .http
      .post(format!("{}/oauth/access_token", self.base_url))
      .form(&[
        ("client_id", self.client_id.as_str()),
        ("client_secret", self.client_secret.as_str()),
        ("grant_type", "client_credentials"),
      ])
      .send()
      .await?
      .error_for_status()?;
    let body: Value = response.json().await?;
    let value = required_str(&body, "/access_token")?.to_string();
    let expires_at = body
      .pointer("/expires")
      .and_then(Value::as_i64)
      .ok_or_else(|| CommerceError::Payload("/expires".to_string()))?;
    Ok(AccessToken { value, expires_at })
  }

  async fn get_data(&self, path: &str) -> Result<Value, CommerceError> {
    let token = self.bearer().await?;
    let response = self
      .http
      .get(format!("{}/v2/{path}", self.base_url))
      .bearer_auth(token)
      .send()
      .await?
      .error_for_status()?;
    let body: Value = response.json().await?;
    debug!(path, "commerce GET succeeded");
    Ok(body.pointer("/data").cloned().unwrap_or(Value::Null))
  }

  async fn post_data(&self, path: &str, payload: Value) -> Result<Value, CommerceError> {
    let token = self.bearer().await?;
    let response = self
      .http
      .post(format!("{}/v2/{path}", self.base_url))
      .bearer_auth(token)
      .json(&payload)
      .send()
      .await?
      .error_for_status()?;
    let body: Value = response.json().await?;
    debug!(path, "commerce POST succeeded");
    Ok(body.pointer("/data").cloned().unwrap_or(Value::Null))
  }

  async fn put_data(&self, path: &str, payload: Value) -> Result<(), CommerceError> {
    let token = self.bearer().await?;
    self
      .http
      .put(format!("{}/v2/{path}", self.base_url))
      .bearer_auth(token)
      .json(&payload)
      .send()
      .await?
      .error_for_status()?;
    debug!(path, "commerce PUT succeeded");
    Ok(())
  }

  async fn delete(&self, path: &str) -> Result<(), CommerceError> {
    let token = self.bearer().await?;
    self
      .http
      .delete(format!("{}/v2/{path}", self.base_url))
      .bearer_auth(token)
      .send()
      .await?
      .error_for_status()?;
    debug!(path, "commerce DELETE succeeded");
    Ok(())
  }
}

#[async_trait]
impl CommerceApi for MoltinClient {
  #[instrument(skip(self))]
  async fn list_categories(&self) -> Result<Vec<Category>> {
    let data = self.get_data("categories?sort=created_at").await?;
    let entries = as_array(&data, "categories")?;
    entries.iter().map(parse_category).collect()
  }

  #[instrument(skip(self))]
  async fn list_products(&self, category_id: &str) -> Result<Vec<Product>> {
    let data = self
      .get_data(&format!("products?filter=eq(category.id,{category_id})&sort=name"))
      .await?;
    let entries = as_array(&data, "products")?;
    entries.iter().map(parse_product).collect()
  }

  #[instrument(skip(self))]
  async fn get_product(&self, product_id: &str) -> Result<Product> {
    let data = self.get_data(&format!("products/{product_id}")).await?;
    parse_product(&data)
  }

  #[instrument(skip(self))]
  async fn get_file_url(&self, file_id: &str) -> Result<String> {
    let data = self.get_data(&format!("files/{file_id}")).await?;
    Ok(required_str(&data, "/link/href")?.to_string())
  }

  #[instrument(skip(self))]
  async fn get_cart_totals(&self, cart_key: &str) -> Result<CartTotals> {
    let data = self.get_data(&format!("carts/{cart_key}")).await?;
    let amount = data
      .pointer("/meta/display_price/with_tax/amount")
      .and_then(Value::as_i64)
      .ok_or_else(|| CommerceError::Payload("cart total amount".to_string()))?;
    let formatted = required_str(&data, "/meta/display_price/with_tax/formatted")?.to_string();
    Ok(CartTotals { amount, formatted })
  }

  #[instrument(skip(self))]
  async fn get_cart_items(&self, cart_key: &str) -> Result<Vec<CartItem>> {
    let data = self.get_data(&format!("carts/{cart_key}/items")).await?;
    let entries = as_array(&data, "cart items")?;
    entries.iter().map(parse_cart_item).collect()
  }

  #[instrument(skip(self))]
  async fn add_cart_item(&self, cart_key: &str, product_id: &str, quantity: i64) -> Result<()> {
    let payload = json!({
      "data": {
        "id": product_id,
        "type": "cart_item",
        "quantity": quantity,
      }
    });
    self.post_data(&format!("carts/{cart_key}/items"), payload).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn remove_cart_item(&self, cart_key: &str, item_id: &str) -> Result<()> {
    self.delete(&format!("carts/{cart_key}/items/{item_id}")).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn clear_cart(&self, cart_key: &str) -> Result<()> {
    self.delete(&format!("carts/{cart_key}")).await?;
    Ok(())
  }

  #[instrument(skip(self))]
  async fn create_address_entry(&self, coordinates: &Coordinates) -> Result<String> {
    let payload = json!({
      "data": {
        "type": "entry",
        "latitude": coordinates.latitude,
        "longitude": coordinates.longitude,
      }
    });
    let data = self.post_data("flows/customer-address/entries", payload).await?;
    Ok(required_str(&data, "/id")?.to_string())
  }

  #[instrument(skip(self))]
  async fn get_address_entry(&self, entry_id: &str) -> Result<Coordinates> {
    let data = self
      .get_data(&format!("flows/customer-address/entries/{entry_id}"))
      .await?;
    let latitude = data
      .pointer("/latitude")
      .and_then(Value::as_f64)
      .ok_or_else(|| CommerceError::Payload("address latitude".to_string()))?;
    let longitude = data
      .pointer("/longitude")
      .and_then(Value::as_f64)
      .ok_or_else(|| CommerceError::Payload("address longitude".to_string()))?;
    Ok(Coordinates { latitude, longitude })
  }

  #[instrument(skip(self))]
  async fn list_locations(&self, flow_slug: &str) -> Result<Vec<FulfillmentLocation>> {
    let data = self.get_data(&format!("flows/{flow_slug}/entries")).await?;
    let entries = as_array(&data, "location entries")?;
    entries.iter().map(parse_location).collect()
  }

  #[instrument(skip(self))]
  async fn create_customer(&self, email: &str, name: &str) -> Result<String> {
    let payload = json!({
      "data": {
        "type": "customer",
        "email": email,
        "name": name,
      }
    });
    let data = self.post_data("customers", payload).await?;
    Ok(required_str(&data, "/id")?.to_string())
  }

  #[instrument(skip(self))]
  async fn update_customer(&self, customer_id: &str, email: &str, name: &str) -> Result<()> {
    let payload = json!({
      "data": {
        "type": "customer",
        "email": email,
        "name": name,
      }
    });
    self.put_data(&format!("customers/{customer_id}"), payload).await?;
    Ok(())
  }
}

fn as_array<'a>(data: &'a Value, what: &str) -> Result<&'a Vec<Value>, CommerceError> {
  data
    .as_array()
    .ok_or_else(|| CommerceError::Payload(format!("{what} array")))
}

fn required_str<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, CommerceError> {
  value
    .pointer(pointer)
    .and_then(Value::as_str)
    .ok_or_else(|| CommerceError::Payload(pointer.to_string()))
}

fn parse_category(value: &Value) -> Result<Category> {
  Ok(Category {
    id: required_str(value, "/id")?.to_string(),
    name: required_str(value, "/name")?.to_string(),
  })
}

fn parse_product(value: &Value) -> Result<Product> {
  let price_amount = value
    .pointer("/price/0/amount")
    .and_then(Value::as_i64)
    .ok_or_else(|| CommerceError::Payload("product price".to_string()))?;
  let price_formatted = value
    .pointer("/meta/display_price/with_tax/formatted")
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_else(|| crate::util::format_price(price_amount));
  Ok(Product {
    id: required_str(value, "/id")?.to_string(),
    name: required_str(value, "/name")?.to_string(),
    description: value
      .pointer("/description")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string(),
    price_amount,
    price_formatted,
    main_image_id: value
      .pointer("/relationships/main_image/data/id")
      .and_then(Value::as_str)
      .map(str::to_string),
  })
}

fn parse_cart_item(value: &Value) -> Result<CartItem> {
  let quantity = value
    .pointer("/quantity")
    .and_then(Value::as_i64)
    .ok_or_else(|| CommerceError::Payload("cart item quantity".to_string()))?;
  Ok(CartItem {
    id: required_str(value, "/id")?.to_string(),
    product_id: required_str(value, "/product_id")?.to_string(),
    name: required_str(value, "/name")?.to_string(),
    description: value
      .pointer("/description")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string(),
    quantity,
    unit_price_formatted: required_str(value, "/meta/display_price/with_tax/unit/formatted")?.to_string(),
    line_total_formatted: required_str(value, "/meta/display_price/with_tax/value/formatted")?.to_string(),
  })
}

fn parse_location(value: &Value) -> Result<FulfillmentLocation> {
  let latitude = value
    .pointer("/latitude")
    .and_then(Value::as_f64)
    .ok_or_else(|| CommerceError::Payload("location latitude".to_string()))?;
  let longitude = value
    .pointer("/longitude")
    .and_then(Value::as_f64)
    .ok_or_else(|| CommerceError::Payload("location longitude".to_string()))?;
  Ok(FulfillmentLocation {
    id: required_str(value, "/id")?.to_string(),
    address: required_str(value, "/address")?.to_string(),
    latitude,
    longitude,
    courier_id: courier_field(value)?,
  })
}

fn courier_field(value: &Value) -> Result<String, CommerceError> {
  // Courier ids are stored as either a string or an integer field upstream.
  if let Some(id) = value.pointer("/courier-id").and_then(Value::as_str) {
    return Ok(id.to_string());
  }
  if let Some(id) = value.pointer("/courier-id").and_then(Value::as_i64) {
    return Ok(id.to_string());
  }
  Err(CommerceError::Payload("location courier-id".to_string()))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::parse_cart_item;
  use super::parse_location;
  use super::parse_product;

  #[test]
  fn parses_product_with_fallback_price_label() {
    let value = json!({
      "id": "p-1",
      "name": "Margherita",
      "description": "Classic",
      "price": [{ "amount": 550, "currency": "RUB" }],
      "relationships": { "main_image": { "data": { "id": "img-1" } } },
    });
    let product = parse_product(&value).expect("product parses");
    assert_eq!(product.id, "p-1");
    assert_eq!(product.price_amount, 550);
    assert_eq!(product.price_formatted, "550 RUB");
    assert_eq!(product.main_image_id.as_deref(), Some("img-1"));
  }

  #[test]
  fn parses_cart_item_display_prices() {
    let value = json!({
      "id": "line-1",
      "product_id": "p-1",
      "name": "Margherita",
      "description": "Classic",
      "quantity": 2,
      "meta": { "display_price": { "with_tax": {
        "unit": { "formatted": "550 RUB" },
        "value": { "formatted": "1100 RUB", "amount": 1100 },
      }}},
    });
    let item = parse_cart_item(&value).expect("cart item parses");
    assert_eq!(item.quantity, 2);
    assert_eq!(item.line_total_formatted, "1100 RUB");
  }

  #[test]
  fn parses_location_with_numeric_courier_id() {
    let value = json!({
      "id": "loc-1",
      "address": "1 Main St",
      "latitude": 55.75,
      "longitude": 37.62,
      "courier-id": 123456,
    });
    let location = parse_location(&value).expect("location parses");
    assert_eq!(location.courier_id, "123456");
  }

  #[test]
  fn rejects_location_without_coordinates() {
    let value = json!({ "id": "loc-1", "address": "1 Main St" });
    assert!(parse_location(&value).is_err());
  }
}
