use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use futures::future::join_all;
use tracing::info;
use tracing::instrument;

use crate::commerce::CommerceApi;
use crate::db::StateStore;
use crate::models::Card;
use crate::models::CategoriesCard;
use crate::models::Product;

const MENU_KEY_PREFIX: &str = "menu:";
const CATEGORIES_CARD_KEY: &str = "categories_card";
const CATEGORIES_CARD_TITLE: &str = "Looking for something else?";
const CATEGORIES_CARD_SUBTITLE: &str = "Browse the rest of the menu by category:";

/// Precomputed, serialized view of catalog browse cards. The whole cache
/// is rebuilt on any upstream catalog change; there is no delta path.
pub struct CatalogCache {
  commerce: Arc<dyn CommerceApi>,
  store: Arc<dyn StateStore>,
  front_page_category: String,
}

impl CatalogCache {
  pub fn new(commerce: Arc<dyn CommerceApi>, store: Arc<dyn StateStore>, front_page_category: String) -> Self {
    Self {
      commerce,
      store,
      front_page_category,
    }
  }

  /// Fetches every category and its products, renders the cards, and
  /// writes all per-category sets plus the aggregate categories card.
  /// Entries for categories removed upstream are purged. Idempotent:
  /// unchanged upstream data yields byte-identical values.
  #[instrument(skip(self))]
  pub async fn rebuild(&self) -> Result<()> {
    let previous_ids = self.cached_category_ids().await?;
    let categories = self.commerce.list_categories().await?;
    for category in &categories {
      let products = self.commerce.list_products(&category.id).await?;
      let cards = self.render_product_cards(&products).await?;
      let serialized = serde_json::to_string(&cards)?;
      self
        .store
        .set(&format!("{MENU_KEY_PREFIX}{}", category.id), &serialized)
        .await?;
    }

    let categories_card = CategoriesCard {
      title: CATEGORIES_CARD_TITLE.to_string(),
      subtitle: CATEGORIES_CARD_SUBTITLE.to_string(),
      categories: categories
        .into_iter()
        .filter(|category| category.id != self.front_page_category)
        .collect(),
    };
    self
      .store
      .set(CATEGORIES_CARD_KEY, &serde_json::to_string(&categories_card)?)
      .await?;

    for stale in previous_ids {
      if !categories_card.categories.iter().any(|category| category.id == stale) {
        self.store.delete(&format!("{MENU_KEY_PREFIX}{stale}")).await?;
        info!(category = stale, "purged cards of a removed category");
      }
    }
    info!("catalog cache rebuilt");
    Ok(())
  }

  /// Category ids of the last written aggregate card; empty on a cold
  /// store or when the cached shape is unreadable.
  async fn cached_category_ids(&self) -> Result<Vec<String>> {
    let Some(raw) = self.store.get(CATEGORIES_CARD_KEY).await? else {
      return Ok(Vec::new());
    };
    let ids = serde_json::from_str::<CategoriesCard>(&raw)
      .map(|card| card.categories.into_iter().map(|category| category.id).collect())
      .unwrap_or_default();
    Ok(ids)
  }

  /// Cold-start check: rebuilds once when no cache exists yet.
  pub async fn ensure_ready(&self) -> Result<()> {
    if self.store.get(CATEGORIES_CARD_KEY).await?.is_none() {
      info!("catalog cache absent, rebuilding");
      self.rebuild().await?;
    }
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn category_cards(&self, category_id: &str) -> Result<Vec<Card>> {
    let key = format!("{MENU_KEY_PREFIX}{category_id}");
    let raw = match self.store.get(&key).await? {
      Some(raw) => raw,
      None => {
        self.rebuild().await?;
        self
          .store
          .get(&key)
          .await?
          .with_context(|| format!("category {category_id} missing after cache rebuild"))?
      },
    };
    Ok(serde_json::from_str(&raw)?)
  }

  pub async fn categories_card(&self) -> Result<CategoriesCard> {
    let raw = match self.store.get(CATEGORIES_CARD_KEY).await? {
      Some(raw) => raw,
      None => {
        self.rebuild().await?;
        self
          .store
          .get(CATEGORIES_CARD_KEY)
          .await?
          .context("categories card missing after cache rebuild")?
      },
    };
    Ok(serde_json::from_str(&raw)?)
  }

  async fn render_product_cards(&self, products: &[Product]) -> Result<Vec<Card>> {
    let image_urls = join_all(products.iter().map(|product| async {
      match &product.main_image_id {
        Some(file_id) => self.commerce.get_file_url(file_id).await,
        None => Ok(String::new()),
      }
    }))
    .await;

    let mut cards = Vec::with_capacity(products.len());
    for (product, image_url) in products.iter().zip(image_urls) {
      cards.push(Card {
        title: format!("{} | {}", product.name, product.price_formatted),
        image_url: image_url?,
        subtitle: product.description.clone(),
        button_label: "View details".to_string(),
        button_data: product.id.clone(),
      });
    }
    Ok(cards)
  }
}
