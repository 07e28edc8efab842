use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use tracing::instrument;

use crate::models::Coordinates;

const GEOCODER_URL: &str = "https://geocode-maps.yandex.ru/1.x";

/// Free-text address resolution. `None` means the service found nothing,
/// which is ordinary user input, not a failure.
#[async_trait]
pub trait Geocoder: Send + Sync {
  async fn resolve_address(&self, query: &str) -> Result<Option<Coordinates>>;
}

pub struct YandexGeocoder {
  http: reqwest::Client,
  api_key: String,
}

impl YandexGeocoder {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      api_key: api_key.into(),
    }
  }
}

#[async_trait]
impl Geocoder for YandexGeocoder {
  #[instrument(skip(self))]
  async fn resolve_address(&self, query: &str) -> Result<Option<Coordinates>> {
    let response = self
      .http
      .get(GEOCODER_URL)
      .query(&[
        ("geocode", query),
        ("apikey", self.api_key.as_str()),
        ("format", "json"),
      ])
      .send()
      .await?
      .error_for_status()?;
    let body: Value = response.json().await?;
    let resolved = most_relevant_point(&body);
    debug!(resolved = resolved.is_some(), "geocoder lookup finished");
    Ok(resolved)
  }
}

/// Picks the first (most relevant) match; the point comes back as
/// a "lon lat" pair.
fn most_relevant_point(body: &Value) -> Option<Coordinates> {
  let members = body
    .pointer("/response/GeoObjectCollection/featureMember")?
    .as_array()?;
  let pos = members.first()?.pointer("/GeoObject/Point/pos")?.as_str()?;
  let (lon, lat) = pos.split_once(' ')?;
  Some(Coordinates {
    latitude: lat.trim().parse().ok()?,
    longitude: lon.trim().parse().ok()?,
  })
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::most_relevant_point;

  #[test]
  fn parses_first_feature_member() {
    let body = json!({
      "response": { "GeoObjectCollection": { "featureMember": [
        { "GeoObject": { "Point": { "pos": "37.617698 55.755864" } } },
        { "GeoObject": { "Point": { "pos": "30.0 59.0" } } },
      ]}}
    });
    let coordinates = most_relevant_point(&body).expect("coordinates parse");
    assert!((coordinates.latitude - 55.755864).abs() < 1e-9);
    assert!((coordinates.longitude - 37.617698).abs() < 1e-9);
  }

  #[test]
  fn empty_collection_yields_none() {
    let body = json!({
      "response": { "GeoObjectCollection": { "featureMember": [] } }
    });
    assert!(most_relevant_point(&body).is_none());
  }

  #[test]
  fn malformed_pos_yields_none() {
    let body = json!({
      "response": { "GeoObjectCollection": { "featureMember": [
        { "GeoObject": { "Point": { "pos": "not-a-pair" } } },
      ]}}
    });
    assert!(most_relevant_point(&body).is_none());
  }
}
