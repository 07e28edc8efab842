use crate::models::Coordinates;
use crate::models::FulfillmentLocation;

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance between two points, in kilometers.
pub fn haversine_km(a: &Coordinates, b: &Coordinates) -> f64 {
  let lat_a = a.latitude.to_radians();
  let lat_b = b.latitude.to_radians();
  let d_lat = (b.latitude - a.latitude).to_radians();
  let d_lon = (b.longitude - a.longitude).to_radians();

  let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
  2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Distance-to-policy mapping. Inclusive upper bounds, evaluated in
/// ascending order; first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTier {
  /// Close enough to walk over; free delivery, pickup suggested.
  WalkingDistance,
  Nearby,
  Distant,
  OutOfRange,
}

impl DeliveryTier {
  pub fn from_distance_km(distance_km: f64) -> Self {
    if distance_km <= 0.5 {
      Self::WalkingDistance
    } else if distance_km <= 5.0 {
      Self::Nearby
    } else if distance_km <= 20.0 {
      Self::Distant
    } else {
      Self::OutOfRange
    }
  }

  pub fn delivery_price(&self) -> Option<i64> {
    match self {
      Self::WalkingDistance => Some(0),
      Self::Nearby => Some(100),
      Self::Distant => Some(300),
      Self::OutOfRange => None,
    }
  }

  pub fn is_eligible(&self) -> bool {
    self.delivery_price().is_some()
  }
}

#[derive(Debug, Clone)]
pub struct Resolution {
  pub location: FulfillmentLocation,
  pub distance_km: f64,
  pub tier: DeliveryTier,
}

/// Pure nearest-location resolver over a static location dataset.
pub struct DeliveryResolver {
  locations: Vec<FulfillmentLocation>,
}

impl DeliveryResolver {
  pub fn new(locations: Vec<FulfillmentLocation>) -> Self {
    Self { locations }
  }

  /// Nearest location by great-circle distance; ties keep the
  /// first-encountered entry. `None` only when no locations are configured.
  pub fn resolve(&self, customer: &Coordinates) -> Option<Resolution> {
    let mut best: Option<(&FulfillmentLocation, f64)> = None;
    for location in &self.locations {
      let distance = haversine_km(customer, &location.coordinates());
      match best {
        Some((_, best_distance)) if distance >= best_distance => {},
        _ => best = Some((location, distance)),
      }
    }
    best.map(|(location, distance_km)| Resolution {
      location: location.clone(),
      distance_km,
      tier: DeliveryTier::from_distance_km(distance_km),
    })
  }

  pub fn location(&self, id: &str) -> Option<&FulfillmentLocation> {
    self.locations.iter().find(|location| location.id == id)
  }
}
