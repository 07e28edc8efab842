/// Prices arrive from the backend in whole currency units; the delivery
/// surcharge is added in the same units.
pub fn format_price(amount: i64) -> String {
  format!("{amount} RUB")
}

/// Payment providers expect amounts in minor units.
pub fn to_minor_units(amount: i64) -> i64 {
  amount * 100
}

pub fn truncate_button_text(text: &str, max_chars: usize) -> String {
  if text.chars().count() <= max_chars {
    return text.to_string();
  }

  let guarded = max_chars.saturating_sub(3);
  if guarded == 0 {
    return "...".to_string();
  }

  let truncated: String = text.chars().take(guarded).collect();
  format!("{truncated}...")
}
