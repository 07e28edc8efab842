use anyhow::Result;
use async_trait::async_trait;

use crate::models::ConversationId;
use crate::models::Coordinates;
use crate::models::OutboundPayload;

pub mod commands;
pub mod event;
pub mod machine;
pub mod state;

pub type HandlerResult = anyhow::Result<()>;

pub use commands::Command;
pub use event::Event;
pub use machine::Machine;
pub use state::ConversationState;

/// Notification/transport seam. Implemented per channel by the adapters;
/// the state machine only ever sees this contract.
#[async_trait]
pub trait Outbound: Send + Sync {
  async fn send(&self, conversation: &ConversationId, payload: &OutboundPayload) -> Result<()>;

  async fn send_courier_notification(
    &self,
    courier_id: &str,
    order_summary: &str,
    coordinates: &Coordinates,
  ) -> Result<()>;

  async fn request_payment(&self, conversation: &ConversationId, amount: i64, payload: &str) -> Result<()>;
}
