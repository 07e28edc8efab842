use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::bot::Outbound;
use crate::models::OrderContext;
use crate::models::OutboundPayload;

const TIMEOUT_TEXT: &str = "We could not confirm your delivery in time. \
                            You are due a refund for this order. Enjoy your meal!";

/// One-shot deferred check per delivery order. Arming never blocks the
/// handler that created it; each task notifies the customer exactly once
/// unless disarmed first.
pub struct DeliveryWatchdog {
  outbound: Arc<dyn Outbound>,
  timeout: Duration,
  tasks: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl DeliveryWatchdog {
  pub fn new(outbound: Arc<dyn Outbound>, timeout: Duration) -> Self {
    Self {
      outbound,
      timeout,
      tasks: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  #[instrument(skip(self, order), fields(conversation = %order.conversation))]
  pub fn arm(&self, order: OrderContext) {
    let key = order.conversation.key();
    let courier_id = order.courier_id.clone();
    let delivery_price = order.delivery_price;
    let outbound = self.outbound.clone();
    let timeout = self.timeout;
    let tasks = self.tasks.clone();
    let task_key = key.clone();

    // The sleep is constructed here, not inside the task, so the timeout
    // is measured from arming rather than from the task's first poll.
    let sleep = tokio::time::sleep(timeout);
    let handle = tokio::spawn(async move {
      sleep.await;
      let payload = OutboundPayload::Text(TIMEOUT_TEXT.to_string());
      if let Err(err) = outbound.send(&order.conversation, &payload).await {
        warn!(error = %err, conversation = %order.conversation, "failed to deliver timeout notification");
      }
      if let Ok(mut tasks) = tasks.lock() {
        tasks.remove(&task_key);
      }
    });

    let mut tasks = self.tasks.lock().expect("watchdog registry poisoned");
    if let Some(previous) = tasks.insert(key.clone(), handle.abort_handle()) {
      previous.abort();
      warn!(conversation = key, "replaced an already-armed delivery watchdog");
    }
    info!(
      conversation = key,
      courier_id,
      delivery_price,
      timeout_secs = timeout.as_secs(),
      "armed delivery watchdog"
    );
  }

  /// Cancels a pending check. The production flow does not call this yet;
  /// it exists so delivery confirmation can be wired to it.
  pub fn disarm(&self, conversation_key: &str) {
    let mut tasks = self.tasks.lock().expect("watchdog registry poisoned");
    if let Some(handle) = tasks.remove(conversation_key) {
      handle.abort();
      info!(conversation = conversation_key, "disarmed delivery watchdog");
    }
  }

  /// Aborts every pending check; called at process shutdown only.
  pub fn shutdown(&self) {
    let mut tasks = self.tasks.lock().expect("watchdog registry poisoned");
    for (_, handle) in tasks.drain() {
      handle.abort();
    }
  }
}
