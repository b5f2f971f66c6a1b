//! The event handling abstraction the gateway dispatches through.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;

/// One webhook delivery's worth of work, implemented per provider.
///
/// The gateway holds handlers as trait objects: it evaluates
/// [`should_trigger`](EventHandler::should_trigger) on the inbound
/// request and, when it passes, runs
/// [`handle_event`](EventHandler::handle_event) on a background task. A
/// returned error marks the delivery failed; it is logged at the dispatch
/// site and never reaches the webhook caller.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Provider name used in delivery logs.
    fn provider(&self) -> &'static str;

    /// Whether this delivery should start a review at all. Deliveries
    /// that do not trigger are acknowledged and dropped.
    fn should_trigger(&self, headers: &HeaderMap, payload: &Value) -> bool;

    /// The full fetch, review, comment sequence for one delivery.
    async fn handle_event(&self, payload: &Value) -> anyhow::Result<()>;
}
