//! Cart analytics events.
//!
//! Events are fire-and-forget: the cart store emits them on a background
//! task and drops any failure after logging it at debug level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use marketplace_core::ItemId;

/// Errors that can occur when delivering an analytics event.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Collector returned a non-success status.
    #[error("Collector returned status {0}")]
    Rejected(u16),
}

/// An observation about cart usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    /// The cart drawer went from closed to open.
    CartOpened { item_count: usize },
    /// The cart drawer opened with something in it.
    CartViewed { item_ids: Vec<ItemId>, total: Decimal },
    /// The shopper proceeded to checkout.
    CheckoutStarted { item_count: usize, total: Decimal },
}

impl AnalyticsEvent {
    /// Event name as sent to collectors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CartOpened { .. } => "cart_opened",
            Self::CartViewed { .. } => "cart_viewed",
            Self::CheckoutStarted { .. } => "checkout_started",
        }
    }
}

/// Destination for analytics events.
#[async_trait]
pub trait Analytics: Send + Sync {
    /// Record one event.
    async fn track(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError>;
}

/// Writes events to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnalytics;

#[async_trait]
impl Analytics for TracingAnalytics {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        info!(event = event.name(), payload = ?event, "Analytics event");
        Ok(())
    }
}

/// Envelope posted to the collector.
#[derive(Debug, Serialize)]
struct CollectorPayload<'a> {
    #[serde(flatten)]
    event: &'a AnalyticsEvent,
    sent_at: DateTime<Utc>,
}

/// Posts events as JSON to an HTTP collector.
#[derive(Clone)]
pub struct CollectorAnalytics {
    client: reqwest::Client,
    endpoint: Url,
}

impl CollectorAnalytics {
    /// Create a collector client.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Analytics for CollectorAnalytics {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        let payload = CollectorPayload {
            event: &event,
            sent_at: Utc::now(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyticsError::Rejected(status.as_u16()));
        }

        debug!(event = event.name(), "Analytics event delivered");
        Ok(())
    }
}
