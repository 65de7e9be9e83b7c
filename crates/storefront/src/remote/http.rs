//! HTTP implementation of the remote cart source.
//!
//! - `GET    {base}/cart/{user_id}` returns the cart document
//! - `DELETE {base}/cart/items/{item_id}` removes one line
//!
//! The auth token rides in the configured header (`Bearer` scheme when the
//! header is `Authorization`). Expired sessions are reported either as
//! 401/403 or as a 2xx body such as `{"success": false, "message": "Invalid token"}`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use marketplace_core::ItemId;

use super::{RemoteCartSource, RemoteError};
use crate::config::CartApiConfig;
use crate::session::Identity;

/// Longest slice of an error body kept in logs and error messages.
const ERROR_BODY_PREVIEW: usize = 200;

/// Client for the marketplace cart API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct HttpCartSource {
    inner: Arc<HttpCartSourceInner>,
}

struct HttpCartSourceInner {
    client: reqwest::Client,
    base_url: Url,
    token_header: HeaderName,
}

impl HttpCartSource {
    /// Create a new cart API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the token header name is invalid or the HTTP
    /// client fails to build.
    pub fn new(config: &CartApiConfig) -> Result<Self, RemoteError> {
        let token_header = HeaderName::from_bytes(config.token_header.as_bytes())
            .map_err(|e| RemoteError::Config(format!("invalid token header: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCartSourceInner {
                client,
                base_url: config.base_url.clone(),
                token_header,
            }),
        })
    }

    /// Build an endpoint URL from path segments (each segment is escaped).
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Config("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Header value carrying the auth token.
    fn token_value(&self, token: &SecretString) -> Result<HeaderValue, RemoteError> {
        let raw = if self.inner.token_header == AUTHORIZATION {
            format!("Bearer {}", token.expose_secret())
        } else {
            token.expose_secret().to_string()
        };
        let mut value = HeaderValue::from_str(&raw)
            .map_err(|_| RemoteError::Config("auth token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        identity: &Identity,
    ) -> Result<reqwest::RequestBuilder, RemoteError> {
        Ok(match &identity.token {
            Some(token) => request.header(self.inner.token_header.clone(), self.token_value(token)?),
            None => request,
        })
    }
}

#[async_trait]
impl RemoteCartSource for HttpCartSource {
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    async fn fetch_cart(&self, identity: &Identity) -> Result<Value, RemoteError> {
        let url = self.endpoint(&["cart", identity.user_id.as_str()])?;
        let request = self.authorized(self.inner.client.get(url), identity)?;
        let body = read_body(request.send().await?).await?;

        if body.trim().is_empty() {
            debug!("Cart endpoint returned an empty body");
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }

    #[instrument(skip(self, identity), fields(item_id = %item_id))]
    async fn delete_item(&self, item_id: &ItemId, identity: &Identity) -> Result<(), RemoteError> {
        // Deleting without a token can only end in a 401.
        let Some(token) = &identity.token else {
            return Err(RemoteError::SessionExpired);
        };

        let url = self.endpoint(&["cart", "items", item_id.as_str()])?;
        let response = self
            .inner
            .client
            .delete(url)
            .header(self.inner.token_header.clone(), self.token_value(token)?)
            .send()
            .await?;

        let body = read_body(response).await?;
        interpret_delete_body(&body)
    }
}

/// Map the status line to an error, or return the body text.
async fn read_body(response: reqwest::Response) -> Result<String, RemoteError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        return Err(RemoteError::RateLimited(retry_after));
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::SessionExpired);
    }

    let text = response.text().await?;

    if !status.is_success() {
        tracing::warn!(
            status = %status,
            body = %preview(&text),
            "Cart API returned non-success status"
        );
        return Err(RemoteError::Api {
            status: status.as_u16(),
            message: preview(&text),
        });
    }

    Ok(text)
}

/// Interpret a 2xx delete response body.
///
/// Empty or non-JSON bodies count as success; the status already said so.
fn interpret_delete_body(body: &str) -> Result<(), RemoteError> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Ok(());
    };

    let success = value.get("success").and_then(Value::as_bool);
    let message = ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str));

    if success != Some(true)
        && let Some(message) = message
        && is_expired_token_message(message)
    {
        return Err(RemoteError::SessionExpired);
    }

    if success == Some(false) {
        return Err(RemoteError::Rejected(
            message.unwrap_or("delete rejected").to_string(),
        ));
    }

    Ok(())
}

/// Whether an API message reports an invalid or expired auth token.
fn is_expired_token_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    (lower.contains("token") && (lower.contains("invalid") || lower.contains("expired")))
        || lower.contains("session expired")
        || lower.contains("jwt expired")
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_BODY_PREVIEW).collect()
}
