use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::error::DigestError;

/// Deep-link metadata attached to a notification. A closed set of variants;
/// `digest` is the only one currently needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationData {
    Digest { digest_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

#[derive(Debug, Clone)]
pub struct NotificationReceipt {
    pub receipt_id: Option<String>,
}

/// The delivery collaborator: one attempt, success or failure. Obviously
/// malformed tokens are rejected locally before any remote call.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        token: &str,
        notification: &NotificationRequest,
    ) -> Result<NotificationReceipt, DigestError>;
}

/// Expo push tokens look like `ExponentPushToken[xxxxxxxx]` (older clients
/// produce the `ExpoPushToken[...]` spelling).
pub fn is_valid_push_token(token: &str) -> bool {
    let inner = token
        .strip_prefix("ExponentPushToken[")
        .or_else(|| token.strip_prefix("ExpoPushToken["));
    matches!(inner.and_then(|rest| rest.strip_suffix(']')), Some(body) if !body.is_empty())
}

/// Push sender backed by the Expo push HTTP API.
pub struct ExpoPushClient {
    http: reqwest::Client,
    endpoint: String,
}

const DEFAULT_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

impl ExpoPushClient {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT.to_string())
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            endpoint,
        }
    }
}

impl Default for ExpoPushClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for ExpoPushClient {
    async fn send(
        &self,
        token: &str,
        notification: &NotificationRequest,
    ) -> Result<NotificationReceipt, DigestError> {
        if !is_valid_push_token(token) {
            return Err(DigestError::InvalidToken);
        }

        let body = json!({
            "to": token,
            "sound": "default",
            "title": notification.title,
            "body": notification.body,
            "data": notification.data,
            "priority": "high",
            "channelId": "digest",
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DigestError::NotificationFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DigestError::NotificationFailed(format!(
                "push API returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: PushResponse = response
            .json()
            .await
            .map_err(|e| DigestError::NotificationFailed(format!("unparseable response: {e}")))?;

        match parsed.data {
            Some(ticket) if ticket.status == "ok" => {
                debug!("push notification accepted, ticket {:?}", ticket.id);
                Ok(NotificationReceipt {
                    receipt_id: ticket.id,
                })
            }
            Some(ticket) => Err(DigestError::NotificationFailed(
                ticket.message.unwrap_or_else(|| "push ticket error".into()),
            )),
            None => Err(DigestError::NotificationFailed(
                "push API returned no ticket".into(),
            )),
        }
    }
}

// -- Expo push API wire types (the subset we read) --

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: Option<PushTicket>,
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    id: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_format_validation() {
        assert!(is_valid_push_token("ExponentPushToken[abc123XYZ]"));
        assert!(is_valid_push_token("ExpoPushToken[abc123XYZ]"));

        assert!(!is_valid_push_token(""));
        assert!(!is_valid_push_token("ExponentPushToken[]"));
        assert!(!is_valid_push_token("ExponentPushToken[abc"));
        assert!(!is_valid_push_token("abc123"));
        assert!(!is_valid_push_token("FCMToken[abc123]"));
    }

    #[test]
    fn notification_data_serializes_as_tagged_variant() {
        let digest_id = Uuid::new_v4();
        let data = NotificationData::Digest { digest_id };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["type"], "digest");
        assert_eq!(value["digest_id"], digest_id.to_string());
    }
}
