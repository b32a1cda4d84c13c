use crate::error::{Result, WatcherError};
use crate::models::EncodedPushToken;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A fully prepared outbound message. `data` keeps the original typed values
/// for iOS; `string_data` is the flattened copy Android requires.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub token: String,
    pub data: Map<String, Value>,
    pub string_data: BTreeMap<String, String>,
}

/// Delivery backend. Returns an opaque message id.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, message: &PushMessage) -> Result<String>;
}

/// Flatten a payload for platforms that only accept string values.
///
/// Strings pass through, numbers and booleans are stringified, arrays and
/// objects are JSON-encoded, nulls are dropped.
pub fn flatten_data(data: &Map<String, Value>) -> BTreeMap<String, String> {
    data.iter()
        .filter_map(|(key, value)| {
            let flat = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => value.to_string(),
                Value::Null => return None,
            };
            Some((key.clone(), flat))
        })
        .collect()
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn PushTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Send exactly one message. No retries: any failure, including a
    /// timeout, comes back as `DeliveryFailure`.
    pub async fn send(
        &self,
        title: &str,
        body: &str,
        push_token: &EncodedPushToken,
        data: Map<String, Value>,
    ) -> Result<String> {
        let token = push_token
            .decode()
            .map_err(|e| WatcherError::DeliveryFailure(e.to_string()))?;

        let message = PushMessage {
            title: title.to_string(),
            body: body.to_string(),
            token,
            string_data: flatten_data(&data),
            data,
        };

        match self.transport.deliver(&message).await {
            Ok(message_id) => {
                debug!(%message_id, "Push notification delivered");
                Ok(message_id)
            }
            Err(WatcherError::DeliveryFailure(reason)) => {
                warn!(%reason, "Push notification not delivered");
                Err(WatcherError::DeliveryFailure(reason))
            }
            Err(e) => {
                warn!(error = %e, "Push notification not delivered");
                Err(WatcherError::DeliveryFailure(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    #[test]
    fn test_flatten_data() {
        let data = json!({
            "type": "price-alert",
            "percentage": 6.5,
            "count": 3,
            "urgent": true,
            "meta": {"from": "0xabc"},
            "tags": ["a", "b"],
            "missing": null
        });
        let flat = flatten_data(data.as_object().unwrap());

        assert_eq!(flat["type"], "price-alert");
        assert_eq!(flat["percentage"], "6.5");
        assert_eq!(flat["count"], "3");
        assert_eq!(flat["urgent"], "true");
        assert_eq!(flat["meta"], r#"{"from":"0xabc"}"#);
        assert_eq!(flat["tags"], r#"["a","b"]"#);
        assert!(!flat.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_send_decodes_token_and_flattens() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(transport.clone());
        let token = EncodedPushToken::encode("device-token-1").unwrap();
        let data = json!({"type": "price-alert", "percentage": 6});

        let id = dispatcher
            .send("Price Alert", "body", &token, data.as_object().unwrap().clone())
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(id, "message-1");
        assert_eq!(sent[0].token, "device-token-1");
        assert_eq!(sent[0].string_data["percentage"], "6");
        assert_eq!(sent[0].data["percentage"], json!(6));
    }

    #[tokio::test]
    async fn test_transport_error_is_delivery_failure() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail_for("device-token-1");
        let dispatcher = NotificationDispatcher::new(transport.clone());
        let token = EncodedPushToken::encode("device-token-1").unwrap();

        let err = dispatcher
            .send("Price Alert", "body", &token, Map::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WatcherError::DeliveryFailure(_)));
        assert!(transport.sent().is_empty());
    }
}
