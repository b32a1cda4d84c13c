use super::auth::AccessTokenSource;
use super::dispatcher::{PushMessage, PushTransport};
use crate::error::{Result, WatcherError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const FCM_ENDPOINT: &str = "https://fcm.googleapis.com/v1/projects";

#[derive(Debug, Deserialize)]
struct FcmSendResponse {
    name: String,
}

/// Firebase Cloud Messaging (HTTP v1) transport.
pub struct FcmTransport {
    client: reqwest::Client,
    send_url: String,
    tokens: Arc<dyn AccessTokenSource>,
    android_channel: String,
}

impl FcmTransport {
    pub fn new(
        project_id: &str,
        tokens: Arc<dyn AccessTokenSource>,
        android_channel: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            send_url: format!("{}/{}/messages:send", FCM_ENDPOINT, project_id),
            tokens,
            android_channel,
        })
    }

    /// iOS gets the typed payload inside `aps`, Android the string-only map.
    pub fn build_payload(&self, message: &PushMessage) -> Value {
        let mut aps_payload = serde_json::Map::new();
        aps_payload.insert(
            "aps".to_string(),
            json!({
                "alert": { "title": message.title, "body": message.body },
                "sound": "default",
            }),
        );
        for (key, value) in &message.data {
            aps_payload.insert(key.clone(), value.clone());
        }

        json!({
            "message": {
                "token": message.token,
                "notification": { "title": message.title, "body": message.body },
                "apns": { "payload": aps_payload },
                "android": {
                    "notification": {
                        "title": message.title,
                        "body": message.body,
                        "channel_id": self.android_channel,
                        "sound": "default",
                    },
                    "data": message.string_data,
                },
            }
        })
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    async fn deliver(&self, message: &PushMessage) -> Result<String> {
        let payload = self.build_payload(message);
        debug!(android_data = ?message.string_data, ios_data = ?message.data, "Sending FCM message");

        let access_token = self.tokens.access_token().await?;

        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Push API rejected the access token, refreshing on next send");
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(WatcherError::DeliveryFailure(format!(
                "FCM returned {}: {}",
                status, reason
            )));
        }

        let sent: FcmSendResponse = response.json().await?;
        Ok(sent.name)
    }
}
