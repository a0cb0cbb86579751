//! Notification gateway for winner announcements.
//!
//! Delivery is best effort: `announce_winner` never fails, it logs instead.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::database;
use crate::error::{AppError, AppResult};
use crate::models::UserId;

/// Outbound notification transport
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Send one message to each recipient token
    async fn send(
        &self,
        recipients: &[String],
        title: &str,
        body: &str,
        data: Value,
    ) -> Result<()>;
}

/// One message in the push service's batch format
#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    sound: &'static str,
    title: &'a str,
    body: &'a str,
    data: &'a Value,
}

/// Posts batches of push messages to an HTTP push service
#[derive(Clone)]
pub struct PushGateway {
    client: Client,
    push_url: String,
}

impl PushGateway {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            push_url: config.push_url.clone(),
        })
    }
}

#[async_trait]
impl NotificationGateway for PushGateway {
    async fn send(
        &self,
        recipients: &[String],
        title: &str,
        body: &str,
        data: Value,
    ) -> Result<()> {
        if recipients.is_empty() {
            debug!("No push recipients, skipping notification");
            return Ok(());
        }

        let messages: Vec<PushMessage> = recipients
            .iter()
            .map(|to| PushMessage {
                to,
                sound: "default",
                title,
                body,
                data: &data,
            })
            .collect();

        let response = self.client.post(&self.push_url).json(&messages).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Push service returned {}", response.status()));
        }

        info!("Push notification sent to {} recipients", recipients.len());
        Ok(())
    }
}

/// Used when notifications are disabled: records what would have been sent
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyGateway;

#[async_trait]
impl NotificationGateway for LogOnlyGateway {
    async fn send(
        &self,
        recipients: &[String],
        title: &str,
        body: &str,
        _data: Value,
    ) -> Result<()> {
        info!(
            "Notifications disabled; would notify {} users: {} - {}",
            recipients.len(),
            title,
            body
        );
        Ok(())
    }
}

/// Build the gateway selected by configuration
pub fn gateway_from_config(config: &NotificationConfig) -> Result<Arc<dyn NotificationGateway>> {
    if config.enabled {
        Ok(Arc::new(PushGateway::new(config)?))
    } else {
        Ok(Arc::new(LogOnlyGateway))
    }
}

/// Title, body and data payload announcing a category winner
pub fn winner_message(category_name: &str, nominee_title: &str) -> (String, String, Value) {
    (
        "New winner announced!".to_string(),
        format!("{} won the {} category!", nominee_title, category_name),
        json!({ "category": category_name, "winner": nominee_title }),
    )
}

/// Notify every user with a push token that a winner was designated.
/// Failures are logged and swallowed.
pub async fn announce_winner(
    pool: &PgPool,
    gateway: &dyn NotificationGateway,
    category_name: &str,
    nominee_title: &str,
) {
    let recipients = match database::list_push_tokens(pool).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!("Could not load push tokens for winner notification: {}", e);
            return;
        }
    };

    let (title, body, data) = winner_message(category_name, nominee_title);
    if let Err(e) = gateway.send(&recipients, &title, &body, data).await {
        warn!("Winner notification for {} failed: {:#}", category_name, e);
    }
}

/// Store the push token a user's device registered
pub async fn register_push_token(pool: &PgPool, user_id: UserId, token: &str) -> AppResult<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Validation("Push token must not be empty".to_string()));
    }
    if !database::set_push_token(pool, user_id, token).await? {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }
    debug!("Registered push token for user {}", user_id);
    Ok(())
}
