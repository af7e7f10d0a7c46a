use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelProvisionPayload {
    pub event_type: String,
    pub candidate_id: Uuid,
    pub candidate_name: String,
    pub job_name: String,
    pub round_id: Uuid,
    pub round_name: String,
    pub round_order: i32,
    pub requested_at: String,
}

/// Workflow webhook that opens a collaboration channel for the interview panel.
#[derive(Clone)]
pub struct CollaborationService {
    client: Client,
    webhook_url: Option<String>,
}

impl CollaborationService {
    pub fn new(client: Client, webhook_url: Option<String>) -> Self {
        let webhook_url = webhook_url.filter(|url| !url.trim().is_empty());

        if let Some(ref url) = webhook_url {
            info!("Collaboration workflow enabled, webhook URL: {}", url);
        } else {
            info!("Collaboration workflow disabled (COLLABORATION_WEBHOOK_URL not set)");
        }

        Self {
            client,
            webhook_url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn provision_channel(&self, payload: ChannelProvisionPayload) -> anyhow::Result<()> {
        let Some(webhook_url) = &self.webhook_url else {
            return Ok(());
        };

        info!(
            "Provisioning collaboration channel: candidate {} round {} ({})",
            payload.candidate_id, payload.round_id, payload.round_name
        );

        let response = self
            .client
            .post(webhook_url)
            .json(&json!({ "requestBody": payload }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Channel provisioning failed with status {}: {}", status, body);
            anyhow::bail!("HTTP error {}: {}", status, body);
        }

        info!("Collaboration channel requested for candidate {}", payload.candidate_id);
        Ok(())
    }
}
