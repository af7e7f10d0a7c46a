use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::services::slot_service::TimeWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub event_id: String,
    pub meeting_link: Option<String>,
}

/// Calendar provider surface the orchestrator depends on.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Busy intervals of one identity between `start` and `end`.
    async fn free_busy(
        &self,
        email: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TimeWindow>>;

    async fn create_event(&self, request: &EventRequest) -> anyhow::Result<CreatedEvent>;
}

/// Google Calendar v3 style REST client.
#[derive(Clone)]
pub struct HttpCalendarProvider {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<TimeWindow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: String,
    hangout_link: Option<String>,
}

impl HttpCalendarProvider {
    pub fn new(client: Client, base_url: String, access_token: Option<String>) -> Self {
        info!("Calendar integration enabled, API base: {}", base_url);
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(format!("{}{}", self.base_url, path));
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl CalendarProvider for HttpCalendarProvider {
    async fn free_busy(
        &self,
        email: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TimeWindow>> {
        let res = self
            .post("/freeBusy")
            .json(&json!({
                "timeMin": start.to_rfc3339(),
                "timeMax": end.to_rfc3339(),
                "items": [{ "id": email }],
            }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("freeBusy failed with {}: {}", status, text);
        }

        let mut body: FreeBusyResponse = res.json().await?;
        Ok(body
            .calendars
            .remove(email)
            .map(|c| c.busy)
            .unwrap_or_default())
    }

    async fn create_event(&self, request: &EventRequest) -> anyhow::Result<CreatedEvent> {
        let attendees: Vec<_> = request
            .attendee_emails
            .iter()
            .map(|email| json!({ "email": email }))
            .collect();

        let res = self
            .post("/calendars/primary/events?conferenceDataVersion=1&sendUpdates=all")
            .json(&json!({
                "summary": request.summary,
                "description": request.description,
                "start": { "dateTime": request.start.to_rfc3339() },
                "end": { "dateTime": request.end.to_rfc3339() },
                "attendees": attendees,
                "conferenceData": {
                    "createRequest": {
                        "requestId": Uuid::new_v4().to_string(),
                        "conferenceSolutionKey": { "type": "hangoutsMeet" }
                    }
                }
            }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("event creation failed with {}: {}", status, text);
        }

        let event: EventResponse = res.json().await?;
        Ok(CreatedEvent {
            event_id: event.id,
            meeting_link: event.hangout_link,
        })
    }
}

/// Used when no calendar provider is configured: nobody is busy externally and
/// events only get a locally minted id.
#[derive(Clone, Default)]
pub struct OfflineCalendar;

#[async_trait]
impl CalendarProvider for OfflineCalendar {
    async fn free_busy(
        &self,
        _email: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TimeWindow>> {
        Ok(Vec::new())
    }

    async fn create_event(&self, request: &EventRequest) -> anyhow::Result<CreatedEvent> {
        let event_id = format!("local-{}", Uuid::new_v4());
        debug!(event_id = %event_id, start = %request.start, "calendar offline, event kept local");
        Ok(CreatedEvent {
            event_id,
            meeting_link: None,
        })
    }
}
