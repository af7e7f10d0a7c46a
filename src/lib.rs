pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::Result;
use crate::services::{
    ai_service::AIService,
    background::BackgroundTasks,
    booking_service::BookingService,
    booking_token_service::BookingTokenService,
    calendar_service::{CalendarProvider, HttpCalendarProvider, OfflineCalendar},
    collaboration_service::CollaborationService,
    mirror_service::{HttpMirror, InMemoryMirror, MirrorDocument, MirrorWriter, PgSnapshotSource},
    notification_service::NotificationService,
    pipeline_service::PipelineService,
    slot_service::{BusinessCalendar, SlotService},
    sync_queue::SyncQueue,
};

/// External systems the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub calendar: Arc<dyn CalendarProvider>,
    pub mirror: Arc<dyn MirrorDocument>,
}

impl Collaborators {
    /// HTTP adapters where a URL is configured, in-process stand-ins otherwise.
    pub fn from_config(config: &Config, client: &Client) -> Self {
        let calendar: Arc<dyn CalendarProvider> = match &config.calendar_api_url {
            Some(url) => Arc::new(HttpCalendarProvider::new(
                client.clone(),
                url.clone(),
                config.calendar_api_token.clone(),
            )),
            None => Arc::new(OfflineCalendar),
        };
        let mirror: Arc<dyn MirrorDocument> = match &config.mirror_api_url {
            Some(url) => Arc::new(HttpMirror::new(
                client.clone(),
                url.clone(),
                config.mirror_api_token.clone(),
            )),
            None => Arc::new(InMemoryMirror::default()),
        };
        Self { calendar, mirror }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub pipeline: PipelineService,
    pub booking: BookingService,
    pub sync_queue: SyncQueue,
    pub background: BackgroundTasks,
    pub notification_service: NotificationService,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let collaborators = Collaborators::from_config(config, &http_client);
        Ok(Self::with_collaborators(pool, config, http_client, collaborators))
    }

    /// Must run inside a tokio runtime: the sync worker and failure sink are spawned here.
    pub fn with_collaborators(
        pool: PgPool,
        config: &Config,
        http_client: Client,
        collaborators: Collaborators,
    ) -> Self {
        let writer = MirrorWriter::new(
            Arc::new(PgSnapshotSource::new(pool.clone())),
            collaborators.mirror,
            config.sync.document_id.clone(),
            config.sync.key_column.clone(),
            config.org_offset,
        );
        let sync_queue = SyncQueue::spawn(Arc::new(writer), config.sync.clone());
        let background = BackgroundTasks::new();

        let notification_service = NotificationService::new(
            pool.clone(),
            http_client.clone(),
            config.notification_webhook_url.clone(),
            config.webhook_secret.clone(),
        );
        let ai_service = AIService::new(config.openai_api_key.clone(), http_client.clone());
        let collaboration =
            CollaborationService::new(http_client, config.collaboration_webhook_url.clone());

        let pipeline = PipelineService::new(
            pool.clone(),
            sync_queue.clone(),
            background.clone(),
            notification_service.clone(),
            ai_service,
            collaboration,
        );

        let slots = SlotService::new(
            pool.clone(),
            collaborators.calendar.clone(),
            BusinessCalendar::new(config.org_offset),
        );
        let booking = BookingService::new(
            pool.clone(),
            BookingTokenService::new(pool.clone(), config.booking_token_ttl_hours),
            slots,
            collaborators.calendar,
            sync_queue.clone(),
            background.clone(),
            notification_service.clone(),
            config.public_base_url.clone(),
        );

        Self {
            pool,
            pipeline,
            booking,
            sync_queue,
            background,
            notification_service,
        }
    }
}
