//! Debounced, serialized, retrying dispatcher for the external mirror.
//!
//! One worker task owns the queue. Handles talk to it over a bounded channel, so
//! every queue created by `SyncQueue::spawn` is fully independent of the others.
//!
//! Per key `(candidate, round)` a request first waits in a debounce timer; a newer
//! request for the same key cancels the older one with `SyncError::Superseded`.
//! When the timer fires the task joins the FIFO queue (or merges into a queued
//! task for the same key). The worker executes one task at a time, pauses
//! `inter_task_delay` after each dispatch, and puts failed tasks back at the head
//! of the queue after an exponential backoff until `max_retries` is exceeded.

use std::collections::{HashMap, VecDeque};
use std::future::{pending, poll_fn, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time::{sleep, Sleep};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;

const COMMAND_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncKey {
    pub candidate_id: Uuid,
    pub round_id: Uuid,
}

impl SyncKey {
    pub fn new(candidate_id: Uuid, round_id: Uuid) -> Self {
        Self {
            candidate_id,
            round_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncKind {
    /// Push the current snapshot.
    Sync,
    /// Delete the mirror row from `tab`.
    Remove { tab: String },
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Sync => "sync",
            SyncKind::Remove { .. } => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("superseded by a newer update for the same candidate round")]
    Superseded,
    #[error("sync queue was cleared")]
    Cleared,
    #[error("gave up after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
    #[error("sync queue is full")]
    QueueFull,
    #[error("sync worker is not running")]
    WorkerStopped,
}

pub type SyncOutcome = std::result::Result<(), SyncError>;

/// Performs one dispatch against the external mirror.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    async fn execute(&self, key: SyncKey, kind: &SyncKind) -> anyhow::Result<()>;
}

/// Completion handle for one enqueue call. Dropping it is fine.
pub struct SyncTicket(TicketState);

enum TicketState {
    Waiting(oneshot::Receiver<SyncOutcome>),
    Refused(SyncError),
}

impl SyncTicket {
    pub async fn wait(self) -> SyncOutcome {
        match self.0 {
            TicketState::Waiting(rx) => rx.await.unwrap_or(Err(SyncError::WorkerStopped)),
            TicketState::Refused(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    #[serde(flatten)]
    pub key: SyncKey,
    pub kind: &'static str,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub debouncing: usize,
    pub in_flight: Option<TaskInfo>,
    pub oldest_pending: Option<TaskInfo>,
}

enum Command {
    Enqueue {
        key: SyncKey,
        kind: SyncKind,
        reply: oneshot::Sender<SyncOutcome>,
    },
    Status(oneshot::Sender<SyncQueueStatus>),
    Clear(oneshot::Sender<usize>),
}

#[derive(Clone)]
pub struct SyncQueue {
    commands: mpsc::Sender<Command>,
}

impl SyncQueue {
    pub fn spawn(executor: Arc<dyn SyncExecutor>, config: SyncConfig) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(Worker::new(rx, executor, config).run());
        Self { commands }
    }

    pub fn enqueue(&self, candidate_id: Uuid, round_id: Uuid) -> SyncTicket {
        self.submit(SyncKey::new(candidate_id, round_id), SyncKind::Sync)
    }

    pub fn enqueue_removal(
        &self,
        candidate_id: Uuid,
        round_id: Uuid,
        tab: impl Into<String>,
    ) -> SyncTicket {
        self.submit(
            SyncKey::new(candidate_id, round_id),
            SyncKind::Remove { tab: tab.into() },
        )
    }

    fn submit(&self, key: SyncKey, kind: SyncKind) -> SyncTicket {
        let (reply, rx) = oneshot::channel();
        match self.commands.try_send(Command::Enqueue { key, kind, reply }) {
            Ok(()) => SyncTicket(TicketState::Waiting(rx)),
            Err(TrySendError::Full(_)) => {
                warn!(candidate_id = %key.candidate_id, round_id = %key.round_id, "sync command buffer full, update dropped");
                SyncTicket(TicketState::Refused(SyncError::QueueFull))
            }
            Err(TrySendError::Closed(_)) => {
                error!(candidate_id = %key.candidate_id, round_id = %key.round_id, "sync worker is gone, update dropped");
                SyncTicket(TicketState::Refused(SyncError::WorkerStopped))
            }
        }
    }

    pub async fn status(&self) -> Result<SyncQueueStatus, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .await
            .map_err(|_| SyncError::WorkerStopped)?;
        rx.await.map_err(|_| SyncError::WorkerStopped)
    }

    /// Rejects everything queued or debouncing with `SyncError::Cleared`.
    /// A dispatch already in flight is left to finish.
    pub async fn clear(&self) -> Result<usize, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Clear(tx))
            .await
            .map_err(|_| SyncError::WorkerStopped)?;
        rx.await.map_err(|_| SyncError::WorkerStopped)
    }
}

struct Pending {
    kind: SyncKind,
    reply: oneshot::Sender<SyncOutcome>,
    timer: delay_queue::Key,
    since: DateTime<Utc>,
}

struct SyncTask {
    key: SyncKey,
    kind: SyncKind,
    attempts: u32,
    waiters: Vec<oneshot::Sender<SyncOutcome>>,
    enqueued_at: DateTime<Utc>,
}

impl SyncTask {
    fn info(&self) -> TaskInfo {
        TaskInfo {
            key: self.key,
            kind: self.kind.as_str(),
            attempts: self.attempts,
            enqueued_at: self.enqueued_at,
        }
    }
}

type Dispatch = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

enum Event {
    Command(Command),
    Debounced(SyncKey),
    Finished(anyhow::Result<()>),
    CooledDown,
    Shutdown,
}

struct Worker {
    commands: mpsc::Receiver<Command>,
    executor: Arc<dyn SyncExecutor>,
    config: SyncConfig,
    timers: DelayQueue<SyncKey>,
    pending: HashMap<SyncKey, Pending>,
    queue: VecDeque<SyncTask>,
    current: Option<SyncTask>,
    in_flight: Option<Dispatch>,
    cooldown: Option<Pin<Box<Sleep>>>,
}

fn resolve(waiters: Vec<oneshot::Sender<SyncOutcome>>, outcome: &SyncOutcome) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

async fn dispatch_done(slot: &mut Option<Dispatch>) -> anyhow::Result<()> {
    match slot.as_mut() {
        Some(dispatch) => dispatch.await,
        None => pending().await,
    }
}

async fn cooldown_done(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(delay) => delay.await,
        None => pending().await,
    }
}

impl Worker {
    fn new(commands: mpsc::Receiver<Command>, executor: Arc<dyn SyncExecutor>, config: SyncConfig) -> Self {
        Self {
            commands,
            executor,
            config,
            timers: DelayQueue::new(),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            current: None,
            in_flight: None,
            cooldown: None,
        }
    }

    async fn run(mut self) {
        info!("sync queue worker started");
        loop {
            self.start_next();

            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => Event::Shutdown,
                },
                Some(expired) = poll_fn(|cx| self.timers.poll_expired(cx)), if !self.timers.is_empty() => {
                    Event::Debounced(expired.into_inner())
                }
                result = dispatch_done(&mut self.in_flight) => Event::Finished(result),
                _ = cooldown_done(&mut self.cooldown) => Event::CooledDown,
            };

            match event {
                Event::Command(Command::Enqueue { key, kind, reply }) => self.debounce(key, kind, reply),
                Event::Command(Command::Status(reply)) => {
                    let _ = reply.send(self.status());
                }
                Event::Command(Command::Clear(reply)) => {
                    let _ = reply.send(self.clear());
                }
                Event::Debounced(key) => self.promote(key),
                Event::Finished(result) => self.finish(result),
                Event::CooledDown => self.cooldown = None,
                Event::Shutdown => break,
            }
        }
        info!("sync queue worker stopped");
    }

    fn backlog(&self) -> usize {
        self.queue.len() + self.pending.len()
    }

    fn debounce(&mut self, key: SyncKey, kind: SyncKind, reply: oneshot::Sender<SyncOutcome>) {
        if let Some(previous) = self.pending.remove(&key) {
            self.timers.remove(&previous.timer);
            let _ = previous.reply.send(Err(SyncError::Superseded));
            debug!(candidate_id = %key.candidate_id, round_id = %key.round_id, "pending sync superseded");
        } else if self.backlog() >= self.config.max_queue_len {
            warn!(
                candidate_id = %key.candidate_id,
                round_id = %key.round_id,
                capacity = self.config.max_queue_len,
                "sync queue full, refusing update"
            );
            let _ = reply.send(Err(SyncError::QueueFull));
            return;
        }

        let timer = self.timers.insert(key, self.config.debounce);
        self.pending.insert(
            key,
            Pending {
                kind,
                reply,
                timer,
                since: Utc::now(),
            },
        );
    }

    fn promote(&mut self, key: SyncKey) {
        let Some(pending) = self.pending.remove(&key) else {
            return;
        };
        if let Some(queued) = self.queue.iter_mut().find(|task| task.key == key) {
            queued.kind = pending.kind;
            queued.waiters.push(pending.reply);
            return;
        }
        self.queue.push_back(SyncTask {
            key,
            kind: pending.kind,
            attempts: 0,
            waiters: vec![pending.reply],
            enqueued_at: pending.since,
        });
    }

    fn start_next(&mut self) {
        if self.current.is_some() || self.cooldown.is_some() {
            return;
        }
        let Some(task) = self.queue.pop_front() else {
            return;
        };
        let executor = Arc::clone(&self.executor);
        let (key, kind) = (task.key, task.kind.clone());
        debug!(
            candidate_id = %key.candidate_id,
            round_id = %key.round_id,
            kind = kind.as_str(),
            attempt = task.attempts + 1,
            "dispatching sync task"
        );
        self.in_flight = Some(Box::pin(async move { executor.execute(key, &kind).await }));
        self.current = Some(task);
    }

    fn finish(&mut self, result: anyhow::Result<()>) {
        self.in_flight = None;
        let Some(mut task) = self.current.take() else {
            return;
        };
        let key = task.key;

        match result {
            Ok(()) => {
                info!(candidate_id = %key.candidate_id, round_id = %key.round_id, kind = task.kind.as_str(), "mirror synced");
                resolve(task.waiters, &Ok(()));
                self.pause(self.config.inter_task_delay);
            }
            Err(e) => {
                task.attempts += 1;
                if task.attempts > self.config.max_retries {
                    error!(
                        candidate_id = %key.candidate_id,
                        round_id = %key.round_id,
                        attempts = task.attempts,
                        error = %e,
                        "mirror sync permanently failed"
                    );
                    let outcome = Err(SyncError::RetriesExhausted {
                        attempts: task.attempts,
                        reason: format!("{:#}", e),
                    });
                    resolve(task.waiters, &outcome);
                    self.pause(self.config.inter_task_delay);
                } else {
                    let delay = self.backoff(task.attempts);
                    warn!(
                        candidate_id = %key.candidate_id,
                        round_id = %key.round_id,
                        attempts = task.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "mirror sync failed, retrying"
                    );
                    self.requeue_front(task);
                    self.pause(delay);
                }
            }
        }
    }

    fn pause(&mut self, delay: Duration) {
        self.cooldown = Some(Box::pin(sleep(delay)));
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.config
            .backoff_base
            .saturating_mul(factor)
            .min(self.config.backoff_cap)
    }

    fn requeue_front(&mut self, mut task: SyncTask) {
        if let Some(pos) = self.queue.iter().position(|queued| queued.key == task.key) {
            if let Some(newer) = self.queue.remove(pos) {
                task.kind = newer.kind;
                task.waiters.extend(newer.waiters);
            }
        }
        self.queue.push_front(task);
    }

    fn clear(&mut self) -> usize {
        let mut cleared = 0;
        for task in self.queue.drain(..) {
            cleared += 1;
            resolve(task.waiters, &Err(SyncError::Cleared));
        }
        for (_, pending) in self.pending.drain() {
            cleared += 1;
            let _ = pending.reply.send(Err(SyncError::Cleared));
        }
        self.timers.clear();
        warn!(cleared, "sync queue cleared");
        cleared
    }

    fn status(&self) -> SyncQueueStatus {
        let debouncing = self.pending.iter().map(|(key, pending)| TaskInfo {
            key: *key,
            kind: pending.kind.as_str(),
            attempts: 0,
            enqueued_at: pending.since,
        });
        let oldest_pending = self
            .queue
            .iter()
            .map(SyncTask::info)
            .chain(debouncing)
            .min_by_key(|info| info.enqueued_at);

        SyncQueueStatus {
            queue_length: self.queue.len(),
            is_processing: self.current.is_some() || self.cooldown.is_some(),
            debouncing: self.pending.len(),
            in_flight: self.current.as_ref().map(SyncTask::info),
            oldest_pending,
        }
    }
}
