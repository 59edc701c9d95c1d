use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use alcove_types::models::{Digest, DigestSource, DigestUserConfig};
use alcove_types::time::DeliveryTime;

use crate::error::DigestError;
use crate::generator::{DigestGenerator, GenerationRequest};
use crate::notifier::{NotificationData, NotificationRequest, NotificationSender};
use crate::store::{DigestHistoryStore, SettingsStore};
use crate::topics;

/// Notification preview length, in characters of digest content.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick period, wall-clock aligned. One minute matches the HH:MM
    /// granularity of delivery times.
    pub tick_interval: Duration,
    /// Upper bound on concurrent per-user deliveries within one tick.
    pub worker_limit: usize,
    /// Language the generator is asked to write in.
    pub language: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            worker_limit: 4,
            language: "English".to_string(),
        }
    }
}

/// Result of one tick attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick ran; `due` users matched the current minute.
    Completed { due: usize },
    /// A previous tick was still executing; this one did nothing and is not
    /// retried — the next aligned tick is the only catch-up opportunity.
    Skipped,
}

/// Result of an on-demand test generation.
#[derive(Debug, Clone)]
pub struct TestGeneration {
    pub content: String,
    pub sources: Vec<DigestSource>,
    /// Set when the caller asked for the result to be saved to history.
    pub digest_id: Option<Uuid>,
}

/// Process-wide digest loop: started once, polls per-user delivery times
/// every tick and fans out generate→persist→notify for the users due now.
#[derive(Clone)]
pub struct DigestScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn DigestHistoryStore>,
    generator: Arc<dyn DigestGenerator>,
    notifier: Arc<dyn NotificationSender>,
    config: SchedulerConfig,
    workers: Arc<Semaphore>,
    /// Single-flight guard. Checked with a compare-exchange, never a lock
    /// wait, so skip decisions are instantaneous.
    tick_in_flight: AtomicBool,
    running: AtomicBool,
    stop: Notify,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl DigestScheduler {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn DigestHistoryStore>,
        generator: Arc<dyn DigestGenerator>,
        notifier: Arc<dyn NotificationSender>,
        config: SchedulerConfig,
    ) -> Self {
        let worker_limit = config.worker_limit.max(1);
        Self {
            inner: Arc::new(SchedulerInner {
                settings,
                history,
                generator,
                notifier,
                config,
                workers: Arc::new(Semaphore::new(worker_limit)),
                tick_in_flight: AtomicBool::new(false),
                running: AtomicBool::new(false),
                stop: Notify::new(),
                loop_task: Mutex::new(None),
            }),
        }
    }

    /// Start the tick loop. A second call while running is a warned no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("digest scheduler already running");
            return;
        }
        info!(
            "digest scheduler started, tick every {:?}",
            self.inner.config.tick_interval
        );

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                if !scheduler.inner.running.load(Ordering::Acquire) {
                    break;
                }
                let wait = until_next_tick(scheduler.inner.config.tick_interval);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        if !scheduler.inner.running.load(Ordering::Acquire) {
                            break;
                        }
                        // The tick runs off the timer task so a slow cycle
                        // can never delay the next alignment check.
                        let tick = scheduler.clone();
                        tokio::spawn(async move {
                            tick.run_tick(Utc::now()).await;
                        });
                    }
                    _ = scheduler.inner.stop.notified() => continue,
                }
            }
            info!("digest scheduler stopped");
        });
        let mut slot = self
            .inner
            .loop_task
            .lock()
            .expect("scheduler task lock poisoned");
        if let Some(previous) = slot.take() {
            // A loop from an earlier start/stop cycle may not have observed
            // the stop yet; two loops must never tick side by side.
            previous.abort();
        }
        *slot = Some(handle);
    }

    /// Prevent the next tick from firing. A tick already in flight finishes
    /// naturally.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.stop.notify_one();
        info!("digest scheduler stop requested");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// One tick: find users whose delivery time matches `now` truncated to
    /// the minute and deliver to each. Skips entirely when the previous
    /// tick has not finished.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickOutcome {
        if self
            .inner
            .tick_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("previous digest tick still in flight, skipping this one");
            return TickOutcome::Skipped;
        }

        let due = match check_and_send_digests(&self.inner, now).await {
            Ok(due) => due,
            Err(e) => {
                error!("digest tick abandoned: {e:#}");
                0
            }
        };

        self.inner.tick_in_flight.store(false, Ordering::Release);
        TickOutcome::Completed { due }
    }

    /// On-demand bypass of the time check: load the user's stored settings
    /// and run the full generate→persist→notify sequence once.
    pub async fn trigger_manual_digest(&self, user_id: Uuid) -> Result<Digest, DigestError> {
        let config = self
            .inner
            .settings
            .get(user_id)?
            .ok_or(DigestError::ConfigNotFound)?;
        deliver_digest(&self.inner, &config).await
    }

    /// Generation only — no schedule check, no notification. When `user_id`
    /// is given the result is also saved to that user's history, useful for
    /// previewing without waiting for the real schedule.
    pub async fn test_digest_generation(
        &self,
        topics: Vec<String>,
        custom_prompt: Option<String>,
        user_id: Option<Uuid>,
    ) -> Result<TestGeneration, DigestError> {
        let topics = if topics.is_empty() {
            vec!["technology".to_string()]
        } else {
            topics
        };

        let request = GenerationRequest {
            topics: topics.clone(),
            custom_prompt: custom_prompt.clone(),
            language: self.inner.config.language.clone(),
        };
        let generated = self.inner.generator.generate(&request).await?;

        let digest_id = match user_id {
            Some(user_id) => {
                let digest = Digest {
                    id: Uuid::new_v4(),
                    user_id,
                    content: generated.content.clone(),
                    sources: generated.sources.clone(),
                    topics,
                    custom_prompt,
                    created_at: Utc::now(),
                    read: false,
                    read_at: None,
                };
                self.inner.history.insert(&digest)?;
                debug!("test digest {} saved to history", digest.id);
                Some(digest.id)
            }
            None => None,
        };

        Ok(TestGeneration {
            content: generated.content,
            sources: generated.sources,
            digest_id,
        })
    }
}

/// Sleep time to the next wall-clock multiple of `period`.
fn until_next_tick(period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let now_ms = Utc::now().timestamp_millis();
    let remainder = now_ms.rem_euclid(period_ms);
    Duration::from_millis((period_ms - remainder) as u64)
}

async fn check_and_send_digests(
    inner: &Arc<SchedulerInner>,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let current = DeliveryTime::from_datetime(&now);
    let users = inner
        .settings
        .list_enabled_with_token()
        .context("listing enabled digest users")?;

    let due: Vec<DigestUserConfig> = users
        .into_iter()
        .filter(|user| user.deliverable() && user.delivery_time_utc == current)
        .collect();
    if due.is_empty() {
        return Ok(0);
    }

    info!("{} digest(s) due at {} UTC", due.len(), current);
    let due_count = due.len();

    // Per-user deliveries are independent: run them in parallel, bounded by
    // the worker limit, and let one failure never abort the others.
    let mut deliveries = JoinSet::new();
    for user in due {
        let permit = inner
            .workers
            .clone()
            .acquire_owned()
            .await
            .context("worker semaphore closed")?;
        let task_inner = inner.clone();
        deliveries.spawn(async move {
            let _permit = permit;
            let user_id = user.user_id;
            match deliver_digest(&task_inner, &user).await {
                Ok(digest) => info!("digest {} delivered to user {}", digest.id, user_id),
                Err(e) => warn!("digest for user {} failed: {}", user_id, e),
            }
        });
    }
    while deliveries.join_next().await.is_some() {}

    Ok(due_count)
}

/// One user's generate→persist→notify sequence. Persistence happens before
/// the notification attempt, so a delivery failure still leaves the digest
/// in history; a generation failure persists nothing.
async fn deliver_digest(
    inner: &SchedulerInner,
    user: &DigestUserConfig,
) -> Result<Digest, DigestError> {
    let token = user
        .notification_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(DigestError::InvalidToken)?;

    let request = GenerationRequest {
        topics: user.topics.clone(),
        custom_prompt: user.custom_prompt.clone(),
        language: inner.config.language.clone(),
    };
    let generated = inner.generator.generate(&request).await?;

    let digest = Digest {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        content: generated.content,
        sources: generated.sources,
        topics: user.topics.clone(),
        custom_prompt: user.custom_prompt.clone(),
        created_at: Utc::now(),
        read: false,
        read_at: None,
    };
    inner.history.insert(&digest)?;

    let notification = digest_notification(&digest);
    match inner.notifier.send(token, &notification).await {
        Ok(receipt) => debug!(
            "notification sent for digest {} (receipt {:?})",
            digest.id, receipt.receipt_id
        ),
        Err(e) => warn!("notification for digest {} not delivered: {}", digest.id, e),
    }

    Ok(digest)
}

fn digest_notification(digest: &Digest) -> NotificationRequest {
    let labels = digest
        .topics
        .iter()
        .map(|t| topics::label_for(t))
        .collect::<Vec<_>>()
        .join(" · ");
    let title = if labels.is_empty() {
        "Daily Digest".to_string()
    } else {
        format!("Daily Digest: {labels}")
    };
    NotificationRequest {
        title,
        body: content_preview(&digest.content),
        data: NotificationData::Digest {
            digest_id: digest.id,
        },
    }
}

/// First ~100 characters of content with newlines collapsed, ellipsized.
pub fn content_preview(content: &str) -> String {
    let collapsed: String = content
        .chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!("{}...", collapsed.trim())
}
