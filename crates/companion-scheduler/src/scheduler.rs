use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use companion_core::GatewayError;
use companion_memory::MemoryManager;
use companion_personality::PersonalityStore;
use companion_runtime::{ProactiveScorer, ReflectionWorker};
use companion_stores::{MemoryKind, UserProfileStore};
use cron::Schedule;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Tunables the six jobs read from (§6 Configuration numeric knobs).
pub struct SchedulerConfig {
    pub timezone: Tz,
    pub shutdown_deadline: Duration,
    pub reflection_batch_size: usize,
    pub reflection_batch_pause: Duration,
    pub memory_cleanup_age_days: i64,
    pub memory_cleanup_importance_threshold: f32,
    pub engagement_inactive_after_days: i64,
}

pub struct Scheduler {
    profiles: UserProfileStore,
    memory: MemoryManager,
    personality: PersonalityStore,
    proactive: ProactiveScorer,
    reflection: ReflectionWorker,
    config: SchedulerConfig,
}

/// A running scheduler. Dropping this without calling `shutdown` leaves the
/// background tasks running — callers are expected to await `shutdown` on
/// process exit.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    deadline: Duration,
}

impl SchedulerHandle {
    /// Signals every job loop to stop accepting new triggers, then waits up
    /// to the configured deadline for in-flight jobs to finish before
    /// abandoning them (§4.10: "allow in-flight jobs to complete within a
    /// deadline... then cancel").
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let joined = tokio::time::timeout(self.deadline, futures_join_all(self.handles)).await;
        if joined.is_err() {
            warn!("scheduler shutdown deadline elapsed with jobs still in flight");
        }
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

impl Scheduler {
    pub fn new(
        profiles: UserProfileStore,
        memory: MemoryManager,
        personality: PersonalityStore,
        proactive: ProactiveScorer,
        reflection: ReflectionWorker,
        config: SchedulerConfig,
    ) -> Self {
        Self { profiles, memory, personality, proactive, reflection, config }
    }

    /// Starts all six required jobs as independent background loops and
    /// returns a handle to stop them.
    pub fn start(self) -> SchedulerHandle {
        let timezone = self.config.timezone;
        let deadline = self.config.shutdown_deadline;
        let scheduler = Arc::new(self);
        let (shutdown_tx, _) = watch::channel(false);

        let handles = vec![
            spawn_cron_job("nightly_reflection", "0 0 3 * * *", timezone, 1, shutdown_tx.subscribe(), {
                let s = scheduler.clone();
                move || {
                    let s = s.clone();
                    async move { s.run_nightly_reflection().await }
                }
            }),
            spawn_interval_job("proactive_sweep", Duration::from_secs(5 * 60), 2, shutdown_tx.subscribe(), {
                let s = scheduler.clone();
                move || {
                    let s = s.clone();
                    async move { s.run_proactive_sweep().await }
                }
            }),
            spawn_interval_job("recency_decay", Duration::from_secs(4 * 60 * 60), 1, shutdown_tx.subscribe(), {
                let s = scheduler.clone();
                move || {
                    let s = s.clone();
                    async move { s.run_recency_decay().await }
                }
            }),
            spawn_cron_job("memory_cleanup", "0 0 2 * * Sun", timezone, 1, shutdown_tx.subscribe(), {
                let s = scheduler.clone();
                move || {
                    let s = s.clone();
                    async move { s.run_memory_cleanup().await }
                }
            }),
            spawn_interval_job("needs_decay", Duration::from_secs(60 * 60), 1, shutdown_tx.subscribe(), {
                let s = scheduler.clone();
                move || {
                    let s = s.clone();
                    async move { s.run_needs_decay().await }
                }
            }),
            spawn_cron_job("engagement_check", "0 0 1 * * *", timezone, 1, shutdown_tx.subscribe(), {
                let s = scheduler.clone();
                move || {
                    let s = s.clone();
                    async move { s.run_engagement_check().await }
                }
            }),
        ];

        SchedulerHandle { shutdown_tx, handles, deadline }
    }

    async fn run_nightly_reflection(&self) -> Result<(), GatewayError> {
        let user_ids = self.profiles.list_active_user_ids().await?;
        info!(users = user_ids.len(), "nightly reflection starting");
        self.reflection.run_batch(&user_ids, self.config.reflection_batch_size, self.config.reflection_batch_pause).await;
        Ok(())
    }

    async fn run_proactive_sweep(&self) -> Result<(), GatewayError> {
        let user_ids = self.profiles.list_active_user_ids().await?;
        let mut initiated = 0;
        for user_id in &user_ids {
            match self.proactive.maybe_initiate(user_id).await {
                Ok(Some(_)) => initiated += 1,
                Ok(None) => {}
                Err(err) => warn!(%user_id, %err, "proactive check failed, continuing"),
            }
        }
        info!(checked = user_ids.len(), initiated, "proactive sweep complete");
        Ok(())
    }

    async fn run_recency_decay(&self) -> Result<(), GatewayError> {
        let user_ids = self.profiles.list_active_user_ids().await?;
        let mut updated = 0;
        for user_id in &user_ids {
            for kind in [MemoryKind::Episodic, MemoryKind::Semantic] {
                match self.memory.decay_recency(user_id, kind).await {
                    Ok(count) => updated += count,
                    Err(err) => warn!(%user_id, ?kind, %err, "recency decay failed, continuing"),
                }
            }
        }
        info!(updated, "recency decay complete");
        Ok(())
    }

    async fn run_memory_cleanup(&self) -> Result<(), GatewayError> {
        let user_ids = self.profiles.list_active_user_ids().await?;
        let mut deleted = 0;
        for user_id in &user_ids {
            for kind in [MemoryKind::Episodic, MemoryKind::Semantic] {
                match self
                    .memory
                    .cleanup_old(user_id, kind, self.config.memory_cleanup_age_days, self.config.memory_cleanup_importance_threshold)
                    .await
                {
                    Ok(count) => deleted += count,
                    Err(err) => warn!(%user_id, ?kind, %err, "memory cleanup failed, continuing"),
                }
            }
        }
        info!(deleted, "memory cleanup complete");
        Ok(())
    }

    async fn run_needs_decay(&self) -> Result<(), GatewayError> {
        let user_ids = self.profiles.list_active_user_ids().await?;
        for user_id in &user_ids {
            if let Err(err) = self.personality.decay_needs(user_id, 1.0).await {
                warn!(%user_id, %err, "needs decay failed, continuing");
            }
        }
        info!(users = user_ids.len(), "needs decay complete");
        Ok(())
    }

    async fn run_engagement_check(&self) -> Result<(), GatewayError> {
        let snapshot = self.profiles.engagement_snapshot(self.config.engagement_inactive_after_days).await?;
        info!(active = snapshot.active_users, stale = snapshot.stale_users, "engagement check complete");
        Ok(())
    }
}

/// Sleeps until the next cron fire, racing the sleep against shutdown.
/// Acquires a permit (bounded by the job's overlap policy) before running;
/// a tick with no free permit is skipped rather than queued (§4.10: "max N
/// concurrent").
fn spawn_cron_job<F, Fut>(
    name: &'static str,
    cron_expr: &str,
    timezone: Tz,
    max_concurrent: usize,
    mut shutdown_rx: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), GatewayError>> + Send,
{
    let schedule = Schedule::from_str(cron_expr).unwrap_or_else(|err| panic!("invalid cron expression for {name}: {err}"));
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    tokio::spawn(async move {
        loop {
            let sleep_for = next_cron_delay(&schedule, timezone).unwrap_or(Duration::from_secs(60));
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_ok() && *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown_rx.borrow() {
                break;
            }

            let Ok(_permit) = semaphore.clone().try_acquire_owned() else {
                warn!(job = name, "skipped tick: previous run still in flight");
                continue;
            };
            info!(job = name, "starting");
            if let Err(err) = job().await {
                warn!(job = name, %err, "job failed");
            }
        }
    })
}

/// Fixed-interval variant for the three non-cron jobs.
fn spawn_interval_job<F, Fut>(
    name: &'static str,
    period: Duration,
    max_concurrent: usize,
    mut shutdown_rx: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), GatewayError>> + Send,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_ok() && *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown_rx.borrow() {
                break;
            }

            let Ok(_permit) = semaphore.clone().try_acquire_owned() else {
                warn!(job = name, "skipped tick: previous run still in flight");
                continue;
            };
            info!(job = name, "starting");
            if let Err(err) = job().await {
                warn!(job = name, %err, "job failed");
            }
        }
    })
}

fn next_cron_delay(schedule: &Schedule, timezone: Tz) -> Option<Duration> {
    let now = Utc::now().with_timezone(&timezone);
    let next = schedule.upcoming(timezone).next()?;
    (next - now).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_delay_is_always_positive_for_a_valid_schedule() {
        let schedule = Schedule::from_str("0 0 3 * * *").unwrap();
        let delay = next_cron_delay(&schedule, chrono_tz::UTC);
        assert!(delay.is_some());
        assert!(delay.unwrap() > Duration::from_secs(0));
    }

    #[test]
    fn weekly_cleanup_schedule_parses() {
        assert!(Schedule::from_str("0 0 2 * * Sun").is_ok());
    }
}
