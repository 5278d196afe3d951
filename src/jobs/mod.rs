//! Cron-driven background work: auto-close, campaigns, scheduled messages and
//! chat-flow timeouts.

pub mod tasks;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use log::{debug, error, info, warn};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::error::AppResult;
use crate::core::shared::state::AppState;

pub use tasks::{AutoCloseJob, CampaignDispatchJob, ChatFlowTimeoutJob, ScheduledMessagesJob};

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one pass and returns how many items it handled.
    async fn run(&self, state: &AppState) -> AppResult<usize>;
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid cron expression for {job}: {source}")]
    InvalidCron {
        job: &'static str,
        #[source]
        source: cron::error::Error,
    },
}

struct JobEntry {
    job: Arc<dyn ScheduledJob>,
    schedule: Schedule,
    next_run: Option<DateTime<Utc>>,
    running: Arc<AtomicBool>,
}

impl JobEntry {
    fn new(job: Arc<dyn ScheduledJob>, schedule: Schedule, now: DateTime<Utc>) -> Self {
        let next_run = schedule.after(&now).next();
        Self {
            job,
            schedule,
            next_run,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True when the entry is due; moves `next_run` past `now` in that case.
    fn take_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_run {
            Some(at) if at <= now => {
                self.next_run = self.schedule.after(&now).next();
                true
            }
            _ => false,
        }
    }
}

/// Clears the running flag even when the job panics.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct JobScheduler {
    state: Arc<AppState>,
    tick: Duration,
    jobs: Vec<JobEntry>,
}

impl JobScheduler {
    pub fn new(state: Arc<AppState>, tick: Duration) -> Self {
        Self {
            state,
            tick,
            jobs: Vec::new(),
        }
    }

    pub fn register(&mut self, cron_expr: &str, job: Arc<dyn ScheduledJob>) -> Result<(), JobError> {
        let schedule = Schedule::from_str(cron_expr).map_err(|source| JobError::InvalidCron {
            job: job.name(),
            source,
        })?;
        info!("Registered job {} ({cron_expr})", job.name());
        self.jobs.push(JobEntry::new(job, schedule, Utc::now()));
        Ok(())
    }

    /// Scheduler with every built-in job, using the configured cron expressions.
    pub fn with_default_jobs(state: Arc<AppState>) -> Result<Self, JobError> {
        let config = state.config.scheduler.clone();
        let mut scheduler = Self::new(state, Duration::from_secs(config.tick_seconds.max(1)));
        scheduler.register(&config.auto_close_cron, Arc::new(AutoCloseJob))?;
        scheduler.register(&config.campaign_cron, Arc::new(CampaignDispatchJob))?;
        scheduler.register(&config.scheduled_messages_cron, Arc::new(ScheduledMessagesJob))?;
        scheduler.register(&config.flow_timeout_cron, Arc::new(ChatFlowTimeoutJob))?;
        Ok(scheduler)
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|e| e.job.name()).collect()
    }

    /// Spawns every due job that is not already running.
    pub fn run_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut started = 0;
        for entry in &mut self.jobs {
            if !entry.take_due(now) {
                continue;
            }
            let name = entry.job.name();
            if entry
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                warn!("Job {name} still running, skipping this run");
                continue;
            }

            let guard = RunningGuard(entry.running.clone());
            let job = entry.job.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                let _guard = guard;
                match job.run(&state).await {
                    Ok(0) => debug!("Job {name} had nothing to do"),
                    Ok(n) => info!("Job {name} handled {n} items"),
                    Err(e) => error!("Job {name} failed: {e}"),
                }
            });
            started += 1;
        }
        started
    }

    pub fn start(mut self) -> JoinHandle<()> {
        info!(
            "Starting job scheduler with {} jobs, tick {:?}",
            self.jobs.len(),
            self.tick
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.run_due(Utc::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::create_test_state;
    use std::sync::atomic::AtomicUsize;

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        pause: Duration,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, _state: &AppState) -> AppResult<usize> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.pause).await;
            Ok(1)
        }
    }

    fn scheduler_with(job: CountingJob) -> JobScheduler {
        let mut scheduler = JobScheduler::new(Arc::new(create_test_state()), Duration::from_secs(1));
        scheduler.register("* * * * * *", Arc::new(job)).unwrap();
        scheduler
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        let mut scheduler = JobScheduler::new(Arc::new(create_test_state()), Duration::from_secs(1));
        let job = CountingJob {
            runs: Arc::new(AtomicUsize::new(0)),
            pause: Duration::ZERO,
        };
        let err = scheduler.register("not a cron", Arc::new(job)).unwrap_err();
        assert!(err.to_string().contains("counting"));
    }

    #[test]
    fn test_default_jobs_are_registered() {
        let scheduler = JobScheduler::with_default_jobs(Arc::new(create_test_state())).unwrap();
        assert_eq!(
            scheduler.job_names(),
            vec![
                "auto_close_tickets",
                "campaign_dispatch",
                "scheduled_messages",
                "chat_flow_timeouts"
            ]
        );
    }

    #[tokio::test]
    async fn test_job_is_not_due_before_next_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = scheduler_with(CountingJob {
            runs: runs.clone(),
            pause: Duration::ZERO,
        });
        assert_eq!(scheduler.run_due(Utc::now() - chrono::Duration::seconds(5)), 0);
    }

    #[tokio::test]
    async fn test_running_job_does_not_overlap() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = scheduler_with(CountingJob {
            runs: runs.clone(),
            pause: Duration::from_millis(300),
        });
        let later = Utc::now() + chrono::Duration::seconds(2);
        assert_eq!(scheduler.run_due(later), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.run_due(later + chrono::Duration::seconds(2)), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.run_due(later + chrono::Duration::seconds(4)), 1);
    }
}
