//! Scheduler (C13): time-triggered dispatcher for the proactive scorer, the
//! reflection worker, and storage housekeeping (§4.10). One `tokio::spawn`
//! loop per job, a `watch::channel` carrying the shutdown signal, and
//! `tokio::select!` racing each job's next cron/interval fire against it, so
//! the six required jobs' exact schedules (daily/hourly/weekly clock times)
//! are representable.

mod scheduler;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
