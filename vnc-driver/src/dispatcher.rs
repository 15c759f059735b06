//! Fan-out of one `step` across connections.
//!
//! Every requested connection gets one unit of work: send its queued events,
//! then take a snapshot. Units run concurrently, at most `max_parallel` at a
//! time, and each is bounded by the per-connection budget. A unit's failure
//! only ever lands in its own [`Outcome`].
//!
//! A unit cut off by the budget leaves its connection registered, unless the
//! cut left client output half written. A peer that stopped reading would
//! stall every later step too, so that connection is retired.

use crate::errors::DriverError;
use futures::future::join_all;
use rfb_client::{Connection, Event, RfbClientError, Snapshot};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Result of one connection's unit.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub snapshot: Option<Snapshot>,
    pub error: Option<DriverError>,
    /// The connection is dead and should be removed from the registry.
    pub finished: bool,
}

impl Outcome {
    fn finished(error: DriverError) -> Self {
        Self {
            snapshot: None,
            error: Some(error),
            finished: true,
        }
    }

    fn timed_out(&self) -> bool {
        matches!(self.error, Some(DriverError::Timeout(_)))
    }
}

/// One unit of work.
pub(crate) struct Job {
    pub name: String,
    pub connection: Arc<Connection>,
    pub events: Vec<Event>,
}

pub(crate) struct Dispatcher {
    permits: Arc<Semaphore>,
    budget: Duration,
}

impl Dispatcher {
    pub fn new(max_parallel: usize, budget: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            budget,
        }
    }

    /// Run every job and return the outcomes in job order.
    pub async fn run(&self, jobs: Vec<Job>) -> Vec<(Job, Outcome)> {
        join_all(jobs.into_iter().map(|job| async move {
            let mut outcome = self
                .bounded(&job.name, exchange(&job.connection, &job.events))
                .await;
            if outcome.timed_out() && job.connection.has_unsent_output() {
                tracing::warn!("[{}] output stalled mid-write; retiring", job.connection.label());
                outcome.finished = true;
            }
            (job, outcome)
        }))
        .await
    }

    /// Wait for a permit, then run `work` within the budget.
    async fn bounded<F>(&self, name: &str, work: F) -> Outcome
    where
        F: Future<Output = Outcome>,
    {
        // acquire only fails on a closed semaphore, and this one never closes.
        let _permit = self.permits.acquire().await.ok();
        match tokio::time::timeout(self.budget, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("[{}] step exceeded {:?}", name, self.budget);
                Outcome {
                    error: Some(DriverError::Timeout(format!(
                        "connection '{}' did not finish within {:?}",
                        name, self.budget
                    ))),
                    ..Outcome::default()
                }
            }
        }
    }
}

/// Send `events`, then take a snapshot. A connection whose receive task has
/// ended reports its recorded error instead.
async fn exchange(connection: &Connection, events: &[Event]) -> Outcome {
    if connection.state().is_terminal() {
        return Outcome::finished(ended(connection, None));
    }

    let mut usage = None;
    match connection.send_events(events).await {
        Ok(()) => {}
        Err(err @ RfbClientError::InvalidInput(_)) => usage = Some(DriverError::from_client(&err)),
        Err(err) => return Outcome::finished(ended(connection, Some(err))),
    }

    match connection.snapshot().await {
        Ok(snapshot) => Outcome {
            snapshot: Some(snapshot),
            error: usage,
            finished: false,
        },
        Err(err) => Outcome::finished(ended(connection, Some(err))),
    }
}

/// The error to report for a connection that stopped. The receive task's
/// error wins over whatever the caller saw.
fn ended(connection: &Connection, seen: Option<RfbClientError>) -> DriverError {
    match connection.take_error().or(seen) {
        Some(err) => DriverError::from_client(&err),
        None => DriverError::Transport(format!("connection {} closed", connection.label())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_budget_expiry_is_a_timeout() {
        let dispatcher = Dispatcher::new(1, Duration::from_millis(20));
        let outcome = dispatcher
            .bounded("slow", futures::future::pending::<Outcome>())
            .await;
        assert!(outcome.timed_out());
        assert!(!outcome.finished);
        assert!(outcome.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let dispatcher = Dispatcher::new(2, Duration::from_secs(5));
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let units = (0..6).map(|i| {
            let running = &running;
            let peak = &peak;
            let dispatcher = &dispatcher;
            async move {
                dispatcher
                    .bounded(&format!("c{}", i), async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Outcome::default()
                    })
                    .await
            }
        });
        let outcomes = join_all(units).await;

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.error.is_none()));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
