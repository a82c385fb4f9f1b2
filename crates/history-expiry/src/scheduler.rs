use history_types::Time;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::expire_backend::ExpireHistoryBackend;
use crate::readers::{AllVisitsReader, AutoSubframeVisitsReader, ExpiringVisitsReader};
use crate::{HistoryExpiryError, Result};

/// Drives background expiration: one bounded batch per tick, rotating
/// through the visit readers until every one of them comes back short.
pub struct ExpiryScheduler {
    backend: Arc<Mutex<ExpireHistoryBackend>>,
    work_queue: VecDeque<Arc<dyn ExpiringVisitsReader>>,
    all_visits_reader: Arc<dyn ExpiringVisitsReader>,
    auto_subframe_reader: Arc<dyn ExpiringVisitsReader>,
    num_expire_per_iteration: usize,
    on_demand_favicon_age: Duration,
    delay: Duration,
    empty_delay: Duration,
}

impl ExpiryScheduler {
    pub fn new(backend: Arc<Mutex<ExpireHistoryBackend>>) -> Result<Self> {
        let config = lock(&backend)?.config().clone();
        let mut scheduler = Self {
            backend,
            work_queue: VecDeque::new(),
            all_visits_reader: Arc::new(AllVisitsReader),
            auto_subframe_reader: Arc::new(AutoSubframeVisitsReader),
            num_expire_per_iteration: config.num_expire_per_iteration,
            on_demand_favicon_age: config.on_demand_favicon_age(),
            delay: config.expiration_delay(),
            empty_delay: config.expiration_empty_delay(),
        };
        scheduler.init_work_queue();
        Ok(scheduler)
    }

    /// Overrides the configured delays between batches.
    pub fn with_delays(mut self, delay: Duration, empty_delay: Duration) -> Self {
        self.delay = delay;
        self.empty_delay = empty_delay;
        self
    }

    fn init_work_queue(&mut self) {
        self.work_queue.clear();
        self.work_queue.push_back(self.all_visits_reader.clone());
        self.work_queue.push_back(self.auto_subframe_reader.clone());
    }

    /// Readers still waiting for a batch in the current sweep.
    pub fn pending_readers(&self) -> Vec<&'static str> {
        self.work_queue.iter().map(|reader| reader.name()).collect()
    }

    /// Runs one batch for the reader at the head of the queue and returns
    /// how long to wait before the next one.
    pub fn do_expire_iteration(&mut self, now: Time) -> Result<Duration> {
        let Some(reader) = self.work_queue.pop_front() else {
            self.init_work_queue();
            return Ok(self.empty_delay);
        };

        {
            let mut backend = lock(&self.backend)?;
            let end_time = backend.get_current_expiration_time(now);
            let more = backend.expire_some_old_history(
                end_time,
                reader.as_ref(),
                self.num_expire_per_iteration,
            );
            debug!(reader = reader.name(), more, "Expiration iteration");

            if more {
                self.work_queue.push_back(reader);
            } else {
                backend.clear_old_on_demand_favicons_if_possible(now - self.on_demand_favicon_age);
            }
        }

        if self.work_queue.is_empty() {
            self.init_work_queue();
            Ok(self.empty_delay)
        } else {
            Ok(self.delay)
        }
    }

    /// Spawns the expiration loop. The first batch runs after one regular
    /// delay.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let first_delay = self.delay;
        let fallback_delay = self.empty_delay;

        let handle = tokio::spawn(async move {
            let mut scheduler = self;
            let mut delay = first_delay;
            info!(?delay, "History expiration scheduler started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => {
                        info!("History expiration scheduler shutting down");
                        break;
                    }
                }

                let iteration = tokio::task::spawn_blocking(move || {
                    let next = scheduler.do_expire_iteration(Time::now());
                    (scheduler, next)
                })
                .await;

                match iteration {
                    Ok((returned, next)) => {
                        scheduler = returned;
                        delay = next.unwrap_or_else(|e| {
                            warn!("Expiration iteration failed: {}", e);
                            fallback_delay
                        });
                    }
                    Err(e) => {
                        warn!("Expiration task panicked: {}", e);
                        break;
                    }
                }
            }
        });

        SchedulerHandle {
            shutdown_tx,
            handle,
        }
    }
}

fn lock(backend: &Mutex<ExpireHistoryBackend>) -> Result<MutexGuard<'_, ExpireHistoryBackend>> {
    backend
        .lock()
        .map_err(|_| HistoryExpiryError::Scheduler("expiration backend lock poisoned".to_string()))
}

/// Handle to a running `ExpiryScheduler`.
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop and waits for it to exit. A batch in progress
    /// finishes first.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.handle
            .await
            .map_err(|e| HistoryExpiryError::Scheduler(e.to_string()))
    }
}
