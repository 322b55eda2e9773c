use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::AdmissionConfig;

pub const LATENCY_WINDOW: usize = 50;
const GROW_BELOW_SECS: f64 = 1.0;
const SHRINK_ABOVE_SECS: f64 = 2.0;

#[derive(Clone, Debug, PartialEq)]
pub struct AdmissionState {
    pub current_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    pub recent_latencies: VecDeque<Duration>,
    /// Permits that must be forgotten on release because no idle permit was
    /// available when the limit shrank.
    pub shrink_debt: usize,
}

impl AdmissionState {
    fn mean_latency(&self) -> Option<Duration> {
        if self.recent_latencies.is_empty() {
            return None;
        }
        let total: Duration = self.recent_latencies.iter().sum();
        let count = u32::try_from(self.recent_latencies.len()).unwrap_or(u32::MAX);
        Some(total / count)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LimitChange {
    Grew { from: usize, to: usize },
    Shrank { from: usize, to: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdmissionSnapshot {
    pub limit: usize,
    pub min: usize,
    pub max: usize,
    pub available: usize,
    pub in_flight: usize,
    pub waiters: usize,
    pub shrink_debt: usize,
    pub mean_latency_ms: Option<u64>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission controller is closed")]
    Closed,
}

struct Shared {
    semaphore: Arc<Semaphore>,
    state: Mutex<AdmissionState>,
    in_flight: AtomicUsize,
    waiters: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, AdmissionState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Adaptive concurrency limiter in front of the inference service.
///
/// The semaphore is created once and resized in place: growth adds a permit
/// or cancels outstanding shrink debt, shrink forgets an idle permit or takes
/// on debt that the next released permit pays off. Tasks already queued on the
/// semaphore keep their place across resizes.
#[derive(Clone)]
pub struct AdmissionController {
    shared: Arc<Shared>,
}

impl AdmissionController {
    pub fn new(initial_limit: usize, min_limit: usize, max_limit: usize) -> Self {
        let min_limit = min_limit.max(1);
        let max_limit = max_limit.max(min_limit);
        let current_limit = initial_limit.clamp(min_limit, max_limit);

        Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(current_limit)),
                state: Mutex::new(AdmissionState {
                    current_limit,
                    min_limit,
                    max_limit,
                    recent_latencies: VecDeque::with_capacity(LATENCY_WINDOW),
                    shrink_debt: 0,
                }),
                in_flight: AtomicUsize::new(0),
                waiters: AtomicUsize::new(0),
            }),
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.initial_limit, config.min_limit, config.max_limit)
    }

    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        let waiter = WaiterGuard::new(&self.shared);
        let permit = Arc::clone(&self.shared.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        drop(waiter);

        self.shared.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(AdmissionPermit { permit: Some(permit), shared: Arc::clone(&self.shared) })
    }

    /// Feeds one observed run latency into the window and adjusts the limit
    /// by at most one step.
    pub fn record(&self, latency: Duration) -> Option<LimitChange> {
        let mut state = self.shared.state();
        if state.recent_latencies.len() == LATENCY_WINDOW {
            state.recent_latencies.pop_front();
        }
        state.recent_latencies.push_back(latency);

        let mean = state.mean_latency()?.as_secs_f64();
        let from = state.current_limit;

        if mean < GROW_BELOW_SECS && state.current_limit < state.max_limit {
            if state.shrink_debt > 0 {
                state.shrink_debt -= 1;
            } else {
                self.shared.semaphore.add_permits(1);
            }
            state.current_limit += 1;
            let change = LimitChange::Grew { from, to: state.current_limit };
            log_change(change, mean);
            return Some(change);
        }

        if mean > SHRINK_ABOVE_SECS && state.current_limit > state.min_limit {
            match Arc::clone(&self.shared.semaphore).try_acquire_owned() {
                Ok(idle) => idle.forget(),
                Err(_) => state.shrink_debt += 1,
            }
            state.current_limit -= 1;
            let change = LimitChange::Shrank { from, to: state.current_limit };
            log_change(change, mean);
            return Some(change);
        }

        None
    }

    pub fn current_limit(&self) -> usize {
        self.shared.state().current_limit
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.shared.state();
        AdmissionSnapshot {
            limit: state.current_limit,
            min: state.min_limit,
            max: state.max_limit,
            available: self.shared.semaphore.available_permits(),
            in_flight: self.shared.in_flight.load(Ordering::Relaxed),
            waiters: self.shared.waiters.load(Ordering::Relaxed),
            shrink_debt: state.shrink_debt,
            mean_latency_ms: state
                .mean_latency()
                .map(|mean| u64::try_from(mean.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

fn log_change(change: LimitChange, mean_secs: f64) {
    let (from, to) = match change {
        LimitChange::Grew { from, to } | LimitChange::Shrank { from, to } => (from, to),
    };
    tracing::info!(
        event_name = "admission.limit_resized",
        from,
        to,
        mean_latency_secs = mean_secs,
        "admission limit adjusted"
    );
}

/// A held admission slot. Released exactly once, when dropped.
pub struct AdmissionPermit {
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared>,
}

impl AdmissionPermit {
    pub fn release(self) {}
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::Relaxed);
        let Some(permit) = self.permit.take() else {
            return;
        };

        let mut state = self.shared.state();
        if state.shrink_debt > 0 {
            state.shrink_debt -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}

struct WaiterGuard<'a> {
    shared: &'a Shared,
}

impl<'a> WaiterGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        shared.waiters.fetch_add(1, Ordering::Relaxed);
        Self { shared }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.shared.waiters.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{AdmissionController, AdmissionError, AdmissionSnapshot, LimitChange};

    fn balanced(snapshot: &AdmissionSnapshot) -> bool {
        snapshot.available + snapshot.in_flight == snapshot.limit + snapshot.shrink_debt
    }

    #[test]
    fn fast_runs_grow_limit_one_step_at_a_time() {
        let controller = AdmissionController::new(5, 1, 20);

        let change = controller.record(Duration::from_millis(500));
        assert_eq!(change, Some(LimitChange::Grew { from: 5, to: 6 }));
        assert_eq!(controller.snapshot().available, 6);
    }

    #[test]
    fn slow_runs_shrink_limit_but_not_below_min() {
        let controller = AdmissionController::new(2, 1, 20);

        assert_eq!(
            controller.record(Duration::from_secs(3)),
            Some(LimitChange::Shrank { from: 2, to: 1 })
        );
        assert_eq!(controller.record(Duration::from_secs(3)), None);
        assert_eq!(controller.current_limit(), 1);
        assert_eq!(controller.snapshot().available, 1);
    }

    #[test]
    fn growth_stops_at_max() {
        let controller = AdmissionController::new(19, 1, 20);
        controller.record(Duration::from_millis(100));
        assert_eq!(controller.record(Duration::from_millis(100)), None);
        assert_eq!(controller.current_limit(), 20);
    }

    #[test]
    fn mid_band_mean_leaves_limit_unchanged() {
        let controller = AdmissionController::new(5, 1, 20);
        assert_eq!(controller.record(Duration::from_millis(1500)), None);
        assert_eq!(controller.current_limit(), 5);
    }

    #[test]
    fn latency_window_keeps_last_fifty_samples() {
        let controller = AdmissionController::new(10, 1, 20);
        for _ in 0..60 {
            controller.record(Duration::from_millis(1500));
        }
        assert_eq!(controller.shared.state().recent_latencies.len(), 50);
        assert_eq!(controller.snapshot().mean_latency_ms, Some(1500));
    }

    #[tokio::test]
    async fn shrink_with_no_idle_permit_is_paid_on_release() -> Result<(), AdmissionError> {
        let controller = AdmissionController::new(2, 1, 20);
        let first = controller.acquire().await?;
        let second = controller.acquire().await?;

        assert_eq!(
            controller.record(Duration::from_secs(5)),
            Some(LimitChange::Shrank { from: 2, to: 1 })
        );
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.shrink_debt, 1);
        assert!(balanced(&snapshot));

        drop(first);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.shrink_debt, 0);
        assert_eq!(snapshot.available, 0);
        assert!(balanced(&snapshot));

        second.release();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.available, 1);
        assert_eq!(snapshot.in_flight, 0);
        assert!(balanced(&snapshot));
        Ok(())
    }

    #[tokio::test]
    async fn growth_cancels_pending_debt_instead_of_adding_permits() -> Result<(), AdmissionError>
    {
        let controller = AdmissionController::new(1, 1, 3);
        let grown = controller.record(Duration::from_millis(100));
        assert_eq!(grown, Some(LimitChange::Grew { from: 1, to: 2 }));

        let first = controller.acquire().await?;
        let second = controller.acquire().await?;

        // Mean is now (0.1 + 9.9) / 2 = 5s.
        controller.record(Duration::from_millis(9_900));
        assert_eq!(controller.snapshot().shrink_debt, 1);

        // Bring the mean back under a second.
        for _ in 0..40 {
            controller.record(Duration::from_millis(10));
        }
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.limit, 3);
        assert_eq!(snapshot.shrink_debt, 0);
        assert!(balanced(&snapshot));

        drop(first);
        drop(second);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.available, 3);
        assert!(balanced(&snapshot));
        Ok(())
    }

    #[tokio::test]
    async fn waiters_survive_resize_and_are_served() -> Result<(), AdmissionError> {
        let controller = AdmissionController::new(1, 1, 4);
        let held = controller.acquire().await?;

        let queued = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.acquire().await.map(|permit| permit.release()) })
        };
        tokio::task::yield_now().await;
        while controller.snapshot().waiters == 0 {
            tokio::task::yield_now().await;
        }

        controller.record(Duration::from_millis(50));
        let served = queued.await;
        assert!(matches!(served, Ok(Ok(()))));

        drop(held);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.limit, 2);
        assert_eq!(snapshot.available, 2);
        assert_eq!(snapshot.waiters, 0);
        Ok(())
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_limit() -> Result<(), AdmissionError> {
        let controller = AdmissionController::new(3, 1, 3);
        let mut permits = Vec::new();
        for _ in 0..3 {
            permits.push(controller.acquire().await?);
        }
        assert_eq!(controller.snapshot().in_flight, 3);

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), controller.acquire()).await;
        assert!(blocked.is_err());

        permits.clear();
        assert_eq!(controller.snapshot().in_flight, 0);
        assert_eq!(controller.snapshot().available, 3);
        Ok(())
    }

    #[tokio::test]
    async fn random_interleavings_keep_slots_balanced() -> Result<(), AdmissionError> {
        let controller = AdmissionController::new(3, 1, 8);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut held = Vec::new();
        let (mut grew, mut shrank) = (0, 0);

        for step in 0..1000 {
            // Alternate fast and slow phases so the limit moves both ways.
            let slow_phase = (step / 300) % 2 == 1;
            match rng.gen_range(0..3) {
                0 if controller.snapshot().available > 0 => held.push(controller.acquire().await?),
                1 if !held.is_empty() => {
                    let index = rng.gen_range(0..held.len());
                    drop(held.swap_remove(index));
                }
                _ => {
                    let millis = if slow_phase {
                        rng.gen_range(2_100..5_000)
                    } else {
                        rng.gen_range(0..900)
                    };
                    match controller.record(Duration::from_millis(millis)) {
                        Some(LimitChange::Grew { .. }) => grew += 1,
                        Some(LimitChange::Shrank { .. }) => shrank += 1,
                        None => {}
                    }
                }
            }

            let snapshot = controller.snapshot();
            assert!(balanced(&snapshot), "step {step}: {snapshot:?}");
            assert!(snapshot.min <= snapshot.limit && snapshot.limit <= snapshot.max);
            assert_eq!(snapshot.in_flight, held.len());
        }
        assert!(grew > 0 && shrank > 0);

        held.clear();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.shrink_debt, 0);
        assert_eq!(snapshot.available, snapshot.limit);
        Ok(())
    }
}
