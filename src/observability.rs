use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

use crate::state::StateType;

/// Counters for one state machine
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub runs_started: AtomicU64,
    pub activations: AtomicU64,
    pub transitions: AtomicU64,
    pub forwarded_events: AtomicU64,
    pub completions: AtomicU64,
    pub stale_results: AtomicU64,
    pub feature_errors: AtomicU64,
    activation_times: Mutex<HashMap<StateType, ActivationTotals>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ActivationTotals {
    count: u64,
    total: Duration,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_result(&self) {
        self.stale_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feature_error(&self) {
        self.feature_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one activation of `state` stayed active.
    pub fn record_activation_time(&self, state: StateType, elapsed: Duration) {
        let mut times = self
            .activation_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let totals = times.entry(state).or_default();
        totals.count += 1;
        totals.total += elapsed;
    }

    /// Average active time of `state` over all recorded activations.
    pub fn average_activation_time(&self, state: StateType) -> Option<Duration> {
        let times = self
            .activation_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        times
            .get(&state)
            .filter(|totals| totals.count > 0)
            .map(|totals| totals.total / totals.count as u32)
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            forwarded_events: self.forwarded_events.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
            feature_errors: self.feature_errors.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Workflow metrics: runs={}, activations={}, transitions={}, forwarded={}, completions={}, stale={}, errors={}",
            stats.runs_started,
            stats.activations,
            stats.transitions,
            stats.forwarded_events,
            stats.completions,
            stats.stale_results,
            stats.feature_errors
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EngineStats {
    pub runs_started: u64,
    pub activations: u64,
    pub transitions: u64,
    pub forwarded_events: u64,
    pub completions: u64,
    pub stale_results: u64,
    pub feature_errors: u64,
}

/// Measures how long a feature stays active
pub struct ActivationTimer {
    state: StateType,
    start: Instant,
}

impl ActivationTimer {
    pub fn new(state: StateType) -> Self {
        Self {
            state,
            start: Instant::now(),
        }
    }

    pub fn state(&self) -> StateType {
        self.state
    }

    pub fn finish(self, metrics: &EngineMetrics) {
        let duration = self.start.elapsed();
        metrics.record_activation_time(self.state, duration);
        info!(
            state = %self.state,
            duration_ms = duration.as_millis() as u64,
            average_ms = metrics
                .average_activation_time(self.state)
                .map(|average| average.as_millis() as u64),
            "Feature activation finished"
        );
    }
}
