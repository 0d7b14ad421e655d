//! Per-engine speaking speed model
//!
//! Keeps an exponential moving average of characters per second for each
//! engine, normalised to speed 1.0. The timeout estimator uses it to
//! guess how long an utterance will take.

use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

/// Smoothed chars/sec estimates keyed by engine name
pub struct SpeedModel {
    profiles: Mutex<HashMap<String, f64>>,

    /// Value reported for an engine with no measurements
    fallback_cps: f64,

    /// Weight of a new sample (0..=1)
    smoothing: f64,
}

impl SpeedModel {
    pub fn new(fallback_cps: f64, smoothing: f64) -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
            fallback_cps,
            smoothing,
        }
    }

    /// Current chars/sec estimate for an engine
    pub fn cps(&self, engine: &str) -> f64 {
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles.get(engine).copied().unwrap_or(self.fallback_cps)
    }

    /// Fold a measurement into the engine's average
    ///
    /// `measured_cps` must already be divided by the requested speed
    /// multiplier. Non-positive and non-finite samples are dropped.
    pub fn update(&self, engine: &str, measured_cps: f64) {
        if !measured_cps.is_finite() || measured_cps <= 0.0 {
            return;
        }

        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let entry = profiles
            .entry(engine.to_string())
            .or_insert(self.fallback_cps);
        *entry = *entry * (1.0 - self.smoothing) + measured_cps * self.smoothing;
        debug!("Speed profile for {} is now {:.2} cps", engine, *entry);
    }
}
