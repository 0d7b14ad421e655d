//! Adaptive timeout estimation
//!
//! Turns text length and the engine's measured speed into a wait budget
//! for a synchronous utterance.

use super::speed::SpeedModel;
use crate::config::DispatchSettings;

/// Guard against division by a zero speed or rate
const EPSILON: f64 = 1e-3;

/// Does the text contain Hiragana, Katakana or CJK ideographs?
///
/// These expand to more audible syllables per character than Latin text.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c, '\u{3040}'..='\u{30ff}' | '\u{4e00}'..='\u{9fff}')
    })
}

/// Timeout policy parameters, taken from [`DispatchSettings`]
#[derive(Debug, Clone, Copy)]
pub struct TimeoutEstimator {
    cjk_factor: f64,
    buffer_seconds: f64,
    min_timeout: f64,
    auto_cap_seconds: f64,
    default_timeout_seconds: f64,
}

impl TimeoutEstimator {
    pub fn new(settings: &DispatchSettings) -> Self {
        Self {
            cjk_factor: settings.cjk_factor,
            buffer_seconds: settings.buffer_seconds,
            min_timeout: settings.min_timeout,
            auto_cap_seconds: settings.auto_cap_seconds,
            default_timeout_seconds: settings.default_timeout_seconds,
        }
    }

    /// Estimate how long to wait for `text` on `engine` at `speed`
    ///
    /// `requested` is the caller's explicit timeout, `None` when the
    /// caller left it unset. Unset means auto mode: the result is floored
    /// to the auto cap so a long read is allowed to finish. An explicit
    /// value is honoured as given (subject to the estimate and the
    /// minimum floor).
    pub fn estimate(
        &self,
        speed_model: &SpeedModel,
        text: &str,
        requested: Option<f64>,
        engine: &str,
        speed: f64,
    ) -> f64 {
        let factor = if contains_cjk(text) { self.cjk_factor } else { 1.0 };
        let cps = speed_model.cps(engine) * speed.max(EPSILON);
        let chars = text.chars().count() as f64;

        let base = requested.unwrap_or(self.default_timeout_seconds);
        let est = (chars * factor / cps.max(EPSILON) + self.buffer_seconds)
            .max(base)
            .max(self.min_timeout);

        match requested {
            Some(_) => est,
            None => est.max(self.auto_cap_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (TimeoutEstimator, SpeedModel) {
        let settings = DispatchSettings::default();
        (
            TimeoutEstimator::new(&settings),
            SpeedModel::new(settings.default_cps, settings.smoothing),
        )
    }

    #[test]
    fn test_auto_mode_floors_to_cap() {
        let (est, model) = fixture();
        let t = est.estimate(&model, "Hello world", None, "say", 1.0);
        assert_eq!(t, 300.0);
    }

    #[test]
    fn test_explicit_timeout_skips_cap() {
        let (est, model) = fixture();
        let t = est.estimate(&model, "Hello world", Some(5.0), "say", 1.0);
        assert_eq!(t, 5.0);
    }

    #[test]
    fn test_explicit_timeout_below_minimum() {
        let (est, model) = fixture();
        let t = est.estimate(&model, "Hi", Some(1.0), "say", 1.0);
        assert_eq!(t, 5.0);
    }

    #[test]
    fn test_long_text_exceeds_cap() {
        let (est, model) = fixture();
        let text = "a".repeat(6 * 400);
        // 2400 chars at 6 cps = 400s + 2s buffer
        let t = est.estimate(&model, &text, None, "say", 1.0);
        assert!((t - 402.0).abs() < 1e-9);
    }

    #[test]
    fn test_cjk_slowdown() {
        let (est, model) = fixture();
        let latin = "a".repeat(60);
        let kana = "あ".repeat(60);
        let t_latin = est.estimate(&model, &latin, Some(5.0), "say", 1.0);
        let t_kana = est.estimate(&model, &kana, Some(5.0), "say", 1.0);
        assert!((t_latin - 12.0).abs() < 1e-9);
        assert!((t_kana - (60.0 * 1.35 / 6.0 + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_speed_shortens_estimate() {
        let (est, model) = fixture();
        let text = "a".repeat(120);
        let normal = est.estimate(&model, &text, Some(5.0), "say", 1.0);
        let fast = est.estimate(&model, &text, Some(5.0), "say", 2.0);
        assert!(fast < normal);
    }

    #[test]
    fn test_monotonic_and_floored() {
        let (est, model) = fixture();
        for requested in [None, Some(0.0), Some(5.0), Some(42.0)] {
            let mut prev = 0.0;
            for len in [0, 1, 10, 100, 1000, 5000] {
                let text = "x".repeat(len);
                let t = est.estimate(&model, &text, requested, "espeak", 1.5);
                assert!(t >= prev);
                assert!(t >= requested.unwrap_or(20.0).max(5.0));
                prev = t;
            }
        }
    }

    #[test]
    fn test_detect_cjk() {
        assert!(contains_cjk("ひらがな"));
        assert!(contains_cjk("カタカナ"));
        assert!(contains_cjk("漢字"));
        assert!(!contains_cjk("Hello, café"));
    }
}
