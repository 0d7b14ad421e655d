//! Speech request parameters

use super::engine::EngineChoice;
use crate::config::DispatchSettings;

/// One "speak this text" request
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    /// Raw text; markdown is stripped by the dispatcher
    pub text: String,
    pub engine: EngineChoice,
    /// Rate multiplier, 1.0 = engine default
    pub speed: f64,
    /// Explicit wait budget hint, `None` for auto mode
    pub timeout_seconds: Option<f64>,
    /// Speak a throwaway utterance first to absorb engine startup
    pub warmup: bool,
    pub wait_for_completion: bool,
    /// Duplicate suppression window; zero or less disables it
    pub dedupe_seconds: f64,
    /// Absolute timeout backstop
    pub hard_timeout_seconds: f64,
}

impl SpeechRequest {
    /// Request with the documented defaults
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_settings(text, &DispatchSettings::default())
    }

    /// Request with defaults taken from settings
    pub fn with_settings(text: impl Into<String>, settings: &DispatchSettings) -> Self {
        Self {
            text: text.into(),
            engine: EngineChoice::Auto,
            speed: 1.0,
            timeout_seconds: None,
            warmup: false,
            wait_for_completion: false,
            dedupe_seconds: settings.default_dedupe_seconds,
            hard_timeout_seconds: settings.hard_timeout_seconds,
        }
    }

    pub fn engine(mut self, engine: EngineChoice) -> Self {
        self.engine = engine;
        self
    }

    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn warmup(mut self, warmup: bool) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn dedupe(mut self, seconds: f64) -> Self {
        self.dedupe_seconds = seconds;
        self
    }

    pub fn hard_timeout(mut self, seconds: f64) -> Self {
        self.hard_timeout_seconds = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let req = SpeechRequest::new("Hello");
        assert_eq!(req.engine, EngineChoice::Auto);
        assert_eq!(req.speed, 1.0);
        assert_eq!(req.timeout_seconds, None);
        assert!(!req.warmup);
        assert!(!req.wait_for_completion);
        assert_eq!(req.dedupe_seconds, 30.0);
        assert_eq!(req.hard_timeout_seconds, 600.0);
    }

    #[test]
    fn test_builder() {
        let req = SpeechRequest::new("Hello")
            .engine(EngineChoice::Espeak)
            .speed(1.5)
            .timeout(5.0)
            .wait(true)
            .dedupe(0.0);
        assert_eq!(req.engine, EngineChoice::Espeak);
        assert_eq!(req.timeout_seconds, Some(5.0));
        assert!(req.wait_for_completion);
        assert_eq!(req.dedupe_seconds, 0.0);
    }
}
