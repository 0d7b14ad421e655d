//! Speech engine discovery
//!
//! Each engine knows how to find itself and how to ask for a speaking
//! rate. The registry tries them in priority order:
//!
//! 1. `say` (macOS built-in)
//! 2. `swift_tts.swift` (AVFoundation script shipped next to the binary)
//! 3. `espeak` (Linux)
//!
//! An explicit engine choice never falls back to a different engine.

use crate::config::DispatchSettings;
use crate::platform::install_dir;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lowest and highest words-per-minute passed to an engine
const MIN_WPM: u32 = 80;
const MAX_WPM: u32 = 600;

/// Engine requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    #[default]
    Auto,
    Say,
    Swift,
    Espeak,
}

impl fmt::Display for EngineChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineChoice::Auto => "auto",
            EngineChoice::Say => "say",
            EngineChoice::Swift => "swift",
            EngineChoice::Espeak => "espeak",
        };
        f.write_str(name)
    }
}

/// A text-to-speech program we can launch
pub trait Engine: Send + Sync {
    /// Which caller choice selects this engine
    fn choice(&self) -> EngineChoice;

    /// Base command vector if the engine is installed, else `None`
    fn locate(&self) -> Option<Vec<String>>;

    /// Extra arguments that set the speaking rate
    fn rate_args(&self, speed: f64, wpm: u32) -> Vec<String>;
}

/// Engine found on `PATH` that takes a words-per-minute flag
pub struct PathEngine {
    choice: EngineChoice,
    program: &'static str,
    rate_flag: &'static str,
}

impl PathEngine {
    pub fn say() -> Self {
        Self {
            choice: EngineChoice::Say,
            program: "say",
            rate_flag: "-r",
        }
    }

    pub fn espeak() -> Self {
        Self {
            choice: EngineChoice::Espeak,
            program: "espeak",
            rate_flag: "-s",
        }
    }
}

impl Engine for PathEngine {
    fn choice(&self) -> EngineChoice {
        self.choice
    }

    fn locate(&self) -> Option<Vec<String>> {
        match which::which(self.program) {
            Ok(path) => {
                debug!("Found {} at {}", self.program, path.display());
                Some(vec![self.program.to_string()])
            }
            Err(_) => None,
        }
    }

    fn rate_args(&self, _speed: f64, wpm: u32) -> Vec<String> {
        vec![self.rate_flag.to_string(), wpm.to_string()]
    }
}

/// The Swift AVFoundation script
pub struct SwiftEngine {
    script: PathBuf,
}

impl SwiftEngine {
    pub fn new(script: PathBuf) -> Self {
        Self { script }
    }

    /// Script path from settings, or next to the installed binary
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        let script = settings
            .swift_script
            .clone()
            .unwrap_or_else(|| install_dir().join("swift_tts.swift"));
        Self::new(script)
    }
}

impl Engine for SwiftEngine {
    fn choice(&self) -> EngineChoice {
        EngineChoice::Swift
    }

    fn locate(&self) -> Option<Vec<String>> {
        if self.script.exists() {
            Some(vec![self.script.to_string_lossy().into_owned()])
        } else {
            None
        }
    }

    fn rate_args(&self, speed: f64, _wpm: u32) -> Vec<String> {
        vec!["--speed".to_string(), crate::speech::status::fmt_g(speed)]
    }
}

/// A resolved engine invocation
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedEngine {
    /// Canonical name: file name of the program
    pub name: String,
    /// Program followed by its arguments; the text is appended at run time
    pub command: Vec<String>,
}

/// Words per minute for a speed multiplier, clamped to a sane range
pub fn words_per_minute(default_wpm: u32, speed: f64) -> u32 {
    let wpm = (default_wpm as f64 * speed).round();
    if wpm.is_nan() {
        return default_wpm.clamp(MIN_WPM, MAX_WPM);
    }
    (wpm.clamp(MIN_WPM as f64, MAX_WPM as f64)) as u32
}

/// Ordered list of engines, first available wins
pub struct EngineRegistry {
    engines: Vec<Box<dyn Engine>>,
    default_wpm: u32,
}

impl EngineRegistry {
    pub fn new(engines: Vec<Box<dyn Engine>>, default_wpm: u32) -> Self {
        Self {
            engines,
            default_wpm,
        }
    }

    /// say, swift, espeak
    pub fn standard(settings: &DispatchSettings) -> Self {
        Self::new(
            vec![
                Box::new(PathEngine::say()),
                Box::new(SwiftEngine::from_settings(settings)),
                Box::new(PathEngine::espeak()),
            ],
            settings.default_wpm,
        )
    }

    /// Resolve a caller's choice to a runnable command
    ///
    /// Speed 1.0 adds no rate arguments, so the engine's own default
    /// rate is used.
    pub fn select(&self, choice: EngineChoice, speed: f64) -> Option<SelectedEngine> {
        let engine = self
            .engines
            .iter()
            .filter(|e| choice == EngineChoice::Auto || e.choice() == choice)
            .find_map(|e| e.locate().map(|cmd| (e, cmd)));

        let Some((engine, mut command)) = engine else {
            debug!("No engine available for choice {}", choice);
            return None;
        };

        let name = command
            .first()
            .map(|program| {
                Path::new(program)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| program.clone())
            })
            .unwrap_or_default();

        if speed != 1.0 {
            let wpm = words_per_minute(self.default_wpm, speed);
            command.extend(engine.rate_args(speed, wpm));
        }

        Some(SelectedEngine { name, command })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEngine {
        choice: EngineChoice,
        program: Option<&'static str>,
    }

    impl Engine for FakeEngine {
        fn choice(&self) -> EngineChoice {
            self.choice
        }

        fn locate(&self) -> Option<Vec<String>> {
            self.program.map(|p| vec![p.to_string()])
        }

        fn rate_args(&self, _speed: f64, wpm: u32) -> Vec<String> {
            vec!["-r".to_string(), wpm.to_string()]
        }
    }

    fn registry(say: bool, swift: bool, espeak: bool) -> EngineRegistry {
        EngineRegistry::new(
            vec![
                Box::new(FakeEngine {
                    choice: EngineChoice::Say,
                    program: say.then_some("say"),
                }),
                Box::new(FakeEngine {
                    choice: EngineChoice::Swift,
                    program: swift.then_some("/opt/agent-say/swift_tts.swift"),
                }),
                Box::new(FakeEngine {
                    choice: EngineChoice::Espeak,
                    program: espeak.then_some("espeak"),
                }),
            ],
            175,
        )
    }

    #[test]
    fn test_auto_priority() {
        let sel = registry(true, true, true).select(EngineChoice::Auto, 1.0).unwrap();
        assert_eq!(sel.name, "say");
        let sel = registry(false, true, true).select(EngineChoice::Auto, 1.0).unwrap();
        assert_eq!(sel.name, "swift_tts.swift");
        let sel = registry(false, false, true).select(EngineChoice::Auto, 1.0).unwrap();
        assert_eq!(sel.name, "espeak");
        assert!(registry(false, false, false).select(EngineChoice::Auto, 1.0).is_none());
    }

    #[test]
    fn test_explicit_choice_does_not_fall_back() {
        assert!(registry(false, true, true).select(EngineChoice::Say, 1.0).is_none());
        let sel = registry(true, true, true).select(EngineChoice::Espeak, 1.0).unwrap();
        assert_eq!(sel.command, vec!["espeak".to_string()]);
    }

    #[test]
    fn test_rate_args_only_off_default_speed() {
        let reg = registry(true, false, false);
        assert_eq!(reg.select(EngineChoice::Say, 1.0).unwrap().command, vec!["say"]);
        assert_eq!(
            reg.select(EngineChoice::Say, 2.0).unwrap().command,
            vec!["say", "-r", "350"]
        );
    }

    #[test]
    fn test_words_per_minute_clamps() {
        assert_eq!(words_per_minute(175, 1.0), 175);
        assert_eq!(words_per_minute(175, 0.25), 80);
        assert_eq!(words_per_minute(175, 4.0), 600);
        assert_eq!(words_per_minute(175, 1.5), 263);
    }

    #[test]
    fn test_real_engine_args() {
        assert_eq!(PathEngine::say().rate_args(2.0, 350), vec!["-r", "350"]);
        assert_eq!(PathEngine::espeak().rate_args(2.0, 350), vec!["-s", "350"]);
        let swift = SwiftEngine::new(PathBuf::from("/nonexistent/swift_tts.swift"));
        assert_eq!(swift.rate_args(1.5, 263), vec!["--speed", "1.5"]);
        assert!(swift.locate().is_none());
    }

    #[test]
    fn test_choice_from_json() {
        let choice: EngineChoice = serde_json::from_str("\"espeak\"").unwrap();
        assert_eq!(choice, EngineChoice::Espeak);
        assert!(serde_json::from_str::<EngineChoice>("\"festival\"").is_err());
    }
}
