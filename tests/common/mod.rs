//! Shared helpers: shell-script speech engines in a temp directory

#![allow(dead_code)]

use agent_say::config::DispatchSettings;
use agent_say::speech::{Dispatcher, Engine, EngineChoice, EngineRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A fake engine: `sh <script>` with the text as `$1`
///
/// Scripts are run through `sh` rather than executed directly, so a
/// freshly written file never trips "text file busy".
pub struct ScriptEngine {
    command: Vec<String>,
}

impl ScriptEngine {
    pub fn new(script: &Path) -> Self {
        Self {
            command: vec!["sh".to_string(), script.to_string_lossy().into_owned()],
        }
    }

    /// An engine whose program does not exist
    pub fn missing() -> Self {
        Self {
            command: vec!["/nonexistent/agent-say-engine".to_string()],
        }
    }
}

impl Engine for ScriptEngine {
    fn choice(&self) -> EngineChoice {
        EngineChoice::Say
    }

    fn locate(&self) -> Option<Vec<String>> {
        Some(self.command.clone())
    }

    fn rate_args(&self, _speed: f64, _wpm: u32) -> Vec<String> {
        Vec::new()
    }
}

/// Write a script body into `dir`
pub fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path
}

/// Settings with a short stop grace so tests finish quickly
pub fn test_settings() -> DispatchSettings {
    DispatchSettings {
        grace: Duration::from_millis(200),
        ..DispatchSettings::default()
    }
}

pub fn dispatcher_with(settings: DispatchSettings, engine: ScriptEngine) -> Dispatcher {
    let wpm = settings.default_wpm;
    Dispatcher::with_engines(settings, EngineRegistry::new(vec![Box::new(engine)], wpm))
}

pub fn dispatcher_for(script: &Path) -> Dispatcher {
    dispatcher_with(test_settings(), ScriptEngine::new(script))
}

/// Poll `cond` until it holds or `limit` passes
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
