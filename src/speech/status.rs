//! Human-readable status text returned to the caller
//!
//! Every domain outcome, success or not, reaches the agent as one line of
//! text: a short sentence plus a parenthesised summary of the parameters
//! that were in effect.

use crate::SayError;
use std::fmt;

/// Format a number like C's `%g` (six significant digits, no trailing zeros)
pub fn fmt_g(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let exp = value.abs().log10().floor() as i32;
    if !(-4..6).contains(&exp) {
        let sci = format!("{:.5e}", value);
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", trim_zeros(mantissa), sign, exponent.abs());
    }

    let decimals = (5 - exp).max(0) as usize;
    trim_zeros(&format!("{:.*}", decimals, value)).to_string()
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Whether the caller waits for the utterance to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sync,
    Async,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        })
    }
}

/// Parameters in effect for a request, rendered as `(key=value, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDetails {
    pub engine: String,
    pub mode: Mode,
    pub speed: f64,
    pub hard_timeout: f64,
    pub dedupe: f64,
    pub concurrency: usize,
    /// Caller's timeout; `None` means auto mode
    pub timeout: Option<f64>,
    /// Timeout handed to the runner
    pub timeout_used: Option<f64>,
    /// Adaptive estimate (sync mode only)
    pub dynamic_timeout: Option<f64>,
}

impl fmt::Display for StatusDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timeout = match self.timeout {
            Some(t) => format!("{}s", fmt_g(t)),
            None => "auto".to_string(),
        };

        write!(
            f,
            "(engine={}, mode={}, speed={}x, hard_timeout={}s, dedupe={}s, concurrency={}",
            self.engine,
            self.mode,
            fmt_g(self.speed),
            fmt_g(self.hard_timeout),
            fmt_g(self.dedupe),
            self.concurrency
        )?;

        match self.mode {
            Mode::Sync => {
                write!(f, ", timeout_seconds={}", timeout)?;
                if let Some(dynamic) = self.dynamic_timeout {
                    write!(f, ", dynamic_timeout={}s", fmt_g(dynamic))?;
                }
                if let Some(used) = self.timeout_used {
                    write!(f, ", timeout_used={}s", fmt_g(used))?;
                }
            }
            Mode::Async => write!(f, ", timeout_seconds={}(ignored)", timeout)?,
        }

        f.write_str(")")
    }
}

/// Final result of a `speak` call
#[derive(Debug)]
pub enum SpeakOutcome {
    /// Refused before any engine work (bad input, no engine)
    Rejected(SayError),
    AlreadyRunning(StatusDetails),
    Deduped(StatusDetails),
    Busy(StatusDetails),
    /// Fire-and-forget run scheduled
    Started(StatusDetails),
    /// Synchronous run finished successfully
    Spoken(StatusDetails),
    TimedOut(SayError, StatusDetails),
    /// Process was stopped by a signal (usually `stop_speech`)
    Stopped(i32, StatusDetails),
    /// Engine could not be run or exited non-zero
    Failed(SayError),
}

impl SpeakOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SpeakOutcome::Started(_) | SpeakOutcome::Spoken(_))
    }

    /// Whether the caller should treat this as a failed call
    ///
    /// Dedupe and busy results are not errors: nothing went wrong, the
    /// request was just not needed or not possible right now.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SpeakOutcome::Rejected(_) | SpeakOutcome::Failed(_) | SpeakOutcome::TimedOut(..)
        )
    }
}

impl fmt::Display for SpeakOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakOutcome::Rejected(e) | SpeakOutcome::Failed(e) => write!(f, "{}", e),
            SpeakOutcome::AlreadyRunning(s) => write!(f, "Speech already running {}", s),
            SpeakOutcome::Deduped(s) => write!(f, "Speech request deduped {}", s),
            SpeakOutcome::Busy(s) => {
                write!(f, "Speech busy (too many concurrent requests) {}", s)
            }
            SpeakOutcome::Started(s) => write!(f, "Speech started {}", s),
            SpeakOutcome::Spoken(s) => write!(f, "Spoken {}", s),
            SpeakOutcome::TimedOut(e, s) => write!(f, "{} {}", e, s),
            SpeakOutcome::Stopped(sig, s) => write!(f, "Speech stopped by signal {} {}", sig, s),
        }
    }
}
