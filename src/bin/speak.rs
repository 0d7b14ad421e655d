//! One-shot command line speaker
//!
//! `agent-say-speak [--speed <multiplier>] <text...>` speaks the text
//! through the same dispatcher the server uses and waits for it to finish.

use agent_say::config::Config;
use agent_say::platform::ensure_scratch_dir;
use agent_say::speech::{Dispatcher, SpeakOutcome, SpeechRequest};
use agent_say::SayError;
use anyhow::{bail, Context};
use log::warn;
use std::process;

const USAGE: &str = "Usage: agent-say-speak [--speed <multiplier>] <text_to_speak>";

/// Parsed command line
#[derive(Debug, PartialEq)]
struct Args {
    speed: f64,
    text: String,
}

/// Parse failures, mapped to distinct exit codes
#[derive(Debug, PartialEq)]
enum ArgError {
    /// Nothing given at all
    Usage,
    /// Arguments present but not usable
    Invalid(String),
}

fn parse_args(args: &[String]) -> Result<Args, ArgError> {
    if args.is_empty() {
        return Err(ArgError::Usage);
    }

    let mut rest = args;
    let mut speed = 1.0;
    if rest.len() >= 2 && rest[0] == "--speed" {
        speed = rest[1].parse::<f64>().map_err(|_| {
            ArgError::Invalid("invalid --speed value (must be a number)".to_string())
        })?;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ArgError::Invalid(
                "invalid --speed value (must be positive)".to_string(),
            ));
        }
        rest = &rest[2..];
    }

    if rest.is_empty() {
        return Err(ArgError::Invalid("text is required".to_string()));
    }

    Ok(Args {
        speed,
        text: rest.join(" "),
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(ArgError::Usage) => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
        Err(ArgError::Invalid(message)) => {
            eprintln!("Error: {}", message);
            process::exit(2);
        }
    };

    match run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(args: Args) -> anyhow::Result<i32> {
    if let Err(e) = ensure_scratch_dir() {
        warn!("Could not prepare scratch directory: {}", e);
    }

    let config = Config::load().context("loading configuration")?;
    let dispatcher = Dispatcher::new(config.settings());

    let request = SpeechRequest::with_settings(args.text, dispatcher.settings())
        .speed(args.speed)
        .wait(true)
        .dedupe(0.0);

    let outcome = dispatcher.speak(&request);
    println!("{}", outcome);

    match outcome {
        SpeakOutcome::Rejected(SayError::Validation(_)) => Ok(2),
        SpeakOutcome::Rejected(SayError::EngineUnavailable) => {
            bail!("no suitable speech engine found (say, swift or espeak)")
        }
        ref other if other.is_error() => Ok(1),
        _ => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_plain_text() {
        let args = parse_args(&strings(&["hello", "there"])).unwrap();
        assert_eq!(args.speed, 1.0);
        assert_eq!(args.text, "hello there");
    }

    #[test]
    fn test_parse_speed() {
        let args = parse_args(&strings(&["--speed", "1.5", "hi"])).unwrap();
        assert_eq!(args.speed, 1.5);
        assert_eq!(args.text, "hi");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_args(&[]), Err(ArgError::Usage));
        assert!(matches!(
            parse_args(&strings(&["--speed", "fast", "hi"])),
            Err(ArgError::Invalid(_))
        ));
        assert!(matches!(
            parse_args(&strings(&["--speed", "-1", "hi"])),
            Err(ArgError::Invalid(_))
        ));
        assert!(matches!(
            parse_args(&strings(&["--speed", "2"])),
            Err(ArgError::Invalid(_))
        ));
    }
}
