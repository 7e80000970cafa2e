#![forbid(unsafe_code)]

//! Command-line argument parsing for the tally demo.
//!
//! Parses args by hand. Environment variables with the `TALLY_DEMO_*` prefix
//! provide defaults; explicit flags win.

use std::env;
use std::process;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP_TEXT: &str = "\
tally demo: counter, keyed lookup and background work in one session

USAGE:
    tally-demo [OPTIONS]

OPTIONS:
    --initial=N          Starting counter value (default: TALLY_INITIAL_COUNT or 0)
    --increments=N       Number of increments to apply (default: 2)
    --reset              Reset the counter after incrementing
    --key=ID             User id to look up; repeat to fire keys back to back
    --latency-ms=N       Simulated directory latency in ms (default: 20)
    --stagger-ms=N       Extra delay for every key but the last (default: 0)
    --timeout-ms=N       Resolve timeout in ms, 0 disables (default: TALLY_RESOLVE_TIMEOUT_MS or 10000)
    --no-work            Skip the background work stub
    --jsonl              Print events as JSON lines
    --help, -h           Show this help message
    --version, -V        Show version

ENVIRONMENT VARIABLES:
    TALLY_DEMO_INITIAL      Override --initial
    TALLY_DEMO_INCREMENTS   Override --increments
    TALLY_DEMO_KEYS         Comma-separated user ids (like repeated --key)
    TALLY_DEMO_LATENCY_MS   Override --latency-ms
    TALLY_DEMO_JSONL        Print JSON lines (1/true)
    RUST_LOG                Log filter (default: warn)";

/// Parsed command-line options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Counter start value; `None` defers to `SessionConfig`.
    pub initial: Option<i64>,
    pub increments: u32,
    pub reset: bool,
    /// Keys to look up, in order.
    pub keys: Vec<String>,
    pub latency_ms: u64,
    pub stagger_ms: u64,
    /// Resolve timeout; `Some(0)` disables, `None` defers to `SessionConfig`.
    pub timeout_ms: Option<u64>,
    pub work: bool,
    pub jsonl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseError {
    Help,
    Version,
    InvalidValue { flag: &'static str, value: String },
    UnknownArg(String),
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            initial: None,
            increments: 2,
            reset: false,
            keys: Vec::new(),
            latency_ms: 20,
            stagger_ms: 0,
            timeout_ms: None,
            work: true,
            jsonl: false,
        }
    }
}

fn is_truthy(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

fn parse_value<T: std::str::FromStr>(flag: &'static str, val: &str) -> Result<T, ParseError> {
    val.parse().map_err(|_| ParseError::InvalidValue {
        flag,
        value: val.to_string(),
    })
}

impl Opts {
    /// Parse command-line arguments and environment variables.
    pub fn parse() -> Self {
        match Self::parse_from_env_and_args(env::args().skip(1), |key| env::var(key).ok()) {
            Ok(opts) => opts,
            Err(ParseError::Help) => {
                println!("{HELP_TEXT}");
                process::exit(0);
            }
            Err(ParseError::Version) => {
                println!("tally-demo {VERSION}");
                process::exit(0);
            }
            Err(ParseError::InvalidValue { flag, value }) => {
                eprintln!("Invalid {flag} value: {value}");
                process::exit(1);
            }
            Err(ParseError::UnknownArg(arg)) => {
                eprintln!("Unknown argument: {arg}");
                eprintln!("Run with --help for usage information.");
                process::exit(1);
            }
        }
    }

    fn parse_from_env_and_args<I, S, F>(args: I, get_env: F) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> Option<String>,
    {
        let mut opts = Self::default();

        if let Some(val) = get_env("TALLY_DEMO_INITIAL")
            && let Ok(n) = val.trim().parse()
        {
            opts.initial = Some(n);
        }
        if let Some(val) = get_env("TALLY_DEMO_INCREMENTS")
            && let Ok(n) = val.trim().parse()
        {
            opts.increments = n;
        }
        if let Some(val) = get_env("TALLY_DEMO_KEYS") {
            opts.keys = val
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(val) = get_env("TALLY_DEMO_LATENCY_MS")
            && let Ok(n) = val.trim().parse()
        {
            opts.latency_ms = n;
        }
        if let Some(val) = get_env("TALLY_DEMO_JSONL") {
            opts.jsonl = is_truthy(&val);
        }

        // Explicit --key flags replace env keys rather than appending.
        let mut cli_keys: Vec<String> = Vec::new();
        for arg in args {
            let arg = arg.as_ref();
            match arg {
                "--help" | "-h" => return Err(ParseError::Help),
                "--version" | "-V" => return Err(ParseError::Version),
                "--reset" => opts.reset = true,
                "--no-work" => opts.work = false,
                "--jsonl" => opts.jsonl = true,
                other => {
                    if let Some(val) = other.strip_prefix("--initial=") {
                        opts.initial = Some(parse_value("--initial", val)?);
                    } else if let Some(val) = other.strip_prefix("--increments=") {
                        opts.increments = parse_value("--increments", val)?;
                    } else if let Some(val) = other.strip_prefix("--key=") {
                        if val.trim().is_empty() {
                            return Err(ParseError::InvalidValue {
                                flag: "--key",
                                value: val.to_string(),
                            });
                        }
                        cli_keys.push(val.trim().to_string());
                    } else if let Some(val) = other.strip_prefix("--latency-ms=") {
                        opts.latency_ms = parse_value("--latency-ms", val)?;
                    } else if let Some(val) = other.strip_prefix("--stagger-ms=") {
                        opts.stagger_ms = parse_value("--stagger-ms", val)?;
                    } else if let Some(val) = other.strip_prefix("--timeout-ms=") {
                        opts.timeout_ms = Some(parse_value("--timeout-ms", val)?);
                    } else {
                        return Err(ParseError::UnknownArg(other.to_string()));
                    }
                }
            }
        }
        if !cli_keys.is_empty() {
            opts.keys = cli_keys;
        }

        Ok(opts)
    }
}
