#![forbid(unsafe_code)]

//! tally demo binary entry point.

use tally_demo::cli;
use tally_demo::run::{self, DemoEvent};
use tally_runtime::SessionConfig;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_event(event: &DemoEvent, jsonl: bool) {
    if jsonl {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Failed to encode event: {e}"),
        }
    } else {
        println!("{event}");
    }
}

fn main() {
    init_tracing();
    let opts = cli::Opts::parse();

    let parsed = SessionConfig::from_env_with(|key| std::env::var(key).ok());
    for err in &parsed.errors {
        warn!(field = err.field, value = %err.value, "ignoring invalid setting: {}", err.message);
    }
    let config = run::session_config(&opts, parsed.config);
    if let Err(errors) = config.validate() {
        for err in errors {
            eprintln!("Invalid configuration: {err}");
        }
        std::process::exit(1);
    }

    match run::run(&opts, &config) {
        Ok(events) => {
            for event in &events {
                print_event(event, opts.jsonl);
            }
        }
        Err(e) => {
            eprintln!("Demo error: {e}");
            std::process::exit(1);
        }
    }
}
