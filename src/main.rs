//! tidyguard - CLI entry point.
//!
//! Thin wrapper around the library: parses arguments, loads configuration,
//! sets up logging and Ctrl-C handling, then dispatches the command.

use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tidyguard::cli::{Args, run_command};
use tidyguard::config::Config;
use tidyguard::output::OutputFormatter;

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            OutputFormatter::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    Builder::from_env(Env::default().default_filter_or(&config.logging.level)).init();

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if handler_flag.load(Ordering::SeqCst) {
            eprintln!("\nForce shutdown requested. Exiting immediately...");
            std::process::exit(130);
        } else {
            handler_flag.store(true, Ordering::SeqCst);
            eprintln!(
                "\nStopping after the current file... (Press Ctrl+C again to force quit)"
            );
        }
    })?;

    run_command(&args, &config, cancel)
}
