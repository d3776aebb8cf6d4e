//! Latencytester - acoustic round-trip latency measurement
//!
//! Entry point for the command-line tool.

use anyhow::{bail, Context, Result};
use latencytester::audio::engine::LatencyEngine;
use latencytester::latency::{LatencyConfig, LatencyEvent, LatencyState};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Parsed command line
#[derive(Debug, Default)]
struct Options {
    device: Option<String>,
    sample_rate: Option<u32>,
    period_size: Option<usize>,
    trials: Option<usize>,
    silence_guard: Option<u32>,
    config_path: Option<PathBuf>,
    report_path: Option<PathBuf>,
    save_config: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("latencytester=info".parse()?)
                .add_directive("latencytester_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list_devices()?;
                return Ok(());
            }
            "--version" | "-v" => {
                println!(
                    "latencytester {} ({})",
                    latencytester::VERSION,
                    latencytester::BUILD_DATE
                );
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--device" | "-d" => options.device = Some(value::<String>(&args, i)?),
            "--sample-rate" | "-r" => options.sample_rate = Some(value(&args, i)?),
            "--period" | "-p" => options.period_size = Some(value(&args, i)?),
            "--trials" | "-n" => options.trials = Some(value(&args, i)?),
            "--silence-guard" | "-g" => options.silence_guard = Some(value(&args, i)?),
            "--config" | "-c" => options.config_path = Some(value(&args, i)?),
            "--report" | "-o" => options.report_path = Some(value(&args, i)?),
            "--save-config" => {
                options.save_config = true;
                i += 1;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                bail!("invalid arguments");
            }
        }
        i += 2;
    }

    run(options)
}

/// Parse the value following the flag at `args[i]`
fn value<T: FromStr>(args: &[String], i: usize) -> Result<T> {
    let flag = &args[i];
    let raw = args
        .get(i + 1)
        .with_context(|| format!("{} requires a value", flag))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", flag, raw))
}

fn print_help() {
    println!("Usage: latencytester [OPTIONS]");
    println!();
    println!("Measures round-trip latency through a speaker/microphone loopback.");
    println!();
    println!("Options:");
    println!("  -l, --list                List available audio devices");
    println!("  -d, --device NAME         Use the named device (default: host default)");
    println!("  -r, --sample-rate RATE    Sample rate in Hz");
    println!("  -p, --period FRAMES       Frames per period");
    println!("  -n, --trials COUNT        Number of trials to average");
    println!("  -g, --silence-guard N     Silent output periods before each probe");
    println!("  -c, --config PATH         Config file (default: user config dir)");
    println!("      --save-config         Write the effective config back to disk");
    println!("  -o, --report PATH         Write a JSON report of the run");
    println!("  -v, --version             Show version");
    println!("  -h, --help                Show this help");
    println!();
    println!("Examples:");
    println!("  latencytester -r 48000 -p 256");
    println!("  latencytester -d \"USB Audio\" -n 10 -o report.json");
}

fn list_devices() -> Result<()> {
    let devices = LatencyEngine::list_devices()?;
    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    println!();
    for (i, device) in devices.iter().enumerate() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}. {}{}", i + 1, device.name, default_marker);
        println!(
            "     Channels: {} in, {} out",
            device.input_channels, device.output_channels
        );
        if !device.sample_rates.is_empty() {
            println!("     Sample rates: {:?}", device.sample_rates);
        }
    }
    Ok(())
}

/// Apply command-line overrides on top of the loaded config
fn effective_config(options: &Options, mut config: LatencyConfig) -> LatencyConfig {
    if let Some(rate) = options.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(period) = options.period_size {
        config.period_size = period;
    }
    if let Some(trials) = options.trials {
        config.trials = trials;
    }
    if let Some(guard) = options.silence_guard {
        config.silence_guard_periods = guard;
    }
    config
}

fn run(options: Options) -> Result<()> {
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(LatencyConfig::default_path);
    let config = effective_config(&options, LatencyConfig::load(&config_path));
    config.validate()?;

    if options.save_config {
        config.save(&config_path)?;
    }

    let mut engine = LatencyEngine::new(config);
    match options.device.as_deref() {
        Some(name) => engine
            .select_device(name)
            .with_context(|| format!("Could not open device '{}' (see --list)", name))?,
        None => engine.select_default_device()?,
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).ok();

    engine.start()?;
    info!("Playing probe, keep the microphone near the speaker");

    let report = engine.run(&interrupt, |event| match event {
        LatencyEvent::TrialMeasured { trial, latency_ms } => {
            println!("Test{}, round trip latency {:.0}ms", trial, latency_ms)
        }
        LatencyEvent::Completed { latency_ms } => {
            println!("Final round trip latency: {:.0}ms", latency_ms)
        }
        LatencyEvent::Failed(reason) => eprintln!("{}", reason),
    })?;

    if let Some(path) = options.report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    if report.state != LatencyState::CompleteSuccess {
        error!(state = ?report.state, "Latency test failed");
        bail!("latency test did not succeed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_parsing() {
        let args: Vec<String> = ["latencytester", "-r", "44100", "-p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(value::<u32>(&args, 1).unwrap(), 44100);
        assert!(value::<usize>(&args, 3).is_err(), "Missing value must fail");
    }

    #[test]
    fn test_invalid_value() {
        let args: Vec<String> = ["latencytester", "-r", "fast"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let err = value::<u32>(&args, 1).unwrap_err();
        assert!(err.to_string().contains("Invalid value for -r"));
    }

    #[test]
    fn test_overrides_apply_on_top_of_file() {
        let options = Options {
            sample_rate: Some(96000),
            trials: Some(3),
            ..Default::default()
        };
        let file = LatencyConfig {
            period_size: 128,
            ..Default::default()
        };
        let config = effective_config(&options, file);
        assert_eq!(config.sample_rate, 96000);
        assert_eq!(config.trials, 3);
        assert_eq!(config.period_size, 128);
    }
}
