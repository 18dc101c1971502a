//! Convert V8 CPU profiles to Callgrind format.
//!
//! Supported input formats:
//! - Legacy cpuprofile files with an embedded `head` tree
//! - Current cpuprofile files (`.cpuprofile`) with a flat `nodes` array
//! - Chrome Performance traces (`.json`) from the Performance panel
//!
//! Gzip and zstd compressed input is accepted.
//!
//! # Usage
//!
//! ```bash
//! chrome2calltree profile.cpuprofile
//! chrome2calltree trace.json.gz -o trace.callgrind
//! chrome2calltree CPU.20240101.cpuprofile --time-unit microseconds
//! cat profile.cpuprofile | chrome2calltree - > profile.callgrind
//! ```

use chrome2calltree::input::{is_stdin, read_input};
use chrome2calltree::profile::TimeUnit;
use chrome2calltree::{Converter, ConverterConfig};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "chrome2calltree")]
#[command(about = "Convert V8 CPU profiles to Callgrind format")]
#[command(version)]
struct Args {
    /// Input profile (cpuprofile or Performance trace), or `-` for stdin
    input: PathBuf,

    /// Output Callgrind file, or `-` for stdout (defaults to input filename
    /// with .callgrind extension, stdout when reading stdin)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Unit of the profile's startTime and endTime fields
    #[arg(long, value_enum, default_value_t = TimeUnitArg::Seconds)]
    time_unit: TimeUnitArg,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TimeUnitArg {
    Seconds,
    Milliseconds,
    Microseconds,
}

impl From<TimeUnitArg> for TimeUnit {
    fn from(unit: TimeUnitArg) -> Self {
        match unit {
            TimeUnitArg::Seconds => TimeUnit::Seconds,
            TimeUnitArg::Milliseconds => TimeUnit::Milliseconds,
            TimeUnitArg::Microseconds => TimeUnit::Microseconds,
        }
    }
}

fn output_path(args: &Args) -> PathBuf {
    match &args.output {
        Some(path) => path.clone(),
        None if is_stdin(&args.input) => PathBuf::from("-"),
        None => {
            let mut path = args.input.clone();
            path.set_extension("callgrind");
            path
        }
    }
}

fn open_output(path: &Path) -> Result<Box<dyn Write>, Box<dyn std::error::Error>> {
    if is_stdin(path) {
        return Ok(Box::new(io::stdout().lock()));
    }
    let file = File::create(path)
        .map_err(|e| format!("Failed to create output file '{}': {}", path.display(), e))?;
    Ok(Box::new(file))
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = output_path(&args);

    let contents = read_input(&args.input)
        .map_err(|e| format!("Failed to read input '{}': {}", args.input.display(), e))?;

    let converter = Converter::with_config(ConverterConfig {
        time_unit: args.time_unit.into(),
        copy_input: false,
    });
    let (shape, mut profile) = converter.parse_detected(contents.as_slice())?;
    drop(contents);
    eprintln!("Detected: {}", shape.name());

    let mut writer = BufWriter::new(open_output(&output_path)?);
    converter.convert(&mut profile, &mut writer)?;
    writer.flush()?;

    eprintln!(
        "Converted '{}' -> '{}' ({} nodes, {} samples)",
        args.input.display(),
        output_path.display(),
        profile.len(),
        profile.total_hit_count
    );

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
