//! # mediascope
//!
//! Dump the container and codec structure of media files.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use mediascope_core::{DurationPolicy, ProbeOptions, Prober, Report, Stream};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    inputs: Vec<PathBuf>,
    probe: ProbeOptions,
    json: bool,
}

fn print_usage() {
    eprintln!("mediascope v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: mediascope [options] <file>...");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>     Load probe options from a JSON file");
    eprintln!("  --speed <0.0-1.0>   Parse speed (0 = headers only, 1 = whole file)");
    eprintln!("  --continuous        Aggregate numbered sibling files (00000.m2ts, ...)");
    eprintln!("  --last-segment      Duration of the last contiguous timestamp run only");
    eprintln!("  --json              Print reports as JSON");
    eprintln!("  -h, --help          Show this help");
}

fn parse_args(args: &[String]) -> Result<CliOptions> {
    let mut inputs = Vec::new();
    let mut probe = ProbeOptions::default();
    let mut json = false;

    // --config is applied first so the other flags override it
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        let value = args.get(pos + 1).ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
        probe = ProbeOptions::from_file(Path::new(value)).with_context(|| format!("Cannot load config {:?}", value))?;
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 2;
            }
            "--speed" => {
                let value = args.get(i + 1).ok_or_else(|| anyhow::anyhow!("Missing value for --speed"))?;
                let speed = value
                    .parse::<f32>()
                    .map_err(|e| anyhow::anyhow!("Invalid parse speed {}: {}", value, e))?;
                probe = probe.with_parse_speed(speed);
                i += 2;
            }
            "--continuous" => {
                probe = probe.with_continuous(true);
                i += 1;
            }
            "--last-segment" => {
                probe = probe.with_duration_policy(DurationPolicy::LastSegment);
                i += 1;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => {
                return Err(anyhow::anyhow!("Unknown option {}", flag));
            }
            path => {
                inputs.push(PathBuf::from(path));
                i += 1;
            }
        }
    }

    if inputs.is_empty() {
        print_usage();
        return Err(anyhow::anyhow!("No input files"));
    }
    Ok(CliOptions { inputs, probe, json })
}

// ============================================================================
// Output
// ============================================================================

fn write_stream(out: &mut impl Write, title: &str, stream: &Stream) -> io::Result<()> {
    writeln!(out, "{}", title)?;
    let width = stream.fields.iter().map(|f| f.name.len()).max().unwrap_or(0).max(32);
    for field in &stream.fields {
        writeln!(out, "{:<width$} : {}", field.name, field.value, width = width)?;
    }
    writeln!(out)
}

fn write_text(out: &mut impl Write, path: &Path, report: &Report) -> io::Result<()> {
    let mut general = report.general.clone();
    general.fields.insert(
        0,
        mediascope_core::Field {
            name: "Complete name".to_string(),
            value: path.display().to_string(),
        },
    );
    write_stream(out, "General", &general)?;

    for stream in &report.streams {
        let same_kind = report.streams_of(stream.kind).count();
        let title = if same_kind > 1 {
            let index = report
                .streams_of(stream.kind)
                .position(|s| std::ptr::eq(s, stream))
                .unwrap_or(0);
            format!("{} #{}", stream.kind.name(), index + 1)
        } else {
            stream.kind.name().to_string()
        };
        write_stream(out, &title, stream)?;
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn probe_all(prober: &Prober, inputs: &[PathBuf]) -> Vec<(PathBuf, Result<Report>)> {
    let probe_one = |path: &PathBuf| {
        let result = prober
            .probe_path(path)
            .with_context(|| format!("Cannot probe {:?}", path));
        (path.clone(), result)
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        inputs.par_iter().map(probe_one).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        inputs.iter().map(probe_one).collect()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("mediascope=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    tracing::debug!("probe options: {:?}", options.probe);

    let prober = Prober::new(options.probe);
    let results = probe_all(&prober, &options.inputs);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;
    if options.json {
        let mut reports = Vec::new();
        for (path, result) in results {
            match result {
                Ok(report) => reports.push(serde_json::json!({ "path": path, "report": report })),
                Err(err) => {
                    tracing::error!("{:#}", err);
                    failures += 1;
                }
            }
        }
        serde_json::to_writer_pretty(&mut out, &reports)?;
        writeln!(out)?;
    } else {
        for (path, result) in results {
            match result {
                Ok(report) => write_text(&mut out, &path, &report)?,
                Err(err) => {
                    tracing::error!("{:#}", err);
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        return Err(anyhow::anyhow!("{} of {} files could not be probed", failures, options.inputs.len()));
    }
    Ok(())
}
