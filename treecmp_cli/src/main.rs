use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use treecmp_common::{load_config, ComparisonResult, RunSummary, MISSING_IN_SOURCE, MISSING_IN_TARGET};
use treecmp_core::{count_files, extract_archive, is_archive, ComparisonEngine, ReportWriter};

/// Exit status when the run completed and found differences
const EXIT_DIFFERENCES: i32 = 2;

#[derive(Parser)]
#[command(name = "treecmp")]
#[command(author = "TreeCmp Contributors")]
#[command(version)]
#[command(about = "Format-aware comparison of two directory trees or archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a source tree against a target tree
    Compare(CompareArgs),
}

#[derive(clap::Args)]
struct CompareArgs {
    /// Source directory or archive (.zip, .tar, .tar.gz, .tgz)
    source: PathBuf,

    /// Target directory or archive
    target: PathBuf,

    /// Write comparison_summary.txt into this directory
    #[arg(short, long)]
    report_dir: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Show only non-identical files
    #[arg(short = 'd', long)]
    diff_only: bool,

    /// Number of worker threads
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Ignore patterns (can be specified multiple times)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Directory archives are extracted into (temporary by default)
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disable ANSI colors in output
    #[arg(long)]
    no_color: bool,
}

fn main() {
    // Logs go to stderr so JSON output on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compare(args) => match run_compare(args) {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                error!("Comparison failed: {:#}", e);
                std::process::exit(1);
            }
        },
    }
}

/// Scratch space for extracted archives
struct WorkDir {
    explicit: Option<PathBuf>,
    temp: Option<TempDir>,
}

impl WorkDir {
    fn root(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.explicit {
            return Ok(dir.clone());
        }
        if self.temp.is_none() {
            self.temp = Some(TempDir::new().context("Failed to create temporary work directory")?);
        }
        match &self.temp {
            Some(temp) => Ok(temp.path().to_path_buf()),
            None => bail!("Temporary work directory unavailable"),
        }
    }
}

/// Resolve an input to a directory, extracting archives under `<work>/<side>`
fn prepare_input(path: &Path, side: &str, work: &mut WorkDir) -> Result<PathBuf> {
    if path.is_dir() {
        return Ok(path.to_path_buf());
    }
    if is_archive(path) {
        let dest = work.root()?.join(side);
        let count = extract_archive(path, &dest)
            .with_context(|| format!("Failed to extract {} archive {}", side, path.display()))?;
        info!("Extracted {} {} files to {}", count, side, dest.display());
        return Ok(dest);
    }
    if path.exists() {
        bail!("{} path is neither a directory nor a supported archive: {}", side, path.display());
    }
    bail!("{} path does not exist: {}", side, path.display())
}

fn run_compare(args: CompareArgs) -> Result<i32> {
    let loaded = load_config(args.config.as_deref())?;
    let mut config = loaded.config;
    if loaded.exists {
        info!("Loaded configuration from {}", loaded.path.display());
    }

    config.ignore_patterns.extend(args.ignore);
    if args.jobs.is_some() {
        config.jobs = args.jobs;
    }
    if let Some(0) = config.jobs {
        bail!("--jobs must be at least 1");
    }
    if args.report_dir.is_some() {
        config.report_dir = args.report_dir;
    }
    if args.work_dir.is_some() {
        config.work_dir = args.work_dir;
    }

    let mut work = WorkDir {
        explicit: config.work_dir.clone(),
        temp: None,
    };
    let source = prepare_input(&args.source, "source", &mut work)?;
    let target = prepare_input(&args.target, "target", &mut work)?;

    info!("Comparing:");
    info!("  Source: {}", source.display());
    info!("  Target: {}", target.display());

    let report_writer = config
        .report_dir
        .as_deref()
        .map(ReportWriter::prepare)
        .transpose()?;

    let progress = if args.json || !std::io::stderr().is_terminal() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {pos} files compared {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar
    };
    let tick = progress.clone();

    let engine = ComparisonEngine::new(&config).with_progress(Box::new(move |result: &ComparisonResult| {
        tick.set_message(result.path.clone());
        tick.inc(1);
    }));
    let results = engine.compare_trees(&source, &target);
    progress.finish_and_clear();
    let results = results?;

    let summary = RunSummary::from_results(&results);

    if let Some(writer) = &report_writer {
        let path = writer.write(&results)?;
        info!("Report written to {}", path.display());
    }

    if args.json {
        let report = build_json_report(&args.source, &args.target, &results, args.diff_only);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let use_color = !args.no_color && std::io::stdout().is_terminal();
        print_results(&results, args.diff_only, use_color);
        print_summary(&summary, count_files(&source), count_files(&target), use_color);
    }

    Ok(if summary.all_identical() { 0 } else { EXIT_DIFFERENCES })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Identical,
    Different,
    MissingInTarget,
    MissingInSource,
    Error,
}

impl Status {
    fn of(result: &ComparisonResult) -> Self {
        if result.has_error() {
            Status::Error
        } else if result.identical {
            Status::Identical
        } else if result.differences == [MISSING_IN_TARGET] {
            Status::MissingInTarget
        } else if result.differences == [MISSING_IN_SOURCE] {
            Status::MissingInSource
        } else {
            Status::Different
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Status::Identical => "  ==  ",
            Status::Different => "  !=  ",
            Status::MissingInTarget => "  <<  ",
            Status::MissingInSource => "  >>  ",
            Status::Error => "  !!  ",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Status::Identical => "\x1b[32m",       // Green
            Status::Different => "\x1b[31m",       // Red
            Status::MissingInTarget => "\x1b[33m", // Yellow
            Status::MissingInSource => "\x1b[34m", // Blue
            Status::Error => "\x1b[35m",           // Magenta
        }
    }
}

fn print_results(results: &[ComparisonResult], diff_only: bool, use_color: bool) {
    println!("\n{}", "=".repeat(80));
    println!("Comparison Results");
    println!("{}", "=".repeat(80));

    for result in results {
        if diff_only && result.identical {
            continue;
        }

        let status = Status::of(result);
        let (status_color, reset) = if use_color {
            (status.color(), "\x1b[0m")
        } else {
            ("", "")
        };
        println!("{}{}{} {}", status_color, status.symbol(), reset, result.path);

        if status == Status::Different {
            for difference in &result.differences {
                for line in difference.lines() {
                    println!("         {}", line);
                }
            }
        }
        if let Some(message) = &result.error_message {
            println!("         {}", message);
        }
    }
}

fn print_summary(summary: &RunSummary, source_files: usize, target_files: usize, use_color: bool) {
    let mark = |status: Status| {
        let symbol = status.symbol().trim();
        if use_color {
            format!("{}({}){}", status.color(), symbol, "\x1b[0m")
        } else {
            format!("({})", symbol)
        }
    };

    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Total:           {}", summary.total);
    println!("  Identical:       {} {}", summary.identical, mark(Status::Identical));
    println!("  Different:       {} {}", summary.different, mark(Status::Different));
    println!("  Errors:          {} {}", summary.errored, mark(Status::Error));
    println!("  Source files:    {}", source_files);
    println!("  Target files:    {}", target_files);
    println!("{}", "=".repeat(80));
}

#[derive(Serialize)]
struct JsonReport<'a> {
    source: String,
    target: String,
    summary: RunSummary,
    results: Vec<&'a ComparisonResult>,
}

fn build_json_report<'a>(
    source: &Path,
    target: &Path,
    results: &'a [ComparisonResult],
    diff_only: bool,
) -> JsonReport<'a> {
    JsonReport {
        source: source.to_string_lossy().to_string(),
        target: target.to_string_lossy().to_string(),
        summary: RunSummary::from_results(results),
        results: results
            .iter()
            .filter(|r| !diff_only || !r.identical)
            .collect(),
    }
}
