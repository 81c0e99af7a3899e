//! mf - macroflow CLI
//!
//! Compile authored scripts into flat timelines, record and replay them, and
//! run macro tasks. Results are printed as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use macroflow_core::platform;
use macroflow_core::prelude::*;
use macroflow_recorder::prelude::*;

#[derive(Parser)]
#[command(name = "mf")]
#[command(about = "macroflow - compile, record and replay input automation scripts")]
#[command(version)]
struct Cli {
    /// Storage root (default: ~/.macroflow)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lower an authored action tree into a timeline
    Compile {
        /// Authoring JSON: a list of action nodes
        file: PathBuf,
        /// Save under this name instead of printing the timeline
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Replay a saved timeline
    Play {
        file: String,
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
        /// Log actions instead of sending them to the OS
        #[arg(long)]
        dry_run: bool,
        /// Answer every condition and smart action with a fixed value
        #[arg(long, value_enum)]
        conditions: Option<Conditions>,
        /// Stop after N consecutive driver or evaluator failures
        #[arg(long)]
        failure_budget: Option<u32>,
        /// Seconds to wait before the first event
        #[arg(long, default_value = "2")]
        countdown: u64,
    },
    /// Record input samples (JSON lines on stdin) into a timeline
    Record {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long, default_value = "5")]
        threshold: f64,
        #[arg(long)]
        no_moves: bool,
    },
    /// List saved timelines
    List,
    /// Show timeline info
    Show {
        file: String,
        #[arg(long)]
        all: bool,
    },
    /// Delete a timeline
    Delete {
        file: String,
    },
    /// Macro tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    List,
    Run {
        name: String,
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, value_enum)]
        conditions: Option<Conditions>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Conditions {
    Always,
    Never,
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
}

impl<T: Serialize> Output<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
    fn err(e: Error) -> Output<()> {
        Output { success: false, data: None, error: Some(e) }
    }
}

fn print_json<T: Serialize>(output: &T) {
    match serde_json::to_string_pretty(output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to encode output: {}", e),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mf=info,macroflow_core=info,macroflow_recorder=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let dir = cli.dir;

    let result: Result<()> = match cli.command {
        Commands::Compile { file, name } => compile(dir, &file, name.as_deref()),
        Commands::Play { file, speed, dry_run, conditions, failure_budget, countdown } => {
            let opts = PlayOptions { speed, dry_run, conditions, failure_budget };
            play(dir, &file, &opts, countdown)
        }
        Commands::Record { name, threshold, no_moves } => record(dir, name, threshold, !no_moves),
        Commands::List => list(dir),
        Commands::Show { file, all } => show(dir, &file, all),
        Commands::Delete { file } => delete(dir, &file),
        Commands::Task { action } => match action {
            TaskAction::List => task_list(dir),
            TaskAction::Run { name, speed, dry_run, conditions } => {
                let opts = PlayOptions { speed, dry_run, conditions, failure_budget: None };
                task_run(dir, &name, &opts)
            }
        },
    };

    if let Err(e) = result {
        let err = match e.downcast_ref::<Error>() {
            Some(err) => err.clone(),
            None => Error::from(e),
        };
        print_json(&Output::<()>::err(err));
        std::process::exit(1);
    }
}

fn storage(dir: Option<PathBuf>) -> Result<ScriptStorage> {
    match dir {
        Some(dir) => ScriptStorage::with_dir(dir),
        None => ScriptStorage::new(),
    }
}

struct PlayOptions {
    speed: f64,
    dry_run: bool,
    conditions: Option<Conditions>,
    failure_budget: Option<u32>,
}

impl PlayOptions {
    fn player(&self) -> Player {
        let mut config = PlaybackConfig::default().speed(self.speed);
        if let Some(budget) = self.failure_budget {
            config = config.failure_budget(budget);
        }

        let driver: Box<dyn InputDriver> = if self.dry_run {
            Box::new(LogDriver)
        } else {
            platform::native_driver().unwrap_or_else(|| {
                warn!("no native input driver on this platform, falling back to a dry run");
                Box::new(LogDriver)
            })
        };

        let player = Player::new(driver).with_config(config);
        match self.conditions {
            Some(Conditions::Always) => player.with_evaluator(ConstEvaluator(true)),
            Some(Conditions::Never) => player.with_evaluator(ConstEvaluator(false)),
            None => player,
        }
    }
}

/// Route Ctrl+C to a cancel token
fn cancel_on_interrupt(cancel: CancelToken) -> Result<()> {
    ctrlc::set_handler(move || cancel.cancel()).context("Failed to install Ctrl+C handler")
}

fn compile(dir: Option<PathBuf>, file: &Path, name: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let nodes: Vec<ActionNode> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    let timeline = lower(&nodes).map_err(Error::from)?;
    info!("compiled {} nodes into {} events", nodes.len(), timeline.len());

    match name {
        Some(name) => {
            let path = storage(dir)?.save(name, &timeline)?;
            print_json(&Output::ok(serde_json::json!({
                "name": name,
                "path": path,
                "events": timeline.len(),
                "duration": timeline.end_time(),
            })));
        }
        None => print_json(&Output::ok(&timeline)),
    }
    Ok(())
}

fn play(dir: Option<PathBuf>, file: &str, opts: &PlayOptions, countdown: u64) -> Result<()> {
    let timeline = storage(dir)?.load(file)?;
    let player = opts.player();
    player.check(&timeline).map_err(Error::from)?;
    cancel_on_interrupt(player.cancel_token())?;

    info!(
        "Replaying {} ({} events) at {}x speed",
        file,
        timeline.len(),
        opts.speed
    );
    if countdown > 0 && !opts.dry_run {
        info!("Starting in {} seconds...", countdown);
        std::thread::sleep(Duration::from_secs(countdown));
    }

    let handle = player.spawn(timeline)?;
    let report = handle.join()?;
    print_json(&Output::ok(report));
    Ok(())
}

fn record(dir: Option<PathBuf>, name: Option<String>, threshold: f64, moves: bool) -> Result<()> {
    let storage = storage(dir)?;
    let name = name.unwrap_or_else(default_name);
    let config = RecorderConfig {
        mouse_move_threshold: threshold,
        record_moves: moves,
        ..Default::default()
    };
    let (mut handle, sink) = Recorder::with_config(config).start()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

    // stdin blocks, so samples are read on their own thread
    let eof = Arc::new(AtomicBool::new(false));
    let reader = {
        let eof = eof.clone();
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawInput>(&line) {
                    Ok(input) => {
                        sink.submit(input);
                    }
                    Err(e) => warn!("skipping bad sample: {}", e),
                }
            }
            eof.store(true, Ordering::SeqCst);
        })
    };

    eprintln!("Recording: {} (Ctrl+C or EOF to stop)", name);
    let mut count = 0;
    while running.load(Ordering::SeqCst) && !eof.load(Ordering::SeqCst) {
        count += handle.drain();
        eprint!("\r{} events", count);
        io::stderr().flush()?;
        std::thread::sleep(Duration::from_millis(100));
    }
    eprintln!();

    let dropped = handle.dropped();
    let timeline = handle.stop();
    if eof.load(Ordering::SeqCst) {
        join_reader(reader);
    }
    let path = storage.save(&name, &timeline)?;
    print_json(&Output::ok(serde_json::json!({
        "name": name,
        "path": path,
        "events": timeline.len(),
        "dropped": dropped,
        "duration": timeline.end_time(),
    })));
    Ok(())
}

/// Wait for the stdin reader. False if it panicked.
fn join_reader(reader: std::thread::JoinHandle<()>) -> bool {
    match reader.join() {
        Ok(()) => true,
        Err(_) => {
            warn!("stdin reader thread panicked; some samples may be missing");
            false
        }
    }
}

fn list(dir: Option<PathBuf>) -> Result<()> {
    let names = storage(dir)?.list()?;
    print_json(&Output::ok(names));
    Ok(())
}

#[derive(Serialize)]
struct Summary<'a> {
    name: &'a str,
    events: usize,
    duration: f64,
    balanced: bool,
    needs_evaluator: bool,
    kinds: BTreeMap<&'static str, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeline: Option<&'a Timeline>,
}

fn show(dir: Option<PathBuf>, file: &str, all: bool) -> Result<()> {
    let timeline = storage(dir)?.load(file)?;
    let mut kinds = BTreeMap::new();
    for e in timeline.iter() {
        *kinds.entry(e.kind.name()).or_insert(0) += 1;
    }
    print_json(&Output::ok(Summary {
        name: file,
        events: timeline.len(),
        duration: timeline.end_time(),
        balanced: timeline.is_balanced(),
        needs_evaluator: timeline.first_evaluator_use().is_some(),
        kinds,
        timeline: all.then_some(&timeline),
    }));
    Ok(())
}

fn delete(dir: Option<PathBuf>, file: &str) -> Result<()> {
    let storage = storage(dir)?;
    if !storage.exists(file) {
        return Err(Error::not_found(file).into());
    }
    storage.delete(file)?;
    print_json(&Output::ok(serde_json::json!({ "deleted": file })));
    Ok(())
}

fn task_list(dir: Option<PathBuf>) -> Result<()> {
    let tasks = storage(dir)?.load_tasks()?;
    print_json(&Output::ok(tasks));
    Ok(())
}

fn task_run(dir: Option<PathBuf>, name: &str, opts: &PlayOptions) -> Result<()> {
    let storage = storage(dir)?;
    let tasks = storage.load_tasks()?;
    let Some(task) = tasks.iter().find(|t| t.name == name) else {
        let known = tasks.iter().map(|t| t.name.clone()).collect();
        return Err(Error::not_found(&format!("task '{}'", name))
            .with_suggestions(known)
            .into());
    };

    let mut runner = TaskRunner::new(&storage, opts.player());
    cancel_on_interrupt(runner.cancel_token())?;
    let report = runner.run(task)?;
    print_json(&Output::ok(report));
    Ok(())
}
