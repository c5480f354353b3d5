//! Command-line entry: provider selection, patient prompts, and the live
//! operator console for a run.

use crate::config::Config;
use crate::coordination::{CoordinationEvent, CoordinationState};
use crate::credentials::FileCredentialsStore;
use crate::input::{Field, RawTaskInput, TaskInput};
use crate::orchestrator::{Orchestrator, OrchestratorSettings, RunSummary};
use crate::provider::ProviderRegistry;
use crate::router::{
    OtpRouter, RouteNotice, RouteTable, lend_lines, spawn_clipboard_poller, spawn_stdin_reader,
};
use crate::session::SessionOutcome;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Operator lines shared by every prompt and run of the process.
type Lines = mpsc::UnboundedReceiver<String>;

/// Log into provider portals concurrently and route one-time codes to them
#[derive(Parser, Debug)]
#[command(name = "portico", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: <config dir>/portico/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start sessions for the selected providers
    Run(RunArgs),
    /// List configured providers by group
    Providers,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Providers to run (comma-separated names, name prefixes, or numbers)
    #[arg(short, long)]
    pub providers: Option<String>,

    #[arg(long)]
    pub family_name: Option<String>,

    #[arg(long)]
    pub given_name: Option<String>,

    /// Date of birth (DDMMYYYY)
    #[arg(long)]
    pub dob: Option<String>,

    #[arg(long)]
    pub medicare_number: Option<String>,

    /// Sex (M, F, or I)
    #[arg(long)]
    pub sex: Option<String>,

    /// Do not watch the clipboard for codes
    #[arg(long)]
    pub no_clipboard: bool,
}

impl RunArgs {
    fn raw_input(&self) -> RawTaskInput {
        RawTaskInput {
            family_name: self.family_name.clone(),
            given_name: self.given_name.clone(),
            dob: self.dob.clone(),
            medicare_number: self.medicare_number.clone(),
            sex: self.sex.clone(),
        }
    }
}

/// Set up tracing. `PORTICO_LOG` writes debug logs to `portico.log`;
/// otherwise `RUST_LOG` logs to stderr. Without either, only the console
/// output below is shown.
pub fn init_logging() {
    if std::env::var("PORTICO_LOG").is_ok() {
        use std::fs::File;
        use tracing_subscriber::prelude::*;
        match File::create("portico.log") {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let filter = tracing_subscriber::EnvFilter::new("portico=debug");
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter))
                    .try_init();
            }
            Err(err) => {
                eprintln!("Failed to create log file: {err}");
            }
        }
    } else if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .try_init();
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")
}

pub fn providers(config_path: Option<&Path>) -> ExitCode {
    match providers_inner(config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn providers_inner(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = config.build_registry()?;
    print!("{}", provider_menu(&registry));

    let store = FileCredentialsStore::new(config.credentials_file.clone());
    match store.configured_keys() {
        Ok(keys) if keys.is_empty() => {
            println!("\nNo credentials configured in {}", store.path().display());
        }
        Ok(keys) => println!("\nCredentials configured for: {}", keys.join(", ")),
        Err(e) => println!("\n{e}"),
    }
    Ok(())
}

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> ExitCode {
    match run_inner(args, config_path).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_inner(args: RunArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let mut lines = spawn_stdin_reader();
    let mut raw = args.raw_input();
    let mut preselected = args.providers.clone();
    let mut failed = false;

    loop {
        let registry = config.build_registry()?;
        let selection = match preselected.take() {
            Some(selection) => {
                let resolved = registry.resolve_selection(&selection);
                if resolved.is_empty() {
                    anyhow::bail!("No providers match '{selection}'");
                }
                resolved
            }
            None => match select_providers(&registry, &mut lines).await? {
                Some(selection) => selection,
                None => break,
            },
        };

        let required = registry.required_fields(&selection);
        let input = collect_input(raw, &required, &mut lines).await?;

        let hint = input.to_cli_args();
        println!("Patient: {hint}");
        println!(
            "To run again: portico run --providers {} {hint}",
            selection.join(",")
        );

        let (summary, returned) = run_once(
            &config,
            registry,
            &selection,
            input.clone(),
            lines,
            args.no_clipboard,
        )
        .await?;
        lines = returned;

        print_summary(&summary);
        failed |= summary.failures() > 0 || summary.reports.is_empty();

        raw = match next_step(&mut lines).await? {
            NextStep::SamePatient => RawTaskInput::from(&input),
            NextStep::NewPatient => RawTaskInput::default(),
            NextStep::Exit => break,
        };
    }

    println!("Goodbye!");
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// One orchestrated run with its own coordination state, router and
/// console. Operator lines are lent to the router and handed back.
async fn run_once(
    config: &Config,
    registry: ProviderRegistry,
    selection: &[String],
    input: TaskInput,
    lines: Lines,
    no_clipboard: bool,
) -> Result<(RunSummary, Lines)> {
    let table = Config::route_table(&registry);
    let credentials = FileCredentialsStore::new(config.credentials_file.clone());
    let orchestrator = Orchestrator::new(
        registry,
        Box::new(credentials),
        OrchestratorSettings::from(config),
    );
    let coordination = orchestrator.coordination();

    let release = CancellationToken::new();
    let (operator, lent) = lend_lines(lines, release.clone());

    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let mut router = OtpRouter::new(Arc::clone(&coordination), table.clone())
        .with_poll_interval(config.router_poll_interval())
        .with_code_length(config.code_length)
        .with_quit_command(config.quit_command.clone())
        .with_operator(operator)
        .with_notices(notice_tx);
    if config.clipboard && !no_clipboard {
        router = router.with_passive(spawn_clipboard_poller(config.clipboard_poll_interval()));
    }

    let console_stop = CancellationToken::new();
    let console_task = tokio::spawn(console(
        coordination.subscribe(),
        notice_rx,
        table,
        config.quit_command.clone(),
        console_stop.clone(),
    ));
    let interrupt = tokio::spawn(interrupt_on_ctrl_c(Arc::clone(&coordination)));

    println!("Enter '{}' to quit", config.quit_command);
    let summary = orchestrator.run(selection, input, router).await;

    interrupt.abort();
    console_stop.cancel();
    let _ = console_task.await;

    release.cancel();
    let lines = lent.await.context("Operator input task failed")?;
    Ok((summary, lines))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    SamePatient,
    NewPatient,
    Exit,
}

async fn next_step(lines: &mut Lines) -> Result<NextStep> {
    loop {
        println!("\nWhat would you like to do?");
        println!("  1: Use same patient (select new providers)");
        println!("  2: Enter new patient details");
        println!("  3 or x: Exit");

        let Some(choice) = prompt(lines, "Enter choice (1-3 or x): ").await? else {
            return Ok(NextStep::Exit);
        };
        match choice.to_lowercase().as_str() {
            "1" => return Ok(NextStep::SamePatient),
            "2" => return Ok(NextStep::NewPatient),
            "3" | "x" => return Ok(NextStep::Exit),
            _ => println!("Invalid choice, please try again"),
        }
    }
}

/// Grouped, numbered provider listing.
fn provider_menu(registry: &ProviderRegistry) -> String {
    let mut out = String::new();
    let mut group = "";
    for (number, spec) in registry.numbered() {
        if spec.group != group {
            group = spec.group.as_str();
            out.push_str(&format!("\n{group}:\n"));
        }
        out.push_str(&format!("  {number}: {}\n", spec.name));
    }
    out
}

async fn select_providers(
    registry: &ProviderRegistry,
    lines: &mut Lines,
) -> Result<Option<Vec<String>>> {
    let quit_choice = (registry.numbered().len() + 1).to_string();
    loop {
        print!("{}", provider_menu(registry));
        println!("\nOther Options:\n  {quit_choice} or x: Quit");

        let Some(line) =
            prompt(lines, "\nSelect providers (comma-separated names or numbers): ").await?
        else {
            return Ok(None);
        };
        if line.is_empty() || line == quit_choice || line.eq_ignore_ascii_case("x") {
            return Ok(None);
        }

        let selection = registry.resolve_selection(&line);
        if !selection.is_empty() {
            return Ok(Some(selection));
        }
        println!("No valid providers selected. Please try again.");
    }
}

/// Prompt for required fields until the record validates.
async fn collect_input(
    mut raw: RawTaskInput,
    required: &BTreeSet<Field>,
    lines: &mut Lines,
) -> Result<TaskInput> {
    if !required.is_empty() {
        let labels: Vec<&str> = required.iter().map(|f| f.label()).collect();
        println!("Required fields are: {}", labels.join(", "));
    }

    loop {
        for field in required {
            while raw.get(*field).is_none() {
                let value = prompt(lines, &format!("{}: ", field.label()))
                    .await?
                    .context("Input closed before all patient details were entered")?;
                raw.set(*field, value);
            }
        }

        match raw.clone().validate() {
            Ok(input) => return Ok(input),
            Err(e) => {
                println!("{e}");
                let field = e.field();
                if !required.contains(&field) {
                    anyhow::bail!(e);
                }
                raw.set(field, String::new());
            }
        }
    }
}

/// Print `message` and read one trimmed line. `None` at end of input or on
/// Ctrl-C, which no longer terminates the process once a run has hooked it.
async fn prompt(lines: &mut Lines, message: &str) -> Result<Option<String>> {
    print!("{message}");
    io::stdout().flush()?;
    tokio::select! {
        line = lines.recv() => Ok(line.map(|l| l.trim().to_string())),
        _ = tokio::signal::ctrl_c() => {
            println!();
            Ok(None)
        }
    }
}

async fn interrupt_on_ctrl_c(coordination: Arc<CoordinationState>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        println!("\nInterrupted; shutting down...");
        coordination.signal_exit();
    }
}

/// Print operator-facing progress until `stop`.
async fn console(
    mut events: broadcast::Receiver<CoordinationEvent>,
    mut notices: mpsc::UnboundedReceiver<RouteNotice>,
    table: RouteTable,
    quit_command: String,
    stop: CancellationToken,
) {
    let mut waiting: BTreeSet<String> = BTreeSet::new();

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            notice = notices.recv() => match notice {
                Some(notice) => print_notice(&notice, &table, &quit_command),
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => print_event(&event, &mut waiting, &table),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

fn print_event(event: &CoordinationEvent, waiting: &mut BTreeSet<String>, table: &RouteTable) {
    match event {
        CoordinationEvent::CodeRequested { provider } => {
            waiting.insert(provider.clone());
            if !table.has_pattern(provider) {
                println!(
                    "\n{provider} is waiting for a code. Enter it manually: {}",
                    table.selector_hint()
                );
            }
            if waiting.len() > 1 {
                println!(
                    "Currently waiting for {} codes from: {}",
                    waiting.len(),
                    join(waiting)
                );
            }
        }
        CoordinationEvent::StillWaiting { provider, waited } => {
            println!(
                "Still waiting for a code for {provider} ({}s)",
                waited.as_secs()
            );
        }
        CoordinationEvent::CodeDelivered { provider }
        | CoordinationEvent::RequestWithdrawn { provider } => {
            waiting.remove(provider);
            if !waiting.is_empty() {
                println!(
                    "Still waiting for {} codes from: {}",
                    waiting.len(),
                    join(waiting)
                );
            }
        }
        CoordinationEvent::ExitSignalled => println!("Closing sessions..."),
    }
}

fn print_notice(notice: &RouteNotice, table: &RouteTable, quit_command: &str) {
    match notice {
        RouteNotice::Watching { provider } => {
            println!("\nMonitoring clipboard for {provider} code...");
            println!("Just copy the SMS message and the code will be detected");
            let hint = table.selector_hint();
            if !hint.is_empty() {
                println!("Or enter the code manually: {hint} (e.g. 1123456)");
            }
            println!("Enter '{quit_command}' to quit");
        }
        RouteNotice::Detected { provider } => {
            println!("Code detected for {provider}");
        }
        RouteNotice::Entered { provider } => {
            println!("Code entered for {provider}");
        }
        RouteNotice::NotWaiting { provider } => {
            println!("No {provider} session is currently waiting for a code");
        }
        RouteNotice::UnknownSelector { selector } => {
            println!("No provider uses selector {selector}");
        }
        RouteNotice::Unrecognized { line } => {
            println!("Unrecognized input '{line}'. Enter '{quit_command}' to quit");
        }
        RouteNotice::Quit => println!("Received quit instruction..."),
    }
}

fn print_summary(summary: &RunSummary) {
    for skipped in &summary.skipped {
        println!("Skipped {}: {}", skipped.provider, skipped.reason);
    }
    for report in &summary.reports {
        match &report.outcome {
            SessionOutcome::Completed => println!("{}: done", report.provider),
            SessionOutcome::TaskFailed(message) => {
                println!("{}: task failed: {message}", report.provider);
            }
            SessionOutcome::Errored { phase, message } => {
                println!("{}: {phase} failed: {message}", report.provider);
            }
            SessionOutcome::Aborted => println!("{}: aborted during shutdown", report.provider),
        }
    }
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}
