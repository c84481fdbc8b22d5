//! Classgate agent: entry point.
//!
//! Unblocks distracting sites while a class is running and blocks them the
//! rest of the time, following a calendar.
//!
//! # Usage
//!
//! ```text
//! classgate [--config <PATH>] <COMMAND>
//!
//! Commands:
//!   run           Run the reconciliation daemon (default)
//!   sync-now      Sync the calendar and apply the result once
//!   apply         Apply the decision for the cached windows without syncing
//!   status        Show whether a class is in progress
//!   rules         Print the compiled rule set as JSON
//!   calendars     List calendars found in the calendar directory
//!   list          Show the blocked and allowed lists
//!   block         Add entries to the blocked list
//!   unblock       Remove entries from the blocked list
//!   allow         Add entries to the allowed list
//!   disallow      Remove entries from the allowed list
//!   set-calendar  Select the calendar to follow ("" clears)
//!   add-common    Block a built-in list of common distracting sites
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Description                                  |
//! |--------------------|----------------------------------------------|
//! | `CLASSGATE_CONFIG` | Config file path (default: platform dir)     |
//! | `RUST_LOG`         | Log filter; overrides `[agent] log_level`    |
//!
//! # Architecture overview
//!
//! ```text
//! config.toml [settings] ──► TomlSettingsStore ─┐
//! calendars/<id>.json ─────► FileEventSource ───┤
//! state.json ◄────────────► JsonStateStore ─────┼─► Reconciler ─► FanOutSink ─► rules.json
//! TokioTimers ──(mpsc)──► daemon loop ──────────┘                           └─► hosts file
//! ```
//!
//! `sync-now` and `apply` hand their pass to a running daemon through
//! `control.json`, and only run it in-process when no daemon claims it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use classgate_agent::application::edit_settings::{
    add_common, add_domains, relevant_change, remove_domains, set_calendar, DomainList, EditReport,
};
use classgate_agent::application::reconcile::{
    Clock, ReconcileError, Reconciler, ReconcilerPorts, ReconciliationResult, RuleSink, Trigger,
};
use classgate_agent::application::state::{RuntimeStateStore, SettingsStore};
use classgate_agent::application::timers::{TimerName, TimerScheduler};
use classgate_agent::infrastructure::calendar::FileEventSource;
use classgate_agent::infrastructure::control::{serve_pending, ControlFile, ControlKind};
use classgate_agent::infrastructure::enforcement::{FanOutSink, HostsFile, JsonRuleFile};
use classgate_agent::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, AppConfig, ResolvedPaths,
    TomlSettingsStore,
};
use classgate_agent::infrastructure::storage::state::JsonStateStore;
use classgate_agent::infrastructure::timer::{SystemClock, TokioTimers};
use classgate_core::build_blocking_rules;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Calendar-driven site blocking.
#[derive(Debug, Parser)]
#[command(name = "classgate", about = "Calendar-driven site blocking agent", version)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, short, global = true, env = "CLASSGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Run the reconciliation daemon.
    Run,
    /// Sync the calendar (interactive) and apply the result once.
    SyncNow,
    /// Apply the decision for the cached windows without syncing.
    Apply,
    /// Show whether a class is in progress and the last sync outcome.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the compiled rule set as JSON.
    Rules,
    /// List calendars available to select.
    Calendars {
        /// Discard cached credentials first.
        #[arg(long)]
        reauth: bool,
    },
    /// Show the blocked and allowed lists.
    List,
    /// Add entries to the blocked list.
    Block {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Remove entries from the blocked list.
    #[command(alias = "rm")]
    Unblock {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Add entries to the allowed list.
    Allow {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Remove entries from the allowed list.
    Disallow {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Select the calendar to follow; an empty id clears the selection.
    SetCalendar { id: String },
    /// Block a built-in list of common distracting sites.
    AddCommon,
}

// ── Agent wiring ──────────────────────────────────────────────────────────────

/// Loaded configuration plus where it came from.
struct Agent {
    config_path: PathBuf,
    config: AppConfig,
    paths: ResolvedPaths,
}

impl Agent {
    fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => config_file_path().context("cannot locate the config file")?,
        };
        let config = load_config_from(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let paths = config.paths.resolve(base);
        Ok(Self {
            config_path,
            config,
            paths,
        })
    }

    fn settings_store(&self) -> TomlSettingsStore {
        TomlSettingsStore::new(&self.config_path)
    }

    fn rule_sink(&self) -> FanOutSink {
        let mut sinks: Vec<Arc<dyn RuleSink>> =
            vec![Arc::new(JsonRuleFile::new(&self.paths.rules_file))];
        if let Some(hosts) = &self.paths.hosts_file {
            let hosts = HostsFile::new(hosts)
                .with_flush_commands(self.config.agent.dns_flush_commands.clone());
            sinks.push(Arc::new(hosts));
        }
        FanOutSink::new(sinks)
    }

    fn reconciler(&self, timers: Arc<dyn TimerScheduler>, clock: Arc<dyn Clock>) -> Reconciler {
        let ports = ReconcilerPorts {
            settings: Arc::new(self.settings_store()) as Arc<dyn SettingsStore>,
            state: Arc::new(JsonStateStore::new(&self.paths.state_file))
                as Arc<dyn RuntimeStateStore>,
            events: Arc::new(FileEventSource::new(&self.paths.calendar_dir)),
            sink: Arc::new(self.rule_sink()),
            timers,
            clock,
        };
        Reconciler::new(ports, self.config.agent.reconcile_config())
    }

    /// A reconciler for one-shot commands; its timers die with the process.
    ///
    /// Passes that write state go through [`run_pass`] instead, so a running
    /// daemon stays the only writer.
    fn oneshot_reconciler(&self) -> Reconciler {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (timers, _fired) = TokioTimers::new(Arc::clone(&clock));
        self.reconciler(Arc::new(timers), clock)
    }

    fn edit_settings(&mut self, edit: impl FnOnce(&mut AppConfig)) -> anyhow::Result<()> {
        edit(&mut self.config);
        save_config_to(&self.config_path, &self.config)
            .with_context(|| format!("failed to save {}", self.config_path.display()))?;
        println!("Saved to {}", self.config_path.display());
        Ok(())
    }
}

// ── Daemon loop ───────────────────────────────────────────────────────────────

fn log_pass(result: Result<ReconciliationResult, ReconcileError>) {
    match result {
        Ok(r) => info!(
            "pass complete: in_class={}, rules={}, next_boundary={:?}",
            r.in_class, r.rules_applied, r.next_boundary
        ),
        Err(e) => error!("reconciliation pass failed: {e}"),
    }
}

/// Runs until Ctrl+C: timer firings and settings edits each trigger a pass.
async fn run_daemon(agent: &Agent) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (timers, mut fired) = TokioTimers::new(Arc::clone(&clock));
    let reconciler = agent.reconciler(Arc::new(timers), clock);
    let settings = agent.settings_store();

    let first_run = !agent.paths.state_file.exists();
    let trigger = if first_run {
        Trigger::Installed
    } else {
        Trigger::Startup
    };
    info!(
        "classgate agent starting ({trigger:?}) with config {}",
        agent.config_path.display()
    );
    log_pass(reconciler.handle(trigger).await);

    let mut last_settings = settings.settings().await.ok();
    let mut poll = tokio::time::interval(agent.config.agent.settings_poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let control = ControlFile::new(&agent.paths.control_file);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(name) = fired.recv() => {
                let trigger = match name {
                    TimerName::PeriodicSync => Trigger::PeriodicTimer,
                    TimerName::BoundaryRecheck => Trigger::BoundaryTimer,
                };
                info!("timer {name} fired");
                log_pass(reconciler.handle(trigger).await);
            }
            _ = poll.tick() => {
                match settings.settings().await {
                    Ok(current) => {
                        let changed = last_settings
                            .as_ref()
                            .map_or(true, |prev| relevant_change(prev, &current));
                        last_settings = Some(current);
                        if changed {
                            info!("settings changed");
                            log_pass(reconciler.handle(Trigger::SettingsChanged).await);
                        }
                    }
                    Err(e) => warn!("cannot read settings: {e}"),
                }
                match serve_pending(&control, &reconciler).await {
                    Ok(Some(outcome)) => log_pass(outcome),
                    Ok(None) => {}
                    Err(e) => warn!("cannot serve request in {}: {e}", control.path().display()),
                }
            }
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("received Ctrl+C; shutting down");
                break;
            }
        }
    }
    Ok(())
}

// ── One-shot commands ─────────────────────────────────────────────────────────

const REPLY_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs a state-writing pass, through the daemon when one is running.
async fn run_pass(agent: &Agent, kind: ControlKind) -> anyhow::Result<ReconciliationResult> {
    let control = ControlFile::new(&agent.paths.control_file);
    let request = control
        .submit(kind)
        .await
        .with_context(|| format!("failed to write {}", control.path().display()))?;

    let claim_timeout = agent.config.agent.settings_poll_interval() * 3 + Duration::from_secs(1);
    let claimed = control.wait_claimed(claim_timeout).await? || !control.withdraw().await?;
    if claimed {
        let reply = control
            .wait_reply(request.id, REPLY_TIMEOUT)
            .await?
            .context("the running agent did not report back")?;
        return match (reply.result, reply.error) {
            (Some(result), _) => Ok(result),
            (None, error) => Err(anyhow!(error.unwrap_or_else(|| "pass failed".to_string()))),
        };
    }

    info!("no running agent picked up the request; running the pass here");
    let reconciler = agent.oneshot_reconciler();
    let outcome = match kind {
        ControlKind::SyncNow => reconciler.handle(Trigger::SyncNow).await,
        ControlKind::Apply => reconciler.apply_blocking().await,
    };
    Ok(outcome?)
}

fn format_instant(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&chrono::Local).to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn print_report(verb: &str, report: &EditReport) {
    if report.changed.is_empty() {
        println!("Nothing {verb}");
    } else {
        let n = report.changed.len();
        println!("{} {n} entr{}:", capitalize(verb), plural_y(n));
        for entry in &report.changed {
            println!("  {entry}");
        }
    }
    if !report.skipped.is_empty() {
        println!("Skipped: {}", report.skipped.join(", "));
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}

fn print_list(title: &str, entries: &[String]) {
    println!("{title} ({}):", entries.len());
    if entries.is_empty() {
        println!("  (none)");
    }
    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort();
    for entry in sorted {
        println!("  - {entry}");
    }
}

async fn print_status(agent: &Agent, json: bool) -> anyhow::Result<()> {
    let status = agent
        .oneshot_reconciler()
        .query_status()
        .await
        .context("failed to read runtime state")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let calendar = agent
        .config
        .settings
        .selected_calendar_id
        .as_deref()
        .unwrap_or("(not set)");
    println!("Calendar: {calendar}");
    if status.in_class {
        println!("Status: IN CLASS - sites are UNBLOCKED");
    } else {
        println!("Status: NOT IN CLASS - sites are BLOCKED");
    }
    match status.next_boundary {
        Some(ms) => println!("Next change: {}", format_instant(ms)),
        None => println!("Next change: none scheduled"),
    }
    match status.last_sync_at {
        Some(ms) => println!("Last sync: {}", format_instant(ms)),
        None => println!("Last sync: never"),
    }
    if let Some(err) = &status.last_sync_error {
        println!("Last sync error: {err}");
    }
    if let Some(tz) = &status.calendar_time_zone {
        println!("Calendar time zone: {tz}");
    }
    Ok(())
}

async fn run_command(mut agent: Agent, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run => run_daemon(&agent).await?,
        Command::SyncNow => {
            match run_pass(&agent, ControlKind::SyncNow).await {
                Ok(result) => log_pass(Ok(result)),
                Err(e) => error!("sync failed: {e:#}"),
            }
            print_status(&agent, false).await?;
        }
        Command::Apply => {
            let result = run_pass(&agent, ControlKind::Apply)
                .await
                .context("failed to apply rules")?;
            println!(
                "Applied {} rules ({})",
                result.rules_applied,
                if result.in_class { "in class" } else { "not in class" }
            );
        }
        Command::Status { json } => print_status(&agent, json).await?,
        Command::Rules => {
            let settings = &agent.config.settings;
            let rules = build_blocking_rules(&settings.blocked_domains, &settings.allowed_domains);
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        Command::Calendars { reauth } => {
            let calendars = agent
                .oneshot_reconciler()
                .list_calendars(true, reauth)
                .await
                .context("failed to list calendars")?;
            let selected = agent.config.settings.selected_calendar_id.as_deref();
            for cal in calendars {
                let marker = if Some(cal.id.as_str()) == selected { "*" } else { " " };
                let primary = if cal.primary { " (primary)" } else { "" };
                let summary = cal.summary.as_deref().unwrap_or("");
                println!("{marker} {}{primary}  {summary}", cal.id);
            }
        }
        Command::List => {
            let settings = &agent.config.settings;
            println!(
                "Calendar: {}",
                settings.selected_calendar_id.as_deref().unwrap_or("(not set)")
            );
            println!();
            print_list("Blocked domains", &settings.blocked_domains);
            println!();
            print_list("Allowed domains", &settings.allowed_domains);
        }
        Command::Block { domains } => {
            let mut report = EditReport::default();
            agent.edit_settings(|c| {
                report = add_domains(&mut c.settings, DomainList::Blocked, &domains[..])
            })?;
            print_report("added", &report);
        }
        Command::Unblock { domains } => {
            let mut report = EditReport::default();
            agent.edit_settings(|c| {
                report = remove_domains(&mut c.settings, DomainList::Blocked, &domains[..])
            })?;
            print_report("removed", &report);
        }
        Command::Allow { domains } => {
            let mut report = EditReport::default();
            agent.edit_settings(|c| {
                report = add_domains(&mut c.settings, DomainList::Allowed, &domains[..])
            })?;
            print_report("added", &report);
        }
        Command::Disallow { domains } => {
            let mut report = EditReport::default();
            agent.edit_settings(|c| {
                report = remove_domains(&mut c.settings, DomainList::Allowed, &domains[..])
            })?;
            print_report("removed", &report);
        }
        Command::SetCalendar { id } => {
            agent.edit_settings(|c| {
                set_calendar(&mut c.settings, &id);
            })?;
            match &agent.config.settings.selected_calendar_id {
                Some(id) => println!("Calendar set to: {id}"),
                None => println!("Calendar selection cleared"),
            }
        }
        Command::AddCommon => {
            let mut report = EditReport::default();
            agent.edit_settings(|c| report = add_common(&mut c.settings))?;
            print_report("added", &report);
        }
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let agent = Agent::load(cli.config)?;

    // `RUST_LOG` wins; otherwise the configured level applies.
    let fallback = agent.config.agent.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    run_command(agent, cli.command.unwrap_or(Command::Run)).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
