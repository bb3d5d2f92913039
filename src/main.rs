use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;

use cli::Cli;
use cli::commands::Commands;
use zrescue::command::SystemRunner;
use zrescue::config::Config;
use zrescue::interrupt;
use zrescue::keystore::KeystoreUnlock;
use zrescue::output::Console;
use zrescue::preflight;
use zrescue::recovery::{RecoveryFailure, RecoveryReport, RecoveryState, Sequencer, Session};
use zrescue::resolver::{DialoguerPrompter, Overrides};

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zrescue")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("zrescue.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let level = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &mut Config) -> Result<()> {
    info!("Starting application");

    let console = Console::new(cli.is_verbose());
    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Unlock { root_pool, mapper } => {
            handle_unlock_command(root_pool.clone(), mapper.clone(), config, &console)
        }
        Commands::Recover {
            key_file,
            root,
            json,
            mount_only,
        } => {
            if let Some(root) = root {
                config.recovery_root = root.clone();
            }
            let console = if *json { Console::json() } else { console };
            handle_recover_command(key_file.as_deref(), *json, *mount_only, config, &console)
        }
    }
}

fn handle_unlock_command(
    root_pool: Option<String>,
    mapper: Option<String>,
    config: &Config,
    console: &Console,
) -> Result<()> {
    preflight::ensure_root()?;
    preflight::ensure_tools(preflight::UNLOCK_TOOLS)?;
    interrupt::install()?;

    let runner = SystemRunner::new();
    let prompter = DialoguerPrompter::new();
    let report = KeystoreUnlock::new(&runner, &prompter, console, &config.keystore).run(
        root_pool,
        mapper,
        &Overrides::from_env(),
    )?;

    console.heading("Keystore unlocked");
    console.line(&format!("  pool:     {}", report.pool));
    console.line(&format!("  mapper:   {}", report.mapper));
    console.line(&format!("  key file: {}", report.key_file.display()));
    console.line("");
    console.line(&format!(
        "Next: {}",
        format!("zrescue recover {}", report.key_file.display()).cyan()
    ));
    Ok(())
}

fn handle_recover_command(
    key_file: Option<&Path>,
    json: bool,
    mount_only: bool,
    config: &Config,
    console: &Console,
) -> Result<()> {
    preflight::ensure_root()?;
    preflight::ensure_tools(preflight::RECOVER_TOOLS)?;
    if let Some(path) = key_file {
        preflight::ensure_key_file(path)?;
    }
    interrupt::install()?;

    let runner = SystemRunner::new();
    let prompter = DialoguerPrompter::new();
    let session = Session::new(
        &runner,
        &prompter,
        console,
        config,
        Overrides::from_env(),
        key_file.map(Path::to_path_buf),
    );

    let mut sequencer = Sequencer::new(session, interrupt::flag());
    if mount_only {
        sequencer = sequencer.stop_after(RecoveryState::Mounted);
    }

    match sequencer.run() {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report, config);
            }
            Ok(())
        }
        Err(failure) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&failure)?);
            } else {
                print_failure(&failure);
            }
            Err(failure.into())
        }
    }
}

fn print_summary(report: &RecoveryReport, config: &Config) {
    println!();
    if report.is_complete() {
        println!("{}", "Recovery complete".green().bold());
    } else {
        println!("{}", "System mounted".green().bold());
    }

    if let Some(ctx) = &report.context {
        println!("  root: {} ({})", ctx.root_dataset, ctx.root_pool);
        println!("  boot: {} ({})", ctx.boot_dataset, ctx.boot_pool);
        println!("  efi:  {}", ctx.efi_partition);
    }
    print_journal_lists(&report.journal.notices, &report.journal.warnings);

    let mountpoints = &report.journal.original_mountpoints;
    if !mountpoints.is_empty() && !(report.is_complete() && config.mountpoints.restore) {
        println!("{}", "Original mountpoints (restore once booted):".yellow());
        for original in mountpoints {
            println!("  zfs set mountpoint={} {}", original.mountpoint, original.dataset);
        }
    }

    if !report.held.is_empty() {
        println!("{}", "Left in place:".cyan());
        for resource in &report.held {
            println!("  {}", resource);
        }
        println!(
            "Enter with {} and release with {}",
            format!("chroot {}", config.recovery_root.display()).cyan(),
            format!("umount -R {}", config.recovery_root.display()).cyan()
        );
    }
}

fn print_failure(failure: &RecoveryFailure) {
    eprintln!();
    eprintln!("{} {}", "Error:".red().bold(), failure);
    let history: Vec<String> = failure.history.iter().map(|s| s.to_string()).collect();
    eprintln!("  states: {}", history.join(" -> "));

    if failure.rollback.compensations.is_empty() {
        eprintln!("  nothing to roll back");
    }
    for compensation in &failure.rollback.compensations {
        match &compensation.error {
            None => eprintln!("  {} released {}", "✓".green(), compensation.resource),
            Some(e) => eprintln!("  {} could not release {}: {}", "!".yellow(), compensation.resource, e),
        }
    }
    print_journal_lists(&failure.journal.notices, &failure.journal.warnings);
}

fn print_journal_lists(notices: &[String], warnings: &[String]) {
    if !notices.is_empty() {
        println!("{}", "Already done:".blue());
        for notice in notices {
            println!("  • {}", notice);
        }
    }
    if !warnings.is_empty() {
        println!("{}", "Warnings:".yellow());
        for warning in warnings {
            println!("  ! {}", warning);
        }
    }
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the configured level is known
    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &mut config)?;

    Ok(())
}
