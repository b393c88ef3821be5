#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `topoff` command line: one-shot measurements and top-ups, the scheduler
//! daemon, and the settings commands.

mod cli;
mod error_fmt;
mod rt;
mod topup;

use std::fs;
use std::path::Path;

use clap::Parser;
use eyre::{Result, WrapErr};
use topoff_config::{Config, Logging};
use topoff_core::CancelToken;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::topup::Rig;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = run(cli) {
        tracing::debug!(error = ?err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    color_eyre::install()?;

    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    // Ctrl-C cancels the active run; `shutdown` also stops the scheduler loop.
    let cancel = CancelToken::new();
    let shutdown = CancelToken::new();
    {
        let cancel = cancel.clone();
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.cancel();
            cancel.cancel();
        })
        .wrap_err("failed to install Ctrl-C handler")?;
    }

    let json = cli.json;
    match cli.cmd {
        Commands::Measure { average } => topup::measure(&cfg, &Rig::open()?, &cancel, average, json),
        Commands::Topup => topup::topup(&cfg, &Rig::open()?, &cancel, json),
        Commands::Run {
            ticks,
            rt,
            rt_prio,
            rt_lock,
        } => {
            if rt {
                rt::setup_rt_once(rt_prio, rt_lock);
            }
            topup::run_daemon(&cfg, &Rig::open()?, &cancel, &shutdown, ticks, json)
        }
        Commands::Status => topup::status(&cfg, &Rig::open()?, &cancel, json),
        Commands::SetTrigger { cm } => topup::set_trigger(&cfg, cm, json),
        Commands::SetSchedule { days, hour, minute } => {
            topup::set_schedule(&cfg, days.as_deref(), hour, minute, json)
        }
        Commands::SelfCheck => topup::self_check(&cfg, &Rig::open()?, &cancel, json),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    let cfg: Config = toml::from_str(&text)
        .wrap_err_with(|| format!("config {} is not valid", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("config {} failed validation", path.display()))?;
    Ok(cfg)
}

/// Console logs go to stderr (pretty or JSON); `[logging].file` adds a JSON
/// file layer. Level: `--log-level`, then `RUST_LOG`, then `[logging].level`.
fn init_tracing(json: bool, cli_level: Option<&str>, logging: &Logging) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match (cli_level, std::env::var("RUST_LOG")) {
        (Some(level), _) => EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid log level '{level}'"))?,
        (None, Ok(_)) => EnvFilter::try_from_default_env().wrap_err("invalid RUST_LOG")?,
        (None, Err(_)) => {
            let level = logging.level.as_deref().unwrap_or("info");
            EnvFilter::try_new(level)
                .wrap_err_with(|| format!("invalid logging.level '{level}'"))?
        }
    };

    let (pretty, json_layer) = if json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
            None,
        )
    };

    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let Some(name) = path.file_name() else {
                eyre::bail!("logging.file '{file}' has no file name");
            };
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "never" => tracing_appender::rolling::never(dir, name),
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                other => eyre::bail!("logging.rotation must be never, daily or hourly (got '{other}')"),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .wrap_err("failed to install tracing subscriber")?;
    Ok(())
}
