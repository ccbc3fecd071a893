use std::fs::File;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use hwprofiled::application::Application;
use hwprofiled::cli::{Action, Cli};
use hwprofiled::config::ConfigManager;
use hwprofiled::single_instance::{DEFAULT_PID_PATH, SingleInstanceGuard};

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "hwprofiled".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/hwprofiled.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run_daemon(cli: &Cli) -> Result<()> {
    let config_manager = ConfigManager::load(cli.config.clone()).await?;
    info!("hwprofiled {} starting", env!("CARGO_PKG_VERSION"));

    Application::builder()
        .with_config_manager(config_manager)
        .build()?
        .run()
        .await
}

async fn dispatch(cli: Cli, guard: SingleInstanceGuard) -> Result<()> {
    let Some(action) = cli.action() else {
        bail!("No action specified, try --start, --stop or --reload");
    };

    match action {
        Action::Stop => guard.stop().await,
        Action::Start => {
            guard.start()?;
            let result = run_daemon(&cli).await;
            guard.release();
            result
        }
        Action::Reload => {
            guard.reload().await?;
            let result = run_daemon(&cli).await;
            guard.release();
            result
        }
        Action::NewSettings(path) => {
            let config_manager = ConfigManager::load(cli.config.clone()).await?;
            config_manager
                .replace_settings(&path)
                .await
                .context("New settings file rejected")?;
            guard.reload().await?;
            let result = run_daemon(&cli).await;
            guard.release();
            result
        }
        Action::NewProfiles(path) => {
            let config_manager = ConfigManager::load(cli.config.clone()).await?;
            config_manager
                .replace_profiles(&path)
                .await
                .context("New profiles file rejected")?;
            guard.reload().await?;
            let result = run_daemon(&cli).await;
            guard.release();
            result
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if !nix::unistd::geteuid().is_root() {
        bail!("hwprofiled must run as root");
    }

    init_log()?;

    // Fork before the runtime exists; daemonizing afterwards would strand
    // the runtime's worker threads in the dead parent.
    if cli.daemonize {
        into_daemon()?;
    }

    let guard = SingleInstanceGuard::new(
        cli.pid_file
            .clone()
            .unwrap_or_else(|| DEFAULT_PID_PATH.into()),
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?
        .block_on(dispatch(cli, guard))
}
