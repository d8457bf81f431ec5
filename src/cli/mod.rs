pub mod daemon_path;
pub mod process;
pub mod sessions;

use std::{env, ffi::OsString, path::PathBuf};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use daemon_path::to_daemon_path;
use process::{kill_previous_servers, restart_server};
use sessions::{process_sessions_command, SessionsCommand};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    daemon::{args::DaemonArgs, start_daemon},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

const DIR_HELP: &str =
    "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state";

#[derive(Parser, Debug)]
#[command(name = "screentime", version, long_about = None)]
#[command(about = "Tracks which application you spend your time in", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a tracking daemon, replacing a running one")]
    Init {
        #[arg(long, help = DIR_HELP)]
        dir: Option<PathBuf>,
        #[arg(long, help = "Config file. Defaults to config.json in the application directory")]
        config: Option<PathBuf>,
        #[arg(long, help = "Seconds without input after which you are considered idle")]
        idle_threshold: Option<u64>,
    },
    #[command(
        about = "Run the tracker directly in current console. Useful for debugging and seeing live events"
    )]
    Serve {
        #[arg(long, help = DIR_HELP)]
        dir: Option<PathBuf>,
        #[arg(long, help = "Config file. Defaults to config.json in the application directory")]
        config: Option<PathBuf>,
        #[arg(long, help = "Seconds without input after which you are considered idle")]
        idle_threshold: Option<u64>,
    },
    #[command(about = "Stop currently running daemon")]
    Stop {},
    #[command(about = "Display recorded sessions")]
    Sessions {
        #[arg(long, help = DIR_HELP)]
        dir: Option<PathBuf>,
        #[command(flatten)]
        command: SessionsCommand,
    },
}

impl Commands {
    fn dir(&self) -> Option<PathBuf> {
        match self {
            Commands::Init { dir, .. }
            | Commands::Serve { dir, .. }
            | Commands::Sessions { dir, .. } => dir.clone(),
            Commands::Stop {} => None,
        }
    }
}

/// Arguments forwarded to the daemon binary by `init`.
fn daemon_arguments(
    dir: Option<PathBuf>,
    config: Option<PathBuf>,
    idle_threshold: Option<u64>,
) -> Vec<OsString> {
    let mut result = vec![];
    if let Some(dir) = dir {
        result.extend(["--dir".into(), dir.into_os_string()]);
    }
    if let Some(config) = config {
        result.extend(["--config".into(), config.into_os_string()]);
    }
    if let Some(seconds) = idle_threshold {
        result.extend(["--idle-threshold".into(), seconds.to_string().into()]);
    }
    result
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args
        .commands
        .dir()
        .map_or_else(create_application_default_path, Ok)?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let serving = matches!(args.commands, Commands::Serve { .. });
    let prefix = if serving { DAEMON_PREFIX } else { CLI_PREFIX };
    enable_logging(prefix, &app_dir.join("logs"), logging_level, args.log || serving)?;

    match args.commands {
        Commands::Init {
            dir,
            config,
            idle_threshold,
        } => {
            let daemon = to_daemon_path(env::current_exe()?);
            restart_server(&daemon, &daemon_arguments(dir, config, idle_threshold))?;
            println!("Daemon started");
            Ok(())
        }
        Commands::Stop {} => {
            let daemon = to_daemon_path(env::current_exe()?);
            let stopped = kill_previous_servers(&daemon)?;
            info!("Stopped {stopped} daemons");
            println!("Stopped {stopped} daemon(s)");
            Ok(())
        }
        Commands::Serve {
            dir,
            config,
            idle_threshold,
        } => {
            let daemon_args = DaemonArgs {
                force: true,
                dir,
                config,
                log_console: true,
                log: logging_level,
                idle_threshold,
            };
            let config = daemon_args.tracker_config(&app_dir)?;
            start_daemon(app_dir, config).await
        }
        Commands::Sessions { command, .. } => {
            process_sessions_command(command, &app_dir, Utc::now().date_naive()).await
        }
    }
}
