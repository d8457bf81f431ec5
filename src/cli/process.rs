use std::{ffi::OsString, path::Path, process::Stdio};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tracing::{info, warn};

/// Terminates every other process running the executable at `name`. Returns how many were
/// stopped.
pub fn kill_previous_servers(name: &Path) -> Result<usize> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
    );
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't find own pid: {e}"))?;

    let mut stopped = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            info!("Stopping daemon {pid}");
            // SIGTERM lets the daemon persist the open session. On Windows this falls through
            // to a forceful kill.
            if process.kill_with(Signal::Term).is_none() {
                warn!("Graceful termination is not supported, killing {pid}");
                process.kill();
            }
            process.wait();
            stopped += 1;
        }
    }
    Ok(stopped)
}

/// Stops running daemons and launches a fresh one from `daemon_path`. The daemon detaches
/// itself, extra `daemon_args` are passed through.
pub fn restart_server(daemon_path: &Path, daemon_args: &[OsString]) -> Result<()> {
    kill_previous_servers(daemon_path)?;

    let mut command = std::process::Command::new(daemon_path);
    command.args(daemon_args);

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    info!("Spawning {daemon_path:?}");
    // The daemon forks on its own, waiting only reaps the launcher.
    let status = command.spawn()?.wait()?;
    if !status.success() {
        return Err(anyhow!("Daemon failed to start: {status}"));
    }
    Ok(())
}
