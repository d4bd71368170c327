use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use sysinfo::{Pid, Process, ProcessStatus, Signal, System};
use tokio::{process, time::sleep};

use crate::{error::ProcessError, instance::ServerInstance};

const SERVER_LOG: &str = "bedguard-server.log";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Start/stop/query for the server process of one instance.
#[async_trait]
pub trait ProcessController: Send + Sync {
    async fn is_running(&self, instance: &ServerInstance) -> Result<bool, ProcessError>;

    /// Graceful stop, escalated to a forced stop after a bounded wait.
    async fn stop(&self, instance: &ServerInstance) -> Result<(), ProcessError>;

    /// Launches detached. A running instance is left alone.
    async fn start(&self, instance: &ServerInstance) -> Result<(), ProcessError>;
}

/// Controls servers on this machine. Processes are matched by where their
/// executable lives, or by working directory plus executable name, never by
/// name alone since every instance runs the same binary.
#[derive(Debug, Clone)]
pub struct LocalProcessController {
    executable: String,
    stop_timeout: Duration,
}

impl LocalProcessController {
    pub fn new<S: Into<String>>(executable: S, stop_timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            stop_timeout,
        }
    }

    async fn find_pids(&self, root: &Path) -> Result<Vec<Pid>, ProcessError> {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let executable = self.executable.clone();

        tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes();
            sys.processes()
                .iter()
                .filter(|(_, p)| owned_by(p, &root, &executable))
                .map(|(pid, _)| *pid)
                .collect::<Vec<Pid>>()
        })
        .await
        .map_err(|e| ProcessError::Scan(e.to_string()))
    }

    async fn signal(&self, pids: Vec<Pid>, signal: Signal) -> Result<(), ProcessError> {
        tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes();
            for pid in pids {
                if let Some(p) = sys.process(pid) {
                    if p.kill_with(signal).is_none() {
                        p.kill();
                    }
                }
            }
        })
        .await
        .map_err(|e| ProcessError::Scan(e.to_string()))
    }

    /// Polls until no matching process is left or `limit` passes.
    async fn wait_gone(&self, root: &Path, limit: Duration) -> Result<bool, ProcessError> {
        let mut waited = Duration::ZERO;
        loop {
            if self.find_pids(root).await?.is_empty() {
                return Ok(true);
            }
            if waited >= limit {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
            waited += POLL_INTERVAL;
        }
    }

    fn build_start_command(&self, instance: &ServerInstance) -> Result<process::Command, ProcessError> {
        let exe = instance.root_dir.join(&self.executable);
        if !exe.is_file() {
            return Err(ProcessError::MissingExecutable(exe));
        }

        let log_path = server_log_path(instance);
        let log_err = |source| ProcessError::LogFile {
            path: log_path.clone(),
            source,
        };
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut command = process::Command::new(exe);
        command
            .current_dir(&instance.root_dir)
            .env("LD_LIBRARY_PATH", ".")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        command.process_group(0);
        Ok(command)
    }
}

fn owned_by(process: &Process, root: &Path, executable: &str) -> bool {
    if process.status() == ProcessStatus::Zombie {
        return false;
    }
    let exe_inside = process
        .exe()
        .map(|exe| exe.starts_with(root))
        .unwrap_or(false);
    let cwd_match = process.cwd().map(|cwd| cwd == root).unwrap_or(false);
    exe_inside
        || (cwd_match && process.name() == executable)
        || process.cmd().iter().any(|arg| launched_from(arg, root, executable))
}

/// True when `arg` names `executable` inside `root`. Scripts show up this way,
/// as an argument to their interpreter.
fn launched_from(arg: &str, root: &Path, executable: &str) -> bool {
    let path = Path::new(arg);
    if path.file_name().and_then(|n| n.to_str()) != Some(executable) {
        return false;
    }
    match path.parent() {
        Some(parent) if parent == root => true,
        Some(parent) => std::fs::canonicalize(parent)
            .map(|p| p == root)
            .unwrap_or(false),
        None => false,
    }
}

#[async_trait]
impl ProcessController for LocalProcessController {
    async fn is_running(&self, instance: &ServerInstance) -> Result<bool, ProcessError> {
        Ok(!self.find_pids(&instance.root_dir).await?.is_empty())
    }

    async fn stop(&self, instance: &ServerInstance) -> Result<(), ProcessError> {
        let pids = self.find_pids(&instance.root_dir).await?;
        if pids.is_empty() {
            tracing::info!("{} is not running", instance.name);
            return Ok(());
        }

        tracing::info!("Stopping {} ({} processes)", instance.name, pids.len());
        self.signal(pids, Signal::Term).await?;
        if self.wait_gone(&instance.root_dir, self.stop_timeout).await? {
            tracing::info!("{} stopped", instance.name);
            return Ok(());
        }

        tracing::warn!(
            "{} still running after {:?}, forcing stop",
            instance.name,
            self.stop_timeout
        );
        let pids = self.find_pids(&instance.root_dir).await?;
        self.signal(pids, Signal::Kill).await?;
        if self.wait_gone(&instance.root_dir, KILL_GRACE).await? {
            tracing::info!("{} killed", instance.name);
            Ok(())
        } else {
            Err(ProcessError::StopFailed(instance.root_dir.clone()))
        }
    }

    async fn start(&self, instance: &ServerInstance) -> Result<(), ProcessError> {
        if self.is_running(instance).await? {
            tracing::info!("{} is already running, not starting it again", instance.name);
            return Ok(());
        }

        let mut command = self.build_start_command(instance)?;
        let child = command.spawn().map_err(|source| ProcessError::SpawnFailed {
            path: instance.root_dir.clone(),
            source,
        })?;
        tracing::info!(
            "Started {} (pid {})",
            instance.name,
            child.id().map(|id| id.to_string()).unwrap_or_else(|| "?".to_string())
        );
        Ok(())
    }
}

/// Where a started server's stdout and stderr end up.
pub fn server_log_path(instance: &ServerInstance) -> PathBuf {
    instance.root_dir.join(SERVER_LOG)
}
