//! Launching a supervisor for a profile.
//!
//! The supervisor daemonizes itself; the launcher only spawns the configured
//! command with the profile's endpoints substituted into its arguments and
//! its output appended to a per-profile log file.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::info;

use crate::config::TamerConfig;
use crate::registry::ProfileEndpoint;

/// Starts a supervisor listening on a profile's endpoints.
pub trait SupervisorLauncher {
    /// Spawns the supervisor for `endpoint` without waiting for it to
    /// become reachable.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] if the process cannot be spawned.
    fn launch(&self, endpoint: &ProfileEndpoint) -> Result<LaunchedSupervisor, LaunchError>;
}

/// Handle to a freshly launched supervisor process.
///
/// Dropping the handle leaves the process running.
#[derive(Debug)]
pub struct LaunchedSupervisor {
    child: Option<Child>,
}

impl LaunchedSupervisor {
    /// Tracks a spawned child.
    #[must_use]
    pub const fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// A launch whose process cannot be observed.
    #[must_use]
    pub const fn untracked() -> Self {
        Self { child: None }
    }

    /// Process id, if tracked.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Exit status if the launched process has already terminated.
    ///
    /// A supervisor that daemonizes exits successfully while its forked
    /// child keeps running, so only unsuccessful statuses mean failure.
    ///
    /// # Errors
    ///
    /// Propagates `try_wait` failures.
    pub fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }
}

/// Launcher running a configured executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLauncher {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    log_dir: PathBuf,
}

impl CommandLauncher {
    /// Creates a launcher.
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: working_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Builds a launcher from `[supervisor]`, or `None` when no supervisor
    /// command is configured.
    #[must_use]
    pub fn from_config(config: &TamerConfig) -> Option<Self> {
        let command = config.supervisor.command.as_ref()?;
        Some(Self::new(
            command.clone(),
            config.supervisor.args.clone(),
            config.watchers.working_dir.clone(),
            config.watchers.log_dir.clone(),
        ))
    }

    /// Arguments with placeholders replaced for `endpoint`.
    #[must_use]
    pub fn render_args(&self, endpoint: &ProfileEndpoint) -> Vec<String> {
        let control = endpoint.control_endpoint();
        let pubsub = endpoint.pubsub_endpoint();
        let stats = endpoint.stats_endpoint();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{profile}", &endpoint.profile)
                    .replace("{endpoint}", &control)
                    .replace("{pubsub}", &pubsub)
                    .replace("{stats}", &stats)
            })
            .collect()
    }

    /// Log file receiving the supervisor's own output.
    #[must_use]
    pub fn log_file(&self, endpoint: &ProfileEndpoint) -> PathBuf {
        self.log_dir.join(format!("supervisor-{}.log", endpoint.uuid))
    }
}

impl SupervisorLauncher for CommandLauncher {
    fn launch(&self, endpoint: &ProfileEndpoint) -> Result<LaunchedSupervisor, LaunchError> {
        fs::create_dir_all(&self.log_dir).map_err(|e| LaunchError::Io {
            path: self.log_dir.clone(),
            source: e,
        })?;
        let log_path = self.log_file(endpoint);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| LaunchError::Io {
                path: log_path.clone(),
                source: e,
            })?;
        let log_err = log.try_clone().map_err(|e| LaunchError::Io {
            path: log_path.clone(),
            source: e,
        })?;

        let args = self.render_args(endpoint);
        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if self.working_dir.is_dir() {
            cmd.current_dir(&self.working_dir);
        }

        let child = cmd.spawn().map_err(|e| LaunchError::Spawn {
            command: self.command.clone(),
            source: e,
        })?;

        info!(
            profile = %endpoint.profile,
            pid = child.id(),
            endpoint = %endpoint.control_endpoint(),
            log = %log_path.display(),
            "launched supervisor"
        );
        Ok(LaunchedSupervisor::from_child(child))
    }
}

/// Supervisor launch errors.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The supervisor executable could not be started.
    #[error("failed to spawn supervisor {command:?}: {source}")]
    Spawn {
        /// Executable.
        command: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Preparing the log file failed.
    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        /// Path being prepared.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> ProfileEndpoint {
        ProfileEndpoint {
            profile: "alice".to_string(),
            uuid: "0c5f9a8e-aaaa-4bbb-8ccc-000000000001".to_string(),
            host: "127.0.0.1".to_string(),
            port: 6000,
        }
    }

    #[test]
    fn test_render_args() {
        let launcher = CommandLauncher::new(
            "circusd",
            vec![
                "--endpoint".to_string(),
                "{endpoint}".to_string(),
                "--pubsub={pubsub}".to_string(),
                "--stats={stats}".to_string(),
                "--name={profile}".to_string(),
            ],
            "/tmp",
            "/tmp/log",
        );

        assert_eq!(
            launcher.render_args(&endpoint()),
            vec![
                "--endpoint",
                "tcp://127.0.0.1:6000",
                "--pubsub=tcp://127.0.0.1:6001",
                "--stats=tcp://127.0.0.1:6002",
                "--name=alice",
            ]
        );
    }

    #[test]
    fn test_from_config_requires_command() {
        let mut config = TamerConfig::default();
        assert!(CommandLauncher::from_config(&config).is_none());

        config.supervisor.command = Some("circusd".to_string());
        let launcher = CommandLauncher::from_config(&config).unwrap();
        assert_eq!(launcher.command, "circusd");
    }

    #[test]
    fn test_log_file_is_per_profile() {
        let launcher = CommandLauncher::new("circusd", Vec::new(), "/tmp", "/var/log/tamer");
        assert_eq!(
            launcher.log_file(&endpoint()),
            PathBuf::from("/var/log/tamer/supervisor-0c5f9a8e-aaaa-4bbb-8ccc-000000000001.log")
        );
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_launch_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = CommandLauncher::new(
            "nonexistent_supervisor_12345",
            Vec::new(),
            dir.path(),
            dir.path().join("log"),
        );

        let err = launcher.launch(&endpoint()).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }), "{err:?}");
        assert!(dir.path().join("log").is_dir());
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_launch_writes_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = CommandLauncher::new(
            "sh",
            vec!["-c".to_string(), "echo listening on {endpoint}".to_string()],
            dir.path(),
            dir.path(),
        );

        let mut launched = launcher.launch(&endpoint()).unwrap();
        assert!(launched.pid().is_some());

        let log = launcher.log_file(&endpoint());
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let content = fs::read_to_string(&log).unwrap_or_default();
            if content.contains("listening on tcp://127.0.0.1:6000") {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "log never written: {content:?}");
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let status = loop {
            if let Some(status) = launched.try_exit_status().unwrap() {
                break status;
            }
            assert!(std::time::Instant::now() < deadline, "process never exited");
            std::thread::sleep(std::time::Duration::from_millis(20));
        };
        assert!(status.success());
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_launched_failure_is_observable() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = CommandLauncher::new(
            "sh",
            vec!["-c".to_string(), "exit 3".to_string()],
            dir.path(),
            dir.path(),
        );

        let mut launched = launcher.launch(&endpoint()).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let status = loop {
            if let Some(status) = launched.try_exit_status().unwrap() {
                break status;
            }
            assert!(std::time::Instant::now() < deadline, "process never exited");
            std::thread::sleep(std::time::Duration::from_millis(20));
        };
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn test_untracked_launch_never_reports_exit() {
        let mut launched = LaunchedSupervisor::untracked();
        assert!(launched.pid().is_none());
        assert!(launched.try_exit_status().unwrap().is_none());
    }
}
