//! Profile lifecycle orchestration.
//!
//! [`DaemonTamer`] resolves a profile's endpoint, builds watcher definitions
//! and drives the supervisor through the watcher state machine:
//!
//! ```text
//!                add            start
//! Unregistered ------> Stopped -------> Active
//!                         ^               |
//!                         +----- stop ----+
//! ```
//!
//! States are never stored locally. Each operation observes the current
//! state with `list` (and `status` for registered watchers) before acting,
//! which is what makes [`DaemonTamer::ensure_started`] idempotent: `add` is
//! only ever sent for a watcher the supervisor has just reported as absent.

use std::fmt;
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::TamerConfig;
use crate::registry::{EndpointRegistry, ProfileEndpoint, RegistryError};
use crate::supervisor::launcher::{
    CommandLauncher, LaunchError, LaunchedSupervisor, SupervisorLauncher,
};
use crate::supervisor::protocol::{ResponseStatus, SupervisorRequest};
use crate::supervisor::{Supervisor, SupervisorError};
use crate::watcher::{WatcherBuilder, WatcherError, WatcherSpec, daemon_watcher_name};

/// Default delay between readiness checks of a freshly launched supervisor.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Observed state of one watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// The supervisor does not know the watcher.
    Unregistered,
    /// Registered but not running.
    Stopped,
    /// Running.
    Active,
}

/// Profile status as reported to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// The profile's daemon watcher is running.
    Active,
    /// The supervisor is up but the daemon watcher is not running.
    Stopped,
    /// No supervisor answers at the profile's endpoint.
    ShutDown,
}

impl DaemonStatus {
    /// Wire-style label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::ShutDown => "shut down",
        }
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a quit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuitOutcome {
    /// The supervisor acknowledged `quit`.
    Quit,
    /// No supervisor was running.
    AlreadyDown,
    /// The supervisor still has these watchers, so it was left running.
    WatchersRemain(Vec<String>),
}

/// Orchestrates profile lifecycles over a [`Supervisor`].
pub struct DaemonTamer<S> {
    registry: EndpointRegistry,
    supervisor: S,
    watchers: WatcherBuilder,
    launcher: Option<Box<dyn SupervisorLauncher>>,
    startup_timeout: Duration,
    poll_interval: Duration,
}

impl<S: Supervisor> DaemonTamer<S> {
    /// Creates a tamer that never launches supervisors itself.
    #[must_use]
    pub fn new(registry: EndpointRegistry, supervisor: S, watchers: WatcherBuilder) -> Self {
        Self {
            registry,
            supervisor,
            watchers,
            launcher: None,
            startup_timeout: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Creates a tamer from configuration, including the supervisor
    /// launcher when `[supervisor] command` is set.
    #[must_use]
    pub fn from_config(config: &TamerConfig, supervisor: S) -> Self {
        let tamer = Self::new(
            EndpointRegistry::from_config(&config.registry),
            supervisor,
            WatcherBuilder::new(config.watchers.clone()),
        );
        match CommandLauncher::from_config(config) {
            Some(launcher) => tamer.with_launcher(launcher, config.supervisor.startup_timeout),
            None => tamer,
        }
    }

    /// Launch a supervisor with `launcher` when `start` finds none, waiting
    /// up to `startup_timeout` for it to answer.
    #[must_use]
    pub fn with_launcher(
        mut self,
        launcher: impl SupervisorLauncher + 'static,
        startup_timeout: Duration,
    ) -> Self {
        self.launcher = Some(Box::new(launcher));
        self.startup_timeout = startup_timeout;
        self
    }

    /// Sets the delay between readiness checks.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The endpoint registry.
    #[must_use]
    pub const fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Observes the state of watcher `name` at `endpoint`.
    ///
    /// # Errors
    ///
    /// Propagates supervisor errors, including unreachability.
    pub fn observe(&self, endpoint: &str, name: &str) -> Result<WatcherState, SupervisorError> {
        let watchers = self.list_watchers(endpoint)?;
        if !watchers.iter().any(|watcher| watcher == name) {
            return Ok(WatcherState::Unregistered);
        }

        let response = self
            .supervisor
            .call(endpoint, &SupervisorRequest::status(name))?
            .into_result()?;
        let state = if response.status == ResponseStatus::Active {
            WatcherState::Active
        } else {
            WatcherState::Stopped
        };
        debug!(endpoint, watcher = name, ?state, "observed watcher");
        Ok(state)
    }

    /// Makes sure the profile's daemon watcher is registered and running.
    ///
    /// Allocates an endpoint for unknown profiles and, when a launcher is
    /// configured, launches the supervisor if none answers. Returns whether
    /// the watcher is active afterwards.
    ///
    /// # Errors
    ///
    /// Fails on registry errors, an unreachable supervisor (after any launch
    /// attempt) and any supervisor rejection other than a duplicate `add`.
    pub fn ensure_started(&self, profile: &str) -> Result<bool, TamerError> {
        let endpoint = self.registry.resolve(profile)?;
        self.ensure_supervisor(&endpoint)?;
        let spec = self.watchers.daemon_watcher(&endpoint);
        self.ensure_watcher(&endpoint.control_endpoint(), &spec)
    }

    /// Makes sure the relay watcher for `tag` runs under `profile`'s
    /// supervisor.
    ///
    /// # Errors
    ///
    /// As [`ensure_started`](Self::ensure_started), plus
    /// [`WatcherError::InvalidTag`].
    pub fn ensure_streamer(&self, profile: &str, tag: &str) -> Result<bool, TamerError> {
        let spec = self.watchers.streamer_watcher(tag)?;
        let endpoint = self.registry.resolve(profile)?;
        self.ensure_supervisor(&endpoint)?;
        self.ensure_watcher(&endpoint.control_endpoint(), &spec)
    }

    /// Stops the profile's daemon watcher if the supervisor knows it.
    ///
    /// The watcher stays registered. Returns whether `stop` was sent.
    ///
    /// # Errors
    ///
    /// Fails if the supervisor is unreachable or rejects the command.
    pub fn stop(&self, profile: &str) -> Result<bool, TamerError> {
        let Some(endpoint) = self.registry.get(profile)? else {
            debug!(profile, "profile has no endpoint, nothing to stop");
            return Ok(false);
        };
        let control = endpoint.control_endpoint();
        let name = daemon_watcher_name(&endpoint.uuid);

        if !self.list_watchers(&control)?.contains(&name) {
            debug!(profile, watcher = %name, "watcher not registered, nothing to stop");
            return Ok(false);
        }

        self.supervisor
            .call(&control, &SupervisorRequest::stop(&name))?
            .into_result()?;
        info!(profile, watcher = %name, "stopped watcher");
        Ok(true)
    }

    /// Terminates the profile's supervisor if it has no watchers left.
    ///
    /// An absent supervisor counts as success.
    ///
    /// # Errors
    ///
    /// Fails on registry errors and on supervisor errors other than
    /// unreachability.
    pub fn quit(&self, profile: &str) -> Result<QuitOutcome, TamerError> {
        let Some(endpoint) = self.registry.get(profile)? else {
            return Ok(QuitOutcome::AlreadyDown);
        };
        let control = endpoint.control_endpoint();

        let watchers = match self.list_watchers(&control) {
            Ok(watchers) => watchers,
            Err(e) if e.is_unreachable() => {
                debug!(profile, error = %e, "supervisor already gone");
                return Ok(QuitOutcome::AlreadyDown);
            },
            Err(e) => return Err(e.into()),
        };
        if !watchers.is_empty() {
            info!(profile, count = watchers.len(), "watchers remain, leaving supervisor running");
            return Ok(QuitOutcome::WatchersRemain(watchers));
        }

        self.send_quit(profile, &control)
    }

    /// Terminates the profile's supervisor regardless of its watchers.
    ///
    /// # Errors
    ///
    /// As [`quit`](Self::quit).
    pub fn shutdown(&self, profile: &str) -> Result<QuitOutcome, TamerError> {
        let Some(endpoint) = self.registry.get(profile)? else {
            return Ok(QuitOutcome::AlreadyDown);
        };
        self.send_quit(profile, &endpoint.control_endpoint())
    }

    /// Reports the profile's daemon status.
    ///
    /// An unreachable supervisor is [`DaemonStatus::ShutDown`], not an
    /// error. Profiles without an endpoint are never allocated one here.
    ///
    /// # Errors
    ///
    /// Fails on registry errors and on supervisor errors other than
    /// unreachability.
    pub fn status(&self, profile: &str) -> Result<DaemonStatus, TamerError> {
        let Some(endpoint) = self.registry.get(profile)? else {
            return Ok(DaemonStatus::ShutDown);
        };
        let name = daemon_watcher_name(&endpoint.uuid);

        match self.observe(&endpoint.control_endpoint(), &name) {
            Ok(WatcherState::Active) => Ok(DaemonStatus::Active),
            Ok(WatcherState::Stopped | WatcherState::Unregistered) => Ok(DaemonStatus::Stopped),
            Err(e) if e.is_unreachable() => Ok(DaemonStatus::ShutDown),
            Err(e) => Err(e.into()),
        }
    }

    /// Stops every watcher under the profile's supervisor.
    ///
    /// # Errors
    ///
    /// Fails for unknown profiles and on any supervisor error.
    pub fn pause(&self, profile: &str) -> Result<(), TamerError> {
        let endpoint = self.known_endpoint(profile)?;
        self.supervisor
            .call(&endpoint.control_endpoint(), &SupervisorRequest::stop_all())?
            .into_result()?;
        info!(profile, "paused supervisor");
        Ok(())
    }

    /// Starts every watcher under the profile's supervisor.
    ///
    /// # Errors
    ///
    /// Fails for unknown profiles and on any supervisor error.
    pub fn unpause(&self, profile: &str) -> Result<(), TamerError> {
        let endpoint = self.known_endpoint(profile)?;
        self.supervisor
            .call(&endpoint.control_endpoint(), &SupervisorRequest::start_all())?
            .into_result()?;
        info!(profile, "unpaused supervisor");
        Ok(())
    }

    fn known_endpoint(&self, profile: &str) -> Result<ProfileEndpoint, TamerError> {
        self.registry
            .get(profile)?
            .ok_or_else(|| TamerError::UnknownProfile(profile.to_string()))
    }

    fn list_watchers(&self, endpoint: &str) -> Result<Vec<String>, SupervisorError> {
        self.supervisor
            .call(endpoint, &SupervisorRequest::list())?
            .into_watchers()
    }

    fn ensure_watcher(&self, endpoint: &str, spec: &WatcherSpec) -> Result<bool, TamerError> {
        match self.observe(endpoint, &spec.name)? {
            WatcherState::Active => {
                debug!(watcher = %spec.name, "watcher already active");
                Ok(true)
            },
            WatcherState::Stopped => self.start_watcher(endpoint, &spec.name),
            WatcherState::Unregistered => {
                self.add_watcher(endpoint, spec)?;
                self.start_watcher(endpoint, &spec.name)
            },
        }
    }

    fn add_watcher(&self, endpoint: &str, spec: &WatcherSpec) -> Result<(), TamerError> {
        info!(watcher = %spec.name, command = %spec.command_line(), "adding watcher");
        let result = self
            .supervisor
            .call(endpoint, &spec.add_request())?
            .into_add_result(&spec.name);
        match result {
            Ok(_) => Ok(()),
            Err(SupervisorError::DuplicateWatcher { name }) => {
                warn!(watcher = %name, "watcher appeared before add, starting it instead");
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }

    fn start_watcher(&self, endpoint: &str, name: &str) -> Result<bool, TamerError> {
        let response = self
            .supervisor
            .call(endpoint, &SupervisorRequest::start(name))?
            .into_result()?;
        info!(watcher = name, status = ?response.status, "started watcher");
        Ok(response.is_ok())
    }

    fn send_quit(&self, profile: &str, endpoint: &str) -> Result<QuitOutcome, TamerError> {
        match self.supervisor.call(endpoint, &SupervisorRequest::quit()) {
            Ok(response) => {
                response.into_result()?;
                info!(profile, endpoint, "supervisor quit");
                Ok(QuitOutcome::Quit)
            },
            Err(e) if e.is_unreachable() => {
                debug!(profile, error = %e, "supervisor already gone");
                Ok(QuitOutcome::AlreadyDown)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Checks the supervisor, launching one if it is unreachable and a
    /// launcher is configured.
    fn ensure_supervisor(&self, endpoint: &ProfileEndpoint) -> Result<(), TamerError> {
        let control = endpoint.control_endpoint();
        match self.list_watchers(&control) {
            Ok(_) => Ok(()),
            Err(e) if e.is_unreachable() => {
                let Some(launcher) = &self.launcher else {
                    return Err(e.into());
                };
                info!(profile = %endpoint.profile, endpoint = %control, "no supervisor answering, launching one");
                let mut launched = launcher.launch(endpoint)?;
                self.wait_until_ready(&control, &mut launched)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Polls until the supervisor answers, the launched process fails or
    /// the startup timeout elapses.
    fn wait_until_ready(
        &self,
        endpoint: &str,
        launched: &mut LaunchedSupervisor,
    ) -> Result<(), TamerError> {
        let started = Instant::now();
        loop {
            match self.list_watchers(endpoint) {
                Ok(_) => {
                    debug!(endpoint, waited = ?started.elapsed(), "supervisor ready");
                    return Ok(());
                },
                Err(e) if e.is_unreachable() => {
                    match launched.try_exit_status() {
                        Ok(Some(status)) if !status.success() => {
                            return Err(TamerError::SupervisorExited {
                                endpoint: endpoint.to_string(),
                                status,
                            });
                        },
                        Ok(_) => {},
                        Err(e) => {
                            debug!(endpoint, pid = ?launched.pid(), error = %e, "cannot poll launched supervisor");
                        },
                    }
                    if started.elapsed() >= self.startup_timeout {
                        return Err(TamerError::SupervisorNotReady {
                            endpoint: endpoint.to_string(),
                            waited: self.startup_timeout,
                        });
                    }
                    thread::sleep(self.poll_interval);
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TamerError {
    /// Endpoint registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Supervisor RPC failure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Invalid watcher definition input.
    #[error(transparent)]
    Watcher(#[from] WatcherError),

    /// Supervisor launch failure.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The profile has never been started, so it has no endpoint.
    #[error("profile {0:?} has no registered endpoint; start it first")]
    UnknownProfile(String),

    /// The launched supervisor process exited unsuccessfully before it
    /// started answering.
    #[error("supervisor for {endpoint} exited before becoming ready ({status})")]
    SupervisorExited {
        /// Endpoint being polled.
        endpoint: String,
        /// Exit status of the launched process.
        status: ExitStatus,
    },

    /// A launched supervisor never started answering.
    #[error("supervisor at {endpoint} did not come up within {waited:?}")]
    SupervisorNotReady {
        /// Endpoint being polled.
        endpoint: String,
        /// Time spent waiting.
        waited: Duration,
    },
}

impl TamerError {
    /// Whether the error means no supervisor is answering.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        match self {
            Self::Supervisor(e) => e.is_unreachable(),
            Self::SupervisorNotReady { .. } | Self::SupervisorExited { .. } => true,
            _ => false,
        }
    }
}
