//! Watcher definitions.
//!
//! Pure builders turning a profile (or a stream tag) into the definition
//! handed to the supervisor's `add` command. Nothing here touches the
//! filesystem or the network; the same inputs always give the same
//! [`WatcherSpec`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::WatcherConfig;
use crate::registry::ProfileEndpoint;
use crate::supervisor::protocol::{StreamTarget, SupervisorRequest, WatcherOptions};

/// Prefix of per-profile daemon watcher names.
pub const DAEMON_PREFIX: &str = "daemon-";

/// Prefix of log relay watcher names.
pub const STREAM_PREFIX: &str = "stream-";

/// Name of the daemon watcher for a profile uuid.
#[must_use]
pub fn daemon_watcher_name(uuid: &str) -> String {
    format!("{DAEMON_PREFIX}{uuid}")
}

/// Name of the relay watcher for a validated tag.
#[must_use]
pub fn streamer_watcher_name(tag: &str) -> String {
    format!("{STREAM_PREFIX}{tag}")
}

/// Supervisor-facing definition of one managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSpec {
    /// Unique watcher name.
    pub name: String,
    /// Executable.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Environment set on top of the supervisor's.
    pub env: BTreeMap<String, String>,
    /// Virtual environment, if any.
    pub virtualenv: Option<PathBuf>,
    /// stdout file.
    pub stdout_target: PathBuf,
    /// stderr file.
    pub stderr_target: PathBuf,
}

impl WatcherSpec {
    /// The `add` request registering this watcher without starting it.
    #[must_use]
    pub fn add_request(&self) -> SupervisorRequest {
        SupervisorRequest::Add {
            name: self.name.clone(),
            cmd: self.command.clone(),
            args: self.args.clone(),
            options: WatcherOptions {
                working_dir: Some(self.working_dir.display().to_string()),
                env: self.env.clone(),
                copy_env: true,
                virtualenv: self
                    .virtualenv
                    .as_ref()
                    .map(|path| path.display().to_string()),
                stdout_stream: Some(StreamTarget::file(self.stdout_target.display().to_string())),
                stderr_stream: Some(StreamTarget::file(self.stderr_target.display().to_string())),
            },
            start: false,
        }
    }

    /// Command and arguments joined with spaces, for display.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builds watcher definitions from the `[watchers]` configuration.
#[derive(Debug, Clone)]
pub struct WatcherBuilder {
    config: WatcherConfig,
}

impl WatcherBuilder {
    /// Creates a builder.
    #[must_use]
    pub const fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    /// The per-profile daemon watcher.
    ///
    /// Named `daemon-<uuid>`; the profile name is passed as `--profile` and
    /// logs go to `daemon-<uuid>.{out,err}.log` under the log directory.
    #[must_use]
    pub fn daemon_watcher(&self, profile: &ProfileEndpoint) -> WatcherSpec {
        let name = daemon_watcher_name(&profile.uuid);

        let mut args = self.config.daemon_args.clone();
        args.push("--profile".to_string());
        args.push(profile.profile.clone());

        let mut env = self.base_env();
        env.insert("TAMER_PROFILE".to_string(), profile.profile.clone());
        env.insert("TAMER_PROFILE_UUID".to_string(), profile.uuid.clone());

        self.spec(name, self.config.daemon_command.clone(), args, env)
    }

    /// The log relay watcher for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::InvalidTag`] unless `tag` is non-empty and
    /// made of ASCII letters, digits, `_`, `-` and `.` (and is not `.` or
    /// `..`).
    pub fn streamer_watcher(&self, tag: &str) -> Result<WatcherSpec, WatcherError> {
        validate_tag(tag)?;
        let name = streamer_watcher_name(tag);

        let mut args = self.config.streamer_args.clone();
        args.push(tag.to_string());

        let mut env = self.base_env();
        env.insert("TAMER_STREAM_TAG".to_string(), tag.to_string());

        Ok(self.spec(name, self.config.streamer_command.clone(), args, env))
    }

    fn base_env(&self) -> BTreeMap<String, String> {
        let mut env = self.config.env.clone();
        env.insert("PYTHONUNBUFFERED".to_string(), "True".to_string());
        env
    }

    fn spec(
        &self,
        name: String,
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> WatcherSpec {
        WatcherSpec {
            stdout_target: self.config.log_dir.join(format!("{name}.out.log")),
            stderr_target: self.config.log_dir.join(format!("{name}.err.log")),
            name,
            command,
            args,
            working_dir: self.config.working_dir.clone(),
            env,
            virtualenv: self.config.virtualenv.clone(),
        }
    }
}

fn validate_tag(tag: &str) -> Result<(), WatcherError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if tag.is_empty() || tag == "." || tag == ".." || !tag.chars().all(allowed) {
        return Err(WatcherError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

/// Watcher definition errors.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// The stream tag cannot be used in a watcher name.
    #[error("invalid stream tag {0:?}: use letters, digits, '_', '-' or '.'")]
    InvalidTag(String),
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn builder() -> WatcherBuilder {
        WatcherBuilder::new(WatcherConfig {
            daemon_command: "/opt/engine/bin/verdi".to_string(),
            daemon_args: vec!["devel".to_string(), "run_daemon".to_string()],
            streamer_command: "/opt/engine/bin/relay".to_string(),
            streamer_args: vec!["--follow".to_string()],
            virtualenv: Some(PathBuf::from("/opt/engine")),
            working_dir: PathBuf::from("/srv/work"),
            log_dir: PathBuf::from("/srv/log"),
            env: BTreeMap::from([("ENGINE_MODE".to_string(), "batch".to_string())]),
        })
    }

    fn profile(name: &str, uuid: &str) -> ProfileEndpoint {
        ProfileEndpoint {
            profile: name.to_string(),
            uuid: uuid.to_string(),
            host: "127.0.0.1".to_string(),
            port: 6000,
        }
    }

    #[test]
    fn test_daemon_watcher() {
        let spec = builder().daemon_watcher(&profile("alice", "1234"));

        assert_eq!(spec.name, "daemon-1234");
        assert_eq!(spec.command, "/opt/engine/bin/verdi");
        assert_eq!(spec.args, vec!["devel", "run_daemon", "--profile", "alice"]);
        assert_eq!(spec.command_line(), "/opt/engine/bin/verdi devel run_daemon --profile alice");
        assert_eq!(spec.stdout_target, Path::new("/srv/log/daemon-1234.out.log"));
        assert_eq!(spec.stderr_target, Path::new("/srv/log/daemon-1234.err.log"));
        assert_eq!(spec.env["TAMER_PROFILE"], "alice");
        assert_eq!(spec.env["TAMER_PROFILE_UUID"], "1234");
        assert_eq!(spec.env["PYTHONUNBUFFERED"], "True");
        assert_eq!(spec.env["ENGINE_MODE"], "batch");
    }

    #[test]
    fn test_daemon_watcher_is_deterministic() {
        let builder = builder();
        let alice = profile("alice", "1234");
        assert_eq!(builder.daemon_watcher(&alice), builder.daemon_watcher(&alice));
    }

    #[test]
    fn test_profiles_never_share_log_paths() {
        let builder = builder();
        let a = builder.daemon_watcher(&profile("alice", "aaaa"));
        let b = builder.daemon_watcher(&profile("bob", "bbbb"));
        assert_ne!(a.name, b.name);
        assert_ne!(a.stdout_target, b.stdout_target);
        assert_ne!(a.stderr_target, b.stderr_target);
    }

    #[test]
    fn test_streamer_watcher() {
        let spec = builder().streamer_watcher("ingest.1").unwrap();
        assert_eq!(spec.name, "stream-ingest.1");
        assert_eq!(spec.args, vec!["--follow", "ingest.1"]);
        assert_eq!(spec.env["TAMER_STREAM_TAG"], "ingest.1");
        assert_eq!(spec.stdout_target, Path::new("/srv/log/stream-ingest.1.out.log"));
    }

    #[test]
    fn test_streamer_tags_are_collision_free() {
        let builder = builder();
        let a = builder.streamer_watcher("a-b").unwrap();
        let b = builder.streamer_watcher("a_b").unwrap();
        assert_ne!(a.name, b.name);
        assert_ne!(a.stdout_target, b.stdout_target);
    }

    #[test]
    fn test_invalid_stream_tags() {
        let builder = builder();
        for tag in ["", ".", "..", "a/b", "a b", "tag:1", "ü"] {
            assert!(
                matches!(builder.streamer_watcher(tag), Err(WatcherError::InvalidTag(_))),
                "{tag:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_add_request() {
        let spec = builder().daemon_watcher(&profile("alice", "1234"));

        match spec.add_request() {
            SupervisorRequest::Add {
                name,
                cmd,
                args,
                options,
                start,
            } => {
                assert_eq!(name, "daemon-1234");
                assert_eq!(cmd, "/opt/engine/bin/verdi");
                assert_eq!(args.last().map(String::as_str), Some("alice"));
                assert!(!start);
                assert!(options.copy_env);
                assert_eq!(options.working_dir.as_deref(), Some("/srv/work"));
                assert_eq!(options.virtualenv.as_deref(), Some("/opt/engine"));
                assert_eq!(
                    options.stdout_stream,
                    Some(StreamTarget::file("/srv/log/daemon-1234.out.log"))
                );
                assert_eq!(
                    options.stderr_stream,
                    Some(StreamTarget::file("/srv/log/daemon-1234.err.log"))
                );
            },
            other => panic!("expected add, got {other:?}"),
        }
    }
}
