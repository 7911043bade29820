//! Supervisor wire types.
//!
//! # Wire Format
//!
//! Every exchange is one request frame followed by one response frame:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | JSON payload     |
//! +----------------------------+------------------+
//! ```
//!
//! Requests serialize as `{"command": "<name>", "properties": {...}}` and
//! responses as `{"status": "<status>", ...}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use super::SupervisorError;

/// Maximum frame size accepted in either direction (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Builds the length-prefixed frame codec used on the RPC channel.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// Request sent to the supervisor, one variant per command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "properties", rename_all = "lowercase")]
pub enum SupervisorRequest {
    /// Register a new watcher.
    Add {
        /// Watcher name.
        name: String,
        /// Executable.
        cmd: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Process options.
        #[serde(default)]
        options: WatcherOptions,
        /// Start immediately after adding.
        #[serde(default)]
        start: bool,
    },

    /// Start one watcher, or every watcher when `name` is absent.
    Start {
        /// Watcher name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Stop one watcher, or every watcher when `name` is absent.
    Stop {
        /// Watcher name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Query one watcher's state.
    Status {
        /// Watcher name.
        name: String,
    },

    /// List registered watcher names.
    List {},

    /// Terminate the supervisor.
    Quit {},

    /// Change watcher options.
    Set {
        /// Watcher name.
        name: String,
        /// Options to change.
        options: BTreeMap<String, serde_json::Value>,
    },
}

impl SupervisorRequest {
    /// `start` for a single watcher.
    #[must_use]
    pub fn start(name: &str) -> Self {
        Self::Start {
            name: Some(name.to_string()),
        }
    }

    /// `start` for every watcher.
    #[must_use]
    pub const fn start_all() -> Self {
        Self::Start { name: None }
    }

    /// `stop` for a single watcher.
    #[must_use]
    pub fn stop(name: &str) -> Self {
        Self::Stop {
            name: Some(name.to_string()),
        }
    }

    /// `stop` for every watcher.
    #[must_use]
    pub const fn stop_all() -> Self {
        Self::Stop { name: None }
    }

    /// `status` for a watcher.
    #[must_use]
    pub fn status(name: &str) -> Self {
        Self::Status {
            name: name.to_string(),
        }
    }

    /// `list`.
    #[must_use]
    pub const fn list() -> Self {
        Self::List {}
    }

    /// `quit`.
    #[must_use]
    pub const fn quit() -> Self {
        Self::Quit {}
    }

    /// Command name as it appears on the wire.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Status { .. } => "status",
            Self::List {} => "list",
            Self::Quit {} => "quit",
            Self::Set { .. } => "set",
        }
    }
}

/// Process options carried by `add`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherOptions {
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Inherit the supervisor's environment.
    #[serde(default)]
    pub copy_env: bool,
    /// Virtual environment to activate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualenv: Option<String>,
    /// Where stdout goes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_stream: Option<StreamTarget>,
    /// Where stderr goes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_stream: Option<StreamTarget>,
}

/// Output redirection target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    /// Stream class understood by the supervisor.
    pub class: String,
    /// Target file.
    pub filename: String,
}

impl StreamTarget {
    /// A plain file stream.
    #[must_use]
    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            class: "FileStream".to_string(),
            filename: filename.into(),
        }
    }
}

/// Status field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Command succeeded.
    Ok,
    /// Command failed; see `reason`.
    Error,
    /// Watcher is running.
    Active,
    /// Watcher is registered but not running.
    Stopped,
    /// Watcher is shutting down.
    Stopping,
    /// Watcher is coming up.
    Starting,
    /// Any status this client does not know.
    #[serde(other)]
    Other,
}

/// Decoded supervisor response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorResponse {
    /// Outcome.
    pub status: ResponseStatus,
    /// Error explanation when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Watcher names, present on `list` replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchers: Option<Vec<String>>,
    /// Command-specific fields this client does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SupervisorResponse {
    /// A response carrying only `status`.
    #[must_use]
    pub fn with_status(status: ResponseStatus) -> Self {
        Self {
            status,
            reason: None,
            watchers: None,
            extra: serde_json::Map::new(),
        }
    }

    /// `{"status": "ok"}`.
    #[must_use]
    pub fn ok() -> Self {
        Self::with_status(ResponseStatus::Ok)
    }

    /// `{"status": "error", "reason": ...}`.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::with_status(ResponseStatus::Error)
        }
    }

    /// `{"status": "ok", "watchers": [...]}`.
    #[must_use]
    pub fn watcher_list<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            watchers: Some(names.into_iter().map(Into::into).collect()),
            ..Self::ok()
        }
    }

    /// Whether `status` is `ok`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Turns an `error` reply into [`SupervisorError::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Rejected`] when `status` is `error`.
    pub fn into_result(self) -> Result<Self, SupervisorError> {
        if self.status == ResponseStatus::Error {
            return Err(SupervisorError::Rejected {
                reason: self
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        Ok(self)
    }

    /// Like [`into_result`](Self::into_result) for an `add` of `name`,
    /// recognising the supervisor's "already exists" rejection.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::DuplicateWatcher`] or
    /// [`SupervisorError::Rejected`].
    pub fn into_add_result(self, name: &str) -> Result<Self, SupervisorError> {
        match self.into_result() {
            Err(SupervisorError::Rejected { reason }) if is_duplicate_reason(&reason) => {
                Err(SupervisorError::DuplicateWatcher {
                    name: name.to_string(),
                })
            },
            other => other,
        }
    }

    /// Watcher names from a `list` reply.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Rejected`] for an error reply and
    /// [`SupervisorError::Protocol`] if the reply has no `watchers` field.
    pub fn into_watchers(self) -> Result<Vec<String>, SupervisorError> {
        let response = self.into_result()?;
        if !response.is_ok() {
            return Err(SupervisorError::Protocol(format!(
                "unexpected list status {:?}",
                response.status
            )));
        }
        response
            .watchers
            .ok_or_else(|| SupervisorError::Protocol("list reply has no watchers field".to_string()))
    }
}

fn is_duplicate_reason(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("already exist") || reason.contains("already registered")
}
