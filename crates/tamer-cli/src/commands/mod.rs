//! Command implementations.

pub mod lifecycle;
pub mod profiles;

use tamer_core::{RegistryError, SupervisorError, TamerError};

/// Turns a lifecycle error into a one-line user-facing message.
pub fn map_tamer_error(err: TamerError) -> anyhow::Error {
    match err {
        TamerError::Supervisor(SupervisorError::ConnectionRefused { endpoint }) => {
            anyhow::anyhow!("No supervisor is running at {endpoint}")
        },
        TamerError::Supervisor(SupervisorError::Timeout { endpoint, timeout }) => {
            anyhow::anyhow!("Supervisor at {endpoint} did not answer within {timeout:?}")
        },
        TamerError::Supervisor(SupervisorError::Rejected { reason }) => {
            anyhow::anyhow!("Supervisor rejected the command: {reason}")
        },
        TamerError::Supervisor(SupervisorError::Protocol(msg)) => {
            anyhow::anyhow!("Unexpected reply from supervisor: {msg}")
        },
        TamerError::Registry(RegistryError::Corrupt { path, reason }) => anyhow::anyhow!(
            "Profile registry {} is corrupt ({reason}); fix or remove it by hand",
            path.display()
        ),
        TamerError::Registry(RegistryError::PortExhausted { base, limit }) => {
            anyhow::anyhow!("No free port block between {base} and {limit}")
        },
        TamerError::UnknownProfile(profile) => {
            anyhow::anyhow!("Profile '{profile}' has never been started")
        },
        other => anyhow::Error::new(other),
    }
}
