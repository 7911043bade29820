//! Profile lifecycle commands.
//!
//! Each command performs one [`DaemonTamer`] operation and prints a single
//! line. Failures are mapped to one-line messages by
//! [`map_tamer_error`](super::map_tamer_error).

use anyhow::{Result, bail};
use tamer_core::{DaemonTamer, QuitOutcome, Supervisor};
use tracing::info;

use super::map_tamer_error;

/// Start the profile's daemon.
pub fn start<S: Supervisor>(tamer: &DaemonTamer<S>, profile: &str) -> Result<()> {
    if !tamer.ensure_started(profile).map_err(map_tamer_error)? {
        bail!("Daemon for profile '{profile}' did not report active after start");
    }
    println!("Daemon for profile '{profile}' is active");
    Ok(())
}

/// Stop the profile's daemon, then quit its supervisor if nothing else is
/// registered there.
pub fn stop<S: Supervisor>(tamer: &DaemonTamer<S>, profile: &str) -> Result<()> {
    if tamer.stop(profile).map_err(map_tamer_error)? {
        println!("Stopped daemon for profile '{profile}'");
    } else {
        println!("Daemon for profile '{profile}' is not registered");
    }

    match tamer.quit(profile).map_err(map_tamer_error)? {
        QuitOutcome::Quit => println!("Supervisor for profile '{profile}' shut down"),
        QuitOutcome::AlreadyDown => {},
        QuitOutcome::WatchersRemain(names) => {
            info!(profile, watchers = ?names, "supervisor kept running");
        },
    }
    Ok(())
}

/// Stop every watcher under the profile's supervisor.
pub fn pause<S: Supervisor>(tamer: &DaemonTamer<S>, profile: &str) -> Result<()> {
    tamer.pause(profile).map_err(map_tamer_error)?;
    println!("Paused all watchers for profile '{profile}'");
    Ok(())
}

/// Start every watcher under the profile's supervisor.
pub fn unpause<S: Supervisor>(tamer: &DaemonTamer<S>, profile: &str) -> Result<()> {
    tamer.unpause(profile).map_err(map_tamer_error)?;
    println!("Resumed all watchers for profile '{profile}'");
    Ok(())
}

/// Terminate the profile's supervisor.
///
/// Without `force` the supervisor is left running while it still has
/// watchers; that is reported, not treated as a failure.
pub fn quit<S: Supervisor>(tamer: &DaemonTamer<S>, profile: &str, force: bool) -> Result<()> {
    let outcome = if force {
        tamer.shutdown(profile)
    } else {
        tamer.quit(profile)
    }
    .map_err(map_tamer_error)?;

    match outcome {
        QuitOutcome::Quit => println!("Supervisor for profile '{profile}' shut down"),
        QuitOutcome::AlreadyDown => {
            println!("Supervisor for profile '{profile}' is not running");
        },
        QuitOutcome::WatchersRemain(names) => println!(
            "Supervisor for profile '{profile}' left running; it still manages {} (use --force to shut it down)",
            names.join(", ")
        ),
    }
    Ok(())
}

/// Print the profile's daemon status.
pub fn status<S: Supervisor>(tamer: &DaemonTamer<S>, profile: &str) -> Result<()> {
    let status = tamer.status(profile).map_err(map_tamer_error)?;
    println!("{status}");
    Ok(())
}

/// Start the log relay for `tag` under the profile's supervisor.
pub fn stream<S: Supervisor>(tamer: &DaemonTamer<S>, profile: &str, tag: &str) -> Result<()> {
    if !tamer.ensure_streamer(profile, tag).map_err(map_tamer_error)? {
        bail!("Stream '{tag}' for profile '{profile}' did not report active after start");
    }
    println!("Stream '{tag}' for profile '{profile}' is active");
    Ok(())
}
