//! Registry listing.

use anyhow::{Context, Result};
use tamer_core::EndpointRegistry;

/// Print every profile with its control endpoint and uuid.
pub fn list(registry: &EndpointRegistry) -> Result<()> {
    let profiles = registry
        .profiles()
        .with_context(|| format!("failed to read {}", registry.path().display()))?;

    if profiles.is_empty() {
        println!("No profiles registered in {}", registry.path().display());
        return Ok(());
    }

    println!("{:<20} {:<28} UUID", "PROFILE", "ENDPOINT");
    for endpoint in &profiles {
        println!(
            "{:<20} {:<28} {}",
            endpoint.profile,
            endpoint.control_endpoint(),
            endpoint.uuid
        );
    }
    Ok(())
}
