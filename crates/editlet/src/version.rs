//! Version information for editlet.

/// editlet version from Cargo.toml.
pub const EDITLET_VERSION: &str = env!("CARGO_PKG_VERSION");
