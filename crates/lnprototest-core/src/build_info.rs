//! Build-time metadata embedded by the build script, reported by `getinfo`.

/// Short git commit hash at build time, or `"unknown"` outside a checkout.
pub const GIT_HASH: &str = env!("LNPROTOTEST_GIT_HASH");

/// Build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("LNPROTOTEST_BUILD_TIMESTAMP");

/// Cargo profile the crate was built with (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("LNPROTOTEST_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"<version> (<hash>, <profile>)"`, e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
