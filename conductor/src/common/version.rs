//! Build metadata reported by `conductor version`

use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set by the release pipeline; `unknown` in local builds
pub const COMMIT: Option<&str> = option_env!("CONDUCTOR_COMMIT");
pub const BUILD_DATE: Option<&str> = option_env!("CONDUCTOR_BUILD_DATE");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_date: &'static str,
    pub runtime_version: String,
    pub os: &'static str,
    pub arch: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            commit: COMMIT.unwrap_or("unknown"),
            build_date: BUILD_DATE.unwrap_or("unknown"),
            runtime_version: format!("rust {}", env!("CARGO_PKG_RUST_VERSION")),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }
}
