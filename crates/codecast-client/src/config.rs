//! Client endpoints.
//!
//! The participant side has no config file; it takes defaults and lets the
//! environment point it elsewhere.

use std::time::Duration;

/// Environment variable overriding the relay URL.
pub const SERVER_ENV: &str = "CODECAST_SERVER";

/// Environment variable overriding the compile service base URL.
pub const COMPILER_ENV: &str = "CODECAST_COMPILER";

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5000";
const DEFAULT_COMPILE_URL: &str = "http://localhost:8000";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the relay
    pub server_url: String,

    /// Base URL of the compile service; requests go to `<compile_url>/compile`
    pub compile_url: String,

    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            compile_url: DEFAULT_COMPILE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Defaults with `CODECAST_SERVER` and `CODECAST_COMPILER` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(
            std::env::var(SERVER_ENV).ok(),
            std::env::var(COMPILER_ENV).ok(),
        );
        config
    }

    /// Applies overrides; blank values are ignored.
    pub fn apply_overrides(&mut self, server_url: Option<String>, compile_url: Option<String>) {
        if let Some(url) = server_url.filter(|s| !s.trim().is_empty()) {
            self.server_url = url;
        }
        if let Some(url) = compile_url.filter(|s| !s.trim().is_empty()) {
            self.compile_url = url.trim_end_matches('/').to_string();
        }
    }

    /// Full URL of the compile endpoint.
    pub fn compile_endpoint(&self) -> String {
        format!("{}/compile", self.compile_url.trim_end_matches('/'))
    }
}
