//! Bridge configuration.
//!
//! This module defines the options applied when the guest runtime is started:
//! module search paths, output redirection and the diagnostic mask.

use super::diag::DiagFlags;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;

/// Environment variable holding extra module search paths.
pub const PATH_ENV: &str = "PYBRIDGE_PATH";
/// Environment variable holding the diagnostic mask.
pub const DIAG_ENV: &str = "PYBRIDGE_DIAG";

/// Options for [`start`](super::lifecycle::start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Entries prepended to the guest module search path, in order.
    pub search_paths: Vec<String>,

    /// Route guest `sys.stdout`/`sys.stderr` to the host process streams
    /// (default: true).
    pub redirect_output: bool,

    /// Diagnostic mask applied at start. `OFF` leaves the current mask alone.
    pub diag_flags: DiagFlags,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            redirect_output: true,
            diag_flags: DiagFlags::OFF,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_search_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_redirect_output(mut self, redirect: bool) -> Self {
        self.redirect_output = redirect;
        self
    }

    pub fn with_diag_flags(mut self, flags: DiagFlags) -> Self {
        self.diag_flags = flags;
        self
    }

    /// Build a configuration from `PYBRIDGE_PATH` and `PYBRIDGE_DIAG`.
    ///
    /// Invalid entries are skipped with a warning.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var_os(PATH_ENV),
            std::env::var(DIAG_ENV).ok(),
        )
    }

    fn from_vars(paths: Option<OsString>, diag: Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(paths) = paths {
            for path in std::env::split_paths(&paths) {
                if path.as_os_str().is_empty() {
                    continue;
                }
                match path.into_os_string().into_string() {
                    Ok(path) => config.search_paths.push(path),
                    Err(path) => {
                        tracing::warn!(
                            target: "pybridge",
                            path = ?path,
                            "ignoring non UTF-8 entry in {}",
                            PATH_ENV
                        )
                    }
                }
            }
        }

        if let Some(diag) = diag {
            match DiagFlags::parse(&diag) {
                Ok(flags) => config.diag_flags = flags,
                Err(err) => tracing::warn!(target: "pybridge", "ignoring {}: {}", DIAG_ENV, err),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.search_paths.is_empty());
        assert!(config.redirect_output);
        assert_eq!(config.diag_flags, DiagFlags::OFF);
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfig::new()
            .with_search_path("/opt/first")
            .with_search_paths(["/opt/second", "/opt/third"])
            .with_redirect_output(false)
            .with_diag_flags(DiagFlags::EXEC);

        assert_eq!(
            config.search_paths,
            vec!["/opt/first", "/opt/second", "/opt/third"]
        );
        assert!(!config.redirect_output);
        assert_eq!(config.diag_flags, DiagFlags::EXEC);
    }

    #[test]
    fn test_config_serde() {
        let config = BridgeConfig::new()
            .with_search_path("lib")
            .with_diag_flags(DiagFlags::MEM | DiagFlags::ERR);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"diag_flags\":24"));
        let parsed: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        // Missing fields fall back to the defaults.
        let partial: BridgeConfig = serde_json::from_str(r#"{"search_paths":["a"]}"#).unwrap();
        assert!(partial.redirect_output);
        assert_eq!(partial.search_paths, vec!["a"]);
    }

    #[test]
    fn test_from_vars() {
        let joined = std::env::join_paths(["/srv/one", "/srv/two"]).unwrap();
        let config = BridgeConfig::from_vars(Some(joined), Some("exec|err".to_string()));
        assert_eq!(config.search_paths, vec!["/srv/one", "/srv/two"]);
        assert_eq!(config.diag_flags, DiagFlags::EXEC | DiagFlags::ERR);
    }

    #[test]
    fn test_from_vars_ignores_invalid_diag() {
        let config = BridgeConfig::from_vars(None, Some("loud".to_string()));
        assert!(config.search_paths.is_empty());
        assert_eq!(config.diag_flags, DiagFlags::OFF);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_env_warnings_use_bridge_target() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            BridgeConfig::from_vars(None, Some("loud".to_string()));
        });

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(output.contains("pybridge: ignoring"), "{output}");
        assert!(output.contains(DIAG_ENV));
    }
}
