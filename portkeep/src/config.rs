//! Engine configuration.
//!
//! [`EngineConfig`] is built through [`EngineConfigBuilder`], mirroring the
//! consuming-`self`, fluent `with_*` builder style used elsewhere in this
//! crate's ancestry. The one documented runtime knob
//! ([`EngineConfigBuilder::disable_release_check`]) can also be set via the
//! `DISABLE_PORT_RELEASE_CHECK` environment variable; a programmatic call
//! always takes precedence over the environment.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use crate::inspector::BusyPortInspector;
use crate::logging::{LogLevel, Logger};
use crate::probes::PlatformProbes;

/// The path, relative to the platform's shared coordination root, of the
/// lock file the cross-process locker (C3) opens.
const DEFAULT_LOCK_FILE_RELATIVE_PATH: &str = "portkeep/portLockFile";

/// Environment variable that disables the diagnostic release-check
/// when set to any non-empty value. Read once, at
/// [`EngineConfigBuilder::build`] time; a programmatic
/// [`EngineConfigBuilder::disable_release_check`] call wins over it.
const DISABLE_RELEASE_CHECK_ENV: &str = "DISABLE_PORT_RELEASE_CHECK";

/// Fully resolved configuration for an [`crate::engine::Engine`].
///
/// Values here are final: once built, an `EngineConfig` no longer consults
/// the environment.
pub struct EngineConfig {
    pub(crate) disable_release_check: bool,
    pub(crate) lock_file_relative_path: PathBuf,
    pub(crate) log_level: Option<LogLevel>,
    pub(crate) probes: Option<Arc<dyn PlatformProbes>>,
    pub(crate) inspector: Option<Arc<dyn BusyPortInspector>>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("disable_release_check", &self.disable_release_check)
            .field("lock_file_relative_path", &self.lock_file_relative_path)
            .field("log_level", &self.log_level)
            .field("probes", &self.probes.is_some())
            .field("inspector", &self.inspector.is_some())
            .finish()
    }
}

impl EngineConfig {
    /// Starts building a configuration with default values.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Whether the diagnostic release-check is disabled.
    #[must_use]
    pub fn disable_release_check(&self) -> bool {
        self.disable_release_check
    }

    /// The shared lock file's path, relative to the platform coordination
    /// root resolved by [`crate::bootstrap::shared_root`].
    #[must_use]
    pub fn lock_file_relative_path(&self) -> &std::path::Path {
        &self.lock_file_relative_path
    }
}

/// Builder for [`EngineConfig`].
///
/// # Examples
///
/// ```
/// use portkeep::config::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .disable_release_check(true)
///     .build();
/// assert!(config.disable_release_check());
/// ```
#[derive(Default)]
pub struct EngineConfigBuilder {
    disable_release_check: Option<bool>,
    lock_file_relative_path: Option<PathBuf>,
    log_level: Option<LogLevel>,
    probes: Option<Arc<dyn PlatformProbes>>,
    inspector: Option<Arc<dyn BusyPortInspector>>,
}

impl EngineConfigBuilder {
    /// Explicitly enables or disables the diagnostic release-check.
    /// Overrides `DISABLE_PORT_RELEASE_CHECK` regardless of
    /// which is set first.
    #[must_use]
    pub fn disable_release_check(mut self, disable: bool) -> Self {
        self.disable_release_check = Some(disable);
        self
    }

    /// Overrides the shared lock file's path relative to the platform
    /// coordination root. Defaults to `portkeep/portLockFile`.
    #[must_use]
    pub fn lock_file_relative_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file_relative_path = Some(path.into());
        self
    }

    /// Sets an explicit log level, bypassing `PORTKEEP_LOG_MODE`.
    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Injects a platform-probe implementation, overriding [`crate::probes::SystemProbes`].
    /// Used by tests to simulate artificially small reservable windows.
    #[must_use]
    pub fn probes(mut self, probes: Arc<dyn PlatformProbes>) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Injects a busy-port inspector implementation, overriding
    /// [`crate::inspector::SystemInspector`].
    #[must_use]
    pub fn inspector(mut self, inspector: Arc<dyn BusyPortInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Finalizes the configuration.
    ///
    /// If [`EngineConfigBuilder::disable_release_check`] was never called,
    /// the `DISABLE_PORT_RELEASE_CHECK` environment variable is consulted
    /// here, once, and baked into the result.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        let disable_release_check = self.disable_release_check.unwrap_or_else(|| {
            std::env::var(DISABLE_RELEASE_CHECK_ENV)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        });

        EngineConfig {
            disable_release_check,
            lock_file_relative_path: self
                .lock_file_relative_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_FILE_RELATIVE_PATH)),
            log_level: self.log_level,
            probes: self.probes,
            inspector: self.inspector,
        }
    }
}

impl EngineConfig {
    pub(crate) fn logger(&self) -> Arc<Logger> {
        Arc::new(crate::logging::init_logger(self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial(portkeep_disable_release_check_env)]
    fn default_config_does_not_disable_release_check() {
        let saved_env = std::env::var(DISABLE_RELEASE_CHECK_ENV).ok();
        std::env::remove_var(DISABLE_RELEASE_CHECK_ENV);

        let config = EngineConfig::builder().build();
        assert!(!config.disable_release_check());

        if let Some(val) = saved_env {
            std::env::set_var(DISABLE_RELEASE_CHECK_ENV, val);
        }
    }

    #[test]
    #[serial_test::serial(portkeep_disable_release_check_env)]
    fn explicit_call_overrides_env_var() {
        let saved_env = std::env::var(DISABLE_RELEASE_CHECK_ENV).ok();
        std::env::set_var(DISABLE_RELEASE_CHECK_ENV, "true");

        let config = EngineConfig::builder().disable_release_check(false).build();
        assert!(!config.disable_release_check());

        match saved_env {
            Some(val) => std::env::set_var(DISABLE_RELEASE_CHECK_ENV, val),
            None => std::env::remove_var(DISABLE_RELEASE_CHECK_ENV),
        }
    }

    #[test]
    #[serial_test::serial(portkeep_disable_release_check_env)]
    fn env_var_is_parsed_case_insensitively_and_rejects_non_true_values() {
        let saved_env = std::env::var(DISABLE_RELEASE_CHECK_ENV).ok();

        std::env::set_var(DISABLE_RELEASE_CHECK_ENV, "TRUE");
        assert!(EngineConfig::builder().build().disable_release_check());

        std::env::set_var(DISABLE_RELEASE_CHECK_ENV, "false");
        assert!(!EngineConfig::builder().build().disable_release_check());

        match saved_env {
            Some(val) => std::env::set_var(DISABLE_RELEASE_CHECK_ENV, val),
            None => std::env::remove_var(DISABLE_RELEASE_CHECK_ENV),
        }
    }

    #[test]
    fn default_lock_file_path_matches_expected_layout() {
        let config = EngineConfig::builder().build();
        assert_eq!(
            config.lock_file_relative_path(),
            std::path::Path::new("portkeep/portLockFile")
        );
    }

    #[test]
    fn custom_lock_file_path_is_honored() {
        let config = EngineConfig::builder()
            .lock_file_relative_path("custom/lockfile")
            .build();
        assert_eq!(
            config.lock_file_relative_path(),
            std::path::Path::new("custom/lockfile")
        );
    }
}
