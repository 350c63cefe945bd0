//! Ambient, entirely optional configuration (§6 "MachinaConfig").
//!
//! Scoped to the handful of tunables this runtime has: there is no file
//! format or wire protocol for `machina` itself (§6), so `MachinaConfig`
//! only exists to let an embedder override a couple of thresholds via env
//! vars or a config file it already loads for other purposes.

use std::time::Duration;

/// Ambient tunables. `Default` requires no file or environment variable —
/// the library works correctly with every field left at its default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachinaConfig {
    /// Emit iterations whose start slips later than this past their
    /// scheduled interval log a `tracing::warn!` (§4.4 step 4). Defaults
    /// to a 1-second threshold.
    pub slow_iteration_warning: Duration,

    /// Fallback `window_cap` for a concurrent group registered with
    /// `window > 0` but no explicit cap (§6).
    pub default_window_cap: usize,
}

impl Default for MachinaConfig {
    fn default() -> Self {
        Self {
            slow_iteration_warning: Duration::from_secs(1),
            default_window_cap: 1,
        }
    }
}

#[cfg(feature = "config")]
mod loader {
    use super::MachinaConfig;
    use serde::Deserialize;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("failed to load machina config: {0}")]
        Load(#[from] config::ConfigError),
    }

    #[derive(Debug, Deserialize)]
    struct RawConfig {
        #[serde(default = "default_slow_iteration_warning_ms")]
        slow_iteration_warning_ms: u64,
        #[serde(default = "default_window_cap")]
        default_window_cap: usize,
    }

    fn default_slow_iteration_warning_ms() -> u64 {
        1_000
    }

    fn default_window_cap() -> usize {
        1
    }

    impl MachinaConfig {
        /// Load overrides from environment variables prefixed `MACHINA_`
        /// (e.g. `MACHINA_SLOW_ITERATION_WARNING_MS`), falling back to
        /// [`MachinaConfig::default`] for anything unset.
        pub fn from_env() -> Result<Self, ConfigError> {
            let defaults = MachinaConfig::default();
            let raw: RawConfig = config::Config::builder()
                .set_default(
                    "slow_iteration_warning_ms",
                    defaults.slow_iteration_warning.as_millis() as i64,
                )?
                .set_default("default_window_cap", defaults.default_window_cap as i64)?
                .add_source(config::Environment::with_prefix("MACHINA"))
                .build()?
                .try_deserialize()?;
            Ok(MachinaConfig {
                slow_iteration_warning: Duration::from_millis(raw.slow_iteration_warning_ms),
                default_window_cap: raw.default_window_cap,
            })
        }
    }
}

#[cfg(feature = "config")]
pub use loader::ConfigError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requires_no_configuration() {
        let cfg = MachinaConfig::default();
        assert_eq!(cfg.slow_iteration_warning, Duration::from_secs(1));
        assert_eq!(cfg.default_window_cap, 1);
    }

    #[cfg(feature = "config")]
    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        let cfg = MachinaConfig::from_env().expect("defaults alone must be loadable");
        assert_eq!(cfg, MachinaConfig::default());
    }
}
