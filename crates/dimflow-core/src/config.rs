use std::sync::{OnceLock, RwLock};

use crate::dtype::Precision;
use crate::error::{Error, Result};
use crate::registry;

// Config — Process-wide settings
//
// Precision, random seed and the preferred default backend are the only
// mutable state in dimflow. They live in one global context that callers may
// read or overwrite between operations. Initial values come from
// `Config::from_env()`; `reset()` returns to them.
//
// Environment variables:
//
//   DIMFLOW_PRECISION — 16, 32 or 64
//   DIMFLOW_SEED      — u64 seed applied when backends register
//   DIMFLOW_BACKEND   — name of the preferred default backend

/// Global configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    /// Float precision used by factories and `to_float`.
    pub precision: Precision,
    /// Seed applied to every backend on registration.
    pub seed: Option<u64>,
    /// Name of the default backend, if not simply the first registered.
    pub default_backend: Option<String>,
}

impl Config {
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }

    /// Defaults overridden by `DIMFLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`] with a custom variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        if let Some(raw) = lookup("DIMFLOW_PRECISION") {
            match raw.trim().parse::<usize>().ok().and_then(Precision::from_bits) {
                Some(p) => config.precision = p,
                None => log::warn!("ignoring DIMFLOW_PRECISION={raw:?}: expected 16, 32 or 64"),
            }
        }
        if let Some(raw) = lookup("DIMFLOW_SEED") {
            match raw.trim().parse::<u64>() {
                Ok(seed) => config.seed = Some(seed),
                Err(_) => log::warn!("ignoring DIMFLOW_SEED={raw:?}: not an unsigned integer"),
            }
        }
        if let Some(name) = lookup("DIMFLOW_BACKEND") {
            let name = name.trim();
            if !name.is_empty() {
                config.default_backend = Some(name.to_string());
            }
        }
        config
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

fn global() -> &'static RwLock<Config> {
    CONFIG.get_or_init(|| RwLock::new(Config::from_env()))
}

fn poisoned() -> Error {
    Error::msg("dimflow configuration lock poisoned")
}

/// Snapshot of the current configuration.
pub fn config() -> Config {
    global().read().map(|c| c.clone()).unwrap_or_default()
}

/// Replace the whole configuration. Does not reseed backends.
pub fn set_config(config: Config) -> Result<()> {
    *global().write().map_err(|_| poisoned())? = config;
    Ok(())
}

pub(crate) fn update(f: impl FnOnce(&mut Config)) -> Result<()> {
    let mut guard = global().write().map_err(|_| poisoned())?;
    f(&mut guard);
    Ok(())
}

pub fn precision() -> Precision {
    config().precision
}

pub fn set_precision(precision: Precision) -> Result<()> {
    log::debug!("precision set to {} bits", precision.bits());
    update(|c| c.precision = precision)
}

/// Restores the previous precision when dropped.
struct PrecisionGuard(Precision);

impl Drop for PrecisionGuard {
    fn drop(&mut self) {
        let _ = set_precision(self.0);
    }
}

/// Run `f` with `precision` in effect, restoring the previous value afterwards.
pub fn with_precision<R>(precision: Precision, f: impl FnOnce() -> R) -> Result<R> {
    let _guard = PrecisionGuard(self::precision());
    set_precision(precision)?;
    Ok(f())
}

/// Store `seed` and reseed every registered backend.
pub fn seed(seed: u64) -> Result<()> {
    update(|c| c.seed = Some(seed))?;
    for backend in registry::backends()? {
        backend.seed(seed);
    }
    log::debug!("seeded all backends with {seed}");
    Ok(())
}

/// Restore the initial configuration (defaults plus environment overrides).
pub fn reset() -> Result<()> {
    log::debug!("configuration reset");
    set_config(Config::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builder() {
        let c = Config::default()
            .with_precision(Precision::Double)
            .with_seed(7)
            .with_default_backend("cpu");
        assert_eq!(c.precision, Precision::Double);
        assert_eq!(c.seed, Some(7));
        assert_eq!(c.default_backend.as_deref(), Some("cpu"));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("DIMFLOW_PRECISION", "64"),
            ("DIMFLOW_SEED", " 42 "),
            ("DIMFLOW_BACKEND", "cpu"),
        ]
        .into_iter()
        .collect();
        let c = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.precision, Precision::Double);
        assert_eq!(c.seed, Some(42));
        assert_eq!(c.default_backend.as_deref(), Some("cpu"));
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let c = Config::from_lookup(|k| match k {
            "DIMFLOW_PRECISION" => Some("8".into()),
            "DIMFLOW_SEED" => Some("-1".into()),
            _ => None,
        });
        assert_eq!(c, Config::default());
    }
}
