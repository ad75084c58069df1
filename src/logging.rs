//! Process-wide logging registry.
//!
//! The original backend kept a global singleton (`common::Logger`) holding a
//! registry of named sub-loggers, each independently levelled, guarded by a
//! single mutex. `tracing` already gives every call site a `target` (the
//! module path by default, or an explicit string), so the re-architected
//! registry here is a thin mutex-guarded map from target name to an explicit
//! level override, consulted by a [`tracing_subscriber::Layer`]. Canonical
//! target names live in [`targets`], mirroring the original's
//! `LoggingNames.h`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{Level, Metadata};
use tracing_subscriber::layer::{Context, Layer};

/// Canonical logger/target names, stable for tooling and filtering.
pub mod targets {
    pub const APP_LIFECYCLE: &str = "app.lifecycle";
    pub const APP_CONFIG: &str = "app.config";

    pub const SENSOR: &str = "sensor";

    pub const PROC_ORCH: &str = "processing.orchestrator";
    pub const PROC_CALIB: &str = "processing.calibration";
    pub const PROC_FILTER: &str = "processing.filtering";
    pub const PROC_FUSION: &str = "processing.fusion";

    pub const TRANSPORT_SERVER: &str = "transport.server";
    pub const TRANSPORT_HANDSHAKE: &str = "transport.handshake";
}

/// Registry of explicit per-target level overrides, independent of the
/// global subscriber filter. Cheap to clone (an `Arc` inside would only be
/// needed for cross-thread sharing beyond a single process-wide instance,
/// which `Registry::global()` already provides).
pub struct Registry {
    global_level: Mutex<Level>,
    overrides: Mutex<HashMap<String, Level>>,
    rate_limits: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            global_level: Mutex::new(Level::INFO),
            overrides: Mutex::new(HashMap::new()),
            rate_limits: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static Registry {
        static INSTANCE: std::sync::OnceLock<Registry> = std::sync::OnceLock::new();
        INSTANCE.get_or_init(Registry::new)
    }

    pub fn set_global_level(&self, level: Level) {
        *self.global_level.lock().unwrap() = level;
    }

    pub fn global_level(&self) -> Level {
        *self.global_level.lock().unwrap()
    }

    /// Set an explicit level for a named logger target; does not affect the
    /// global level and overrides it for that target until cleared.
    pub fn set_target_level(&self, name: &str, level: Level) {
        self.overrides.lock().unwrap().insert(name.to_string(), level);
    }

    /// Clear an explicit override; the target reverts to the global level.
    pub fn clear_target_level(&self, name: &str) {
        self.overrides.lock().unwrap().remove(name);
    }

    fn effective_level(&self, target: &str) -> Level {
        if let Some(level) = self.overrides.lock().unwrap().get(target) {
            return *level;
        }
        self.global_level()
    }

    /// Returns `true` at most once per `period` for a given `key` — used to
    /// throttle noisy warnings (e.g. transport heartbeat acknowledgements).
    pub fn rate_limit_ready(&self, key: &str, period: Duration) -> bool {
        let mut map = self.rate_limits.lock().unwrap();
        let now = Instant::now();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < period => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }
}

/// Emit `message` via `tracing::warn!` at most once per `period` for the
/// given rate-limit `key`, mirroring `Logger::warnRateLimited`.
pub fn warn_rate_limited(target: &str, key: &str, period: Duration, message: &str) {
    if Registry::global().rate_limit_ready(key, period) {
        tracing::warn!(target: "caldera", logger = target, "{message}");
    }
}

/// A [`Layer`] that enforces per-target level overrides from the global
/// [`Registry`] on top of whatever base filter the subscriber is configured
/// with (e.g. `EnvFilter`).
pub struct LevelOverrideLayer;

impl<S> Layer<S> for LevelOverrideLayer
where
    S: tracing::Subscriber,
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        let target = metadata.target();
        let effective = Registry::global().effective_level(target);
        metadata.level() <= &effective
    }
}

/// Install a default subscriber (stderr, `EnvFilter` + [`LevelOverrideLayer`])
/// if one hasn't been installed yet. Safe to call multiple times.
pub fn init_default() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(LevelOverrideLayer)
        .with(fmt::layer())
        .try_init();
}
