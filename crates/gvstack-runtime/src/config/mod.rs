//! Engine configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's gvs_config.rs (compile-time, via `GVS_CONFIG_RS`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use gvstack_runtime::config::EngineConfig;
//!
//! // Use defaults with env overrides
//! let config = EngineConfig::from_env();
//!
//! // Or customize programmatically
//! let config = EngineConfig::from_env()
//!     .num_engines(2)
//!     .stack_words(256);
//! ```

pub mod defaults;

use std::time::Duration;

use gvstack_core::constants::{MAX_ENGINES, MIN_STACK_WORDS};
use gvstack_core::env::{env_get, env_get_bool};

/// Engine configuration with builder pattern.
///
/// Use `from_env()` to start with compile-time defaults and apply
/// any environment variable overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of execution engines (OS threads running stacks)
    pub num_engines: usize,
    /// Maximum live threads (thread table size)
    pub max_threads: usize,
    /// Initial stack capacity in words
    pub stack_words: usize,
    /// Largest capacity growth may reach, in words
    pub max_stack_words: usize,
    /// Capacity multiplier applied on each growth
    pub growth_factor: usize,
    /// Frame steps per resume before a forced yield (0 = unlimited)
    pub step_budget: u64,
    /// Map an inaccessible guard page below each stack
    pub guard_pages: bool,
    /// Enable debug logging
    pub debug_logging: bool,
    /// Spins before an idle engine sleeps
    pub idle_spins: u32,
    /// Idle engine sleep between queue polls
    pub park_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EngineConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `GVS_NUM_ENGINES` - Number of execution engines
    /// - `GVS_MAX_THREADS` - Max live threads
    /// - `GVS_STACK_WORDS` - Initial stack capacity in words
    /// - `GVS_MAX_STACK_WORDS` - Growth ceiling in words
    /// - `GVS_STACK_GROWTH` - Growth factor
    /// - `GVS_STEP_BUDGET` - Steps per resume (0 = unlimited)
    /// - `GVS_GUARD_PAGES` - Guard page below each stack (0/1)
    /// - `GVS_DEBUG` - Enable debug logging (0/1)
    /// - `GVS_IDLE_SPINS` - Spins before sleeping
    /// - `GVS_PARK_TIMEOUT_MS` - Idle sleep in milliseconds
    pub fn from_env() -> Self {
        Self {
            num_engines: env_get("GVS_NUM_ENGINES", defaults::NUM_ENGINES),
            max_threads: env_get("GVS_MAX_THREADS", defaults::MAX_THREADS),
            stack_words: env_get("GVS_STACK_WORDS", defaults::STACK_WORDS),
            max_stack_words: env_get("GVS_MAX_STACK_WORDS", defaults::MAX_STACK_WORDS),
            growth_factor: env_get("GVS_STACK_GROWTH", defaults::STACK_GROWTH),
            step_budget: env_get("GVS_STEP_BUDGET", defaults::STEP_BUDGET),
            guard_pages: env_get_bool("GVS_GUARD_PAGES", defaults::GUARD_PAGES),
            debug_logging: env_get_bool("GVS_DEBUG", defaults::DEBUG_LOGGING),
            idle_spins: env_get("GVS_IDLE_SPINS", defaults::IDLE_SPINS),
            park_timeout: Duration::from_millis(env_get(
                "GVS_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
        }
    }

    /// Create config with explicit defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            num_engines: defaults::NUM_ENGINES,
            max_threads: defaults::MAX_THREADS,
            stack_words: defaults::STACK_WORDS,
            max_stack_words: defaults::MAX_STACK_WORDS,
            growth_factor: defaults::STACK_GROWTH,
            step_budget: defaults::STEP_BUDGET,
            guard_pages: defaults::GUARD_PAGES,
            debug_logging: defaults::DEBUG_LOGGING,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
        }
    }

    // Builder methods

    pub fn num_engines(mut self, n: usize) -> Self {
        self.num_engines = n;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    pub fn stack_words(mut self, words: usize) -> Self {
        self.stack_words = words;
        self
    }

    pub fn max_stack_words(mut self, words: usize) -> Self {
        self.max_stack_words = words;
        self
    }

    pub fn growth_factor(mut self, factor: usize) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn step_budget(mut self, steps: u64) -> Self {
        self.step_budget = steps;
        self
    }

    pub fn guard_pages(mut self, enable: bool) -> Self {
        self.guard_pages = enable;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    /// Initial capacity for a thread created with `hint` words
    ///
    /// Zero means the configured initial size; anything else is clamped
    /// to `[MIN_STACK_WORDS, max_stack_words]`.
    pub fn stack_words_for(&self, hint: usize) -> usize {
        let words = if hint == 0 { self.stack_words } else { hint };
        words.clamp(MIN_STACK_WORDS, self.max_stack_words.max(MIN_STACK_WORDS))
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_engines == 0 {
            return Err(ConfigError::InvalidValue("num_engines must be > 0"));
        }
        if self.num_engines > MAX_ENGINES {
            return Err(ConfigError::InvalidValue("num_engines must be <= 64"));
        }
        if self.max_threads == 0 {
            return Err(ConfigError::InvalidValue("max_threads must be > 0"));
        }
        if self.max_threads > u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_threads must fit in 32 bits"));
        }
        if self.stack_words < MIN_STACK_WORDS {
            return Err(ConfigError::InvalidValue("stack_words must be >= 64"));
        }
        if self.max_stack_words < self.stack_words {
            return Err(ConfigError::InvalidValue(
                "max_stack_words must be >= stack_words",
            ));
        }
        if self.growth_factor < 2 {
            return Err(ConfigError::InvalidValue("growth_factor must be >= 2"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("gvstack Configuration:");
        eprintln!("  num_engines:       {}", self.num_engines);
        eprintln!("  max_threads:       {}", self.max_threads);
        eprintln!("  stack_words:       {}", self.stack_words);
        eprintln!("  max_stack_words:   {}", self.max_stack_words);
        eprintln!("  growth_factor:     {}", self.growth_factor);
        eprintln!("  step_budget:       {}", self.step_budget);
        eprintln!("  guard_pages:       {}", self.guard_pages);
        eprintln!("  debug_logging:     {}", self.debug_logging);
        eprintln!("  idle_spins:        {}", self.idle_spins);
        eprintln!("  park_timeout:      {:?}", self.park_timeout);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::new();
        assert!(config.num_engines >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .num_engines(8)
            .stack_words(128)
            .step_budget(0)
            .guard_pages(false);

        assert_eq!(config.num_engines, 8);
        assert_eq!(config.stack_words, 128);
        assert_eq!(config.step_budget, 0);
        assert!(!config.guard_pages);
    }

    #[test]
    fn test_validation() {
        assert!(EngineConfig::new().num_engines(0).validate().is_err());
        assert!(EngineConfig::new().num_engines(1000).validate().is_err());
        assert!(EngineConfig::new().stack_words(8).validate().is_err());
        assert!(EngineConfig::new().growth_factor(1).validate().is_err());

        let err = EngineConfig::new()
            .stack_words(4096)
            .max_stack_words(1024)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidValue("max_stack_words must be >= stack_words"));
    }

    #[test]
    fn test_stack_words_for_clamps() {
        let config = EngineConfig::new().stack_words(256).max_stack_words(4096);
        assert_eq!(config.stack_words_for(0), 256);
        assert_eq!(config.stack_words_for(1), MIN_STACK_WORDS);
        assert_eq!(config.stack_words_for(1000), 1000);
        assert_eq!(config.stack_words_for(1 << 30), 4096);
    }
}
