//! Runtime environment detection.
//!
//! Provides a single source of truth for determining the runtime environment
//! (test, development, production) based on the `SHELLMATE_ENV` environment
//! variable.
//!
//! # Usage
//!
//! ```rust
//! use shellmate::env::{Environment, is_test_mode};
//!
//! if Environment::current().is_test() {
//!     // Skip config persistence, shorten timers, etc.
//! }
//!
//! if is_test_mode() {
//!     // Test-specific behavior
//! }
//! ```
//!
//! # Environment Variable
//!
//! Set `SHELLMATE_ENV` to one of:
//! - `test` - Test mode (skips config writes, uses temp paths)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

// Rust guideline compliant 2025-01

/// Runtime environment for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - skips config persistence.
    Test,
}

impl Environment {
    /// Detect current environment from `SHELLMATE_ENV`.
    ///
    /// Returns `Test` if `SHELLMATE_ENV=test`, `Development` if
    /// `SHELLMATE_ENV=development` or `SHELLMATE_ENV=dev`, otherwise
    /// `Production`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("SHELLMATE_ENV").as_deref() {
            Ok("test") => Self::Test,
            Ok("development") | Ok("dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check if running in test mode.
///
/// Equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
