//! Error types for the server binary.
//!
//! [`ServerBinError`] wraps every failure mode during startup and shutdown
//! so `main` can propagate with `?`.

/// Top-level error for the server binary.
#[derive(Debug, thiserror::Error)]
pub enum ServerBinError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: holomirror_core::ConfigError,
    },

    /// A demo worker could not be registered.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: holomirror_gateway::RegistryError,
    },

    /// The gateway failed to bind.
    #[error("startup error: {source}")]
    Startup {
        /// The underlying startup error.
        #[from]
        source: holomirror_gateway::StartupError,
    },

    /// The gateway failed while serving.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: holomirror_gateway::ServerError,
    },

    /// Installing the signal handlers failed.
    #[error("signal error: {message}")]
    Signal {
        /// Description of the signal failure.
        message: String,
    },

    /// The serving task panicked or was cancelled.
    #[error("gateway task error: {message}")]
    Join {
        /// Description of the join failure.
        message: String,
    },
}
