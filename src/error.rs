//! Error handling for quartermaster.
use thiserror::Error;

/// Defines all possible errors that can occur in the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Error reading or accessing the configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error in the structure or contents of the configuration file.
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    /// Error when a component identifier does not match the uid grammar.
    #[error("'{uid}' is not a valid component identifier")]
    InvalidIdentifier {
        /// The offending identifier.
        uid: String,
    },

    /// Error when a required configuration attribute is absent.
    #[error("Component '{uid}' is missing required parameter '{attr}'")]
    MissingAttribute {
        /// The component whose configuration is incomplete.
        uid: String,
        /// The missing attribute name.
        attr: String,
    },

    /// Error when a variable reference survives expansion.
    #[error("Unresolved variable in '{value}' for component '{uid}'")]
    UnresolvedVariable {
        /// The component whose value could not be expanded.
        uid: String,
        /// The value still carrying variable tokens.
        value: String,
    },

    /// Error when a component lists itself as a requirement.
    #[error("Self dependency found for component '{uid}'")]
    SelfDependency {
        /// The self-requiring component.
        uid: String,
    },

    /// Error when a requirement names an unknown component.
    #[error("Component '{uid}' requires unmanaged component '{requirement}'")]
    UnknownRequirement {
        /// The component with the dangling requirement.
        uid: String,
        /// The requirement that resolves to nothing.
        requirement: String,
    },

    /// Error when the dependency graph contains a cycle.
    #[error("Cannot determine startup order for components: {uids}")]
    DependencyCycle {
        /// Comma-separated list of components stuck in the cycle.
        uids: String,
    },

    /// Error when a required component is not running at start time.
    #[error(
        "Cannot start component '{uid}', required component '{requirement}' not running"
    )]
    RequirementNotRunning {
        /// The component that cannot start.
        uid: String,
        /// The requirement that is not alive.
        requirement: String,
    },

    /// Error when the invoking user is not allowed to start a component.
    #[error("User '{user}' is not allowed to start component '{uid}'")]
    UserNotAllowed {
        /// The component with a sys_user restriction.
        uid: String,
        /// The rejected OS user.
        user: String,
    },

    /// Error while launching or controlling a component process.
    #[error("Process error for component '{uid}': {message}")]
    ProcessError {
        /// The component the operation was applied to.
        uid: String,
        /// Description of the failure.
        message: String,
    },

    /// Error for unknown or malformed selector tokens.
    #[error("Selector error: {0}")]
    SelectorError(String),

    /// Error from the status store.
    #[error("Status store error: {0}")]
    StoreError(#[from] StoreError),
}

impl SupervisorError {
    /// Wraps an OS-level failure against a component as a process error.
    pub fn process(uid: &str, message: impl std::fmt::Display) -> Self {
        SupervisorError::ProcessError {
            uid: uid.to_string(),
            message: message.to_string(),
        }
    }
}

/// Error type for status store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error from the underlying database.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Error creating the directory holding the status database.
    #[error("cannot create status directory: {0}")]
    Directory(#[from] std::io::Error),

    /// Error decoding a persisted timestamp.
    #[error("invalid timestamp '{0}' in status database")]
    Timestamp(String),
}
