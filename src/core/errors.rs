use thiserror::Error;

/// Unified error type for the build orchestrator
#[derive(Debug, Error)]
pub enum BuildError {
    /// A build was requested for a name the graph does not know
    #[error("Component not found: {name}")]
    ComponentNotFound { name: String },

    /// An edge was requested between components that are not both registered
    #[error("Cannot add dependency {from} -> {to}: component '{missing}' is not registered")]
    UnknownComponent {
        from: String,
        to: String,
        missing: String,
    },

    /// A component name was registered twice
    #[error("Component already registered: {name}")]
    DuplicateComponent { name: String },

    /// The dependency graph contains a cycle
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Work was submitted after the worker pool was shut down
    #[error("Worker pool is shut down")]
    PoolShutdown,

    /// In-flight work did not drain within the shutdown grace period
    #[error("Worker pool did not drain: {in_flight} task(s) still running after {grace_ms}ms")]
    ShutdownTimeout { in_flight: usize, grace_ms: u64 },

    /// Manifest parsing errors
    #[error("Failed to parse {format} manifest")]
    Manifest {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Create a not-found error
    pub fn not_found<S: Into<String>>(name: S) -> Self {
        Self::ComponentNotFound { name: name.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error tied to a config field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a manifest parsing error
    pub fn manifest<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Manifest {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Errors a caller should fix in the graph or config before building
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownComponent { .. }
                | Self::DuplicateComponent { .. }
                | Self::CircularDependency { .. }
                | Self::Configuration { .. }
                | Self::Manifest { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ComponentNotFound { .. } => "not_found",
            Self::UnknownComponent { .. } => "dangling_dependency",
            Self::DuplicateComponent { .. } => "duplicate",
            Self::CircularDependency { .. } => "cycle",
            Self::Configuration { .. } => "configuration",
            Self::PoolShutdown => "pool_shutdown",
            Self::ShutdownTimeout { .. } => "shutdown_timeout",
            Self::Manifest { .. } => "manifest",
            Self::Io { .. } => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BuildError>;

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        Self::manifest("json", err)
    }
}

impl From<serde_yaml::Error> for BuildError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::manifest("yaml", err)
    }
}
