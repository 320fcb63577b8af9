use thiserror::Error;

/// Unified error type for all data source and result stream operations
#[derive(Error, Debug)]
pub enum DataError {
    /// Connection failed (unreachable backend, authentication, bad URL, etc.)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Backend replied with a shape the adapter could not interpret
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// A row was pulled after the stream ran out of rows
    #[error("Result stream exhausted")]
    Exhausted,

    /// No adapter is registered under the requested identifier
    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    /// An adapter identifier is already taken
    #[error("Adapter already registered: {0}")]
    AlreadyRegistered(String),

    /// Binary encode or decode of a type missing from the type registry
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A type tag or concrete type is already bound to something else
    #[error("Duplicate type registration: {0}")]
    DuplicateType(String),

    /// The query context was cancelled or its deadline passed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Invalid query syntax or parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Entity or database not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Error raised by a registered adapter, tagged with the adapter identifier
    #[error("{adapter}: {source}")]
    Adapter {
        adapter: String,
        #[source]
        source: Box<DataError>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Create a "not found" error with custom message
    pub fn not_found(msg: impl Into<String>) -> Self {
        DataError::NotFound(msg.into())
    }

    /// Create an operation not supported error
    pub fn operation_not_supported(msg: impl Into<String>) -> Self {
        DataError::OperationNotSupported(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        DataError::InvalidConfiguration(msg.into())
    }

    /// Create a malformed reply error
    pub fn malformed_reply(msg: impl Into<String>) -> Self {
        DataError::MalformedReply(msg.into())
    }

    /// Wrap an adapter error with the identifier it was reached through
    pub fn in_adapter(adapter: impl Into<String>, source: DataError) -> Self {
        DataError::Adapter {
            adapter: adapter.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through adapter context
    pub fn root(&self) -> &DataError {
        match self {
            DataError::Adapter { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), DataError::Cancelled(_))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.root(), DataError::Exhausted)
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
