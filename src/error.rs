use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Broker protocol errors.
///
/// Transport faults self-heal inside the client; the variants here are
/// what callers of the protocol layer can actually observe.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authorization timed out after {timeout_secs}s")]
    AuthorizationTimeout { timeout_secs: u64 },

    #[error("buy rejected by broker: {code}: {message}")]
    BuyRejected { code: String, message: String },
}

/// Order-lifecycle errors surfaced during settlement handling.
///
/// These are logged by the executor rather than propagated; a bad
/// contract-update frame must never stall the reader loop.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("no recognized settlement field on update for contract {identifier}")]
    SettlementAmbiguous { identifier: String },

    #[error("update for unknown contract {identifier}")]
    UnknownContract { identifier: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}
