//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Application error that can be serialized for callers of the pipeline.
#[derive(Debug, Clone)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User-correctable configuration problem
    Validation,
    /// Container engine binary not found
    EngineMissing,
    /// Container engine daemon not reachable
    EngineUnreachable,
    /// External command exited non-zero or could not be spawned
    Process,
    /// A dependency did not become ready in time
    ReadinessTimeout,
    /// Launcher settings or project document error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Archive extraction error
    Archive,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::Validation => 1001,
            Self::EngineMissing => 1002,
            Self::EngineUnreachable => 1003,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::Archive => 2004,
            Self::Process => 3001,
            Self::ReadinessTimeout => 3002,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Validation, message)
    }

    pub fn engine_missing(engine: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::EngineMissing,
            HashMap::from([
                ("engine".to_string(), engine.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn engine_unreachable(engine: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::EngineUnreachable,
            HashMap::from([
                ("engine".to_string(), engine.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    /// Process exited with a non-zero status. `code` is `None` when the process
    /// was terminated by a signal.
    pub fn process_exit(command: &str, code: Option<i32>, stderr: &str) -> Self {
        Self::new(
            ErrorKind::Process,
            HashMap::from([
                ("command".to_string(), command.to_string()),
                (
                    "exit_code".to_string(),
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                ),
                ("stderr".to_string(), stderr.trim().to_string()),
            ]),
        )
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn readiness_timeout(target: &str, attempts: u32) -> Self {
        Self::new(
            ErrorKind::ReadinessTimeout,
            HashMap::from([
                ("target".to_string(), target.to_string()),
                ("attempts".to_string(), attempts.to_string()),
            ]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Archive, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Readiness timeouts can be retried by re-running the invocation.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::ReadinessTimeout
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::other(format!("Failed to serialize deployment descriptor: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::archive(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
