// Error types shared by the search, provider, analysis and export layers
use std::fmt;
use std::time::Duration;

/// Why a single LLM provider call did not produce a usable completion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderFailure {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited or out of quota")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response was empty or too short")]
    EmptyResponse,

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ProviderFailure {
    /// Transient failures are worth one more attempt against the same provider.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderFailure::Transport(_) | ProviderFailure::Timeout | ProviderFailure::RateLimited => true,
            ProviderFailure::Status { status, .. } => *status >= 500,
            ProviderFailure::EmptyResponse | ProviderFailure::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderFailure::Timeout
        } else if err.is_decode() {
            ProviderFailure::Decode(err.to_string())
        } else {
            ProviderFailure::Transport(err.to_string())
        }
    }
}

/// One entry in the "no provider available" report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub failure: ProviderFailure,
}

impl fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.failure)
    }
}

fn join_attempts(failures: &[ProviderAttempt]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum GapFinderError {
    #[error("no LLM provider available ({})", join_attempts(.failures))]
    ProviderUnavailable { failures: Vec<ProviderAttempt> },

    #[error("{service} rate limit exceeded")]
    RateLimitExceeded { service: String },

    #[error("{service} request timed out after {timeout:?}")]
    NetworkTimeout { service: String, timeout: Duration },

    #[error("failed to parse {context}: {message}")]
    Parse { context: String, message: String },

    #[error("no results for query '{query}'")]
    NoResults { query: String },

    #[error("{service} returned HTTP {status}")]
    HttpStatus { service: String, status: u16 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Excel error: {0}")]
    Excel(#[from] rust_xlsxwriter::XlsxError),
}

impl GapFinderError {
    /// Short machine-readable tag, used in export metadata and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GapFinderError::ProviderUnavailable { .. } => "provider_unavailable",
            GapFinderError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GapFinderError::NetworkTimeout { .. } => "network_timeout",
            GapFinderError::Parse { .. } => "parse_failure",
            GapFinderError::NoResults { .. } => "no_results",
            GapFinderError::HttpStatus { .. } | GapFinderError::Http(_) => "http",
            GapFinderError::Config(_) => "config",
            GapFinderError::Io(_) => "io",
            GapFinderError::Json(_)
            | GapFinderError::Yaml(_)
            | GapFinderError::Csv(_)
            | GapFinderError::Excel(_) => "serialization",
        }
    }

    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        GapFinderError::Parse {
            context: context.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GapFinderError>;
