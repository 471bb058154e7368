use std::fmt;

pub const ERROR_EMPTY_RESPONSE_HEADER: &str = "Empty RESPONSE header";
pub const ERROR_RESPONSE_HEADER_NOT_OK: &str = "RESPONSE header is not 200 OK";
pub const ERROR_UNABLE_DECODE_SUMMARY_RESPONSE: &str = "Unable to decode totals json";
pub const ERROR_EMPTY_SUMMARY_RESPONSE: &str = "Decoded totals response is empty";
pub const ERROR_UNABLE_DECODE_REVIEWS_RESPONSE: &str = "Unable to decode reviews json";
pub const ERROR_EMPTY_REVIEWS_RESPONSE: &str = "Decoded reviews response is empty";

/// Errors that end an operation outright. Expected fetch failures never show up
/// here; they are absorbed by the retry governor and reported through
/// `last_error()` instead.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Required engine_data field is empty: {0}")]
    Validation(String),
    #[error("unknown reviews provider: {0:?}")]
    UnknownProvider(String),
    #[error("no fetch adapter is available for provider {0}")]
    AdapterUnavailable(String),
    #[error("invalid table name: {0:?}")]
    InvalidIdentifier(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Which feed a request was made against; decides the wording of error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget {
    Totals,
    Reviews,
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::Totals => write!(f, "totals"),
            FetchTarget::Reviews => write!(f, "reviews"),
        }
    }
}

/// Coarse classification used for logging and for deciding what a failure means
/// to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TransientNetwork,
    MalformedPayload,
    FatalProvider,
}

/// Failure reported by a `FetchAdapter` for a single request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("response carried no status line")]
    EmptyHeader,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("response body could not be decoded: {0}")]
    Decode(String),
    #[error("response body decoded to nothing")]
    Empty,
    #[error("{0}")]
    Vendor(String),
    #[error("malformed row: {0}")]
    Malformed(String),
}

impl FetchError {
    /// The undecorated error value recorded as "last error". Generic transport
    /// and decode failures map onto the shared base messages so that an aborted
    /// run is recognised as fatal by the propagation gate.
    pub fn error_value(&self, target: FetchTarget) -> String {
        match (self, target) {
            (FetchError::Transport(_) | FetchError::EmptyHeader, _) => {
                ERROR_EMPTY_RESPONSE_HEADER.to_string()
            }
            (FetchError::Status(_), _) => ERROR_RESPONSE_HEADER_NOT_OK.to_string(),
            (FetchError::Decode(_), FetchTarget::Totals) => {
                ERROR_UNABLE_DECODE_SUMMARY_RESPONSE.to_string()
            }
            (FetchError::Decode(_), FetchTarget::Reviews) => {
                ERROR_UNABLE_DECODE_REVIEWS_RESPONSE.to_string()
            }
            (FetchError::Empty, FetchTarget::Totals) => ERROR_EMPTY_SUMMARY_RESPONSE.to_string(),
            (FetchError::Empty, FetchTarget::Reviews) => ERROR_EMPTY_REVIEWS_RESPONSE.to_string(),
            (FetchError::Vendor(msg), _) => msg.clone(),
            (FetchError::Malformed(detail), target) => format!("Malformed {target} row: {detail}"),
        }
    }

    /// Key used by the retry governor. Vendor messages are used verbatim so the
    /// fatal set can match them; everything else carries the request context,
    /// which keeps it retryable.
    pub fn signature(&self, target: FetchTarget) -> String {
        match self {
            FetchError::Vendor(msg) => msg.clone(),
            other => format!("{} when getting {target}", other.error_value(target)),
        }
    }

    /// Extra detail worth logging next to the signature.
    pub fn detail(&self) -> Option<String> {
        match self {
            FetchError::Transport(d) | FetchError::Decode(d) => Some(d.clone()),
            FetchError::Status(code) => Some(format!("status {code}")),
            _ => None,
        }
    }

    pub fn class(&self, is_fatal: impl Fn(&str) -> bool) -> ErrorClass {
        match self {
            FetchError::Transport(_) | FetchError::EmptyHeader | FetchError::Status(_) => {
                ErrorClass::TransientNetwork
            }
            FetchError::Vendor(msg) if is_fatal(msg) => ErrorClass::FatalProvider,
            _ => ErrorClass::MalformedPayload,
        }
    }
}
