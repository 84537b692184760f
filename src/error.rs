use reqwest::StatusCode;
use thiserror::Error;

/// Errors produced while talking to the portal.
///
/// Everything here is terminal: there is no retry policy, the run aborts on
/// the first failure.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request itself failed (connection, timeout, invalid URL).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("unexpected status {status}: {body}")]
    Transport { status: StatusCode, body: String },

    /// A response body was not the JSON we expected.
    #[error("malformed JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// An expected element was absent from an HTML or JSON body. Usually
    /// means the portal changed its page or payload structure.
    #[error("response missing expected structure: {0}")]
    Parse(String),

    /// Credentials rejected, token exchange malformed, or an API call was
    /// made before login.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The organization does not look like the single-address setup this
    /// client supports.
    #[error("precondition violated: {0}")]
    Precondition(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_includes_status_and_body() {
        let err = ApiError::Transport {
            status: StatusCode::BAD_REQUEST,
            body: "resolution must be Days or Hours".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("400"));
        assert!(msg.contains("resolution must be Days or Hours"));
    }

    #[test]
    fn auth_display_carries_reason() {
        let err = ApiError::Auth("login was not accepted".to_string());
        assert_eq!(
            err.to_string(),
            "authentication failed: login was not accepted"
        );
    }
}
