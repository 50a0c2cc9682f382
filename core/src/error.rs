use serde_json::Value;

/// Failures surfaced by [`crate::session::SessionClient`].
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: Value },
    /// The refresh path was exhausted; credentials have been cleared.
    #[error("session expired: {source}")]
    SessionExpired {
        #[source]
        source: Box<ClientError>,
    },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Short text suitable for showing next to a login form.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Could not reach the server. Check your connection.".to_string(),
            Self::Http { body, status } => body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("Request failed with status {status}")),
            Self::SessionExpired { .. } => "Your session has expired. Please log in again.".into(),
            Self::Decode(_) => "The server sent an unexpected response.".to_string(),
        }
    }
}

/// Failures of the kitchen push channel.
#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    #[error("feed connection failed: {0}")]
    Connect(String),
    #[error("invalid feed URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("feed is not connected")]
    NotConnected,
}
