use http::StatusCode;
use reqwest::{RequestBuilder, Response};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RequestError {
    #[snafu(display("RequestError: Could not build url for '{path}'"))]
    Url {
        path: String,
        source: url::ParseError,
    },

    #[snafu(display("RequestError: Could not send request"))]
    Send { source: reqwest::Error },

    #[snafu(display("RequestError: Could not decode payload"))]
    Decode { source: reqwest::Error },

    #[snafu(display("RequestError: Received an error response with status {status}"))]
    Status { status: StatusCode },
}

impl RequestError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RequestError::Status { status } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// 401 and 403. Expected when acting on an already deleted or signed out user.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }
}

/// Sends cookies along, which is what carries the server session.
pub(crate) fn with_credentials(builder: RequestBuilder) -> RequestBuilder {
    #[cfg(target_arch = "wasm32")]
    let builder = builder.fetch_credentials_include();
    builder
}

pub(crate) fn with_bearer(builder: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
    match bearer {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

pub(crate) fn ensure_success(response: Response) -> Result<Response, RequestError> {
    let status = response.status();
    match status.is_success() {
        true => Ok(response),
        false => StatusSnafu { status }.fail(),
    }
}
