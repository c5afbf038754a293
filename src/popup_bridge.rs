use serde::Deserialize;
use url::form_urlencoded;

/// A message posted by the OAuth popup to the tab that opened it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupMessage {
    SignupSuccess {
        provider: Option<String>,
        redirect_to: Option<String>,
        access_token: Option<String>,
        refresh_token: Option<String>,
    },
    UserExists,
    SignupError {
        message: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPopupMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<RawPayload>,
    redirect_to: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    provider: Option<String>,
    message: Option<String>,
}

impl PopupMessage {
    /// Interprets a `postMessage` payload.
    ///
    /// Messages from any origin other than `page_origin`, unknown message types and error
    /// messages without text are ignored.
    pub fn parse(page_origin: &str, origin: &str, data: &serde_json::Value) -> Option<Self> {
        if origin != page_origin {
            tracing::debug!(origin, "Ignoring message from foreign origin");
            return None;
        }
        let raw = RawPopupMessage::deserialize(data).ok()?;
        let payload = raw.payload.unwrap_or_default();
        match raw.kind.as_deref()? {
            "oauth-signup-success" => Some(PopupMessage::SignupSuccess {
                provider: payload.provider,
                redirect_to: raw.redirect_to.filter(|it| !it.is_empty()),
                access_token: raw.access_token.filter(|it| !it.is_empty()),
                refresh_token: raw.refresh_token.filter(|it| !it.is_empty()),
            }),
            "oauth-user-exists" => Some(PopupMessage::UserExists),
            "oauth-signup-error" => payload
                .message
                .filter(|it| !it.is_empty())
                .map(|message| PopupMessage::SignupError { message }),
            _ => None,
        }
    }
}

/// "google" -> "Google". Falls back to "OAuth".
pub(crate) fn provider_display_name(provider: Option<&str>) -> String {
    let provider = provider.filter(|it| !it.is_empty()).unwrap_or("OAuth");
    let mut chars = provider.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Where to send the opener after a successful popup signup. Tokens travel in the fragment, so
/// that the continuation page can adopt the session.
pub(crate) fn success_redirect(
    redirect_to: Option<&str>,
    continuation_page: &str,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
) -> String {
    let target = redirect_to.unwrap_or(continuation_page);
    match (access_token, refresh_token) {
        (Some(access_token), Some(refresh_token)) => {
            let fragment = form_urlencoded::Serializer::new(String::new())
                .append_pair("access_token", access_token)
                .append_pair("refresh_token", refresh_token)
                .append_pair("type", "recovery")
                .finish();
            format!("{target}#{fragment}")
        }
        _ => target.to_owned(),
    }
}
