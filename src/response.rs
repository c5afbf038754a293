use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::provider::{ProviderSession, ProviderUser};

/// `GET /api/user/role`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct RoleResponse {
    #[serde(default)]
    pub success: bool,
    pub data: Option<RoleData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleData {
    pub role: Option<String>,
    pub name: Option<String>,
}

/// `GET /api/auth/oauth-status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthStatusResponse {
    #[serde(default)]
    pub complete: bool,

    #[serde(default)]
    pub is_new_signup: bool,

    #[serde(default)]
    pub is_existing_incomplete: bool,

    pub user_type: Option<String>,

    pub message: Option<String>,
}

/// `POST /auth/session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct CreateSessionRequest<'a> {
    pub access_token: &'a str,
}

/// `DELETE /api/compliance/delete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteUserRequest<'a> {
    pub user_id: &'a str,
    pub confirm: bool,
    pub reason: &'a str,
}

/// `GET /api/captcha/key`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct CaptchaKeyResponse {
    #[serde(default)]
    pub success: bool,
    pub key: Option<String>,
}

/// `POST /api/captcha/verify`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct CaptchaVerifyRequest<'a> {
    pub token: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CaptchaVerification {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

impl CaptchaVerification {
    pub fn reason(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}

/// Answer of the provider token endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum TokenResponse {
    Success(SuccessTokenResponse),
    Error(ProviderErrorResponse),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct SuccessTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
    pub user: ProviderUser,
}

impl SuccessTokenResponse {
    pub(crate) fn into_session(self, now: OffsetDateTime) -> ProviderSession {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|secs| now.unix_timestamp().saturating_add(secs))
        });
        ProviderSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            token_type: self.token_type,
            user: self.user,
        }
    }
}

/// Error payload of the provider. Depending on the endpoint and version, the description is
/// found in `error_description` or in `msg`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderErrorResponse {
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub error_code: Option<String>,

    #[serde(default)]
    pub error_description: Option<String>,

    #[serde(default)]
    pub msg: Option<String>,
}

impl ProviderErrorResponse {
    pub fn description(&self) -> &str {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.error.as_deref())
            .unwrap_or("unknown error")
    }

    /// The refresh token was revoked or already used. The session is gone for good.
    pub fn is_session_ended(&self) -> bool {
        self.error.as_deref() == Some("invalid_grant")
            || matches!(
                self.error_code.as_deref(),
                Some("refresh_token_not_found" | "refresh_token_already_used" | "session_not_found")
            )
    }
}

/// Query parameters the provider appends when redirecting back to the callback page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackParams {
    Code(String),
    Error {
        error: String,
        description: Option<String>,
    },
    None,
}

impl CallbackParams {
    pub(crate) fn from_url(url: &Url) -> Self {
        let mut code = None;
        let mut error = None;
        let mut description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }
        match (error, code) {
            (Some(error), _) => CallbackParams::Error { error, description },
            (None, Some(code)) => CallbackParams::Code(code),
            (None, None) => CallbackParams::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;

    use super::*;

    #[test]
    fn oauth_status_tolerates_missing_flags() {
        let status: OAuthStatusResponse =
            serde_json::from_str(r#"{"complete":false,"userType":"citizen"}"#).unwrap();
        assert_that(status.complete).is_false();
        assert_that(status.is_new_signup).is_false();
        assert_that(status.user_type).is_equal_to(Some("citizen".to_owned()));
    }

    #[test]
    fn delete_request_uses_camel_case() {
        let body = serde_json::to_value(DeleteUserRequest {
            user_id: "u-1",
            confirm: true,
            reason: "test",
        })
        .unwrap();
        assert_that(body["userId"].as_str()).is_equal_to(Some("u-1"));
        assert_that(body["confirm"].as_bool()).is_equal_to(Some(true));
    }

    #[test]
    fn captcha_verification_reads_error_field() {
        let verification: CaptchaVerification =
            serde_json::from_str(r#"{"success":false,"error":"timeout-or-duplicate"}"#).unwrap();
        assert_that(verification.success).is_false();
        assert_that(verification.reason()).is_equal_to(Some("timeout-or-duplicate"));
    }

    #[test]
    fn token_response_distinguishes_errors() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token: Already Used"}"#,
        )
        .unwrap();
        let TokenResponse::Error(err) = response else {
            panic!("expected an error response");
        };
        assert_that(err.is_session_ended()).is_true();
        assert_that(err.description()).is_equal_to("Invalid Refresh Token: Already Used");
    }

    #[test]
    fn callback_error_wins_over_code() {
        let url = Url::parse("https://portal.example.org/oauth-callback?code=abc&error=access_denied")
            .unwrap();
        assert_that(CallbackParams::from_url(&url)).is_equal_to(CallbackParams::Error {
            error: "access_denied".to_owned(),
            description: None,
        });

        let url = Url::parse("https://portal.example.org/oauth-callback?code=abc").unwrap();
        assert_that(CallbackParams::from_url(&url)).is_equal_to(CallbackParams::Code("abc".to_owned()));
    }
}
