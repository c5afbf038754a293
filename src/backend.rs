use reqwest::RequestBuilder;
use snafu::ResultExt;
use url::Url;

use crate::oauth_context::OAuthIntent;
use crate::request::{
    DecodeSnafu, RequestError, SendSnafu, UrlSnafu, ensure_success, with_bearer, with_credentials,
};
use crate::response::{
    CaptchaKeyResponse, CaptchaVerification, CaptchaVerifyRequest, CreateSessionRequest,
    DeleteUserRequest, OAuthStatusResponse, RoleData, RoleResponse,
};

/// The CitizenLink REST API, as far as session handling is concerned.
#[allow(async_fn_in_trait)]
pub trait Backend {
    /// `GET /api/user/role`. `Ok(None)` when the server answered without a usable role.
    async fn fetch_role(&self, bearer: Option<&str>) -> Result<Option<RoleData>, RequestError>;

    /// `POST /auth/session`. Lets the server mint its HttpOnly session cookie.
    async fn create_session(&self, access_token: &str) -> Result<(), RequestError>;

    /// `DELETE /auth/session`
    async fn delete_session(&self) -> Result<(), RequestError>;

    /// `GET /api/auth/oauth-status`
    async fn oauth_status(
        &self,
        bearer: &str,
        intent: OAuthIntent,
    ) -> Result<OAuthStatusResponse, RequestError>;

    /// `DELETE /api/compliance/delete`
    async fn delete_incomplete_user(
        &self,
        bearer: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), RequestError>;

    /// `GET /api/captcha/key`
    async fn captcha_site_key(&self) -> Result<Option<String>, RequestError>;

    /// `POST /api/captcha/verify`. Rejections are answered with an error status but still
    /// carry a verification payload, which is returned as is.
    async fn verify_captcha(&self, token: &str) -> Result<CaptchaVerification, RequestError>;
}

/// `Backend` talking to the real server through reqwest.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> Result<Url, RequestError> {
        self.base_url.join(path).context(UrlSnafu { path })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, RequestError> {
        with_credentials(builder).send().await.context(SendSnafu {})
    }
}

impl Backend for HttpBackend {
    async fn fetch_role(&self, bearer: Option<&str>) -> Result<Option<RoleData>, RequestError> {
        let request = with_bearer(self.client.get(self.url("api/user/role")?), bearer);
        let response = ensure_success(self.send(request).await?)?
            .json::<RoleResponse>()
            .await
            .context(DecodeSnafu {})?;
        Ok(match response.success {
            true => response.data,
            false => None,
        })
    }

    async fn create_session(&self, access_token: &str) -> Result<(), RequestError> {
        let request = self
            .client
            .post(self.url("auth/session")?)
            .json(&CreateSessionRequest { access_token });
        ensure_success(self.send(request).await?)?;
        Ok(())
    }

    async fn delete_session(&self) -> Result<(), RequestError> {
        let request = self.client.delete(self.url("auth/session")?);
        ensure_success(self.send(request).await?)?;
        Ok(())
    }

    async fn oauth_status(
        &self,
        bearer: &str,
        intent: OAuthIntent,
    ) -> Result<OAuthStatusResponse, RequestError> {
        let request = self
            .client
            .get(self.url("api/auth/oauth-status")?)
            .query(&[("intent", intent.as_str())])
            .header("X-OAuth-Intent", intent.as_str())
            .bearer_auth(bearer);
        ensure_success(self.send(request).await?)?
            .json::<OAuthStatusResponse>()
            .await
            .context(DecodeSnafu {})
    }

    async fn delete_incomplete_user(
        &self,
        bearer: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), RequestError> {
        let request = self
            .client
            .delete(self.url("api/compliance/delete")?)
            .bearer_auth(bearer)
            .json(&DeleteUserRequest {
                user_id,
                confirm: true,
                reason,
            });
        ensure_success(self.send(request).await?)?;
        Ok(())
    }

    async fn captcha_site_key(&self) -> Result<Option<String>, RequestError> {
        let request = self.client.get(self.url("api/captcha/key")?);
        let response = ensure_success(self.send(request).await?)?
            .json::<CaptchaKeyResponse>()
            .await
            .context(DecodeSnafu {})?;
        Ok(response.key.filter(|_| response.success))
    }

    async fn verify_captcha(&self, token: &str) -> Result<CaptchaVerification, RequestError> {
        let request = self
            .client
            .post(self.url("api/captcha/verify")?)
            .json(&CaptchaVerifyRequest { token });
        self.send(request)
            .await?
            .json::<CaptchaVerification>()
            .await
            .context(DecodeSnafu {})
    }
}
