use std::sync::Arc;

use itertools::Itertools;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::json;
use snafu::{OptionExt, ResultExt};
use time::OffsetDateTime;
use url::Url;

use crate::best_effort::attempt;
use crate::code_verifier::CodeVerifier;
use crate::config::ProviderOptions;
use crate::provider::{
    AuthProvider, ClaimsSnafu, MissingCodeVerifierSnafu, ProviderError, ProviderSession,
    ProviderUser, RejectedSnafu, RequestSnafu, StorageSnafu,
};
use crate::request::{DecodeSnafu, RequestError, SendSnafu, UrlSnafu, ensure_success};
use crate::response::TokenResponse;
use crate::storage::KeyValueStore;

/// Claims of a provider access token we rely on. Signatures are checked by the server, the
/// browser only needs the expiry.
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    exp: Option<i64>,
}

fn decode_access_token_claims(access_token: &str) -> Result<AccessTokenClaims, ProviderError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<AccessTokenClaims>(
        access_token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map(|data| data.claims)
    .context(ClaimsSnafu {})
}

/// OAuth scopes requested per identity provider.
fn scopes_for(provider: &str) -> &'static [&'static str] {
    match provider {
        "google" => &[
            "email",
            "profile",
            "https://www.googleapis.com/auth/user.phonenumbers.read",
        ],
        "facebook" => &["email", "public_profile"],
        _ => &[],
    }
}

/// `AuthProvider` backed by a Supabase (GoTrue) project.
///
/// The session lives in local storage under the same key the JavaScript client uses.
#[derive(Clone)]
pub struct SupabaseAuth {
    client: reqwest::Client,
    project_url: Url,
    anon_key: String,
    storage_key: String,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SupabaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAuth")
            .field("project_url", &self.project_url)
            .field("storage_key", &self.storage_key)
            .finish_non_exhaustive()
    }
}

impl SupabaseAuth {
    pub fn new(options: &ProviderOptions, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            project_url: options.url.clone(),
            anon_key: options.anon_key.clone(),
            storage_key: options.resolved_storage_key(),
            store,
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn code_verifier_key(&self) -> String {
        format!("{}-code-verifier", self.storage_key)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.project_url
            .join(path)
            .context(UrlSnafu { path })
            .context(RequestSnafu {})
    }

    fn with_api_key(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.anon_key)
    }

    fn stored_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        let raw = self
            .store
            .get_item(&self.storage_key)
            .context(StorageSnafu {})?;
        Ok(raw.and_then(|raw| {
            attempt("Decoding stored provider session", || {
                serde_json::from_str::<ProviderSession>(&raw)
            })
        }))
    }

    fn persist(&self, session: &ProviderSession) -> Result<(), ProviderError> {
        let Some(encoded) = attempt("Encoding provider session", || serde_json::to_string(session))
        else {
            return Ok(());
        };
        self.store
            .set_item(&self.storage_key, &encoded)
            .context(StorageSnafu {})
    }

    fn forget(&self) {
        attempt("Removing provider session", || {
            self.store.remove_item(&self.storage_key)
        });
        attempt("Removing code verifier", || {
            self.store.remove_item(&self.code_verifier_key())
        });
    }

    async fn request_token(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<ProviderSession, ProviderError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .with_api_key(self.client.post(url))
            .json(&body)
            .send()
            .await
            .context(SendSnafu {})
            .context(RequestSnafu {})?
            .json::<TokenResponse>()
            .await
            .context(DecodeSnafu {})
            .context(RequestSnafu {})?;

        match response {
            TokenResponse::Success(success) => {
                let session = success.into_session(OffsetDateTime::now_utc());
                self.persist(&session)?;
                Ok(session)
            }
            TokenResponse::Error(error_response) => RejectedSnafu { error_response }.fail(),
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, RequestError> {
        let url = self
            .project_url
            .join("auth/v1/user")
            .context(UrlSnafu { path: "auth/v1/user" })?;
        let response = self
            .with_api_key(self.client.get(url))
            .bearer_auth(access_token)
            .send()
            .await
            .context(SendSnafu {})?;
        ensure_success(response)?
            .json::<ProviderUser>()
            .await
            .context(DecodeSnafu {})
    }
}

impl AuthProvider for SupabaseAuth {
    async fn session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        self.stored_session()
    }

    async fn refresh_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        let Some(current) = self.stored_session()? else {
            return Ok(None);
        };
        match self
            .request_token(
                "refresh_token",
                json!({ "refresh_token": current.refresh_token }),
            )
            .await
        {
            Ok(session) => {
                tracing::trace!("Refreshed provider session");
                Ok(Some(session))
            }
            Err(ProviderError::Rejected { error_response }) if error_response.is_session_ended() => {
                tracing::debug!(?error_response, "Provider session ended, forgetting it");
                self.forget();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(current) = self.stored_session().ok().flatten() else {
            // Nothing to revoke. The code verifier of a sign in in progress must survive.
            attempt("Removing provider session", || {
                self.store.remove_item(&self.storage_key)
            });
            return Ok(());
        };
        self.forget();

        let mut url = self.endpoint("auth/v1/logout")?;
        url.query_pairs_mut().append_pair("scope", "global");
        let response = self
            .with_api_key(self.client.post(url))
            .bearer_auth(&current.access_token)
            .send()
            .await
            .context(SendSnafu {})
            .context(RequestSnafu {})?;
        match ensure_success(response) {
            Ok(_) => Ok(()),
            // The session was already revoked.
            Err(err) if err.is_auth_rejection() || err.status() == Some(http::StatusCode::NOT_FOUND) => {
                Ok(())
            }
            Err(err) => Err(ProviderError::Request { source: err }),
        }
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let claims = decode_access_token_claims(access_token)?;
        let user = self
            .fetch_user(access_token)
            .await
            .context(RequestSnafu {})?;
        let session = ProviderSession {
            access_token: access_token.to_owned(),
            refresh_token: refresh_token.to_owned(),
            expires_at: claims.exp,
            token_type: Some("bearer".to_owned()),
            user,
        };
        self.persist(&session)?;
        Ok(session)
    }

    fn authorize_url(&self, provider: &str, redirect_to: &Url) -> Result<Url, ProviderError> {
        let verifier = CodeVerifier::<64>::generate();
        self.store
            .set_item(&self.code_verifier_key(), verifier.code_verifier())
            .context(StorageSnafu {})?;
        let challenge = verifier.to_code_challenge();

        let mut url = self.endpoint("auth/v1/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("provider", provider)
                .append_pair("redirect_to", redirect_to.as_str());
            let scopes = scopes_for(provider);
            if !scopes.is_empty() {
                query.append_pair("scopes", &scopes.iter().join(" "));
            }
            query
                .append_pair("code_challenge", challenge.code_challenge())
                .append_pair(
                    "code_challenge_method",
                    challenge.code_challenge_method().as_param(),
                );
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderSession, ProviderError> {
        let verifier = self
            .store
            .get_item(&self.code_verifier_key())
            .context(StorageSnafu {})?
            .map(CodeVerifier::<64>::from_stored)
            .context(MissingCodeVerifierSnafu {})?;

        let session = self
            .request_token(
                "pkce",
                json!({ "auth_code": code, "code_verifier": verifier.code_verifier() }),
            )
            .await?;
        attempt("Removing used code verifier", || {
            self.store.remove_item(&self.code_verifier_key())
        });
        Ok(session)
    }
}
