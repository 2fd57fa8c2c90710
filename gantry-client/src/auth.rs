//! Registration and OAuth token exchange
//!
//! Enrollment trades the short registration token for a tenant bearer via
//! the host's runner-registration endpoint. After that, every session
//! authenticates by signing a five-minute RS256 assertion with the agent
//! key and exchanging it for an access token at the tenant's authorization
//! URL (client-credentials grant).

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::Serialize;
use uuid::Uuid;

use gantry_core::agent::{AccessToken, GitHubAuthResult, RunnerRegistration};

use crate::error::{ClientError, Result};

/// Exchanges a registration token for the tenant handoff.
///
/// `github.com` hosts register against `api.github.com`; enterprise hosts
/// use the `/api/v3` prefix.
pub async fn exchange_registration_token(
    http: &reqwest::Client,
    config_url: &str,
    registration_token: &str,
) -> Result<GitHubAuthResult> {
    let mut url =
        Url::parse(config_url).map_err(|e| ClientError::Url(format!("{config_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::Url(format!("{config_url}: missing host")))?
        .to_lowercase();
    if host == "github.com" {
        url.set_host(Some("api.github.com"))
            .map_err(|e| ClientError::Url(e.to_string()))?;
        url.set_path("actions/runner-registration");
    } else {
        url.set_path("api/v3/actions/runner-registration");
    }

    let body = RunnerRegistration {
        url: config_url.to_string(),
        runner_event: "register".to_string(),
    };
    let response = http
        .post(url)
        .header("Authorization", format!("RemoteAuth {registration_token}"))
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::api(status.as_u16(), body));
    }
    response
        .json::<GitHubAuthResult>()
        .await
        .map_err(|e| ClientError::Decode(format!("registration response: {e}")))
}

#[derive(Debug, Serialize)]
struct AssertionClaims {
    sub: String,
    iss: String,
    jti: String,
    aud: String,
    nbf: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    client_assertion_type: &'a str,
    client_assertion: &'a str,
}

/// Signs client assertions for one agent identity and trades them for
/// bearer tokens.
pub struct Authorizer {
    client_id: String,
    authorization_url: String,
    signing_key: EncodingKey,
}

impl Authorizer {
    /// Creates an authorizer from the agent's OAuth material and its
    /// PKCS#1 DER private key.
    pub fn new(
        client_id: impl Into<String>,
        authorization_url: impl Into<String>,
        private_key_der: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            client_id: client_id.into(),
            authorization_url: authorization_url.into(),
            signing_key: EncodingKey::from_rsa_der(private_key_der),
        })
    }

    /// Obtains a fresh access token via the client-credentials grant.
    pub async fn authorize(&self, http: &reqwest::Client) -> Result<AccessToken> {
        let assertion = self.sign_assertion()?;
        let response = http
            .post(&self.authorization_url)
            .header(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .header("Accept", "application/json")
            .form(&TokenRequest {
                grant_type: "client_credentials",
                client_assertion_type:
                    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
                client_assertion: &assertion,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Auth(format!(
                "service responded with code {}: {body}",
                status.as_u16()
            )));
        }
        response
            .json::<AccessToken>()
            .await
            .map_err(|e| ClientError::Decode(format!("token response: {e}")))
    }

    fn sign_assertion(&self) -> Result<String> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = AssertionClaims {
            sub: self.client_id.clone(),
            iss: self.client_id.clone(),
            jti: Uuid::new_v4().to_string(),
            aud: self.authorization_url.clone(),
            nbf: now,
            iat: now,
            exp: now + 5 * 60,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| ClientError::Auth(format!("failed to sign assertion: {e}")))
    }
}

/// Reads a claim from a JWT payload without verifying the signature.
///
/// The runner has no key to verify job tokens against; it only echoes the
/// `orchid` claim back for correlation.
pub fn unverified_claim(token: &str, claim: &str) -> Option<String> {
    use base64::Engine;

    let payload = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get(claim)?.as_str().map(str::to_string)
}
