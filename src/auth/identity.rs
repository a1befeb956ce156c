use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::error::AuthError;

/// What an external identity provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub subject_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        AuthError::IdentityVerificationFailed(err.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, IdentityError>;
}

/// Posts the opaque credential to a verification endpoint and expects a
/// `VerifiedIdentity` JSON body back on success.
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    credential: &'a str,
}

impl HttpIdentityVerifier {
    pub fn new(endpoint: &str) -> Result<Self, IdentityError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| IdentityError::Unavailable(format!("bad endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, IdentityError> {
        let res = self
            .client
            .post(self.endpoint.clone())
            .json(&VerifyRequest { credential })
            .send()
            .await
            .map_err(|e| {
                error!("identity provider request failed: {}", e);
                IdentityError::Unavailable(e.to_string())
            })?;

        let status = res.status();
        if status.is_client_error() {
            info!(status = status.as_u16(), "identity provider rejected credential");
            return Err(IdentityError::InvalidCredential);
        }
        if !status.is_success() {
            return Err(IdentityError::Unavailable(format!("provider returned {}", status)));
        }

        res.json::<VerifiedIdentity>()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("malformed provider response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn test_verified_identity_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_json(serde_json::json!({ "credential": "good" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "subject_id": "google|123",
                "email": "a@example.com",
                "display_name": "A",
                "avatar": null
            })))
            .mount(&server)
            .await;

        let verifier = HttpIdentityVerifier::new(&format!("{}/verify", server.uri())).unwrap();
        let identity = verifier.verify("good").await.unwrap();
        assert_eq!(identity.subject_id, "google|123");
        assert_eq!(identity.display_name.as_deref(), Some("A"));
        assert_eq!(identity.avatar, None);
    }

    #[tokio::test]
    async fn test_rejection_is_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let verifier = HttpIdentityVerifier::new(&server.uri()).unwrap();
        assert_eq!(verifier.verify("bad").await, Err(IdentityError::InvalidCredential));
    }

    #[tokio::test]
    async fn test_provider_outage_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let verifier = HttpIdentityVerifier::new(&server.uri()).unwrap();
        let err = verifier.verify("any").await.unwrap_err();
        assert!(matches!(err, IdentityError::Unavailable(_)));
        assert!(matches!(AuthError::from(err), AuthError::IdentityVerificationFailed(_)));
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        assert!(HttpIdentityVerifier::new("not a url").is_err());
    }
}
