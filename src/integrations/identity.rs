// Identity provider backend API: account provisioning for staff-created
// doctors and customers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub email: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("{message}")]
    Rejected { code: String, message: String },
    #[error("identity provider request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for IdentityError {
    fn from(e: reqwest::Error) -> Self {
        IdentityError::Transport(e.to_string())
    }
}

/// Friendly text for provider error codes we know; anything else keeps
/// the provider's own message.
pub fn friendly_message(code: &str) -> Option<&'static str> {
    match code {
        "form_identifier_exists" => Some("This e-mail address is already registered"),
        "form_username_exists" | "form_username_taken" => {
            Some("This username is already taken")
        }
        "form_password_pwned" => {
            Some("This password appeared in a data breach; choose another one")
        }
        "form_password_length_too_short" | "form_password_not_strong_enough" => {
            Some("The password does not meet the security requirements")
        }
        "form_param_format_invalid" | "form_identifier_invalid" => {
            Some("The e-mail address or username is malformed")
        }
        "form_param_missing" => Some("A required field is missing"),
        _ => None,
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Rejected { code, message } => {
                tracing::warn!(code = %code, "identity provider rejected request");
                ApiError::Provider(
                    friendly_message(&code)
                        .map(str::to_string)
                        .unwrap_or(message),
                )
            }
            IdentityError::Transport(msg) => ApiError::Upstream(msg),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the external identity id of the created account.
    async fn create_user(&self, req: &NewIdentity) -> Result<String, IdentityError>;

    async fn delete_user(&self, external_id: &str) -> Result<(), IdentityError>;
}

/* -------------------------
   HTTP client
--------------------------*/

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpIdentityProvider {
    pub fn new(client: reqwest::Client, base_url: &str, secret_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateUserBody<'a> {
    email_address: [&'a str; 1],
    username: &'a str,
    password: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    public_metadata: RoleMetadata,
}

#[derive(Debug, Serialize)]
struct RoleMetadata {
    role: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreatedUser {
    id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProviderErrors {
    #[serde(default)]
    errors: Vec<ProviderErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorEntry {
    code: String,
    message: String,
    #[serde(default)]
    long_message: Option<String>,
}

impl ProviderErrors {
    pub(crate) fn into_error(self, status: u16) -> IdentityError {
        match self.errors.into_iter().next() {
            Some(e) => IdentityError::Rejected {
                code: e.code,
                message: e.long_message.unwrap_or(e.message),
            },
            None => IdentityError::Rejected {
                code: "unknown".into(),
                message: format!("identity provider returned status {status}"),
            },
        }
    }
}

/// First word is the first name, the rest is the last name.
fn split_name(name: &str) -> (&str, &str) {
    let name = name.trim();
    match name.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (name, ""),
    }
}

async fn rejection(resp: reqwest::Response) -> IdentityError {
    let status = resp.status().as_u16();
    match resp.json::<ProviderErrors>().await {
        Ok(errors) => errors.into_error(status),
        Err(e) => IdentityError::Transport(format!("status {status}: {e}")),
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn create_user(&self, req: &NewIdentity) -> Result<String, IdentityError> {
        let (first_name, last_name) = split_name(&req.name);
        let body = CreateUserBody {
            email_address: [req.email.as_str()],
            username: &req.username,
            password: &req.password,
            first_name,
            last_name,
            public_metadata: RoleMetadata {
                role: req.role.as_str(),
            },
        };

        let resp = self
            .client
            .post(format!("{}/users", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }

        let created: CreatedUser = resp.json().await?;
        Ok(created.id)
    }

    async fn delete_user(&self, external_id: &str) -> Result<(), IdentityError> {
        let resp = self
            .client
            .delete(format!("{}/users/{}", self.base_url, external_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_map_to_friendly_text() {
        let err: ApiError = IdentityError::Rejected {
            code: "form_identifier_exists".into(),
            message: "That email address is taken. Please try another.".into(),
        }
        .into();
        match err {
            ApiError::Provider(msg) => assert_eq!(msg, "This e-mail address is already registered"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_codes_keep_provider_message() {
        let err: ApiError = IdentityError::Rejected {
            code: "quota_exceeded".into(),
            message: "Monthly user limit reached".into(),
        }
        .into();
        match err {
            ApiError::Provider(msg) => assert_eq!(msg, "Monthly user limit reached"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_every_documented_code_is_mapped() {
        for code in [
            "form_identifier_exists",
            "form_password_pwned",
            "form_password_length_too_short",
            "form_param_format_invalid",
            "form_param_missing",
            "form_username_exists",
        ] {
            assert!(friendly_message(code).is_some(), "{code}");
        }
    }

    #[test]
    fn test_provider_error_body_prefers_long_message() {
        let body: ProviderErrors = serde_json::from_value(serde_json::json!({
            "errors": [{
                "code": "form_param_missing",
                "message": "missing",
                "long_message": "email_address must be included"
            }]
        }))
        .unwrap();
        match body.into_error(422) {
            IdentityError::Rejected { code, message } => {
                assert_eq!(code, "form_param_missing");
                assert_eq!(message, "email_address must be included");
            }
            other => panic!("unexpected {other:?}"),
        }

        let empty: ProviderErrors = serde_json::from_str("{}").unwrap();
        assert!(matches!(empty.into_error(500), IdentityError::Rejected { .. }));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("Ana Maria Souza"), ("Ana", "Maria Souza"));
        assert_eq!(split_name(" Bruno "), ("Bruno", ""));
    }

    #[test]
    fn test_transport_maps_to_upstream() {
        let err: ApiError = IdentityError::Transport("timeout".into()).into();
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}
