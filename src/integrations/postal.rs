// Postal-code lookup used to pre-fill address forms. Nothing is persisted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub postal_code: String,
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PostalError {
    #[error("postal code not found")]
    NotFound,
    #[error("postal lookup failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for PostalError {
    fn from(e: reqwest::Error) -> Self {
        PostalError::Transport(e.to_string())
    }
}

impl From<PostalError> for ApiError {
    fn from(e: PostalError) -> Self {
        match e {
            PostalError::NotFound => ApiError::not_found("postal code"),
            PostalError::Transport(msg) => ApiError::Upstream(msg),
        }
    }
}

#[async_trait]
pub trait PostalLookup: Send + Sync {
    /// `postal_code` is 8 bare digits.
    async fn lookup(&self, postal_code: &str) -> Result<Address, PostalError>;
}

pub struct HttpPostalLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPostalLookup {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupBody {
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
    /// The service answers 200 with `"erro": true` (or `"true"`) for unknown codes.
    #[serde(default)]
    erro: Option<serde_json::Value>,
}

impl LookupBody {
    fn into_address(self, postal_code: &str) -> Result<Address, PostalError> {
        let failed = match &self.erro {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        };
        if failed {
            return Err(PostalError::NotFound);
        }
        Ok(Address {
            postal_code: postal_code.to_string(),
            street: self.logradouro,
            neighborhood: self.bairro,
            city: self.localidade,
            state: self.uf,
        })
    }
}

#[async_trait]
impl PostalLookup for HttpPostalLookup {
    async fn lookup(&self, postal_code: &str) -> Result<Address, PostalError> {
        let resp = self
            .client
            .get(format!("{}/{}/json/", self.base_url, postal_code))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::BAD_REQUEST
            || resp.status() == reqwest::StatusCode::NOT_FOUND
        {
            return Err(PostalError::NotFound);
        }
        let resp = resp.error_for_status()?;
        let body: LookupBody = resp.json().await?;
        body.into_address(postal_code)
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    pub struct FakePostalLookup;

    #[async_trait]
    impl PostalLookup for FakePostalLookup {
        async fn lookup(&self, postal_code: &str) -> Result<Address, PostalError> {
            if postal_code == "01310100" {
                Ok(Address {
                    postal_code: postal_code.to_string(),
                    street: "Avenida Paulista".into(),
                    neighborhood: "Bela Vista".into(),
                    city: "São Paulo".into(),
                    state: "SP".into(),
                })
            } else {
                Err(PostalError::NotFound)
            }
        }
    }
}
