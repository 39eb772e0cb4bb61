// src/routes/webhook_routes.rs
//
// Identity provider events mirrored into `app_user`. Signature checks run
// before anything is parsed or written.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    auth::verify_webhook_signature,
    error::{ApiError, db_error},
    models::{AppState, OkResponse, Role},
    revalidate::Listing,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/identity", post(identity_webhook))
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    id: String,
    email_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetadata {
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    image_url: Option<String>,
    #[serde(default)]
    email_addresses: Vec<EmailAddress>,
    primary_email_address_id: Option<String>,
    #[serde(default)]
    public_metadata: PublicMetadata,
}

#[derive(Debug, Deserialize)]
struct DeletedPayload {
    id: Option<String>,
}

/// Local view of a provider user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredUser {
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    /// `None` when the metadata carries no recognizable role.
    pub role: Option<Role>,
}

impl TryFrom<UserPayload> for MirroredUser {
    type Error = ApiError;

    fn try_from(p: UserPayload) -> Result<Self, Self::Error> {
        let primary = p
            .primary_email_address_id
            .as_deref()
            .and_then(|id| p.email_addresses.iter().find(|e| e.id == id))
            .or_else(|| p.email_addresses.first())
            .ok_or_else(|| ApiError::BadRequest("INVALID_PAYLOAD", "user has no e-mail address".into()))?;
        let email = primary.email_address.trim().to_lowercase();

        let name = [p.first_name.as_deref(), p.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let name = if name.is_empty() {
            email.split('@').next().unwrap_or_default().to_string()
        } else {
            name
        };

        Ok(MirroredUser {
            external_id: p.id,
            name,
            email,
            image: p.image_url.filter(|s| !s.is_empty()),
            role: p.public_metadata.role.as_deref().and_then(Role::from_metadata),
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::BadRequest("INVALID_SIGNATURE", format!("missing {name} header"))
        })
}

pub fn verify_request(secret: &str, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), ApiError> {
    let msg_id = header(headers, "svix-id")?;
    let timestamp = header(headers, "svix-timestamp")?;
    let signatures = header(headers, "svix-signature")?;

    verify_webhook_signature(secret, msg_id, timestamp, signatures, body, now).map_err(|e| {
        tracing::warn!(msg_id = %msg_id, error = %e, "rejected identity webhook");
        ApiError::BadRequest("INVALID_SIGNATURE", e.to_string())
    })
}

pub async fn upsert_mirrored_user(state: &AppState, user: &MirroredUser) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO app_user (name, email, image, external_identity_id, role)
        VALUES ($1, $2, $3, $4, COALESCE($5, 'customer'::user_role))
        ON CONFLICT (external_identity_id) DO UPDATE
        SET name = EXCLUDED.name,
            email = EXCLUDED.email,
            image = EXCLUDED.image,
            role = COALESCE($5, app_user.role),
            updated_at = now()
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.image)
    .bind(&user.external_id)
    .bind(user.role)
    .execute(&state.db)
    .await
    .map_err(db_error)?;
    Ok(())
}

/// Applies one verified event. Unknown event types are acknowledged.
pub async fn apply_event(state: &AppState, event: WebhookEvent) -> Result<(), ApiError> {
    let invalid = |e: serde_json::Error| ApiError::BadRequest("INVALID_PAYLOAD", e.to_string());

    match event.kind.as_str() {
        "user.created" | "user.updated" => {
            let payload: UserPayload = serde_json::from_value(event.data).map_err(invalid)?;
            let user = MirroredUser::try_from(payload)?;
            upsert_mirrored_user(state, &user).await?;
            tracing::info!(external_id = %user.external_id, kind = %event.kind, "user mirrored");
        }
        "user.deleted" => {
            let payload: DeletedPayload = serde_json::from_value(event.data).map_err(invalid)?;
            let Some(external_id) = payload.id else {
                return Err(ApiError::BadRequest("INVALID_PAYLOAD", "deleted user has no id".into()));
            };
            let res = sqlx::query(r#"DELETE FROM app_user WHERE external_identity_id = $1"#)
                .bind(&external_id)
                .execute(&state.db)
                .await
                .map_err(db_error)?;
            tracing::info!(external_id = %external_id, removed = res.rows_affected(), "user deleted");
        }
        other => {
            tracing::debug!(kind = %other, "ignoring identity webhook event");
            return Ok(());
        }
    }

    state
        .revisions
        .bump(&[Listing::Customers, Listing::Doctors, Listing::Pets, Listing::Dashboard]);
    Ok(())
}

pub async fn identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OkResponse>, ApiError> {
    verify_request(&state.webhook_secret, &headers, &body, chrono::Utc::now().timestamp())?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest("INVALID_PAYLOAD", e.to_string()))?;
    apply_event(&state, event).await?;
    Ok(Json(OkResponse::ok()))
}
