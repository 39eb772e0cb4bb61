// Base user rows and the identity accounts behind them.
//
// Doctors and customers are specializations of `app_user`. Writing one
// means: find or provision the external identity, upsert the base user by
// external id, then the specialization row, with the two local writes in
// one transaction. A freshly provisioned identity is deleted again when
// the local writes fail.

use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::auth::{derive_username, generate_throwaway_password};
use crate::error::{ApiError, db_error};
use crate::integrations::identity::{IdentityProvider, NewIdentity};
use crate::models::Role;

/// Column list for a joined `app_user`, prefixed so that several users can
/// share one row: `user_columns!("u", "user")` selects `u.id AS user_id`, ...
macro_rules! user_columns {
    ($alias:literal, $prefix:literal) => {
        concat!(
            $alias, ".id AS ", $prefix, "_id, ",
            $alias, ".name AS ", $prefix, "_name, ",
            $alias, ".email AS ", $prefix, "_email, ",
            $alias, ".image AS ", $prefix, "_image, ",
            $alias, ".external_identity_id AS ", $prefix, "_external_id, ",
            $alias, ".role AS ", $prefix, "_role"
        )
    };
}
pub(crate) use user_columns;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub external_identity_id: String,
    pub role: Role,
}

/// Reads the columns produced by `user_columns!` with the same prefix.
pub fn user_from_row(r: &PgRow, prefix: &str) -> Result<User, sqlx::Error> {
    Ok(User {
        id: r.try_get(format!("{prefix}_id").as_str())?,
        name: r.try_get(format!("{prefix}_name").as_str())?,
        email: r.try_get(format!("{prefix}_email").as_str())?,
        image: r.try_get(format!("{prefix}_image").as_str())?,
        external_identity_id: r.try_get(format!("{prefix}_external_id").as_str())?,
        role: r.try_get(format!("{prefix}_role").as_str())?,
    })
}

/// The base-user half of a doctor or customer form.
#[derive(Debug, Clone)]
pub struct BaseUser {
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub external_id: String,
    /// True when the identity was created by this request.
    pub created: bool,
}

/// Specialization tables that hang off `app_user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specialization {
    Doctor,
    Customer,
}

impl Specialization {
    fn table(self) -> &'static str {
        match self {
            Specialization::Doctor => "doctor",
            Specialization::Customer => "customer",
        }
    }
}

/// External id already linked to the record being written: by primary id
/// when the form carries one (missing id is `NotFound`), otherwise by cpf.
async fn existing_external_id(
    db: &PgPool,
    kind: Specialization,
    id: Option<Uuid>,
    cpf: &str,
) -> Result<Option<String>, ApiError> {
    let table = kind.table();
    match id {
        Some(id) => {
            let sql = format!(
                "SELECT u.external_identity_id FROM {table} s \
                 JOIN app_user u ON u.id = s.user_id WHERE s.id = $1"
            );
            let found: Option<String> = sqlx::query_scalar(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .map_err(db_error)?;
            found.map(Some).ok_or_else(|| ApiError::not_found(table))
        }
        None => {
            let sql = format!(
                "SELECT u.external_identity_id FROM {table} s \
                 JOIN app_user u ON u.id = s.user_id WHERE s.cpf = $1"
            );
            sqlx::query_scalar(&sql)
                .bind(cpf)
                .fetch_optional(db)
                .await
                .map_err(db_error)
        }
    }
}

/// Picks the identity a specialization write goes under. A supplied id must
/// match the one already linked to the record.
pub fn pick_external_id(
    supplied: Option<String>,
    linked: Option<String>,
) -> Result<Option<String>, ApiError> {
    match (supplied, linked) {
        (Some(supplied), Some(linked)) if supplied != linked => Err(ApiError::Conflict(
            "IDENTITY_MISMATCH",
            "This record is already linked to another account".into(),
        )),
        (supplied, linked) => Ok(supplied.or(linked)),
    }
}

pub async fn resolve_external_id(
    db: &PgPool,
    kind: Specialization,
    id: Option<Uuid>,
    cpf: &str,
    supplied: Option<String>,
) -> Result<Option<String>, ApiError> {
    let supplied = supplied
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let linked = existing_external_id(db, kind, id, cpf).await?;
    pick_external_id(supplied, linked)
}

/// Uses `known` when present, otherwise creates an account at the identity
/// provider with a derived username and a throw-away password.
pub async fn ensure_identity(
    identity: &dyn IdentityProvider,
    known: Option<String>,
    user: &BaseUser,
) -> Result<Provisioned, ApiError> {
    if let Some(external_id) = known {
        return Ok(Provisioned { external_id, created: false });
    }

    let req = NewIdentity {
        email: user.email.clone(),
        name: user.name.clone(),
        username: derive_username(&user.email),
        password: generate_throwaway_password(),
        role: user.role,
    };
    let external_id = identity.create_user(&req).await?;
    tracing::info!(external_id = %external_id, role = user.role.as_str(), "identity provisioned");
    Ok(Provisioned { external_id, created: true })
}

/// Best-effort removal of an identity created by a request whose local
/// writes failed.
pub async fn compensate(identity: &dyn IdentityProvider, provisioned: &Provisioned) {
    if !provisioned.created {
        return;
    }
    match identity.delete_user(&provisioned.external_id).await {
        Ok(()) => tracing::info!(external_id = %provisioned.external_id, "provisioned identity rolled back"),
        Err(e) => tracing::warn!(
            external_id = %provisioned.external_id,
            error = %e,
            "could not roll back provisioned identity"
        ),
    }
}

/// Upserts the base user keyed by external id and returns its local id.
/// An existing admin keeps the admin role.
pub async fn upsert_base_user(
    conn: &mut PgConnection,
    external_id: &str,
    user: &BaseUser,
) -> Result<Uuid, ApiError> {
    sqlx::query_scalar(
        r#"
        INSERT INTO app_user (name, email, image, external_identity_id, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (external_identity_id) DO UPDATE
        SET name = EXCLUDED.name,
            email = EXCLUDED.email,
            image = COALESCE(EXCLUDED.image, app_user.image),
            role = CASE WHEN app_user.role = 'admin' THEN app_user.role ELSE EXCLUDED.role END,
            updated_at = now()
        RETURNING id
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.image)
    .bind(external_id)
    .bind(user.role)
    .fetch_one(conn)
    .await
    .map_err(db_error)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::integrations::identity::fake::FakeIdentityProvider;

    fn ana() -> BaseUser {
        BaseUser {
            name: "Ana Souza".into(),
            email: "Ana.Souza@example.com".into(),
            image: None,
            role: Role::Customer,
        }
    }

    #[test]
    fn test_user_columns_prefixing() {
        assert_eq!(
            user_columns!("du", "doctor_user"),
            "du.id AS doctor_user_id, du.name AS doctor_user_name, du.email AS doctor_user_email, \
             du.image AS doctor_user_image, du.external_identity_id AS doctor_user_external_id, \
             du.role AS doctor_user_role"
        );
    }

    #[test]
    fn test_supplied_identity_must_match_linked() {
        assert_eq!(pick_external_id(None, None).unwrap(), None);
        assert_eq!(pick_external_id(Some("user_a".into()), None).unwrap().as_deref(), Some("user_a"));
        assert_eq!(pick_external_id(None, Some("user_a".into())).unwrap().as_deref(), Some("user_a"));
        assert_eq!(
            pick_external_id(Some("user_a".into()), Some("user_a".into())).unwrap().as_deref(),
            Some("user_a")
        );
        assert!(matches!(
            pick_external_id(Some("user_b".into()), Some("user_a".into())),
            Err(ApiError::Conflict("IDENTITY_MISMATCH", _))
        ));
    }

    #[tokio::test]
    async fn test_known_identity_is_not_provisioned() {
        let fake = Arc::new(FakeIdentityProvider::default());
        let p = ensure_identity(fake.as_ref(), Some("user_123".into()), &ana()).await.unwrap();
        assert_eq!(p, Provisioned { external_id: "user_123".into(), created: false });
        assert!(fake.created.lock().unwrap().is_empty());

        compensate(fake.as_ref(), &p).await;
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_derives_account_fields() {
        let fake = FakeIdentityProvider::default();
        let p = ensure_identity(&fake, None, &ana()).await.unwrap();
        assert!(p.created);

        let created = fake.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].username, "ana_souza");
        assert_eq!(created[0].password.len(), 43);
        assert_eq!(created[0].role, Role::Customer);
    }

    #[tokio::test]
    async fn test_compensation_deletes_created_identity() {
        let fake = FakeIdentityProvider::default();
        let p = ensure_identity(&fake, None, &ana()).await.unwrap();
        compensate(&fake, &p).await;
        assert_eq!(*fake.deleted.lock().unwrap(), vec![p.external_id]);
    }

    #[tokio::test]
    async fn test_provider_rejection_is_friendly() {
        let fake = FakeIdentityProvider {
            reject: vec![("Ana.Souza@example.com".into(), "form_identifier_exists".into())],
            ..Default::default()
        };
        match ensure_identity(&fake, None, &ana()).await {
            Err(ApiError::Provider(msg)) => assert_eq!(msg, "This e-mail address is already registered"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
