// src/routes/customer_routes.rs

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    accounts::{
        compensate, ensure_identity, resolve_external_id, upsert_base_user, user_columns,
        user_from_row, BaseUser, Specialization, User,
    },
    error::{ApiError, db_error},
    listing::{fetch_one, fetch_page, ListQuery, ListQueryParams, Page, PageRequest},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, Role},
    revalidate::Listing,
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/customers", get(list_customers).post(upsert_customer))
        .route("/customers/{customer_id}", get(get_customer))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerWithRelations {
    pub id: Uuid,
    pub phone: String,
    pub cpf: String,
    pub email: String,
    pub postal_code: String,
    pub address: String,
    pub address_number: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub pet_count: i64,
    pub user: User,
}

// The pet join only widens the search; DISTINCT folds the fan-out back to
// one row per customer.
const CUSTOMER_LIST: ListQuery = ListQuery {
    columns: concat!(
        "c.id, c.phone, c.cpf, c.email, c.postal_code, c.address, c.address_number, ",
        "c.neighborhood, c.city, c.state, ",
        "(SELECT COUNT(*) FROM pet px WHERE px.customer_id = c.id) AS pet_count, ",
        user_columns!("u", "user")
    ),
    from: "customer c JOIN app_user u ON u.id = c.user_id LEFT JOIN pet p ON p.customer_id = c.id",
    root_key: "c.id",
    search_columns: &["u.name", "u.email", "c.cpf", "c.phone", "c.city", "p.name"],
    order_by: "u.name ASC, c.id ASC",
    fans_out: true,
};

fn map_customer(r: &PgRow) -> Result<CustomerWithRelations, sqlx::Error> {
    Ok(CustomerWithRelations {
        id: r.try_get("id")?,
        phone: r.try_get("phone")?,
        cpf: r.try_get("cpf")?,
        email: r.try_get("email")?,
        postal_code: r.try_get("postal_code")?,
        address: r.try_get("address")?,
        address_number: r.try_get("address_number")?,
        neighborhood: r.try_get("neighborhood")?,
        city: r.try_get("city")?,
        state: r.try_get("state")?,
        pet_count: r.try_get("pet_count")?,
        user: user_from_row(r, "user")?,
    })
}

pub async fn fetch_customers(
    state: &AppState,
    caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<CustomerWithRelations>, ApiError> {
    caller.ensure_staff()?;
    fetch_page(&state.db, &CUSTOMER_LIST, req, None, map_customer).await
}

pub async fn list_customers(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_customers(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Customers), Json(page)))
}

pub async fn load_customer(
    state: &AppState,
    caller: &CallerContext,
    customer_id: Uuid,
) -> Result<CustomerWithRelations, ApiError> {
    caller.ensure_staff()?;
    fetch_one(&state.db, &CUSTOMER_LIST, customer_id, None, map_customer)
        .await?
        .ok_or_else(|| ApiError::not_found("customer"))
}

pub async fn get_customer(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<ApiOk<CustomerWithRelations>>, ApiError> {
    let data = load_customer(&state, &caller, customer_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Upsert
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerInput {
    pub id: Option<Uuid>,
    pub external_identity_id: Option<String>,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub phone: String,
    pub cpf: String,
    pub postal_code: String,
    pub address: String,
    pub address_number: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

/// Input after validation: trimmed, digits-only documents, defaults applied.
#[derive(Debug)]
struct ValidCustomer {
    user: BaseUser,
    phone: String,
    cpf: String,
    postal_code: String,
    address: String,
    address_number: String,
    neighborhood: String,
    city: String,
    state: String,
}

fn validate_customer(input: &CustomerInput) -> Result<ValidCustomer, ApiError> {
    let mut v = FieldErrors::new();
    let name = v.required("name", &input.name);
    v.max_len("name", &name, 120);
    let email = v.email("email", &input.email);
    let phone = v.phone("phone", &input.phone);
    let cpf = v.cpf("cpf", &input.cpf);
    let postal_code = v.postal_code("postal_code", &input.postal_code);
    let address = v.required("address", &input.address);
    let neighborhood = v.required("neighborhood", &input.neighborhood);
    let city = v.required("city", &input.city);
    let state = v.state_code("state", &input.state);
    v.finish()?;

    let address_number = input
        .address_number
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("S/N")
        .to_string();

    Ok(ValidCustomer {
        user: BaseUser {
            name,
            email,
            image: input.image.clone().filter(|s| !s.trim().is_empty()),
            role: Role::Customer,
        },
        phone,
        cpf,
        postal_code,
        address,
        address_number,
        neighborhood,
        city,
        state,
    })
}

async fn save_customer(
    state: &AppState,
    id: Option<Uuid>,
    external_id: &str,
    c: &ValidCustomer,
) -> Result<Uuid, ApiError> {
    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let user_id = upsert_base_user(&mut tx, external_id, &c.user).await?;

    let customer_id: Option<Uuid> = match id {
        Some(id) => {
            sqlx::query_scalar(
                r#"
                UPDATE customer
                SET user_id = $2, phone = $3, cpf = $4, email = $5, postal_code = $6,
                    address = $7, address_number = $8, neighborhood = $9, city = $10, state = $11
                WHERE id = $1
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(user_id)
            .bind(&c.phone)
            .bind(&c.cpf)
            .bind(&c.user.email)
            .bind(&c.postal_code)
            .bind(&c.address)
            .bind(&c.address_number)
            .bind(&c.neighborhood)
            .bind(&c.city)
            .bind(&c.state)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
        }
        None => {
            sqlx::query_scalar(
                r#"
                INSERT INTO customer (
                  user_id, phone, cpf, email, postal_code,
                  address, address_number, neighborhood, city, state
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
                ON CONFLICT (cpf) DO UPDATE
                SET user_id = EXCLUDED.user_id,
                    phone = EXCLUDED.phone,
                    email = EXCLUDED.email,
                    postal_code = EXCLUDED.postal_code,
                    address = EXCLUDED.address,
                    address_number = EXCLUDED.address_number,
                    neighborhood = EXCLUDED.neighborhood,
                    city = EXCLUDED.city,
                    state = EXCLUDED.state
                RETURNING id
                "#,
            )
            .bind(user_id)
            .bind(&c.phone)
            .bind(&c.cpf)
            .bind(&c.user.email)
            .bind(&c.postal_code)
            .bind(&c.address)
            .bind(&c.address_number)
            .bind(&c.neighborhood)
            .bind(&c.city)
            .bind(&c.state)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
        }
    };
    let customer_id = customer_id.ok_or_else(|| ApiError::not_found("customer"))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    Ok(customer_id)
}

pub async fn write_customer(
    state: &AppState,
    caller: &CallerContext,
    input: CustomerInput,
) -> Result<CustomerWithRelations, ApiError> {
    caller.ensure_staff()?;
    let valid = validate_customer(&input)?;

    let known = resolve_external_id(
        &state.db,
        Specialization::Customer,
        input.id,
        &valid.cpf,
        input.external_identity_id.clone(),
    )
    .await?;
    let provisioned = ensure_identity(state.identity.as_ref(), known, &valid.user).await?;

    let customer_id = match save_customer(state, input.id, &provisioned.external_id, &valid).await {
        Ok(id) => id,
        Err(e) => {
            compensate(state.identity.as_ref(), &provisioned).await;
            return Err(e);
        }
    };

    tracing::info!(customer_id = %customer_id, "customer saved");
    state
        .revisions
        .bump(&[Listing::Customers, Listing::Pets, Listing::Appointments, Listing::Dashboard]);
    load_customer(state, caller, customer_id).await
}

pub async fn upsert_customer(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<CustomerInput>,
) -> Result<Json<ApiOk<CustomerWithRelations>>, ApiError> {
    let data = write_customer(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::integrations::identity::fake::FakeIdentityProvider;
    use crate::routes::test_support::{caller, test_state, test_state_with_identity};

    pub(crate) fn customer_input(name: &str, cpf: &str, email: &str) -> CustomerInput {
        CustomerInput {
            id: None,
            external_identity_id: None,
            name: name.into(),
            email: email.into(),
            image: None,
            phone: "(11) 98765-4321".into(),
            cpf: cpf.into(),
            postal_code: "01310-100".into(),
            address: "Avenida Paulista".into(),
            address_number: None,
            neighborhood: "Bela Vista".into(),
            city: "São Paulo".into(),
            state: "sp".into(),
        }
    }

    #[test]
    fn test_validation_normalizes_fields() {
        let v = validate_customer(&customer_input("Ana", "529.982.247-25", "ana@example.com")).unwrap();
        assert_eq!(v.cpf, "52998224725");
        assert_eq!(v.phone, "11987654321");
        assert_eq!(v.postal_code, "01310100");
        assert_eq!(v.state, "SP");
        assert_eq!(v.address_number, "S/N");
    }

    #[test]
    fn test_validation_reports_every_field() {
        let mut input = customer_input(" ", "111.111.111-11", "not-an-email");
        input.postal_code = "123".into();
        match validate_customer(&input) {
            Err(ApiError::Validation(fields)) => {
                let names: Vec<_> = fields.iter().map(|f| f.field).collect();
                for f in ["name", "email", "cpf", "postal_code"] {
                    assert!(names.contains(&f), "missing {f} in {names:?}");
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_upsert_is_idempotent_on_cpf(pool: sqlx::PgPool) {
        let identity = Arc::new(FakeIdentityProvider::default());
        let state = test_state_with_identity(pool, identity.clone());
        let admin = caller(Role::Admin);

        let first = write_customer(&state, &admin, customer_input("Ana", "52998224725", "ana@example.com"))
            .await
            .unwrap();
        let mut again = customer_input("Ana Paula", "529.982.247-25", "ana@example.com");
        again.city = "Campinas".into();
        let second = write_customer(&state, &admin, again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.city, "Campinas");
        assert_eq!(second.user.name, "Ana Paula");

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customer")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(identity.created.lock().unwrap().len(), 1, "identity provisioned once");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_cpf_stays_with_its_linked_identity(pool: sqlx::PgPool) {
        let state = test_state(pool);
        let admin = caller(Role::Admin);

        let mut first = customer_input("Ana", "52998224725", "ana@example.com");
        first.external_identity_id = Some("user_ana".into());
        let ana = write_customer(&state, &admin, first).await.unwrap();

        let mut other = customer_input("Ana", "52998224725", "ana@example.com");
        other.external_identity_id = Some("user_someone_else".into());
        let res = write_customer(&state, &admin, other).await;
        assert!(matches!(res, Err(ApiError::Conflict("IDENTITY_MISMATCH", _))), "{res:?}");

        let linked: String = sqlx::query_scalar(
            "SELECT u.external_identity_id FROM customer c JOIN app_user u ON u.id = c.user_id WHERE c.id = $1",
        )
        .bind(ana.id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(linked, "user_ana");
        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_user")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(users, 1);

        // the same identity may still update the record
        let mut again = customer_input("Ana Paula", "52998224725", "ana@example.com");
        again.external_identity_id = Some("user_ana".into());
        let updated = write_customer(&state, &admin, again).await.unwrap();
        assert_eq!(updated.id, ana.id);
        assert_eq!(updated.user.name, "Ana Paula");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_failed_local_write_rolls_back_identity(pool: sqlx::PgPool) {
        let identity = Arc::new(FakeIdentityProvider::default());
        let state = test_state_with_identity(pool, identity.clone());
        let admin = caller(Role::Admin);

        write_customer(&state, &admin, customer_input("Ana", "52998224725", "ana@example.com"))
            .await
            .unwrap();
        // new cpf, same customer e-mail: provisioning succeeds, the insert does not
        let res = write_customer(&state, &admin, customer_input("Bia", "11144477735", "ana@example.com")).await;
        assert!(matches!(res, Err(ApiError::Conflict(..))), "{res:?}");

        let deleted = identity.deleted.lock().unwrap().clone();
        assert_eq!(deleted, vec!["user_fake_2".to_string()]);
        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_user")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(users, 1, "no orphan base user");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_customer_with_two_pets_counts_once(pool: sqlx::PgPool) {
        let state = test_state(pool);
        let admin = caller(Role::Admin);
        let ana = write_customer(&state, &admin, customer_input("Ana", "52998224725", "ana@example.com"))
            .await
            .unwrap();
        crate::routes::test_support::seed_pet(&state, ana.id, "Thor").await;
        crate::routes::test_support::seed_pet(&state, ana.id, "Toby").await;

        let page = fetch_customers(&state, &admin, &PageRequest::new(1, 10, None).unwrap())
            .await
            .unwrap();
        assert_eq!(page.metadata.total_count, 1);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].pet_count, 2);

        // both pets match the search; still one customer
        let page = fetch_customers(&state, &admin, &PageRequest::new(1, 10, Some("t")).unwrap())
            .await
            .unwrap();
        assert_eq!(page.metadata.total_count, 1);
        assert_eq!(page.data.len(), 1);
    }

    #[tokio::test]
    async fn test_customers_cannot_list_customers() {
        let state = crate::routes::test_support::lazy_state();
        let res = fetch_customers(&state, &caller(Role::Customer), &PageRequest::new(1, 10, None).unwrap()).await;
        assert!(matches!(res, Err(ApiError::Forbidden(..))));
    }
}
