use axum::{middleware::from_fn_with_state, Router};

use crate::middleware::route_gate::route_gate;
use crate::models::AppState;

pub mod appointment_routes;
pub mod breed_routes;
pub mod customer_routes;
pub mod dashboard_routes;
pub mod doctor_routes;
pub mod media_routes;
pub mod pet_routes;
pub mod postal_routes;
pub mod prescription_routes;
pub mod service_routes;
pub mod species_routes;
pub mod webhook_routes;

pub fn router(state: AppState) -> Router {
    // Everything a signed-in user reaches goes through the role gate.
    let gated = Router::new()
        .merge(dashboard_routes::router())
        .merge(species_routes::router())
        .merge(breed_routes::router())
        .merge(service_routes::router())
        .merge(customer_routes::router())
        .merge(doctor_routes::router())
        .merge(pet_routes::router())
        .merge(appointment_routes::router())
        .merge(prescription_routes::router())
        .merge(media_routes::router())
        .merge(postal_routes::router())
        .route_layer(from_fn_with_state(state.clone(), route_gate));

    Router::new()
        .nest("/api/v1", gated)
        .nest("/api/v1", webhook_routes::router())
        .with_state(state)
}

#[cfg(test)]
pub mod test_support {
    use std::sync::Arc;

    use sqlx::{postgres::PgPoolOptions, PgPool};
    use uuid::Uuid;

    use crate::auth::test_tokens;
    use crate::integrations::{
        identity::fake::FakeIdentityProvider, media::fake::FakeMediaHost,
        postal::fake::FakePostalLookup,
    };
    use crate::middleware::auth_context::CallerContext;
    use crate::models::{AppState, Role};
    use crate::revalidate::ListingRevisions;

    pub const TEST_WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

    pub fn test_state_with_identity(pool: PgPool, identity: Arc<FakeIdentityProvider>) -> AppState {
        AppState {
            db: pool,
            sessions: Arc::new(test_tokens::verifier()),
            identity,
            media: Arc::new(FakeMediaHost::default()),
            postal: Arc::new(FakePostalLookup),
            webhook_secret: Arc::from(TEST_WEBHOOK_SECRET),
            revisions: Arc::new(ListingRevisions::new()),
        }
    }

    pub fn test_state(pool: PgPool) -> AppState {
        test_state_with_identity(pool, Arc::new(FakeIdentityProvider::default()))
    }

    /// State whose pool never connects; for paths that fail before any query.
    pub fn lazy_state() -> AppState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/vetcare_test")
            .unwrap();
        test_state(pool)
    }

    pub fn caller_for(user_id: Uuid, role: Role) -> CallerContext {
        CallerContext {
            user_id,
            external_id: format!("user_{}", user_id.simple()),
            role,
        }
    }

    pub fn caller(role: Role) -> CallerContext {
        caller_for(Uuid::new_v4(), role)
    }

    async fn seed_user(state: &AppState, name: &str, email: &str, role: Role) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO app_user (name, email, external_identity_id, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(format!("user_{}", Uuid::new_v4().simple()))
        .bind(role)
        .fetch_one(&state.db)
        .await
        .unwrap()
    }

    /// Returns `(user_id, customer_id)`.
    pub async fn seed_customer(state: &AppState, name: &str, cpf: &str, email: &str) -> (Uuid, Uuid) {
        let user_id = seed_user(state, name, email, Role::Customer).await;
        let customer_id = sqlx::query_scalar(
            r#"
            INSERT INTO customer (user_id, phone, cpf, email, postal_code, address, neighborhood, city, state)
            VALUES ($1, '11987654321', $2, $3, '01310100', 'Avenida Paulista', 'Bela Vista', 'São Paulo', 'SP')
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(cpf)
        .bind(email)
        .fetch_one(&state.db)
        .await
        .unwrap();
        (user_id, customer_id)
    }

    pub async fn seed_doctor(state: &AppState, name: &str, cpf: &str) -> Uuid {
        let user_id = seed_user(state, name, &format!("dr{cpf}@example.com"), Role::Doctor).await;
        sqlx::query_scalar(
            r#"
            INSERT INTO doctor (user_id, phone, cpf, license_number, license_state, specialty,
                                from_week_day, to_week_day, from_time, to_time)
            VALUES ($1, '11912345678', $2, 'CRMV-' || $2, 'SP', 'Clínica geral', 1, 5, '08:00', '18:00')
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(cpf)
        .fetch_one(&state.db)
        .await
        .unwrap()
    }

    pub async fn seed_breed(state: &AppState) -> Uuid {
        sqlx::query_scalar(
            r#"
            WITH s AS (
                INSERT INTO species (name) VALUES ('Canina')
                ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                RETURNING id
            )
            INSERT INTO breed (name, species_id)
            SELECT 'SRD', s.id FROM s
            ON CONFLICT (species_id, name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .fetch_one(&state.db)
        .await
        .unwrap()
    }

    pub async fn seed_pet(state: &AppState, customer_id: Uuid, name: &str) -> Uuid {
        let breed_id = seed_breed(state).await;
        sqlx::query_scalar(
            r#"
            INSERT INTO pet (name, birth_date, breed_id, customer_id, color, gender, weight)
            VALUES ($1, '2022-01-15', $2, $3, 'Caramelo', 'male', 12.5)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(breed_id)
        .bind(customer_id)
        .fetch_one(&state.db)
        .await
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use super::test_support::{lazy_state, seed_customer, test_state};
    use super::*;
    use crate::auth::test_tokens;

    fn bearer(sub: &str) -> String {
        let exp = chrono::Utc::now().timestamp() + 3600;
        format!("Bearer {}", test_tokens::token(sub, None, exp))
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let res = router(lazy_state())
            .oneshot(Request::get("/api/v1/pets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_customer_is_redirected_from_staff_pages(pool: sqlx::PgPool) {
        let state = test_state(pool);
        let (user_id, _) = seed_customer(&state, "Ana", "52998224725", "ana@example.com").await;
        let external_id: String =
            sqlx::query_scalar("SELECT external_identity_id FROM app_user WHERE id = $1")
                .bind(user_id)
                .fetch_one(&state.db)
                .await
                .unwrap();

        let app = router(state);
        let res = app
            .clone()
            .oneshot(
                Request::get("/api/v1/species")
                    .header("authorization", bearer(&external_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.headers()["location"], "/api/v1/dashboard");

        let res = app
            .oneshot(
                Request::get("/api/v1/pets")
                    .header("authorization", bearer(&external_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
