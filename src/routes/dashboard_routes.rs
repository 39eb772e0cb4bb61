// src/routes/dashboard_routes.rs

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    error::{ApiError, db_error, internal_row},
    listing::Scope,
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState},
    revalidate::Listing,
    routes::appointment_routes::{
        appointment_scope, map_appointment, AppointmentWithRelations, APPOINTMENT_LIST,
    },
};

const UPCOMING_LIMIT: i64 = 5;

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClinicCounts {
    pub customers: i64,
    pub pets: i64,
    pub doctors: i64,
    pub pending_appointments: i64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Dashboard {
    Clinic {
        counts: ClinicCounts,
        upcoming: Vec<AppointmentWithRelations>,
    },
    Customer {
        pet_count: i64,
        upcoming: Vec<AppointmentWithRelations>,
    },
}

fn upcoming_query(scope: Option<Scope>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(APPOINTMENT_LIST.columns);
    qb.push(" FROM ");
    qb.push(APPOINTMENT_LIST.from);
    qb.push(" WHERE a.scheduled_at >= now() AND a.status IN ('pending', 'confirmed')");
    if let Some(scope) = scope {
        qb.push(" AND ");
        qb.push(scope.column);
        qb.push(" = ");
        qb.push_bind(scope.value);
    }
    qb.push(" ORDER BY ");
    qb.push(APPOINTMENT_LIST.order_by);
    qb.push(" LIMIT ");
    qb.push_bind(UPCOMING_LIMIT);
    qb
}

async fn upcoming(
    state: &AppState,
    scope: Option<Scope>,
    today: NaiveDate,
) -> Result<Vec<AppointmentWithRelations>, ApiError> {
    let rows = upcoming_query(scope)
        .build()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;
    rows.iter()
        .map(|r| map_appointment(r, today))
        .collect::<Result<Vec<_>, _>>()
        .map_err(internal_row)
}

async fn clinic_counts(state: &AppState) -> Result<ClinicCounts, ApiError> {
    let count = |sql: &'static str| sqlx::query_scalar::<_, i64>(sql).fetch_one(&state.db);
    let (customers, pets, doctors, pending_appointments) = tokio::try_join!(
        count("SELECT COUNT(*) FROM customer"),
        count("SELECT COUNT(*) FROM pet"),
        count("SELECT COUNT(*) FROM doctor"),
        count("SELECT COUNT(*) FROM appointment WHERE status = 'pending'"),
    )
    .map_err(db_error)?;

    Ok(ClinicCounts { customers, pets, doctors, pending_appointments })
}

pub async fn build_dashboard(state: &AppState, caller: &CallerContext) -> Result<Dashboard, ApiError> {
    let today = Utc::now().date_naive();
    let scope = appointment_scope(state, caller).await?;

    match scope {
        Some(scope) => {
            let (pet_count, upcoming) = tokio::try_join!(
                async {
                    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pet WHERE customer_id = $1")
                        .bind(scope.value)
                        .fetch_one(&state.db)
                        .await
                        .map_err(db_error)
                },
                upcoming(state, Some(scope), today),
            )?;
            Ok(Dashboard::Customer { pet_count, upcoming })
        }
        None => {
            let (counts, upcoming) =
                tokio::try_join!(clinic_counts(state), upcoming(state, None, today))?;
            Ok(Dashboard::Clinic { counts, upcoming })
        }
    }
}

pub async fn dashboard(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<impl IntoResponse, ApiError> {
    let data = build_dashboard(&state, &caller).await?;
    Ok((state.revisions.header(Listing::Dashboard), Json(ApiOk { data })))
}
