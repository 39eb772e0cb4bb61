// src/routes/prescription_routes.rs

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    accounts::{user_columns, user_from_row},
    error::{ApiError, FieldError, db_error},
    listing::{fetch_one, fetch_page, ListQuery, ListQueryParams, Page, PageRequest, Scope},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, OkResponse},
    revalidate::Listing,
    routes::doctor_routes::DoctorBrief,
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prescriptions", get(list_prescriptions).post(upsert_prescription))
        .route("/prescriptions/{template_id}", delete(delete_prescription))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrescriptionTemplateWithDoctor {
    pub id: Uuid,
    pub title: String,
    /// Rich text as produced by the editor.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub doctor: DoctorBrief,
}

const PRESCRIPTION_LIST: ListQuery = ListQuery {
    columns: concat!(
        "pt.id, pt.title, pt.content, pt.created_at, pt.updated_at, ",
        "d.id AS doctor_id, d.license_number AS doctor_license_number, ",
        "d.license_state AS doctor_license_state, ",
        user_columns!("u", "doctor_user")
    ),
    from: r#"
        prescription_template pt
        JOIN doctor d ON d.id = pt.doctor_id
        JOIN app_user u ON u.id = d.user_id
    "#,
    root_key: "pt.id",
    search_columns: &["pt.title", "u.name"],
    order_by: "pt.title ASC, pt.id ASC",
    fans_out: false,
};

fn map_prescription(r: &PgRow) -> Result<PrescriptionTemplateWithDoctor, sqlx::Error> {
    Ok(PrescriptionTemplateWithDoctor {
        id: r.try_get("id")?,
        title: r.try_get("title")?,
        content: r.try_get("content")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        doctor: DoctorBrief {
            id: r.try_get("doctor_id")?,
            license_number: r.try_get("doctor_license_number")?,
            license_state: r.try_get("doctor_license_state")?,
            user: user_from_row(r, "doctor_user")?,
        },
    })
}

/// Doctor whose templates the caller is limited to; `None` for admins.
async fn own_doctor(state: &AppState, caller: &CallerContext) -> Result<Option<Uuid>, ApiError> {
    caller.ensure_staff()?;
    if caller.is_doctor() {
        Ok(Some(caller.doctor_id(&state.db).await?))
    } else {
        Ok(None)
    }
}

pub async fn fetch_prescriptions(
    state: &AppState,
    caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<PrescriptionTemplateWithDoctor>, ApiError> {
    let scope = own_doctor(state, caller)
        .await?
        .map(|doctor_id| Scope { column: "pt.doctor_id", value: doctor_id });
    fetch_page(&state.db, &PRESCRIPTION_LIST, req, scope, map_prescription).await
}

pub async fn list_prescriptions(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_prescriptions(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Prescriptions), Json(page)))
}

/* ============================================================
   Upsert / delete
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct PrescriptionInput {
    pub id: Option<Uuid>,
    pub title: String,
    pub content: String,
    /// Ignored for doctor callers.
    pub doctor_id: Option<Uuid>,
}

fn validate_prescription(input: &PrescriptionInput) -> Result<(String, String), ApiError> {
    let mut v = FieldErrors::new();
    let title = v.required("title", &input.title);
    v.max_len("title", &title, 120);
    let content = v.required("content", &input.content);
    v.max_len("content", &content, 20_000);
    v.finish()?;
    Ok((title, content))
}

pub async fn write_prescription(
    state: &AppState,
    caller: &CallerContext,
    input: PrescriptionInput,
) -> Result<PrescriptionTemplateWithDoctor, ApiError> {
    let own = own_doctor(state, caller).await?;
    let (title, content) = validate_prescription(&input)?;

    let doctor_id = match (own, input.doctor_id) {
        (Some(own), _) => own,
        (None, Some(requested)) => {
            let found: Option<Uuid> = sqlx::query_scalar(r#"SELECT id FROM doctor WHERE id = $1"#)
                .bind(requested)
                .fetch_optional(&state.db)
                .await
                .map_err(db_error)?;
            found.ok_or_else(|| ApiError::not_found("doctor"))?
        }
        (None, None) => {
            return Err(ApiError::Validation(vec![FieldError {
                field: "doctor_id",
                message: "doctor_id is required".into(),
            }]));
        }
    };

    let template_id: Uuid = match input.id {
        Some(id) => sqlx::query_scalar(
            r#"
            UPDATE prescription_template
            SET title = $2, content = $3, doctor_id = $4, updated_at = now()
            WHERE id = $1
              AND ($5::uuid IS NULL OR doctor_id = $5)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&title)
        .bind(&content)
        .bind(doctor_id)
        .bind(own)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("prescription template"))?,
        None => sqlx::query_scalar(
            r#"
            INSERT INTO prescription_template (title, content, doctor_id)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&title)
        .bind(&content)
        .bind(doctor_id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?,
    };

    tracing::info!(template_id = %template_id, doctor_id = %doctor_id, "prescription template saved");
    state.revisions.bump(&[Listing::Prescriptions]);

    let scope = own.map(|d| Scope { column: "pt.doctor_id", value: d });
    fetch_one(&state.db, &PRESCRIPTION_LIST, template_id, scope, map_prescription)
        .await?
        .ok_or_else(|| ApiError::not_found("prescription template"))
}

pub async fn upsert_prescription(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<PrescriptionInput>,
) -> Result<Json<ApiOk<PrescriptionTemplateWithDoctor>>, ApiError> {
    let data = write_prescription(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn remove_prescription(
    state: &AppState,
    caller: &CallerContext,
    template_id: Uuid,
) -> Result<(), ApiError> {
    let own = own_doctor(state, caller).await?;

    let res = sqlx::query(
        r#"
        DELETE FROM prescription_template
        WHERE id = $1
          AND ($2::uuid IS NULL OR doctor_id = $2)
        "#,
    )
    .bind(template_id)
    .bind(own)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("prescription template"));
    }

    tracing::info!(template_id = %template_id, "prescription template deleted");
    state.revisions.bump(&[Listing::Prescriptions]);
    Ok(())
}

pub async fn delete_prescription(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(template_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    remove_prescription(&state, &caller, template_id).await?;
    Ok(Json(OkResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::routes::test_support::{caller, caller_for, seed_doctor, test_state};

    fn input(title: &str, doctor_id: Option<Uuid>) -> PrescriptionInput {
        PrescriptionInput {
            id: None,
            title: title.into(),
            content: "<p>Dipirona 500mg, 1 comprimido a cada 8 horas.</p>".into(),
            doctor_id,
        }
    }

    async fn doctor_user(state: &AppState, doctor_id: Uuid) -> Uuid {
        sqlx::query_scalar("SELECT user_id FROM doctor WHERE id = $1")
            .bind(doctor_id)
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    #[test]
    fn test_title_and_content_required() {
        let blank = PrescriptionInput {
            id: None,
            title: "".into(),
            content: "  ".into(),
            doctor_id: None,
        };
        match validate_prescription(&blank) {
            Err(ApiError::Validation(fields)) => assert_eq!(fields.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_customers_have_no_templates() {
        let state = crate::routes::test_support::lazy_state();
        let res = fetch_prescriptions(&state, &caller(Role::Customer), &PageRequest::new(1, 10, None).unwrap()).await;
        assert!(matches!(res, Err(ApiError::Forbidden(..))));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_doctors_are_scoped_to_their_templates(pool: sqlx::PgPool) {
        let state = test_state(pool);
        let carla = seed_doctor(&state, "Carla", "52998224725").await;
        let davi = seed_doctor(&state, "Davi", "11144477735").await;
        let carla_caller = caller_for(doctor_user(&state, carla).await, Role::Doctor);

        // doctor_id in the form is ignored for doctors
        let own = write_prescription(&state, &carla_caller, input("Analgésico", Some(davi)))
            .await
            .unwrap();
        assert_eq!(own.doctor.id, carla);

        let admin = caller(Role::Admin);
        let other = write_prescription(&state, &admin, input("Antibiótico", Some(davi)))
            .await
            .unwrap();

        let mine = fetch_prescriptions(&state, &carla_caller, &PageRequest::new(1, 10, None).unwrap())
            .await
            .unwrap();
        assert_eq!(mine.metadata.total_count, 1);
        let all = fetch_prescriptions(&state, &admin, &PageRequest::new(1, 10, None).unwrap())
            .await
            .unwrap();
        assert_eq!(all.metadata.total_count, 2);

        assert!(matches!(
            remove_prescription(&state, &carla_caller, other.id).await,
            Err(ApiError::NotFound(..))
        ));
        remove_prescription(&state, &admin, other.id).await.unwrap();
    }
}
