use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::SessionVerifier;
use crate::integrations::{identity::IdentityProvider, media::MediaHost, postal::PostalLookup};
use crate::revalidate::ListingRevisions;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub sessions: Arc<SessionVerifier>,
    pub identity: Arc<dyn IdentityProvider>,
    pub media: Arc<dyn MediaHost>,
    pub postal: Arc<dyn PostalLookup>,
    pub webhook_secret: Arc<str>,
    pub revisions: Arc<ListingRevisions>,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        OkResponse {
            data: OkData { ok: true },
        }
    }
}

/* -------------------------
   Enums stored as Postgres enum types
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[serde(alias = "veterinarian")]
    Doctor,
    #[serde(alias = "client")]
    Customer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Doctor => "doctor",
            Role::Customer => "customer",
        }
    }

    /// Accepts the labels the identity provider metadata may carry.
    pub fn from_metadata(value: &str) -> Option<Role> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "doctor" | "veterinarian" => Some(Role::Doctor),
            "customer" | "client" => Some(Role::Customer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pet_gender", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PetGender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pet_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PetStatus {
    Active,
    Inactive,
    Deceased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "appointment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// pending -> confirmed -> in_progress -> completed, with cancelled and
    /// no_show reachable from pending or confirmed. Terminal states have no exits.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress, Completed)
                | (Pending | Confirmed, Cancelled)
                | (Pending | Confirmed, NoShow)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}
