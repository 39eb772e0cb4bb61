use axum::{
    extract::{OriginalUri, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::middleware::auth_context::CallerContext;
use crate::models::Role;

pub const DEFAULT_PAGE: &str = "/api/v1/dashboard";

const DOCTOR_PREFIXES: &[&str] = &[
    "/api/v1/dashboard",
    "/api/v1/customers",
    "/api/v1/doctors",
    "/api/v1/pets",
    "/api/v1/species",
    "/api/v1/breeds",
    "/api/v1/services",
    "/api/v1/appointments",
    "/api/v1/prescriptions",
    "/api/v1/media",
    "/api/v1/postal-codes",
];

const CUSTOMER_PREFIXES: &[&str] = &[
    "/api/v1/dashboard",
    "/api/v1/pets",
    "/api/v1/appointments",
];

/// `None` means every path.
pub fn allowed_prefixes(role: Role) -> Option<&'static [&'static str]> {
    match role {
        Role::Admin => None,
        Role::Doctor => Some(DOCTOR_PREFIXES),
        Role::Customer => Some(CUSTOMER_PREFIXES),
    }
}

/// Prefix match on whole path segments, so `/api/v1/pets` does not admit
/// `/api/v1/petshop`.
pub fn is_path_allowed(role: Role, path: &str) -> bool {
    let Some(prefixes) = allowed_prefixes(role) else {
        return true;
    };
    prefixes.iter().any(|p| {
        path.strip_prefix(p)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

pub async fn route_gate(
    caller: CallerContext,
    req: Request,
    next: Next,
) -> Response {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    if !is_path_allowed(caller.role, &path) {
        tracing::info!(role = caller.role.as_str(), path = %path, "route not allowed for role");
        return Redirect::temporary(DEFAULT_PAGE).into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_reaches_everything() {
        assert!(is_path_allowed(Role::Admin, "/api/v1/species"));
        assert!(is_path_allowed(Role::Admin, "/api/v1/anything/else"));
    }

    #[test]
    fn test_customer_prefixes() {
        assert!(is_path_allowed(Role::Customer, "/api/v1/dashboard"));
        assert!(is_path_allowed(Role::Customer, "/api/v1/pets"));
        assert!(is_path_allowed(Role::Customer, "/api/v1/pets/8d5c"));
        assert!(is_path_allowed(Role::Customer, "/api/v1/appointments/1/status"));
        assert!(!is_path_allowed(Role::Customer, "/api/v1/customers"));
        assert!(!is_path_allowed(Role::Customer, "/api/v1/species"));
        assert!(!is_path_allowed(Role::Customer, "/api/v1/petshop"));
    }

    #[test]
    fn test_doctor_prefixes() {
        assert!(is_path_allowed(Role::Doctor, "/api/v1/customers"));
        assert!(is_path_allowed(Role::Doctor, "/api/v1/prescriptions/x"));
        assert!(is_path_allowed(Role::Doctor, "/api/v1/breeds"));
        assert!(!is_path_allowed(Role::Doctor, "/api/v1/admin"));
    }

    #[test]
    fn test_default_page_is_reachable_by_every_role() {
        for role in [Role::Admin, Role::Doctor, Role::Customer] {
            assert!(is_path_allowed(role, DEFAULT_PAGE));
        }
    }
}
