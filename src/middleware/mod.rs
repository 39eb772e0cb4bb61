pub mod auth_context;
pub mod route_gate;
