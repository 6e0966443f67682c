pub mod auth;
pub mod polls;
