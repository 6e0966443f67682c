pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod polls;
pub mod rest;
pub mod users;

use jsonwebtoken::{DecodingKey, EncodingKey};
use sqlx::SqlitePool;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
    pub token_ttl_hours: i64,
}

impl AppState {
    pub fn new(db: SqlitePool, config: &Config) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            db,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_ttl_hours: config.token_ttl_hours,
        }
    }
}
