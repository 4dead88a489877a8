//! Server configuration
//!
//! Tunables come from the command line; secrets come from the environment
//! (`GAME_SECRET`, `ADMIN_API_KEY`). A missing signing secret is fatal in
//! production: tokens signed with a guessable default would defeat the whole
//! pipeline, so the server refuses to start instead. In development a random
//! per-process secret is generated, which keeps local runs working while
//! making issued tokens useless across restarts.

use crate::util::to_hex;
use log::warn;
use shared::{
    LEADERBOARD_CAPACITY, MAX_REACTION_TIME_MS, RATE_LIMIT_MAX, RATE_LIMIT_WINDOW_MS,
    TOKEN_EXPIRY_MS,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GAME_SECRET must be set outside development mode")]
    MissingSecret,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub secret: Vec<u8>,
    pub admin_key: Option<String>,
    pub dev_mode: bool,
    pub token_expiry_ms: u64,
    pub max_reaction_time_ms: u32,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: u32,
    pub leaderboard_capacity: usize,
    pub registry_path: PathBuf,
}

impl ServerConfig {
    /// Builds a config from the process environment plus defaults.
    pub fn from_env(dev_mode: bool) -> Result<Self, ConfigError> {
        let secret = resolve_secret(std::env::var("GAME_SECRET").ok(), dev_mode)?;
        let admin_key = std::env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty());

        Ok(Self {
            secret,
            admin_key,
            dev_mode,
            token_expiry_ms: TOKEN_EXPIRY_MS,
            max_reaction_time_ms: MAX_REACTION_TIME_MS,
            rate_limit_window_ms: RATE_LIMIT_WINDOW_MS,
            rate_limit_max: RATE_LIMIT_MAX,
            leaderboard_capacity: LEADERBOARD_CAPACITY,
            registry_path: PathBuf::from("data/users.csv"),
        })
    }

    /// Config for tests: fixed secret, dev mode, temp registry path.
    pub fn for_tests() -> Self {
        Self {
            secret: b"test-secret".to_vec(),
            admin_key: None,
            dev_mode: true,
            token_expiry_ms: TOKEN_EXPIRY_MS,
            max_reaction_time_ms: MAX_REACTION_TIME_MS,
            rate_limit_window_ms: RATE_LIMIT_WINDOW_MS,
            rate_limit_max: RATE_LIMIT_MAX,
            leaderboard_capacity: LEADERBOARD_CAPACITY,
            registry_path: std::env::temp_dir().join(format!(
                "grid-start-test-registry-{}.csv",
                std::process::id()
            )),
        }
    }
}

/// Picks the signing secret, failing loud when production has none.
fn resolve_secret(configured: Option<String>, dev_mode: bool) -> Result<Vec<u8>, ConfigError> {
    match configured.filter(|s| !s.is_empty()) {
        Some(secret) => Ok(secret.into_bytes()),
        None if dev_mode => {
            let generated: [u8; 32] = rand::random();
            warn!("GAME_SECRET not set; using a random per-process secret (dev mode only)");
            Ok(to_hex(&generated).into_bytes())
        }
        None => Err(ConfigError::MissingSecret),
    }
}
