//! Score submission orchestrator
//!
//! Sequences the validations for one submission and produces exactly one
//! user-facing outcome: rate limit, token presence, token validation,
//! business-field validation, then the leaderboard merge. Every stage
//! short-circuits with its own rejection category; storage faults are caught
//! here once and collapsed into a generic failure so a client is never told
//! a position was recorded when the atomic write did not confirm.

use crate::auth::AdminGate;
use crate::config::ServerConfig;
use crate::leaderboard::{Leaderboard, SubmitOutcome};
use crate::rate_limit::{RateDecision, RateLimiter, resolve_client_id};
use crate::registry::Registry;
use crate::store::KvStore;
use crate::token::{IssuedToken, TokenService};
use log::{error, info, warn};
use shared::{AdminEntry, LeaderboardEntry, RejectionCategory, mask_phone};
use std::net::SocketAddr;
use std::sync::Arc;

/// A score submission as received from the boundary, before validation.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: String,
    pub phone: String,
    pub reaction_time_ms: u32,
    pub car_number: u32,
    pub game_token: String,
}

/// Request origin used for rate limiting.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    /// Forwarded-for value injected by a fronting proxy, if any.
    pub forwarded_for: Option<String>,
    pub peer: Option<SocketAddr>,
}

impl ClientInfo {
    pub fn from_peer(peer: SocketAddr) -> Self {
        Self {
            forwarded_for: None,
            peer: Some(peer),
        }
    }
}

/// Terminal rejection of one submission attempt.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub category: RejectionCategory,
    pub message: String,
    pub retry_after_ms: Option<u64>,
}

impl Rejection {
    fn new(category: RejectionCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    fn rate_limited(retry_after_ms: u64) -> Self {
        Self {
            category: RejectionCategory::RateLimited,
            message: "Too many submissions. Please wait before trying again.".to_string(),
            retry_after_ms: Some(retry_after_ms),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(RejectionCategory::Validation, message)
    }

    fn storage() -> Self {
        Self::new(RejectionCategory::Storage, "Failed to process submission")
    }

    fn unauthorized() -> Self {
        Self::new(RejectionCategory::Unauthorized, "Unauthorized")
    }
}

/// Wires the pipeline components together and owns request sequencing.
pub struct SubmissionPipeline {
    tokens: TokenService,
    limiter: RateLimiter,
    leaderboard: Leaderboard,
    registry: Registry,
    admin: AdminGate,
}

impl SubmissionPipeline {
    pub fn new(config: &ServerConfig, store: Arc<dyn KvStore>) -> Self {
        Self {
            tokens: TokenService::new(
                config.secret.clone(),
                config.token_expiry_ms,
                config.max_reaction_time_ms,
                Arc::clone(&store),
            ),
            limiter: RateLimiter::new(
                Arc::clone(&store),
                config.rate_limit_window_ms,
                config.rate_limit_max,
            ),
            leaderboard: Leaderboard::new(
                Arc::clone(&store),
                config.leaderboard_capacity,
                config.max_reaction_time_ms,
            ),
            registry: Registry::new(config.registry_path.clone()),
            admin: AdminGate::new(config.admin_key.clone(), config.dev_mode),
        }
    }

    /// Starts a game session and returns the signed token for it.
    pub fn start_session(&self) -> IssuedToken {
        let issued = self.tokens.start_session();
        info!("session {} started", issued.session_id);
        issued
    }

    /// Runs the full validation sequence for one submission.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        client: ClientInfo,
    ) -> Result<SubmitOutcome, Rejection> {
        // 1. Rate limit per client identifier.
        let client_id = resolve_client_id(client.forwarded_for.as_deref(), client.peer);
        match self.limiter.check_and_consume(&client_id).await {
            Ok(RateDecision::Allowed) => {}
            Ok(RateDecision::Denied { retry_after_ms }) => {
                warn!("rate limited {}", client_id);
                return Err(Rejection::rate_limited(retry_after_ms));
            }
            Err(e) => {
                error!("rate limiter store failure: {}", e);
                return Err(Rejection::storage());
            }
        }

        // 2. Token presence, before handing anything to the token service.
        if request.game_token.trim().is_empty() {
            return Err(Rejection::validation("Game token is required"));
        }

        // 3. Token validation; the specific reason goes back verbatim.
        let validation = self
            .tokens
            .validate(&request.game_token, request.reaction_time_ms as i64)
            .await
            .map_err(|e| {
                error!("token store failure: {}", e);
                Rejection::storage()
            })?;
        if let Err(rejection) = validation {
            info!("token rejected for {}: {:?}", client_id, rejection);
            return Err(Rejection::new(
                RejectionCategory::TokenInvalid,
                rejection.message(),
            ));
        }

        // 4. Business-level field validation, one pass.
        validate_fields(&request)?;

        // 5. Leaderboard merge.
        let outcome = self
            .leaderboard
            .submit(
                request.name.trim(),
                request.phone.trim(),
                request.reaction_time_ms,
                request.car_number,
            )
            .await
            .map_err(|e| {
                error!("leaderboard store failure: {}", e);
                Rejection::storage()
            })?;

        info!(
            "score {}ms from {} -> position {:?}",
            request.reaction_time_ms,
            request.name.trim(),
            outcome.position
        );
        Ok(outcome)
    }

    /// Current public leaderboard.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, Rejection> {
        self.leaderboard.top().await.map_err(|e| {
            error!("leaderboard read failure: {}", e);
            Rejection::storage()
        })
    }

    /// Records a registrant in the append-only log.
    pub async fn register(
        &self,
        name: &str,
        phone: &str,
        car_number: u32,
    ) -> Result<(), Rejection> {
        let name = name.trim();
        let phone = phone.trim();

        if name.is_empty() {
            return Err(Rejection::validation("Name is required"));
        }
        if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(Rejection::validation("Phone must be a valid number"));
        }
        validate_car_number(car_number)?;

        self.registry.append(name, phone, car_number).await.map_err(|e| {
            error!("registry write failure: {}", e);
            Rejection::storage()
        })?;
        Ok(())
    }

    /// Admin: raw board with masked phone numbers.
    pub async fn admin_inspect(
        &self,
        admin_key: Option<&str>,
    ) -> Result<Vec<AdminEntry>, Rejection> {
        if !self.admin.authorize(admin_key) {
            return Err(Rejection::unauthorized());
        }

        let entries = self.leaderboard().await?;
        Ok(entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| AdminEntry {
                position: idx as u32 + 1,
                name: entry.name.clone(),
                phone_masked: mask_phone(&entry.phone),
                reaction_time_ms: entry.reaction_time_ms,
                car_number: entry.car_number,
                updated_at: entry.updated_at,
            })
            .collect())
    }

    /// Admin: remove entries for a name (optionally one phone).
    pub async fn admin_remove(
        &self,
        admin_key: Option<&str>,
        name: &str,
        phone: Option<&str>,
    ) -> Result<(u32, Vec<LeaderboardEntry>), Rejection> {
        if !self.admin.authorize(admin_key) {
            return Err(Rejection::unauthorized());
        }
        if name.trim().is_empty() {
            return Err(Rejection::validation("Name is required to identify the entry"));
        }

        self.leaderboard.remove(name, phone).await.map_err(|e| {
            error!("leaderboard remove failure: {}", e);
            Rejection::storage()
        })
    }

    /// Admin: reset the board.
    pub async fn admin_clear(&self, admin_key: Option<&str>) -> Result<(), Rejection> {
        if !self.admin.authorize(admin_key) {
            return Err(Rejection::unauthorized());
        }

        self.leaderboard.clear().await.map_err(|e| {
            error!("leaderboard clear failure: {}", e);
            Rejection::storage()
        })
    }

    /// Periodic sweep of expired tokens and stale rate windows.
    ///
    /// Failures are logged and swallowed: the sweep only bounds memory,
    /// request-path checks re-verify expiry on their own.
    pub async fn sweep(&self) {
        match self.tokens.sweep_expired().await {
            Ok(n) if n > 0 => info!("sweep dropped {} expired token records", n),
            Ok(_) => {}
            Err(e) => warn!("token sweep failed: {}", e),
        }
        match self.limiter.sweep_stale().await {
            Ok(n) if n > 0 => info!("sweep dropped {} stale rate windows", n),
            Ok(_) => {}
            Err(e) => warn!("rate window sweep failed: {}", e),
        }
    }
}

fn validate_fields(request: &SubmitRequest) -> Result<(), Rejection> {
    if request.name.trim().is_empty() {
        return Err(Rejection::validation("Name is required"));
    }
    if request.phone.trim().is_empty() {
        return Err(Rejection::validation("Phone is required"));
    }
    if request.reaction_time_ms >= shared::MAX_REACTION_TIME_MS {
        return Err(Rejection::validation("Valid reaction time is required"));
    }
    validate_car_number(request.car_number)
}

fn validate_car_number(car_number: u32) -> Result<(), Rejection> {
    if !(shared::MIN_CAR_NUMBER..=shared::MAX_CAR_NUMBER).contains(&car_number) {
        return Err(Rejection::validation("Car number must be between 1 and 99"));
    }
    Ok(())
}
