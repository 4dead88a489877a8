//! Signed, single-use game session tokens
//!
//! A token is minted when a game session starts and must accompany the score
//! submission for that session. It proves the submission corresponds to a
//! server-observed start: the payload carries the session id and issue time,
//! and an HMAC-SHA256 signature over the payload stops clients from forging
//! or mutating either. Tokens are self-contained; the only server-side state
//! is the consumed-token set that enforces single use.

use crate::store::{KvStore, StoreError};
use crate::util::{now_ms, to_hex};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const USED_PREFIX: &str = "used:";

/// Claims carried inside a token, opaque to the client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenPayload {
    pub session_id: String,
    pub issued_at: u64,
}

/// Result of starting a session.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub server_timestamp: u64,
    pub session_id: String,
}

/// Why a token (or the reaction time it vouches for) was refused.
///
/// Returned as a value, not an error, so the orchestrator can branch on it
/// and forward the message verbatim. None of these leak the signing secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    AlreadyUsed,
    InvalidFormat,
    BadSignature,
    InvalidPayload,
    Expired,
    NegativeReactionTime,
    FalseStart,
}

impl TokenRejection {
    pub fn message(&self) -> &'static str {
        match self {
            TokenRejection::AlreadyUsed => {
                "Token already used. Each game session can only submit once."
            }
            TokenRejection::InvalidFormat => "Invalid token format",
            TokenRejection::BadSignature => "Invalid token signature - tampered or forged",
            TokenRejection::InvalidPayload => "Invalid token payload",
            TokenRejection::Expired => "Token expired. Game session took too long.",
            TokenRejection::NegativeReactionTime => "Invalid reaction time - cannot be negative",
            TokenRejection::FalseStart => "False start - reaction time too high",
        }
    }
}

/// Outcome of validating a token against a submitted reaction time.
pub type ValidationResult = Result<Result<TokenPayload, TokenRejection>, StoreError>;

/// Issues and validates session tokens.
pub struct TokenService {
    secret: Vec<u8>,
    expiry_ms: u64,
    max_reaction_time_ms: i64,
    store: Arc<dyn KvStore>,
}

impl TokenService {
    pub fn new(
        secret: Vec<u8>,
        expiry_ms: u64,
        max_reaction_time_ms: u32,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            secret,
            expiry_ms,
            max_reaction_time_ms: max_reaction_time_ms as i64,
            store,
        }
    }

    /// Mints a token for a new game session.
    ///
    /// Stateless: nothing is persisted at issue time. Validity is carried
    /// entirely by the signed payload plus the consumed-token set.
    pub fn start_session(&self) -> IssuedToken {
        let session_bytes: [u8; 16] = rand::random();
        let session_id = to_hex(&session_bytes);
        let issued_at = now_ms();

        let token = self.mint(&session_id, issued_at);

        IssuedToken {
            token,
            server_timestamp: issued_at,
            session_id,
        }
    }

    fn mint(&self, session_id: &str, issued_at: u64) -> String {
        let payload = TokenPayload {
            session_id: session_id.to_string(),
            issued_at,
        };
        // serde_json over our own struct cannot fail
        let payload_json = serde_json::to_vec(&payload).unwrap_or_default();
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);
        let signature = self.sign(payload_b64.as_bytes());

        format!("{}.{}", payload_b64, signature)
    }

    fn sign(&self, data: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(data);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Validates a token against the reaction time it vouches for.
    ///
    /// Checks run in a fixed short-circuit order: replay, format, signature,
    /// payload, expiry, then the reaction-time bounds. A valid submission
    /// atomically consumes the token, so of two concurrent submissions
    /// carrying the same token exactly one succeeds.
    ///
    /// There is deliberately no minimum reaction time: some players are
    /// genuinely fast, so only negative values and false starts are refused.
    pub async fn validate(&self, token: &str, reaction_time_ms: i64) -> ValidationResult {
        let used_key = format!("{}{}", USED_PREFIX, token);

        // Replay check first; the authoritative guard is the CAS below.
        if self.store.get(&used_key).await?.is_some() {
            return Ok(Err(TokenRejection::AlreadyUsed));
        }

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 2 {
            return Ok(Err(TokenRejection::InvalidFormat));
        }
        let (payload_b64, signature) = (parts[0], parts[1]);

        let expected = self.sign(payload_b64.as_bytes());
        if !constant_time_str_eq(signature, &expected) {
            return Ok(Err(TokenRejection::BadSignature));
        }

        let payload: TokenPayload = match URL_SAFE_NO_PAD
            .decode(payload_b64)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
        {
            Some(payload) => payload,
            None => return Ok(Err(TokenRejection::InvalidPayload)),
        };

        let now = now_ms();
        if now.saturating_sub(payload.issued_at) > self.expiry_ms {
            return Ok(Err(TokenRejection::Expired));
        }

        if reaction_time_ms < 0 {
            return Ok(Err(TokenRejection::NegativeReactionTime));
        }

        if reaction_time_ms >= self.max_reaction_time_ms {
            return Ok(Err(TokenRejection::FalseStart));
        }

        // Mark consumed. Insert-if-absent makes the check-and-mark one atomic
        // step; losing the race means someone else just consumed it.
        let deadline = payload.issued_at + self.expiry_ms;
        let consumed = self
            .store
            .compare_and_swap(&used_key, None, deadline.to_le_bytes().to_vec())
            .await?;
        if !consumed {
            return Ok(Err(TokenRejection::AlreadyUsed));
        }

        Ok(Ok(payload))
    }

    /// Drops consumed-token records whose expiry deadline has passed.
    ///
    /// Purely a memory bound: an expired token would be refused by the
    /// timestamp check anyway, so a missed sweep never affects correctness.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut removed = 0;

        for key in self.store.keys_with_prefix(USED_PREFIX).await? {
            let Some(stored) = self.store.get(&key).await? else {
                continue;
            };
            let deadline = decode_deadline(&stored.value);
            if deadline <= now && self.store.delete(&key).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

fn decode_deadline(raw: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    if raw.len() == 8 {
        bytes.copy_from_slice(raw);
        u64::from_le_bytes(bytes)
    } else {
        // Unparseable record: treat as already expired so the sweep drops it
        0
    }
}

/// Constant-time string comparison for signatures and secrets.
///
/// Lengths are compared in constant time as well; mismatched lengths compare
/// padded buffers so timing does not reveal where the difference lies.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xffu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
