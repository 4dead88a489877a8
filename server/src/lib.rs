//! # Race Server Library
//!
//! Server-validated score submission for a casual reaction-time racing game.
//! The game itself runs entirely on the client; the server's job is to make
//! the leaderboard trustworthy. It does that with a signed, single-use,
//! time-boxed session token minted at game start, a per-client submission
//! rate limit, and an atomically updated top-N leaderboard.
//!
//! ## Request flow
//!
//! A client asks for a session start and receives a signed token. After the
//! race it submits `{name, phone, reaction time, car number, token}`. The
//! submission pipeline checks, in order: rate limit, token presence, token
//! validity (replay, format, signature, payload, expiry, reaction-time
//! bounds), business fields, and finally merges the score into the
//! leaderboard. Each stage short-circuits with its own rejection category.
//!
//! ## Module Organization
//!
//! ### Store Module (`store`)
//! Key-value abstraction with versioned compare-and-swap. The in-memory
//! reference implementation backs the consumed-token set, the rate-limit
//! windows and the leaderboard; a shared external store can replace it for
//! multi-instance deployments.
//!
//! ### Token Module (`token`)
//! Issues and validates HMAC-SHA256 signed session tokens. Single use is
//! enforced by an atomic insert into the consumed-token set, so a replayed
//! token loses exactly once.
//!
//! ### Rate Limit Module (`rate_limit`)
//! Fixed-window counter per client identifier, with the forwarded-for /
//! peer-address / unknown-bucket resolution chain.
//!
//! ### Leaderboard Module (`leaderboard`)
//! Bounded top-N list of personal bests. Read-merge-write cycles commit via
//! compare-and-swap, so concurrent submissions never lose entries and only
//! strict improvements replace an identity's stored time.
//!
//! ### Submission Module (`submission`)
//! The orchestrator wiring the above together, plus registration and the
//! admin operations (inspect, remove, clear) behind a constant-time key
//! check.
//!
//! ### Network Module (`network`)
//! UDP transport speaking the bincode `Packet` protocol from the `shared`
//! crate: receiver task, sender task, dispatch loop, and the periodic sweep
//! task that bounds memory held by expired tokens and stale rate windows.
//!
//! ## Security Considerations
//!
//! Tokens are opaque to clients and protected by a server-held secret;
//! signature checks and admin key comparison are constant time. Rejection
//! messages name the protocol-level reason but never reveal the secret. The
//! server refuses to start in production without a configured secret.

pub mod auth;
pub mod config;
pub mod leaderboard;
pub mod network;
pub mod rate_limit;
pub mod registry;
pub mod store;
pub mod submission;
pub mod token;
pub mod util;
