//! Admin credential check for privileged leaderboard operations
//!
//! The key arrives out-of-band with the request and is compared in constant
//! time against the server-held secret. With no key configured, access is
//! granted only in development mode; production deployments without a key
//! deny everything rather than silently opening up.

use crate::token::constant_time_str_eq;
use log::warn;

pub struct AdminGate {
    key: Option<String>,
    dev_mode: bool,
}

impl AdminGate {
    pub fn new(key: Option<String>, dev_mode: bool) -> Self {
        if key.is_none() && dev_mode {
            warn!("no admin key configured; admin operations open in dev mode");
        }
        Self { key, dev_mode }
    }

    /// True if the supplied credential grants admin access.
    pub fn authorize(&self, provided: Option<&str>) -> bool {
        match &self.key {
            None => self.dev_mode,
            Some(expected) => match provided {
                Some(provided) => constant_time_str_eq(provided, expected),
                None => false,
            },
        }
    }
}
