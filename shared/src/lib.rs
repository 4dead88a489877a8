use serde::{Deserialize, Serialize};

/// Reaction times at or above this are false starts and never qualify.
pub const MAX_REACTION_TIME_MS: u32 = 999;
/// How long after session start a score may still be submitted.
pub const TOKEN_EXPIRY_MS: u64 = 60_000;
/// Fixed-window length for the per-client submission limiter.
pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Maximum submissions per client within one window.
pub const RATE_LIMIT_MAX: u32 = 10;
/// Number of entries the leaderboard retains.
pub const LEADERBOARD_CAPACITY: usize = 3;
pub const MIN_CAR_NUMBER: u32 = 1;
pub const MAX_CAR_NUMBER: u32 = 99;

/// Wire protocol between clients and the race server.
///
/// Requests and responses share one enum so both sides use the same
/// bincode framing, one message per datagram.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Requests
    StartSession,
    SubmitScore {
        name: String,
        phone: String,
        reaction_time_ms: u32,
        car_number: u32,
        game_token: String,
    },
    GetLeaderboard,
    Register {
        name: String,
        phone: String,
        car_number: u32,
    },
    AdminInspect {
        admin_key: Option<String>,
    },
    AdminRemove {
        admin_key: Option<String>,
        name: String,
        phone: Option<String>,
    },
    AdminClear {
        admin_key: Option<String>,
    },

    // Responses
    SessionStarted {
        game_token: String,
        server_timestamp: u64,
        session_id: String,
    },
    ScoreAccepted {
        leaderboard: Vec<LeaderboardEntry>,
        position: Option<u32>,
        is_current_time: bool,
    },
    Rejected {
        category: RejectionCategory,
        message: String,
        retry_after_ms: Option<u64>,
    },
    LeaderboardState {
        leaderboard: Vec<LeaderboardEntry>,
    },
    Registered,
    AdminReport {
        count: u32,
        entries: Vec<AdminEntry>,
    },
    Removed {
        removed: u32,
        leaderboard: Vec<LeaderboardEntry>,
    },
    Cleared,
}

/// Coarse failure classes a client can branch on without parsing messages.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RejectionCategory {
    RateLimited,
    TokenInvalid,
    Validation,
    Storage,
    Unauthorized,
}

/// One player's best qualifying reaction time.
///
/// Identity is the (name, phone) pair; the store keeps at most one entry
/// per identity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub name: String,
    pub phone: String,
    pub reaction_time_ms: u32,
    pub car_number: u32,
    pub updated_at: u64,
}

impl LeaderboardEntry {
    pub fn matches(&self, name: &str, phone: &str) -> bool {
        self.name == name && self.phone == phone
    }
}

/// Leaderboard row as exposed to admin inspection, phone masked.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminEntry {
    pub position: u32,
    pub name: String,
    pub phone_masked: String,
    pub reaction_time_ms: u32,
    pub car_number: u32,
    pub updated_at: u64,
}

/// Masks all but the last four characters of a phone number.
pub fn mask_phone(phone: &str) -> String {
    let skip = phone.chars().count().saturating_sub(4);
    format!("****{}", phone.chars().skip(skip).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_identity_match() {
        let entry = LeaderboardEntry {
            name: "Ann".to_string(),
            phone: "555".to_string(),
            reaction_time_ms: 180,
            car_number: 7,
            updated_at: 0,
        };

        assert!(entry.matches("Ann", "555"));
        assert!(!entry.matches("Ann", "556"));
        assert!(!entry.matches("Bob", "555"));
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("5551234567"), "****4567");
        assert_eq!(mask_phone("555"), "****555");
        assert_eq!(mask_phone(""), "****");
    }

    #[test]
    fn test_packet_serialization_start_session() {
        let packet = Packet::StartSession;
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::StartSession => {}
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_submit_score() {
        let packet = Packet::SubmitScore {
            name: "Ann".to_string(),
            phone: "555".to_string(),
            reaction_time_ms: 180,
            car_number: 7,
            game_token: "abc.def".to_string(),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::SubmitScore {
                name,
                phone,
                reaction_time_ms,
                car_number,
                game_token,
            } => {
                assert_eq!(name, "Ann");
                assert_eq!(phone, "555");
                assert_eq!(reaction_time_ms, 180);
                assert_eq!(car_number, 7);
                assert_eq!(game_token, "abc.def");
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_rejection() {
        let packet = Packet::Rejected {
            category: RejectionCategory::RateLimited,
            message: "Too many submissions".to_string(),
            retry_after_ms: Some(31_000),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Rejected {
                category,
                message,
                retry_after_ms,
            } => {
                assert_eq!(category, RejectionCategory::RateLimited);
                assert_eq!(message, "Too many submissions");
                assert_eq!(retry_after_ms, Some(31_000));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_score_accepted() {
        let entry = LeaderboardEntry {
            name: "Ann".to_string(),
            phone: "555".to_string(),
            reaction_time_ms: 180,
            car_number: 7,
            updated_at: 123456789,
        };

        let packet = Packet::ScoreAccepted {
            leaderboard: vec![entry],
            position: Some(1),
            is_current_time: true,
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::ScoreAccepted {
                leaderboard,
                position,
                is_current_time,
            } => {
                assert_eq!(leaderboard.len(), 1);
                assert_eq!(leaderboard[0].reaction_time_ms, 180);
                assert_eq!(position, Some(1));
                assert!(is_current_time);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_constants_are_consistent() {
        assert!(MIN_CAR_NUMBER < MAX_CAR_NUMBER);
        assert!(LEADERBOARD_CAPACITY > 0);
        assert!(RATE_LIMIT_MAX > 0);
        assert!(TOKEN_EXPIRY_MS > 0);
    }
}
