use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current wall-clock time in milliseconds since the epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Hex-encode a byte slice (session ids, generated secrets)
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
