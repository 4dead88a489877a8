//! Append-only registrant log
//!
//! Registration is simple I/O outside the anti-cheat pipeline: each
//! registrant becomes one CSV row. Appends are serialized through a mutex so
//! concurrent registrations cannot interleave half-written rows.

use crate::util::now_ms;
use log::info;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const CSV_HEADER: &str = "name,phone,car_number,timestamp\n";

/// One registered player.
#[derive(Debug, Clone)]
pub struct Registrant {
    pub name: String,
    pub phone: String,
    pub car_number: u32,
    pub timestamp: u64,
}

/// CSV-backed registrant log.
pub struct Registry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Appends one registrant row, creating the file (with header) and its
    /// parent directory on first use.
    pub async fn append(&self, name: &str, phone: &str, car_number: u32) -> io::Result<Registrant> {
        let registrant = Registrant {
            name: name.to_string(),
            phone: phone.to_string(),
            car_number,
            timestamp: now_ms(),
        };

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let fresh = !path_exists(&self.path).await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        if fresh {
            file.write_all(CSV_HEADER.as_bytes()).await?;
        }

        let row = format!(
            "{},{},{},{}\n",
            escape_field(&registrant.name),
            escape_field(&registrant.phone),
            registrant.car_number,
            registrant.timestamp
        );
        file.write_all(row.as_bytes()).await?;
        file.flush().await?;

        info!("registered {} (car #{})", registrant.name, car_number);
        Ok(registrant)
    }

    /// Reads the log back, skipping the header and malformed rows.
    pub async fn read_all(&self) -> io::Result<Vec<Registrant>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(content
            .lines()
            .skip(1)
            .filter_map(parse_row)
            .collect())
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

// Commas inside fields would corrupt the row layout
fn escape_field(field: &str) -> String {
    field.replace(',', " ")
}

fn parse_row(line: &str) -> Option<Registrant> {
    let mut parts = line.split(',');
    let name = parts.next()?.to_string();
    let phone = parts.next()?.to_string();
    let car_number = parts.next()?.parse().ok()?;
    let timestamp = parts.next()?.parse().ok()?;

    Some(Registrant {
        name,
        phone,
        car_number,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_csv(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "grid-start-registry-{}-{}.csv",
            tag,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn test_append_creates_file_with_header() {
        let path = temp_csv("header");
        let _ = fs::remove_file(&path).await;
        let registry = Registry::new(&path);

        registry.append("Ann", "555", 7).await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with(CSV_HEADER));
        assert!(content.contains("Ann,555,7,"));

        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_append_then_read_back() {
        let path = temp_csv("roundtrip");
        let _ = fs::remove_file(&path).await;
        let registry = Registry::new(&path);

        registry.append("Ann", "555", 7).await.unwrap();
        registry.append("Bob", "666", 42).await.unwrap();

        let rows = registry.read_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Ann");
        assert_eq!(rows[1].car_number, 42);

        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_read_missing_file_is_empty() {
        let registry = Registry::new(temp_csv("missing-never-created"));
        assert!(registry.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commas_in_fields_do_not_break_rows() {
        let path = temp_csv("escape");
        let _ = fs::remove_file(&path).await;
        let registry = Registry::new(&path);

        registry.append("Ann, the Fast", "555", 7).await.unwrap();

        let rows = registry.read_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Ann  the Fast");
        assert_eq!(rows[0].car_number, 7);

        let _ = fs::remove_file(&path).await;
    }
}
