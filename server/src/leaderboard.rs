//! Authoritative top-N leaderboard of best reaction times
//!
//! The whole list lives under one key as a JSON array. Every mutation is a
//! read-merge-write cycle committed with compare-and-swap on the version the
//! read observed; a conflicting writer forces a re-read and retry. Two
//! simultaneous personal bests for different players therefore both land,
//! and a naive lost-update race cannot silently drop an entry.

use crate::store::{KvStore, StoreError, Versioned};
use crate::util::now_ms;
use log::info;
use shared::LeaderboardEntry;
use std::sync::Arc;

const LEADERBOARD_KEY: &str = "leaderboard";
const MAX_CAS_ATTEMPTS: u32 = 16;

/// What a submission did to the board.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub leaderboard: Vec<LeaderboardEntry>,
    /// 1-indexed position of the identity, None if it is not on the board.
    pub position: Option<u32>,
    /// True when the time now on the board is the one just submitted.
    /// False when an earlier, better time for the same identity stands.
    pub is_current_time: bool,
}

pub struct Leaderboard {
    store: Arc<dyn KvStore>,
    capacity: usize,
    false_start_ms: u32,
}

impl Leaderboard {
    pub fn new(store: Arc<dyn KvStore>, capacity: usize, false_start_ms: u32) -> Self {
        Self {
            store,
            capacity,
            false_start_ms,
        }
    }

    /// Current board, fastest first, at most `capacity` entries.
    pub async fn top(&self) -> Result<Vec<LeaderboardEntry>, StoreError> {
        Ok(self.load().await?.1)
    }

    async fn load(&self) -> Result<(Option<u64>, Vec<LeaderboardEntry>), StoreError> {
        match self.store.get(LEADERBOARD_KEY).await? {
            Some(Versioned { value, version }) => {
                let mut entries: Vec<LeaderboardEntry> = serde_json::from_slice(&value)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                entries.sort_by_key(|e| e.reaction_time_ms);
                entries.truncate(self.capacity);
                Ok((Some(version), entries))
            }
            None => Ok((None, Vec::new())),
        }
    }

    async fn commit(
        &self,
        expected_version: Option<u64>,
        entries: &[LeaderboardEntry],
    ) -> Result<bool, StoreError> {
        let encoded =
            serde_json::to_vec(entries).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.store
            .compare_and_swap(LEADERBOARD_KEY, expected_version, encoded)
            .await
    }

    /// Merges one qualifying submission into the board.
    ///
    /// An identity already on the board is only replaced by a strictly lower
    /// time; ties and regressions leave the stored entry alone but still
    /// report the identity's standing. False starts mutate nothing.
    pub async fn submit(
        &self,
        name: &str,
        phone: &str,
        reaction_time_ms: u32,
        car_number: u32,
    ) -> Result<SubmitOutcome, StoreError> {
        if reaction_time_ms >= self.false_start_ms {
            return Ok(SubmitOutcome {
                leaderboard: self.top().await?,
                position: None,
                is_current_time: false,
            });
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (version, mut entries) = self.load().await?;

            let mut is_current_time = true;
            match entries.iter_mut().find(|e| e.matches(name, phone)) {
                Some(existing) => {
                    if reaction_time_ms < existing.reaction_time_ms {
                        existing.reaction_time_ms = reaction_time_ms;
                        existing.car_number = car_number;
                        existing.updated_at = now_ms();
                    } else {
                        // Personal best stands; this submission is not it.
                        is_current_time = false;
                    }
                }
                None => entries.push(LeaderboardEntry {
                    name: name.to_string(),
                    phone: phone.to_string(),
                    reaction_time_ms,
                    car_number,
                    updated_at: now_ms(),
                }),
            }

            entries.sort_by_key(|e| e.reaction_time_ms);
            entries.truncate(self.capacity);

            if self.commit(version, &entries).await? {
                let position = entries
                    .iter()
                    .position(|e| e.matches(name, phone))
                    .map(|idx| idx as u32 + 1);

                return Ok(SubmitOutcome {
                    leaderboard: entries,
                    position,
                    // Truncated out entirely: the submitted time is nowhere.
                    is_current_time: is_current_time && position.is_some(),
                });
            }
            // Another writer got in between our read and write; retry.
        }

        Err(StoreError::Contention(MAX_CAS_ATTEMPTS))
    }

    /// Removes entries for `name`, optionally narrowed to one phone number.
    /// Returns how many were dropped and the resulting board.
    pub async fn remove(
        &self,
        name: &str,
        phone: Option<&str>,
    ) -> Result<(u32, Vec<LeaderboardEntry>), StoreError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (version, entries) = self.load().await?;

            let kept: Vec<LeaderboardEntry> = entries
                .iter()
                .filter(|entry| match phone {
                    Some(phone) => !entry.matches(name, phone),
                    None => entry.name != name,
                })
                .cloned()
                .collect();

            let removed = (entries.len() - kept.len()) as u32;
            if removed == 0 {
                return Ok((0, entries));
            }

            if self.commit(version, &kept).await? {
                info!("removed {} leaderboard entry/entries for {:?}", removed, name);
                return Ok((removed, kept));
            }
        }

        Err(StoreError::Contention(MAX_CAS_ATTEMPTS))
    }

    /// Administrative reset to an empty board.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.put(LEADERBOARD_KEY, b"[]".to_vec()).await?;
        info!("leaderboard cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use shared::{LEADERBOARD_CAPACITY, MAX_REACTION_TIME_MS};

    fn board() -> Leaderboard {
        Leaderboard::new(
            MemoryStore::shared(),
            LEADERBOARD_CAPACITY,
            MAX_REACTION_TIME_MS,
        )
    }

    #[tokio::test]
    async fn test_empty_board() {
        let board = board();
        assert!(board.top().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_submission_takes_first_place() {
        let board = board();
        let outcome = board.submit("Ann", "555", 180, 7).await.unwrap();

        assert_eq!(outcome.position, Some(1));
        assert!(outcome.is_current_time);
        assert_eq!(outcome.leaderboard.len(), 1);
        assert_eq!(outcome.leaderboard[0].reaction_time_ms, 180);
    }

    #[tokio::test]
    async fn test_strict_improvement_only() {
        let board = board();

        board.submit("Ann", "555", 300, 7).await.unwrap();

        // A worse time never overwrites the stored best.
        let worse = board.submit("Ann", "555", 500, 7).await.unwrap();
        assert_eq!(worse.leaderboard[0].reaction_time_ms, 300);
        assert_eq!(worse.position, Some(1));
        assert!(!worse.is_current_time);

        // A strictly better time does.
        let better = board.submit("Ann", "555", 200, 7).await.unwrap();
        assert_eq!(better.leaderboard[0].reaction_time_ms, 200);
        assert!(better.is_current_time);

        assert_eq!(board.top().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tie_does_not_overwrite() {
        let board = board();
        board.submit("Ann", "555", 300, 7).await.unwrap();

        let tie = board.submit("Ann", "555", 300, 8).await.unwrap();
        assert!(!tie.is_current_time);
        // Car number stays with the original entry.
        assert_eq!(tie.leaderboard[0].car_number, 7);
    }

    #[tokio::test]
    async fn test_top_n_truncation_drops_slowest() {
        let board = board();

        board.submit("A", "1", 300, 1).await.unwrap();
        board.submit("B", "2", 200, 2).await.unwrap();
        board.submit("C", "3", 400, 3).await.unwrap();
        let outcome = board.submit("D", "4", 250, 4).await.unwrap();

        let times: Vec<u32> = outcome
            .leaderboard
            .iter()
            .map(|e| e.reaction_time_ms)
            .collect();
        assert_eq!(times, vec![200, 250, 300]);
        assert_eq!(outcome.position, Some(2));

        // C (400ms, the slowest) was the one squeezed out.
        assert!(!outcome.leaderboard.iter().any(|e| e.name == "C"));
    }

    #[tokio::test]
    async fn test_submission_truncated_out_reports_no_position() {
        let board = board();
        board.submit("A", "1", 100, 1).await.unwrap();
        board.submit("B", "2", 110, 2).await.unwrap();
        board.submit("C", "3", 120, 3).await.unwrap();

        let outcome = board.submit("D", "4", 500, 4).await.unwrap();
        assert_eq!(outcome.position, None);
        assert!(!outcome.is_current_time);
        assert_eq!(outcome.leaderboard.len(), 3);
    }

    #[tokio::test]
    async fn test_false_start_mutates_nothing() {
        let board = board();
        board.submit("Ann", "555", 180, 7).await.unwrap();

        let outcome = board
            .submit("Bob", "666", MAX_REACTION_TIME_MS, 8)
            .await
            .unwrap();
        assert_eq!(outcome.position, None);
        assert_eq!(outcome.leaderboard.len(), 1);
        assert_eq!(board.top().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_identity_distinct_phones_kept_apart() {
        let board = board();
        board.submit("Ann", "555", 180, 7).await.unwrap();
        board.submit("Ann", "556", 190, 7).await.unwrap();

        assert_eq!(board.top().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_by_name() {
        let board = board();
        board.submit("Ann", "555", 180, 7).await.unwrap();
        board.submit("Bob", "666", 200, 8).await.unwrap();

        let (removed, remaining) = board.remove("Ann", None).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "Bob");
    }

    #[tokio::test]
    async fn test_remove_narrowed_by_phone() {
        let board = board();
        board.submit("Ann", "555", 180, 7).await.unwrap();
        board.submit("Ann", "556", 190, 7).await.unwrap();

        let (removed, remaining) = board.remove("Ann", Some("556")).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(remaining[0].phone, "555");
    }

    #[tokio::test]
    async fn test_remove_missing_entry_is_noop() {
        let board = board();
        board.submit("Ann", "555", 180, 7).await.unwrap();

        let (removed, remaining) = board.remove("Zed", None).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let board = board();
        board.submit("Ann", "555", 180, 7).await.unwrap();

        board.clear().await.unwrap();
        assert!(board.top().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_distinct_identities_none_lost() {
        let store = MemoryStore::shared();
        let board = Arc::new(Leaderboard::new(store, 8, MAX_REACTION_TIME_MS));

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let board = Arc::clone(&board);
            handles.push(tokio::spawn(async move {
                board
                    .submit(&format!("P{}", i), &format!("{}", i), 100 + i * 10, i + 1)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let top = board.top().await.unwrap();
        assert_eq!(top.len(), 8);
        let times: Vec<u32> = top.iter().map(|e| e.reaction_time_ms).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
    }

    #[tokio::test]
    async fn test_concurrent_same_identity_keeps_lower_time() {
        let store = MemoryStore::shared();
        let board = Arc::new(Leaderboard::new(store, 3, MAX_REACTION_TIME_MS));

        let fast = {
            let board = Arc::clone(&board);
            tokio::spawn(async move { board.submit("Ann", "555", 150, 7).await.unwrap() })
        };
        let slow = {
            let board = Arc::clone(&board);
            tokio::spawn(async move { board.submit("Ann", "555", 400, 7).await.unwrap() })
        };
        fast.await.unwrap();
        slow.await.unwrap();

        let top = board.top().await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].reaction_time_ms, 150);
    }
}
