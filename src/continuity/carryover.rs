use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::journal::{CarryoverJournal, JournalEvent};

/// Bottom-half translation waiting for the next page
#[derive(Debug, Clone, PartialEq)]
pub struct CarryoverEntry {
    pub pair_id: String,
    pub carrier_page: String,
    pub text: String,
    pub inserted_at: Instant,
    pub last_access: Instant,
}

/// In-memory carryover map with idle expiry and a size bound
///
/// Entries are consumed at most once. The optional journal only records
/// events; its failures are logged and never surface.
#[derive(Debug, Clone)]
pub struct CarryoverStore {
    entries: Arc<Mutex<HashMap<String, CarryoverEntry>>>,
    ttl: Duration,
    capacity: usize,
    journal: Option<CarryoverJournal>,
}

impl CarryoverStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: CarryoverJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Store the bottom half for `pair_id`, replacing any previous entry
    pub fn put(&self, pair_id: &str, carrier_page: &str, text: &str) {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut entries = self.entries.lock();
            expire_locked(&mut entries, self.ttl, now, &mut evicted);
            while entries.len() >= self.capacity && !entries.contains_key(pair_id) {
                let oldest = entries
                    .values()
                    .min_by_key(|e| e.inserted_at)
                    .map(|e| e.pair_id.clone());
                match oldest {
                    Some(id) => {
                        entries.remove(&id);
                        debug!("Carryover store full, evicted {}", id);
                        evicted.push((JournalEvent::Evict, id));
                    }
                    None => break,
                }
            }
            entries.insert(
                pair_id.to_string(),
                CarryoverEntry {
                    pair_id: pair_id.to_string(),
                    carrier_page: carrier_page.to_string(),
                    text: text.to_string(),
                    inserted_at: now,
                    last_access: now,
                },
            );
        }
        for (event, id) in evicted {
            self.journal(event, &id, None, None);
        }
        self.journal(JournalEvent::Put, pair_id, Some(carrier_page), Some(text));
    }

    /// Look at an entry without consuming it
    pub fn get(&self, pair_id: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = entries
            .get(pair_id)
            .is_some_and(|e| now.duration_since(e.last_access) > self.ttl);
        if expired {
            entries.remove(pair_id);
            return None;
        }
        entries.get_mut(pair_id).map(|entry| {
            entry.last_access = now;
            entry.text.clone()
        })
    }

    /// Take an entry out of the store; a second call returns `None`
    pub fn consume(&self, pair_id: &str, consumer_page: &str) -> Option<String> {
        let now = Instant::now();
        let taken = self.entries.lock().remove(pair_id);
        match taken {
            Some(entry) if now.duration_since(entry.last_access) <= self.ttl => {
                self.journal(JournalEvent::Consume, pair_id, Some(consumer_page), Some(&entry.text));
                Some(entry.text)
            }
            Some(_) => {
                debug!("Carryover {} expired before page {} consumed it", pair_id, consumer_page);
                self.journal(JournalEvent::Expire, pair_id, None, None);
                self.journal(JournalEvent::Miss, pair_id, Some(consumer_page), None);
                None
            }
            None => {
                self.journal(JournalEvent::Miss, pair_id, Some(consumer_page), None);
                None
            }
        }
    }

    /// Drop idle entries, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let mut expired = Vec::new();
        expire_locked(&mut self.entries.lock(), self.ttl, Instant::now(), &mut expired);
        let count = expired.len();
        for (event, id) in expired {
            self.journal(event, &id, None, None);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn journal(&self, event: JournalEvent, pair_id: &str, page_id: Option<&str>, text: Option<&str>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(event, pair_id, page_id, text) {
                warn!("Carryover journal write failed: {:#}", e);
            }
        }
    }
}

impl Default for CarryoverStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), 256)
    }
}

fn expire_locked(
    entries: &mut HashMap<String, CarryoverEntry>,
    ttl: Duration,
    now: Instant,
    expired: &mut Vec<(JournalEvent, String)>,
) {
    entries.retain(|id, entry| {
        let keep = now.duration_since(entry.last_access) <= ttl;
        if !keep {
            expired.push((JournalEvent::Expire, id.clone()));
        }
        keep
    });
}
