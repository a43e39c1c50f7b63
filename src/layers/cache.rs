use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::layers::{Paper, SourceDatabase};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: SourceDatabase,
    query: String,
    limit: usize,
}

/// Per-session memory of recent database responses.
pub struct SearchCache {
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<CacheKey, (Instant, Vec<Paper>)>,
}

impl SearchCache {
    pub fn new(enabled: bool, ttl: Duration, max_entries: usize) -> Self {
        Self {
            enabled: enabled && max_entries > 0,
            ttl,
            max_entries,
            entries: HashMap::new(),
        }
    }

    fn key(source: SourceDatabase, query: &str, limit: usize) -> CacheKey {
        CacheKey {
            source,
            query: query.trim().to_lowercase(),
            limit,
        }
    }

    pub fn get(&mut self, source: SourceDatabase, query: &str, limit: usize) -> Option<Vec<Paper>> {
        if !self.enabled {
            return None;
        }
        let key = Self::key(source, query, limit);
        match self.entries.get(&key) {
            Some((stored_at, papers)) if stored_at.elapsed() < self.ttl => {
                tracing::info!("Returning cached {} results for: {}", source, query);
                Some(papers.clone())
            }
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, source: SourceDatabase, query: &str, limit: usize, papers: Vec<Paper>) {
        if !self.enabled {
            return;
        }
        let key = Self::key(source, query, limit);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let ttl = self.ttl;
            self.entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        }
        // Still full: drop the oldest entry.
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (stored_at, _))| *stored_at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (Instant::now(), papers));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
