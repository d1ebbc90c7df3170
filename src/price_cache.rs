use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

const CACHE_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEnvelope {
    version: String,
    last_updated: DateTime<Utc>,
    data: HashMap<String, String>,
}

/// Session price cache: normalized search query → rendered price string.
///
/// Loaded at startup by merging the shipped baseline with the runtime file
/// (runtime entries win), rewritten wholesale after every update. The write
/// is best-effort and non-atomic; concurrent writers can lose updates,
/// which is an accepted limitation of this cache.
pub struct PriceCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
    recent: Mutex<HashMap<String, Instant>>,
    dedup_window: Duration,
}

impl PriceCache {
    pub async fn from_env() -> Self {
        let path = std::env::var("PRICE_CACHE_FILE")
            .unwrap_or_else(|_| "price_cache.json".to_string());
        let dedup_ms = std::env::var("PRICE_DEDUP_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5000);
        Self::load(path, Duration::from_millis(dedup_ms)).await
    }

    pub async fn load(path: impl Into<PathBuf>, dedup_window: Duration) -> Self {
        let path = path.into();
        let mut entries = baseline();

        match fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<CacheEnvelope>(&raw) {
                Ok(envelope) if envelope.version == CACHE_VERSION => {
                    info!(
                        target = "poketrack.cache",
                        entries = envelope.data.len(),
                        path = %path.display(),
                        "loaded price cache"
                    );
                    entries.extend(envelope.data);
                }
                Ok(envelope) => {
                    warn!(
                        target = "poketrack.cache",
                        found = %envelope.version,
                        expected = CACHE_VERSION,
                        "price cache version mismatch, discarding stored entries"
                    );
                }
                Err(err) => {
                    warn!(target = "poketrack.cache", error = %err, "unreadable price cache file");
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    target = "poketrack.cache",
                    baseline = entries.len(),
                    "no price cache file, starting from baseline"
                );
            }
            Err(err) => {
                warn!(target = "poketrack.cache", error = %err, "could not read price cache file");
            }
        }

        Self {
            path,
            entries: Mutex::new(entries),
            recent: Mutex::new(HashMap::new()),
            dedup_window,
        }
    }

    pub async fn get(&self, query: &str) -> Option<String> {
        self.entries.lock().await.get(query).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().await.clone()
    }

    /// Record an outcome and rewrite the backing file.
    pub async fn insert(&self, query: &str, price: &str) {
        let data = {
            let mut entries = self.entries.lock().await;
            entries.insert(query.to_string(), price.to_string());
            entries.clone()
        };
        self.flush(data).await;
    }

    /// Whether a remote lookup for this query is allowed right now.
    /// Marks the query, so a duplicate inside the window is refused.
    pub async fn allow_remote(&self, query: &str) -> bool {
        if self.dedup_window.is_zero() {
            return true;
        }
        let mut recent = self.recent.lock().await;
        let now = Instant::now();
        if let Some(last) = recent.get(query) {
            if now.duration_since(*last) < self.dedup_window {
                return false;
            }
        }
        recent.insert(query.to_string(), now);
        true
    }

    async fn flush(&self, data: HashMap<String, String>) {
        let envelope = CacheEnvelope {
            version: CACHE_VERSION.to_string(),
            last_updated: Utc::now(),
            data,
        };
        match serde_json::to_string_pretty(&envelope) {
            Ok(json) => {
                if let Err(err) = fs::write(&self.path, json).await {
                    warn!(target = "poketrack.cache", error = %err, "could not save price cache");
                }
            }
            Err(err) => {
                warn!(target = "poketrack.cache", error = %err, "could not serialize price cache");
            }
        }
    }
}

fn baseline() -> HashMap<String, String> {
    serde_json::from_str(include_str!("../data/price_cache.json")).unwrap_or_else(|err| {
        warn!(target = "poketrack.cache", error = %err, "shipped baseline cache is invalid");
        HashMap::new()
    })
}
