use crate::ebay::auth::CredentialCache;
use crate::ebay::browse::{BrowseClient, EbayBrowseError, SearchResponse};
use crate::models::CardRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Listings actually sampled for the average, out of the larger search page.
const PRICE_SAMPLE_SIZE: usize = 10;
const SEARCH_PAGE_SIZE: u32 = 50;

static DELTA_SPECIES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Espèces Delta").expect("delta species regex"));

/// Outcome of a single price lookup. Callers branch on the variant; the
/// legacy sentinel strings only exist at the rendering boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceOutcome {
    Priced { amount: f64, currency: String },
    NotFound,
    QuotaExceeded,
    Failed,
}

impl PriceOutcome {
    /// Render to the wire format the UI expects: a formatted amount with
    /// currency symbol, or one of the reserved sentinel strings.
    pub fn render(&self) -> String {
        match self {
            PriceOutcome::Priced { amount, currency } => {
                format!("{amount:.2} {}", currency_symbol(currency))
            }
            PriceOutcome::NotFound => "N/A".to_string(),
            PriceOutcome::QuotaExceeded => "RATE_LIMIT_EXCEEDED".to_string(),
            PriceOutcome::Failed => "Erreur".to_string(),
        }
    }

    /// Only settled outcomes go into the price cache; transient failures and
    /// quota hits stay retryable.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, PriceOutcome::Priced { .. } | PriceOutcome::NotFound)
    }

    fn label(&self) -> &'static str {
        match self {
            PriceOutcome::Priced { .. } => "priced",
            PriceOutcome::NotFound => "not_found",
            PriceOutcome::QuotaExceeded => "quota_exceeded",
            PriceOutcome::Failed => "failed",
        }
    }
}

fn currency_symbol(code: &str) -> &str {
    if code == "EUR" { "€" } else { code }
}

/// Strip tokens known to break marketplace search (the delta-species symbol
/// and its French spelling).
pub fn sanitize_search_term(text: &str) -> String {
    let without_symbol = text.replace("δ´", "");
    DELTA_SPECIES_RE
        .replace_all(&without_symbol, "")
        .trim()
        .to_string()
}

pub fn build_search_query(card: &CardRecord) -> String {
    let name = sanitize_search_term(&card.name);
    let number = sanitize_search_term(&card.number).replace('/', " ");
    format!("pokemon {name} {number}")
}

/// Unweighted mean over the first listings of the sample; listings with a
/// missing or unparsable price drop out of both numerator and denominator.
pub fn aggregate_prices(response: &SearchResponse) -> PriceOutcome {
    let Some(items) = response
        .item_summaries
        .as_ref()
        .filter(|items| !items.is_empty())
    else {
        return PriceOutcome::NotFound;
    };

    let sample = &items[..items.len().min(PRICE_SAMPLE_SIZE)];
    let prices: Vec<f64> = sample
        .iter()
        .filter_map(|item| item.price.as_ref())
        .filter_map(|price| price.value.as_deref())
        .filter_map(|value| value.parse::<f64>().ok())
        .collect();

    if prices.is_empty() {
        return PriceOutcome::NotFound;
    }

    let amount = prices.iter().sum::<f64>() / prices.len() as f64;
    let currency = sample
        .first()
        .and_then(|item| item.price.as_ref())
        .and_then(|price| price.currency.clone())
        .unwrap_or_else(|| "EUR".to_string());
    PriceOutcome::Priced { amount, currency }
}

enum AttemptError {
    Auth,
    Quota,
    Transient(String),
}

/// Marketplace price lookup with bounded retry and credential refresh.
pub struct PriceClient {
    browse: BrowseClient,
    credentials: CredentialCache,
    max_attempts: u32,
    retry_delay: Duration,
}

impl PriceClient {
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("PRICE_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(3);
        let retry_delay = std::env::var("PRICE_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1000);
        Self::new(
            BrowseClient::from_env(),
            CredentialCache::from_env(),
            max_attempts,
            Duration::from_millis(retry_delay),
        )
    }

    pub fn new(
        browse: BrowseClient,
        credentials: CredentialCache,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            browse,
            credentials,
            max_attempts,
            retry_delay,
        }
    }

    /// One lookup for an already-built query.
    ///
    /// 401 invalidates the cached credential and retries; 429 aborts with
    /// the quota outcome immediately; anything else transient retries after
    /// a flat delay until the attempt budget runs out.
    pub async fn fetch_query(&self, query: &str) -> PriceOutcome {
        for attempt in 1..=self.max_attempts {
            match self.attempt(query).await {
                Ok(outcome) => {
                    info!(
                        target = "poketrack.ebay",
                        query,
                        outcome = outcome.label(),
                        "price lookup settled"
                    );
                    crate::metrics::price_lookup_outcome(outcome.label());
                    return outcome;
                }
                Err(AttemptError::Quota) => {
                    warn!(target = "poketrack.ebay", query, "marketplace quota exhausted");
                    crate::metrics::price_lookup_outcome("quota_exceeded");
                    return PriceOutcome::QuotaExceeded;
                }
                Err(AttemptError::Auth) => {
                    warn!(
                        target = "poketrack.ebay",
                        query, attempt, "access token rejected, refreshing"
                    );
                    self.credentials.invalidate().await;
                }
                Err(AttemptError::Transient(message)) => {
                    warn!(
                        target = "poketrack.ebay",
                        query, attempt, error = %message, "search attempt failed"
                    );
                }
            }
            if attempt < self.max_attempts {
                sleep(self.retry_delay).await;
            }
        }
        crate::metrics::price_lookup_outcome("failed");
        PriceOutcome::Failed
    }

    async fn attempt(&self, query: &str) -> Result<PriceOutcome, AttemptError> {
        let token = self
            .credentials
            .get()
            .await
            .map_err(|err| AttemptError::Transient(err.to_string()))?;
        match self
            .browse
            .search_item_summaries(query, SEARCH_PAGE_SIZE, &token)
            .await
        {
            Ok(response) => Ok(aggregate_prices(&response)),
            Err(EbayBrowseError::Status(401)) => Err(AttemptError::Auth),
            Err(EbayBrowseError::Status(429)) => Err(AttemptError::Quota),
            Err(err) => Err(AttemptError::Transient(err.to_string())),
        }
    }
}
