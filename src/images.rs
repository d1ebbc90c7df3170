use crate::catalog::SetCatalog;
use crate::http::build_probe_client;
use crate::models::CardRecord;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, warn};

/// Promo bucket ids probed in order when a card's local code is the generic
/// `PROMO` marker and no direct mapping exists.
const PROMO_SET_IDS: &[&str] = &[
    "dpp", "hsp", "bwp", "xyp", "smp", "swshp", "svp", "np", "basep",
];

enum Resolution {
    Found(String),
    NoMapping,
    NotFound,
}

/// Resolves card image URLs against the card-image CDN via HEAD probes.
pub struct ImageResolver {
    base_url: String,
    http: Client,
}

impl ImageResolver {
    pub fn from_env() -> Self {
        let base_url = std::env::var("IMAGE_CDN_ROOT")
            .unwrap_or_else(|_| "https://images.pokemontcg.io".to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: build_probe_client(),
        }
    }

    /// Attach `image_url` to a card, or a `reason` explaining why not.
    ///
    /// Cache-first: a card that already carries an image URL is returned
    /// untouched, without issuing any probe.
    pub async fn resolve(&self, catalog: &SetCatalog, mut card: CardRecord) -> CardRecord {
        if card.image_url.is_some() {
            return card;
        }
        match self.try_resolve(catalog, &card).await {
            Ok(Resolution::Found(url)) => {
                debug!(target = "poketrack.images", name = %card.name, url = %url, "image resolved");
                card.image_url = Some(url);
                card.reason = None;
            }
            Ok(Resolution::NoMapping) => {
                debug!(
                    target = "poketrack.images",
                    set_code = %card.set_code,
                    set = %card.set,
                    "no set mapping"
                );
                card.reason = Some("No set mapping".to_string());
            }
            Ok(Resolution::NotFound) => {
                debug!(target = "poketrack.images", name = %card.name, "image not found");
                card.reason = Some("Image not found".to_string());
            }
            Err(err) => {
                warn!(target = "poketrack.images", name = %card.name, error = %err, "probe failed");
                card.reason = Some(format!("Error: {err}"));
            }
        }
        card
    }

    async fn try_resolve(
        &self,
        catalog: &SetCatalog,
        card: &CardRecord,
    ) -> Result<Resolution, reqwest::Error> {
        let set_id = catalog.resolve(&card.set_code, &card.set);

        if set_id.is_none() && card.set_code == "PROMO" {
            let digits: String = card.number.chars().filter(char::is_ascii_digit).collect();
            for promo_id in PROMO_SET_IDS {
                let url = self.card_image_url(promo_id, &digits, true);
                if self.probe(&url).await? {
                    return Ok(Resolution::Found(url));
                }
            }
        }

        let Some(set_id) = set_id else {
            return Ok(Resolution::NoMapping);
        };

        let mut number = card.number.split('/').next().unwrap_or(&card.number);
        // Aquapolis prints a trailing "a" on some numbers the CDN omits
        if set_id == "ecard2" {
            number = number.strip_suffix('a').unwrap_or(number);
        }

        let hires = self.card_image_url(set_id, number, true);
        if self.probe(&hires).await? {
            return Ok(Resolution::Found(hires));
        }
        let plain = self.card_image_url(set_id, number, false);
        if self.probe(&plain).await? {
            return Ok(Resolution::Found(plain));
        }
        Ok(Resolution::NotFound)
    }

    fn card_image_url(&self, set_id: &str, number: &str, hires: bool) -> String {
        let suffix = if hires { "_hires" } else { "" };
        format!("{}/{set_id}/{number}{suffix}.png", self.base_url)
    }

    /// Presence check only; no image bytes are downloaded.
    async fn probe(&self, url: &str) -> Result<bool, reqwest::Error> {
        let response = self.http.head(url).send().await?;
        Ok(response.status().is_success())
    }
}

fn enrich_concurrency() -> usize {
    std::env::var("ENRICH_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(10)
}

/// Resolve a whole batch concurrently (capped), preserving input order.
/// Individual failures degrade to `reason` annotations and never fail the
/// batch.
pub async fn enrich_batch(
    resolver: &ImageResolver,
    catalog: &SetCatalog,
    cards: Vec<CardRecord>,
) -> Vec<CardRecord> {
    stream::iter(
        cards
            .into_iter()
            .map(|card| resolver.resolve(catalog, card)),
    )
    .buffered(enrich_concurrency())
    .collect()
    .await
}
