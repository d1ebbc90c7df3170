use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// One parsed want-list entry.
///
/// `image_url` and `price` stay `null` on the wire until enrichment fills
/// them in; `reason` only appears when image resolution failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub set: String,
    #[serde(default)]
    pub set_code: String,
    #[serde(default)]
    pub set_image_url: Option<String>,
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub rarity: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub total_cards: usize,
    pub cards: Vec<CardRecord>,
}

#[derive(Debug, Deserialize)]
pub struct EnrichRequest {
    pub cards: Vec<CardRecord>,
}

#[derive(Debug, Serialize)]
pub struct EnrichResponse {
    pub cards: Vec<CardRecord>,
}

/// `card` is optional so a missing field maps to a 400, not a decode error.
#[derive(Debug, Deserialize)]
pub struct FetchPriceRequest {
    #[serde(default)]
    pub card: Option<CardRecord>,
}

#[derive(Debug, Serialize)]
pub struct FetchPriceResponse {
    pub price: String,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: Option<String>,
}
