use crate::models::CardRecord;
use once_cell::sync::Lazy;
use regex::Regex;

static SET_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"minis/([A-Z0-9]+)\.png").expect("set code regex"));
static SET_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[u\](.+?)\[/u\]").expect("set header regex"));
static CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":(\w+.*?):\s+([0-9A-Za-z/]+)\s+(.+)").expect("card regex"));
static IMG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[IMG\](https://[^\]]+)\[/IMG\]").expect("img regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Rarity tokens as they appear in the export, mapped to display names.
/// Unknown tokens pass through verbatim.
const RARITY_VOCABULARY: &[(&str, &str)] = &[
    ("holo", "Holo"),
    ("rare", "Rare"),
    ("ultra", "Ultra Rare"),
    ("unco", "Uncommon"),
    ("commune", "Common"),
    ("illustration rare", "Illustration Rare"),
    ("illustration speciale rare", "Special Illustration Rare"),
];

pub fn normalize_rarity(token: &str) -> String {
    let key = token.trim().to_lowercase();
    RARITY_VOCABULARY
        .iter()
        .find(|(raw, _)| *raw == key)
        .map(|(_, display)| (*display).to_string())
        .unwrap_or(key)
}

/// Expansion badge embedded in a line, `[IMG]https://…[/IMG]`. The short set
/// code is only present when the URL has the expected `minis/<CODE>.png`
/// shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: String,
    pub set_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Legend/footer marker; everything after it is ignored.
    Legend,
    SetHeader(String),
    Card {
        rarity_token: String,
        number: String,
        name: String,
    },
    /// The line carried only an expansion badge.
    ImageRef,
    Unrecognized,
}

/// A classified source line. The badge travels next to the kind because a
/// set-header line usually carries its badge on the same line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    pub image: Option<ImageRef>,
    pub kind: LineKind,
}

pub fn classify_line(line: &str) -> ClassifiedLine {
    if line.contains("Légende :") || line.contains("Legende :") {
        return ClassifiedLine {
            image: None,
            kind: LineKind::Legend,
        };
    }

    let image = IMG_RE.captures(line).map(|captures| {
        let url = captures[1].to_string();
        let set_code = SET_CODE_RE
            .captures(&url)
            .map(|code| code[1].to_string());
        ImageRef { url, set_code }
    });

    if let Some(header) = SET_HEADER_RE.captures(line) {
        return ClassifiedLine {
            image,
            kind: LineKind::SetHeader(header[1].trim().to_string()),
        };
    }

    if let Some(card) = CARD_RE.captures(line) {
        return ClassifiedLine {
            image,
            kind: LineKind::Card {
                rarity_token: card[1].to_string(),
                number: card[2].to_string(),
                name: WHITESPACE_RE.replace_all(&card[3], " ").trim().to_string(),
            },
        };
    }

    let kind = if image.is_some() {
        LineKind::ImageRef
    } else {
        LineKind::Unrecognized
    };
    ClassifiedLine { image, kind }
}

/// Scan a want-list export into card records, in order of appearance.
///
/// Card lines inherit the most recent set header and badge; card lines seen
/// before any header are dropped. Unrecognized lines are skipped, and text
/// with no recognizable lines yields an empty list rather than an error.
pub fn parse_card_list(content: &str) -> Vec<CardRecord> {
    let mut cards = Vec::new();
    let mut current_set = String::new();
    let mut set_code = String::new();
    let mut set_image_url: Option<String> = None;

    for line in content.lines() {
        let classified = classify_line(line);
        if let Some(image) = classified.image {
            set_image_url = Some(image.url);
            if let Some(code) = image.set_code {
                set_code = code;
            }
        }
        match classified.kind {
            LineKind::Legend => break,
            LineKind::SetHeader(name) => current_set = name,
            LineKind::Card {
                rarity_token,
                number,
                name,
            } if !current_set.is_empty() => {
                cards.push(CardRecord {
                    set: current_set.clone(),
                    set_code: set_code.clone(),
                    set_image_url: set_image_url.clone(),
                    number,
                    name,
                    rarity: normalize_rarity(&rarity_token),
                    image_url: None,
                    price: None,
                    reason: None,
                });
            }
            _ => {}
        }
    }

    cards
}
