use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Hand-curated name→id mappings the reference catalog cannot derive:
/// promo buckets and French naming inconsistencies.
const SPECIAL_SET_NAMES: &[(&str, &str)] = &[
    ("promos black star dp", "dpp"),
    ("ex : rouge feu & vert feuille", "ex6"),
    ("ex : team magma vs team aqua", "ex4"),
    ("black star nintendo", "np"),
    ("aquapolis", "ecard2"),
    ("box topper", "bp"),
];

#[derive(Debug, Deserialize)]
struct SetEntry {
    id: String,
    name: String,
    #[serde(default, rename = "ptcgoCode")]
    ptcgo_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetFile {
    data: Vec<SetEntry>,
}

/// Lookup from local short set codes (and set names) to the external
/// catalog's set ids. Built once at startup from the embedded reference
/// snapshot; read-only afterwards.
#[derive(Debug)]
pub struct SetCatalog {
    by_code: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl SetCatalog {
    pub fn from_reference() -> Result<Self, serde_json::Error> {
        Self::from_json(include_str!("../data/sets.json"))
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: SetFile = serde_json::from_str(raw)?;
        let mut by_code = HashMap::new();
        let mut by_name = HashMap::new();
        for entry in file.data {
            if let Some(code) = entry.ptcgo_code.filter(|code| !code.is_empty()) {
                by_code.insert(code, entry.id.clone());
            }
            by_name.insert(entry.name.to_lowercase(), entry.id);
        }
        info!(
            target = "poketrack.catalog",
            codes = by_code.len(),
            names = by_name.len(),
            "loaded set catalog"
        );
        Ok(Self { by_code, by_name })
    }

    /// Resolve a card's external set id: short code first, then the curated
    /// special-case names, then the generic name table.
    pub fn resolve(&self, set_code: &str, set_name: &str) -> Option<&str> {
        if let Some(id) = self.by_code.get(set_code) {
            return Some(id.as_str());
        }
        if set_name.is_empty() {
            return None;
        }
        let name_key = set_name.to_lowercase();
        SPECIAL_SET_NAMES
            .iter()
            .find(|(name, _)| *name == name_key)
            .map(|(_, id)| *id)
            .or_else(|| self.by_name.get(&name_key).map(String::as_str))
    }
}
