use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized listing parameters a price lookup is keyed on.
#[derive(Getters, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[get = "pub"]
pub struct ListingQuery {
    item_name: String,
    model: Option<String>,
    brand: Option<String>,
    condition: Option<String>,
}

impl ListingQuery {
    pub fn new(
        item_name: String,
        model: Option<String>,
        brand: Option<String>,
        condition: Option<String>,
    ) -> Self {
        Self {
            item_name,
            model,
            brand,
            condition,
        }
    }

    /// Derive the canonical fingerprint for this query.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_query(self)
    }
}

/// Deterministic key identifying "the same logical request".
///
/// The cache and the deduplicator must agree on identity, so both are keyed
/// by this type. Canonical derivation: lower-cased, pipe-joined item name,
/// model, brand and condition, with empty strings for absent fields.
#[derive(Hash, Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_query(query: &ListingQuery) -> Self {
        let part = |field: &Option<String>| {
            field.as_deref().unwrap_or_default().to_lowercase()
        };

        Fingerprint(format!(
            "{}|{}|{}|{}",
            query.item_name().to_lowercase(),
            part(query.model()),
            part(query.brand()),
            part(query.condition()),
        ))
    }

    /// Build a fingerprint from a caller-provided raw key.
    ///
    /// The key is lower-cased so callers with their own keying scheme still
    /// agree with fingerprints derived from a [`ListingQuery`].
    pub fn from_raw(key: &str) -> Self {
        Fingerprint(key.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
