//! Site descriptors: what to fetch and how to turn raw markup into records.
//!
//! A [`SiteDescriptor`] tells the engine where a site's catalog lives, whether
//! the site is expected to defend itself, and which extraction strategy pulls
//! records out of the list page and out of each item page. Strategies are a
//! tagged variant validated at construction and dispatched once per call,
//! never via runtime type inspection.

use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::fetch::transport::TransportFetcher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// A fetchable location, immutable per call.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    /// Registrable host, used as the credential-store key.
    pub domain: String,
    /// Caller-supplied hint that the site defends against automation.
    pub expects_defense: bool,
}

impl Target {
    /// Parse and structurally validate a target URL. A malformed target is a
    /// terminal error; retrying cannot fix it.
    pub fn new(url: &str, expects_defense: bool) -> Result<Self, FetchError> {
        let parsed = Url::parse(url)
            .map_err(|e| FetchError::terminal(format!("malformed target url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::terminal(format!(
                "unsupported scheme '{}' in target url '{url}'",
                parsed.scheme()
            )));
        }
        let domain = parsed
            .host_str()
            .ok_or_else(|| FetchError::terminal(format!("target url '{url}' has no host")))?
            .to_string();
        Ok(Self {
            url: url.to_string(),
            domain,
            expects_defense,
        })
    }
}

/// One raw record pulled out of a list or item page before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source-side identifier (chapter number, page ordinal, ...), as scraped.
    pub id: String,
    /// Source locator, usually an absolute URL.
    pub locator: String,
}

/// A record after normalization: canonical id plus destination filename key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    /// Fixed-width, zero-padded key. Lexicographic order on these keys must
    /// equal the intended numeric acquisition order.
    pub file_key: String,
    pub locator: String,
}

/// Pure mapping from a raw record to its canonical form. Returning `None`
/// drops the record (navigation rows, ads, duplicates).
pub type Normalizer = Arc<dyn Fn(&RawRecord) -> Option<NormalizedRecord> + Send + Sync>;

/// Externally-supplied markup parser: full page markup in, records out.
pub type CustomParser = Arc<dyn Fn(&str) -> anyhow::Result<Vec<RawRecord>> + Send + Sync>;

/// Site-provided API extraction given a prepared transport client.
#[async_trait]
pub trait ApiExtractor: Send + Sync {
    async fn extract(
        &self,
        client: &TransportFetcher,
        target: &Target,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

/// How records are extracted from a fetched page.
#[derive(Clone)]
pub enum ExtractionMethod {
    /// Evaluate a script in a rendered page and read its structured result.
    Script {
        code: String,
        /// CSS selector that must be visible before the script runs; falls
        /// back to a generic document-ready wait when absent.
        await_selector: Option<String>,
    },
    /// Select elements from raw markup; reads the given attribute, or the
    /// element text when no attribute is named.
    Selector {
        selector: scraper::Selector,
        attribute: Option<String>,
    },
    /// Externally-supplied parser over raw markup.
    Custom(CustomParser),
    /// Site API call with a prepared transport client.
    Api(Arc<dyn ApiExtractor>),
}

impl ExtractionMethod {
    /// Script-based extraction. The script must evaluate to a JSON array; see
    /// [`records_from_value`] for the accepted shapes.
    pub fn script(
        code: impl Into<String>,
        await_selector: Option<String>,
    ) -> Result<Self, FetchError> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(FetchError::terminal("extraction script is empty"));
        }
        if let Some(sel) = &await_selector {
            if sel.trim().is_empty() {
                return Err(FetchError::terminal("await selector is empty"));
            }
        }
        Ok(Self::Script {
            code,
            await_selector,
        })
    }

    /// Markup-selector extraction. The selector is parsed here so a bad
    /// descriptor fails at construction, not mid-run.
    pub fn selector(selector: &str, attribute: Option<String>) -> Result<Self, FetchError> {
        let parsed = scraper::Selector::parse(selector)
            .map_err(|e| FetchError::terminal(format!("invalid selector '{selector}': {e}")))?;
        Ok(Self::Selector {
            selector: parsed,
            attribute,
        })
    }

    pub fn custom(parser: CustomParser) -> Self {
        Self::Custom(parser)
    }

    pub fn api(extractor: Arc<dyn ApiExtractor>) -> Self {
        Self::Api(extractor)
    }
}

impl fmt::Debug for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script { await_selector, .. } => f
                .debug_struct("Script")
                .field("await_selector", await_selector)
                .finish_non_exhaustive(),
            Self::Selector { attribute, .. } => f
                .debug_struct("Selector")
                .field("attribute", attribute)
                .finish_non_exhaustive(),
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Api(_) => f.write_str("Api(..)"),
        }
    }
}

/// Extraction strategy plus the normalizer applied to its records.
#[derive(Clone)]
pub struct Extraction {
    pub method: ExtractionMethod,
    pub normalize: Normalizer,
}

impl Extraction {
    pub fn new(method: ExtractionMethod, normalize: Normalizer) -> Self {
        Self { method, normalize }
    }
}

/// Everything the engine needs to know about one site.
#[derive(Clone)]
pub struct SiteDescriptor {
    pub domain: String,
    /// Hint that fetches against this site should apply stored bypass
    /// credentials when available.
    pub needs_bypass: bool,
    /// Extraction for the catalog list page.
    pub list: Extraction,
    /// Extraction for each item's sub-resource list.
    pub assets: Extraction,
}

impl SiteDescriptor {
    pub fn new(
        domain: impl Into<String>,
        needs_bypass: bool,
        list: Extraction,
        assets: Extraction,
    ) -> Result<Self, FetchError> {
        let domain = domain.into();
        if domain.trim().is_empty() {
            return Err(FetchError::terminal("site descriptor has no domain"));
        }
        Ok(Self {
            domain,
            needs_bypass,
            list,
            assets,
        })
    }
}

/// Zero-pad `n` to `width` digits. Keys built this way sort
/// lexicographically in numeric order, which is what the per-item loop and
/// the archive member order rely on.
pub fn zero_padded(n: u64, width: usize) -> String {
    format!("{n:0width$}")
}

/// Build a `prefix + zero-padded ordinal` key, e.g. `item` + 7 → `item007`.
pub fn padded_key(prefix: &str, n: u64, width: usize) -> String {
    format!("{prefix}{}", zero_padded(n, width))
}

/// Normalize raw records into the item set: sorted map from filename key to
/// source locator. Order derives solely from the keys, never from the order
/// the source yielded records in.
pub fn build_item_set(records: &[RawRecord], normalize: &Normalizer) -> BTreeMap<String, String> {
    let mut items = BTreeMap::new();
    for record in records {
        if let Some(normalized) = normalize(record) {
            items.insert(normalized.file_key, normalized.locator);
        }
    }
    items
}

/// Interpret a script-evaluation result as records.
///
/// Accepted shapes: an array of strings (locators; ids are 1-based
/// positions), or an array of objects with a `url`/`locator`/`src` field and
/// an optional `id`/`key` field.
pub fn records_from_value(value: &serde_json::Value) -> Result<Vec<RawRecord>, FetchError> {
    let array = value
        .as_array()
        .ok_or_else(|| FetchError::terminal("script result is not an array"))?;

    let mut records = Vec::with_capacity(array.len());
    for (index, entry) in array.iter().enumerate() {
        match entry {
            serde_json::Value::String(locator) => records.push(RawRecord {
                id: (index + 1).to_string(),
                locator: locator.clone(),
            }),
            serde_json::Value::Object(map) => {
                let locator = ["url", "locator", "src"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
                    .ok_or_else(|| {
                        FetchError::terminal(format!(
                            "script result entry {index} has no url/locator/src field"
                        ))
                    })?;
                let id = ["id", "key"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| (index + 1).to_string());
                records.push(RawRecord {
                    id,
                    locator: locator.to_string(),
                });
            }
            other => {
                return Err(FetchError::terminal(format!(
                    "script result entry {index} has unsupported shape: {other}"
                )))
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_normalizer() -> Normalizer {
        Arc::new(|r: &RawRecord| {
            let n: u64 = r.id.parse().ok()?;
            Some(NormalizedRecord {
                id: r.id.clone(),
                file_key: padded_key("item", n, 3),
                locator: r.locator.clone(),
            })
        })
    }

    #[test]
    fn test_target_rejects_malformed_url() {
        assert!(matches!(
            Target::new("not a url", false),
            Err(FetchError::Terminal { .. })
        ));
        assert!(matches!(
            Target::new("ftp://example.com/x", false),
            Err(FetchError::Terminal { .. })
        ));
    }

    #[test]
    fn test_target_extracts_domain() {
        let t = Target::new("https://reader.example.com/series/42", true).unwrap();
        assert_eq!(t.domain, "reader.example.com");
        assert!(t.expects_defense);
    }

    #[test]
    fn test_padded_keys_sort_numerically() {
        let keys: Vec<String> = [2u64, 100, 11, 1, 20]
            .iter()
            .map(|n| padded_key("item", *n, 3))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(
            sorted,
            vec!["item001", "item002", "item011", "item020", "item100"]
        );
    }

    #[test]
    fn test_selector_validation() {
        assert!(ExtractionMethod::selector("div.page img", Some("src".into())).is_ok());
        assert!(matches!(
            ExtractionMethod::selector("div..[", None),
            Err(FetchError::Terminal { .. })
        ));
    }

    #[test]
    fn test_script_validation() {
        assert!(ExtractionMethod::script("return []", None).is_ok());
        assert!(ExtractionMethod::script("   ", None).is_err());
        assert!(ExtractionMethod::script("x", Some("  ".into())).is_err());
    }

    #[test]
    fn test_item_set_order_independent_of_source_order() {
        // Source yields items in arbitrary order; the map must not care.
        let records = vec![
            RawRecord {
                id: "10".into(),
                locator: "https://e.com/10".into(),
            },
            RawRecord {
                id: "2".into(),
                locator: "https://e.com/2".into(),
            },
            RawRecord {
                id: "bogus".into(),
                locator: "https://e.com/x".into(),
            },
        ];
        let items = build_item_set(&records, &identity_normalizer());
        let keys: Vec<&String> = items.keys().collect();
        assert_eq!(keys, vec!["item002", "item010"]);
        assert_eq!(items["item002"], "https://e.com/2");
    }

    #[test]
    fn test_records_from_string_array() {
        let value = serde_json::json!(["https://e.com/p1.jpg", "https://e.com/p2.jpg"]);
        let records = records_from_value(&value).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[1].locator, "https://e.com/p2.jpg");
    }

    #[test]
    fn test_records_from_object_array() {
        let value = serde_json::json!([
            {"id": "7", "url": "https://e.com/7"},
            {"src": "https://e.com/8"},
        ]);
        let records = records_from_value(&value).unwrap();
        assert_eq!(records[0].id, "7");
        assert_eq!(records[1].id, "2");
        assert_eq!(records[1].locator, "https://e.com/8");
    }

    #[test]
    fn test_records_from_bad_shapes() {
        assert!(records_from_value(&serde_json::json!("nope")).is_err());
        assert!(records_from_value(&serde_json::json!([{"name": "no locator"}])).is_err());
        assert!(records_from_value(&serde_json::json!([42])).is_err());
    }
}
