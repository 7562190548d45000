//! Canonical key construction, validation and per-domain TTL policy
//!
//! This module provides:
//! - Key builder and validation rules shared by every manager
//! - Parsing of keys back into their segments for diagnostics
//! - Batch key generation from type tags and id sequences
//! - The per-domain TTL table

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Maximum rendered key length in octets
pub const MAX_KEY_LEN: usize = 250;

/// Validate a rendered cache key
///
/// Keys must be non-empty, at most [`MAX_KEY_LEN`] octets, and free of
/// whitespace characters.
pub fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("empty key".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CacheError::InvalidKey(format!(
            "key exceeds {} octets: {}",
            MAX_KEY_LEN,
            key.len()
        )));
    }
    if key.contains([' ', '\t', '\r', '\n']) {
        return Err(CacheError::InvalidKey(format!(
            "key contains whitespace: {:?}",
            key
        )));
    }
    Ok(())
}

/// Incremental key builder
///
/// Appends segments and renders `<prefix>:<segment>[:<segment>...]`.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    segments: Vec<String>,
}

impl KeyBuilder {
    /// Start a builder with the configured prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            segments: Vec::new(),
        }
    }

    /// Append a segment
    pub fn segment(mut self, segment: impl ToString) -> Self {
        self.segments.push(segment.to_string());
        self
    }

    /// Render and validate the key
    pub fn build(self) -> CacheResult<String> {
        let mut key = self.prefix;
        for segment in &self.segments {
            if segment.is_empty() {
                return Err(CacheError::InvalidKey("empty key segment".to_string()));
            }
            if !key.is_empty() {
                key.push(':');
            }
            key.push_str(segment);
        }
        validate_key(&key)?;
        Ok(key)
    }
}

/// A key decomposed into its segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    /// Configured prefix (first segment)
    pub prefix: String,
    /// Entity type tag (second segment)
    pub key_type: String,
    /// Entity id (third segment, when present)
    pub id: Option<String>,
    /// Remaining qualifier (fourth segment onward, when present)
    pub subtype: Option<String>,
    /// Total segment count
    pub parts_count: usize,
}

/// Decompose a key into `{prefix, type, id, subtype}` for diagnostics
pub fn parse_key(key: &str) -> CacheResult<ParsedKey> {
    validate_key(key)?;
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() < 2 {
        return Err(CacheError::InvalidKey(format!(
            "key has no type segment: {}",
            key
        )));
    }
    Ok(ParsedKey {
        prefix: parts[0].to_string(),
        key_type: parts[1].to_string(),
        id: parts.get(2).map(|s| s.to_string()),
        subtype: if parts.len() > 3 {
            Some(parts[3..].join(":"))
        } else {
            None
        },
        parts_count: parts.len(),
    })
}

/// Pagination qualifier for category listing keys
#[derive(Debug, Clone, Default)]
pub struct CategoryPage {
    /// Page number
    pub page: u32,
    /// Page size
    pub size: u32,
    /// Sort order tag
    pub sort: Option<String>,
    /// Hash of the active filter set
    pub filter_hash: Option<String>,
}

/// Canonical key factory for every cached entity
///
/// Constructed once at bootstrap and passed by reference into the managers.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    prefix: String,
}

impl KeyRegistry {
    /// Create a registry rendering keys under `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn render(&self, tail: &str) -> String {
        if self.prefix.is_empty() {
            tail.to_string()
        } else {
            format!("{}:{}", self.prefix, tail)
        }
    }

    /// `<prefix>:product:<id>`
    pub fn product(&self, id: u64) -> String {
        self.render(&format!("product:{}", id))
    }

    /// `<prefix>:stock:<id>`
    pub fn stock(&self, id: u64) -> String {
        self.render(&format!("stock:{}", id))
    }

    /// `<prefix>:price:<id>`
    pub fn price(&self, id: u64) -> String {
        self.render(&format!("price:{}", id))
    }

    /// `<prefix>:cart:<user_id>`
    pub fn cart(&self, user_id: u64) -> String {
        self.render(&format!("cart:{}", user_id))
    }

    /// `<prefix>:user:session:<token>`
    pub fn session(&self, token: &str) -> String {
        self.render(&format!("user:session:{}", token))
    }

    /// `<prefix>:category:<id>:products[:page_<p>_<size>[:sort:<s>][:filter:<hash>]]`
    pub fn category_products(&self, category_id: u64, page: Option<&CategoryPage>) -> String {
        let mut tail = format!("category:{}:products", category_id);
        if let Some(p) = page {
            let _ = write!(tail, ":page_{}_{}", p.page, p.size);
            if let Some(sort) = &p.sort {
                let _ = write!(tail, ":sort:{}", sort);
            }
            if let Some(hash) = &p.filter_hash {
                let _ = write!(tail, ":filter:{}", hash);
            }
        }
        self.render(&tail)
    }

    /// `<prefix>:user:preference:<user_id>`
    pub fn user_preference(&self, user_id: u64) -> String {
        self.render(&format!("user:preference:{}", user_id))
    }

    /// `<prefix>:hot:products:<type>:<period>`
    pub fn hot_products(&self, kind: &str, period: &str) -> String {
        self.render(&format!("hot:products:{}:{}", kind, period))
    }

    /// `<prefix>:lock:<resource>`
    pub fn lock(&self, resource: &str) -> String {
        self.render(&format!("lock:{}", resource))
    }

    /// `<prefix>:counter:<type>:<id>`
    pub fn counter(&self, kind: &str, id: u64) -> String {
        self.render(&format!("counter:{}:{}", kind, id))
    }

    /// `<prefix>:bloom:cache:protection`
    pub fn bloom(&self) -> String {
        self.render("bloom:cache:protection")
    }

    /// `<prefix>:low_stock_alerts`
    pub fn low_stock_alerts(&self) -> String {
        self.render("low_stock_alerts")
    }

    /// `<prefix>:price_history:<product_id>`
    pub fn price_history(&self, product_id: u64) -> String {
        self.render(&format!("price_history:{}", product_id))
    }

    /// `<prefix>:promotion_products`
    pub fn promotion_products(&self) -> String {
        self.render("promotion_products")
    }

    /// `<prefix>:out_of_stock_products`
    pub fn out_of_stock_products(&self) -> String {
        self.render("out_of_stock_products")
    }

    /// `<prefix>:hot_scores:<type>`
    pub fn hot_scores(&self, kind: &str) -> String {
        self.render(&format!("hot_scores:{}", kind))
    }

    /// Batch key generation from a type tag and an id sequence
    ///
    /// `result[i]` is the key for `ids[i]`. An empty id list returns an
    /// empty vector. Unknown tags fail with `InvalidKey`.
    pub fn batch(&self, tag: &str, ids: &[u64]) -> CacheResult<Vec<String>> {
        let template: fn(&Self, u64) -> String = match tag {
            "product" => Self::product,
            "stock" => Self::stock,
            "price" => Self::price,
            "cart" => Self::cart,
            "price_history" => Self::price_history,
            _ => {
                return Err(CacheError::InvalidKey(format!(
                    "unknown batch key tag: {}",
                    tag
                )))
            }
        };
        Ok(ids.iter().map(|id| template(self, *id)).collect())
    }
}

/// Per-domain TTL table
///
/// Seeded with the production defaults; unknown tags fall back to the
/// default. Writes must precede readers, which bootstrap enforces.
#[derive(Debug, Clone)]
pub struct TtlRegistry {
    table: HashMap<String, Duration>,
    default: Duration,
}

impl Default for TtlRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlRegistry {
    /// Build the table with the seeded defaults
    pub fn new() -> Self {
        let mut table = HashMap::new();
        let minutes = |m: u64| Duration::from_secs(m * 60);
        table.insert("product".to_string(), minutes(30));
        table.insert("stock".to_string(), minutes(10));
        table.insert("price".to_string(), minutes(15));
        table.insert("cart".to_string(), minutes(24 * 60));
        table.insert("session".to_string(), minutes(2 * 60));
        table.insert("token".to_string(), minutes(30));
        table.insert("stats".to_string(), minutes(5));
        table.insert("hot".to_string(), minutes(60));
        table.insert("counter".to_string(), minutes(60));
        table.insert("lock".to_string(), Duration::from_secs(30));
        table.insert("version".to_string(), minutes(24 * 60));
        table.insert("warmup".to_string(), minutes(10));
        Self {
            table,
            default: minutes(30),
        }
    }

    /// TTL for a type tag; unknown tags yield the default
    pub fn ttl_for(&self, tag: &str) -> Duration {
        self.table.get(tag).copied().unwrap_or(self.default)
    }

    /// Override the TTL for a tag
    pub fn set(&mut self, tag: impl Into<String>, ttl: Duration) {
        self.table.insert(tag.into(), ttl);
    }

    /// TTL for the type segment of a rendered key
    pub fn ttl_for_key(&self, key: &str) -> Duration {
        match parse_key(key) {
            Ok(parsed) => self.ttl_for(&parsed.key_type),
            Err(_) => self.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate_rejects_bad_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("has\ttab").is_err());
        assert!(validate_key("has\nnewline").is_err());
        assert!(validate_key(&"x".repeat(251)).is_err());
        assert!(validate_key(&"x".repeat(250)).is_ok());
        assert!(validate_key("mall:product:42").is_ok());
    }

    #[test]
    fn test_builder_renders_segments() {
        let key = KeyBuilder::new("mall")
            .segment("product")
            .segment(42u64)
            .build()
            .unwrap();
        assert_eq!(key, "mall:product:42");
    }

    #[test]
    fn test_builder_rejects_empty_segment() {
        let result = KeyBuilder::new("mall").segment("").build();
        assert!(matches!(result, Err(CacheError::InvalidKey(_))));
    }

    #[test]
    fn test_parse_roundtrip() {
        let parsed = parse_key("mall:user:session:abc123").unwrap();
        assert_eq!(parsed.prefix, "mall");
        assert_eq!(parsed.key_type, "user");
        assert_eq!(parsed.id.as_deref(), Some("session"));
        assert_eq!(parsed.subtype.as_deref(), Some("abc123"));
        assert_eq!(parsed.parts_count, 4);
    }

    #[test]
    fn test_registry_templates() {
        let registry = KeyRegistry::new("mall");
        assert_eq!(registry.product(42), "mall:product:42");
        assert_eq!(registry.session("tok"), "mall:user:session:tok");
        assert_eq!(registry.lock("stock:7"), "mall:lock:stock:7");
        assert_eq!(registry.counter("view", 9), "mall:counter:view:9");
        assert_eq!(registry.bloom(), "mall:bloom:cache:protection");
        assert_eq!(registry.hot_products("sold", "7d"), "mall:hot:products:sold:7d");
    }

    #[test]
    fn test_category_page_qualifiers() {
        let registry = KeyRegistry::new("mall");
        assert_eq!(
            registry.category_products(3, None),
            "mall:category:3:products"
        );
        let page = CategoryPage {
            page: 2,
            size: 20,
            sort: Some("price_asc".to_string()),
            filter_hash: Some("a1b2".to_string()),
        };
        assert_eq!(
            registry.category_products(3, Some(&page)),
            "mall:category:3:products:page_2_20:sort:price_asc:filter:a1b2"
        );
    }

    #[test]
    fn test_batch_preserves_order_and_empty_input() {
        let registry = KeyRegistry::new("mall");
        let keys = registry.batch("product", &[3, 1, 2]).unwrap();
        assert_eq!(keys, vec!["mall:product:3", "mall:product:1", "mall:product:2"]);

        let keys = registry.batch("product", &[]).unwrap();
        assert!(keys.is_empty());

        assert!(registry.batch("nope", &[1]).is_err());
    }

    #[test]
    fn test_ttl_table_defaults() {
        let ttls = TtlRegistry::new();
        assert_eq!(ttls.ttl_for("product"), Duration::from_secs(1800));
        assert_eq!(ttls.ttl_for("stock"), Duration::from_secs(600));
        assert_eq!(ttls.ttl_for("cart"), Duration::from_secs(86_400));
        assert_eq!(ttls.ttl_for("lock"), Duration::from_secs(30));
        assert_eq!(ttls.ttl_for("unknown"), Duration::from_secs(1800));
    }

    #[test]
    fn test_ttl_table_override() {
        let mut ttls = TtlRegistry::new();
        ttls.set("product", Duration::from_secs(60));
        assert_eq!(ttls.ttl_for("product"), Duration::from_secs(60));
        assert_eq!(ttls.ttl_for_key("mall:product:42"), Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn prop_batch_maps_ids_in_order(ids in proptest::collection::vec(0u64..1_000_000, 0..64)) {
            let registry = KeyRegistry::new("mall");
            let keys = registry.batch("stock", &ids).unwrap();
            prop_assert_eq!(keys.len(), ids.len());
            for (key, id) in keys.iter().zip(&ids) {
                prop_assert_eq!(key, &format!("mall:stock:{}", id));
            }
        }

        #[test]
        fn prop_built_keys_always_validate(segments in proptest::collection::vec("[a-z0-9_]{1,12}", 1..6)) {
            let mut builder = KeyBuilder::new("mall");
            for segment in &segments {
                builder = builder.segment(segment);
            }
            let key = builder.build().unwrap();
            prop_assert!(validate_key(&key).is_ok());
        }
    }
}
