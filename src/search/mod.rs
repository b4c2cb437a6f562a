//! Search queries, results and pagination metadata.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::SearchConfig;
use crate::entity::{Model, Record};
use crate::error::{ApiError, Result};

/// Raw path/query parameters as received by the transport layer.
pub type Params = BTreeMap<String, String>;

/// Headers browsers may read from a paged response
pub const EXPOSED_HEADERS: &str =
    "X-Page, X-Per-Page, X-Total, X-Total-Pages, X-Prev-Page, X-Next-Page";

/// Parsed search request for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
    /// Field equals value, in the order the model declares its filters
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<String>,
}

impl SearchQuery {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page,
            per_page,
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Parse client query parameters.
    ///
    /// Recognises `page`, `perPage`, `orderBy` and the model's filter fields;
    /// anything else is ignored.
    pub fn from_params(params: &Params, model: Model, defaults: &SearchConfig) -> Result<Self> {
        let page = match params.get("page") {
            Some(raw) => parse_number("page", raw)?,
            None => 1,
        };
        if page < 1 {
            return Err(ApiError::Validation(
                "\"page\" must be greater than or equal to 1".to_string(),
            ));
        }

        let per_page = match params.get("perPage") {
            Some(raw) => parse_number("perPage", raw)?,
            None => defaults.default_per_page,
        };
        if per_page < 1 || per_page > defaults.max_per_page {
            return Err(ApiError::Validation(format!(
                "\"perPage\" must be between 1 and {}",
                defaults.max_per_page
            )));
        }

        let order_by = match params.get("orderBy") {
            Some(field) if is_field_name(field) => Some(field.clone()),
            Some(field) => {
                return Err(ApiError::Validation(format!(
                    "\"orderBy\" is not a field name: '{}'",
                    field
                )))
            }
            None => None,
        };

        let filters = model
            .filter_fields()
            .iter()
            .filter_map(|field| {
                params
                    .get(*field)
                    .map(|value| (field.to_string(), Value::String(value.clone())))
            })
            .collect();

        Ok(Self {
            page,
            per_page,
            filters,
            order_by,
        })
    }

    /// Offset of the first hit of this page
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::Validation(format!("\"{}\" must be a number", name)))
}

fn is_field_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One page of search results.
///
/// `from_db` marks a relational fallback; its `total` is the page length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub result: Vec<Record>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub from_db: bool,
}

/// Pagination metadata for an index-served result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl PageMeta {
    /// `None` for relational fallback results, which carry no meta.
    pub fn from_result(result: &SearchResult) -> Option<Self> {
        if result.from_db || result.per_page == 0 {
            return None;
        }
        Some(Self {
            page: result.page,
            per_page: result.per_page,
            total: result.total,
            total_pages: result.total.div_ceil(u64::from(result.per_page)),
        })
    }

    pub fn prev_page(&self) -> Option<u64> {
        (self.page > 1).then(|| u64::from(self.page) - 1)
    }

    pub fn next_page(&self) -> Option<u64> {
        (u64::from(self.page) < self.total_pages).then(|| u64::from(self.page) + 1)
    }

    /// Response headers for `result`, with `Link` URLs derived from
    /// `request_url`. Empty for relational fallback results.
    pub fn headers(result: &SearchResult, request_url: &Url) -> Vec<(&'static str, String)> {
        let Some(meta) = Self::from_result(result) else {
            return Vec::new();
        };

        let mut headers = Vec::new();
        if let Some(prev) = meta.prev_page() {
            headers.push(("X-Prev-Page", prev.to_string()));
        }
        if let Some(next) = meta.next_page() {
            headers.push(("X-Next-Page", next.to_string()));
        }
        headers.push(("X-Page", meta.page.to_string()));
        headers.push(("X-Per-Page", meta.per_page.to_string()));
        headers.push(("X-Total", meta.total.to_string()));
        headers.push(("X-Total-Pages", meta.total_pages.to_string()));

        if meta.total_pages > 0 {
            let mut links = vec![
                format!("<{}>; rel=\"first\"", page_link(request_url, 1)),
                format!("<{}>; rel=\"last\"", page_link(request_url, meta.total_pages)),
            ];
            if let Some(prev) = meta.prev_page() {
                links.push(format!("<{}>; rel=\"prev\"", page_link(request_url, prev)));
            }
            if let Some(next) = meta.next_page() {
                links.push(format!("<{}>; rel=\"next\"", page_link(request_url, next)));
            }
            headers.push(("Link", links.join(", ")));
        }

        headers.push(("Access-Control-Expose-Headers", EXPOSED_HEADERS.to_string()));
        headers
    }
}

/// `url` with its `page` query parameter set to `page`.
fn page_link(url: &Url, page: u64) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    match pairs.iter_mut().find(|(k, _)| k == "page") {
        Some(pair) => pair.1 = page.to_string(),
        None => pairs.push(("page".to_string(), page.to_string())),
    }

    let mut link = url.clone();
    link.query_pairs_mut().clear().extend_pairs(pairs);
    link.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_from_params_defaults() {
        let query = SearchQuery::from_params(&Params::new(), Model::Skill, &SearchConfig::default())
            .unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, 20);
        assert!(query.filters.is_empty());
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn test_from_params_picks_model_filters() {
        let raw = params(&[
            ("page", "3"),
            ("perPage", "5"),
            ("name", "Rust"),
            ("taxonomyId", "t1"),
            ("unknown", "x"),
            ("orderBy", "name"),
        ]);
        let query = SearchQuery::from_params(&raw, Model::Skill, &SearchConfig::default()).unwrap();
        assert_eq!(query.offset(), 10);
        assert_eq!(
            query.filters,
            vec![
                ("taxonomyId".to_string(), Value::from("t1")),
                ("name".to_string(), Value::from("Rust")),
            ]
        );
        assert_eq!(query.order_by.as_deref(), Some("name"));

        let taxonomy = SearchQuery::from_params(&raw, Model::Taxonomy, &SearchConfig::default())
            .unwrap();
        assert_eq!(taxonomy.filters.len(), 1);
    }

    #[test]
    fn test_from_params_rejects_bad_values() {
        let defaults = SearchConfig::default();
        for bad in [
            params(&[("page", "0")]),
            params(&[("page", "abc")]),
            params(&[("perPage", "0")]),
            params(&[("perPage", "1000")]),
            params(&[("orderBy", "name desc")]),
        ] {
            let err = SearchQuery::from_params(&bad, Model::Skill, &defaults).unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_headers_for_middle_page() {
        let result = SearchResult {
            result: Vec::new(),
            total: 25,
            page: 2,
            per_page: 10,
            from_db: false,
        };
        let url = Url::parse("http://api.test/v5/skills?name=Rust&page=2&perPage=10").unwrap();
        let headers = PageMeta::headers(&result, &url);

        assert_eq!(header(&headers, "X-Page"), Some("2"));
        assert_eq!(header(&headers, "X-Per-Page"), Some("10"));
        assert_eq!(header(&headers, "X-Total"), Some("25"));
        assert_eq!(header(&headers, "X-Total-Pages"), Some("3"));
        assert_eq!(header(&headers, "X-Prev-Page"), Some("1"));
        assert_eq!(header(&headers, "X-Next-Page"), Some("3"));
        assert_eq!(
            header(&headers, "Link"),
            Some(
                "<http://api.test/v5/skills?name=Rust&page=1&perPage=10>; rel=\"first\", \
                 <http://api.test/v5/skills?name=Rust&page=3&perPage=10>; rel=\"last\", \
                 <http://api.test/v5/skills?name=Rust&page=1&perPage=10>; rel=\"prev\", \
                 <http://api.test/v5/skills?name=Rust&page=3&perPage=10>; rel=\"next\""
            )
        );
        assert_eq!(header(&headers, "Access-Control-Expose-Headers"), Some(EXPOSED_HEADERS));
    }

    #[test]
    fn test_headers_edges() {
        let url = Url::parse("http://api.test/v5/taxonomies").unwrap();
        let first = SearchResult {
            total: 5,
            page: 1,
            per_page: 10,
            ..Default::default()
        };
        let headers = PageMeta::headers(&first, &url);
        assert_eq!(header(&headers, "X-Prev-Page"), None);
        assert_eq!(header(&headers, "X-Next-Page"), None);
        assert!(header(&headers, "Link").unwrap().contains("taxonomies?page=1"));

        let empty = SearchResult {
            page: 1,
            per_page: 10,
            ..Default::default()
        };
        let headers = PageMeta::headers(&empty, &url);
        assert_eq!(header(&headers, "X-Total-Pages"), Some("0"));
        assert_eq!(header(&headers, "Link"), None);

        let from_db = SearchResult {
            total: 5,
            page: 1,
            per_page: 10,
            from_db: true,
            ..Default::default()
        };
        assert!(PageMeta::headers(&from_db, &url).is_empty());
    }
}
