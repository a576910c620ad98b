use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{ItemId, PropertyId};
use crate::error::SyncError;

const DEFAULT_ENDPOINT: &str = "https://query.wikidata.org/sparql";

/// Outcome of a single (property, value) lookup. Zero and ambiguous results
/// are ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    One(ItemId),
    None,
    Ambiguous(usize),
}

/// Read access to the knowledge base, keyed by property/value pairs.
pub trait QueryClient: Send + Sync {
    /// `SELECT DISTINCT ?item WHERE { ?item wdt:<property> "<value>" }`.
    fn find_by_property_value(
        &self,
        property: &PropertyId,
        value: &str,
    ) -> Result<LookupOutcome, SyncError>;

    /// All (item, external value) pairs carrying the given property.
    fn values_for_property(&self, property: &PropertyId)
    -> Result<Vec<(ItemId, String)>, SyncError>;

    /// Bulk reverse lookup restricted to `values`, for VALUES-style queries.
    fn items_for_values(
        &self,
        property: &PropertyId,
        values: &[String],
    ) -> Result<BTreeMap<String, ItemId>, SyncError>;

    /// Display label of an item in the given language.
    fn label_of(&self, item: &ItemId, language: &str) -> Result<Option<String>, SyncError>;
}

#[derive(Clone)]
pub struct SparqlHttpClient {
    client: Client,
    endpoint: String,
}

impl SparqlHttpClient {
    pub fn new() -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cpx-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::SparqlHttp(err.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/sparql-results+json"),
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/sparql-query"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::SparqlHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn execute(&self, query: &str) -> Result<SparqlResponse, SyncError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = self.client.post(&self.endpoint).body(query.to_string()).send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        std::thread::sleep(Duration::from_millis(
                            BASE_DELAY_MS * (attempt as u64 + 1),
                        ));
                        attempt += 1;
                        continue;
                    }
                    if !resp.status().is_success() {
                        let message = resp
                            .text()
                            .unwrap_or_else(|_| "SPARQL request failed".to_string());
                        return Err(SyncError::SparqlStatus { status, message });
                    }
                    return resp
                        .json()
                        .map_err(|err| SyncError::SparqlHttp(err.to_string()));
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && (err.is_timeout() || err.is_connect()) {
                        std::thread::sleep(Duration::from_millis(
                            BASE_DELAY_MS * (attempt as u64 + 1),
                        ));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::SparqlHttp(err.to_string()));
                }
            }
        }
    }
}

impl QueryClient for SparqlHttpClient {
    fn find_by_property_value(
        &self,
        property: &PropertyId,
        value: &str,
    ) -> Result<LookupOutcome, SyncError> {
        let query = format!(
            "SELECT DISTINCT ?item WHERE {{ ?item wdt:{} \"{}\" }}",
            property,
            escape_literal(value)
        );
        let response = self.execute(&query)?;
        let mut items = Vec::new();
        for binding in &response.results.bindings {
            if let Some(item) = binding.entity("item") {
                items.push(item);
            }
        }
        Ok(match items.len() {
            0 => LookupOutcome::None,
            1 => LookupOutcome::One(items.remove(0)),
            count => LookupOutcome::Ambiguous(count),
        })
    }

    fn values_for_property(
        &self,
        property: &PropertyId,
    ) -> Result<Vec<(ItemId, String)>, SyncError> {
        let query = format!("SELECT ?item ?value WHERE {{ ?item wdt:{property} ?value }}");
        let response = self.execute(&query)?;
        let mut pairs = Vec::new();
        for binding in &response.results.bindings {
            let item = binding.entity("item");
            let value = binding.literal("value");
            if let (Some(item), Some(value)) = (item, value) {
                pairs.push((item, value.to_string()));
            }
        }
        Ok(pairs)
    }

    fn items_for_values(
        &self,
        property: &PropertyId,
        values: &[String],
    ) -> Result<BTreeMap<String, ItemId>, SyncError> {
        if values.is_empty() {
            return Ok(BTreeMap::new());
        }
        let quoted = values
            .iter()
            .map(|value| format!("\"{}\"", escape_literal(value)))
            .collect::<Vec<_>>()
            .join(" ");
        let query = format!(
            "SELECT ?item ?value WHERE {{ VALUES ?value {{ {quoted} }} ?item wdt:{property} ?value }}"
        );
        let response = self.execute(&query)?;
        let mut map = BTreeMap::new();
        for binding in &response.results.bindings {
            let item = binding.entity("item");
            let value = binding.literal("value");
            if let (Some(item), Some(value)) = (item, value) {
                map.insert(value.to_string(), item);
            }
        }
        Ok(map)
    }

    fn label_of(&self, item: &ItemId, language: &str) -> Result<Option<String>, SyncError> {
        let query = format!(
            "SELECT ?label WHERE {{ wd:{item} rdfs:label ?label . FILTER(LANG(?label) = \"{language}\") }}"
        );
        let response = self.execute(&query)?;
        Ok(response
            .results
            .bindings
            .first()
            .and_then(|binding| binding.literal("label"))
            .map(|label| label.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<SparqlBinding>,
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct SparqlBinding(HashMap<String, SparqlValue>);

impl SparqlBinding {
    fn literal(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|value| value.value.as_str())
    }

    /// Entity bindings come back as full URIs; the identifier is the last
    /// path segment.
    fn entity(&self, name: &str) -> Option<ItemId> {
        let value = self.0.get(name)?;
        let tail = value.value.rsplit('/').next()?;
        tail.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}
