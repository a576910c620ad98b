use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value as Json, json};
use tracing::info;

use crate::config::Credentials;
use crate::domain::{ItemId, PropertyId};
use crate::error::SyncError;
use crate::statements::{EntityEdit, Snak, Statement, Value};

const DEFAULT_API: &str = "https://www.wikidata.org/w/api.php";
const CALENDAR_GREGORIAN: &str = "http://www.wikidata.org/entity/Q1985727";

/// Write access to the knowledge base. Edits are batched per entity: one
/// call submits terms and statements together.
pub trait EditClient: Send + Sync {
    fn create_item(&self, edit: &EntityEdit) -> Result<ItemId, SyncError>;

    /// Updates an existing item. Properties in `append` keep their existing
    /// claims untouched; claims of other edited properties are replaced.
    fn update_item(
        &self,
        item: &ItemId,
        edit: &EntityEdit,
        append: &[PropertyId],
    ) -> Result<(), SyncError>;
}

impl<T: EditClient + ?Sized> EditClient for &T {
    fn create_item(&self, edit: &EntityEdit) -> Result<ItemId, SyncError> {
        (**self).create_item(edit)
    }

    fn update_item(
        &self,
        item: &ItemId,
        edit: &EntityEdit,
        append: &[PropertyId],
    ) -> Result<(), SyncError> {
        (**self).update_item(item, edit, append)
    }
}

impl<T: EditClient + ?Sized> EditClient for Box<T> {
    fn create_item(&self, edit: &EntityEdit) -> Result<ItemId, SyncError> {
        (**self).create_item(edit)
    }

    fn update_item(
        &self,
        item: &ItemId,
        edit: &EntityEdit,
        append: &[PropertyId],
    ) -> Result<(), SyncError> {
        (**self).update_item(item, edit, append)
    }
}

pub struct WikibaseHttpClient {
    client: Client,
    api_url: String,
    csrf_token: Mutex<Option<String>>,
}

impl WikibaseHttpClient {
    pub fn new() -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cpx-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::EditHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?;
        Ok(Self {
            client,
            api_url: DEFAULT_API.to_string(),
            csrf_token: Mutex::new(None),
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Bot login: login token → login → CSRF token, all on one cookie
    /// session.
    pub fn login(&self, credentials: &Credentials) -> Result<(), SyncError> {
        let login_token = self.fetch_token("login")?;
        let response: Json = self
            .client
            .post(&self.api_url)
            .form(&[
                ("action", "login"),
                ("lgname", credentials.user.as_str()),
                ("lgpassword", credentials.password.as_str()),
                ("lgtoken", login_token.as_str()),
                ("format", "json"),
            ])
            .send()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?
            .json()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?;

        let result = response
            .pointer("/login/result")
            .and_then(Json::as_str)
            .unwrap_or("missing result");
        if result != "Success" {
            return Err(SyncError::LoginFailed(result.to_string()));
        }

        let csrf = self.fetch_token("csrf")?;
        *self.csrf_token.lock().unwrap() = Some(csrf);
        info!(user = %credentials.user, "logged in");
        Ok(())
    }

    fn fetch_token(&self, kind: &str) -> Result<String, SyncError> {
        let response: Json = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("meta", "tokens"),
                ("type", kind),
                ("format", "json"),
            ])
            .send()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?
            .json()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?;
        response
            .pointer(&format!("/query/tokens/{kind}token"))
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::LoginFailed(format!("no {kind} token in response")))
    }

    fn edit_entity(&self, params: Vec<(&str, String)>) -> Result<Json, SyncError> {
        let token = self
            .csrf_token
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::LoginFailed("not logged in".to_string()))?;

        let mut form: Vec<(&str, String)> = vec![
            ("action", "wbeditentity".to_string()),
            ("format", "json".to_string()),
            ("bot", "1".to_string()),
            ("token", token),
        ];
        form.extend(params);

        let response = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "edit request failed".to_string());
            return Err(SyncError::EditStatus { status, message });
        }
        let body: Json = response
            .json()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?;
        if let Some(error) = body.get("error") {
            let info = error
                .pointer("/info")
                .and_then(Json::as_str)
                .unwrap_or("unknown error");
            return Err(SyncError::EditRejected(info.to_string()));
        }
        Ok(body)
    }

    /// Existing claim GUIDs per property, for replace-mode updates.
    fn existing_claims(&self, item: &ItemId) -> Result<BTreeMap<String, Vec<String>>, SyncError> {
        let response: Json = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "wbgetentities"),
                ("ids", item.as_str()),
                ("props", "claims"),
                ("format", "json"),
            ])
            .send()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?
            .json()
            .map_err(|err| SyncError::EditHttp(err.to_string()))?;

        let mut guids = BTreeMap::new();
        let claims = response
            .pointer(&format!("/entities/{}/claims", item))
            .and_then(Json::as_object);
        if let Some(claims) = claims {
            for (property, statements) in claims {
                let ids = statements
                    .as_array()
                    .map(|list| {
                        list.iter()
                            .filter_map(|claim| claim.get("id"))
                            .filter_map(Json::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                guids.insert(property.clone(), ids);
            }
        }
        Ok(guids)
    }
}

impl EditClient for WikibaseHttpClient {
    fn create_item(&self, edit: &EntityEdit) -> Result<ItemId, SyncError> {
        let data = entity_json(edit, &[]);
        let body = self.edit_entity(vec![
            ("new", "item".to_string()),
            ("data", data.to_string()),
        ])?;
        let id = body
            .pointer("/entity/id")
            .and_then(Json::as_str)
            .ok_or_else(|| SyncError::EditRejected("no entity id in response".to_string()))?;
        id.parse()
    }

    fn update_item(
        &self,
        item: &ItemId,
        edit: &EntityEdit,
        append: &[PropertyId],
    ) -> Result<(), SyncError> {
        let existing = self.existing_claims(item)?;
        let removals = removals_for(&existing, edit, append);
        let data = entity_json(edit, &removals);
        self.edit_entity(vec![
            ("id", item.as_str().to_string()),
            ("data", data.to_string()),
        ])?;
        Ok(())
    }
}

/// GUIDs to remove so that non-append properties are replaced rather than
/// accumulated. Properties in the append allowlist are never removed, which
/// preserves community-added values.
pub fn removals_for(
    existing: &BTreeMap<String, Vec<String>>,
    edit: &EntityEdit,
    append: &[PropertyId],
) -> Vec<String> {
    let edited: Vec<&str> = edit
        .statements
        .iter()
        .map(|statement| statement.snak.property.as_str())
        .collect();
    let mut removals = Vec::new();
    for (property, guids) in existing {
        if !edited.contains(&property.as_str()) {
            continue;
        }
        if append.iter().any(|allowed| allowed.as_str() == property) {
            continue;
        }
        removals.extend(guids.iter().cloned());
    }
    removals
}

/// The `wbeditentity` data payload for one edit, plus removal markers.
pub fn entity_json(edit: &EntityEdit, removals: &[String]) -> Json {
    let labels: BTreeMap<&String, Json> = edit
        .labels
        .iter()
        .map(|(language, value)| {
            (language, json!({ "language": language, "value": value }))
        })
        .collect();
    let descriptions: BTreeMap<&String, Json> = edit
        .descriptions
        .iter()
        .map(|(language, value)| {
            (language, json!({ "language": language, "value": value }))
        })
        .collect();
    let aliases: BTreeMap<&String, Json> = edit
        .aliases
        .iter()
        .map(|(language, values)| {
            let list: Vec<Json> = values
                .iter()
                .map(|value| json!({ "language": language, "value": value }))
                .collect();
            (language, Json::Array(list))
        })
        .collect();

    let mut claims: Vec<Json> = edit.statements.iter().map(claim_json).collect();
    for guid in removals {
        claims.push(json!({ "id": guid, "remove": "" }));
    }

    json!({
        "labels": labels,
        "descriptions": descriptions,
        "aliases": aliases,
        "claims": claims,
    })
}

fn claim_json(statement: &Statement) -> Json {
    let mut claim = json!({
        "mainsnak": snak_json(&statement.snak),
        "type": "statement",
        "rank": "normal",
    });

    if !statement.qualifiers.is_empty() {
        claim["qualifiers"] = grouped_snaks(&statement.qualifiers);
    }
    if !statement.references.is_empty() {
        claim["references"] = json!([{ "snaks": grouped_snaks(&statement.references) }]);
    }
    claim
}

fn grouped_snaks(snaks: &[Snak]) -> Json {
    let mut grouped: BTreeMap<String, Vec<Json>> = BTreeMap::new();
    for snak in snaks {
        grouped
            .entry(snak.property.as_str().to_string())
            .or_default()
            .push(snak_json(snak));
    }
    serde_json::to_value(grouped).unwrap_or(Json::Null)
}

fn snak_json(snak: &Snak) -> Json {
    let datavalue = match &snak.value {
        Value::Item(item) => json!({
            "value": {
                "entity-type": "item",
                "numeric-id": item.numeric(),
                "id": item.as_str(),
            },
            "type": "wikibase-entityid",
        }),
        Value::ExternalId(value) | Value::String(value) => json!({
            "value": value,
            "type": "string",
        }),
        Value::Time(time) => json!({
            "value": {
                "time": time,
                "timezone": 0,
                "before": 0,
                "after": 0,
                "precision": 11,
                "calendarmodel": CALENDAR_GREGORIAN,
            },
            "type": "time",
        }),
        Value::Quantity(amount) => json!({
            "value": {
                "amount": format!("+{amount}"),
                "unit": "1",
            },
            "type": "quantity",
        }),
    };

    json!({
        "snaktype": "value",
        "property": snak.property.as_str(),
        "datavalue": datavalue,
    })
}
