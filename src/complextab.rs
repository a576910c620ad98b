use std::collections::HashSet;

use regex::Regex;
use serde::Deserialize;

use crate::domain::{Component, ComplexRecord, Vocabulary, wd};
use crate::error::SyncError;
use crate::resolver::{IdentifierResolver, Resolution};
use crate::sparql::QueryClient;

/// The complextab null sentinel.
const NULL_SENTINEL: &str = "-";

/// One raw complextab row. The table carries more columns than these; the
/// csv reader picks by header name and ignores the rest.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    #[serde(rename = "#Complex ac")]
    pub accession: String,
    #[serde(rename = "Recommended name")]
    pub recommended_name: String,
    #[serde(rename = "Aliases for complex", default)]
    pub aliases: Option<String>,
    #[serde(rename = "Taxonomy identifier")]
    pub taxonomy_id: String,
    #[serde(rename = "Identifiers (and stoichiometry) of molecules in complex")]
    pub molecules: String,
    #[serde(rename = "Go Annotations", default)]
    pub go_annotations: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Cross references", default)]
    pub cross_references: Option<String>,
}

pub fn read_rows(table: &str) -> Result<Vec<RawRow>, SyncError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(table.as_bytes());
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: RawRow = row.map_err(|err| SyncError::MalformedTable(err.to_string()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Set-difference on accession against the accessions already present in the
/// knowledge base. Pure and order-preserving; a cost optimization only.
pub fn retain_missing(rows: Vec<RawRow>, existing: &HashSet<String>) -> Vec<RawRow> {
    rows.into_iter()
        .filter(|row| !existing.contains(row.accession.trim()))
        .collect()
}

/// Parses one row into a `ComplexRecord`, resolving the taxon and component
/// identifiers through the resolver as it goes.
pub fn parse_record<Q: QueryClient + ?Sized>(
    row: &RawRow,
    query: &Q,
    resolver: &mut IdentifierResolver,
) -> Result<ComplexRecord, SyncError> {
    let accession = row.accession.parse()?;

    let taxon_id = row.taxonomy_id.trim().to_string();
    let taxon_property = wd::NCBI_TAXON_ID.parse()?;
    let taxon_item = match resolver.resolve(query, &taxon_property, &taxon_id)? {
        Resolution::Hit(item) => Some(item),
        Resolution::NotFound => None,
    };

    let mut components = Vec::new();
    for (external_id, quantity) in parse_components(&row.accession, &row.molecules)? {
        let vocabulary = Vocabulary::classify(&external_id);
        let item = match resolver.resolve(query, &vocabulary.property(), &external_id)? {
            Resolution::Hit(item) => Some(item),
            Resolution::NotFound => None,
        };
        components.push(Component {
            external_id,
            vocabulary,
            item,
            quantity,
        });
    }

    Ok(ComplexRecord {
        accession,
        recommended_name: row.recommended_name.trim().to_string(),
        aliases: parse_aliases(row.aliases.as_deref()),
        taxon_id,
        taxon_item,
        components,
        go_annotations: extract_go_codes(row.go_annotations.as_deref()),
        description: non_null(row.description.as_deref()),
    })
}

/// Splits the composite `id(quantity)|id(quantity)` column. An entry without
/// the parenthesised quantity group is a parse error for the whole record; a
/// non-numeric quantity inside the group means "unknown" and maps to 0.
pub fn parse_components(accession: &str, field: &str) -> Result<Vec<(String, u32)>, SyncError> {
    let entry_re = Regex::new(r"^(?P<id>.+?)\((?P<quantity>[^)]*)\)$").unwrap();
    let mut components = Vec::new();
    for entry in field.split('|') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let captures = entry_re
            .captures(entry)
            .ok_or_else(|| SyncError::MalformedComponent {
                accession: accession.to_string(),
                entry: entry.to_string(),
            })?;
        let id = captures["id"].trim().to_string();
        let quantity = captures["quantity"].trim().parse().unwrap_or(0);
        components.push((id, quantity));
    }
    Ok(components)
}

/// `-` and empty both mean "no aliases"; otherwise the column is
/// pipe-delimited.
pub fn parse_aliases(field: Option<&str>) -> Vec<String> {
    let Some(field) = non_null(field) else {
        return Vec::new();
    };
    field
        .split('|')
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .map(str::to_string)
        .collect()
}

/// All `GO:<digits>` codes in the free-text annotation column, in order of
/// appearance. An absent column yields an empty list.
pub fn extract_go_codes(field: Option<&str>) -> Vec<String> {
    let Some(field) = non_null(field) else {
        return Vec::new();
    };
    let go_re = Regex::new(r"GO:\d+").unwrap();
    go_re
        .find_iter(&field)
        .map(|code| code.as_str().to_string())
        .collect()
}

/// Pubmed cross-references from the `Cross references` column, stripped of
/// the `pubmed:` prefix and the `(see-also)` marker, deduplicated in order.
pub fn extract_pubmed_ids(field: Option<&str>) -> Vec<String> {
    let Some(field) = non_null(field) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut pmids = Vec::new();
    for xref in field.split('|') {
        if let Some(rest) = xref.trim().strip_prefix("pubmed:") {
            let pmid = rest.replace("(see-also)", "").trim().to_string();
            if !pmid.is_empty() && seen.insert(pmid.clone()) {
                pmids.push(pmid);
            }
        }
    }
    pmids
}

fn non_null(field: Option<&str>) -> Option<String> {
    let trimmed = field?.trim();
    if trimmed.is_empty() || trimmed == NULL_SENTINEL {
        return None;
    }
    Some(trimmed.to_string())
}
