use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{ComplexRecord, ItemId, PropertyId, wd};
use crate::error::SyncError;

/// A typed statement value. The wire encoding lives in the edit client;
/// this model stays serialization-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Item(ItemId),
    ExternalId(String),
    String(String),
    /// Wikibase time literal, e.g. `+2026-08-06T00:00:00Z`, day precision.
    Time(String),
    Quantity(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snak {
    pub property: PropertyId,
    pub value: Value,
}

impl Snak {
    pub fn new(property: &str, value: Value) -> Result<Self, SyncError> {
        Ok(Self {
            property: property.parse()?,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub snak: Snak,
    pub qualifiers: Vec<Snak>,
    pub references: Vec<Snak>,
}

/// Provenance attached to every emitted statement. The retrieval timestamp
/// is fixed when the bundle is built, so all statements of one run carry the
/// same reference set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceBundle {
    pub stated_in: ItemId,
    pub retrieved: String,
    pub source_url: String,
    pub filename: String,
}

impl ReferenceBundle {
    pub fn new(source_url: &str, filename: &str) -> Self {
        Self::with_retrieved(
            source_url,
            filename,
            chrono::Utc::now().format("+%Y-%m-%dT00:00:00Z").to_string(),
        )
    }

    pub fn with_retrieved(source_url: &str, filename: &str, retrieved: String) -> Self {
        Self {
            stated_in: ItemId::known(wd::COMPLEX_PORTAL),
            retrieved,
            source_url: source_url.to_string(),
            filename: filename.to_string(),
        }
    }

    pub fn snaks(&self) -> Vec<Snak> {
        vec![
            Snak {
                property: PropertyId::known(wd::STATED_IN),
                value: Value::Item(self.stated_in.clone()),
            },
            Snak {
                property: PropertyId::known(wd::RETRIEVED),
                value: Value::Time(self.retrieved.clone()),
            },
            Snak {
                property: PropertyId::known(wd::REFERENCE_URL),
                value: Value::String(self.source_url.clone()),
            },
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationEntry {
    pub item: ItemId,
    pub property: PropertyId,
    pub label: String,
}

/// External ontology code → (target item, target property). Loaded once per
/// run.
#[derive(Debug, Clone, Default)]
pub struct AnnotationMapping {
    entries: BTreeMap<String, AnnotationEntry>,
}

impl AnnotationMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_path(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SyncError::MappingRead(path.to_path_buf()))?;
        let entries = serde_json::from_str(&content)
            .map_err(|err| SyncError::MappingParse(err.to_string()))?;
        Ok(Self { entries })
    }

    pub fn insert(&mut self, code: &str, entry: AnnotationEntry) {
        self.entries.insert(code.to_string(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves an ontology code to a (property, item) target. GO terms that
    /// name a complex get a subclass-of relation instead of the generic
    /// cell-component one.
    pub fn resolve_target(&self, code: &str) -> Option<(PropertyId, ItemId)> {
        let entry = self.entries.get(code)?;
        let property = if entry.property.as_str() == wd::CELL_COMPONENT
            && entry.label.to_lowercase().contains("complex")
        {
            PropertyId::known(wd::SUBCLASS_OF)
        } else {
            entry.property.clone()
        };
        Some((property, entry.item.clone()))
    }
}

/// Whether an unresolved component identifier halts the remaining components
/// of its record or is skipped individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnresolvedComponentPolicy {
    #[default]
    Skip,
    Halt,
}

/// Full edit for one entity: terms plus statements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityEdit {
    pub labels: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, Vec<String>>,
    pub descriptions: BTreeMap<String, String>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub edit: EntityEdit,
    /// Ontology codes absent from the annotation mapping; the caller logs
    /// them, they never abort the record.
    pub unmapped: Vec<String>,
}

pub struct StatementBuilder<'a> {
    refs: &'a ReferenceBundle,
    mapping: &'a AnnotationMapping,
    policy: UnresolvedComponentPolicy,
    description_templates: &'a BTreeMap<String, String>,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(
        refs: &'a ReferenceBundle,
        mapping: &'a AnnotationMapping,
        policy: UnresolvedComponentPolicy,
        description_templates: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            refs,
            mapping,
            policy,
            description_templates,
        }
    }

    /// Builds the full edit for one record. Deterministic given the record,
    /// bundle instance and mapping; the caller must have resolved the taxon
    /// item and its display label beforehand.
    pub fn build(&self, record: &ComplexRecord, taxon_item: &ItemId, taxon_label: &str) -> BuildOutput {
        let mut statements = vec![
            self.statement(
                PropertyId::known(wd::INSTANCE_OF),
                Value::Item(ItemId::known(wd::MACROMOLECULAR_COMPLEX)),
            ),
            self.statement(
                PropertyId::known(wd::FOUND_IN_TAXON),
                Value::Item(taxon_item.clone()),
            ),
            self.statement(
                PropertyId::known(wd::COMPLEX_PORTAL_ID),
                Value::ExternalId(record.accession.as_str().to_string()),
            ),
        ];

        for component in &record.components {
            let Some(item) = &component.item else {
                match self.policy {
                    UnresolvedComponentPolicy::Skip => continue,
                    UnresolvedComponentPolicy::Halt => break,
                }
            };
            let mut statement =
                self.statement(PropertyId::known(wd::HAS_PART), Value::Item(item.clone()));
            if component.quantity > 0 {
                statement.qualifiers.push(Snak {
                    property: PropertyId::known(wd::QUANTITY),
                    value: Value::Quantity(u64::from(component.quantity)),
                });
            }
            statements.push(statement);
        }

        let mut unmapped = Vec::new();
        for code in &record.go_annotations {
            match self.mapping.resolve_target(code) {
                Some((property, item)) => {
                    statements.push(self.statement(property, Value::Item(item)));
                }
                None => {
                    warn!(accession = %record.accession, code, "ontology code missing from mapping");
                    unmapped.push(code.clone());
                }
            }
        }

        let mut edit = EntityEdit {
            statements,
            ..EntityEdit::default()
        };
        edit.labels
            .insert("en".to_string(), record.recommended_name.clone());
        if !record.aliases.is_empty() {
            edit.aliases.insert("en".to_string(), record.aliases.clone());
        }
        for (language, template) in self.description_templates {
            edit.descriptions
                .insert(language.clone(), template.replace("{taxon}", taxon_label));
        }

        BuildOutput { edit, unmapped }
    }

    fn statement(&self, property: PropertyId, value: Value) -> Statement {
        Statement {
            snak: Snak { property, value },
            qualifiers: Vec::new(),
            references: self.refs.snaks(),
        }
    }
}
