use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Wikidata property and item constants used across the pipeline.
pub mod wd {
    pub const INSTANCE_OF: &str = "P31";
    pub const SUBCLASS_OF: &str = "P279";
    pub const UNIPROT_ID: &str = "P352";
    pub const HAS_PART: &str = "P527";
    pub const CELL_COMPONENT: &str = "P681";
    pub const CHEBI_ID: &str = "P683";
    pub const NCBI_TAXON_ID: &str = "P685";
    pub const PUBMED_ID: &str = "P698";
    pub const FOUND_IN_TAXON: &str = "P703";
    pub const QUANTITY: &str = "P1114";
    pub const DESCRIBED_BY_SOURCE: &str = "P1343";
    pub const COMPLEX_PORTAL_ID: &str = "P7718";
    pub const RNACENTRAL_ID: &str = "P8697";
    pub const STATED_IN: &str = "P248";
    pub const RETRIEVED: &str = "P813";
    pub const REFERENCE_URL: &str = "P854";

    pub const MACROMOLECULAR_COMPLEX: &str = "Q22325163";
    pub const COMPLEX_PORTAL: &str = "Q47196990";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplexAccession(String);

impl ComplexAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComplexAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ComplexAccession {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized.strip_prefix("CPX-");
        let is_valid = digits
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(SyncError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric part of the identifier, as required by entity-id datavalues.
    pub fn numeric(&self) -> u64 {
        self.0[1..].parse().unwrap_or(0)
    }

    pub(crate) fn known(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized.strip_prefix('Q');
        let is_valid = digits
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(SyncError::InvalidItemId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(String);

impl PropertyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn known(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PropertyId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized.strip_prefix('P');
        let is_valid = digits
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(SyncError::InvalidPropertyId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Source vocabulary of a component identifier. Each vocabulary resolves
/// through its own external-id property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocabulary {
    Protein,
    Chemical,
    Rna,
    NestedComplex,
}

impl Vocabulary {
    /// Complextab prefixes: `CHEBI:` for small molecules, `CPX-` for nested
    /// complexes, `URS` for RNAcentral. Unprefixed identifiers are UniProt.
    pub fn classify(raw: &str) -> Self {
        if raw.starts_with("CHEBI:") {
            Vocabulary::Chemical
        } else if raw.starts_with("CPX-") {
            Vocabulary::NestedComplex
        } else if raw.starts_with("URS") {
            Vocabulary::Rna
        } else {
            Vocabulary::Protein
        }
    }

    pub fn property(&self) -> PropertyId {
        let id = match self {
            Vocabulary::Protein => wd::UNIPROT_ID,
            Vocabulary::Chemical => wd::CHEBI_ID,
            Vocabulary::Rna => wd::RNACENTRAL_ID,
            Vocabulary::NestedComplex => wd::COMPLEX_PORTAL_ID,
        };
        PropertyId::known(id)
    }
}

/// One molecule participating in a complex. `item` stays `None` when the
/// external identifier has no Wikidata match; quantity 0 means the source
/// does not state a stoichiometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub external_id: String,
    pub vocabulary: Vocabulary,
    pub item: Option<ItemId>,
    pub quantity: u32,
}

/// One parsed complextab row. Immutable after parse; component order follows
/// the original composite-field order.
#[derive(Debug, Clone)]
pub struct ComplexRecord {
    pub accession: ComplexAccession,
    pub recommended_name: String,
    pub aliases: Vec<String>,
    pub taxon_id: String,
    pub taxon_item: Option<ItemId>,
    pub components: Vec<Component>,
    pub go_annotations: Vec<String>,
    pub description: Option<String>,
}
