use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid complex accession: {0}")]
    InvalidAccession(String),

    #[error("invalid item id: {0}")]
    InvalidItemId(String),

    #[error("invalid property id: {0}")]
    InvalidPropertyId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("WD_USER and WD_PASSWORD must be set in the environment")]
    MissingCredentials,

    #[error("failed to read annotation mapping at {0}")]
    MappingRead(PathBuf),

    #[error("failed to parse annotation mapping: {0}")]
    MappingParse(String),

    #[error("no dataset matches selector: {0}")]
    DatasetNotFound(String),

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error("{accession}: malformed component entry: {entry}")]
    MalformedComponent { accession: String, entry: String },

    #[error("{accession}: taxon {taxon_id} has no Wikidata item")]
    TaxonUnresolved { accession: String, taxon_id: String },

    #[error("{accession}: no label found for taxon item {item}")]
    TaxonLabelMissing { accession: String, item: String },

    #[error("FTP listing failed: {0}")]
    FtpConnection(String),

    #[error("Complex Portal request failed: {0}")]
    PortalHttp(String),

    #[error("Complex Portal returned status {status}: {message}")]
    PortalStatus { status: u16, message: String },

    #[error("SPARQL request failed: {0}")]
    SparqlHttp(String),

    #[error("SPARQL endpoint returned status {status}: {message}")]
    SparqlStatus { status: u16, message: String },

    #[error("edit request failed: {0}")]
    EditHttp(String),

    #[error("edit endpoint returned status {status}: {message}")]
    EditStatus { status: u16, message: String },

    #[error("edit rejected: {0}")]
    EditRejected(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SyncError {
    /// Failure classes scoped to a single record: the driver logs the
    /// record's accession and continues the batch. Everything else aborts
    /// the run.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedComponent { .. }
                | SyncError::TaxonUnresolved { .. }
                | SyncError::TaxonLabelMissing { .. }
                | SyncError::SparqlHttp(_)
                | SyncError::SparqlStatus { .. }
                | SyncError::EditHttp(_)
                | SyncError::EditStatus { .. }
                | SyncError::EditRejected(_)
        )
    }
}
