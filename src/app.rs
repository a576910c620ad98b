use std::collections::HashSet;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::IdentifierCache;
use crate::complextab::{self, RawRow};
use crate::config::ResolvedConfig;
use crate::domain::{ComplexAccession, ItemId, PropertyId, wd};
use crate::error::SyncError;
use crate::portal::{Dataset, PortalClient, find_dataset};
use crate::resolver::IdentifierResolver;
use crate::sparql::{LookupOutcome, QueryClient};
use crate::statements::{EntityEdit, ReferenceBundle, Snak, Statement, StatementBuilder, Value};
use crate::store::{ErrorLog, Workspace};
use crate::writer::EditClient;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// When set, complexes already on Wikidata are filtered out before
    /// processing.
    pub skip_existing: bool,
    /// Cap on the number of records processed per dataset.
    pub limit: Option<usize>,
    /// Restrict the run to a single accession, for safe testing.
    pub only: Option<ComplexAccession>,
    /// Build statements but do not write.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub dataset: String,
    pub rows: usize,
    pub skipped_existing: usize,
    pub written: usize,
    pub failed: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncAllReport {
    pub reports: Vec<SyncReport>,
    pub failed_datasets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PapersReport {
    pub dataset: String,
    pub records: usize,
    pub statements: usize,
    pub failed: usize,
}

enum WriteAction {
    Created(ItemId),
    Updated(ItemId),
    DryRun,
}

pub struct App<P: PortalClient, Q: QueryClient, E: EditClient> {
    portal: P,
    query: Q,
    edit: E,
    workspace: Workspace,
    config: ResolvedConfig,
}

impl<P: PortalClient, Q: QueryClient, E: EditClient> App<P, Q, E> {
    pub fn new(portal: P, query: Q, edit: E, workspace: Workspace, config: ResolvedConfig) -> Self {
        Self {
            portal,
            query,
            edit,
            workspace,
            config,
        }
    }

    pub fn datasets(&self) -> Result<Vec<Dataset>, SyncError> {
        self.portal.list_datasets()
    }

    pub fn sync_species(
        &self,
        selector: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let datasets = self.portal.list_datasets()?;
        let dataset = find_dataset(&datasets, selector)
            .ok_or_else(|| SyncError::DatasetNotFound(selector.to_string()))?;

        let mut resolver = self.load_resolver()?;
        let report = self.sync_dataset(dataset, options, &mut resolver);
        resolver.flush()?;
        report
    }

    pub fn sync_all(&self, options: &SyncOptions) -> Result<SyncAllReport, SyncError> {
        let datasets = self.portal.list_datasets()?;
        let mut resolver = self.load_resolver()?;
        let mut reports = Vec::new();
        let mut failed_datasets = Vec::new();

        for dataset in &datasets {
            match self.sync_dataset(dataset, options, &mut resolver) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(dataset = %dataset.key, error = %err, "dataset failed, moving on");
                    failed_datasets.push(dataset.key.clone());
                }
            }
        }

        resolver.flush()?;
        Ok(SyncAllReport {
            reports,
            failed_datasets,
        })
    }

    /// Attaches described-by-source statements for the pubmed
    /// cross-references of complexes that already have a Wikidata item.
    pub fn add_papers(
        &self,
        selector: &str,
        options: &SyncOptions,
    ) -> Result<PapersReport, SyncError> {
        let datasets = self.portal.list_datasets()?;
        let dataset = find_dataset(&datasets, selector)
            .ok_or_else(|| SyncError::DatasetNotFound(selector.to_string()))?;

        let table = self.portal.fetch_table(dataset)?;
        let mut rows = complextab::read_rows(&table)?;
        if let Some(only) = &options.only {
            rows.retain(|row| row.accession.trim() == only.as_str());
        }
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }

        let accessions: Vec<String> = rows
            .iter()
            .map(|row| row.accession.trim().to_string())
            .collect();
        let complex_property: PropertyId = wd::COMPLEX_PORTAL_ID.parse()?;
        let pubmed_property: PropertyId = wd::PUBMED_ID.parse()?;
        let accession_items = self
            .query
            .items_for_values(&complex_property, &accessions)?;

        let refs = ReferenceBundle::new(&dataset.url, &dataset.filename);
        let failure_log = self.failure_log(dataset);
        let mut report = PapersReport {
            dataset: dataset.key.clone(),
            records: 0,
            statements: 0,
            failed: 0,
        };

        for row in &rows {
            let accession = row.accession.trim();
            let pmids = complextab::extract_pubmed_ids(row.cross_references.as_deref());
            if pmids.is_empty() {
                continue;
            }
            let Some(item) = accession_items.get(accession) else {
                warn!(accession, "complex not yet on Wikidata, skipping papers");
                continue;
            };

            match self.write_papers(item, &pmids, &pubmed_property, &refs, options.dry_run) {
                Ok(count) => {
                    report.records += 1;
                    report.statements += count;
                    if !options.dry_run {
                        std::thread::sleep(self.config.write_delay);
                    }
                }
                Err(err) if err.is_record_scoped() => {
                    warn!(accession, error = %err, "record failed, continuing");
                    failure_log.append(&format!("{accession}\t{err}"))?;
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }

    fn write_papers(
        &self,
        item: &ItemId,
        pmids: &[String],
        pubmed_property: &PropertyId,
        refs: &ReferenceBundle,
        dry_run: bool,
    ) -> Result<usize, SyncError> {
        let paper_items = self.query.items_for_values(pubmed_property, pmids)?;
        let mut statements = Vec::new();
        for pmid in pmids {
            match paper_items.get(pmid) {
                Some(paper) => statements.push(Statement {
                    snak: Snak {
                        property: wd::DESCRIBED_BY_SOURCE.parse()?,
                        value: Value::Item(paper.clone()),
                    },
                    qualifiers: Vec::new(),
                    references: refs.snaks(),
                }),
                None => warn!(pmid, "paper not on Wikidata"),
            }
        }
        if statements.is_empty() {
            return Ok(0);
        }
        let count = statements.len();
        if !dry_run {
            let edit = EntityEdit {
                statements,
                ..EntityEdit::default()
            };
            self.edit
                .update_item(item, &edit, &self.config.append_properties)?;
        }
        Ok(count)
    }

    fn sync_dataset(
        &self,
        dataset: &Dataset,
        options: &SyncOptions,
        resolver: &mut IdentifierResolver,
    ) -> Result<SyncReport, SyncError> {
        info!(dataset = %dataset.key, url = %dataset.url, "fetching dataset");
        let table = self.portal.fetch_table(dataset)?;
        let mut rows = complextab::read_rows(&table)?;
        let total = rows.len();

        let mut skipped_existing = 0;
        if options.skip_existing {
            let complex_property: PropertyId = wd::COMPLEX_PORTAL_ID.parse()?;
            let existing: HashSet<String> = self
                .query
                .values_for_property(&complex_property)?
                .into_iter()
                .map(|(_, value)| value)
                .collect();
            let before = rows.len();
            rows = complextab::retain_missing(rows, &existing);
            skipped_existing = before - rows.len();
        }
        if let Some(only) = &options.only {
            rows.retain(|row| row.accession.trim() == only.as_str());
        }
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }

        let refs = ReferenceBundle::new(&dataset.url, &dataset.filename);
        let builder = StatementBuilder::new(
            &refs,
            &self.config.annotation_mapping,
            self.config.unresolved_components,
            &self.config.description_templates,
        );
        let failure_log = self.failure_log(dataset);
        let mapping_log = self.workspace.error_log("unmapped_annotations.log");

        let mut report = SyncReport {
            dataset: dataset.key.clone(),
            rows: total,
            skipped_existing,
            written: 0,
            failed: 0,
            dry_run: options.dry_run,
        };

        for row in &rows {
            match self.process_record(row, &builder, resolver, options.dry_run, &mapping_log) {
                Ok(action) => {
                    match action {
                        WriteAction::Created(item) => {
                            info!(accession = row.accession.trim(), item = %item, "created")
                        }
                        WriteAction::Updated(item) => {
                            info!(accession = row.accession.trim(), item = %item, "updated")
                        }
                        WriteAction::DryRun => {
                            info!(accession = row.accession.trim(), "dry run, statements built")
                        }
                    }
                    report.written += 1;
                    if !options.dry_run {
                        std::thread::sleep(self.config.write_delay);
                    }
                }
                Err(err) if err.is_record_scoped() => {
                    warn!(accession = row.accession.trim(), error = %err, "record failed, continuing");
                    failure_log.append(&format!("{}\t{err}", row.accession.trim()))?;
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            dataset = %dataset.key,
            written = report.written,
            failed = report.failed,
            skipped = report.skipped_existing,
            "dataset done"
        );
        Ok(report)
    }

    fn process_record(
        &self,
        row: &RawRow,
        builder: &StatementBuilder<'_>,
        resolver: &mut IdentifierResolver,
        dry_run: bool,
        mapping_log: &ErrorLog,
    ) -> Result<WriteAction, SyncError> {
        let record = complextab::parse_record(row, &self.query, resolver)?;
        let taxon_item =
            record
                .taxon_item
                .clone()
                .ok_or_else(|| SyncError::TaxonUnresolved {
                    accession: record.accession.to_string(),
                    taxon_id: record.taxon_id.clone(),
                })?;
        let taxon_label = self
            .query
            .label_of(&taxon_item, "en")?
            .ok_or_else(|| SyncError::TaxonLabelMissing {
                accession: record.accession.to_string(),
                item: taxon_item.to_string(),
            })?;

        let output = builder.build(&record, &taxon_item, &taxon_label);
        for code in &output.unmapped {
            mapping_log.append(&format!("{}\t{code}", record.accession))?;
        }

        if dry_run {
            return Ok(WriteAction::DryRun);
        }

        // Match on the core identifier before writing, so re-running with
        // the presence filter disabled updates instead of duplicating.
        let complex_property: PropertyId = wd::COMPLEX_PORTAL_ID.parse()?;
        match self
            .query
            .find_by_property_value(&complex_property, record.accession.as_str())?
        {
            LookupOutcome::One(item) => {
                self.edit
                    .update_item(&item, &output.edit, &self.config.append_properties)?;
                Ok(WriteAction::Updated(item))
            }
            LookupOutcome::None => {
                let item = self.edit.create_item(&output.edit)?;
                Ok(WriteAction::Created(item))
            }
            LookupOutcome::Ambiguous(count) => Err(SyncError::EditRejected(format!(
                "{count} items already carry accession {}",
                record.accession
            ))),
        }
    }

    fn load_resolver(&self) -> Result<IdentifierResolver, SyncError> {
        let cache = IdentifierCache::load(
            self.workspace.identifier_cache_path(),
            self.config.cache_flush,
        )?;
        let miss_log = self.workspace.error_log("unresolved_identifiers.log");
        Ok(IdentifierResolver::new(cache, Some(miss_log)))
    }

    fn failure_log(&self, dataset: &Dataset) -> ErrorLog {
        let stem = dataset.filename.trim_end_matches(".tsv");
        self.workspace.error_log(&format!("{stem}_failures.log"))
    }
}
