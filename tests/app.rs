use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8PathBuf;

use cpx_wikidata_sync::app::{App, SyncOptions};
use cpx_wikidata_sync::cache::FlushPolicy;
use cpx_wikidata_sync::config::{ResolvedConfig, default_description_templates};
use cpx_wikidata_sync::domain::{ItemId, PropertyId};
use cpx_wikidata_sync::error::SyncError;
use cpx_wikidata_sync::portal::{Dataset, PortalClient};
use cpx_wikidata_sync::sparql::{LookupOutcome, QueryClient};
use cpx_wikidata_sync::statements::{
    AnnotationEntry, AnnotationMapping, EntityEdit, UnresolvedComponentPolicy, Value,
};
use cpx_wikidata_sync::store::Workspace;
use cpx_wikidata_sync::writer::EditClient;

const HEADER: &str = "#Complex ac\tRecommended name\tAliases for complex\tTaxonomy identifier\tIdentifiers (and stoichiometry) of molecules in complex\tGo Annotations\tDescription\tCross references";

struct FixturePortal {
    table: String,
}

impl FixturePortal {
    fn new(rows: &[&str]) -> Self {
        let mut table = String::from(HEADER);
        for row in rows {
            table.push('\n');
            table.push_str(row);
        }
        table.push('\n');
        Self { table }
    }
}

impl PortalClient for FixturePortal {
    fn list_datasets(&self) -> Result<Vec<Dataset>, SyncError> {
        Ok(vec![Dataset {
            key: "9606".to_string(),
            filename: "9606.tsv".to_string(),
            url: "https://ftp.ebi.ac.uk/pub/databases/intact/complex/current/complextab/9606.tsv"
                .to_string(),
        }])
    }

    fn fetch_table(&self, _dataset: &Dataset) -> Result<String, SyncError> {
        Ok(self.table.clone())
    }
}

/// Scripted knowledge-base reads: property/value lookups, the bulk P7718
/// reverse map, and taxon labels.
#[derive(Default)]
struct FixtureQuery {
    lookups: BTreeMap<(String, String), ItemId>,
    existing: Vec<(ItemId, String)>,
    labels: BTreeMap<String, String>,
}

impl FixtureQuery {
    fn human_defaults() -> Self {
        let mut query = FixtureQuery::default();
        query.answer("P685", "9606", "Q15978631");
        query.label("Q15978631", "Homo sapiens");
        query
    }

    fn answer(&mut self, property: &str, value: &str, item: &str) {
        self.lookups.insert(
            (property.to_string(), value.to_string()),
            item.parse().unwrap(),
        );
    }

    fn existing(&mut self, item: &str, accession: &str) {
        self.existing
            .push((item.parse().unwrap(), accession.to_string()));
        self.answer("P7718", accession, item);
    }

    fn label(&mut self, item: &str, label: &str) {
        self.labels.insert(item.to_string(), label.to_string());
    }
}

impl QueryClient for FixtureQuery {
    fn find_by_property_value(
        &self,
        property: &PropertyId,
        value: &str,
    ) -> Result<LookupOutcome, SyncError> {
        Ok(self
            .lookups
            .get(&(property.as_str().to_string(), value.to_string()))
            .map(|item| LookupOutcome::One(item.clone()))
            .unwrap_or(LookupOutcome::None))
    }

    fn values_for_property(
        &self,
        _property: &PropertyId,
    ) -> Result<Vec<(ItemId, String)>, SyncError> {
        Ok(self.existing.clone())
    }

    fn items_for_values(
        &self,
        property: &PropertyId,
        values: &[String],
    ) -> Result<BTreeMap<String, ItemId>, SyncError> {
        let mut map = BTreeMap::new();
        for value in values {
            if let Some(item) = self
                .lookups
                .get(&(property.as_str().to_string(), value.to_string()))
            {
                map.insert(value.clone(), item.clone());
            }
        }
        Ok(map)
    }

    fn label_of(&self, item: &ItemId, _language: &str) -> Result<Option<String>, SyncError> {
        Ok(self.labels.get(item.as_str()).cloned())
    }
}

/// Records every write instead of talking to an API.
#[derive(Default)]
struct RecordingEdit {
    created: Mutex<Vec<EntityEdit>>,
    updated: Mutex<Vec<(ItemId, EntityEdit)>>,
}

impl RecordingEdit {
    fn created(&self) -> Vec<EntityEdit> {
        self.created.lock().unwrap().clone()
    }

    fn updated(&self) -> Vec<(ItemId, EntityEdit)> {
        self.updated.lock().unwrap().clone()
    }
}

impl EditClient for RecordingEdit {
    fn create_item(&self, edit: &EntityEdit) -> Result<ItemId, SyncError> {
        let mut created = self.created.lock().unwrap();
        created.push(edit.clone());
        format!("Q9000000{}", created.len()).parse()
    }

    fn update_item(
        &self,
        item: &ItemId,
        edit: &EntityEdit,
        _append: &[PropertyId],
    ) -> Result<(), SyncError> {
        self.updated
            .lock()
            .unwrap()
            .push((item.clone(), edit.clone()));
        Ok(())
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    errors: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let errors = Utf8PathBuf::from_path_buf(temp.path().join("errors")).unwrap();
        Self {
            _temp: temp,
            errors,
        }
    }

    fn workspace(&self) -> Workspace {
        let cache = self.errors.parent().unwrap().join("cache");
        Workspace::new_with_paths(self.errors.clone(), cache)
    }

    fn error_log(&self, name: &str) -> String {
        std::fs::read_to_string(self.errors.join(name).as_std_path()).unwrap_or_default()
    }
}

fn config(policy: UnresolvedComponentPolicy) -> ResolvedConfig {
    let mut mapping = AnnotationMapping::empty();
    mapping.insert(
        "GO:0005737",
        AnnotationEntry {
            item: "Q79899".parse().unwrap(),
            property: "P681".parse().unwrap(),
            label: "cytoplasm".to_string(),
        },
    );
    ResolvedConfig {
        description_templates: default_description_templates(),
        append_properties: vec!["P527".parse().unwrap(), "P1343".parse().unwrap()],
        unresolved_components: policy,
        cache_flush: FlushPolicy::Manual,
        write_delay: Duration::from_millis(0),
        annotation_mapping: mapping,
    }
}

fn property_values(edit: &EntityEdit, property: &str) -> Vec<Value> {
    edit.statements
        .iter()
        .filter(|statement| statement.snak.property.as_str() == property)
        .map(|statement| statement.snak.value.clone())
        .collect()
}

fn options() -> SyncOptions {
    SyncOptions {
        skip_existing: true,
        limit: None,
        only: None,
        dry_run: false,
    }
}

#[test]
fn scenario_row_creates_one_item() {
    let portal = FixturePortal::new(&[
        "CPX-1\tFoo\t-\t9606\tP12345(2)|P67890(0)\tcomponent:GO:0005737(cytoplasm)\tA complex.\t-",
    ]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    query.answer("P352", "P67890", "Q418765");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.sync_species("9606", &options()).unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 0);

    let created = edit.created();
    assert_eq!(created.len(), 1);
    let entity = &created[0];

    assert_eq!(entity.labels.get("en").unwrap(), "Foo");
    assert!(entity.aliases.is_empty());
    assert_eq!(
        entity.descriptions.get("en").unwrap(),
        "macromolecular complex found in Homo sapiens"
    );

    assert_eq!(
        property_values(entity, "P31"),
        vec![Value::Item("Q22325163".parse().unwrap())]
    );
    assert_eq!(
        property_values(entity, "P703"),
        vec![Value::Item("Q15978631".parse().unwrap())]
    );
    assert_eq!(
        property_values(entity, "P7718"),
        vec![Value::ExternalId("CPX-1".to_string())]
    );
    assert_eq!(
        property_values(entity, "P681"),
        vec![Value::Item("Q79899".parse().unwrap())]
    );

    let parts: Vec<_> = entity
        .statements
        .iter()
        .filter(|statement| statement.snak.property.as_str() == "P527")
        .collect();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].qualifiers.len(), 1);
    assert_eq!(parts[0].qualifiers[0].value, Value::Quantity(2));
    assert!(parts[1].qualifiers.is_empty());
}

#[test]
fn presence_filter_skips_known_accessions() {
    let portal = FixturePortal::new(&[
        "CPX-1\tFoo\t-\t9606\tP12345(1)\t-\t-\t-",
        "CPX-2\tBar\t-\t9606\tP12345(1)\t-\t-\t-",
    ]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    query.existing("Q555", "CPX-1");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.sync_species("9606", &options()).unwrap();
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(report.written, 1);

    let created = edit.created();
    assert_eq!(created.len(), 1);
    assert_eq!(
        property_values(&created[0], "P7718"),
        vec![Value::ExternalId("CPX-2".to_string())]
    );
}

#[test]
fn include_existing_updates_instead_of_duplicating() {
    let portal = FixturePortal::new(&["CPX-1\tFoo\t-\t9606\tP12345(1)\t-\t-\t-"]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    query.existing("Q555", "CPX-1");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let mut options = options();
    options.skip_existing = false;
    let report = app.sync_species("9606", &options).unwrap();
    assert_eq!(report.written, 1);

    assert!(edit.created().is_empty());
    let updated = edit.updated();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].0.as_str(), "Q555");
}

#[test]
fn unresolved_component_is_skipped_but_record_still_written() {
    let portal = FixturePortal::new(&["CPX-1\tFoo\t-\t9606\tP12345(1)|P99999(3)\t-\t-\t-"]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.sync_species("9606", &options()).unwrap();
    assert_eq!(report.written, 1);

    let created = edit.created();
    assert_eq!(
        property_values(&created[0], "P527"),
        vec![Value::Item("Q418764".parse().unwrap())]
    );
    assert_eq!(property_values(&created[0], "P31").len(), 1);
    assert_eq!(property_values(&created[0], "P703").len(), 1);

    // The miss is recorded for the next run.
    let misses = fixture.error_log("unresolved_identifiers.log");
    assert!(misses.contains("P352\tP99999"));
}

#[test]
fn halt_policy_stops_at_first_unresolved_component() {
    let portal = FixturePortal::new(&["CPX-1\tFoo\t-\t9606\tP99999(3)|P12345(1)\t-\t-\t-"]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Halt),
    );

    let report = app.sync_species("9606", &options()).unwrap();
    assert_eq!(report.written, 1);

    let created = edit.created();
    assert!(property_values(&created[0], "P527").is_empty());
    assert_eq!(property_values(&created[0], "P31").len(), 1);
    assert_eq!(property_values(&created[0], "P703").len(), 1);
}

#[test]
fn malformed_row_is_logged_and_batch_continues() {
    let portal = FixturePortal::new(&[
        "CPX-1\tFoo\t-\t9606\tP12345\t-\t-\t-",
        "CPX-2\tBar\t-\t9606\tP12345(1)\t-\t-\t-",
    ]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.sync_species("9606", &options()).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 1);

    let failures = fixture.error_log("9606_failures.log");
    assert!(failures.contains("CPX-1"));
    let created = edit.created();
    assert_eq!(created.len(), 1);
    assert_eq!(
        property_values(&created[0], "P7718"),
        vec![Value::ExternalId("CPX-2".to_string())]
    );
}

#[test]
fn unmapped_go_code_is_logged_and_record_survives() {
    let portal =
        FixturePortal::new(&["CPX-1\tFoo\t-\t9606\tP12345(1)\tcomponent:GO:9999999(?)\t-\t-"]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.sync_species("9606", &options()).unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 0);

    let unmapped = fixture.error_log("unmapped_annotations.log");
    assert!(unmapped.contains("CPX-1\tGO:9999999"));
}

#[test]
fn missing_taxon_label_fails_the_record_only() {
    let portal = FixturePortal::new(&[
        "CPX-1\tFoo\t-\t10090\tP12345(1)\t-\t-\t-",
        "CPX-2\tBar\t-\t9606\tP12345(1)\t-\t-\t-",
    ]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    // Mouse taxon resolves but carries no label.
    query.answer("P685", "10090", "Q83310");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.sync_species("9606", &options()).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 1);
    assert!(fixture.error_log("9606_failures.log").contains("CPX-1"));
}

#[test]
fn limit_and_only_restrict_the_run() {
    let portal = FixturePortal::new(&[
        "CPX-1\tFoo\t-\t9606\tP12345(1)\t-\t-\t-",
        "CPX-2\tBar\t-\t9606\tP12345(1)\t-\t-\t-",
        "CPX-3\tBaz\t-\t9606\tP12345(1)\t-\t-\t-",
    ]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let mut limited = options();
    limited.limit = Some(2);
    let report = app.sync_species("9606", &limited).unwrap();
    assert_eq!(report.written, 2);

    let mut single = options();
    single.only = Some("CPX-3".parse().unwrap());
    let report = app.sync_species("9606", &single).unwrap();
    assert_eq!(report.written, 1);
}

#[test]
fn dry_run_builds_without_writing() {
    let portal = FixturePortal::new(&["CPX-1\tFoo\t-\t9606\tP12345(1)\t-\t-\t-"]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let mut options = options();
    options.dry_run = true;
    let report = app.sync_species("9606", &options).unwrap();
    assert_eq!(report.written, 1);
    assert!(report.dry_run);
    assert!(edit.created().is_empty());
    assert!(edit.updated().is_empty());
}

#[test]
fn sync_all_continues_past_a_failing_dataset() {
    let portal = FixturePortal::new(&["CPX-1\tFoo\t-\t9606\tP12345(1)\t-\t-\t-"]);
    let mut query = FixtureQuery::human_defaults();
    query.answer("P352", "P12345", "Q418764");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.sync_all(&options()).unwrap();
    assert_eq!(report.reports.len(), 1);
    assert!(report.failed_datasets.is_empty());
    assert_eq!(report.reports[0].written, 1);
}

#[test]
fn papers_attach_described_by_source_to_existing_items() {
    let portal = FixturePortal::new(&[
        "CPX-1\tFoo\t-\t9606\tP12345(1)\t-\t-\tpubmed:123(see-also)|intact:EBI-1|pubmed:456",
        "CPX-2\tBar\t-\t9606\tP12345(1)\t-\t-\tpubmed:789",
    ]);
    let mut query = FixtureQuery::human_defaults();
    query.existing("Q555", "CPX-1");
    query.answer("P698", "123", "Q30000001");
    query.answer("P698", "456", "Q30000002");
    let edit = RecordingEdit::default();
    let fixture = Fixture::new();
    let app = App::new(
        portal,
        query,
        &edit,
        fixture.workspace(),
        config(UnresolvedComponentPolicy::Skip),
    );

    let report = app.add_papers("9606", &options()).unwrap();
    // CPX-2 has no Wikidata item yet, so only CPX-1 is touched.
    assert_eq!(report.records, 1);
    assert_eq!(report.statements, 2);

    let updated = edit.updated();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].0.as_str(), "Q555");
    assert_eq!(
        property_values(&updated[0].1, "P1343"),
        vec![
            Value::Item("Q30000001".parse().unwrap()),
            Value::Item("Q30000002".parse().unwrap()),
        ]
    );
}
