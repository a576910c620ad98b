use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cpx_wikidata_sync::app::{App, SyncOptions, SyncReport};
use cpx_wikidata_sync::config::{ConfigLoader, Credentials, ResolvedConfig};
use cpx_wikidata_sync::domain::{ItemId, PropertyId};
use cpx_wikidata_sync::error::SyncError;
use cpx_wikidata_sync::output::{JsonOutput, OutputMode};
use cpx_wikidata_sync::portal::PortalFtpClient;
use cpx_wikidata_sync::sparql::SparqlHttpClient;
use cpx_wikidata_sync::statements::EntityEdit;
use cpx_wikidata_sync::store::Workspace;
use cpx_wikidata_sync::writer::{EditClient, WikibaseHttpClient};

#[derive(Parser)]
#[command(name = "cpx-sync")]
#[command(about = "Sync Complex Portal macromolecular complexes into Wikidata")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Sync one species dataset")]
    Sync(SyncArgs),
    #[command(about = "Sync every species dataset")]
    SyncAll(RunArgs),
    #[command(about = "List the Complex Portal datasets")]
    Datasets,
    #[command(about = "Attach pubmed cross-references to existing complexes")]
    Papers(SyncArgs),
}

#[derive(Args, Clone)]
struct SyncArgs {
    /// Dataset selector: species key ("sars-cov-2") or filename stem ("9606").
    species: String,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Process complexes even when they already exist on Wikidata.
    #[arg(long)]
    include_existing: bool,

    /// Maximum number of records per dataset.
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    /// Restrict the run to a single accession, e.g. CPX-2158.
    #[arg(long)]
    only: Option<String>,

    /// Build statements without writing.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(sync) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(sync));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::DatasetNotFound(_)
        | SyncError::ConfigRead(_)
        | SyncError::MissingCredentials
        | SyncError::MappingRead(_) => 2,
        SyncError::FtpConnection(_)
        | SyncError::PortalHttp(_)
        | SyncError::PortalStatus { .. }
        | SyncError::SparqlHttp(_)
        | SyncError::SparqlStatus { .. }
        | SyncError::EditHttp(_)
        | SyncError::EditStatus { .. }
        | SyncError::LoginFailed(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    let workspace = Workspace::new().into_diagnostic()?;

    match cli.command {
        Commands::Sync(args) => {
            let options = sync_options(&args.run).into_diagnostic()?;
            let app = writing_app(workspace, config, options.dry_run).into_diagnostic()?;
            let report = app.sync_species(&args.species, &options).into_diagnostic()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_sync(&report).into_diagnostic()?,
                OutputMode::Human => print_sync_summary(&report),
            }
            Ok(())
        }
        Commands::SyncAll(args) => {
            let options = sync_options(&args).into_diagnostic()?;
            let app = writing_app(workspace, config, options.dry_run).into_diagnostic()?;
            let report = app.sync_all(&options).into_diagnostic()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_sync_all(&report).into_diagnostic()?,
                OutputMode::Human => {
                    for entry in &report.reports {
                        print_sync_summary(entry);
                    }
                    for dataset in &report.failed_datasets {
                        println!("failed dataset: {dataset}");
                    }
                }
            }
            Ok(())
        }
        Commands::Datasets => {
            let portal = PortalFtpClient::new().into_diagnostic()?;
            let query = SparqlHttpClient::new().into_diagnostic()?;
            let app = App::new(portal, query, NopEdit, workspace, config);
            let datasets = app.datasets().into_diagnostic()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_datasets(&datasets).into_diagnostic()?,
                OutputMode::Human => {
                    for dataset in &datasets {
                        println!("{}\t{}", dataset.key, dataset.url);
                    }
                }
            }
            Ok(())
        }
        Commands::Papers(args) => {
            let options = sync_options(&args.run).into_diagnostic()?;
            let app = writing_app(workspace, config, options.dry_run).into_diagnostic()?;
            let report = app.add_papers(&args.species, &options).into_diagnostic()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_papers(&report).into_diagnostic()?,
                OutputMode::Human => println!(
                    "{}: {} statements across {} complexes, {} failed",
                    report.dataset, report.statements, report.records, report.failed
                ),
            }
            Ok(())
        }
    }
}

fn sync_options(args: &RunArgs) -> Result<SyncOptions, SyncError> {
    Ok(SyncOptions {
        skip_existing: !args.include_existing,
        limit: args.limit,
        only: args.only.as_deref().map(str::parse).transpose()?,
        dry_run: args.dry_run,
    })
}

type WritingApp = App<PortalFtpClient, SparqlHttpClient, Box<dyn EditClient>>;

fn writing_app(
    workspace: Workspace,
    config: ResolvedConfig,
    dry_run: bool,
) -> Result<WritingApp, SyncError> {
    let portal = PortalFtpClient::new()?;
    let query = SparqlHttpClient::new()?;
    let edit: Box<dyn EditClient> = if dry_run {
        Box::new(NopEdit)
    } else {
        let credentials = Credentials::from_env()?;
        let client = WikibaseHttpClient::new()?;
        client.login(&credentials)?;
        Box::new(client)
    };
    Ok(App::new(portal, query, edit, workspace, config))
}

fn print_sync_summary(report: &SyncReport) {
    let action = if report.dry_run { "built" } else { "written" };
    println!(
        "{}: {} {action}, {} failed, {} already on Wikidata ({} rows)",
        report.dataset, report.written, report.failed, report.skipped_existing, report.rows
    );
}

struct NopEdit;

impl EditClient for NopEdit {
    fn create_item(&self, _edit: &EntityEdit) -> Result<ItemId, SyncError> {
        Err(SyncError::EditHttp("edit client not configured".to_string()))
    }

    fn update_item(
        &self,
        _item: &ItemId,
        _edit: &EntityEdit,
        _append: &[PropertyId],
    ) -> Result<(), SyncError> {
        Err(SyncError::EditHttp("edit client not configured".to_string()))
    }
}
