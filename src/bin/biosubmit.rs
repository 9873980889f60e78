use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use biosubmit::api::IngestHttpClient;
use biosubmit::error::SubmitError;
use biosubmit::graph::{self, EntityGraph};
use biosubmit::linker::LinkResolver;
use biosubmit::schema::FixedTemplateStore;
use biosubmit::submit::{SubmissionCoordinator, SubmissionManifest};

#[derive(Parser)]
#[command(name = "biosubmit")]
#[command(about = "Link and submit spreadsheet-derived metadata graphs to an ingest service")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve links and submit a metadata graph")]
    Submit(SubmitArgs),
    #[command(about = "Resolve links locally and print the would-be manifest")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct SubmitArgs {
    #[arg(long, help = "Path to the raw graph JSON file")]
    graph: Utf8PathBuf,

    #[arg(long, help = "Remote UUID of the submission envelope")]
    submission: String,

    #[arg(long, help = "Base URL of the ingest service")]
    base_url: String,

    #[arg(long, help = "Schema base URL (defaults to <base-url>/schemas)")]
    schema_base_url: Option<String>,

    #[arg(long, help = "Resolve links and print the manifest without submitting")]
    dry_run: bool,
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(long, help = "Path to the raw graph JSON file")]
    graph: Utf8PathBuf,

    #[arg(long, default_value = "http://localhost:8080/schemas")]
    schema_base_url: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<SubmitError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SubmitError) -> u8 {
    match error {
        SubmitError::InvalidSpreadsheetLink { .. }
        | SubmitError::LinkedEntityNotFound { .. }
        | SubmitError::MultipleProcessesFound { .. }
        | SubmitError::InvalidExternalId { .. }
        | SubmitError::MissingFileName(_)
        | SubmitError::GraphRead(_)
        | SubmitError::GraphParse(_) => 2,
        SubmitError::ApiHttp(_)
        | SubmitError::ApiStatus { .. }
        | SubmitError::MalformedResource(_)
        | SubmitError::LinkFailed { .. } => 3,
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
    match cli.command {
        Commands::Submit(args) => run_submit(args),
        Commands::Resolve(args) => run_resolve(args),
    }
}

fn run_submit(args: SubmitArgs) -> miette::Result<()> {
    let schema_base = args.schema_base_url.clone().unwrap_or_else(|| {
        format!("{}/schemas", args.base_url.trim_end_matches('/'))
    });
    let mut graph = load_and_resolve(&args.graph, &schema_base)?;

    if args.dry_run {
        let manifest = SubmissionManifest::from_graph(&graph);
        return print_json(&manifest);
    }

    let token = std::env::var("INGEST_API_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty());
    let api = IngestHttpClient::new(args.base_url.as_str(), token.as_deref()).into_diagnostic()?;
    let mut coordinator = SubmissionCoordinator::new(&api);
    let manifest = coordinator
        .submit(&mut graph, &args.submission)
        .into_diagnostic()?;
    print_json(&manifest)
}

fn run_resolve(args: ResolveArgs) -> miette::Result<()> {
    let graph = load_and_resolve(&args.graph, &args.schema_base_url)?;
    let manifest = SubmissionManifest::from_graph(&graph);
    print_json(&manifest)
}

fn load_and_resolve(path: &Utf8PathBuf, schema_base: &str) -> miette::Result<EntityGraph> {
    let raw = graph::read_graph_file(path).into_diagnostic()?;
    let mut graph = EntityGraph::load(raw).into_diagnostic()?;
    let templates = FixedTemplateStore::new(schema_base);
    let mut resolver = LinkResolver::new(&templates);
    resolver.resolve(&mut graph).into_diagnostic()?;
    Ok(graph)
}

fn print_json<T: Serialize>(value: &T) -> miette::Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}
