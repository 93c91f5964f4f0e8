use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_cell_explorer::app::{ColorValues, Explorer, plot_data};
use kira_cell_explorer::cancel::CancelToken;
use kira_cell_explorer::config::{ConfigLoader, ResolvedConfig};
use kira_cell_explorer::convert::ConversionOptions;
use kira_cell_explorer::error::KiraError;
use kira_cell_explorer::index::HttpIndexClient;
use kira_cell_explorer::output::{JsonOutput, OutputMode};
use kira_cell_explorer::store::HttpStoreBackend;

#[derive(Parser)]
#[command(name = "kira-ce")]
#[command(about = "Search, convert and explore single-cell datasets from the command line")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search the metadata index for explorable datasets")]
    Search(SearchArgs),
    #[command(about = "List marker-gene sets stored next to a dataset")]
    Markers(PathArgs),
    #[command(about = "Convert a dataset, match its markers and pick a default assay")]
    Open(PathArgs),
    #[command(about = "Expression of one gene across all cells")]
    Expression(ExpressionArgs),
    #[command(about = "Embedding coordinates, optionally colored by a column or gene")]
    Embedding(EmbeddingArgs),
}

#[derive(Args)]
struct SearchArgs {
    query: Option<String>,

    #[arg(long)]
    path: Option<String>,

    #[arg(long, default_value_t = 100)]
    limit: usize,
}

#[derive(Args)]
struct PathArgs {
    path: String,
}

#[derive(Args)]
struct ExpressionArgs {
    path: String,

    gene: String,

    #[arg(long)]
    assay: Option<String>,

    #[arg(long)]
    raw: bool,
}

#[derive(Args)]
struct EmbeddingArgs {
    path: String,

    #[arg(long)]
    name: Option<String>,

    #[arg(long, conflicts_with = "gene")]
    color_by: Option<String>,

    #[arg(long)]
    gene: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NoAssay
        | KiraError::UnknownAssay(_)
        | KiraError::UnknownColumn(_)
        | KiraError::UnknownGene(_)
        | KiraError::UnknownReducedDimension(_) => 2,
        KiraError::RemoteFetch { .. }
        | KiraError::RemoteHttp(_)
        | KiraError::SearchQuery { .. }
        | KiraError::SearchHttp(_)
        | KiraError::DirectoryListing { .. }
        | KiraError::Conversion { .. }
        | KiraError::ConversionTimeout { .. } => 3,
        _ => 1,
    }
}

type HttpExplorer = Explorer<HttpStoreBackend, HttpIndexClient>;

fn build_explorer(config: &ResolvedConfig) -> Result<HttpExplorer, KiraError> {
    let cancel = CancelToken::new();
    let store = HttpStoreBackend::new(&config.store_url, config.request_timeout)?
        .with_cancel(cancel.clone());
    let index = HttpIndexClient::new(&config.index_url, config.request_timeout)?
        .with_cancel(cancel.clone());
    Ok(Explorer::new(
        store,
        index,
        ConversionOptions::from(config),
        cancel,
    ))
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let explorer = build_explorer(&config)?;
    let sink = output_mode.sink();

    match cli.command {
        Commands::Search(args) => {
            let records =
                explorer.search(args.query.as_deref(), args.path.as_deref(), args.limit)?;
            JsonOutput::print(&records).into_diagnostic()
        }
        Commands::Markers(args) => {
            let markers = explorer.discover(&args.path)?;
            JsonOutput::print(&markers).into_diagnostic()
        }
        Commands::Open(args) => {
            let opened = explorer.open(&args.path, sink)?;
            JsonOutput::print(&opened).into_diagnostic()
        }
        Commands::Expression(args) => {
            let opened = explorer.open(&args.path, sink)?;
            let choice = explorer.assay_choice(&opened, args.assay.as_deref())?;
            let row = explorer
                .find_row(&opened, &args.gene)?
                .ok_or_else(|| KiraError::UnknownGene(args.gene.clone()))?;
            let values =
                explorer.expression(&opened, &choice.assay, row, choice.normalize && !args.raw)?;
            JsonOutput::print(&values).into_diagnostic()
        }
        Commands::Embedding(args) => {
            let opened = explorer.open(&args.path, sink)?;
            let name = match args.name {
                Some(name) => name,
                None => opened
                    .reduced_dimension_names
                    .first()
                    .cloned()
                    .ok_or_else(|| KiraError::UnknownReducedDimension("<none>".to_string()))?,
            };
            let embedding = explorer.embedding(&opened, &name)?;
            if let Some(column) = args.color_by {
                let color = ColorValues::Column(explorer.column(&opened, &column)?);
                return JsonOutput::print(&plot_data(embedding, color)?).into_diagnostic();
            }
            if let Some(gene) = args.gene {
                let choice = explorer.assay_choice(&opened, None)?;
                let row = explorer
                    .find_row(&opened, &gene)?
                    .ok_or_else(|| KiraError::UnknownGene(gene.clone()))?;
                let color = ColorValues::Numeric(explorer.expression(
                    &opened,
                    &choice.assay,
                    row,
                    choice.normalize,
                )?);
                return JsonOutput::print(&plot_data(embedding, color)?).into_diagnostic();
            }
            JsonOutput::print(&embedding).into_diagnostic()
        }
    }
}
