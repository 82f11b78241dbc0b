use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use prospect_core::{
    Catalog, DocumentClassifier, ExtractionPipeline, InferenceConfig, JsonlSource, MultiTierTagger,
    NullModel, PipelineConfig, RunStatus, Storage, PHASE_EXTRACTION,
};

#[derive(Parser)]
#[command(
    name = "prospect",
    about = "Entity and relationship extraction for scraped business documents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extraction pipeline over a JSONL source
    Run {
        /// JSONL file of scraped documents
        source: PathBuf,
        /// Heuristics catalog directory
        #[arg(long)]
        catalog: PathBuf,
        /// SQLite database path
        #[arg(long, default_value = "prospect.db")]
        db: String,
        /// Documents per batch
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Documents between checkpoints
        #[arg(long, default_value_t = 1000)]
        checkpoint_interval: u64,
        /// Stop and checkpoint after this many documents per run
        #[arg(long)]
        max_docs_per_run: Option<u64>,
        /// Concurrent extraction workers per batch
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Start line when no checkpoint exists
        #[arg(long, default_value_t = 0)]
        start_offset: u64,
        /// Override the checkpoint workflow id
        #[arg(long)]
        workflow_id: Option<String>,
    },
    /// Tag a single text and print its entity spans
    Tag {
        /// Heuristics catalog directory
        #[arg(long)]
        catalog: PathBuf,
        /// Text to tag; reads stdin when omitted
        text: Option<String>,
    },
    /// Classify a document against the catalog's content rules
    Classify {
        /// Heuristics catalog directory
        #[arg(long)]
        catalog: PathBuf,
        /// Source URL of the document
        #[arg(long, default_value = "")]
        url: String,
        /// Document title
        #[arg(long)]
        title: Option<String>,
        /// Body text; reads stdin when omitted
        text: Option<String>,
    },
    /// Show stored counts and the latest checkpoint
    Status {
        /// SQLite database path
        #[arg(long, default_value = "prospect.db")]
        db: String,
        /// Workflow id to report the checkpoint for
        #[arg(long)]
        workflow: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            source,
            catalog,
            db,
            batch_size,
            checkpoint_interval,
            max_docs_per_run,
            workers,
            start_offset,
            workflow_id,
        } => {
            run_pipeline(
                source,
                &catalog,
                &db,
                PipelineConfig {
                    workflow_id,
                    batch_size,
                    checkpoint_interval,
                    max_docs_per_run,
                    workers,
                    inference: InferenceConfig::default(),
                    start_offset,
                    ..PipelineConfig::default()
                },
            )
            .await
        }
        Commands::Tag { catalog, text } => tag_text(&catalog, text),
        Commands::Classify {
            catalog,
            url,
            title,
            text,
        } => classify_text(&catalog, &url, title.as_deref(), text),
        Commands::Status { db, workflow } => show_status(&db, workflow.as_deref()).await,
    }
}

async fn run_pipeline(source: PathBuf, catalog: &PathBuf, db: &str, config: PipelineConfig) -> Result<()> {
    let catalog = Arc::new(Catalog::load(catalog).context("loading heuristics catalog")?);
    tracing::info!(version = catalog.version(), "Loaded heuristics catalog");
    let storage = Arc::new(Storage::open(db).await.context("opening database")?);
    let pipeline = ExtractionPipeline::new(
        Arc::clone(&catalog),
        Arc::new(NullModel),
        Arc::clone(&storage),
        config,
    )?;
    let source = JsonlSource::new(source);

    // A bounded run checkpoints as `continued`; keep launching follow-up
    // runs until the source is exhausted.
    loop {
        let summary = pipeline.run(&source).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if summary.completed {
            return Ok(());
        }

        let checkpoint = storage
            .latest_checkpoint(&summary.workflow_id, PHASE_EXTRACTION)
            .await?;
        match checkpoint.map(|c| c.status) {
            Some(RunStatus::Continued) => {}
            _ => bail!(
                "run for workflow {} did not complete; see failed documents in the summary",
                summary.workflow_id
            ),
        }
    }
}

fn tag_text(catalog: &PathBuf, text: Option<String>) -> Result<()> {
    let catalog = Arc::new(Catalog::load(catalog).context("loading heuristics catalog")?);
    let tagger = MultiTierTagger::new(Arc::clone(&catalog), Arc::new(NullModel))?;

    let text = read_input(text)?;
    let spans = tagger.tag(&text)?;
    println!("{}", serde_json::to_string_pretty(&spans)?);
    Ok(())
}

fn classify_text(
    catalog: &PathBuf,
    url: &str,
    title: Option<&str>,
    text: Option<String>,
) -> Result<()> {
    let catalog = Catalog::load(catalog).context("loading heuristics catalog")?;
    let classifier = DocumentClassifier::new(catalog.content_rules())?;

    let text = read_input(text)?;
    match classifier.classify(url, title, &text) {
        Some(classification) => println!("{}", serde_json::to_string_pretty(&classification)?),
        None => bail!("catalog has no content rules; classification is disabled"),
    }
    Ok(())
}

async fn show_status(db: &str, workflow: Option<&str>) -> Result<()> {
    let storage = Storage::open(db).await.context("opening database")?;
    let counts = storage.counts().await?;

    println!(
        "documents: {}\nentities: {}\nrelationships: {}",
        counts.documents, counts.entities, counts.relationships
    );

    if let Some(workflow) = workflow {
        match storage.latest_checkpoint(workflow, PHASE_EXTRACTION).await? {
            Some(cp) => println!(
                "checkpoint: offset {} ({}), run {}, updated {}",
                cp.doc_offset, cp.status, cp.run_id, cp.updated_at
            ),
            None => println!("checkpoint: none for workflow {workflow}"),
        }
    }

    Ok(())
}

fn read_input(text: Option<String>) -> Result<String> {
    match text {
        Some(text) => Ok(text),
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading text from stdin")?;
            Ok(buf)
        }
    }
}
