use chrono::Utc;
use clap::{Parser, Subcommand};
use rfp_pipeline_core::{
    embed_document, ArtifactStore, AzureBlobStore, AzureOpenAiEmbeddings, AzureSearchService,
    BlobStorageConfig, ConfigSource, DocumentPipeline, DocumentRequest, EmbedReport,
    EmbeddedChunk, EmbeddingClient, EmbeddingConfig, EnvConfigSource, GraphBuildReport,
    GraphProjectionBuilder, GraphStore, HashingEmbeddings, LocalObjectStore, MemoryGraphStore,
    MemorySearchService, Neo4jConfig, Neo4jStore, ObjectStore, PipelineDefaults, RetryPolicy,
    SearchConfig, SearchIndexService, SearchProjectionUploader, UploadReport,
};
use rfp_pipeline_core::config::vector_dimensions;
use rfp_pipeline_core::search::{GroupAssignment, DEFAULT_INDEX_NAME, DEFAULT_VECTOR_DIMENSIONS};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rfp-pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Keep artifacts under this directory instead of Azure Blob Storage.
    #[arg(long, env = "RFP_ARTIFACT_DIR", global = true)]
    artifact_dir: Option<PathBuf>,

    /// Embed with the offline hashing backend instead of Azure OpenAI.
    #[arg(long, global = true, default_value_t = false)]
    offline_embeddings: bool,

    /// Project into in-memory graph and search stores and only report counts.
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and store a PDF or Word document.
    Process {
        /// Input document (.pdf, .docx, .doc).
        #[arg(long)]
        file: PathBuf,
        /// Display name; defaults to the file stem.
        #[arg(long)]
        document_name: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        /// `request`, `response`, or any other tag.
        #[arg(long)]
        doc_type: Option<String>,
        /// Continue into the embedding stage.
        #[arg(long, default_value_t = false)]
        embed: bool,
    },
    /// Embed the stored chunks of a document.
    Embed {
        #[arg(long)]
        document_id: String,
    },
    /// Build the graph projection of an embedded document.
    Graph {
        #[arg(long)]
        document_id: String,
    },
    /// Ensure the search index and upload an embedded document.
    Index {
        #[arg(long)]
        document_id: String,
        /// Overrides AZURE_SEARCH_INDEX_NAME.
        #[arg(long)]
        index_name: Option<String>,
    },
    /// Graph and search projections side by side.
    Project {
        #[arg(long)]
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let source = EnvConfigSource;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "rfp-pipeline boot"
    );

    match cli.artifact_dir.clone() {
        Some(dir) => {
            let containers = BlobStorageConfig::containers(&source);
            info!(dir = %dir.display(), "using local artifact store");
            let artifacts = ArtifactStore::new(LocalObjectStore::new(dir), containers);
            run(&cli, &source, &artifacts).await
        }
        None => {
            let config = BlobStorageConfig::from_source(&source)?;
            let store = AzureBlobStore::new(&config.account_url, config.sas_token)?;
            let artifacts = ArtifactStore::new(store, config.containers);
            run(&cli, &source, &artifacts).await
        }
    }
}

async fn run<S: ObjectStore>(
    cli: &Cli,
    source: &dyn ConfigSource,
    artifacts: &ArtifactStore<S>,
) -> anyhow::Result<()> {
    match &cli.command {
        Command::Process {
            file,
            document_name,
            location,
            year,
            doc_type,
            embed,
        } => {
            let mut request = DocumentRequest::from_path(file)?;
            request.document_name = document_name.clone().unwrap_or_default();
            request.location = location.clone();
            request.year = *year;
            request.doc_type = doc_type.clone();

            let output = DocumentPipeline::new(artifacts)
                .with_defaults(PipelineDefaults::from_source(source)?)
                .run(request)
                .await
                .into_result()?;

            let document_id = output.document.document_id().to_string();
            println!("document_id={document_id}");
            println!(
                "pages={} chunks={} container={}",
                output.document.pages.len(),
                output.document.total_chunks(),
                output.written.container
            );
            println!("  {}", output.written.metadata);
            for key in output.written.pages.iter().chain(&output.written.chunks) {
                println!("  {key}");
            }

            if *embed {
                embed_stage(cli, source, artifacts, &document_id).await?;
            }
        }
        Command::Embed { document_id } => {
            embed_stage(cli, source, artifacts, document_id).await?;
        }
        Command::Graph { document_id } => {
            let chunks = artifacts.read_embedded_chunks(document_id).await?;
            print_graph_report(&graph_stage(cli, source, &chunks).await?);
        }
        Command::Index {
            document_id,
            index_name,
        } => {
            let chunks = artifacts.read_embedded_chunks(document_id).await?;
            let report = index_stage(cli, source, index_name.as_deref(), &chunks).await?;
            print_upload_report(&report);
        }
        Command::Project { document_id } => {
            let chunks = artifacts.read_embedded_chunks(document_id).await?;
            let (graph, index) = tokio::join!(
                graph_stage(cli, source, &chunks),
                index_stage(cli, source, None, &chunks)
            );

            let mut failed = false;
            match graph {
                Ok(report) => print_graph_report(&report),
                Err(error) => {
                    failed = true;
                    println!("graph projection failed: {error:#}");
                }
            }
            match index {
                Ok(report) => print_upload_report(&report),
                Err(error) => {
                    failed = true;
                    println!("search projection failed: {error:#}");
                }
            }
            if failed {
                anyhow::bail!("projection of {document_id} incomplete");
            }
        }
    }

    Ok(())
}

async fn embed_stage<S: ObjectStore>(
    cli: &Cli,
    source: &dyn ConfigSource,
    artifacts: &ArtifactStore<S>,
    document_id: &str,
) -> anyhow::Result<()> {
    let report = if cli.offline_embeddings {
        let dimensions = vector_dimensions(source)?;
        let client = EmbeddingClient::new(HashingEmbeddings::new(dimensions), "offline-hashing");
        embed_document(artifacts, &client, document_id).await?
    } else {
        let config = EmbeddingConfig::from_source(source)?;
        let backend =
            AzureOpenAiEmbeddings::new(&config.endpoint, &config.api_key, &config.api_version);
        let client = EmbeddingClient::new(backend, &config.deployment)
            .with_batch_size(config.batch_size)
            .with_pause(config.pause_every, rfp_pipeline_core::embeddings::DEFAULT_PAUSE)
            .with_retry_policy(RetryPolicy {
                max_attempts: config.max_attempts,
                ..RetryPolicy::default()
            });
        embed_document(artifacts, &client, document_id).await?
    };

    print_embed_report(&report);
    Ok(())
}

async fn graph_stage(
    cli: &Cli,
    source: &dyn ConfigSource,
    chunks: &[EmbeddedChunk],
) -> anyhow::Result<GraphBuildReport> {
    let document_id = document_id_of(chunks);
    if cli.dry_run {
        return build_graph(MemoryGraphStore::default(), &document_id, chunks).await;
    }

    let config = Neo4jConfig::from_source(source)?;
    let store = Neo4jStore::new(
        &config.http_endpoint,
        &config.database,
        &config.username,
        &config.password,
    );
    build_graph(store, &document_id, chunks).await
}

async fn build_graph<G: GraphStore>(
    store: G,
    document_id: &str,
    chunks: &[EmbeddedChunk],
) -> anyhow::Result<GraphBuildReport> {
    Ok(GraphProjectionBuilder::new(store)
        .build(document_id, chunks)
        .await?)
}

async fn index_stage(
    cli: &Cli,
    source: &dyn ConfigSource,
    index_name: Option<&str>,
    chunks: &[EmbeddedChunk],
) -> anyhow::Result<UploadReport> {
    let dimensions = chunks
        .first()
        .map(|chunk| chunk.embedding.len())
        .unwrap_or(DEFAULT_VECTOR_DIMENSIONS);

    if cli.dry_run {
        let groups: Vec<String> = source
            .get_env("GROUP_ACCESS_LIST")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|group| !group.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let index = index_name.unwrap_or(DEFAULT_INDEX_NAME);
        return upload(
            MemorySearchService::default(),
            GroupAssignment::default(),
            index,
            dimensions,
            chunks,
            &groups,
        )
        .await;
    }

    let config = SearchConfig::from_source(source)?;
    if dimensions != config.vector_dimensions {
        warn!(
            embedded = dimensions,
            configured = config.vector_dimensions,
            "embedding dimension differs from the configured index dimension"
        );
    }
    let service = AzureSearchService::new(&config.endpoint, &config.admin_key);
    let index = index_name.unwrap_or(&config.index_name);
    upload(
        service,
        config.group_assignment,
        index,
        config.vector_dimensions,
        chunks,
        &config.access_groups,
    )
    .await
}

async fn upload<S: SearchIndexService>(
    service: S,
    assignment: GroupAssignment,
    index: &str,
    dimensions: usize,
    chunks: &[EmbeddedChunk],
    groups: &[String],
) -> anyhow::Result<UploadReport> {
    let uploader = SearchProjectionUploader::new(service).with_group_assignment(assignment);
    uploader.ensure_index(index, dimensions).await?;
    Ok(uploader.upload(index, chunks, groups).await?)
}

fn document_id_of(chunks: &[EmbeddedChunk]) -> String {
    chunks
        .first()
        .map(|chunk| chunk.chunk.metadata.document_id.clone())
        .unwrap_or_default()
}

fn print_embed_report(report: &EmbedReport) {
    println!(
        "embedded document_id={} chunks={} dimensions={}",
        report.document_id, report.total_chunks, report.dimensions
    );
    for name in &report.blob_names {
        println!("  {name}");
    }
}

fn print_graph_report(report: &GraphBuildReport) {
    println!(
        "graph document_id={} schema={} nodes_created={} statements={}",
        report.document_id, report.schema, report.nodes_created, report.statements
    );
    if report.defaulted_schema {
        println!("  doc_type not recognised, request schema used");
    }
}

fn print_upload_report(report: &UploadReport) {
    println!(
        "search uploaded={} failed={}",
        report.uploaded,
        report.failed.len()
    );
    for (key, message) in &report.failed {
        println!("  {key}: {message}");
    }
}
