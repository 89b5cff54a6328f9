mod server;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use kb_ingest_core::{
    content_type_for, object_path, CharacterNgramEmbedder, DeletionOptions, DeletionSynchronizer,
    Embedder, IngestRequest, IngestionOptions, IngestionOrchestrator, ObjectStore,
    OpenAiConfig, OpenAiEmbedder, PostgrestVectorStore, SharedEmbedder, SharedObjectStore,
    SharedVectorStore, StatusReconciler, SupabaseConnection, SupabaseStorage, UploadOptions,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kb-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    /// Supabase service role key
    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    supabase_service_role_key: String,

    /// Storage bucket holding client source files
    #[arg(long, env = "KB_BUCKET", default_value = "knowledge_base")]
    bucket: String,

    /// Vector table
    #[arg(long, env = "KB_TABLE", default_value = "rag_documents")]
    table: String,

    /// Embedding backend
    #[arg(long, env = "KB_EMBEDDER", value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Must match the vector column of the table.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Files processed in parallel per training run.
    #[arg(long, env = "KB_MAX_CONCURRENT_FILES", default_value_t = 1)]
    max_concurrent_files: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    Openai,
    /// Offline character trigram hashing, for local runs.
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "KB_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Bearer token required on every /api route.
        #[arg(long, env = "KB_API_TOKEN", hide_env_values = true)]
        api_token: String,
        /// Upper bound for one training request.
        #[arg(long, env = "KB_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
        request_timeout_secs: u64,
    },
    /// (Re)index files that are already uploaded.
    Train {
        #[arg(long)]
        client: String,
        /// File names under the client's folder.
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Show TRAINED / NOT TRAINED per file.
    Status {
        #[arg(long)]
        client: String,
    },
    /// Upload a local file into the client's folder.
    Upload {
        #[arg(long)]
        client: String,
        path: PathBuf,
        /// Object name; defaults to the local file name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Train the file right after uploading.
        #[arg(long, default_value_t = false)]
        train: bool,
    },
    /// Delete a file's embeddings, keeping the source file.
    DeleteEmbeddings {
        #[arg(long)]
        client: String,
        file: String,
        /// Skip the percent-encoded name retry.
        #[arg(long, default_value_t = false)]
        no_legacy_fallback: bool,
    },
    /// Remove a source file and its embeddings.
    Remove {
        #[arg(long)]
        client: String,
        file: String,
    },
    /// Delete every embedding and source file of a client.
    Purge {
        #[arg(long)]
        client: String,
    },
    /// Delete embeddings whose source file no longer exists.
    Reap {
        #[arg(long)]
        client: String,
    },
}

struct Collaborators {
    objects: SharedObjectStore,
    vectors: SharedVectorStore,
    embedder: SharedEmbedder,
}

impl Collaborators {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let connection =
            SupabaseConnection::new(&cli.supabase_url, cli.supabase_service_role_key.clone())
                .context("invalid SUPABASE_URL")?;
        let objects: SharedObjectStore =
            Arc::new(SupabaseStorage::new(connection.clone(), cli.bucket.clone()));
        let vectors: SharedVectorStore =
            Arc::new(PostgrestVectorStore::new(connection, cli.table.clone()));

        let embedder: SharedEmbedder = match cli.embedder {
            EmbedderKind::Openai => Arc::new(OpenAiEmbedder::new(OpenAiConfig {
                base_url: cli.openai_base_url.clone(),
                api_key: cli.openai_api_key.clone(),
                model: cli.embedding_model.clone(),
                dimensions: cli.embedding_dimensions,
                ..OpenAiConfig::default()
            })?),
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
                dimensions: cli.embedding_dimensions,
            }),
        };

        Ok(Self {
            objects,
            vectors,
            embedder,
        })
    }

    fn orchestrator(&self, cli: &Cli) -> anyhow::Result<server::Orchestrator> {
        let options = IngestionOptions {
            max_concurrent_files: cli.max_concurrent_files,
            ..IngestionOptions::default()
        };
        Ok(IngestionOrchestrator::new(
            self.objects.clone(),
            self.vectors.clone(),
            self.embedder.clone(),
            options,
        )?)
    }

    fn reconciler(&self) -> server::Reconciler {
        StatusReconciler::new(self.objects.clone(), self.vectors.clone())
    }

    fn deletion(&self, options: DeletionOptions) -> server::Deletion {
        DeletionSynchronizer::with_options(self.objects.clone(), self.vectors.clone(), options)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn train(
    orchestrator: &server::Orchestrator,
    client: String,
    files: Vec<String>,
) -> anyhow::Result<()> {
    let report = orchestrator.ingest(&IngestRequest::new(client, files)).await?;
    for error in &report.errors {
        warn!(%error, "training error");
    }
    print_json(&report)?;
    if report.is_total_failure() {
        bail!("processing failed: no chunks were written");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let collaborators = Collaborators::from_cli(&cli)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        embedder = collaborators.embedder.model_name(),
        started_at = %Utc::now().to_rfc3339(),
        "kb-ingest boot"
    );

    match &cli.command {
        Command::Serve {
            bind,
            api_token,
            request_timeout_secs,
        } => {
            if api_token.trim().is_empty() {
                bail!("KB_API_TOKEN must not be empty");
            }
            let state = server::AppState {
                orchestrator: Arc::new(collaborators.orchestrator(&cli)?),
                status: Arc::new(collaborators.reconciler()),
                deletion: Arc::new(collaborators.deletion(DeletionOptions::default())),
                api_token: Arc::from(api_token.as_str()),
                request_timeout: Duration::from_secs(*request_timeout_secs),
            };
            server::run(state, bind).await?;
        }
        Command::Train { client, files } => {
            let orchestrator = collaborators.orchestrator(&cli)?;
            train(&orchestrator, client.clone(), files.clone()).await?;
        }
        Command::Status { client } => {
            let statuses = collaborators.reconciler().status(client).await?;
            for status in &statuses {
                println!(
                    "{:<12} {}  updated={}  chunks={}",
                    status.status.as_str(),
                    status.name,
                    status.updated_at.to_rfc3339(),
                    status.indexed_chunks
                );
            }
        }
        Command::Upload {
            client,
            path,
            name,
            overwrite,
            train: train_after,
        } => {
            let name = match name {
                Some(name) => name.clone(),
                None => path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .with_context(|| format!("cannot derive a file name from {}", path.display()))?,
            };
            kb_ingest_core::ingest::validate_file_name(&name)?;
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;

            collaborators
                .objects
                .upload(
                    &object_path(client, &name),
                    bytes,
                    UploadOptions {
                        overwrite: *overwrite,
                        content_type: Some(content_type_for(&name).to_string()),
                    },
                )
                .await?;
            info!(client_id = %client, file = %name, "uploaded");

            if *train_after {
                let orchestrator = collaborators.orchestrator(&cli)?;
                train(&orchestrator, client.clone(), vec![name]).await?;
            }
        }
        Command::DeleteEmbeddings {
            client,
            file,
            no_legacy_fallback,
        } => {
            let deletion = collaborators.deletion(DeletionOptions {
                legacy_encoded_fallback: !no_legacy_fallback,
            });
            print_json(&deletion.delete_embeddings(client, file).await?)?;
        }
        Command::Remove { client, file } => {
            let deletion = collaborators.deletion(DeletionOptions::default());
            print_json(&deletion.remove_file(client, file).await?)?;
        }
        Command::Purge { client } => {
            let deletion = collaborators.deletion(DeletionOptions::default());
            let report = deletion.purge_client(client).await?;
            print_json(&report)?;
            if !report.errors.is_empty() {
                bail!("purge finished with {} error(s)", report.errors.len());
            }
        }
        Command::Reap { client } => {
            let deletion = collaborators.deletion(DeletionOptions::default());
            let report = deletion.reap_orphans(client).await?;
            print_json(&report)?;
            if !report.errors.is_empty() {
                bail!("reap finished with {} error(s)", report.errors.len());
            }
        }
    }

    Ok(())
}
