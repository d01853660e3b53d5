//! Command-line client for Depot.

mod api_client;

use anyhow::{Context, Result};
use api_client::ApiClient;
use clap::{Args, Parser, Subcommand};
use depot_client::{
    ByteSource, FileSink, FileSource, HashingSource, HttpProvider, PaymentRequirements,
    PipeOptions, ProgressObserver, RetryPolicy, StaticPaymentGate, TransferProgress,
    UploadManager, UploadOptions, WriterSink,
};
use depot_core::config::AppConfig;
use depot_core::{ObjectMetadata, UploadPhase};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "depotctl")]
#[command(about = "Command-line client for Depot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ServerArgs {
    /// Server URL
    #[arg(long, env = "DEPOT_SERVER", default_value = DEFAULT_SERVER)]
    server: String,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// Client configuration file (transfer limits and payment account)
    #[arg(long, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the piece identifier of a file without uploading it
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Upload a file and print its identifier
    Upload {
        /// File to upload
        file: PathBuf,

        /// Metadata entry as key=value (repeatable, at most 5)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Request CDN-backed retrieval
        #[arg(long)]
        with_cdn: bool,

        /// Suppress progress output
        #[arg(long, short)]
        quiet: bool,

        #[command(flatten)]
        server: ServerArgs,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Download an object, or a byte range of it
    Download {
        /// Object identifier
        identifier: String,

        /// Byte range, e.g. `bytes=0-499`
        #[arg(long)]
        range: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Suppress progress output
        #[arg(long, short)]
        quiet: bool,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Show the server's upload limits
    Capabilities {
        #[command(flatten)]
        server: ServerArgs,
    },

    /// Check server health
    Health {
        #[command(flatten)]
        server: ServerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so downloads to stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Hash { file } => handle_hash_command(&file).await,
        Commands::Upload {
            file,
            meta,
            with_cdn,
            quiet,
            server,
            config,
        } => handle_upload_command(&file, &meta, with_cdn, quiet, &server, &config).await,
        Commands::Download {
            identifier,
            range,
            output,
            quiet,
            server,
        } => {
            handle_download_command(
                &identifier,
                range.as_deref(),
                output.as_deref(),
                quiet,
                &server,
            )
            .await
        }
        Commands::Capabilities { server } => handle_capabilities_command(&server).await,
        Commands::Health { server } => handle_health_command(&server).await,
    }
}

async fn handle_hash_command(file: &Path) -> Result<()> {
    let source = FileSource::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let mut source = HashingSource::new(source);
    while source
        .read_chunk(depot_core::DEFAULT_CHUNK_SIZE)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?
        .is_some()
    {}

    let size = source.bytes_hashed();
    let identifier = source.finalize().context("failed to compute identifier")?;
    println!("{identifier}");
    eprintln!("{} ({})", file.display(), format_bytes(size));
    Ok(())
}

fn parse_metadata(entries: &[String]) -> Result<ObjectMetadata> {
    let mut metadata = ObjectMetadata::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("metadata must be KEY=VALUE, got {entry:?}"))?;
        metadata.insert(key, value)?;
    }
    Ok(metadata)
}

async fn handle_upload_command(
    file: &Path,
    meta: &[String],
    with_cdn: bool,
    quiet: bool,
    server: &ServerArgs,
    config: &ConfigArgs,
) -> Result<()> {
    let config = AppConfig::load(config.config.as_deref()).context("failed to load configuration")?;
    let metadata = parse_metadata(meta)?;
    let base_url = reqwest::Url::parse(&server.server).context("invalid server URL")?;

    let provider = HttpProvider::new(base_url.to_string(), base_url)
        .with_channel_depth(config.transfer.channel_depth);
    let manager = UploadManager::new(
        config.transfer.clone(),
        Arc::new(StaticPaymentGate::from_config(&config.payment)),
        PaymentRequirements::from_config(&config.payment),
    )
    .with_provider(Arc::new(provider))
    .with_retry_policy(RetryPolicy::from_config(&config.transfer));

    let mut opts = UploadOptions::default()
        .with_cdn(with_cdn)
        .with_cancel(cancel_on_interrupt("upload"));
    if !quiet {
        opts = opts.with_observer(Arc::new(ProgressPrinter::default()));
    }

    let source = FileSource::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let size = source.size_hint();
    let receipt = manager
        .upload(source, size, metadata, &opts)
        .await
        .context("upload failed")?;

    println!("{}", receipt.identifier);
    eprintln!(
        "Uploaded {} to {} in {:.1}s ({} attempt{})",
        format_bytes(receipt.size),
        receipt.provider,
        receipt.elapsed.as_secs_f64(),
        receipt.attempts,
        if receipt.attempts == 1 { "" } else { "s" }
    );
    Ok(())
}

/// Token cancelled by the first Ctrl-C.
fn cancel_on_interrupt(operation: &'static str) -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling {operation}...");
            on_interrupt.cancel();
        }
    });
    cancel
}

/// Prints a progress line every few percent, and phase changes.
#[derive(Default)]
struct ProgressPrinter {
    last_percent: AtomicU64,
}

impl ProgressObserver for ProgressPrinter {
    fn on_progress(&self, progress: &TransferProgress) {
        let Some(fraction) = progress.fraction() else {
            return;
        };
        let percent = (fraction * 100.0) as u64;
        let last = self.last_percent.load(Ordering::Relaxed);
        if percent >= last + 5 || (percent == 100 && last != 100) {
            self.last_percent.store(percent, Ordering::Relaxed);
            eprintln!("  {percent:>3}% ({})", format_bytes(progress.transferred));
        }
    }

    fn on_phase(&self, phase: &UploadPhase) {
        if !phase.is_terminal() {
            eprintln!("{}...", phase.as_str());
        }
    }
}

async fn handle_download_command(
    identifier: &str,
    range: Option<&str>,
    output: Option<&Path>,
    quiet: bool,
    server: &ServerArgs,
) -> Result<()> {
    let client = ApiClient::new(&server.server)?;

    let mut opts = PipeOptions::default().with_cancel(cancel_on_interrupt("download"));
    if !quiet && output.is_some() {
        opts = opts.with_observer(Arc::new(ProgressPrinter::default()));
    }

    let summary = match output {
        Some(path) => {
            let mut sink = FileSink::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            let summary = match client.download(identifier, range, &mut sink, &opts).await {
                Ok(summary) => summary,
                Err(e) => {
                    drop(sink);
                    if let Err(remove_err) = tokio::fs::remove_file(path).await {
                        tracing::warn!(error = %remove_err, "failed to remove partial download");
                    }
                    return Err(e);
                }
            };
            sink.into_inner()
                .sync_all()
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            summary
        }
        None => {
            let mut sink = WriterSink::new(tokio::io::stdout());
            client.download(identifier, range, &mut sink, &opts).await?
        }
    };

    let rate = summary.bytes as f64 / summary.elapsed.as_secs_f64().max(0.001);
    match &summary.content_range {
        Some(content_range) => eprintln!(
            "Downloaded {} ({content_range}) at {}/s",
            format_bytes(summary.bytes),
            format_bytes(rate as u64)
        ),
        None => eprintln!(
            "Downloaded {} at {}/s",
            format_bytes(summary.bytes),
            format_bytes(rate as u64)
        ),
    }
    Ok(())
}

async fn handle_capabilities_command(server: &ServerArgs) -> Result<()> {
    let client = ApiClient::new(&server.server)?;
    let caps = client.capabilities().await?;

    println!("API version:     {}", caps.api_version);
    println!("Chunk size:      {}", format_bytes(caps.chunk_size));
    println!("Min object size: {}", format_bytes(caps.min_object_size));
    println!("Max object size: {}", format_bytes(caps.max_object_size));
    println!("CDN supported:   {}", if caps.supports_cdn { "yes" } else { "no" });
    Ok(())
}

async fn handle_health_command(server: &ServerArgs) -> Result<()> {
    let client = ApiClient::new(&server.server)?;
    let health = client.health().await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
