use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use vigil_core::matcher::DEFAULT_MATCH_THRESHOLD;
use vigil_core::preprocess::DEFAULT_INPUT_SIZE;
use vigil_core::{
    gallery, load_graph, Device, DistanceMatcher, EmbeddingEngine, EngineOptions, ErrorResponse,
    InferResponse, InferenceResult, Matcher, TensorLayout,
};

const DEFAULT_URL: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil face identification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an image to the daemon for identification
    Infer {
        /// Image file to identify
        image: PathBuf,
        /// Daemon base URL
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
        /// Service segment of the infer endpoint
        #[arg(long, default_value = "vigil")]
        service: String,
    },
    /// Show daemon status
    Status {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// List the identities a gallery directory would provide
    Gallery {
        /// Gallery directory
        dir: PathBuf,
    },
    /// Embed two images locally and compare them
    Compare {
        first: PathBuf,
        second: PathBuf,
        /// Embedding graph (ONNX)
        #[arg(long)]
        graph: PathBuf,
        #[arg(long, default_value = "cpu")]
        device: String,
        #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
        input_size: u32,
        #[arg(long, default_value = "nchw")]
        layout: TensorLayout,
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
        /// Expected embedding length; unset accepts whatever the graph emits
        #[arg(long)]
        embedding_dim: Option<usize>,
        /// Compare raw graph outputs instead of unit-length embeddings
        #[arg(long)]
        no_l2_normalize: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Infer {
            image,
            url,
            service,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let endpoint = format!("{}/api/{service}/infer", url.trim_end_matches('/'));
            let response = reqwest::Client::new()
                .post(&endpoint)
                .body(bytes)
                .send()
                .await
                .with_context(|| format!("contacting {endpoint}"))?;
            let status = response.status();
            let body = response.bytes().await?;
            let result = decode_infer_response(status.is_success(), &body)?;
            println!("{}", result.message);
            println!("  identified: {}", result.identified);
            println!("  person:     {}", result.person);
            println!("  confidence: {}", result.confidence);
        }
        Commands::Status { url } => {
            let endpoint = format!("{}/api/status", url.trim_end_matches('/'));
            let status: serde_json::Value = reqwest::get(&endpoint)
                .await
                .with_context(|| format!("contacting {endpoint}"))?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Gallery { dir } => {
            let entries = gallery::enumerate(&dir)
                .with_context(|| format!("listing {}", dir.display()))?;
            if entries.is_empty() {
                println!("No gallery images in {}", dir.display());
            }
            for entry in entries {
                println!("{:<24} {}", entry.label, entry.path.display());
            }
        }
        Commands::Compare {
            first,
            second,
            graph,
            device,
            input_size,
            layout,
            threshold,
            embedding_dim,
            no_l2_normalize,
        } => {
            let device = Device::open(&device)?;
            let graph = load_graph(&graph, &device, input_size, 1)?;
            let mut engine = EmbeddingEngine::new(
                graph,
                EngineOptions {
                    layout,
                    embedding_dim,
                    l2_normalize: !no_l2_normalize,
                },
            );
            let a = engine.infer(&open_image(&first)?)?;
            let b = engine.infer(&open_image(&second)?)?;
            let decision = DistanceMatcher::new(threshold).compare(&a, &b)?;
            println!(
                "{} (distance {}, threshold {threshold})",
                if decision.is_match { "match" } else { "no match" },
                decision.confidence
            );
        }
    }

    Ok(())
}

fn open_image(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).with_context(|| format!("decoding {}", path.display()))
}

/// Turn an infer response body into a result, or the daemon's error message.
fn decode_infer_response(success: bool, body: &[u8]) -> Result<InferenceResult> {
    if !success {
        let message = serde_json::from_slice::<ErrorResponse>(body)
            .map(|e| e.response_message)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
        bail!("daemon rejected the request: {message}");
    }
    let wire: InferResponse = serde_json::from_slice(body).context("malformed response body")?;
    Ok(InferenceResult::try_from(wire)?)
}
