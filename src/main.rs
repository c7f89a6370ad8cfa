//! Triplex CLI
//!
//! Brute-force top-k retrieval over a quantized triples index.
//!
//! # Usage
//!
//! ```bash
//! # Quantize pre-computed embeddings into a chunk payload
//! triplex ingest --input chunks.json --store store --key docs/intro.json
//!
//! # Build an index from payload groups
//! triplex build --store store --output corpus.tpx docs/intro.json docs/faq.json
//!
//! # Search it
//! triplex search --index corpus.tpx --query-file query.json -k 20 --store store
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use triplex::builder::{build_index_to_file, BuildError, EmbeddedVectors};
use triplex::chunking::{split_paragraphs, DEFAULT_MAX_CHARS};
use triplex::config::Config;
use triplex::fetch::ChunkFetcher;
use triplex::objstore::{LocalObjectStore, ObjectStore};
use triplex::payload::{encode_payload, ChunkRecord};
use triplex::{baseline_top_k, BackendKind, Index, Ranker, VectorType};
use triplex_core::simd::l2_normalize;

#[derive(Parser)]
#[command(name = "triplex")]
#[command(about = "Brute-force top-k retrieval over a quantized triples index")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quantize embedded chunks and store them as one payload group
    ///
    /// Input format: JSON array of {"text": "...", "embedding": [0.1, ...]}
    Ingest {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Object store root (defaults to the config's store_root)
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Object key of the payload group
        #[arg(short, long)]
        key: String,

        /// Storage type: int8 or float32
        #[arg(long)]
        vector_type: Option<VectorType>,

        /// L2-normalize embeddings before quantizing
        #[arg(long)]
        normalize: bool,
    },

    /// Split a text file into paragraphs for embedding (JSON to stdout)
    Split {
        /// Input text file (UTF-8)
        #[arg(short, long)]
        input: PathBuf,

        /// Longest paragraph, in characters
        #[arg(long, default_value_t = DEFAULT_MAX_CHARS)]
        max_chars: usize,
    },

    /// Build an index file from payload groups
    Build {
        /// Object store root (defaults to the config's store_root)
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Output index file
        #[arg(short, long)]
        output: PathBuf,

        /// Storage type: int8 or float32
        #[arg(long)]
        vector_type: Option<VectorType>,

        /// Payload group keys, in index order
        #[arg(required = true)]
        groups: Vec<String>,
    },

    /// Rank an index against a query vector
    Search {
        /// Index file
        #[arg(short, long)]
        index: PathBuf,

        /// Query vector (comma separated floats)
        #[arg(short, long, conflicts_with = "query_file")]
        query: Option<String>,

        /// JSON file holding the query vector as an array of floats
        #[arg(long)]
        query_file: Option<PathBuf>,

        /// Number of results
        #[arg(short = 'k', long, default_value = "20")]
        k: usize,

        /// cpu, host, cuda[:N] or metal[:N]
        #[arg(long)]
        backend: Option<BackendKind>,

        /// L2-normalize the query first
        #[arg(long)]
        normalize: bool,

        /// Object store root; when given, chunk text is printed
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Also rank with the full-sort baseline and report mismatches
        #[arg(long)]
        compare: bool,
    },

    /// Display statistics about an index file
    Stats {
        /// Index file
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Deserialize)]
struct EmbeddedChunk {
    text: String,
    embedding: Vec<f32>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            input,
            store,
            key,
            vector_type,
            normalize,
        } => {
            let store = LocalObjectStore::new(store.unwrap_or_else(|| config.store_root.clone()));
            let vector_type = vector_type.unwrap_or(config.build.vector_type);

            tracing::info!("Reading chunks from {:?}", input);
            let file = std::fs::File::open(&input)?;
            let chunks: Vec<EmbeddedChunk> = serde_json::from_reader(std::io::BufReader::new(file))?;
            if chunks.is_empty() {
                anyhow::bail!("No chunks found in input");
            }

            let mut records = Vec::with_capacity(chunks.len());
            for (i, mut chunk) in chunks.into_iter().enumerate() {
                if normalize {
                    l2_normalize(&mut chunk.embedding);
                }
                let record = ChunkRecord::from_vector(chunk.text, &chunk.embedding, vector_type)
                    .map_err(|e| anyhow::anyhow!("Chunk {}: {}", i, e))?;
                records.push(record);
            }

            store.put(&key, &encode_payload(&records)?)?;
            tracing::info!(
                "Stored {} {} chunks at {:?} under {}",
                records.len(),
                vector_type,
                store.root(),
                key
            );
        }

        Commands::Split { input, max_chars } => {
            let text = std::fs::read_to_string(&input)?;
            let paragraphs = split_paragraphs(&text, max_chars);
            tracing::info!("Found {} paragraphs in {:?}", paragraphs.len(), input);
            println!("{}", serde_json::to_string_pretty(&paragraphs)?);
        }

        Commands::Build {
            store,
            output,
            vector_type,
            groups,
        } => {
            let store = LocalObjectStore::new(store.unwrap_or_else(|| config.store_root.clone()));
            let mut build = config.build;
            if let Some(ty) = vector_type {
                build.vector_type = ty;
            }

            match build_index_to_file(&store, &groups, &EmbeddedVectors, &build, &output) {
                Ok((index, written)) => {
                    println!(
                        "Wrote {} triples ({} dims, {}) to {:?} ({} bytes)",
                        index.len(),
                        index.dim(),
                        index.vector_type(),
                        output,
                        written
                    );
                }
                Err(BuildError::EmptyIndex) => {
                    tracing::warn!("No triples found; no index written");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Search {
            index,
            query,
            query_file,
            k,
            backend,
            normalize,
            store,
            compare,
        } => {
            let mut query = match (query, query_file) {
                (Some(q), _) => parse_vector(&q).map_err(|e| anyhow::anyhow!("Bad --query: {}", e))?,
                (None, Some(path)) => read_query_file(&path)?,
                (None, None) => anyhow::bail!("Provide --query or --query-file"),
            };
            if normalize {
                l2_normalize(&mut query);
            }

            let index = Index::open(&index)?;
            println!("Triples: {}", index.len());

            let mut rank = config.rank.clone();
            if let Some(backend) = backend {
                rank.backend = backend;
            }
            let ranker = Ranker::new(rank)?;

            let started = Instant::now();
            let results = ranker.top_k(&index, &query, k)?;
            tracing::info!(
                "Ranked {} triples on {} in {:?}",
                index.len(),
                ranker.backend_name(),
                started.elapsed()
            );

            if compare {
                let baseline = baseline_top_k(&index, &query, k)?;
                let mut mismatches = 0usize;
                for (i, (fast, full)) in results.iter().zip(&baseline).enumerate() {
                    if fast.position() != full.position() || fast.score != full.score {
                        mismatches += 1;
                        println!(
                            "Mismatch at {}: {} {:.6} vs baseline {} {:.6}",
                            i,
                            fast.position(),
                            fast.score,
                            full.position(),
                            full.score
                        );
                    }
                }
                println!("Baseline comparison: {} mismatches", mismatches);
            }

            let fetcher = store.map(|root| ChunkFetcher::new(LocalObjectStore::new(root)));
            for (i, result) in results.iter().enumerate() {
                println!(
                    "{:>3}  {:.6}  {}{}",
                    i,
                    result.score,
                    result.triple.path(),
                    result.triple.location()
                );
                if let Some(fetcher) = &fetcher {
                    println!("     {}", fetcher.resolve(result.triple)?);
                }
            }
        }

        Commands::Stats { file } => {
            let index = Index::open(&file)?;
            let stats = index.stats();
            println!("Index File: {:?}", file);
            println!("  Vector Type: {}", stats.vector_type);
            println!("  Dimensions: {}", stats.dim);
            println!("  Triples: {}", stats.triples);
            println!(
                "  Matrix Size: {:.2} MB",
                stats.matrix_bytes as f64 / (1024.0 * 1024.0)
            );
            println!("  Paths: {}", stats.per_path.len());
            for (path, count) in &stats.per_path {
                println!("    {}: {} triples", path, count);
            }
        }
    }

    Ok(())
}

fn read_query_file(path: &Path) -> anyhow::Result<Vec<f32>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn parse_vector(s: &str) -> Result<Vec<f32>, String> {
    s.split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| e.to_string()))
        .collect()
}
