use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use loupe::{Document, Index, Schema, SegmentId};
use prometheus::{Encoder, TextEncoder};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "loupe")]
#[command(about = "Embedded full-text search engine", long_about = None)]
struct Args {
    /// Index directory
    #[arg(long, env = "LOUPE_INDEX_DIR", default_value = "./index")]
    index_dir: PathBuf,

    /// Open the index even if some segments fail verification
    #[arg(long, env = "LOUPE_SKIP_CORRUPT")]
    skip_corrupt: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new index from a JSON schema file
    Create {
        #[arg(long)]
        schema: PathBuf,
    },
    /// Add documents from a JSON-lines file and commit them
    Index {
        #[arg(long)]
        input: PathBuf,
        /// Commit every N documents (0 = once at the end)
        #[arg(long, default_value = "0")]
        commit_every: usize,
    },
    /// Run a query and print matching documents as JSON lines
    Search {
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Also count matches under this facet field
        #[arg(long)]
        facet: Option<String>,
        #[arg(long, default_value = "/")]
        facet_root: String,
        /// Also run aggregations given as a JSON object
        #[arg(long)]
        aggs: Option<String>,
    },
    /// Merge every committed segment into one
    Merge,
    /// Print the committed segments
    Info {
        /// Dump metrics in Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("loupe v{}", loupe::VERSION);

    match args.command {
        Command::Create { schema } => {
            let json = std::fs::read_to_string(&schema)
                .with_context(|| format!("reading schema {}", schema.display()))?;
            let schema = Schema::from_json(&json)?;
            Index::create_in_dir(&args.index_dir, schema)?;
            info!(path = %args.index_dir.display(), "Index created");
        }
        Command::Index {
            input,
            commit_every,
        } => {
            let index = open(&args.index_dir, args.skip_corrupt)?;
            let file =
                File::open(&input).with_context(|| format!("opening {}", input.display()))?;
            let mut writer = index.writer()?;
            let mut added = 0usize;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let doc = Document::from_json(index.schema(), &line)
                    .with_context(|| format!("line {}", line_no + 1))?;
                writer.add_document(doc)?;
                added += 1;
                if commit_every > 0 && added % commit_every == 0 {
                    writer.commit()?;
                }
            }
            let generation = writer.commit()?;
            writer.wait_merging_threads()?;
            writer.close()?;
            info!(docs = added, generation, "Indexing finished");
        }
        Command::Search {
            query,
            limit,
            facet,
            facet_root,
            aggs,
        } => {
            let index = open(&args.index_dir, args.skip_corrupt)?;
            let searcher = index.searcher();
            let plan = searcher.parse_query(&query)?;
            for hit in searcher.search(&plan, limit)? {
                let doc = searcher.doc_json(hit.address)?;
                println!(
                    "{}",
                    serde_json::json!({ "score": hit.score, "ordinal": hit.global_ordinal, "doc": doc })
                );
            }
            if let Some(field) = facet {
                let counts = searcher.facet_counts(&plan, &field, &facet_root)?;
                for (facet, count) in counts.top(counts.len()) {
                    println!("{}\t{}", facet, count);
                }
            }
            if let Some(json) = aggs {
                let requests = loupe::parse_aggregations(&json)?;
                let results = searcher.aggregate(&plan, &requests)?;
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }
        Command::Merge => {
            let index = open(&args.index_dir, args.skip_corrupt)?;
            let writer = index.writer()?;
            let ids = writer.searchable_segment_ids();
            if ids.len() < 2 {
                info!(segments = ids.len(), "Nothing to merge");
                return Ok(());
            }
            match writer.merge(&ids)? {
                Some(SegmentId(id)) => info!(inputs = ids.len(), merged = id, "Merged"),
                None => warn!("Merge produced no segment"),
            }
        }
        Command::Info { metrics } => {
            let index = open(&args.index_dir, args.skip_corrupt)?;
            let generation = index.current_generation();
            println!(
                "generation {} opstamp {} docs {} alive {}",
                generation.id(),
                generation.opstamp(),
                generation.num_docs(),
                generation.num_alive()
            );
            for stats in generation.stats() {
                println!(
                    "{}\tdocs {}\tdeleted {}\tbytes {}",
                    stats.id, stats.num_docs, stats.num_deleted, stats.size_bytes
                );
            }
            if metrics {
                let mut buffer = Vec::new();
                TextEncoder::new().encode(&index.metrics().registry().gather(), &mut buffer)?;
                print!("{}", String::from_utf8(buffer)?);
            }
        }
    }
    Ok(())
}

fn open(path: &PathBuf, skip_corrupt: bool) -> Result<Index> {
    if !path.exists() {
        bail!("no index at {}", path.display());
    }
    let index = if skip_corrupt {
        Index::open_in_dir_skip_corrupt(path)?
    } else {
        Index::open_in_dir(path)?
    };
    Ok(index)
}
