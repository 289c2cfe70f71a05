mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use simili_embed::OllamaEmbedder;
use simili_index::{
    ChunkKind, DuplicateGroup, DuplicateOptions, IndexOptions, IndexProgress, IndexRegistry,
    IndexReport, IndexStats, SearchResult,
};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "simili")]
#[command(about = "Find near-duplicate components, hooks and functions by embedding similarity")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build or incrementally update the index of a directory
    Index {
        path: PathBuf,
        /// Discard the persisted index and rebuild
        #[arg(long)]
        force: bool,
        /// Embedding model for this root
        #[arg(long)]
        model: Option<String>,
        /// Extra gitignore-style globs to skip
        #[arg(long, num_args = 1..)]
        exclude: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// List groups of near-duplicate chunks
    Dupes {
        path: PathBuf,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        min_group_size: Option<usize>,
        /// component, hook, function or other
        #[arg(long)]
        kind: Option<ChunkKind>,
        #[arg(long)]
        json: bool,
    },
    /// Rank indexed chunks against a free-text query
    Search {
        query: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// Rank chunks similar to the one at FILE:LINE
    Similar {
        path: PathBuf,
        location: String,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics
    Stats {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Delete the persisted index of a directory
    Clear { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber(cli.verbose);

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate()?;

    let provider =
        OllamaEmbedder::new(config.ollama()).context("failed to build embedding client")?;
    let registry = IndexRegistry::new(provider, config.indexer());

    match cli.command {
        Command::Index {
            path,
            force,
            model,
            exclude,
            json,
        } => {
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());
            let options = IndexOptions {
                force,
                exclude,
                cancel: Some(cancel),
                on_progress: Some(Arc::new(log_progress)),
            };
            let report = registry
                .index_directory(&path, model.as_deref(), &options)
                .await
                .with_context(|| format!("indexing {}", path.display()))?;
            emit(json, &report, print_report)?;
        }
        Command::Dupes {
            path,
            threshold,
            min_group_size,
            kind,
            json,
        } => {
            let options = DuplicateOptions {
                threshold: threshold.unwrap_or(config.duplicates.threshold),
                min_group_size: min_group_size.unwrap_or(config.duplicates.min_group_size),
                kind,
            };
            let groups = registry
                .find_duplicates(&path, &options)
                .await
                .with_context(|| format!("finding duplicates in {}", path.display()))?;
            emit(json, &groups, |g| print_groups(g))?;
        }
        Command::Search {
            query,
            path,
            top,
            threshold,
            json,
        } => {
            let hits = registry
                .search_similar(
                    &query,
                    &path,
                    top.unwrap_or(config.search.top),
                    threshold.unwrap_or(config.search.threshold),
                )
                .await
                .with_context(|| format!("searching {}", path.display()))?;
            emit(json, &hits, |h| print_hits(h))?;
        }
        Command::Similar {
            path,
            location,
            top,
            threshold,
            json,
        } => {
            let (file, line) = parse_location(&location)?;
            let hits = registry
                .find_similar_at_location(
                    &path,
                    file,
                    line,
                    top.unwrap_or(config.search.top),
                    threshold.unwrap_or(config.search.threshold),
                )
                .await
                .with_context(|| format!("looking up {location}"))?;
            emit(json, &hits, |h| print_hits(h))?;
        }
        Command::Stats { path, json } => {
            let stats = registry
                .get_index_stats(&path)
                .await
                .with_context(|| format!("reading index of {}", path.display()))?;
            emit(json, &stats, print_stats)?;
        }
        Command::Clear { path } => {
            if registry.delete_index(&path)? {
                println!("index of {} deleted", path.display());
            } else {
                println!("no index at {}", path.display());
            }
        }
    }
    Ok(())
}

fn init_subscriber(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("SIMILI_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("simili.toml")
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        cancel.cancel();
    });
}

fn log_progress(progress: &IndexProgress) {
    tracing::debug!(
        phase = ?progress.phase,
        current = progress.current,
        total = progress.total,
        file = progress.file.as_deref().unwrap_or(""),
        "progress"
    );
}

/// Split `src/a.ts:42` at the last colon.
fn parse_location(location: &str) -> anyhow::Result<(&str, usize)> {
    let (file, line) = location
        .rsplit_once(':')
        .with_context(|| format!("expected FILE:LINE, got {location}"))?;
    let line: usize = line
        .parse()
        .with_context(|| format!("invalid line number in {location}"))?;
    if file.is_empty() || line == 0 {
        anyhow::bail!("expected FILE:LINE with a 1-based line, got {location}");
    }
    Ok((file, line))
}

fn emit<T: Serialize + ?Sized>(json: bool, value: &T, text: impl Fn(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_report(report: &IndexReport) {
    if report.rebuilt {
        println!("index rebuilt from scratch");
    }
    println!(
        "files: {} added, {} modified, {} deleted, {} unchanged",
        report.files_added, report.files_modified, report.files_deleted, report.files_unchanged
    );
    println!(
        "chunks: {} embedded, {} reused, {} removed, {} total in {} files",
        report.chunks_embedded,
        report.chunks_reused,
        report.chunks_removed,
        report.total_chunks,
        report.total_files
    );
    for skipped in &report.skipped_files {
        println!("skipped {}: {}", skipped.path, skipped.reason);
    }
    for failed in &report.failed_chunks {
        println!("failed {} ({}): {}", failed.id, failed.file_path, failed.reason);
    }
    println!("done in {} ms", report.duration_ms);
}

fn print_groups(groups: &[DuplicateGroup]) {
    if groups.is_empty() {
        println!("no duplicate groups");
        return;
    }
    for group in groups {
        println!(
            "group {} [{}] score {:.3} (similarity {:.3}, size ratio {:.2})",
            group.id, group.kind, group.duplicate_score, group.avg_similarity, group.size_ratio
        );
        for m in &group.members {
            println!(
                "  {} {}:{}-{}",
                m.name.as_deref().unwrap_or("<anonymous>"),
                m.file_path,
                m.start_line,
                m.end_line
            );
        }
    }
}

fn print_hits(hits: &[SearchResult]) {
    if hits.is_empty() {
        println!("no matches");
        return;
    }
    for hit in hits {
        println!(
            "{:.3} [{}] {} {}:{}-{}",
            hit.score,
            hit.kind,
            hit.name.as_deref().unwrap_or("<anonymous>"),
            hit.file_path,
            hit.start_line,
            hit.end_line
        );
        for line in hit.preview.lines() {
            println!("    {line}");
        }
    }
}

fn print_stats(stats: &IndexStats) {
    let m = &stats.manifest;
    println!("model: {}", m.model);
    if let Some(dimension) = m.dimension {
        println!("dimension: {dimension}");
    }
    println!("files: {}", stats.files);
    println!("chunks: {}", m.chunk_count);
    for (kind, count) in &stats.chunks_by_kind {
        println!("  {kind}: {count}");
    }
    println!("updated: {}", m.updated_at.to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_splits_at_last_colon() {
        assert_eq!(parse_location("src/a.ts:42").unwrap(), ("src/a.ts", 42));
        assert_eq!(parse_location("C:/repo/a.ts:7").unwrap(), ("C:/repo/a.ts", 7));
    }

    #[test]
    fn location_rejects_bad_input() {
        assert!(parse_location("src/a.ts").is_err());
        assert!(parse_location("src/a.ts:x").is_err());
        assert!(parse_location("src/a.ts:0").is_err());
        assert!(parse_location(":3").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "simili", "dupes", "web", "--threshold", "0.9", "--kind", "hook", "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Dupes {
                threshold, kind, json, ..
            } => {
                assert_eq!(threshold, Some(0.9));
                assert_eq!(kind, Some(ChunkKind::Hook));
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["simili", "-v", "search", "parse query"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Search { ref path, .. } if path == Path::new(".")));
    }

    #[test]
    fn config_flag_wins() {
        assert_eq!(
            resolve_config_path(Some(Path::new("custom.toml"))),
            PathBuf::from("custom.toml")
        );
    }
}
