use std::path::PathBuf;

use clap::Parser;
use docfinder::{
    DataDir,
    ExtractorRegistry,
    Finder,
    IndexMode,
    IndexOptions,
    RunSummary,
    SearchFilters,
    SearchResult,
    colbert::ColbertEmbedder,
    error::Result,
    file_id::FileId,
    text_util,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCFINDER_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_finder(cli: &Cli, data_dir: DataDir) -> Result<Finder> {
    match &cli.model {
        Some(model) => Finder::open_with(
            data_dir,
            Box::new(ColbertEmbedder::new(Some(model.as_str()))),
            ExtractorRegistry::default(),
        ),
        None => Finder::open(data_dir),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    // Verify and repair must be able to open an inconsistent index.
    if matches!(cli.command, Command::Verify(_) | Command::Repair) {
        let finder = Finder::open_for_repair(data_dir)?;
        return match &cli.command {
            Command::Verify(args) => cmd_verify(&finder, args.json),
            _ => cmd_repair(&finder),
        };
    }

    let finder = open_finder(&cli, data_dir)?;

    match &cli.command {
        Command::Add(args) => cmd_add(&finder, &args.paths)?,
        Command::Rm(args) => cmd_rm(&finder, &args.paths, args.all)?,
        Command::Status(args) => cmd_status(&finder, args.json)?,
        Command::Index(args) => cmd_index(&finder, args)?,
        Command::Search(args) => cmd_search(&finder, args)?,
        Command::Stats(args) => cmd_stats(&finder, args.json)?,
        Command::Clear => {
            finder.clear_index()?;
            println!("Index cleared.");
        }
        Command::RemoveFile { path } => {
            let displaced = finder.remove_file(path)?;
            println!(
                "Removed {} {} ({} chunk(s))",
                FileId(displaced.file_id),
                path.display(),
                displaced.chunks
            );
        }
        Command::Show(args) => {
            let content = finder.get_file_content(&args.path, args.from, args.lines)?;
            if args.line_numbers {
                println!("{}", text_util::add_line_numbers(&content, args.from));
            } else {
                println!("{content}");
            }
        }
        Command::Config { action } => cmd_config(&finder, action)?,
        Command::Verify(_) | Command::Repair | Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_add(finder: &Finder, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let outcome = finder.stage_add(path)?;
        println!(
            "{}: {} staged, {} already staged, {} ignored, {} unsupported",
            path.display(),
            outcome.added,
            outcome.already_staged,
            outcome.ignored,
            outcome.unsupported
        );
    }
    Ok(())
}

fn cmd_rm(finder: &Finder, paths: &[PathBuf], all: bool) -> Result<()> {
    if all {
        println!("Unstaged {} file(s)", finder.stage_clear()?);
        return Ok(());
    }
    for path in paths {
        let removed = finder.stage_remove(path)?;
        println!("{}: unstaged {removed} file(s)", path.display());
    }
    Ok(())
}

fn cmd_status(finder: &Finder, json: bool) -> Result<()> {
    let status = finder.stage_status()?;
    if json {
        return print_json(&status);
    }

    if status.entries.is_empty() {
        println!("Nothing staged.");
        return Ok(());
    }
    for entry in &status.entries {
        let marker = if status.missing.contains(entry) {
            " (missing)"
        } else {
            ""
        };
        println!("{}{marker}", entry.path.display());
    }
    println!("\n{} staged file(s)", status.entries.len());
    if !status.missing.is_empty() {
        println!("{} no longer exist on disk", status.missing.len());
    }
    Ok(())
}

fn cmd_index(finder: &Finder, args: &cli::IndexArgs) -> Result<()> {
    let mode = if args.full {
        IndexMode::Full
    } else if !args.path.is_empty() {
        IndexMode::Targeted(args.path.clone())
    } else {
        IndexMode::Incremental
    };
    let options = IndexOptions {
        max_file_size_mb: args.max_file_size_mb,
        chunk_size: args.chunk_size,
    };

    let progress = |done: usize, total: usize| {
        tracing::debug!(done, total, "progress");
    };
    let summary = finder.index_run_with(
        &mode,
        options,
        docfinder::CancelToken::new(),
        Some(&progress),
    )?;

    if args.json {
        return print_json(&summary);
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Indexed {}, unchanged {}, deleted {}, skipped {}, failed {} ({:.1}s)",
        summary.files_indexed,
        summary.files_unchanged,
        summary.files_deleted,
        summary.files_skipped,
        summary.files_failed,
        summary.duration.as_secs_f64()
    );
    println!(
        "Chunks added {}, removed {}",
        summary.chunks_added, summary.chunks_removed
    );
    for issue in &summary.skipped {
        println!("  skipped {}: {}", issue.path.display(), issue.reason);
    }
    for issue in &summary.failures {
        println!("  failed {}: {}", issue.path.display(), issue.reason);
    }
    if summary.cancelled {
        println!("Run was cancelled before all files were processed.");
    }
}

fn cmd_search(finder: &Finder, args: &cli::SearchArgs) -> Result<()> {
    let filters = SearchFilters {
        file_type: args.file_type,
    };
    let results =
        finder.search_with_threshold(&args.query, &filters, args.count, args.threshold)?;

    if args.json {
        #[derive(Serialize)]
        struct Output<'a> {
            query: &'a str,
            result_count: usize,
            results: &'a [SearchResult],
        }
        return print_json(&Output {
            query: &args.query,
            result_count: results.len(),
            results: &results,
        });
    }
    if args.files {
        for r in &results {
            println!("{}", r.path.display());
        }
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    for r in &results {
        let channels: Vec<String> = r
            .channels
            .iter()
            .map(|c| format!("{c:?}").to_lowercase())
            .collect();
        println!(
            "{:>3}. [{:.3}] {} ({}; {})",
            r.rank,
            r.score,
            r.path.display(),
            r.file_type,
            channels.join(", ")
        );
        if let Some(excerpt) = &r.excerpt {
            for line in excerpt.lines() {
                println!("       {line}");
            }
        }
    }
    println!("\n{} result(s)", results.len());
    Ok(())
}

fn cmd_stats(finder: &Finder, json: bool) -> Result<()> {
    let stats = finder.stats()?;
    if json {
        return print_json(&stats);
    }
    println!("Data directory: {}", finder.data_dir().root().display());
    println!("Embedder: {}", finder.embedder().name());
    println!("Files: {}", stats.files);
    for (file_type, count) in &stats.by_file_type {
        println!("  {file_type}: {count}");
    }
    println!("Chunks: {}", stats.chunks);
    println!("Vectors: {}", stats.vectors);
    println!("Storage: {:.1} MiB", stats.storage_bytes as f64 / (1024.0 * 1024.0));
    Ok(())
}

fn cmd_config(finder: &Finder, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => println!("{}", finder.config_get(key)?),
        ConfigAction::Set { key, value } => {
            finder.config_set(key, value)?;
            println!("{key} = {}", finder.config_get(key)?);
        }
        ConfigAction::Unset { key } => {
            if finder.config_unset(key)? {
                println!("{key} reset to default");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigAction::List(args) => {
            let settings = finder.config_list()?;
            if args.json {
                return print_json(&settings);
            }
            for s in &settings {
                let origin = if s.is_default { " (default)" } else { "" };
                println!("{} = {}{origin}", s.key, s.value);
                println!("    {}", s.description);
            }
        }
    }
    Ok(())
}

fn cmd_verify(finder: &Finder, json: bool) -> Result<()> {
    let report = finder.verify()?;
    if json {
        return print_json(&report);
    }
    if report.is_consistent() {
        println!("Index is consistent.");
    } else {
        println!(
            "Index is inconsistent: {} orphan vector(s), {} missing vector(s). Run `docfinder repair`.",
            report.orphan_vectors.len(),
            report.missing_vectors.len()
        );
    }
    Ok(())
}

fn cmd_repair(finder: &Finder) -> Result<()> {
    let report = finder.repair()?;
    println!(
        "Recovered {} interrupted update(s), removed {} orphan vector(s), dropped {} file(s)",
        report.markers_recovered,
        report.orphan_vectors_removed,
        report.files_dropped.len()
    );
    for path in &report.files_dropped {
        println!("  {}", path.display());
    }
    if !report.files_dropped.is_empty() {
        println!("Dropped files are indexed again on the next run.");
    }
    Ok(())
}
