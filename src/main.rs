// Copyright 2026 Ragbench Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod bridge;
mod chunk;
mod cli;
mod config;
mod dataset;
mod embed;
mod embed_cache;
mod error;
mod ingest;
mod metrics;
mod model;
mod output;
mod provider;
mod registry;
mod relevance;
mod report;
mod runner;
mod stats;
mod vector_store;

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use clap::CommandFactory;
use clap::Parser;
use clap_complete::Shell;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::ChunkArgs;
use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::CompareArgs;
use crate::cli::MetricsArgs;
use crate::cli::PipelineArgs;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::ingest::IngestOptions;
use crate::metrics::Metric;
use crate::metrics::RelevanceJudge;
use crate::metrics::RetrievalMetrics;
use crate::output::JsonResponse;
use crate::output::StatsOut;
use crate::output::print_json;
use crate::provider::ChunkEmbedProvider;
use crate::runner::NamespaceMode;
use crate::runner::RunOptions;
use crate::stats::ComparisonOptions;

const LOG_ENV: &str = "RAGBENCH_LOG";

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = cli.config;
    match cli.command {
        Commands::Init { force } => {
            cmd_init(config_path.as_deref(), force)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Chunk(args) => {
            let json = args.json;
            handle_result(cmd_chunk(config_path.as_deref(), args), json)
        }
        Commands::Run(args) => {
            let json = args.json;
            handle_result(cmd_run(config_path.as_deref(), args), json)
        }
        Commands::Metrics(args) => {
            let json = args.json;
            handle_result(cmd_metrics(config_path.as_deref(), args), json)
        }
        Commands::Compare(args) => {
            let json = args.json;
            handle_result(cmd_compare(config_path.as_deref(), args), json)
        }
        Commands::List { json } => handle_result(cmd_list(json), json),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// In JSON mode a failure is reported as an error envelope on stdout.
fn handle_result(result: Result<()>, json: bool) -> Result<ExitCode> {
    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            if json {
                print_json(&JsonResponse::from_error(&err))?;
                Ok(ExitCode::FAILURE)
            } else {
                Err(err)
            }
        }
    }
}

fn cmd_init(explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::global_config_path()
            .context("cannot locate a config directory; pass --config")?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::write_config(&path, &Config::default())?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn load_config(explicit: Option<&Path>, pipeline: &PipelineArgs) -> Result<Config> {
    let mut config = config::load_config(explicit)?;
    if let Some(chunker) = &pipeline.chunker {
        config.chunker = chunker.clone();
    }
    if let Some(size) = pipeline.chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = pipeline.chunk_overlap {
        config.chunk_overlap = overlap;
    }
    if let Some(embedding) = &pipeline.embedding {
        config.embedding = embedding.clone();
    }
    if let Some(model) = &pipeline.embedding_model {
        config.embedding_model = Some(model.clone());
    }
    if let Some(dir) = &pipeline.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    Ok(config)
}

fn cmd_chunk(explicit: Option<&Path>, args: ChunkArgs) -> Result<()> {
    let started = Instant::now();
    let config = load_config(explicit, &args.pipeline)?;
    config.validate()?;
    let chunker = chunk::build_chunker(&config)?;
    chunker.preflight()?;

    let opts = IngestOptions {
        glob: args.glob,
        ignore: args.ignore,
    };
    let report = ingest::collect_documents(args.paths, &opts)?;
    let mut warnings = report.warnings;
    let mut rows = Vec::new();
    for doc in &report.documents {
        let filepath = doc.filepath();
        let chunks = match chunker.chunk(&doc.content, filepath) {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(doc = %doc.id, error = %err, "chunking failed");
                warnings.push(format!("chunking failed for {filepath}: {err:#}"));
                continue;
            }
        };
        for (index, chunk) in chunks.into_iter().enumerate() {
            rows.push(json!({
                "id": chunk.id.unwrap_or_else(|| format!("{filepath}:{index}")),
                "filepath": filepath,
                "chunkIndex": index,
                "startLine": chunk.start_line,
                "endLine": chunk.end_line,
                "content": chunk.content,
            }));
        }
    }

    if args.json {
        let resp = JsonResponse::ok("chunk")
            .with_stats(StatsOut {
                took_ms: started.elapsed().as_millis() as u64,
                documents: Some(report.documents.len()),
                chunks: Some(rows.len()),
                ..Default::default()
            })
            .with_results(rows)
            .with_warnings(warnings);
        print_json(&resp)?;
    } else {
        for row in &rows {
            let lines = match (row["startLine"].as_u64(), row["endLine"].as_u64()) {
                (Some(start), Some(end)) => format!("{start}-{end}"),
                _ => "-".to_string(),
            };
            let chars = row["content"].as_str().map_or(0, |c| c.chars().count());
            println!("{}  lines {lines}  {chars} chars", row["id"].as_str().unwrap_or(""));
        }
        println!(
            "{} chunks from {} documents",
            rows.len(),
            report.documents.len()
        );
        for warn in warnings {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

fn cmd_run(explicit: Option<&Path>, args: RunArgs) -> Result<()> {
    let started = Instant::now();
    let mut config = load_config(explicit, &args.pipeline)?;
    if !args.k.is_empty() {
        config.k_values = args.k;
    }
    if let Some(threshold) = args.iou_threshold {
        config.iou_threshold = threshold;
    }
    if let Some(policy) = args.failure_policy {
        config.failure_policy = policy;
    }
    config.validate()?;

    let items = dataset::read_items(&args.dataset)?;
    let mut warnings = Vec::new();
    let corpus = match args.corpus {
        Some(dir) => {
            let opts = IngestOptions {
                glob: args.glob,
                ignore: Vec::new(),
            };
            let report = ingest::collect_documents(vec![dir], &opts)?;
            warnings.extend(report.warnings);
            report.documents
        }
        None => Vec::new(),
    };
    let namespace = args.namespace.unwrap_or(if corpus.is_empty() {
        NamespaceMode::PerItem
    } else {
        NamespaceMode::PerRun
    });

    let name = args
        .name
        .unwrap_or_else(|| format!("{}+{}", config.chunker, config.embedding));
    let mut provider = ChunkEmbedProvider::from_config(name, &config)?;
    let options = RunOptions {
        dataset: args.dataset.display().to_string(),
        k_values: config.k_values.clone(),
        iou_threshold: config.iou_threshold,
        search_threshold: config.search_threshold,
        namespace,
        limit: args.limit,
        corpus,
        ..Default::default()
    };
    let report = runner::run_benchmark(&mut provider, &items, &options)?;
    dataset::write_run_report(&args.out, &report)?;

    if args.json {
        let resp = JsonResponse::ok("run")
            .with_report(serde_json::to_value(&report.metrics)?)
            .with_stats(StatsOut {
                took_ms: started.elapsed().as_millis() as u64,
                items: Some(report.results.len()),
                documents: Some(options.corpus.len()),
                embedding: report.embedding,
                ..Default::default()
            })
            .with_path(args.out.display().to_string())
            .with_warnings(warnings);
        print_json(&resp)?;
    } else {
        println!("Provider: {}", report.provider);
        println!("Items: {}", report.results.len());
        print_metrics(&report.metrics);
        if let Some(stats) = report.embedding {
            println!(
                "Embedding: {} api calls, {} cache hits, {} cache misses",
                stats.api_calls, stats.cache_hits, stats.cache_misses
            );
        }
        println!("Wrote results to {}", args.out.display());
        for warn in warnings {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

fn print_metrics(metrics: &RetrievalMetrics) {
    println!("accuracy     {:.4}", metrics.accuracy);
    println!("mrr          {:.4}", metrics.mrr);
    for (k, value) in &metrics.recall_at_k {
        println!("{:<12} {value:.4}", format!("recall@{k}"));
    }
    for (k, value) in &metrics.precision_at_k {
        println!("{:<12} {value:.4}", format!("precision@{k}"));
    }
    for (k, value) in &metrics.iou_at_k {
        println!("{:<12} {value:.4}", format!("iou@{k}"));
    }
}

fn cmd_metrics(explicit: Option<&Path>, args: MetricsArgs) -> Result<()> {
    let config = config::load_config(explicit)?;
    let run = dataset::read_run_report(&args.results)?;
    let k_values = if !args.k.is_empty() {
        args.k
    } else if !run.k_values.is_empty() {
        run.k_values.clone()
    } else {
        config.k_values.clone()
    };
    let iou_threshold = args.iou_threshold.unwrap_or(run.iou_threshold);
    if !(0.0..=1.0).contains(&iou_threshold) {
        bail!(error::BenchError::InvalidConfig(format!(
            "iou threshold must be within [0, 1], got {iou_threshold}"
        )));
    }
    let judge = RelevanceJudge::from_iou_threshold(iou_threshold);
    let summary = metrics::summarize(&run.results, &k_values, judge);
    let by_type = metrics::by_question_type(&run.results);
    let by_category = metrics::by_category(&run.results);
    let abstention = metrics::abstention_accuracy(&run.results);

    if args.json {
        let resp = JsonResponse::ok("metrics")
            .with_report(json!({
                "provider": run.provider,
                "metrics": summary,
                "byQuestionType": by_type,
                "byCategory": by_category,
                "abstention": abstention,
            }))
            .with_stats(StatsOut {
                items: Some(run.results.len()),
                embedding: run.embedding,
                ..Default::default()
            });
        print_json(&resp)?;
    } else {
        println!("Provider: {}", run.provider);
        println!("Items: {}", run.results.len());
        print_metrics(&summary);
        for grouped in [&by_type, &by_category] {
            if grouped.groups.keys().all(|k| k == "unknown") {
                continue;
            }
            println!("By {} (mean {:.4}):", grouped.field, grouped.mean_accuracy);
            for (key, group) in &grouped.groups {
                println!(
                    "  {key}: {:.4} ({}/{})",
                    group.accuracy, group.correct, group.n
                );
            }
        }
        if abstention.no_abstention_items {
            println!("Abstention: no abstention items");
        } else {
            println!(
                "Abstention: {:.4} ({}/{})",
                abstention.accuracy, abstention.correct, abstention.n
            );
        }
    }
    Ok(())
}

fn cmd_compare(explicit: Option<&Path>, args: CompareArgs) -> Result<()> {
    let mut config = config::load_config(explicit)?;
    if let Some(iterations) = args.iterations {
        config.bootstrap_iterations = iterations;
    }
    if let Some(alpha) = args.alpha {
        config.alpha = alpha;
    }
    if let Some(method) = args.p_value {
        config.p_value_method = method;
    }
    if let Some(threshold) = args.iou_threshold {
        config.iou_threshold = threshold;
    }
    config.validate()?;

    let runs = args
        .results
        .iter()
        .map(|path| dataset::read_run_report(path))
        .collect::<Result<Vec<_>>>()?;
    let metrics = if args.metrics.is_empty() {
        let k_values = runs
            .first()
            .map(|run| run.k_values.clone())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| config.k_values.clone());
        Metric::standard(&k_values)
    } else {
        args.metrics
            .iter()
            .map(|name| name.parse::<Metric>())
            .collect::<Result<Vec<_>, _>>()?
    };
    let iou_threshold = match args.iou_threshold {
        Some(threshold) => threshold,
        None => runs.first().map_or(config.iou_threshold, |run| run.iou_threshold),
    };
    let options = ComparisonOptions {
        iterations: config.bootstrap_iterations,
        alpha: config.alpha,
        seed: args.seed.or(config.seed),
        p_value_method: config.p_value_method,
    };
    let report = report::build_report(
        &runs,
        &metrics,
        RelevanceJudge::from_iou_threshold(iou_threshold),
        &options,
    )?;
    let rendered = report::render(&report, args.format)?;

    let written: Option<PathBuf> = match args.out {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create dir {}", parent.display()))?;
            }
            std::fs::write(&path, &rendered)
                .with_context(|| format!("write {}", path.display()))?;
            Some(path)
        }
        None => None,
    };

    if args.json {
        let mut resp = JsonResponse::ok("compare").with_report(serde_json::to_value(&report)?);
        if let Some(path) = &written {
            resp = resp.with_path(path.display().to_string());
        }
        print_json(&resp)?;
    } else if let Some(path) = &written {
        println!("Wrote report to {}", path.display());
    } else {
        println!("{}", rendered.trim_end());
    }
    Ok(())
}

fn cmd_list(json: bool) -> Result<()> {
    let chunkers = chunk::builtin_chunkers()?;
    let sources = embed::builtin_sources()?;
    let stores = vector_store::builtin_stores()?;
    let mut rows = Vec::new();
    for key in chunkers.keys() {
        rows.push(("chunker", key.to_string(), chunkers.aliases_of(key).to_vec()));
    }
    for key in sources.keys() {
        rows.push(("embedding", key.to_string(), sources.aliases_of(key).to_vec()));
    }
    for key in stores.keys() {
        rows.push(("vector_store", key.to_string(), stores.aliases_of(key).to_vec()));
    }

    if json {
        let results = rows
            .into_iter()
            .map(|(kind, name, aliases)| json!({"kind": kind, "name": name, "aliases": aliases}))
            .collect();
        print_json(&JsonResponse::ok("list").with_results(results))?;
    } else {
        for (kind, name, aliases) in rows {
            if aliases.is_empty() {
                println!("{kind:<13} {name}");
            } else {
                println!("{kind:<13} {name} ({})", aliases.join(", "));
            }
        }
    }
    Ok(())
}

fn cmd_completions(shell: Shell) {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "ragbench", &mut std::io::stdout());
}
