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

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap_complete::Shell;

use crate::provider::FailurePolicy;
use crate::report::ReportFormat;
use crate::runner::NamespaceMode;
use crate::stats::PValueMethod;

#[derive(Parser, Debug)]
#[command(
    name = "ragbench",
    version,
    about = "Benchmark harness for retrieval providers"
)]
pub struct Cli {
    /// Config file (defaults to the global ragbench.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Chunk files and print the chunks
    Chunk(ChunkArgs),

    /// Run a dataset through a provider and save the results
    Run(RunArgs),

    /// Recompute metrics for a results file
    Metrics(MetricsArgs),

    /// Compare providers with bootstrap intervals and paired tests
    Compare(CompareArgs),

    /// List registered chunkers, embedding providers, and vector stores
    List {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

/// Overrides for the chunking and embedding settings of the config file.
#[derive(Args, Debug, Default)]
pub struct PipelineArgs {
    /// Chunking strategy
    #[arg(long)]
    pub chunker: Option<String>,

    /// Characters per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Embedding provider
    #[arg(long)]
    pub embedding: Option<String>,

    /// Embedding model override
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Embedding cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ChunkArgs {
    /// Files or directories to chunk
    pub paths: Vec<PathBuf>,

    /// Glob to include
    #[arg(long)]
    pub glob: Option<String>,

    /// Ignore globs
    #[arg(long)]
    pub ignore: Vec<String>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Dataset file (JSON Lines of benchmark items)
    #[arg(long)]
    pub dataset: PathBuf,

    /// Where to write the run report
    #[arg(long)]
    pub out: PathBuf,

    /// Provider name recorded in the report
    #[arg(long)]
    pub name: Option<String>,

    /// Directory indexed once as a shared corpus (implies per-run namespace)
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Glob to include from the corpus
    #[arg(long)]
    pub glob: Option<String>,

    /// Namespace isolation between items
    #[arg(long, value_enum)]
    pub namespace: Option<NamespaceMode>,

    /// Cutoffs for @k metrics, comma separated
    #[arg(long, value_delimiter = ',')]
    pub k: Vec<usize>,

    /// Minimum line IoU for a hit to count (0 = any overlap)
    #[arg(long)]
    pub iou_threshold: Option<f64>,

    /// Only run the first N items
    #[arg(long)]
    pub limit: Option<usize>,

    /// Failure policy for documents that cannot be indexed
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicy>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct MetricsArgs {
    /// Results file written by `run`
    pub results: PathBuf,

    /// Cutoffs for @k metrics, comma separated
    #[arg(long, value_delimiter = ',')]
    pub k: Vec<usize>,

    /// Minimum line IoU for a hit to count (0 = any overlap)
    #[arg(long)]
    pub iou_threshold: Option<f64>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Results files written by `run`, one per provider
    #[arg(required = true, num_args = 2..)]
    pub results: Vec<PathBuf>,

    /// Metrics to compare (e.g. recall@5, mrr); defaults to the standard set
    #[arg(long = "metric")]
    pub metrics: Vec<String>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
    pub format: ReportFormat,

    /// Bootstrap resamples
    #[arg(long)]
    pub iterations: Option<usize>,

    /// Significance level
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Seed for reproducible intervals
    #[arg(long)]
    pub seed: Option<u64>,

    /// p-value computation for small samples
    #[arg(long, value_enum)]
    pub p_value: Option<PValueMethod>,

    /// Minimum line IoU for a hit to count (0 = any overlap)
    #[arg(long)]
    pub iou_threshold: Option<f64>,

    /// Write the report to a file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Wrap the report in the JSON envelope
    #[arg(long)]
    pub json: bool,
}
