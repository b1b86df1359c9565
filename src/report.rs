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

//! Multi-provider comparison report.
//!
//! [`build_report`] computes everything once; the markdown, text, and JSON
//! renderers only format the same [`ComparisonReport`].

use anyhow::Context;
use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

use crate::error::BenchError;
use crate::metrics::Metric;
use crate::metrics::RelevanceJudge;
use crate::metrics::per_item_scores;
use crate::runner::RunReport;
use crate::stats::BootstrapResult;
use crate::stats::ComparisonOptions;
use crate::stats::ComparisonResult;
use crate::stats::PValueMethod;
use crate::stats::bootstrap_ci;
use crate::stats::compare_paired;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStats {
    pub metric: String,
    #[serde(flatten)]
    pub stats: BootstrapResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub provider: String,
    pub items: usize,
    pub metrics: Vec<MetricStats>,
}

impl ProviderSummary {
    fn stats(&self, metric: &str) -> Option<&BootstrapResult> {
        self.metrics
            .iter()
            .find(|m| m.metric == metric)
            .map(|m| &m.stats)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestProvider {
    pub metric: String,
    pub provider: String,
    pub estimate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub metrics: Vec<String>,
    pub alpha: f64,
    pub iterations: usize,
    pub p_value_method: PValueMethod,
    pub providers: Vec<ProviderSummary>,
    pub best: Vec<BestProvider>,
    pub comparisons: Vec<ComparisonResult>,
}

/// Bootstrap stats per provider and metric, every pairwise comparison, and
/// the best provider per metric. Ties go to the provider listed first.
pub fn build_report(
    runs: &[RunReport],
    metrics: &[Metric],
    judge: RelevanceJudge,
    options: &ComparisonOptions,
) -> Result<ComparisonReport, BenchError> {
    let scores: Vec<Vec<Vec<(String, f64)>>> = runs
        .iter()
        .map(|run| {
            metrics
                .iter()
                .map(|metric| per_item_scores(&run.results, *metric, judge))
                .collect()
        })
        .collect();

    let bootstrap = options.bootstrap();
    let providers: Vec<ProviderSummary> = runs
        .iter()
        .zip(&scores)
        .map(|(run, per_metric)| ProviderSummary {
            provider: run.provider.clone(),
            items: run.results.len(),
            metrics: metrics
                .iter()
                .zip(per_metric)
                .map(|(metric, values)| {
                    let values: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
                    MetricStats {
                        metric: metric.to_string(),
                        stats: bootstrap_ci(&values, &bootstrap),
                    }
                })
                .collect(),
        })
        .collect();

    let best = metrics
        .iter()
        .filter_map(|metric| {
            let name = metric.to_string();
            let mut winner: Option<(&ProviderSummary, f64)> = None;
            for summary in &providers {
                let estimate = summary.stats(&name).map_or(0.0, |s| s.estimate);
                if winner.is_none_or(|(_, best)| estimate > best) {
                    winner = Some((summary, estimate));
                }
            }
            winner.map(|(summary, estimate)| BestProvider {
                metric: name,
                provider: summary.provider.clone(),
                estimate,
            })
        })
        .collect();

    let mut comparisons = Vec::new();
    for i in 0..runs.len() {
        for j in i + 1..runs.len() {
            for (m, metric) in metrics.iter().enumerate() {
                comparisons.push(compare_paired(
                    &runs[i].provider,
                    &scores[i][m],
                    &runs[j].provider,
                    &scores[j][m],
                    &metric.to_string(),
                    options,
                )?);
            }
        }
    }

    Ok(ComparisonReport {
        metrics: metrics.iter().map(Metric::to_string).collect(),
        alpha: options.alpha,
        iterations: options.iterations,
        p_value_method: options.p_value_method,
        providers,
        best,
        comparisons,
    })
}

pub fn render(report: &ComparisonReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Markdown => Ok(render_markdown(report)),
        ReportFormat::Text => Ok(render_text(report)),
        ReportFormat::Json => render_json(report),
    }
}

pub fn render_json(report: &ComparisonReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("serialize comparison report")
}

fn confidence_label(report: &ComparisonReport) -> String {
    format!("{:.0}%", (1.0 - report.alpha) * 100.0)
}

fn summary_rows(report: &ComparisonReport) -> Vec<Vec<String>> {
    report
        .providers
        .iter()
        .map(|summary| {
            let mut row = vec![summary.provider.clone(), summary.items.to_string()];
            row.extend(summary.metrics.iter().map(|m| m.stats.format(4)));
            row
        })
        .collect()
}

fn comparison_row(c: &ComparisonResult) -> Vec<String> {
    vec![
        c.metric.clone(),
        c.system_a.clone(),
        c.system_b.clone(),
        c.n.to_string(),
        format!("{:+.4}", c.difference),
        format!("[{:.4}, {:.4}]", c.ci_lower, c.ci_upper),
        format!("{:.4}", c.p_value),
        format!("{:.3}", c.effect_size),
        c.effect_magnitude.as_str().to_string(),
        if c.significant { "yes" } else { "no" }.to_string(),
    ]
}

const COMPARISON_HEADERS: [&str; 10] = [
    "metric",
    "a",
    "b",
    "n",
    "diff (a-b)",
    "ci",
    "p",
    "d",
    "effect",
    "significant",
];

pub fn render_markdown(report: &ComparisonReport) -> String {
    let mut md = String::new();
    md.push_str("# Provider comparison\n\n");
    md.push_str(&format!(
        "Intervals are {} percentile bootstrap ({} resamples); items are paired by id.\n\n",
        confidence_label(report),
        report.iterations
    ));

    md.push_str("## Summary\n\n");
    let mut headers = vec!["provider".to_string(), "items".to_string()];
    headers.extend(report.metrics.iter().cloned());
    md.push_str(&markdown_table(&headers, &summary_rows(report)));

    md.push_str("\n## Best per metric\n\n");
    let rows: Vec<Vec<String>> = report
        .best
        .iter()
        .map(|b| vec![b.metric.clone(), b.provider.clone(), format!("{:.4}", b.estimate)])
        .collect();
    md.push_str(&markdown_table(
        &["metric".into(), "provider".into(), "estimate".into()],
        &rows,
    ));

    if !report.comparisons.is_empty() {
        md.push_str("\n## Pairwise comparisons\n\n");
        let headers: Vec<String> = COMPARISON_HEADERS.iter().map(|h| h.to_string()).collect();
        let rows: Vec<Vec<String>> = report.comparisons.iter().map(comparison_row).collect();
        md.push_str(&markdown_table(&headers, &rows));
    }
    md
}

pub fn render_text(report: &ComparisonReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "summary ({} CI, {} resamples)\n",
        confidence_label(report),
        report.iterations
    ));
    let mut headers = vec!["provider".to_string(), "items".to_string()];
    headers.extend(report.metrics.iter().cloned());
    out.push_str(&text_table(&headers, &summary_rows(report)));
    out.push_str("\n\nbest\n");
    let rows: Vec<Vec<String>> = report
        .best
        .iter()
        .map(|b| vec![b.metric.clone(), b.provider.clone(), format!("{:.4}", b.estimate)])
        .collect();
    out.push_str(&text_table(
        &["metric".into(), "provider".into(), "estimate".into()],
        &rows,
    ));
    if !report.comparisons.is_empty() {
        out.push_str("\n\ncomparisons\n");
        let headers: Vec<String> = COMPARISON_HEADERS.iter().map(|h| h.to_string()).collect();
        let rows: Vec<Vec<String>> = report.comparisons.iter().map(comparison_row).collect();
        out.push_str(&text_table(&headers, &rows));
    }
    out.push('\n');
    out
}

fn markdown_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = format!("| {} |\n", headers.join(" | "));
    out.push_str(&format!("|{}\n", "---|".repeat(headers.len())));
    for row in rows {
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    out
}

/// Left-aligned columns separated by two spaces, without trailing padding.
fn text_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }
    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{cell:<width$}", width = widths.get(i).copied().unwrap_or(0)))
            .collect();
        padded.join("  ").trim_end().to_string()
    };
    let mut lines = vec![line(headers)];
    lines.extend(rows.iter().map(|row| line(row.as_slice())));
    lines.join("\n")
}
