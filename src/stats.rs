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

//! Statistics for comparing retrieval providers.
//!
//! Every function is pure. Bootstrap resampling is the only randomness and is
//! reproducible whenever a seed is given. Degenerate samples produce sentinel
//! values rather than errors; only a length mismatch in a paired test fails.

use std::collections::HashMap;
use std::collections::HashSet;

use clap::ValueEnum;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;

use crate::error::BenchError;

pub const DEFAULT_ITERATIONS: usize = 10_000;
pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    #[default]
    Mean,
    Median,
}

impl Statistic {
    fn compute(self, values: &mut [f64]) -> f64 {
        match self {
            Statistic::Mean => mean(values),
            Statistic::Median => median(values),
        }
    }
}

/// How two-tailed p-values are obtained for small samples (df <= 30).
/// Larger samples always use the normal approximation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PValueMethod {
    /// Student's t CDF via the regularized incomplete beta function.
    #[default]
    Exact,
    /// Interpolated 0.05 critical values with exponential decay past them.
    #[serde(alias = "table")]
    #[value(alias = "table")]
    CriticalTable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapOptions {
    pub iterations: usize,
    pub alpha: f64,
    pub statistic: Statistic,
    /// `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            alpha: DEFAULT_ALPHA,
            statistic: Statistic::Mean,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResult {
    pub n: usize,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub std_dev: f64,
}

impl BootstrapResult {
    /// "estimate [lower, upper]"
    pub fn format(&self, precision: usize) -> String {
        format!(
            "{:.prec$} [{:.prec$}, {:.prec$}]",
            self.estimate,
            self.lower,
            self.upper,
            prec = precision
        )
    }
}

/// Percentile bootstrap confidence interval at level `1 - alpha`.
pub fn bootstrap_ci(values: &[f64], options: &BootstrapOptions) -> BootstrapResult {
    if values.is_empty() {
        return BootstrapResult::default();
    }
    let n = values.len();
    let iterations = options.iterations.max(1);
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut resample = vec![0.0; n];
    let mut stats = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        for slot in resample.iter_mut() {
            *slot = values[rng.random_range(0..n)];
        }
        stats.push(options.statistic.compute(&mut resample));
    }
    stats.sort_by(f64::total_cmp);

    let lower_idx = ((iterations as f64 * options.alpha / 2.0).floor() as usize).min(iterations - 1);
    let upper_idx = iterations - 1 - lower_idx;
    let mut point = values.to_vec();
    BootstrapResult {
        n,
        estimate: options.statistic.compute(&mut point),
        lower: stats[lower_idx],
        upper: stats[upper_idx],
        std_dev: sample_std_dev(values),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TTest {
    pub t_statistic: f64,
    pub df: usize,
    pub p_value: f64,
    pub mean_difference: f64,
}

/// Paired t-test on `a[i] - b[i]`, two-tailed.
///
/// Zero-variance differences give p = 1 when the mean difference is 0 and
/// p = 0 otherwise. A single pair carries no variance estimate and gives
/// p = 1.
pub fn paired_t_test(a: &[f64], b: &[f64], method: PValueMethod) -> Result<TTest, BenchError> {
    if a.len() != b.len() {
        return Err(BenchError::PairedLengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let diffs: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    let n = diffs.len();
    let mean_difference = mean(&diffs);
    let df = n.saturating_sub(1);
    let sd = sample_std_dev(&diffs);

    let (t_statistic, p_value) = if n < 2 || mean_difference == 0.0 {
        (0.0, 1.0)
    } else if sd == 0.0 {
        (f64::INFINITY.copysign(mean_difference), 0.0)
    } else {
        let t = mean_difference / (sd / (n as f64).sqrt());
        (t, two_tailed_p(t, df, method))
    };
    Ok(TTest {
        t_statistic,
        df,
        p_value,
        mean_difference,
    })
}

/// Two-tailed p-value of a t statistic with `df` degrees of freedom.
pub fn two_tailed_p(t: f64, df: usize, method: PValueMethod) -> f64 {
    let t_abs = t.abs();
    if df == 0 || t_abs.is_nan() {
        return 1.0;
    }
    if t_abs.is_infinite() {
        return 0.0;
    }
    let p = if df > 30 {
        2.0 * (1.0 - normal_cdf(t_abs))
    } else {
        match method {
            PValueMethod::Exact => {
                let dof = df as f64;
                incomplete_beta(dof / 2.0, 0.5, dof / (dof + t_abs * t_abs))
            }
            PValueMethod::CriticalTable => critical_table_p(t_abs, df),
        }
    };
    p.clamp(0.0, 1.0)
}

const CRITICAL_T_05: [(usize, f64); 10] = [
    (1, 12.706),
    (2, 4.303),
    (3, 3.182),
    (4, 2.776),
    (5, 2.571),
    (10, 2.228),
    (15, 2.131),
    (20, 2.086),
    (25, 2.060),
    (30, 2.042),
];

/// Two-tailed 0.05 critical t value, linearly interpolated between anchors.
pub fn critical_t(df: usize) -> f64 {
    let mut prev = CRITICAL_T_05[0];
    if df <= prev.0 {
        return prev.1;
    }
    for &(anchor, value) in &CRITICAL_T_05[1..] {
        if df <= anchor {
            let frac = (df - prev.0) as f64 / (anchor - prev.0) as f64;
            return prev.1 + frac * (value - prev.1);
        }
        prev = (anchor, value);
    }
    prev.1
}

fn critical_table_p(t_abs: f64, df: usize) -> f64 {
    let crit = critical_t(df);
    if t_abs < crit {
        1.0 - 0.95 * t_abs / crit
    } else {
        0.05 * (-(t_abs - crit)).exp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectMagnitude {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectMagnitude {
    pub fn of(d: f64) -> Self {
        let d = d.abs();
        if d < 0.2 {
            EffectMagnitude::Negligible
        } else if d < 0.5 {
            EffectMagnitude::Small
        } else if d < 0.8 {
            EffectMagnitude::Medium
        } else {
            EffectMagnitude::Large
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EffectMagnitude::Negligible => "negligible",
            EffectMagnitude::Small => "small",
            EffectMagnitude::Medium => "medium",
            EffectMagnitude::Large => "large",
        }
    }
}

/// Cohen's d of paired differences: mean / sample stdev.
///
/// Zero variance yields signed infinity for a nonzero mean and 0 otherwise.
/// JSON output renders the infinite case as `null`.
pub fn cohens_d(diffs: &[f64]) -> f64 {
    if diffs.is_empty() {
        return 0.0;
    }
    let m = mean(diffs);
    let sd = sample_std_dev(diffs);
    if sd == 0.0 {
        if m == 0.0 {
            0.0
        } else {
            f64::INFINITY.copysign(m)
        }
    } else {
        m / sd
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonOptions {
    pub iterations: usize,
    pub alpha: f64,
    pub seed: Option<u64>,
    pub p_value_method: PValueMethod,
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            alpha: DEFAULT_ALPHA,
            seed: None,
            p_value_method: PValueMethod::Exact,
        }
    }
}

impl ComparisonOptions {
    pub fn bootstrap(&self) -> BootstrapOptions {
        BootstrapOptions {
            iterations: self.iterations,
            alpha: self.alpha,
            statistic: Statistic::Mean,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub system_a: String,
    pub system_b: String,
    pub metric: String,
    pub n: usize,
    pub mean_a: f64,
    pub mean_b: f64,
    /// Mean of `a - b` over matched items.
    pub difference: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub effect_magnitude: EffectMagnitude,
    pub significant: bool,
}

/// Compares two systems on one metric after an inner join on item id.
/// Ids present on one side only are dropped.
pub fn compare_paired(
    system_a: &str,
    scores_a: &[(String, f64)],
    system_b: &str,
    scores_b: &[(String, f64)],
    metric: &str,
    options: &ComparisonOptions,
) -> Result<ComparisonResult, BenchError> {
    // first occurrence wins on both sides
    let mut lookup: HashMap<&str, f64> = HashMap::new();
    for (id, score) in scores_b {
        lookup.entry(id.as_str()).or_insert(*score);
    }
    let mut seen = HashSet::new();
    let (xs, ys): (Vec<f64>, Vec<f64>) = scores_a
        .iter()
        .filter(|(id, _)| seen.insert(id.as_str()))
        .filter_map(|(id, a)| lookup.get(id.as_str()).map(|b| (*a, *b)))
        .unzip();

    let test = paired_t_test(&xs, &ys, options.p_value_method)?;
    let diffs: Vec<f64> = xs.iter().zip(&ys).map(|(x, y)| x - y).collect();
    let ci = bootstrap_ci(&diffs, &options.bootstrap());
    let effect_size = cohens_d(&diffs);
    Ok(ComparisonResult {
        system_a: system_a.to_string(),
        system_b: system_b.to_string(),
        metric: metric.to_string(),
        n: xs.len(),
        mean_a: mean(&xs),
        mean_b: mean(&ys),
        difference: test.mean_difference,
        ci_lower: ci.lower,
        ci_upper: ci.upper,
        t_statistic: test.t_statistic,
        p_value: test.p_value,
        effect_size,
        effect_magnitude: EffectMagnitude::of(effect_size),
        significant: test.p_value < options.alpha,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Sample standard deviation (n - 1); 0 below two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

/// Regularized incomplete beta `I_x(a, b)`.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let bt = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        bt * beta_cf(a, b, x) / a
    } else {
        1.0 - bt * beta_cf(b, a, 1.0 - x) / b
    }
}

/// Lentz continued fraction for the incomplete beta function.
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-12;
    const TINY: f64 = 1e-30;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;
    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of ln Γ(x).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for (i, coeff) in COEFFS.iter().enumerate() {
        ser += coeff / (x + 1.0 + i as f64);
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}
