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

//! Line-range relevance between a retrieved span and a ground-truth span.
//!
//! Both sides are inclusive line ranges in the same base. The pipeline keeps
//! everything 1-indexed; datasets with 0-indexed ground truth are rebased
//! when loaded.

use crate::model::GroundTruth;
use crate::model::Location;

/// Inclusive line range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    fn len(self) -> u64 {
        u64::from(self.end.saturating_sub(self.start)) + 1
    }

    pub fn overlaps(self, other: LineRange) -> bool {
        self.end >= other.start && self.start <= other.end
    }
}

impl From<&GroundTruth> for LineRange {
    fn from(gt: &GroundTruth) -> Self {
        Self::new(gt.start_line, gt.end_line)
    }
}

/// Intersection over union of two inclusive ranges.
pub fn line_iou(a: LineRange, b: LineRange) -> f64 {
    let lo = a.start.max(b.start);
    let hi = a.end.min(b.end);
    let intersection = if hi >= lo { u64::from(hi - lo) + 1 } else { 0 };
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// The candidate's line range, when it reports one. A missing end means a
/// single-line span.
pub fn candidate_range(candidate: &Location<'_>) -> Option<LineRange> {
    let start = candidate.start_line?;
    let end = candidate.end_line.unwrap_or(start).max(start);
    Some(LineRange::new(start, end))
}

/// Whether `candidate` hits the ground truth.
///
/// The file must match exactly. A candidate without lines is relevant on the
/// file match alone. With no threshold (or 0) any overlap counts, otherwise
/// the IoU must reach `iou_threshold`.
pub fn is_location_relevant(
    candidate: &Location<'_>,
    gt_file: &str,
    gt: LineRange,
    iou_threshold: Option<f64>,
) -> bool {
    if candidate.filepath != gt_file {
        return false;
    }
    let Some(range) = candidate_range(candidate) else {
        return true;
    };
    match iou_threshold {
        Some(threshold) if threshold > 0.0 => line_iou(range, gt) >= threshold,
        _ => range.overlaps(gt),
    }
}

/// IoU of `candidate` against the ground truth; 0 on a file mismatch or when
/// the candidate has no lines.
pub fn location_iou(candidate: &Location<'_>, gt_file: &str, gt: LineRange) -> f64 {
    if candidate.filepath != gt_file {
        return 0.0;
    }
    candidate_range(candidate).map_or(0.0, |range| line_iou(range, gt))
}
