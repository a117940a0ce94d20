//! Greedy multi-class NMS over per-class boxes (`box_with_nms_limit`).
//!
//! Rois are grouped into batches by runs of equal batch index. Within a
//! batch, every foreground class runs a greedy selection: the best
//! remaining box is moved to the front and every other candidate's score
//! is decayed by its overlap with it. Candidates whose decayed score falls
//! below `nms_score_threshold` are swapped to the tail of the candidate
//! list and dropped, so the surviving order follows the swap pattern
//! rather than the input order. The batch's detections are then sorted by
//! score, truncated to `max_num_detections` and re-sorted by class.

use std::fmt;

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

use crate::select::{iou_xyxy, max_position, sort_by_score, sort_range};

/// Score decay applied to a candidate overlapping a selected box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NmsKernel {
    /// Drop the candidate when `iou >= iou_threshold`.
    Hard,
    /// Scale by `1 - iou` when `iou >= iou_threshold`.
    Linear,
    /// Scale by `exp(-iou² / sigma)`.
    Gaussian,
}

impl NmsKernel {
    /// Decode the integer method code: 0 hard, 1 linear, anything else gaussian.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Hard,
            1 => Self::Linear,
            _ => Self::Gaussian,
        }
    }

    /// Integer method code.
    pub fn code(self) -> i32 {
        match self {
            Self::Hard => 0,
            Self::Linear => 1,
            Self::Gaussian => 2,
        }
    }

    /// Multiplier for a candidate with overlap `iou`.
    pub fn weight(self, iou: f32, iou_threshold: f32, sigma: f32) -> f32 {
        match self {
            Self::Hard => {
                if iou < iou_threshold {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Linear => {
                if iou < iou_threshold {
                    1.0
                } else {
                    1.0 - iou
                }
            }
            Self::Gaussian => (-iou * iou / sigma).exp(),
        }
    }
}

impl fmt::Display for NmsKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hard => "hard",
            Self::Linear => "linear",
            Self::Gaussian => "gaussian",
        })
    }
}

/// Selection parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxNmsParams {
    /// Candidates must score strictly above this.
    pub score_threshold: f32,
    /// Per-class and per-batch detection cap; negative means unlimited.
    pub max_num_detections: i32,
    /// Decay kernel.
    pub kernel: NmsKernel,
    /// Overlap threshold for the hard and linear kernels.
    pub iou_threshold: f32,
    /// Gaussian kernel width.
    pub sigma: f32,
    /// Candidates whose decayed score falls below this are dropped.
    pub nms_score_threshold: f32,
}

impl Default for BoxNmsParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.0,
            max_num_detections: -1,
            kernel: NmsKernel::Hard,
            iou_threshold: 0.5,
            sigma: 1.0,
            nms_score_threshold: 0.0,
        }
    }
}

/// Kept detections in output order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detections {
    /// Decayed scores.
    pub scores: Vec<f32>,
    /// Boxes as `[x1, y1, x2, y2]`.
    pub boxes: Vec<[f32; 4]>,
    /// Class of each detection.
    pub classes: Vec<i32>,
    /// Ordinal of the batch each detection came from.
    pub batches: Vec<i32>,
}

impl Detections {
    /// Number of detections.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether nothing was kept.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Keep at most `n` detections.
    pub fn truncate(&mut self, n: usize) {
        self.scores.truncate(n);
        self.boxes.truncate(n);
        self.classes.truncate(n);
        self.batches.truncate(n);
    }
}

fn roi(rois: &[f32], index: usize) -> &[f32] {
    &rois[index * 4..index * 4 + 4]
}

/// Run the selection.
///
/// `scores` is `[num_classes, num_rois]` (class innermost), `rois` is
/// `[4 * num_classes, num_rois]` and `batch_index` holds one entry per roi.
/// Inconsistent buffer sizes yield no detections.
pub fn box_with_nms_limit(
    scores: &[f32],
    rois: &[f32],
    batch_index: &[i32],
    num_classes: usize,
    params: &BoxNmsParams,
) -> Detections {
    let num_rois = batch_index.len();
    let mut out = Detections::default();
    if num_classes == 0
        || scores.len() < num_rois * num_classes
        || rois.len() < num_rois * num_classes * 4
    {
        return out;
    }
    let mut scores = scores[..num_rois * num_classes].to_vec();

    let mut segments: Vec<usize> = Vec::new();
    let mut current = None;
    for &b in batch_index {
        if current != Some(b) {
            current = Some(b);
            segments.push(0);
        }
        if let Some(last) = segments.last_mut() {
            *last += 1;
        }
    }

    let mut select: Vec<usize> = Vec::with_capacity(num_rois * num_classes);
    let (mut score_base, mut roi_base) = (0, 0);
    for (n, &count) in segments.iter().enumerate() {
        let batch_scores = &mut scores[score_base..score_base + count * num_classes];
        let batch_rois = &rois[roi_base..roi_base + count * num_classes * 4];
        let batch_start = select.len();
        let mut batch_detections = 0;

        // Class 0 is background.
        for c in 1..num_classes {
            let start = select.len();
            select.extend(
                (0..count)
                    .map(|b| b * num_classes + c)
                    .filter(|&index| batch_scores[index] > params.score_threshold),
            );
            let mut len = select.len() - start;
            let max_det = usize::try_from(params.max_num_detections).unwrap_or(len);

            let candidates = &mut select[start..];
            let mut detections = 0;
            let mut j = 0;
            while j < len && detections < max_det {
                let best = max_position(batch_scores, &candidates[j..len]) + j;
                candidates.swap(best, j);
                let mut i = j + 1;
                while i < len {
                    let iou = iou_xyxy(roi(batch_rois, candidates[i]), roi(batch_rois, candidates[j]));
                    let weight = params
                        .kernel
                        .weight(iou, params.iou_threshold, params.sigma);
                    batch_scores[candidates[i]] *= weight;
                    if batch_scores[candidates[i]] < params.nms_score_threshold {
                        candidates.swap(i, len - 1);
                        len -= 1;
                    } else {
                        i += 1;
                    }
                }
                detections += 1;
                j += 1;
            }
            select.truncate(start + len);
            batch_detections += detections;
        }

        sort_by_score(batch_scores, &mut select[batch_start..], batch_detections);
        if let Ok(max) = usize::try_from(params.max_num_detections)
            && batch_detections > max
        {
            select.truncate(batch_start + max);
        }
        let kept = &mut select[batch_start..];
        if !kept.is_empty() {
            let by_class = |a: usize, b: usize| {
                let (ca, cb) = (a % num_classes, b % num_classes);
                if ca == cb {
                    batch_scores[a].total_cmp(&batch_scores[b]).is_ge()
                } else {
                    ca < cb
                }
            };
            sort_range(kept, 0, kept.len() - 1, &by_class);
        }

        for &index in kept.iter() {
            let r = roi(batch_rois, index);
            out.scores.push(batch_scores[index]);
            out.boxes.push([r[0], r[1], r[2], r[3]]);
            out.classes.push((index % num_classes) as i32);
            out.batches.push(n as i32);
        }
        score_base += count * num_classes;
        roi_base += count * num_classes * 4;
    }
    out
}

const SCORE_THRESHOLD: usize = 7;
const MAX_NUM_DETECTIONS: usize = 8;
const NMS_KERNEL_METHOD: usize = 9;
const IOU_THRESHOLD: usize = 10;
const SIGMA: usize = 11;
const NMS_SCORE_THRESHOLD: usize = 12;

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let params = BoxNmsParams {
        score_threshold: ctx.scalar_f32(SCORE_THRESHOLD)?,
        max_num_detections: ctx.scalar_i32(MAX_NUM_DETECTIONS)?,
        kernel: NmsKernel::from_code(ctx.scalar_i32(NMS_KERNEL_METHOD)?),
        iou_threshold: ctx.scalar_f32(IOU_THRESHOLD)?,
        sigma: ctx.scalar_f32(SIGMA)?,
        nms_score_threshold: ctx.scalar_f32(NMS_SCORE_THRESHOLD)?,
    };
    let num_classes = ctx.desc(0)?.dim(0);
    let scores = ctx.read_f32(0)?;
    let rois = ctx.read_f32(1)?;
    let batch_index: Vec<i32> = ctx.read_raw(2)?.iter().map(|&v| v as i32).collect();

    let mut found = box_with_nms_limit(&scores, &rois, &batch_index, num_classes, &params);
    let capacity = ctx.desc(3)?.num_elements();
    if found.len() > capacity {
        log::warn!(
            "{}: {} detections do not fit {capacity} outputs",
            ctx.kernel(),
            found.len()
        );
        found.truncate(capacity);
    }

    let mut out_scores = vec![0.0; capacity];
    let mut out_boxes = vec![0.0; capacity * 4];
    let mut out_classes = vec![0.0; capacity];
    let mut out_batches = vec![0.0; capacity];
    for i in 0..found.len() {
        out_scores[i] = found.scores[i];
        out_boxes[i * 4..i * 4 + 4].copy_from_slice(&found.boxes[i]);
        out_classes[i] = found.classes[i] as f32;
        out_batches[i] = found.batches[i] as f32;
    }
    ctx.write_f32(3, &out_scores)?;
    ctx.write_f32(4, &out_boxes)?;
    ctx.write_f32(5, &out_classes)?;
    ctx.write_f32(6, &out_batches)
}

/// CPU `box_with_nms_limit`:
/// `(scores, rois, batch_index) -> (scores, rois, classes, batch_index)`.
#[derive(Debug)]
pub struct BoxWithNmsLimit;

impl KernelBackend for BoxWithNmsLimit {
    fn operator(&self) -> &str {
        "box_with_nms_limit"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.box_with_nms_limit", &signature(3, 4, 6), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let (Some(scores), Some(rois), Some(batch), Some(out_scores), Some(out_rois)) = (
            ctx.input_desc(0),
            ctx.input_desc(1),
            ctx.input_desc(2),
            ctx.output_desc(0),
            ctx.output_desc(1),
        ) else {
            return Ok(None);
        };
        let num_rois = scores.dim(1);
        if rois.dim(0) != scores.dim(0) * 4
            || rois.dim(1) != num_rois
            || batch.num_elements() != num_rois
            || out_rois.num_elements() != out_scores.num_elements() * 4
        {
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        let p = ctx.params();
        let scalars = [
            ScalarValue::F32(p.f32_or("score_threshold", 0.0)),
            ScalarValue::I32(p.i32_or("max_num_detections", -1)),
            ScalarValue::I32(p.i32_or("nms_kernel_method", 0)),
            ScalarValue::F32(p.f32_or("iou_threshold", 0.5)),
            ScalarValue::F32(p.f32_or("sigma", 1.0)),
            ScalarValue::F32(p.f32_or("nms_score_threshold", 0.0)),
        ];
        ctx.bind(kernel, &scalars).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One batch, background plus one class, two rois overlapping with IoU 0.5.
    fn two_boxes() -> (Vec<f32>, Vec<f32>, Vec<i32>) {
        let scores = vec![0.1, 0.9, 0.1, 0.8];
        let rois = vec![
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 10.0, 10.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 10.0, 5.0,
        ];
        (scores, rois, vec![0, 0])
    }

    fn run(kernel: NmsKernel, iou_threshold: f32) -> Detections {
        let (scores, rois, batch) = two_boxes();
        let params = BoxNmsParams {
            kernel,
            iou_threshold,
            sigma: 0.5,
            ..BoxNmsParams::default()
        };
        box_with_nms_limit(&scores, &rois, &batch, 2, &params)
    }

    #[test]
    fn hard_below_threshold_keeps_both() {
        let d = run(NmsKernel::Hard, 0.6);
        assert_eq!(d.scores, vec![0.9, 0.8]);
        assert_eq!(d.classes, vec![1, 1]);
        assert_eq!(d.batches, vec![0, 0]);
        assert_eq!(d.boxes[1], [0.0, 0.0, 10.0, 5.0]);
    }

    #[test]
    fn hard_at_threshold_zeroes_lower_box() {
        let d = run(NmsKernel::Hard, 0.5);
        assert_eq!(d.scores, vec![0.9, 0.0]);
        assert_eq!(d.boxes[0], [0.0, 0.0, 10.0, 10.0]);
    }

    #[test]
    fn soft_kernels_never_raise_scores() {
        let linear = run(NmsKernel::Linear, 0.3);
        assert_eq!(linear.scores[0], 0.9);
        assert!((linear.scores[1] - 0.4).abs() < 1e-6);

        let gaussian = run(NmsKernel::Gaussian, 0.3);
        let expected = 0.8 * (-0.25f32 / 0.5).exp();
        assert!((gaussian.scores[1] - expected).abs() < 1e-6);
        for d in [linear, gaussian] {
            assert!(d.scores[1] <= 0.8);
            assert!(d.scores.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn evicted_below_nms_score_threshold() {
        let (scores, rois, batch) = two_boxes();
        let params = BoxNmsParams {
            nms_score_threshold: 0.1,
            ..BoxNmsParams::default()
        };
        let d = box_with_nms_limit(&scores, &rois, &batch, 2, &params);
        assert_eq!(d.scores, vec![0.9]);
    }

    #[test]
    fn score_threshold_and_cap() {
        let (scores, rois, batch) = two_boxes();
        let params = BoxNmsParams {
            score_threshold: 0.85,
            ..BoxNmsParams::default()
        };
        assert_eq!(box_with_nms_limit(&scores, &rois, &batch, 2, &params).len(), 1);
        let params = BoxNmsParams {
            iou_threshold: 0.9,
            max_num_detections: 1,
            ..BoxNmsParams::default()
        };
        assert_eq!(
            box_with_nms_limit(&scores, &rois, &batch, 2, &params).scores,
            vec![0.9]
        );
    }

    #[test]
    fn sorted_by_class_then_score() {
        // Three classes, two rois far apart; class 2 outscores class 1.
        let scores = vec![0.0, 0.3, 0.7, 0.0, 0.6, 0.2];
        let mut rois = vec![0.0; 2 * 3 * 4];
        for c in 0..3 {
            rois[c * 4..c * 4 + 4].copy_from_slice(&[0.0, 0.0, 1.0, 1.0]);
            rois[12 + c * 4..12 + c * 4 + 4].copy_from_slice(&[5.0, 5.0, 6.0, 6.0]);
        }
        let d = box_with_nms_limit(&scores, &rois, &[0, 0], 3, &BoxNmsParams::default());
        assert_eq!(d.classes, vec![1, 1, 2, 2]);
        assert_eq!(d.scores, vec![0.6, 0.3, 0.7, 0.2]);
    }

    #[test]
    fn batches_split_on_index_change() {
        let scores = vec![0.0, 0.9, 0.0, 0.8];
        let rois = vec![
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0, //
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0,
        ];
        let d = box_with_nms_limit(&scores, &rois, &[3, 7], 2, &BoxNmsParams::default());
        assert_eq!(d.batches, vec![0, 1]);
        assert_eq!(d.scores, vec![0.9, 0.8]);
    }

    #[test]
    fn inconsistent_sizes_yield_nothing() {
        let d = box_with_nms_limit(&[0.5; 3], &[0.0; 8], &[0, 0], 2, &BoxNmsParams::default());
        assert!(d.is_empty());
    }

    #[test]
    fn kernel_codes() {
        assert_eq!(NmsKernel::from_code(0), NmsKernel::Hard);
        assert_eq!(NmsKernel::from_code(1), NmsKernel::Linear);
        assert_eq!(NmsKernel::from_code(7), NmsKernel::Gaussian);
        assert_eq!(NmsKernel::Linear.code(), 1);
        assert_eq!(NmsKernel::Gaussian.to_string(), "gaussian");
    }
}
