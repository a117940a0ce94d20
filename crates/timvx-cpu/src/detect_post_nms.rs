//! SSD-style detection post-processing.
//!
//! Two modes share the greedy hard-NMS core. Regular mode suppresses per
//! class and merges the survivors by score. Fast mode ranks anchors by
//! their best foreground score, suppresses once across anchors, then
//! emits the top classes of every surviving anchor.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

use crate::select::{iou_xyxy, max_position, sort_by_score};

/// Post-processing parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Regular (per-class) NMS when true, fast (per-anchor) otherwise.
    pub regular_nms: bool,
    /// Cap on detections per batch; negative means unlimited.
    pub max_num_detections: i32,
    /// Classes emitted per anchor in fast mode.
    pub max_classes_per_detection: usize,
    /// Cap on detections per class in regular mode; negative means unlimited.
    pub max_detections_per_class: i32,
    /// Candidates must score strictly above this.
    pub score_threshold: f32,
    /// Overlap at or above which a candidate is suppressed.
    pub iou_threshold: f32,
    /// Whether class labels count the background class.
    pub background_in_label: bool,
}

/// One emitted detection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    /// Score.
    pub score: f32,
    /// Box as `[x1, y1, x2, y2]`.
    pub roi: [f32; 4],
    /// Class label.
    pub class: i32,
}

/// Detections of one batch, plus the count reported for it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchDetections {
    /// Detections in output order.
    pub detections: Vec<Detection>,
    /// Number of kept boxes (anchors in fast mode).
    pub count: usize,
}

/// Greedy hard NMS over `candidates`, keyed by `score_of`.
///
/// Returns how many leading entries survive, capped at `max_keep`.
fn greedy_nms(
    candidates: &mut [usize],
    scores: &[f32],
    roi_of: impl Fn(usize) -> [f32; 4],
    iou_threshold: f32,
    max_keep: usize,
) -> usize {
    let mut len = candidates.len();
    let mut kept = 0;
    while kept < len && kept < max_keep {
        let best = max_position(scores, &candidates[kept..len]) + kept;
        candidates.swap(best, kept);
        let anchor = roi_of(candidates[kept]);
        let mut i = kept + 1;
        while i < len {
            if iou_xyxy(&roi_of(candidates[i]), &anchor) >= iou_threshold {
                candidates.swap(i, len - 1);
                len -= 1;
            } else {
                i += 1;
            }
        }
        kept += 1;
    }
    kept
}

fn cap(limit: i32, len: usize) -> usize {
    usize::try_from(limit).unwrap_or(len)
}

/// Process every batch.
///
/// `scores` is `[num_classes, num_anchors, num_batches]` with class 0 the
/// background; `rois` is `[4, num_anchors, num_batches]`.
pub fn detect_post_nms(
    scores: &[f32],
    rois: &[f32],
    num_classes: usize,
    num_anchors: usize,
    num_batches: usize,
    params: &DetectParams,
) -> Vec<BatchDetections> {
    let label_shift = if params.background_in_label { 0 } else { 1 };
    let mut out = Vec::with_capacity(num_batches);
    if num_classes < 2
        || scores.len() < num_classes * num_anchors * num_batches
        || rois.len() < 4 * num_anchors * num_batches
    {
        out.resize(num_batches, BatchDetections::default());
        return out;
    }

    for n in 0..num_batches {
        let batch_scores = &scores[n * num_anchors * num_classes..(n + 1) * num_anchors * num_classes];
        let batch_rois = &rois[n * num_anchors * 4..(n + 1) * num_anchors * 4];
        let roi_of = |anchor: usize| {
            let r = &batch_rois[anchor * 4..anchor * 4 + 4];
            [r[0], r[1], r[2], r[3]]
        };

        let batch = if params.regular_nms {
            let mut select = Vec::new();
            for c in 1..num_classes {
                let start = select.len();
                select.extend(
                    (0..num_anchors)
                        .map(|a| a * num_classes + c)
                        .filter(|&i| batch_scores[i] > params.score_threshold),
                );
                let found = select.len() - start;
                let kept = greedy_nms(
                    &mut select[start..],
                    batch_scores,
                    |i| roi_of(i / num_classes),
                    params.iou_threshold,
                    cap(params.max_detections_per_class, found),
                );
                select.truncate(start + kept);
            }
            let total = select.len();
            sort_by_score(batch_scores, &mut select, total);
            select.truncate(cap(params.max_num_detections, total));
            BatchDetections {
                count: select.len(),
                detections: select
                    .iter()
                    .map(|&i| Detection {
                        score: batch_scores[i],
                        roi: roi_of(i / num_classes),
                        class: (i % num_classes) as i32 - label_shift,
                    })
                    .collect(),
            }
        } else {
            let max_scores: Vec<f32> = batch_scores
                .chunks_exact(num_classes)
                .map(|row| row[1..].iter().copied().fold(f32::NEG_INFINITY, f32::max))
                .collect();
            let mut select: Vec<usize> = (0..num_anchors)
                .filter(|&a| max_scores[a] > params.score_threshold)
                .collect();
            let found = select.len();
            let kept = greedy_nms(
                &mut select,
                &max_scores,
                roi_of,
                params.iou_threshold,
                cap(params.max_num_detections, found),
            );
            select.truncate(kept);

            let out_classes = (num_classes - 1).min(params.max_classes_per_detection);
            let mut detections = Vec::with_capacity(kept * out_classes);
            for &anchor in &select {
                let row = &batch_scores[anchor * num_classes..(anchor + 1) * num_classes];
                let mut classes: Vec<usize> = (1..num_classes).collect();
                sort_by_score(row, &mut classes, num_classes - 1);
                detections.extend(classes.iter().take(out_classes).map(|&c| Detection {
                    score: row[c],
                    roi: roi_of(anchor),
                    class: c as i32 - label_shift,
                }));
            }
            BatchDetections {
                count: kept,
                detections,
            }
        };
        out.push(batch);
    }
    out
}

const NMS_TYPE: usize = 6;
const MAX_NUM_DETECTIONS: usize = 7;
const MAX_CLASS_PER_DETECTION: usize = 8;
const MAX_DETECTION_PER_CLASS: usize = 9;
const SCORE_THRESHOLD: usize = 10;
const IOU_THRESHOLD: usize = 11;
const IS_BG_IN_LABEL: usize = 12;

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let params = DetectParams {
        regular_nms: ctx.scalar_i32(NMS_TYPE)? != 0,
        max_num_detections: ctx.scalar_i32(MAX_NUM_DETECTIONS)?,
        max_classes_per_detection: ctx.scalar_i32(MAX_CLASS_PER_DETECTION)?.max(0) as usize,
        max_detections_per_class: ctx.scalar_i32(MAX_DETECTION_PER_CLASS)?,
        score_threshold: ctx.scalar_f32(SCORE_THRESHOLD)?,
        iou_threshold: ctx.scalar_f32(IOU_THRESHOLD)?,
        background_in_label: ctx.scalar_i32(IS_BG_IN_LABEL)? != 0,
    };
    let desc = ctx.desc(0)?;
    let (num_classes, num_anchors, num_batches) = (desc.dim(0), desc.dim(1), desc.dim(2));
    let per_batch = ctx.desc(2)?.dim(0);
    let scores = ctx.read_f32(0)?;
    let rois = ctx.read_f32(1)?;

    let batches = detect_post_nms(&scores, &rois, num_classes, num_anchors, num_batches, &params);

    let mut out_scores = vec![0.0; ctx.desc(2)?.num_elements()];
    let mut out_rois = vec![0.0; ctx.desc(3)?.num_elements()];
    let mut out_classes = vec![0.0; ctx.desc(4)?.num_elements()];
    let mut out_count = vec![0.0; ctx.desc(5)?.num_elements()];
    for (n, batch) in batches.iter().enumerate() {
        if batch.detections.len() > per_batch {
            log::warn!(
                "{}: batch {n} has {} detections, output holds {per_batch}",
                ctx.kernel(),
                batch.detections.len()
            );
        }
        for (i, d) in batch.detections.iter().take(per_batch).enumerate() {
            let at = n * per_batch + i;
            if at >= out_scores.len() || (at + 1) * 4 > out_rois.len() || at >= out_classes.len() {
                break;
            }
            out_scores[at] = d.score;
            out_rois[at * 4..at * 4 + 4].copy_from_slice(&d.roi);
            out_classes[at] = d.class as f32;
        }
        if let Some(slot) = out_count.get_mut(n) {
            *slot = batch.count as f32;
        }
    }
    ctx.write_f32(2, &out_scores)?;
    ctx.write_f32(3, &out_rois)?;
    ctx.write_f32(4, &out_classes)?;
    ctx.write_f32(5, &out_count)
}

/// CPU `detect_post_nms`: `(scores, rois) -> (scores, rois, classes, count)`.
#[derive(Debug)]
pub struct DetectPostNms;

impl KernelBackend for DetectPostNms {
    fn operator(&self) -> &str {
        "detect_post_nms"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.detect_post_nms", &signature(2, 4, 7), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let (Some(scores), Some(rois)) = (ctx.input_desc(0), ctx.input_desc(1)) else {
            return Ok(None);
        };
        if rois.dim(0) != 4 || rois.dim(1) != scores.dim(1) || rois.dim(2) != scores.dim(2) {
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        let p = ctx.params();
        let scalars = [
            ScalarValue::I32(p.i32_or("nms_type", 0)),
            ScalarValue::I32(p.i32_or("max_num_detections", -1)),
            ScalarValue::I32(p.i32_or("maximum_class_per_detection", 1)),
            ScalarValue::I32(p.i32_or("maximum_detection_per_class", -1)),
            ScalarValue::F32(p.f32_or("score_threshold", 0.0)),
            ScalarValue::F32(p.f32_or("iou_threshold", 0.5)),
            ScalarValue::I32(p.i32_or("is_bg_in_label", 0)),
        ];
        ctx.bind(kernel, &scalars).map(Some)
    }
}
