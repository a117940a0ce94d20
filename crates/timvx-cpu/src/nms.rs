//! Single-class non-max suppression with optional soft (gaussian) decay.
//!
//! Boxes are corner-encoded `(y1, x1, y2, x2)` in either corner order.
//! Each round takes the best remaining candidate and compares it only
//! against boxes selected since it was last examined. A candidate whose
//! score decays but stays above the threshold goes back into the pool
//! and competes again.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

/// Suppression parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NmsParams {
    /// Upper bound on selected boxes.
    pub max_output_size: usize,
    /// Overlap at or above which a candidate is dropped outright.
    pub iou_threshold: f32,
    /// Candidates must score strictly above this.
    pub score_threshold: f32,
    /// Soft suppression width; 0 disables decay.
    pub soft_nms_sigma: f32,
}

/// Selected boxes in selection order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    /// Box indices.
    pub indices: Vec<usize>,
    /// Scores at selection time.
    pub scores: Vec<f32>,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    index: usize,
    score: f32,
    suppress_begin: usize,
}

/// Overlap of boxes `i` and `j` in a `(y1, x1, y2, x2)` buffer.
///
/// Zero when either box has no area.
pub fn corner_iou(boxes: &[f32], i: usize, j: usize) -> f32 {
    let corners = |k: usize| {
        let b = &boxes[k * 4..k * 4 + 4];
        (b[0].min(b[2]), b[1].min(b[3]), b[0].max(b[2]), b[1].max(b[3]))
    };
    let (ay1, ax1, ay2, ax2) = corners(i);
    let (by1, bx1, by2, bx2) = corners(j);
    let area_a = (ay2 - ay1) * (ax2 - ax1);
    let area_b = (by2 - by1) * (bx2 - bx1);
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }
    let inter = (ay2.min(by2) - ay1.max(by1)).max(0.0) * (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    inter / (area_a + area_b - inter)
}

/// Run suppression over `scores.len()` boxes.
pub fn non_max_suppression(boxes: &[f32], scores: &[f32], params: &NmsParams) -> Selection {
    let count = scores.len().min(boxes.len() / 4);
    let mut pool: Vec<Candidate> = (0..count)
        .filter(|&i| scores[i] > params.score_threshold)
        .map(|i| Candidate {
            index: i,
            score: scores[i],
            suppress_begin: 0,
        })
        .collect();
    let num_outputs = pool.len().min(params.max_output_size);
    let scale = if params.soft_nms_sigma > 0.0 {
        -0.5 / params.soft_nms_sigma
    } else {
        0.0
    };

    let mut selected = Selection::default();
    let mut start = 0;
    while selected.indices.len() < num_outputs && start < pool.len() {
        let mut best = start;
        for k in start + 1..pool.len() {
            if pool[best].score < pool[k].score {
                best = k;
            }
        }
        pool.swap(start, best);

        let next = &mut pool[start];
        let original = next.score;
        let mut hard = false;
        for j in (next.suppress_begin..selected.indices.len()).rev() {
            let iou = corner_iou(boxes, next.index, selected.indices[j]);
            if iou >= params.iou_threshold {
                hard = true;
                break;
            }
            if params.soft_nms_sigma > 0.0 {
                next.score *= (scale * iou * iou).exp();
            }
            if next.score <= params.score_threshold {
                break;
            }
        }

        next.suppress_begin = selected.indices.len();
        if !hard {
            if next.score == original {
                selected.indices.push(next.index);
                selected.scores.push(next.score);
            } else if next.score > params.score_threshold {
                // Decayed but still viable: compete again against later picks.
                continue;
            }
        }
        start += 1;
    }
    selected
}

const MAX_OUTPUT_SIZE: usize = 5;
const IOU_THRESHOLD: usize = 6;
const SCORE_THRESHOLD: usize = 7;
const SOFT_NMS_SIGMA: usize = 8;

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let params = NmsParams {
        max_output_size: ctx.scalar_i32(MAX_OUTPUT_SIZE)?.max(0) as usize,
        iou_threshold: ctx.scalar_f32(IOU_THRESHOLD)?,
        score_threshold: ctx.scalar_f32(SCORE_THRESHOLD)?,
        soft_nms_sigma: ctx.scalar_f32(SOFT_NMS_SIGMA)?,
    };
    let num_boxes = ctx.desc(0)?.dim(1);
    let boxes = ctx.read_f32(0)?;
    let mut scores = ctx.read_f32(1)?;
    scores.truncate(num_boxes);

    let selection = non_max_suppression(&boxes, &scores, &params);
    let capacity = ctx.desc(2)?.num_elements();
    let kept = selection.indices.len().min(capacity);
    if kept < selection.indices.len() {
        log::warn!(
            "{}: {} selections do not fit {capacity} outputs",
            ctx.kernel(),
            selection.indices.len()
        );
    }

    let mut indices = vec![0.0; capacity];
    let mut out_scores = vec![0.0; ctx.desc(3)?.num_elements()];
    for i in 0..kept {
        indices[i] = selection.indices[i] as f32;
        if let Some(slot) = out_scores.get_mut(i) {
            *slot = selection.scores[i];
        }
    }
    let mut count = vec![0.0; ctx.desc(4)?.num_elements()];
    if let Some(first) = count.first_mut() {
        *first = kept as f32;
    }
    ctx.write_f32(2, &indices)?;
    ctx.write_f32(3, &out_scores)?;
    ctx.write_f32(4, &count)
}

/// CPU `nms`: `(boxes, scores) -> (selected_indices, selected_scores, count)`.
#[derive(Debug)]
pub struct Nms;

impl KernelBackend for Nms {
    fn operator(&self) -> &str {
        "nms"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.nms", &signature(2, 3, 4), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let (Some(boxes), Some(scores)) = (ctx.input_desc(0), ctx.input_desc(1)) else {
            return Ok(None);
        };
        if boxes.dim(0) != 4 || scores.num_elements() < boxes.dim(1) {
            log::debug!("nms: boxes {:?} do not match scores {:?}", boxes.shape, scores.shape);
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        let p = ctx.params();
        let scalars = [
            ScalarValue::I32(p.i32_or("max_output_size", 0)),
            ScalarValue::F32(p.f32_or("iou_threshold", 0.5)),
            ScalarValue::F32(p.f32_or("score_threshold", 0.0)),
            ScalarValue::F32(p.f32_or("soft_nms_sigma", 0.0)),
        ];
        ctx.bind(kernel, &scalars).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hard(max_output_size: usize, iou_threshold: f32) -> NmsParams {
        NmsParams {
            max_output_size,
            iou_threshold,
            score_threshold: 0.0,
            soft_nms_sigma: 0.0,
        }
    }

    // Two overlapping boxes (IoU 0.5) and one far away.
    const BOXES: [f32; 12] = [
        0.0, 0.0, 10.0, 10.0, //
        0.0, 0.0, 10.0, 5.0, //
        20.0, 20.0, 30.0, 30.0,
    ];

    #[test]
    fn suppresses_overlap() {
        let s = non_max_suppression(&BOXES, &[0.9, 0.8, 0.7], &hard(3, 0.5));
        assert_eq!(s.indices, vec![0, 2]);
        assert_eq!(s.scores, vec![0.9, 0.7]);
    }

    #[test]
    fn keeps_overlap_below_threshold() {
        let s = non_max_suppression(&BOXES, &[0.9, 0.8, 0.7], &hard(3, 0.6));
        assert_eq!(s.indices, vec![0, 1, 2]);
    }

    #[test]
    fn max_output_size_caps() {
        let s = non_max_suppression(&BOXES, &[0.7, 0.8, 0.9], &hard(1, 0.6));
        assert_eq!(s.indices, vec![2]);
        assert!(non_max_suppression(&BOXES, &[0.7, 0.8, 0.9], &hard(0, 0.6))
            .indices
            .is_empty());
    }

    #[test]
    fn best_last_is_still_picked_first() {
        let s = non_max_suppression(&BOXES, &[0.1, 0.2, 0.9], &hard(3, 0.5));
        assert_eq!(s.indices, vec![2, 1]);
    }

    #[test]
    fn score_threshold_filters() {
        let params = NmsParams {
            score_threshold: 0.75,
            ..hard(3, 0.6)
        };
        let s = non_max_suppression(&BOXES, &[0.9, 0.8, 0.7], &params);
        assert_eq!(s.indices, vec![0, 1]);
    }

    #[test]
    fn soft_decay_requeues() {
        let params = NmsParams {
            soft_nms_sigma: 0.5,
            ..hard(3, 0.9)
        };
        let s = non_max_suppression(&BOXES, &[0.9, 0.8, 0.7], &params);
        // Box 1 decays to 0.8 * exp(-0.25) ~= 0.623 and loses to box 2.
        assert_eq!(s.indices, vec![0, 2, 1]);
        let expected = 0.8 * (-0.25f32).exp();
        assert!((s.scores[2] - expected).abs() < 1e-6);
    }

    #[test]
    fn corner_order_and_degenerate() {
        let boxes = [10.0, 10.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0, 1.0, 1.0, 1.0, 5.0];
        assert_eq!(corner_iou(&boxes, 0, 1), 1.0);
        assert_eq!(corner_iou(&boxes, 0, 2), 0.0);
    }
}
