#![no_main]

use libfuzzer_sys::fuzz_target;

use timvx_cpu::nms::{NmsParams, non_max_suppression};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let (head, rest) = data.split_at(4);
    let floats: Vec<f32> = rest
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let count = floats.len() / 5;
    let (boxes, scores) = floats[..count * 5].split_at(count * 4);

    let params = NmsParams {
        max_output_size: head[0] as usize,
        iou_threshold: head[1] as f32 / 255.0,
        score_threshold: head[2] as f32 / 255.0 - 0.5,
        soft_nms_sigma: head[3] as f32 / 64.0,
    };
    // Suppression must terminate and never select more than allowed.
    let selection = non_max_suppression(boxes, scores, &params);
    assert!(selection.indices.len() <= params.max_output_size.min(count));
    assert_eq!(selection.indices.len(), selection.scores.len());
});
