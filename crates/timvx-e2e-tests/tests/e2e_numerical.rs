mod common;

use ndarray::{Array2, Array4, Axis};
use proptest::prelude::*;

use timvx_core::{DType, HostTensor, ParamBag, Quantization, TensorDesc, dequantize, quantize};
use timvx_cpu::topk::top_k;

/// Instance normalization of a `[n, c, h, w]` array, plane by plane.
fn reference_instance_norm(x: &Array4<f32>, beta: &[f32], gamma: &[f32], eps: f32) -> Array4<f32> {
    let mut out = x.clone();
    for mut batch in out.axis_iter_mut(Axis(0)) {
        for (c, mut plane) in batch.axis_iter_mut(Axis(0)).enumerate() {
            let mean = plane.mean().unwrap_or(0.0);
            let var = plane.var(0.0);
            let inv = 1.0 / (var + eps).sqrt();
            plane.mapv_inplace(|v| (v - mean) * inv * gamma[c] + beta[c]);
        }
    }
    out
}

fn instance_norm_case(dtype: DType, quant: Quantization, tol: f32) {
    let (n, c, h, w) = (2, 3, 4, 20);
    let values: Vec<f32> = (0..n * c * h * w)
        .map(|i| ((i * 37) % 23) as f32 * 0.1 - 1.0)
        .collect();
    let beta = [0.25, -0.5, 0.0];
    let gamma = [1.0, 0.5, 2.0];
    let desc = TensorDesc::new(&[w, h, c, n], dtype).with_quant(quant);

    let mut call = common::plan(
        &common::registry(),
        "instance_norm",
        &[
            (desc.clone(), &values[..]),
            (TensorDesc::new(&[c], DType::F32), &beta[..]),
            (TensorDesc::new(&[c], DType::F32), &gamma[..]),
        ],
        &[desc.clone()],
        &ParamBag::new(),
    );
    assert_eq!(call.kernel_type(), timvx_kernel::KernelType::Evis);
    let out = call.run(0);

    // Compare against what the input tensor actually stores.
    let stored = HostTensor::from_f32(desc, &values).unwrap().read_f32();
    let x = Array4::from_shape_vec((n, c, h, w), stored).unwrap();
    let expected = reference_instance_norm(&x, &beta, &gamma, 1e-5);
    common::assert_close(&out, expected.as_slice().unwrap(), tol);
}

#[test]
fn evis_instance_norm_matches_reference_f16() {
    instance_norm_case(DType::F16, Quantization::None, 1e-2);
}

#[test]
fn evis_instance_norm_matches_reference_u8() {
    let quant = Quantization::Asymm {
        scale: 0.04,
        zero_point: 120,
    };
    instance_norm_case(DType::U8, quant, 0.04);
}

#[test]
fn evis_and_cpu_instance_norm_agree() {
    let shape = [16, 2, 2, 1];
    let values: Vec<f32> = (0..64).map(|i| (i as f32 * 0.7).sin()).collect();
    let beta = [0.1, 0.2];
    let gamma = [0.9, 1.1];
    let inputs = [
        (TensorDesc::new(&shape, DType::F16), &values[..]),
        (TensorDesc::new(&[2], DType::F32), &beta[..]),
        (TensorDesc::new(&[2], DType::F32), &gamma[..]),
    ];
    let outputs = [TensorDesc::new(&shape, DType::F16)];

    let mut evis = common::plan(&common::registry(), "instance_norm", &inputs, &outputs, &ParamBag::new());
    let mut cpu = common::plan(
        &common::registry_with(common::host_only()),
        "instance_norm",
        &inputs,
        &outputs,
        &ParamBag::new(),
    );
    common::assert_close(&evis.run(0), &cpu.run(0), 1e-2);
}

#[test]
fn nms_keeps_disjoint_boxes() {
    let boxes = [
        0.0, 0.0, 10.0, 10.0, //
        0.0, 0.0, 10.0, 5.0, //
        20.0, 20.0, 30.0, 30.0,
    ];
    let scores = [0.9, 0.8, 0.7];
    let mut call = common::plan(
        &common::registry(),
        "nms",
        &[
            (TensorDesc::new(&[4, 3], DType::F32), &boxes[..]),
            (TensorDesc::new(&[3], DType::F32), &scores[..]),
        ],
        &[
            TensorDesc::new(&[3], DType::I32),
            TensorDesc::new(&[3], DType::F32),
            TensorDesc::new(&[1], DType::I32),
        ],
        &ParamBag::new()
            .with_i32("max_output_size", 3)
            .with_f32("iou_threshold", 0.5),
    );
    assert_eq!(call.run(0), vec![0.0, 2.0, 0.0]);
    assert_eq!(call.output(1), vec![0.9, 0.7, 0.0]);
    assert_eq!(call.output(2), vec![2.0]);
}

#[test]
fn one_hot_on_host() {
    let indices = [0.0, 2.0, 1.0];
    let mut call = common::plan(
        &common::registry_with(common::host_only()),
        "one_hot",
        &[(TensorDesc::new(&[3], DType::I32), &indices[..])],
        &[TensorDesc::new(&[3, 3], DType::F32)],
        &ParamBag::new().with_i32("depth", 3),
    );
    assert_eq!(
        call.run(0),
        vec![
            1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, //
            0.0, 1.0, 0.0,
        ]
    );
}

fn grucell_blend(update: &[f32], candidate: &[f32], h_prev: &[f32], params: &ParamBag) -> common::Call {
    let desc = TensorDesc::new(&[update.len()], DType::F32);
    common::plan(
        &common::registry_with(common::host_only()),
        "grucell_activation",
        &[
            (desc.clone(), update),
            (desc.clone(), candidate),
            (desc.clone(), h_prev),
        ],
        &[desc.clone(), desc],
        params,
    )
}

#[test]
fn grucell_blend_without_activations_writes_both_aliases() {
    let mut call = grucell_blend(&[1.0, 1.0], &[5.0, 5.0], &[0.0, 0.0], &ParamBag::new());
    assert_eq!(call.kernel_name(), "cpu.grucell_activation");
    assert_eq!(call.run(0), vec![5.0, 5.0]);
    assert_eq!(call.output(1), vec![5.0, 5.0]);
}

#[test]
fn grucell_blend_applies_requested_activations() {
    let params = ParamBag::new()
        .with_i32("gate_activation", 1)
        .with_i32("candidate_activation", 3);
    let mut call = grucell_blend(&[-1.0, 1.0], &[8.0, 2.0], &[0.5, 0.5], &params);
    // relu(update), relu6(candidate)
    assert_eq!(call.run(0), vec![-2.5, 1.5]);
    assert_eq!(call.output(1), vec![-2.5, 1.5]);

    let unsupported = ParamBag::new().with_i32("gate_activation", 2);
    let call = grucell_blend(&[1.0], &[1.0], &[0.0], &unsupported);
    assert!(call.node.is_none());
}

fn topk_reference(input: &[f32], block: usize, k: usize) -> Vec<f32> {
    let blocks = Array2::from_shape_vec((input.len() / block, block), input.to_vec()).unwrap();
    let mut out = Vec::new();
    for row in blocks.rows() {
        let mut sorted = row.to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));
        out.extend_from_slice(&sorted[..k]);
    }
    out
}

proptest! {
    #[test]
    fn topk_matches_sorted_blocks(
        (block, k, input) in (1usize..24, 1usize..4).prop_flat_map(|(block, blocks)| {
            (
                Just(block),
                1..=block,
                prop::collection::vec(-100.0f32..100.0, block * blocks),
            )
        })
    ) {
        let (values, indices) = top_k(&input, block, k);
        prop_assert_eq!(&values, &topk_reference(&input, block, k));
        for (n, (&v, &i)) in values.iter().zip(&indices).enumerate() {
            let base = n / k * block;
            prop_assert!(i < block);
            prop_assert_eq!(input[base + i], v);
        }
    }

    #[test]
    fn topk_through_the_graph(input in prop::collection::vec(-50.0f32..50.0, 8)) {
        let mut call = common::plan(
            &common::registry_with(common::host_only()),
            "topk",
            &[(TensorDesc::new(&[8], DType::F32), &input[..])],
            &[TensorDesc::new(&[3], DType::F32), TensorDesc::new(&[3], DType::I32)],
            &ParamBag::new().with_i32("top_k", 3),
        );
        prop_assert_eq!(call.run(0), topk_reference(&input, 8, 3));
        let indices = call.output(1);
        for (&i, v) in indices.iter().zip(call.output(0)) {
            prop_assert_eq!(input[i as usize], v);
        }
    }

    #[test]
    fn u8_quantization_round_trips(raw in 0u8..=255, scale in 0.01f32..1.0, zero_point in 0i32..=255) {
        let quant = Quantization::Asymm { scale, zero_point };
        let real = dequantize(raw as f64, &quant);
        prop_assert_eq!(quantize(real, &quant, DType::U8), raw as f64);
    }

    #[test]
    fn host_tensor_stores_within_half_step(values in prop::collection::vec(-1.0f32..1.0, 1..32)) {
        let quant = Quantization::Asymm { scale: 1.0 / 127.0, zero_point: 128 };
        let desc = TensorDesc::new(&[values.len()], DType::U8).with_quant(quant);
        let stored = HostTensor::from_f32(desc, &values).unwrap().read_f32();
        for (a, b) in stored.iter().zip(&values) {
            prop_assert!((a - b).abs() <= 0.5 / 127.0 + 1e-6);
        }
    }
}
