//! Instance normalization on EVIS as three chained nodes.
//!
//! 1. `sums` reduces every `chunk`-wide column strip of a plane to a
//!    partial sum and sum of squares, in the real domain.
//! 2. `means` folds the partials of each `(channel, batch)` plane into an
//!    affine pair `a`, `b` that maps raw input straight to raw output.
//! 3. `norms` applies `out = x * a + b`.
//!
//! The passes talk through two transient `F32` tensors: the partials
//! `[groups * 4, C, 1, N]` and the pairs `[4, C, 1, N]`. Every node also
//! carries a host executor reproducing its pass, so a planned pipeline can
//! be run and checked without a device.

use timvx_core::{DType, TensorDesc};
use timvx_kernel::{
    ConstantTable, ExecContext, GPU_TENSOR_MAX_WIDTH, InitContext, KernelBackend,
    KernelDescriptor, KernelError, KernelType, NodeId, Param, ScalarValue, SetupContext,
    VariantKey, WorkPartition, align_np2, align_p2, evis_dtype, signature,
};

const SUMS: u32 = 1;
const MEANS: u32 = 2;
const NORMS: u32 = 3;

/// Input dtypes the `sums` pass reads.
const SUMS_INPUTS: [DType; 5] = [DType::I8, DType::U8, DType::I16, DType::F16, DType::BF16];

/// `(input, output)` pairs the `norms` pass writes.
const NORMS_PAIRS: [(DType, DType); 11] = [
    (DType::U8, DType::U8),
    (DType::I8, DType::I8),
    (DType::U8, DType::F16),
    (DType::I8, DType::F16),
    (DType::I16, DType::I16),
    (DType::F16, DType::F16),
    (DType::I16, DType::F16),
    (DType::F16, DType::I16),
    (DType::F16, DType::I8),
    (DType::F16, DType::U8),
    (DType::BF16, DType::BF16),
];

/// Columns one `sums` work-group covers: 256 for 8-bit input, 128 otherwise.
pub fn chunk_width(input: DType) -> usize {
    if input.bits() == 8 { 256 } else { 128 }
}

fn sums_source(input: DType) -> &'static str {
    match input {
        DType::BF16 => "instance_normalization_3",
        t if t.bits() == 8 => "instance_normalization_0",
        _ => "instance_normalization_2",
    }
}

fn norms_source(input: DType, output: DType) -> &'static str {
    match (input, output) {
        (DType::BF16, _) => "instance_normalization_3",
        (i, DType::F16) if i.bits() == 8 => "instance_normalization_1",
        (i, _) if i.bits() == 8 => "instance_normalization_0",
        _ => "instance_normalization_2",
    }
}

fn suffix(image_2d: bool) -> &'static str {
    if image_2d { "_2D" } else { "" }
}

// sums: (input) -> (partials), eps, height
const SUMS_HEIGHT: usize = 3;

// means: (partials, beta, gamma) -> (pairs), then seven scalars
const MEANS_EPS: usize = 4;
const MEANS_IN_TIME_OUT_SCALE: usize = 5;
const MEANS_INPUT_ZP: usize = 6;
const MEANS_OUTPUT_SCALE: usize = 7;
const MEANS_OUTPUT_ZP: usize = 8;
const MEANS_INV_MULTIPLIER: usize = 9;
const MEANS_GROUP_NUM: usize = 10;

// norms: (input, pairs) -> (output), height
const NORMS_HEIGHT: usize = 3;

fn sums_init(
    ctx: &InitContext<'_>,
    partition: &mut WorkPartition,
    constants: &mut ConstantTable,
) -> Result<(), KernelError> {
    let input = ctx.desc(0)?;
    let channels = ctx.desc(1)?.dim(1);
    let height = ctx.scalar_i32(SUMS_HEIGHT)?;
    let width = input.dim(0);

    *partition = WorkPartition::new(3);
    partition.local_size = [16, 1, 1];
    partition.global_size = [width.div_ceil(chunk_width(input.dtype)) * 16, channels, 1];

    let scale = input.scale();
    let zp = input.zero_point() as f32;
    let pixels = height as f32 * 16.0;
    match input.dtype {
        DType::BF16 => {
            constants.set_uniform("uniConvBF16toF32_Part0_2x8");
            constants.set_uniform("uniConvBF16toF32_Part1_2x8");
        }
        t => {
            if t.bits() == 8 {
                constants.set_uniform("uniSumX_16x1");
                constants.set_uniform("uniSumX2_16x1");
            } else {
                constants.set_uniform("uniSum_X_X2_8x2");
            }
            constants.set_f32("input_scale", scale);
            constants.set_f32("input_scale2", scale * scale);
            constants.set_f32("sum_x_tail", -pixels * zp * scale);
            constants.set_f32("sum_x2_tail0", pixels * zp * zp * scale * scale);
            constants.set_f32("sum_x2_tail1", -2.0 * zp * scale * scale);
        }
    }
    constants.set_i32("width", width as i32);
    Ok(())
}

fn means_init(
    ctx: &InitContext<'_>,
    partition: &mut WorkPartition,
    _constants: &mut ConstantTable,
) -> Result<(), KernelError> {
    *partition = WorkPartition::new(2);
    partition.global_size = [1, ctx.desc(0)?.dim(1), 0];
    Ok(())
}

fn norms_init(
    ctx: &InitContext<'_>,
    partition: &mut WorkPartition,
    constants: &mut ConstantTable,
) -> Result<(), KernelError> {
    let input = ctx.desc(0)?;
    let channels = ctx.desc(1)?.dim(1);
    let output = ctx.desc(2)?;
    let step = if input.dtype.bits() == 8 { 16 } else { 8 };

    *partition = WorkPartition::new(3);
    partition.global_scale = [step, 1, 1];
    partition.global_size = [align_p2(input.dim(0).div_ceil(step), 4), channels, 1];

    if input.dtype == DType::BF16 {
        constants.set_uniform("uniConvBF16toF32_Part0_2x8");
        constants.set_uniform("uniConvBF16toF32_Part1_2x8");
        constants.set_uniform("uniExtractOddData_2x8");
        return Ok(());
    }
    let lanes = if input.dtype.bits() == 8 { 4 } else { 2 };
    for i in 0..lanes {
        constants.set_uniform(&format!("uniDataToFP32_{i}_4x4"));
    }
    constants.set_uniform(if output.dtype == DType::F16 {
        "uniExtractHalf8_2x8"
    } else {
        "uniExtractInteger_2x8"
    });
    Ok(())
}

fn sums_exec(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let height = ctx.scalar_i32(SUMS_HEIGHT)?.max(1) as usize;
    let (width, chunk) = {
        let input = ctx.desc(0)?;
        (input.dim(0).max(1), chunk_width(input.dtype))
    };
    let groups = width.div_ceil(chunk);
    let x = ctx.read_f32(0)?;
    let mut partials = vec![0.0f32; ctx.desc(1)?.num_elements()];
    for (p, plane) in x.chunks_exact(width * height).enumerate() {
        let base = p * groups * 4;
        for row in plane.chunks_exact(width) {
            for (g, strip) in row.chunks(chunk).enumerate() {
                let Some(slot) = partials.get_mut(base + g * 4..base + g * 4 + 2) else {
                    continue;
                };
                slot[0] += strip.iter().sum::<f32>();
                slot[1] += strip.iter().map(|v| v * v).sum::<f32>();
            }
        }
    }
    ctx.write_f32(1, &partials)
}

fn means_exec(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let eps = ctx.scalar_f32(MEANS_EPS)?;
    let in_time_out_scale = ctx.scalar_f32(MEANS_IN_TIME_OUT_SCALE)?;
    let input_zp = ctx.scalar_f32(MEANS_INPUT_ZP)?;
    let output_scale = ctx.scalar_f32(MEANS_OUTPUT_SCALE)?;
    let output_zp = ctx.scalar_f32(MEANS_OUTPUT_ZP)?;
    let inv_multiplier = ctx.scalar_f32(MEANS_INV_MULTIPLIER)?;
    let stride = ctx.scalar_i32(MEANS_GROUP_NUM)?.max(1) as usize * 4;

    let partials = ctx.read_f32(0)?;
    let beta = ctx.read_f32(1)?;
    let gamma = ctx.read_f32(2)?;
    let (len, channels) = {
        let pairs = ctx.desc(3)?;
        (pairs.num_elements(), pairs.dim(1).max(1))
    };
    let mut pairs = vec![0.0f32; len];
    for (p, (strip, pair)) in partials
        .chunks_exact(stride)
        .zip(pairs.chunks_exact_mut(4))
        .enumerate()
    {
        let c = p % channels;
        let (sum, sum_sq) = strip
            .chunks_exact(4)
            .fold((0.0, 0.0), |(s, q), g| (s + g[0], q + g[1]));
        let mean = sum * inv_multiplier;
        let var = (sum_sq * inv_multiplier - mean * mean).max(0.0);
        let scale = gamma.get(c).copied().unwrap_or(1.0) / (var + eps).sqrt();
        let a = scale * in_time_out_scale;
        let b = (beta.get(c).copied().unwrap_or(0.0) - scale * mean) * output_scale + output_zp
            - input_zp * a;
        pair[0] = a;
        pair[1] = b;
    }
    ctx.write_f32(3, &pairs)
}

fn norms_exec(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let height = ctx.scalar_i32(NORMS_HEIGHT)?.max(1) as usize;
    let plane = ctx.desc(0)?.dim(0).max(1) * height;
    let x = ctx.read_raw(0)?;
    let pairs = ctx.read_f32(1)?;
    let out: Vec<f64> = x
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let p = i / plane * 4;
            let a = pairs.get(p).copied().unwrap_or(0.0) as f64;
            let b = pairs.get(p + 1).copied().unwrap_or(0.0) as f64;
            v * a + b
        })
        .collect();
    ctx.write_raw(2, &out)
}

/// Input and output views plus the row count of one plane.
///
/// Planes with a short height fold channels into rows and run on 2D
/// images; planes taller than they are wide swap the roles of the two
/// innermost dimensions, which the reduction does not notice.
struct Layout {
    view: Vec<usize>,
    height: usize,
    image_2d: bool,
}

fn layout(shape: &[usize]) -> Layout {
    let dim = |i: usize| shape.get(i).copied().unwrap_or(1);
    let (w, h, c, n) = (dim(0), dim(1), dim(2), dim(3));
    if shape.len() > 2 && h * c < GPU_TENSOR_MAX_WIDTH {
        Layout {
            view: vec![w, h * c, 1, n],
            height: h,
            image_2d: true,
        }
    } else if w < h {
        Layout {
            view: vec![h, w, c, n],
            height: w,
            image_2d: false,
        }
    } else {
        Layout {
            view: shape.to_vec(),
            height: h,
            image_2d: false,
        }
    }
}

/// EVIS `instance_norm`: `(input, beta, gamma) -> (output)`, built as the
/// `sums`, `means` and `norms` nodes.
#[derive(Debug)]
pub struct InstanceNorm;

impl KernelBackend for InstanceNorm {
    fn operator(&self) -> &str {
        "instance_norm"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Evis
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        let mut out = Vec::new();
        for image_2d in [false, true] {
            for input in SUMS_INPUTS {
                out.push((
                    VariantKey::new(&[input], &[DType::F32])
                        .with_image_2d(image_2d)
                        .with_discriminant(SUMS),
                    KernelDescriptor::new(
                        format!("evis.instance_norm_sums_{input}{}", suffix(image_2d)),
                        &signature(1, 1, 2),
                    )
                    .with_initializer(sums_init)
                    .with_executor(sums_exec)
                    .with_source(sums_source(input)),
                ));
            }
            for (input, output) in NORMS_PAIRS {
                out.push((
                    VariantKey::new(&[input, DType::F32], &[output])
                        .with_image_2d(image_2d)
                        .with_discriminant(NORMS),
                    KernelDescriptor::new(
                        format!("evis.instance_norm_{input}_F32to{output}{}", suffix(image_2d)),
                        &signature(2, 1, 1),
                    )
                    .with_initializer(norms_init)
                    .with_executor(norms_exec)
                    .with_source(norms_source(input, output)),
                ));
            }
        }
        out.push((
            VariantKey::default().with_discriminant(MEANS),
            KernelDescriptor::new("evis.instance_norm_means", &signature(3, 1, 7))
                .with_initializer(means_init)
                .with_executor(means_exec)
                .with_source("instance_normalization_0"),
        ));
        out
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let (Some(input_id), Some(beta_id), Some(gamma_id), Some(output_id)) =
            (ctx.input(0), ctx.input(1), ctx.input(2), ctx.output(0))
        else {
            return Ok(None);
        };
        let (Some(input), Some(beta), Some(gamma), Some(output)) = (
            ctx.input_desc(0),
            ctx.input_desc(1),
            ctx.input_desc(2),
            ctx.output_desc(0),
        ) else {
            return Ok(None);
        };
        let shape = input.shape.clone();
        if output.shape != shape || shape.len() > 4 {
            return Ok(None);
        }
        if shape.iter().take(2).any(|&d| d >= GPU_TENSOR_MAX_WIDTH) {
            log::debug!("instance_norm: {input} exceeds the GPU image width");
            return Ok(None);
        }
        let channels = input.dim(2);
        let batch = input.dim(3);
        if beta.num_elements() != channels || gamma.num_elements() != channels {
            return Ok(None);
        }

        let in_dtype = evis_dtype(input.dtype);
        let out_dtype = evis_dtype(output.dtype);
        let l = layout(&shape);
        let sums_key = VariantKey::new(&[in_dtype], &[DType::F32])
            .with_image_2d(l.image_2d)
            .with_discriminant(SUMS);
        let norms_key = VariantKey::new(&[in_dtype, DType::F32], &[out_dtype])
            .with_image_2d(l.image_2d)
            .with_discriminant(NORMS);
        let (Some(sums_kernel), Some(means_kernel), Some(norms_kernel)) = (
            ctx.resolve(&sums_key),
            ctx.resolve(&VariantKey::default().with_discriminant(MEANS)),
            ctx.resolve(&norms_key),
        ) else {
            return Ok(None);
        };

        let p = ctx.params();
        let eps = p.f32_or("eps", 1e-5);
        let output_scale = 1.0 / output.scale();
        let in_time_out_scale = input.scale() * output_scale;
        let input_zp = input.zero_point() as f32;
        let output_zp = output.zero_point() as f32;
        let inv_multiplier = 1.0 / (input.dim(0) * input.dim(1)) as f32;
        let chunk = chunk_width(in_dtype);
        let width = l.view[0];
        let group_num = align_np2(width, chunk) / chunk;
        let height = l.height as i32;

        let g = ctx.graph_mut();
        let (rs_input, rs_output) = if l.view == shape {
            (input_id, output_id)
        } else {
            (g.reshape(input_id, &l.view)?, g.reshape(output_id, &l.view)?)
        };
        let rs_beta = g.reshape(beta_id, &[1, channels])?;
        let rs_gamma = g.reshape(gamma_id, &[1, channels])?;
        let partials =
            g.add_virtual_tensor(TensorDesc::new(&[group_num * 4, channels, 1, batch], DType::F32))?;
        let pairs = g.add_virtual_tensor(TensorDesc::new(&[4, channels, 1, batch], DType::F32))?;

        let sums_params = vec![
            Param::Tensor(rs_input),
            Param::Tensor(partials),
            Param::Scalar(ctx.create_scalar(ScalarValue::F32(eps))),
            Param::Scalar(ctx.create_scalar(ScalarValue::I32(height))),
        ];
        ctx.add_node(sums_kernel, sums_params)?;

        let mut means_params = vec![
            Param::Tensor(partials),
            Param::Tensor(rs_beta),
            Param::Tensor(rs_gamma),
            Param::Tensor(pairs),
        ];
        for v in [eps, in_time_out_scale, input_zp, output_scale, output_zp, inv_multiplier] {
            means_params.push(Param::Scalar(ctx.create_scalar(ScalarValue::F32(v))));
        }
        means_params.push(Param::Scalar(
            ctx.create_scalar(ScalarValue::I32(group_num as i32)),
        ));
        ctx.add_node(means_kernel, means_params)?;

        let norms_params = vec![
            Param::Tensor(rs_input),
            Param::Tensor(pairs),
            Param::Tensor(rs_output),
            Param::Scalar(ctx.create_scalar(ScalarValue::I32(height))),
        ];
        ctx.add_node(norms_kernel, norms_params).map(Some)
    }
}
