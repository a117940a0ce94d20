//! Top-k on CL.
//!
//! Blocks short enough for a single work-group run a bitonic pipeline with
//! one work item per stage lane; longer blocks fall back to an odd-even
//! transposition sort over a scratch copy of the input.

use timvx_core::{DType, TensorDesc};
use timvx_kernel::{
    ConstantTable, InitContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId,
    Param, ScalarValue, SetupContext, VariantKey, WorkPartition, signature,
};

/// Stage counts below this run the bitonic pipeline.
pub const MAX_STAGES: u32 = 7;

/// Discriminant of the odd-even sort variants.
const ODD_EVEN: u32 = MAX_STAGES;

/// Work-group width of the odd-even sort.
const ODD_EVEN_LOCAL: usize = 32;

/// Bitonic stages needed for a block: `max(ceil(log2(block / 2)), 0)`.
pub fn num_stages(block_size: usize) -> u32 {
    let half = block_size as f64 / 2.0;
    if half <= 1.0 {
        return 0;
    }
    half.log2().ceil() as u32
}

/// Collapse `(input, values)` dtypes onto a registered pair.
///
/// Narrow integers widen to 32 bits and F16 computes as F32; a float
/// input may emit integer values.
pub fn collapse(input: DType, output: DType) -> Option<(DType, DType)> {
    let class = |t: DType| match t {
        DType::F32 | DType::F16 => Some(DType::F32),
        DType::U32 | DType::U16 | DType::U8 => Some(DType::U32),
        DType::I32 | DType::I16 | DType::I8 => Some(DType::I32),
        _ => None,
    };
    match (class(input)?, class(output)?) {
        (a, b) if a == b => Some((a, b)),
        (DType::F32, b) => Some((DType::F32, b)),
        _ => None,
    }
}

const PAIRS: [(DType, DType); 5] = [
    (DType::F32, DType::F32),
    (DType::U32, DType::U32),
    (DType::I32, DType::I32),
    (DType::F32, DType::U32),
    (DType::F32, DType::I32),
];

const NUM_STAGES: usize = 7;

fn staged_init(
    ctx: &InitContext<'_>,
    partition: &mut WorkPartition,
    _constants: &mut ConstantTable,
) -> Result<(), KernelError> {
    let stages = ctx.scalar_i32(NUM_STAGES)?.clamp(0, MAX_STAGES as i32 - 1);
    let lanes = 1usize << stages;
    *partition = WorkPartition::new(2);
    partition.local_size = [lanes, 1, 0];
    partition.global_size = [lanes, ctx.desc(0)?.dim(1), 0];
    Ok(())
}

fn odd_even_init(
    ctx: &InitContext<'_>,
    partition: &mut WorkPartition,
    _constants: &mut ConstantTable,
) -> Result<(), KernelError> {
    *partition = WorkPartition::new(2);
    partition.local_size = [ODD_EVEN_LOCAL, 1, 0];
    partition.global_size = [ODD_EVEN_LOCAL, ctx.desc(0)?.dim(1), 0];
    Ok(())
}

/// CL `topk`: `(input) -> (values, indices)` over a
/// `[block_size, block_count]` view of the input.
#[derive(Debug)]
pub struct TopK;

impl KernelBackend for TopK {
    fn operator(&self) -> &str {
        "topk"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cl
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        let mut out = Vec::new();
        for (input, output) in PAIRS {
            for stages in 0..MAX_STAGES {
                out.push((
                    VariantKey::new(&[input], &[output]).with_discriminant(stages),
                    KernelDescriptor::new(
                        format!("cl.topk_stage{stages}_{input}to{output}_I32"),
                        &signature(1, 2, 6),
                    )
                    .with_initializer(staged_init)
                    .with_source("topk"),
                ));
            }
            let source = if input == output {
                "topk_odd_even_sort"
            } else {
                "topk_odd_even_sort2"
            };
            out.push((
                VariantKey::new(&[input], &[output]).with_discriminant(ODD_EVEN),
                KernelDescriptor::new(
                    format!("cl.topk_odd_even_sort_{input}to{output}_I32"),
                    &signature(3, 2, 5),
                )
                .with_initializer(odd_even_init)
                .with_source(source),
            ));
        }
        out
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let Some(k) = ctx.params().get_i32("top_k") else {
            log::warn!("topk: missing \"top_k\"");
            return Ok(None);
        };
        let (Some(input_id), Some(values_id), Some(indices_id)) =
            (ctx.input(0), ctx.output(0), ctx.output(1))
        else {
            return Ok(None);
        };
        let (Some(input), Some(values), Some(indices)) =
            (ctx.input_desc(0), ctx.output_desc(0), ctx.output_desc(1))
        else {
            return Ok(None);
        };
        let narrowing = input.dtype == DType::F16 && matches!(values.dtype, DType::U8 | DType::I16);
        if (input.dtype != values.dtype || indices.dtype != DType::I32) && !narrowing {
            return Ok(None);
        }
        let Some((key_in, key_out)) = collapse(input.dtype, values.dtype) else {
            return Ok(None);
        };

        let block_size = input.dim(0);
        let block_count = input.num_elements() / block_size.max(1);
        if k < 0 || k as usize > block_size {
            return Ok(None);
        }
        let k = k as usize;
        if values.num_elements() != k * block_count || indices.num_elements() != k * block_count {
            return Ok(None);
        }
        let stages = num_stages(block_size);
        let odd_even = stages >= MAX_STAGES;
        let key = VariantKey::new(&[key_in], &[key_out]).with_discriminant(if odd_even {
            ODD_EVEN
        } else {
            stages
        });
        let Some(kernel) = ctx.resolve(&key) else {
            return Ok(None);
        };

        let in_scale = input.scale();
        let scalars = [
            ScalarValue::F32(in_scale),
            ScalarValue::F32(-(input.zero_point() as f32) * in_scale),
            ScalarValue::F32(1.0 / values.scale()),
            ScalarValue::F32(values.zero_point() as f32),
        ];
        let input_desc = input.clone();

        let g = ctx.graph_mut();
        let block = g.reshape(input_id, &[block_size, block_count])?;
        let out_values = g.reshape(values_id, &[k, block_count])?;
        let out_indices = g.reshape(indices_id, &[k, block_count])?;

        let mut params = if odd_even {
            let shape = [block_size, block_count];
            let scratch = g.add_virtual_tensor(input_desc.reshaped(&shape)?)?;
            let order = g.add_virtual_tensor(TensorDesc::new(&shape, DType::I32))?;
            vec![
                Param::Tensor(block),
                Param::Tensor(scratch),
                Param::Tensor(order),
                Param::Tensor(out_values),
                Param::Tensor(out_indices),
            ]
        } else {
            vec![
                Param::Tensor(block),
                Param::Tensor(out_values),
                Param::Tensor(out_indices),
            ]
        };
        for v in scalars {
            params.push(Param::Scalar(ctx.create_scalar(v)));
        }
        if !odd_even {
            params.push(Param::Scalar(ctx.create_scalar(ScalarValue::I32(stages as i32))));
        }
        params.push(Param::Scalar(ctx.create_scalar(ScalarValue::I32(block_size as i32))));
        ctx.add_node(kernel, params).map(Some)
    }
}
