//! One-hot on CL.
//!
//! The indices are viewed as `[suffix, prefix]` and the output as
//! `[suffix, depth, prefix]`, where `prefix` covers the dimensions inside
//! the one-hot axis.

use timvx_core::{DType, TensorDesc, quantize};
use timvx_kernel::{
    ConstantTable, InitContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId,
    Param, ScalarValue, SetupContext, VariantKey, WorkPartition, align_p2, gpu_check_shape,
    signature,
};

const PAIRS: [(DType, DType); 5] = [
    (DType::F32, DType::F32),
    (DType::I32, DType::I32),
    (DType::I32, DType::F32),
    (DType::I32, DType::U8),
    (DType::U8, DType::U8),
];

/// Registered `(indices, output)` pair for the given dtypes.
pub fn key_dtypes(input: DType, output: DType) -> (DType, DType) {
    let input = if input == DType::F16 { DType::F32 } else { input };
    let output = match output {
        DType::F16 => DType::F32,
        DType::I16 | DType::I8 => DType::I32,
        other => other,
    };
    (input, output)
}

/// `(prefix, suffix)` element counts around `axis`; `-1` is innermost.
pub fn split(shape: &[usize], axis: i32) -> (usize, usize) {
    let rank = shape.len() as i64;
    let cut = if axis == -1 { rank } else { rank - axis as i64 };
    let cut = cut.clamp(0, rank) as usize;
    let prefix: usize = shape[..cut].iter().product();
    let total: usize = shape.iter().product();
    (prefix, total / prefix.max(1))
}

/// Bit pattern the kernel stores for `value` in an `output` tensor.
///
/// Float outputs take the `f32` bits; integer outputs take the quantized
/// value truncated to the element width.
pub fn fill_bits(value: f32, output: &TensorDesc) -> u32 {
    if output.dtype.is_float() {
        return value.to_bits();
    }
    let raw = quantize(value, &output.quant, output.dtype) as i64;
    match output.dtype.bits() {
        bits @ 1..32 => (raw as u32) & ((1u32 << bits) - 1),
        _ => raw as u32,
    }
}

fn initialize(
    ctx: &InitContext<'_>,
    partition: &mut WorkPartition,
    _constants: &mut ConstantTable,
) -> Result<(), KernelError> {
    let input = ctx.desc(0)?;
    *partition = WorkPartition::new(2);
    partition.global_size = [align_p2(input.dim(0), 4), input.dim(1), 0];
    Ok(())
}

/// CL `one_hot`: `(indices) -> (output)`, scalars `depth`, `on`, `off`
/// (as bit patterns), `input_scale`, `input_tail`.
#[derive(Debug)]
pub struct OneHot;

impl KernelBackend for OneHot {
    fn operator(&self) -> &str {
        "one_hot"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cl
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        PAIRS
            .iter()
            .map(|&(input, output)| {
                (
                    VariantKey::new(&[input], &[output]),
                    KernelDescriptor::new(format!("cl.one_hot_{input}to{output}"), &signature(1, 1, 5))
                        .with_initializer(initialize)
                        .with_source("one_hot"),
                )
            })
            .collect()
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let Some(depth) = ctx.params().get_i32("depth") else {
            log::warn!("one_hot: missing \"depth\"");
            return Ok(None);
        };
        let (Some(input_id), Some(output_id)) = (ctx.input(0), ctx.output(0)) else {
            return Ok(None);
        };
        let (Some(input), Some(output)) = (ctx.input_desc(0), ctx.output_desc(0)) else {
            return Ok(None);
        };
        if depth <= 0 || output.num_elements() != input.num_elements() * depth as usize {
            return Ok(None);
        }
        let p = ctx.params();
        let (prefix, suffix) = split(&input.shape, p.i32_or("axis", -1));
        let out_shape = [suffix, depth as usize, prefix];
        if !gpu_check_shape(&out_shape) {
            return Ok(None);
        }
        let (key_in, key_out) = key_dtypes(input.dtype, output.dtype);
        let Some(kernel) = ctx.resolve(&VariantKey::new(&[key_in], &[key_out])) else {
            return Ok(None);
        };

        let in_scale = input.scale();
        let scalars = [
            ScalarValue::I32(depth),
            ScalarValue::U32(fill_bits(p.f32_or("on_value", 1.0), output)),
            ScalarValue::U32(fill_bits(p.f32_or("off_value", 0.0), output)),
            ScalarValue::F32(in_scale),
            ScalarValue::F32(input.zero_point() as f32 * in_scale),
        ];

        let g = ctx.graph_mut();
        let mut params = vec![
            Param::Tensor(g.reshape(input_id, &[suffix, prefix])?),
            Param::Tensor(g.reshape(output_id, &out_shape)?),
        ];
        for v in scalars {
            params.push(Param::Scalar(ctx.create_scalar(v)));
        }
        ctx.add_node(kernel, params).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timvx_core::{ParamBag, Quantization};
    use timvx_kernel::{Graph, KernelRegistry};

    fn plan(input: TensorDesc, output: TensorDesc, params: &ParamBag) -> (Graph, Option<NodeId>) {
        let mut r = KernelRegistry::new();
        r.register(Box::new(OneHot)).unwrap();
        let mut g = Graph::new();
        let x = g.add_tensor(input).unwrap();
        let y = g.add_tensor(output).unwrap();
        let node = r.create_node(&mut g, "one_hot", &[Some(x)], &[Some(y)], params);
        (g, node)
    }

    #[test]
    fn dtype_keys() {
        assert_eq!(key_dtypes(DType::F16, DType::F16), (DType::F32, DType::F32));
        assert_eq!(key_dtypes(DType::I32, DType::I8), (DType::I32, DType::I32));
        assert_eq!(key_dtypes(DType::U8, DType::U8), (DType::U8, DType::U8));
    }

    #[test]
    fn split_around_axis() {
        assert_eq!(split(&[4, 3], -1), (12, 1));
        assert_eq!(split(&[4, 3], 1), (4, 3));
        assert_eq!(split(&[4, 3], 2), (1, 12));
    }

    #[test]
    fn fill_patterns() {
        let f = TensorDesc::new(&[1], DType::F32);
        assert_eq!(fill_bits(1.0, &f), 1.0f32.to_bits());
        let u8q = TensorDesc::new(&[1], DType::U8).with_quant(Quantization::Asymm {
            scale: 0.5,
            zero_point: 10,
        });
        assert_eq!(fill_bits(1.0, &u8q), 12);
        let i8 = TensorDesc::new(&[1], DType::I8);
        assert_eq!(fill_bits(-1.0, &i8), 0xff);
    }

    #[test]
    fn innermost_axis_view() {
        let params = ParamBag::new().with_i32("depth", 5);
        let (g, node) = plan(
            TensorDesc::new(&[6], DType::I32),
            TensorDesc::new(&[5, 6], DType::F32),
            &params,
        );
        let node = g.node(node.unwrap()).unwrap();
        assert_eq!(node.kernel.name, "cl.one_hot_I32toF32");
        let Param::Tensor(out) = node.params[1] else {
            panic!("expected tensor");
        };
        assert_eq!(g.tensor(out).unwrap().shape, vec![1, 5, 6]);
        assert_eq!(node.partition.global_size[..2], [4, 6]);
        assert_eq!(node.params[3].to_string(), format!("{}u", 1.0f32.to_bits()));
    }

    #[test]
    fn unregistered_pair_is_rejected() {
        let params = ParamBag::new().with_i32("depth", 2);
        let (_, node) = plan(
            TensorDesc::new(&[3], DType::F32),
            TensorDesc::new(&[2, 3], DType::U8),
            &params,
        );
        assert!(node.is_none());
    }

    #[test]
    fn missing_depth_is_rejected() {
        let (_, node) = plan(
            TensorDesc::new(&[3], DType::I32),
            TensorDesc::new(&[2, 3], DType::I32),
            &ParamBag::new(),
        );
        assert!(node.is_none());
    }
}
