//! Max-unpooling on CL, for a fixed 2x2 window and `U8` index tensors.

use timvx_core::{DType, ParamBag};
use timvx_kernel::{
    ConstantTable, Graph, InitContext, KernelBackend, KernelDescriptor, KernelError, KernelType,
    NodeId, Priority, ScalarValue, SetupContext, TensorId, VariantKey, WorkPartition, align_p2,
    gpu_check_shape, is_image_2d, signature,
};

const TRIPLES: [(DType, DType, DType); 5] = [
    (DType::F32, DType::U8, DType::F32),
    (DType::F32, DType::U8, DType::U8),
    (DType::U8, DType::U8, DType::F32),
    (DType::U8, DType::U8, DType::U8),
    (DType::I32, DType::U8, DType::I32),
];

fn widen(dtype: DType) -> DType {
    if dtype == DType::F16 { DType::F32 } else { dtype }
}

/// Whether the variant rescales between quantized domains and so takes
/// the `scale`, `tail` and `zp` scalars.
fn requantizes(input: DType, output: DType) -> bool {
    input == DType::U8 || output == DType::U8
}

fn initialize(
    ctx: &InitContext<'_>,
    partition: &mut WorkPartition,
    _constants: &mut ConstantTable,
) -> Result<(), KernelError> {
    let input = ctx.desc(0)?;
    let image_2d = is_image_2d(&input.shape);
    *partition = WorkPartition::new(if image_2d { 2 } else { 3 });
    partition.global_size = [
        align_p2(input.dim(0), 4),
        input.dim(1),
        if image_2d { 1 } else { input.dim(2) },
    ];
    Ok(())
}

/// Priority order for `upsample`: the CL kernel only handles a 2x2 window,
/// so other scales go straight to the CPU.
pub fn select(
    _graph: &Graph,
    _inputs: &[Option<TensorId>],
    _outputs: &[Option<TensorId>],
    params: &ParamBag,
) -> Vec<Priority> {
    let doubled = params.i32_or("scale_x", 2) == 2 && params.i32_or("scale_y", 2) == 2;
    if doubled {
        vec![
            Priority::new(KernelType::Cl, 3),
            Priority::new(KernelType::Cpu, 1),
        ]
    } else {
        vec![Priority::new(KernelType::Cpu, 1)]
    }
}

/// CL `upsample`: `(values, indices) -> (output)`.
#[derive(Debug)]
pub struct Upsample;

impl KernelBackend for Upsample {
    fn operator(&self) -> &str {
        "upsample"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cl
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        let mut out = Vec::new();
        for (input, index, output) in TRIPLES {
            let scalars = if requantizes(input, output) { 3 } else { 0 };
            for image_2d in [false, true] {
                let suffix = if image_2d { "_2D" } else { "" };
                out.push((
                    VariantKey::new(&[input, index], &[output]).with_image_2d(image_2d),
                    KernelDescriptor::new(
                        format!("cl.upsample_{input}_{index}to_{output}{suffix}"),
                        &signature(2, 1, scalars),
                    )
                    .with_initializer(initialize)
                    .with_source("upsample"),
                ));
            }
        }
        out
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let p = ctx.params();
        if p.i32_or("scale_x", 2) != 2 || p.i32_or("scale_y", 2) != 2 {
            return Ok(None);
        }
        let (Some(input), Some(index), Some(output)) =
            (ctx.input_desc(0), ctx.input_desc(1), ctx.output_desc(0))
        else {
            return Ok(None);
        };
        if ![input, index, output]
            .iter()
            .all(|d| gpu_check_shape(&d.shape))
        {
            return Ok(None);
        }
        let (key_in, key_out) = (widen(input.dtype), widen(output.dtype));
        let key = VariantKey::new(&[key_in, index.dtype], &[key_out])
            .with_image_2d(is_image_2d(&input.shape));
        let Some(kernel) = ctx.resolve(&key) else {
            return Ok(None);
        };
        let scalars = if requantizes(key_in, key_out) {
            let ratio = input.scale() / output.scale();
            let out_zp = output.zero_point();
            vec![
                ScalarValue::F32(ratio),
                ScalarValue::F32(out_zp as f32 - input.zero_point() as f32 * ratio),
                ScalarValue::I32(out_zp),
            ]
        } else {
            Vec::new()
        };
        ctx.bind(kernel, &scalars).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timvx_core::{Quantization, TensorDesc};
    use timvx_kernel::{KernelRegistry, Param};

    fn plan(
        values: TensorDesc,
        out_dtype: DType,
        out_quant: Quantization,
        params: &ParamBag,
    ) -> (Graph, Option<NodeId>) {
        let mut r = KernelRegistry::new();
        r.register(Box::new(Upsample)).unwrap();
        r.register_selector("upsample", select);
        let mut out_shape = values.shape.clone();
        out_shape[0] *= 2;
        out_shape[1] *= 2;
        let mut g = Graph::new();
        let index = TensorDesc::new(&values.shape, DType::U8);
        let x = g.add_tensor(values).unwrap();
        let i = g.add_tensor(index).unwrap();
        let y = g
            .add_tensor(TensorDesc::new(&out_shape, out_dtype).with_quant(out_quant))
            .unwrap();
        let node = r.create_node(&mut g, "upsample", &[Some(x), Some(i)], &[Some(y)], params);
        (g, node)
    }

    #[test]
    fn float_plane_binds_tensors_only() {
        let (g, node) = plan(
            TensorDesc::new(&[5, 3], DType::F16),
            DType::F16,
            Quantization::None,
            &ParamBag::new(),
        );
        let node = g.node(node.unwrap()).unwrap();
        assert_eq!(node.kernel.name, "cl.upsample_F32_U8to_F32_2D");
        assert_eq!(node.params.len(), 3);
        assert_eq!(node.partition.dim, 2);
        assert_eq!(node.partition.global_size, [8, 3, 1]);
    }

    #[test]
    fn quantized_output_binds_rescale() {
        let quant = Quantization::Asymm {
            scale: 0.5,
            zero_point: 3,
        };
        let (g, node) = plan(
            TensorDesc::new(&[4, 4, 2], DType::F32),
            DType::U8,
            quant,
            &ParamBag::new(),
        );
        let node = g.node(node.unwrap()).unwrap();
        assert_eq!(node.kernel.name, "cl.upsample_F32_U8to_U8");
        assert_eq!(node.partition.dim, 3);
        assert_eq!(node.partition.global_size, [4, 4, 2]);
        let scalars: Vec<String> = node.params[3..].iter().map(Param::to_string).collect();
        assert_eq!(scalars, ["2.0", "3.0", "3"]);
    }

    #[test]
    fn other_scales_skip_cl() {
        let params = ParamBag::new().with_i32("scale_x", 3).with_i32("scale_y", 3);
        let order = select(&Graph::new(), &[], &[], &params);
        assert_eq!(order, vec![Priority::new(KernelType::Cpu, 1)]);
        let order = select(&Graph::new(), &[], &[], &ParamBag::new());
        assert_eq!(order[0].kernel_type, KernelType::Cl);
    }

    #[test]
    fn wide_index_tensor_has_no_variant() {
        let mut r = KernelRegistry::new();
        r.register(Box::new(Upsample)).unwrap();
        let mut g = Graph::new();
        let x = g.add_tensor(TensorDesc::new(&[2, 2], DType::F32)).unwrap();
        let i = g.add_tensor(TensorDesc::new(&[2, 2], DType::I32)).unwrap();
        let y = g.add_tensor(TensorDesc::new(&[4, 4], DType::F32)).unwrap();
        let node = r.create_node(&mut g, "upsample", &[Some(x), Some(i)], &[Some(y)], &ParamBag::new());
        assert!(node.is_none());
    }
}
