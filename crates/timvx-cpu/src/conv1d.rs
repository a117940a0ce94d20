//! Direct 1D convolution.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ParamSlot,
    ScalarValue, SetupContext, VariantKey,
};

/// Geometry of one convolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv1dShape {
    /// Input length.
    pub height: usize,
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Batch size.
    pub batch: usize,
    /// Filter taps.
    pub kernel_size: usize,
    /// Output length.
    pub out_height: usize,
    /// Step between output positions.
    pub stride: usize,
    /// Step between filter taps.
    pub dilation: usize,
    /// Zero padding before the first input element.
    pub pad_front: usize,
}

impl Conv1dShape {
    /// Output length implied by the input, filter and padding.
    pub fn expected_out_height(&self, pad_end: usize) -> usize {
        let span = (self.kernel_size.max(1) - 1) * self.dilation.max(1) + 1;
        let padded = self.height + self.pad_front + pad_end;
        if padded < span {
            0
        } else {
            (padded - span) / self.stride.max(1) + 1
        }
    }
}

/// Convolve `input` `[height, in_channels, batch]` with `weight`
/// `[kernel_size, in_channels, out_channels]`.
///
/// Taps that fall in the padding read zero.
pub fn conv1d(input: &[f32], weight: &[f32], bias: Option<&[f32]>, s: &Conv1dShape) -> Vec<f32> {
    let (h_in, c_in, k) = (s.height, s.in_channels, s.kernel_size);
    let mut out = vec![0.0; s.batch * s.out_channels * s.out_height];
    for n in 0..s.batch {
        let src = &input[n * c_in * h_in..(n + 1) * c_in * h_in];
        for oc in 0..s.out_channels {
            let filter = &weight[oc * c_in * k..(oc + 1) * c_in * k];
            for oh in 0..s.out_height {
                let mut acc = 0.0;
                for ic in 0..c_in {
                    for tap in 0..k {
                        let pos = (oh * s.stride + tap * s.dilation).checked_sub(s.pad_front);
                        if let Some(pos) = pos
                            && pos < h_in
                        {
                            acc += filter[ic * k + tap] * src[ic * h_in + pos];
                        }
                    }
                }
                if let Some(b) = bias {
                    acc += b[oc];
                }
                out[(n * s.out_channels + oc) * s.out_height + oh] = acc;
            }
        }
    }
    out
}

const STRIDE: usize = 4;
const PAD_FRONT: usize = 5;
const DILATION: usize = 7;

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let (input, weight, output) = (ctx.desc(0)?, ctx.desc(1)?, ctx.desc(3)?);
    let shape = Conv1dShape {
        height: input.dim(0),
        in_channels: input.dim(1),
        batch: input.dim(2),
        kernel_size: weight.dim(0),
        out_channels: weight.dim(2),
        out_height: output.dim(0),
        stride: ctx.scalar_i32(STRIDE)?.max(1) as usize,
        pad_front: ctx.scalar_i32(PAD_FRONT)?.max(0) as usize,
        dilation: ctx.scalar_i32(DILATION)?.max(1) as usize,
    };
    let bias = if ctx.has_tensor(2) {
        Some(ctx.read_f32(2)?)
    } else {
        None
    };
    let out = conv1d(&ctx.read_f32(0)?, &ctx.read_f32(1)?, bias.as_deref(), &shape);
    ctx.write_f32(3, &out)
}

/// CPU `conv1d`: `(input, weight, bias?) -> (output)`, scalars `stride`,
/// `pad_front`, `pad_end`, `dilation` and three rounding policies.
#[derive(Debug)]
pub struct Conv1d;

impl KernelBackend for Conv1d {
    fn operator(&self) -> &str {
        "conv1d"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        let mut slots = vec![
            ParamSlot::INPUT,
            ParamSlot::INPUT,
            ParamSlot::OPTIONAL_INPUT,
            ParamSlot::OUTPUT,
        ];
        slots.extend([ParamSlot::SCALAR; 7]);
        crate::host_variant("cpu.conv1d", &slots, execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        if ctx.inputs().len() != 3 {
            return Ok(None);
        }
        let (Some(input), Some(weight), Some(output)) =
            (ctx.input_desc(0), ctx.input_desc(1), ctx.output_desc(0))
        else {
            return Ok(None);
        };
        let p = ctx.params();
        let stride = p.i32_or("stride", 1);
        let pad_front = p.i32_or("pad_front", 0);
        let pad_end = p.i32_or("pad_end", 0);
        let dilation = p.i32_or("dilation", 1);
        if stride < 1 || dilation < 1 || pad_front < 0 || pad_end < 0 {
            return Ok(None);
        }
        if weight.dim(1) != input.dim(1)
            || output.dim(1) != weight.dim(2)
            || output.dim(2) != input.dim(2)
        {
            log::debug!(
                "conv1d: input {:?} weight {:?} output {:?} disagree",
                input.shape,
                weight.shape,
                output.shape
            );
            return Ok(None);
        }
        if let Some(bias) = ctx.input_desc(2)
            && bias.num_elements() != weight.dim(2)
        {
            return Ok(None);
        }
        let shape = Conv1dShape {
            height: input.dim(0),
            in_channels: input.dim(1),
            out_channels: weight.dim(2),
            batch: input.dim(2),
            kernel_size: weight.dim(0),
            out_height: output.dim(0),
            stride: stride as usize,
            dilation: dilation as usize,
            pad_front: pad_front as usize,
        };
        if shape.out_height > shape.expected_out_height(pad_end as usize) {
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        let scalars = [
            ScalarValue::I32(stride),
            ScalarValue::I32(pad_front),
            ScalarValue::I32(pad_end),
            ScalarValue::I32(dilation),
            ScalarValue::I32(p.i32_or("overflow_policy", 0)),
            ScalarValue::I32(p.i32_or("rounding_policy", 0)),
            ScalarValue::I32(p.i32_or("down_scale_size_rounding", 0)),
        ];
        ctx.bind(kernel, &scalars).map(Some)
    }
}
