//! GRU cell activation.
//!
//! The blended variant takes precomputed update and candidate gates and
//! mixes them with the previous state. The separated variant (input
//! category 1) takes the raw input and recurrent projections of all three
//! gates, optionally fused along the hidden axis, and computes the reset,
//! update and candidate gates itself. Both write the new state to two
//! outputs: the cell output and the carried state.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ParamSlot,
    ScalarValue, SetupContext, VariantKey, signature,
};

/// Activation codes understood by the gate math.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Identity.
    None,
    /// `max(x, 0)`.
    Relu,
    /// `min(max(x, 0), 6)`.
    Relu6,
    /// Hyperbolic tangent.
    Tanh,
    /// Logistic sigmoid.
    Sigmoid,
    /// `clamp(0.2x + 0.5, 0, 1)`.
    HardSigmoid,
}

impl Activation {
    /// Decode a graph-level activation code.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1 => Self::Relu,
            3 => Self::Relu6,
            4 => Self::Tanh,
            6 => Self::Sigmoid,
            31 => Self::HardSigmoid,
            _ => return None,
        })
    }

    /// Apply to one value.
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::None => x,
            Self::Relu => x.max(0.0),
            Self::Relu6 => x.clamp(0.0, 6.0),
            Self::Tanh => x.tanh(),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::HardSigmoid => (x * 0.2 + 0.5).clamp(0.0, 1.0),
        }
    }
}

/// `out = (act_g(update) - h_prev) * act_c(candidate) + h_prev`.
pub fn blend(
    update: &[f32],
    candidate: &[f32],
    h_prev: &[f32],
    gate: Activation,
    cand: Activation,
) -> Vec<f32> {
    update
        .iter()
        .zip(candidate)
        .zip(h_prev)
        .map(|((&z, &c), &h)| (gate.apply(z) - h) * cand.apply(c) + h)
        .collect()
}

/// Memory order of the separated variant's operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputLayout {
    /// Every operand is `[hidden, batch]`.
    AllNc,
    /// State is `[hidden, batch]`, projections are `[batch, hidden]`.
    InputNcFcCn,
    /// Every operand is `[batch, hidden]`.
    AllCn,
}

impl InputLayout {
    /// Decode the layout scalar.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::AllNc),
            1 => Some(Self::InputNcFcCn),
            2 => Some(Self::AllCn),
            _ => None,
        }
    }
}

/// Per-gate projections, either one tensor per gate or a single tensor
/// holding reset, update and candidate back to back.
#[derive(Clone, Copy, Debug)]
pub enum Projection<'a> {
    /// Reset, update, candidate.
    Split([&'a [f32]; 3]),
    /// All three gates in one buffer.
    Fused(&'a [f32]),
}

/// Operands of one separated step.
#[derive(Clone, Copy, Debug)]
pub struct SeparatedStep<'a> {
    /// Previous state.
    pub h_prev: &'a [f32],
    /// Input projections.
    pub input: Projection<'a>,
    /// Recurrent projections.
    pub recurrent: Projection<'a>,
    /// Reset, update and candidate biases, one per hidden unit.
    pub bias: [&'a [f32]; 3],
    /// Optional condition terms, one per hidden unit.
    pub cond: [Option<&'a [f32]>; 3],
}

/// Run the separated variant.
///
/// Returns `None` when an operand is too short for `batch * hidden`.
pub fn separated(
    step: &SeparatedStep<'_>,
    batch: usize,
    hidden: usize,
    layout: InputLayout,
    gate: Activation,
    cand: Activation,
) -> Option<Vec<f32>> {
    let total = batch * hidden;
    let nc = layout == InputLayout::AllNc;
    // Flat offset of gate `g` at (b, h) in a projection.
    let offset = |fused: bool, g: usize, b: usize, h: usize| match (nc, fused) {
        (true, false) => b * hidden + h,
        (true, true) => b * hidden * 3 + g * hidden + h,
        (false, false) => h * batch + b,
        (false, true) => g * total + h * batch + b,
    };
    let fetch = |p: &Projection<'_>, g: usize, b: usize, h: usize| match p {
        Projection::Split(parts) => parts[g].get(offset(false, g, b, h)).copied(),
        Projection::Fused(all) => all.get(offset(true, g, b, h)).copied(),
    };
    let state_at = |b: usize, h: usize| {
        if layout == InputLayout::AllCn {
            h * batch + b
        } else {
            b * hidden + h
        }
    };

    let mut out = vec![0.0; total];
    for b in 0..batch {
        for h in 0..hidden {
            let cond = |g: usize| step.cond[g].and_then(|c| c.get(h).copied()).unwrap_or(0.0);
            let bias = |g: usize| step.bias[g].get(h).copied();
            let (i_r, i_u, i_c) = (
                fetch(&step.input, 0, b, h)?,
                fetch(&step.input, 1, b, h)?,
                fetch(&step.input, 2, b, h)?,
            );
            let (r_r, r_u, r_c) = (
                fetch(&step.recurrent, 0, b, h)?,
                fetch(&step.recurrent, 1, b, h)?,
                fetch(&step.recurrent, 2, b, h)?,
            );
            let r = gate.apply(i_r + cond(0) + r_r + bias(0)?);
            let u = gate.apply(i_u + cond(1) + r_u + bias(1)?);
            let c = cand.apply(i_c + cond(2) + r * (r_c + bias(2)?));
            let at = state_at(b, h);
            out[at] = u * (*step.h_prev.get(at)? - c) + c;
        }
    }
    Some(out)
}

fn activation(ctx: &ExecContext<'_>, slot: usize) -> Result<Activation, KernelError> {
    let code = ctx.scalar_i32(slot)?;
    Activation::from_code(code).ok_or_else(|| KernelError::Unsupported {
        kernel: ctx.kernel().to_string(),
        what: format!("activation {code}"),
    })
}

fn unsupported(ctx: &ExecContext<'_>, what: &str) -> KernelError {
    KernelError::Unsupported {
        kernel: ctx.kernel().to_string(),
        what: what.to_string(),
    }
}

fn execute_blend(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let gate = activation(ctx, 5)?;
    let cand = activation(ctx, 6)?;
    let update = ctx.read_f32(0)?;
    let candidate = ctx.read_f32(1)?;
    let h_prev = ctx.read_f32(2)?;
    let mut out = blend(&update, &candidate, &h_prev, gate, cand);
    out.resize(ctx.desc(3)?.num_elements(), 0.0);
    ctx.write_f32(3, &out)?;
    ctx.write_f32(4, &out)
}

const SEPARATED_INPUTS: usize = 13;
const H_PREV: usize = 0;
const INPUT_R: usize = 1;
const RECURRENT_R: usize = 4;
const BIAS_R: usize = 7;
const COND_R: usize = 10;

fn execute_separated(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let gate = activation(ctx, SEPARATED_INPUTS + 2)?;
    let cand = activation(ctx, SEPARATED_INPUTS + 3)?;
    let layout_code = ctx.scalar_i32(SEPARATED_INPUTS + 5)?;
    let layout = InputLayout::from_code(layout_code)
        .ok_or_else(|| unsupported(ctx, &format!("input layout {layout_code}")))?;

    let fused = !ctx.has_tensor(INPUT_R + 1);
    let shape = ctx.desc(INPUT_R)?;
    let (batch, mut hidden) = match layout {
        InputLayout::AllNc => (shape.dim(1), shape.dim(0)),
        _ => (shape.dim(0), shape.dim(1)),
    };
    if fused {
        hidden /= 3;
    }

    let read = |slot: usize| -> Result<Option<Vec<f32>>, KernelError> {
        if ctx.has_tensor(slot) {
            ctx.read_f32(slot).map(Some)
        } else {
            Ok(None)
        }
    };
    let h_prev = ctx.read_f32(H_PREV)?;
    let inputs = [read(INPUT_R)?, read(INPUT_R + 1)?, read(INPUT_R + 2)?];
    let recurrent = [
        read(RECURRENT_R)?,
        read(RECURRENT_R + 1)?,
        read(RECURRENT_R + 2)?,
    ];
    let bias = [
        ctx.read_f32(BIAS_R)?,
        ctx.read_f32(BIAS_R + 1)?,
        ctx.read_f32(BIAS_R + 2)?,
    ];
    let cond = [read(COND_R)?, read(COND_R + 1)?, read(COND_R + 2)?];

    let (Some(input), Some(rec)) = (projection(&inputs, fused), projection(&recurrent, fused))
    else {
        return Err(unsupported(ctx, "mix of fused and split projections"));
    };
    let step = SeparatedStep {
        h_prev: &h_prev,
        input,
        recurrent: rec,
        bias: [&bias[0], &bias[1], &bias[2]],
        cond: [cond[0].as_deref(), cond[1].as_deref(), cond[2].as_deref()],
    };
    let mut out = separated(&step, batch, hidden, layout, gate, cand)
        .ok_or_else(|| unsupported(ctx, "operand shorter than batch * hidden"))?;
    out.resize(ctx.desc(SEPARATED_INPUTS)?.num_elements(), 0.0);
    ctx.write_f32(SEPARATED_INPUTS, &out)?;
    ctx.write_f32(SEPARATED_INPUTS + 1, &out)
}

fn projection(parts: &[Option<Vec<f32>>; 3], fused: bool) -> Option<Projection<'_>> {
    match parts {
        [Some(r), Some(u), Some(c)] if !fused => {
            Some(Projection::Split([r.as_slice(), u.as_slice(), c.as_slice()]))
        }
        [Some(all), _, _] if fused => Some(Projection::Fused(all.as_slice())),
        _ => None,
    }
}

fn separated_signature() -> Vec<ParamSlot> {
    let mut slots = vec![ParamSlot::INPUT; SEPARATED_INPUTS];
    for optional in [2, 3, 5, 6, 10, 11, 12] {
        slots[optional] = ParamSlot::OPTIONAL_INPUT;
    }
    slots.extend([ParamSlot::OUTPUT; 2]);
    slots.extend([ParamSlot::SCALAR; 4]);
    slots
}

/// CPU `grucell_activation`, blended (category 0) and separated
/// (category 1) forms.
#[derive(Debug)]
pub struct GrucellActivation;

impl KernelBackend for GrucellActivation {
    fn operator(&self) -> &str {
        "grucell_activation"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        vec![
            (
                VariantKey::default(),
                KernelDescriptor::new("cpu.grucell_activation", &signature(3, 2, 2))
                    .with_executor(execute_blend),
            ),
            (
                VariantKey::default().with_discriminant(1),
                KernelDescriptor::new("cpu.grucell_activation_separated", &separated_signature())
                    .with_executor(execute_separated),
            ),
        ]
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let p = ctx.params();
        let gate = p.i32_or("gate_activation", 0);
        let cand = p.i32_or("candidate_activation", 0);
        if Activation::from_code(gate).is_none() || Activation::from_code(cand).is_none() {
            log::warn!("grucell_activation: unsupported activation {gate}/{cand}");
            return Ok(None);
        }
        let category = p.i32_or("input_category", 0);
        let expected_inputs = if category == 1 { SEPARATED_INPUTS } else { 3 };
        if ctx.inputs().len() != expected_inputs || ctx.outputs().len() != 2 {
            return Ok(None);
        }
        let scalars = match category {
            0 => vec![ScalarValue::I32(gate), ScalarValue::I32(cand)],
            1 => {
                let layout = p.i32_or("input_layout", 0);
                if InputLayout::from_code(layout).is_none() {
                    return Ok(None);
                }
                vec![
                    ScalarValue::I32(gate),
                    ScalarValue::I32(cand),
                    ScalarValue::I32(p.i32_or("use_cudnn_implementation", 0)),
                    ScalarValue::I32(layout),
                ]
            }
            _ => return Ok(None),
        };
        let Some(kernel) = ctx.resolve(&VariantKey::default().with_discriminant(category as u32))
        else {
            return Ok(None);
        };
        ctx.bind(kernel, &scalars).map(Some)
    }
}
