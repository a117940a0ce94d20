//! Kernel descriptors and parameter slot signatures.

use std::fmt;

use crate::{ConstantTable, ExecContext, InitContext, KernelError, WorkPartition};

/// Direction of a parameter slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Read by the kernel.
    Input,
    /// Written by the kernel.
    Output,
}

/// What a slot binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// A graph tensor.
    Tensor,
    /// A scalar handle.
    Scalar,
}

/// Whether a slot may be left empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Must be bound.
    Required,
    /// May be absent.
    Optional,
}

/// One entry of a kernel's parameter signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSlot {
    /// Direction.
    pub direction: Direction,
    /// Kind.
    pub kind: SlotKind,
    /// Presence requirement.
    pub state: SlotState,
}

impl ParamSlot {
    /// Required input tensor.
    pub const INPUT: Self = Self::new(Direction::Input, SlotKind::Tensor, SlotState::Required);
    /// Optional input tensor.
    pub const OPTIONAL_INPUT: Self =
        Self::new(Direction::Input, SlotKind::Tensor, SlotState::Optional);
    /// Required output tensor.
    pub const OUTPUT: Self = Self::new(Direction::Output, SlotKind::Tensor, SlotState::Required);
    /// Required input scalar.
    pub const SCALAR: Self = Self::new(Direction::Input, SlotKind::Scalar, SlotState::Required);

    /// Arbitrary slot.
    pub const fn new(direction: Direction, kind: SlotKind, state: SlotState) -> Self {
        Self {
            direction,
            kind,
            state,
        }
    }

    /// Whether the slot binds a tensor.
    pub fn is_tensor(&self) -> bool {
        self.kind == SlotKind::Tensor
    }

    /// Whether the slot may be absent.
    pub fn is_optional(&self) -> bool {
        self.state == SlotState::Optional
    }
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Input => "in",
            Direction::Output => "out",
        };
        let kind = match self.kind {
            SlotKind::Tensor => "tensor",
            SlotKind::Scalar => "scalar",
        };
        write!(f, "{dir}:{kind}")?;
        if self.is_optional() {
            f.write_str("?")?;
        }
        Ok(())
    }
}

/// Fills in the launch grid and named constants of a freshly bound node.
pub type Initializer =
    fn(&InitContext<'_>, &mut WorkPartition, &mut ConstantTable) -> Result<(), KernelError>;

/// Runs a node on the host over materialized tensors.
pub type Executor = fn(&mut ExecContext<'_>) -> Result<(), KernelError>;

/// Everything the dispatch layer knows about one kernel variant.
#[derive(Clone, Debug)]
pub struct KernelDescriptor {
    /// Display name, e.g. `cl.topk_stage3_F32toF32_I32`.
    pub name: String,
    /// Ordered parameter signature.
    pub params: Vec<ParamSlot>,
    /// Launch-grid initializer (shader kernels).
    pub initializer: Option<Initializer>,
    /// Host executor (CPU and emulated kernels).
    pub executor: Option<Executor>,
    /// Name of the opaque program source the variant is compiled from.
    pub source: Option<String>,
}

impl KernelDescriptor {
    /// Descriptor with a name and signature only.
    pub fn new(name: impl Into<String>, params: &[ParamSlot]) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
            initializer: None,
            executor: None,
            source: None,
        }
    }

    /// Attach an initializer.
    pub fn with_initializer(mut self, init: Initializer) -> Self {
        self.initializer = Some(init);
        self
    }

    /// Attach a host executor.
    pub fn with_executor(mut self, exec: Executor) -> Self {
        self.executor = Some(exec);
        self
    }

    /// Record the program source name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether the node can run on the host.
    pub fn is_executable(&self) -> bool {
        self.executor.is_some()
    }
}

impl fmt::Display for KernelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<String> = self.params.iter().map(|s| s.to_string()).collect();
        write!(f, "{}({})", self.name, slots.join(", "))
    }
}

/// Signature of `inputs` required input tensors, `outputs` required output
/// tensors and `scalars` required scalars, in that order.
pub fn signature(inputs: usize, outputs: usize, scalars: usize) -> Vec<ParamSlot> {
    let mut slots = vec![ParamSlot::INPUT; inputs];
    slots.extend(std::iter::repeat_n(ParamSlot::OUTPUT, outputs));
    slots.extend(std::iter::repeat_n(ParamSlot::SCALAR, scalars));
    slots
}
