//! The backend trait each operator implementation provides.

use std::fmt::Debug;

use timvx_core::{ParamBag, TensorDesc};

use crate::registry::VariantTable;
use crate::{
    ConstantTable, DispatchConfig, Graph, InitContext, KernelDescriptor, KernelError, KernelType,
    Node, NodeId, Param, Scalar, ScalarValue, TensorId, VariantKey, WorkPartition, pack_io,
};

/// One operator's implementation for one kernel type.
pub trait KernelBackend: Debug + Send + Sync {
    /// Operator name, e.g. `"resize_bilinear"`.
    fn operator(&self) -> &str;

    /// Kernel type of every variant this backend offers.
    fn kernel_type(&self) -> KernelType;

    /// All specialized variants, keyed structurally.
    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)>;

    /// Build a node for the tensors and parameters in `ctx`.
    ///
    /// Returns `Ok(None)` when the combination is unsupported or a
    /// precondition fails, so the selector moves on to the next backend.
    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError>;
}

/// Everything a backend sees while building a node.
pub struct SetupContext<'a> {
    pub(crate) graph: &'a mut Graph,
    pub(crate) operator: &'a str,
    pub(crate) kernel_type: KernelType,
    pub(crate) table: &'a VariantTable,
    pub(crate) inputs: &'a [Option<TensorId>],
    pub(crate) outputs: &'a [Option<TensorId>],
    pub(crate) params: &'a ParamBag,
    pub(crate) config: &'a DispatchConfig,
}

impl<'a> SetupContext<'a> {
    /// Operator being instantiated.
    pub fn operator(&self) -> &str {
        self.operator
    }

    /// Kernel type of the backend being tried.
    pub fn kernel_type(&self) -> KernelType {
        self.kernel_type
    }

    /// Operator parameters.
    pub fn params(&self) -> &'a ParamBag {
        self.params
    }

    /// Dispatch configuration.
    pub fn config(&self) -> &'a DispatchConfig {
        self.config
    }

    /// Input tensors as passed by the caller.
    pub fn inputs(&self) -> &'a [Option<TensorId>] {
        self.inputs
    }

    /// Output tensors as passed by the caller.
    pub fn outputs(&self) -> &'a [Option<TensorId>] {
        self.outputs
    }

    /// Input `i`, if present.
    pub fn input(&self, i: usize) -> Option<TensorId> {
        self.inputs.get(i).copied().flatten()
    }

    /// Output `i`, if present.
    pub fn output(&self, i: usize) -> Option<TensorId> {
        self.outputs.get(i).copied().flatten()
    }

    /// Descriptor of input `i`, if present.
    pub fn input_desc(&self, i: usize) -> Option<&TensorDesc> {
        self.graph.tensor(self.input(i)?).ok()
    }

    /// Descriptor of output `i`, if present.
    pub fn output_desc(&self, i: usize) -> Option<&TensorDesc> {
        self.graph.tensor(self.output(i)?).ok()
    }

    /// Read access to the graph.
    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    /// Write access to the graph, for views and transient tensors.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }

    /// Variant registered under `key`, if any.
    pub fn resolve(&self, key: &VariantKey) -> Option<&'a KernelDescriptor> {
        let found = self.table.get(key);
        if found.is_none() {
            log::debug!(
                "{} {}: no variant for {key}",
                self.kernel_type,
                self.operator
            );
        }
        found
    }

    /// Create a scalar parameter.
    pub fn create_scalar(&mut self, value: ScalarValue) -> Scalar {
        self.graph.create_scalar(value)
    }

    /// Bind the caller's inputs and outputs to the leading slots of
    /// `kernel`, fill its scalar slots from `scalars` in order and append
    /// the node.
    pub fn bind(
        &mut self,
        kernel: &KernelDescriptor,
        scalars: &[ScalarValue],
    ) -> Result<NodeId, KernelError> {
        let mut params = pack_io(kernel, self.inputs, self.outputs)?;
        let mut values = scalars.iter();
        for (slot, param) in kernel.params.iter().zip(params.iter_mut()) {
            if slot.is_tensor() {
                continue;
            }
            if let Some(v) = values.next() {
                *param = Param::Scalar(self.graph.create_scalar(*v));
            }
        }
        self.add_node(kernel, params)
    }

    /// Validate `params` against `kernel`'s signature, run its initializer
    /// and append the node.
    pub fn add_node(
        &mut self,
        kernel: &KernelDescriptor,
        params: Vec<Param>,
    ) -> Result<NodeId, KernelError> {
        if params.len() != kernel.params.len() {
            return Err(KernelError::Arity {
                kernel: kernel.name.clone(),
                expected: kernel.params.len(),
                actual: params.len(),
            });
        }
        for (i, (slot, param)) in kernel.params.iter().zip(&params).enumerate() {
            match param {
                Param::Absent if !slot.is_optional() => {
                    return Err(KernelError::RequiredAbsent {
                        kernel: kernel.name.clone(),
                        slot: i,
                    });
                }
                Param::Tensor(id) if slot.is_tensor() => {
                    self.graph.tensor(*id)?;
                }
                Param::Scalar(_) if !slot.is_tensor() => {}
                Param::Absent => {}
                _ => {
                    return Err(KernelError::SlotKind {
                        kernel: kernel.name.clone(),
                        slot: i,
                        expected: if slot.is_tensor() { "tensor" } else { "scalar" },
                    });
                }
            }
        }

        let mut partition = WorkPartition::default();
        let mut constants = ConstantTable::new();
        if let Some(init) = kernel.initializer {
            let view = InitContext {
                graph: &*self.graph,
                params: &params,
                kernel: &kernel.name,
            };
            init(&view, &mut partition, &mut constants)?;
        }

        self.graph.push_node(Node {
            operator: self.operator.to_string(),
            kernel_type: self.kernel_type,
            kernel: kernel.clone(),
            params,
            partition,
            constants,
        })
    }
}
