//! Graph of tensors and dispatch nodes.
//!
//! The graph owns tensor storage, reshape views (which alias their base
//! tensor's storage), scalar handles and nodes. Nodes bound to a host
//! executor can be run in place; shader nodes carry their launch grid and
//! constant table for the driver.

use std::fmt;
use std::rc::{Rc, Weak};

use timvx_core::{HostTensor, TensorDesc};

use crate::arena::{Arena, Handle};
use crate::{ConstantTable, KernelDescriptor, KernelError, KernelType, Scalar, ScalarValue, WorkPartition};

/// A tensor registered in a [`Graph`].
#[derive(Clone, Debug)]
pub struct TensorEntry {
    desc: TensorDesc,
    storage: usize,
}

impl TensorEntry {
    /// Descriptor of the tensor.
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }
}

/// Handle of a graph tensor.
pub type TensorId = Handle<TensorEntry>;

/// Handle of a graph node.
pub type NodeId = Handle<Node>;

/// One bound parameter.
#[derive(Clone, Debug)]
pub enum Param {
    /// A graph tensor.
    Tensor(TensorId),
    /// A scalar handle.
    Scalar(Scalar),
    /// An empty optional slot.
    Absent,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor(id) => write!(f, "{id}"),
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Absent => f.write_str("-"),
        }
    }
}

/// A kernel instance bound to parameters.
#[derive(Debug)]
pub struct Node {
    /// Operator the node implements.
    pub operator: String,
    /// Backend kind of the selected variant.
    pub kernel_type: KernelType,
    /// Selected variant.
    pub kernel: KernelDescriptor,
    /// Parameters in slot order.
    pub params: Vec<Param>,
    /// Launch grid.
    pub partition: WorkPartition,
    /// Named constants.
    pub constants: ConstantTable,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        write!(
            f,
            "{} [{}] {}({})",
            self.operator,
            self.kernel_type,
            self.kernel.name,
            params.join(", ")
        )
    }
}

/// Tensors, scalars and nodes of one network.
#[derive(Debug, Default)]
pub struct Graph {
    tensors: Arena<TensorEntry>,
    storage: Vec<Vec<u8>>,
    nodes: Arena<Node>,
    scalars: Vec<Weak<ScalarValue>>,
}

impl Graph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zero-initialized tensor.
    pub fn add_tensor(&mut self, desc: TensorDesc) -> Result<TensorId, KernelError> {
        desc.validate()?;
        let host = HostTensor::zeros(desc);
        self.push_host(host)
    }

    /// Add a tensor with raw little-endian contents.
    pub fn add_tensor_with_bytes(
        &mut self,
        desc: TensorDesc,
        bytes: Vec<u8>,
    ) -> Result<TensorId, KernelError> {
        desc.validate()?;
        let host = HostTensor::from_bytes(desc, bytes)?;
        self.push_host(host)
    }

    /// Add a tensor holding `values`, quantized per its descriptor.
    pub fn add_tensor_from_f32(
        &mut self,
        desc: TensorDesc,
        values: &[f32],
    ) -> Result<TensorId, KernelError> {
        desc.validate()?;
        let host = HostTensor::from_f32(desc, values)?;
        self.push_host(host)
    }

    /// Add a transient tensor owned by a pipeline.
    pub fn add_virtual_tensor(&mut self, desc: TensorDesc) -> Result<TensorId, KernelError> {
        self.add_tensor(desc.into_virtual())
    }

    fn push_host(&mut self, host: HostTensor) -> Result<TensorId, KernelError> {
        let desc = host.desc().clone();
        self.storage.push(host.into_bytes());
        self.tensors.append(TensorEntry {
            desc,
            storage: self.storage.len() - 1,
        })
    }

    /// View `id` with a new shape. The view aliases the base storage.
    pub fn reshape(&mut self, id: TensorId, shape: &[usize]) -> Result<TensorId, KernelError> {
        let base = self.entry(id)?;
        let desc = base.desc.reshaped(shape)?;
        desc.validate()?;
        let storage = base.storage;
        self.tensors.append(TensorEntry { desc, storage })
    }

    fn entry(&self, id: TensorId) -> Result<&TensorEntry, KernelError> {
        self.tensors
            .get(id)
            .ok_or(KernelError::MissingTensor(id.index()))
    }

    /// Descriptor of a tensor.
    pub fn tensor(&self, id: TensorId) -> Result<&TensorDesc, KernelError> {
        Ok(&self.entry(id)?.desc)
    }

    /// Number of tensors, views included.
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Whether two tensors share storage.
    pub fn aliases(&self, a: TensorId, b: TensorId) -> Result<bool, KernelError> {
        Ok(self.entry(a)?.storage == self.entry(b)?.storage)
    }

    /// Snapshot of a tensor as host storage.
    pub fn host(&self, id: TensorId) -> Result<HostTensor, KernelError> {
        let entry = self.entry(id)?;
        Ok(HostTensor::from_bytes(
            entry.desc.clone(),
            self.storage[entry.storage].clone(),
        )?)
    }

    /// Dequantized contents.
    pub fn read_f32(&self, id: TensorId) -> Result<Vec<f32>, KernelError> {
        Ok(self.host(id)?.read_f32())
    }

    /// Raw element values.
    pub fn read_raw(&self, id: TensorId) -> Result<Vec<f64>, KernelError> {
        Ok(self.host(id)?.read_raw())
    }

    /// Quantize and store `values`.
    pub fn write_f32(&mut self, id: TensorId, values: &[f32]) -> Result<(), KernelError> {
        let entry = self.entry(id)?;
        let mut host = HostTensor::zeros(entry.desc.clone());
        let storage = entry.storage;
        host.write_from_f32(values)?;
        self.storage[storage] = host.into_bytes();
        Ok(())
    }

    /// Store raw element values.
    pub fn write_raw(&mut self, id: TensorId, values: &[f64]) -> Result<(), KernelError> {
        let entry = self.entry(id)?;
        let mut host = HostTensor::zeros(entry.desc.clone());
        let storage = entry.storage;
        host.write_raw(values)?;
        self.storage[storage] = host.into_bytes();
        Ok(())
    }

    /// Create a scalar parameter. It is released when its last handle drops.
    pub fn create_scalar(&mut self, value: ScalarValue) -> Scalar {
        let rc = Rc::new(value);
        self.scalars.retain(|w| w.strong_count() > 0);
        self.scalars.push(Rc::downgrade(&rc));
        Scalar(rc)
    }

    /// Number of scalars still referenced by a node or a caller.
    pub fn live_scalars(&self) -> usize {
        self.scalars.iter().filter(|w| w.strong_count() > 0).count()
    }

    pub(crate) fn push_node(&mut self, node: Node) -> Result<NodeId, KernelError> {
        self.nodes.append(node)
    }

    /// Node by handle.
    pub fn node(&self, id: NodeId) -> Result<&Node, KernelError> {
        self.nodes.get(id).ok_or(KernelError::MissingNode(id.index()))
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Run one node on the host.
    pub fn execute(&mut self, id: NodeId) -> Result<(), KernelError> {
        let node = self.node(id)?;
        let exec = node
            .kernel
            .executor
            .ok_or_else(|| KernelError::NotExecutable(node.kernel.name.clone()))?;
        let params = node.params.clone();
        let constants = node.constants.clone();
        let kernel = node.kernel.name.clone();
        let mut ctx = ExecContext {
            graph: self,
            params: &params,
            constants: &constants,
            kernel: &kernel,
        };
        exec(&mut ctx)
    }

    /// Run every node in creation order.
    pub fn run(&mut self) -> Result<(), KernelError> {
        let ids: Vec<NodeId> = self.nodes.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.execute(id)?;
        }
        Ok(())
    }
}

fn slot<'p>(params: &'p [Param], kernel: &str, index: usize) -> Result<&'p Param, KernelError> {
    params.get(index).ok_or_else(|| KernelError::SlotOutOfRange {
        kernel: kernel.to_string(),
        slot: index,
        len: params.len(),
    })
}

fn tensor_at(params: &[Param], kernel: &str, index: usize) -> Result<TensorId, KernelError> {
    match slot(params, kernel, index)? {
        Param::Tensor(id) => Ok(*id),
        _ => Err(KernelError::SlotKind {
            kernel: kernel.to_string(),
            slot: index,
            expected: "tensor",
        }),
    }
}

fn scalar_at(params: &[Param], kernel: &str, index: usize) -> Result<ScalarValue, KernelError> {
    match slot(params, kernel, index)? {
        Param::Scalar(s) => Ok(s.value()),
        _ => Err(KernelError::SlotKind {
            kernel: kernel.to_string(),
            slot: index,
            expected: "scalar",
        }),
    }
}

/// Read-only view of a node's bound parameters, handed to initializers.
pub struct InitContext<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) params: &'a [Param],
    pub(crate) kernel: &'a str,
}

impl InitContext<'_> {
    /// Descriptor of the tensor bound at `slot`.
    pub fn desc(&self, slot: usize) -> Result<&TensorDesc, KernelError> {
        self.graph.tensor(tensor_at(self.params, self.kernel, slot)?)
    }

    /// Integer scalar at `slot`.
    pub fn scalar_i32(&self, slot: usize) -> Result<i32, KernelError> {
        scalar_at(self.params, self.kernel, slot)?.as_i32()
    }

    /// Float scalar at `slot`.
    pub fn scalar_f32(&self, slot: usize) -> Result<f32, KernelError> {
        scalar_at(self.params, self.kernel, slot)?.as_f32()
    }
}

/// Mutable view of the graph for a host executor.
pub struct ExecContext<'a> {
    graph: &'a mut Graph,
    params: &'a [Param],
    constants: &'a ConstantTable,
    kernel: &'a str,
}

impl ExecContext<'_> {
    /// Name of the running kernel.
    pub fn kernel(&self) -> &str {
        self.kernel
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether no parameters are bound.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Whether `slot` holds a tensor.
    pub fn has_tensor(&self, slot: usize) -> bool {
        matches!(self.params.get(slot), Some(Param::Tensor(_)))
    }

    /// Tensor handle at `slot`.
    pub fn tensor(&self, slot: usize) -> Result<TensorId, KernelError> {
        tensor_at(self.params, self.kernel, slot)
    }

    /// Descriptor of the tensor at `slot`.
    pub fn desc(&self, slot: usize) -> Result<&TensorDesc, KernelError> {
        self.graph.tensor(self.tensor(slot)?)
    }

    /// Dequantized contents of the tensor at `slot`.
    pub fn read_f32(&self, slot: usize) -> Result<Vec<f32>, KernelError> {
        self.graph.read_f32(self.tensor(slot)?)
    }

    /// Raw contents of the tensor at `slot`.
    pub fn read_raw(&self, slot: usize) -> Result<Vec<f64>, KernelError> {
        self.graph.read_raw(self.tensor(slot)?)
    }

    /// Quantize and store into the tensor at `slot`.
    pub fn write_f32(&mut self, slot: usize, values: &[f32]) -> Result<(), KernelError> {
        let id = self.tensor(slot)?;
        self.graph.write_f32(id, values)
    }

    /// Store raw values into the tensor at `slot`.
    pub fn write_raw(&mut self, slot: usize, values: &[f64]) -> Result<(), KernelError> {
        let id = self.tensor(slot)?;
        self.graph.write_raw(id, values)
    }

    /// Integer scalar at `slot`.
    pub fn scalar_i32(&self, slot: usize) -> Result<i32, KernelError> {
        scalar_at(self.params, self.kernel, slot)?.as_i32()
    }

    /// Float scalar at `slot`.
    pub fn scalar_f32(&self, slot: usize) -> Result<f32, KernelError> {
        scalar_at(self.params, self.kernel, slot)?.as_f32()
    }

    /// Node constants.
    pub fn constants(&self) -> &ConstantTable {
        self.constants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::signature;
    use timvx_core::{DType, Quantization};

    fn copy_exec(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
        let src = ctx.read_f32(0)?;
        let bias = ctx.scalar_f32(2)?;
        let out: Vec<f32> = src.iter().map(|v| v + bias).collect();
        ctx.write_f32(1, &out)
    }

    fn add_copy_node(g: &mut Graph, a: TensorId, b: TensorId, bias: f32) -> NodeId {
        let s = g.create_scalar(ScalarValue::F32(bias));
        g.push_node(Node {
            operator: "copy".into(),
            kernel_type: KernelType::Cpu,
            kernel: KernelDescriptor::new("cpu.copy", &signature(1, 1, 1)).with_executor(copy_exec),
            params: vec![Param::Tensor(a), Param::Tensor(b), Param::Scalar(s)],
            partition: WorkPartition::default(),
            constants: ConstantTable::new(),
        })
        .unwrap()
    }

    #[test]
    fn reshape_view_aliases_storage() {
        let mut g = Graph::new();
        let a = g
            .add_tensor_from_f32(TensorDesc::new(&[2, 3], DType::F32), &[0., 1., 2., 3., 4., 5.])
            .unwrap();
        let v = g.reshape(a, &[6]).unwrap();
        assert!(g.aliases(a, v).unwrap());
        g.write_f32(v, &[5., 4., 3., 2., 1., 0.]).unwrap();
        assert_eq!(g.read_f32(a).unwrap(), vec![5., 4., 3., 2., 1., 0.]);
        assert!(matches!(
            g.reshape(a, &[4]),
            Err(KernelError::Core(timvx_core::CoreError::ReshapeMismatch { .. }))
        ));
    }

    #[test]
    fn invalid_descriptor_rejected() {
        let mut g = Graph::new();
        let desc = TensorDesc::new(&[2], DType::F32).with_quant(Quantization::Dfp { fl: 2 });
        assert!(g.add_tensor(desc).is_err());
    }

    #[test]
    fn execute_runs_host_kernel() {
        let mut g = Graph::new();
        let a = g
            .add_tensor_from_f32(TensorDesc::new(&[3], DType::F32), &[1., 2., 3.])
            .unwrap();
        let b = g.add_tensor(TensorDesc::new(&[3], DType::F32)).unwrap();
        let n = add_copy_node(&mut g, a, b, 0.5);
        g.execute(n).unwrap();
        assert_eq!(g.read_f32(b).unwrap(), vec![1.5, 2.5, 3.5]);
        assert_eq!(g.node(n).unwrap().to_string(), "copy [CPU] cpu.copy(#0, #1, 0.5)");
    }

    #[test]
    fn scalars_released_with_last_handle() {
        let mut g = Graph::new();
        let s = g.create_scalar(ScalarValue::I32(1));
        let t = g.create_scalar(ScalarValue::I32(2));
        assert_eq!(g.live_scalars(), 2);
        drop(s);
        assert_eq!(g.live_scalars(), 1);
        drop(t);
        assert_eq!(g.live_scalars(), 0);
    }

    #[test]
    fn missing_executor_is_an_error() {
        let mut g = Graph::new();
        let a = g.add_tensor(TensorDesc::new(&[1], DType::F32)).unwrap();
        let n = g.push_node(Node {
            operator: "shader".into(),
            kernel_type: KernelType::Cl,
            kernel: KernelDescriptor::new("cl.shader", &signature(1, 0, 0)),
            params: vec![Param::Tensor(a)],
            partition: WorkPartition::new(2),
            constants: ConstantTable::new(),
        })
        .unwrap();
        assert!(matches!(g.execute(n), Err(KernelError::NotExecutable(_))));
    }

    #[test]
    fn slot_kind_checked() {
        let mut g = Graph::new();
        let a = g.add_tensor(TensorDesc::new(&[1], DType::F32)).unwrap();
        let b = g.add_tensor(TensorDesc::new(&[1], DType::F32)).unwrap();
        let n = g.push_node(Node {
            operator: "copy".into(),
            kernel_type: KernelType::Cpu,
            kernel: KernelDescriptor::new("cpu.copy", &signature(1, 1, 1)).with_executor(copy_exec),
            params: vec![Param::Tensor(a), Param::Tensor(b), Param::Tensor(a)],
            partition: WorkPartition::default(),
            constants: ConstantTable::new(),
        })
        .unwrap();
        assert!(matches!(
            g.execute(n),
            Err(KernelError::SlotKind { slot: 2, expected: "scalar", .. })
        ));
    }
}
