use timvx_core::{ParamBag, TensorDesc};
use timvx_kernel::{DispatchConfig, Graph, KernelRegistry, KernelType, NodeId, TensorId};

/// Registry holding every CPU and shader backend.
#[allow(dead_code)]
pub fn registry() -> KernelRegistry {
    registry_with(DispatchConfig::default())
}

/// Registry with every backend and the given configuration.
#[allow(dead_code)]
pub fn registry_with(config: DispatchConfig) -> KernelRegistry {
    let mut registry = KernelRegistry::with_config(config);
    timvx_cpu::register_all(&mut registry).expect("cpu backends register");
    timvx_gpu::register_all(&mut registry).expect("gpu backends register");
    registry
}

/// Configuration with shaders switched off, so everything lands on the CPU.
#[allow(dead_code)]
pub fn host_only() -> DispatchConfig {
    DispatchConfig {
        enable_shader: false,
        ..DispatchConfig::default()
    }
}

/// One planned operator call.
#[allow(dead_code)]
pub struct Call {
    pub graph: Graph,
    pub node: Option<NodeId>,
    pub outputs: Vec<TensorId>,
}

#[allow(dead_code)]
impl Call {
    /// Kernel type of the planned node.
    pub fn kernel_type(&self) -> KernelType {
        let id = self.node.expect("no node planned");
        self.graph.node(id).expect("node exists").kernel_type
    }

    /// Kernel name of the planned node.
    pub fn kernel_name(&self) -> String {
        let id = self.node.expect("no node planned");
        self.graph.node(id).expect("node exists").kernel.name.clone()
    }

    /// Run every node and read back output `i`.
    pub fn run(&mut self, i: usize) -> Vec<f32> {
        self.graph.run().expect("graph runs");
        self.graph.read_f32(self.outputs[i]).expect("output readable")
    }

    /// Read output `i` after a previous run.
    pub fn output(&self, i: usize) -> Vec<f32> {
        self.graph.read_f32(self.outputs[i]).expect("output readable")
    }
}

/// Add the tensors of one call to a fresh graph and plan it.
#[allow(dead_code)]
pub fn plan(
    registry: &KernelRegistry,
    operator: &str,
    inputs: &[(TensorDesc, &[f32])],
    outputs: &[TensorDesc],
    params: &ParamBag,
) -> Call {
    let mut graph = Graph::new();
    let ins: Vec<Option<TensorId>> = inputs
        .iter()
        .map(|(desc, data)| Some(graph.add_tensor_from_f32(desc.clone(), data).expect("input")))
        .collect();
    let outs: Vec<TensorId> = outputs
        .iter()
        .map(|desc| graph.add_tensor(desc.clone()).expect("output"))
        .collect();
    let out_opts: Vec<Option<TensorId>> = outs.iter().copied().map(Some).collect();
    let node = registry.create_node(&mut graph, operator, &ins, &out_opts, params);
    Call {
        graph,
        node,
        outputs: outs,
    }
}

/// Assert element-wise closeness.
#[allow(dead_code)]
pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tol, "element {i}: {a} vs {e} (tol {tol})");
    }
}
