#![no_main]

use libfuzzer_sys::fuzz_target;

use timvx_core::{DType, ParamBag, TensorDesc};
use timvx_kernel::{Graph, KernelRegistry};

fuzz_target!(|data: &[u8]| {
    let Some((&head, rest)) = data.split_first() else {
        return;
    };
    let values: Vec<f32> = rest
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if values.is_empty() {
        return;
    }

    // Direct call: any k, any block size, NaNs included.
    let block = (head as usize % values.len()) + 1;
    let k = (head as usize >> 4) % (block + 2);
    let _ = timvx_cpu::topk::top_k(&values, block, k);

    // Through the graph the node must either plan and run or be refused.
    let mut registry = KernelRegistry::new();
    if timvx_cpu::register_all(&mut registry).is_err() {
        return;
    }
    let blocks = values.len() / block;
    let used = &values[..blocks * block];
    let k = k.min(block);
    let mut graph = Graph::new();
    let (Ok(x), Ok(v), Ok(i)) = (
        graph.add_tensor_from_f32(TensorDesc::new(&[block, blocks], DType::F32), used),
        graph.add_tensor(TensorDesc::new(&[k.max(1), blocks], DType::F32)),
        graph.add_tensor(TensorDesc::new(&[k.max(1), blocks], DType::I32)),
    ) else {
        return;
    };
    let params = ParamBag::new().with_i32("top_k", k as i32);
    if registry
        .create_node(&mut graph, "topk", &[Some(x)], &[Some(v), Some(i)], &params)
        .is_some()
    {
        let _ = graph.run();
    }
});
