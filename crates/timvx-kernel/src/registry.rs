//! Kernel registry and the backend selection loop.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use timvx_core::{DType, ParamBag};

use crate::{
    DispatchConfig, Graph, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId,
    Priority, SetupContext, TensorId, VariantKey,
};

/// Variants of one (operator, kernel type) pair, in registration order.
#[derive(Clone, Debug, Default)]
pub struct VariantTable {
    index: HashMap<VariantKey, usize>,
    entries: Vec<(VariantKey, KernelDescriptor)>,
}

impl VariantTable {
    fn build(backend: &dyn KernelBackend) -> Result<Self, KernelError> {
        let mut table = Self::default();
        for (key, desc) in backend.variants() {
            if table.index.contains_key(&key) {
                return Err(KernelError::DuplicateKey {
                    operator: backend.operator().to_string(),
                    kernel_type: backend.kernel_type(),
                    key: key.to_string(),
                });
            }
            table.index.insert(key.clone(), table.entries.len());
            table.entries.push((key, desc));
        }
        Ok(table)
    }

    /// Descriptor registered under `key`.
    pub fn get(&self, key: &VariantKey) -> Option<&KernelDescriptor> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    /// Number of variants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Variants in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&VariantKey, &KernelDescriptor)> {
        self.entries.iter().map(|(k, d)| (k, d))
    }
}

/// Operator-specific priority function. Overrides the default table.
pub type SelectFn =
    fn(&Graph, &[Option<TensorId>], &[Option<TensorId>], &ParamBag) -> Vec<Priority>;

struct Entry {
    backend: Box<dyn KernelBackend>,
    table: VariantTable,
}

/// All registered backends, keyed by operator and kernel type.
pub struct KernelRegistry {
    entries: BTreeMap<(String, KernelType), Entry>,
    selectors: HashMap<String, SelectFn>,
    config: DispatchConfig,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("backends", &self.entries.len())
            .field("selectors", &self.selectors.len())
            .field("config", &self.config)
            .finish()
    }
}

impl KernelRegistry {
    /// Empty registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    /// Empty registry with a given configuration.
    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            selectors: HashMap::new(),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Replace the configuration.
    pub fn set_config(&mut self, config: DispatchConfig) {
        self.config = config;
    }

    /// Register a backend and index its variants.
    ///
    /// Fails if the backend lists two variants under one key, or if the
    /// operator already has a backend of the same kernel type.
    pub fn register(&mut self, backend: Box<dyn KernelBackend>) -> Result<(), KernelError> {
        let id = (backend.operator().to_string(), backend.kernel_type());
        if self.entries.contains_key(&id) {
            return Err(KernelError::DuplicateBackend {
                operator: id.0,
                kernel_type: id.1,
            });
        }
        let table = VariantTable::build(backend.as_ref())?;
        self.entries.insert(id, Entry { backend, table });
        Ok(())
    }

    /// Install an operator-specific priority function.
    pub fn register_selector(&mut self, operator: &str, select: SelectFn) {
        self.selectors.insert(operator.to_string(), select);
    }

    /// Backend for `operator` of the given kernel type.
    pub fn find(&self, operator: &str, kernel_type: KernelType) -> Option<&dyn KernelBackend> {
        self.entries
            .get(&(operator.to_string(), kernel_type))
            .map(|e| e.backend.as_ref())
    }

    /// Variant table for `operator` of the given kernel type.
    pub fn table(&self, operator: &str, kernel_type: KernelType) -> Option<&VariantTable> {
        self.entries
            .get(&(operator.to_string(), kernel_type))
            .map(|e| &e.table)
    }

    /// Look up one variant. `None` is an ordinary outcome.
    pub fn resolve(
        &self,
        operator: &str,
        kernel_type: KernelType,
        key: &VariantKey,
    ) -> Option<&KernelDescriptor> {
        self.table(operator, kernel_type)?.get(key)
    }

    /// Registered operators, sorted.
    pub fn operators(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.entries.keys().map(|(op, _)| op.as_str()).collect();
        ops.dedup();
        ops
    }

    /// Kernel types registered for `operator`, with their variant counts.
    pub fn backends_for(&self, operator: &str) -> Vec<(KernelType, usize)> {
        self.entries
            .iter()
            .filter(|((op, _), _)| op == operator)
            .map(|((_, t), e)| (*t, e.table.len()))
            .collect()
    }

    /// Candidate order for one call: the operator's selector if it has
    /// one, else the configured default, sorted by descending weight.
    pub fn priorities(
        &self,
        operator: &str,
        graph: &Graph,
        inputs: &[Option<TensorId>],
        outputs: &[Option<TensorId>],
        params: &ParamBag,
    ) -> Vec<Priority> {
        let mut order = match self.selectors.get(operator) {
            Some(select) => select(graph, inputs, outputs, params),
            None => self.config.default_priority(),
        };
        order.sort_by(|a, b| b.weight.cmp(&a.weight));
        order
    }

    /// Instantiate `operator` over the given tensors.
    ///
    /// Backends are tried in priority order, skipping kernel types the
    /// configuration rules out; the first one whose setup yields a node
    /// wins. Setup errors are logged and treated like an unsupported
    /// combination.
    pub fn create_node(
        &self,
        graph: &mut Graph,
        operator: &str,
        inputs: &[Option<TensorId>],
        outputs: &[Option<TensorId>],
        params: &ParamBag,
    ) -> Option<NodeId> {
        let low_bit = inputs
            .iter()
            .chain(outputs)
            .flatten()
            .filter_map(|id| graph.tensor(*id).ok())
            .any(|d| matches!(d.dtype, DType::I4 | DType::U4));

        for p in self.priorities(operator, graph, inputs, outputs, params) {
            if !self.config.allows(p.kernel_type, low_bit) {
                continue;
            }
            let Some(entry) = self.entries.get(&(operator.to_string(), p.kernel_type)) else {
                continue;
            };
            let mut ctx = SetupContext {
                graph: &mut *graph,
                operator,
                kernel_type: p.kernel_type,
                table: &entry.table,
                inputs,
                outputs,
                params,
                config: &self.config,
            };
            match entry.backend.setup(&mut ctx) {
                Ok(Some(node)) => {
                    log::debug!("Instance {} node with kernel \"{operator}\"", p.kernel_type);
                    return Some(node);
                }
                Ok(None) => {}
                Err(e) => log::warn!("{} setup of {operator} failed: {e}", p.kernel_type),
            }
        }
        log::warn!("No valid kernel for {operator}");
        None
    }
}
