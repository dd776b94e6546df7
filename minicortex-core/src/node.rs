//! The node runtime: the contract a node implementation fulfils, and the
//! per-instance cell storage backing its descriptors (spec §4.2).

use crate::{
    as_any::AsAny,
    descriptor::{Key, NodeSchema},
    error::{MiniCortexError, Result},
    value::Value,
    InstanceId, TypeName,
};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// The accessor context passed into every call to a node's `process`,
/// `init`, or action callback. Reads come from the instance's cells
/// (properties, stores) or the resolved per-tick input signals; writes go
/// to the instance's cells (stores) or to per-call output/display buffers
/// that the caller (scheduler or registry) harvests afterwards.
pub struct NodeContext<'a> {
    pub(crate) cells: &'a mut HashMap<Key, Value>,
    pub(crate) inputs: &'a HashMap<Key, Value>,
    pub(crate) outputs: &'a mut HashMap<Key, Value>,
    pub(crate) displays: &'a mut HashMap<Key, Value>,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        cells: &'a mut HashMap<Key, Value>,
        inputs: &'a HashMap<Key, Value>,
        outputs: &'a mut HashMap<Key, Value>,
        displays: &'a mut HashMap<Key, Value>,
    ) -> Self {
        Self {
            cells,
            inputs,
            outputs,
            displays,
        }
    }

    /// Reads the most recent inbound signal for an input port; `None`
    /// (the sentinel) if unconnected or not yet populated this tick.
    pub fn get_input(&self, key: &str) -> Value {
        self.inputs.get(key).cloned().unwrap_or(Value::None)
    }

    pub fn get_property(&self, key: &str) -> Value {
        self.cells.get(key).cloned().unwrap_or(Value::None)
    }

    pub fn get_store(&self, key: &str) -> Value {
        self.cells.get(key).cloned().unwrap_or(Value::None)
    }

    pub fn set_store(&mut self, key: &str, value: Value) {
        self.cells.insert(key.to_string(), value);
    }

    pub fn set_output(&mut self, key: &str, value: Value) {
        self.outputs.insert(key.to_string(), value);
    }

    pub fn set_display(&mut self, key: &str, value: Value) {
        self.displays.insert(key.to_string(), value);
    }
}

/// A node implementation. Instances are created through a [`NodeClass`]
/// factory and carry no schema of their own — the schema lives alongside
/// the factory in the class, and per-instance values live in cells the
/// engine owns, not in struct fields. Implementations read/write only
/// through [`NodeContext`].
pub trait Node: AsAny + Send {
    /// Runs exactly once on instance creation, and again after every
    /// successful hot-reload and after workspace load (spec §4.2). All
    /// cells are already populated when this runs.
    fn init(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        Ok(())
    }

    /// Runs on every tick, and once as a probe tick when the topology
    /// changes while the network is stopped. Must tolerate unconnected
    /// (`None`) inputs.
    fn process(&mut self, ctx: &mut NodeContext) -> Result<()>;

    /// Dispatches a named action callback (spec §3, §4.2). The default
    /// rejects any key, for nodes with no `Action` descriptors.
    fn call_action(
        &mut self,
        key: &str,
        _params: HashMap<String, Value>,
        _ctx: &mut NodeContext,
    ) -> Result<Value> {
        debug!("no action callback named {key:?} on this node type");
        Err(MiniCortexError::NotFound(format!(
            "no action callback named {key:?}"
        )))
    }
}

pub type NodeFactory = Arc<dyn Fn() -> Box<dyn Node> + Send + Sync>;

/// A registered node class: its schema plus the factory that stamps out
/// fresh instances.
#[derive(Clone)]
pub struct NodeClass {
    pub schema: NodeSchema,
    pub factory: NodeFactory,
}

impl NodeClass {
    pub fn new(schema: NodeSchema, factory: NodeFactory) -> Self {
        Self { schema, factory }
    }

    pub fn type_name(&self) -> &TypeName {
        &self.schema.type_name
    }

    pub fn instantiate(&self) -> Box<dyn Node> {
        (self.factory)()
    }

    /// Builds the default cell map for a fresh instance: property and
    /// store defaults; ports/displays/actions carry no persisted cell.
    pub fn default_cells(&self) -> HashMap<Key, Value> {
        let mut cells = HashMap::new();
        for prop in self.schema.properties() {
            cells.insert(prop.key.clone(), prop.default.clone());
        }
        for store in self.schema.stores() {
            cells.insert(store.key.clone(), store.default.clone());
        }
        cells
    }
}

/// A live node instance (spec §3): identity, position, cell storage,
/// per-output enabled flags, and error state.
pub struct NodeInstance {
    pub id: InstanceId,
    pub type_name: TypeName,
    pub position: (f64, f64),
    pub cells: HashMap<Key, Value>,
    pub displays: HashMap<Key, Value>,
    pub outputs_enabled: HashMap<Key, bool>,
    pub error: Option<String>,
    pub node: Box<dyn Node>,
    /// Monotonic sequence number assigned at creation, used as the
    /// tie-break for Kahn-order stability (spec §4.4).
    pub creation_order: u64,
}

impl NodeInstance {
    pub fn get_property(&self, key: &str) -> Value {
        self.cells.get(key).cloned().unwrap_or(Value::None)
    }

    pub fn get_store(&self, key: &str) -> Value {
        self.cells.get(key).cloned().unwrap_or(Value::None)
    }
}
