//! The process-wide catalog of node classes and live instances, the
//! connection list, and the viewport (spec §4.3).

use crate::{
    descriptor::{Descriptor, Key},
    error::{MiniCortexError, Result},
    node::{NodeClass, NodeContext, NodeInstance},
    value::{types_compatible, Value},
    InstanceId, TypeName,
};
use std::collections::HashMap;

/// A directed edge from one node's output port to another's input port
/// (spec §3). Unique on `(target, target_key)`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Connection {
    pub source: InstanceId,
    pub source_key: Key,
    pub target: InstanceId,
    pub target_key: Key,
}

/// Pan/zoom state of the graph view (spec §3). Zoom is always clamped to
/// `[0.1, 3.0]`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    pub pan_x: f64,
    pub pan_y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom.clamp(0.1, 3.0);
        self
    }
}

/// Per-instance, per-output last-produced value, with the current and
/// previous-tick generations the scheduler's signal handoff rule needs
/// (spec §4.4).
#[derive(Default)]
pub struct SignalStore {
    current: HashMap<(InstanceId, Key), Value>,
    previous: HashMap<(InstanceId, Key), Value>,
}

impl SignalStore {
    pub fn write_current(&mut self, instance: InstanceId, key: &str, value: Value) {
        self.current.insert((instance, key.to_string()), value);
    }

    pub fn read_current(&self, instance: InstanceId, key: &str) -> Value {
        self.current
            .get(&(instance, key.to_string()))
            .cloned()
            .unwrap_or(Value::None)
    }

    pub fn read_previous(&self, instance: InstanceId, key: &str) -> Value {
        self.previous
            .get(&(instance, key.to_string()))
            .cloned()
            .unwrap_or(Value::None)
    }

    /// Atomically replaces the previous-tick generation with this tick's
    /// writes and starts a fresh current generation (spec §4.4).
    pub fn advance_tick(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    pub fn clear_instance(&mut self, instance: InstanceId) {
        self.current.retain(|(i, _), _| *i != instance);
        self.previous.retain(|(i, _), _| *i != instance);
    }
}

/// A structured view of nodes + connections + viewport used to seed the
/// UI and respond to mutation APIs (spec §4.3).
pub struct Snapshot {
    pub instances: Vec<InstanceId>,
    pub connections: Vec<Connection>,
    pub viewport: Viewport,
}

/// The registry: class table, instance table, connection list, viewport,
/// and the signal store, all guarded (by the caller) under one exclusive
/// lock (spec §4.3, §5).
#[derive(Default)]
pub struct Registry {
    classes: HashMap<TypeName, NodeClass>,
    instances: HashMap<InstanceId, NodeInstance>,
    connections: Vec<Connection>,
    viewport: Viewport,
    signals: SignalStore,
    next_creation_order: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> &SignalStore {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut SignalStore {
        &mut self.signals
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport.with_zoom(viewport.zoom);
    }

    pub fn classes(&self) -> impl Iterator<Item = &NodeClass> {
        self.classes.values()
    }

    pub fn class(&self, type_name: &TypeName) -> Option<&NodeClass> {
        self.classes.get(type_name)
    }

    pub fn instances(&self) -> impl Iterator<Item = &NodeInstance> {
        self.instances.values()
    }

    pub fn instance(&self, id: InstanceId) -> Option<&NodeInstance> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut NodeInstance> {
        self.instances.get_mut(&id)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Idempotent on type name; re-registering a `dynamic` class replaces
    /// its schema and factory (spec §4.3). Re-registering a non-dynamic
    /// class under the same name is a no-op.
    pub fn register_class(&mut self, class: NodeClass) {
        let name = class.type_name().clone();
        match self.classes.get(&name) {
            Some(existing) if !existing.schema.dynamic => {}
            _ => {
                self.classes.insert(name, class);
            }
        }
    }

    /// Replaces a class's schema/factory unconditionally; used by the
    /// hot-reload driver, which has already validated dynamism and
    /// `process` presence before calling in.
    pub fn replace_class(&mut self, class: NodeClass) {
        self.classes.insert(class.type_name().clone(), class);
    }

    pub fn create_instance(&mut self, type_name: &TypeName, position: (f64, f64)) -> Result<InstanceId> {
        if !position.0.is_finite() || !position.1.is_finite() {
            return Err(MiniCortexError::Validation(
                "instance position must be finite".into(),
            ));
        }
        let class = self
            .classes
            .get(type_name)
            .ok_or_else(|| MiniCortexError::NotFound(format!("node class {type_name}")))?
            .clone();

        let id = InstanceId::new();
        let creation_order = self.next_creation_order;
        self.next_creation_order += 1;

        let outputs_enabled = class
            .schema
            .displays()
            .map(|d| (d.key.clone(), true))
            .collect();

        let mut instance = NodeInstance {
            id,
            type_name: type_name.clone(),
            position,
            cells: class.default_cells(),
            displays: HashMap::new(),
            outputs_enabled,
            error: None,
            node: class.instantiate(),
            creation_order,
        };

        run_init(&mut instance, &mut self.signals)?;
        self.instances.insert(id, instance);
        Ok(id)
    }

    /// Inserts an already-constructed instance without re-running `init`,
    /// used by the hot-reload driver after it has already run `init` on
    /// the replacement and by persistence after workspace load (which
    /// always runs a probe tick, not a bare `init`, per spec §4.7).
    pub fn insert_instance(&mut self, instance: NodeInstance) {
        self.instances.insert(instance.id, instance);
    }

    /// Builds a fresh instance of `type_name` under a caller-chosen `id`
    /// (so callers that must preserve identity — hot-reload replacing an
    /// instance in place, workspace load restoring saved ids — can do so),
    /// seeds its cells from class defaults overlaid with `properties` and
    /// `stores` (unknown keys are silently dropped, matching spec §4.6's
    /// "extra keys in old schema are discarded"), seeds `outputs_enabled`
    /// from the class's displays overlaid with the caller's flags, and
    /// runs `init` on the populated cells — satisfying §4.2's rule that
    /// `init` sees *restored*, not default, values at load/reload time.
    pub fn create_instance_with_state(
        &mut self,
        id: InstanceId,
        type_name: &TypeName,
        position: (f64, f64),
        properties: HashMap<Key, Value>,
        stores: HashMap<Key, Value>,
        outputs_enabled: HashMap<Key, bool>,
    ) -> Result<InstanceId> {
        if !position.0.is_finite() || !position.1.is_finite() {
            return Err(MiniCortexError::Validation(
                "instance position must be finite".into(),
            ));
        }
        let class = self
            .classes
            .get(type_name)
            .ok_or_else(|| MiniCortexError::NotFound(format!("node class {type_name}")))?
            .clone();

        let mut cells = class.default_cells();
        for (key, value) in properties.into_iter().chain(stores) {
            if cells.contains_key(&key) {
                cells.insert(key, value);
            }
        }

        let mut enabled: HashMap<Key, bool> = class
            .schema
            .displays()
            .map(|d| (d.key.clone(), true))
            .collect();
        for (key, flag) in outputs_enabled {
            if enabled.contains_key(&key) {
                enabled.insert(key, flag);
            }
        }

        let creation_order = self.next_creation_order();

        let mut instance = NodeInstance {
            id,
            type_name: type_name.clone(),
            position,
            cells,
            displays: HashMap::new(),
            outputs_enabled: enabled,
            error: None,
            node: class.instantiate(),
            creation_order,
        };

        run_init(&mut instance, &mut self.signals)?;
        self.instances.insert(id, instance);
        Ok(id)
    }

    pub fn next_creation_order(&mut self) -> u64 {
        let v = self.next_creation_order;
        self.next_creation_order += 1;
        v
    }

    /// Removes the instance, every connection touching it, and clears
    /// its signals (spec §4.3).
    pub fn delete_instance(&mut self, id: InstanceId) -> Result<()> {
        if self.instances.remove(&id).is_none() {
            return Err(MiniCortexError::NotFound(format!("instance {id}")));
        }
        self.connections
            .retain(|c| c.source != id && c.target != id);
        self.signals.clear_instance(id);
        Ok(())
    }

    fn port_type(&self, instance: InstanceId, key: &str, want_output: bool) -> Result<String> {
        let inst = self
            .instances
            .get(&instance)
            .ok_or_else(|| MiniCortexError::NotFound(format!("instance {instance}")))?;
        let class = self
            .classes
            .get(&inst.type_name)
            .ok_or_else(|| MiniCortexError::NotFound(format!("node class {}", inst.type_name)))?;
        class
            .schema
            .descriptors
            .iter()
            .find_map(|d| match d {
                Descriptor::OutputPort(p) if want_output && p.key == key => {
                    Some(p.data_type.clone())
                }
                Descriptor::InputPort(p) if !want_output && p.key == key => {
                    Some(p.data_type.clone())
                }
                _ => None,
            })
            .ok_or_else(|| MiniCortexError::NotFound(format!("port {key} on {instance}")))
    }

    pub fn connect(
        &mut self,
        source: InstanceId,
        source_key: &str,
        target: InstanceId,
        target_key: &str,
    ) -> Result<()> {
        let out_type = self.port_type(source, source_key, true)?;
        let in_type = self.port_type(target, target_key, false)?;

        if !types_compatible(&out_type, &in_type) {
            return Err(MiniCortexError::TypeMismatch {
                from: out_type,
                to: in_type,
            });
        }

        if self
            .connections
            .iter()
            .any(|c| c.target == target && c.target_key == target_key)
        {
            return Err(MiniCortexError::PortBusy {
                instance: target,
                port: target_key.to_string(),
            });
        }

        self.connections.push(Connection {
            source,
            source_key: source_key.to_string(),
            target,
            target_key: target_key.to_string(),
        });
        Ok(())
    }

    /// No-op if the connection is absent (spec §4.3).
    pub fn disconnect(&mut self, source: InstanceId, source_key: &str, target: InstanceId, target_key: &str) {
        self.connections.retain(|c| {
            !(c.source == source
                && c.source_key == source_key
                && c.target == target
                && c.target_key == target_key)
        });
    }

    /// Validates and clamps `value` against the property's descriptor,
    /// stores the coerced value, and fires the on-change callback if one
    /// is named (spec §4.1). Returns the coerced value.
    pub fn set_property(&mut self, id: InstanceId, key: &str, value: Value) -> Result<Value> {
        let class = {
            let inst = self
                .instances
                .get(&id)
                .ok_or_else(|| MiniCortexError::NotFound(format!("instance {id}")))?;
            self.classes
                .get(&inst.type_name)
                .ok_or_else(|| MiniCortexError::NotFound(format!("node class {}", inst.type_name)))?
                .clone()
        };
        let descriptor = class
            .schema
            .properties()
            .find(|p| p.key == key)
            .ok_or_else(|| MiniCortexError::NotFound(format!("property {key} on {id}")))?
            .clone();

        let coerced = descriptor
            .coerce(&value)
            .map_err(MiniCortexError::Validation)?;

        let old = self
            .instances
            .get(&id)
            .and_then(|i| i.cells.get(key).cloned())
            .unwrap_or(Value::None);

        let instance = self.instances.get_mut(&id).expect("checked above");
        instance.cells.insert(key.to_string(), coerced.clone());

        if let Some(callback) = descriptor.on_change.as_deref() {
            let mut params = HashMap::new();
            params.insert("new".to_string(), coerced.clone());
            params.insert("old".to_string(), old);
            let inputs = HashMap::new();
            let mut outputs = HashMap::new();
            let mut displays = HashMap::new();
            let mut ctx =
                NodeContext::new(&mut instance.cells, &inputs, &mut outputs, &mut displays);
            // On-change callbacks are best-effort notifications; a node
            // that has not implemented this particular action simply
            // ignores the call via the `Node::call_action` default.
            let _ = instance.node.call_action(callback, params, &mut ctx);
            instance.displays.extend(displays);
            for (k, v) in outputs {
                self.signals.write_current(id, &k, v);
            }
        }

        Ok(coerced)
    }

    pub fn set_position(&mut self, id: InstanceId, position: (f64, f64)) -> Result<()> {
        if !position.0.is_finite() || !position.1.is_finite() {
            return Err(MiniCortexError::Validation(
                "instance position must be finite".into(),
            ));
        }
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| MiniCortexError::NotFound(format!("instance {id}")))?;
        instance.position = position;
        Ok(())
    }

    pub fn toggle_display_enabled(&mut self, id: InstanceId, key: &str, enabled: bool) -> Result<()> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| MiniCortexError::NotFound(format!("instance {id}")))?;
        if !instance.outputs_enabled.contains_key(key) {
            return Err(MiniCortexError::NotFound(format!(
                "display output {key} on {id}"
            )));
        }
        instance.outputs_enabled.insert(key.to_string(), enabled);
        Ok(())
    }

    /// Invokes a named action callback synchronously (spec §4.2, §5):
    /// runs on the calling thread, under whatever lock the caller is
    /// already holding on the registry.
    pub fn invoke_action(
        &mut self,
        id: InstanceId,
        key: &str,
        params: HashMap<String, Value>,
    ) -> Result<Value> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| MiniCortexError::NotFound(format!("instance {id}")))?;
        let inputs = HashMap::new();
        let mut outputs = HashMap::new();
        let mut displays = HashMap::new();
        let result = {
            let mut ctx =
                NodeContext::new(&mut instance.cells, &inputs, &mut outputs, &mut displays);
            instance.node.call_action(key, params, &mut ctx)
        };
        instance.displays.extend(displays);
        for (k, v) in outputs {
            self.signals.write_current(id, &k, v);
        }
        result
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            instances: self.instances.keys().copied().collect(),
            connections: self.connections.clone(),
            viewport: self.viewport,
        }
    }

    /// Groups registered classes by palette category for the `GetPalette`
    /// control-plane operation (spec §6). Display name is derived from
    /// the type name; the schema carries no separate label field.
    pub fn palette(&self) -> Vec<(crate::descriptor::PaletteCategory, Vec<TypeName>)> {
        let mut grouped: Vec<(crate::descriptor::PaletteCategory, Vec<TypeName>)> = Vec::new();
        for class in self.classes.values() {
            let category = class.schema.category.clone();
            if let Some(entry) = grouped.iter_mut().find(|(c, _)| *c == category) {
                entry.1.push(class.type_name().clone());
            } else {
                grouped.push((category, vec![class.type_name().clone()]));
            }
        }
        grouped
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.connections.clear();
        self.viewport = Viewport::default();
        self.signals = SignalStore::default();
    }
}

/// Runs `init` against scratch input/output/display buffers, then merges
/// writes into the instance's own storage and the signal store's current
/// generation (so a probe immediately after creation sees fresh values).
pub(crate) fn run_init(instance: &mut NodeInstance, signals: &mut SignalStore) -> Result<()> {
    let inputs = HashMap::new();
    let mut outputs = HashMap::new();
    let mut displays = HashMap::new();
    {
        let mut ctx = NodeContext::new(&mut instance.cells, &inputs, &mut outputs, &mut displays);
        instance.node.init(&mut ctx)?;
    }
    for (key, value) in outputs {
        signals.write_current(instance.id, &key, value);
    }
    instance.displays.extend(displays);
    Ok(())
}
