//! Workspace serialization (spec §4.7, §6): the stable wire contract for a
//! saved graph (topology, per-node property/store values including
//! numeric arrays, and the viewport), plus the directory-backed
//! save/load/delete/clear/list/current operations.

use log::{info, warn};
use minicortex_core::prelude::*;
use minicortex_core::value::{DType, NdArray};
use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePan {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireViewport {
    pan: WirePan,
    zoom: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePosition {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireNode {
    id: InstanceId,
    #[serde(rename = "type")]
    type_name: TypeName,
    position: WirePosition,
    properties: HashMap<String, serde_json::Value>,
    stores: HashMap<String, serde_json::Value>,
    outputs_enabled: HashMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireConnection {
    from_node: InstanceId,
    from_output: String,
    to_node: InstanceId,
    to_input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceDoc {
    version: u32,
    viewport: WireViewport,
    nodes: Vec<WireNode>,
    connections: Vec<WireConnection>,
}

/// Encodes a numeric array as the wire format's `__array__` discriminated
/// object (spec §6).
fn array_to_json(arr: &NdArray) -> serde_json::Value {
    let shape = arr.shape();
    let flat: Vec<f64> = arr.data.iter().copied().collect();
    serde_json::json!({
        "__array__": true,
        "dtype": arr.dtype.as_str(),
        "shape": shape,
        "data": build_nested(&shape, &flat),
    })
}

fn build_nested(dims: &[usize], data: &[f64]) -> serde_json::Value {
    match dims.split_first() {
        None => serde_json::json!(data.first().copied().unwrap_or(0.0)),
        Some((head, tail)) => {
            let chunk = tail.iter().product::<usize>().max(1);
            let items: Vec<serde_json::Value> = (0..*head)
                .map(|i| build_nested(tail, &data[i * chunk..(i + 1) * chunk]))
                .collect();
            serde_json::Value::Array(items)
        }
    }
}

fn flatten_json(json: &serde_json::Value, out: &mut Vec<f64>) -> Result<()> {
    match json {
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_json(item, out)?;
            }
            Ok(())
        }
        serde_json::Value::Number(n) => {
            out.push(n.as_f64().ok_or_else(|| {
                MiniCortexError::LoadFailed("array element is not a finite number".into())
            })?);
            Ok(())
        }
        other => Err(MiniCortexError::LoadFailed(format!(
            "expected number or nested array in array data, got {other}"
        ))),
    }
}

fn dtype_from_str(s: &str) -> Result<DType> {
    match s {
        "float32" => Ok(DType::F32),
        "float64" => Ok(DType::F64),
        "int64" => Ok(DType::I64),
        other => Err(MiniCortexError::LoadFailed(format!(
            "unrecognized array dtype {other:?}"
        ))),
    }
}

fn json_to_array(json: &serde_json::Value) -> Result<NdArray> {
    let dtype = json
        .get("dtype")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MiniCortexError::LoadFailed("array missing dtype".into()))?;
    let dtype = dtype_from_str(dtype)?;
    let shape: Vec<usize> = json
        .get("shape")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MiniCortexError::LoadFailed("array missing shape".into()))?
        .iter()
        .map(|v| v.as_u64().map(|n| n as usize))
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(|| MiniCortexError::LoadFailed("array shape is not all non-negative integers".into()))?;
    let data = json
        .get("data")
        .ok_or_else(|| MiniCortexError::LoadFailed("array missing data".into()))?;
    let mut flat = Vec::new();
    flatten_json(data, &mut flat)?;
    let expected: usize = shape.iter().product::<usize>().max(if shape.is_empty() { 1 } else { 0 });
    if flat.len() != expected && !(shape.is_empty() && flat.len() == 1) {
        return Err(MiniCortexError::LoadFailed(format!(
            "array data has {} elements, shape {:?} expects {}",
            flat.len(),
            shape,
            expected
        )));
    }
    let arr = ArrayD::from_shape_vec(IxDyn(&shape), flat)
        .map_err(|e| MiniCortexError::LoadFailed(format!("array shape mismatch: {e}")))?;
    Ok(NdArray::new(dtype, arr))
}

/// Encodes a [`Value`] using the workspace wire format: scalars pass
/// through directly, arrays get the `__array__` envelope, and `None` has
/// no wire representation a saved property/store is ever expected to hold
/// (ports/displays are transient and are never serialized here).
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(i) => serde_json::json!(i),
        Value::Float(f) => serde_json::json!(f),
        Value::Bool(b) => serde_json::json!(b),
        Value::Str(s) => serde_json::json!(s),
        Value::Array(arr) => array_to_json(arr),
        Value::None => serde_json::Value::Null,
    }
}

fn value_from_json(json: &serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::None),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Ok(Value::Int(n.as_i64().unwrap_or(0)))
            } else {
                Ok(Value::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::Object(map) if map.get("__array__").and_then(|v| v.as_bool()) == Some(true) => {
            Ok(Value::Array(json_to_array(json)?))
        }
        other => Err(MiniCortexError::LoadFailed(format!(
            "cannot decode workspace value {other}"
        ))),
    }
}

fn export_doc(registry: &Registry) -> WorkspaceDoc {
    let viewport = registry.viewport();
    let mut nodes: Vec<WireNode> = registry
        .instances()
        .map(|inst| {
            let class = registry.class(&inst.type_name);
            let properties = class
                .map(|c| {
                    c.schema
                        .properties()
                        .map(|p| (p.key.clone(), value_to_json(&inst.get_property(&p.key))))
                        .collect()
                })
                .unwrap_or_default();
            let stores = class
                .map(|c| {
                    c.schema
                        .stores()
                        .map(|s| (s.key.clone(), value_to_json(&inst.get_store(&s.key))))
                        .collect()
                })
                .unwrap_or_default();
            WireNode {
                id: inst.id,
                type_name: inst.type_name.clone(),
                position: WirePosition {
                    x: inst.position.0,
                    y: inst.position.1,
                },
                properties,
                stores,
                outputs_enabled: inst.outputs_enabled.clone(),
            }
        })
        .collect();
    nodes.sort_by_key(|n| n.id);

    let mut connections: Vec<WireConnection> = registry
        .connections()
        .iter()
        .map(|c| WireConnection {
            from_node: c.source,
            from_output: c.source_key.clone(),
            to_node: c.target,
            to_input: c.target_key.clone(),
        })
        .collect();
    connections.sort_by_key(|c| (c.from_node, c.from_output.clone(), c.to_node, c.to_input.clone()));

    WorkspaceDoc {
        version: FORMAT_VERSION,
        viewport: WireViewport {
            pan: WirePan {
                x: viewport.pan_x,
                y: viewport.pan_y,
            },
            zoom: viewport.zoom,
        },
        nodes,
        connections,
    }
}

/// Rebuilds a registry's graph (instances, connections, viewport) from a
/// parsed document into `staging`, which the caller is expected to have
/// started from [`Registry::clear`] (classes/catalog untouched) so a
/// mid-import failure never corrupts the live registry (spec §7's staging
/// requirement).
fn import_doc(staging: &mut Registry, doc: &WorkspaceDoc) -> Result<()> {
    for node in &doc.nodes {
        let mut properties = HashMap::new();
        let mut stores = HashMap::new();
        if let Some(class) = staging.class(&node.type_name) {
            let schema = class.schema.clone();
            for p in schema.properties() {
                if let Some(json) = node.properties.get(&p.key) {
                    properties.insert(p.key.clone(), value_from_json(json)?);
                }
            }
            for s in schema.stores() {
                if let Some(json) = node.stores.get(&s.key) {
                    stores.insert(s.key.clone(), value_from_json(json)?);
                }
            }
        } else {
            return Err(MiniCortexError::LoadFailed(format!(
                "workspace references unknown node class {}",
                node.type_name
            )));
        }
        staging.create_instance_with_state(
            node.id,
            &node.type_name,
            (node.position.x, node.position.y),
            properties,
            stores,
            node.outputs_enabled.clone(),
        )?;
    }
    for c in &doc.connections {
        staging.connect(c.from_node, &c.from_output, c.to_node, &c.to_input)?;
    }
    staging.set_viewport(Viewport {
        pan_x: doc.viewport.pan.x,
        pan_y: doc.viewport.pan.y,
        zoom: doc.viewport.zoom,
    });
    Ok(())
}

/// Directory-backed workspace store (spec §4.7): one JSON file per saved
/// name, plus the process-wide (non-persistent) notion of the "current"
/// workspace.
pub struct WorkspaceStore {
    dir: PathBuf,
    current: Mutex<Option<String>>,
}

impl WorkspaceStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn save(&self, registry: &Registry, name: &str) -> Result<()> {
        let doc = export_doc(registry);
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| MiniCortexError::LoadFailed(format!("serialize workspace: {e}")))?;
        std::fs::write(self.path_for(name), json)
            .map_err(|e| MiniCortexError::LoadFailed(format!("write workspace {name:?}: {e}")))?;
        *self.current.lock() = Some(name.to_string());
        Ok(())
    }

    /// Clears `registry`'s graph (instances/connections/viewport, not its
    /// class catalog) and rebuilds it from the named workspace file via a
    /// staging registry, running one probing tick on success (spec §4.7).
    /// Leaves `registry` entirely unchanged if the file is absent,
    /// corrupt, or references anything invalid.
    pub fn load(&self, registry: &mut Registry, name: &str) -> Result<()> {
        let text = std::fs::read_to_string(self.path_for(name))
            .map_err(|_| MiniCortexError::LoadFailed(format!("workspace {name:?} not found")))?;
        let doc: WorkspaceDoc = serde_json::from_str(&text)
            .map_err(|e| MiniCortexError::LoadFailed(format!("workspace {name:?} is corrupt: {e}")))?;

        let mut staging = Registry::new();
        for class in registry.classes() {
            staging.register_class(class.clone());
        }
        if let Err(e) = import_doc(&mut staging, &doc) {
            warn!("workspace {name:?} left registry untouched: {e}");
            return Err(e);
        }

        *registry = staging;
        run_tick(registry)?;
        *self.current.lock() = Some(name.to_string());
        info!("loaded workspace {name:?} ({} node(s))", doc.nodes.len());
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.path_for(name))
            .map_err(|_| MiniCortexError::NotFound(format!("workspace {name:?}")))?;
        let mut current = self.current.lock();
        if current.as_deref() == Some(name) {
            *current = None;
        }
        Ok(())
    }

    /// Empties `registry`'s graph without touching any saved file (spec
    /// §4.7) and clears the "current" marker.
    pub fn clear(&self, registry: &mut Registry) {
        registry.clear();
        *self.current.lock() = None;
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| MiniCortexError::LoadFailed(format!("list workspaces: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| MiniCortexError::LoadFailed(e.to_string()))?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minicortex_core::descriptor::{Descriptor, PortDescriptor, StoreDescriptor};
    use minicortex_core::value::DType;

    struct EchoNode;
    impl Node for EchoNode {
        fn process(&mut self, _ctx: &mut NodeContext) -> Result<()> {
            Ok(())
        }
    }

    fn array_holder_class() -> NodeClass {
        NodeClass::new(
            NodeSchema {
                type_name: "array_holder".into(),
                category: PaletteCategory::Utilities,
                descriptors: vec![Descriptor::Store(StoreDescriptor {
                    key: "grid".into(),
                    default: Value::None,
                })],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(EchoNode) as Box<dyn Node>),
        )
    }

    #[test]
    fn round_trip_with_array_store() {
        let tmp = tempdir();
        let store = WorkspaceStore::new(tmp.0.clone()).unwrap();

        let mut reg = Registry::new();
        reg.register_class(array_holder_class());
        let id = reg.create_instance(&"array_holder".into(), (3.0, 4.0)).unwrap();
        let arr = NdArray::new(
            DType::F32,
            ArrayD::from_shape_vec(IxDyn(&[3, 3]), (0..9).map(|v| v as f64).collect()).unwrap(),
        );
        reg.instance_mut(id).unwrap().cells.insert("grid".into(), Value::Array(arr.clone()));

        store.save(&reg, "demo").unwrap();
        store.clear(&mut reg);
        assert!(reg.instances().next().is_none());
        store.load(&mut reg, "demo").unwrap();

        let restored = reg.instances().next().unwrap();
        assert_eq!(restored.position, (3.0, 4.0));
        match restored.get_store("grid") {
            Value::Array(got) => {
                assert_eq!(got.dtype, DType::F32);
                assert_eq!(got.shape(), vec![3, 3]);
                assert_eq!(got.data[[1, 1]], 4.0);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn load_missing_workspace_leaves_registry_untouched() {
        let tmp = tempdir();
        let store = WorkspaceStore::new(tmp.0.clone()).unwrap();
        let mut reg = Registry::new();
        reg.register_class(array_holder_class());
        let id = reg.create_instance(&"array_holder".into(), (0.0, 0.0)).unwrap();

        let err = store.load(&mut reg, "nonexistent").unwrap_err();
        assert!(matches!(err, MiniCortexError::LoadFailed(_)));
        assert!(reg.instance(id).is_some());
    }

    struct TempDir(PathBuf);
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
    impl AsRef<std::path::Path> for TempDir {
        fn as_ref(&self) -> &std::path::Path {
            &self.0
        }
    }

    fn tempdir() -> TempDir {
        let mut p = std::env::temp_dir();
        p.push(format!("minicortex-test-{}", uuid::Uuid::new_v4()));
        TempDir(p)
    }
}
