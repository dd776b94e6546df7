//! The declarative attribute system: the six descriptor kinds a node class
//! can expose, and the ordered schema built from them.

use crate::Value;
use serde::{Deserialize, Serialize};

pub type Key = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub key: Key,
    pub label: String,
    /// Declared type tag, e.g. `"int"`, `"ndarray"`, `"any"`.
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyKind {
    Range {
        min: f64,
        max: f64,
        log_scale: bool,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Bool,
    Enum {
        options: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub key: Key,
    pub label: String,
    pub kind: PropertyKind,
    pub default: Value,
    /// Name of a callback method invoked with (new, old) on every accepted
    /// write, resolved against the node's `call_action`/on-change dispatch.
    pub on_change: Option<String>,
}

impl PropertyDescriptor {
    /// Coerce and clamp/validate a candidate value per spec §4.1.
    pub fn coerce(&self, candidate: &Value) -> Result<Value, String> {
        match &self.kind {
            PropertyKind::Range {
                min,
                max,
                log_scale: _,
            } => {
                let f = candidate
                    .as_f64()
                    .ok_or_else(|| format!("property {} expects a numeric value", self.key))?;
                Ok(Value::Float(f.clamp(*min, *max)))
            }
            PropertyKind::Integer { min, max } => {
                let mut i = candidate
                    .as_i64()
                    .ok_or_else(|| format!("property {} expects an integer value", self.key))?;
                if let Some(min) = min {
                    i = i.max(*min);
                }
                if let Some(max) = max {
                    i = i.min(*max);
                }
                Ok(Value::Int(i))
            }
            PropertyKind::Bool => {
                let b = candidate
                    .as_bool()
                    .ok_or_else(|| format!("property {} expects a bool value", self.key))?;
                Ok(Value::Bool(b))
            }
            PropertyKind::Enum { options } => {
                let s = candidate
                    .as_str()
                    .ok_or_else(|| format!("property {} expects a string value", self.key))?;
                if options.iter().any(|o| o == s) {
                    Ok(Value::Str(s.to_string()))
                } else {
                    Err(format!(
                        "property {} value {:?} is not one of {:?}",
                        self.key, s, options
                    ))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DisplayKind {
    Numeric { format: Option<String> },
    Text,
    Vector1D,
    Vector2D { color_mode: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayDescriptor {
    pub key: Key,
    pub label: String,
    pub kind: DisplayKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub key: Key,
    pub label: String,
    pub callback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub key: Key,
    pub default: Value,
}

/// The closed sum of attribute kinds a node class may expose (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Descriptor {
    InputPort(PortDescriptor),
    OutputPort(PortDescriptor),
    Property(PropertyDescriptor),
    Display(DisplayDescriptor),
    Action(ActionDescriptor),
    Store(StoreDescriptor),
}

impl Descriptor {
    pub fn key(&self) -> &str {
        match self {
            Descriptor::InputPort(p) | Descriptor::OutputPort(p) => &p.key,
            Descriptor::Property(p) => &p.key,
            Descriptor::Display(d) => &d.key,
            Descriptor::Action(a) => &a.key,
            Descriptor::Store(s) => &s.key,
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            Descriptor::InputPort(_) | Descriptor::OutputPort(_) => Value::None,
            Descriptor::Property(p) => p.default.clone(),
            Descriptor::Display(_) => Value::None,
            Descriptor::Action(_) => Value::None,
            Descriptor::Store(s) => s.default.clone(),
        }
    }
}

/// Palette category a node class is listed under (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaletteCategory {
    Input,
    Processing,
    Utilities,
    Output,
    Custom(String),
}

/// The immutable, ordered schema describing a node class (spec §3). Order
/// of appearance is preserved and is the rendering order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSchema {
    pub type_name: crate::TypeName,
    pub category: PaletteCategory,
    pub descriptors: Vec<Descriptor>,
    /// Eligible for hot-reload (spec §3, §4.6).
    pub dynamic: bool,
    /// Used only when `dynamic`; source file to re-read on reload.
    pub source_file: Option<String>,
}

impl NodeSchema {
    pub fn descriptor(&self, key: &str) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.key() == key)
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::InputPort(p) => Some(p),
            _ => None,
        })
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::OutputPort(p) => Some(p),
            _ => None,
        })
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::Property(p) => Some(p),
            _ => None,
        })
    }

    pub fn stores(&self) -> impl Iterator<Item = &StoreDescriptor> {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::Store(s) => Some(s),
            _ => None,
        })
    }

    pub fn displays(&self) -> impl Iterator<Item = &DisplayDescriptor> {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::Display(d) => Some(d),
            _ => None,
        })
    }
}
