//! The closed value vocabulary shared by ports, properties, displays,
//! stores, and action parameters/returns.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Element dtype tag for [`NdArray`], mirroring the `dtype` field of the
/// workspace wire format's `__array__` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I64,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I64 => "int64",
        }
    }
}

/// A dtype-tagged, arbitrary-rank numeric array. Values are stored as
/// `f64` internally for simplicity of arithmetic; `dtype` records the
/// nominal element type so round-trips through the wire format preserve
/// the original tag even though the in-memory storage is always `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    pub dtype: DType,
    pub data: ArrayD<f64>,
}

impl NdArray {
    pub fn new(dtype: DType, data: ArrayD<f64>) -> Self {
        Self { dtype, data }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.data.shape().to_vec()
    }
}

/// The closed value type moved through ports, properties, displays,
/// stores, and action parameters/returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Array(NdArray),
    None,
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Canonical type tag used for port-type compatibility checks
    /// (spec §4.1): `ndarray`, `int`, `float`, `str`, `bool`, or `any`.
    /// `None` has no tag of its own; absence of a signal is orthogonal to
    /// the declared port type.
    pub fn type_tag(&self) -> Option<&'static str> {
        match self {
            Value::Int(_) => Some("int"),
            Value::Float(_) => Some("float"),
            Value::Bool(_) => Some("bool"),
            Value::Str(_) => Some("str"),
            Value::Array(_) => Some("ndarray"),
            Value::None => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// Checks declared port-type compatibility per spec §4.1: `any` matches
/// anything; otherwise names compare case-insensitively as opaque tags.
pub fn types_compatible(declared_out: &str, declared_in: &str) -> bool {
    if declared_out.eq_ignore_ascii_case("any") || declared_in.eq_ignore_ascii_case("any") {
        return true;
    }
    declared_out.eq_ignore_ascii_case(declared_in)
}
