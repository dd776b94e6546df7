use crate::{InstanceId, PortKey, TypeName};

/// First-class error kinds for the core engine. Every fallible public
/// operation returns `Result<T, MiniCortexError>`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum MiniCortexError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("type mismatch connecting {from} -> {to}")]
    TypeMismatch { from: String, to: String },

    #[error("port busy: {instance}.{port} already has an incoming connection")]
    PortBusy { instance: InstanceId, port: PortKey },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to load workspace {0:?}")]
    LoadFailed(String),

    #[error("hot-reload failed for {type_name:?}: {reason}")]
    ReloadFailed { type_name: TypeName, reason: String },

    #[error("node {instance} ({type_name:?}) raised during process: {message}")]
    NodeRuntime {
        instance: InstanceId,
        type_name: TypeName,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, MiniCortexError>;
