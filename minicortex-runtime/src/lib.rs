//! Lifecycle supervisor, control plane, hot-reload, workspace persistence,
//! and node discovery built on `minicortex-core`'s registry and scheduler.

pub mod app;
pub mod control;
pub mod discovery;
pub mod hotreload;
pub mod persistence;
pub mod supervisor;

pub use app::Application;
pub use control::{in_process_control, Command, Event, InProcessControlClient, InProcessControlServer};
pub use discovery::{discover, rediscover, NodeModule};
pub use hotreload::{reload_instance, ClassSource};
pub use persistence::WorkspaceStore;
pub use supervisor::{NetworkState, Supervisor};
