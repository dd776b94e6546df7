//! The control-plane command/event protocol (spec §6) and the in-process
//! transport standing in for the out-of-scope HTTP/WebSocket layer.

use minicortex_core::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::supervisor::NetworkState;

/// One request against a running [`crate::supervisor::Supervisor`],
/// covering the full operation table in spec §6. Named by what it does
/// rather than by a wire verb, since the actual RPC/HTTP framing is an
/// out-of-scope collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    GetConfig,
    GetPalette,
    ListInstances,
    GetInstanceSchema {
        id: InstanceId,
    },
    CreateInstance {
        type_name: TypeName,
        position: (f64, f64),
    },
    DeleteInstance {
        id: InstanceId,
    },
    SetPosition {
        id: InstanceId,
        x: f64,
        y: f64,
    },
    SetProperty {
        id: InstanceId,
        key: String,
        value: Value,
    },
    InvokeAction {
        id: InstanceId,
        key: String,
        params: HashMap<String, Value>,
    },
    ToggleDisplayEnabled {
        id: InstanceId,
        key: String,
        enabled: bool,
    },
    HotReloadInstance {
        id: InstanceId,
    },
    Rediscover,
    CreateConnection {
        src_id: InstanceId,
        src_key: String,
        dst_id: InstanceId,
        dst_key: String,
    },
    DeleteConnection {
        src_id: InstanceId,
        src_key: String,
        dst_id: InstanceId,
        dst_key: String,
    },
    Start,
    Stop,
    Step,
    SetSpeed {
        hz: f64,
    },
    WorkspaceList,
    WorkspaceSave {
        name: String,
    },
    WorkspaceLoad {
        name: String,
    },
    WorkspaceDelete {
        name: String,
    },
    WorkspaceClear,
    WorkspaceCurrent,
}

/// A palette entry as returned by `GetPalette` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub type_name: TypeName,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteCategoryEntry {
    pub category: String,
    pub entries: Vec<PaletteEntry>,
}

/// A listed instance as returned by `ListInstances` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub type_name: TypeName,
    pub position: (f64, f64),
}

/// The full snapshot returned by `GetConfig` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub instances: Vec<InstanceSummary>,
    pub connections: Vec<Connection>,
    pub viewport: Viewport,
    pub palette: Vec<PaletteCategoryEntry>,
    pub network: NetworkState,
}

/// Responses to [`Command`]s, and the unprompted frames the broadcast
/// loop emits (spec §6's "event stream").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Config(ConfigSnapshot),
    Palette(Vec<PaletteCategoryEntry>),
    Instances(Vec<InstanceSummary>),
    InstanceSchema {
        id: InstanceId,
        schema: NodeSchema,
        properties: HashMap<String, Value>,
        stores: HashMap<String, Value>,
    },
    InstanceCreated {
        id: InstanceId,
    },
    InstanceDeleted {
        id: InstanceId,
    },
    PropertySet {
        id: InstanceId,
        key: String,
        value: Value,
    },
    ActionResult {
        id: InstanceId,
        key: String,
        value: Value,
    },
    ConnectionCreated(Connection),
    ConnectionDeleted(Connection),
    NetworkState(NetworkState),
    WorkspaceNames(Vec<String>),
    WorkspaceCurrent(Option<String>),
    /// A node's `process`/action callback raised during a tick (spec §7).
    /// Always followed by a `NetworkState` event with `running = false`.
    Error {
        node_id: InstanceId,
        node_name: TypeName,
        message: String,
        trace: String,
    },
    /// One broadcast frame: enabled display values per instance plus
    /// network state (spec §6).
    State {
        displays: HashMap<InstanceId, HashMap<String, Value>>,
        network: NetworkState,
    },
    /// A bare acknowledgement for commands with no richer natural reply
    /// (`SetPosition`, `ToggleDisplayEnabled`, ...).
    Ack,
    CommandFailed {
        message: String,
    },
}

/// Client side of the in-process control channel: send commands, receive
/// events (including unsolicited broadcast frames).
pub struct InProcessControlClient {
    command_tx: std::sync::mpsc::Sender<Command>,
    event_rx: std::sync::mpsc::Receiver<Event>,
}

impl InProcessControlClient {
    pub fn send_command(
        &self,
        command: Command,
    ) -> Result<(), std::sync::mpsc::SendError<Command>> {
        self.command_tx.send(command)
    }

    pub fn recv_event(&self) -> Result<Event, std::sync::mpsc::RecvError> {
        self.event_rx.recv()
    }

    pub fn try_recv_event(&self) -> Result<Event, std::sync::mpsc::TryRecvError> {
        self.event_rx.try_recv()
    }
}

/// Server side, held by the supervisor thread: drain queued commands,
/// publish events to whoever is listening.
pub struct InProcessControlServer {
    command_rx: std::sync::mpsc::Receiver<Command>,
    event_tx: std::sync::mpsc::Sender<Event>,
}

impl InProcessControlServer {
    pub fn try_recv_command(&self) -> Option<Command> {
        self.command_rx.try_recv().ok()
    }

    pub fn send_event(&self, event: Event) -> bool {
        self.event_tx.send(event).is_ok()
    }
}

/// Builds a connected client/server pair. Any RPC/HTTP framing could sit
/// on top of this same `Command`/`Event` pair; this is the in-process
/// stand-in for the out-of-scope transport.
pub fn in_process_control() -> (InProcessControlServer, InProcessControlClient) {
    let (command_tx, command_rx) = std::sync::mpsc::channel();
    let (event_tx, event_rx) = std::sync::mpsc::channel();
    (
        InProcessControlServer {
            command_rx,
            event_tx,
        },
        InProcessControlClient {
            command_tx,
            event_rx,
        },
    )
}
