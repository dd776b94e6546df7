//! Wires the supervisor, workspace store, hot-reload driver, and node
//! discovery together behind the single [`Application::execute`] entry
//! point that answers every operation in spec §6's control-plane table.
//! Stands in for the out-of-scope HTTP/WebSocket layer: a command enum
//! executed against shared state, producing a reply event.

use minicortex_core::prelude::*;
use std::path::PathBuf;

use crate::control::{Command, ConfigSnapshot, Event, InstanceSummary, PaletteCategoryEntry, PaletteEntry};
use crate::discovery::{rediscover, NodeModule};
use crate::hotreload::{reload_instance, ClassSource};
use crate::persistence::WorkspaceStore;
use crate::supervisor::Supervisor;

fn category_name(category: &PaletteCategory) -> String {
    match category {
        PaletteCategory::Input => "Input".to_string(),
        PaletteCategory::Processing => "Processing".to_string(),
        PaletteCategory::Utilities => "Utilities".to_string(),
        PaletteCategory::Output => "Output".to_string(),
        PaletteCategory::Custom(name) => name.clone(),
    }
}

/// The process-wide control plane: one supervisor (and thus one
/// registry), one workspace store, one hot-reload source, one node
/// discovery table.
pub struct Application {
    pub supervisor: Supervisor,
    pub workspaces: WorkspaceStore,
    pub class_source: Box<dyn ClassSource>,
    pub nodes_dir: PathBuf,
    pub node_modules: Vec<Box<dyn NodeModule>>,
}

impl Application {
    pub fn new(
        registry: Registry,
        workspaces: WorkspaceStore,
        class_source: Box<dyn ClassSource>,
        nodes_dir: PathBuf,
        node_modules: Vec<Box<dyn NodeModule>>,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(registry),
            workspaces,
            class_source,
            nodes_dir,
            node_modules,
        }
    }

    fn palette(&self) -> Vec<PaletteCategoryEntry> {
        let guard = self.supervisor.registry().lock();
        guard
            .palette()
            .into_iter()
            .map(|(category, types)| PaletteCategoryEntry {
                category: category_name(&category),
                entries: types
                    .into_iter()
                    .map(|t| PaletteEntry {
                        display_name: t.0.clone(),
                        type_name: t,
                    })
                    .collect(),
            })
            .collect()
    }

    fn instance_summaries(&self) -> Vec<InstanceSummary> {
        let guard = self.supervisor.registry().lock();
        guard
            .instances()
            .map(|i| InstanceSummary {
                id: i.id,
                type_name: i.type_name.clone(),
                position: i.position,
            })
            .collect()
    }

    /// Runs any topology-affecting mutation's probe tick, but only while
    /// stopped (spec §4.4): keeps displays fresh for an idle graph.
    fn probe_if_stopped(&self) {
        self.supervisor.probe();
    }

    /// Executes one [`Command`] and returns its [`Event`] reply. This is
    /// the synchronous request-handler path (spec §5): registry mutations
    /// take the lock for the duration; `InvokeAction` likewise runs
    /// synchronously under the lock and may only interleave with a tick's
    /// lock-released user-code phase, never with a lock-held one.
    pub fn execute(&self, command: Command) -> Event {
        match command {
            Command::GetConfig => {
                let (instances, connections, viewport) = {
                    let guard = self.supervisor.registry().lock();
                    let snap = guard.snapshot();
                    let instances = guard
                        .instances()
                        .map(|i| InstanceSummary {
                            id: i.id,
                            type_name: i.type_name.clone(),
                            position: i.position,
                        })
                        .collect::<Vec<_>>();
                    (instances, snap.connections, snap.viewport)
                };
                Event::Config(ConfigSnapshot {
                    instances,
                    connections,
                    viewport,
                    palette: self.palette(),
                    network: self.supervisor.state(),
                })
            }
            Command::GetPalette => Event::Palette(self.palette()),
            Command::ListInstances => Event::Instances(self.instance_summaries()),
            Command::GetInstanceSchema { id } => {
                let guard = self.supervisor.registry().lock();
                match guard.instance(id) {
                    None => Event::CommandFailed {
                        message: MiniCortexError::NotFound(format!("instance {id}")).to_string(),
                    },
                    Some(inst) => match guard.class(&inst.type_name) {
                        None => Event::CommandFailed {
                            message: MiniCortexError::NotFound(format!(
                                "node class {}",
                                inst.type_name
                            ))
                            .to_string(),
                        },
                        Some(class) => {
                            let properties = class
                                .schema
                                .properties()
                                .map(|p| (p.key.clone(), inst.get_property(&p.key)))
                                .collect();
                            let stores = class
                                .schema
                                .stores()
                                .map(|s| (s.key.clone(), inst.get_store(&s.key)))
                                .collect();
                            Event::InstanceSchema {
                                id,
                                schema: class.schema.clone(),
                                properties,
                                stores,
                            }
                        }
                    },
                }
            }
            Command::CreateInstance { type_name, position } => {
                let result = self
                    .supervisor
                    .registry()
                    .lock()
                    .create_instance(&type_name, position);
                match result {
                    Ok(id) => {
                        self.probe_if_stopped();
                        Event::InstanceCreated { id }
                    }
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::DeleteInstance { id } => {
                let result = self.supervisor.registry().lock().delete_instance(id);
                match result {
                    Ok(()) => {
                        self.probe_if_stopped();
                        Event::InstanceDeleted { id }
                    }
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::SetPosition { id, x, y } => {
                match self.supervisor.registry().lock().set_position(id, (x, y)) {
                    Ok(()) => Event::Ack,
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::SetProperty { id, key, value } => {
                let result = self.supervisor.registry().lock().set_property(id, &key, value);
                match result {
                    Ok(coerced) => Event::PropertySet { id, key, value: coerced },
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::InvokeAction { id, key, params } => {
                let result = self.supervisor.registry().lock().invoke_action(id, &key, params);
                match result {
                    Ok(value) => Event::ActionResult { id, key, value },
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::ToggleDisplayEnabled { id, key, enabled } => {
                match self
                    .supervisor
                    .registry()
                    .lock()
                    .toggle_display_enabled(id, &key, enabled)
                {
                    Ok(()) => Event::Ack,
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::HotReloadInstance { id } => {
                let result = {
                    let mut guard = self.supervisor.registry().lock();
                    reload_instance(&mut guard, self.class_source.as_ref(), id)
                };
                match result {
                    Ok(_ids) => {
                        self.probe_if_stopped();
                        self.execute(Command::GetInstanceSchema { id })
                    }
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::Rediscover => {
                let result = {
                    let mut guard = self.supervisor.registry().lock();
                    rediscover(&mut guard, &self.nodes_dir, &self.node_modules)
                };
                match result {
                    Ok(_added) => Event::Palette(self.palette()),
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::CreateConnection { src_id, src_key, dst_id, dst_key } => {
                let result = self.supervisor.registry().lock().connect(src_id, &src_key, dst_id, &dst_key);
                match result {
                    Ok(()) => {
                        self.probe_if_stopped();
                        Event::ConnectionCreated(Connection {
                            source: src_id,
                            source_key: src_key,
                            target: dst_id,
                            target_key: dst_key,
                        })
                    }
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::DeleteConnection { src_id, src_key, dst_id, dst_key } => {
                self.supervisor
                    .registry()
                    .lock()
                    .disconnect(src_id, &src_key, dst_id, &dst_key);
                self.probe_if_stopped();
                Event::ConnectionDeleted(Connection {
                    source: src_id,
                    source_key: src_key,
                    target: dst_id,
                    target_key: dst_key,
                })
            }
            Command::Start => {
                self.supervisor.start();
                Event::NetworkState(self.supervisor.state())
            }
            Command::Stop => {
                self.supervisor.stop();
                Event::NetworkState(self.supervisor.state())
            }
            Command::Step => match self.supervisor.step() {
                Ok(()) => Event::NetworkState(self.supervisor.state()),
                Err(e) => Event::CommandFailed { message: e.to_string() },
            },
            Command::SetSpeed { hz } => {
                self.supervisor.set_speed(hz);
                Event::NetworkState(self.supervisor.state())
            }
            Command::WorkspaceList => match self.workspaces.list() {
                Ok(names) => Event::WorkspaceNames(names),
                Err(e) => Event::CommandFailed { message: e.to_string() },
            },
            Command::WorkspaceSave { name } => {
                let guard = self.supervisor.registry().lock();
                match self.workspaces.save(&guard, &name) {
                    Ok(()) => Event::WorkspaceCurrent(Some(name)),
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::WorkspaceLoad { name } => {
                let mut guard = self.supervisor.registry().lock();
                match self.workspaces.load(&mut guard, &name) {
                    Ok(()) => Event::WorkspaceCurrent(Some(name)),
                    Err(e) => Event::CommandFailed { message: e.to_string() },
                }
            }
            Command::WorkspaceDelete { name } => match self.workspaces.delete(&name) {
                Ok(()) => Event::Ack,
                Err(e) => Event::CommandFailed { message: e.to_string() },
            },
            Command::WorkspaceClear => {
                let mut guard = self.supervisor.registry().lock();
                self.workspaces.clear(&mut guard);
                Event::Ack
            }
            Command::WorkspaceCurrent => Event::WorkspaceCurrent(self.workspaces.current()),
        }
    }
}
