//! The lifecycle supervisor (spec §4.5): the computation tick loop, the
//! display-broadcast loop, and start/stop/step/speed control over a
//! registry guarded by one exclusive lock.
//!
//! Each loop is a plain `std::thread::spawn` loop: sleep, check state,
//! conditionally run, repeat. Split into two independent loops because
//! spec §4.5 calls for two rather than one combined loop.

use log::error;
use minicortex_core::prelude::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::control::Event;

/// The broadcastable state of the computation loop (spec §4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub running: bool,
    pub speed_hz: f64,
    pub actual_hz: f64,
    pub tick: u64,
}

const MIN_HZ: f64 = 1.0;
const MAX_HZ: f64 = 300.0;
const DEFAULT_BROADCAST_HZ: f64 = 40.0;
/// Smoothing factor for the actual-Hz exponential moving average; small
/// so a handful of slow ticks don't whiplash the displayed rate.
const EMA_ALPHA: f64 = 0.2;

fn clamp_speed(hz: f64) -> f64 {
    hz.clamp(MIN_HZ, MAX_HZ)
}

/// Two long-lived worker threads over one shared, lock-guarded registry,
/// plus the atomics control operations mutate directly (spec §4.5, §5).
pub struct Supervisor {
    registry: Arc<Mutex<Registry>>,
    running: Arc<AtomicBool>,
    speed_hz_bits: Arc<AtomicU64>,
    actual_hz_bits: Arc<AtomicU64>,
    tick: Arc<AtomicU64>,
    error: Arc<StdMutex<Option<(InstanceId, TypeName, String)>>>,
    subscribers: Arc<Mutex<Vec<std::sync::mpsc::Sender<Event>>>>,
    shutdown: Arc<AtomicBool>,
    computation_thread: Option<std::thread::JoinHandle<()>>,
    broadcast_thread: Option<std::thread::JoinHandle<()>>,
}

impl Supervisor {
    /// Spawns the computation and broadcast loops, both initially idle
    /// (`running = false`) so construction never starts ticking a graph
    /// the caller hasn't populated yet.
    pub fn new(registry: Registry) -> Self {
        let registry = Arc::new(Mutex::new(registry));
        let running = Arc::new(AtomicBool::new(false));
        let speed_hz_bits = Arc::new(AtomicU64::new(10.0f64.to_bits()));
        let actual_hz_bits = Arc::new(AtomicU64::new(0f64.to_bits()));
        let tick = Arc::new(AtomicU64::new(0));
        let error = Arc::new(StdMutex::new(None));
        let subscribers: Arc<Mutex<Vec<std::sync::mpsc::Sender<Event>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let computation_thread = std::thread::spawn({
            let registry = registry.clone();
            let running = running.clone();
            let speed_hz_bits = speed_hz_bits.clone();
            let actual_hz_bits = actual_hz_bits.clone();
            let tick = tick.clone();
            let error = error.clone();
            let subscribers = subscribers.clone();
            let shutdown = shutdown.clone();
            move || {
                let mut last_tick_at: Option<Instant> = None;
                while !shutdown.load(Ordering::Relaxed) {
                    if !running.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    let hz = clamp_speed(f64::from_bits(speed_hz_bits.load(Ordering::Relaxed)));
                    std::thread::sleep(Duration::from_secs_f64(1.0 / hz));
                    if !running.load(Ordering::Relaxed) {
                        continue;
                    }

                    let now = Instant::now();
                    if let Some(prev) = last_tick_at {
                        let observed_hz = 1.0 / now.duration_since(prev).as_secs_f64().max(1e-9);
                        let prev_ema = f64::from_bits(actual_hz_bits.load(Ordering::Relaxed));
                        let ema = if prev_ema == 0.0 {
                            observed_hz
                        } else {
                            EMA_ALPHA * observed_hz + (1.0 - EMA_ALPHA) * prev_ema
                        };
                        actual_hz_bits.store(ema.to_bits(), Ordering::Relaxed);
                    }
                    last_tick_at = Some(now);

                    let mut guard = registry.lock();
                    match run_tick(&mut guard) {
                        Ok(()) => {
                            tick.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(MiniCortexError::NodeRuntime {
                            instance,
                            type_name,
                            message,
                        }) => {
                            running.store(false, Ordering::Relaxed);
                            error!("node {instance} ({type_name}) raised during tick, stopping: {message}");
                            *error.lock().unwrap() =
                                Some((instance, type_name.clone(), message.clone()));
                            drop(guard);
                            broadcast(
                                &subscribers,
                                Event::Error {
                                    node_id: instance,
                                    node_name: type_name,
                                    message,
                                    trace: String::new(),
                                },
                            );
                        }
                        Err(_) => {
                            // Scheduling itself cannot fail with any other
                            // variant; defensive, never reached.
                        }
                    }
                }
            }
        });

        let broadcast_thread = std::thread::spawn({
            let registry = registry.clone();
            let running = running.clone();
            let speed_hz_bits = speed_hz_bits.clone();
            let actual_hz_bits = actual_hz_bits.clone();
            let tick = tick.clone();
            let subscribers = subscribers.clone();
            let shutdown = shutdown.clone();
            move || {
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_secs_f64(1.0 / DEFAULT_BROADCAST_HZ));

                    let displays: HashMap<InstanceId, HashMap<String, Value>> = {
                        let guard = registry.lock();
                        guard
                            .instances()
                            .map(|inst| {
                                let values = inst
                                    .outputs_enabled
                                    .iter()
                                    .filter(|(_, enabled)| **enabled)
                                    .filter_map(|(key, _)| {
                                        inst.displays.get(key).map(|v| (key.clone(), v.clone()))
                                    })
                                    .collect();
                                (inst.id, values)
                            })
                            .collect()
                    };
                    let network = NetworkState {
                        running: running.load(Ordering::Relaxed),
                        speed_hz: clamp_speed(f64::from_bits(speed_hz_bits.load(Ordering::Relaxed))),
                        actual_hz: f64::from_bits(actual_hz_bits.load(Ordering::Relaxed)),
                        tick: tick.load(Ordering::Relaxed),
                    };
                    broadcast(&subscribers, Event::State { displays, network });
                }
            }
        });

        Self {
            registry,
            running,
            speed_hz_bits,
            actual_hz_bits,
            tick,
            error,
            subscribers,
            shutdown,
            computation_thread: Some(computation_thread),
            broadcast_thread: Some(broadcast_thread),
        }
    }

    pub fn registry(&self) -> &Arc<Mutex<Registry>> {
        &self.registry
    }

    pub fn state(&self) -> NetworkState {
        NetworkState {
            running: self.running.load(Ordering::Relaxed),
            speed_hz: clamp_speed(f64::from_bits(self.speed_hz_bits.load(Ordering::Relaxed))),
            actual_hz: f64::from_bits(self.actual_hz_bits.load(Ordering::Relaxed)),
            tick: self.tick.load(Ordering::Relaxed),
        }
    }

    pub fn last_error(&self) -> Option<(InstanceId, TypeName, String)> {
        self.error.lock().unwrap().clone()
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    /// Clears `running`; the computation loop finishes whatever sleep or
    /// in-flight tick it is in and then idles (spec §4.5). This call
    /// itself does not block on that completion — callers that need the
    /// stronger guarantee can poll `state().running` or simply rely on
    /// the registry lock, which the tick loop only holds while ticking.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Runs exactly one tick synchronously on the calling thread; legal
    /// only while stopped (spec §4.5).
    pub fn step(&self) -> Result<()> {
        if self.running.load(Ordering::Relaxed) {
            return Err(MiniCortexError::Validation(
                "step is only legal while the network is stopped".into(),
            ));
        }
        let mut guard = self.registry.lock();
        match run_tick(&mut guard) {
            Ok(()) => {
                self.tick.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                if let MiniCortexError::NodeRuntime {
                    instance,
                    type_name,
                    message,
                } = &e
                {
                    *self.error.lock().unwrap() =
                        Some((*instance, type_name.clone(), message.clone()));
                }
                Err(e)
            }
        }
    }

    /// Runs a single probe tick (spec §4.4's "probing"): used after a
    /// graph-mutation command while the network is stopped so display
    /// outputs reflect the new topology without starting the clock. A
    /// no-op (but harmless) if called while running, since the next
    /// scheduled tick covers the same ground.
    pub fn probe(&self) {
        if self.running.load(Ordering::Relaxed) {
            return;
        }
        let mut guard = self.registry.lock();
        let _ = run_tick(&mut guard);
    }

    pub fn set_speed(&self, hz: f64) {
        self.speed_hz_bits
            .store(clamp_speed(hz).to_bits(), Ordering::Relaxed);
    }

    /// Registers a new broadcast subscriber (spec §6's event stream).
    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<Event> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Stops both worker threads and blocks until they exit. Idempotent;
    /// safe to call more than once or to skip (threads are also joined,
    /// best-effort, on `Drop`).
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.computation_thread.take() {
            if h.join().is_err() {
                error!("computation thread panicked during shutdown");
            }
        }
        if let Some(h) = self.broadcast_thread.take() {
            if h.join().is_err() {
                error!("broadcast thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sends to every subscriber, dropping any whose receiver has hung up
/// (spec §5: "broadcast observers that stall are dropped after the send
/// fails").
fn broadcast(subscribers: &Arc<Mutex<Vec<std::sync::mpsc::Sender<Event>>>>, event: Event) {
    let mut subs = subscribers.lock();
    subs.retain(|tx| tx.send(event.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use minicortex_core::descriptor::Descriptor;
    use std::time::Duration;

    struct CountingNode;
    impl Node for CountingNode {
        fn process(&mut self, ctx: &mut NodeContext) -> Result<()> {
            let n = ctx.get_store("n").as_i64().unwrap_or(0);
            ctx.set_store("n", Value::Int(n + 1));
            ctx.set_display("n", Value::Int(n + 1));
            Ok(())
        }
    }

    fn counting_class() -> NodeClass {
        NodeClass::new(
            NodeSchema {
                type_name: "counting".into(),
                category: PaletteCategory::Utilities,
                descriptors: vec![
                    Descriptor::Store(minicortex_core::descriptor::StoreDescriptor {
                        key: "n".into(),
                        default: Value::Int(0),
                    }),
                    Descriptor::Display(minicortex_core::descriptor::DisplayDescriptor {
                        key: "n".into(),
                        label: "n".into(),
                        kind: minicortex_core::descriptor::DisplayKind::Numeric { format: None },
                    }),
                ],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(CountingNode) as Box<dyn Node>),
        )
    }

    #[test]
    fn step_requires_stopped() {
        let mut reg = Registry::new();
        reg.register_class(counting_class());
        reg.create_instance(&"counting".into(), (0.0, 0.0)).unwrap();
        let mut sup = Supervisor::new(reg);
        sup.step().unwrap();
        assert_eq!(sup.state().tick, 1);
        sup.start();
        assert!(sup.step().is_err());
        sup.shutdown();
    }

    #[test]
    fn start_advances_ticks_over_time() {
        let mut reg = Registry::new();
        reg.register_class(counting_class());
        reg.create_instance(&"counting".into(), (0.0, 0.0)).unwrap();
        let mut sup = Supervisor::new(reg);
        sup.set_speed(200.0);
        sup.start();
        std::thread::sleep(Duration::from_millis(200));
        sup.stop();
        let ticks = sup.state().tick;
        assert!(ticks > 0, "expected at least one tick, got {ticks}");
        sup.shutdown();
    }

    #[test]
    fn error_stops_network_and_is_reported() {
        struct FailNode;
        impl Node for FailNode {
            fn process(&mut self, _ctx: &mut NodeContext) -> Result<()> {
                Err(MiniCortexError::NodeRuntime {
                    instance: InstanceId::new(),
                    type_name: "fail".into(),
                    message: "boom".into(),
                })
            }
        }
        let mut reg = Registry::new();
        reg.register_class(NodeClass::new(
            NodeSchema {
                type_name: "fail".into(),
                category: PaletteCategory::Utilities,
                descriptors: vec![],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(FailNode) as Box<dyn Node>),
        ));
        reg.create_instance(&"fail".into(), (0.0, 0.0)).unwrap();
        let mut sup = Supervisor::new(reg);
        sup.set_speed(200.0);
        sup.start();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!sup.state().running);
        assert!(sup.last_error().is_some());
        sup.shutdown();
    }
}
