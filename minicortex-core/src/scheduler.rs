//! Topological scheduling with cycle break, and the per-tick signal
//! handoff (spec §4.4).

use crate::{
    error::{MiniCortexError, Result},
    node::NodeContext,
    registry::{Connection, Registry},
    value::Value,
    InstanceId, TypeName,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Whether an edge's source is evaluated before (`Feedforward`) or at/after
/// (`Feedback`) its target within a tick (spec §4.4, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeClass {
    Feedforward,
    Feedback,
}

/// Kahn's algorithm with a cycle break: ties in the ready frontier and in
/// cycle-break candidate selection are both broken by ascending
/// instance-creation order, making `build_order` deterministic for a
/// given set of instances and connections (spec §4.4, §8).
pub fn build_order(registry: &Registry) -> Vec<InstanceId> {
    let creation_order: HashMap<InstanceId, u64> = registry
        .instances()
        .map(|i| (i.id, i.creation_order))
        .collect();
    let mut successors: HashMap<InstanceId, Vec<InstanceId>> =
        registry.instances().map(|i| (i.id, Vec::new())).collect();
    let mut in_degree: HashMap<InstanceId, usize> =
        registry.instances().map(|i| (i.id, 0usize)).collect();

    for c in registry.connections() {
        if let Some(d) = in_degree.get_mut(&c.target) {
            *d += 1;
        }
        if let Some(s) = successors.get_mut(&c.source) {
            s.push(c.target);
        }
    }

    let total = in_degree.len();
    let mut remaining = in_degree;
    let mut placed: HashSet<InstanceId> = HashSet::with_capacity(total);
    let mut order = Vec::with_capacity(total);

    let mut frontier: BinaryHeap<Reverse<(u64, InstanceId)>> = remaining
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| Reverse((creation_order[id], *id)))
        .collect();

    while order.len() < total {
        let chosen = if let Some(Reverse((_, id))) = frontier.pop() {
            if placed.contains(&id) {
                continue;
            }
            id
        } else {
            // Frontier is empty but nodes remain: a cycle. Pick the
            // remaining node with smallest current in-degree, ties by
            // creation order; every still-pending incoming edge to it
            // becomes a feedback edge once the final order positions are
            // compared (see `classify_edges`).
            remaining
                .iter()
                .filter(|(id, _)| !placed.contains(id))
                .min_by_key(|(id, &d)| (d, creation_order[id]))
                .map(|(id, _)| *id)
                .expect("remaining nodes exist while order is incomplete")
        };

        order.push(chosen);
        placed.insert(chosen);
        remaining.remove(&chosen);
        if let Some(succs) = successors.get(&chosen) {
            for succ in succs {
                if placed.contains(succ) {
                    continue;
                }
                if let Some(d) = remaining.get_mut(succ) {
                    if *d > 0 {
                        *d -= 1;
                    }
                    if *d == 0 {
                        frontier.push(Reverse((creation_order[succ], *succ)));
                    }
                }
            }
        }
    }

    order
}

fn edge_class(positions: &HashMap<InstanceId, usize>, c: &Connection) -> EdgeClass {
    if positions[&c.source] < positions[&c.target] {
        EdgeClass::Feedforward
    } else {
        EdgeClass::Feedback
    }
}

/// Classifies every connection against a computed order (spec §4.4): a
/// feedforward edge has its source earlier than its target; a feedback
/// edge has its source later than or equal to its target.
pub fn classify_edges(order: &[InstanceId], connections: &[Connection]) -> Vec<EdgeClass> {
    let positions: HashMap<InstanceId, usize> =
        order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    connections.iter().map(|c| edge_class(&positions, c)).collect()
}

/// Runs one full evaluation of the graph: computes the order, gathers each
/// node's input signals per the feedforward/feedback handoff rule,
/// invokes `process`, harvests outputs and displays, and finally advances
/// the signal store's tick generation. Used both for ordinary ticks and
/// for the single-tick "probe" run on topology change while stopped
/// (spec §4.4) — the two are the same machinery run once.
pub fn run_tick(registry: &mut Registry) -> Result<()> {
    let order = build_order(registry);
    let positions: HashMap<InstanceId, usize> =
        order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let connections = registry.connections().to_vec();

    for node_id in &order {
        let mut inputs: HashMap<String, Value> = HashMap::new();
        for c in &connections {
            if c.target != *node_id {
                continue;
            }
            let value = match edge_class(&positions, c) {
                EdgeClass::Feedforward => registry.signals().read_current(c.source, &c.source_key),
                EdgeClass::Feedback => registry.signals().read_previous(c.source, &c.source_key),
            };
            // `Value::clone()` deep-copies any contained array, satisfying
            // the no-aliased-mutation rule (spec §4.4, §5).
            inputs.insert(c.target_key.clone(), value);
        }

        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut displays: HashMap<String, Value> = HashMap::new();

        let outcome = {
            let instance = registry
                .instance_mut(*node_id)
                .expect("instance scheduled from the registry it was read from");
            let mut ctx = NodeContext::new(&mut instance.cells, &inputs, &mut outputs, &mut displays);
            instance.node.process(&mut ctx)
        };

        match outcome {
            Ok(()) => {
                if let Some(instance) = registry.instance_mut(*node_id) {
                    instance.error = None;
                    instance.displays.extend(displays);
                }
                for (key, value) in outputs {
                    registry.signals_mut().write_current(*node_id, &key, value);
                }
            }
            Err(e) => {
                let type_name = registry
                    .instance(*node_id)
                    .map(|i| i.type_name.clone())
                    .unwrap_or_else(|| TypeName("unknown".into()));
                if let Some(instance) = registry.instance_mut(*node_id) {
                    instance.error = Some(e.to_string());
                }
                return Err(MiniCortexError::NodeRuntime {
                    instance: *node_id,
                    type_name,
                    message: e.to_string(),
                });
            }
        }
    }

    registry.signals_mut().advance_tick();
    Ok(())
}
