// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generational arena of nodes.
//!
//! A [`NodeHandle`] is an index plus the generation of the slot when the node was inserted.
//! Removing a node bumps the generation, so an old handle resolves to `None` even after the slot
//! is reused.

use super::node::Node;

/// Stable reference to a node inside one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Live handles in insertion order.
    order: Vec<NodeHandle>,
}

impl NodeArena {
    pub(crate) fn insert(&mut self, node: Node) -> NodeHandle {
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.order.push(handle);
        handle
    }

    pub(crate) fn remove(&mut self, handle: NodeHandle) -> Option<Node> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.order.retain(|h| *h != handle);
        Some(node)
    }

    pub(crate) fn get(&self, handle: NodeHandle) -> Option<&Node> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Live nodes in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.order
            .iter()
            .filter_map(move |h| self.get(*h).map(|node| (*h, node)))
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
