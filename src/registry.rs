//! Flattened per-thread views of the updatable local nodes.
use std::sync::{Arc, Mutex};

use derivative::Derivative;

use crate::error::NestError;
use crate::network::{lock_node, Network, NodeHandle};
use crate::node::Gid;

/// A node as seen by its updating thread.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct NodeEntry {
    pub gid: Gid,
    /// Position of the node in its thread slice.
    pub local_index: usize,
    #[derivative(Debug = "ignore")]
    pub handle: NodeHandle,
}

/// An immutable snapshot of the per-thread node slices.
#[derive(Debug)]
pub struct RegistrySnapshot {
    network_size: usize,
    slices: Vec<Vec<NodeEntry>>,
}

impl RegistrySnapshot {
    /// The network size the snapshot was built for.
    pub fn network_size(&self) -> usize {
        self.network_size
    }

    /// The updatable nodes of thread `t`, in ascending identifier order.
    pub fn thread_slice(&self, thread: usize) -> &[NodeEntry] {
        &self.slices[thread]
    }

    pub fn slices(&self) -> &[Vec<NodeEntry>] {
        &self.slices
    }

    pub fn num_nodes(&self) -> usize {
        self.slices.iter().map(|slice| slice.len()).sum()
    }
}

/// Caches a [`RegistrySnapshot`] and rebuilds it when the network has grown.
///
/// Rebuilds are serialized by a mutex; callers keep an `Arc` to the snapshot
/// and read it without further locking.
#[derive(Debug)]
pub struct NodeRegistry {
    num_threads: usize,
    cache: Mutex<Option<Arc<RegistrySnapshot>>>,
}

impl NodeRegistry {
    pub fn new(num_threads: usize) -> Self {
        NodeRegistry {
            num_threads,
            cache: Mutex::new(None),
        }
    }

    /// The current snapshot, rebuilt first if the network size changed.
    pub fn snapshot(&self, network: &Network) -> Result<Arc<RegistrySnapshot>, NestError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| NestError::InvalidState("the node registry was poisoned".to_string()))?;
        match cache.as_ref() {
            Some(snapshot) if snapshot.network_size == network.size() => Ok(Arc::clone(snapshot)),
            _ => {
                let snapshot = Arc::new(self.build(network)?);
                *cache = Some(Arc::clone(&snapshot));
                Ok(snapshot)
            }
        }
    }

    /// Drop the cached snapshot; the next call to [`NodeRegistry::snapshot`] rebuilds it.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    fn build(&self, network: &Network) -> Result<RegistrySnapshot, NestError> {
        let mut slices: Vec<Vec<NodeEntry>> = vec![Vec::new(); self.num_threads];
        for node in network.iter_local() {
            if lock_node(&node.handle)?.children().is_some() {
                continue;
            }
            let slice = &mut slices[node.thread];
            slice.push(NodeEntry {
                gid: node.gid,
                local_index: slice.len(),
                handle: Arc::clone(&node.handle),
            });
        }
        log::debug!(
            "Node registry rebuilt for {} nodes ({} updatable here)",
            network.size(),
            slices.iter().map(|slice| slice.len()).sum::<usize>()
        );
        Ok(RegistrySnapshot {
            network_size: network.size(),
            slices,
        })
    }
}
