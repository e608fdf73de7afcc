//! The nodes of the network and their distribution over virtual processes.
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use derivative::Derivative;

use crate::error::NestError;
use crate::node::{Gid, Node, MAX_GID};

/// A node shared between the network, the registry, and the connections targeting it.
/// Only the owning thread locks it during a simulation, so the lock is never contended.
pub type NodeHandle = Arc<Mutex<Box<dyn Node>>>;

/// Lock a node handle, reporting a poisoned lock as an error.
pub fn lock_node(handle: &NodeHandle) -> Result<MutexGuard<'_, Box<dyn Node>>, NestError> {
    handle
        .lock()
        .map_err(|_| NestError::InvalidState("a node was poisoned by an earlier panic".to_string()))
}

/// The assignment of nodes to ranks and threads.
///
/// Node `gid` runs on virtual process `gid mod (threads * ranks)`; virtual
/// process `vp` lives on rank `vp mod ranks`, thread `vp / ranks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpLayout {
    num_threads: usize,
    num_ranks: usize,
    rank: usize,
}

impl VpLayout {
    pub fn build(num_threads: usize, num_ranks: usize, rank: usize) -> Result<Self, NestError> {
        if num_threads == 0 || num_ranks == 0 || rank >= num_ranks {
            return Err(NestError::InvalidParameter(format!(
                "invalid layout: {} threads, {} ranks, rank {}",
                num_threads, num_ranks, rank
            )));
        }
        Ok(VpLayout {
            num_threads,
            num_ranks,
            rank,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_vps(&self) -> usize {
        self.num_threads * self.num_ranks
    }

    pub fn vp_of(&self, gid: Gid) -> usize {
        gid as usize % self.num_vps()
    }

    pub fn rank_of_vp(&self, vp: usize) -> usize {
        vp % self.num_ranks
    }

    pub fn thread_of_vp(&self, vp: usize) -> usize {
        vp / self.num_ranks
    }

    /// The virtual process run by a local thread.
    pub fn vp_of_thread(&self, thread: usize) -> usize {
        thread * self.num_ranks + self.rank
    }

    pub fn is_local(&self, gid: Gid) -> bool {
        self.rank_of_vp(self.vp_of(gid)) == self.rank
    }

    pub fn thread_of(&self, gid: Gid) -> usize {
        self.thread_of_vp(self.vp_of(gid))
    }
}

/// A node instantiated on this rank.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct LocalNode {
    pub gid: Gid,
    pub thread: usize,
    #[derivative(Debug = "ignore")]
    pub handle: NodeHandle,
}

/// All nodes of the network. Nodes owned by other ranks are counted but not instantiated.
#[derive(Debug, Clone)]
pub struct Network {
    layout: VpLayout,
    size: usize,
    local: Vec<LocalNode>,
}

impl Network {
    pub fn new(layout: VpLayout) -> Self {
        Network {
            layout,
            size: 0,
            local: Vec::new(),
        }
    }

    pub fn layout(&self) -> VpLayout {
        self.layout
    }

    /// The number of nodes on all ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of nodes instantiated on this rank.
    pub fn num_local(&self) -> usize {
        self.local.len()
    }

    /// Add `n` nodes with consecutive identifiers, instantiating the local ones with `factory`.
    /// Every rank must add the same nodes in the same order. On error no node is added.
    pub fn add_nodes<F>(&mut self, n: usize, mut factory: F) -> Result<Range<Gid>, NestError>
    where
        F: FnMut(Gid) -> Result<Box<dyn Node>, NestError>,
    {
        let first = self.size + 1;
        let end = first + n;
        if end - 1 > MAX_GID as usize {
            return Err(NestError::InvalidParameter(format!(
                "cannot create {} nodes: identifiers would exceed {}",
                n, MAX_GID
            )));
        }

        let mut created = Vec::new();
        for gid in first as Gid..end as Gid {
            if !self.layout.is_local(gid) {
                continue;
            }
            let node = factory(gid)?;
            if node.gid() != gid {
                return Err(NestError::InvalidParameter(format!(
                    "factory built node {} for identifier {}",
                    node.gid(),
                    gid
                )));
            }
            created.push(LocalNode {
                gid,
                thread: self.layout.thread_of(gid),
                handle: Arc::new(Mutex::new(node)),
            });
        }
        self.local.extend(created);
        self.size = end - 1;
        log::debug!(
            "Created nodes {}..{} ({} local out of {})",
            first,
            end,
            self.local.len(),
            self.size
        );
        Ok(first as Gid..end as Gid)
    }

    pub fn contains(&self, gid: Gid) -> bool {
        gid >= 1 && (gid as usize) <= self.size
    }

    /// The local node with the given identifier, if any.
    pub fn get(&self, gid: Gid) -> Option<&LocalNode> {
        self.local
            .binary_search_by_key(&gid, |node| node.gid)
            .ok()
            .map(|index| &self.local[index])
    }

    /// Local nodes in ascending identifier order.
    pub fn iter_local(&self) -> impl Iterator<Item = &LocalNode> + '_ {
        self.local.iter()
    }
}
