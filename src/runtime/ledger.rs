//! Accounting for live backend resources.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::ModelError;

#[derive(Debug, Default)]
struct Counters {
    descriptors: AtomicUsize,
    workspace_bytes: AtomicUsize,
    workspaces: AtomicUsize,
}

/// Shared counters of the descriptors and workspace bytes currently alive.
///
/// Cloning is cheap; all clones observe the same counters. Handles created
/// through the ledger decrement it when dropped, so after any number of
/// reconfigurations the counts reflect exactly what the layers still hold.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    counters: Arc<Counters>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of descriptors currently alive.
    pub fn live_descriptors(&self) -> usize {
        self.counters.descriptors.load(Ordering::SeqCst)
    }

    /// Number of workspace buffers currently reserved.
    pub fn live_workspaces(&self) -> usize {
        self.counters.workspaces.load(Ordering::SeqCst)
    }

    /// Total bytes reserved by live workspaces.
    pub fn workspace_bytes(&self) -> usize {
        self.counters.workspace_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn track<T>(&self, value: T) -> Tracked<T> {
        self.counters.descriptors.fetch_add(1, Ordering::SeqCst);
        Tracked {
            value,
            ledger: self.clone(),
        }
    }

    /// Reserves `bytes` of workspace, failing if it would exceed `limit`.
    pub(crate) fn reserve(
        &self,
        bytes: usize,
        limit: Option<usize>,
    ) -> Result<Workspace, ModelError> {
        let counters = &self.counters;
        let reserved = counters
            .workspace_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |in_use| {
                let total = in_use.checked_add(bytes)?;
                match limit {
                    Some(limit) if total > limit => None,
                    _ => Some(total),
                }
            });

        match reserved {
            Ok(_) => {
                counters.workspaces.fetch_add(1, Ordering::SeqCst);
                Ok(Workspace {
                    bytes,
                    ledger: self.clone(),
                })
            }
            Err(in_use) => Err(ModelError::ResourceExhaustion {
                requested: bytes,
                in_use,
                limit: limit.unwrap_or(usize::MAX),
            }),
        }
    }
}

/// A value whose lifetime is counted by a [`ResourceLedger`].
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    ledger: ResourceLedger,
}

impl<T> std::ops::Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.ledger
            .counters
            .descriptors
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// A reservation of scratch memory against the context's memory budget.
///
/// This only counts bytes. It holds no buffer: the Gemm convolution path
/// allocates its unfolded input through `unfold4d` on every forward pass,
/// and that allocation is what these bytes stand for.
#[derive(Debug)]
pub struct Workspace {
    bytes: usize,
    ledger: ResourceLedger,
}

impl Workspace {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let counters = &self.ledger.counters;
        counters
            .workspace_bytes
            .fetch_sub(self.bytes, Ordering::SeqCst);
        counters.workspaces.fetch_sub(1, Ordering::SeqCst);
    }
}
