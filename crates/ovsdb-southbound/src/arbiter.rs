//! Arbitration between redundant passive connections of one device.
//!
//! A device that reconnects before the controller notices its previous
//! session is dead shows up with several live connections. A new
//! connection is parked until every connection accepted before it has
//! gone away, either through an explicit disconnect or a failed liveness
//! probe. Each predecessor is probed by one loop, however many candidates
//! wait on it.
//!
//! Liveness is tracked only while a connection is probed. Closed
//! connections are remembered in a bounded list of recently dead ids.

use crate::config::ArbiterConfig;
use crate::device::NodeId;
use crate::error::{Result, SouthboundError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A device-initiated connection.
#[async_trait]
pub trait PassiveConnection: Send + Sync + 'static {
    /// Unique identifier of this connection.
    fn id(&self) -> u64;

    /// Device the connection claims to belong to.
    fn device(&self) -> &NodeId;

    /// Sends a protocol echo and waits for the reply.
    async fn echo(&self) -> Result<()>;

    /// Closes the connection.
    fn disconnect(&self);

    /// Returns false once the connection is closed.
    fn is_active(&self) -> bool;
}

/// Liveness of a probed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Liveness {
    /// Not probed yet, or no answer so far
    Unknown,
    /// The last probe was answered
    Alive,
    /// A probe failed or timed out
    Dead,
}

/// Diagnostic view of a parked connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingClient {
    /// The parked connection
    pub connection: u64,
    /// Device it belongs to
    pub device: NodeId,
    /// Arrival sequence number
    pub accepted_order: u64,
    /// Connections it still waits for
    pub predecessors: Vec<u64>,
}

type ActivationCallback<C> = Arc<dyn Fn(Arc<C>) + Send + Sync>;

/// Closed connection ids remembered for [`ConnectionArbiter::liveness`].
const RECENTLY_DEAD_CAPACITY: usize = 1024;

struct Probe {
    generation: u64,
    token: CancellationToken,
}

struct Candidate<C> {
    connection: Arc<C>,
    predecessors: BTreeSet<u64>,
    accepted_order: u64,
}

struct ArbiterInner<C: PassiveConnection> {
    config: ArbiterConfig,
    pending: DashMap<u64, Candidate<C>>,
    probes: DashMap<u64, Probe>,
    liveness: DashMap<u64, Liveness>,
    recently_dead: Mutex<VecDeque<u64>>,
    next_order: AtomicU64,
    next_probe: AtomicU64,
    on_activate: ActivationCallback<C>,
}

impl<C: PassiveConnection> Drop for ArbiterInner<C> {
    fn drop(&mut self) {
        for probe in self.probes.iter() {
            probe.token.cancel();
        }
    }
}

/// Elects one serving connection per device among passive reconnects.
pub struct ConnectionArbiter<C: PassiveConnection> {
    inner: Arc<ArbiterInner<C>>,
}

impl<C: PassiveConnection> Clone for ConnectionArbiter<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PassiveConnection> ConnectionArbiter<C> {
    /// Creates an arbiter that calls `on_activate` once for every
    /// connection allowed to serve its device.
    pub fn new<F>(config: ArbiterConfig, on_activate: F) -> Self
    where
        F: Fn(Arc<C>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ArbiterInner {
                config,
                pending: DashMap::new(),
                probes: DashMap::new(),
                liveness: DashMap::new(),
                recently_dead: Mutex::new(VecDeque::new()),
                next_order: AtomicU64::new(0),
                next_probe: AtomicU64::new(0),
                on_activate: Arc::new(on_activate),
            }),
        }
    }

    /// Registers `candidate` after every connection in `predecessors`.
    ///
    /// Predecessors that are already closed or known dead are ignored. If
    /// none remains, the candidate is activated right away; otherwise it
    /// is parked and each predecessor is probed until it goes away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_new_passive_connection(&self, candidate: Arc<C>, predecessors: Vec<Arc<C>>) {
        let live: Vec<Arc<C>> = predecessors
            .into_iter()
            .filter(|p| p.id() != candidate.id())
            .filter(|p| p.is_active() && self.liveness(p.id()) != Liveness::Dead)
            .collect();

        if live.is_empty() {
            self.activate(candidate);
            return;
        }

        let id = candidate.id();
        let accepted_order = self.inner.next_order.fetch_add(1, Ordering::Relaxed);
        info!(
            device = %candidate.device(),
            connection = id,
            predecessors = live.len(),
            "Passive connection parked behind earlier connections"
        );
        self.inner.pending.insert(
            id,
            Candidate {
                connection: candidate,
                predecessors: live.iter().map(|p| p.id()).collect(),
                accepted_order,
            },
        );

        for predecessor in &live {
            self.ensure_probe(Arc::clone(predecessor));
        }
        // A predecessor may have closed while the candidate was registered.
        for predecessor in &live {
            if !predecessor.is_active() {
                self.remove_connection(predecessor.id());
            }
        }
    }

    /// Records that `connection` went away.
    ///
    /// A parked connection is dropped without activation. Candidates
    /// waiting only on this connection are activated.
    pub fn client_disconnected(&self, connection: &C) {
        debug!(device = %connection.device(), connection = connection.id(), "Connection closed");
        self.remove_connection(connection.id());
    }

    /// Parked connections with the predecessors they still wait for, in
    /// arrival order.
    pub fn pending_clients(&self) -> Vec<PendingClient> {
        let mut clients: Vec<PendingClient> = self
            .inner
            .pending
            .iter()
            .map(|entry| PendingClient {
                connection: *entry.key(),
                device: entry.connection.device().clone(),
                accepted_order: entry.accepted_order,
                predecessors: entry.predecessors.iter().copied().collect(),
            })
            .collect();
        clients.sort_by_key(|client| client.accepted_order);
        clients
    }

    /// Last known liveness of `connection`.
    pub fn liveness(&self, connection: u64) -> Liveness {
        if let Some(state) = self.inner.liveness.get(&connection) {
            return *state;
        }
        if self.inner.recently_dead.lock().contains(&connection) {
            Liveness::Dead
        } else {
            Liveness::Unknown
        }
    }

    /// Number of running probe loops.
    pub fn active_probes(&self) -> usize {
        self.inner.probes.len()
    }

    /// Stops every probe. Parked connections stay parked.
    pub fn shutdown(&self) {
        for probe in self.inner.probes.iter() {
            probe.token.cancel();
        }
        self.inner.probes.clear();
    }

    fn activate(&self, connection: Arc<C>) {
        info!(
            device = %connection.device(),
            connection = connection.id(),
            "Passive connection activated"
        );
        (self.inner.on_activate)(connection);
    }

    fn remove_connection(&self, id: u64) {
        self.inner.pending.remove(&id);
        if let Some((_, probe)) = self.inner.probes.remove(&id) {
            probe.token.cancel();
        }
        self.inner.liveness.remove(&id);
        self.record_dead(id);

        let waiting: Vec<u64> = self
            .inner
            .pending
            .iter()
            .filter(|entry| entry.predecessors.contains(&id))
            .map(|entry| *entry.key())
            .collect();

        for candidate in waiting {
            if let Some(mut entry) = self.inner.pending.get_mut(&candidate) {
                entry.predecessors.remove(&id);
            }
            // remove_if is atomic per key, so two concurrent removals of the
            // last predecessors activate the candidate only once.
            if let Some((_, ready)) = self
                .inner
                .pending
                .remove_if(&candidate, |_, c| c.predecessors.is_empty())
            {
                self.activate(ready.connection);
            }
        }
    }

    fn record_dead(&self, id: u64) {
        let mut dead = self.inner.recently_dead.lock();
        if dead.contains(&id) {
            return;
        }
        if dead.len() == RECENTLY_DEAD_CAPACITY {
            dead.pop_front();
        }
        dead.push_back(id);
    }

    fn has_waiters(&self, predecessor: u64) -> bool {
        self.inner
            .pending
            .iter()
            .any(|entry| entry.predecessors.contains(&predecessor))
    }

    fn ensure_probe(&self, predecessor: Arc<C>) {
        let id = predecessor.id();
        let (generation, token) = match self.inner.probes.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let generation = self.inner.next_probe.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                // Created under the probe slot lock so an idle probe that is
                // stopping cannot remove it.
                self.inner.liveness.entry(id).or_insert(Liveness::Unknown);
                slot.insert(Probe {
                    generation,
                    token: token.clone(),
                });
                (generation, token)
            }
        };
        tokio::spawn(run_probe(
            Arc::downgrade(&self.inner),
            predecessor,
            generation,
            token,
        ));
    }
}

async fn run_probe<C: PassiveConnection>(
    weak: Weak<ArbiterInner<C>>,
    connection: Arc<C>,
    generation: u64,
    token: CancellationToken,
) {
    let id = connection.id();
    loop {
        let Some(inner) = weak.upgrade() else { return };
        let arbiter = ConnectionArbiter { inner };
        // Checked and removed under the slot lock, so a candidate parked
        // concurrently either keeps this probe or starts a new one.
        let stopped = arbiter
            .inner
            .probes
            .remove_if(&id, |_, probe| {
                let idle = probe.generation == generation && !arbiter.has_waiters(id);
                if idle {
                    arbiter.inner.liveness.remove(&id);
                }
                idle
            })
            .is_some();
        if stopped {
            debug!(connection = id, "No connection waits on this one, probe stopped");
            return;
        }
        if token.is_cancelled() {
            return;
        }

        let echo_timeout = arbiter.inner.config.echo_timeout();
        let probe_interval = arbiter.inner.config.probe_interval();
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            answered = tokio::time::timeout(echo_timeout, connection.echo()) => match answered {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SouthboundError::ProbeFailed {
                    connection: id,
                    message: e.to_string(),
                }),
                Err(_) => Err(SouthboundError::ProbeTimeout {
                    connection: id,
                    timeout_ms: echo_timeout.as_millis() as u64,
                }),
            },
        };

        match outcome {
            Ok(()) => {
                if let Some(mut state) = arbiter.inner.liveness.get_mut(&id) {
                    *state = Liveness::Alive;
                }
                drop(arbiter);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(probe_interval) => {}
                }
            }
            Err(e) => {
                warn!(
                    device = %connection.device(),
                    connection = id,
                    error = %e,
                    "Liveness probe failed, treating connection as gone"
                );
                connection.disconnect();
                arbiter.remove_connection(id);
                return;
            }
        }
    }
}
