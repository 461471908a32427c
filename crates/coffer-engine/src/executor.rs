//! Drives the schedule to completion against the cache.
//!
//! Each ready group becomes one read-modify-write round trip: read the
//! group's shard through the cache, apply its mutations in insertion
//! order, write the shard back. Groups on independent shards run
//! concurrently as separate tasks; completing or failing a group re-polls
//! so newly released groups start in the same pass.

use std::sync::{Arc, Mutex};

use coffer_shard::Shard;
use coffer_types::ShardId;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::ShardCache;
use crate::error::EngineError;
use crate::schedule::{GroupId, OpId, Schedule};

/// An erased mutation, applied to the shard object during group execution.
///
/// Mutations are async because some need to consult other shards through
/// the cache before deciding what to do.
pub type Mutation =
    Box<dyn FnOnce(Arc<Shard>) -> BoxFuture<'static, Result<(), EngineError>> + Send>;

struct OpEntry {
    mutation: Mutation,
    done: oneshot::Sender<Result<(), EngineError>>,
}

/// Handle to a submitted operation: its id (for dependencies) and its
/// completion future.
pub struct OpHandle {
    id: OpId,
    rx: oneshot::Receiver<Result<(), EngineError>>,
}

impl OpHandle {
    /// The operation id, usable as a dependency of later submissions.
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Wait for the operation's group to commit or fail.
    pub async fn wait(self) -> Result<(), EngineError> {
        self.rx.await.unwrap_or(Err(EngineError::Cancelled))
    }
}

/// Executes scheduled operation groups against a [`ShardCache`].
pub struct Executor {
    cache: Arc<ShardCache>,
    schedule: Mutex<Schedule<OpEntry>>,
}

impl Executor {
    pub fn new(cache: Arc<ShardCache>) -> Self {
        Self {
            cache,
            schedule: Mutex::new(Schedule::new()),
        }
    }

    /// Schedule a mutation of a shard, after the given dependencies.
    pub fn submit<F, Fut>(&self, shard: &ShardId, deps: &[OpId], f: F) -> OpHandle
    where
        F: FnOnce(Arc<Shard>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let entry = OpEntry {
            mutation: Box::new(move |shard| f(shard).boxed()),
            done: tx,
        };

        let id = self
            .schedule
            .lock()
            .expect("schedule lock poisoned")
            .add(shard, deps, entry);
        OpHandle { id, rx }
    }

    /// Start every currently ready group. Each group runs as its own task
    /// and re-polls when it resolves, so one call drains the whole
    /// schedule.
    pub fn poll(self: &Arc<Self>) {
        loop {
            let started = {
                let mut schedule = self.schedule.lock().expect("schedule lock poisoned");
                match schedule.next_ready() {
                    Some(gid) => {
                        let (shard, entries) = schedule.start(gid);
                        let all_shards = schedule.shards();
                        Some((gid, shard, entries, all_shards))
                    }
                    None => None,
                }
            };

            let (gid, shard, entries, all_shards) = match started {
                Some(started) => started,
                None => return,
            };

            let this = self.clone();
            tokio::spawn(async move {
                this.run_group(gid, shard, entries, all_shards).await;
            });
        }
    }

    async fn run_group(
        self: Arc<Self>,
        gid: GroupId,
        shard_id: ShardId,
        entries: Vec<OpEntry>,
        all_shards: Vec<ShardId>,
    ) {
        let (mutations, senders): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .map(|entry| (entry.mutation, entry.done))
            .unzip();

        match self.execute(&shard_id, mutations, &all_shards).await {
            Ok(()) => {
                self.schedule
                    .lock()
                    .expect("schedule lock poisoned")
                    .complete(gid);
                for tx in senders {
                    let _ = tx.send(Ok(()));
                }
            }
            Err(e) => {
                debug!(group = %gid, shard = %shard_id, error = %e, "group failed");
                let downstream = self
                    .schedule
                    .lock()
                    .expect("schedule lock poisoned")
                    .fail(gid);
                for tx in senders {
                    let _ = tx.send(Err(e.clone()));
                }
                for entry in downstream {
                    let _ = entry.done.send(Err(EngineError::Cancelled));
                }
            }
        }

        self.poll();
    }

    async fn execute(
        &self,
        shard_id: &ShardId,
        mutations: Vec<Mutation>,
        all_shards: &[ShardId],
    ) -> Result<(), EngineError> {
        // Warm the cache for every shard the schedule touches before
        // applying anything, so concurrent groups never interleave a fetch
        // with a half-applied view.
        let reads = all_shards.iter().map(|id| self.cache.read(id));
        futures::future::try_join_all(reads).await?;

        let shard = self.cache.read(shard_id).await?;
        for mutation in mutations {
            mutation(shard.clone()).await?;
        }
        self.cache.write(shard_id).await
    }
}
