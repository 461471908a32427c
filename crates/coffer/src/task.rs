//! Request planning over the engine.
//!
//! A [`Task`] translates document operations into batches of shard
//! mutations with the dependencies that keep the tree consistent: a
//! document may only appear after every ancestor directory links to it,
//! and directory entries are only unlinked after the deletions that could
//! empty them. Each batch is handed to the executor and awaited; when a
//! batch loses a compare-and-swap race the whole request is replanned
//! from scratch against the reloaded shards, after a jittered backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coffer_crypto::{Cipher, Verifier};
use coffer_engine::{EngineError, Executor, OpHandle, OpId, ShardCache};
use coffer_shard::Shard;
use coffer_store::Adapter;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::error::CofferError;
use crate::path::Path;
use crate::router::Router;

const RETRY_BASE_MS: u64 = 10;
const RETRY_CAP_MS: u64 = 1000;

type UpdateFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A single request's view of the store.
///
/// Every task gets a fresh cache, so its reads see a consistent snapshot
/// taken at first access and its writes race other tasks only at the
/// adapter.
pub struct Task {
    cache: Arc<ShardCache>,
    executor: Arc<Executor>,
    router: Arc<Router>,
    unlinks: Mutex<HashMap<String, OpId>>,
}

impl Task {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        cipher: Arc<dyn Cipher>,
        verifier: Arc<Verifier>,
        router: Arc<Router>,
    ) -> Self {
        let cache = Arc::new(ShardCache::new(adapter, cipher, verifier));
        let executor = Arc::new(Executor::new(cache.clone()));
        Self {
            cache,
            executor,
            router,
            unlinks: Mutex::new(HashMap::new()),
        }
    }

    /// Read a document.
    pub async fn get(&self, path: &str) -> Result<Option<Value>, CofferError> {
        let path = parse_doc(path)?;
        let shard = self.load_shard(&path).await?;
        Ok(shard.get(path.full()).map_err(EngineError::from)?)
    }

    /// List a directory's entries, or `None` if it does not exist.
    pub async fn list(&self, path: &str) -> Result<Option<Vec<String>>, CofferError> {
        let path = parse_dir(path)?;
        self.list_path(&path).await
    }

    /// All document paths under a directory, depth-first.
    pub async fn find(&self, path: &str) -> Result<Vec<String>, CofferError> {
        let path = parse_dir(path)?;
        let mut found = Vec::new();
        self.find_into(path, &mut found).await?;
        Ok(found)
    }

    /// Create or update a document by applying `update_fn` to its current
    /// value (`Null` if absent).
    pub async fn update<F>(&self, path: &str, update_fn: F) -> Result<(), CofferError>
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let path = parse_doc(path)?;
        let update_fn: UpdateFn = Arc::new(update_fn);

        let mut attempt = 0;
        loop {
            let handles = self.plan_update(&path, &update_fn);
            match self.run_batch(handles).await {
                Err(e) if e.is_conflict() => {
                    debug!(path = %path, attempt, "update conflicted, replanning");
                    backoff(attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Delete a document, unlinking it from its directory and pruning any
    /// directories that become empty.
    pub async fn remove(&self, path: &str) -> Result<(), CofferError> {
        let path = parse_doc(path)?;

        let mut attempt = 0;
        loop {
            let (handles, planned) = self.plan_remove(&path).await?;
            let result = self.run_batch(handles).await;
            self.forget_unlinks(&planned);

            match result {
                Err(e) if e.is_conflict() => {
                    debug!(path = %path, attempt, "remove conflicted, replanning");
                    backoff(attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn plan_update(&self, path: &Path, update_fn: &UpdateFn) -> Vec<OpHandle> {
        let mut handles = Vec::new();
        let mut link_ids = Vec::new();

        for (dir, name) in path.links() {
            let key = self.router.route(dir);
            let (dir, name) = (dir.clone(), name.clone());
            let link = self.executor.submit(&key, &[], move |shard| async move {
                shard.link(&dir, &name)?;
                Ok(())
            });
            link_ids.push(link.id());
            handles.push(link);
        }

        let full = path.full().to_owned();
        let f = update_fn.clone();
        let key = self.router.route(path.full());
        let put = self
            .executor
            .submit(&key, &link_ids, move |shard| async move {
                shard.put(&full, |value| f(value))?;
                Ok(())
            });
        handles.push(put);
        handles
    }

    async fn plan_remove(
        &self,
        path: &Path,
    ) -> Result<(Vec<OpHandle>, Vec<(String, OpId)>), CofferError> {
        // Snapshot the ancestor directory listings before planning, so the
        // dependency structure reflects the state this plan is based on.
        let mut dir_states = HashMap::new();
        for dir in path.dirs() {
            dir_states.insert(dir.to_owned(), self.list_path(&Path::new(dir)).await?);
        }

        let full = path.full().to_owned();
        let key = self.router.route(&full);
        let rm = self.executor.submit(&key, &[], {
            let full = full.clone();
            move |shard| async move {
                shard.remove(&full)?;
                Ok(())
            }
        });
        let rm_id = rm.id();

        let mut handles = vec![rm];
        let mut planned = Vec::new();

        for (dir, name) in path.links().iter().rev() {
            let item = Path::new(format!("{dir}{name}"));
            let key = self.router.route(dir);

            let unlink = if item.is_doc() {
                let (dir, name) = (dir.clone(), name.clone());
                self.executor
                    .submit(&key, &[rm_id], move |shard| async move {
                        shard.unlink(&dir, &name)?;
                        Ok(())
                    })
            } else {
                // The directory may only be unlinked once every entry it
                // held has been unlinked itself. If some entry has no
                // pending unlink, another request still needs this
                // directory and pruning stops here.
                let children = dir_states
                    .get(item.full())
                    .cloned()
                    .flatten()
                    .unwrap_or_default();

                let dep_ids = {
                    let unlinks = self.unlinks.lock().expect("unlinks lock poisoned");
                    children
                        .iter()
                        .map(|child| unlinks.get(item.join(child).full()).copied())
                        .collect::<Option<Vec<OpId>>>()
                };
                let Some(dep_ids) = dep_ids else { break };

                let cache = self.cache.clone();
                let router = self.router.clone();
                let (dir, name) = (dir.clone(), name.clone());
                let item_full = item.full().to_owned();
                self.executor
                    .submit(&key, &dep_ids, move |shard| async move {
                        // Re-check emptiness at execution time; a concurrent
                        // update may have repopulated the directory.
                        let dir_shard = cache.read(&router.route(&item_full)).await?;
                        if dir_shard.list(&item_full).map_err(EngineError::from)?.is_none() {
                            shard.unlink(&dir, &name)?;
                        }
                        Ok(())
                    })
            };

            self.unlinks
                .lock()
                .expect("unlinks lock poisoned")
                .insert(item.full().to_owned(), unlink.id());
            planned.push((item.full().to_owned(), unlink.id()));
            handles.push(unlink);
        }

        Ok((handles, planned))
    }

    // Drop this batch's unlink records unless a later plan replaced them.
    fn forget_unlinks(&self, planned: &[(String, OpId)]) {
        let mut unlinks = self.unlinks.lock().expect("unlinks lock poisoned");
        for (path, id) in planned {
            if unlinks.get(path) == Some(id) {
                unlinks.remove(path);
            }
        }
    }

    async fn run_batch(&self, handles: Vec<OpHandle>) -> Result<(), CofferError> {
        self.executor.poll();
        let results = futures::future::join_all(handles.into_iter().map(OpHandle::wait)).await;

        let mut retryable = false;
        let mut hard = None;
        for result in results {
            match result {
                Ok(()) => {}
                Err(EngineError::Conflict) | Err(EngineError::Cancelled) => retryable = true,
                Err(e) => hard = hard.or(Some(e)),
            }
        }
        if let Some(e) = hard {
            return Err(e.into());
        }
        if retryable {
            return Err(EngineError::Conflict.into());
        }
        Ok(())
    }

    async fn list_path(&self, path: &Path) -> Result<Option<Vec<String>>, CofferError> {
        let shard = self.load_shard(path).await?;
        Ok(shard.list(path.full()).map_err(EngineError::from)?)
    }

    fn find_into<'a>(
        &'a self,
        path: Path,
        found: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<(), CofferError>> {
        async move {
            let Some(entries) = self.list_path(&path).await? else {
                return Ok(());
            };
            let items: Vec<Path> = entries.iter().map(|name| path.join(name)).collect();

            // Fetch subdirectory shards up front so the walk below never
            // waits on sequential round trips.
            let subdirs = items.iter().filter(|item| item.is_dir());
            try_join_all(subdirs.map(|item| self.load_shard(item))).await?;

            for item in items {
                if item.is_dir() {
                    self.find_into(item, found).await?;
                } else {
                    found.push(item.full().to_owned());
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn load_shard(&self, path: &Path) -> Result<Arc<Shard>, CofferError> {
        let key = self.router.route(path.full());
        Ok(self.cache.read(&key).await?)
    }
}

fn parse_doc(path: &str) -> Result<Path, CofferError> {
    let parsed = Path::new(path);
    if !parsed.is_valid() || !parsed.is_doc() {
        return Err(CofferError::InvalidPath(path.to_owned()));
    }
    Ok(parsed)
}

fn parse_dir(path: &str) -> Result<Path, CofferError> {
    let parsed = Path::new(path);
    if !parsed.is_valid() || !parsed.is_dir() {
        return Err(CofferError::InvalidPath(path.to_owned()));
    }
    Ok(parsed)
}

async fn backoff(attempt: u32) {
    let ceiling = RETRY_CAP_MS.min(RETRY_BASE_MS << attempt.min(7));
    let delay = rand::rng().random_range(0..=ceiling);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
