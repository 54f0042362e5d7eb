//! Pool of long-lived sandboxes.
//!
//! Sandboxes are created up front and handed out one lease at a time
//! through a bounded channel; a mutex-guarded tracking map records which
//! sandboxes exist and how long a lease has been held. A background reaper
//! removes dead sandboxes, reclaims leases stuck past the idle threshold,
//! and sweeps orphan containers left behind by a previous process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::sandbox::{SandboxDriver, SCRATCH_DIR};

/// How often the reaper wakes up.
const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// A lease held longer than this is considered stuck and reclaimed.
const STUCK_LEASE_THRESHOLD: Duration = Duration::from_secs(300);

/// Errors a caller can get from [`SandboxPool::lease`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timeout waiting for an available sandbox")]
    LeaseTimeout,
    #[error("sandbox pool is shut down")]
    Closed,
    #[error("failed to construct replacement sandbox: {0}")]
    Construction(#[source] anyhow::Error),
}

/// Exclusive use of one sandbox between `lease` and `release`.
#[derive(Debug)]
pub struct SandboxHandle {
    id: String,
}

impl SandboxHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug)]
struct Tracked {
    leased_since: Option<Instant>,
}

/// Pool of reusable sandboxes.
pub struct SandboxPool {
    driver: Arc<dyn SandboxDriver>,
    image: String,
    size: usize,
    available_tx: mpsc::Sender<String>,
    available_rx: Mutex<mpsc::Receiver<String>>,
    tracked: Mutex<HashMap<String, Tracked>>,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SandboxPool {
    /// Create the pool and pre-build `size` sandboxes.
    ///
    /// Individual construction failures shrink the pool; only a pool with
    /// zero sandboxes is a startup error.
    pub async fn new(
        driver: Arc<dyn SandboxDriver>,
        image: impl Into<String>,
        size: usize,
    ) -> anyhow::Result<Self> {
        let image = image.into();
        let (available_tx, available_rx) = mpsc::channel(size);
        let pool = Self {
            driver,
            image,
            size,
            available_tx,
            available_rx: Mutex::new(available_rx),
            tracked: Mutex::new(HashMap::new()),
            reaper: std::sync::Mutex::new(None),
        };

        info!("Creating {} sandboxes for pool...", size);
        for i in 0..size {
            match pool.create_tracked().await {
                Ok(id) => {
                    // Channel capacity equals `size`, so this cannot fail here.
                    let _ = pool.available_tx.send(id.clone()).await;
                    info!("Created sandbox {}/{}: {}", i + 1, size, short(&id));
                }
                Err(e) => {
                    warn!("Failed to create sandbox {}/{}: {:#}", i + 1, size, e);
                }
            }
        }

        if pool.tracked.lock().await.is_empty() {
            anyhow::bail!("failed to create any sandboxes");
        }

        Ok(pool)
    }

    /// Start the background reaper. Idempotent per pool instance.
    pub fn start_reaper(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup does not
            // race the initial sandbox creation.
            tick.tick().await;
            loop {
                tick.tick().await;
                pool.reap().await;
            }
        });
        *self.reaper.lock().unwrap() = Some(handle);
    }

    /// Draw a sandbox, waiting at most `deadline` for one to be available.
    ///
    /// The sandbox is verified responsive before being handed out; a dead
    /// one is destroyed and replaced synchronously, without the replacement
    /// work counting against the caller's deadline again.
    pub async fn lease(&self, deadline: Duration) -> Result<SandboxHandle, PoolError> {
        let id = {
            let mut rx = self.available_rx.lock().await;
            match tokio::time::timeout(deadline, rx.recv()).await {
                Ok(Some(id)) => id,
                Ok(None) => return Err(PoolError::Closed),
                Err(_) => return Err(PoolError::LeaseTimeout),
            }
        };

        let id = match self.driver.inspect_running(&id).await {
            Ok(true) => id,
            _ => {
                warn!("Sandbox {} not running, creating replacement", short(&id));
                self.discard(&id).await;
                self.create_tracked()
                    .await
                    .map_err(PoolError::Construction)?
            }
        };

        if let Some(entry) = self.tracked.lock().await.get_mut(&id) {
            entry.leased_since = Some(Instant::now());
        }

        debug!("Leased sandbox {}", short(&id));
        Ok(SandboxHandle { id })
    }

    /// Return a sandbox to the pool after wiping its scratch directory.
    ///
    /// If the available set is already full (a replacement raced with
    /// returns), the surplus handle is destroyed instead of kept.
    pub async fn release(&self, handle: SandboxHandle) {
        let id = handle.id;

        let wipe = format!(
            "rm -rf {dir} && mkdir -p {dir} && chmod 777 {dir}",
            dir = SCRATCH_DIR
        );
        if let Err(e) = self
            .driver
            .exec(&id, &["sh".into(), "-c".into(), wipe], "/")
            .await
        {
            warn!("Failed to clean sandbox {}: {:#}", short(&id), e);
        }

        if let Some(entry) = self.tracked.lock().await.get_mut(&id) {
            entry.leased_since = None;
        }

        if let Err(mpsc::error::TrySendError::Full(id)) = self.available_tx.try_send(id) {
            warn!("Pool full, discarding surplus sandbox {}", short(&id));
            self.discard(&id).await;
        }
    }

    /// Total tracked sandboxes.
    pub async fn size(&self) -> usize {
        self.tracked.lock().await.len()
    }

    /// Sandboxes currently available for lease.
    pub fn available(&self) -> usize {
        self.size - self.available_tx.capacity().min(self.size)
    }

    /// Stop the reaper and destroy every tracked sandbox.
    ///
    /// Individual failures are logged and ignored; shutdown always runs to
    /// completion.
    pub async fn shutdown(&self) {
        info!("Shutting down sandbox pool...");

        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        }

        {
            let mut rx = self.available_rx.lock().await;
            while rx.try_recv().is_ok() {}
        }

        let ids: Vec<String> = self.tracked.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.driver.destroy(&id).await {
                warn!("Failed to destroy sandbox {} on shutdown: {:#}", short(&id), e);
            }
        }
        self.tracked.lock().await.clear();

        info!("Sandbox pool shutdown complete");
    }

    /// One reaper pass: drop dead sandboxes, reclaim stuck leases, and
    /// remove orphan containers the pool no longer tracks.
    async fn reap(&self) {
        let snapshot: Vec<(String, Option<Instant>)> = {
            let tracked = self.tracked.lock().await;
            tracked
                .iter()
                .map(|(id, t)| (id.clone(), t.leased_since))
                .collect()
        };

        for (id, leased_since) in snapshot {
            let running = self.driver.inspect_running(&id).await.unwrap_or(false);
            if !running {
                info!("Reaper: sandbox {} has exited, removing", short(&id));
                self.discard(&id).await;
                continue;
            }
            if let Some(since) = leased_since {
                if since.elapsed() > STUCK_LEASE_THRESHOLD {
                    warn!(
                        "Reaper: sandbox {} leased for {:?}, reclaiming",
                        short(&id),
                        since.elapsed()
                    );
                    self.discard(&id).await;
                }
            }
        }

        match self.driver.list_labeled().await {
            Ok(labeled) => {
                let tracked = self.tracked.lock().await;
                let orphans: Vec<String> = labeled
                    .into_iter()
                    .filter(|id| !tracked.contains_key(id))
                    .collect();
                drop(tracked);
                for id in orphans {
                    info!("Reaper: removing orphan sandbox {}", short(&id));
                    if let Err(e) = self.driver.destroy(&id).await {
                        warn!("Failed to remove orphan {}: {:#}", short(&id), e);
                    }
                }
            }
            Err(e) => error!("Reaper: failed to enumerate sandboxes: {:#}", e),
        }
    }

    async fn create_tracked(&self) -> anyhow::Result<String> {
        let id = self.driver.create(&self.image).await?;
        self.tracked
            .lock()
            .await
            .insert(id.clone(), Tracked { leased_since: None });
        Ok(id)
    }

    async fn discard(&self, id: &str) {
        self.tracked.lock().await.remove(id);
        if let Err(e) = self.driver.destroy(id).await {
            warn!("Failed to destroy sandbox {}: {:#}", short(id), e);
        }
    }
}

fn short(id: &str) -> &str {
    &id[..12.min(id.len())]
}
