//! Per-module bridge state and configuration

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::allocator::Allocator;
use crate::codec::TypeCodec;
use crate::context::HostEnv;
use crate::error::BridgeResult;
use crate::handle::HandleRegistry;
use crate::pool::WorkerPool;

/// Default constants for bridge configuration.
pub mod defaults {
    /// Worker thread name prefix; threads are named `"{prefix}-{index}"`.
    pub const DEFAULT_THREAD_NAME: &str = "tether-worker";

    /// Lower bound on the default worker count.
    pub const MIN_WORKER_THREADS: usize = 1;
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Worker threads running async function bodies
    pub worker_threads: usize,
    /// Worker thread name prefix
    pub thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(defaults::MIN_WORKER_THREADS),
            thread_name: defaults::DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

struct BridgeInner {
    handles: HandleRegistry,
    pool: OnceCell<WorkerPool>,
    allocator: Allocator,
    config: BridgeConfig,
}

/// State shared by everything one native module exports: the handle
/// registry, the worker pool (started on first async call) and the
/// injected allocator.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Bridge with default configuration
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// Bridge with explicit configuration
    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                handles: HandleRegistry::new(),
                pool: OnceCell::new(),
                allocator: Allocator::new(),
                config,
            }),
        }
    }

    /// Native resource registry
    pub fn handles(&self) -> &HandleRegistry {
        &self.inner.handles
    }

    /// Allocator injected into allocator slots
    pub fn allocator(&self) -> &Allocator {
        &self.inner.allocator
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Codec bound to `env` and this bridge's registry
    pub fn codec<'a>(&'a self, env: &'a dyn HostEnv) -> TypeCodec<'a> {
        TypeCodec::new(env, &self.inner.handles)
    }

    /// Worker pool, started on first use
    pub fn pool(&self) -> BridgeResult<&WorkerPool> {
        self.inner.pool.get_or_try_init(|| {
            WorkerPool::new(self.inner.config.worker_threads, &self.inner.config.thread_name)
        })
    }

    /// Run a job on the worker pool
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> BridgeResult<()> {
        self.pool()?.execute(job)
    }

    /// Whether the worker pool has been started
    pub fn pool_started(&self) -> bool {
        self.inner.pool.get().is_some()
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.inner.config)
            .field("handles", &self.inner.handles)
            .field("pool_started", &self.pool_started())
            .finish()
    }
}
