//! Engine: the context object every VM is created from.
//!
//! An [`Engine`] bundles the VM configuration, the host [`Hooks`], the VM
//! registry and the module resolver broker. It is `Send + Sync`; share it
//! with `Arc` and create VMs on whichever threads run them.
//!
//! The script engine itself also has process-wide state: [`init`] prepares
//! it once, [`dispose`] tears it down for good, and [`version`] names it.
//!
//! # Example
//!
//! ```no_run
//! use otter_bridge::{Engine, HostMap, Status};
//!
//! let engine = Engine::builder()
//!     .on_send(|addr, id, value| {
//!         println!("{addr}#{id}: {:?}", value);
//!         0
//!     })
//!     .build()
//!     .unwrap();
//!
//! let mut vm = engine.create_vm().unwrap();
//! vm.load_script("main", "function onMessage(s, m) { host.send(m[0]) }");
//!
//! let mut payload = HostMap::new();
//! payload.insert(0u8, "ping");
//! assert_eq!(vm.dispatch_message(1, &payload), Status::Success);
//! vm.dispose();
//! ```

use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::holt::{Holt, Paw};
use crate::hooks::Hooks;
use crate::resolver::ResolverBroker;
use crate::value::HostValue;
use crate::vm::{SourceInfo, Vm, VmShared};

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const TORN_DOWN: u8 = 2;

static ENGINE_STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);
static INIT: Once = Once::new();

/// Prepare the script engine for use. Idempotent; [`Engine::create_vm`]
/// calls it implicitly.
pub fn init() {
    INIT.call_once(|| {
        if ENGINE_STATE
            .compare_exchange(UNINITIALIZED, READY, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(version = version(), "Script engine initialized");
        }
    });
}

/// Tear the script engine down for the rest of the process.
///
/// Existing VMs keep working until disposed; creating new ones fails with
/// [`BridgeError::EngineDisposed`]. Not reversible.
pub fn dispose() {
    if ENGINE_STATE.swap(TORN_DOWN, Ordering::SeqCst) != TORN_DOWN {
        debug!("Script engine torn down");
    }
}

/// Bridge and engine identification.
pub fn version() -> &'static str {
    concat!("otter-bridge/", env!("CARGO_PKG_VERSION"), " (QuickJS)")
}

pub fn is_initialized() -> bool {
    ENGINE_STATE.load(Ordering::SeqCst) == READY
}

fn ensure_ready() -> BridgeResult<()> {
    init();
    match ENGINE_STATE.load(Ordering::SeqCst) {
        READY => Ok(()),
        _ => Err(BridgeError::EngineDisposed),
    }
}

/// Statistics about engine operation
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Total number of VMs created
    pub vms_created: AtomicU64,
    /// Total number of VMs disposed (explicitly or on drop)
    pub vms_disposed: AtomicU64,
    /// Dispatches that reached a live VM
    pub dispatches: AtomicU64,
    /// Dispatches that did not return success
    pub dispatch_failures: AtomicU64,
    /// Module loads that completed
    pub modules_loaded: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            vms_created: self.vms_created.load(Ordering::Relaxed),
            vms_disposed: self.vms_disposed.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            modules_loaded: self.modules_loaded.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of engine statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub vms_created: u64,
    pub vms_disposed: u64,
    pub dispatches: u64,
    pub dispatch_failures: u64,
    pub modules_loaded: u64,
}

impl EngineStatsSnapshot {
    /// VMs created and not yet disposed
    pub fn live_vms(&self) -> u64 {
        self.vms_created.saturating_sub(self.vms_disposed)
    }

    /// Get the dispatch success rate as a percentage (0.0 - 100.0)
    pub fn success_rate(&self) -> f64 {
        if self.dispatches == 0 {
            100.0
        } else {
            let succeeded = self.dispatches.saturating_sub(self.dispatch_failures);
            (succeeded as f64 / self.dispatches as f64) * 100.0
        }
    }
}

/// Builder for creating an Engine with custom configuration
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: BridgeConfig,
    hooks: Hooks,
}

impl EngineBuilder {
    /// Set the configuration every VM is created with
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace all hooks at once
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_send(mut self, hook: impl Fn(&str, u64, HostValue) -> i32 + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.on_send(hook);
        self
    }

    pub fn on_send_to(mut self, hook: impl Fn(HostValue) -> i32 + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.on_send_to(hook);
        self
    }

    pub fn on_output(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.on_output(hook);
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> BridgeResult<Engine> {
        self.config.validate()?;
        Ok(Engine {
            config: self.config,
            hooks: self.hooks,
            vms: Arc::new(Holt::new()),
            broker: Arc::new(ResolverBroker::new()),
            stats: Arc::new(EngineStats::new()),
        })
    }
}

/// Factory and registry for [`Vm`]s sharing one configuration and one set of
/// hooks.
#[derive(Debug)]
pub struct Engine {
    pub(crate) config: BridgeConfig,
    pub(crate) hooks: Hooks,
    pub(crate) vms: Arc<Holt<VmShared>>,
    pub(crate) broker: Arc<ResolverBroker>,
    pub(crate) stats: Arc<EngineStats>,
}

impl Engine {
    /// Create an engine with default configuration and no hooks
    pub fn new() -> BridgeResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Create a new VM. The returned VM is bound to the calling thread.
    pub fn create_vm(&self) -> BridgeResult<Vm> {
        ensure_ready()?;
        Vm::create(self)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of VMs currently registered
    pub fn live_vms(&self) -> usize {
        self.vms.len()
    }

    /// Number of module resolvers registered by loads in flight
    pub fn pending_resolvers(&self) -> usize {
        self.broker.pending()
    }

    /// Source metadata of the VM registered under `key`, if it is still live.
    pub fn source_of(&self, key: u64) -> Option<SourceInfo> {
        self.vms
            .try_catch(Paw::from_bits(key))
            .map(|shared| shared.source())
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(version().starts_with("otter-bridge/"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(is_initialized());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Engine::builder()
            .config(BridgeConfig::new().max_decode_depth(0))
            .build();
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_snapshot_rates() {
        let stats = EngineStats::new();
        assert_eq!(stats.snapshot().success_rate(), 100.0);

        stats.dispatches.fetch_add(4, Ordering::Relaxed);
        stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        stats.vms_created.fetch_add(3, Ordering::Relaxed);
        stats.vms_disposed.fetch_add(1, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.success_rate(), 75.0);
        assert_eq!(snapshot.live_vms(), 2);
    }

    #[test]
    fn test_source_of_unknown_key() {
        let engine = Engine::new().unwrap();
        assert!(engine.source_of(12345).is_none());
        assert_eq!(engine.live_vms(), 0);
    }
}
