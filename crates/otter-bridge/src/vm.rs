//! VM sessions.
//!
//! A [`Vm`] owns one isolate (an engine runtime plus one context) and drives
//! it through a small lifecycle:
//!
//! ```text
//! Created ──(first accepted op)──▶ Active ──dispose()──▶ Disposed
//! ```
//!
//! Every operation on a disposed VM reports [`Status::Disposed`] (or
//! [`BridgeError::Disposed`]) and has no side effect. Disposing twice is a
//! programming error and panics. Dropping a VM that was never disposed logs a
//! leak warning and then releases the isolate.
//!
//! A `Vm` is bound to the thread that created it (the isolate is not
//! thread-safe). Use a [`TerminateHandle`] to interrupt it from elsewhere.
//!
//! # Script surface
//!
//! Scripts receive dispatches through global handler functions:
//!
//! | Dispatch | Handler | Arguments |
//! |----------|---------|-----------|
//! | [`Vm::dispatch_enter`] | `onEnter` | `(session, addr)` |
//! | [`Vm::dispatch_leave`] | `onLeave` | `(session, addr)` |
//! | [`Vm::dispatch_message`] | `onMessage` | `(session, payload)` |
//!
//! Sessions up to `i32::MAX` arrive as plain ints, up to 2^53 - 1 as
//! numbers, and above that as BigInts.
//!
//! Promise rejections still unhandled when an operation finishes are passed
//! to a global `onerror(message, source, lineno, colno, error)` if the script
//! defines one, and written to the output hook otherwise. Either way they are
//! recorded as the last exception but do not change the returned status.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rquickjs::{BigInt, Context, Ctx, Module, Runtime, Value};
use tracing::{debug, warn};

use crate::apis::{self, HostLink};
use crate::codec;
use crate::config::BridgeConfig;
use crate::engine::{Engine, EngineStats};
use crate::error::{BridgeError, BridgeResult};
use crate::exception::{describe_error, describe_exception};
use crate::holt::{Holt, Paw};
use crate::hooks::Hooks;
use crate::memory::{MemoryStats, runtime_memory_stats};
use crate::modules::{BrokerResolver, ModuleStore, StoreLoader};
use crate::rejection::RejectionQueue;
use crate::resolver::ResolverBroker;
use crate::status::Status;
use crate::value::{HostMap, HostValue};

/// Identifies the host session a dispatch belongs to.
pub type SessionId = u64;

/// Name of the script function receiving [`Vm::dispatch_enter`].
pub const ON_ENTER: &str = "onEnter";
/// Name of the script function receiving [`Vm::dispatch_leave`].
pub const ON_LEAVE: &str = "onLeave";
/// Name of the script function receiving [`Vm::dispatch_message`].
pub const ON_MESSAGE: &str = "onMessage";

/// Name of the script function receiving unhandled promise rejections.
pub const ON_ERROR: &str = "onerror";

const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Created,
    Active,
    Disposed,
}

/// Attribution metadata passed to the send hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub addr: String,
    pub id: u64,
}

/// The part of a VM reachable through the VM registry.
#[derive(Debug, Default)]
pub(crate) struct VmShared {
    source: RwLock<SourceInfo>,
    last_exception: Mutex<String>,
}

impl VmShared {
    pub(crate) fn source(&self) -> SourceInfo {
        self.source.read().clone()
    }

    fn set_last_exception(&self, text: String) {
        *self.last_exception.lock() = text;
    }
}

/// Requests termination of whatever script a VM is running.
///
/// Best effort: the request is honoured at the engine's next interrupt check
/// and is consumed by it, so a request made while the VM is idle cancels the
/// next script that runs. Terminated calls report
/// [`Status::ScriptException`].
#[derive(Debug, Clone)]
pub struct TerminateHandle {
    requested: Arc<AtomicBool>,
}

impl TerminateHandle {
    pub fn terminate(&self) {
        self.requested.store(true, Ordering::Release);
    }
}

struct Isolate {
    rejections: RejectionQueue,
    // Field order matters: the context must go before its runtime.
    context: Context,
    runtime: Runtime,
}

impl Isolate {
    fn new(
        config: &BridgeConfig,
        link: &HostLink,
        modules: ModuleStore,
        broker: Arc<ResolverBroker>,
        interrupt: Arc<AtomicBool>,
    ) -> BridgeResult<Self> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = config.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        runtime.set_interrupt_handler(Some(Box::new(move || {
            interrupt.swap(false, Ordering::AcqRel)
        })));
        let rejections = RejectionQueue::default();
        let tracker = rejections.clone();
        runtime.set_host_promise_rejection_tracker(Some(Box::new(
            move |ctx: Ctx<'_>, promise: Value<'_>, reason: Value<'_>, is_handled: bool| {
                tracker.track(&ctx, promise, reason, is_handled)
            },
        )));
        runtime.set_loader(
            BrokerResolver {
                store: modules.clone(),
                broker,
            },
            StoreLoader { store: modules },
        );

        let context = Context::full(&runtime)?;
        context.with(|ctx| apis::register_all_apis(&ctx, link))?;

        Ok(Self {
            rejections,
            context,
            runtime,
        })
    }

    fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(job) => {
                    let text = job.0.with(|ctx| describe_exception(&ctx.catch()));
                    warn!(exception = %text, "Pending job threw");
                }
            }
        }
    }

    fn report_rejections(&self, hooks: &Hooks) -> Option<String> {
        if self.rejections.is_empty() {
            return None;
        }
        self.context
            .with(|ctx| self.rejections.report(&ctx, hooks))
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        // Held rejections reference engine values; free them before the runtime.
        self.rejections.clear();
    }
}

enum Failure {
    HandlerMissing(&'static str),
    Exception(String),
}

impl Failure {
    fn from_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        Self::Exception(describe_error(ctx, err))
    }
}

#[derive(Clone, Copy)]
enum Event<'a> {
    Enter { session: SessionId, addr: &'a str },
    Leave { session: SessionId, addr: &'a str },
    Message { session: SessionId, payload: &'a HostMap },
}

impl Event<'_> {
    fn handler(self) -> &'static str {
        match self {
            Self::Enter { .. } => ON_ENTER,
            Self::Leave { .. } => ON_LEAVE,
            Self::Message { .. } => ON_MESSAGE,
        }
    }

    fn session(self) -> SessionId {
        match self {
            Self::Enter { session, .. }
            | Self::Leave { session, .. }
            | Self::Message { session, .. } => session,
        }
    }

    fn argument<'js>(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        match self {
            Self::Enter { addr, .. } | Self::Leave { addr, .. } => {
                Ok(rquickjs::String::from_str(ctx.clone(), addr)?.into_value())
            }
            Self::Message { payload, .. } => Ok(codec::encode_map(ctx, payload)?.into_value()),
        }
    }
}

fn session_value<'js>(ctx: &Ctx<'js>, session: SessionId) -> rquickjs::Result<Value<'js>> {
    if let Ok(small) = i32::try_from(session) {
        return Ok(Value::new_int(ctx.clone(), small));
    }
    if session <= MAX_SAFE_INTEGER {
        return Ok(Value::new_float(ctx.clone(), session as f64));
    }
    Ok(BigInt::from_u64(ctx.clone(), session)?.into_value())
}

fn call_handler(ctx: &Ctx<'_>, event: Event<'_>) -> Result<(), Failure> {
    let handler: Value = ctx
        .globals()
        .get(event.handler())
        .map_err(|err| Failure::from_error(ctx, err))?;
    let Some(function) = handler.as_function() else {
        return Err(Failure::HandlerMissing(event.handler()));
    };

    let session = session_value(ctx, event.session()).map_err(|err| Failure::from_error(ctx, err))?;
    let argument = event.argument(ctx).map_err(|err| Failure::from_error(ctx, err))?;
    function
        .call::<_, Value>((session, argument))
        .map(drop)
        .map_err(|err| Failure::from_error(ctx, err))
}

/// One script VM. Created by [`Engine::create_vm`].
pub struct Vm {
    paw: Paw,
    state: VmState,
    isolate: Option<Isolate>,
    shared: Arc<VmShared>,
    vms: Arc<Holt<VmShared>>,
    broker: Arc<ResolverBroker>,
    modules: ModuleStore,
    hooks: Hooks,
    stats: Arc<EngineStats>,
    interrupt: Arc<AtomicBool>,
    drain_jobs: bool,
    called: u64,
}

impl Vm {
    pub(crate) fn create(engine: &Engine) -> BridgeResult<Self> {
        let shared = Arc::new(VmShared::default());
        let paw = engine.vms.hold(shared.clone())?;

        let modules = ModuleStore::new();
        let interrupt = Arc::new(AtomicBool::new(false));
        let link = HostLink {
            vms: engine.vms.clone(),
            paw,
            hooks: engine.hooks.clone(),
            max_decode_depth: engine.config.max_decode_depth,
        };

        let isolate = match Isolate::new(
            &engine.config,
            &link,
            modules.clone(),
            engine.broker.clone(),
            interrupt.clone(),
        ) {
            Ok(isolate) => isolate,
            Err(err) => {
                engine.vms.release(paw);
                return Err(err);
            }
        };

        engine.stats.vms_created.fetch_add(1, Ordering::Relaxed);
        debug!(vm = %paw, "VM created");

        Ok(Self {
            paw,
            state: VmState::Created,
            isolate: Some(isolate),
            shared,
            vms: engine.vms.clone(),
            broker: engine.broker.clone(),
            modules,
            hooks: engine.hooks.clone(),
            stats: engine.stats.clone(),
            interrupt,
            drain_jobs: engine.config.drain_jobs,
            called: 0,
        })
    }

    /// The registry key of this VM.
    pub fn key(&self) -> u64 {
        self.paw.to_bits()
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.state == VmState::Disposed
    }

    /// Run a script file. `false` on any failure; see [`Vm::load_file`].
    pub fn load(&mut self, path: impl AsRef<Path>) -> bool {
        self.load_file(path).is_success()
    }

    /// Run a script file as a classic script.
    ///
    /// [`Status::EntryMissing`] if the file cannot be read,
    /// [`Status::ScriptException`] if compiling or running it throws.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Status {
        if self.is_disposed() {
            return Status::Disposed;
        }
        let path = path.as_ref();
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                warn!(vm = %self.paw, path = %path.display(), error = %err, "Entry script unreadable");
                self.shared
                    .set_last_exception(format!("{}: {err}", path.display()));
                return Status::EntryMissing;
            }
        };
        self.load_script(&path.to_string_lossy(), &source)
    }

    /// Run script text supplied inline.
    pub fn load_script(&mut self, name: &str, code: &str) -> Status {
        debug!(vm = %self.paw, script = name, "Loading script");
        self.execute("load", |ctx| {
            ctx.eval::<(), _>(code)
                .map_err(|err| Failure::from_error(ctx, err))
        })
    }

    /// Evaluate `code` as the ES module `name`.
    ///
    /// `resolve(specifier, referrer)` is consulted for every import not yet
    /// in [`Vm::module_store`]; it returns zero after providing the source,
    /// non-zero to fail the import. It is registered only for the duration
    /// of this call.
    pub fn load_module<F>(&mut self, name: &str, code: &str, resolve: F) -> BridgeResult<()>
    where
        F: Fn(&str, &str) -> i32 + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(BridgeError::Disposed);
        }

        let token = self.broker.register(Arc::new(resolve))?;
        let _release = {
            let broker = self.broker.clone();
            let modules = self.modules.clone();
            scopeguard::guard(token, move |token| {
                modules.end_load();
                broker.release(token);
            })
        };
        self.modules.begin_load(token);
        self.modules.provide(name, code);

        debug!(vm = %self.paw, module = name, token = token.to_bits(), "Loading module");
        let rejections = self.isolate.as_ref().map(|isolate| isolate.rejections.clone());
        let status = self.execute("load_module", |ctx| {
            Module::evaluate(ctx.clone(), name, code)
                .and_then(|promise| promise.finish::<()>())
                .map_err(|err| {
                    // The rejected evaluation promise is this load's failure
                    if let Some(rejections) = &rejections {
                        rejections.clear();
                    }
                    Failure::from_error(ctx, err)
                })
        });

        if status.is_success() {
            self.stats.modules_loaded.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if let Some(failure) = self.modules.take_failure() {
            self.shared.set_last_exception(failure.message());
            return Err(BridgeError::Resolution {
                specifier: failure.specifier,
                referrer: failure.referrer,
                code: failure.code,
            });
        }
        Err(BridgeError::script(self.last_exception()))
    }

    /// Read a module from disk and evaluate it with [`Vm::load_module`],
    /// using the path as its name.
    pub fn load_module_file<F>(&mut self, path: impl AsRef<Path>, resolve: F) -> BridgeResult<()>
    where
        F: Fn(&str, &str) -> i32 + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(BridgeError::Disposed);
        }
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|err| {
            self.shared
                .set_last_exception(format!("{}: {err}", path.display()));
            BridgeError::EntryMissing {
                path: path.to_path_buf(),
            }
        })?;
        self.load_module(&path.to_string_lossy(), &source, resolve)
    }

    /// Sources known to this VM's module loader. Resolvers put imports here.
    pub fn module_store(&self) -> ModuleStore {
        self.modules.clone()
    }

    /// Bind a host value to a global name.
    pub fn set_value(&mut self, name: &str, value: &HostValue) -> Status {
        self.execute("set_value", |ctx| {
            let native = codec::encode(ctx, value).map_err(|err| Failure::from_error(ctx, err))?;
            ctx.globals()
                .set(name, native)
                .map_err(|err| Failure::from_error(ctx, err))
        })
    }

    pub fn set_associated_source_addr(&mut self, addr: impl Into<String>) -> Status {
        if self.is_disposed() {
            return Status::Disposed;
        }
        self.state = VmState::Active;
        self.shared.source.write().addr = addr.into();
        Status::Success
    }

    pub fn set_associated_source_id(&mut self, id: u64) -> Status {
        if self.is_disposed() {
            return Status::Disposed;
        }
        self.state = VmState::Active;
        self.shared.source.write().id = id;
        Status::Success
    }

    /// `None` once disposed.
    pub fn associated_source_addr(&self) -> Option<String> {
        (!self.is_disposed()).then(|| self.shared.source.read().addr.clone())
    }

    /// `None` once disposed.
    pub fn associated_source_id(&self) -> Option<u64> {
        (!self.is_disposed()).then(|| self.shared.source.read().id)
    }

    /// Text of the most recent script exception or load failure. Survives
    /// disposal.
    pub fn last_exception(&self) -> String {
        self.shared.last_exception.lock().clone()
    }

    pub fn dispatch_enter(&mut self, session: SessionId, addr: &str) -> Status {
        self.dispatch(Event::Enter { session, addr })
    }

    pub fn dispatch_leave(&mut self, session: SessionId, addr: &str) -> Status {
        self.dispatch(Event::Leave { session, addr })
    }

    pub fn dispatch_message(&mut self, session: SessionId, payload: &HostMap) -> Status {
        self.dispatch(Event::Message { session, payload })
    }

    fn dispatch(&mut self, event: Event<'_>) -> Status {
        if self.is_disposed() {
            return Status::Disposed;
        }
        self.called += 1;
        self.stats.dispatches.fetch_add(1, Ordering::Relaxed);

        let status = self.execute(event.handler(), |ctx| call_handler(ctx, event));
        if !status.is_success() {
            self.stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        }
        status
    }

    /// Number of dispatches since creation or the last [`Vm::reset`].
    pub fn called(&self) -> u64 {
        self.called
    }

    pub fn reset(&mut self) {
        self.called = 0;
    }

    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle {
            requested: self.interrupt.clone(),
        }
    }

    /// `None` once disposed.
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        self.isolate
            .as_ref()
            .map(|isolate| runtime_memory_stats(&isolate.runtime))
    }

    /// Write the isolate's memory statistics to the output hook.
    pub fn print_mem_stat(&self) -> Status {
        let Some(stats) = self.memory_stats() else {
            return Status::Disposed;
        };
        self.hooks.output(&format!("[vm {}] memory\n{stats}", self.paw));
        Status::Success
    }

    /// Release the isolate and unregister the VM.
    ///
    /// # Panics
    ///
    /// If the VM was already disposed.
    pub fn dispose(&mut self) {
        assert!(!self.is_disposed(), "vm already disposed");
        self.teardown();
        debug!(vm = %self.paw, "VM disposed");
    }

    fn teardown(&mut self) {
        self.state = VmState::Disposed;
        self.vms.release(self.paw);
        self.isolate.take();
        self.stats.vms_disposed.fetch_add(1, Ordering::Relaxed);
    }

    fn execute(
        &mut self,
        operation: &'static str,
        run: impl for<'js> FnOnce(&Ctx<'js>) -> Result<(), Failure>,
    ) -> Status {
        if self.is_disposed() {
            return Status::Disposed;
        }
        self.state = VmState::Active;

        let Some(isolate) = self.isolate.as_ref() else {
            return Status::Disposed;
        };
        let outcome = isolate.context.with(|ctx| run(&ctx));
        if self.drain_jobs {
            isolate.drain_jobs();
        }
        if let Some(text) = isolate.report_rejections(&self.hooks) {
            self.shared.set_last_exception(text);
        }

        match outcome {
            Ok(()) => Status::Success,
            Err(Failure::HandlerMissing(handler)) => {
                debug!(vm = %self.paw, handler, "Handler not defined");
                Status::HandlerMissing
            }
            Err(Failure::Exception(text)) => {
                warn!(vm = %self.paw, operation, exception = %text, "Script exception");
                self.shared.set_last_exception(text);
                Status::ScriptException
            }
        }
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if !self.is_disposed() {
            warn!(vm = %self.paw, "VM dropped without dispose; releasing isolate");
            self.teardown();
        }
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("key", &self.key())
            .field("state", &self.state)
            .field("called", &self.called)
            .finish()
    }
}
