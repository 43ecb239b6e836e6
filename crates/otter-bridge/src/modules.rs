//! Engine-side module loading.
//!
//! Each VM owns a [`ModuleStore`] of module sources by specifier, plus the
//! resolver token of the load currently in flight. The engine's resolver hook
//! consults the store first and only calls back into the host (through the
//! [`ResolverBroker`]) for specifiers it has not seen. A host resolver makes a
//! module available by calling [`ModuleStore::provide`] before returning zero.
//! When it stores the source under a different name than the specifier (a
//! canonical path, say), it also calls [`ModuleStore::link`] so the import
//! from that referrer resolves to the stored name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Exception, Module};
use tracing::{debug, warn};

use crate::resolver::{NO_RESOLVER, NOT_PROVIDED, RESOLVED, ResolverBroker, ResolverToken};

/// An import the host could not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    pub specifier: String,
    pub referrer: String,
    pub code: i32,
}

impl ResolutionFailure {
    /// Text recorded as the VM's last exception.
    pub fn message(&self) -> String {
        format!("Module ({}) has not been loaded", self.specifier)
    }
}

#[derive(Debug, Default)]
struct ModuleState {
    sources: Mutex<HashMap<String, String>>,
    // (referrer, specifier) -> module name
    links: Mutex<HashMap<(String, String), String>>,
    in_flight: Mutex<Option<ResolverToken>>,
    failure: Mutex<Option<ResolutionFailure>>,
}

/// Shared, thread-safe handle to a VM's module sources.
///
/// Cloning is cheap; every clone sees the same store.
#[derive(Debug, Clone, Default)]
pub struct ModuleStore {
    state: Arc<ModuleState>,
}

impl ModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `source` available under `specifier`. Replaces any earlier source.
    pub fn provide(&self, specifier: impl Into<String>, source: impl Into<String>) {
        self.state
            .sources
            .lock()
            .insert(specifier.into(), source.into());
    }

    /// Resolve `specifier` imported from `referrer` to the module stored as `name`.
    pub fn link(&self, referrer: impl Into<String>, specifier: impl Into<String>, name: impl Into<String>) {
        self.state
            .links
            .lock()
            .insert((referrer.into(), specifier.into()), name.into());
    }

    fn linked(&self, referrer: &str, specifier: &str) -> Option<String> {
        self.state
            .links
            .lock()
            .get(&(referrer.to_string(), specifier.to_string()))
            .cloned()
    }

    pub fn contains(&self, specifier: &str) -> bool {
        self.state.sources.lock().contains_key(specifier)
    }

    pub fn len(&self) -> usize {
        self.state.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn source(&self, specifier: &str) -> Option<String> {
        self.state.sources.lock().get(specifier).cloned()
    }

    pub(crate) fn begin_load(&self, token: ResolverToken) {
        *self.state.in_flight.lock() = Some(token);
        self.state.failure.lock().take();
    }

    pub(crate) fn end_load(&self) {
        self.state.in_flight.lock().take();
    }

    pub(crate) fn in_flight(&self) -> Option<ResolverToken> {
        *self.state.in_flight.lock()
    }

    pub(crate) fn take_failure(&self) -> Option<ResolutionFailure> {
        self.state.failure.lock().take()
    }

    fn record_failure(&self, failure: ResolutionFailure) {
        warn!(
            specifier = %failure.specifier,
            referrer = %failure.referrer,
            code = failure.code,
            "Module resolution failed"
        );
        *self.state.failure.lock() = Some(failure);
    }
}

/// Engine resolver hook: known specifiers first, then the host via the broker.
pub(crate) struct BrokerResolver {
    pub(crate) store: ModuleStore,
    pub(crate) broker: Arc<ResolverBroker>,
}

impl Resolver for BrokerResolver {
    fn resolve<'js>(&mut self, ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        if let Some(linked) = self.store.linked(base, name) {
            return Ok(linked);
        }
        if self.store.contains(name) {
            return Ok(name.to_string());
        }

        let code = match self.store.in_flight() {
            Some(token) => self.broker.resolve(token, name, base),
            None => NO_RESOLVER,
        };

        if code == RESOLVED {
            let resolved = self.store.linked(base, name).unwrap_or_else(|| name.to_string());
            debug!(specifier = name, referrer = base, module = %resolved, "Module resolved by host");
            return Ok(resolved);
        }

        let failure = ResolutionFailure {
            specifier: name.to_string(),
            referrer: base.to_string(),
            code,
        };
        let message = failure.message();
        self.store.record_failure(failure);
        Err(Exception::throw_reference(ctx, &message))
    }
}

/// Engine loader hook: declares modules from the store.
pub(crate) struct StoreLoader {
    pub(crate) store: ModuleStore,
}

impl Loader for StoreLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        match self.store.source(name) {
            Some(source) => Module::declare(ctx.clone(), name, source),
            None => {
                let failure = ResolutionFailure {
                    specifier: name.to_string(),
                    referrer: String::new(),
                    code: NOT_PROVIDED,
                };
                let message = failure.message();
                self.store.record_failure(failure);
                Err(Exception::throw_reference(ctx, &message))
            }
        }
    }
}
