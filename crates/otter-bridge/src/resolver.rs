//! Module resolver broker.
//!
//! A module load supplies a host resolver closure for the duration of that
//! one load. The broker registers it in a short-lived [`Holt`] and hands the
//! engine side nothing but a [`ResolverToken`]. When the engine needs an
//! import resolved it asks the broker with the token; an unknown token fails
//! closed. Concurrent loads on different VMs hold different tokens and never
//! see each other's resolvers.

use std::sync::Arc;

use tracing::trace;

use crate::holt::{Holt, HoltResult, Paw};

/// `resolve(specifier, referrer) -> status`; zero means resolved.
pub type ModuleResolverFn = dyn Fn(&str, &str) -> i32 + Send + Sync + 'static;

/// Resolution succeeded.
pub const RESOLVED: i32 = 0;

/// No resolver is registered for the token in flight.
pub const NO_RESOLVER: i32 = -1;

/// The resolver reported success but never provided the module source.
pub const NOT_PROVIDED: i32 = -2;

/// Integer grip on a registered resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolverToken(Paw);

impl ResolverToken {
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }
}

/// Registry of in-flight module resolvers.
#[derive(Debug, Default)]
pub struct ResolverBroker {
    resolvers: Holt<ModuleResolverFn>,
}

impl ResolverBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resolve: Arc<ModuleResolverFn>) -> HoltResult<ResolverToken> {
        let token = ResolverToken(self.resolvers.hold(resolve)?);
        trace!(token = token.to_bits(), "Resolver registered");
        Ok(token)
    }

    /// Route one resolution request to the resolver behind `token`.
    ///
    /// The registry lock is not held while the resolver runs.
    pub fn resolve(&self, token: ResolverToken, specifier: &str, referrer: &str) -> i32 {
        match self.resolvers.try_catch(token.0) {
            Some(resolve) => resolve(specifier, referrer),
            None => {
                trace!(token = token.to_bits(), specifier, "No resolver for token");
                NO_RESOLVER
            }
        }
    }

    pub fn release(&self, token: ResolverToken) {
        if self.resolvers.release(token.0).is_some() {
            trace!(token = token.to_bits(), "Resolver released");
        }
    }

    /// Number of resolvers currently registered.
    pub fn pending(&self) -> usize {
        self.resolvers.len()
    }
}
