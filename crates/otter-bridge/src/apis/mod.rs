//! Host functions injected into every VM's global scope.

pub mod console;
pub mod host;

use std::sync::Arc;

use rquickjs::Ctx;

use crate::holt::{Holt, Paw};
use crate::hooks::Hooks;
use crate::vm::VmShared;

/// What an injected function needs to reach the host: the hooks, and the VM
/// by key rather than by reference.
#[derive(Clone)]
pub(crate) struct HostLink {
    pub(crate) vms: Arc<Holt<VmShared>>,
    pub(crate) paw: Paw,
    pub(crate) hooks: Hooks,
    pub(crate) max_decode_depth: usize,
}

/// Register every host API on the context's global object.
pub(crate) fn register_all_apis(ctx: &Ctx<'_>, link: &HostLink) -> rquickjs::Result<()> {
    console::register_console_api(ctx, &link.hooks)?;
    host::register_host_api(ctx, link)?;
    Ok(())
}
