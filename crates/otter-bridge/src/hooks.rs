//! Host hooks: where script-originated messages and text end up.
//!
//! Hooks are fixed when the [`crate::Engine`] is built and shared by every VM
//! it creates. All three are optional; an unset send hook swallows the
//! message, an unset output hook writes to stdout.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::value::HostValue;

/// `Send(source_addr, source_id, value) -> status`
pub type SendHook = dyn Fn(&str, u64, HostValue) -> i32 + Send + Sync + 'static;

/// `SendTo(value) -> status`
pub type SendToHook = dyn Fn(HostValue) -> i32 + Send + Sync + 'static;

/// `Output(text)`
pub type OutputHook = dyn Fn(&str) + Send + Sync + 'static;

/// The set of host hooks handed to every VM of an engine.
#[derive(Clone, Default)]
pub struct Hooks {
    send: Option<Arc<SendHook>>,
    send_to: Option<Arc<SendToHook>>,
    output: Option<Arc<OutputHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives `host.send(value)` together with the sending VM's source
    /// address and id.
    pub fn on_send(mut self, hook: impl Fn(&str, u64, HostValue) -> i32 + Send + Sync + 'static) -> Self {
        self.send = Some(Arc::new(hook));
        self
    }

    /// Receives `host.sendTo(value)`. The value carries its own routing.
    pub fn on_send_to(mut self, hook: impl Fn(HostValue) -> i32 + Send + Sync + 'static) -> Self {
        self.send_to = Some(Arc::new(hook));
        self
    }

    /// Receives script text output (`print`, `console.*`, memory dumps).
    pub fn on_output(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.output = Some(Arc::new(hook));
        self
    }

    /// Returns the hook's status, or `None` if no send hook is installed.
    pub(crate) fn send(&self, source_addr: &str, source_id: u64, value: HostValue) -> Option<i32> {
        self.send
            .as_ref()
            .map(|hook| hook(source_addr, source_id, value))
    }

    pub(crate) fn send_to(&self, value: HostValue) -> Option<i32> {
        self.send_to.as_ref().map(|hook| hook(value))
    }

    pub(crate) fn has_send(&self) -> bool {
        self.send.is_some()
    }

    pub(crate) fn has_send_to(&self) -> bool {
        self.send_to.is_some()
    }

    pub(crate) fn output(&self, text: &str) {
        match &self.output {
            Some(hook) => hook(text),
            None => {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "{text}");
            }
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("send", &self.send.is_some())
            .field("send_to", &self.send_to.is_some())
            .field("output", &self.output.is_some())
            .finish()
    }
}
