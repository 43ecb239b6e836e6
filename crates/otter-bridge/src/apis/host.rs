//! The `host` object: `host.send`, `host.sendTo` and `host.print`.
//!
//! `send` attributes the message to the calling VM by looking its source
//! metadata up through the VM registry at call time. If the VM is no longer
//! registered the call is a silent no-op. Values that decode to nil are not
//! forwarded, and the hooks' status results are not surfaced to the script.

use rquickjs::function::Opt;
use rquickjs::{Ctx, Function, Object, Value};
use tracing::{trace, warn};

use super::HostLink;
use super::console::print_function;
use crate::codec;
use crate::error::CodecError;
use crate::value::HostValue;

pub(crate) fn register_host_api<'js>(ctx: &Ctx<'js>, link: &HostLink) -> rquickjs::Result<()> {
    let host = Object::new(ctx.clone())?;

    let send_link = link.clone();
    host.set(
        "send",
        Function::new(
            ctx.clone(),
            move |value: Opt<Value<'js>>| -> rquickjs::Result<()> { send_link.send(value.0) },
        )?,
    )?;

    let send_to_link = link.clone();
    host.set(
        "sendTo",
        Function::new(
            ctx.clone(),
            move |value: Opt<Value<'js>>| -> rquickjs::Result<()> { send_to_link.send_to(value.0) },
        )?,
    )?;

    host.set("print", print_function(ctx, link.hooks.clone())?)?;

    ctx.globals().set("host", host)?;
    Ok(())
}

impl HostLink {
    fn send(&self, value: Option<Value<'_>>) -> rquickjs::Result<()> {
        if !self.hooks.has_send() {
            return Ok(());
        }
        let Some(vm) = self.vms.try_catch(self.paw) else {
            trace!(vm = %self.paw, "Send from unregistered VM dropped");
            return Ok(());
        };
        let Some(payload) = self.payload(value)? else {
            return Ok(());
        };

        let source = vm.source();
        if let Some(status) = self.hooks.send(&source.addr, source.id, payload) {
            trace!(vm = %self.paw, status, "Send hook returned");
        }
        Ok(())
    }

    fn send_to(&self, value: Option<Value<'_>>) -> rquickjs::Result<()> {
        if !self.hooks.has_send_to() {
            return Ok(());
        }
        let Some(payload) = self.payload(value)? else {
            return Ok(());
        };

        if let Some(status) = self.hooks.send_to(payload) {
            trace!(vm = %self.paw, status, "SendTo hook returned");
        }
        Ok(())
    }

    /// Decode an outgoing message. Engine errors propagate to the script as
    /// exceptions; over-deep values are dropped.
    fn payload(&self, value: Option<Value<'_>>) -> rquickjs::Result<Option<HostValue>> {
        let Some(value) = value else {
            return Ok(None);
        };
        match codec::decode(&value, self.max_decode_depth) {
            Ok(HostValue::Nil) => Ok(None),
            Ok(payload) => Ok(Some(payload)),
            Err(CodecError::Engine(err)) => Err(err),
            Err(err @ CodecError::TooDeep(_)) => {
                warn!(vm = %self.paw, error = %err, "Dropping undecodable message");
                Ok(None)
            }
        }
    }
}
