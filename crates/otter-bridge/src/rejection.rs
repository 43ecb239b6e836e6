//! Unhandled promise rejections.
//!
//! The engine reports a rejection the moment it happens without a handler,
//! and again if a handler is attached later. Rejections are held until the
//! current operation and its job queue finish; whatever is still unhandled
//! then goes to the script's global `onerror(message, source, lineno, colno,
//! error)`, or to the output hook as `Unhandled Promise` plus the stack when
//! the script defines none. Reporting never fails the operation.

use std::cell::RefCell;
use std::rc::Rc;

use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Persistent, Value};
use tracing::warn;

use crate::exception::{describe_error, describe_exception};
use crate::hooks::Hooks;
use crate::vm::ON_ERROR;

struct Rejection {
    promise: Persistent<Value<'static>>,
    reason: Persistent<Value<'static>>,
}

/// Rejections seen during the current operation. Shared between an isolate
/// and the tracker installed on its runtime.
#[derive(Clone, Default)]
pub(crate) struct RejectionQueue {
    pending: Rc<RefCell<Vec<Rejection>>>,
}

impl RejectionQueue {
    /// Runtime tracker callback.
    pub(crate) fn track<'js>(
        &self,
        ctx: &Ctx<'js>,
        promise: Value<'js>,
        reason: Value<'js>,
        is_handled: bool,
    ) {
        if is_handled {
            self.pending
                .borrow_mut()
                .retain(|held| !held.promise.clone().restore(ctx).is_ok_and(|p| p == promise));
            return;
        }
        let rejection = Rejection {
            promise: Persistent::save(ctx, promise),
            reason: Persistent::save(ctx, reason),
        };
        self.pending.borrow_mut().push(rejection);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Drop held rejections unreported.
    pub(crate) fn clear(&self) {
        self.pending.borrow_mut().clear();
    }

    /// Report everything still unhandled. Returns the text of the last
    /// rejection reported.
    pub(crate) fn report(&self, ctx: &Ctx<'_>, hooks: &Hooks) -> Option<String> {
        // Taken first: `onerror` may reject further promises.
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let mut last = None;
        for rejection in pending {
            let Ok(reason) = rejection.reason.restore(ctx) else {
                continue;
            };
            last = Some(report_one(ctx, reason, hooks));
        }
        last
    }
}

fn report_one<'js>(ctx: &Ctx<'js>, reason: Value<'js>, hooks: &Hooks) -> String {
    let text = describe_exception(&reason);
    let onerror = ctx
        .globals()
        .get::<_, Value>(ON_ERROR)
        .ok()
        .and_then(|handler| handler.as_function().cloned());

    let Some(onerror) = onerror else {
        warn!(exception = %text, "Unhandled promise rejection");
        hooks.output(&format!("Unhandled Promise\n{text}"));
        return text;
    };

    let message = reason
        .get::<Coerced<String>>()
        .map(|Coerced(message)| message)
        .unwrap_or_else(|_| text.clone());
    let (source, line, column) = origin(&reason);
    if let Err(err) = onerror.call::<_, Value>((message, source, line, column, reason)) {
        warn!(exception = %describe_error(ctx, err), "onerror threw");
    }
    text
}

/// Where an error object was raised, when the engine recorded it.
fn origin(reason: &Value<'_>) -> (String, i32, i32) {
    let Some(object) = reason.as_object() else {
        return (String::new(), 0, 0);
    };
    let source = object
        .get::<_, Option<String>>("fileName")
        .ok()
        .flatten()
        .unwrap_or_default();
    let line = object
        .get::<_, Option<i32>>("lineNumber")
        .ok()
        .flatten()
        .unwrap_or_default();
    let column = object
        .get::<_, Option<i32>>("columnNumber")
        .ok()
        .flatten()
        .unwrap_or_default();
    (source, line, column)
}
