//! Console API implementation
//!
//! Provides `console.log`, `console.info`, `console.debug`, `console.warn`,
//! `console.error` and a global `print`, all routed to the engine's output
//! hook.

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};

use crate::hooks::Hooks;

const CONSOLE_METHODS: [&str; 5] = ["log", "info", "debug", "warn", "error"];

/// Register `console` and `print` on the global object
pub(crate) fn register_console_api(ctx: &Ctx<'_>, hooks: &Hooks) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    for method in CONSOLE_METHODS {
        console.set(method, print_function(ctx, hooks.clone())?)?;
    }

    let globals = ctx.globals();
    globals.set("console", console)?;
    globals.set("print", print_function(ctx, hooks.clone())?)?;
    Ok(())
}

/// A variadic function that joins its arguments with spaces and emits one
/// line of output.
pub(crate) fn print_function<'js>(ctx: &Ctx<'js>, hooks: Hooks) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let text = format_values(&ctx, &args.0)?;
            hooks.output(&text);
            Ok(())
        },
    )
}

pub(crate) fn format_values<'js>(ctx: &Ctx<'js>, values: &[Value<'js>]) -> rquickjs::Result<String> {
    let mut parts = Vec::with_capacity(values.len());
    for value in values {
        parts.push(display_value(ctx, value)?);
    }
    Ok(parts.join(" "))
}

fn display_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> rquickjs::Result<String> {
    if let Some(text) = value.as_string() {
        return text.to_string();
    }

    // Plain objects and arrays print as JSON; errors and functions use their
    // string form.
    if value.is_object() && !value.is_function() && value.as_exception().is_none() {
        match ctx.json_stringify(value.clone()) {
            Ok(Some(json)) => return json.to_string(),
            Ok(None) => {}
            Err(_) => {
                // Cycles and BigInts make stringify throw; fall back quietly
                let _ = ctx.catch();
            }
        }
    }

    Ok(value.get::<Coerced<String>>()?.0)
}
