//! Turning engine exceptions into the text stored as a VM's last exception.

use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Value};

/// Describe an engine error. A pending exception is caught and cleared.
pub(crate) fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if matches!(err, rquickjs::Error::Exception) {
        describe_exception(&ctx.catch())
    } else {
        err.to_string()
    }
}

/// `Name: message` plus the stack for error objects; the string form of
/// anything else that was thrown.
pub(crate) fn describe_exception(value: &Value<'_>) -> String {
    if let Some(exception) = value.as_exception() {
        let name = exception
            .get::<_, Option<String>>("name")
            .ok()
            .flatten()
            .unwrap_or_else(|| "Error".to_string());
        let message = exception.message().unwrap_or_default();

        let mut text = if message.is_empty() {
            name
        } else {
            format!("{name}: {message}")
        };
        if let Some(stack) = exception.stack() {
            let stack = stack.trim_end();
            if !stack.is_empty() {
                text.push('\n');
                text.push_str(stack);
            }
        }
        return text;
    }

    value
        .get::<Coerced<String>>()
        .map(|Coerced(text)| text)
        .unwrap_or_else(|_| "<unprintable exception>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn thrown(source: &str) -> String {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let err = ctx.eval::<(), _>(source).unwrap_err();
            describe_error(&ctx, err)
        })
    }

    #[test]
    fn test_thrown_string_is_verbatim() {
        assert_eq!(thrown("throw 'boom'"), "boom");
        assert_eq!(thrown("throw 42"), "42");
    }

    #[test]
    fn test_error_objects_carry_name_and_message() {
        let text = thrown("throw new TypeError('bad input')");
        assert!(text.starts_with("TypeError: bad input"), "{text}");
    }

    #[test]
    fn test_syntax_errors_are_exceptions() {
        let text = thrown("let = ;");
        assert!(text.starts_with("SyntaxError"), "{text}");
    }
}
