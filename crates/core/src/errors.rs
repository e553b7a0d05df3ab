use std::error::Error;

pub const ERROR_MESSAGE_PREFIX: &str =
    "Problems executing the task, you can try retrying it.\nDetailed cause:  ";

/// Message of the deepest error in the `source()` chain, or of `error`
/// itself when it has no cause.
pub fn exception_message(error: &(dyn Error + 'static)) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// User-facing text posted back to the Slack thread when a task fails.
pub fn error_message(error: &(dyn Error + 'static)) -> String {
    format!("{ERROR_MESSAGE_PREFIX}{}", exception_message(error))
}
