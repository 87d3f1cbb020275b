//! Shared identifier validation, per spec sections 4.4 and 4.6.
//!
//! Device IDs, commands, properties, and event names all follow the same
//! shape: a maximum length and a restricted character set. This module
//! centralizes the check so `hydrogen-client`'s Subscription Manager,
//! Device Manager, and Command Executor all enforce it identically.

use crate::error::Error;

/// `[A-Za-z0-9_-]`, used for commands.
pub const CHARSET_COMMAND: &str = "A-Za-z0-9_-";
/// `[A-Za-z0-9_\-.]`, used for device IDs, properties, and event names.
pub const CHARSET_EXTENDED: &str = "A-Za-z0-9_-.";

fn is_command_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_extended_char(c: char) -> bool {
    is_command_char(c) || c == '.'
}

/// Validates `value` against the command charset (`[A-Za-z0-9_-]`) and a max length.
pub fn validate_command(field: &'static str, value: &str, max_len: usize) -> Result<(), Error> {
    validate(field, value, max_len, is_command_char)
}

/// Validates `value` against the extended charset (`[A-Za-z0-9_\-.]`) and a max length.
pub fn validate_extended(field: &'static str, value: &str, max_len: usize) -> Result<(), Error> {
    validate(field, value, max_len, is_extended_char)
}

fn validate(
    field: &'static str,
    value: &str,
    max_len: usize,
    allowed: fn(char) -> bool,
) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::invalid_argument(field, "must not be empty"));
    }
    if value.chars().count() > max_len {
        return Err(Error::invalid_argument(
            field,
            format!("length {} exceeds maximum of {max_len}", value.chars().count()),
        ));
    }
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(Error::invalid_argument(field, format!("disallowed character '{bad}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_length_boundary() {
        let ok = "a".repeat(128);
        let bad = "a".repeat(129);
        assert!(validate_command("command", &ok, 128).is_ok());
        assert!(validate_command("command", &bad, 128).is_err());
    }

    #[test]
    fn device_id_length_boundary() {
        let ok = "a".repeat(256);
        let bad = "a".repeat(257);
        assert!(validate_extended("deviceId", &ok, 256).is_ok());
        assert!(validate_extended("deviceId", &bad, 256).is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(validate_command("command", "snap!", 128).is_err());
        assert!(validate_extended("deviceId", "cam 01", 256).is_err());
        assert!(validate_extended("deviceId", "cam.01_a-b", 256).is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_command("command", "", 128).is_err());
    }
}
