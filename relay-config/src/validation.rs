// relay-config/src/validation.rs
//! Custom validation functions for configuration.

use validator::ValidationError;

/// POSIX `NAME_MAX` for shared memory and semaphore names, minus the `sem.` prefix
/// glibc adds under `/dev/shm`.
const MAX_IPC_NAME_LEN: usize = 251;

/// Validate a POSIX IPC object name: one leading slash, no other slashes.
pub fn validate_ipc_name(name: &str) -> Result<(), ValidationError> {
    let valid = name.len() > 1
        && name.len() <= MAX_IPC_NAME_LEN
        && name.starts_with('/')
        && !name[1..].contains('/')
        && !name.contains('\0');

    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_ipc_name"))
    }
}

/// Validate that a command line has a program and no empty words.
pub fn validate_command(command: &[String]) -> Result<(), ValidationError> {
    if command.is_empty() || command.iter().any(|word| word.is_empty()) {
        return Err(ValidationError::new("invalid_command"));
    }
    Ok(())
}

/// Validate log level.
pub fn validate_level(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"]
        .contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_names() {
        assert!(validate_ipc_name("/drone_sem").is_ok());
        assert!(validate_ipc_name("drone_sem").is_err());
        assert!(validate_ipc_name("/").is_err());
        assert!(validate_ipc_name("/a/b").is_err());
        assert!(validate_ipc_name(&format!("/{}", "x".repeat(300))).is_err());
    }

    #[test]
    fn commands() {
        assert!(validate_command(&["./map_window".into()]).is_ok());
        assert!(validate_command(&[]).is_err());
        assert!(validate_command(&["konsole".into(), String::new()]).is_err());
    }

    #[test]
    fn levels() {
        assert!(validate_level("INFO").is_ok());
        assert!(validate_level("verbose").is_err());
    }
}
