//! Utility functions for the command line front end.

use crate::error::{Result, VaultError};
use crate::passphrase::Passphrase;
use colored::*;
use dialoguer::Password;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// File names searched for when no store path is given.
pub const STORE_FILE_NAMES: &[&str] = &["passvault.json", ".passvault.json"];

/// Find a store file in the current directory or parents.
pub fn find_store_file() -> Option<PathBuf> {
    let current_dir = std::env::current_dir().ok()?;
    find_store_file_from(&current_dir)
}

/// Find a store file in `start` or any of its parents.
pub fn find_store_file_from(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in STORE_FILE_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }
    None
}

/// Check file permissions and return warnings.
pub fn check_file_permissions(path: &Path) -> Vec<String> {
    let mut warnings = Vec::new();

    #[cfg(unix)]
    {
        if let Ok(metadata) = fs::metadata(path) {
            let mode = metadata.permissions().mode();

            // group or others have any access
            if mode & 0o077 != 0 {
                warnings.push(format!(
                    "File has insecure permissions: {:o}. Run 'chmod 600 {}' to fix.",
                    mode & 0o777,
                    path.display()
                ));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;

    warnings
}

/// Prompt for a passphrase on the terminal.
pub fn prompt_passphrase(prompt: &str, confirm: bool) -> Result<Passphrase> {
    let mut input = Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Confirm passphrase", "Passphrases do not match");
    }
    let value = input
        .interact()
        .map_err(|e| VaultError::Other(format!("Failed to read passphrase: {e}")))?;
    if value.is_empty() {
        return Err(VaultError::Cancelled);
    }
    Ok(Passphrase::new(value.into_bytes()))
}

/// Print an error message and exit.
pub fn error_exit(message: &str, code: i32) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    std::process::exit(code);
}

/// Print a success message.
pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print a warning message.
pub fn warning(message: &str) {
    eprintln!("{} {}", "Warning:".yellow(), message);
}

/// Mask a secret value for display.
pub fn mask(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    "•".repeat(value.chars().count().min(12))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_store_file_in_parent() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        assert!(find_store_file_from(&nested).is_none());

        let store = dir.path().join("passvault.json");
        fs::write(&store, "{}").unwrap();
        assert_eq!(find_store_file_from(&nested), Some(store));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_file_permissions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passvault.json");
        fs::write(&path, "{}").unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(check_file_permissions(&path).len(), 1);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        assert!(check_file_permissions(&path).is_empty());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(""), "");
        assert_eq!(mask("abc"), "•••");
    }
}
