//! Path validation and user-namespace key mapping.
//!
//! The `user-{id}-files/` prefix is the whole tenant-isolation mechanism, so
//! it is computed here from a [`UserId`] only. Client paths are validated
//! before they are ever appended to it.

use super::{StorageError, StorageResult};
use crate::models::UserId;

const SLASH: char = '/';

#[derive(Clone, Copy, Debug, Default)]
pub struct PathService;

impl PathService {
    /// `user-{id}-files/`
    pub fn user_prefix(&self, user: UserId) -> String {
        format!("user-{}-files/", user)
    }

    /// Full object key for `relative_path`. A single leading `/` is dropped;
    /// an empty path yields the bare prefix.
    pub fn build_user_path(&self, user: UserId, relative_path: &str) -> String {
        let normalized = relative_path.strip_prefix(SLASH).unwrap_or(relative_path);
        format!("{}{}", self.user_prefix(user), normalized)
    }

    /// Inverse of [`build_user_path`](Self::build_user_path). Keys without
    /// the expected prefix come back unchanged.
    pub fn strip_user_path<'a>(&self, key: &'a str, user: UserId) -> &'a str {
        key.strip_prefix(self.user_prefix(user).as_str())
            .unwrap_or(key)
    }

    /// Reject traversal sequences and anything outside
    /// `[a-zA-Z0-9._/\-()\[\] ]`.
    pub fn validate_path(&self, path: &str) -> StorageResult<()> {
        if path.contains("../") || path.contains("..\\") {
            return Err(StorageError::InvalidPath(
                "Path contains dangerous sequence '..'.".into(),
            ));
        }

        if !path.chars().all(is_allowed_char) {
            return Err(StorageError::InvalidPath(format!(
                "Invalid characters in path: {}",
                path
            )));
        }

        Ok(())
    }

    /// Non-empty directory paths must end with `/`.
    pub fn validate_directory_path(&self, path: &str) -> StorageResult<()> {
        if !path.is_empty() && !path.ends_with(SLASH) {
            return Err(StorageError::InvalidPath(
                "Folder path must end with '/'".into(),
            ));
        }
        Ok(())
    }

    pub fn is_directory_path(&self, path: &str) -> bool {
        path.ends_with(SLASH)
    }

    /// Root is spelled either `""` or `"/"`.
    pub fn is_root(&self, path: &str) -> bool {
        path.is_empty() || path == "/"
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-' | '(' | ')' | '[' | ']' | ' ')
}
