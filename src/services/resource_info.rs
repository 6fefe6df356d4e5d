//! Decodes a user-relative path into a [`Resource`] descriptor.

use crate::models::{Resource, ResourceType};

/// Build the descriptor for `relative_path`.
///
/// Directories keep a trailing `/` on their name; `size` is dropped for them.
/// The root (empty path) decodes to an empty name and parent.
pub fn build(relative_path: &str, size: u64, is_dir: bool) -> Resource {
    let relative_path = relative_path.strip_prefix('/').unwrap_or(relative_path);

    let (parent_path, name) = if relative_path.is_empty() {
        (String::new(), String::new())
    } else {
        let for_parsing = if is_dir {
            relative_path.strip_suffix('/').unwrap_or(relative_path)
        } else {
            relative_path
        };

        let (parent, name) = match for_parsing.rfind('/') {
            Some(idx) => (&for_parsing[..=idx], &for_parsing[idx + 1..]),
            None => ("", for_parsing),
        };

        let mut name = name.to_string();
        if is_dir && !name.is_empty() && !name.ends_with('/') {
            name.push('/');
        }
        (parent.to_string(), name)
    };

    Resource {
        parent_path,
        name,
        size: (!is_dir).then_some(size),
        resource_type: if is_dir {
            ResourceType::Directory
        } else {
            ResourceType::File
        },
    }
}
