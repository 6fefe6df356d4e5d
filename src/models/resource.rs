//! The virtual file-or-directory entity exposed to callers.
//!
//! A `Resource` is never persisted; it is always decoded from an object key
//! (see `services::resource_info`).

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    File,
    Directory,
}

/// Descriptor of a file or directory inside a user's namespace.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    /// Parent path, always empty or ending in `/`.
    #[serde(rename = "path")]
    pub parent_path: String,

    /// Basename; ends in `/` iff this is a directory.
    pub name: String,

    /// Byte size, present only for files.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

impl Resource {
    /// Parent path and name joined back into the user-relative path.
    pub fn full_path(&self) -> String {
        format!("{}{}", self.parent_path, self.name)
    }

    pub fn is_directory(&self) -> bool {
        self.resource_type == ResourceType::Directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_serializes_with_size_and_upper_case_type() {
        let resource = Resource {
            parent_path: "docs/".into(),
            name: "readme.txt".into(),
            size: Some(5),
            resource_type: ResourceType::File,
        };

        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "path": "docs/",
                "name": "readme.txt",
                "size": 5,
                "type": "FILE"
            })
        );
    }

    #[test]
    fn directory_omits_size() {
        let resource = Resource {
            parent_path: "".into(),
            name: "docs/".into(),
            size: None,
            resource_type: ResourceType::Directory,
        };

        let json = serde_json::to_value(&resource).unwrap();
        assert!(json.get("size").is_none());
        assert_eq!(json["type"], "DIRECTORY");
        assert_eq!(resource.full_path(), "docs/");
    }
}
