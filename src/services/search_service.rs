//! Case-insensitive substring search over a user's whole namespace.
//!
//! There is no index: every key under the user prefix is scanned. Besides
//! the objects themselves, each parent path segment is tested too, so
//! directories show up in results even when no marker object exists for
//! them.

use super::{PathService, StorageResult, StoreContext, backend, resource_info};
use crate::models::{Resource, UserId};
use std::collections::HashSet;
use tracing::info;

pub const MAX_SEARCH_RESULTS: usize = 100;

#[derive(Clone)]
pub struct SearchService {
    ctx: StoreContext,
    paths: PathService,
}

impl SearchService {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            ctx,
            paths: PathService,
        }
    }

    /// Resources whose basename contains `query` (ignoring case), plus every
    /// ancestor directory segment that matches, each reported once. At most
    /// [`MAX_SEARCH_RESULTS`] entries, in store listing order.
    pub async fn search_user_files(&self, user: UserId, query: &str) -> StorageResult<Vec<Resource>> {
        self.paths.validate_path(query)?;

        let user_prefix = self.paths.build_user_path(user, "");
        let lower_query = query.to_lowercase();

        let entries = self
            .ctx
            .list_recursive(&user_prefix)
            .await
            .map_err(backend(format!("Failed to search files: {}", query)))?;

        let mut results: Vec<Resource> = Vec::new();
        let mut found_paths: HashSet<String> = HashSet::new();

        for entry in entries {
            let relative = self.paths.strip_user_path(&entry.key, user);
            if relative.is_empty() {
                continue;
            }

            let is_dir = entry.is_dir || entry.key.ends_with('/');
            let resource = resource_info::build(relative, entry.size, is_dir);

            let parent_path = resource.parent_path.clone();
            if resource.name.to_lowercase().contains(&lower_query)
                && found_paths.insert(resource.full_path())
            {
                results.push(resource);
            }

            if !parent_path.is_empty() {
                collect_matching_folders(&parent_path, &lower_query, &mut found_paths, &mut results);
            }

            if results.len() >= MAX_SEARCH_RESULTS {
                break;
            }
        }

        results.truncate(MAX_SEARCH_RESULTS);

        let folders = results.iter().filter(|r| r.is_directory()).count();
        info!(
            "Search completed for user {}: query='{}', found {} results ({} files, {} folders)",
            user,
            query,
            results.len(),
            results.len() - folders,
            folders
        );

        Ok(results)
    }
}

/// For `Documents/Reports/` test `Documents` and `Reports` against the query
/// and synthesize a directory resource for each match.
fn collect_matching_folders(
    parent_path: &str,
    lower_query: &str,
    found_paths: &mut HashSet<String>,
    results: &mut Vec<Resource>,
) {
    let mut current = String::new();

    for segment in parent_path.split('/').filter(|s| !s.is_empty()) {
        if segment.to_lowercase().contains(lower_query) {
            let folder_path = format!("{}{}/", current, segment);
            if !found_paths.contains(&folder_path) {
                results.push(resource_info::build(&folder_path, 0, true));
                found_paths.insert(folder_path);
            }
        }
        current.push_str(segment);
        current.push('/');
    }
}
