use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::github::{GithubClient, SearchQuery};

/// File name for a persisted search page, e.g. `repos_page_03.json`.
pub fn page_file_name(page: u32) -> String {
    format!("repos_page_{page:02}.json")
}

/// Fetch `pages` consecutive search pages and write each response verbatim.
///
/// Any request or write failure aborts the run. Existing page files with the
/// same names are overwritten.
pub async fn collect_pages(
    client: &GithubClient,
    query: &str,
    pages: u32,
    per_page: u32,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut written = Vec::with_capacity(pages as usize);
    for page in 1..=pages {
        let body = client
            .search_page(&SearchQuery::new(query, page, per_page))
            .await
            .with_context(|| format!("Failed to fetch search page {page}"))?;

        let path = out_dir.join(page_file_name(page));
        let data = serde_json::to_string_pretty(&body)?;
        std::fs::write(&path, data)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(page, path = %path.display(), "Saved search page");
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_file_name_is_zero_padded() {
        assert_eq!(page_file_name(1), "repos_page_01.json");
        assert_eq!(page_file_name(10), "repos_page_10.json");
    }

    #[test]
    fn test_page_file_names_sort_numerically() {
        let mut names: Vec<String> = (1..=10).rev().map(page_file_name).collect();
        names.sort();
        assert_eq!(names.first().unwrap(), "repos_page_01.json");
        assert_eq!(names.last().unwrap(), "repos_page_10.json");
    }
}
