//! Project tree walking with a deterministic file order.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::debug;

use crate::error::Result;
use crate::languages::LanguageGrammar;

pub struct FileWalker<'a> {
    excluded_dirs: &'a [String],
}

impl<'a> FileWalker<'a> {
    pub fn new(excluded_dirs: &'a [String]) -> Self {
        Self { excluded_dirs }
    }

    /// Returns every file under `root` matching the grammar's extensions,
    /// sorted by path. The sort keeps resume cursors meaningful between
    /// runs.
    pub fn collect(&self, root: &Path, grammar: &dyn LanguageGrammar) -> Result<Vec<PathBuf>> {
        let extensions = grammar.file_extensions();
        // filter_entry wants a 'static closure, so it gets its own copy.
        let excluded: Vec<String> = self.excluded_dirs.to_vec();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !excluded.iter().any(|d| d.as_str() == name.as_ref())
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    debug!(%err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.into_path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false);
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Path relative to the project root, with forward slashes.
pub fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::php::PhpGrammar;
    use std::fs;

    fn create_file(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_collects_matching_extensions_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        create_file(dir.path(), "src/b.php", "<?php");
        create_file(dir.path(), "src/a.php", "<?php");
        create_file(dir.path(), "src/ignore.js", "x");

        let excluded = Vec::new();
        let files = FileWalker::new(&excluded)
            .collect(dir.path(), &PhpGrammar)
            .unwrap();
        let rels: Vec<String> = files.iter().map(|f| rel_path(dir.path(), f)).collect();
        assert_eq!(rels, vec!["src/a.php", "src/b.php"]);
    }

    #[test]
    fn test_excluded_dirs_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        create_file(dir.path(), "app/main.php", "<?php");
        create_file(dir.path(), "vendor/lib.php", "<?php");

        let excluded = vec!["vendor".to_string()];
        let files = FileWalker::new(&excluded)
            .collect(dir.path(), &PhpGrammar)
            .unwrap();
        let rels: Vec<String> = files.iter().map(|f| rel_path(dir.path(), f)).collect();
        assert_eq!(rels, vec!["app/main.php"]);
    }
}
