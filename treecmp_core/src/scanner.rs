use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use treecmp_common::{AppConfig, TreeCmpError};

/// Relative path → absolute file path for one tree.
///
/// Keys are forward-slash separated and iterate in lexicographic order.
#[derive(Debug, Clone, Default)]
pub struct DirectoryIndex {
    root: PathBuf,
    files: BTreeMap<String, PathBuf>,
}

impl DirectoryIndex {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, relative_path: &str) -> Option<&Path> {
        self.files.get(relative_path).map(PathBuf::as_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.files.contains_key(relative_path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }
}

/// Builds [`DirectoryIndex`]es using jwalk
pub struct FolderScanner {
    custom_ignore: Option<Gitignore>,
}

impl FolderScanner {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            custom_ignore: Self::build_custom_ignore(config),
        }
    }

    /// Compile the configured patterns, matched against paths relative to
    /// each tree root. Invalid patterns are skipped with a warning so the
    /// remaining ones still apply.
    fn build_custom_ignore(config: &AppConfig) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new("");
        let mut accepted = 0usize;

        for pattern in &config.ignore_patterns {
            match builder.add_line(None, pattern) {
                Ok(_) => accepted += 1,
                Err(err) => warn!("Skipping invalid ignore pattern '{}': {}", pattern, err),
            }
        }
        if accepted == 0 {
            return None;
        }

        match builder.build() {
            Ok(ignore) => {
                debug!("Applying {} of {} ignore patterns", accepted, config.ignore_patterns.len());
                Some(ignore)
            }
            Err(err) => {
                warn!("Ignore patterns disabled: {}", err);
                None
            }
        }
    }

    /// Index every regular file below `root`.
    ///
    /// Directories and symlinks are not indexed. A missing or unreadable root
    /// is an error, as is any walk failure below it.
    pub fn index(&self, root: &Path) -> Result<DirectoryIndex, TreeCmpError> {
        let metadata = fs::metadata(root).map_err(|e| {
            TreeCmpError::Path(format!("Cannot access directory {}: {}", root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(TreeCmpError::Path(format!(
                "Not a directory: {}",
                root.display()
            )));
        }
        fs::read_dir(root).map_err(|e| {
            TreeCmpError::Path(format!("Cannot read directory {}: {}", root.display(), e))
        })?;

        let mut files = BTreeMap::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .skip_hidden(false)
            .sort(true);

        for entry in walker {
            let entry = entry.map_err(|e| {
                TreeCmpError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Walk error: {}", e),
                ))
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|e| TreeCmpError::Path(e.to_string()))?;

            if self.should_ignore_with_parents(relative) {
                continue;
            }

            files.insert(relative_key(relative), path.clone());
        }

        debug!("Indexed {} files under {:?}", files.len(), root);
        Ok(DirectoryIndex {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Check if a file or any of its parent directories should be ignored
    fn should_ignore_with_parents(&self, path: &Path) -> bool {
        let Some(ref custom_ignore) = self.custom_ignore else {
            return false;
        };

        if custom_ignore.matched(path, false).is_ignore() {
            return true;
        }

        let mut current = path;
        while let Some(parent) = current.parent() {
            if !parent.as_os_str().is_empty() && custom_ignore.matched(parent, true).is_ignore() {
                return true;
            }
            current = parent;
        }
        false
    }
}

/// Join path components with `/` regardless of the host separator
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Number of regular files below `dir`, or 0 if it cannot be walked
pub fn count_files(dir: &Path) -> usize {
    FolderScanner::new(&AppConfig::default())
        .index(dir)
        .map(|index| index.len())
        .unwrap_or(0)
}
