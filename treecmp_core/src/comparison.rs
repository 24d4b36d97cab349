use crate::dispatch::{extension_tag, ComparatorRegistry};
use crate::scanner::{DirectoryIndex, FolderScanner};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use treecmp_common::{AppConfig, ComparisonResult, ResultBuilder, TreeCmpError};

/// Called once per finished result, from worker threads
pub type ProgressCallback = Box<dyn Fn(&ComparisonResult) + Send + Sync>;

/// Where a relative path was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pairing {
    Common { source: PathBuf, target: PathBuf },
    SourceOnly,
    TargetOnly,
}

/// One entry of the reconciled path union
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPair {
    pub relative_path: String,
    pub pairing: Pairing,
}

/// Merge two indices into the sorted union of their relative paths
pub fn pair_indices(source: &DirectoryIndex, target: &DirectoryIndex) -> Vec<PathPair> {
    let mut pairs = Vec::with_capacity(source.len().max(target.len()));
    let mut left = source.iter().peekable();
    let mut right = target.iter().peekable();

    loop {
        let heads = (left.peek().copied(), right.peek().copied());
        let pair = match heads {
            (Some((lk, lp)), Some((rk, rp))) => match lk.cmp(rk) {
                std::cmp::Ordering::Equal => {
                    let pair = PathPair {
                        relative_path: lk.to_string(),
                        pairing: Pairing::Common {
                            source: lp.to_path_buf(),
                            target: rp.to_path_buf(),
                        },
                    };
                    left.next();
                    right.next();
                    pair
                }
                std::cmp::Ordering::Less => {
                    left.next();
                    PathPair {
                        relative_path: lk.to_string(),
                        pairing: Pairing::SourceOnly,
                    }
                }
                std::cmp::Ordering::Greater => {
                    right.next();
                    PathPair {
                        relative_path: rk.to_string(),
                        pairing: Pairing::TargetOnly,
                    }
                }
            },
            (Some((lk, _)), None) => {
                left.next();
                PathPair {
                    relative_path: lk.to_string(),
                    pairing: Pairing::SourceOnly,
                }
            }
            (None, Some((rk, _))) => {
                right.next();
                PathPair {
                    relative_path: rk.to_string(),
                    pairing: Pairing::TargetOnly,
                }
            }
            (None, None) => break,
        };
        pairs.push(pair);
    }

    pairs
}

/// Comparison engine for reconciling two file trees
pub struct ComparisonEngine {
    registry: ComparatorRegistry,
    scanner: FolderScanner,
    jobs: Option<usize>,
    progress: Option<ProgressCallback>,
}

impl ComparisonEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            registry: ComparatorRegistry::new(),
            scanner: FolderScanner::new(config),
            jobs: config.jobs,
            progress: None,
        }
    }

    pub fn with_registry(mut self, registry: ComparatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Worker count; `None` uses one thread per core
    pub fn with_jobs(mut self, jobs: Option<usize>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn scanner(&self) -> &FolderScanner {
        &self.scanner
    }

    /// Produce one result per relative path in the union of both trees,
    /// ordered lexicographically by path.
    ///
    /// A missing or unreadable root fails the whole run.
    pub fn compare_trees(
        &self,
        source_root: &Path,
        target_root: &Path,
    ) -> Result<Vec<ComparisonResult>, TreeCmpError> {
        let source = self.scanner.index(source_root)?;
        let target = self.scanner.index(target_root)?;
        info!(
            "Comparing {} source files with {} target files",
            source.len(),
            target.len()
        );

        let pairs = pair_indices(&source, &target);
        let results = self.compare_pairs(&pairs)?;

        debug!("Generated {} comparison results", results.len());
        Ok(results)
    }

    /// Compare an already reconciled pairing list, preserving its order
    pub fn compare_pairs(&self, pairs: &[PathPair]) -> Result<Vec<ComparisonResult>, TreeCmpError> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(jobs) = self.jobs {
            builder = builder.num_threads(jobs);
        }
        let pool = builder
            .build()
            .map_err(|e| TreeCmpError::Comparison(format!("Failed to start worker pool: {}", e)))?;

        Ok(pool.install(|| pairs.par_iter().map(|pair| self.compare_pair(pair)).collect()))
    }

    fn compare_pair(&self, pair: &PathPair) -> ComparisonResult {
        let detected_type = extension_tag(Path::new(&pair.relative_path));
        let result = match &pair.pairing {
            Pairing::Common { source, target } => {
                let comparator = self.registry.for_path(source);
                debug!("Comparing {} as {:?}", pair.relative_path, comparator.kind());
                comparator.compare(
                    source,
                    target,
                    ResultBuilder::new(pair.relative_path.as_str(), detected_type),
                )
            }
            Pairing::SourceOnly => {
                ComparisonResult::missing_in_target(pair.relative_path.as_str(), detected_type)
            }
            Pairing::TargetOnly => {
                ComparisonResult::missing_in_source(pair.relative_path.as_str(), detected_type)
            }
        };

        if let Some(progress) = &self.progress {
            progress(&result);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use treecmp_common::{MISSING_IN_SOURCE, MISSING_IN_TARGET};

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn engine() -> ComparisonEngine {
        ComparisonEngine::new(&AppConfig::default()).with_jobs(Some(2))
    }

    #[test]
    fn test_identical_trees() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        for root in [source.path(), target.path()] {
            write(root, "a.txt", "hello\nworld\n");
            write(root, "nested/data.csv", "a,b\n1,2\n");
        }

        let results = engine().compare_trees(source.path(), target.path()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.identical && r.differences.is_empty()));
        assert_eq!(results[0].path, "a.txt");
        assert_eq!(results[1].path, "nested/data.csv");
        assert_eq!(results[1].detected_type, "CSV");
    }

    #[test]
    fn test_one_sided_files() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "only_source.txt", "x");
        write(target.path(), "only_target.txt", "y");

        let results = engine().compare_trees(source.path(), target.path()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, "only_source.txt");
        assert_eq!(results[0].differences, vec![MISSING_IN_TARGET.to_string()]);
        assert!(!results[0].identical);
        assert_eq!(results[1].differences, vec![MISSING_IN_SOURCE.to_string()]);
        assert!(!results[1].identical);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let source = TempDir::new().unwrap();
        let err = engine()
            .compare_trees(source.path(), &source.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, TreeCmpError::Path(_)));
    }

    #[test]
    fn test_pair_indices_order() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "b.txt", "");
        write(source.path(), "c.txt", "");
        write(target.path(), "a.txt", "");
        write(target.path(), "c.txt", "");

        let scanner = FolderScanner::new(&AppConfig::default());
        let pairs = pair_indices(
            &scanner.index(source.path()).unwrap(),
            &scanner.index(target.path()).unwrap(),
        );
        let summary: Vec<(&str, bool, bool)> = pairs
            .iter()
            .map(|p| {
                (
                    p.relative_path.as_str(),
                    matches!(p.pairing, Pairing::SourceOnly),
                    matches!(p.pairing, Pairing::TargetOnly),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![("a.txt", false, true), ("b.txt", true, false), ("c.txt", false, false)]
        );
    }

    #[test]
    fn test_progress_called_per_result() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        for name in ["1.txt", "2.txt", "3.txt"] {
            write(source.path(), name, "same");
            write(target.path(), name, "same");
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let engine = engine().with_progress(Box::new(move |_: &ComparisonResult| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        engine.compare_trees(source.path(), target.path()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_ignore_patterns_apply_to_both_trees() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(source.path(), "keep.txt", "a");
        write(target.path(), "keep.txt", "a");
        write(source.path(), "build/out.log", "noise");

        let config = AppConfig {
            ignore_patterns: vec!["build/".to_string()],
            ..AppConfig::default()
        };
        let results = ComparisonEngine::new(&config)
            .compare_trees(source.path(), target.path())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].identical);
    }
}
