use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs;
use std::io::Write as IoWrite;
use std::path::Path;
use tempfile::TempDir;
use treecmp_common::{AppConfig, ResultBuilder};
use treecmp_core::comparison::pair_indices;
use treecmp_core::{ComparisonEngine, FolderScanner, TextDiffEngine};

// Three subdirectories per level, `files_per_dir` text files in each
fn create_test_tree(root: &Path, depth: usize, files_per_dir: usize, lines: usize) {
    if depth == 0 {
        return;
    }

    for i in 0..files_per_dir {
        let mut file = fs::File::create(root.join(format!("file_{}.txt", i))).unwrap();
        for line in 0..lines {
            writeln!(file, "line {} of file {}", line, i).unwrap();
        }
    }

    if depth > 1 {
        for i in 0..3 {
            let dir_path = root.join(format!("subdir_{}", i));
            fs::create_dir(&dir_path).unwrap();
            create_test_tree(&dir_path, depth - 1, files_per_dir, lines);
        }
    }
}

fn bench_scanner(c: &mut Criterion) {
    let mut group = c.benchmark_group("scanner_index");

    for depth in [1usize, 2, 3].iter() {
        let temp = TempDir::new().unwrap();
        create_test_tree(temp.path(), *depth, 10, 4);
        let scanner = FolderScanner::new(&AppConfig::default());

        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| black_box(scanner.index(black_box(temp.path())).unwrap()));
        });
    }
    group.finish();
}

fn bench_scanner_with_custom_ignore(c: &mut Criterion) {
    c.bench_function("scanner_custom_ignore", |b| {
        let temp = TempDir::new().unwrap();
        create_test_tree(temp.path(), 3, 10, 4);
        let config = AppConfig {
            ignore_patterns: vec!["subdir_1/".to_string(), "file_3.txt".to_string()],
            ..AppConfig::default()
        };
        let scanner = FolderScanner::new(&config);

        b.iter(|| black_box(scanner.index(black_box(temp.path())).unwrap()));
    });
}

fn bench_pairing(c: &mut Criterion) {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    create_test_tree(source.path(), 3, 20, 1);
    create_test_tree(target.path(), 2, 30, 1);

    let scanner = FolderScanner::new(&AppConfig::default());
    let source_index = scanner.index(source.path()).unwrap();
    let target_index = scanner.index(target.path()).unwrap();

    c.bench_function("pair_indices", |b| {
        b.iter(|| black_box(pair_indices(&source_index, &target_index)));
    });
}

fn bench_text_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_diff");

    for lines in [100usize, 1_000, 10_000].iter() {
        let source: String = (0..*lines).map(|i| format!("row {}\n", i)).collect();
        let target: String = (0..*lines)
            .map(|i| if i % 10 == 0 { format!("changed {}\n", i) } else { format!("row {}\n", i) })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, _| {
            b.iter(|| {
                let mut result = ResultBuilder::new("bench.txt", "TXT");
                TextDiffEngine::new().compare_text(black_box(&source), black_box(&target), &mut result);
                black_box(result.finish())
            });
        });
    }
    group.finish();
}

fn bench_compare_trees(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare_trees");
    group.sample_size(20);

    for jobs in [1usize, 4].iter() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        create_test_tree(source.path(), 3, 10, 50);
        create_test_tree(target.path(), 3, 10, 50);
        let engine = ComparisonEngine::new(&AppConfig::default()).with_jobs(Some(*jobs));

        group.bench_with_input(BenchmarkId::from_parameter(jobs), jobs, |b, _| {
            b.iter(|| black_box(engine.compare_trees(source.path(), target.path()).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    scanner_benches,
    bench_scanner,
    bench_scanner_with_custom_ignore,
    bench_pairing
);

criterion_group!(comparison_benches, bench_text_diff, bench_compare_trees);

criterion_main!(scanner_benches, comparison_benches);
