//! End-to-end integration tests for Strongbox
//!
//! Covers the documented usage scenarios plus a randomized workload that is
//! checked against an in-memory model of what every file should contain.

use ::strongbox::*;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing::info;

static NEXT_REPO: AtomicUsize = AtomicUsize::new(0);

/// Unique in-memory URI for one test
pub fn unique_mem_uri(prefix: &str) -> String {
    format!("mem://{}-{}", prefix, NEXT_REPO.fetch_add(1, Ordering::Relaxed))
}

/// Test harness driving a repository and a model of its expected content
pub struct StrongboxTestHarness {
    pub temp_dir: Option<TempDir>,
    pub uri: String,
    pub repo: Option<Repo>,
    pub file_generator: FileGenerator,
    pub model: BTreeMap<String, Vec<u8>>,
    pub operation_log: Vec<TestOperation>,
}

#[derive(Debug, Clone)]
pub enum TestOperation {
    CreateFile { path: String, len: usize },
    ModifyFile { path: String, offset: u64, len: usize },
    DeleteFile { path: String },
    Reopen,
}

impl StrongboxTestHarness {
    /// Harness over an in-memory repository
    pub fn in_memory() -> Self {
        strongbox::init_env().unwrap();
        let uri = unique_mem_uri("harness");
        Self::create(None, uri)
    }

    /// Harness over a repository in a temporary directory
    pub fn on_disk() -> Self {
        strongbox::init_env().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let uri = format!("file://{}", temp_dir.path().join("repo").display());
        Self::create(Some(temp_dir), uri)
    }

    fn create(temp_dir: Option<TempDir>, uri: String) -> Self {
        let repo = RepoOpener::new()
            .create_new(true)
            .version_limit(3)
            .compress(true)
            .open(&uri, "harness-pwd")
            .unwrap();
        Self {
            temp_dir,
            uri,
            repo: Some(repo),
            file_generator: FileGenerator::new(42),
            model: BTreeMap::new(),
            operation_log: Vec::new(),
        }
    }

    pub fn repo(&self) -> &Repo {
        self.repo.as_ref().unwrap()
    }

    /// Close and reopen the repository
    pub fn reopen(&mut self) -> anyhow::Result<()> {
        if let Some(repo) = self.repo.take() {
            repo.close()?;
        }
        self.repo = Some(RepoOpener::new().open(&self.uri, "harness-pwd")?);
        self.operation_log.push(TestOperation::Reopen);
        Ok(())
    }

    /// Create a directory structure with files of random content
    pub fn generate_project(&mut self, config: ProjectConfig) -> anyhow::Result<()> {
        for dir_idx in 0..config.dirs {
            let dir = format!("/dir_{}/sub_{}", dir_idx, dir_idx % 2);
            self.repo().create_dir_all(&dir)?;

            for file_idx in 0..config.files_per_dir {
                let path = format!("{}/file_{}.bin", dir, file_idx);
                let content = self.file_generator.generate_content(config.file_size_range.clone());
                let mut file = self.repo().create_file(&path)?;
                file.write_once(&content)?;

                self.operation_log.push(TestOperation::CreateFile {
                    path: path.clone(),
                    len: content.len(),
                });
                self.model.insert(path, content);
            }
        }
        Ok(())
    }

    /// Apply random overwrites, truncations and deletions
    pub fn mutate_files(&mut self, num_mutations: usize) -> anyhow::Result<usize> {
        let mut applied = 0;
        for _ in 0..num_mutations {
            if self.model.is_empty() {
                break;
            }
            let idx = self.file_generator.rng.random_range(0..self.model.len());
            let path = self.model.keys().nth(idx).cloned().unwrap_or_default();

            match self.file_generator.rng.random_range(0..4) {
                0 | 1 => {
                    let expected = self.model.get_mut(&path).unwrap();
                    let offset = self.file_generator.rng.random_range(0..=expected.len() + 100) as u64;
                    let patch = self.file_generator.generate_content(1..5_000);

                    let repo = self.repo.as_ref().unwrap();
                    let mut file = repo.open_file(&path)?;
                    file.seek(SeekFrom::Start(offset))?;
                    file.write_all(&patch)?;
                    file.finish()?;

                    let end = offset as usize + patch.len();
                    if expected.len() < end {
                        expected.resize(end, 0);
                    }
                    expected[offset as usize..end].copy_from_slice(&patch);
                    self.operation_log.push(TestOperation::ModifyFile {
                        path,
                        offset,
                        len: patch.len(),
                    });
                }
                2 => {
                    let expected = self.model.get_mut(&path).unwrap();
                    let new_len = self.file_generator.rng.random_range(0..=expected.len());
                    let repo = self.repo.as_ref().unwrap();
                    let mut file = repo.open_file(&path)?;
                    file.set_len(new_len as u64)?;
                    file.finish()?;
                    expected.truncate(new_len);
                }
                _ => {
                    self.repo().remove_file(&path)?;
                    self.model.remove(&path);
                    self.operation_log.push(TestOperation::DeleteFile { path });
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Compare every file against the model
    pub fn verify(&self) -> anyhow::Result<()> {
        for (path, expected) in &self.model {
            let mut file = self.repo().open_file(path)?;
            let mut actual = Vec::new();
            file.read_to_end(&mut actual)?;
            anyhow::ensure!(&actual == expected, "content mismatch in {}", path);
            anyhow::ensure!(
                file.metadata()?.len == expected.len() as u64,
                "length mismatch in {}",
                path
            );
        }
        Ok(())
    }
}

/// Deterministic content generator
pub struct FileGenerator {
    pub rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Random bytes, half of the time with long runs that compress well
    pub fn generate_content(&mut self, size_range: std::ops::Range<usize>) -> Vec<u8> {
        let size = self.rng.random_range(size_range);
        let mut content = vec![0u8; size];
        if self.rng.random_bool(0.5) {
            self.rng.fill_bytes(&mut content);
        } else {
            let fill: u8 = self.rng.random();
            content.fill(fill);
        }
        content
    }
}

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub dirs: usize,
    pub files_per_dir: usize,
    pub file_size_range: std::ops::Range<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_scenario_write_finish_read() {
        strongbox::init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .version_limit(2)
            .open("mem://repo", "pwd")
            .unwrap();

        let mut file = repo.create_file("/file").unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        file.finish().unwrap();
        assert_eq!(file.history().unwrap().len(), 2);

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 3];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_scenario_create_dir_all() {
        strongbox::init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .open(&unique_mem_uri("dir-all"), "pwd")
            .unwrap();

        repo.create_dir_all("/a/b/c").unwrap();
        assert!(repo.is_dir("/a"));
        assert!(repo.is_dir("/a/b"));
        assert!(repo.is_dir("/a/b/c"));

        let entries = repo.read_dir("/a").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name(), "b");
        assert_eq!(entries[0].path(), std::path::Path::new("/a/b"));
    }

    #[test]
    fn test_scenario_reset_password() {
        strongbox::init_env().unwrap();
        let uri = unique_mem_uri("reset");
        let repo = RepoOpener::new().create(true).open(&uri, "old").unwrap();
        let mut f = repo.create_file("/kept").unwrap();
        f.write_once(b"still readable").unwrap();
        drop(f);

        let err = repo
            .reset_password("wrong", "new", OpsLimit::Interactive, MemLimit::Interactive)
            .unwrap_err();
        assert!(matches!(err, StrongboxError::WrongPassword));
        repo.close().unwrap();

        // The old password still opens the repository
        let repo = RepoOpener::new().open(&uri, "old").unwrap();
        repo.reset_password("old", "new", OpsLimit::Moderate, MemLimit::Interactive)
            .unwrap();
        assert_eq!(repo.info().ops_limit, OpsLimit::Moderate);
        repo.close().unwrap();

        assert!(matches!(
            RepoOpener::new().open(&uri, "old"),
            Err(StrongboxError::WrongPassword)
        ));
        let repo = RepoOpener::new().open(&uri, "new").unwrap();
        assert_eq!(repo.open_file("/kept").unwrap().read_to_vec().unwrap(), b"still readable");
    }

    #[test]
    fn test_scenario_remove_dir() {
        strongbox::init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .open(&unique_mem_uri("remove-dir"), "pwd")
            .unwrap();
        repo.create_dir_all("/d/sub").unwrap();
        repo.create_file("/d/sub/f").unwrap().write_once(b"x").unwrap();

        assert!(matches!(repo.remove_dir("/d"), Err(StrongboxError::NotEmpty(_))));
        repo.remove_dir_all("/d").unwrap();
        for path in ["/d", "/d/sub", "/d/sub/f"] {
            assert!(!repo.path_exists(path));
        }
    }

    #[test]
    fn test_read_dir_creation_order() {
        strongbox::init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .open(&unique_mem_uri("order"), "pwd")
            .unwrap();
        repo.create_file("/file").unwrap();
        repo.create_dir("/dir").unwrap();
        repo.create_dir("/dir1").unwrap();

        let names: Vec<String> = repo
            .read_dir("/")
            .unwrap()
            .into_iter()
            .map(|e| e.file_name().to_string())
            .collect();
        assert_eq!(names, vec!["file", "dir", "dir1"]);
    }

    #[test]
    fn test_copy_starts_fresh_history() {
        strongbox::init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .version_limit(5)
            .open(&unique_mem_uri("copy"), "pwd")
            .unwrap();
        let mut src = repo.create_file("/src").unwrap();
        src.write_once(b"one").unwrap();
        src.write_once(b"two").unwrap();

        repo.copy("/src", "/dst").unwrap();
        let dst = repo.open_file("/dst").unwrap();
        assert_eq!(dst.history().unwrap().len(), 1);
        assert_eq!(dst.curr_version().unwrap(), 1);

        // The copy is independent of later source writes
        src.write_once(b"three").unwrap();
        assert_eq!(repo.open_file("/dst").unwrap().read_to_vec().unwrap(), b"two");

        assert!(matches!(repo.copy("/missing", "/x"), Err(StrongboxError::NotFound(_))));
        repo.create_dir("/d").unwrap();
        assert!(matches!(repo.copy("/d", "/x"), Err(StrongboxError::IsDir(_))));
    }

    #[test]
    fn test_copy_dir_all() {
        strongbox::init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .open(&unique_mem_uri("copy-dir"), "pwd")
            .unwrap();
        repo.create_dir_all("/src/nested").unwrap();
        repo.create_file("/src/a").unwrap().write_once(b"a").unwrap();
        repo.create_file("/src/nested/b").unwrap().write_once(b"b").unwrap();

        repo.copy_dir_all("/src", "/dst").unwrap();
        assert_eq!(repo.open_file("/dst/a").unwrap().read_to_vec().unwrap(), b"a");
        assert_eq!(repo.open_file("/dst/nested/b").unwrap().read_to_vec().unwrap(), b"b");

        repo.remove_dir_all("/src").unwrap();
        assert_eq!(repo.open_file("/dst/nested/b").unwrap().read_to_vec().unwrap(), b"b");
    }

    #[test]
    fn test_version_reader_after_new_versions() {
        strongbox::init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .version_limit(2)
            .open(&unique_mem_uri("reader"), "pwd")
            .unwrap();
        let mut f = repo.create_file("/f").unwrap();
        f.write_once(b"version two").unwrap();

        let mut reader = f.version_reader(2).unwrap();
        for content in [&b"three"[..], b"four", b"five"] {
            f.write_once(content).unwrap();
        }

        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "version two");
        assert_eq!(f.history().unwrap().len(), 2);
    }

    #[test]
    fn test_dedup_chunk_across_reopen() {
        strongbox::init_env().unwrap();
        let uri = unique_mem_uri("dedup-chunk");
        let repo = RepoOpener::new()
            .create(true)
            .dedup_chunk(true)
            .version_limit(2)
            .open(&uri, "pwd")
            .unwrap();

        let mut content = vec![0u8; 600_000];
        StdRng::seed_from_u64(7).fill_bytes(&mut content);
        let mut f = repo.create_file("/big").unwrap();
        f.write_once(&content).unwrap();

        // Splice bytes into the middle through a partial rewrite
        let tail = content.split_off(300_000);
        content.extend_from_slice(b"spliced in");
        content.extend_from_slice(&tail);
        f.seek(SeekFrom::Start(300_000)).unwrap();
        f.write_all(&content[300_000..]).unwrap();
        f.finish().unwrap();
        drop(f);
        repo.close().unwrap();

        let repo = RepoOpener::new().open(&uri, "pwd").unwrap();
        assert!(repo.info().dedup_chunk);
        let mut f = repo.open_file("/big").unwrap();
        assert_eq!(f.read_to_vec().unwrap(), content);
        assert_eq!(f.history().unwrap().len(), 2);

        let mut old = Vec::new();
        f.version_reader(2).unwrap().read_to_end(&mut old).unwrap();
        assert_eq!(old.len(), 600_000);
        assert_eq!(&old[..300_000], &content[..300_000]);
    }

    #[test]
    #[traced_test]
    fn test_randomized_workload_in_memory() {
        let mut harness = StrongboxTestHarness::in_memory();
        harness
            .generate_project(ProjectConfig {
                dirs: 3,
                files_per_dir: 4,
                file_size_range: 0..150_000,
            })
            .unwrap();
        harness.verify().unwrap();

        for round in 0..3 {
            let applied = harness.mutate_files(15).unwrap();
            info!("Round {}: applied {} mutations", round, applied);
            harness.verify().unwrap();
            harness.reopen().unwrap();
            harness.verify().unwrap();
        }
        assert!(!harness.operation_log.is_empty());
    }

    #[test]
    fn test_randomized_workload_on_disk() {
        let mut harness = StrongboxTestHarness::on_disk();
        harness
            .generate_project(ProjectConfig {
                dirs: 2,
                files_per_dir: 3,
                file_size_range: 0..100_000,
            })
            .unwrap();

        harness.mutate_files(10).unwrap();
        harness.reopen().unwrap();
        harness.verify().unwrap();
        assert!(harness.temp_dir.as_ref().unwrap().path().join("repo/layout.json").exists());
    }
}
