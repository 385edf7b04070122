//! Chaos testing framework for Strongbox
//!
//! Exercises the repository under adverse conditions: a backend that starts
//! failing halfway through an operation, concurrent writers and readers, and
//! records damaged at rest.

use ::strongbox::storage::{MetaKey, Storage};
use ::strongbox::types::ContentId;
use ::strongbox::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, warn};

/// Backend wrapper that fails writes on demand
#[derive(Debug, Default)]
pub struct FaultyStorage {
    inner: MemStorage,
    fail_blocks: AtomicBool,
    fail_meta: AtomicBool,
    injected: AtomicUsize,
}

impl FaultyStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every block write fail
    pub fn break_blocks(&self, broken: bool) {
        self.fail_blocks.store(broken, Ordering::SeqCst);
    }

    /// Make every metadata write fail
    pub fn break_meta(&self, broken: bool) {
        self.fail_meta.store(broken, Ordering::SeqCst);
    }

    /// Number of failures handed out so far
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.inner.object_count()
    }

    fn fault(&self, flag: &AtomicBool, what: &str) -> strongbox::Result<()> {
        if flag.load(Ordering::SeqCst) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StrongboxError::backend(format!("injected {} failure", what)));
        }
        Ok(())
    }
}

impl Storage for FaultyStorage {
    fn exists(&self) -> strongbox::Result<bool> {
        self.inner.exists()
    }

    fn init(&self) -> strongbox::Result<()> {
        self.inner.init()
    }

    fn lock(&self, force: bool) -> strongbox::Result<()> {
        self.inner.lock(force)
    }

    fn unlock(&self) -> strongbox::Result<()> {
        self.inner.unlock()
    }

    fn get_meta(&self, key: MetaKey) -> strongbox::Result<Vec<u8>> {
        self.inner.get_meta(key)
    }

    fn put_meta(&self, key: MetaKey, data: &[u8]) -> strongbox::Result<()> {
        self.fault(&self.fail_meta, "metadata")?;
        self.inner.put_meta(key, data)
    }

    fn get(&self, id: &ContentId) -> strongbox::Result<Vec<u8>> {
        self.inner.get(id)
    }

    fn put(&self, id: &ContentId, data: &[u8]) -> strongbox::Result<()> {
        self.fault(&self.fail_blocks, "block")?;
        self.inner.put(id, data)
    }

    fn delete(&self, id: &ContentId) -> strongbox::Result<()> {
        self.inner.delete(id)
    }
}

/// Damages records of an on-disk repository
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// All block files below a repository root
    pub fn object_files(&self, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for shard in fs::read_dir(root.join("objects"))? {
            for entry in fs::read_dir(shard?.path())? {
                files.push(entry?.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Flip one random bit in each given file
    pub fn flip_bits(&mut self, files: &[PathBuf]) -> anyhow::Result<()> {
        for path in files {
            let mut data = fs::read(path)?;
            if data.is_empty() {
                continue;
            }
            let idx = self.rng.random_range(0..data.len());
            let bit = self.rng.random_range(0..8);
            data[idx] ^= 1 << bit;
            fs::write(path, data)?;
            warn!("Corrupted {:?} at byte {}", path, idx);
        }
        Ok(())
    }
}

/// Outcome of a contention run
#[derive(Debug, Default)]
pub struct ConcurrencyTestResult {
    pub successful_writes: usize,
    pub rejected_writes: usize,
    pub reads: usize,
    pub torn_reads: usize,
}

fn open_faulty(storage: &Arc<FaultyStorage>, create: bool) -> Repo {
    init_env().unwrap();
    RepoOpener::new()
        .create(create)
        .version_limit(4)
        .open_with_storage("mem://faulty", storage.clone(), "pwd")
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_failed_finish_keeps_pending_writes() {
        let storage = FaultyStorage::new();
        let repo = open_faulty(&storage, true);
        let mut file = repo.create_file("/f").unwrap();
        file.write_once(b"stable").unwrap();
        let objects = storage.object_count();

        file.write_all(b"pending").unwrap();
        storage.break_blocks(true);
        assert!(matches!(file.finish(), Err(StrongboxError::Backend(_))));
        assert!(storage.injected() > 0);

        // Nothing changed for other readers and the writes are still pending
        assert!(file.is_dirty());
        assert_eq!(file.curr_version().unwrap(), 2);
        assert_eq!(repo.open_file("/f").unwrap().read_to_vec().unwrap(), b"stable");
        assert_eq!(storage.object_count(), objects);

        storage.break_blocks(false);
        file.finish().unwrap();
        assert_eq!(file.curr_version().unwrap(), 3);
        assert_eq!(repo.open_file("/f").unwrap().read_to_vec().unwrap(), b"pending");
    }

    #[test]
    fn test_failed_index_write_rolls_back() {
        let storage = FaultyStorage::new();
        let repo = open_faulty(&storage, true);
        repo.create_dir("/from").unwrap();
        let mut file = repo.create_file("/from/f").unwrap();
        file.write_once(b"v2").unwrap();
        let objects = storage.object_count();

        storage.break_meta(true);
        assert!(repo.rename("/from", "/to").is_err());
        assert!(repo.create_dir("/new").is_err());
        assert!(repo.remove_file("/from/f").is_err());

        // A commit whose index write fails leaves no stray blocks behind
        file.write_all(b"v3 content").unwrap();
        assert!(file.finish().is_err());
        assert_eq!(storage.object_count(), objects);

        assert!(repo.is_file("/from/f"));
        assert!(!repo.path_exists("/to"));
        assert!(!repo.path_exists("/new"));
        assert_eq!(file.curr_version().unwrap(), 2);

        storage.break_meta(false);
        file.finish().unwrap();
        repo.rename("/from", "/to").unwrap();
        drop(file);
        repo.close().unwrap();

        // The persisted index matches what the live tree showed
        let repo = open_faulty(&storage, false);
        assert!(!repo.path_exists("/from"));
        let mut reopened = repo.open_file("/to/f").unwrap();
        assert_eq!(reopened.read_to_vec().unwrap(), b"v3 content");
        assert_eq!(reopened.curr_version().unwrap(), 3);
    }

    #[test]
    fn test_failed_reset_password_keeps_old_password() {
        let storage = FaultyStorage::new();
        let repo = open_faulty(&storage, true);

        storage.break_meta(true);
        assert!(repo
            .reset_password("pwd", "new", OpsLimit::Interactive, MemLimit::Interactive)
            .is_err());
        storage.break_meta(false);
        repo.close().unwrap();

        open_faulty(&storage, false).close().unwrap();
    }

    #[test]
    fn test_single_writer_under_contention() {
        init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .version_limit(255)
            .open("mem://chaos-contention", "pwd")
            .unwrap();
        repo.create_file("/shared").unwrap();

        let successes = AtomicUsize::new(0);
        let rejections = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for t in 0..8u8 {
                let repo = &repo;
                let successes = &successes;
                let rejections = &rejections;
                scope.spawn(move || {
                    for _ in 0..10 {
                        let mut file = repo.open_file("/shared").unwrap();
                        match file.write_once(&[t; 100]) {
                            Ok(()) => successes.fetch_add(1, Ordering::SeqCst),
                            Err(StrongboxError::FileInUse(_)) => rejections.fetch_add(1, Ordering::SeqCst),
                            Err(e) => panic!("unexpected error: {}", e),
                        };
                    }
                });
            }
        });

        let result = ConcurrencyTestResult {
            successful_writes: successes.load(Ordering::SeqCst),
            rejected_writes: rejections.load(Ordering::SeqCst),
            ..Default::default()
        };
        info!("Contention result: {:?}", result);
        assert_eq!(result.successful_writes + result.rejected_writes, 80);
        assert!(result.successful_writes > 0);

        let file = repo.open_file("/shared").unwrap();
        assert_eq!(file.curr_version().unwrap(), 1 + result.successful_writes as u64);
    }

    #[test]
    fn test_readers_never_see_partial_versions() {
        init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .version_limit(32)
            .open("mem://chaos-readers", "pwd")
            .unwrap();
        const LEN: usize = 150_000;
        repo.create_file("/doc").unwrap().write_once(&vec![0u8; LEN]).unwrap();

        let torn = AtomicUsize::new(0);
        let reads = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            let repo = &repo;
            scope.spawn(move || {
                let mut file = repo.open_file("/doc").unwrap();
                for round in 1..=20u8 {
                    file.write_all(&vec![round; LEN]).unwrap();
                    file.finish().unwrap();
                }
            });
            for _ in 0..4 {
                let torn = &torn;
                let reads = &reads;
                scope.spawn(move || {
                    for _ in 0..20 {
                        let file = repo.open_file("/doc").unwrap();
                        let mut reader = file.version_reader(file.curr_version().unwrap()).unwrap();
                        let mut content = Vec::new();
                        reader.read_to_end(&mut content).unwrap();
                        reads.fetch_add(1, Ordering::SeqCst);
                        if content.len() != LEN || content.iter().any(|b| *b != content[0]) {
                            torn.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(reads.load(Ordering::SeqCst), 80);
        assert_eq!(torn.load(Ordering::SeqCst), 0);
        let mut file = repo.open_file("/doc").unwrap();
        assert_eq!(file.read_to_vec().unwrap(), vec![20u8; LEN]);
    }

    #[test]
    fn test_independent_writers_in_parallel() {
        init_env().unwrap();
        let repo = RepoOpener::new()
            .create(true)
            .open("mem://chaos-parallel", "pwd")
            .unwrap();

        std::thread::scope(|scope| {
            for t in 0..6u8 {
                let repo = &repo;
                scope.spawn(move || {
                    let path = format!("/thread-{}", t);
                    let mut file = repo.create_file(&path).unwrap();
                    for round in 0..5u8 {
                        file.write_once(&vec![t ^ round; 70_000]).unwrap();
                    }
                });
            }
        });

        for t in 0..6u8 {
            let mut file = repo.open_file(format!("/thread-{}", t)).unwrap();
            assert_eq!(file.read_to_vec().unwrap(), vec![t ^ 4; 70_000]);
        }
        assert_eq!(repo.read_dir("/").unwrap().len(), 6);
    }

    #[test]
    #[traced_test]
    fn test_corrupted_blocks_fail_reads() {
        init_env().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("repo");
        let uri = format!("file://{}", root.display());

        let repo = RepoOpener::new().create(true).open(&uri, "pwd").unwrap();
        repo.create_file("/victim").unwrap().write_once(&[7u8; 10_000]).unwrap();
        repo.close().unwrap();

        let mut chaos = ChaosEngine::new(42);
        let objects = chaos.object_files(&root).unwrap();
        assert_eq!(objects.len(), 1);
        chaos.flip_bits(&objects).unwrap();

        // The index is intact so the file still opens, but its content fails
        let repo = RepoOpener::new().open(&uri, "pwd").unwrap();
        let mut file = repo.open_file("/victim").unwrap();
        let mut buf = Vec::new();
        let err = file.read_to_end(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(matches!(file.read_to_vec(), Err(StrongboxError::CorruptedData(_))));
    }

    #[test]
    fn test_deleted_block_fails_reads() {
        init_env().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("repo");
        let uri = format!("file://{}", root.display());

        let repo = RepoOpener::new().create(true).open(&uri, "pwd").unwrap();
        repo.create_file("/victim").unwrap().write_once(b"gone soon").unwrap();
        repo.close().unwrap();

        for path in ChaosEngine::new(1).object_files(&root).unwrap() {
            fs::remove_file(path).unwrap();
        }
        let repo = RepoOpener::new().open(&uri, "pwd").unwrap();
        assert!(repo.open_file("/victim").unwrap().read_to_vec().is_err());
    }

    #[test]
    fn test_damaged_metadata_refuses_open() {
        init_env().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("repo");
        let uri = format!("file://{}", root.display());
        RepoOpener::new().create(true).open(&uri, "pwd").unwrap().close().unwrap();

        let super_blk = root.join(MetaKey::SuperBlock.name());
        let pristine = fs::read(&super_blk).unwrap();

        // Ciphertext damage looks exactly like a wrong password
        let mut damaged = pristine.clone();
        *damaged.last_mut().unwrap() ^= 0x01;
        fs::write(&super_blk, &damaged).unwrap();
        assert!(matches!(
            RepoOpener::new().open(&uri, "pwd"),
            Err(StrongboxError::WrongPassword)
        ));

        fs::write(&super_blk, &pristine[..3]).unwrap();
        assert!(matches!(
            RepoOpener::new().open(&uri, "pwd"),
            Err(StrongboxError::CorruptedData(_))
        ));

        // A damaged index is reported as corruption, and the lock is released
        fs::write(&super_blk, &pristine).unwrap();
        let index = root.join(MetaKey::Index.name());
        ChaosEngine::new(3).flip_bits(&[index.clone()]).unwrap();
        assert!(matches!(
            RepoOpener::new().open(&uri, "pwd"),
            Err(StrongboxError::CorruptedData(_))
        ));
        fs::remove_file(&index).unwrap();
        assert!(matches!(
            RepoOpener::new().open(&uri, "pwd"),
            Err(StrongboxError::CorruptedData(_))
        ));
    }
}
