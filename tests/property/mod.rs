//! Property-based testing for Strongbox
//!
//! Uses proptest to check file content, version history and directory
//! listings against simple models across randomly generated inputs.

use ::strongbox::*;
use proptest::prelude::*;
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

/// One repository shared by every case, so key derivation runs once
static REPO: LazyLock<Repo> = LazyLock::new(|| {
    init_env().unwrap();
    RepoOpener::new()
        .create_new(true)
        .compress(true)
        .open("mem://property-tests", "pwd")
        .unwrap()
});

static NEXT_CASE: AtomicUsize = AtomicUsize::new(0);

/// Fresh directory for one test case
fn case_dir(prefix: &str) -> String {
    let dir = format!("/{}-{}", prefix, NEXT_CASE.fetch_add(1, Ordering::Relaxed));
    REPO.create_dir(&dir).unwrap();
    dir
}

/// A positioned write inside one version
#[derive(Debug, Clone)]
pub struct Patch {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Generate random file content, sometimes spanning several blocks
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        // Small text
        "[a-zA-Z0-9 \n]{0,1000}".prop_map(|s| s.into_bytes()),
        // Binary data
        prop::collection::vec(any::<u8>(), 0..10_000),
        // Long runs across block boundaries
        (any::<u8>(), 60_000..200_000usize).prop_map(|(byte, count)| vec![byte; count]),
    ]
}

fn patch_strategy() -> impl Strategy<Value = Patch> {
    (0..150_000u64, prop::collection::vec(any::<u8>(), 1..3_000))
        .prop_map(|(offset, data)| Patch { offset, data })
}

/// Names that are valid path components
fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,10}".prop_map(|s| s),
        "file[0-9]{1,3}\\.txt".prop_map(|s| s),
        "[A-Z][a-z ]{0,8}[a-z]".prop_map(|s| s),
    ]
}

/// Apply a patch to the model the way a write at `offset` would
fn apply_patch(model: &mut Vec<u8>, patch: &Patch) {
    let start = patch.offset as usize;
    let end = start + patch.data.len();
    if model.len() < end {
        model.resize(end, 0);
    }
    model[start..end].copy_from_slice(&patch.data);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever is written and finished reads back unchanged
    #[test]
    fn content_round_trip(content in content_strategy()) {
        let dir = case_dir("round-trip");
        let path = format!("{}/f", dir);
        let mut file = REPO.create_file(&path).unwrap();
        file.write_once(&content).unwrap();

        let mut reopened = REPO.open_file(&path).unwrap();
        prop_assert_eq!(reopened.read_to_vec().unwrap(), content.clone());
        prop_assert_eq!(reopened.metadata().unwrap().len, content.len() as u64);
    }

    /// History never exceeds the limit and keeps the newest versions in order
    #[test]
    fn history_respects_version_limit(limit in 1u8..8, commits in 0usize..20) {
        let dir = case_dir("limit");
        let path = format!("{}/f", dir);
        let mut file = OpenOptions::new()
            .create_new(true)
            .version_limit(limit)
            .open(&REPO, &path)
            .unwrap();
        for i in 0..commits {
            file.write_once(format!("commit {}", i).as_bytes()).unwrap();
        }

        let history = file.history().unwrap();
        let total = commits as u64 + 1;
        prop_assert_eq!(history.len() as u64, total.min(limit as u64));
        prop_assert_eq!(history.last().unwrap().num(), total);
        for pair in history.windows(2) {
            prop_assert_eq!(pair[0].num() + 1, pair[1].num());
        }
        prop_assert_eq!(file.curr_version().unwrap(), total);
    }

    /// Positioned writes across versions match a byte vector model
    #[test]
    fn positioned_writes_match_model(
        initial in content_strategy(),
        rounds in prop::collection::vec(prop::collection::vec(patch_strategy(), 1..4), 1..4),
    ) {
        let dir = case_dir("patches");
        let path = format!("{}/f", dir);
        let mut file = REPO.create_file(&path).unwrap();
        file.write_once(&initial).unwrap();
        let mut model = initial;

        for patches in &rounds {
            for patch in patches {
                file.seek(SeekFrom::Start(patch.offset)).unwrap();
                file.write_all(&patch.data).unwrap();
                apply_patch(&mut model, patch);
            }
            file.finish().unwrap();
            prop_assert_eq!(file.metadata().unwrap().len, model.len() as u64);
        }
        prop_assert_eq!(file.read_to_vec().unwrap(), model);
    }

    /// set_len truncates or zero-extends the content
    #[test]
    fn set_len_truncates_and_extends(content in content_strategy(), new_len in 0u64..250_000) {
        let dir = case_dir("set-len");
        let path = format!("{}/f", dir);
        let mut file = REPO.create_file(&path).unwrap();
        file.write_once(&content).unwrap();

        file.set_len(new_len).unwrap();
        file.finish().unwrap();

        let mut expected = content;
        expected.resize(new_len as usize, 0);
        prop_assert_eq!(file.read_to_vec().unwrap(), expected);
    }

    /// Directory listings return each child once, in creation order
    #[test]
    fn read_dir_lists_creation_order(
        entries in prop::collection::vec((name_strategy(), any::<bool>()), 1..12),
    ) {
        let dir = case_dir("listing");
        let mut expected: Vec<(String, bool)> = Vec::new();
        for (name, is_dir) in entries {
            let path = format!("{}/{}", dir, name);
            let created = if is_dir {
                REPO.create_dir(&path).map(|_| ())
            } else {
                REPO.create_file(&path).map(|_| ())
            };
            match created {
                Ok(()) => expected.push((name, is_dir)),
                Err(StrongboxError::AlreadyExists(_)) | Err(StrongboxError::IsDir(_)) => {
                    prop_assert!(expected.iter().any(|(n, _)| *n == name));
                }
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
        }

        let listed: Vec<(String, bool)> = REPO
            .read_dir(&dir)
            .unwrap()
            .into_iter()
            .map(|e| (e.file_name().to_string(), e.metadata().is_dir()))
            .collect();
        prop_assert_eq!(listed, expected);
    }
}
