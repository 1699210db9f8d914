use std::path::{Path, PathBuf};

const STATE_DIR: &str = ".state";
const MAINCHAIN_DIR: &str = "zend";
const SIDECHAIN_DIR: &str = "evmapp";
const MIGRATION_HASH_SUFFIX: &str = ".migrationhash";

/// Where every artifact of the cutover lives under the snapshot root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    root: PathBuf,
    mainchain_snapshot_file: String,
    sidechain_snapshot_file: String,
    sidechain_stakes_file: String,
    automappings: PathBuf,
}

impl SnapshotLayout {
    pub fn new(
        root: PathBuf,
        mainchain_snapshot_file: &str,
        sidechain_snapshot_file: &str,
        sidechain_stakes_file: &str,
        automappings: PathBuf,
    ) -> Self {
        Self {
            root,
            mainchain_snapshot_file: mainchain_snapshot_file.to_owned(),
            sidechain_snapshot_file: sidechain_snapshot_file.to_owned(),
            sidechain_stakes_file: sidechain_stakes_file.to_owned(),
            automappings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn mainchain_dir(&self) -> PathBuf {
        self.root.join(MAINCHAIN_DIR)
    }

    pub fn sidechain_dir(&self) -> PathBuf {
        self.root.join(SIDECHAIN_DIR)
    }

    /// Dump written by the mainchain daemon.
    pub fn mainchain_snapshot(&self) -> PathBuf {
        self.mainchain_dir().join(&self.mainchain_snapshot_file)
    }

    /// Dump written by the sidechain node.
    pub fn sidechain_snapshot(&self) -> PathBuf {
        self.sidechain_dir().join(&self.sidechain_snapshot_file)
    }

    pub fn sidechain_stakes(&self) -> PathBuf {
        self.sidechain_dir().join(&self.sidechain_stakes_file)
    }

    pub fn automappings(&self) -> PathBuf {
        self.automappings.clone()
    }

    /// `<root>/zend.json`
    pub fn mainchain_vault(&self) -> PathBuf {
        self.root.join(format!("{MAINCHAIN_DIR}.json"))
    }

    /// `<root>/zend/_automaps.json`
    pub fn sidechain_vault(&self) -> PathBuf {
        self.mainchain_dir().join("_automaps.json")
    }

    pub fn sidechain_accounts(&self) -> PathBuf {
        self.root.join(&self.sidechain_snapshot_file)
    }

    pub fn mainchain_migration_hash(&self) -> PathBuf {
        with_suffix(&self.mainchain_vault(), MIGRATION_HASH_SUFFIX)
    }

    pub fn sidechain_migration_hash(&self) -> PathBuf {
        with_suffix(&self.sidechain_accounts(), MIGRATION_HASH_SUFFIX)
    }

    /// Directories removed wholesale by a new-snapshot reset.
    pub fn snapshot_dirs(&self) -> Vec<PathBuf> {
        vec![self.mainchain_dir(), self.sidechain_dir()]
    }

    /// Files outside the snapshot directories removed by a new-snapshot reset.
    pub fn derived_files(&self) -> Vec<PathBuf> {
        vec![
            self.mainchain_vault(),
            self.sidechain_accounts(),
            self.mainchain_migration_hash(),
            self.sidechain_migration_hash(),
        ]
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
