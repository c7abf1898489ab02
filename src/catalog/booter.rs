use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::primitives::io::sync_parent_dir;
use crate::storage::db_file;
use crate::types::{KeelError, Result, Uid};

/// Suffix of the booter file.
pub const BOOTER_SUFFIX: &str = ".bt";
const BOOTER_TMP_SUFFIX: &str = ".bt_tmp";

/// Small side file naming the head of the table list.
///
/// Rewrites go to a temporary file that is then renamed over the real one,
/// so a reader always sees either the old or the new uid. The directory is
/// synced after the rename so the new uid survives power loss.
#[derive(Debug)]
pub struct Booter {
    path: PathBuf,
    tmp: PathBuf,
}

impl Booter {
    /// Creates the booter file holding `head`.
    pub fn create(base: &Path, head: Uid) -> Result<Self> {
        let booter = Self::paths(base);
        if booter.path.exists() {
            return Err(KeelError::FileExists(booter.path));
        }
        booter.update(head)?;
        Ok(booter)
    }

    /// Opens an existing booter file, dropping a leftover temporary copy.
    pub fn open(base: &Path) -> Result<Self> {
        let booter = Self::paths(base);
        match fs::remove_file(&booter.tmp) {
            Ok(()) => warn!(path = %booter.tmp.display(), "booter.stale_tmp_removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        if !booter.path.exists() {
            return Err(KeelError::FileNotFound(booter.path));
        }
        Ok(booter)
    }

    fn paths(base: &Path) -> Self {
        Self {
            path: db_file(base, BOOTER_SUFFIX),
            tmp: db_file(base, BOOTER_TMP_SUFFIX),
        }
    }

    /// Uid of the first table, `Uid::NULL` when there are none.
    pub fn load(&self) -> Result<Uid> {
        let mut file = File::open(&self.path)?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let raw: [u8; 8] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KeelError::Corruption("bad booter file"))?;
        Ok(Uid(u64::from_be_bytes(raw)))
    }

    /// Atomically replaces the stored uid.
    pub fn update(&self, head: Uid) -> Result<()> {
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.tmp)?;
            file.write_all(&head.0.to_be_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&self.tmp, &self.path)?;
        sync_parent_dir(&self.path)?;
        debug!(%head, "booter.update");
        Ok(())
    }
}
