use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{GraderError, Result};

/// A job's isolated filesystem staging area, keyed by a random salt plus a
/// hash of the repo URL so concurrent jobs never collide.
///
/// The directory is removed when the area is dropped, so cleanup happens on
/// every exit path, including panics inside the job task.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    url_hash: u64,
    salt: String,
}

impl StagingArea {
    pub fn create(root: &Path, repo_url: &str) -> Result<Self> {
        let mut hasher = DefaultHasher::new();
        repo_url.hash(&mut hasher);
        let url_hash = hasher.finish();
        let salt = Uuid::new_v4().simple().to_string();

        let path = root.join(format!("tmp-{url_hash:x}-{salt}"));
        std::fs::create_dir_all(&path).map_err(|e| {
            GraderError::Internal(format!("failed to create staging area {}: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            url_hash,
            salt,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the submitter's repository is cloned.
    pub fn repo_dir(&self) -> PathBuf {
        self.path.join("repo")
    }

    /// The job's isolated data-namespace name, carrying the same salt.
    pub fn namespace(&self) -> String {
        format!("ns_{:x}_{}", self.url_hash, self.salt)
    }

    /// True when `name` belongs to this job's namespace family. Used by the
    /// cleanup leak check so one job never reaps another job's namespace.
    pub fn owns_namespace(&self, name: &str) -> bool {
        name.contains(&self.salt)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging area");
            }
        }
    }
}
