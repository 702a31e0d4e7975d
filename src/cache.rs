
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ChurnError;

//  One header line of JSON, then the raw diff bytes.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    fetched_at: String,
    arg_digest: String,
}

/// Content-addressed store of fetched diffs under
/// `<cache-dir>/diff/<first-two-hex>/<full-key>`.
///
/// Entries are immutable once written; concurrent writers of the same key
/// produce equal content, so last-writer-wins renames are safe. Anything
/// unreadable is simply a miss.
#[derive(Debug, Clone)]
pub struct DiffCache {
    root: PathBuf,
}

/// Cache key for one diff fetch: SHA-256 over the canonical repository
/// URL, the revision, and the sorted argument vector.
pub fn digest_args(repo_url: &str, revision: u64, diff_args: &[String]) -> String {
    let mut sorted: Vec<&String> = diff_args.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(canonical_url(repo_url).as_bytes());
    hasher.update(b"\n");
    hasher.update(revision.to_string().as_bytes());
    for arg in sorted {
        hasher.update(b"\n");
        hasher.update(arg.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn canonical_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

impl DiffCache {
    pub fn new(cache_dir: &Path) -> DiffCache {
        DiffCache {
            root: cache_dir.join("diff"),
        }
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        self.root.join(&key[..2])
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(key)
    }

    /// Read a cached diff. `None` on a miss or on any corruption
    /// (missing header line, garbled JSON, digest mismatch).
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        let mut raw = Vec::new();
        File::open(self.entry_path(key))
            .ok()?
            .read_to_end(&mut raw)
            .ok()?;

        let split = raw.iter().position(|&b| b == b'\n')?;
        let header: EntryHeader = serde_json::from_slice(&raw[..split]).ok()?;
        if header.arg_digest != key {
            return None;
        }
        Some(raw[split + 1..].to_vec())
    }

    /// Write an entry atomically: header + payload to a uniquely named
    /// temp file in the final shard directory, then rename into place.
    pub fn write(&self, key: &str, payload: &[u8]) -> Result<()> {
        let dir = self.shard_dir(key);
        fs::create_dir_all(&dir)
            .map_err(|e| ChurnError::cache_io(format!("creating {}", dir.display()), e))?;

        let header = EntryHeader {
            fetched_at: Local::now().to_rfc3339(),
            arg_digest: key.to_string(),
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| ChurnError::CacheIo {
                context: "encoding entry header".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;

        let tmp = dir.join(format!("{}.{}.tmp", key, Uuid::new_v4()));
        let write_tmp = |path: &Path| -> std::io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(&header_bytes)?;
            file.write_all(b"\n")?;
            file.write_all(payload)?;
            file.sync_all()
        };
        write_tmp(&tmp).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ChurnError::cache_io(format!("writing {}", tmp.display()), e)
        })?;

        fs::rename(&tmp, self.entry_path(key)).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ChurnError::cache_io(format!("publishing cache entry {}", key), e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn digest_ignores_argument_order_and_trailing_slash() {
        let a = digest_args("http://svn/repo", 5, &args(&["diff", "-c", "5"]));
        let b = digest_args("http://svn/repo/", 5, &args(&["-c", "diff", "5"]));
        assert_eq!(a, b);
    }

    #[test]
    fn digest_separates_revisions_and_args() {
        let base = digest_args("http://svn/repo", 5, &args(&["diff"]));
        assert_ne!(base, digest_args("http://svn/repo", 6, &args(&["diff"])));
        assert_ne!(base, digest_args("http://svn/repo", 5, &args(&["diff", "-x"])));
    }

    #[test]
    fn round_trip_returns_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiffCache::new(dir.path());
        let key = digest_args("http://svn/repo", 3, &args(&["diff", "-c", "3"]));

        assert!(cache.read(&key).is_none());
        cache.write(&key, b"Index: a\n+x\n").unwrap();
        assert_eq!(cache.read(&key).unwrap(), b"Index: a\n+x\n");
    }

    #[test]
    fn entries_shard_on_the_first_two_hex_chars() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiffCache::new(dir.path());
        let key = digest_args("u", 1, &[]);
        cache.write(&key, b"payload").unwrap();
        assert!(dir
            .path()
            .join("diff")
            .join(&key[..2])
            .join(&key)
            .is_file());
    }

    #[test]
    fn corrupt_header_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiffCache::new(dir.path());
        let key = digest_args("u", 2, &[]);
        cache.write(&key, b"payload").unwrap();

        let path = dir.path().join("diff").join(&key[..2]).join(&key);
        fs::write(&path, b"not a json header\npayload").unwrap();
        assert!(cache.read(&key).is_none());

        fs::write(&path, b"no newline at all").unwrap();
        assert!(cache.read(&key).is_none());
    }

    #[test]
    fn mismatched_digest_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiffCache::new(dir.path());
        let key_a = digest_args("u", 3, &[]);
        let key_b = digest_args("u", 4, &[]);
        cache.write(&key_a, b"payload").unwrap();

        //  Entry copied under the wrong key must not be served.
        let src = dir.path().join("diff").join(&key_a[..2]).join(&key_a);
        let dst_dir = dir.path().join("diff").join(&key_b[..2]);
        fs::create_dir_all(&dst_dir).unwrap();
        fs::copy(&src, dst_dir.join(&key_b)).unwrap();
        assert!(cache.read(&key_b).is_none());
    }

    #[test]
    fn rewrites_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiffCache::new(dir.path());
        let key = digest_args("u", 9, &[]);
        cache.write(&key, b"same").unwrap();
        cache.write(&key, b"same").unwrap();
        assert_eq!(cache.read(&key).unwrap(), b"same");
    }
}
