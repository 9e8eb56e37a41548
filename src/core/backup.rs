//! Pre-write backup sessions under `.authkit/backups/<ID>`.
//!
//! A session is staged in `.authkit/backups/tmp/<ID>`, gets a JSON manifest
//! and a DONE marker on finalize, and is then renamed into place. Sessions are
//! never restored automatically.

use anyhow::{Context, Result, bail};
use blake3::Hasher as Blake3;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument};

use crate::infra::io::write_atomic;

/// Directory (under the project root) holding all backup state.
pub const STATE_DIR: &str = ".authkit";

/// One backed-up target file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackedUpFile {
    pub original_path: PathBuf, // project-relative
    pub size_bytes: u64,
    pub checksum: String, // blake3:<hex>
}

/// Manifest written into every finalized session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,
    pub timestamp: String, // RFC3339
    pub operation: String,
    pub prefix: Option<String>,
    pub success: bool,
    pub last_updated: String,
    pub files: Vec<BackedUpFile>,
}

/// One line of `index.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub id: String,
    pub timestamp: String,
    pub success: bool,
    pub files: usize,
}

/// What a restore did (or would do, on a dry run).
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub session_id: String,
    pub restored: Vec<PathBuf>,
    pub dry_run: bool,
}

fn backups_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("backups")
}

/// A single backup session; stage in tmp, then finalize.
#[derive(Debug)]
pub struct BackupSession {
    root: PathBuf,
    sessions_dir: PathBuf,
    tmp_dir: PathBuf,
    final_dir: PathBuf,
    manifest: SessionManifest,
    finalized: bool,
}

impl BackupSession {
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn begin(root: &Path, operation: &str, prefix: Option<&str>) -> Result<Self> {
        let sessions_dir = backups_dir(root);
        let id = generate_session_id();
        let tmp_dir = sessions_dir.join("tmp").join(&id);
        let final_dir = sessions_dir.join(&id);

        fs::create_dir_all(&tmp_dir)
            .with_context(|| format!("create session dir: {}", tmp_dir.display()))?;

        let now = Utc::now().to_rfc3339();
        debug!(session = %id, "backup session started");
        Ok(Self {
            root: root.to_path_buf(),
            sessions_dir,
            tmp_dir,
            final_dir,
            manifest: SessionManifest {
                id,
                timestamp: now.clone(),
                operation: operation.to_string(),
                prefix: prefix.map(str::to_string),
                success: false,
                last_updated: now,
                files: Vec::new(),
            },
            finalized: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Copy one project-relative file into the session.
    pub fn backup_file(&mut self, rel_path: &Path) -> Result<()> {
        let rel = validate_rel(rel_path)?;
        let source = self.root.join(&rel);
        let dest = self.tmp_dir.join(&rel);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create backup parent: {}", parent.display()))?;
        }
        fs::copy(&source, &dest)
            .with_context(|| format!("copy {} to backup", source.display()))?;

        let size_bytes = fs::metadata(&dest)
            .with_context(|| format!("stat backup: {}", dest.display()))?
            .len();
        let checksum = stream_blake3(&dest)?;

        self.manifest.files.push(BackedUpFile {
            original_path: rel,
            size_bytes,
            checksum,
        });
        self.manifest.last_updated = Utc::now().to_rfc3339();
        Ok(())
    }

    /// Write the manifest, rename tmp to final, create DONE, append to the index.
    pub fn finalize(&mut self, success: bool) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.manifest.success = success;
        self.manifest.last_updated = Utc::now().to_rfc3339();

        let manifest_text =
            serde_json::to_string_pretty(&self.manifest).context("serialize manifest")?;
        write_atomic(&self.tmp_dir.join("manifest.json"), manifest_text.as_bytes())
            .context("write manifest")?;

        fs::rename(&self.tmp_dir, &self.final_dir).with_context(|| {
            format!(
                "rename {} -> {}",
                self.tmp_dir.display(),
                self.final_dir.display()
            )
        })?;

        let done = self.final_dir.join("DONE");
        fs::write(&done, "").with_context(|| format!("create DONE: {}", done.display()))?;
        self.finalized = true;

        self.append_to_index()?;
        info!(session = %self.manifest.id, files = self.manifest.files.len(), "backup session finalized");
        Ok(())
    }

    fn append_to_index(&self) -> Result<()> {
        let index_path = self.sessions_dir.join("index.jsonl");
        let entry = SessionIndexEntry {
            id: self.manifest.id.clone(),
            timestamp: self.manifest.timestamp.clone(),
            success: self.manifest.success,
            files: self.manifest.files.len(),
        };
        let line = serde_json::to_string(&entry).context("serialize index entry")?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .with_context(|| format!("open index: {}", index_path.display()))?;
        writeln!(f, "{line}").context("append index")?;
        f.sync_all().ok();
        Ok(())
    }
}

impl Drop for BackupSession {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize(false);
        }
    }
}

/// Sortable, filesystem-safe session id.
fn generate_session_id() -> String {
    let ts = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let alphabet = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect();
    format!("{ts}_{suffix}")
}

/// Stream a file into a blake3 digest as `blake3:<hex>`.
fn stream_blake3(path: &Path) -> Result<String> {
    let mut f =
        File::open(path).with_context(|| format!("open for checksum: {}", path.display()))?;
    let mut hasher = Blake3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Finalized sessions from the index, oldest first; malformed lines are skipped.
pub fn list_sessions(root: &Path) -> Result<Vec<SessionIndexEntry>> {
    let index_path = backups_dir(root).join("index.jsonl");
    if !index_path.exists() {
        return Ok(Vec::new());
    }
    let file =
        File::open(&index_path).with_context(|| format!("open index: {}", index_path.display()))?;

    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read index line {}", i + 1))?;
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<SessionIndexEntry>(t) {
            out.push(entry);
        }
    }
    Ok(out)
}

/// Load a manifest; the session must carry a DONE marker.
pub fn read_session_manifest(root: &Path, session_id: &str) -> Result<SessionManifest> {
    let base = backups_dir(root).join(session_id);
    if !base.join("DONE").exists() {
        bail!("session {session_id} is incomplete (missing DONE)");
    }
    let manifest_path = base.join("manifest.json");
    let s = fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest: {}", manifest_path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse manifest: {}", manifest_path.display()))
}

/// `latest`, a full id, or a unique id prefix.
pub fn resolve_session_id(root: &Path, query: &str) -> Result<String> {
    let sessions = list_sessions(root)?;
    if query == "latest" {
        return sessions
            .last()
            .map(|e| e.id.clone())
            .context("no backup sessions recorded");
    }
    let matches: Vec<&SessionIndexEntry> =
        sessions.iter().filter(|e| e.id.starts_with(query)).collect();
    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => bail!("no backup session matches {query}"),
        many => bail!(
            "{query} matches {} sessions: {}",
            many.len(),
            many.iter()
                .map(|e| e.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Restore every file of a session after verifying its checksum.
#[instrument(skip(root))]
pub fn restore_session(root: &Path, query: &str, dry_run: bool) -> Result<RestoreReport> {
    let id = resolve_session_id(root, query)?;
    let manifest = read_session_manifest(root, &id)?;
    let base = backups_dir(root).join(&id);

    // Verify everything first so a corrupt session restores nothing
    for file in &manifest.files {
        let backed = base.join(validate_rel(&file.original_path)?);
        let actual = stream_blake3(&backed)?;
        if actual != file.checksum {
            bail!(
                "checksum mismatch for {}: expected {}, found {actual}",
                file.original_path.display(),
                file.checksum
            );
        }
    }

    let mut restored = Vec::new();
    for file in &manifest.files {
        let rel = validate_rel(&file.original_path)?;
        if !dry_run {
            let bytes = fs::read(base.join(&rel))
                .with_context(|| format!("read backup of {}", rel.display()))?;
            let dest = root.join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(&dest, &bytes).with_context(|| format!("restore {}", dest.display()))?;
        }
        restored.push(rel);
    }

    info!(session = %id, files = restored.len(), dry_run, "restore finished");
    Ok(RestoreReport {
        session_id: id,
        restored,
        dry_run,
    })
}

/// Project-relative and non-escaping.
fn validate_rel(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        bail!("path must be project-relative: {}", p.display());
    }
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::ParentDir => bail!("path escapes project: {}", p.display()),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                bail!("path must be project-relative: {}", p.display())
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("empty path");
    }
    Ok(out)
}
