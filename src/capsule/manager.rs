//! Capsule arena with explicit ownership
//!
//! Slots are keyed by directory name (`<component>-<fingerprint prefix>`,
//! plus a numeric suffix when the base slot is busy). A slot with live
//! references is never handed out twice and never deleted.
//!
//! Without reuse every manager works in its own `run-<uuid>` directory under
//! the root. With reuse, slots live directly under the root and a
//! `<slot>.lock` file marks a slot held by some process, so concurrent
//! processes sharing the root skip each other's capsules.

use super::{fingerprint, Capsule, CapsuleError, CapsuleOptions, Fingerprint};
use crate::core::component::{is_confined, Component, ResolvedDependency};
use crate::core::BuildTarget;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug)]
struct Slot {
    fingerprint: Fingerprint,
    refs: usize,
    /// Populated and usable
    ready: bool,
    /// Delete instead of pooling once the last reference is released
    tainted: bool,
}

/// Creates, pools and deletes capsules under one root directory
#[derive(Debug)]
pub struct CapsuleManager {
    options: CapsuleOptions,
    root: PathBuf,
    /// Parent of this manager's slot directories
    slot_dir: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

impl CapsuleManager {
    pub fn new(options: CapsuleOptions) -> Self {
        let root = options.root();
        let slot_dir = if options.reuse {
            root.clone()
        } else {
            root.join(format!("run-{}", Uuid::new_v4().simple()))
        };
        Self {
            options,
            root,
            slot_dir,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &CapsuleOptions {
        &self.options
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire an isolated capsule for a build target.
    ///
    /// Returns a pooled capsule when reuse is enabled and an idle one with
    /// the same fingerprint exists; otherwise populates a fresh directory.
    pub async fn acquire(&self, target: &BuildTarget) -> Result<Arc<Capsule>, CapsuleError> {
        let component = target.component.clone();
        let dependencies = target.dependencies.clone();

        let fp = {
            let component = component.clone();
            let dependencies = dependencies.clone();
            tokio::task::spawn_blocking(move || fingerprint(&component, &dependencies))
                .await
                .map_err(|e| CapsuleError::Fingerprint {
                    message: e.to_string(),
                })??
        };

        let base = format!("{}-{}", component.id.dir_name(), fp.short());
        let (key, pooled) = self.reserve(&base, &fp)?;
        let path = self.slot_dir.join(&key);

        if pooled {
            debug!(component = %component.id, capsule = %key, "reusing pooled capsule");
            return Ok(Arc::new(Capsule {
                key,
                component: component.id,
                fingerprint: fp,
                path,
                reused: true,
            }));
        }

        let populated = {
            let slot_dir = self.slot_dir.clone();
            let slot_key = key.clone();
            let slot_path = path.clone();
            let options = self.options.clone();
            let component = component.clone();
            tokio::task::spawn_blocking(move || {
                populate(&slot_dir, &slot_key, &slot_path, &component, &dependencies, &options)
            })
            .await
            .map_err(|e| CapsuleError::io(&path, std::io::Error::other(e.to_string())))
            .and_then(|r| r)
        };

        match populated {
            Ok(reused) => {
                if let Some(slot) = self.slots().get_mut(&key) {
                    slot.ready = true;
                }
                info!(
                    component = %component.id,
                    capsule = %path.display(),
                    reused,
                    "capsule acquired"
                );
                Ok(Arc::new(Capsule {
                    key,
                    component: component.id,
                    fingerprint: fp,
                    path,
                    reused,
                }))
            }
            Err(e) => {
                warn!(component = %component.id, error = %e, "capsule creation failed");
                remove_slot_dir(&self.slot_dir, &key);
                self.slots().remove(&key);
                self.unlock(&key);
                self.remove_run_dir();
                Err(e)
            }
        }
    }

    /// Claim a slot for `fp`: an idle pooled slot, or the first free key
    fn reserve(&self, base: &str, fp: &Fingerprint) -> Result<(String, bool), CapsuleError> {
        let mut slots = self.slots();
        let mut suffix = 0usize;
        loop {
            let key = if suffix == 0 {
                base.to_string()
            } else {
                format!("{}-{}", base, suffix)
            };
            match slots.get_mut(&key) {
                None => {
                    if !self.try_lock(&key)? {
                        suffix += 1;
                        continue;
                    }
                    slots.insert(
                        key.clone(),
                        Slot {
                            fingerprint: fp.clone(),
                            refs: 1,
                            ready: false,
                            tainted: false,
                        },
                    );
                    return Ok((key, false));
                }
                Some(slot)
                    if slot.refs == 0
                        && slot.ready
                        && !slot.tainted
                        && self.options.reuse
                        && &slot.fingerprint == fp =>
                {
                    if !self.try_lock(&key)? {
                        suffix += 1;
                        continue;
                    }
                    slot.refs = 1;
                    return Ok((key, true));
                }
                Some(_) => suffix += 1,
            }
        }
    }

    /// Take the cross-process lock of a shared slot. Returns false when
    /// another process holds it. Run directories need no lock.
    fn try_lock(&self, key: &str) -> Result<bool, CapsuleError> {
        if !self.options.reuse {
            return Ok(true);
        }
        fs::create_dir_all(&self.slot_dir).map_err(|e| CapsuleError::io(&self.slot_dir, e))?;
        let lock = lock_path(&self.slot_dir, key);
        match fs::OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(capsule = %key, "capsule locked by another process");
                Ok(false)
            }
            Err(e) => Err(CapsuleError::io(&lock, e)),
        }
    }

    fn unlock(&self, key: &str) {
        if self.options.reuse {
            let _ = fs::remove_file(lock_path(&self.slot_dir, key));
        }
    }

    /// Drop the run directory once its last capsule is gone
    fn remove_run_dir(&self) {
        if !self.options.reuse {
            // fails while other capsules remain
            let _ = fs::remove_dir(&self.slot_dir);
        }
    }

    /// Mark a capsule so its final release deletes it
    pub fn discard(&self, capsule: &Capsule) {
        if let Some(slot) = self.slots().get_mut(&capsule.key) {
            debug!(capsule = %capsule.key, "capsule discarded");
            slot.tainted = true;
        }
    }

    /// Drop one reference. At zero the capsule is pooled or deleted.
    pub async fn release(&self, capsule: &Capsule) -> Result<(), CapsuleError> {
        let delete = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(&capsule.key) else {
                warn!(capsule = %capsule.key, "release of unknown capsule");
                return Ok(());
            };
            slot.refs = slot.refs.saturating_sub(1);
            if slot.refs > 0 {
                return Ok(());
            }
            if slot.tainted || !self.options.reuse {
                // stays reserved until the directory is gone
                slot.ready = false;
                slot.tainted = true;
                true
            } else {
                debug!(capsule = %capsule.key, "capsule pooled");
                false
            }
        };

        if !delete {
            self.unlock(&capsule.key);
            return Ok(());
        }

        let result = delete_slot_dir(&self.slot_dir, &capsule.key).await;
        self.slots().remove(&capsule.key);
        self.unlock(&capsule.key);
        self.remove_run_dir();
        result?;
        debug!(capsule = %capsule.key, "capsule deleted");
        Ok(())
    }

    /// Delete every idle capsule: the ones pooled by this manager and
    /// complete ones left under the root by earlier runs. Capsules locked by
    /// another process are left alone. Returns the number deleted.
    pub async fn purge(&self) -> Result<usize, CapsuleError> {
        let mut idle: Vec<String> = {
            let mut slots = self.slots();
            slots
                .iter_mut()
                .filter(|(_, slot)| slot.refs == 0 && slot.ready)
                .map(|(key, slot)| {
                    slot.ready = false;
                    slot.tainted = true;
                    key.clone()
                })
                .collect()
        };
        if self.options.reuse {
            let known: HashSet<String> = self.slots().keys().cloned().collect();
            idle.extend(
                completed_slots(&self.slot_dir)?
                    .into_iter()
                    .filter(|key| !known.contains(key)),
            );
        }

        let mut deleted = 0usize;
        let mut first_error = None;
        for key in &idle {
            if !self.try_lock(key)? {
                self.slots().remove(key);
                continue;
            }
            match delete_slot_dir(&self.slot_dir, key).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
            self.slots().remove(key);
            self.unlock(key);
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        info!(count = deleted, "purged idle capsules");
        Ok(deleted)
    }

    /// Capsules currently held by a run
    pub fn active(&self) -> usize {
        self.slots().values().filter(|s| s.refs > 0).count()
    }

    /// Idle capsules kept for reuse
    pub fn pooled(&self) -> usize {
        self.slots()
            .values()
            .filter(|s| s.refs == 0 && s.ready)
            .count()
    }
}

fn marker_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.complete", key))
}

fn lock_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.lock", key))
}

/// Keys of slots under `dir` that were completely populated
fn completed_slots(dir: &Path) -> Result<Vec<String>, CapsuleError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CapsuleError::io(dir, e)),
    };
    let mut keys: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            name.to_str()
                .and_then(|n| n.strip_suffix(".complete"))
                .map(str::to_string)
        })
        .collect();
    keys.sort();
    Ok(keys)
}

fn remove_slot_dir(dir: &Path, key: &str) {
    let _ = fs::remove_dir_all(dir.join(key));
    let _ = fs::remove_file(marker_path(dir, key));
}

async fn delete_slot_dir(dir: &Path, key: &str) -> Result<(), CapsuleError> {
    let slot = dir.join(key);
    let marker = marker_path(dir, key);
    tokio::task::spawn_blocking(move || {
        if marker.exists() {
            fs::remove_file(&marker).map_err(|e| CapsuleError::io(&marker, e))?;
        }
        if slot.exists() {
            fs::remove_dir_all(&slot).map_err(|e| CapsuleError::io(&slot, e))?;
        }
        Ok(())
    })
    .await
    .map_err(|e| CapsuleError::io(dir.join(key), std::io::Error::other(e.to_string())))?
}

/// Fill a slot directory. Returns true when a complete directory left by an
/// earlier process was adopted instead.
fn populate(
    dir: &Path,
    key: &str,
    path: &Path,
    component: &Component,
    dependencies: &[ResolvedDependency],
    options: &CapsuleOptions,
) -> Result<bool, CapsuleError> {
    let marker = marker_path(dir, key);
    if options.reuse && marker.is_file() && path.is_dir() {
        return Ok(true);
    }

    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| CapsuleError::io(path, e))?;
    }
    if marker.exists() {
        fs::remove_file(&marker).map_err(|e| CapsuleError::io(&marker, e))?;
    }
    fs::create_dir_all(path).map_err(|e| CapsuleError::io(path, e))?;

    for relative in &component.files {
        if !is_confined(relative) {
            return Err(CapsuleError::OutsideCapsule {
                path: relative.clone(),
            });
        }
        let source = component.root_dir.join(relative);
        if !source.is_file() {
            return Err(CapsuleError::MissingSource { path: source });
        }
        let dest = path.join(relative);
        ensure_parent(&dest)?;
        fs::copy(&source, &dest).map_err(|e| CapsuleError::io(&dest, e))?;
    }

    if !is_confined(Path::new(&options.dependencies_dir)) {
        return Err(CapsuleError::OutsideCapsule {
            path: PathBuf::from(&options.dependencies_dir),
        });
    }
    let deps_root = path.join(&options.dependencies_dir);
    for dep in dependencies {
        if !is_confined(Path::new(&dep.name)) {
            return Err(CapsuleError::OutsideCapsule {
                path: PathBuf::from(&dep.name),
            });
        }
        if !dep.path.exists() {
            return Err(CapsuleError::MissingSource {
                path: dep.path.clone(),
            });
        }
        let dest = deps_root.join(&dep.name);
        ensure_parent(&dest)?;
        if options.link_dependencies {
            link_dir(&dep.path, &dest)?;
        } else {
            copy_tree(&dep.path, &dest)?;
        }
    }

    fs::write(&marker, component.id.to_string()).map_err(|e| CapsuleError::io(&marker, e))?;
    Ok(false)
}

fn ensure_parent(path: &Path) -> Result<(), CapsuleError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CapsuleError::io(parent, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn link_dir(source: &Path, dest: &Path) -> Result<(), CapsuleError> {
    std::os::unix::fs::symlink(source, dest).map_err(|e| CapsuleError::io(dest, e))
}

#[cfg(not(unix))]
fn link_dir(source: &Path, dest: &Path) -> Result<(), CapsuleError> {
    copy_tree(source, dest)
}

/// Recursively copy a directory, following symlinks and rejecting loops
fn copy_tree(source: &Path, dest: &Path) -> Result<(), CapsuleError> {
    for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            if e.loop_ancestor().is_some() {
                CapsuleError::SymlinkCycle { path: at }
            } else {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                CapsuleError::io(at, source)
            }
        })?;

        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| CapsuleError::io(&target, e))?;
        } else {
            ensure_parent(&target)?;
            fs::copy(entry.path(), &target).map_err(|e| CapsuleError::io(&target, e))?;
        }
    }
    Ok(())
}
