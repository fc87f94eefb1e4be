//! Change watching
//!
//! A watcher periodically walks the watched subtree through the same
//! driver as every other operation and diffs against the previous
//! snapshot, emitting `(path, action)` events. `write` events are
//! inherently lossy and duplicable: consumers must treat them as
//! zero-or-more between `create` and `remove`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cove_smb::{ContextGuard, EntryKind};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::dir::{list_dir, SmbDirectoryHandle};
use crate::error::Result;
use crate::path::PathRef;

/// What happened to a watched entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// The entry appeared
    Create,
    /// The entry's contents or metadata changed
    Write,
    /// The entry disappeared
    Remove,
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Write => write!(f, "write"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// One observed change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Path relative to the watched directory, `/`-separated
    pub path: String,
    /// What happened
    pub action: WatchAction,
}

/// Handle to a running watch
///
/// Dropping the subscription does not stop it; call [`Watcher::cancel`]
/// and then [`Watcher::wait`] for a clean stop.
#[derive(Debug)]
pub struct Watcher {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    /// Stop emitting and release resources.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolve once the watch task — including any in-flight callback —
    /// has returned.
    pub async fn wait(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryMeta {
    kind: EntryKind,
    size: u64,
    mtime: u64,
    mtime_nsec: u64,
}

type Snapshot = BTreeMap<String, EntryMeta>;

impl SmbDirectoryHandle {
    /// Watch this directory's subtree for changes.
    ///
    /// The callback runs on the watch task, once per observed event.
    /// Polling errors end the subscription after being logged.
    pub fn watch(&self, callback: impl Fn(WatchEvent) + Send + Sync + 'static) -> Watcher {
        let cancelled = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let task = tokio::spawn(watch_loop(
            self.ctx().clone(),
            self.path().clone(),
            Box::new(callback),
            cancelled.clone(),
            notify.clone(),
        ));
        Watcher {
            cancelled,
            notify,
            task: Mutex::new(Some(task)),
        }
    }
}

async fn watch_loop(
    ctx: Arc<ContextGuard>,
    base: PathRef,
    callback: Box<dyn Fn(WatchEvent) + Send + Sync>,
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
) {
    let interval = ctx.watch_interval();
    let mut snapshot = match scan(&ctx, &base).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(path = %base, error = %e, "watch baseline scan failed");
            return;
        }
    };
    debug!(path = %base, entries = snapshot.len(), "watch started");

    loop {
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let current = match scan(&ctx, &base).await {
            Ok(current) => current,
            Err(e) => {
                error!(path = %base, error = %e, "watch poll failed");
                break;
            }
        };
        emit_diff(&snapshot, &current, &callback);
        snapshot = current;
    }
    debug!(path = %base, "watch stopped");
}

fn emit_diff(old: &Snapshot, new: &Snapshot, callback: &(dyn Fn(WatchEvent) + Send + Sync)) {
    for (path, meta) in new {
        match old.get(path) {
            None => callback(WatchEvent {
                path: path.clone(),
                action: WatchAction::Create,
            }),
            Some(prev) if prev.kind != meta.kind => {
                // The name was reused by the other kind between polls.
                callback(WatchEvent {
                    path: path.clone(),
                    action: WatchAction::Remove,
                });
                callback(WatchEvent {
                    path: path.clone(),
                    action: WatchAction::Create,
                });
            }
            Some(prev) if prev != meta => callback(WatchEvent {
                path: path.clone(),
                action: WatchAction::Write,
            }),
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            callback(WatchEvent {
                path: path.clone(),
                action: WatchAction::Remove,
            });
        }
    }
}

/// Walk the subtree, keyed by watched-directory-relative path.
async fn scan(ctx: &Arc<ContextGuard>, base: &PathRef) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut stack = vec![(base.clone(), String::new())];
    while let Some((dir, prefix)) = stack.pop() {
        for entry in list_dir(ctx, &dir).await? {
            let rel = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            if entry.kind == EntryKind::Directory {
                stack.push((dir.join(&entry.name)?, rel.clone()));
            }
            snapshot.insert(
                rel,
                EntryMeta {
                    kind: entry.kind,
                    size: entry.size,
                    mtime: entry.mtime,
                    mtime_nsec: entry.mtime_nsec,
                },
            );
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: EntryKind, size: u64, mtime: u64) -> EntryMeta {
        EntryMeta {
            kind,
            size,
            mtime,
            mtime_nsec: 0,
        }
    }

    #[test]
    fn test_diff_emits_create_write_remove() {
        let mut old = Snapshot::new();
        old.insert("kept".into(), meta(EntryKind::File, 1, 10));
        old.insert("grown".into(), meta(EntryKind::File, 1, 10));
        old.insert("gone".into(), meta(EntryKind::File, 1, 10));
        let mut new = Snapshot::new();
        new.insert("kept".into(), meta(EntryKind::File, 1, 10));
        new.insert("grown".into(), meta(EntryKind::File, 9, 11));
        new.insert("fresh".into(), meta(EntryKind::File, 0, 12));

        let events = Mutex::new(Vec::new());
        emit_diff(&old, &new, &|event| events.lock().push(event));
        let events = events.into_inner();

        assert!(events.contains(&WatchEvent {
            path: "fresh".into(),
            action: WatchAction::Create
        }));
        assert!(events.contains(&WatchEvent {
            path: "grown".into(),
            action: WatchAction::Write
        }));
        assert!(events.contains(&WatchEvent {
            path: "gone".into(),
            action: WatchAction::Remove
        }));
        assert!(!events.iter().any(|e| e.path == "kept"));
    }

    #[test]
    fn test_diff_kind_swap_is_remove_then_create() {
        let mut old = Snapshot::new();
        old.insert("x".into(), meta(EntryKind::File, 1, 10));
        let mut new = Snapshot::new();
        new.insert("x".into(), meta(EntryKind::Directory, 0, 11));

        let events = Mutex::new(Vec::new());
        emit_diff(&old, &new, &|event| events.lock().push(event));
        let events = events.into_inner();
        assert_eq!(
            events,
            vec![
                WatchEvent {
                    path: "x".into(),
                    action: WatchAction::Remove
                },
                WatchEvent {
                    path: "x".into(),
                    action: WatchAction::Create
                },
            ]
        );
    }
}
