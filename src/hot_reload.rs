//! Hot-reload watcher.
//!
//! A fixed-interval scan over the configured watch paths. Each file's
//! `(inode, mtime)` is compared against the shared reload table; any
//! divergence updates the table and marks the scan dirty, so one file touch
//! produces exactly one reload cycle, not one per tick. Only request worker
//! 0 arms the ticker, keeping reload triggers single-sourced.
//!
//! The reload table is change-detection state only; request handling never
//! depends on it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::config;
use crate::context::AppContext;

/// Periodic file-change scanner over the reload table.
pub struct ReloadWatcher {
    ctx: Arc<AppContext>,
    paths: Vec<PathBuf>,
    interval: Duration,
}

impl ReloadWatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let paths = ctx.config.app.watch_paths.clone();
        let interval = Duration::from_millis(ctx.config.server.reload_interval_ms);
        Self {
            ctx,
            paths,
            interval,
        }
    }

    /// Record the current state of all tracked files without reporting
    /// changes. Called once before the ticker starts so a running server
    /// doesn't reload on its own startup state.
    pub fn prime(&self) {
        let _ = self.observe();
        info!(
            tracked_files = self.ctx.reload_table.len(),
            "Reload table primed"
        );
    }

    /// Scan tracked paths; update the table and report whether anything
    /// diverged from the recorded state.
    pub fn scan(&self) -> bool {
        self.observe()
    }

    fn observe(&self) -> bool {
        let mut changed = false;
        for root in &self.paths {
            visit_files(root, &mut |inode, mtime| {
                let known = self
                    .ctx
                    .reload_table
                    .get(inode)
                    .map(|entry| entry.mtime.as_str() == mtime);
                if known != Some(true) {
                    changed = true;
                    let result = self.ctx.reload_table.set(inode, |row| {
                        row.inode = inode;
                        row.mtime.set(mtime);
                    });
                    if let Err(err) = result {
                        warn!(inode, error = %err, "Reload table write failed");
                    } else {
                        debug!(inode, mtime, "File change recorded");
                    }
                }
            });
        }
        changed
    }

    /// Arm the ticker. Each tick scans; a dirty scan invokes `on_reload`
    /// once. Returns a handle the owning worker cancels at exit.
    pub fn spawn<F>(self, on_reload: F) -> ReloadTicker
    where
        F: Fn() + Send + Sync + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let ticker_stop = Arc::clone(&stop);
        let interval = self.interval;
        // SAFETY: may's Builder::spawn is unsafe by runtime contract; the
        // closure owns everything it touches and the watcher loop holds no
        // borrowed state.
        let spawned = unsafe {
            may::coroutine::Builder::new()
                .stack_size(config::stack_size())
                .spawn(move || {
                    info!(interval_ms = interval.as_millis() as u64, "Reload ticker armed");
                    loop {
                        may::coroutine::sleep(interval);
                        if ticker_stop.load(Ordering::Acquire) {
                            break;
                        }
                        if self.scan() {
                            info!("Watched file changed; triggering reload");
                            on_reload();
                        }
                    }
                    debug!("Reload ticker stopped");
                })
        };
        if let Err(err) = spawned {
            error!(error = %err, "Failed to spawn reload ticker");
        }
        ReloadTicker { stop }
    }
}

/// Cancellation handle for the reload ticker, owned by request worker 0.
pub struct ReloadTicker {
    stop: Arc<AtomicBool>,
}

impl ReloadTicker {
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Release);
        info!("Reload ticker cancelled");
    }
}

fn visit_files(path: &Path, visit: &mut dyn FnMut(u64, &str)) {
    if path.is_dir() {
        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Watch path unreadable");
                return;
            }
        };
        for entry in entries.flatten() {
            visit_files(&entry.path(), visit);
        }
        return;
    }
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return,
    };
    if !meta.is_file() {
        return;
    }
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| format!("{}.{:09}", d.as_secs(), d.subsec_nanos()))
        .unwrap_or_default();
    visit(file_inode(path, &meta), &mtime);
}

#[cfg(unix)]
fn file_inode(_path: &Path, meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_inode(path: &Path, _meta: &std::fs::Metadata) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}
