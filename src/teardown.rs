//! Ordered, fault-tolerant gadget tree destruction
//!
//! The kernel forbids removing a non-empty directory, so every file and
//! symlink must go before its parent and every child directory before the
//! directory that contains it. Each structural zone of the gadget tree is
//! walked into an explicit depth-first post-order sequence and removed
//! entry by entry; individual failures become warnings, never aborts, so a
//! partially built or partially torn-down gadget still gets the maximum
//! possible cleanup.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::fs;
use tracing::{debug, warn};

use crate::configfs;

/// Kernel-owned config attributes, never removable content.
const RESERVED_CONFIG_ATTRS: &[&str] = &["MaxPower", "bmAttributes"];

const NO_RESERVED: &[&str] = &[];

/// Sub-trees processed before the root, in removal order.
const ZONES: &[&str] = &["configs", "functions", "strings"];

/// One entry that could not be removed.
#[derive(Debug)]
pub struct TeardownWarning {
    pub path: PathBuf,
    pub error: std::io::Error,
}

/// Outcome of a best-effort removal. Teardown always runs to completion;
/// whatever could not be removed is reported here instead of raised.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub warnings: Vec<TeardownWarning>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn record(&mut self, path: &Path, error: std::io::Error) {
        warn!("could not remove {}: {}", path.display(), error);
        self.warnings.push(TeardownWarning {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Remove every entry belonging to the gadget rooted at `root`.
pub(crate) async fn remove_tree(root: &Path) -> TeardownReport {
    let mut report = TeardownReport::default();

    // Unbind before the sub-tree goes away; already-unbound is not an
    // error and neither is a gadget that never got a UDC attribute.
    if let Err(e) = configfs::write_attr_raw(&root.join("UDC"), b"\n").await {
        debug!("unbind during teardown skipped: {e}");
    }

    for (zone, reserved) in [
        ("configs", RESERVED_CONFIG_ATTRS),
        ("functions", NO_RESERVED),
        ("strings", NO_RESERVED),
    ] {
        let mut entries = Vec::new();
        collect_post_order(&root.join(zone), reserved, &mut entries).await;
        for path in &entries {
            remove_entry(path, &mut report).await;
        }
    }

    // Fourth zone: root-level attribute files plus the emptied zone
    // containers. The three sub-trees were already processed above and are
    // only rmdir'd here, never re-walked, so reserved entries stay put.
    let mut leftovers = Vec::new();
    if let Ok(names) = configfs::list_dir(root).await {
        for name in names {
            let path = root.join(&name);
            if ZONES.iter().any(|z| *z == name) {
                match fs::remove_dir(&path).await {
                    Ok(()) => debug!("rmdir {}", path.display()),
                    Err(error) => report.record(&path, error),
                }
            } else {
                collect_post_order(&path, NO_RESERVED, &mut leftovers).await;
                leftovers.push(path);
            }
        }
    }
    for path in &leftovers {
        remove_entry(path, &mut report).await;
    }

    match fs::remove_dir(root).await {
        Ok(()) => debug!("rmdir {}", root.display()),
        Err(error) => report.record(root, error),
    }

    report
}

/// Depth-first post-order enumeration: children of a directory are pushed
/// before the directory itself, so removal in sequence order always sees
/// an empty parent. Symlinks are leaves and never followed.
fn collect_post_order<'a>(
    dir: &'a Path,
    reserved: &'a [&'static str],
    out: &'a mut Vec<PathBuf>,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let mut rd = match fs::read_dir(dir).await {
            Ok(rd) => rd,
            // Missing or unreadable zone: nothing to enumerate.
            Err(_) => return,
        };

        let mut children = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if reserved.iter().any(|r| *r == name) {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            children.push((name, is_dir));
        }
        children.sort();

        for (name, is_dir) in children {
            let child = dir.join(name);
            if is_dir {
                collect_post_order(&child, reserved, out).await;
            }
            out.push(child);
        }
    })
}

/// Remove one entry: directory removal first, then file/symlink removal,
/// then a recorded warning. The enumeration mixes all three kinds and the
/// fallback keeps the loop total.
async fn remove_entry(path: &Path, report: &mut TeardownReport) {
    if fs::remove_dir(path).await.is_ok() {
        debug!("rmdir {}", path.display());
        return;
    }
    match fs::remove_file(path).await {
        Ok(()) => debug!("unlink {}", path.display()),
        Err(error) => report.record(path, error),
    }
}
