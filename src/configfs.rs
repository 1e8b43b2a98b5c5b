//! ConfigFS file operations for USB gadgets

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{GadgetError, Result};

/// ConfigFS base path for USB gadgets
pub const CONFIGFS_GADGETS: &str = "/sys/kernel/config/usb_gadget";

/// Sysfs class directory listing available USB device controllers
pub const UDC_CLASS: &str = "/sys/class/udc";

/// Directory holding the numbered HID gadget device nodes
pub const HIDG_DEV_ROOT: &str = "/dev";

/// Filesystem roots the engine operates on.
///
/// One immutable value threaded explicitly through every step; the engine
/// never derives paths from ambient process state. `Default` is the real
/// kernel layout, [`rooted`](Self::rooted) relocates everything under a
/// single base directory for sandboxed tests.
#[derive(Debug, Clone)]
pub struct ConfigFsLayout {
    /// Parent of every gadget directory (`usb_gadget`)
    pub gadgets_root: PathBuf,
    /// UDC discovery directory
    pub udc_class: PathBuf,
    /// Parent of the `hidg<N>` device nodes
    pub dev_root: PathBuf,
}

impl Default for ConfigFsLayout {
    fn default() -> Self {
        Self {
            gadgets_root: PathBuf::from(CONFIGFS_GADGETS),
            udc_class: PathBuf::from(UDC_CLASS),
            dev_root: PathBuf::from(HIDG_DEV_ROOT),
        }
    }
}

impl ConfigFsLayout {
    /// Layout with every root placed under `base` (sandbox/tests).
    pub fn rooted(base: &Path) -> Self {
        Self {
            gadgets_root: base.join("usb_gadget"),
            udc_class: base.join("udc"),
            dev_root: base.join("dev"),
        }
    }

    /// Root directory of one gadget.
    pub fn gadget_dir(&self, id: &str) -> PathBuf {
        self.gadgets_root.join(id)
    }

    /// The gadget's controller binding attribute.
    pub fn udc_attr(&self, id: &str) -> PathBuf {
        self.gadget_dir(id).join("UDC")
    }

    /// Device node for HID function index `index`.
    pub fn hidg_device(&self, index: usize) -> PathBuf {
        self.dev_root.join(format!("hidg{index}"))
    }
}

/// Check whether the ConfigFS gadget mount is present.
pub fn is_configfs_available(layout: &ConfigFsLayout) -> bool {
    layout.gadgets_root.exists()
}

/// Find an available UDC, picking the first listed controller.
pub async fn find_udc(udc_class: &Path) -> Option<String> {
    list_dir(udc_class).await.ok()?.into_iter().next()
}

/// Write a text attribute.
///
/// ConfigFS attributes expect a single write() carrying the whole value,
/// terminated by a newline; the complete buffer is built up front so the
/// kernel never sees a partial write.
pub(crate) async fn write_attr(path: &Path, value: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(value.len() + 1);
    buf.extend_from_slice(value.as_bytes());
    if !value.ends_with('\n') {
        buf.push(b'\n');
    }
    write_attr_raw(path, &buf).await
}

/// Write an attribute value byte-exact (report descriptors, the clearing
/// newline for `UDC`). No terminator is appended.
pub(crate) async fn write_attr_raw(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| GadgetError::io("open", path, e))?;

    file.write_all(data)
        .await
        .map_err(|e| GadgetError::io("write", path, e))?;

    file.flush()
        .await
        .map_err(|e| GadgetError::io("flush", path, e))?;

    Ok(())
}

/// Read a trimmed text attribute.
pub(crate) async fn read_attr(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| GadgetError::io("read", path, e))
}

/// Create a directory and any missing parents.
pub(crate) async fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| GadgetError::io("mkdir", path, e))
}

/// Create a symlink at `dest` pointing to `src`.
pub(crate) async fn symlink(src: &Path, dest: &Path) -> Result<()> {
    fs::symlink(src, dest)
        .await
        .map_err(|e| GadgetError::io("symlink", dest, e))
}

/// Directory entry names, sorted for deterministic processing.
pub(crate) async fn list_dir(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut rd = fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}
