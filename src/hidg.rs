//! Duplex byte-stream access to HID gadget device nodes
//!
//! Once a gadget with a HID function is created and bound, the kernel
//! exposes `/dev/hidg<N>` where `N` is the function's position among the
//! gadget's HID functions. This adapter only opens that node; it does not
//! depend on the create/enable ordering and assumes the node exists (see
//! [`wait_for_device`] for callers that race the bind).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{GadgetError, Result};

/// Selects which HID function's device node to open.
#[derive(Debug, Clone)]
pub enum StreamSelector {
    /// Zero-based HID function index
    Index(usize),
    /// Instance-name suffix, e.g. `"usb0"` for function `"hid.usb0"`
    Name(String),
}

impl From<usize> for StreamSelector {
    fn from(index: usize) -> Self {
        StreamSelector::Index(index)
    }
}

impl From<&str> for StreamSelector {
    fn from(name: &str) -> Self {
        StreamSelector::Name(name.to_string())
    }
}

impl From<String> for StreamSelector {
    fn from(name: String) -> Self {
        StreamSelector::Name(name)
    }
}

/// Map a selector to a device node index against the gadget's ordered HID
/// function list. A name matches the instance suffix after the dot; an
/// unmatched name falls back to index 0.
pub(crate) fn resolve_index(hid_functions: &[String], selector: &StreamSelector) -> usize {
    match selector {
        StreamSelector::Index(index) => *index,
        StreamSelector::Name(name) => hid_functions
            .iter()
            .position(|f| f.split('.').nth(1) == Some(name.as_str()))
            .unwrap_or(0),
    }
}

/// Bidirectional byte stream on one `hidg` device node.
///
/// Reads and writes go through independent file descriptors so a reader
/// blocked on the host never stalls report writes.
#[derive(Debug)]
pub struct HidStream {
    path: PathBuf,
    reader: Mutex<File>,
    writer: Mutex<File>,
}

impl HidStream {
    pub(crate) async fn open(path: PathBuf) -> Result<Self> {
        let reader = OpenOptions::new()
            .read(true)
            .open(&path)
            .await
            .map_err(|e| GadgetError::io("open", &path, e))?;
        let writer = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| GadgetError::io("open", &path, e))?;
        debug!("opened HID stream {}", path.display());
        Ok(Self {
            path,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one host-to-device report into `buf`, returning its length.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.lock().await;
        reader
            .read(buf)
            .await
            .map_err(|e| GadgetError::io("read", &self.path, e))
    }

    /// Write one device-to-host report.
    pub async fn write(&self, report: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(report)
            .await
            .map_err(|e| GadgetError::io("write", &self.path, e))?;
        writer
            .flush()
            .await
            .map_err(|e| GadgetError::io("flush", &self.path, e))
    }
}

/// Wait for a device node to appear after binding.
///
/// Exponential backoff from 10ms capped at 100ms, so the common fast case
/// resolves quickly without spinning for the slow one.
pub async fn wait_for_device(path: &Path, timeout_ms: u64) -> bool {
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    let mut delay_ms = 10u64;
    const MAX_DELAY_MS: u64 = 100;

    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        let sleep = Duration::from_millis(delay_ms).min(remaining);
        if sleep.is_zero() {
            break;
        }
        tokio::time::sleep(sleep).await;

        delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hid_list() -> Vec<String> {
        vec!["hid.usb0".to_string(), "hid.usb1".to_string()]
    }

    #[test]
    fn selector_conversions() {
        assert!(matches!(StreamSelector::from(3), StreamSelector::Index(3)));
        assert!(matches!(
            StreamSelector::from("usb1"),
            StreamSelector::Name(n) if n == "usb1"
        ));
    }

    #[test]
    fn name_resolves_to_matching_position() {
        assert_eq!(resolve_index(&hid_list(), &"usb1".into()), 1);
        assert_eq!(resolve_index(&hid_list(), &"usb0".into()), 0);
    }

    #[test]
    fn unmatched_name_falls_back_to_zero() {
        assert_eq!(resolve_index(&hid_list(), &"nope".into()), 0);
    }

    #[test]
    fn index_passes_through() {
        assert_eq!(resolve_index(&hid_list(), &5usize.into()), 5);
    }

    #[tokio::test]
    async fn stream_reads_and_writes_independently() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("hidg0");
        std::fs::write(&node, b"host-report").unwrap();

        let stream = HidStream::open(node.clone()).await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"host-report");

        stream.write(b"dev").await.unwrap();
        assert!(std::fs::read(&node).unwrap().starts_with(b"dev"));
    }

    #[tokio::test]
    async fn wait_for_device_sees_existing_node() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("hidg0");
        std::fs::write(&node, "").unwrap();
        assert!(wait_for_device(&node, 50).await);
    }

    #[tokio::test]
    async fn wait_for_device_times_out() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!wait_for_device(&dir.path().join("hidg9"), 30).await);
    }
}
