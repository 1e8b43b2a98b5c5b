//! Gadget lifecycle engine: tree construction and controller binding

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::configfs::{self, ConfigFsLayout};
use crate::descriptor::GadgetDescriptor;
use crate::error::{GadgetError, Result};
use crate::hidg::{self, HidStream, StreamSelector};
use crate::teardown::{self, TeardownReport};

/// The lifecycle engine for composite gadgets under one [`ConfigFsLayout`].
///
/// `create` consumes a normalized descriptor; `enable`, `disable` and
/// `remove` are keyed purely by gadget id, since binding state is a
/// root-level attribute and teardown rediscovers the tree from disk.
/// Concurrent operations on the same id are the caller's responsibility
/// to serialize.
#[derive(Debug, Clone, Default)]
pub struct GadgetFs {
    layout: ConfigFsLayout,
}

impl GadgetFs {
    /// Engine over the real kernel layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine over an explicit layout (sandboxes, tests).
    pub fn with_layout(layout: ConfigFsLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ConfigFsLayout {
        &self.layout
    }

    /// Whether the ConfigFS gadget mount is present.
    pub fn is_available(&self) -> bool {
        configfs::is_configfs_available(&self.layout)
    }

    /// Realize the descriptor as a directory tree.
    ///
    /// Steps run strictly in order, each awaited before the next, since
    /// every attribute write needs its parent directory on disk. A failure
    /// aborts the remaining steps and leaves the partial tree in place;
    /// cleanup is an explicit `remove`.
    pub async fn create(&self, desc: &GadgetDescriptor) -> Result<GadgetHandle> {
        if desc.id.is_empty() {
            return Err(GadgetError::IdRequired);
        }
        info!("creating gadget {}", desc.id);

        let root = self.layout.gadget_dir(&desc.id);
        configfs::create_dir(&self.layout.gadgets_root).await?;
        match fs::create_dir(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(GadgetError::AlreadyExists {
                    id: desc.id.clone(),
                });
            }
            Err(e) => return Err(GadgetError::io("mkdir", &root, e)),
        }

        // Identity attributes
        configfs::write_attr(&root.join("idVendor"), &desc.id_vendor).await?;
        configfs::write_attr(&root.join("idProduct"), &desc.id_product).await?;

        // Device strings, one directory per locale
        for table in &desc.strings {
            let dir = root.join("strings").join(&table.id);
            configfs::create_dir(&dir).await?;
            for (name, value) in table.attrs() {
                configfs::write_attr(&dir.join(name), &value).await?;
            }
            debug!("created strings/{}", table.id);
        }

        // Functions
        for func in &desc.functions {
            let dir = root.join("functions").join(&func.id);
            configfs::create_dir(&dir).await?;
            if func.kind == "hid" {
                let report = func.report.decode(&func.id)?;
                configfs::write_attr_raw(&dir.join("report_desc"), &report).await?;
                configfs::write_attr(&dir.join("report_length"), &report.len().to_string())
                    .await?;
            }
            debug!("created function {}", func.id);
        }

        // Configurations: function bindings as symlinks, then config strings
        for config in &desc.configs {
            let dir = root.join("configs").join(&config.id);
            configfs::create_dir(&dir).await?;
            for func_ref in &config.functions {
                if !desc.functions.iter().any(|f| &f.id == func_ref) {
                    return Err(GadgetError::LinkTargetMissing {
                        config: config.id.clone(),
                        function: func_ref.clone(),
                    });
                }
                let target = root.join("functions").join(func_ref);
                configfs::symlink(&target, &dir.join(func_ref)).await?;
            }
            for config_str in &config.strings {
                let sdir = dir.join("strings").join(&config_str.id);
                configfs::create_dir(&sdir).await?;
                for (name, value) in config_str.attrs() {
                    configfs::write_attr(&sdir.join(name), &value).await?;
                }
            }
            debug!("created config {}", config.id);
        }

        // Binding is a separate step; create never writes UDC.
        info!("gadget {} created", desc.id);
        Ok(GadgetHandle {
            engine: self.clone(),
            id: desc.id.clone(),
            udc: desc.udc.clone(),
            hid_functions: desc.hid_function_ids(),
            stream: Mutex::new(None),
        })
    }

    /// Bind the gadget to a controller and return the controller used.
    ///
    /// With no controller named, the sole available one is discovered from
    /// the UDC class directory.
    pub async fn enable(&self, id: &str, udc: Option<&str>) -> Result<String> {
        if id.is_empty() {
            return Err(GadgetError::IdRequired);
        }
        let root = self.layout.gadget_dir(id);
        if fs::metadata(&root).await.is_err() {
            return Err(GadgetError::NotCreated { id: id.to_string() });
        }

        let udc = match udc {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                debug!("no controller named, discovering");
                configfs::find_udc(&self.layout.udc_class)
                    .await
                    .ok_or(GadgetError::NoControllerAvailable)?
            }
        };

        info!("binding gadget {id} to {udc}");
        configfs::write_attr(&self.layout.udc_attr(id), &udc).await?;
        Ok(udc)
    }

    /// Unbind the gadget from its controller.
    pub async fn disable(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(GadgetError::IdRequired);
        }
        // The attribute clears on a bare line terminator; writing zero
        // bytes would leave the binding untouched.
        configfs::write_attr_raw(&self.layout.udc_attr(id), b"\n").await?;
        info!("gadget {id} unbound");
        Ok(())
    }

    /// Name of the controller the gadget is currently bound to, if any.
    pub async fn bound_udc(&self, id: &str) -> Result<Option<String>> {
        if id.is_empty() {
            return Err(GadgetError::IdRequired);
        }
        let name = configfs::read_attr(&self.layout.udc_attr(id)).await?;
        Ok((!name.is_empty()).then_some(name))
    }

    /// Remove every filesystem entry belonging to the gadget, best-effort.
    ///
    /// Per-entry failures are accumulated in the report, never raised; a
    /// gadget that is already gone is a no-op.
    pub async fn remove(&self, id: &str) -> Result<TeardownReport> {
        if id.is_empty() {
            return Err(GadgetError::IdRequired);
        }
        let root = self.layout.gadget_dir(id);
        if fs::metadata(&root).await.is_err() {
            debug!("gadget {id} not present, nothing to remove");
            return Ok(TeardownReport::default());
        }

        info!("removing gadget {id}");
        let report = teardown::remove_tree(&root).await;
        if report.is_clean() {
            info!("gadget {id} removed");
        } else {
            warn!(
                "gadget {id} removed with {} warnings",
                report.warnings.len()
            );
        }
        Ok(report)
    }
}

/// Handle to a created gadget.
///
/// Carries the id and the ordered HID function list needed to resolve
/// device nodes, plus the per-gadget stream cache.
#[derive(Debug)]
pub struct GadgetHandle {
    engine: GadgetFs,
    id: String,
    udc: String,
    hid_functions: Vec<String>,
    stream: Mutex<Option<Arc<HidStream>>>,
}

impl GadgetHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bind to a controller: the one given, else the descriptor's
    /// preferred one, else auto-discovery.
    pub async fn enable(&self, udc: Option<&str>) -> Result<String> {
        let preferred = udc.or_else(|| (!self.udc.is_empty()).then_some(self.udc.as_str()));
        self.engine.enable(&self.id, preferred).await
    }

    pub async fn disable(&self) -> Result<()> {
        self.engine.disable(&self.id).await
    }

    pub async fn remove(self) -> Result<TeardownReport> {
        self.engine.remove(&self.id).await
    }

    /// Open the duplex stream for one HID function, by instance-name
    /// suffix or zero-based index. The first call opens the device node;
    /// later calls return the same cached stream.
    pub async fn hid_stream(&self, selector: impl Into<StreamSelector>) -> Result<Arc<HidStream>> {
        let mut cached = self.stream.lock().await;
        if let Some(stream) = cached.as_ref() {
            return Ok(stream.clone());
        }
        let index = hidg::resolve_index(&self.hid_functions, &selector.into());
        let stream = Arc::new(HidStream::open(self.engine.layout.hidg_device(index)).await?);
        *cached = Some(stream.clone());
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox() -> (tempfile::TempDir, GadgetFs) {
        let dir = tempfile::tempdir().unwrap();
        let engine = GadgetFs::with_layout(ConfigFsLayout::rooted(dir.path()));
        (dir, engine)
    }

    fn demo_descriptor() -> GadgetDescriptor {
        let desc: GadgetDescriptor = serde_json::from_value(json!({
            "id": "g1",
            "idVendor": "0x0e6f",
            "idProduct": "0x0241",
            "strings": [{"id": "0x409", "product": "Demo Device"}],
            "functions": [{"id": "hid.usb0", "type": "hid", "report": "0601"}],
            "configs": [{
                "id": "c.1",
                "functions": ["hid.usb0"],
                "strings": [{"id": "0x409", "configuration": "Demo"}],
            }],
        }))
        .unwrap();
        desc.normalize().unwrap()
    }

    fn read_trimmed(path: &std::path::Path) -> String {
        std::fs::read_to_string(path).unwrap().trim().to_string()
    }

    #[tokio::test]
    async fn create_realizes_descriptor_tree() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();

        let root = engine.layout().gadget_dir("g1");
        assert_eq!(read_trimmed(&root.join("idVendor")), "0x0e6f");
        assert_eq!(read_trimmed(&root.join("idProduct")), "0x0241");
        assert_eq!(read_trimmed(&root.join("strings/0x409/product")), "Demo Device");

        let func = root.join("functions/hid.usb0");
        assert_eq!(std::fs::read(func.join("report_desc")).unwrap(), [0x06, 0x01]);
        assert_eq!(read_trimmed(&func.join("report_length")), "2");

        let link = root.join("configs/c.1/hid.usb0");
        assert!(std::fs::symlink_metadata(&link).unwrap().is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), func);
        assert_eq!(
            read_trimmed(&root.join("configs/c.1/strings/0x409/configuration")),
            "Demo"
        );
    }

    #[tokio::test]
    async fn create_without_id_mutates_nothing() {
        let (_dir, engine) = sandbox();
        let err = engine.create(&GadgetDescriptor::default()).await.unwrap_err();
        assert!(matches!(err, GadgetError::IdRequired));
        assert!(!engine.layout().gadgets_root.exists());
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();
        let err = engine.create(&demo_descriptor()).await.unwrap_err();
        assert!(matches!(err, GadgetError::AlreadyExists { id } if id == "g1"));
    }

    #[tokio::test]
    async fn dangling_function_reference_fails_and_leaves_partial_tree() {
        let (_dir, engine) = sandbox();
        let desc: GadgetDescriptor = serde_json::from_value(json!({
            "id": "g1",
            "functions": [{"id": "hid.usb0", "type": "hid"}],
            "configs": [{"id": "c.1", "functions": ["ghost"]}],
        }))
        .unwrap();
        let err = engine.create(&desc.normalize().unwrap()).await.unwrap_err();
        assert!(matches!(
            err,
            GadgetError::LinkTargetMissing { config, function }
                if config == "c.1" && function == "ghost"
        ));

        // No rollback: the steps before the failure stay on disk.
        let root = engine.layout().gadget_dir("g1");
        assert!(root.join("functions/hid.usb0").exists());
        assert!(root.join("configs/c.1").exists());
    }

    #[tokio::test]
    async fn enable_discovers_sole_controller() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();

        std::fs::create_dir_all(&engine.layout().udc_class).unwrap();
        std::fs::write(engine.layout().udc_class.join("ctrl0"), "").unwrap();

        let chosen = engine.enable("g1", None).await.unwrap();
        assert_eq!(chosen, "ctrl0");
        assert_eq!(
            std::fs::read(engine.layout().udc_attr("g1")).unwrap(),
            b"ctrl0\n"
        );
        assert_eq!(engine.bound_udc("g1").await.unwrap().as_deref(), Some("ctrl0"));
    }

    #[tokio::test]
    async fn handle_prefers_descriptor_controller() {
        let (_dir, engine) = sandbox();
        let mut desc = demo_descriptor();
        desc.udc = "ctrl1".to_string();
        let handle = engine.create(&desc).await.unwrap();

        let chosen = handle.enable(None).await.unwrap();
        assert_eq!(chosen, "ctrl1");
        assert_eq!(
            std::fs::read(engine.layout().udc_attr("g1")).unwrap(),
            b"ctrl1\n"
        );
    }

    #[tokio::test]
    async fn enable_without_any_controller_fails() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();
        std::fs::create_dir_all(&engine.layout().udc_class).unwrap();

        let err = engine.enable("g1", None).await.unwrap_err();
        assert!(matches!(err, GadgetError::NoControllerAvailable));
    }

    #[tokio::test]
    async fn enable_requires_a_created_gadget() {
        let (_dir, engine) = sandbox();
        let err = engine.enable("g1", Some("ctrl0")).await.unwrap_err();
        assert!(matches!(err, GadgetError::NotCreated { id } if id == "g1"));
    }

    #[tokio::test]
    async fn disable_writes_exactly_one_newline() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();
        engine.enable("g1", Some("ctrl0")).await.unwrap();

        engine.disable("g1").await.unwrap();
        assert_eq!(std::fs::read(engine.layout().udc_attr("g1")).unwrap(), b"\n");
        assert_eq!(engine.bound_udc("g1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_remove_round_trip_is_clean() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();
        engine.enable("g1", Some("ctrl0")).await.unwrap();

        let report = engine.remove("g1").await.unwrap();
        assert!(report.is_clean(), "unexpected warnings: {:?}", report.warnings);
        assert!(!engine.layout().gadget_dir("g1").exists());
    }

    #[tokio::test]
    async fn remove_of_absent_gadget_is_a_noop() {
        let (_dir, engine) = sandbox();
        let report = engine.remove("never-created").await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn remove_tolerates_dangling_config_symlink() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();

        // Function directory vanishes out from under its config symlink.
        let root = engine.layout().gadget_dir("g1");
        std::fs::remove_dir_all(root.join("functions/hid.usb0")).unwrap();

        let report = engine.remove("g1").await.unwrap();
        assert!(report.is_clean(), "unexpected warnings: {:?}", report.warnings);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn remove_never_touches_reserved_config_attrs() {
        let (_dir, engine) = sandbox();
        engine.create(&demo_descriptor()).await.unwrap();

        let reserved = engine
            .layout()
            .gadget_dir("g1")
            .join("configs/c.1/MaxPower");
        std::fs::write(&reserved, "500\n").unwrap();

        let report = engine.remove("g1").await.unwrap();
        assert!(reserved.exists());
        // The non-empty config directory chain cannot go; reported, not raised.
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn hid_stream_resolves_by_name_and_is_cached() {
        let (_dir, engine) = sandbox();
        let handle = engine.create(&demo_descriptor()).await.unwrap();

        std::fs::create_dir_all(&engine.layout().dev_root).unwrap();
        std::fs::write(engine.layout().hidg_device(0), b"ping").unwrap();

        let stream = handle.hid_stream("usb0").await.unwrap();
        assert_eq!(stream.path(), engine.layout().hidg_device(0));
        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        let again = handle.hid_stream(0usize).await.unwrap();
        assert!(Arc::ptr_eq(&stream, &again));
    }
}
