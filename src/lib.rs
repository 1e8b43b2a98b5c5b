//! USB composite gadget lifecycle management through Linux ConfigFS
//!
//! Creating directories and writing attribute files under the ConfigFS
//! gadget mount defines the USB descriptors a device controller presents
//! to a host. This crate turns a declarative [`GadgetDescriptor`] into the
//! correctly ordered sequence of directory, file and symlink operations,
//! and reverses that sequence safely during teardown, recovering from
//! gadgets that are only partially built or partially torn down.
//!
//! Architecture:
//! ```text
//! GadgetFs (lifecycle engine)
//!     ├── descriptor — normalization of the declarative description
//!     ├── create     — ordered tree construction
//!     ├── enable / disable — controller (UDC) binding
//!     └── remove     — fault-tolerant post-order teardown
//! GadgetHandle::hid_stream — duplex access to /dev/hidg<N>
//! ```
//!
//! Every filesystem step is awaited before the next, since later steps
//! depend on earlier directories existing. Operations on the same gadget
//! id must be serialized by the caller; the engine holds no cross-gadget
//! state beyond the filesystem namespace itself.

pub mod configfs;
pub mod descriptor;
pub mod error;
pub mod gadget;
pub mod hidg;
pub mod teardown;

pub use configfs::{find_udc, is_configfs_available, ConfigFsLayout};
pub use descriptor::{
    ConfigGroup, ConfigString, FunctionSpec, GadgetDescriptor, Report, StringTable,
};
pub use error::{GadgetError, Result};
pub use gadget::{GadgetFs, GadgetHandle};
pub use hidg::{wait_for_device, HidStream, StreamSelector};
pub use teardown::{TeardownReport, TeardownWarning};
