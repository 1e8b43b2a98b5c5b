//! Gadget descriptor model and normalization
//!
//! The descriptor is a declarative picture of one composite USB device:
//! identity attributes, per-locale string tables, function definitions and
//! configuration groupings. It deserializes from JSON with every field
//! defaulted, then [`normalize`](GadgetDescriptor::normalize) turns it into
//! the canonical form the tree builder consumes. Normalization is pure data
//! transformation; nothing here touches the filesystem.

use std::borrow::Cow;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GadgetError, Result};

fn attr_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Declarative description of one composite USB gadget.
///
/// `id` is the directory segment under the gadget root and the primary key
/// for enable/disable/remove. It defaults to empty and is validated at
/// operation time, not parse time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GadgetDescriptor {
    pub id: String,
    /// Preferred controller name; empty means auto-discover on enable.
    pub udc: String,
    #[serde(rename = "idVendor")]
    pub id_vendor: String,
    #[serde(rename = "idProduct")]
    pub id_product: String,
    pub strings: Vec<StringTable>,
    pub functions: Vec<FunctionSpec>,
    pub configs: Vec<ConfigGroup>,
}

impl Default for GadgetDescriptor {
    fn default() -> Self {
        Self {
            id: String::new(),
            udc: String::new(),
            id_vendor: "0x0000".to_string(),
            id_product: "0x0000".to_string(),
            strings: Vec::new(),
            functions: Vec::new(),
            configs: Vec::new(),
        }
    }
}

impl GadgetDescriptor {
    /// Produce the canonical descriptor: HID report descriptors given as
    /// hex text are decoded to raw bytes. A decode failure names the
    /// offending function.
    pub fn normalize(mut self) -> Result<Self> {
        for func in &mut self.functions {
            if func.kind == "hid" {
                let bytes = func.report.decode(&func.id)?.into_owned();
                func.report = Report::Bytes(bytes);
            }
        }
        Ok(self)
    }

    /// Ids of the HID-typed functions, in descriptor order. Position in
    /// this list is the `/dev/hidg<N>` device index.
    pub(crate) fn hid_function_ids(&self) -> Vec<String> {
        self.functions
            .iter()
            .filter(|f| f.kind == "hid")
            .map(|f| f.id.clone())
            .collect()
    }
}

/// Per-locale device string table, written under `strings/<locale>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StringTable {
    /// Locale code, e.g. `"0x409"`
    pub id: String,
    pub serialnumber: String,
    pub manufacturer: String,
    pub product: String,
    /// Extra attributes ride along and are written as same-named files,
    /// in caller order after the fixed fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StringTable {
    /// Attribute name/value pairs in write order.
    pub(crate) fn attrs(&self) -> Vec<(&str, String)> {
        let mut attrs = vec![
            ("serialnumber", self.serialnumber.clone()),
            ("manufacturer", self.manufacturer.clone()),
            ("product", self.product.clone()),
        ];
        attrs.extend(self.extra.iter().map(|(k, v)| (k.as_str(), attr_text(v))));
        attrs
    }
}

/// One USB function exposed by the gadget.
///
/// Only the `hid` type carries attributes of its own; any other type
/// creates its function directory and nothing else.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionSpec {
    /// Instance name, e.g. `"hid.usb0"`
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub report: Report,
}

/// HID report descriptor, accepted as hex text or raw bytes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Report {
    Hex(String),
    Bytes(Vec<u8>),
}

impl Default for Report {
    fn default() -> Self {
        Report::Hex(String::new())
    }
}

impl Report {
    /// The raw descriptor bytes, decoding the hex form on the fly.
    pub fn decode(&self, function: &str) -> Result<Cow<'_, [u8]>> {
        match self {
            Report::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            Report::Hex(text) => hex::decode(text.trim())
                .map(Cow::Owned)
                .map_err(|source| GadgetError::BadReportDescriptor {
                    function: function.to_string(),
                    source,
                }),
        }
    }
}

/// One USB configuration: a named bundle of functions the host can select.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigGroup {
    /// Instance name, e.g. `"c.1"`
    pub id: String,
    pub strings: Vec<ConfigString>,
    /// Function references by id. Weak references: resolved against the
    /// owning descriptor's function list at creation time, never held as
    /// object references.
    pub functions: Vec<String>,
}

/// Locale-scoped configuration description text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigString {
    pub id: String,
    pub configuration: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ConfigString {
    pub(crate) fn attrs(&self) -> Vec<(&str, String)> {
        let mut attrs = vec![("configuration", self.configuration.clone())];
        attrs.extend(self.extra.iter().map(|(k, v)| (k.as_str(), attr_text(v))));
        attrs
    }
}
