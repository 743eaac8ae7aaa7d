//! Device catalog and selection store
//!
//! The catalog is the list of endpoints currently visible to the OS; the
//! selection store records which of them the user picked. Both live in small
//! JSON files shared with the GUI/API front ends:
//!
//! - `midiUtility/midi_ports.json`: `available_midi_ports` + `selected_midi_port`
//! - `usbUtility/usb_ports.json`: `available_usb_devices` + `selected_usb_device`
//!
//! Refreshing a catalog only replaces the `available_*` list; every other key
//! (notably the selection) is preserved.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Number of trailing characters of a device string used as its match key
pub const MATCH_KEY_LEN: usize = 5;

/// JSON key holding the MIDI output list
const MIDI_LIST_KEY: &str = "available_midi_ports";
/// JSON key holding the serial device list
const SERIAL_LIST_KEY: &str = "available_usb_devices";

/// One visible endpoint. Only `match_key` takes part in resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub display_name: String,
    pub match_key: String,
}

impl CatalogEntry {
    /// Build an entry from a display name and the OS-reported device string
    pub fn from_path(display_name: impl Into<String>, path: &str) -> Self {
        Self {
            display_name: display_name.into(),
            match_key: match_key(path),
        }
    }
}

/// Derive the match key of an OS-reported device string.
///
/// Takes the last five characters and strips whitespace from them; strings
/// shorter than five characters are whitespace-stripped whole.
pub fn match_key(path: &str) -> String {
    let chars: Vec<char> = path.chars().collect();
    let tail = if chars.len() < MATCH_KEY_LEN {
        &chars[..]
    } else {
        &chars[chars.len() - MATCH_KEY_LEN..]
    };
    tail.iter().filter(|c| !c.is_whitespace()).collect()
}

/// Build a catalog from OS-reported device strings, using each string as its own name
pub fn catalog_from_paths<S: AsRef<str>>(paths: &[S]) -> Vec<CatalogEntry> {
    paths
        .iter()
        .map(|p| CatalogEntry::from_path(p.as_ref(), p.as_ref()))
        .collect()
}

/// The persisted user choice. An empty key means "no selection".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub chosen_match_key: String,
}

impl Selection {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            chosen_match_key: key.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chosen_match_key.is_empty()
    }
}

/// MIDI port record as stored in `midi_ports.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MidiPortRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub port_path: String,
}

/// Serial device record as stored in `usb_ports.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SerialDeviceRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_path: String,
}

/// Typed view of `midi_ports.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MidiPortsFile {
    #[serde(default)]
    pub available_midi_ports: Vec<MidiPortRecord>,
    #[serde(default)]
    pub selected_midi_port: Option<MidiPortRecord>,
}

impl MidiPortsFile {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    /// The selected output's port path; missing or empty means no selection
    pub fn selection(&self) -> Selection {
        self.selected_midi_port
            .as_ref()
            .map(|p| Selection::new(p.port_path.trim()))
            .unwrap_or_default()
    }
}

/// Typed view of `usb_ports.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SerialPortsFile {
    #[serde(default)]
    pub available_usb_devices: Vec<SerialDeviceRecord>,
    #[serde(default)]
    pub selected_usb_device: Option<String>,
}

impl SerialPortsFile {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    /// The selected serial match key; missing or empty means no selection
    pub fn selection(&self) -> Selection {
        self.selected_usb_device
            .as_deref()
            .map(|s| Selection::new(s.trim()))
            .unwrap_or_default()
    }
}

/// Split live MIDI port names into records.
///
/// A port name such as `"Midi Through:Midi Through Port-0 14:0"` is split at
/// its last space: the name is everything before, the port path everything
/// after. Names without a space carry no port path and are skipped.
pub fn parse_midi_port_names<S: AsRef<str>>(names: &[S]) -> Vec<MidiPortRecord> {
    names
        .iter()
        .filter_map(|full| {
            let full = full.as_ref().trim();
            match full.rsplit_once(' ') {
                Some((name, port_path)) => Some(MidiPortRecord {
                    name: name.to_string(),
                    port_path: port_path.to_string(),
                }),
                None => {
                    debug!("Skipping MIDI port without port path: '{}'", full);
                    None
                }
            }
        })
        .collect()
}

/// Replace the MIDI output list in `path`, preserving every other key
pub fn write_midi_catalog(path: &Path, ports: &[MidiPortRecord]) -> Result<()> {
    let value = serde_json::to_value(ports).context("Failed to serialize MIDI ports")?;
    write_merged(path, MIDI_LIST_KEY, value)
}

/// Replace the serial device list in `path`, preserving every other key
pub fn write_serial_catalog(path: &Path, devices: &[SerialDeviceRecord]) -> Result<()> {
    let value = serde_json::to_value(devices).context("Failed to serialize serial devices")?;
    write_merged(path, SERIAL_LIST_KEY, value)
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse catalog JSON: {}", path.display()))
}

fn write_merged(path: &Path, key: &str, value: Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    // An unreadable or malformed existing file is replaced rather than fatal
    let mut data: Map<String, Value> = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    data.insert(key.to_string(), value);

    let json = serde_json::to_string_pretty(&Value::Object(data))
        .context("Failed to serialize catalog file")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write catalog file: {}", path.display()))?;

    debug!("Catalog '{}' written to {}", key, path.display());
    Ok(())
}
