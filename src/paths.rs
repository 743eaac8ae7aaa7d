//! Application path layout
//!
//! Everything lives under one root directory:
//!
//! ```text
//! <root>/bin/modular-midi          executable
//! <root>/modularMidi.yaml          optional config
//! <root>/midiUtility/midi_ports.json
//! <root>/usbUtility/usb_ports.json
//! <root>/logs/
//! ```
//!
//! The root defaults to the parent of the executable's directory.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::CONFIG_FILE_NAME;

/// Environment variable overriding the application root
pub const ROOT_ENV_VAR: &str = "MODULAR_MIDI_ROOT";

/// Used under the user data directory when no executable path is available
const APP_NAME: &str = "modularMidi";

const MIDI_CATALOG: &str = "midiUtility/midi_ports.json";
const SERIAL_CATALOG: &str = "usbUtility/usb_ports.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root: explicit override, then `MODULAR_MIDI_ROOT`, then the
    /// executable layout.
    ///
    /// Called before logging is initialized.
    pub fn detect(root_override: Option<&Path>) -> Self {
        if let Some(root) = root_override {
            return Self::new(root);
        }
        if let Some(root) = std::env::var_os(ROOT_ENV_VAR).filter(|v| !v.is_empty()) {
            return Self::new(root);
        }

        let root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent()?.parent().map(Path::to_path_buf))
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_NAME)))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        eprintln!("[paths] Application root: {}", root.display());

        Self::new(root)
    }

    /// Default config file location
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn midi_catalog(&self) -> PathBuf {
        self.root.join(MIDI_CATALOG)
    }

    pub fn serial_catalog(&self) -> PathBuf {
        self.root.join(SERIAL_CATALOG)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the catalog and log directories if missing
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        let dirs = [self.midi_catalog(), self.serial_catalog()]
            .into_iter()
            .filter_map(|file| file.parent().map(Path::to_path_buf))
            .chain(std::iter::once(self.logs_dir()));

        for dir in dirs {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        Ok(())
    }
}
