//! Command-line helpers: port listing, catalog refresh, one-shot sends

use anyhow::{bail, Context, Result};
use colored::*;
use tracing::{info, warn};

use crate::catalog::{match_key, parse_midi_port_names, write_midi_catalog, write_serial_catalog};
use crate::output::{MidiBackend, MidirBackend};
use crate::paths::AppPaths;
use crate::serial::port::list_serial_devices;

/// Print MIDI outputs and serial ports with the match key each resolves by
pub fn list_ports_formatted(backend: &MidirBackend) {
    println!("\n{}", "=== MIDI Output Ports ===".bold().cyan());
    match backend.output_port_names() {
        Ok(names) if names.is_empty() => println!("  {}", "No output ports found".dimmed()),
        Ok(names) => {
            for (index, name) in names.iter().enumerate() {
                println!(
                    "  {} {} {}",
                    format!("[{}]", index).green(),
                    name,
                    format!("(key: {})", match_key(name)).yellow()
                );
            }
        }
        Err(e) => println!("  {}", e.to_string().red()),
    }

    println!("\n{}", "=== Serial Ports ===".bold().cyan());
    match list_serial_devices() {
        Ok(devices) if devices.is_empty() => println!("  {}", "No serial ports found".dimmed()),
        Ok(devices) => {
            for (index, device) in devices.iter().enumerate() {
                println!(
                    "  {} {} {} {}",
                    format!("[{}]", index).green(),
                    device.name.bright_white(),
                    device.device_path,
                    format!("(key: {})", match_key(&device.device_path)).yellow()
                );
            }
        }
        Err(e) => println!("  {}", format!("Serial enumeration failed: {}", e).red()),
    }
    println!();
}

/// Rewrite both catalog files from live enumeration, keeping the stored selections
pub fn refresh_catalogs(paths: &AppPaths, backend: &MidirBackend) -> Result<()> {
    let names = backend
        .output_port_names()
        .context("Failed to enumerate MIDI outputs")?;
    let ports = parse_midi_port_names(&names);
    write_midi_catalog(&paths.midi_catalog(), &ports)?;
    info!(
        "Wrote {} MIDI outputs to {}",
        ports.len(),
        paths.midi_catalog().display()
    );

    match list_serial_devices() {
        Ok(devices) => {
            write_serial_catalog(&paths.serial_catalog(), &devices)?;
            info!(
                "Wrote {} serial devices to {}",
                devices.len(),
                paths.serial_catalog().display()
            );
        }
        Err(e) => warn!("Serial enumeration failed, {} left unchanged: {}", paths.serial_catalog().display(), e),
    }

    Ok(())
}

/// Parse `"cc:value,cc:value"` into parallel controller and value rows.
///
/// Numbers are only checked for syntax here; range checks happen when the
/// batch is built.
pub fn parse_send_spec(spec: &str) -> Result<(Vec<i32>, Vec<i32>)> {
    let mut controllers = Vec::new();
    let mut values = Vec::new();

    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((cc, value)) = item.split_once(':') else {
            bail!("Invalid send entry '{}' (expected cc:value)", item);
        };
        controllers.push(
            cc.trim()
                .parse()
                .with_context(|| format!("Invalid CC number in '{}'", item))?,
        );
        values.push(
            value
                .trim()
                .parse()
                .with_context(|| format!("Invalid CC value in '{}'", item))?,
        );
    }

    if controllers.is_empty() {
        bail!("Nothing to send");
    }
    Ok((controllers, values))
}
