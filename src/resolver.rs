//! Port resolution: bind a persisted selection to a live device index

use tracing::debug;

use crate::catalog::{CatalogEntry, Selection};
use crate::error::ResolveError;

/// Index into the catalog, in OS enumeration order
pub type DeviceIndex = usize;

/// Return the index of the first catalog entry whose match key equals the selection.
///
/// Catalog order is authoritative: the first match wins. Pure and idempotent.
pub fn resolve(catalog: &[CatalogEntry], selection: &Selection) -> Result<DeviceIndex, ResolveError> {
    if catalog.is_empty() {
        return Err(ResolveError::NoDevicesAvailable);
    }

    catalog
        .iter()
        .position(|entry| {
            debug!(
                "Checking '{}' (key '{}') against '{}'",
                entry.display_name, entry.match_key, selection.chosen_match_key
            );
            entry.match_key == selection.chosen_match_key
        })
        .ok_or_else(|| ResolveError::SelectionNotFound(selection.chosen_match_key.clone()))
}
