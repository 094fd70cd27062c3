//! Persisted per-axis state (§4.6): gains, filter alpha, slew rate, offset
//! and the last target, keyed by axis name. A missing or corrupt file is
//! non-fatal — the axis simply starts from its configuration defaults.

use crate::registry::AxisRegistry;
use crate::servo::AxisState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState(pub HashMap<String, AxisState>);

/// Loads the state file if present. A missing file is expected on first
/// run; a present-but-corrupt file is logged and treated as absent so
/// startup never fails on a damaged snapshot.
pub fn load(path: &Path) -> PersistedState {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "state file is corrupt, ignoring");
                PersistedState::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read state file, ignoring");
            PersistedState::default()
        }
    }
}

/// Applies a loaded snapshot to every axis present in both the registry and
/// the snapshot. Axes absent from the snapshot (e.g. newly added to
/// configuration) keep their constructed defaults.
pub async fn rehydrate(registry: &AxisRegistry, state: &PersistedState) {
    for (name, axis) in registry.iter() {
        if let Some(snapshot) = state.0.get(name) {
            axis.lock().await.rehydrate(snapshot);
        }
    }
}

/// Collects the current snapshot of every axis and writes it atomically
/// (write to a temp file, then rename) so a crash mid-write never leaves a
/// half-written state file behind.
pub async fn save(path: &Path, registry: &AxisRegistry) -> std::io::Result<()> {
    let mut state = PersistedState::default();
    for (name, axis) in registry.iter() {
        state.0.insert(name.clone(), axis.lock().await.state());
    }

    let contents = serde_json::to_string_pretty(&state)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    info!(path = %path.display(), "persisted axis state");
    Ok(())
}
