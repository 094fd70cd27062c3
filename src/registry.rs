//! Explicit, non-singleton collection of axes owned by the application and
//! indexed by name. Replaces a process-wide device registry (§9 redesign
//! note): handlers and tick tasks receive a reference to this, never a
//! global.

use crate::config::ServerConfig;
use crate::errors::CommandError;
use crate::servo::ServoController;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedAxis = Arc<Mutex<ServoController>>;

/// Owns one `ServoController` per configured axis behind its own mutex, so a
/// control-plane mutation on one axis never contends with a tick on another.
#[derive(Clone, Default)]
pub struct AxisRegistry {
    axes: HashMap<String, SharedAxis>,
}

impl AxisRegistry {
    pub fn from_config(config: &ServerConfig) -> Self {
        let axes = config
            .axes
            .iter()
            .cloned()
            .map(|axis_config| {
                let name = axis_config.name.clone();
                (name, Arc::new(Mutex::new(ServoController::new(axis_config))))
            })
            .collect();
        Self { axes }
    }

    pub fn get(&self, name: &str) -> Result<SharedAxis, CommandError> {
        self.axes
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::UnknownAxis(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.axes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SharedAxis)> {
        self.axes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisConfig;

    #[tokio::test]
    async fn looks_up_axis_by_name() {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            com_settings: Default::default(),
            state_file: "state.json".into(),
            axes: vec![AxisConfig {
                name: "ra".to_string(),
                ..Default::default()
            }],
            dry_run: true,
        };
        let registry = AxisRegistry::from_config(&config);
        let axis = registry.get("ra").expect("axis present");
        assert_eq!(axis.lock().await.name(), "ra");
        assert!(matches!(
            registry.get("dec"),
            Err(CommandError::UnknownAxis(_))
        ));
    }
}
