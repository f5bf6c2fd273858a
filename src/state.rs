//! Saving and restoring host state.
//!
//! State is a JSON document holding the plugin URI and the control port
//! values by symbol. Loading only trusts those two things: the URI picks
//! the plugin, the value map restores the ports, and everything else in a
//! save directory belongs to the plugin itself (written through the
//! make-path feature).

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::port::{PortFlow, PortKind, PortTable};

pub const STATE_FILE: &str = "state.json";

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostState {
    pub version: u32,
    pub plugin_uri: String,
    /// Control input values by port symbol. A BTreeMap keeps saved files
    /// stable across runs.
    pub controls: BTreeMap<String, f32>,
}

impl HostState {
    pub fn from_ports(plugin_uri: &str, ports: &PortTable) -> Self {
        let controls = ports
            .ports
            .iter()
            .filter(|p| p.kind == PortKind::Control && p.flow == PortFlow::Input)
            .map(|p| (p.symbol.clone(), p.control))
            .collect();
        HostState {
            version: STATE_VERSION,
            plugin_uri: plugin_uri.to_owned(),
            controls,
        }
    }

    /// Load state from a save directory or directly from a state file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(STATE_FILE)
        } else {
            path.to_owned()
        };
        let data = fs::read_to_string(&file)
            .with_context(|| format!("could not read state from {}", file.display()))?;
        let state: HostState = serde_json::from_str(&data)
            .with_context(|| format!("{} is not a valid state file", file.display()))?;
        Ok(state)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create save directory {}", dir.display()))?;
        let file = dir.join(STATE_FILE);
        let data = serde_json::to_string_pretty(self).context("could not serialise state")?;
        fs::write(&file, data)
            .with_context(|| format!("could not write state to {}", file.display()))?;
        Ok(())
    }

    /// Write the saved control values into the port table. Symbols that no
    /// longer exist are warnings, not errors, so state from older plugin
    /// versions still applies.
    pub fn apply(&self, ports: &mut PortTable) {
        for (symbol, value) in &self.controls {
            match ports.by_symbol_mut(symbol) {
                Some(port) if port.kind == PortKind::Control => port.control = *value,
                Some(_) => warn!("saved value for `{symbol}` no longer names a control port"),
                None => warn!("ignoring saved value for unknown port `{symbol}`"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{JackEndpoint, Port, PortTable};

    fn control_port(index: u32, symbol: &str, value: f32) -> Port {
        Port {
            index,
            symbol: symbol.to_owned(),
            name: symbol.to_owned(),
            flow: PortFlow::Input,
            kind: PortKind::Control,
            legacy_api: false,
            optional: false,
            supports_midi: false,
            reports_latency: false,
            min_buf_size: 0,
            control: value,
            evbuf: None,
            cv_scratch: Vec::new(),
            endpoint: JackEndpoint::None,
        }
    }

    fn table(ports: Vec<Port>) -> PortTable {
        PortTable {
            longest_symbol: ports.iter().map(|p| p.symbol.len()).max().unwrap_or(0),
            ports,
            control_in: None,
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ports = table(vec![
            control_port(0, "gain", 0.25),
            control_port(1, "freq", 440.0),
        ]);

        let state = HostState::from_ports("http://example.org/plugin", &ports);
        state.save(dir.path()).unwrap();

        let loaded = HostState::load(dir.path()).unwrap();
        assert_eq!(loaded.plugin_uri, "http://example.org/plugin");
        assert_eq!(loaded.controls.get("gain"), Some(&0.25));
        assert_eq!(loaded.controls.get("freq"), Some(&440.0));

        // Loading the file directly works too.
        let loaded = HostState::load(&dir.path().join(STATE_FILE)).unwrap();
        assert_eq!(loaded.controls.len(), 2);
    }

    #[test]
    fn apply_restores_known_controls_and_skips_the_rest() {
        let mut ports = table(vec![control_port(0, "gain", 0.0)]);
        let mut controls = BTreeMap::new();
        controls.insert("gain".to_owned(), 0.75);
        controls.insert("gone".to_owned(), 1.0);
        let state = HostState {
            version: STATE_VERSION,
            plugin_uri: "urn:x".to_owned(),
            controls,
        };

        state.apply(&mut ports);
        assert_eq!(ports.ports[0].control, 0.75);
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HostState::load(dir.path()).is_err());

        fs::write(dir.path().join(STATE_FILE), "not json").unwrap();
        assert!(HostState::load(dir.path()).is_err());
    }
}
