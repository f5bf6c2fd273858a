//! Command-line options, plus the derived sizes the host negotiates from
//! them.

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// Floor for the plugin to UI communication rings, in bytes.
pub const MIN_RING_SIZE: u32 = 4096;

/// Run an LV2 plugin as a JACK client.
#[derive(Debug, Clone, Parser)]
#[clap(name = "jackal", about = None, long_about = None)]
pub struct HostConfig {
    /// The JACK client name. Defaults to the plugin name.
    #[clap(value_parser, short = 'n', long)]
    pub name: Option<String>,

    /// Fail if the requested client name is taken instead of picking a
    /// unique one.
    #[clap(short = 'x', long)]
    pub exact_name: bool,

    /// JACK session UUID.
    #[clap(value_parser, short = 'u', long)]
    pub uuid: Option<String>,

    /// Load state from a save directory, or from a state file inside one.
    /// The plugin URI is taken from the state when this is given.
    #[clap(value_parser, short = 'l', long)]
    pub load: Option<PathBuf>,

    /// Apply a preset state file after instantiation.
    #[clap(value_parser, short = 'p', long)]
    pub preset: Option<PathBuf>,

    /// Set a control value before activation, as symbol=value. May be
    /// repeated.
    #[clap(value_parser, short = 'c', long = "control")]
    pub controls: Vec<ControlOverride>,

    /// Size of each plugin to UI communication ring, in bytes.
    #[clap(value_parser, short = 'b', long)]
    pub buffer_size: Option<u32>,

    /// UI update rate in Hz.
    #[clap(value_parser, short = 'r', long)]
    pub update_rate: Option<f32>,

    /// Dump typed events sent between the plugin and the UI.
    #[clap(short = 'd', long)]
    pub dump: bool,

    /// Print the plugin's trace-class log messages.
    #[clap(short = 't', long)]
    pub trace: bool,

    /// Use the generic control surface even when the plugin ships a UI.
    #[clap(short = 'g', long)]
    pub generic_ui: bool,

    /// Show the plugin UI in its own window instead of embedding it.
    #[clap(short = 's', long)]
    pub show_ui: bool,

    /// Print control output changes to stdout.
    #[clap(short = 'i', long)]
    pub print_controls: bool,

    /// URI of the plugin to load. Optional when --load provides one.
    #[clap(value_parser)]
    pub plugin_uri: Option<String>,
}

/// One `symbol=value` control override from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOverride {
    pub symbol: String,
    pub value: f32,
}

impl FromStr for ControlOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, value) = s
            .split_once('=')
            .ok_or_else(|| format!("`{s}` is not of the form symbol=value"))?;
        if symbol.is_empty() {
            return Err(format!("`{s}` is missing the port symbol"));
        }
        let value = value
            .parse::<f32>()
            .map_err(|_| format!("`{value}` is not a number"))?;
        Ok(ControlOverride {
            symbol: symbol.to_owned(),
            value,
        })
    }
}

impl HostConfig {
    /// The UI update rate to use: the user's value clamped to [1, 60] Hz,
    /// or a rate derived from how often the MIDI buffers can fill.
    pub fn effective_update_rate(&self, sample_rate: f32, midi_buf_size: u32) -> f32 {
        let rate = match self.update_rate {
            Some(rate) => rate.max(1.0),
            None => (sample_rate / midi_buf_size as f32 * 2.0).max(25.0),
        };
        rate.min(60.0)
    }

    /// The UI ring size to use, honoring the user's request, the ports'
    /// declared minimums and the absolute floor.
    pub fn effective_ring_size(&self, midi_buf_size: u32, ports_minimum: u32) -> u32 {
        let size = self
            .buffer_size
            .unwrap_or_else(|| midi_buf_size * crate::port::N_BUFFER_CYCLES);
        size.max(ports_minimum).max(MIN_RING_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_full_flag_set() {
        let config = HostConfig::parse_from([
            "jackal",
            "-n",
            "myclient",
            "-x",
            "-c",
            "gain=0.5",
            "-c",
            "freq=440",
            "-b",
            "8192",
            "-r",
            "30",
            "-i",
            "http://example.org/plugin",
        ]);
        assert_eq!(config.name.as_deref(), Some("myclient"));
        assert!(config.exact_name);
        assert_eq!(config.controls.len(), 2);
        assert_eq!(config.controls[1].symbol, "freq");
        assert_eq!(config.controls[1].value, 440.0);
        assert_eq!(config.buffer_size, Some(8192));
        assert_eq!(config.update_rate, Some(30.0));
        assert!(config.print_controls);
        assert_eq!(config.plugin_uri.as_deref(), Some("http://example.org/plugin"));
    }

    #[test]
    fn control_override_rejects_malformed_input() {
        assert!(ControlOverride::from_str("gain").is_err());
        assert!(ControlOverride::from_str("=1.0").is_err());
        assert!(ControlOverride::from_str("gain=loud").is_err());
        assert_eq!(
            ControlOverride::from_str("gain=0.25").unwrap(),
            ControlOverride {
                symbol: "gain".to_owned(),
                value: 0.25
            }
        );
    }

    #[test]
    fn update_rate_derives_from_the_midi_buffer_and_clamps() {
        let base = HostConfig::parse_from(["jackal", "urn:x"]);
        // 48000 / 4096 * 2 is below the 25 Hz floor.
        assert_eq!(base.effective_update_rate(48000.0, 4096), 25.0);
        // A tiny MIDI buffer would update absurdly fast; clamp to 60.
        assert_eq!(base.effective_update_rate(48000.0, 64), 60.0);

        let slow = HostConfig::parse_from(["jackal", "-r", "0.1", "urn:x"]);
        assert_eq!(slow.effective_update_rate(48000.0, 4096), 1.0);
        let fast = HostConfig::parse_from(["jackal", "-r", "120", "urn:x"]);
        assert_eq!(fast.effective_update_rate(48000.0, 4096), 60.0);
    }

    #[test]
    fn ring_size_honors_floors() {
        let base = HostConfig::parse_from(["jackal", "urn:x"]);
        assert_eq!(base.effective_ring_size(4096, 0), 4096 * 16);
        // Small values are floored.
        let small = HostConfig::parse_from(["jackal", "-b", "64", "urn:x"]);
        assert_eq!(small.effective_ring_size(4096, 0), MIN_RING_SIZE);
        // Port minimums win over the user's request.
        assert_eq!(small.effective_ring_size(4096, 1 << 20), 1 << 20);
    }
}
