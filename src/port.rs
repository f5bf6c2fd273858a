//! The port table: one immutable descriptor plus mutable per-instance
//! state for every plugin port.
//!
//! Classification happens once, before the plugin or the JACK client
//! exist; a port's kind and flow never change afterwards. Mandatory ports
//! with an unknown kind or flow abort setup, optional ones are connected
//! to the null sink.

use anyhow::{bail, Result};
use lilv::plugin::Plugin;
use log::warn;

use crate::evbuf::{EvBuf, EvBufVariant};
use crate::urid::HostUrids;
use crate::world::WorldNodes;

/// UI ring size factor. The rings hold a few cycles worth of event output
/// so the UI thread gets a chance to keep up.
pub const N_BUFFER_CYCLES: u32 = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PortFlow {
    Unknown,
    Input,
    Output,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PortKind {
    Unknown,
    /// A single float updated at control rate.
    Control,
    Audio,
    Cv,
    /// A stream of timestamped typed events.
    Event,
}

/// The JACK port backing an audio or MIDI plugin port.
pub enum JackEndpoint {
    None,
    AudioIn(jack::Port<jack::AudioIn>),
    AudioOut(jack::Port<jack::AudioOut>),
    MidiIn(jack::Port<jack::MidiIn>),
    MidiOut(jack::Port<jack::MidiOut>),
}

pub struct Port {
    pub index: u32,
    pub symbol: String,
    pub name: String,
    pub flow: PortFlow,
    pub kind: PortKind,
    /// True for ports using the pre-atom event API.
    pub legacy_api: bool,
    pub optional: bool,
    pub supports_midi: bool,
    pub reports_latency: bool,
    /// Declared minimum event buffer size in bytes, or 0.
    pub min_buf_size: u32,
    /// Value of a control port. The plugin holds a pointer to this field
    /// for its whole lifetime, so ports must not move once connected.
    pub control: f32,
    pub evbuf: Option<EvBuf>,
    /// Zero buffer connected to CV ports, sized to the block length.
    pub cv_scratch: Vec<f32>,
    pub endpoint: JackEndpoint,
}

impl Port {
    pub fn is_event_input(&self) -> bool {
        self.kind == PortKind::Event && self.flow == PortFlow::Input
    }

    pub fn is_event_output(&self) -> bool {
        self.kind == PortKind::Event && self.flow == PortFlow::Output
    }
}

pub struct PortTable {
    pub ports: Vec<Port>,
    /// Index of the designated patch control input, if the plugin marks
    /// one.
    pub control_in: Option<u32>,
    /// Longest port symbol, for aligned console output.
    pub longest_symbol: usize,
}

impl PortTable {
    /// Classify every port from the plugin's metadata.
    pub fn from_plugin(plugin: &Plugin, nodes: &WorldNodes) -> Result<Self> {
        let ranges = plugin.port_ranges_float();
        let mut ports = Vec::new();

        for port in plugin.iter_ports() {
            let index = port.index();
            let symbol = port
                .symbol()
                .and_then(|s| s.as_str().map(str::to_owned))
                .unwrap_or_else(|| format!("port_{index}"));
            let name = port
                .name()
                .and_then(|n| n.as_str().map(str::to_owned))
                .unwrap_or_else(|| symbol.clone());

            let optional = port.has_property(&nodes.connection_optional);

            let flow = if port.is_a(&nodes.input_port) {
                PortFlow::Input
            } else if port.is_a(&nodes.output_port) {
                PortFlow::Output
            } else if optional {
                PortFlow::Unknown
            } else {
                bail!("mandatory port `{symbol}` is neither an input nor an output");
            };

            let (kind, legacy_api) = if port.is_a(&nodes.control_port) {
                (PortKind::Control, false)
            } else if port.is_a(&nodes.audio_port) {
                (PortKind::Audio, false)
            } else if port.is_a(&nodes.cv_port) {
                (PortKind::Cv, false)
            } else if port.is_a(&nodes.event_port) {
                (PortKind::Event, true)
            } else if port.is_a(&nodes.atom_port) {
                (PortKind::Event, false)
            } else if optional {
                (PortKind::Unknown, false)
            } else {
                bail!("mandatory port `{symbol}` has an unknown data type");
            };

            let mut control = 0.0;
            if kind == PortKind::Control {
                if let Some(range) = ranges.get(index) {
                    if range.default.is_finite() {
                        control = range.default;
                    }
                }
            }

            let min_buf_size = port
                .get(&nodes.minimum_size)
                .and_then(|n| n.as_int())
                .map(|n| n.max(0) as u32)
                .unwrap_or(0);

            ports.push(Port {
                index: index as u32,
                symbol,
                name,
                flow,
                kind,
                legacy_api,
                optional,
                supports_midi: port.supports_event(&nodes.midi_event),
                reports_latency: port.has_property(&nodes.reports_latency),
                min_buf_size,
                control,
                evbuf: None,
                cv_scratch: Vec::new(),
                endpoint: JackEndpoint::None,
            });
        }

        ports.sort_by_key(|p| p.index);

        let control_in = plugin
            .port_by_designation(&nodes.input_port, &nodes.core_control)
            .map(|p| p.index() as u32);

        let longest_symbol = ports.iter().map(|p| p.symbol.len()).max().unwrap_or(0);

        Ok(PortTable {
            ports,
            control_in,
            longest_symbol,
        })
    }

    /// The UI ring size implied by the ports' declared minimum sizes.
    pub fn min_ring_size(&self) -> u32 {
        self.ports
            .iter()
            .map(|p| p.min_buf_size.saturating_mul(N_BUFFER_CYCLES))
            .max()
            .unwrap_or(0)
    }

    /// Allocate event buffers once the block and MIDI buffer sizes are
    /// known. Runs again from the buffer-size callback, while the process
    /// cycle is quiescent.
    pub fn allocate_buffers(&mut self, midi_buf_size: u32, block_length: u32, urids: &HostUrids) {
        for port in &mut self.ports {
            match port.kind {
                PortKind::Event => {
                    let size = if port.min_buf_size > 0 {
                        port.min_buf_size
                    } else {
                        midi_buf_size
                    };
                    let variant = if port.legacy_api {
                        EvBufVariant::Event
                    } else {
                        EvBufVariant::Atom
                    };
                    port.evbuf = Some(EvBuf::new(
                        size,
                        variant,
                        urids.atom_chunk,
                        urids.atom_sequence,
                    ));
                }
                PortKind::Cv => {
                    port.cv_scratch = vec![0.0; block_length as usize];
                }
                _ => {}
            }
        }
    }

    /// Register JACK ports for everything with an external presence:
    /// audio ports, and event ports that speak MIDI.
    pub fn register_jack_ports(&mut self, client: &jack::Client) -> Result<()> {
        for port in &mut self.ports {
            port.endpoint = match (port.kind, port.flow) {
                (PortKind::Audio, PortFlow::Input) => {
                    JackEndpoint::AudioIn(client.register_port(&port.symbol, jack::AudioIn::default())?)
                }
                (PortKind::Audio, PortFlow::Output) => JackEndpoint::AudioOut(
                    client.register_port(&port.symbol, jack::AudioOut::default())?,
                ),
                (PortKind::Event, PortFlow::Input) if port.supports_midi => {
                    JackEndpoint::MidiIn(client.register_port(&port.symbol, jack::MidiIn::default())?)
                }
                (PortKind::Event, PortFlow::Output) if port.supports_midi => JackEndpoint::MidiOut(
                    client.register_port(&port.symbol, jack::MidiOut::default())?,
                ),
                (PortKind::Unknown, _) | (_, PortFlow::Unknown) => {
                    warn!("not connecting port `{}` with unknown type", port.symbol);
                    JackEndpoint::None
                }
                _ => JackEndpoint::None,
            };
        }
        Ok(())
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.symbol == symbol)
    }

    pub fn by_symbol_mut(&mut self, symbol: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_port(index: u32, symbol: &str, flow: PortFlow, kind: PortKind) -> Port {
        Port {
            index,
            symbol: symbol.to_owned(),
            name: symbol.to_owned(),
            flow,
            kind,
            legacy_api: false,
            optional: false,
            supports_midi: false,
            reports_latency: false,
            min_buf_size: 0,
            control: 0.0,
            evbuf: None,
            cv_scratch: Vec::new(),
            endpoint: JackEndpoint::None,
        }
    }

    fn test_table(ports: Vec<Port>) -> PortTable {
        let longest_symbol = ports.iter().map(|p| p.symbol.len()).max().unwrap_or(0);
        PortTable {
            ports,
            control_in: None,
            longest_symbol,
        }
    }

    #[test]
    fn ring_size_scales_with_declared_minimums() {
        let mut gain = test_port(0, "gain", PortFlow::Input, PortKind::Control);
        let mut events = test_port(1, "events", PortFlow::Input, PortKind::Event);
        gain.min_buf_size = 0;
        events.min_buf_size = 2048;
        let table = test_table(vec![gain, events]);
        assert_eq!(table.min_ring_size(), 2048 * N_BUFFER_CYCLES);
    }

    #[test]
    fn buffers_fall_back_to_the_midi_buffer_size() {
        let mapper = crate::urid::UridMapper::new();
        let urids = HostUrids::new(&mapper);

        let mut sized = test_port(0, "sized", PortFlow::Input, PortKind::Event);
        sized.min_buf_size = 512;
        let unsized = test_port(1, "unsized", PortFlow::Output, PortKind::Event);
        let mut table = test_table(vec![sized, unsized]);

        table.allocate_buffers(4096, 256, &urids);
        assert_eq!(table.ports[0].evbuf.as_ref().unwrap().capacity(), 512);
        assert_eq!(table.ports[1].evbuf.as_ref().unwrap().capacity(), 4096);
    }

    #[test]
    fn cv_ports_get_a_block_sized_scratch_buffer() {
        let mapper = crate::urid::UridMapper::new();
        let urids = HostUrids::new(&mapper);
        let mut table = test_table(vec![test_port(0, "cv", PortFlow::Input, PortKind::Cv)]);
        table.allocate_buffers(4096, 256, &urids);
        assert_eq!(table.ports[0].cv_scratch.len(), 256);
    }

    #[test]
    fn symbol_lookup_finds_ports() {
        let table = test_table(vec![
            test_port(0, "in", PortFlow::Input, PortKind::Audio),
            test_port(1, "gain", PortFlow::Input, PortKind::Control),
        ]);
        assert_eq!(table.by_symbol("gain").map(|p| p.index), Some(1));
        assert!(table.by_symbol("nope").is_none());
    }
}
