//! The realtime process cycle.
//!
//! The engine is the JACK process handler. It owns the activated plugin,
//! the port table and the realtime ends of every ring. Inside the cycle
//! nothing allocates, blocks or takes a lock; the only cross-thread
//! traffic goes through the rings, a handful of atomics and the pause
//! acknowledgement token.

use crossbeam::sync::{Parker, Unparker};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::atom::{self, split_atom, ObjectWriter};
use crate::port::{JackEndpoint, PortFlow, PortKind, PortTable};
use crate::ring::{ControlReceiver, ControlRecv, ControlSender, PROTOCOL_FLOAT};
use crate::urid::HostUrids;
use crate::worker::WorkerRt;
use crate::world::PluginInstance;

/// Scratch reserved on the stack for the forged transport position atom.
const POSITION_BUF_SIZE: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum PlayState {
    Running = 0,
    /// The controller asked for a pause; the next cycle acknowledges it.
    PauseRequested = 1,
    /// The cycle only writes silence until resumed.
    Paused = 2,
}

/// State shared between the controller and the process cycle.
pub struct SharedState {
    play_state: AtomicU8,
    /// Set by the controller after restoring state; the next cycle
    /// broadcasts a patch:Get so the plugin re-announces its properties.
    pub state_changed: AtomicBool,
    /// Latency reported by the plugin, in frames.
    pub plugin_latency: AtomicU32,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(SharedState {
            play_state: AtomicU8::new(PlayState::Paused as u8),
            state_changed: AtomicBool::new(false),
            plugin_latency: AtomicU32::new(0),
        })
    }

    pub fn play_state(&self) -> PlayState {
        match self.play_state.load(Ordering::Acquire) {
            0 => PlayState::Running,
            1 => PlayState::PauseRequested,
            _ => PlayState::Paused,
        }
    }

    pub fn set_play_state(&self, state: PlayState) {
        self.play_state.store(state as u8, Ordering::Release);
    }
}

/// The controller's handle on the play state machine.
pub struct PlayControl {
    shared: Arc<SharedState>,
    parker: Parker,
}

impl PlayControl {
    /// Returns the control handle and the token the engine posts when a
    /// pause request has been honored.
    pub fn new(shared: Arc<SharedState>) -> (Self, Unparker) {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        (PlayControl { shared, parker }, unparker)
    }

    /// Ask the cycle to pause and wait for the acknowledgement. At most
    /// one further cycle runs in between.
    pub fn pause(&self) {
        if self.shared.play_state() == PlayState::Paused {
            return;
        }
        self.shared.set_play_state(PlayState::PauseRequested);
        self.parker.park_timeout(Duration::from_secs(1));
        if self.shared.play_state() != PlayState::Paused {
            warn!("the process cycle did not acknowledge the pause request");
        }
    }

    pub fn resume(&self) {
        self.shared.set_play_state(PlayState::Running);
    }
}

/// What the cycle compares against the audio server's transport each time
/// around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportSnapshot {
    pub rolling: bool,
    pub frame: u64,
    pub bpm: f32,
    pub bbt: Option<TransportBbt>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportBbt {
    pub bar: i64,
    pub beat: i32,
    pub tick: i32,
    pub beats_per_bar: f32,
    pub beat_unit: i32,
    pub ticks_per_beat: f64,
}

impl TransportSnapshot {
    pub fn stopped() -> Self {
        TransportSnapshot {
            rolling: false,
            frame: 0,
            bpm: 120.0,
            bbt: None,
        }
    }

    /// Whether a position event must be sent to the plugin this cycle.
    pub fn differs_from(&self, prev: &TransportSnapshot) -> bool {
        self.rolling != prev.rolling || self.frame != prev.frame || self.bpm != prev.bpm
    }
}

/// Serialise a time:Position object describing `snapshot` into `buf`.
pub fn forge_position<'a>(
    buf: &'a mut [u8],
    urids: &HostUrids,
    snapshot: &TransportSnapshot,
) -> Option<&'a [u8]> {
    let mut writer = ObjectWriter::new(buf, urids.atom_object, urids.time_position);
    writer.property_long(urids.time_frame, urids.atom_long, snapshot.frame as i64);
    writer.property_float(
        urids.time_speed,
        urids.atom_float,
        if snapshot.rolling { 1.0 } else { 0.0 },
    );
    if let Some(bbt) = snapshot.bbt {
        let beat_fraction = if bbt.ticks_per_beat > 0.0 {
            (bbt.tick as f64 / bbt.ticks_per_beat) as f32
        } else {
            0.0
        };
        writer.property_float(
            urids.time_bar_beat,
            urids.atom_float,
            (bbt.beat - 1) as f32 + beat_fraction,
        );
        writer.property_long(urids.time_bar, urids.atom_long, bbt.bar - 1);
        writer.property_int(urids.time_beat_unit, urids.atom_int, bbt.beat_unit);
        writer.property_float(urids.time_beats_per_bar, urids.atom_float, bbt.beats_per_bar);
        writer.property_float(
            urids.time_beats_per_minute,
            urids.atom_float,
            snapshot.bpm,
        );
    }
    writer.finish()
}

/// True when enough frames have passed since the last UI refresh.
pub fn ui_update_due(frames_since_update: u32, sample_rate: u32, update_hz: f32) -> bool {
    frames_since_update as f32 > sample_rate as f32 / update_hz
}

pub struct EngineConfig {
    pub instance: PluginInstance,
    pub ports: PortTable,
    pub urids: HostUrids,
    pub shared: Arc<SharedState>,
    pub paused_ack: Unparker,
    /// UI to plugin ring, read end.
    pub ui_rx: ControlReceiver,
    /// Plugin to UI ring, write end.
    pub ui_tx: ControlSender,
    pub worker: WorkerRt,
    pub sample_rate: u32,
    pub ui_update_hz: f32,
    pub midi_buf_size: u32,
    pub ring_size: usize,
}

pub struct Engine {
    instance: PluginInstance,
    ports: PortTable,
    urids: HostUrids,
    shared: Arc<SharedState>,
    paused_ack: Unparker,
    ui_rx: ControlReceiver,
    ui_tx: ControlSender,
    worker: WorkerRt,
    ui_scratch: Box<[u8]>,
    sample_rate: u32,
    ui_update_hz: f32,
    midi_buf_size: u32,
    event_delta_t: u32,
    transport: TransportSnapshot,
    last_latency: f32,
}

impl Engine {
    /// Build the engine and connect every statically connectable port.
    /// Event buffers must already be allocated.
    pub fn new(config: EngineConfig) -> Engine {
        let mut engine = Engine {
            instance: config.instance,
            ports: config.ports,
            urids: config.urids,
            shared: config.shared,
            paused_ack: config.paused_ack,
            ui_rx: config.ui_rx,
            ui_tx: config.ui_tx,
            worker: config.worker,
            ui_scratch: vec![0u8; config.ring_size].into_boxed_slice(),
            sample_rate: config.sample_rate,
            ui_update_hz: config.ui_update_hz,
            midi_buf_size: config.midi_buf_size,
            event_delta_t: 0,
            transport: TransportSnapshot::stopped(),
            last_latency: 0.0,
        };
        engine.connect_static_ports();
        engine
    }

    /// Connect control values, event buffers, CV scratch and null sinks.
    /// Audio ports are connected to the server's buffers every cycle.
    fn connect_static_ports(&mut self) {
        for port in self.ports.ports.iter_mut() {
            let index = port.index as usize;
            if port.kind == PortKind::Unknown || port.flow == PortFlow::Unknown {
                unsafe { self.instance.connect_null(index) };
                continue;
            }
            match port.kind {
                PortKind::Control => unsafe {
                    self.instance.connect_mut(index, &mut port.control);
                },
                PortKind::Event => {
                    if let Some(evbuf) = &mut port.evbuf {
                        unsafe { self.instance.connect_mut(index, evbuf.as_ptr()) };
                    }
                }
                PortKind::Cv => unsafe {
                    self.instance.connect_mut(index, port.cv_scratch.as_mut_ptr());
                },
                _ => {}
            }
        }
    }

    /// Free the event buffers once the audio server has been deactivated.
    /// The process callback no longer runs, so the buffer pointers the
    /// plugin holds are never read again before the instance is freed.
    pub fn free_buffers(&mut self) {
        for port in self.ports.ports.iter_mut() {
            port.evbuf = None;
        }
    }

    /// Deactivate and free the plugin, then release everything else the
    /// cycle owned. Called after the audio server connection is closed.
    pub fn teardown(self) {
        self.instance.deactivate();
    }

    fn silence_outputs(&mut self, ps: &jack::ProcessScope) {
        for port in self.ports.ports.iter_mut() {
            match &mut port.endpoint {
                JackEndpoint::AudioOut(p) => p.as_mut_slice(ps).fill(0.0),
                // Fetching the writer clears the server's MIDI buffer.
                JackEndpoint::MidiOut(p) => {
                    let _ = p.writer(ps);
                }
                _ => {}
            }
        }
    }
}

/// Apply control changes queued by the UI thread. UI events are stamped at
/// the end of the cycle so they never interleave with sample-accurate
/// input recorded earlier in it.
fn apply_ui_events(
    ui_rx: &mut ControlReceiver,
    scratch: &mut [u8],
    ports: &mut PortTable,
    urids: &HostUrids,
    nframes: u32,
) {
    loop {
        match ui_rx.recv(scratch) {
            ControlRecv::Empty => break,
            ControlRecv::Malformed => {
                error!("truncated record in the UI ring, skipping the rest of this cycle");
                break;
            }
            ControlRecv::Record(header) => {
                let Some(port) = ports.ports.get_mut(header.index as usize) else {
                    warn!("UI wrote to out of range port index {}", header.index);
                    continue;
                };
                let body = &scratch[..header.size as usize];

                if header.protocol == PROTOCOL_FLOAT && header.size == 4 {
                    port.control = f32::from_ne_bytes(body.try_into().unwrap());
                } else if header.protocol == urids.atom_event_transfer {
                    let Some(evbuf) = port.evbuf.as_mut() else {
                        warn!("UI event for port `{}` which takes no events", port.symbol);
                        continue;
                    };
                    match split_atom(body) {
                        Some((typ, atom_body)) => {
                            let mut writer = evbuf.writer();
                            if !writer.write(nframes, 0, typ, atom_body) {
                                warn!("event buffer full, dropping UI event");
                            }
                        }
                        None => warn!("malformed atom from the UI, dropping it"),
                    }
                } else {
                    error!("unknown control protocol {} from the UI", header.protocol);
                }
            }
        }
    }
}

fn read_transport(client: &jack::Client, prev: &TransportSnapshot) -> TransportSnapshot {
    match client.transport().query() {
        Ok(state_pos) => {
            let rolling = matches!(state_pos.state, jack::TransportState::Rolling);
            let frame = state_pos.pos.frame() as u64;
            let bbt = state_pos.pos.bbt().map(|b| TransportBbt {
                bar: b.bar as i64,
                beat: b.beat as i32,
                tick: b.tick as i32,
                beats_per_bar: b.sig_num as f32,
                beat_unit: b.sig_denom as i32,
                ticks_per_beat: b.ticks_per_beat,
            });
            let bpm = state_pos
                .pos
                .bbt()
                .map(|b| b.bpm as f32)
                .unwrap_or(prev.bpm);
            TransportSnapshot {
                rolling,
                frame,
                bpm,
                bbt,
            }
        }
        Err(_) => *prev,
    }
}

impl jack::ProcessHandler for Engine {
    fn process(&mut self, client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let nframes = ps.n_frames();

        // Compare the server transport against what this cycle expected.
        let snapshot = read_transport(client, &self.transport);
        let xport_changed = snapshot.differs_from(&self.transport);

        let mut pos_buf = [0u8; POSITION_BUF_SIZE];
        let pos_event = if xport_changed {
            forge_position(&mut pos_buf, &self.urids, &snapshot).and_then(split_atom)
        } else {
            None
        };

        // Expected transport for the next cycle: a rolling transport that
        // merely advanced by one period is not a change.
        self.transport = TransportSnapshot {
            frame: if snapshot.rolling {
                snapshot.frame + nframes as u64
            } else {
                snapshot.frame
            },
            ..snapshot
        };

        match self.shared.play_state() {
            PlayState::PauseRequested => {
                self.shared.set_play_state(PlayState::Paused);
                self.paused_ack.unpark();
            }
            PlayState::Paused => {
                self.silence_outputs(ps);
                return jack::Control::Continue;
            }
            PlayState::Running => {}
        }

        let state_changed = self.shared.state_changed.swap(false, Ordering::AcqRel);
        let mut patch_buf = [0u8; 16];
        let patch_event = if state_changed {
            ObjectWriter::new(&mut patch_buf, self.urids.atom_object, self.urids.patch_get)
                .finish()
                .and_then(split_atom)
        } else {
            None
        };

        // Fan-in: hand the plugin its buffers for this cycle.
        for port in self.ports.ports.iter_mut() {
            let index = port.index as usize;
            match port.kind {
                PortKind::Audio => match &mut port.endpoint {
                    JackEndpoint::AudioIn(p) => unsafe {
                        self.instance.connect(index, p.as_slice(ps).as_ptr());
                    },
                    JackEndpoint::AudioOut(p) => unsafe {
                        self.instance
                            .connect_mut(index, p.as_mut_slice(ps).as_mut_ptr());
                    },
                    _ => {}
                },
                PortKind::Event if port.flow == PortFlow::Input => {
                    let Some(evbuf) = port.evbuf.as_mut() else {
                        continue;
                    };
                    evbuf.reset(true);
                    let mut writer = evbuf.writer();

                    if let Some((typ, body)) = pos_event {
                        if !writer.write(0, 0, typ, body) {
                            warn!("event buffer full, dropping transport position");
                        }
                    }
                    if let Some((typ, body)) = patch_event {
                        if !writer.write(0, 0, typ, body) {
                            warn!("event buffer full, dropping patch request");
                        }
                    }
                    if let JackEndpoint::MidiIn(p) = &port.endpoint {
                        for event in p.iter(ps) {
                            if !writer.write(event.time, 0, self.urids.midi_event, event.bytes) {
                                warn!("event buffer full, dropping MIDI input");
                            }
                        }
                    }
                }
                PortKind::Event => {
                    if let Some(evbuf) = port.evbuf.as_mut() {
                        evbuf.reset(false);
                    }
                }
                _ => {}
            }
        }

        apply_ui_events(
            &mut self.ui_rx,
            &mut self.ui_scratch,
            &mut self.ports,
            &self.urids,
            nframes,
        );

        unsafe {
            self.instance.run(nframes as usize);
        }

        // Deliver worker replies, then let the plugin finish the cycle.
        self.worker.emit_responses();
        self.worker.end_run();

        self.event_delta_t += nframes;
        let send_ui_updates = ui_update_due(self.event_delta_t, self.sample_rate, self.ui_update_hz);
        if send_ui_updates {
            self.event_delta_t = 0;
        }

        // Fan-out: external MIDI, UI events and throttled control values.
        for port in self.ports.ports.iter_mut() {
            if port.flow == PortFlow::Output
                && port.kind == PortKind::Control
                && port.reports_latency
                && self.last_latency != port.control
            {
                self.last_latency = port.control;
                self.shared
                    .plugin_latency
                    .store(port.control.max(0.0) as u32, Ordering::Release);
                debug!("plugin latency is now {} frames", port.control);
            }

            if port.flow == PortFlow::Output && port.kind == PortKind::Event {
                let Some(evbuf) = port.evbuf.as_ref() else {
                    continue;
                };
                let mut midi_out = match &mut port.endpoint {
                    // Fetching the writer clears the buffer first.
                    JackEndpoint::MidiOut(p) => Some(p.writer(ps)),
                    _ => None,
                };

                let mut overflowed = false;
                for record in evbuf.begin() {
                    if let Some(writer) = midi_out.as_mut() {
                        if record.event_type == self.urids.midi_event {
                            let _ = writer.write(&jack::RawMidi {
                                time: record.frames,
                                bytes: record.body,
                            });
                        }
                    }

                    if !port.legacy_api && !overflowed {
                        let mut header = [0u8; atom::ATOM_HEADER_SIZE];
                        atom::write_atom_header(
                            &mut header,
                            record.body.len() as u32,
                            record.event_type,
                        );
                        if !self.ui_tx.send_split(
                            port.index,
                            self.urids.atom_event_transfer,
                            &header,
                            record.body,
                        ) {
                            error!("plugin to UI ring overflow, dropping events");
                            overflowed = true;
                        }
                    }
                }
            } else if send_ui_updates
                && port.flow != PortFlow::Input
                && port.kind == PortKind::Control
                && !self.ui_tx.send_float(port.index, port.control)
            {
                error!("plugin to UI ring overflow, dropping control update");
            }
        }

        jack::Control::Continue
    }

    /// Block length changed. The server guarantees the process callback is
    /// quiescent, so reallocating and reconnecting the event buffers here
    /// is safe.
    fn buffer_size(&mut self, _client: &jack::Client, size: jack::Frames) -> jack::Control {
        self.ports
            .allocate_buffers(self.midi_buf_size, size, &self.urids);
        for port in self.ports.ports.iter_mut() {
            let index = port.index as usize;
            match port.kind {
                PortKind::Event => {
                    if let Some(evbuf) = &mut port.evbuf {
                        unsafe { self.instance.connect_mut(index, evbuf.as_ptr()) };
                    }
                }
                PortKind::Cv => unsafe {
                    self.instance.connect_mut(index, port.cv_scratch.as_mut_ptr());
                },
                _ => {}
            }
        }
        jack::Control::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evbuf::{EvBuf, EvBufVariant};
    use crate::port::Port;
    use crate::ring::control_channel;
    use crate::urid::UridMapper;

    fn urids() -> HostUrids {
        HostUrids::new(&UridMapper::new())
    }

    fn stub_port(index: u32, symbol: &str, flow: PortFlow, kind: PortKind) -> Port {
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

    fn stub_table(ports: Vec<Port>) -> PortTable {
        PortTable {
            longest_symbol: ports.iter().map(|p| p.symbol.len()).max().unwrap_or(0),
            ports,
            control_in: None,
        }
    }

    #[test]
    fn ui_float_records_set_control_values() {
        let urids = urids();
        let (mut tx, mut rx) = control_channel(1024);
        let mut gain = stub_port(0, "gain", PortFlow::Input, PortKind::Control);
        gain.control = 0.5;
        let mut ports = stub_table(vec![gain]);

        assert!(tx.send_float(0, 0.25));
        let mut scratch = [0u8; 64];
        apply_ui_events(&mut rx, &mut scratch, &mut ports, &urids, 64);

        assert_eq!(ports.ports[0].control, 0.25);
    }

    #[test]
    fn ui_typed_events_land_at_the_end_of_the_cycle() {
        let urids = urids();
        let (mut tx, mut rx) = control_channel(1024);
        let mut events = stub_port(0, "events", PortFlow::Input, PortKind::Event);
        events.evbuf = Some(EvBuf::new(
            256,
            EvBufVariant::Atom,
            urids.atom_chunk,
            urids.atom_sequence,
        ));
        let mut ports = stub_table(vec![events]);

        // An atom of type 77 with a 4 byte body, framed for event transfer.
        let mut atom = [0u8; 12];
        atom::write_atom_header(&mut atom, 4, 77);
        atom[8..12].copy_from_slice(&[1, 2, 3, 4]);
        assert!(tx.send(0, urids.atom_event_transfer, &atom));

        let mut scratch = [0u8; 64];
        apply_ui_events(&mut rx, &mut scratch, &mut ports, &urids, 64);

        let evbuf = ports.ports[0].evbuf.as_ref().unwrap();
        let records: Vec<_> = evbuf.begin().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frames, 64);
        assert_eq!(records[0].event_type, 77);
        assert_eq!(records[0].body, &[1, 2, 3, 4]);
    }

    #[test]
    fn unknown_ui_protocols_are_dropped() {
        let urids = urids();
        let (mut tx, mut rx) = control_channel(1024);
        let mut gain = stub_port(0, "gain", PortFlow::Input, PortKind::Control);
        gain.control = 0.5;
        let mut ports = stub_table(vec![gain]);

        assert!(tx.send(0, 0xbad, &[0; 4]));
        let mut scratch = [0u8; 64];
        apply_ui_events(&mut rx, &mut scratch, &mut ports, &urids, 64);

        assert_eq!(ports.ports[0].control, 0.5);
    }

    #[test]
    fn transport_change_detection_matches_the_cycle_rules() {
        let prev = TransportSnapshot::stopped();
        assert!(!prev.differs_from(&prev));

        let rolling = TransportSnapshot {
            rolling: true,
            ..prev
        };
        assert!(rolling.differs_from(&prev));

        let moved = TransportSnapshot {
            frame: 512,
            ..prev
        };
        assert!(moved.differs_from(&prev));

        let retempoed = TransportSnapshot { bpm: 140.0, ..prev };
        assert!(retempoed.differs_from(&prev));

        // BBT details alone do not retrigger a position event.
        let bbt_only = TransportSnapshot {
            bbt: Some(TransportBbt {
                bar: 1,
                beat: 1,
                tick: 0,
                beats_per_bar: 4.0,
                beat_unit: 4,
                ticks_per_beat: 1920.0,
            }),
            ..prev
        };
        assert!(!bbt_only.differs_from(&prev));
    }

    #[test]
    fn an_advancing_rolling_transport_is_not_a_change() {
        // What the cycle stores as its expectation after seeing frame 0
        // while rolling with 64 frame periods.
        let expected = TransportSnapshot {
            rolling: true,
            frame: 64,
            bpm: 120.0,
            bbt: None,
        };
        let next_query = TransportSnapshot {
            rolling: true,
            frame: 64,
            bpm: 120.0,
            bbt: None,
        };
        assert!(!next_query.differs_from(&expected));
    }

    #[test]
    fn forged_position_is_a_time_position_object() {
        let urids = urids();
        let snapshot = TransportSnapshot {
            rolling: true,
            frame: 12345,
            bpm: 120.0,
            bbt: Some(TransportBbt {
                bar: 3,
                beat: 2,
                tick: 960,
                beats_per_bar: 4.0,
                beat_unit: 4,
                ticks_per_beat: 1920.0,
            }),
        };

        let mut buf = [0u8; POSITION_BUF_SIZE];
        let atom = forge_position(&mut buf, &urids, &snapshot).unwrap();
        let (typ, body) = split_atom(atom).unwrap();
        assert_eq!(typ, urids.atom_object);
        // Object body: id and otype.
        assert_eq!(
            u32::from_ne_bytes(body[4..8].try_into().unwrap()),
            urids.time_position
        );
        // First property is time:frame with a long value.
        assert_eq!(
            u32::from_ne_bytes(body[8..12].try_into().unwrap()),
            urids.time_frame
        );
        assert_eq!(
            i64::from_ne_bytes(body[24..32].try_into().unwrap()),
            12345
        );
    }

    #[test]
    fn position_without_bbt_omits_the_tempo_properties() {
        let urids = urids();
        let mut with = [0u8; POSITION_BUF_SIZE];
        let mut without = [0u8; POSITION_BUF_SIZE];

        let plain = TransportSnapshot {
            rolling: false,
            frame: 0,
            bpm: 120.0,
            bbt: None,
        };
        let len_without = forge_position(&mut without, &urids, &plain).unwrap().len();

        let bbt = TransportSnapshot {
            bbt: Some(TransportBbt {
                bar: 1,
                beat: 1,
                tick: 0,
                beats_per_bar: 4.0,
                beat_unit: 4,
                ticks_per_beat: 1920.0,
            }),
            ..plain
        };
        let len_with = forge_position(&mut with, &urids, &bbt).unwrap().len();
        assert!(len_with > len_without);
    }

    #[test]
    fn ui_updates_respect_the_update_rate() {
        let sample_rate = 48000;
        let hz = 30.0;
        // Just under one update period of frames: not yet.
        assert!(!ui_update_due(1500, sample_rate, hz));
        // Just over: due.
        assert!(ui_update_due(1601, sample_rate, hz));

        // Counting cycles of 512 frames, an update happens at most every
        // ceil(1600 / 512) cycles.
        let mut delta = 0;
        let mut updates = 0;
        for _ in 0..100 {
            delta += 512;
            if ui_update_due(delta, sample_rate, hz) {
                updates += 1;
                delta = 0;
            }
        }
        // 100 cycles of 512 frames is ~1.07 s; 30 Hz would be 32 updates,
        // and the throttle must stay at or under that.
        assert!(updates <= 32, "sent {updates} updates");
        assert!(updates >= 25, "sent only {updates} updates");
    }

    #[test]
    fn play_state_transitions_round_trip_through_the_shared_state() {
        let shared = SharedState::new();
        assert_eq!(shared.play_state(), PlayState::Paused);

        let (control, ack) = PlayControl::new(Arc::clone(&shared));
        control.resume();
        assert_eq!(shared.play_state(), PlayState::Running);

        // A stand-in for the process cycle: acknowledge the pause request
        // as soon as it appears.
        let engine_shared = Arc::clone(&shared);
        let engine = std::thread::spawn(move || loop {
            match engine_shared.play_state() {
                PlayState::PauseRequested => {
                    engine_shared.set_play_state(PlayState::Paused);
                    ack.unpark();
                    break;
                }
                _ => std::thread::yield_now(),
            }
        });

        control.pause();
        assert_eq!(shared.play_state(), PlayState::Paused);
        engine.join().unwrap();

        // Pausing again is a no-op and does not deadlock.
        control.pause();
    }
}
