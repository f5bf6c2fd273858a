//! The non-realtime controller: setup, the console control surface and
//! ordered shutdown.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::HostConfig;
use crate::engine::{Engine, EngineConfig, PlayControl, SharedState};
use crate::features::{self, FeatureOptions, FeatureSet, FeatureSetConfig};
use crate::lv2;
use crate::port::PortKind;
use crate::ring::{control_channel, ControlReceiver, ControlRecv, ControlSender, PROTOCOL_FLOAT};
use crate::state::HostState;
use crate::urid::{HostUrids, UridMapper};
use crate::worker::Worker;
use crate::world::{self, PluginInstance, World};

/// Fallback MIDI buffer size when the server does not report one.
const DEFAULT_MIDI_BUF_SIZE: u32 = 4096;

/// Process-wide exit flag. Posted by the signal handlers and the server
/// shutdown callback, polled by the update loop.
static EXIT: AtomicBool = AtomicBool::new(false);

extern "C" fn request_exit(_signal: libc::c_int) {
    // Only the flag store is async-signal-safe; everything else waits for
    // the update loop to notice.
    EXIT.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler: extern "C" fn(libc::c_int) = request_exit;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

struct Notifications;

impl jack::NotificationHandler for Notifications {
    unsafe fn shutdown(&mut self, _status: jack::ClientStatus, reason: &str) {
        error!("the audio server shut down: {reason}");
        EXIT.store(true, Ordering::SeqCst);
    }

    fn sample_rate(&mut self, _: &jack::Client, rate: jack::Frames) -> jack::Control {
        warn!("sample rate changed to {rate} after startup, which is not supported");
        jack::Control::Continue
    }
}

/// Everything a port needs for console reporting once the table itself has
/// moved into the engine.
struct PortLabel {
    symbol: String,
    is_control: bool,
}

/// The console side of the UI seam: drains the plugin to UI ring and lets
/// an attached surface queue control changes.
pub struct Controller {
    plugin_rx: ControlReceiver,
    ui_tx: ControlSender,
    labels: Vec<PortLabel>,
    longest_symbol: usize,
    urids: HostUrids,
    mapper: Arc<UridMapper>,
    print_controls: bool,
    dump: bool,
    scratch: Vec<u8>,
}

impl Controller {
    /// Queue a control value change for the plugin, as a UI widget would.
    pub fn write_control(&mut self, index: u32, value: f32) -> bool {
        if !self.ui_tx.send_float(index, value) {
            error!("UI to plugin ring overflow, dropping control change");
            return false;
        }
        true
    }

    /// Queue a typed event (atom header plus body) for an event port.
    pub fn write_event(&mut self, index: u32, atom: &[u8]) -> bool {
        if self.dump {
            self.dump_event("UI -> plugin", index, atom);
        }
        if !self
            .ui_tx
            .send(index, self.urids.atom_event_transfer, atom)
        {
            error!("UI to plugin ring overflow, dropping event");
            return false;
        }
        true
    }

    /// Forward one batch of plugin to UI records to the console.
    fn drain(&mut self) {
        loop {
            // The scratch buffer matches the ring size, so anything the
            // engine could enqueue fits.
            let header = match self.plugin_rx.recv(&mut self.scratch) {
                ControlRecv::Empty => break,
                ControlRecv::Malformed => {
                    error!("truncated record in the plugin to UI ring");
                    break;
                }
                ControlRecv::Record(header) => header,
            };

            let body = &self.scratch[..header.size as usize];
            let label = self.labels.get(header.index as usize);

            if header.protocol == PROTOCOL_FLOAT && header.size == 4 {
                if self.print_controls {
                    if let Some(label) = label.filter(|l| l.is_control) {
                        let value = f32::from_ne_bytes(body.try_into().unwrap());
                        println!(
                            "{:<width$} = {value}",
                            label.symbol,
                            width = self.longest_symbol
                        );
                    }
                }
            } else if header.protocol == self.urids.atom_event_transfer {
                if self.dump {
                    self.dump_event("plugin -> UI", header.index, body);
                }
            } else {
                warn!("unknown protocol {} in the plugin to UI ring", header.protocol);
            }
        }
    }

    fn dump_event(&self, direction: &str, index: u32, atom: &[u8]) {
        let Some((typ, body)) = crate::atom::split_atom(atom) else {
            warn!("not dumping a malformed atom");
            return;
        };
        let type_uri = self
            .mapper
            .unmap(typ)
            .unwrap_or_else(|| format!("urid:{typ}"));
        let symbol = self
            .labels
            .get(index as usize)
            .map(|l| l.symbol.as_str())
            .unwrap_or("?");
        println!("## {direction} on {symbol}: {type_uri} ({} bytes)", body.len());
        println!("   {}", hex_dump(body));
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Load the plugin named by the command line (or the loaded state), wire
/// it to the audio server and run until told to exit.
pub fn run(config: HostConfig) -> Result<()> {
    install_signal_handlers();

    let mapper = UridMapper::new();
    let urids = HostUrids::new(&mapper);
    let world = World::load();

    if let Some(uuid) = &config.uuid {
        info!("session UUID: {uuid}");
    }
    if config.generic_ui || config.show_ui {
        debug!("no embedded plugin UI support is built in; using the console surface");
    }

    // The plugin URI comes from loaded state when -l is given, so state
    // resolution has to happen first.
    let loaded_state = match &config.load {
        Some(path) => Some(HostState::load(path)?),
        None => None,
    };
    let plugin_uri = loaded_state
        .as_ref()
        .map(|s| s.plugin_uri.clone())
        .or_else(|| config.plugin_uri.clone())
        .ok_or_else(|| anyhow!("missing plugin URI (try lv2ls to list installed plugins)"))?;

    info!("plugin: {plugin_uri}");
    let plugin = world.plugin_by_uri(&plugin_uri)?;

    for uri in world.required_feature_uris(&plugin) {
        if !features::is_supported(&uri) {
            bail!("the plugin requires feature <{uri}>, which is not supported");
        }
    }

    let mut ports = crate::port::PortTable::from_plugin(&plugin, &world.nodes)?;

    // Connect to the audio server.
    let client_name = match &config.name {
        Some(name) => name.clone(),
        None => {
            let name = plugin.name();
            name.as_str().unwrap_or("jackal").to_owned()
        }
    };
    let max_name = jack::client_name_size().saturating_sub(1);
    let client_name: String = client_name.chars().take(max_name).collect();

    let mut options = jack::ClientOptions::NO_START_SERVER;
    if config.exact_name {
        options |= jack::ClientOptions::USE_EXACT_NAME;
    }
    let (client, status) =
        jack::Client::new(&client_name, options).context("could not connect to JACK")?;
    if !status.is_empty() {
        debug!("JACK client status: {status:?}");
    }

    let sample_rate = client.sample_rate() as u32;
    let block_length = client.buffer_size() as u32;
    let midi_buf_size = DEFAULT_MIDI_BUF_SIZE;
    info!("JACK name:    {}", client.name());
    info!("block length: {block_length} frames");
    info!("sample rate:  {sample_rate} Hz");

    let ring_size = config.effective_ring_size(midi_buf_size, ports.min_ring_size()) as usize;
    let ui_update_hz = config.effective_update_rate(sample_rate as f32, midi_buf_size);
    info!("comm buffers: {ring_size} bytes");
    info!("update rate:  {ui_update_hz:.1} Hz");

    // Worker plumbing exists before instantiation because the schedule
    // feature pointer goes into the feature list.
    let mut worker = Worker::new(ring_size);

    let (ui_tx, ui_rx) = control_channel(ring_size);
    let (plugin_tx, plugin_rx) = control_channel(ring_size);

    let temp_dir = tempfile::Builder::new()
        .prefix("jackal-")
        .tempdir()
        .context("could not create the temporary state directory")?;

    let feature_set = FeatureSet::new(FeatureSetConfig {
        mapper: &mapper,
        urids: &urids,
        schedule_data: worker.schedule_data(),
        trace: config.trace,
        save_dir: temp_dir.path().to_owned(),
        options: FeatureOptions {
            sample_rate: sample_rate as f32,
            min_block_length: block_length as i32,
            max_block_length: block_length as i32,
            sequence_size: midi_buf_size as i32,
            ui_update_rate: ui_update_hz,
        },
    });

    let instance = unsafe { plugin.instantiate(sample_rate as f64, feature_set.refs()) }
        .ok_or_else(|| anyhow!("failed to instantiate <{plugin_uri}>"))?;

    if let Some(iface) = unsafe { world::worker_interface(&instance) } {
        let synchronous = world.wants_feature(&plugin, lv2::LV2_STATE_THREAD_SAFE_RESTORE);
        worker.start(iface, synchronous);
    }

    ports.allocate_buffers(midi_buf_size, block_length, &urids);

    let shared = SharedState::new();

    // Restore state, then presets, then explicit overrides, in that
    // order, all before the plugin starts running.
    if let Some(state) = &loaded_state {
        state.apply(&mut ports);
        shared.state_changed.store(true, Ordering::Release);
    }
    if let Some(preset_path) = &config.preset {
        let preset = HostState::load(preset_path)?;
        if preset.plugin_uri == plugin_uri {
            preset.apply(&mut ports);
            shared.state_changed.store(true, Ordering::Release);
        } else {
            warn!(
                "preset {} is for <{}>, not <{plugin_uri}>; ignoring it",
                preset_path.display(),
                preset.plugin_uri
            );
        }
    }
    for control in &config.controls {
        match ports.by_symbol_mut(&control.symbol) {
            Some(port) if port.kind == PortKind::Control => port.control = control.value,
            Some(_) => warn!("`{}` is not a control port, ignoring its value", control.symbol),
            None => warn!("ignoring value for unknown port `{}`", control.symbol),
        }
    }

    ports.register_jack_ports(&client)?;

    // Report the initial control values the way a UI would see them.
    let longest_symbol = ports.longest_symbol;
    for port in &ports.ports {
        if port.kind == PortKind::Control {
            println!(
                "{:<width$} = {}",
                port.symbol,
                port.control,
                width = longest_symbol
            );
        }
    }

    let labels: Vec<PortLabel> = ports
        .ports
        .iter()
        .map(|p| PortLabel {
            symbol: p.symbol.clone(),
            is_control: p.kind == PortKind::Control,
        })
        .collect();

    let (play, paused_ack) = PlayControl::new(Arc::clone(&shared));

    let engine = Engine::new(EngineConfig {
        instance: unsafe { PluginInstance::activate(instance) },
        ports,
        urids: urids.clone(),
        shared: Arc::clone(&shared),
        paused_ack,
        ui_rx,
        ui_tx: plugin_tx,
        worker: worker.rt_handle(),
        sample_rate,
        ui_update_hz,
        midi_buf_size,
        ring_size,
    });

    let async_client = client
        .activate_async(Notifications, engine)
        .context("could not activate the JACK client")?;
    play.resume();

    let mut controller = Controller {
        plugin_rx,
        ui_tx,
        labels,
        longest_symbol,
        urids,
        mapper: Arc::clone(&mapper),
        print_controls: config.print_controls,
        dump: config.dump,
        scratch: vec![0u8; ring_size],
    };

    // The update loop doubles as the exit poll.
    let update_interval = Duration::from_secs_f32(1.0 / ui_update_hz);
    while !EXIT.load(Ordering::SeqCst) {
        controller.drain();
        thread::sleep(update_interval);
    }
    info!("exiting");

    // Shutdown order: join the worker, deactivate the audio server, free
    // the event buffers, close the server connection, then deactivate and
    // free the plugin and everything the controller still owns.
    worker.finish();
    let (client, _notifications, mut engine) = async_client
        .deactivate()
        .map_err(|err| anyhow!("could not deactivate the JACK client: {err}"))?;
    engine.free_buffers();
    drop(client);
    engine.teardown();
    drop(controller);
    temp_dir.close().context("could not remove the temporary state directory")?;

    Ok(())
}
