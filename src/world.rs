//! The LV2 plugin database and the instantiated plugin.
//!
//! Thin wrappers over lilv: the world with its cached class nodes, plugin
//! lookup, and the activated instance handed to the process cycle.

use anyhow::{anyhow, Result};
use lilv::instance::{ActiveInstance, Instance};
use lilv::node::Node;
use lilv::plugin::Plugin;
use std::os::raw::c_void;

use crate::lv2;
use crate::worker::WorkerIface;

/// URI nodes for the port classes and properties consulted while building
/// the port table.
pub struct WorldNodes {
    pub audio_port: Node,
    pub control_port: Node,
    pub cv_port: Node,
    pub input_port: Node,
    pub output_port: Node,
    pub event_port: Node,
    pub atom_port: Node,
    pub connection_optional: Node,
    pub core_control: Node,
    pub reports_latency: Node,
    pub minimum_size: Node,
    pub midi_event: Node,
}

pub struct World {
    world: lilv::World,
    pub nodes: WorldNodes,
}

impl World {
    /// Load every installed plugin bundle. This walks the filesystem and
    /// parses plugin data, so it is strictly a setup-time call.
    pub fn load() -> Self {
        let world = lilv::World::with_load_all();
        let nodes = WorldNodes {
            audio_port: world.new_uri(lv2::LV2_CORE_AUDIO_PORT),
            control_port: world.new_uri(lv2::LV2_CORE_CONTROL_PORT),
            cv_port: world.new_uri(lv2::LV2_CORE_CV_PORT),
            input_port: world.new_uri(lv2::LV2_CORE_INPUT_PORT),
            output_port: world.new_uri(lv2::LV2_CORE_OUTPUT_PORT),
            event_port: world.new_uri(lv2::LV2_EVENT_PORT),
            atom_port: world.new_uri(lv2::LV2_ATOM_PORT),
            connection_optional: world.new_uri(lv2::LV2_CORE_CONNECTION_OPTIONAL),
            core_control: world.new_uri(lv2::LV2_CORE_CONTROL),
            reports_latency: world.new_uri(lv2::LV2_CORE_REPORTS_LATENCY),
            minimum_size: world.new_uri(lv2::LV2_RESIZE_PORT_MINIMUM_SIZE),
            midi_event: world.new_uri(lv2::LV2_MIDI_EVENT),
        };
        World { world, nodes }
    }

    pub fn plugin_by_uri(&self, uri: &str) -> Result<Plugin> {
        let uri_node = self.world.new_uri(uri);
        self.world
            .plugins()
            .plugin(&uri_node)
            .ok_or_else(|| anyhow!("plugin <{uri}> not found (try lv2ls to list plugins)"))
    }

    /// URIs of the features the plugin cannot work without.
    pub fn required_feature_uris(&self, plugin: &Plugin) -> Vec<String> {
        plugin
            .required_features()
            .iter()
            .filter_map(|node| node.as_uri().map(str::to_owned))
            .collect()
    }

    /// Whether the plugin declares `uri` as a required or optional feature.
    pub fn wants_feature(&self, plugin: &Plugin, uri: &str) -> bool {
        let matches = |node: &Node| node.as_uri() == Some(uri);
        plugin.required_features().iter().any(|n| matches(&n))
            || plugin.optional_features().iter().any(|n| matches(&n))
    }
}

/// The plugin's worker entry points, if it has any. Called on the freshly
/// instantiated plugin before activation.
pub unsafe fn worker_interface(instance: &Instance) -> Option<WorkerIface> {
    let data = instance.extension_data(lv2::LV2_WORKER_INTERFACE)?;
    Some(WorkerIface {
        handle: instance.handle(),
        iface: data.as_ptr() as *const crate::lv2::LV2WorkerInterface,
    })
}

/// The activated plugin instance.
///
/// Only the thread driving the process cycle touches this after
/// activation, which is what justifies the `Send` below; lilv itself does
/// not mark instances as sendable because of the raw port pointers they
/// hold.
pub struct PluginInstance {
    active: ActiveInstance,
}

unsafe impl Send for PluginInstance {}

impl PluginInstance {
    /// # Safety
    ///
    /// Calls the plugin's `activate`. All mandatory ports must be
    /// connected first.
    pub unsafe fn activate(instance: Instance) -> Self {
        PluginInstance {
            active: instance.activate(),
        }
    }

    /// # Safety
    ///
    /// `data` must stay valid for as long as the plugin may read it.
    pub unsafe fn connect<T>(&mut self, index: usize, data: *const T) {
        self.active.instance_mut().connect_port(index, data);
    }

    /// # Safety
    ///
    /// `data` must stay valid for as long as the plugin may use it.
    pub unsafe fn connect_mut<T>(&mut self, index: usize, data: *mut T) {
        self.active.instance_mut().connect_port_mut(index, data);
    }

    /// Connect an optional, unclassifiable port to the null sink.
    ///
    /// # Safety
    ///
    /// The port must be declared connection-optional.
    pub unsafe fn connect_null(&mut self, index: usize) {
        self.active
            .instance_mut()
            .connect_port_mut::<c_void>(index, std::ptr::null_mut());
    }

    /// # Safety
    ///
    /// Runs plugin code; all connected buffers must be valid for `frames`.
    pub unsafe fn run(&mut self, frames: usize) {
        self.active.run(frames);
    }

    /// Deactivate and free the plugin.
    pub fn deactivate(self) {
        unsafe {
            let _ = self.active.deactivate();
        }
    }
}
