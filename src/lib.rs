//! A command-line JACK host for LV2 plugins.
//!
//! The host discovers a plugin through the lilv database, instantiates it
//! with a capability feature set, and runs it inside the JACK process
//! callback. Audio and MIDI flow between the server and the plugin; typed
//! events and control values flow between the plugin, a control surface
//! and a worker thread over lock-free rings.

pub mod atom;
pub mod config;
pub mod engine;
pub mod evbuf;
pub mod features;
pub mod host;
pub mod lv2;
pub mod port;
pub mod ring;
pub mod state;
pub mod urid;
pub mod worker;
pub mod world;
