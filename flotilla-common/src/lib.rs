//! Flotilla common - pieces shared by the control transmitter, the display
//! nodes and the administrative server:
//! - `message`: the broadcast control-message wire model
//! - `config`: the shared YAML configuration
//! - `logging`: tracing initialisation

pub mod config;
pub mod logging;
pub mod message;

pub use config::{AdminConf, BroadcastConf, ExecuteConf, FleetConfig, NodeConf};
pub use message::{ControlData, ControlEvent, ControlMessage, MessageError, NoteData};
