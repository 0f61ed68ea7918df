//! Remote transports for published events.

mod mqtt;

pub use mqtt::{MqttForwarder, MqttSettings};
