//! PC Volume MQTT
//!
//! Bridges the master volume of the default audio output to an MQTT broker
//! as a Home Assistant `number` entity, in both directions.

pub mod audio;
pub mod bridge;
pub mod config;
pub mod installer;
pub mod mqtt;
pub mod paths;
pub mod tray;
