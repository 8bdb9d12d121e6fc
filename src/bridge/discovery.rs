//! Home Assistant MQTT discovery document for the volume `number` entity

use serde::{Deserialize, Serialize};

use super::topics::TopicBinding;

/// Device block grouping the entity under the machine in Home Assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
}

/// Retained config payload published to `homeassistant/number/<id>/config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub name: String,
    pub command_topic: String,
    pub state_topic: String,
    pub min: u8,
    pub max: u8,
    pub unique_id: String,
    pub device: DiscoveryDevice,
}

impl DiscoveryDocument {
    pub fn for_binding(topics: &TopicBinding) -> Self {
        let name = match &topics.device_name {
            Some(device) => format!("{} {} Volume", topics.machine_name, device),
            None => format!("{} Volume", topics.machine_name),
        };

        Self {
            name,
            command_topic: topics.command_topic.clone(),
            state_topic: topics.state_topic.clone(),
            min: 0,
            max: 100,
            unique_id: topics.object_id.clone(),
            device: DiscoveryDevice {
                identifiers: vec![topics.machine_slug.clone()],
                name: topics.machine_name.clone(),
            },
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
