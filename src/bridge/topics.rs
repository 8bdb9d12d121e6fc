//! Topic naming
//!
//! Topics are derived once at startup from the machine name (and optional
//! device name). Changing either requires a restart.

/// Placeholder for every character outside `[a-z0-9]`
pub const SLUG_SEPARATOR: char = '_';

/// Root of every state/command topic
pub const TOPIC_ROOT: &str = "pc";

/// Home Assistant discovery prefix
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Lower-case `name`, replacing each non-alphanumeric character by `_`
///
/// ASCII only, so the result is always a valid topic segment and Home
/// Assistant object id.
pub fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                SLUG_SEPARATOR
            }
        })
        .collect()
}

/// Topics and ids for one bridged endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBinding {
    /// Display name of the machine as configured
    pub machine_name: String,
    /// Display name of the device in the multi-device variant
    pub device_name: Option<String>,
    pub machine_slug: String,
    pub device_slug: Option<String>,
    pub state_topic: String,
    pub command_topic: String,
    pub discovery_topic: String,
    pub object_id: String,
}

impl TopicBinding {
    pub fn new(machine_name: &str, device_name: Option<&str>) -> Self {
        let machine_slug = slugify(machine_name.trim());
        let device_name = device_name
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        let device_slug = device_name.as_deref().map(slugify);

        let (base, object_id) = match &device_slug {
            Some(device) => (
                format!("{}/{}/{}/volume", TOPIC_ROOT, machine_slug, device),
                format!("{}_{}_volume", machine_slug, device),
            ),
            None => (
                format!("{}/{}/volume", TOPIC_ROOT, machine_slug),
                format!("{}_volume", machine_slug),
            ),
        };

        Self {
            machine_name: machine_name.trim().to_string(),
            device_name,
            state_topic: format!("{}/state", base),
            command_topic: format!("{}/set", base),
            discovery_topic: format!("{}/number/{}/config", DISCOVERY_PREFIX, object_id),
            machine_slug,
            device_slug,
            object_id,
        }
    }

    /// Default MQTT client id for this binding
    pub fn client_id(&self) -> String {
        match &self.device_slug {
            Some(device) => format!("pc-volume-mqtt-{}-{}", self.machine_slug, device),
            None => format!("pc-volume-mqtt-{}", self.machine_slug),
        }
    }
}
