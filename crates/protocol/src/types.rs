use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute holding an entity's display name.
pub const FRIENDLY_NAME_ATTR: &str = "friendly_name";

/// State of one entity in the host registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Domain prefix of the entity id (`light` for `light.kitchen`).
    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }

    /// Display name, if the entity carries one.
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get(FRIENDLY_NAME_ATTR).and_then(Value::as_str)
    }

    /// Minimal projection used in device snapshots.
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: self.entity_id.clone(),
            state: self.state.clone(),
            attributes: SnapshotAttributes {
                friendly_name: self.friendly_name().map(str::to_owned),
            },
        }
    }
}

/// Returns the domain prefix of an entity id.
pub fn domain_of(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or(entity_id)
}

/// Entity as reported in a `SyncDevice` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub state: String,
    pub attributes: SnapshotAttributes,
}

/// Attributes kept in a snapshot: only the display name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_prefix_before_first_dot() {
        assert_eq!(domain_of("light.kitchen"), "light");
        assert_eq!(domain_of("media_player.tv.2"), "media_player");
        assert_eq!(domain_of("nodot"), "nodot");
    }

    #[test]
    fn snapshot_keeps_only_friendly_name() {
        let e = EntityState::new("light.kitchen", "on")
            .with_attribute("friendly_name", "Kitchen Light")
            .with_attribute("brightness", 200);
        let snap = e.snapshot();
        assert_eq!(snap.attributes.friendly_name.as_deref(), Some("Kitchen Light"));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["attributes"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_without_name_has_empty_attributes() {
        let snap = EntityState::new("switch.fan", "off").snapshot();
        let json = serde_json::to_string(&snap.attributes).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn attributes_default_when_missing() {
        let e: EntityState =
            serde_json::from_str(r#"{"entity_id":"lock.door","state":"locked"}"#).unwrap();
        assert!(e.attributes.is_empty());
        assert_eq!(e.domain(), "lock");
    }
}
