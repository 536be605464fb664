//! Typed identifiers
//!
//! Every identifier is a thin UUID newtype so that a rule id can never be
//! passed where an alarm id is expected. Entity ids additionally carry the
//! entity type, mirroring how entities are addressed across the platform.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Tenant identifier
    TenantId
);
uuid_id!(
    /// Customer identifier (entity owner below tenant level)
    CustomerId
);
uuid_id!(
    /// Device/asset profile identifier
    ProfileId
);
uuid_id!(
    /// Alarm rule definition identifier
    AlarmRuleId
);
uuid_id!(
    /// Alarm instance identifier
    AlarmId
);

// ============================================================================
// Entity addressing
// ============================================================================

/// Kinds of monitored entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Device,
    Asset,
    Customer,
    Tenant,
    EntityView,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Device => "DEVICE",
            EntityType::Asset => "ASSET",
            EntityType::Customer => "CUSTOMER",
            EntityType::Tenant => "TENANT",
            EntityType::EntityView => "ENTITY_VIEW",
        }
    }
}

impl FromStr for EntityType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEVICE" => Ok(EntityType::Device),
            "ASSET" => Ok(EntityType::Asset),
            "CUSTOMER" => Ok(EntityType::Customer),
            "TENANT" => Ok(EntityType::Tenant),
            "ENTITY_VIEW" => Ok(EntityType::EntityView),
            other => Err(ModelError::invalid_entity(format!(
                "unknown entity type {}",
                other
            ))),
        }
    }
}

/// Monitored entity identifier (type + uuid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub entity_type: EntityType,
    pub id: Uuid,
}

impl EntityId {
    pub fn new(entity_type: EntityType, id: Uuid) -> Self {
        Self { entity_type, id }
    }

    /// Convenience constructor for a random device id
    pub fn device() -> Self {
        Self::new(EntityType::Device, Uuid::new_v4())
    }

    /// Convenience constructor for a random asset id
    pub fn asset() -> Self {
        Self::new(EntityType::Asset, Uuid::new_v4())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type.as_str(), self.id)
    }
}

impl FromStr for EntityId {
    type Err = ModelError;

    /// Parse `"DEVICE:<uuid>"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ModelError::invalid_entity(s))?;
        let entity_type = kind.parse()?;
        let id = Uuid::parse_str(id)
            .map_err(|e| ModelError::invalid_entity(format!("{}: {}", s, e)))?;
        Ok(Self { entity_type, id })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_display_roundtrip() {
        let id = EntityId::device();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("DEVICE:"));
    }

    #[test]
    fn test_entity_id_rejects_garbage() {
        assert!("DEVICE".parse::<EntityId>().is_err());
        assert!("ROBOT:0d3c5c4e-5d5e-4a43-9c16-7a8bde0f0a11".parse::<EntityId>().is_err());
        assert!("DEVICE:not-a-uuid".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_ids_are_transparent_in_json() {
        let id = AlarmRuleId::random();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
