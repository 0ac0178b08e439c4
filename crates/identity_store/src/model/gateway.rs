//! Gateway entity.
//!
//! # Invariants
//! - `gateway_id` never changes; the EUI is unique among all rows, including
//!   tombstoned ones.
//! - Gateways are soft-deleted.

use super::client::json_value;
use super::ids::{validate_id, Eui64};
use super::{Entity, EntityIdentifiers, KindDescriptor, Model, ValidationError};
use crate::store::row::ProjectedRow;
use crate::store::{StoreError, StoreResult};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const GATEWAY_COLUMNS: &[(&str, &str)] = &[
    ("ids.gateway_id", "gateway_id"),
    ("ids.eui", "gateway_eui"),
    ("created_at", "created_at"),
    ("updated_at", "updated_at"),
    ("name", "name"),
    ("description", "description"),
    ("version_ids.brand_id", "brand_id"),
    ("version_ids.model_id", "model_id"),
    ("version_ids.hardware_version", "hardware_version"),
    ("version_ids.firmware_version", "firmware_version"),
    ("gateway_server_address", "gateway_server_address"),
    ("auto_update", "auto_update"),
    ("update_channel", "update_channel"),
    ("frequency_plan_id", "frequency_plan_id"),
    ("status_public", "status_public"),
    ("location_public", "location_public"),
    ("enforce_duty_cycle", "enforce_duty_cycle"),
    ("schedule_downlink_late", "schedule_downlink_late"),
    ("attributes", "attributes"),
];

pub static GATEWAY_KIND: KindDescriptor = KindDescriptor {
    name: "gateway",
    table: "gateways",
    id_column: "gateway_id",
    alternate_key: Some("gateway_eui"),
    columns: GATEWAY_COLUMNS,
    soft_delete: true,
};

/// Gateway address. Either field may be used for lookups; set fields must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayIdentifiers {
    pub gateway_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eui: Option<Eui64>,
}

impl GatewayIdentifiers {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            eui: None,
        }
    }

    pub fn by_eui(eui: Eui64) -> Self {
        Self {
            gateway_id: String::new(),
            eui: Some(eui),
        }
    }
}

impl EntityIdentifiers for GatewayIdentifiers {
    fn human_id(&self) -> &str {
        &self.gateway_id
    }

    fn alternate_key(&self) -> Option<String> {
        self.eui.map(|eui| eui.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayVersionIdentifiers {
    pub brand_id: String,
    pub model_id: String,
    pub hardware_version: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    #[serde(flatten)]
    pub model: Model,
    pub ids: GatewayIdentifiers,
    pub name: String,
    pub description: String,
    pub version_ids: GatewayVersionIdentifiers,
    pub gateway_server_address: String,
    pub auto_update: bool,
    pub update_channel: String,
    pub frequency_plan_id: String,
    pub status_public: bool,
    pub location_public: bool,
    pub enforce_duty_cycle: bool,
    pub schedule_downlink_late: bool,
    pub attributes: BTreeMap<String, String>,
}

impl Gateway {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            ids: GatewayIdentifiers::new(gateway_id),
            enforce_duty_cycle: true,
            ..Self::default()
        }
    }
}

impl Entity for Gateway {
    type Ids = GatewayIdentifiers;

    fn descriptor() -> &'static KindDescriptor {
        &GATEWAY_KIND
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    fn ids(&self) -> GatewayIdentifiers {
        self.ids.clone()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_id(GATEWAY_KIND.name, &self.ids.gateway_id)?;
        if let Some(key) = self.attributes.keys().find(|key| validate_id("attribute", key).is_err()) {
            return Err(ValidationError::InvalidAttributeKey(key.clone()));
        }
        Ok(())
    }

    fn write_columns(&self) -> StoreResult<Vec<(&'static str, Value)>> {
        let version = &self.version_ids;
        Ok(vec![
            (
                "gateway_eui",
                self.ids
                    .eui
                    .map_or(Value::Null, |eui| Value::Text(eui.to_string())),
            ),
            ("name", Value::Text(self.name.clone())),
            ("description", Value::Text(self.description.clone())),
            ("brand_id", Value::Text(version.brand_id.clone())),
            ("model_id", Value::Text(version.model_id.clone())),
            ("hardware_version", Value::Text(version.hardware_version.clone())),
            ("firmware_version", Value::Text(version.firmware_version.clone())),
            (
                "gateway_server_address",
                Value::Text(self.gateway_server_address.clone()),
            ),
            ("auto_update", Value::Integer(i64::from(self.auto_update))),
            ("update_channel", Value::Text(self.update_channel.clone())),
            ("frequency_plan_id", Value::Text(self.frequency_plan_id.clone())),
            ("status_public", Value::Integer(i64::from(self.status_public))),
            ("location_public", Value::Integer(i64::from(self.location_public))),
            (
                "enforce_duty_cycle",
                Value::Integer(i64::from(self.enforce_duty_cycle)),
            ),
            (
                "schedule_downlink_late",
                Value::Integer(i64::from(self.schedule_downlink_late)),
            ),
            ("attributes", json_value(&self.attributes)?),
        ])
    }

    fn from_row(row: &ProjectedRow<'_, '_>) -> StoreResult<Self> {
        let eui = match row.get_opt::<String>("gateway_eui")? {
            Some(value) => Some(value.parse::<Eui64>().map_err(|_| {
                StoreError::InvalidData(format!("invalid EUI `{value}` in gateways.gateway_eui"))
            })?),
            None => None,
        };

        Ok(Self {
            model: Model::from_row(row)?,
            ids: GatewayIdentifiers {
                gateway_id: row.get("gateway_id")?,
                eui,
            },
            name: row.get("name")?,
            description: row.get("description")?,
            version_ids: GatewayVersionIdentifiers {
                brand_id: row.get("brand_id")?,
                model_id: row.get("model_id")?,
                hardware_version: row.get("hardware_version")?,
                firmware_version: row.get("firmware_version")?,
            },
            gateway_server_address: row.get("gateway_server_address")?,
            auto_update: row.get("auto_update")?,
            update_channel: row.get("update_channel")?,
            frequency_plan_id: row.get("frequency_plan_id")?,
            status_public: row.get("status_public")?,
            location_public: row.get("location_public")?,
            enforce_duty_cycle: row.get("enforce_duty_cycle")?,
            schedule_downlink_late: row.get("schedule_downlink_late")?,
            attributes: row.get_json("attributes")?,
        })
    }
}
