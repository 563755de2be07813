//! Wire types for the inbound sensor stream.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A single wattage sample from one building floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub building_id: String,
    pub floor_id: String,
    /// Instantaneous draw in watts. Not range-checked.
    pub current_wattage: f64,
    /// Producer-defined epoch/unit, passed through untouched.
    pub timestamp: i64,
    /// Line voltage as reported by the sensor. Carried, never scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
}

impl Reading {
    pub fn new(
        building_id: impl Into<String>,
        floor_id: impl Into<String>,
        current_wattage: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            building_id: building_id.into(),
            floor_id: floor_id.into(),
            current_wattage,
            timestamp,
            voltage: None,
        }
    }

    /// Key under which this reading's sliding window is kept.
    ///
    /// The composite key is length-prefixed so ids containing `/` cannot
    /// alias another building/floor pair.
    pub fn group_key(&self, group_by: GroupBy) -> Cow<'_, str> {
        match group_by {
            GroupBy::Building => Cow::Borrowed(self.building_id.as_str()),
            GroupBy::BuildingFloor => Cow::Owned(format!(
                "{}:{}/{}",
                self.building_id.len(),
                self.building_id,
                self.floor_id
            )),
        }
    }
}

/// How readings are partitioned into windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One window per building; all floors share a baseline.
    #[default]
    Building,
    /// One window per building floor.
    BuildingFloor,
}

/// Completion acknowledgment returned once a producer closes its stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamAck {
    pub success: bool,
    pub message: String,
}

impl StreamAck {
    pub fn closed() -> Self {
        Self {
            success: true,
            message: "Stream closed".to_string(),
        }
    }
}
