use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::order::deserialize_decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Planned,
    Ongoing,
    Completed,
    Delayed,
    Cancelled,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ScheduleStatus::Planned => "Planned",
            ScheduleStatus::Ongoing => "Ongoing",
            ScheduleStatus::Completed => "Completed",
            ScheduleStatus::Delayed => "Delayed",
            ScheduleStatus::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "planned" => Ok(ScheduleStatus::Planned),
            "ongoing" => Ok(ScheduleStatus::Ongoing),
            "completed" => Ok(ScheduleStatus::Completed),
            "delayed" => Ok(ScheduleStatus::Delayed),
            "cancelled" | "canceled" => Ok(ScheduleStatus::Cancelled),
            other => Err(format!("unknown schedule status: {}", other)),
        }
    }
}

/// A shipping planner's schedule against an order.
/// Weather, road, equipment and vessel telemetry stays in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "shippingPlannerId")]
    pub shipping_planner_id: String,
    #[serde(default)]
    pub vehicle_id: Option<String>,
    #[serde(default)]
    pub vessel_name: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub road_condition_status: Option<String>,
    #[serde(default)]
    pub weather_condition: Option<String>,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "deserialize_decimal")]
    pub cost_usd: Option<f64>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Schedule {
    /// Vessel name if shipped by sea, otherwise the vehicle id.
    pub fn carrier(&self) -> Option<&str> {
        self.vessel_name
            .as_deref()
            .or(self.vehicle_id.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Body of `POST /schedules`. Weather, road, equipment and vessel attributes go in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleForm {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vessel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub road_condition_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `PUT /schedules/{id}`. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ScheduleStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub road_condition_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_condition: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScheduleUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.notes.is_none()
            && self.road_condition_status.is_none()
            && self.weather_condition.is_none()
            && self.extra.is_empty()
    }
}
