//! Transport orders created by mine planners.
//!
//! The backend attaches a long tail of logistics and production telemetry to
//! each order. Only the fields the client displays are typed; the rest is kept
//! in `extra` so nothing the server sends is lost on a round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Scheduled,
    #[serde(rename = "In Transit")]
    InTransit,
    Completed,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Created => write!(f, "Created"),
            OrderStatus::Scheduled => write!(f, "Scheduled"),
            OrderStatus::InTransit => write!(f, "In Transit"),
            OrderStatus::Completed => write!(f, "Completed"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl OrderStatus {
    /// Orders still waiting on or moving through a schedule.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created | OrderStatus::Scheduled | OrderStatus::InTransit
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_code: String,
    pub origin: String,
    pub destination: String,
    pub cargo_type: String,
    #[serde(default, deserialize_with = "deserialize_decimal")]
    pub cargo_weight_tons: Option<f64>,
    pub transport_mode: String,
    #[serde(default, deserialize_with = "deserialize_decimal")]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub planned_departure: Option<String>,
    pub status: OrderStatus,
    #[serde(default, deserialize_with = "deserialize_decimal")]
    pub estimated_cost_usd: Option<f64>,
    #[serde(rename = "minePlannerId")]
    pub mine_planner_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Order {
    /// One-line route summary, e.g. `Pit A -> Port B (Truck)`.
    pub fn route(&self) -> String {
        format!("{} -> {} ({})", self.origin, self.destination, self.transport_mode)
    }
}

/// Body of `POST /orders`. Logistics and production attributes go in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderForm {
    pub origin: String,
    pub destination: String,
    pub cargo_type: String,
    pub cargo_weight_tons: f64,
    pub transport_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_departure: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrderForm {
    /// Name of the first empty required field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("origin", &self.origin),
            ("destination", &self.destination),
            ("cargo type", &self.cargo_type),
            ("transport mode", &self.transport_mode),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .or_else(|| (self.cargo_weight_tons <= 0.0).then_some("cargo weight"))
    }
}

/// Backend decimals arrive either as JSON numbers or as numeric strings.
pub(crate) fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct DecimalVisitor;

    impl<'de> de::Visitor<'de> for DecimalVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid decimal: {}", v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(DecimalVisitor)
}
