//! Fleet-wide KPIs from the data connector's OData feed.
//!
//! Read-only: three daily tables are pulled for the last fourteen days and
//! folded into a [`FleetSummary`]. A table that cannot be fetched counts as
//! empty so one broken feed never hides the others.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod aggregate;
pub use aggregate::{
    aggregate, DailyKpi, DailySafety, DriverRanking, FleetSummary, FleetTotals, SafetyTotals,
};

pub mod odata;
pub use odata::{ODataClient, ODataCredentials};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("OData transport error: {0}")]
    Transport(String),
    #[error("OData {table} error {status}: {body}")]
    Status {
        table: &'static str,
        status: u16,
        body: String,
    },
    #[error("OData response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    VehicleKpi,
    VehicleSafety,
    DriverSafety,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::VehicleKpi => "VehicleKpi_Daily",
            Table::VehicleSafety => "VehicleSafety_Daily",
            Table::DriverSafety => "DriverSafety_Daily",
        }
    }

    pub fn select(self) -> &'static str {
        match self {
            Table::VehicleKpi => "Device_Name,Device_SerialNo,Local_Date,Trip_Distance_Km,Total_Driving_Duration_Seconds,Total_Idling_Duration_Seconds,Trip_Count,Stop_Count",
            Table::VehicleSafety => "Device_Name,Local_Date,Safety_Score,HarshBraking_Count,HarshCornering_Count,Speeding_Count,Speeding_Duration_Seconds,SeatbeltOff_Count",
            Table::DriverSafety => "Driver_Name,Local_Date,Safety_Score,HarshBraking_Count,HarshCornering_Count,Speeding_Count",
        }
    }
}

/// Source of raw OData rows.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn rows(&self, table: Table) -> Result<Vec<Value>, AnalyticsError>;
}

/// No analytics feed configured: every table is empty.
pub struct NullAnalytics;

#[async_trait]
impl AnalyticsSource for NullAnalytics {
    async fn rows(&self, _table: Table) -> Result<Vec<Value>, AnalyticsError> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleKpiRow {
    #[serde(rename = "Device_Name", default)]
    pub device_name: Option<String>,
    #[serde(rename = "Device_SerialNo", default)]
    pub device_serial_no: Option<String>,
    #[serde(rename = "Local_Date", default)]
    pub local_date: Option<String>,
    #[serde(rename = "Trip_Distance_Km", default)]
    pub trip_distance_km: Option<f64>,
    #[serde(rename = "Total_Driving_Duration_Seconds", default)]
    pub driving_seconds: Option<f64>,
    #[serde(rename = "Total_Idling_Duration_Seconds", default)]
    pub idling_seconds: Option<f64>,
    #[serde(rename = "Trip_Count", default)]
    pub trip_count: Option<u64>,
    #[serde(rename = "Stop_Count", default)]
    pub stop_count: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleSafetyRow {
    #[serde(rename = "Device_Name", default)]
    pub device_name: Option<String>,
    #[serde(rename = "Local_Date", default)]
    pub local_date: Option<String>,
    #[serde(rename = "Safety_Score", default)]
    pub safety_score: Option<f64>,
    #[serde(rename = "HarshBraking_Count", default)]
    pub harsh_braking: Option<u64>,
    #[serde(rename = "HarshCornering_Count", default)]
    pub harsh_cornering: Option<u64>,
    #[serde(rename = "Speeding_Count", default)]
    pub speeding: Option<u64>,
    #[serde(rename = "Speeding_Duration_Seconds", default)]
    pub speeding_seconds: Option<f64>,
    #[serde(rename = "SeatbeltOff_Count", default)]
    pub seatbelt_off: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverSafetyRow {
    #[serde(rename = "Driver_Name", default)]
    pub driver_name: Option<String>,
    #[serde(rename = "Local_Date", default)]
    pub local_date: Option<String>,
    #[serde(rename = "Safety_Score", default)]
    pub safety_score: Option<f64>,
    #[serde(rename = "HarshBraking_Count", default)]
    pub harsh_braking: Option<u64>,
    #[serde(rename = "HarshCornering_Count", default)]
    pub harsh_cornering: Option<u64>,
    #[serde(rename = "Speeding_Count", default)]
    pub speeding: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTables {
    pub vehicle_kpis: Vec<VehicleKpiRow>,
    pub vehicle_safety: Vec<VehicleSafetyRow>,
    pub driver_safety: Vec<DriverSafetyRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FleetAnalytics {
    pub raw: RawTables,
    pub summary: FleetSummary,
}

async fn table<T: DeserializeOwned>(source: &dyn AnalyticsSource, table: Table) -> Vec<T> {
    let rows = match source.rows(table).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(table = table.name(), error = %e, "analytics table unavailable");
            return Vec::new();
        }
    };
    match serde_json::from_value(Value::Array(rows)) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(table = table.name(), error = %e, "analytics rows undecodable");
            Vec::new()
        }
    }
}

/// Pull all three tables and aggregate them. Never fails.
pub async fn fetch_fleet_analytics(source: &dyn AnalyticsSource) -> FleetAnalytics {
    let (vehicle_kpis, vehicle_safety, driver_safety) = futures_util::future::join3(
        table(source, Table::VehicleKpi),
        table(source, Table::VehicleSafety),
        table(source, Table::DriverSafety),
    )
    .await;
    let raw = RawTables {
        vehicle_kpis,
        vehicle_safety,
        driver_safety,
    };
    let summary = aggregate(&raw);
    FleetAnalytics { raw, summary }
}
