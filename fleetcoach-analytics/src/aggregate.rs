use std::collections::BTreeMap;

use serde::Serialize;

use crate::{RawTables, VehicleSafetyRow};

const MILES_PER_KM: f64 = 0.621371;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetTotals {
    pub total_distance_km: i64,
    pub total_distance_miles: i64,
    pub total_drive_hours: i64,
    pub total_idle_hours: i64,
    pub idle_percentage: i64,
    pub total_trips: u64,
    /// Mean of each vehicle's most recent score, one decimal.
    pub avg_safety_score: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyTotals {
    pub harsh_brakes: u64,
    pub harsh_corners: u64,
    pub speeding: u64,
    pub seatbelt_off: u64,
    pub total: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyKpi {
    pub date: String,
    pub distance: f64,
    pub drive_hours: f64,
    pub idle_hours: f64,
    pub trips: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySafety {
    pub date: String,
    pub harsh_brakes: u64,
    pub harsh_corners: u64,
    pub speeding: u64,
    pub seatbelt_off: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRanking {
    pub name: String,
    pub total_events: u64,
    pub latest_score: Option<f64>,
    pub latest_date: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub fleet: FleetTotals,
    pub safety_events: SafetyTotals,
    pub daily_kpis: Vec<DailyKpi>,
    pub daily_safety: Vec<DailySafety>,
    /// Fewest events first.
    pub driver_rankings: Vec<DriverRanking>,
}

fn day(local_date: Option<&str>) -> Option<&str> {
    let d = local_date?.split('T').next()?;
    (!d.is_empty()).then_some(d)
}

fn latest_scores(rows: &[VehicleSafetyRow]) -> Vec<f64> {
    let mut latest: BTreeMap<Option<&str>, &VehicleSafetyRow> = BTreeMap::new();
    for row in rows {
        let key = row.device_name.as_deref();
        let newer = latest
            .get(&key)
            .map_or(true, |cur| row.local_date > cur.local_date);
        if newer {
            latest.insert(key, row);
        }
    }
    latest.values().filter_map(|r| r.safety_score).collect()
}

pub fn aggregate(raw: &RawTables) -> FleetSummary {
    let kpis = &raw.vehicle_kpis;
    let distance: f64 = kpis.iter().filter_map(|r| r.trip_distance_km).sum();
    let drive_s: f64 = kpis.iter().filter_map(|r| r.driving_seconds).sum();
    let idle_s: f64 = kpis.iter().filter_map(|r| r.idling_seconds).sum();
    let trips: u64 = kpis.iter().filter_map(|r| r.trip_count).sum();

    let safety = &raw.vehicle_safety;
    let harsh_brakes = safety.iter().filter_map(|r| r.harsh_braking).sum();
    let harsh_corners = safety.iter().filter_map(|r| r.harsh_cornering).sum();
    let speeding = safety.iter().filter_map(|r| r.speeding).sum();
    let seatbelt_off = safety.iter().filter_map(|r| r.seatbelt_off).sum();

    let scores = latest_scores(safety);
    let avg_safety_score = (!scores.is_empty()).then(|| {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        (mean * 10.0).round() / 10.0
    });

    let mut daily_kpis: BTreeMap<&str, DailyKpi> = BTreeMap::new();
    for row in kpis {
        let Some(date) = day(row.local_date.as_deref()) else {
            continue;
        };
        let d = daily_kpis.entry(date).or_insert_with(|| DailyKpi {
            date: date.to_string(),
            ..DailyKpi::default()
        });
        d.distance += row.trip_distance_km.unwrap_or(0.0);
        d.drive_hours += row.driving_seconds.unwrap_or(0.0) / 3600.0;
        d.idle_hours += row.idling_seconds.unwrap_or(0.0) / 3600.0;
        d.trips += row.trip_count.unwrap_or(0);
    }

    let mut daily_safety: BTreeMap<&str, DailySafety> = BTreeMap::new();
    for row in safety {
        let Some(date) = day(row.local_date.as_deref()) else {
            continue;
        };
        let d = daily_safety.entry(date).or_insert_with(|| DailySafety {
            date: date.to_string(),
            ..DailySafety::default()
        });
        d.harsh_brakes += row.harsh_braking.unwrap_or(0);
        d.harsh_corners += row.harsh_cornering.unwrap_or(0);
        d.speeding += row.speeding.unwrap_or(0);
        d.seatbelt_off += row.seatbelt_off.unwrap_or(0);
    }

    let mut drivers: BTreeMap<&str, DriverRanking> = BTreeMap::new();
    for row in &raw.driver_safety {
        let Some(name) = row.driver_name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        let d = drivers.entry(name).or_insert_with(|| DriverRanking {
            name: name.to_string(),
            ..DriverRanking::default()
        });
        d.total_events += row.harsh_braking.unwrap_or(0)
            + row.harsh_cornering.unwrap_or(0)
            + row.speeding.unwrap_or(0);
        if d.latest_date.is_none() || row.local_date > d.latest_date {
            d.latest_score = row.safety_score;
            d.latest_date = row.local_date.clone();
        }
    }
    let mut driver_rankings: Vec<DriverRanking> = drivers.into_values().collect();
    driver_rankings.sort_by_key(|d| d.total_events);

    let idle_percentage = if drive_s > 0.0 {
        (idle_s / (drive_s + idle_s) * 100.0).round() as i64
    } else {
        0
    };

    FleetSummary {
        fleet: FleetTotals {
            total_distance_km: distance.round() as i64,
            total_distance_miles: (distance * MILES_PER_KM).round() as i64,
            total_drive_hours: (drive_s / 3600.0).round() as i64,
            total_idle_hours: (idle_s / 3600.0).round() as i64,
            idle_percentage,
            total_trips: trips,
            avg_safety_score,
        },
        safety_events: SafetyTotals {
            harsh_brakes,
            harsh_corners,
            speeding,
            seatbelt_off,
            total: harsh_brakes + harsh_corners + speeding + seatbelt_off,
        },
        daily_kpis: daily_kpis.into_values().collect(),
        daily_safety: daily_safety.into_values().collect(),
        driver_rankings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DriverSafetyRow, VehicleKpiRow};

    fn kpi(date: &str, km: f64, drive_s: f64, idle_s: f64, trips: u64) -> VehicleKpiRow {
        VehicleKpiRow {
            device_name: Some("Truck 7".into()),
            local_date: Some(date.into()),
            trip_distance_km: Some(km),
            driving_seconds: Some(drive_s),
            idling_seconds: Some(idle_s),
            trip_count: Some(trips),
            ..VehicleKpiRow::default()
        }
    }

    fn safety(device: &str, date: &str, score: Option<f64>, brakes: u64) -> VehicleSafetyRow {
        VehicleSafetyRow {
            device_name: Some(device.into()),
            local_date: Some(date.into()),
            safety_score: score,
            harsh_braking: Some(brakes),
            speeding: Some(1),
            ..VehicleSafetyRow::default()
        }
    }

    fn driver(name: &str, date: &str, score: f64, speeding: u64) -> DriverSafetyRow {
        DriverSafetyRow {
            driver_name: Some(name.into()),
            local_date: Some(date.into()),
            safety_score: Some(score),
            speeding: Some(speeding),
            ..DriverSafetyRow::default()
        }
    }

    #[test]
    fn fleet_totals_round_like_the_dashboard() {
        let raw = RawTables {
            vehicle_kpis: vec![
                kpi("2026-03-02T00:00:00Z", 100.0, 5400.0, 1800.0, 3),
                kpi("2026-03-01T00:00:00Z", 60.6, 3600.0, 0.0, 2),
            ],
            ..RawTables::default()
        };
        let fleet = aggregate(&raw).fleet;
        assert_eq!(fleet.total_distance_km, 161);
        assert_eq!(fleet.total_distance_miles, 100);
        assert_eq!(fleet.total_drive_hours, 3);
        assert_eq!(fleet.total_idle_hours, 1);
        // 1800 / (9000 + 1800)
        assert_eq!(fleet.idle_percentage, 17);
        assert_eq!(fleet.total_trips, 5);
    }

    #[test]
    fn daily_series_are_sorted_and_bucketed_by_date() {
        let raw = RawTables {
            vehicle_kpis: vec![
                kpi("2026-03-02T00:00:00Z", 10.0, 3600.0, 0.0, 1),
                kpi("2026-03-01T00:00:00Z", 5.0, 1800.0, 0.0, 1),
                kpi("2026-03-02T00:00:00Z", 2.5, 0.0, 900.0, 1),
            ],
            vehicle_safety: vec![
                safety("Truck 7", "2026-03-03", Some(80.0), 2),
                safety("Truck 7", "2026-03-01", Some(70.0), 1),
            ],
            ..RawTables::default()
        };
        let summary = aggregate(&raw);
        let dates: Vec<_> = summary.daily_kpis.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, ["2026-03-01", "2026-03-02"]);
        assert_eq!(summary.daily_kpis[1].distance, 12.5);
        assert_eq!(summary.daily_kpis[1].idle_hours, 0.25);
        assert_eq!(summary.daily_kpis[1].trips, 2);
        assert_eq!(summary.daily_safety[0].date, "2026-03-01");
        assert_eq!(summary.daily_safety[1].harsh_brakes, 2);
    }

    #[test]
    fn average_score_uses_latest_day_per_vehicle() {
        let raw = RawTables {
            vehicle_safety: vec![
                safety("Truck 7", "2026-03-01", Some(50.0), 1),
                safety("Truck 7", "2026-03-03", Some(81.0), 0),
                safety("Van 2", "2026-03-02", Some(90.5), 2),
                safety("Van 3", "2026-03-02", None, 0),
            ],
            ..RawTables::default()
        };
        let summary = aggregate(&raw);
        // (81 + 90.5) / 2
        assert_eq!(summary.fleet.avg_safety_score, Some(85.8));
        assert_eq!(summary.safety_events.harsh_brakes, 3);
        assert_eq!(summary.safety_events.speeding, 4);
        assert_eq!(summary.safety_events.total, 7);
    }

    #[test]
    fn drivers_rank_by_fewest_events_with_latest_score() {
        let raw = RawTables {
            driver_safety: vec![
                driver("Sam Rivera", "2026-03-01", 60.0, 4),
                driver("Ana Ortiz", "2026-03-02", 95.0, 0),
                driver("Sam Rivera", "2026-03-02", 72.0, 1),
                DriverSafetyRow::default(),
            ],
            ..RawTables::default()
        };
        let ranks = aggregate(&raw).driver_rankings;
        assert_eq!(ranks.len(), 2);
        assert_eq!(ranks[0].name, "Ana Ortiz");
        assert_eq!(ranks[1].total_events, 5);
        assert_eq!(ranks[1].latest_score, Some(72.0));
        assert_eq!(ranks[1].latest_date.as_deref(), Some("2026-03-02"));
    }
}
