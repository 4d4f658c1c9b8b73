//! Display-unit conversions. Correlation works in km/h and meters; these are
//! applied only when rendering text for drivers.

pub const KM_TO_MILES: f64 = 0.621371;
pub const METERS_PER_MILE: f64 = 1609.344;

pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh * KM_TO_MILES
}

/// `"62 mph"` for 100 km/h. Non-positive or missing speeds render as nothing.
pub fn format_speed(kmh: Option<f64>) -> Option<String> {
    let kmh = kmh.filter(|v| *v > 0.0)?;
    Some(format!("{} mph", kmh_to_mph(kmh).round() as i64))
}

/// Miles with one decimal, or whole meters below a tenth of a mile.
pub fn format_distance(meters: Option<f64>) -> Option<String> {
    let meters = meters.filter(|v| *v > 0.0)?;
    let miles = meters / METERS_PER_MILE;
    if miles < 0.1 {
        Some(format!("{} meters", meters.round() as i64))
    } else {
        Some(format!("{miles:.1} miles"))
    }
}

/// Whole mph above the posted limit, when a limit is known.
pub fn over_limit_mph(speed_kmh: Option<f64>, limit_kmh: Option<f64>) -> Option<i64> {
    let limit = limit_kmh.filter(|v| *v > 0.0)?;
    let speed = speed_kmh.unwrap_or(0.0);
    Some(kmh_to_mph(speed - limit).round() as i64)
}
