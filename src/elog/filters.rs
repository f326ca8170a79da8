//! Valid filter values of the facility logbook.
//!
//! The server silently drops unknown attribute values, so selections are
//! validated here before any request goes out.

pub const CATEGORIES: &[&str] = &[
    "Info",
    "Problem",
    "Pikett",
    "Access",
    "Measurement summary",
    "Shift summary",
    "Tipps & Tricks",
    "Überbrückung",
    "Schicht-Auftrag",
    "RC exchange minutes",
    "Weekly reference settings",
    "Schicht-Übergabe",
    "DCM minutes",
    "Laser- & Gun-Performance Routine",
    "Seed laser operation",
];

pub const SYSTEMS: &[&str] = &[
    "Beamdynamics",
    "Controls",
    "Diagnostics",
    "Electric supply",
    "Feedbacks",
    "Insertion-devices",
    "Laser",
    "Magnet Power Supplies",
    "Operation",
    "Photonics",
    "PLC",
    "RF",
    "Safety",
    "Timing & Sync",
    "Vacuum",
    "Water cooling & Ventilation",
    "Other",
    "Unknown",
];

pub const DOMAINS: &[&str] = &[
    "Injector",
    "Linac1",
    "Linac2",
    "Linac3",
    "Aramis",
    "Aramis Beamlines",
    "Athos",
    "Athos Beamlines",
    "Global",
];

/// Validate a filter value against its allowed list. Matching is exact
/// (the server is case sensitive).
pub fn validate_filter(filter_name: &str, value: &str) -> bool {
    allowed_values(filter_name)
        .map(|values| values.contains(&value))
        .unwrap_or(false)
}

/// All legal values of one filter attribute.
pub fn allowed_values(filter_name: &str) -> Option<&'static [&'static str]> {
    match filter_name {
        "Category" => Some(CATEGORIES),
        "System"   => Some(SYSTEMS),
        "Domain"   => Some(DOMAINS),
        _          => None,
    }
}
