//! # Geolocation
//!
//! Resolves free-text locations to coordinates without any network calls:
//! 1. literal `"lat,lon"` text (both parts must parse and be in range),
//! 2. case-insensitive substring match against a fixed city table.
//!
//! The table is an ordered array so "first match wins" is deterministic.

use serde::Serialize;

use crate::tweet::Coordinates;

/// Known cities in lookup order.
pub const CITY_TABLE: [(&str, f64, f64); 20] = [
    ("san francisco", 37.7749, -122.4194),
    ("los angeles", 34.0522, -118.2437),
    ("new york", 40.7128, -74.0060),
    ("houston", 29.7604, -95.3698),
    ("chicago", 41.8781, -87.6298),
    ("miami", 25.7617, -80.1918),
    ("seattle", 47.6062, -122.3321),
    ("denver", 39.7392, -104.9903),
    ("atlanta", 33.7490, -84.3880),
    ("phoenix", 33.4484, -112.0740),
    ("philadelphia", 39.9526, -75.1652),
    ("dallas", 32.7767, -96.7970),
    ("boston", 42.3601, -71.0589),
    ("detroit", 42.3314, -83.0458),
    ("washington", 38.9072, -77.0369),
    ("las vegas", 36.1699, -115.1398),
    ("portland", 45.5152, -122.6784),
    ("nashville", 36.1627, -86.7816),
    ("memphis", 35.1495, -90.0490),
    ("louisville", 38.2527, -85.7585),
];

const LITERAL_CONFIDENCE: f32 = 0.8;
const CITY_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoMatch {
    Literal,
    City,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub coordinates: Coordinates,
    pub matched: GeoMatch,
}

impl Resolution {
    /// How much we trust the match (literal text vs. city-name guess).
    pub fn confidence(&self) -> f32 {
        match self.matched {
            GeoMatch::Literal => LITERAL_CONFIDENCE,
            GeoMatch::City => CITY_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Geolocator;

impl Geolocator {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, location: Option<&str>) -> Option<Coordinates> {
        self.resolve_detailed(location).map(|r| r.coordinates)
    }

    /// Malformed input is never an error; it simply does not resolve.
    pub fn resolve_detailed(&self, location: Option<&str>) -> Option<Resolution> {
        let text = location.map(str::trim).filter(|s| !s.is_empty())?;

        if let Some(coordinates) = parse_literal(text) {
            return Some(Resolution {
                coordinates,
                matched: GeoMatch::Literal,
            });
        }
        lookup_city(text).map(|coordinates| Resolution {
            coordinates,
            matched: GeoMatch::City,
        })
    }
}

/// Parse `"lat,lon"`. Requires a comma, at least one digit and exactly two parts.
pub fn parse_literal(text: &str) -> Option<Coordinates> {
    if !text.contains(',') || !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut parts = text.split(',');
    let (lat, lon) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    Coordinates::checked(lat, lon)
}

pub fn lookup_city(text: &str) -> Option<Coordinates> {
    let lower = text.to_lowercase();
    CITY_TABLE
        .iter()
        .find(|(city, _, _)| lower.contains(*city))
        .map(|&(_, lat, lon)| Coordinates { lat, lon })
}

/// Centre of a GeoJSON bounding box `[west, south, east, north]`.
pub fn bbox_center(bbox: &[f64]) -> Option<Coordinates> {
    match bbox {
        [west, south, east, north] => {
            Coordinates::checked((south + north) / 2.0, (west + east) / 2.0)
        }
        _ => None,
    }
}
