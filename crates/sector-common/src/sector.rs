//! Geographic sector (lat/lon rectangle) types and operations.

use serde::{Deserialize, Serialize};

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to another position, in radians.
    pub fn great_circle_distance(&self, other: &LatLon) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * a.sqrt().min(1.0).asin()
    }
}

/// An axis-aligned geographic rectangle in degrees.
///
/// Sectors are plain values. A degenerate (zero extent) sector can be
/// constructed, but every operation that divides by an extent must check
/// [`Sector::is_degenerate`] first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Sector {
    /// Create a sector from its latitude and longitude bounds.
    ///
    /// Bounds are normalised so that `min <= max` on both axes.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat: min_lat.min(max_lat),
            max_lat: min_lat.max(max_lat),
            min_lon: min_lon.min(max_lon),
            max_lon: min_lon.max(max_lon),
        }
    }

    /// The whole globe.
    pub fn full_sphere() -> Self {
        Self::new(-90.0, 90.0, -180.0, 180.0)
    }

    /// Parse a WMS BBOX parameter string: "minlon,minlat,maxlon,maxlat"
    pub fn from_wms_string(s: &str) -> Result<Self, SectorParseError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(SectorParseError::InvalidFormat(s.to_string()));
        }

        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .trim()
                .parse()
                .map_err(|_| SectorParseError::InvalidNumber(part.to_string()))?;
        }
        let [min_lon, min_lat, max_lon, max_lat] = values;

        if min_lat > max_lat || min_lon > max_lon {
            return Err(SectorParseError::Inverted(s.to_string()));
        }
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(SectorParseError::OutOfRange(s.to_string()));
        }

        Ok(Self::new(min_lat, max_lat, min_lon, max_lon))
    }

    /// Latitude extent in degrees.
    pub fn delta_lat(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Longitude extent in degrees.
    pub fn delta_lon(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn centroid(&self) -> LatLon {
        LatLon::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// True when either extent is zero (or not a finite number).
    pub fn is_degenerate(&self) -> bool {
        !(self.delta_lat() > 0.0 && self.delta_lon() > 0.0)
    }

    /// Check if this sector shares any area with another.
    pub fn intersects(&self, other: &Sector) -> bool {
        self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
            && self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
    }

    /// Compute the intersection of two sectors.
    ///
    /// Returns `None` when the sectors share no area (edge contact only counts
    /// as no intersection).
    pub fn intersection(&self, other: &Sector) -> Option<Sector> {
        if !self.intersects(other) {
            return None;
        }

        Some(Sector {
            min_lat: self.min_lat.max(other.min_lat),
            max_lat: self.max_lat.min(other.max_lat),
            min_lon: self.min_lon.max(other.min_lon),
            max_lon: self.max_lon.min(other.max_lon),
        })
    }

    /// Smallest sector containing both sectors.
    pub fn union(&self, other: &Sector) -> Sector {
        Sector {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    /// Union of every sector yielded by the iterator, or `None` if it is empty.
    pub fn union_all<'a, I>(sectors: I) -> Option<Sector>
    where
        I: IntoIterator<Item = &'a Sector>,
    {
        sectors
            .into_iter()
            .fold(None, |acc: Option<Sector>, s| match acc {
                Some(u) => Some(u.union(s)),
                None => Some(*s),
            })
    }

    /// Check if a point lies inside the sector (edges inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Sector of cell `(row, col)` when this sector is cut into an
    /// `parts x parts` grid of equal angular size.
    ///
    /// Row 0 is the southernmost band, column 0 the westernmost.
    pub fn subdivide(&self, parts: usize, row: usize, col: usize) -> Sector {
        let parts = parts.max(1) as f64;
        let d_lat = self.delta_lat() / parts;
        let d_lon = self.delta_lon() / parts;

        // Both sides of a shared edge come from the same expression, so
        // neighbouring cells meet bit-exactly.
        let min_lat = self.min_lat + row as f64 * d_lat;
        let min_lon = self.min_lon + col as f64 * d_lon;

        // Snap the outer cells onto the parent edges so the union is exact.
        let max_lat = if row as f64 + 1.0 >= parts {
            self.max_lat
        } else {
            self.min_lat + (row + 1) as f64 * d_lat
        };
        let max_lon = if col as f64 + 1.0 >= parts {
            self.max_lon
        } else {
            self.min_lon + (col + 1) as f64 * d_lon
        };

        Sector {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}°, {}°) - ({}°, {}°)",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SectorParseError {
    #[error("Invalid BBOX format: {0}. Expected 'minlon,minlat,maxlon,maxlat'")]
    InvalidFormat(String),

    #[error("Invalid number in BBOX: {0}")]
    InvalidNumber(String),

    #[error("BBOX minimum exceeds maximum: {0}")]
    Inverted(String),

    #[error("BBOX latitude out of range: {0}")]
    OutOfRange(String),
}
