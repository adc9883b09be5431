//! Decomposes a bounding box into slippy-map tiles at a fixed zoom.
//!
//! Tile identity (zoom, x, y) is a pure function of position, so two runs over
//! overlapping boxes produce the same section keys for the shared tiles and
//! therefore hit the same cache entries.

use super::BoundingBox;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use tracing::{debug, warn};

/// Web Mercator latitude limit, in degrees.
pub const MAX_MERCATOR_LAT: f64 = 85.0511;

pub const MAX_ZOOM: u8 = 22;

/// Zoom used by the trace provider's per-section sequence search.
pub const DEFAULT_SECTION_ZOOM: u8 = 14;

/// Section counts above this are logged as a warning before work starts.
pub const SECTION_COUNT_WARNING: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Full geographic extent of the tile.
    pub fn bounds(&self) -> BoundingBox {
        let n = 2f64.powi(self.zoom as i32);
        BoundingBox {
            min_lon: self.x as f64 / n * 360.0 - 180.0,
            max_lon: (self.x + 1) as f64 / n * 360.0 - 180.0,
            max_lat: tile_y_to_lat(self.y as f64, n),
            min_lat: tile_y_to_lat((self.y + 1) as f64, n),
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.zoom, self.x, self.y)
    }
}

/// One tile of a decomposed query area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub tile: TileCoord,
    /// The tile's extent clipped to the query box.
    pub bbox: BoundingBox,
}

impl Section {
    /// Stable cache key, `"{zoom}-{x}-{y}"`.
    pub fn key(&self) -> String {
        self.tile.to_string()
    }
}

fn tile_y_to_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

fn lon_to_tile_x(lon: f64, n: f64) -> f64 {
    (lon + 180.0) / 360.0 * n
}

fn lat_to_tile_y(lat: f64, n: f64) -> f64 {
    let lat_rad = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n
}

/// First and last tile index covering `[lo, hi)` in tile space.
fn tile_range(lo: f64, hi: f64, n: f64) -> (u32, u32) {
    let max_index = n as u32 - 1;
    let first = (lo.floor().max(0.0) as u32).min(max_index);
    // A box edge that falls exactly on a tile boundary must not pull in the
    // next tile, which would only share a zero-width strip.
    let last = ((hi.ceil() - 1.0).max(0.0) as u32).clamp(first, max_index);
    (first, last)
}

/// Splits `bbox` into the tiles at `zoom` that intersect it.
///
/// Sections come out ordered by `x`, then `y`, both ascending, and the same
/// inputs always produce the same list. Areas beyond the Web Mercator
/// latitude limit are not covered.
///
/// # Errors
///
/// [`PipelineError::InvalidBoundingBox`] for a degenerate box and
/// [`PipelineError::InvalidInput`] for a zoom above [`MAX_ZOOM`].
pub fn tile_bbox(bbox: &BoundingBox, zoom: u8) -> Result<Vec<Section>> {
    bbox.validate()?;
    if zoom > MAX_ZOOM {
        return Err(PipelineError::InvalidInput(format!(
            "zoom {zoom} exceeds maximum of {MAX_ZOOM}"
        )));
    }

    let n = 2f64.powi(zoom as i32);
    let (x_first, x_last) = tile_range(lon_to_tile_x(bbox.min_lon, n), lon_to_tile_x(bbox.max_lon, n), n);
    // Tile y grows southwards, so the northern edge gives the first row.
    let (y_first, y_last) = tile_range(lat_to_tile_y(bbox.max_lat, n), lat_to_tile_y(bbox.min_lat, n), n);

    let count = (x_last - x_first + 1) as usize * (y_last - y_first + 1) as usize;
    if count > SECTION_COUNT_WARNING {
        warn!(
            sections = count,
            threshold = SECTION_COUNT_WARNING,
            "Large number of sections will be generated"
        );
    } else {
        debug!(sections = count, zoom, "Tiling bounding box");
    }

    let mut sections = Vec::with_capacity(count);
    for x in x_first..=x_last {
        for y in y_first..=y_last {
            let tile = TileCoord { zoom, x, y };
            if let Some(clipped) = tile.bounds().intersection(bbox) {
                sections.push(Section {
                    tile,
                    bbox: clipped,
                });
            }
        }
    }

    Ok(sections)
}
