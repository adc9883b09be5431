//! Mapillary v4 trace provider.
//!
//! A z5 coverage pass first drops sections without roads or recent imagery.
//! Sequences are then discovered through the public coverage vector tiles
//! at each section's tile coordinates, and each sequence's image positions
//! are pulled from the Graph API and turned into a time-ordered trace.

use super::routable::{ROUTABLE_ZOOM, is_routable_z5};
use super::vector_tile::Tile;
use super::vector_tile::tile::{Feature, Layer, Value};
use super::{TracePoint, TraceProvider, TraceSequence};
use crate::fetch::{self, HttpClient};
use crate::geo::Section;
use crate::geo::tiler::TileCoord;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const COVERAGE_TILES_URL: &str = "https://tiles.mapillary.com/maps/vtp/mly1_public/2";
const GRAPH_API_URL: &str = "https://graph.mapillary.com";

/// Provider settings, read from the `--trace-config` JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapillaryConfig {
    /// Client token. Falls back to `MAPILLARY_ACCESS_TOKEN` when absent.
    pub access_token: Option<String>,
    #[serde(alias = "max_sequences_per_bbox_section")]
    pub sequences_per_section: usize,
    pub skip_if_fewer_images_than: usize,
    /// `YYYY-MM-DD` or RFC 3339. Defaults to five years before now.
    pub start_date: Option<String>,
    pub image_batch_size: usize,
    /// Request budget shared by every worker.
    pub max_calls_per_minute: u32,
}

impl Default for MapillaryConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            sequences_per_section: 500,
            skip_if_fewer_images_than: 30,
            start_date: None,
            image_batch_size: 100,
            max_calls_per_minute: 59_000,
        }
    }
}

impl MapillaryConfig {
    /// Earliest capture time, in epoch milliseconds, a sequence may have.
    pub fn start_epoch_ms(&self) -> Result<i64> {
        let start = match self.start_date.as_deref() {
            None => Utc::now() - Duration::days(365 * 5),
            Some(s) => parse_date(s)?,
        };
        Ok(start.timestamp_millis())
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_batch_size == 0 {
            return Err(anyhow!("image_batch_size must be at least 1"));
        }
        if self.max_calls_per_minute == 0 {
            return Err(anyhow!("max_calls_per_minute must be at least 1"));
        }
        self.start_epoch_ms().map(|_| ())
    }
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid start_date '{s}', expected YYYY-MM-DD"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("invalid start_date '{s}'"))
}

#[derive(Debug, Deserialize)]
struct ImageIdsResponse {
    data: Vec<ImageId>,
}

#[derive(Debug, Deserialize)]
struct ImageId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    /// Epoch milliseconds.
    captured_at: f64,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: [f64; 2],
}

/// Fetches traces from Mapillary. The client is expected to carry the
/// access token (see [`crate::fetch::auth::UrlParam`]) and the rate limit
/// (see [`crate::fetch::RateLimited`]).
pub struct MapillaryProvider<C> {
    client: C,
    config: MapillaryConfig,
    start_epoch_ms: i64,
}

impl<C: HttpClient> MapillaryProvider<C> {
    pub fn new(client: C, config: MapillaryConfig) -> Result<Self> {
        config.validate()?;
        let start_epoch_ms = config.start_epoch_ms()?;
        Ok(Self {
            client,
            config,
            start_epoch_ms,
        })
    }

    async fn tile(&self, zoom: u8, x: u32, y: u32) -> Result<Vec<u8>> {
        let url = format!("{COVERAGE_TILES_URL}/{zoom}/{x}/{y}");
        fetch::fetch_bytes(&self.client, &url).await
    }

    async fn image_ids(&self, sequence_id: &str) -> Result<Vec<String>> {
        let url = format!("{GRAPH_API_URL}/image_ids?fields=id&sequence_id={sequence_id}");
        let resp: ImageIdsResponse = fetch::fetch_json(&self.client, &url).await?;
        Ok(resp.data.into_iter().map(|i| i.id).collect())
    }

    async fn points(&self, image_ids: &[String]) -> Result<Vec<TracePoint>> {
        let mut points = Vec::with_capacity(image_ids.len());
        for batch in image_ids.chunks(self.config.image_batch_size) {
            let url = format!(
                "{GRAPH_API_URL}/images?fields=captured_at,geometry&image_ids={}",
                batch.join(",")
            );
            let resp: ImagesResponse = fetch::fetch_json(&self.client, &url).await?;
            points.extend(resp.data.into_iter().map(|img| TracePoint {
                lon: img.geometry.coordinates[0],
                lat: img.geometry.coordinates[1],
                time: img.captured_at / 1000.0,
            }));
        }
        // Images come back in no particular order.
        points.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(points)
    }
}

#[async_trait::async_trait]
impl<C: HttpClient> TraceProvider for MapillaryProvider<C> {
    fn name(&self) -> &'static str {
        "mapillary"
    }

    /// Keeps sections inside a routable z5 tile whose coverage tile shows
    /// recent imagery at the section's position. One coverage request per
    /// z5 tile replaces a request per section for empty areas.
    #[tracing::instrument(skip_all, fields(candidates = sections.len()))]
    async fn select_sections(&self, sections: Vec<Section>) -> Result<Vec<Section>> {
        let mut parents = BTreeSet::new();
        for section in &sections {
            if let Some(parent) = coverage_parent(&section.tile) {
                parents.insert(parent);
            }
        }

        let mut coverage = BTreeMap::new();
        for &(x, y) in &parents {
            if !is_routable_z5(x, y) {
                tracing::debug!(x, y, "No routable roads in coverage tile");
                continue;
            }
            let bytes = self
                .tile(ROUTABLE_ZOOM, x, y)
                .await
                .with_context(|| format!("coverage tile {ROUTABLE_ZOOM}/{x}/{y}"))?;
            coverage.insert((x, y), covered_pixels(&bytes, self.start_epoch_ms)?);
        }

        let total = sections.len();
        let kept: Vec<Section> = sections
            .into_iter()
            .filter(|s| match coverage_parent(&s.tile) {
                None => true,
                Some(parent) => coverage
                    .get(&parent)
                    .is_some_and(|pixels| tile_is_covered(&s.tile, pixels)),
            })
            .collect();
        tracing::info!(kept = kept.len(), dropped = total - kept.len(), "Coverage pre-pass done");
        Ok(kept)
    }

    #[tracing::instrument(skip_all, fields(section = %section.key()))]
    async fn sequence_ids(&self, section: &Section) -> Result<Vec<String>> {
        let t = &section.tile;
        let bytes = self.tile(t.zoom, t.x, t.y).await?;

        let mut ids = sequence_ids_from_tile(&bytes, self.start_epoch_ms)?;
        if ids.len() > self.config.sequences_per_section {
            tracing::info!(
                found = ids.len(),
                kept = self.config.sequences_per_section,
                "Capping sequences for section"
            );
            ids.truncate(self.config.sequences_per_section);
        }
        tracing::debug!(count = ids.len(), "Found sequences in coverage tile");
        Ok(ids)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_sequence(&self, id: &str) -> Result<Option<TraceSequence>> {
        let image_ids = self
            .image_ids(id)
            .await
            .with_context(|| format!("image ids for sequence {id}"))?;
        if image_ids.len() < self.config.skip_if_fewer_images_than {
            tracing::debug!(images = image_ids.len(), "Too few images, skipping sequence");
            return Ok(None);
        }
        let points = self
            .points(&image_ids)
            .await
            .with_context(|| format!("images for sequence {id}"))?;
        Ok(Some(TraceSequence {
            id: id.to_string(),
            points,
        }))
    }
}

/// Zoom at which one pixel of a z5 coverage tile is one tile (256 pixels
/// per side).
const PIXEL_ZOOM: u8 = ROUTABLE_ZOOM + 8;

/// The z5 tile containing `tile`, or `None` for tiles coarser than z5.
fn coverage_parent(tile: &TileCoord) -> Option<(u32, u32)> {
    let shift = tile.zoom.checked_sub(ROUTABLE_ZOOM)?;
    Some((tile.x >> shift, tile.y >> shift))
}

/// Whether any coverage pixel of the z5 parent overlaps `tile`.
fn tile_is_covered(tile: &TileCoord, pixels: &BTreeSet<(u32, u32)>) -> bool {
    if tile.zoom >= PIXEL_ZOOM {
        let shift = tile.zoom - PIXEL_ZOOM;
        return pixels.contains(&((tile.x >> shift) & 0xff, (tile.y >> shift) & 0xff));
    }
    let shift = PIXEL_ZOOM - tile.zoom;
    let span = 1u32 << shift;
    let (px, py) = ((tile.x << shift) & 0xff, (tile.y << shift) & 0xff);
    pixels
        .iter()
        .any(|&(x, y)| (px..px + span).contains(&x) && (py..py + span).contains(&y))
}

/// Pixels (0..256 on each axis) of a z5 coverage tile holding imagery
/// captured after `start_epoch_ms`.
///
/// Each coverage feature is a point at the center of a 16x16 block of the
/// 4096-unit tile extent.
pub fn covered_pixels(bytes: &[u8], start_epoch_ms: i64) -> Result<BTreeSet<(u32, u32)>> {
    let tile = Tile::decode(bytes).context("Failed to decode coverage tile")?;

    let mut pixels = BTreeSet::new();
    for layer in &tile.layers {
        for feature in &layer.features {
            let recent = tag_values(layer, feature).any(|(key, value)| {
                key == "captured_at" && int_value(value).is_some_and(|t| t > start_epoch_ms)
            });
            if !recent {
                continue;
            }
            // geometry[0] is the MoveTo command, then one zigzag-encoded point.
            let &[_, gx, gy, ..] = feature.geometry.as_slice() else {
                continue;
            };
            let quantize = |v: u32| ((zigzag(v) - 7) as f64 / 16.0).round();
            let (qx, qy) = (quantize(gx), quantize(gy));
            if (0.0..256.0).contains(&qx) && (0.0..256.0).contains(&qy) {
                pixels.insert((qx as u32, qy as u32));
            }
        }
    }
    Ok(pixels)
}

fn zigzag(v: u32) -> i64 {
    i64::from(v >> 1) ^ -i64::from(v & 1)
}

/// Resolved `(key, value)` tag pairs of a feature; dangling indices are skipped.
fn tag_values<'a>(layer: &'a Layer, feature: &'a Feature) -> impl Iterator<Item = (&'a str, &'a Value)> {
    feature.tags.chunks_exact(2).filter_map(|pair| {
        let key = layer.keys.get(pair[0] as usize)?;
        let value = layer.values.get(pair[1] as usize)?;
        Some((key.as_str(), value))
    })
}

/// Extracts the unique sequence ids captured after `start_epoch_ms` from an
/// encoded coverage tile, sorted.
pub fn sequence_ids_from_tile(bytes: &[u8], start_epoch_ms: i64) -> Result<Vec<String>> {
    let tile = Tile::decode(bytes).context("Failed to decode coverage tile")?;

    let mut seen = BTreeSet::new();
    for layer in &tile.layers {
        for feature in &layer.features {
            let mut captured_at = None;
            let mut sequence_id = None;
            for (key, value) in tag_values(layer, feature) {
                match key {
                    "captured_at" => captured_at = int_value(value),
                    "sequence_id" => sequence_id = value.string_value.clone(),
                    _ => {}
                }
            }
            if let (Some(t), Some(id)) = (captured_at, sequence_id) {
                if t > start_epoch_ms && !id.is_empty() {
                    seen.insert(id);
                }
            }
        }
    }
    Ok(seen.into_iter().collect())
}

fn int_value(v: &Value) -> Option<i64> {
    v.int_value
        .or(v.sint_value)
        .or_else(|| v.uint_value.and_then(|u| i64::try_from(u).ok()))
        .or_else(|| v.double_value.map(|d| d as i64))
}
