//! Valhalla `trace_attributes` map matcher.

use super::{
    Context, EdgeObservation, MapMatchResult, MapMatcher, RoadClass, importance_for_highway,
};
use crate::fetch::{HttpClient, redact};
use crate::trace::TraceSequence;
use anyhow::{Context as _, Result, anyhow};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Edge speeds above this (km/h) mean the whole match is unreliable.
pub const MAX_EDGE_SPEED_KPH: f64 = 160.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValhallaConfig {
    /// Service root, e.g. `http://localhost:8002/`.
    pub base_url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ValhallaConfig {
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/trace_attributes")
    }
}

#[derive(Debug, Serialize)]
struct ShapePoint {
    lon: f64,
    lat: f64,
    time: f64,
}

#[derive(Debug, Serialize)]
struct TraceAttributesRequest<'a> {
    shape: Vec<ShapePoint>,
    costing: &'a str,
    shape_match: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct TraceAttributesResponse {
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub matched_points: Vec<MatchedPoint>,
    #[serde(default)]
    pub admins: Vec<Admin>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Edge {
    /// Kilometers.
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub density: f64,
    #[serde(default)]
    pub road_class: String,
    #[serde(default, rename = "use")]
    pub edge_use: String,
    #[serde(default)]
    pub roundabout: bool,
    #[serde(default)]
    pub sign: Option<serde_json::Value>,
    pub end_node: EndNode,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndNode {
    /// Seconds since the start of the trace.
    pub elapsed_time: f64,
    #[serde(default)]
    pub admin_index: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchedPoint {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Admin {
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub state_code: String,
}

pub struct ValhallaMatcher<C> {
    client: C,
    endpoint: String,
}

impl<C: HttpClient> ValhallaMatcher<C> {
    pub fn new(client: C, config: &ValhallaConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint(),
        }
    }
}

#[async_trait::async_trait]
impl<C: HttpClient> MapMatcher for ValhallaMatcher<C> {
    fn name(&self) -> &'static str {
        "valhalla"
    }

    #[tracing::instrument(skip_all, fields(sequence = %seq.id, points = seq.points.len()))]
    async fn match_sequence(&self, seq: &TraceSequence) -> Result<MapMatchResult> {
        let body = TraceAttributesRequest {
            shape: seq
                .points
                .iter()
                .map(|p| ShapePoint {
                    lon: p.lon,
                    lat: p.lat,
                    time: p.time,
                })
                .collect(),
            costing: "auto",
            shape_match: "map_snap",
        };

        let mut req = reqwest::Request::new(reqwest::Method::POST, self.endpoint.parse()?);
        req.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        *req.body_mut() = Some(serde_json::to_vec(&body)?.into());

        let resp = self.client.execute(req).await?;
        let status = resp.status();

        // 400 means Valhalla could not match this trace at all.
        if status == StatusCode::BAD_REQUEST {
            let text = resp.text().await.unwrap_or_default();
            tracing::debug!(%text, "No match for sequence");
            return Ok(MapMatchResult::unmatched(&seq.id));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "POST {} returned status {}: {}",
                redact(&self.endpoint),
                status,
                text
            ));
        }

        let parsed: TraceAttributesResponse = resp
            .json()
            .await
            .context("Failed to parse trace_attributes response")?;
        Ok(parse_trace_attributes(&seq.id, &parsed))
    }
}

/// Turns a `trace_attributes` response into observations.
///
/// The first and last edges are only partially traversed and are ignored.
/// A non-monotonic clock or an implausible edge speed discards every
/// observation of the sequence.
pub fn parse_trace_attributes(sequence_id: &str, resp: &TraceAttributesResponse) -> MapMatchResult {
    let match_ratio = match_ratio(&resp.matched_points);
    let mut result = MapMatchResult {
        sequence_id: sequence_id.to_string(),
        match_ratio,
        observations: Vec::new(),
    };

    if resp.edges.len() < 3 {
        return result;
    }

    let mut prev_t = resp.edges[0].end_node.elapsed_time;
    let mut observations = Vec::new();
    for edge in &resp.edges[1..resp.edges.len() - 1] {
        let t = edge.end_node.elapsed_time;
        if t < prev_t {
            tracing::debug!(sequence_id, prev_t, t, "Elapsed time went backwards, discarding");
            return result;
        }
        if t == prev_t {
            continue;
        }

        let speed = edge.length / (t - prev_t) * 3600.0;
        if speed > MAX_EDGE_SPEED_KPH {
            tracing::debug!(sequence_id, speed, "Edge speed over limit, discarding");
            return result;
        }

        let (iso3166_1, iso3166_2) = region(resp.admins.get(edge.end_node.admin_index));
        observations.push(EdgeObservation {
            iso3166_1,
            iso3166_2,
            context: Context::from_density(edge.density),
            road_class: classify(edge),
            importance: importance_for_highway(&edge.road_class),
            speed,
            matched: true,
        });
        prev_t = t;
    }

    result.observations = observations;
    result
}

fn match_ratio(points: &[MatchedPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let unmatched = points.iter().filter(|p| p.kind == "unmatched").count();
    1.0 - unmatched as f64 / points.len() as f64
}

fn region(admin: Option<&Admin>) -> (Option<String>, Option<String>) {
    let Some(admin) = admin else {
        return (None, None);
    };
    if admin.country_code.is_empty() {
        return (None, None);
    }
    let state = (!admin.state_code.is_empty())
        .then(|| format!("{}-{}", admin.country_code, admin.state_code));
    (Some(admin.country_code.clone()), state)
}

fn classify(edge: &Edge) -> RoadClass {
    match edge.edge_use.as_str() {
        "driveway" => return RoadClass::Driveway,
        "alley" => return RoadClass::Alley,
        "parking_aisle" => return RoadClass::ParkingAisle,
        "drive_through" => return RoadClass::DriveThrough,
        _ => {}
    }
    if edge.roundabout {
        return RoadClass::Roundabout;
    }
    if matches!(edge.edge_use.as_str(), "ramp" | "turn_channel") {
        return if has_sign(edge.sign.as_ref()) {
            RoadClass::LinkExiting
        } else {
            RoadClass::LinkTurning
        };
    }
    RoadClass::Way
}

fn has_sign(sign: Option<&serde_json::Value>) -> bool {
    match sign {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Object(m)) => !m.is_empty(),
        Some(serde_json::Value::Array(a)) => !a.is_empty(),
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge(length_km: f64, elapsed: f64, extra: serde_json::Value) -> serde_json::Value {
        let mut e = json!({
            "length": length_km,
            "density": 12.0,
            "road_class": "secondary",
            "use": "road",
            "end_node": {"elapsed_time": elapsed, "admin_index": 0}
        });
        if let (Some(obj), Some(extra)) = (e.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        e
    }

    fn response(edges: Vec<serde_json::Value>, unmatched: usize, total: usize) -> TraceAttributesResponse {
        let points: Vec<_> = (0..total)
            .map(|i| json!({"type": if i < unmatched { "unmatched" } else { "matched" }}))
            .collect();
        serde_json::from_value(json!({
            "edges": edges,
            "matched_points": points,
            "admins": [{"country_code": "DE", "state_code": "BE"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_speeds_skip_first_and_last_edge() {
        // 0.5 km in 60 s = 30 km/h, then 1 km in 60 s = 60 km/h
        let resp = response(
            vec![
                edge(9.0, 10.0, json!({})),
                edge(0.5, 70.0, json!({})),
                edge(1.0, 130.0, json!({})),
                edge(9.0, 131.0, json!({})),
            ],
            0,
            10,
        );
        let result = parse_trace_attributes("s", &resp);
        assert_eq!(result.match_ratio, 1.0);
        let speeds: Vec<f64> = result.observations.iter().map(|o| o.speed).collect();
        assert_eq!(speeds, vec![30.0, 60.0]);

        let obs = &result.observations[0];
        assert_eq!(obs.iso3166_1.as_deref(), Some("DE"));
        assert_eq!(obs.iso3166_2.as_deref(), Some("DE-BE"));
        assert_eq!(obs.context, Context::Urban);
        assert_eq!(obs.road_class, RoadClass::Way);
        assert_eq!(obs.importance, Some(4));
        assert!(obs.matched);
    }

    #[test]
    fn test_match_ratio_counts_unmatched_points() {
        let resp = response(vec![], 3, 10);
        let result = parse_trace_attributes("s", &resp);
        assert!((result.match_ratio - 0.7).abs() < 1e-9);
        assert!(result.observations.is_empty());
    }

    #[test]
    fn test_backwards_time_discards_everything() {
        let resp = response(
            vec![
                edge(1.0, 10.0, json!({})),
                edge(0.5, 70.0, json!({})),
                edge(0.5, 60.0, json!({})),
                edge(1.0, 200.0, json!({})),
            ],
            0,
            4,
        );
        assert!(parse_trace_attributes("s", &resp).observations.is_empty());
    }

    #[test]
    fn test_zero_elapsed_edge_is_skipped() {
        let resp = response(
            vec![
                edge(1.0, 10.0, json!({})),
                edge(0.01, 10.0, json!({})),
                edge(0.5, 70.0, json!({})),
                edge(1.0, 200.0, json!({})),
            ],
            0,
            4,
        );
        let result = parse_trace_attributes("s", &resp);
        assert_eq!(result.observations.len(), 1);
        assert_eq!(result.observations[0].speed, 30.0);
    }

    #[test]
    fn test_overspeed_discards_sequence() {
        // 1 km in 10 s = 360 km/h
        let resp = response(
            vec![
                edge(1.0, 0.0, json!({})),
                edge(0.5, 60.0, json!({})),
                edge(1.0, 70.0, json!({})),
                edge(1.0, 100.0, json!({})),
            ],
            0,
            4,
        );
        assert!(parse_trace_attributes("s", &resp).observations.is_empty());
    }

    #[test]
    fn test_edge_classification() {
        let cases = [
            (json!({"use": "driveway"}), RoadClass::Driveway),
            (json!({"use": "alley"}), RoadClass::Alley),
            (json!({"use": "parking_aisle"}), RoadClass::ParkingAisle),
            (json!({"use": "drive_through"}), RoadClass::DriveThrough),
            (json!({"roundabout": true}), RoadClass::Roundabout),
            (json!({"use": "ramp", "sign": {"exit_number": [{"text": "3"}]}}), RoadClass::LinkExiting),
            (json!({"use": "ramp"}), RoadClass::LinkTurning),
            (json!({"use": "turn_channel", "sign": {}}), RoadClass::LinkTurning),
            (json!({}), RoadClass::Way),
        ];
        for (extra, expected) in cases {
            let e: Edge = serde_json::from_value(edge(1.0, 1.0, extra.clone())).unwrap();
            assert_eq!(classify(&e), expected, "{extra}");
        }
    }

    #[test]
    fn test_region_without_state() {
        let admin = Admin {
            country_code: "FR".into(),
            state_code: String::new(),
        };
        assert_eq!(region(Some(&admin)), (Some("FR".into()), None));
        assert_eq!(region(None), (None, None));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let config: ValhallaConfig =
            serde_json::from_value(json!({"base_url": "http://localhost:8002/"})).unwrap();
        assert_eq!(config.endpoint(), "http://localhost:8002/trace_attributes");
        assert!(config.headers.is_empty());
    }
}
