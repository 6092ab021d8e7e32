//! Region id labels, with a leader-line cascade for regions too small to
//! hold their own label.

use geo::{Centroid, Coord, Line, coord};
use serde_json::{Map, Value};

use crate::{
    base::REGION_CLASS,
    config::{LabelsConfig, section_from},
    error::MapError,
    map::AtlasMap,
    overlays::sync_static,
    scene::{LayerId, Property, SceneGraph, Shape},
};

pub const LABEL_CLASS: &str = "datamaps-label";
pub const LEADER_CLASS: &str = "datamaps-label-leader";

const DEFAULT_FONT_SIZE: f64 = 10.0;
/// Font size assumed for cascade spacing when none is configured.
const CASCADE_FONT_SIZE: f64 = 12.0;
const CASCADE_GAP: f64 = 2.0;

struct LabelSpot {
    id: String,
    at: Coord<f64>,
    leader: Option<Line<f64>>,
}

/// Labels every rendered region with its id. Settings come through the
/// invocation options; the plugin takes no data.
pub fn render<S: SceneGraph>(
    map: &mut AtlasMap<S>,
    layer: LayerId,
    _data: Option<&Value>,
    options: &Map<String, Value>,
) -> Result<(), MapError> {
    let config: LabelsConfig = section_from("labels", options)?;
    let placements = place(map, &config);

    let texts = placements
        .iter()
        .map(|p| {
            let shape = Shape::Text {
                at: p.at,
                text: p.id.clone(),
                font_family: config.font_family.clone(),
            };
            (p.id.clone(), shape)
        })
        .collect();
    let font_size = config.font_size.unwrap_or(DEFAULT_FONT_SIZE);
    for id in sync_static(&mut map.scene, layer, LABEL_CLASS, texts) {
        map.scene.set(id, Property::FontSize, font_size.into());
        map.scene.set(id, Property::Fill, config.label_color.as_str().into());
    }

    let leaders = placements
        .iter()
        .filter_map(|p| Some((p.id.clone(), Shape::Segment(p.leader?))))
        .collect();
    for id in sync_static(&mut map.scene, layer, LEADER_CLASS, leaders) {
        map.scene.set(id, Property::Stroke, config.label_color.as_str().into());
        map.scene.set(id, Property::StrokeWidth, config.line_width.into());
    }
    Ok(())
}

fn place<S: SceneGraph>(map: &AtlasMap<S>, config: &LabelsConfig) -> Vec<LabelSpot> {
    let [origin_lng, origin_lat] = config.cascade_origin;
    let cascade_start = map.latlng_to_xy(origin_lat, origin_lng);
    let step = CASCADE_GAP + config.font_size.unwrap_or(CASCADE_FONT_SIZE);

    map.scene
        .nodes(map.base_layer)
        .into_iter()
        .filter_map(|id| {
            let node = map.scene.node(id)?;
            if node.class != REGION_CLASS {
                return None;
            }
            let Shape::Region(polygons) = &node.shape else {
                return None;
            };
            let center = polygons.centroid()?.0;
            let slot = config.cascade.iter().position(|c| *c == node.key);

            let placement = match (slot, cascade_start) {
                (Some(slot), Some(start)) => {
                    let at = coord! { x: start.x, y: start.y + slot as f64 * step };
                    let leader = Line::new(coord! { x: at.x - 3.0, y: at.y - 5.0 }, center);
                    LabelSpot { id: node.key.clone(), at, leader: Some(leader) }
                }
                _ => {
                    let offset = config.offsets.get(&node.key).copied().unwrap_or(config.default_offset);
                    let at = coord! { x: center.x - offset.x, y: center.y + offset.y };
                    LabelSpot { id: node.key.clone(), at, leader: None }
                }
            };
            Some(placement)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MapOptions,
        data::{Feature, FeatureCollection},
        scene::{NodeId, RetainedScene},
    };
    use approx::assert_relative_eq;
    use geo::polygon;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn usa() -> AtlasMap<RetainedScene> {
        let state = |id: &str, lng: f64, lat: f64| Feature {
            id: id.to_string(),
            name: id.to_string(),
            geometry: polygon![
                (x: lng, y: lat), (x: lng + 2.0, y: lat), (x: lng + 2.0, y: lat + 2.0), (x: lng, y: lat + 2.0)
            ]
            .into(),
        };
        let features = FeatureCollection::new(
            "usa",
            vec![
                state("TX", -100.0, 30.0),
                state("MI", -86.0, 43.0),
                state("RI", -72.0, 41.0),
                state("CT", -73.0, 41.0),
            ],
        );
        let options = MapOptions { scope: "usa".into(), ..MapOptions::default() };
        AtlasMap::new(RetainedScene::new(), options, features).unwrap()
    }

    fn text_at(map: &AtlasMap<RetainedScene>, layer: LayerId, id: &str) -> Coord<f64> {
        let node = map.scene().find(layer, LABEL_CLASS, id).and_then(|n| map.scene().node(n));
        match node.map(|n| &n.shape) {
            Some(Shape::Text { at, .. }) => *at,
            other => panic!("no label for {id}: {other:?}"),
        }
    }

    #[test]
    fn labels_sit_beside_the_centroid() {
        let mut map = usa();
        let layer = map.invoke("labels", None, None).unwrap();
        let center = map.region_centroid("TX").unwrap();
        let at = text_at(&map, layer, "TX");
        assert_relative_eq!(at.x, center.x - 7.5);
        assert_relative_eq!(at.y, center.y + 5.0);

        let center = map.region_centroid("MI").unwrap();
        let at = text_at(&map, layer, "MI");
        assert_relative_eq!(at.x, center.x + 2.5);
        assert_relative_eq!(at.y, center.y + 18.0);
    }

    #[test]
    fn small_regions_cascade_with_leaders() {
        let mut map = usa();
        let opts = json!({ "fontSize": 14, "labelColor": "#333333" });
        let layer = map.invoke("labels", None, opts.as_object()).unwrap();
        let start = map.latlng_to_xy(42.722131, -67.707617).unwrap();

        let ri = text_at(&map, layer, "RI");
        let ct = text_at(&map, layer, "CT");
        assert_relative_eq!(ri.x, start.x);
        assert_relative_eq!(ri.y, start.y + 3.0 * 16.0);
        assert_relative_eq!(ct.y, start.y + 4.0 * 16.0);

        let leader: NodeId = map.scene().find(layer, LEADER_CLASS, "RI").unwrap();
        let node = map.scene().node(leader).unwrap();
        assert_eq!(node.color(Property::Stroke), Some("#333333"));
        let Shape::Segment(line) = &node.shape else {
            panic!("leader should be a segment");
        };
        assert_eq!(line.start, coord! { x: ri.x - 3.0, y: ri.y - 5.0 });
        assert_eq!(Some(line.end), map.region_centroid("RI"));
        assert!(map.scene().find(layer, LEADER_CLASS, "TX").is_none());
    }

    #[test]
    fn relabelling_replaces_instead_of_stacking() {
        let mut map = usa();
        let layer = map.invoke("labels", None, None).unwrap();
        let count = map.scene().nodes(layer).len();
        map.invoke("labels", None, None).unwrap();
        assert_eq!(map.scene().nodes(layer).len(), count);
        assert_eq!(count, 4 + 2);
    }
}
