//! Proportional circles at coordinates or region centroids.

use geo::Coord;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    config::{BubblesConfig, section_from},
    error::MapError,
    map::AtlasMap,
    scene::{LayerId, Node, NodeId, PointerEvent, Property, SceneGraph, Shape, Transition},
};

pub const BUBBLE_CLASS: &str = "datamaps-bubble";

/// Duration of the radius transition on enter and update.
const GROW_MS: u64 = 400;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bubble {
    latitude: Option<f64>,
    longitude: Option<f64>,
    /// Region id whose centroid positions the bubble.
    centered: Option<String>,
    radius: Option<f64>,
    fill_key: Option<String>,
    filter_key: Option<String>,
    border_color: Option<String>,
    border_width: Option<f64>,
    fill_opacity: Option<f64>,
}

pub fn render<S: SceneGraph>(
    map: &mut AtlasMap<S>,
    layer: LayerId,
    data: Option<&Value>,
    options: &Map<String, Value>,
) -> Result<(), MapError> {
    let mut config: BubblesConfig = section_from("bubbles", options)?;
    config.key = map.options.bubbles_config.key.clone();
    config.popup_template = map.options.bubbles_config.popup_template.clone();

    let items = data.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    let bubbles = items
        .iter()
        .map(|v| {
            serde_json::from_value::<Bubble>(v.clone()).map_err(|e| MapError::InvalidDatum {
                plugin: "bubbles".to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let keys: Vec<String> = items.iter().map(|v| config.key.key(v)).collect();

    let join = map.scene.join(layer, BUBBLE_CLASS, &keys);
    let hover = config.hover_settings();
    let mut growing: Vec<(usize, NodeId)> = Vec::with_capacity(join.enter.len() + join.update.len());

    for &i in &join.enter {
        let bubble = &bubbles[i];
        let center = position(map, bubble);
        if center.is_none() {
            debug!(key = %keys[i], "bubble has no resolvable position");
        }
        let mut node = Node::new(keys[i].clone(), BUBBLE_CLASS, layer, Shape::Circle { center });
        node.datum = Some(items[i].clone());
        let filter = bubble
            .filter_key
            .as_ref()
            .or(config.filter_key.as_ref())
            .and_then(|k| map.options.filters.get(k));
        if let Some(filter) = filter {
            node.set_attr("filter", filter.clone());
        }

        let id = map.scene.append(node);
        let fill_key = bubble.fill_key.as_deref().or(config.fill_key.as_deref());
        let fill = map.options.fills.resolve(fill_key).to_string();
        let start = if config.animate { 0.0 } else { radius_of(bubble, &config) };
        let scene = &mut map.scene;
        scene.set(id, Property::Radius, start.into());
        scene.set(id, Property::Fill, fill.into());
        scene.set(id, Property::Stroke, bubble.border_color.as_deref().unwrap_or(&config.border_color).into());
        scene.set(id, Property::StrokeWidth, bubble.border_width.unwrap_or(config.border_width).into());
        scene.set(id, Property::FillOpacity, bubble.fill_opacity.unwrap_or(config.fill_opacity).into());
        if hover.is_interactive() {
            scene.listen(id, PointerEvent::Enter);
            scene.listen(id, PointerEvent::Leave);
        }
        growing.push((i, id));
    }

    for &(i, id) in &join.update {
        if let Some(node) = map.scene.node_mut(id) {
            node.datum = Some(items[i].clone());
        }
        growing.push((i, id));
    }

    for (i, id) in growing {
        let to = radius_of(&bubbles[i], &config);
        map.scene
            .transition(id, Transition::new(Property::Radius, to).duration(GROW_MS));
    }

    for &id in &join.exit {
        map.scene.transition(
            id,
            Transition::new(Property::Radius, 0.0)
                .delay(config.exit_delay)
                .then_remove(),
        );
    }

    debug!(
        entered = join.enter.len(),
        updated = join.update.len(),
        exiting = join.exit.len(),
        "bubbles joined"
    );
    map.hover_profiles.insert(layer, hover);
    Ok(())
}

fn radius_of(bubble: &Bubble, config: &BubblesConfig) -> f64 {
    bubble.radius.or(config.radius).unwrap_or(0.0)
}

/// Explicit coordinates first, then the centroid of the `centered` region.
fn position<S: SceneGraph>(map: &AtlasMap<S>, bubble: &Bubble) -> Option<Coord<f64>> {
    if let (Some(lat), Some(lng)) = (bubble.latitude, bubble.longitude) {
        return map.latlng_to_xy(lat, lng);
    }
    map.region_centroid(bubble.centered.as_deref()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{KeyFn, MapOptions},
        data::{Feature, FeatureCollection},
        scene::RetainedScene,
    };
    use approx::assert_relative_eq;
    use geo::polygon;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(options: MapOptions) -> AtlasMap<RetainedScene> {
        let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        let features = FeatureCollection::new(
            "world",
            vec![Feature { id: "SQR".into(), name: "Square".into(), geometry: square.into() }],
        );
        AtlasMap::new(RetainedScene::new(), options, features).unwrap()
    }

    fn radius(map: &AtlasMap<RetainedScene>, id: NodeId) -> f64 {
        map.scene().node(id).and_then(|n| n.number(Property::Radius)).unwrap_or(f64::NAN)
    }

    #[test]
    fn bubbles_grow_in_from_zero() {
        let mut map = map(MapOptions::default());
        let data = json!([{ "latitude": 10.0, "longitude": 20.0, "radius": 8, "fillKey": "nope" }]);
        let layer = map.invoke("bubbles", Some(&data), None).unwrap();
        let id = map.scene().nodes(layer)[0];

        assert_eq!(radius(&map, id), 0.0);
        map.scene_mut().advance(200);
        assert_relative_eq!(radius(&map, id), 4.0);
        map.scene_mut().settle();
        assert_relative_eq!(radius(&map, id), 8.0);

        let node = map.scene().node(id).unwrap();
        assert_eq!(node.color(Property::Fill), Some("#ABDDA4"));
        assert_eq!(node.number(Property::FillOpacity), Some(0.75));
        let expected = map.latlng_to_xy(10.0, 20.0);
        assert_eq!(node.shape, Shape::Circle { center: expected });
    }

    #[test]
    fn centered_bubbles_sit_on_the_region_centroid() {
        let mut map = map(MapOptions::default());
        let data = json!([{ "centered": "SQR", "radius": 3 }, { "centered": "NOPE", "radius": 3 }]);
        let layer = map.invoke("bubbles", Some(&data), None).unwrap();
        let nodes = map.scene().nodes(layer);
        let centroid = map.region_centroid("SQR");
        assert!(centroid.is_some());
        assert_eq!(map.scene().node(nodes[0]).unwrap().shape, Shape::Circle { center: centroid });
        assert_eq!(map.scene().node(nodes[1]).unwrap().shape, Shape::Circle { center: None });
    }

    #[test]
    fn rejoining_keeps_survivors_and_shrinks_the_rest() {
        let mut map = map(MapOptions::default());
        let (a, b, c) = (
            json!({ "latitude": 1.0, "longitude": 1.0, "radius": 5 }),
            json!({ "latitude": 2.0, "longitude": 2.0, "radius": 5 }),
            json!({ "latitude": 3.0, "longitude": 3.0, "radius": 5 }),
        );
        let layer = map.invoke("bubbles", Some(&json!([a, b])), None).unwrap();
        map.scene_mut().settle();
        let before = map.scene().nodes(layer);

        map.invoke("bubbles", Some(&json!([b, c])), None).unwrap();
        let after = map.scene().nodes(layer);
        assert_eq!(after.len(), 3);
        assert_eq!(after[1], before[1]);
        assert!(map.scene().node(before[0]).unwrap().is_exiting());

        // exit delay has not elapsed yet
        map.scene_mut().advance(100);
        assert_relative_eq!(radius(&map, before[0]), 5.0);
        map.scene_mut().settle();
        assert!(map.scene().node(before[0]).is_none());
        assert_eq!(map.scene().nodes(layer).len(), 2);
    }

    #[test]
    fn custom_keys_and_filters_apply() {
        let mut options = MapOptions::from_json(json!({
            "filters": { "glow": "url(#glow)" },
            "bubblesConfig": { "animate": false, "filterKey": "glow" }
        }))
        .unwrap();
        options.bubbles_config.key = KeyFn::new(|d| d["name"].as_str().unwrap_or_default().to_string());
        let mut map = map(options);

        let layer = map
            .invoke("bubbles", Some(&json!([{ "name": "a", "latitude": 0, "longitude": 0, "radius": 6 }])), None)
            .unwrap();
        let first = map.scene().nodes(layer)[0];
        let node = map.scene().node(first).unwrap();
        assert_eq!(node.key, "a");
        assert_eq!(node.attr("filter"), Some("url(#glow)"));
        assert_eq!(node.number(Property::Radius), Some(6.0));

        map.invoke("bubbles", Some(&json!([{ "name": "a", "latitude": 0, "longitude": 0, "radius": 9 }])), None)
            .unwrap();
        map.scene_mut().settle();
        assert_eq!(map.scene().nodes(layer), vec![first]);
        assert_relative_eq!(radius(&map, first), 9.0);
    }

    #[test]
    fn malformed_datums_are_rejected_before_drawing() {
        let mut map = map(MapOptions::default());
        let layer = map.invoke("bubbles", Some(&json!([])), None).unwrap();
        let err = map.invoke("bubbles", Some(&json!([{ "radius": "big" }])), None).unwrap_err();
        assert!(matches!(err, MapError::InvalidDatum { .. }));
        assert!(map.scene().nodes(layer).is_empty());
    }

    #[test]
    fn hovering_a_bubble_shows_its_name() {
        let mut map = map(MapOptions::from_json(json!({ "bubblesConfig": { "animate": false } })).unwrap());
        let data = json!([{ "name": "Castle Bravo", "latitude": 50.0, "longitude": 100.0, "radius": 10 }]);
        map.invoke("bubbles", Some(&data), None).unwrap();
        let at = map.latlng_to_xy(50.0, 100.0).unwrap();
        map.pointer_moved(at);
        assert!(map.popup().visible);
        assert_eq!(map.popup().content, "Castle Bravo");
        assert_eq!(map.hovered().map(|n| n.class.as_str()), Some(BUBBLE_CLASS));
        assert_eq!(map.hovered().and_then(|n| n.number(Property::FillOpacity)), Some(0.85));
    }
}
