//! Curved connections between two coordinates, drawn in with a dash
//! animation.

use geo::coord;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    config::{ArcConfig, KeyFn, section_from},
    error::MapError,
    map::AtlasMap,
    projection::great_arc,
    scene::{Curve, LayerId, Node, Property, SceneGraph, Shape, Transition},
};

pub const ARC_CLASS: &str = "datamaps-arc";

/// Control point offset per unit of sharpness.
const SHARPNESS_DX: f64 = 50.0;
const SHARPNESS_DY: f64 = 75.0;
/// Pause between the path getting its geometry and the draw-in starting.
const DRAW_IN_DELAY_MS: u64 = 100;

#[derive(Clone, Copy, Debug, Deserialize)]
struct Endpoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArcDatum {
    origin: Endpoint,
    destination: Endpoint,
    stroke_color: Option<String>,
    stroke_width: Option<f64>,
    arc_sharpness: Option<f64>,
    animation_speed: Option<u64>,
    great_arc: Option<bool>,
}

/// Folds a legacy nested `options` object into the datum. Top-level keys
/// that are set keep their value.
fn flatten_legacy_options(mut datum: Value) -> Value {
    if let Value::Object(fields) = &mut datum {
        if let Some(Value::Object(nested)) = fields.remove("options") {
            for (key, value) in nested {
                let slot = fields.entry(key).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = value;
                }
            }
        }
    }
    datum
}

pub fn render<S: SceneGraph>(
    map: &mut AtlasMap<S>,
    layer: LayerId,
    data: Option<&Value>,
    options: &Map<String, Value>,
) -> Result<(), MapError> {
    let config: ArcConfig = section_from("arc", options)?;
    let items: Vec<Value> = data
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .cloned()
        .map(flatten_legacy_options)
        .collect();
    let arcs = items
        .iter()
        .map(|v| {
            serde_json::from_value::<ArcDatum>(v.clone()).map_err(|e| MapError::InvalidDatum {
                plugin: "arc".to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let key = KeyFn::structural();
    let keys: Vec<String> = items.iter().map(|v| key.key(v)).collect();
    let join = map.scene.join(layer, ARC_CLASS, &keys);

    let mut skipped = 0;
    for &i in &join.enter {
        let arc = &arcs[i];
        let Some(curve) = route(map, arc, &config) else {
            skipped += 1;
            continue;
        };
        let length = curve.length();
        let mut node = Node::new(keys[i].clone(), ARC_CLASS, layer, Shape::Curve(curve));
        node.datum = Some(items[i].clone());
        node.set_attr("stroke-linecap", "round");

        let scene = &mut map.scene;
        let id = scene.append(node);
        scene.set(id, Property::Fill, "none".into());
        scene.set(id, Property::Opacity, 1.0.into());
        scene.set(id, Property::Stroke, arc.stroke_color.as_deref().unwrap_or(&config.stroke_color).into());
        scene.set(id, Property::StrokeWidth, arc.stroke_width.unwrap_or(config.stroke_width).into());
        // dash length is taken from the final geometry, so it is set last
        scene.set(id, Property::DashArray, length.into());
        scene.set(id, Property::DashOffset, length.into());
        scene.transition(
            id,
            Transition::new(Property::DashOffset, 0.0)
                .delay(DRAW_IN_DELAY_MS)
                .duration(arc.animation_speed.unwrap_or(config.animation_speed)),
        );
    }

    for &id in &join.exit {
        map.scene
            .transition(id, Transition::new(Property::Opacity, 0.0).then_remove());
    }

    debug!(
        entered = join.enter.len() - skipped,
        skipped,
        exiting = join.exit.len(),
        "arcs joined"
    );
    Ok(())
}

/// Planar route of an arc, `None` when an endpoint does not project.
fn route<S: SceneGraph>(map: &AtlasMap<S>, arc: &ArcDatum, config: &ArcConfig) -> Option<Curve> {
    let (o, d) = (arc.origin, arc.destination);
    if arc.great_arc.unwrap_or(config.great_arc) {
        let line = great_arc(
            coord! { x: o.longitude, y: o.latitude },
            coord! { x: d.longitude, y: d.latitude },
        );
        let lines = map.path.lines(&line);
        return (!lines.0.is_empty()).then_some(Curve::Polyline(lines));
    }

    let from = map.latlng_to_xy(o.latitude, o.longitude)?;
    let to = map.latlng_to_xy(d.latitude, d.longitude)?;
    let sharpness = arc.arc_sharpness.unwrap_or(config.arc_sharpness);
    let mid = coord! { x: (from.x + to.x) / 2.0, y: (from.y + to.y) / 2.0 };
    let control = coord! {
        x: mid.x + SHARPNESS_DX * sharpness,
        y: mid.y - SHARPNESS_DY * sharpness,
    };
    Some(Curve::Quadratic { from, control, to })
}
