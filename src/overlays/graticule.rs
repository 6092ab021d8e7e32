//! Meridian and parallel grid drawn beneath the regions.

use geo::MultiLineString;
use serde_json::{Map, Value};

use crate::{
    error::MapError,
    map::AtlasMap,
    overlays::sync_static,
    projection,
    scene::{LayerId, Property, SceneGraph, Shape},
};

pub const GRATICULE_CLASS: &str = "datamaps-graticule";

pub fn render<S: SceneGraph>(
    map: &mut AtlasMap<S>,
    layer: LayerId,
    _data: Option<&Value>,
    _options: &Map<String, Value>,
) -> Result<(), MapError> {
    let lines: MultiLineString<f64> = projection::graticule()
        .iter()
        .flat_map(|line| map.path.lines(line).0)
        .collect();

    for id in sync_static(
        &mut map.scene,
        layer,
        GRATICULE_CLASS,
        vec![("graticule".to_string(), Shape::Lines(lines))],
    ) {
        map.scene.set(id, Property::Fill, "none".into());
        map.scene.set(id, Property::Stroke, "#777777".into());
        map.scene.set(id, Property::StrokeWidth, 0.5.into());
        map.scene.set(id, Property::Opacity, 0.5.into());
    }
    map.scene.move_layer_below(layer, map.base_layer);
    Ok(())
}
