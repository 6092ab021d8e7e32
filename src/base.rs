//! Base layer: one filled shape per visible feature of the scope.

use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    config::{FillContext, FillPalette, GeographyConfig},
    data::{Feature, FeatureCollection, RegionDatum},
    projection::{PathGenerator, svg_path},
    scene::{LayerId, Node, Property, SceneGraph, Shape},
};

pub const REGION_CLASS: &str = "datamaps-subunit";

/// Counts from one reconciliation of the base layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub entered: usize,
    pub updated: usize,
    pub exited: usize,
}

/// Fill for a region: palette colour of the datum's `fillKey`, else its
/// `fillColor`, else `defaultFill`. Unknown keys fall through.
pub fn resolve_fill(feature: &Feature, datum: Option<&RegionDatum>, fills: &FillPalette) -> String {
    let Some(datum) = datum else {
        return fills.default_fill().to_string();
    };
    if let Some(color) = datum.fill_key.as_deref().and_then(|k| fills.get(k)) {
        return color.to_string();
    }
    match &datum.fill_color {
        Some(fill) => fill.resolve(&FillContext { feature, datum }),
        None => fills.default_fill().to_string(),
    }
}

/// Reconciles the base layer with the scope's features. Existing region
/// nodes are left untouched, so redrawing is idempotent; nodes for
/// features that are no longer visible are removed at once.
pub fn render_regions<S: SceneGraph>(
    scene: &mut S,
    layer: LayerId,
    features: &FeatureCollection,
    data: &BTreeMap<String, RegionDatum>,
    fills: &FillPalette,
    geography: &GeographyConfig,
    path: &PathGenerator,
) -> JoinSummary {
    let excluded = geography.excluded_ids();
    let visible: Vec<&Feature> = features
        .features
        .iter()
        .filter(|f| !excluded.contains(&f.id.as_str()))
        .collect();
    let keys: Vec<String> = visible.iter().map(|f| f.id.clone()).collect();
    let join = scene.join(layer, REGION_CLASS, &keys);

    for &i in &join.enter {
        let feature = visible[i];
        let datum = data.get(&feature.id);
        let projected = path.polygons(&feature.geometry);
        let d = svg_path(&projected);
        let mut node = Node::new(&feature.id, REGION_CLASS, layer, Shape::Region(projected));
        node.set_attr("d", d);
        node.datum = datum.map(RegionDatum::to_tag);

        let id = scene.append(node);
        scene.set(id, Property::Fill, resolve_fill(feature, datum, fills).into());
        scene.set(id, Property::StrokeWidth, geography.border_width.into());
        scene.set(id, Property::Stroke, geography.border_color.as_str().into());
    }
    for &id in &join.exit {
        scene.remove(id);
    }

    let summary = JoinSummary {
        entered: join.enter.len(),
        updated: join.update.len(),
        exited: join.exit.len(),
    };
    debug!(
        scope = %features.scope,
        entered = summary.entered,
        updated = summary.updated,
        exited = summary.exited,
        "base layer reconciled"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{MapOptions, Resolvable},
        projection::{Projection, ProjectionFamily, Scope},
        scene::{Placement, RetainedScene},
    };
    use geo::polygon;
    use pretty_assertions::assert_eq;

    fn square(id: &str, x: f64) -> Feature {
        Feature {
            id: id.to_string(),
            name: id.to_lowercase(),
            geometry: polygon![(x: x, y: 0.0), (x: x + 10.0, y: 0.0), (x: x + 10.0, y: 10.0), (x: x, y: 10.0)].into(),
        }
    }

    fn world() -> FeatureCollection {
        FeatureCollection::new("world", vec![square("USA", 0.0), square("ATA", 20.0), square("BRA", 40.0)])
    }

    fn path(features: &FeatureCollection) -> PathGenerator {
        let options = MapOptions::default();
        let projection = Projection::for_scope(
            &Scope::World,
            ProjectionFamily::Equirectangular,
            &options.projection_config,
            options.viewport(),
            features,
        )
        .unwrap();
        PathGenerator::new(projection)
    }

    #[test]
    fn fill_prefers_palette_then_fill_color_then_default() {
        let fills = FillPalette::new([("high", "#FF0000")]);
        let feature = square("USA", 0.0);

        let keyed = RegionDatum::with_fill_key("high");
        assert_eq!(resolve_fill(&feature, Some(&keyed), &fills), "#FF0000");

        let unknown = RegionDatum {
            fill_color: Some("#00FF00".into()),
            ..RegionDatum::with_fill_key("nope")
        };
        assert_eq!(resolve_fill(&feature, Some(&unknown), &fills), "#00FF00");

        let computed = RegionDatum {
            fill_color: Some(Resolvable::computed(|ctx| format!("#{}", ctx.feature.id))),
            ..RegionDatum::default()
        };
        assert_eq!(resolve_fill(&feature, Some(&computed), &fills), "#USA");

        assert_eq!(resolve_fill(&feature, None, &fills), "#ABDDA4");
        assert_eq!(resolve_fill(&feature, Some(&RegionDatum::default()), &fills), "#ABDDA4");
    }

    #[test]
    fn hidden_regions_never_get_nodes_and_redraws_are_stable() {
        let features = world();
        let path = path(&features);
        let mut scene = RetainedScene::new();
        let layer = scene.add_layer("datamaps-subunits", Placement::Top);
        let data = BTreeMap::from([("USA".to_string(), RegionDatum::with_fill_key("high"))]);
        let fills = FillPalette::new([("high", "#FF0000")]);
        let geography = GeographyConfig::default();

        let first = render_regions(&mut scene, layer, &features, &data, &fills, &geography, &path);
        assert_eq!(first, JoinSummary { entered: 2, updated: 0, exited: 0 });
        assert!(scene.find(layer, REGION_CLASS, "ATA").is_none());

        let usa = scene.find(layer, REGION_CLASS, "USA").unwrap();
        let node = scene.node(usa).unwrap();
        assert_eq!(node.color(Property::Fill), Some("#FF0000"));
        assert_eq!(node.color(Property::Stroke), Some("#FDFDFD"));
        assert!(node.attr("d").is_some_and(|d| d.starts_with('M') && d.ends_with('Z')));

        let again = render_regions(&mut scene, layer, &features, &data, &fills, &geography, &path);
        assert_eq!(again, JoinSummary { entered: 0, updated: 2, exited: 0 });
        assert_eq!(scene.nodes(layer).len(), 2);
        assert_eq!(scene.find(layer, REGION_CLASS, "USA"), Some(usa));
    }
}
