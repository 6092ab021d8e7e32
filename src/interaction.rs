//! Hover highlighting and the popup. One live session per map.

use geo::{Coord, coord};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
};
use tracing::{trace, warn};

use crate::{
    base::REGION_CLASS,
    config::{HoverSettings, PopupContext, PopupTemplate},
    data::{Feature, FeatureCollection},
    scene::{LayerId, NodeId, PointerEvent, PropValue, Property, SceneGraph, StyleSnapshot},
};

/// Properties a highlight touches, and therefore the ones snapshotted.
const HIGHLIGHTED: [Property; 4] = [
    Property::Fill,
    Property::Stroke,
    Property::StrokeWidth,
    Property::FillOpacity,
];

/// Vertical gap between the pointer and the popup's top edge.
pub const POPUP_OFFSET_Y: f64 = 30.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Popup {
    pub visible: bool,
    pub position: Coord<f64>,
    pub content: String,
}

impl Default for Popup {
    fn default() -> Self {
        Self {
            visible: false,
            position: coord! { x: 0.0, y: 0.0 },
            content: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct HoverSession {
    node: NodeId,
    layer: LayerId,
}

#[derive(Debug, Default)]
pub struct InteractionController {
    session: Option<HoverSession>,
    popup: Popup,
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn popup(&self) -> &Popup {
        &self.popup
    }

    pub fn hovered(&self) -> Option<NodeId> {
        self.session.map(|s| s.node)
    }

    /// Routes a pointer position. `hit` is the topmost hoverable node under
    /// the pointer; `profiles` holds the hover settings per layer.
    pub fn pointer_moved<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        hit: Option<NodeId>,
        point: Coord<f64>,
        profiles: &BTreeMap<LayerId, HoverSettings>,
        features: &FeatureCollection,
    ) {
        match (self.hovered(), hit) {
            (Some(current), Some(hit)) if current == hit => {
                let tracking = scene.node(hit).is_some_and(|n| n.listens(PointerEvent::Move));
                if let (true, Some(session)) = (tracking, self.session) {
                    if let Some(settings) = profiles.get(&session.layer) {
                        self.place_popup(scene, hit, point, &settings.popup_template, features);
                    }
                }
            }
            (current, hit) => {
                if current.is_some() {
                    self.end(scene);
                }
                if let Some(hit) = hit {
                    self.begin(scene, hit, point, profiles, features);
                }
            }
        }
    }

    /// The pointer left the map altogether.
    pub fn pointer_left<S: SceneGraph>(&mut self, scene: &mut S) {
        if self.session.is_some() {
            self.end(scene);
        }
    }

    /// Ends the live session, if any, restoring the hovered node.
    pub fn end<S: SceneGraph>(&mut self, scene: &mut S) {
        let Some(session) = self.session.take() else {
            return;
        };
        let snapshot = scene.node_mut(session.node).and_then(|n| n.saved_style.take());
        if let Some(StyleSnapshot(saved)) = snapshot {
            for (property, value) in saved {
                match value {
                    Some(value) => scene.set(session.node, property, value),
                    None => scene.unset(session.node, property),
                }
            }
        }
        scene.unlisten(session.node, PointerEvent::Move);
        self.popup.visible = false;
        trace!(node = ?session.node, "hover ended");
    }

    /// Points the saved pre-hover value of `property` at `value`, so that a
    /// style change arriving mid-hover survives the restore. Returns false
    /// when `id` is not the highlighted node.
    pub fn retarget_snapshot<S: SceneGraph>(
        &self,
        scene: &mut S,
        id: NodeId,
        property: Property,
        value: PropValue,
    ) -> bool {
        if self.hovered() != Some(id) {
            return false;
        }
        let Some(StyleSnapshot(saved)) = scene.node_mut(id).and_then(|n| n.saved_style.as_mut()) else {
            return false;
        };
        match saved.iter_mut().find(|(p, _)| *p == property) {
            Some((_, slot)) => *slot = Some(value),
            None => saved.push((property, Some(value))),
        }
        true
    }

    /// Snapshots the highlighted properties, then highlights. A property
    /// mid-transition is captured at its target, not at the value on
    /// screen, because the highlight cancels the transition.
    fn begin<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        id: NodeId,
        point: Coord<f64>,
        profiles: &BTreeMap<LayerId, HoverSettings>,
        features: &FeatureCollection,
    ) {
        let Some(node) = scene.node(id) else {
            return;
        };
        let layer = node.layer;
        let Some(settings) = profiles.get(&layer) else {
            return;
        };
        let datum = node.datum.clone().unwrap_or(Value::Null);

        if settings.highlight_on_hover {
            let saved = HIGHLIGHTED
                .iter()
                .map(|&p| (p, scene.settled_style(id, p)))
                .collect();
            if let Some(node) = scene.node_mut(id) {
                node.saved_style = Some(StyleSnapshot(saved));
            }

            let color = |field: &str, fallback: &str| {
                datum.get(field).and_then(Value::as_str).unwrap_or(fallback).to_string()
            };
            let number = |field: &str, fallback: f64| {
                datum.get(field).and_then(Value::as_f64).unwrap_or(fallback)
            };
            scene.set(id, Property::Fill, color("highlightFillColor", &settings.highlight_fill_color).into());
            scene.set(id, Property::Stroke, color("highlightBorderColor", &settings.highlight_border_color).into());
            scene.set(id, Property::StrokeWidth, number("highlightBorderWidth", settings.highlight_border_width).into());
            scene.set(id, Property::FillOpacity, number("highlightFillOpacity", settings.highlight_fill_opacity).into());
            if scene.respects_paint_order() {
                scene.raise(id);
            }
        }

        self.session = Some(HoverSession { node: id, layer });
        if settings.popup_on_hover {
            scene.listen(id, PointerEvent::Move);
            self.popup.visible = true;
            self.place_popup(scene, id, point, &settings.popup_template, features);
        }
        trace!(node = ?id, "hover started");
    }

    fn place_popup<S: SceneGraph>(
        &mut self,
        scene: &S,
        id: NodeId,
        point: Coord<f64>,
        template: &PopupTemplate,
        features: &FeatureCollection,
    ) {
        let Some(node) = scene.node(id) else {
            return;
        };
        let feature = (node.class == REGION_CLASS)
            .then(|| features.get(&node.key))
            .flatten();
        let datum = node.datum.clone().unwrap_or(Value::Null);
        self.popup.position = coord! { x: point.x, y: point.y + POPUP_OFFSET_Y };
        self.popup.content = render_template(template, feature, &datum);
    }
}

/// Runs a caller template. Any failure, including a panic, is logged and
/// yields empty content instead of reaching the pointer handler.
fn render_template(template: &PopupTemplate, feature: Option<&Feature>, datum: &Value) -> String {
    let ctx = PopupContext { feature, datum };
    match panic::catch_unwind(AssertUnwindSafe(|| template.render(&ctx))) {
        Ok(Ok(content)) => content,
        Ok(Err(e)) => {
            warn!(error = %e, "popup template failed");
            String::new()
        }
        Err(_) => {
            warn!("popup template panicked");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::GeographyConfig,
        scene::{Node, Placement, RetainedScene, Shape, Transition},
    };
    use geo::{MultiPolygon, polygon};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        scene: RetainedScene,
        controller: InteractionController,
        profiles: BTreeMap<LayerId, HoverSettings>,
        features: FeatureCollection,
        left: NodeId,
        right: NodeId,
    }

    fn fixture(settings: HoverSettings) -> Fixture {
        let mut scene = RetainedScene::new();
        let layer = scene.add_layer("datamaps-subunits", Placement::Top);
        let mut add = |key: &str, x: f64| {
            let shape = polygon![(x: x, y: 0.0), (x: x + 10.0, y: 0.0), (x: x + 10.0, y: 10.0), (x: x, y: 10.0)];
            let mut node = Node::new(key, REGION_CLASS, layer, Shape::Region(shape.into()));
            node.datum = Some(json!({ "fillKey": "a" }));
            let id = scene.append(node);
            scene.set(id, Property::Fill, "#111111".into());
            scene.set(id, Property::Stroke, "#FDFDFD".into());
            scene.listen(id, PointerEvent::Enter);
            scene.listen(id, PointerEvent::Leave);
            id
        };
        let left = add("LFT", 0.0);
        let right = add("RGT", 20.0);
        let features = FeatureCollection::new(
            "world",
            vec![Feature { id: "LFT".into(), name: "Leftland".into(), geometry: MultiPolygon::new(vec![]) }],
        );
        Fixture {
            scene,
            controller: InteractionController::new(),
            profiles: BTreeMap::from([(layer, settings)]),
            features,
            left,
            right,
        }
    }

    impl Fixture {
        fn point_at(&mut self, x: f64, y: f64) {
            let p = coord! { x: x, y: y };
            let hit = self.scene.hit_test(p);
            self.controller
                .pointer_moved(&mut self.scene, hit, p, &self.profiles, &self.features);
        }
    }

    #[test]
    fn leave_restores_every_captured_style() {
        let mut f = fixture(GeographyConfig::default().hover_settings());
        let before = f.scene.node(f.left).unwrap().clone();

        f.point_at(5.0, 5.0);
        let lit = f.scene.node(f.left).unwrap();
        assert_eq!(lit.color(Property::Fill), Some("#FC8D59"));
        assert_eq!(lit.number(Property::StrokeWidth), Some(2.0));
        assert_eq!(f.controller.popup().content, "Leftland");
        assert_eq!(f.controller.popup().position, coord! { x: 5.0, y: 35.0 });

        f.point_at(50.0, 50.0);
        let after = f.scene.node(f.left).unwrap();
        for p in HIGHLIGHTED {
            assert_eq!(after.style(p), before.style(p), "{p:?}");
        }
        assert!(after.saved_style.is_none());
        assert!(!after.listens(PointerEvent::Move));
        assert!(!f.controller.popup().visible);
    }

    #[test]
    fn switching_nodes_ends_the_previous_session_first() {
        let mut f = fixture(GeographyConfig::default().hover_settings());
        f.point_at(5.0, 5.0);
        f.point_at(25.0, 5.0);
        assert_eq!(f.controller.hovered(), Some(f.right));
        assert_eq!(f.scene.node(f.left).unwrap().color(Property::Fill), Some("#111111"));
        assert!(!f.scene.node(f.left).unwrap().listens(PointerEvent::Move));

        // unnamed region: empty popup, not the previous one
        assert_eq!(f.controller.popup().content, "");
        f.point_at(26.0, 6.0);
        assert_eq!(f.controller.popup().position, coord! { x: 26.0, y: 36.0 });
    }

    #[test]
    fn datum_overrides_beat_configured_highlight() {
        let mut f = fixture(GeographyConfig::default().hover_settings());
        if let Some(node) = f.scene.node_mut(f.left) {
            node.datum = Some(json!({ "highlightFillColor": "#000000", "highlightBorderWidth": 5 }));
        }
        f.point_at(5.0, 5.0);
        let lit = f.scene.node(f.left).unwrap();
        assert_eq!(lit.color(Property::Fill), Some("#000000"));
        assert_eq!(lit.number(Property::StrokeWidth), Some(5.0));
    }

    #[test]
    fn failing_templates_yield_empty_content() {
        let mut settings = GeographyConfig::default().hover_settings();
        settings.popup_template = PopupTemplate::new(|_| Err("broken".into()));
        let mut f = fixture(settings.clone());
        f.point_at(5.0, 5.0);
        assert!(f.controller.popup().visible);
        assert_eq!(f.controller.popup().content, "");

        settings.popup_template = PopupTemplate::new(|ctx| {
            let key = ctx.datum["missing"].as_str();
            Ok(key.map(str::to_string).unwrap_or_else(|| panic!("no such field")))
        });
        let mut f = fixture(settings);
        f.point_at(5.0, 5.0);
        assert_eq!(f.controller.popup().content, "");
    }

    #[test]
    fn popup_can_be_disabled_independently() {
        let mut settings = GeographyConfig::default().hover_settings();
        settings.popup_on_hover = false;
        let mut f = fixture(settings);
        f.point_at(5.0, 5.0);
        assert!(!f.controller.popup().visible);
        assert!(!f.scene.node(f.left).unwrap().listens(PointerEvent::Move));
        assert_eq!(f.scene.node(f.left).unwrap().color(Property::Fill), Some("#FC8D59"));
    }

    #[test]
    fn snapshot_takes_the_target_of_a_running_recolour() {
        let mut f = fixture(GeographyConfig::default().hover_settings());
        f.scene
            .transition(f.left, Transition::new(Property::Fill, "#222222").duration(100));
        f.scene.advance(50);
        f.point_at(5.0, 5.0);
        f.point_at(50.0, 50.0);
        assert_eq!(f.scene.node(f.left).unwrap().color(Property::Fill), Some("#222222"));
    }

    #[test]
    fn retargeting_only_touches_the_hovered_node() {
        let mut f = fixture(GeographyConfig::default().hover_settings());
        f.point_at(5.0, 5.0);
        let (left, right) = (f.left, f.right);
        assert!(!f.controller.retarget_snapshot(&mut f.scene, right, Property::Fill, "#333333".into()));
        assert!(f.controller.retarget_snapshot(&mut f.scene, left, Property::Fill, "#333333".into()));
        f.controller.pointer_left(&mut f.scene);
        assert_eq!(f.scene.node(left).unwrap().color(Property::Fill), Some("#333333"));
    }
}
