//! Retained scene graph the engine draws into.

use geo::{Contains, Coord, Line, MultiLineString, MultiPolygon, coord};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::overlays::legend::Legend;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// Where a new layer goes in paint order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Top,
    Bottom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Property {
    Fill,
    Stroke,
    StrokeWidth,
    FillOpacity,
    Opacity,
    Radius,
    DashArray,
    DashOffset,
    FontSize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Color(String),
    Number(f64),
}

impl PropValue {
    pub fn as_color(&self) -> Option<&str> {
        match self {
            PropValue::Color(c) => Some(c),
            PropValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropValue::Number(n) => Some(*n),
            PropValue::Color(_) => None,
        }
    }

    fn interpolate(from: &PropValue, to: &PropValue, t: f64) -> PropValue {
        match (from, to) {
            (PropValue::Number(a), PropValue::Number(b)) => PropValue::Number(a + (b - a) * t),
            (PropValue::Color(a), PropValue::Color(b)) => match (parse_hex(a), parse_hex(b)) {
                (Some(a), Some(b)) => {
                    let mix = |i: usize| (a[i] as f64 + (b[i] as f64 - a[i] as f64) * t).round() as u8;
                    PropValue::Color(format!("#{:02X}{:02X}{:02X}", mix(0), mix(1), mix(2)))
                }
                _ if t >= 1.0 => to.clone(),
                _ => from.clone(),
            },
            _ if t >= 1.0 => to.clone(),
            _ => from.clone(),
        }
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Number(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Color(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Color(value)
    }
}

fn parse_hex(color: &str) -> Option<[u8; 3]> {
    let hex = color.strip_prefix('#')?;
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some([channel(0)?, channel(2)?, channel(4)?]),
        3 => {
            let short = |i: usize| {
                let d = u8::from_str_radix(hex.get(i..i + 1)?, 16).ok()?;
                Some(d * 17)
            };
            Some([short(0)?, short(1)?, short(2)?])
        }
        _ => None,
    }
}

/// An arc's planar route.
#[derive(Clone, Debug, PartialEq)]
pub enum Curve {
    Quadratic { from: Coord<f64>, control: Coord<f64>, to: Coord<f64> },
    Polyline(MultiLineString<f64>),
}

impl Curve {
    const QUADRATIC_SEGMENTS: usize = 32;

    /// SVG path data.
    pub fn d(&self) -> String {
        match self {
            Curve::Quadratic { from, control, to } => format!(
                "M{},{}Q{},{},{},{}",
                from.x, from.y, control.x, control.y, to.x, to.y
            ),
            Curve::Polyline(lines) => lines
                .iter()
                .map(|ls| {
                    ls.coords()
                        .enumerate()
                        .map(|(i, c)| format!("{}{},{}", if i == 0 { 'M' } else { 'L' }, c.x, c.y))
                        .collect::<String>()
                })
                .collect(),
        }
    }

    pub fn flatten(&self) -> MultiLineString<f64> {
        match self {
            Curve::Quadratic { from, control, to } => {
                let n = Self::QUADRATIC_SEGMENTS;
                let points = (0..=n).map(|i| {
                    let t = i as f64 / n as f64;
                    let u = 1.0 - t;
                    coord! {
                        x: u * u * from.x + 2.0 * u * t * control.x + t * t * to.x,
                        y: u * u * from.y + 2.0 * u * t * control.y + t * t * to.y,
                    }
                });
                MultiLineString(vec![points.collect()])
            }
            Curve::Polyline(lines) => lines.clone(),
        }
    }

    /// Total rendered length in pixels.
    pub fn length(&self) -> f64 {
        self.flatten()
            .iter()
            .flat_map(|ls| ls.lines())
            .map(|l| l.dx().hypot(l.dy()))
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// A filled region in viewport pixels.
    Region(MultiPolygon<f64>),
    /// A point marker; `None` when its position could not be resolved.
    Circle { center: Option<Coord<f64>> },
    Curve(Curve),
    Lines(MultiLineString<f64>),
    Segment(Line<f64>),
    Text { at: Coord<f64>, text: String, font_family: String },
    Sphere { center: Coord<f64>, radius: f64 },
    Legend(Legend),
}

/// Pointer events a node can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PointerEvent {
    Enter,
    Leave,
    Move,
}

/// Style values captured before a highlight, `None` for unset properties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StyleSnapshot(pub Vec<(Property, Option<PropValue>)>);

#[derive(Clone, Debug)]
pub struct Node {
    pub key: String,
    pub class: String,
    pub layer: LayerId,
    pub shape: Shape,
    /// Datum tag, the `data-info` of the node.
    pub datum: Option<Value>,
    /// Pre-highlight styles, kept on the node so they die with it.
    pub saved_style: Option<StyleSnapshot>,
    props: BTreeMap<Property, PropValue>,
    attrs: BTreeMap<String, String>,
    listeners: BTreeSet<PointerEvent>,
    exiting: bool,
}

impl Node {
    pub fn new(key: impl Into<String>, class: impl Into<String>, layer: LayerId, shape: Shape) -> Self {
        Self {
            key: key.into(),
            class: class.into(),
            layer,
            shape,
            datum: None,
            saved_style: None,
            props: BTreeMap::new(),
            attrs: BTreeMap::new(),
            listeners: BTreeSet::new(),
            exiting: false,
        }
    }

    pub fn style(&self, property: Property) -> Option<&PropValue> {
        self.props.get(&property)
    }

    pub fn color(&self, property: Property) -> Option<&str> {
        self.style(property).and_then(PropValue::as_color)
    }

    pub fn number(&self, property: Property) -> Option<f64> {
        self.style(property).and_then(PropValue::as_number)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn listens(&self, event: PointerEvent) -> bool {
        self.listeners.contains(&event)
    }

    /// True while an exit transition is pending removal.
    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    fn contains(&self, point: Coord<f64>) -> bool {
        match &self.shape {
            Shape::Region(polygons) => polygons.contains(&geo::Point(point)),
            Shape::Circle { center: Some(c) } => {
                let r = self.number(Property::Radius).unwrap_or(0.0);
                r > 0.0 && (point.x - c.x).hypot(point.y - c.y) <= r
            }
            _ => false,
        }
    }
}

/// A property animation. Starting a transition on a property that is
/// already animating replaces the running one.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub property: Property,
    pub to: PropValue,
    pub delay_ms: u64,
    pub duration_ms: u64,
    /// Remove the node once this transition completes.
    pub then_remove: bool,
}

impl Transition {
    pub const DEFAULT_DURATION_MS: u64 = 250;

    pub fn new(property: Property, to: impl Into<PropValue>) -> Self {
        Self {
            property,
            to: to.into(),
            delay_ms: 0,
            duration_ms: Self::DEFAULT_DURATION_MS,
            then_remove: false,
        }
    }

    pub fn delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn then_remove(mut self) -> Self {
        self.then_remove = true;
        self
    }
}

/// Result of reconciling keyed data against a layer's nodes. `enter` and
/// `update` carry indices into the joined key slice.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Join {
    pub enter: Vec<usize>,
    pub update: Vec<(usize, NodeId)>,
    pub exit: Vec<NodeId>,
}

pub trait SceneGraph {
    fn add_layer(&mut self, class: &str, placement: Placement) -> LayerId;

    /// Moves `layer` directly beneath `anchor` in paint order.
    fn move_layer_below(&mut self, layer: LayerId, anchor: LayerId);

    fn layers(&self) -> Vec<LayerId>;

    /// Drops a layer together with its nodes.
    fn remove_layer(&mut self, layer: LayerId);

    fn layer_class(&self, layer: LayerId) -> Option<&str>;

    fn set_layer_scale(&mut self, layer: LayerId, scale: f64);

    fn layer_scale(&self, layer: LayerId) -> f64;

    /// Reconciles `keys` against the nodes of `class` in `layer`. Nodes still
    /// exiting are revived when their key comes back; duplicate keys after
    /// the first are ignored.
    fn join(&mut self, layer: LayerId, class: &str, keys: &[String]) -> Join;

    fn append(&mut self, node: Node) -> NodeId;

    fn node(&self, id: NodeId) -> Option<&Node>;

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node>;

    /// Nodes of `layer` in paint order.
    fn nodes(&self, layer: LayerId) -> Vec<NodeId>;

    fn find(&self, layer: LayerId, class: &str, key: &str) -> Option<NodeId>;

    /// Sets a property immediately, cancelling any transition on it.
    fn set(&mut self, id: NodeId, property: Property, value: PropValue);

    fn unset(&mut self, id: NodeId, property: Property);

    fn transition(&mut self, id: NodeId, transition: Transition);
    /// Value `property` will hold once any running transition on it ends.
    fn settled_style(&self, id: NodeId, property: Property) -> Option<PropValue>;

    fn remove(&mut self, id: NodeId);

    fn clear_layer(&mut self, layer: LayerId);

    /// Moves a node to the top of its layer's paint order.
    fn raise(&mut self, id: NodeId);

    /// Whether later siblings paint over earlier ones; when false `raise`
    /// must not be relied on.
    fn respects_paint_order(&self) -> bool;

    fn listen(&mut self, id: NodeId, event: PointerEvent);

    fn unlisten(&mut self, id: NodeId, event: PointerEvent);

    /// Topmost node listening for [`PointerEvent::Enter`] under `point`.
    fn hit_test(&self, point: Coord<f64>) -> Option<NodeId>;
}

#[derive(Clone, Debug)]
struct Layer {
    id: LayerId,
    class: String,
    nodes: Vec<NodeId>,
    scale: f64,
}

#[derive(Clone, Debug)]
struct Running {
    transition: Transition,
    start_ms: u64,
    from: Option<PropValue>,
}

/// In-memory [`SceneGraph`] driven by an explicit clock.
#[derive(Clone, Debug)]
pub struct RetainedScene {
    layers: Vec<Layer>,
    nodes: BTreeMap<NodeId, Node>,
    running: BTreeMap<(NodeId, Property), Running>,
    next_layer: usize,
    next_node: usize,
    clock_ms: u64,
    paint_order: bool,
}

impl Default for RetainedScene {
    fn default() -> Self {
        Self::new()
    }
}

impl RetainedScene {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            nodes: BTreeMap::new(),
            running: BTreeMap::new(),
            next_layer: 0,
            next_node: 0,
            clock_ms: 0,
            paint_order: true,
        }
    }

    /// A scene whose host ignores sibling order.
    pub fn without_paint_order() -> Self {
        Self { paint_order: false, ..Self::new() }
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_animating(&self) -> bool {
        !self.running.is_empty()
    }

    pub fn is_animating_node(&self, id: NodeId) -> bool {
        self.running.keys().any(|(node, _)| *node == id)
    }

    /// Advances the clock, stepping every transition that has started and
    /// removing nodes whose exit transition has finished.
    pub fn advance(&mut self, elapsed_ms: u64) {
        self.clock_ms += elapsed_ms;
        let now = self.clock_ms;
        let mut finished = Vec::new();
        let mut removals = Vec::new();

        for (&(id, property), run) in self.running.iter_mut() {
            if now < run.start_ms {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                finished.push((id, property));
                continue;
            };
            let from = run
                .from
                .get_or_insert_with(|| node.props.get(&property).cloned().unwrap_or_else(|| {
                    match &run.transition.to {
                        PropValue::Number(_) => PropValue::Number(0.0),
                        PropValue::Color(c) => PropValue::Color(c.clone()),
                    }
                }))
                .clone();
            let t = if run.transition.duration_ms == 0 {
                1.0
            } else {
                ((now - run.start_ms) as f64 / run.transition.duration_ms as f64).min(1.0)
            };
            node.props
                .insert(property, PropValue::interpolate(&from, &run.transition.to, t));
            if t >= 1.0 {
                finished.push((id, property));
                if run.transition.then_remove {
                    removals.push(id);
                }
            }
        }

        for key in finished {
            self.running.remove(&key);
        }
        for id in removals {
            trace!(?id, "exit transition complete");
            self.remove(id);
        }
    }

    /// Runs every pending transition to completion.
    pub fn settle(&mut self) {
        while let Some(end) = self
            .running
            .values()
            .map(|r| r.start_ms + r.transition.duration_ms)
            .max()
        {
            self.advance(end.saturating_sub(self.clock_ms).max(1));
        }
    }

    fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    fn cancel_removal(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.exiting = false;
        }
        for ((node, _), run) in self.running.iter_mut() {
            if *node == id {
                run.transition.then_remove = false;
            }
        }
    }
}

impl SceneGraph for RetainedScene {
    fn add_layer(&mut self, class: &str, placement: Placement) -> LayerId {
        let id = LayerId(self.next_layer);
        self.next_layer += 1;
        let layer = Layer { id, class: class.to_string(), nodes: Vec::new(), scale: 1.0 };
        match placement {
            Placement::Top => self.layers.push(layer),
            Placement::Bottom => self.layers.insert(0, layer),
        }
        id
    }

    fn move_layer_below(&mut self, layer: LayerId, anchor: LayerId) {
        if layer == anchor {
            return;
        }
        let Some(from) = self.layers.iter().position(|l| l.id == layer) else {
            return;
        };
        let moved = self.layers.remove(from);
        let to = self
            .layers
            .iter()
            .position(|l| l.id == anchor)
            .unwrap_or(self.layers.len());
        self.layers.insert(to, moved);
    }

    fn layers(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id).collect()
    }

    fn remove_layer(&mut self, layer: LayerId) {
        self.clear_layer(layer);
        self.layers.retain(|l| l.id != layer);
    }

    fn layer_class(&self, layer: LayerId) -> Option<&str> {
        self.layer(layer).map(|l| l.class.as_str())
    }

    fn set_layer_scale(&mut self, layer: LayerId, scale: f64) {
        if let Some(l) = self.layer_mut(layer) {
            l.scale = scale;
        }
    }

    fn layer_scale(&self, layer: LayerId) -> f64 {
        self.layer(layer).map_or(1.0, |l| l.scale)
    }

    fn join(&mut self, layer: LayerId, class: &str, keys: &[String]) -> Join {
        let mut existing: BTreeMap<String, NodeId> = self
            .nodes(layer)
            .into_iter()
            .filter_map(|id| {
                let node = self.nodes.get(&id)?;
                (node.class == class).then(|| (node.key.clone(), id))
            })
            .collect();

        let mut join = Join::default();
        let mut seen = BTreeSet::new();
        for (i, key) in keys.iter().enumerate() {
            if !seen.insert(key.as_str()) {
                trace!(%key, class, "duplicate join key ignored");
                continue;
            }
            match existing.remove(key) {
                Some(id) => {
                    self.cancel_removal(id);
                    join.update.push((i, id));
                }
                None => join.enter.push(i),
            }
        }
        join.exit = existing
            .into_values()
            .filter(|id| self.nodes.get(id).is_some_and(|n| !n.exiting))
            .collect();
        join
    }

    fn append(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        if let Some(layer) = self.layer_mut(node.layer) {
            layer.nodes.push(id);
        }
        self.nodes.insert(id, node);
        id
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    fn nodes(&self, layer: LayerId) -> Vec<NodeId> {
        self.layer(layer).map(|l| l.nodes.clone()).unwrap_or_default()
    }

    fn find(&self, layer: LayerId, class: &str, key: &str) -> Option<NodeId> {
        self.layer(layer)?.nodes.iter().copied().find(|id| {
            self.nodes
                .get(id)
                .is_some_and(|n| n.class == class && n.key == key)
        })
    }

    fn set(&mut self, id: NodeId, property: Property, value: PropValue) {
        self.running.remove(&(id, property));
        if let Some(node) = self.nodes.get_mut(&id) {
            node.props.insert(property, value);
        }
    }

    fn unset(&mut self, id: NodeId, property: Property) {
        self.running.remove(&(id, property));
        if let Some(node) = self.nodes.get_mut(&id) {
            node.props.remove(&property);
        }
    }

    fn transition(&mut self, id: NodeId, transition: Transition) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if transition.then_remove {
            node.exiting = true;
        }
        let start_ms = self.clock_ms + transition.delay_ms;
        self.running.insert(
            (id, transition.property),
            Running { transition, start_ms, from: None },
        );
    }

    fn settled_style(&self, id: NodeId, property: Property) -> Option<PropValue> {
        match self.running.get(&(id, property)) {
            Some(run) => Some(run.transition.to.clone()),
            None => self.nodes.get(&id)?.style(property).cloned(),
        }
    }

    fn remove(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            if let Some(layer) = self.layer_mut(node.layer) {
                layer.nodes.retain(|n| *n != id);
            }
        }
        self.running.retain(|(node, _), _| *node != id);
    }

    fn clear_layer(&mut self, layer: LayerId) {
        for id in self.nodes(layer) {
            self.remove(id);
        }
    }

    fn raise(&mut self, id: NodeId) {
        let Some(layer) = self.nodes.get(&id).map(|n| n.layer) else {
            return;
        };
        if let Some(layer) = self.layer_mut(layer) {
            layer.nodes.retain(|n| *n != id);
            layer.nodes.push(id);
        }
    }

    fn respects_paint_order(&self) -> bool {
        self.paint_order
    }

    fn listen(&mut self, id: NodeId, event: PointerEvent) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.listeners.insert(event);
        }
    }

    fn unlisten(&mut self, id: NodeId, event: PointerEvent) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.listeners.remove(&event);
        }
    }

    fn hit_test(&self, point: Coord<f64>) -> Option<NodeId> {
        self.layers.iter().rev().find_map(|layer| {
            let local = coord! { x: point.x / layer.scale, y: point.y / layer.scale };
            layer.nodes.iter().rev().copied().find(|id| {
                self.nodes.get(id).is_some_and(|n| {
                    n.listens(PointerEvent::Enter) && !n.exiting && n.contains(local)
                })
            })
        })
    }
}
