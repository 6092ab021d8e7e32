//! The map instance: projection, base layer, overlays and hover state
//! for one scope drawn into one scene.

use geo::{Centroid, Coord};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, trace};

use crate::{
    base::{self, JoinSummary, REGION_CLASS},
    config::{HoverSettings, MapOptions},
    data::{ColorUpdate, FeatureCollection, RegionDataSource},
    error::MapError,
    interaction::{InteractionController, Popup},
    overlays,
    plugin::PluginRegistry,
    projection::{PathGenerator, Projection, ProjectionFamily, Scope},
    scene::{LayerId, Node, NodeId, Placement, PointerEvent, Property, SceneGraph, Shape, Transition},
};

pub const BASE_LAYER_CLASS: &str = "datamaps-subunits";
const SPHERE_LAYER_CLASS: &str = "datamaps-sphere";

pub struct AtlasMap<S: SceneGraph> {
    pub(crate) options: MapOptions,
    pub(crate) scene: S,
    pub(crate) path: PathGenerator,
    pub(crate) features: FeatureCollection,
    pub(crate) base_layer: LayerId,
    pub(crate) hover_profiles: BTreeMap<LayerId, HoverSettings>,
    pub(crate) plugins: PluginRegistry<S>,
    scope: Scope,
    sphere_layer: Option<LayerId>,
    interaction: InteractionController,
    drawn_width: f64,
}

impl<S: SceneGraph + 'static> AtlasMap<S> {
    pub fn new(scene: S, options: MapOptions, features: FeatureCollection) -> Result<Self, MapError> {
        Self::with_done(scene, options, features, |_| {})
    }

    /// Builds the projection, draws the base layer and registers the
    /// built-in overlays, then calls `done` with the finished map.
    /// Scope and projection are validated before anything is drawn.
    pub fn with_done(
        mut scene: S,
        options: MapOptions,
        features: FeatureCollection,
        done: impl FnOnce(&mut Self),
    ) -> Result<Self, MapError> {
        let (scope, path) = Self::prepare(&options, &features)?;
        let base_layer = scene.add_layer(BASE_LAYER_CLASS, Placement::Bottom);

        let mut map = AtlasMap {
            drawn_width: options.width,
            options,
            scene,
            path,
            features,
            base_layer,
            hover_profiles: BTreeMap::new(),
            plugins: PluginRegistry::default(),
            scope,
            sphere_layer: None,
            interaction: InteractionController::new(),
        };
        map.register_builtins();
        map.draw();
        done(&mut map);
        Ok(map)
    }

    fn register_builtins(&mut self) {
        self.register_plugin("bubbles", overlays::bubbles::render::<S>);
        self.register_plugin("arc", overlays::arcs::render::<S>);
        self.register_plugin("labels", overlays::labels::render::<S>);
        self.register_plugin("legend", overlays::legend::render::<S>);
        self.register_plugin("graticule", overlays::graticule::render::<S>);
    }
}

impl<S: SceneGraph> AtlasMap<S> {
    fn prepare(options: &MapOptions, features: &FeatureCollection) -> Result<(Scope, PathGenerator), MapError> {
        let scope = Scope::parse(&options.scope)?;
        let family: ProjectionFamily = options.projection.parse()?;
        if features.scope != scope.name() {
            return Err(MapError::MissingGeography(scope.name().to_string()));
        }
        let projection = Projection::for_scope(
            &scope,
            family,
            &options.projection_config,
            options.viewport(),
            features,
        )?;
        Ok((scope, PathGenerator::new(projection)))
    }

    fn draw(&mut self) {
        if let Some((center, radius)) = self.path.projection().sphere() {
            let layer = match self.sphere_layer {
                Some(layer) => layer,
                None => {
                    let layer = self.scene.add_layer(SPHERE_LAYER_CLASS, Placement::Bottom);
                    self.sphere_layer = Some(layer);
                    layer
                }
            };
            overlays::sync_static(
                &mut self.scene,
                layer,
                SPHERE_LAYER_CLASS,
                vec![("sphere".to_string(), Shape::Sphere { center, radius })],
            );
        }

        let summary = self.redraw();
        info!(scope = %self.scope, regions = summary.entered, "map drawn");
    }

    /// Reconciles the base layer with the current features and data.
    /// Running it again on an unchanged map changes nothing.
    pub fn redraw(&mut self) -> JoinSummary {
        let summary = base::render_regions(
            &mut self.scene,
            self.base_layer,
            &self.features,
            &self.options.data,
            &self.options.fills,
            &self.options.geography_config,
            &self.path,
        );

        let settings = self.options.geography_config.hover_settings();
        if settings.is_interactive() {
            for id in self.scene.nodes(self.base_layer) {
                self.scene.listen(id, PointerEvent::Enter);
                self.scene.listen(id, PointerEvent::Leave);
            }
        }
        self.hover_profiles.insert(self.base_layer, settings);
        summary
    }

    /// Recolours regions in place. A bare colour is used as is; a datum is
    /// merged into the region's stored datum (its set fields win) and the
    /// merged datum is coloured by `color`, else its palette key, else its
    /// `fillColor`, else `defaultFill`. A stored `color` yields to a newer
    /// `fillKey` or `fillColor`. Ids without a rendered region are skipped.
    pub fn apply_colors<I, K>(&mut self, updates: I)
    where
        I: IntoIterator<Item = (K, ColorUpdate)>,
        K: Into<String>,
    {
        for (id, update) in updates {
            let id = id.into();
            if id.is_empty() {
                continue;
            }
            let color = match update {
                ColorUpdate::Color(color) => color,
                ColorUpdate::Datum(datum) => {
                    let incoming = datum.color.clone();
                    let restyled = datum.fill_key.is_some() || datum.fill_color.is_some();
                    let merged = match self.options.data.get(&id) {
                        Some(old) => old.merged(datum),
                        None => datum,
                    };
                    let kept = if restyled { None } else { merged.color.clone() };
                    let color = incoming.or(kept).unwrap_or_else(|| match self.features.get(&id) {
                        Some(feature) => base::resolve_fill(feature, Some(&merged), &self.options.fills),
                        None => self.options.fills.default_fill().to_string(),
                    });
                    let tag = merged.to_tag();
                    self.options.data.insert(id.clone(), merged);
                    if let Some(node) = self.region_node(&id).and_then(|n| self.scene.node_mut(n)) {
                        node.datum = Some(tag);
                    }
                    color
                }
            };

            let Some(node) = self.region_node(&id) else {
                trace!(%id, "no region to recolour");
                continue;
            };
            if !self
                .interaction
                .retarget_snapshot(&mut self.scene, node, Property::Fill, color.as_str().into())
            {
                self.scene.transition(node, Transition::new(Property::Fill, color));
            }
        }
    }

    /// Fetches `dataUrl` through `source` and applies it as a colour
    /// update. Returns the number of entries received.
    pub fn load_region_data(&mut self, source: &dyn RegionDataSource) -> Result<usize, MapError> {
        let Some(url) = self.options.data_url.clone() else {
            return Ok(0);
        };
        let updates = source.fetch(&url, self.options.data_type)?;
        let received = updates.len();
        debug!(%url, received, "region data fetched");
        self.apply_colors(updates);
        Ok(received)
    }

    /// Scales every layer to a new container width. Ignored unless the map
    /// was built responsive.
    pub fn resize(&mut self, width: f64) {
        if !self.options.responsive || width <= 0.0 {
            return;
        }
        let scale = width / self.drawn_width;
        for layer in self.scene.layers() {
            self.scene.set_layer_scale(layer, scale);
        }
        debug!(width, scale, "resized");
    }

    /// Redraws the map for another scope. Overlays are cleared; their
    /// layers are kept for the next invocation. On error nothing changes.
    pub fn change_scope(&mut self, scope: &str, features: FeatureCollection) -> Result<(), MapError> {
        let mut options = self.options.clone();
        options.scope = scope.to_string();
        let (scope, path) = Self::prepare(&options, &features)?;

        self.interaction.end(&mut self.scene);
        self.scene.clear_layer(self.base_layer);
        if let Some(layer) = self.sphere_layer {
            self.scene.clear_layer(layer);
        }
        let overlay_layers: Vec<LayerId> = self.plugins.layers().map(|(_, l)| l).collect();
        for layer in overlay_layers {
            self.scene.clear_layer(layer);
        }

        self.options = options;
        self.scope = scope;
        self.path = path;
        self.features = features;
        self.draw();
        Ok(())
    }

    /// Removes everything the plugin `name` has drawn. Returns false when it
    /// has never drawn anything.
    pub fn clear_overlay(&mut self, name: &str) -> bool {
        let Some(layer) = self.plugins.layer(name) else {
            return false;
        };
        if self
            .interaction
            .hovered()
            .and_then(|id| self.scene.node(id))
            .is_some_and(|n| n.layer == layer)
        {
            self.interaction.end(&mut self.scene);
        }
        self.scene.clear_layer(layer);
        true
    }

    /// Adds a layer above everything drawn so far.
    pub fn add_layer(&mut self, class: &str) -> LayerId {
        self.scene.add_layer(class, Placement::Top)
    }

    pub fn latlng_to_xy(&self, latitude: f64, longitude: f64) -> Option<Coord<f64>> {
        self.path.projection().project(longitude, latitude)
    }

    /// Planar centroid of a rendered region.
    pub fn region_centroid(&self, id: &str) -> Option<Coord<f64>> {
        let node = self.scene.node(self.region_node(id)?)?;
        match &node.shape {
            Shape::Region(polygons) => polygons.centroid().map(|p| p.0),
            _ => None,
        }
    }

    pub fn region_node(&self, id: &str) -> Option<NodeId> {
        self.scene.find(self.base_layer, REGION_CLASS, id)
    }

    pub fn pointer_moved(&mut self, point: Coord<f64>) {
        let hit = self.scene.hit_test(point);
        self.interaction.pointer_moved(
            &mut self.scene,
            hit,
            point,
            &self.hover_profiles,
            &self.features,
        );
    }

    pub fn pointer_left(&mut self) {
        self.interaction.pointer_left(&mut self.scene);
    }

    pub fn popup(&self) -> &Popup {
        self.interaction.popup()
    }

    pub fn hovered(&self) -> Option<&Node> {
        self.scene.node(self.interaction.hovered()?)
    }

    /// Stored datum of a region as tagged on its node.
    pub fn region_datum(&self, id: &str) -> Option<&Value> {
        self.scene.node(self.region_node(id)?)?.datum.as_ref()
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn path(&self) -> &PathGenerator {
        &self.path
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    pub fn features(&self) -> &FeatureCollection {
        &self.features
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn base_layer(&self) -> LayerId {
        self.base_layer
    }

    pub fn sphere_layer(&self) -> Option<LayerId> {
        self.sphere_layer
    }

    pub fn plugin_names(&self) -> impl Iterator<Item = &str> {
        self.plugins.names()
    }
}
