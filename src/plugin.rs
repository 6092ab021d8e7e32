//! Overlay plugins, registered per map.

use serde_json::{Map, Value};
use std::{collections::BTreeMap, rc::Rc};
use tracing::{debug, warn};

use crate::{
    config::layered,
    error::MapError,
    map::AtlasMap,
    scene::{LayerId, Placement, SceneGraph},
};

/// A plugin body: the map, the layer to draw into, the (already
/// shape-checked) data and the options merged over the plugin's defaults.
pub type PluginFn<S> =
    Rc<dyn Fn(&mut AtlasMap<S>, LayerId, Option<&Value>, &Map<String, Value>) -> Result<(), MapError>>;

pub struct PluginRegistry<S: SceneGraph> {
    plugins: BTreeMap<String, PluginFn<S>>,
    layers: BTreeMap<String, LayerId>,
}

impl<S: SceneGraph> Default for PluginRegistry<S> {
    fn default() -> Self {
        Self { plugins: BTreeMap::new(), layers: BTreeMap::new() }
    }
}

impl<S: SceneGraph> PluginRegistry<S> {
    /// Adds `plugin` under `name`. The first registration of a name is
    /// final; later ones are ignored and return false.
    pub fn register(&mut self, name: &str, plugin: PluginFn<S>) -> bool {
        if self.plugins.contains_key(name) {
            return false;
        }
        self.plugins.insert(name.to_string(), plugin);
        true
    }

    pub fn get(&self, name: &str) -> Option<PluginFn<S>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn layer(&self, name: &str) -> Option<LayerId> {
        self.layers.get(name).copied()
    }

    pub fn layers(&self) -> impl Iterator<Item = (&str, LayerId)> {
        self.layers.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn remember_layer(&mut self, name: &str, layer: LayerId) {
        self.layers.insert(name.to_string(), layer);
    }

    fn restore_layer(&mut self, name: &str, previous: Option<LayerId>) {
        match previous {
            Some(layer) => self.remember_layer(name, layer),
            None => {
                self.layers.remove(name);
            }
        }
    }
}

impl<S: SceneGraph + 'static> AtlasMap<S> {
    /// Registers an overlay plugin on this map. Returns false when `name`
    /// is already taken.
    pub fn register_plugin<F>(&mut self, name: &str, plugin: F) -> bool
    where
        F: Fn(&mut AtlasMap<S>, LayerId, Option<&Value>, &Map<String, Value>) -> Result<(), MapError> + 'static,
    {
        let added = self.plugins.register(name, Rc::new(plugin));
        if !added {
            warn!(plugin = name, "plugin already registered; keeping the first");
        }
        added
    }
}

impl<S: SceneGraph> AtlasMap<S> {
    /// Invokes the plugin `name` with `data` and per-call `options`.
    pub fn invoke(
        &mut self,
        name: &str,
        data: Option<&Value>,
        options: Option<&Map<String, Value>>,
    ) -> Result<LayerId, MapError> {
        self.invoke_with(name, data, options, |_| {}, false)
    }

    /// Full form of [`invoke`](Self::invoke). `on_complete` receives the
    /// plugin's layer after the plugin returns; `force_new_layer` draws
    /// into a fresh layer instead of reusing the remembered one.
    ///
    /// A failed call leaves no new layer behind.
    pub fn invoke_with(
        &mut self,
        name: &str,
        data: Option<&Value>,
        options: Option<&Map<String, Value>>,
        on_complete: impl FnOnce(LayerId),
        force_new_layer: bool,
    ) -> Result<LayerId, MapError> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| MapError::UnknownPlugin(name.to_string()))?;

        let data = data.filter(|d| !d.is_null());
        if let Some(found) = data.filter(|d| !d.is_array()) {
            return Err(MapError::NotASequence {
                plugin: name.to_string(),
                found: MapError::kind_of(found),
            });
        }

        let merged = layered(options, self.options.plugin_section(name));
        let previous = self.plugins.layer(name);
        let (layer, created) = match previous {
            Some(layer) if !force_new_layer => (layer, false),
            _ => {
                let layer = self.scene.add_layer(name, Placement::Top);
                self.plugins.remember_layer(name, layer);
                debug!(plugin = name, ?layer, "created overlay layer");
                (layer, true)
            }
        };

        if let Err(e) = plugin(self, layer, data, &merged) {
            if created {
                self.scene.remove_layer(layer);
                self.plugins.restore_layer(name, previous);
                debug!(plugin = name, ?layer, "dropped overlay layer of failed call");
            }
            return Err(e);
        }
        on_complete(layer);
        Ok(layer)
    }

    /// Layer the plugin `name` last drew into.
    pub fn overlay_layer(&self, name: &str) -> Option<LayerId> {
        self.plugins.layer(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MapOptions,
        data::{Feature, FeatureCollection},
        scene::RetainedScene,
    };
    use geo::polygon;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;

    fn map(options: MapOptions) -> AtlasMap<RetainedScene> {
        let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        let features = FeatureCollection::new(
            "world",
            vec![Feature { id: "SQR".into(), name: "Square".into(), geometry: square.into() }],
        );
        AtlasMap::new(RetainedScene::new(), options, features).unwrap()
    }

    #[test]
    fn first_registration_wins() {
        let mut map = map(MapOptions::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&seen);
        assert!(map.register_plugin("pins", move |_, _, _, _| {
            first.borrow_mut().push("first");
            Ok(())
        }));
        let second = Rc::clone(&seen);
        assert!(!map.register_plugin("pins", move |_, _, _, _| {
            second.borrow_mut().push("second");
            Ok(())
        }));
        map.invoke("pins", None, None).unwrap();
        assert_eq!(*seen.borrow(), vec!["first"]);
    }

    #[test]
    fn options_layer_over_the_config_section() {
        let options = MapOptions::from_json(json!({ "pinsConfig": { "size": 4, "color": "red" } })).unwrap();
        let mut map = map(options);
        let seen = Rc::new(RefCell::new(Map::new()));
        let sink = Rc::clone(&seen);
        map.register_plugin("pins", move |_, _, _, opts| {
            *sink.borrow_mut() = opts.clone();
            Ok(())
        });
        let call = json!({ "size": 9, "color": null });
        map.invoke("pins", None, call.as_object()).unwrap();
        assert_eq!(Value::Object(seen.borrow().clone()), json!({ "size": 9, "color": "red" }));
    }

    #[test]
    fn layers_are_reused_unless_forced() {
        let mut map = map(MapOptions::default());
        map.register_plugin("pins", |_, _, _, _| Ok(()));
        let first = map.invoke("pins", Some(&json!([])), None).unwrap();
        let again = map.invoke("pins", Some(&json!([])), None).unwrap();
        assert_eq!(first, again);

        let mut completed = None;
        let fresh = map
            .invoke_with("pins", None, None, |layer| completed = Some(layer), true)
            .unwrap();
        assert_ne!(fresh, first);
        assert_eq!(completed, Some(fresh));
        assert_eq!(map.overlay_layer("pins"), Some(fresh));
    }

    #[test]
    fn bad_shapes_fail_before_any_layer_exists() {
        let mut map = map(MapOptions::default());
        map.register_plugin("pins", |_, _, _, _| Ok(()));
        let layers_before = map.scene().layers().len();

        let err = map.invoke("pins", Some(&json!({ "a": 1 })), None).unwrap_err();
        assert!(matches!(err, MapError::NotASequence { found: "an object", .. }));
        assert_eq!(map.scene().layers().len(), layers_before);
        assert!(map.overlay_layer("pins").is_none());

        assert!(matches!(map.invoke("nope", None, None), Err(MapError::UnknownPlugin(n)) if n == "nope"));
    }

    #[test]
    fn failing_plugins_leave_no_new_layer() {
        let mut map = map(MapOptions::default());
        let layers_before = map.scene().layers();

        let broken = json!([{ "latitude": "north" }]);
        let err = map.invoke("bubbles", Some(&broken), None).unwrap_err();
        assert!(matches!(err, MapError::InvalidDatum { ref plugin, .. } if plugin == "bubbles"));
        assert_eq!(map.scene().layers(), layers_before);
        assert!(map.overlay_layer("bubbles").is_none());

        let good = json!([{ "latitude": 1.0, "longitude": 1.0, "radius": 3 }]);
        let layer = map.invoke("bubbles", Some(&good), None).unwrap();
        map.invoke("bubbles", Some(&broken), None).unwrap_err();
        assert_eq!(map.overlay_layer("bubbles"), Some(layer));
        assert_eq!(map.scene().nodes(layer).len(), 1);

        map.invoke_with("bubbles", Some(&broken), None, |_| {}, true).unwrap_err();
        assert_eq!(map.overlay_layer("bubbles"), Some(layer));
        assert_eq!(map.scene().layers().len(), layers_before.len() + 1);
    }
}
