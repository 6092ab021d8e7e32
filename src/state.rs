use atlas_maps::{
    AtlasMap, ColorUpdate, DataCache, FeatureCollection, FillPalette, MapError, MapOptions, RetainedScene,
    RegionDatum,
};
use crossterm::event::KeyCode;
use geo::coord;
use rand::Rng;
use ratatui::layout::Rect;
use serde_json::{Value, json};
use std::path::Path;
use tracing::{info, warn};

/// Palette used when the configuration brings none of its own.
const DEMO_FILLS: [(&str, &str); 4] = [
    ("low", "#91BFDB"),
    ("mid", "#FFFFBF"),
    ("high", "#FC8D59"),
    ("bubble", "#DD1C77"),
];

pub struct AppState {
    cache: DataCache,
    options: MapOptions,
    pub map: AtlasMap<RetainedScene>,
    /// `(id, name)` of every region in the current scope.
    pub list_items: Vec<(String, String)>,
    pub selected: usize,
    /// Scopes we drilled down from, with the selection to restore.
    pub history: Vec<(String, usize)>,
    pub info: String,
    /// Inner area of the map panel from the last frame.
    pub map_area: Option<Rect>,
    graticule: bool,
    labels: bool,
    bubbles: bool,
    arcs: bool,
}

impl AppState {
    const HELP_TEXT: &'static str = "\
↑/↓: select region
Enter: drill down into region
Esc / Backspace: back
r: recolour  g: graticule  l: labels
b: bubbles  a: arcs
mouse: hover
q: quit";

    pub fn new(data_dir: &Path, mut options: MapOptions) -> Result<Self, MapError> {
        let cache = DataCache::new(data_dir)?;
        if options.fills.keys().count() == 1 {
            options.fills = FillPalette::new(options.fills.iter().chain(DEMO_FILLS));
        }
        let features = cache.load_scope(&options.scope)?;
        let map = Self::build_map(&cache, options.clone(), features)?;

        let mut state = Self {
            cache,
            options,
            map,
            list_items: Vec::new(),
            selected: 0,
            history: Vec::new(),
            info: String::new(),
            map_area: None,
            graticule: false,
            labels: false,
            bubbles: false,
            arcs: false,
        };
        state.refresh_list();
        Ok(state)
    }

    fn build_map(
        cache: &DataCache,
        options: MapOptions,
        features: FeatureCollection,
    ) -> Result<AtlasMap<RetainedScene>, MapError> {
        let mut map = AtlasMap::new(RetainedScene::new(), options, features)?;
        if let Err(e) = map.load_region_data(cache) {
            warn!(error = %e, "region data unavailable");
        }
        let legend = json!({ "legendTitle": "Fill keys" });
        map.invoke("legend", None, legend.as_object())?;
        Ok(map)
    }

    fn refresh_list(&mut self) {
        let mut items: Vec<(String, String)> = self
            .map
            .features()
            .features
            .iter()
            .filter(|f| self.map.region_node(&f.id).is_some())
            .map(|f| (f.id.clone(), f.name.clone()))
            .collect();
        items.sort_by(|a, b| a.1.cmp(&b.1));
        self.list_items = items;
        self.selected = self.selected.min(self.list_items.len().saturating_sub(1));
        self.info = format!(
            "{} – {} regions\n\n{}",
            self.map.scope(),
            self.list_items.len(),
            Self::HELP_TEXT
        );
    }

    /// Returns true when the app should quit.
    pub fn handle_input(&mut self, key: KeyCode) -> bool {
        use KeyCode::*;
        let result = match key {
            Char('q') => return true,
            Up => {
                self.selected = self.selected.saturating_sub(1);
                self.hover_selected();
                Ok(())
            }
            Down => {
                if self.selected + 1 < self.list_items.len() {
                    self.selected += 1;
                }
                self.hover_selected();
                Ok(())
            }
            Enter => self.drill_down(),
            Backspace | Esc => self.go_back(),
            Char('r') => {
                self.recolour_randomly();
                Ok(())
            }
            Char('g') => {
                self.graticule = !self.graticule;
                self.toggle_overlay("graticule", self.graticule)
            }
            Char('l') => {
                self.labels = !self.labels;
                self.toggle_overlay("labels", self.labels)
            }
            Char('b') => {
                self.bubbles = !self.bubbles;
                let data = if self.bubbles { self.random_bubbles() } else { json!([]) };
                self.map.invoke("bubbles", Some(&data), None).map(|_| ())
            }
            Char('a') => {
                self.arcs = !self.arcs;
                let data = if self.arcs { self.random_arcs() } else { json!([]) };
                self.map.invoke("arc", Some(&data), None).map(|_| ())
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(error = %e, ?key, "key action failed");
            self.info = format!("{e}\n\n{}", Self::HELP_TEXT);
        }
        false
    }

    /// Maps a terminal cell to viewport pixels and routes it to the map.
    pub fn handle_mouse(&mut self, column: u16, row: u16) {
        let Some(area) = self.map_area else {
            return;
        };
        let inside = column >= area.x
            && column < area.x + area.width
            && row >= area.y
            && row < area.y + area.height;
        if !inside {
            self.map.pointer_left();
            return;
        }
        let (width, height) = self.map.options().viewport();
        let x = (f64::from(column - area.x) + 0.5) / f64::from(area.width) * width;
        let y = (f64::from(row - area.y) + 0.5) / f64::from(area.height) * height;
        self.map.pointer_moved(coord! { x: x, y: y });
    }

    pub fn tick(&mut self, elapsed_ms: u64) {
        self.map.scene_mut().advance(elapsed_ms);
    }

    fn hover_selected(&mut self) {
        let Some((id, _)) = self.list_items.get(self.selected) else {
            return;
        };
        match self.map.region_centroid(id) {
            Some(center) => self.map.pointer_moved(center),
            None => self.map.pointer_left(),
        }
    }

    fn switch_scope(&mut self, scope: &str) -> Result<(), MapError> {
        let features = self.cache.load_scope(scope)?;
        self.map.change_scope(scope, features)?;
        self.graticule = false;
        self.labels = false;
        self.bubbles = false;
        self.arcs = false;
        if let Err(e) = self.map.load_region_data(&self.cache) {
            warn!(error = %e, "region data unavailable");
        }
        let legend = json!({ "legendTitle": "Fill keys" });
        self.map.invoke("legend", None, legend.as_object())?;
        info!(scope, "switched scope");
        Ok(())
    }

    fn drill_down(&mut self) -> Result<(), MapError> {
        let Some((id, _)) = self.list_items.get(self.selected).cloned() else {
            return Ok(());
        };
        let scope = id.to_lowercase();
        if !self.cache.has_scope(&scope) {
            self.info = format!("no geometry for {id}\n\n{}", Self::HELP_TEXT);
            return Ok(());
        }
        let from = (self.map.scope().name().to_string(), self.selected);
        self.switch_scope(&scope)?;
        self.history.push(from);
        self.selected = 0;
        self.refresh_list();
        Ok(())
    }

    fn go_back(&mut self) -> Result<(), MapError> {
        let Some((scope, selected)) = self.history.pop() else {
            return Ok(());
        };
        self.switch_scope(&scope)?;
        self.selected = selected;
        self.refresh_list();
        Ok(())
    }

    fn toggle_overlay(&mut self, name: &str, on: bool) -> Result<(), MapError> {
        if on {
            self.map.invoke(name, None, None)?;
        } else {
            self.map.clear_overlay(name);
        }
        Ok(())
    }

    fn recolour_randomly(&mut self) {
        let keys: Vec<String> = self
            .options
            .fills
            .keys()
            .filter(|k| *k != FillPalette::DEFAULT_KEY)
            .map(str::to_string)
            .collect();
        if keys.is_empty() {
            return;
        }
        let mut rng = rand::rng();
        let updates: Vec<(String, ColorUpdate)> = self
            .list_items
            .iter()
            .map(|(id, _)| {
                let key = &keys[rng.random_range(0..keys.len())];
                (id.clone(), RegionDatum::with_fill_key(key.clone()).into())
            })
            .collect();
        self.map.apply_colors(updates);
    }

    fn random_bubbles(&self) -> Value {
        let mut rng = rand::rng();
        let bubbles: Vec<Value> = (0..12)
            .map(|i| {
                json!({
                    "name": format!("Site {}", i + 1),
                    "latitude": rng.random_range(-50.0..70.0),
                    "longitude": rng.random_range(-170.0..170.0),
                    "radius": rng.random_range(4.0..18.0),
                    "fillKey": "bubble",
                })
            })
            .collect();
        Value::Array(bubbles)
    }

    fn random_arcs(&self) -> Value {
        let mut rng = rand::rng();
        let mut point = || {
            json!({
                "latitude": rng.random_range(-50.0..70.0),
                "longitude": rng.random_range(-170.0..170.0),
            })
        };
        let arcs: Vec<Value> = (0..6)
            .map(|_| json!({ "origin": point(), "destination": point() }))
            .collect();
        Value::Array(arcs)
    }
}
