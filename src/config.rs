use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt, rc::Rc};

use crate::{
    data::{Feature, RegionDatum},
    error::MapError,
};

/// Context handed to computed option values.
pub struct FillContext<'a> {
    pub feature: &'a Feature,
    pub datum: &'a RegionDatum,
}

/// An option that is either a plain value or computed from a feature and
/// its datum. Computed values are resolved once per use site.
pub enum Resolvable<T> {
    Literal(T),
    Computed(Rc<dyn Fn(&FillContext<'_>) -> T>),
}

impl<T: Clone> Resolvable<T> {
    pub fn computed(f: impl Fn(&FillContext<'_>) -> T + 'static) -> Self {
        Resolvable::Computed(Rc::new(f))
    }

    pub fn resolve(&self, ctx: &FillContext<'_>) -> T {
        match self {
            Resolvable::Literal(v) => v.clone(),
            Resolvable::Computed(f) => f(ctx),
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Resolvable::Computed(_))
    }
}

impl<T: Clone> Clone for Resolvable<T> {
    fn clone(&self) -> Self {
        match self {
            Resolvable::Literal(v) => Resolvable::Literal(v.clone()),
            Resolvable::Computed(f) => Resolvable::Computed(Rc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolvable::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Resolvable::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for Resolvable<String> {
    fn from(value: &str) -> Self {
        Resolvable::Literal(value.to_string())
    }
}

impl<T: Serialize> Serialize for Resolvable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Resolvable::Literal(v) => v.serialize(serializer),
            Resolvable::Computed(_) => serializer.serialize_unit(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Resolvable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Resolvable::Literal)
    }
}

/// Named colours, always carrying `defaultFill`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct FillPalette(BTreeMap<String, String>);

impl FillPalette {
    pub const DEFAULT_KEY: &'static str = "defaultFill";
    pub const DEFAULT_FILL: &'static str = "#ABDDA4";

    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<BTreeMap<_, _>>()
            .into()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn default_fill(&self) -> &str {
        self.get(Self::DEFAULT_KEY).unwrap_or(Self::DEFAULT_FILL)
    }

    /// Palette colour for `key`, falling back to `defaultFill`.
    pub fn resolve(&self, key: Option<&str>) -> &str {
        key.and_then(|k| self.get(k))
            .unwrap_or_else(|| self.default_fill())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl Default for FillPalette {
    fn default() -> Self {
        FillPalette::new([(Self::DEFAULT_KEY, Self::DEFAULT_FILL)])
    }
}

impl From<BTreeMap<String, String>> for FillPalette {
    fn from(mut map: BTreeMap<String, String>) -> Self {
        map.entry(Self::DEFAULT_KEY.to_string())
            .or_insert_with(|| Self::DEFAULT_FILL.to_string());
        FillPalette(map)
    }
}

impl From<FillPalette> for BTreeMap<String, String> {
    fn from(palette: FillPalette) -> Self {
        palette.0
    }
}

pub type TemplateError = Box<dyn std::error::Error>;

/// What a popup template sees: the feature under the pointer (absent for
/// bubbles) and the datum tagged on the hovered node.
pub struct PopupContext<'a> {
    pub feature: Option<&'a Feature>,
    pub datum: &'a Value,
}

#[derive(Clone)]
pub struct PopupTemplate(Rc<dyn Fn(&PopupContext<'_>) -> Result<String, TemplateError>>);

impl PopupTemplate {
    pub fn new(f: impl Fn(&PopupContext<'_>) -> Result<String, TemplateError> + 'static) -> Self {
        PopupTemplate(Rc::new(f))
    }

    pub fn render(&self, ctx: &PopupContext<'_>) -> Result<String, TemplateError> {
        (self.0)(ctx)
    }

    /// Display name of the hovered region.
    pub fn region_name() -> Self {
        PopupTemplate::new(|ctx| Ok(ctx.feature.map(|f| f.name.clone()).unwrap_or_default()))
    }

    /// The `name` field of the hovered datum.
    pub fn datum_name() -> Self {
        PopupTemplate::new(|ctx| {
            Ok(ctx
                .datum
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        })
    }
}

impl fmt::Debug for PopupTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PopupTemplate(..)")
    }
}

/// Identity function for keyed overlay joins.
#[derive(Clone)]
pub struct KeyFn(Rc<dyn Fn(&Value) -> String>);

impl KeyFn {
    pub fn new(f: impl Fn(&Value) -> String + 'static) -> Self {
        KeyFn(Rc::new(f))
    }

    pub fn key(&self, datum: &Value) -> String {
        (self.0)(datum)
    }

    /// Keys a datum by its serialized form.
    pub fn structural() -> Self {
        KeyFn::new(|datum| serde_json::to_string(datum).unwrap_or_default())
    }
}

impl Default for KeyFn {
    fn default() -> Self {
        KeyFn::structural()
    }
}

impl fmt::Debug for KeyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyFn(..)")
    }
}

/// Highlight and popup behaviour for one family of hoverable nodes.
#[derive(Clone, Debug)]
pub struct HoverSettings {
    pub highlight_on_hover: bool,
    pub popup_on_hover: bool,
    pub highlight_fill_color: String,
    pub highlight_border_color: String,
    pub highlight_border_width: f64,
    pub highlight_fill_opacity: f64,
    pub popup_template: PopupTemplate,
}

impl HoverSettings {
    pub fn is_interactive(&self) -> bool {
        self.highlight_on_hover || self.popup_on_hover
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeographyConfig {
    pub hide_antarctica: bool,
    pub hide_hawaii_and_alaska: bool,
    /// Extra feature ids dropped before drawing.
    pub exclude: Vec<String>,
    pub border_width: f64,
    pub border_color: String,
    pub popup_on_hover: bool,
    pub highlight_on_hover: bool,
    pub highlight_fill_color: String,
    pub highlight_border_color: String,
    pub highlight_border_width: f64,
    pub highlight_fill_opacity: f64,
    #[serde(skip)]
    pub popup_template: Option<PopupTemplate>,
}

impl Default for GeographyConfig {
    fn default() -> Self {
        Self {
            hide_antarctica: true,
            hide_hawaii_and_alaska: false,
            exclude: Vec::new(),
            border_width: 1.0,
            border_color: "#FDFDFD".to_string(),
            popup_on_hover: true,
            highlight_on_hover: true,
            highlight_fill_color: "#FC8D59".to_string(),
            highlight_border_color: "rgba(250, 15, 160, 0.2)".to_string(),
            highlight_border_width: 2.0,
            highlight_fill_opacity: 1.0,
            popup_template: None,
        }
    }
}

impl GeographyConfig {
    pub fn excluded_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.exclude.iter().map(String::as_str).collect();
        if self.hide_antarctica {
            ids.push("ATA");
        }
        if self.hide_hawaii_and_alaska {
            ids.extend(["HI", "AK"]);
        }
        ids
    }

    pub fn hover_settings(&self) -> HoverSettings {
        HoverSettings {
            highlight_on_hover: self.highlight_on_hover,
            popup_on_hover: self.popup_on_hover,
            highlight_fill_color: self.highlight_fill_color.clone(),
            highlight_border_color: self.highlight_border_color.clone(),
            highlight_border_width: self.highlight_border_width,
            highlight_fill_opacity: self.highlight_fill_opacity,
            popup_template: self
                .popup_template
                .clone()
                .unwrap_or_else(PopupTemplate::region_name),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BubblesConfig {
    pub border_width: f64,
    pub border_color: String,
    pub popup_on_hover: bool,
    pub radius: Option<f64>,
    pub fill_key: Option<String>,
    pub filter_key: Option<String>,
    pub fill_opacity: f64,
    pub animate: bool,
    pub highlight_on_hover: bool,
    pub highlight_fill_color: String,
    pub highlight_border_color: String,
    pub highlight_border_width: f64,
    pub highlight_fill_opacity: f64,
    /// Milliseconds before an exiting bubble starts shrinking.
    pub exit_delay: u64,
    #[serde(skip)]
    pub key: KeyFn,
    #[serde(skip)]
    pub popup_template: Option<PopupTemplate>,
}

impl Default for BubblesConfig {
    fn default() -> Self {
        Self {
            border_width: 2.0,
            border_color: "#FFFFFF".to_string(),
            popup_on_hover: true,
            radius: None,
            fill_key: None,
            filter_key: None,
            fill_opacity: 0.75,
            animate: true,
            highlight_on_hover: true,
            highlight_fill_color: "#FC8D59".to_string(),
            highlight_border_color: "rgba(250, 15, 160, 0.2)".to_string(),
            highlight_border_width: 2.0,
            highlight_fill_opacity: 0.85,
            exit_delay: 100,
            key: KeyFn::default(),
            popup_template: None,
        }
    }
}

impl BubblesConfig {
    pub fn hover_settings(&self) -> HoverSettings {
        HoverSettings {
            highlight_on_hover: self.highlight_on_hover,
            popup_on_hover: self.popup_on_hover,
            highlight_fill_color: self.highlight_fill_color.clone(),
            highlight_border_color: self.highlight_border_color.clone(),
            highlight_border_width: self.highlight_border_width,
            highlight_fill_opacity: self.highlight_fill_opacity,
            popup_template: self
                .popup_template
                .clone()
                .unwrap_or_else(PopupTemplate::datum_name),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArcConfig {
    pub stroke_color: String,
    pub stroke_width: f64,
    pub arc_sharpness: f64,
    /// Draw-in duration in milliseconds.
    pub animation_speed: u64,
    pub great_arc: bool,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            stroke_color: "#DD1C77".to_string(),
            stroke_width: 1.0,
            arc_sharpness: 1.0,
            animation_speed: 600,
            great_arc: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelOffset {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LabelsConfig {
    pub font_size: Option<f64>,
    pub font_family: String,
    pub label_color: String,
    pub line_width: f64,
    pub default_offset: LabelOffset,
    /// Per-id pixel offsets for regions whose centroid label collides.
    pub offsets: BTreeMap<String, LabelOffset>,
    /// Ids labelled in a side cascade with a leader line.
    pub cascade: Vec<String>,
    /// `[longitude, latitude]` of the first cascade slot.
    pub cascade_origin: [f64; 2],
}

impl Default for LabelsConfig {
    fn default() -> Self {
        let shifted = |x: f64, y: f64| LabelOffset { x, y };
        Self {
            font_size: None,
            font_family: "Verdana".to_string(),
            label_color: "#000000".to_string(),
            line_width: 1.0,
            default_offset: shifted(7.5, 5.0),
            offsets: BTreeMap::from([
                ("FL".to_string(), shifted(-2.5, 5.0)),
                ("KY".to_string(), shifted(-2.5, 5.0)),
                ("MI".to_string(), shifted(-2.5, 18.0)),
                ("NY".to_string(), shifted(-1.0, 5.0)),
                ("LA".to_string(), shifted(13.0, 5.0)),
            ]),
            cascade: ["VT", "NH", "MA", "RI", "CT", "NJ", "DE", "MD", "DC"]
                .into_iter()
                .map(String::from)
                .collect(),
            cascade_origin: [-67.707617, 42.722131],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// `[lambda, phi]` rotation in degrees, used by the orthographic family.
    pub rotation: [f64; 2],
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self { rotation: [97.0, 0.0] }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Json,
    Csv,
}

/// Construction options. Every section resolves key by key against its
/// defaults, so a partial JSON document is always a complete configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MapOptions {
    pub scope: String,
    pub projection: String,
    pub projection_config: ProjectionConfig,
    pub width: f64,
    pub height: Option<f64>,
    pub responsive: bool,
    pub aspect_ratio: f64,
    pub fills: FillPalette,
    pub data: BTreeMap<String, RegionDatum>,
    /// Named filter references applied to bubbles through `filterKey`.
    pub filters: BTreeMap<String, String>,
    pub data_url: Option<String>,
    pub data_type: DataType,
    pub geography_config: GeographyConfig,
    pub bubbles_config: BubblesConfig,
    pub arc_config: ArcConfig,
    pub labels_config: LabelsConfig,
    /// `<name>Config` sections for user-registered plugins.
    #[serde(flatten)]
    pub plugin_configs: Map<String, Value>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            scope: "world".to_string(),
            projection: "equirectangular".to_string(),
            projection_config: ProjectionConfig::default(),
            width: 960.0,
            height: None,
            responsive: false,
            aspect_ratio: 0.5625,
            fills: FillPalette::default(),
            data: BTreeMap::new(),
            filters: BTreeMap::new(),
            data_url: None,
            data_type: DataType::Json,
            geography_config: GeographyConfig::default(),
            bubbles_config: BubblesConfig::default(),
            arc_config: ArcConfig::default(),
            labels_config: LabelsConfig::default(),
            plugin_configs: Map::new(),
        }
    }
}

impl MapOptions {
    pub fn from_json(value: Value) -> Result<Self, MapError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn viewport(&self) -> (f64, f64) {
        let height = self.height.unwrap_or(self.width * self.aspect_ratio);
        (self.width, height)
    }

    /// Default options for the plugin registered as `name`.
    pub fn plugin_section(&self, name: &str) -> Map<String, Value> {
        let section = match name {
            "bubbles" => serde_json::to_value(&self.bubbles_config).ok(),
            "arc" => serde_json::to_value(&self.arc_config).ok(),
            "labels" => serde_json::to_value(&self.labels_config).ok(),
            _ => self.plugin_configs.get(&format!("{name}Config")).cloned(),
        };
        match section {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Shallow per-key defaulting: an explicit key wins unless it is null.
pub fn layered(explicit: Option<&Map<String, Value>>, defaults: Map<String, Value>) -> Map<String, Value> {
    let mut resolved = defaults;
    for (key, value) in explicit.into_iter().flatten() {
        if !value.is_null() {
            resolved.insert(key.clone(), value.clone());
        }
    }
    resolved
}

/// Deserializes a merged option map into a typed section. Closure-valued
/// fields come back as their defaults; callers copy them over.
pub(crate) fn section_from<T>(plugin: &str, options: &Map<String, Value>) -> Result<T, MapError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| MapError::InvalidDatum {
        plugin: plugin.to_string(),
        reason: format!("options: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn partial_sections_keep_defaults() {
        let options = MapOptions::from_json(json!({
            "geographyConfig": { "borderWidth": 3 },
            "arcConfig": { "strokeColor": "#000000" }
        }))
        .unwrap();
        assert_eq!(options.geography_config.border_width, 3.0);
        assert_eq!(options.geography_config.border_color, "#FDFDFD");
        assert!(options.geography_config.hide_antarctica);
        assert_eq!(options.arc_config.stroke_color, "#000000");
        assert_eq!(options.arc_config.animation_speed, 600);
        assert_eq!(options.scope, "world");
    }

    #[test]
    fn palette_always_has_default_fill() {
        let options = MapOptions::from_json(json!({ "fills": { "high": "#FC8D59" } })).unwrap();
        assert_eq!(options.fills.default_fill(), "#ABDDA4");
        assert_eq!(options.fills.resolve(Some("high")), "#FC8D59");
        assert_eq!(options.fills.resolve(Some("missing")), "#ABDDA4");
        assert_eq!(options.fills.resolve(None), "#ABDDA4");
    }

    #[test]
    fn explicit_keys_win_and_nulls_fall_through() {
        let defaults = json!({ "a": 1, "b": 2 }).as_object().cloned().unwrap();
        let explicit = json!({ "b": 5, "a": null, "c": 7 });
        let merged = layered(explicit.as_object(), defaults);
        assert_eq!(Value::Object(merged), json!({ "a": 1, "b": 5, "c": 7 }));
    }

    #[test]
    fn user_plugin_sections_come_from_flattened_keys() {
        let options = MapOptions::from_json(json!({ "pinsConfig": { "size": 4 } })).unwrap();
        assert_eq!(Value::Object(options.plugin_section("pins")), json!({ "size": 4 }));
        assert!(options.plugin_section("nothing").is_empty());
        assert_eq!(options.plugin_section("arc")["arcSharpness"], json!(1.0));
    }

    #[test]
    fn exclusion_toggles_expand_to_ids() {
        let mut config = GeographyConfig::default();
        assert_eq!(config.excluded_ids(), vec!["ATA"]);
        config.hide_antarctica = false;
        config.hide_hawaii_and_alaska = true;
        config.exclude.push("PR".to_string());
        assert_eq!(config.excluded_ids(), vec!["PR", "HI", "AK"]);
    }

    #[test]
    fn viewport_height_follows_aspect_ratio() {
        let options = MapOptions::default();
        assert_eq!(options.viewport(), (960.0, 540.0));
    }
}
