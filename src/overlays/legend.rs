use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{
    config::{FillPalette, section_from},
    error::MapError,
    map::AtlasMap,
    overlays::sync_static,
    scene::{LayerId, SceneGraph, Shape},
};

pub const LEGEND_CLASS: &str = "datamaps-legend";

#[derive(Clone, Debug, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color: String,
}

/// Static key derived from the fill palette.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Legend {
    pub title: Option<String>,
    pub entries: Vec<LegendEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LegendOptions {
    legend_title: Option<String>,
    default_fill_name: Option<String>,
    labels: BTreeMap<String, String>,
}

impl Legend {
    /// One entry per palette key. `defaultFill` only appears when it has a
    /// label of its own.
    fn from_palette(fills: &FillPalette, options: &LegendOptions) -> Self {
        let entries = fills
            .iter()
            .filter_map(|(key, color)| {
                let label = if key == FillPalette::DEFAULT_KEY {
                    options.default_fill_name.clone()?
                } else {
                    options.labels.get(key).cloned().unwrap_or_else(|| key.to_string())
                };
                Some(LegendEntry { label, color: color.to_string() })
            })
            .collect();
        Legend { title: options.legend_title.clone(), entries }
    }

    pub fn to_markup(&self) -> String {
        let mut html = String::new();
        if let Some(title) = &self.title {
            html.push_str(&format!("<h2>{title}</h2>"));
        }
        html.push_str("<dl>");
        for entry in &self.entries {
            html.push_str(&format!(
                "<dt>{}</dt><dd style=\"background-color:{}\">&nbsp;</dd>",
                entry.label, entry.color
            ));
        }
        html.push_str("</dl>");
        html
    }
}

/// Draws the palette legend. Settings come through the invocation options
/// (`legendTitle`, `defaultFillName`, `labels`); the plugin takes no data.
pub fn render<S: SceneGraph>(
    map: &mut AtlasMap<S>,
    layer: LayerId,
    _data: Option<&Value>,
    options: &Map<String, Value>,
) -> Result<(), MapError> {
    let options: LegendOptions = section_from("legend", options)?;
    let legend = Legend::from_palette(&map.options.fills, &options);
    sync_static(
        &mut map.scene,
        layer,
        LEGEND_CLASS,
        vec![("legend".to_string(), Shape::Legend(legend))],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn palette() -> FillPalette {
        FillPalette::new([("defaultFill", "#ABDDA4"), ("high", "#FC8D59"), ("low", "#91BFDB")])
    }

    #[test]
    fn default_fill_needs_its_own_label() {
        let legend = Legend::from_palette(&palette(), &LegendOptions::default());
        let labels: Vec<_> = legend.entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["high", "low"]);

        let named = LegendOptions {
            default_fill_name: Some("No data".to_string()),
            ..LegendOptions::default()
        };
        let legend = Legend::from_palette(&palette(), &named);
        assert_eq!(legend.entries[0], LegendEntry { label: "No data".into(), color: "#ABDDA4".into() });
    }

    #[test]
    fn explicit_labels_replace_keys() {
        let options = LegendOptions {
            legend_title: Some("Turnout".to_string()),
            labels: BTreeMap::from([("high".to_string(), "Over 60%".to_string())]),
            ..LegendOptions::default()
        };
        let legend = Legend::from_palette(&palette(), &options);
        assert_eq!(
            legend.to_markup(),
            "<h2>Turnout</h2><dl>\
             <dt>Over 60%</dt><dd style=\"background-color:#FC8D59\">&nbsp;</dd>\
             <dt>low</dt><dd style=\"background-color:#91BFDB\">&nbsp;</dd></dl>"
        );
    }
}
