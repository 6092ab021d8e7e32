use geo::{BoundingRect, Geometry, MultiPolygon, Rect};
use geojson::{GeoJson, feature::Id};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, from_slice};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, warn};

use crate::{
    config::{DataType, Resolvable},
    error::MapError,
    region_csv,
};

/// One renderable region of a scope.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

/// The fixed set of features drawn for one scope.
#[derive(Clone, Debug, Default)]
pub struct FeatureCollection {
    pub scope: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(scope: impl Into<String>, features: Vec<Feature>) -> Self {
        Self { scope: scope.into(), features }
    }

    /// Reads polygonal features out of parsed GeoJSON. Point and line
    /// features, and features without any usable id, are skipped.
    pub fn from_geojson(scope: impl Into<String>, raw: GeoJson) -> Result<Self, MapError> {
        let scope = scope.into();
        let mut features = Vec::new();

        if let GeoJson::FeatureCollection(fc) = raw {
            for feature in fc.features {
                let props = feature.properties.as_ref();
                let prop = |keys: &[&str]| {
                    keys.iter().find_map(|k| {
                        props
                            .and_then(|p| p.get(*k))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                };

                let id = match &feature.id {
                    Some(Id::String(s)) => Some(s.clone()),
                    Some(Id::Number(n)) => Some(n.to_string()),
                    None => prop(&["id", "ISO_A3", "iso_a3", "ADM0_A3"]),
                };
                let Some(id) = id else {
                    debug!(scope = %scope, "skipping feature without id");
                    continue;
                };
                let name = prop(&["name", "NAME", "ADMIN"]).unwrap_or_default();

                if let Some(gj) = feature.geometry {
                    let geom: Geometry<f64> = gj.value.try_into()?;
                    let geometry = match geom {
                        Geometry::Polygon(p) => p.into(),
                        Geometry::MultiPolygon(m) => m,
                        _ => continue,
                    };
                    features.push(Feature { id, name, geometry });
                }
            }
        }

        Ok(Self { scope, features })
    }

    pub fn get(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Geographic extent of every feature, `None` for an empty collection.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }
}

/// Caller-supplied data for one region.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionDatum {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_key: Option<String>,
    #[serde(default, skip_serializing_if = "literal_absent")]
    pub fill_color: Option<Resolvable<String>>,
    /// Literal colour, honoured by colour updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Everything else the caller attached, passed through to popups.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn literal_absent(value: &Option<Resolvable<String>>) -> bool {
    value.as_ref().is_none_or(Resolvable::is_computed)
}

impl RegionDatum {
    pub fn with_fill_key(key: impl Into<String>) -> Self {
        Self { fill_key: Some(key.into()), ..Self::default() }
    }

    /// Fields set on `newer` win; anything it leaves unset keeps the
    /// value from `self`.
    pub fn merged(&self, newer: RegionDatum) -> RegionDatum {
        let mut extra = self.extra.clone();
        for (key, value) in newer.extra {
            if !value.is_null() {
                extra.insert(key, value);
            }
        }
        RegionDatum {
            fill_key: newer.fill_key.or_else(|| self.fill_key.clone()),
            fill_color: newer.fill_color.or_else(|| self.fill_color.clone()),
            color: newer.color.or_else(|| self.color.clone()),
            extra,
        }
    }

    /// JSON form tagged onto rendered nodes for popup lookup.
    pub fn to_tag(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One entry of a colour update: a bare colour or a datum to merge.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ColorUpdate {
    Color(String),
    Datum(RegionDatum),
}

impl From<&str> for ColorUpdate {
    fn from(value: &str) -> Self {
        ColorUpdate::Color(value.to_string())
    }
}

impl From<RegionDatum> for ColorUpdate {
    fn from(value: RegionDatum) -> Self {
        ColorUpdate::Datum(value)
    }
}

/// Collaborator that delivers region data referenced by `dataUrl`.
pub trait RegionDataSource {
    fn fetch(&self, url: &str, kind: DataType) -> Result<BTreeMap<String, ColorUpdate>, MapError>;
}

/// Scope geometry and region data read from a directory of
/// `<scope>.geojson`, `.json` and `.csv` files.
pub struct DataCache {
    base: PathBuf,
}

impl DataCache {
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self, MapError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn scope_file(&self, scope: &str) -> PathBuf {
        let skey = scope.to_lowercase().replace(' ', "_").replace(['(', ')'], "");
        self.base.join(format!("{skey}.geojson"))
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope_file(scope).is_file()
    }

    pub fn load_scope(&self, scope: &str) -> Result<FeatureCollection, MapError> {
        let path = self.scope_file(scope);
        if !path.is_file() {
            return Err(MapError::UnknownScope(scope.to_string()));
        }
        let txt = fs::read_to_string(&path)?;
        let collection = FeatureCollection::from_geojson(scope, GeoJson::from_str(&txt)?)?;
        debug!(scope, features = collection.len(), "loaded scope");
        Ok(collection)
    }
}

impl RegionDataSource for DataCache {
    fn fetch(&self, url: &str, kind: DataType) -> Result<BTreeMap<String, ColorUpdate>, MapError> {
        let bytes = fs::read(self.base.join(url)).map_err(|e| MapError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match kind {
            DataType::Json => Ok(from_slice(&bytes)?),
            DataType::Csv => {
                let text = String::from_utf8_lossy(&bytes);
                let rows = region_csv::parse(&text);
                if rows.is_empty() {
                    warn!(url, "csv region data has no usable rows");
                }
                Ok(rows
                    .into_iter()
                    .map(|(id, datum)| (id, ColorUpdate::Datum(datum)))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_geojson() -> GeoJson {
        GeoJson::from_str(
            &json!({
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "id": "USA",
                        "properties": { "name": "United States" },
                        "geometry": {
                            "type": "Polygon",
                            "coordinates": [[[-120.0, 30.0], [-70.0, 30.0], [-70.0, 48.0], [-120.0, 48.0], [-120.0, 30.0]]]
                        }
                    },
                    {
                        "type": "Feature",
                        "properties": { "ISO_A3": "CAN", "ADMIN": "Canada" },
                        "geometry": {
                            "type": "Polygon",
                            "coordinates": [[[-120.0, 50.0], [-60.0, 50.0], [-60.0, 70.0], [-120.0, 70.0], [-120.0, 50.0]]]
                        }
                    },
                    {
                        "type": "Feature",
                        "properties": { "name": "Nowhere" },
                        "geometry": { "type": "Point", "coordinates": [0.0, 0.0] }
                    }
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn reads_ids_and_names_from_id_or_properties() {
        let fc = FeatureCollection::from_geojson("world", sample_geojson()).unwrap();
        let ids: Vec<_> = fc.features.iter().map(|f| (f.id.as_str(), f.name.as_str())).collect();
        assert_eq!(ids, vec![("USA", "United States"), ("CAN", "Canada")]);
    }

    #[test]
    fn bounds_cover_every_feature() {
        let fc = FeatureCollection::from_geojson("world", sample_geojson()).unwrap();
        let b = fc.bounds().unwrap();
        assert_eq!((b.min().x, b.min().y, b.max().x, b.max().y), (-120.0, 30.0, -60.0, 70.0));
    }

    #[test]
    fn merge_prefers_newer_fields_and_keeps_the_rest() {
        let old: RegionDatum =
            serde_json::from_value(json!({ "fillKey": "low", "electoralVotes": 3 })).unwrap();
        let newer: RegionDatum = serde_json::from_value(json!({ "fillKey": "high", "note": "x" })).unwrap();
        let merged = old.merged(newer);
        assert_eq!(merged.fill_key.as_deref(), Some("high"));
        assert_eq!(
            merged.to_tag(),
            json!({ "fillKey": "high", "electoralVotes": 3, "note": "x" })
        );
    }

    #[test]
    fn updates_accept_bare_colours_and_datums() {
        let updates: BTreeMap<String, ColorUpdate> =
            serde_json::from_value(json!({ "US": "#000000", "CA": { "fillKey": "high" } })).unwrap();
        assert!(matches!(&updates["US"], ColorUpdate::Color(c) if c == "#000000"));
        assert!(matches!(&updates["CA"], ColorUpdate::Datum(d) if d.fill_key.as_deref() == Some("high")));
    }

    #[test]
    fn computed_fill_colors_are_not_tagged() {
        let datum = RegionDatum {
            fill_color: Some(Resolvable::computed(|ctx| ctx.feature.id.clone())),
            ..RegionDatum::default()
        };
        assert_eq!(datum.to_tag(), json!({}));
    }
}
