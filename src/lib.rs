//! Choropleth maps, proportional bubbles, arcs and labels drawn into a
//! retained scene graph, with hover highlighting and popups.

pub mod base;
pub mod config;
pub mod data;
pub mod error;
pub mod interaction;
pub mod map;
pub mod overlays;
pub mod plugin;
pub mod projection;
pub mod region_csv;
pub mod scene;

pub use config::{FillPalette, MapOptions, PopupTemplate, Resolvable};
pub use data::{ColorUpdate, DataCache, Feature, FeatureCollection, RegionDataSource, RegionDatum};
pub use error::MapError;
pub use map::AtlasMap;
pub use scene::{RetainedScene, SceneGraph};
