use thiserror::Error;

/// Everything the map engine can refuse to do.
///
/// Lookup misses (unknown fill keys, region ids with no rendered node,
/// bubbles without a resolvable position) resolve through fallbacks and
/// never surface here.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("unknown scope `{0}`")]
    UnknownScope(String),

    #[error("unsupported projection `{0}`")]
    UnknownProjection(String),

    #[error("no geography loaded for scope `{0}`")]
    MissingGeography(String),

    /// Overlay data was supplied in something other than a sequence.
    #[error("{plugin} data must be an array, got {found}")]
    NotASequence { plugin: String, found: &'static str },

    #[error("no plugin registered under `{0}`")]
    UnknownPlugin(String),

    #[error("invalid {plugin} datum: {reason}")]
    InvalidDatum { plugin: String, reason: String },

    /// A data source collaborator could not deliver its payload.
    #[error("fetching `{url}` failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("io {0}")]
    Io(#[from] std::io::Error),

    #[error("json {0}")]
    Json(#[from] serde_json::Error),

    #[error("geojson {0}")]
    GeoJson(#[from] geojson::Error),
}

impl MapError {
    /// Short name of a JSON value's kind, for shape errors.
    pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
        use serde_json::Value;
        match value {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Array(_) => "an array",
            Value::Object(_) => "an object",
        }
    }
}
