use geo::{Centroid, Coord, LineString, MultiLineString, MultiPolygon, Polygon, coord};
use std::{f64::consts::PI, fmt, str::FromStr};

use crate::{config::ProjectionConfig, data::FeatureCollection, error::MapError};

const RADIANS: f64 = PI / 180.0;
const MERCATOR_MAX_LAT: f64 = 85.051_128_78;

/// The geographic extent being drawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    World,
    Region(String),
}

impl Scope {
    pub fn parse(scope: &str) -> Result<Self, MapError> {
        let trimmed = scope.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(MapError::UnknownScope(scope.to_string()));
        }
        Ok(match trimmed {
            "world" => Scope::World,
            other => Scope::Region(other.to_string()),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Scope::World => "world",
            Scope::Region(name) => name,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionFamily {
    Equirectangular,
    Mercator,
    Orthographic,
    ConicEqualArea,
}

impl FromStr for ProjectionFamily {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equirectangular" => Ok(ProjectionFamily::Equirectangular),
            "mercator" => Ok(ProjectionFamily::Mercator),
            "orthographic" => Ok(ProjectionFamily::Orthographic),
            "conicEqualArea" | "albers" => Ok(ProjectionFamily::ConicEqualArea),
            other => Err(MapError::UnknownProjection(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Raw {
    Equirectangular,
    Mercator,
    Orthographic,
    Conic { n: f64, c: f64, rho0: f64 },
    /// Degenerate conic whose parallels straddle the equator.
    Cylindrical { cos_phi0: f64 },
}

impl Raw {
    fn conic_equal_area(phi1: f64, phi2: f64) -> Self {
        let sy0 = phi1.sin();
        let n = (sy0 + phi2.sin()) / 2.0;
        if n.abs() < 1e-6 {
            return Raw::Cylindrical { cos_phi0: phi1.cos() };
        }
        let c = 1.0 + sy0 * (2.0 * n - sy0);
        Raw::Conic { n, c, rho0: c.sqrt() / n }
    }

    /// Planar coordinates with y pointing north, `None` when clipped.
    fn forward(self, lambda: f64, phi: f64) -> Option<(f64, f64)> {
        match self {
            Raw::Equirectangular => Some((lambda, phi)),
            Raw::Mercator => {
                let phi = phi.clamp(-MERCATOR_MAX_LAT * RADIANS, MERCATOR_MAX_LAT * RADIANS);
                Some((lambda, (PI / 4.0 + phi / 2.0).tan().ln()))
            }
            Raw::Orthographic => {
                let cos_phi = phi.cos();
                (cos_phi * lambda.cos() >= 0.0).then(|| (cos_phi * lambda.sin(), phi.sin()))
            }
            Raw::Conic { n, c, rho0 } => {
                let rho = (c - 2.0 * n * phi.sin()).max(0.0).sqrt() / n;
                let theta = lambda * n;
                Some((rho * theta.sin(), rho0 - rho * theta.cos()))
            }
            Raw::Cylindrical { cos_phi0 } => Some((lambda * cos_phi0, phi.sin() / cos_phi0)),
        }
    }
}

/// Maps `(longitude, latitude)` in degrees to viewport pixels (y down).
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    raw: Raw,
    family: ProjectionFamily,
    scale: f64,
    translate: (f64, f64),
    /// `[lambda, phi]` rotation in radians.
    rotate: (f64, f64),
}

impl Projection {
    /// Picks and fits the projection for `scope` in a `width` x `height`
    /// viewport. Region scopes always use a conic equal-area projection
    /// fitted to the features; the world scope uses `family`.
    pub fn for_scope(
        scope: &Scope,
        family: ProjectionFamily,
        config: &ProjectionConfig,
        viewport: (f64, f64),
        features: &FeatureCollection,
    ) -> Result<Self, MapError> {
        let (width, height) = viewport;
        match scope {
            Scope::World => {
                let raw = match family {
                    ProjectionFamily::Equirectangular => Raw::Equirectangular,
                    ProjectionFamily::Mercator => Raw::Mercator,
                    ProjectionFamily::Orthographic => Raw::Orthographic,
                    ProjectionFamily::ConicEqualArea => Raw::conic_equal_area(
                        29.5 * RADIANS,
                        45.5 * RADIANS,
                    ),
                };
                let y_divisor = if family == ProjectionFamily::Mercator { 1.45 } else { 1.8 };
                let mut projection = Projection {
                    raw,
                    family,
                    scale: (width + 1.0) / 2.0 / PI,
                    translate: (width / 2.0, height / y_divisor),
                    rotate: (0.0, 0.0),
                };
                if family == ProjectionFamily::Orthographic {
                    projection.scale = 250.0;
                    projection.rotate =
                        (config.rotation[0] * RADIANS, config.rotation[1] * RADIANS);
                }
                Ok(projection)
            }
            Scope::Region(name) => {
                let bounds = features
                    .bounds()
                    .ok_or_else(|| MapError::MissingGeography(name.clone()))?;
                let (lat0, lat1) = (bounds.min().y, bounds.max().y);
                let sixth = (lat1 - lat0) / 6.0;
                let center_lon = (bounds.min().x + bounds.max().x) / 2.0;
                let mut projection = Projection {
                    raw: Raw::conic_equal_area((lat0 + sixth) * RADIANS, (lat1 - sixth) * RADIANS),
                    family: ProjectionFamily::ConicEqualArea,
                    scale: 1.0,
                    translate: (0.0, 0.0),
                    rotate: (-center_lon * RADIANS, 0.0),
                };
                projection.fit(features, width, height);
                Ok(projection)
            }
        }
    }

    /// Scales and centres the projection so `features` fill the viewport.
    fn fit(&mut self, features: &FeatureCollection, width: f64, height: f64) {
        let (mut x0, mut y0, mut x1, mut y1) =
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for feature in &features.features {
            for poly in &feature.geometry.0 {
                for c in poly.exterior().coords() {
                    if let Some((x, y)) = self.raw_point(c.x, c.y) {
                        x0 = x0.min(x);
                        y0 = y0.min(y);
                        x1 = x1.max(x);
                        y1 = y1.max(y);
                    }
                }
            }
        }
        let (dx, dy) = (x1 - x0, y1 - y0);
        if !(dx.is_finite() && dy.is_finite()) || dx <= 0.0 || dy <= 0.0 {
            self.translate = (width / 2.0, height / 2.0);
            return;
        }
        let k = 0.95 * (width / dx).min(height / dy);
        self.scale = k;
        self.translate = (width / 2.0 - k * (x0 + x1) / 2.0, height / 2.0 + k * (y0 + y1) / 2.0);
    }

    fn raw_point(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        let (lambda, phi) = rotate(lon * RADIANS, lat * RADIANS, self.rotate);
        self.raw.forward(lambda, phi)
    }

    /// `None` for points on the clipped side of the globe.
    pub fn project(&self, lon: f64, lat: f64) -> Option<Coord<f64>> {
        let (x, y) = self.raw_point(lon, lat)?;
        Some(coord! { x: self.translate.0 + self.scale * x, y: self.translate.1 - self.scale * y })
    }

    pub fn family(&self) -> ProjectionFamily {
        self.family
    }

    /// Centre and radius of the visible globe disc, orthographic only.
    pub fn sphere(&self) -> Option<(Coord<f64>, f64)> {
        (self.family == ProjectionFamily::Orthographic).then(|| {
            (coord! { x: self.translate.0, y: self.translate.1 }, self.scale)
        })
    }
}

fn rotate(lambda: f64, phi: f64, (d_lambda, d_phi): (f64, f64)) -> (f64, f64) {
    let mut lambda = lambda + d_lambda;
    if lambda > PI {
        lambda -= 2.0 * PI;
    } else if lambda < -PI {
        lambda += 2.0 * PI;
    }
    if d_phi == 0.0 {
        return (lambda, phi);
    }
    let cos_phi = phi.cos();
    let x = lambda.cos() * cos_phi;
    let y = lambda.sin() * cos_phi;
    let z = phi.sin();
    let k = z * d_phi.cos() + x * d_phi.sin();
    (y.atan2(x * d_phi.cos() - z * d_phi.sin()), k.clamp(-1.0, 1.0).asin())
}

/// Rasterizes geographic geometry through a [`Projection`].
#[derive(Clone, Debug, PartialEq)]
pub struct PathGenerator {
    projection: Projection,
}

impl PathGenerator {
    pub fn new(projection: Projection) -> Self {
        Self { projection }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Projects every ring; clipped vertices are dropped and rings left
    /// with fewer than three vertices disappear.
    pub fn polygons(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        let ring = |ls: &LineString<f64>| -> Option<LineString<f64>> {
            let pts: Vec<Coord<f64>> =
                ls.coords().filter_map(|c| self.projection.project(c.x, c.y)).collect();
            (pts.len() >= 3).then(|| LineString::new(pts))
        };
        MultiPolygon(
            geometry
                .0
                .iter()
                .filter_map(|poly| {
                    let exterior = ring(poly.exterior())?;
                    let interiors = poly.interiors().iter().filter_map(&ring).collect();
                    Some(Polygon::new(exterior, interiors))
                })
                .collect(),
        )
    }

    /// Projects a line, splitting it wherever it crosses a clipped region.
    pub fn lines(&self, line: &LineString<f64>) -> MultiLineString<f64> {
        let mut parts = Vec::new();
        let mut current = Vec::new();
        for c in line.coords() {
            match self.projection.project(c.x, c.y) {
                Some(p) => current.push(p),
                None => {
                    if current.len() >= 2 {
                        parts.push(LineString::new(std::mem::take(&mut current)));
                    }
                    current.clear();
                }
            }
        }
        if current.len() >= 2 {
            parts.push(LineString::new(current));
        }
        MultiLineString(parts)
    }

    /// Planar centroid of the projected geometry.
    pub fn centroid(&self, geometry: &MultiPolygon<f64>) -> Option<Coord<f64>> {
        self.polygons(geometry).centroid().map(|p| p.0)
    }
}

/// SVG path data for projected polygons.
pub fn svg_path(polygons: &MultiPolygon<f64>) -> String {
    let mut d = String::new();
    for poly in &polygons.0 {
        for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
            for (i, c) in ring.coords().enumerate() {
                d.push(if i == 0 { 'M' } else { 'L' });
                d.push_str(&format!("{:.3},{:.3}", c.x, c.y));
            }
            d.push('Z');
        }
    }
    d
}

/// Meridians and parallels every 10 degrees in geographic coordinates.
pub fn graticule() -> MultiLineString<f64> {
    const STEP: f64 = 10.0;
    const SAMPLE: f64 = 2.5;
    let samples = |from: f64, to: f64| {
        let n = ((to - from) / SAMPLE).round() as usize;
        (0..=n).map(move |i| from + i as f64 * SAMPLE)
    };

    let mut lines: Vec<LineString<f64>> = Vec::new();
    for i in 0..36 {
        let lon = -180.0 + i as f64 * STEP;
        let (lat0, lat1) = if lon % 90.0 == 0.0 { (-90.0, 90.0) } else { (-80.0, 80.0) };
        lines.push(samples(lat0, lat1).map(|lat| coord! { x: lon, y: lat }).collect());
    }
    for i in 0..17 {
        let lat = -80.0 + i as f64 * STEP;
        lines.push(samples(-180.0, 180.0).map(|lon| coord! { x: lon, y: lat }).collect());
    }
    MultiLineString(lines)
}

/// Great-circle route between two `(longitude, latitude)` points, sampled
/// roughly every two degrees of arc.
pub fn great_arc(origin: Coord<f64>, destination: Coord<f64>) -> LineString<f64> {
    let to_vec = |c: Coord<f64>| {
        let (lon, lat) = (c.x * RADIANS, c.y * RADIANS);
        [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
    };
    let (a, b) = (to_vec(origin), to_vec(destination));
    let dot = (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).clamp(-1.0, 1.0);
    let omega = dot.acos();
    if omega < 1e-9 {
        return LineString::new(vec![origin, destination]);
    }
    let steps = ((omega / RADIANS) / 2.0).ceil().max(2.0) as usize;
    let sin_omega = omega.sin();
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            let (wa, wb) = (((1.0 - t) * omega).sin() / sin_omega, (t * omega).sin() / sin_omega);
            let v = [0, 1, 2].map(|k| wa * a[k] + wb * b[k]);
            let lat = v[2].clamp(-1.0, 1.0).asin();
            let lon = v[1].atan2(v[0]);
            coord! { x: lon / RADIANS, y: lat / RADIANS }
        })
        .collect()
}
