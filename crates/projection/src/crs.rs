//! Coordinate Reference System model and resolution.
//!
//! A [`Crs`] is resolved either from an identifier (`EPSG:4326`, `CRS:84`,
//! bare `5070`) or from WKT text such as an ESRI `.prj` sidecar. Systems this
//! crate cannot interpret are kept as [`CrsKind::Custom`] so a grid can still
//! be converted without reprojection.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::ellipsoid::Ellipsoid;
use crate::error::{ProjectionError, Result};
use crate::wkt::{WktNode, WktValue};

/// Well-known EPSG codes with canonical built-in definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// NAD83 Geographic
    Epsg4269,
    /// Web Mercator (meters)
    Epsg3857,
    /// NAD83 / Conus Albers (meters)
    Epsg5070,
}

impl CrsCode {
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(Self::Epsg4326),
            4269 => Some(Self::Epsg4269),
            3857 | 900913 | 102100 => Some(Self::Epsg3857),
            5070 => Some(Self::Epsg5070),
            _ => None,
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Self::Epsg4326 => 4326,
            Self::Epsg4269 => 4269,
            Self::Epsg3857 => 3857,
            Self::Epsg5070 => 5070,
        }
    }
}

/// Parameters shared by the conic projections.
///
/// Angles are in degrees. False easting/northing are in the CRS's linear
/// unit; `linear_unit` is the number of meters per unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicParams {
    pub ellipsoid: Ellipsoid,
    /// Latitude of origin
    pub lat0: f64,
    /// Central meridian
    pub lon0: f64,
    /// First standard parallel
    pub lat1: f64,
    /// Second standard parallel
    pub lat2: f64,
    pub false_easting: f64,
    pub false_northing: f64,
    /// Scale factor at the natural origin (Lambert 1SP)
    pub scale_factor: f64,
    /// Meters per linear unit
    pub linear_unit: f64,
}

impl ConicParams {
    /// NAD83 / Conus Albers (EPSG:5070).
    pub fn conus_albers() -> Self {
        Self {
            ellipsoid: Ellipsoid::GRS80,
            lat0: 23.0,
            lon0: -96.0,
            lat1: 29.5,
            lat2: 45.5,
            false_easting: 0.0,
            false_northing: 0.0,
            scale_factor: 1.0,
            linear_unit: 1.0,
        }
    }
}

/// What kind of coordinate system a [`Crs`] is.
#[derive(Debug, Clone, PartialEq)]
pub enum CrsKind {
    /// Longitude/latitude in degrees on the given ellipsoid.
    Geographic { ellipsoid: Ellipsoid },
    /// Spherical (auxiliary sphere) Web Mercator.
    WebMercator,
    /// Albers Equal Area Conic.
    AlbersEqualArea(ConicParams),
    /// Lambert Conformal Conic (1SP or 2SP).
    LambertConformalConic(ConicParams),
    /// A system that could not be interpreted; only identity transforms apply.
    Custom { wkt: String },
}

/// A resolved coordinate reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    name: String,
    epsg: Option<u32>,
    kind: CrsKind,
}

impl Crs {
    /// Build a CRS from one of the built-in EPSG codes.
    pub fn from_code(code: CrsCode) -> Self {
        let (name, kind) = match code {
            CrsCode::Epsg4326 => (
                "WGS 84",
                CrsKind::Geographic {
                    ellipsoid: Ellipsoid::WGS84,
                },
            ),
            CrsCode::Epsg4269 => (
                "NAD83",
                CrsKind::Geographic {
                    ellipsoid: Ellipsoid::GRS80,
                },
            ),
            CrsCode::Epsg3857 => ("WGS 84 / Pseudo-Mercator", CrsKind::WebMercator),
            CrsCode::Epsg5070 => (
                "NAD83 / Conus Albers",
                CrsKind::AlbersEqualArea(ConicParams::conus_albers()),
            ),
        };
        Self {
            name: name.to_string(),
            epsg: Some(code.epsg()),
            kind,
        }
    }

    /// WGS84 geographic (EPSG:4326).
    pub fn wgs84() -> Self {
        Self::from_code(CrsCode::Epsg4326)
    }

    /// Resolve an EPSG code.
    pub fn epsg(code: u32) -> Result<Self> {
        CrsCode::from_epsg(code)
            .map(Self::from_code)
            .ok_or_else(|| ProjectionError::UnsupportedCrs(format!("EPSG:{}", code)))
    }

    /// Build a CRS directly from a kind, e.g. for programmatic grids.
    pub fn new(name: impl Into<String>, kind: CrsKind) -> Self {
        Self {
            name: name.into(),
            epsg: None,
            kind,
        }
    }

    /// Parse a user-supplied CRS string.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326" / "epsg:4326"
    /// - "CRS:84" (lon/lat WGS84)
    /// - "5070"
    /// - WKT text
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.contains('[') || trimmed.contains('(') {
            return Self::from_wkt(trimmed);
        }

        let upper = trimmed.to_uppercase();
        if upper == "CRS:84" || upper == "OGC:CRS84" {
            return Ok(Self::wgs84());
        }

        let code = upper
            .strip_prefix("EPSG:")
            .or_else(|| upper.strip_prefix("URN:OGC:DEF:CRS:EPSG::"))
            .unwrap_or(&upper);

        code.parse::<u32>()
            .map_err(|_| ProjectionError::UnsupportedCrs(trimmed.to_string()))
            .and_then(Self::epsg)
    }

    /// Resolve WKT (WKT1/ESRI or WKT2) text.
    ///
    /// Syntactically invalid WKT is an error; valid WKT describing an
    /// unsupported projection becomes [`CrsKind::Custom`].
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let root = WktNode::parse(wkt)?;
        let name = root.name().unwrap_or("unnamed").to_string();

        if let Some(code) = authority_code(&root).and_then(CrsCode::from_epsg) {
            return Ok(Self::from_code(code));
        }

        let kind = if root.is(&["GEOGCS", "GEOGCRS", "GEODCRS", "GEODETICCRS", "GEOGRAPHICCRS"]) {
            CrsKind::Geographic {
                ellipsoid: ellipsoid_of(&root).unwrap_or(Ellipsoid::WGS84),
            }
        } else if root.is(&["PROJCS", "PROJCRS", "PROJECTEDCRS"]) {
            projected_kind(&root, &name).unwrap_or_else(|| CrsKind::Custom {
                wkt: wkt.to_string(),
            })
        } else {
            CrsKind::Custom {
                wkt: wkt.to_string(),
            }
        };

        let epsg = match &kind {
            CrsKind::Geographic { ellipsoid } => geographic_epsg(&name, ellipsoid),
            CrsKind::WebMercator => Some(3857),
            CrsKind::AlbersEqualArea(p) if *p == ConicParams::conus_albers() => Some(5070),
            _ => None,
        };

        Ok(Self { name, epsg, kind })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epsg_code(&self) -> Option<u32> {
        self.epsg
    }

    pub fn kind(&self) -> &CrsKind {
        &self.kind
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self.kind, CrsKind::Geographic { .. })
    }

    /// Identifier used in logs, reports and output metadata.
    pub fn identifier(&self) -> String {
        match self.epsg {
            Some(code) => format!("EPSG:{}", code),
            None => self.name.clone(),
        }
    }

    /// True when coordinates in `self` need no transform to be in `other`.
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        match (self.epsg, other.epsg) {
            (Some(a), Some(b)) => a == b,
            _ => self.kind == other.kind,
        }
    }

    /// Stable key for transform caches.
    pub fn cache_key(&self) -> String {
        match self.epsg {
            Some(code) => format!("EPSG:{}", code),
            None => format!("{:?}", self.kind),
        }
    }

    /// ESRI-flavoured WKT suitable for a shapefile `.prj`.
    pub fn to_esri_wkt(&self) -> String {
        match &self.kind {
            CrsKind::Custom { wkt } => wkt.clone(),
            CrsKind::Geographic { ellipsoid } => match self.epsg {
                Some(4269) => geogcs("GCS_North_American_1983", "D_North_American_1983", "GRS_1980", ellipsoid),
                Some(4326) => geogcs("GCS_WGS_1984", "D_WGS_1984", "WGS_1984", ellipsoid),
                _ => geogcs(&format!("GCS_{}", esri_name(&self.name)), "D_Unknown", "Unknown", ellipsoid),
            },
            CrsKind::WebMercator => format!(
                "PROJCS[\"WGS_1984_Web_Mercator_Auxiliary_Sphere\",{},PROJECTION[\"Mercator_Auxiliary_Sphere\"],\
                 PARAMETER[\"False_Easting\",0.0],PARAMETER[\"False_Northing\",0.0],\
                 PARAMETER[\"Central_Meridian\",0.0],PARAMETER[\"Standard_Parallel_1\",0.0],\
                 PARAMETER[\"Auxiliary_Sphere_Type\",0.0],UNIT[\"Meter\",1.0]]",
                geogcs("GCS_WGS_1984", "D_WGS_1984", "WGS_1984", &Ellipsoid::WGS84)
            ),
            CrsKind::AlbersEqualArea(p) => {
                let name = if self.epsg == Some(5070) {
                    "NAD_1983_Contiguous_USA_Albers".to_string()
                } else {
                    esri_name(&self.name)
                };
                projcs(&name, "Albers", p, false)
            }
            CrsKind::LambertConformalConic(p) => {
                projcs(&esri_name(&self.name), "Lambert_Conformal_Conic", p, true)
            }
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Serialize for Crs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.identifier())
    }
}

fn esri_name(name: &str) -> String {
    name.replace([' ', '/', '-'], "_").replace("__", "_")
}

fn geogcs(name: &str, datum: &str, spheroid: &str, e: &Ellipsoid) -> String {
    format!(
        "GEOGCS[\"{}\",DATUM[\"{}\",SPHEROID[\"{}\",{:?},{:?}]],PRIMEM[\"Greenwich\",0.0],\
         UNIT[\"Degree\",0.0174532925199433]]",
        name, datum, spheroid, e.semi_major, e.inverse_flattening
    )
}

fn projcs(name: &str, method: &str, p: &ConicParams, with_scale: bool) -> String {
    let geog = if p.ellipsoid == Ellipsoid::GRS80 {
        geogcs("GCS_North_American_1983", "D_North_American_1983", "GRS_1980", &p.ellipsoid)
    } else if p.ellipsoid == Ellipsoid::WGS84 {
        geogcs("GCS_WGS_1984", "D_WGS_1984", "WGS_1984", &p.ellipsoid)
    } else {
        geogcs("GCS_Sphere", "D_Sphere", "Sphere", &p.ellipsoid)
    };
    let mut out = format!(
        "PROJCS[\"{}\",{},PROJECTION[\"{}\"],PARAMETER[\"False_Easting\",{:?}],\
         PARAMETER[\"False_Northing\",{:?}],PARAMETER[\"Central_Meridian\",{:?}],\
         PARAMETER[\"Standard_Parallel_1\",{:?}],PARAMETER[\"Standard_Parallel_2\",{:?}],",
        name, geog, method, p.false_easting, p.false_northing, p.lon0, p.lat1, p.lat2
    );
    if with_scale {
        out.push_str(&format!("PARAMETER[\"Scale_Factor\",{:?}],", p.scale_factor));
    }
    let unit = if p.linear_unit == 1.0 { "Meter" } else { "Unknown" };
    out.push_str(&format!(
        "PARAMETER[\"Latitude_Of_Origin\",{:?}],UNIT[\"{}\",{:?}]]",
        p.lat0, unit, p.linear_unit
    ));
    out
}

/// EPSG code from the root's AUTHORITY (WKT1) or ID (WKT2) node.
fn authority_code(root: &WktNode) -> Option<u32> {
    let node = root.child("AUTHORITY").or_else(|| root.child("ID"))?;
    if !node.name()?.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    node.values.iter().skip(1).find_map(|v| match v {
        WktValue::Text(s) => s.trim().parse().ok(),
        WktValue::Number(n) if *n >= 0.0 => Some(*n as u32),
        _ => None,
    })
}

fn ellipsoid_of(node: &WktNode) -> Option<Ellipsoid> {
    let spheroid = node.find_any(&["SPHEROID", "ELLIPSOID"])?;
    let a = spheroid.number(0)?;
    let inv_f = spheroid.number(1).unwrap_or(0.0);
    Some(Ellipsoid {
        semi_major: a,
        inverse_flattening: inv_f,
    })
}

fn geographic_epsg(name: &str, ellipsoid: &Ellipsoid) -> Option<u32> {
    let normalized = name.to_lowercase().replace(['_', ' '], "");
    if normalized.contains("wgs1984") || normalized.contains("wgs84") {
        (*ellipsoid == Ellipsoid::WGS84).then_some(4326)
    } else if normalized.contains("northamerican1983") || normalized.contains("nad83") {
        (*ellipsoid == Ellipsoid::GRS80).then_some(4269)
    } else {
        None
    }
}

fn normalize_param(name: &str) -> String {
    name.to_lowercase().replace([' ', '-'], "_")
}

/// Interpret a PROJCS/PROJCRS node.
fn projected_kind(root: &WktNode, name: &str) -> Option<CrsKind> {
    let method = root
        .child("PROJECTION")
        .or_else(|| root.child("CONVERSION").and_then(|c| c.child("METHOD")))
        .and_then(|n| n.name())
        .map(normalize_param)
        .unwrap_or_default();

    let lowered_name = name.to_lowercase();
    if method.contains("mercator_auxiliary_sphere")
        || method.contains("pseudo_mercator")
        || lowered_name.contains("web_mercator")
        || lowered_name.contains("pseudo-mercator")
    {
        return Some(CrsKind::WebMercator);
    }

    let is_albers = method.contains("albers");
    let is_lambert = method.contains("lambert_conformal_conic") || method.contains("lambert_conic_conformal");
    if !is_albers && !is_lambert {
        return None;
    }

    let ellipsoid = ellipsoid_of(root).unwrap_or(Ellipsoid::WGS84);
    let params: Vec<&WktNode> = match root.child("CONVERSION") {
        Some(conversion) => conversion.children("PARAMETER").collect(),
        None => root.children("PARAMETER").collect(),
    };

    let lookup = |keys: &[&str]| -> Option<f64> {
        params.iter().find_map(|p| {
            let pname = normalize_param(p.name()?);
            keys.iter().any(|k| pname == *k).then(|| p.number(0)).flatten()
        })
    };

    let lat0 = lookup(&[
        "latitude_of_origin",
        "latitude_of_center",
        "latitude_of_false_origin",
        "latitude_of_natural_origin",
    ])
    .unwrap_or(0.0);
    let lon0 = lookup(&[
        "central_meridian",
        "longitude_of_center",
        "longitude_of_origin",
        "longitude_of_false_origin",
        "longitude_of_natural_origin",
    ])
    .unwrap_or(0.0);
    let lat1 = lookup(&["standard_parallel_1", "latitude_of_1st_standard_parallel"]);
    let lat2 = lookup(&["standard_parallel_2", "latitude_of_2nd_standard_parallel"]);
    let (lat1, lat2) = match (lat1, lat2) {
        (Some(a), Some(b)) => (a, b),
        (Some(a), None) => (a, a),
        _ => (lat0, lat0),
    };

    let linear_unit = root
        .child("UNIT")
        .or_else(|| root.find_any(&["LENGTHUNIT"]))
        .and_then(|u| u.number(0))
        .unwrap_or(1.0);

    let conic = ConicParams {
        ellipsoid,
        lat0,
        lon0,
        lat1,
        lat2,
        false_easting: lookup(&["false_easting", "easting_at_false_origin"]).unwrap_or(0.0),
        false_northing: lookup(&["false_northing", "northing_at_false_origin"]).unwrap_or(0.0),
        scale_factor: lookup(&["scale_factor", "scale_factor_at_natural_origin"]).unwrap_or(1.0),
        linear_unit,
    };

    Some(if is_albers {
        CrsKind::AlbersEqualArea(conic)
    } else {
        CrsKind::LambertConformalConic(conic)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crs() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap().epsg_code(), Some(4326));
        assert_eq!(Crs::parse("epsg:3857").unwrap().epsg_code(), Some(3857));
        assert_eq!(Crs::parse("CRS:84").unwrap().epsg_code(), Some(4326));
        assert_eq!(Crs::parse("5070").unwrap().epsg_code(), Some(5070));
        assert!(Crs::parse("EPSG:99999").is_err());
        assert!(Crs::parse("not a crs").is_err());
    }

    #[test]
    fn test_esri_wgs84_prj() {
        let wkt = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        let crs = Crs::from_wkt(wkt).unwrap();
        assert!(crs.is_geographic());
        assert_eq!(crs.epsg_code(), Some(4326));
    }

    #[test]
    fn test_authority_overrides() {
        let wkt = r#"PROJCS["NAD83 / Conus Albers",GEOGCS["NAD83",DATUM["North_American_Datum_1983",SPHEROID["GRS 1980",6378137,298.257222101]]],PROJECTION["Albers_Conic_Equal_Area"],AUTHORITY["EPSG","5070"]]"#;
        let crs = Crs::from_wkt(wkt).unwrap();
        assert_eq!(crs.epsg_code(), Some(5070));
        assert_eq!(crs.kind(), &CrsKind::AlbersEqualArea(ConicParams::conus_albers()));
    }

    #[test]
    fn test_rtma_lambert_sphere() {
        let wkt = r#"PROJCS["LambertConformal_Projection",GEOGCS["Sphere",DATUM["unknown",SPHEROID["Sphere",6371200,0]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],PROJECTION["Lambert_Conformal_Conic_2SP"],PARAMETER["standard_parallel_1",25],PARAMETER["standard_parallel_2",25],PARAMETER["latitude_of_origin",25],PARAMETER["central_meridian",265],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["Meter",1]]"#;
        let crs = Crs::from_wkt(wkt).unwrap();
        match crs.kind() {
            CrsKind::LambertConformalConic(p) => {
                assert!(p.ellipsoid.is_sphere());
                assert_eq!(p.ellipsoid.semi_major, 6371200.0);
                assert_eq!(p.lat1, 25.0);
                assert_eq!(p.lon0, 265.0);
            }
            other => panic!("expected Lambert, got {:?}", other),
        }
        assert_eq!(crs.epsg_code(), None);
    }

    #[test]
    fn test_unknown_projection_is_custom() {
        let wkt = r#"PROJCS["Some_Polar",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]]],PROJECTION["Polar_Stereographic"]]"#;
        let crs = Crs::from_wkt(wkt).unwrap();
        assert!(matches!(crs.kind(), CrsKind::Custom { .. }));
        assert_eq!(crs.identifier(), "Some_Polar");
    }

    #[test]
    fn test_equivalence() {
        let a = Crs::parse("EPSG:4326").unwrap();
        let b = Crs::from_wkt(&a.to_esri_wkt()).unwrap();
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&Crs::parse("EPSG:4269").unwrap()));
    }

    #[test]
    fn test_esri_wkt_roundtrip_albers() {
        let crs = Crs::parse("EPSG:5070").unwrap();
        let reparsed = Crs::from_wkt(&crs.to_esri_wkt()).unwrap();
        assert_eq!(reparsed.epsg_code(), Some(5070));
    }
}
