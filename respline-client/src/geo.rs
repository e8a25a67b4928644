//! Geo command family.
//!
//! Builders turn typed arguments into `Command`s; decoders turn the server's
//! reply shapes back into typed results. Decoders return `None` when a reply
//! does not have the expected shape, and the client reports the whole reply.

use respline_protocol::{Command, IntoArg, Reply};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const METERS_PER_KM: f64 = 1000.0;
const METERS_PER_MILE: f64 = 1609.34;
const METERS_PER_FOOT: f64 = 0.3048;

/// Distance unit accepted by the geo commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoUnit {
    #[default]
    M,
    Km,
    Mi,
    Ft,
}

impl GeoUnit {
    /// Wire token for the unit.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoUnit::M => "m",
            GeoUnit::Km => "km",
            GeoUnit::Mi => "mi",
            GeoUnit::Ft => "ft",
        }
    }

    /// Converts a distance in meters into this unit.
    pub fn from_meters(&self, meters: f64) -> f64 {
        match self {
            GeoUnit::M => meters,
            GeoUnit::Km => meters / METERS_PER_KM,
            GeoUnit::Mi => meters / METERS_PER_MILE,
            GeoUnit::Ft => meters / METERS_PER_FOOT,
        }
    }
}

impl fmt::Display for GeoUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeoUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m" => Ok(GeoUnit::M),
            "km" => Ok(GeoUnit::Km),
            "mi" => Ok(GeoUnit::Mi),
            "ft" => Ok(GeoUnit::Ft),
            other => Err(format!("unsupported unit provided: {}", other)),
        }
    }
}

/// A member and its position; GEOADD input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub member: String,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64, member: impl Into<String>) -> Self {
        Self {
            longitude,
            latitude,
            member: member.into(),
        }
    }
}

/// A position without a member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoCoord {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortOrder::Asc),
            "DESC" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Optional GEORADIUS / GEORADIUSBYMEMBER arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoRadiusOptions {
    pub with_dist: bool,
    pub with_coord: bool,
    pub with_hash: bool,
    pub count: Option<u64>,
    pub order: Option<SortOrder>,
}

impl GeoRadiusOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dist(mut self) -> Self {
        self.with_dist = true;
        self
    }

    pub fn with_coord(mut self) -> Self {
        self.with_coord = true;
        self
    }

    pub fn with_hash(mut self) -> Self {
        self.with_hash = true;
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    fn has_fields(&self) -> bool {
        self.with_dist || self.with_coord || self.with_hash
    }

    fn append_to(&self, mut command: Command) -> Command {
        if self.with_dist {
            command.push_arg("WITHDIST");
        }
        if self.with_coord {
            command.push_arg("WITHCOORD");
        }
        if self.with_hash {
            command.push_arg("WITHHASH");
        }
        if let Some(count) = self.count {
            command.push_arg("COUNT");
            command.push_arg(count);
        }
        if let Some(order) = self.order {
            command.push_arg(order.as_str());
        }
        command
    }
}

/// One GEORADIUS result. Fields not requested are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoRadiusEntry {
    pub member: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coord: Option<GeoCoord>,
}

// ---------------------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------------------

pub fn geoadd(key: impl IntoArg, points: &[GeoPoint]) -> Command {
    let mut command = Command::new("GEOADD").arg(key);
    for point in points {
        command.push_arg(point.longitude);
        command.push_arg(point.latitude);
        command.push_arg(point.member.as_str());
    }
    command
}

pub fn geohash<I, A>(key: impl IntoArg, members: I) -> Command
where
    I: IntoIterator<Item = A>,
    A: IntoArg,
{
    Command::new("GEOHASH").arg(key).args(members)
}

pub fn geopos<I, A>(key: impl IntoArg, members: I) -> Command
where
    I: IntoIterator<Item = A>,
    A: IntoArg,
{
    Command::new("GEOPOS").arg(key).args(members)
}

/// GEODIST is always asked for meters; see `GeoUnit::from_meters`.
pub fn geodist(key: impl IntoArg, member1: impl IntoArg, member2: impl IntoArg) -> Command {
    Command::new("GEODIST")
        .arg(key)
        .arg(member1)
        .arg(member2)
        .arg(GeoUnit::M.as_str())
}

pub fn georadius(
    key: impl IntoArg,
    longitude: f64,
    latitude: f64,
    radius: f64,
    unit: GeoUnit,
    options: &GeoRadiusOptions,
) -> Command {
    let command = Command::new("GEORADIUS")
        .arg(key)
        .arg(longitude)
        .arg(latitude)
        .arg(radius)
        .arg(unit.as_str());
    options.append_to(command)
}

pub fn georadiusbymember(
    key: impl IntoArg,
    member: impl IntoArg,
    radius: f64,
    unit: GeoUnit,
    options: &GeoRadiusOptions,
) -> Command {
    let command = Command::new("GEORADIUSBYMEMBER")
        .arg(key)
        .arg(member)
        .arg(radius)
        .arg(unit.as_str());
    options.append_to(command)
}

// ---------------------------------------------------------------------------
// Reply decoders
// ---------------------------------------------------------------------------

/// GEOHASH: one string per member, `None` for missing members.
pub fn decode_hashes(reply: &Reply) -> Option<Vec<Option<String>>> {
    array(reply)?
        .iter()
        .map(|item| match item {
            Reply::Bulk(None) => Some(None),
            other => other.as_str().map(|s| Some(s.to_string())),
        })
        .collect()
}

/// GEOPOS: one `[lon, lat]` pair per member, null for missing members.
pub fn decode_positions(reply: &Reply) -> Option<Vec<Option<GeoCoord>>> {
    array(reply)?
        .iter()
        .map(|item| {
            if item.is_null() {
                Some(None)
            } else {
                coord(item).map(Some)
            }
        })
        .collect()
}

/// GEODIST: a distance in meters, converted to `unit`; null if a member is missing.
pub fn decode_distance(reply: &Reply, unit: GeoUnit) -> Option<Option<f64>> {
    match reply {
        Reply::Bulk(None) => Some(None),
        other => float(other).map(|meters| Some(unit.from_meters(meters))),
    }
}

/// GEORADIUS / GEORADIUSBYMEMBER entries, decoded by the flags that were sent.
///
/// Each entry is a bare member, or `[member, dist?, hash?, coord?]` in that
/// fixed order when any field was requested.
pub fn decode_radius(reply: &Reply, options: &GeoRadiusOptions) -> Option<Vec<GeoRadiusEntry>> {
    array(reply)?
        .iter()
        .map(|item| radius_entry(item, options))
        .collect()
}

fn radius_entry(item: &Reply, options: &GeoRadiusOptions) -> Option<GeoRadiusEntry> {
    if !options.has_fields() {
        return Some(GeoRadiusEntry {
            member: item.as_str()?.to_string(),
            dist: None,
            hash: None,
            coord: None,
        });
    }

    let mut fields = array(item)?.iter();
    let member = fields.next()?.as_str()?.to_string();
    let dist = if options.with_dist {
        Some(float(fields.next()?)?)
    } else {
        None
    };
    let hash = if options.with_hash {
        Some(fields.next()?.as_integer()?)
    } else {
        None
    };
    let coord = if options.with_coord {
        Some(coord(fields.next()?)?)
    } else {
        None
    };
    if fields.next().is_some() {
        return None;
    }

    Some(GeoRadiusEntry {
        member,
        dist,
        hash,
        coord,
    })
}

fn array(reply: &Reply) -> Option<&[Reply]> {
    match reply {
        Reply::Array(Some(items)) => Some(items.as_slice()),
        _ => None,
    }
}

fn float(reply: &Reply) -> Option<f64> {
    reply.as_str()?.parse().ok()
}

fn coord(reply: &Reply) -> Option<GeoCoord> {
    match array(reply)? {
        [longitude, latitude] => Some(GeoCoord {
            longitude: float(longitude)?,
            latitude: float(latitude)?,
        }),
        _ => None,
    }
}
