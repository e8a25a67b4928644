//! Server capability probing and gating.
//!
//! Capabilities are probed once per connection through the ordinary send
//! path and cached by the client. Each gate is a plain predicate over the
//! cached `ServerCapabilities`, consulted before a command is sent.

use crate::connection::Connection;
use crate::error::ClientError;
use respline_protocol::{Command, Reply};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// First server release that ships the geo command family.
pub const GEO_MIN_VERSION: ServerVersion = ServerVersion::new(3, 2, 0);

/// Coordinates written by the live geo probe.
const PROBE_POINT: (f64, f64, &str) = (13.361389, 38.115556, "Palermo");

/// A `major.minor.patch` server version, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `major.minor[.patch]`; a missing patch is 0.
    ///
    /// Returns `None` for anything else, which callers treat as older than
    /// every required version.
    pub fn parse(text: &str) -> Option<Self> {
        let parts = text
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        match parts.as_slice() {
            [major, minor] => Some(Self::new(*major, *minor, 0)),
            [major, minor, patch, ..] => Some(Self::new(*major, *minor, *patch)),
            _ => None,
        }
    }

    /// Returns whether this version is at least `min`.
    pub fn satisfies(&self, min: ServerVersion) -> bool {
        *self >= min
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How geo command support is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoProbe {
    /// Run a real GEOADD against a disposable key.
    #[default]
    Live,
    /// Compare the server version against `GEO_MIN_VERSION`; sends nothing.
    Version,
}

impl FromStr for GeoProbe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(GeoProbe::Live),
            "version" => Ok(GeoProbe::Version),
            other => Err(format!("unknown geo probe strategy: {}", other)),
        }
    }
}

/// What the connected server is known to support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerCapabilities {
    /// `None` when the version could not be determined.
    pub version: Option<ServerVersion>,
    pub geo_supported: bool,
}

impl ServerCapabilities {
    pub fn version_major(&self) -> Option<u32> {
        self.version.map(|v| v.major)
    }

    pub fn version_minor(&self) -> Option<u32> {
        self.version.map(|v| v.minor)
    }

    pub fn version_patch(&self) -> Option<u32> {
        self.version.map(|v| v.patch)
    }

    /// Returns whether the server is at least `major.minor.patch`.
    /// An unknown version never qualifies.
    pub fn check_version(&self, major: u32, minor: u32, patch: u32) -> bool {
        self.version
            .map(|v| v.satisfies(ServerVersion::new(major, minor, patch)))
            .unwrap_or(false)
    }
}

/// Gate: fails unless the server version is at least `min`.
pub fn require_version(caps: &ServerCapabilities, min: ServerVersion) -> Result<(), ClientError> {
    match caps.version {
        Some(v) if v.satisfies(min) => Ok(()),
        Some(v) => Err(ClientError::Capability(format!(
            "server version {} is older than {}",
            v, min
        ))),
        None => Err(ClientError::Capability(format!(
            "server version unknown, {} required",
            min
        ))),
    }
}

/// Gate: fails unless the server supports the geo commands.
pub fn require_geo(caps: &ServerCapabilities) -> Result<(), ClientError> {
    if caps.geo_supported {
        Ok(())
    } else {
        Err(ClientError::Capability(
            "server does not support GEO commands".to_string(),
        ))
    }
}

/// Parses `INFO` output into its `key:value` fields, skipping section headers.
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Reads `redis_version` from `INFO server`.
///
/// A missing field, an error reply or a malformed version all yield `None`.
pub async fn probe_version(conn: &Connection) -> Result<Option<ServerVersion>, ClientError> {
    let reply = conn.send(Command::new("INFO").arg("server")).await?;
    let text = match reply {
        Reply::Error(e) => {
            tracing::debug!("INFO rejected by {}: {}", conn.peer(), e);
            return Ok(None);
        }
        other => match other.into_string() {
            Some(text) => text,
            None => return Ok(None),
        },
    };

    let version = parse_info(&text)
        .get("redis_version")
        .and_then(|v| ServerVersion::parse(v));
    tracing::debug!("Server {} reports version {:?}", conn.peer(), version);
    Ok(version)
}

/// Detects geo support by adding a point to a throwaway key.
///
/// Only an "unknown command" error means unsupported. The key is deleted
/// afterwards whatever happened; a failed delete is ignored.
pub async fn probe_geo_support(conn: &Connection) -> Result<bool, ClientError> {
    let key = format!("__respline:geo-probe:{}", Uuid::new_v4());
    let (longitude, latitude, member) = PROBE_POINT;

    let outcome = conn
        .send(
            Command::new("GEOADD")
                .arg(&key)
                .arg(longitude)
                .arg(latitude)
                .arg(member),
        )
        .await;

    if let Err(e) = conn.send(Command::new("DEL").arg(&key)).await {
        tracing::debug!("Could not remove geo probe key {}: {}", key, e);
    }

    let supported = match outcome? {
        Reply::Error(text) => !ClientError::from_error_reply(&text).is_unknown_command(),
        _ => true,
    };
    tracing::debug!("Server {} geo support: {}", conn.peer(), supported);
    Ok(supported)
}

/// Runs every probe for a fresh connection.
pub async fn probe(conn: &Connection, strategy: GeoProbe) -> Result<ServerCapabilities, ClientError> {
    let version = probe_version(conn).await?;
    let geo_supported = match strategy {
        GeoProbe::Live => probe_geo_support(conn).await?,
        GeoProbe::Version => version.map(|v| v.satisfies(GEO_MIN_VERSION)).unwrap_or(false),
    };
    Ok(ServerCapabilities {
        version,
        geo_supported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::testing::{info_reply, FakeServer, Respond};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn caps(version: Option<ServerVersion>, geo_supported: bool) -> ServerCapabilities {
        ServerCapabilities {
            version,
            geo_supported,
        }
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(ServerVersion::parse("7.2.4"), Some(ServerVersion::new(7, 2, 4)));
        assert_eq!(ServerVersion::parse("2.6"), Some(ServerVersion::new(2, 6, 0)));
        assert_eq!(ServerVersion::parse("6.0.9.1"), Some(ServerVersion::new(6, 0, 9)));
        assert_eq!(ServerVersion::parse("7"), None);
        assert_eq!(ServerVersion::parse("7.x.1"), None);
        assert_eq!(ServerVersion::parse("7.2.4-rc1"), None);
        assert_eq!(ServerVersion::parse(""), None);
    }

    #[test]
    fn test_version_ordering() {
        let min = ServerVersion::parse("2.6").unwrap();
        assert!(ServerVersion::new(2, 6, 0).satisfies(min));
        assert!(ServerVersion::new(2, 6, 1).satisfies(min));
        assert!(ServerVersion::new(3, 0, 0).satisfies(min));
        assert!(!ServerVersion::new(2, 5, 9).satisfies(min));
        assert!(!ServerVersion::new(1, 9, 9).satisfies(min));
        assert_eq!(ServerVersion::new(2, 6, 0).to_string(), "2.6.0");
    }

    #[test]
    fn test_check_version() {
        let known = caps(Some(ServerVersion::new(2, 6, 0)), false);
        assert!(known.check_version(2, 6, 0));
        assert!(!known.check_version(2, 6, 1));
        assert_eq!(known.version_major(), Some(2));
        assert_eq!(known.version_minor(), Some(6));
        assert_eq!(known.version_patch(), Some(0));

        let unknown = caps(None, true);
        assert!(!unknown.check_version(0, 0, 0));
        assert_eq!(unknown.version_major(), None);
    }

    #[test]
    fn test_gates() {
        let old = caps(Some(ServerVersion::new(2, 5, 9)), false);
        assert!(matches!(
            require_version(&old, ServerVersion::new(2, 6, 0)),
            Err(ClientError::Capability(_))
        ));
        assert!(matches!(require_geo(&old), Err(ClientError::Capability(_))));

        let new = caps(Some(ServerVersion::new(7, 0, 0)), true);
        assert!(require_version(&new, ServerVersion::new(2, 6, 0)).is_ok());
        assert!(require_geo(&new).is_ok());

        let unknown = caps(None, true);
        assert!(require_version(&unknown, ServerVersion::new(1, 0, 0)).is_err());
    }

    #[test]
    fn test_parse_info() {
        let info = parse_info("# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n\r\n");
        assert_eq!(info.get("redis_version").map(String::as_str), Some("7.2.4"));
        assert_eq!(info.get("redis_mode").map(String::as_str), Some("standalone"));
        assert_eq!(info.len(), 2);
    }

    #[test]
    fn test_geo_probe_from_str() {
        assert_eq!("live".parse::<GeoProbe>(), Ok(GeoProbe::Live));
        assert_eq!("VERSION".parse::<GeoProbe>(), Ok(GeoProbe::Version));
        assert!("static".parse::<GeoProbe>().is_err());
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("fake", 6379)
    }

    #[tokio::test]
    async fn test_probe_version_from_info() {
        let conn = FakeServer::new(|args| match args[0].as_str() {
            "INFO" => info_reply("6.2"),
            _ => Respond::raw(b"-ERR unexpected\r\n"),
        })
        .connect(config());

        let version = probe_version(&conn).await.unwrap();
        assert_eq!(version, Some(ServerVersion::new(6, 2, 0)));
    }

    #[tokio::test]
    async fn test_probe_version_unknown() {
        let conn = FakeServer::new(|args| match args[0].as_str() {
            "INFO" if args.len() > 1 => Respond::reply(Reply::bulk("# Server\r\nuptime:5\r\n")),
            _ => Respond::raw(b"-ERR unknown command 'INFO'\r\n"),
        })
        .connect(config());
        assert_eq!(probe_version(&conn).await.unwrap(), None);

        let conn = FakeServer::new(|_| Respond::raw(b"-ERR unknown command 'INFO'\r\n"))
            .connect(config());
        assert_eq!(probe_version(&conn).await.unwrap(), None);

        let conn = FakeServer::new(|_| info_reply("banana")).connect(config());
        assert_eq!(probe_version(&conn).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_live_geo_probe_supported_and_cleans_up() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let conn = FakeServer::new(move |args| {
            log.lock().push(args.to_vec());
            match args[0].as_str() {
                "GEOADD" => Respond::raw(b":1\r\n"),
                "DEL" => Respond::raw(b":1\r\n"),
                _ => Respond::raw(b"-ERR unexpected\r\n"),
            }
        })
        .connect(config());

        assert!(probe_geo_support(&conn).await.unwrap());

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0][0], "GEOADD");
        assert!(seen[0][1].starts_with("__respline:geo-probe:"));
        assert_eq!(seen[0][4], "Palermo");
        assert_eq!(seen[1], vec!["DEL".to_string(), seen[0][1].clone()]);
    }

    #[tokio::test]
    async fn test_live_geo_probe_unknown_command() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let conn = FakeServer::new(move |args| {
            log.lock().push(args[0].clone());
            match args[0].as_str() {
                "GEOADD" => Respond::raw(
                    b"-ERR unknown command 'GEOADD', with args beginning with: \r\n",
                ),
                _ => Respond::raw(b":0\r\n"),
            }
        })
        .connect(config());

        assert!(!probe_geo_support(&conn).await.unwrap());
        // Cleanup runs even when the probe failed
        assert_eq!(*seen.lock(), vec!["GEOADD".to_string(), "DEL".to_string()]);
    }

    #[tokio::test]
    async fn test_live_geo_probe_other_error_counts_as_supported() {
        let conn = FakeServer::new(|args| match args[0].as_str() {
            "GEOADD" => Respond::raw(b"-WRONGTYPE Operation against a key\r\n"),
            _ => Respond::raw(b"-ERR cleanup refused\r\n"),
        })
        .connect(config());

        assert!(probe_geo_support(&conn).await.unwrap());
    }

    #[tokio::test]
    async fn test_version_strategy_sends_no_geo_command() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let conn = FakeServer::new(move |args| {
            log.lock().push(args[0].clone());
            info_reply("3.0.7")
        })
        .connect(config());

        let caps = probe(&conn, GeoProbe::Version).await.unwrap();
        assert_eq!(caps.version, Some(ServerVersion::new(3, 0, 7)));
        assert!(!caps.geo_supported);
        assert_eq!(*seen.lock(), vec!["INFO".to_string()]);
    }

    #[tokio::test]
    async fn test_version_strategy_new_server() {
        let conn = FakeServer::new(|_| info_reply("3.2.0")).connect(config());
        let caps = probe(&conn, GeoProbe::Version).await.unwrap();
        assert!(caps.geo_supported);
    }
}
