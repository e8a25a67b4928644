//! High-level client API.

use crate::capability::{self, ServerCapabilities, ServerVersion};
use crate::connection::{Connection, ConnectionConfig, ConnectionState, ReconnectPolicy};
use crate::error::ClientError;
use crate::geo::{self, GeoCoord, GeoPoint, GeoRadiusEntry, GeoRadiusOptions, GeoUnit};
use parking_lot::RwLock;
use respline_protocol::{Command, IntoArg, Reply};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// One live connection and what it is known to support.
struct Session {
    conn: Arc<Connection>,
    caps: OnceCell<ServerCapabilities>,
}

impl Session {
    fn new(conn: Arc<Connection>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            caps: OnceCell::new(),
        })
    }

    async fn capabilities(&self) -> Result<&ServerCapabilities, ClientError> {
        self.caps
            .get_or_try_init(|| capability::probe(&self.conn, self.conn.config().geo_probe))
            .await
    }
}

/// High-level client for Redis-compatible servers.
///
/// Capabilities are probed at most once per connection. With a reconnect
/// policy, a command issued after the connection failed first opens a new
/// connection; the command that saw the failure is not retried.
pub struct Client {
    config: ConnectionConfig,
    session: RwLock<Arc<Session>>,
    reconnecting: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl Client {
    /// Connects to the server, probing capabilities if configured to.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let conn = Connection::connect(config.clone()).await?;
        let client = Self::from_parts(config, conn);
        if client.config.probe_on_connect {
            client.capabilities().await?;
        }
        Ok(client)
    }

    /// Wraps an existing connection. Reconnects, if enabled, go over TCP.
    pub fn from_connection(conn: Arc<Connection>) -> Self {
        Self::from_parts(conn.config().clone(), conn)
    }

    fn from_parts(config: ConnectionConfig, conn: Arc<Connection>) -> Self {
        Self {
            config,
            session: RwLock::new(Session::new(conn)),
            reconnecting: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns whether the current connection accepts commands.
    pub fn is_connected(&self) -> bool {
        self.session.read().conn.is_ready()
    }

    /// Returns the state of the current connection, or `Connecting` while a
    /// replacement connection is being established.
    pub fn state(&self) -> ConnectionState {
        if self.reconnecting.try_lock().is_err() {
            return ConnectionState::Connecting;
        }
        self.session.read().conn.state()
    }

    /// Returns the current connection.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.session.read().conn)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Gracefully closes the connection. No reconnect happens afterwards.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        let conn = self.connection();
        conn.disconnect().await
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Returns the live session, reconnecting first if the policy allows it.
    async fn session(&self) -> Result<Arc<Session>, ClientError> {
        let current = Arc::clone(&*self.session.read());
        if !needs_reconnect(&current) || self.closed.load(Ordering::SeqCst) {
            return Ok(current);
        }
        let Some(policy) = self.config.reconnect.clone() else {
            return Ok(current);
        };

        let _guard = self.reconnecting.lock().await;
        // Another caller may have reconnected while we waited
        let current = Arc::clone(&*self.session.read());
        if !needs_reconnect(&current) {
            return Ok(current);
        }

        let conn = self.reconnect(&policy).await?;
        let fresh = Session::new(conn);
        *self.session.write() = Arc::clone(&fresh);
        if self.config.probe_on_connect {
            fresh.capabilities().await?;
        }
        Ok(fresh)
    }

    async fn reconnect(&self, policy: &ReconnectPolicy) -> Result<Arc<Connection>, ClientError> {
        let addr = self.config.addr();
        let mut last_err = ClientError::NotConnected;

        for attempt in 1..=policy.max_attempts {
            match Connection::connect(self.config.clone()).await {
                Ok(conn) => {
                    tracing::info!("Reconnected to {} (attempt {})", addr, attempt);
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(
                        "Reconnect attempt {}/{} to {} failed: {}",
                        attempt,
                        policy.max_attempts,
                        addr,
                        e
                    );
                    last_err = e;
                }
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.backoff).await;
            }
        }
        Err(last_err)
    }

    /// Sends a command; error replies become `ClientError::Server`.
    async fn request(&self, command: Command) -> Result<Reply, ClientError> {
        let session = self.session().await?;
        server_reply(session.conn.send(command).await?)
    }

    /// Sends a geo command once the server is known to support it.
    async fn geo_request(&self, command: Command) -> Result<Reply, ClientError> {
        let session = self.session().await?;
        capability::require_geo(session.capabilities().await?)?;
        server_reply(session.conn.send(command).await?)
    }

    // =========================================================================
    // General commands
    // =========================================================================

    /// Sends any command and returns its raw reply, error replies included.
    pub async fn execute(&self, command: Command) -> Result<Reply, ClientError> {
        let session = self.session().await?;
        session.conn.send(command).await
    }

    /// Sends several commands back to back; replies come back in order, error
    /// replies in their own slots.
    pub async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, ClientError> {
        let session = self.session().await?;
        session.conn.pipeline(commands).await
    }

    /// Pings the server.
    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.request(Command::new("PING")).await? {
            Reply::Simple(ref s) if s == "PONG" => Ok(()),
            other => Err(ClientError::unexpected("PING", other)),
        }
    }

    /// Returns the raw `INFO` text, optionally for a single section.
    pub async fn info(&self, section: Option<&str>) -> Result<String, ClientError> {
        let mut command = Command::new("INFO");
        if let Some(section) = section {
            command.push_arg(section);
        }
        let reply = self.request(command).await?;
        if let Some(text) = reply.as_str() {
            return Ok(text.to_string());
        }
        Err(ClientError::unexpected("INFO", reply))
    }

    /// Deletes keys, returning how many existed.
    pub async fn del<I, A>(&self, keys: I) -> Result<i64, ClientError>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let reply = self.request(Command::new("DEL").args(keys)).await?;
        integer("DEL", reply)
    }

    /// Returns the number of members in a sorted set.
    pub async fn zcard(&self, key: &str) -> Result<i64, ClientError> {
        let reply = self.request(Command::new("ZCARD").arg(key)).await?;
        integer("ZCARD", reply)
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Returns the capabilities of the current connection, probing on first use.
    pub async fn capabilities(&self) -> Result<ServerCapabilities, ClientError> {
        let session = self.session().await?;
        let caps = session.capabilities().await?;
        Ok(caps.clone())
    }

    /// Returns the server version, `None` if it could not be determined.
    pub async fn server_version(&self) -> Result<Option<ServerVersion>, ClientError> {
        Ok(self.capabilities().await?.version)
    }

    /// Returns whether the server is at least `major.minor.patch`.
    pub async fn check_version(
        &self,
        major: u32,
        minor: u32,
        patch: u32,
    ) -> Result<bool, ClientError> {
        Ok(self.capabilities().await?.check_version(major, minor, patch))
    }

    // =========================================================================
    // Geo commands
    // =========================================================================

    /// Adds points to a geo set, returning how many members were new.
    pub async fn geoadd(&self, key: &str, points: &[GeoPoint]) -> Result<i64, ClientError> {
        let reply = self.geo_request(geo::geoadd(key, points)).await?;
        integer("GEOADD", reply)
    }

    /// Returns the geohash of each member, `None` for missing members.
    pub async fn geohash<I, A>(&self, key: &str, members: I) -> Result<Vec<Option<String>>, ClientError>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let reply = self.geo_request(geo::geohash(key, members)).await?;
        let decoded = geo::decode_hashes(&reply);
        decoded.ok_or_else(|| ClientError::unexpected("GEOHASH", reply))
    }

    /// Returns the position of each member, `None` for missing members.
    pub async fn geopos<I, A>(&self, key: &str, members: I) -> Result<Vec<Option<GeoCoord>>, ClientError>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let reply = self.geo_request(geo::geopos(key, members)).await?;
        let decoded = geo::decode_positions(&reply);
        decoded.ok_or_else(|| ClientError::unexpected("GEOPOS", reply))
    }

    /// Returns the distance between two members in `unit` (meters by
    /// default), `None` if either is missing.
    pub async fn geodist(
        &self,
        key: &str,
        member1: &str,
        member2: &str,
        unit: Option<GeoUnit>,
    ) -> Result<Option<f64>, ClientError> {
        let reply = self.geo_request(geo::geodist(key, member1, member2)).await?;
        let decoded = geo::decode_distance(&reply, unit.unwrap_or_default());
        decoded.ok_or_else(|| ClientError::unexpected("GEODIST", reply))
    }

    /// Returns the members within `radius` of a position.
    pub async fn georadius(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        radius: f64,
        unit: GeoUnit,
        options: &GeoRadiusOptions,
    ) -> Result<Vec<GeoRadiusEntry>, ClientError> {
        let command = geo::georadius(key, longitude, latitude, radius, unit, options);
        let reply = self.geo_request(command).await?;
        let decoded = geo::decode_radius(&reply, options);
        decoded.ok_or_else(|| ClientError::unexpected("GEORADIUS", reply))
    }

    /// Returns the members within `radius` of another member.
    pub async fn georadiusbymember(
        &self,
        key: &str,
        member: &str,
        radius: f64,
        unit: GeoUnit,
        options: &GeoRadiusOptions,
    ) -> Result<Vec<GeoRadiusEntry>, ClientError> {
        let command = geo::georadiusbymember(key, member, radius, unit, options);
        let reply = self.geo_request(command).await?;
        let decoded = geo::decode_radius(&reply, options);
        decoded.ok_or_else(|| ClientError::unexpected("GEORADIUSBYMEMBER", reply))
    }
}

fn needs_reconnect(session: &Session) -> bool {
    matches!(
        session.conn.state(),
        ConnectionState::Failed | ConnectionState::Closed
    )
}

fn server_reply(reply: Reply) -> Result<Reply, ClientError> {
    match reply {
        Reply::Error(text) => Err(ClientError::from_error_reply(&text)),
        other => Ok(other),
    }
}

fn integer(command: &str, reply: Reply) -> Result<i64, ClientError> {
    match reply {
        Reply::Integer(n) => Ok(n),
        other => Err(ClientError::unexpected(command, other)),
    }
}
