//! The session manager: a registry of named connections stepped in lockstep.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use rfb_client::Event;
//! use vnc_driver::{DriverConfig, SessionManager};
//!
//! # async fn example() -> Result<(), vnc_driver::DriverError> {
//! let session = SessionManager::new(DriverConfig::default());
//! session.connect("c1", "127.0.0.1:5900", "tight", Vec::new()).await?;
//!
//! let mut events = HashMap::new();
//! events.insert("c1".to_string(), vec![Event::key(0xff0d, true), Event::key(0xff0d, false)]);
//! let result = session.step(events).await;
//! if let Some(err) = result.errors.get("c1") {
//!     eprintln!("c1: {}", err);
//! }
//! session.close_all().await;
//! # Ok(())
//! # }
//! ```

use crate::config::DriverConfig;
use crate::dispatcher::{Dispatcher, Job};
use crate::errors::DriverError;
use crate::observation::StepResult;
use crate::profile::Profiler;
use crate::sink::{NullSink, PresentationSink};
use futures::future::join_all;
use parking_lot::Mutex;
use rfb_client::{Config, Connection, ConnectionBuilder, Encoding, Event, Rect, RfbClientError};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Port used when an address names only a host.
pub const DEFAULT_PORT: u16 = 5900;

/// Everything `connect_with` accepts. Unset fields fall back to the
/// driver's `connection_defaults`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// `host:port`, `host::port`, `[v6]:port` or a bare host.
    pub address: String,
    /// `"tight"`, `"zrle"`, `"raw"`, or empty for the configured default.
    pub encoding: Option<String>,
    /// VNC password.
    pub password: Option<String>,
    /// JPEG quality level, 0-9.
    pub quality: Option<i32>,
    /// Zlib compression level, 0-9.
    pub compress: Option<i32>,
    /// Fine-grained JPEG quality, 0-100.
    pub fine_quality: Option<i32>,
    /// Chroma subsampling level, 0-5.
    pub subsample: Option<i32>,
    /// How long to keep retrying an unreachable server.
    pub start_timeout: Option<Duration>,
    /// Regions to request; empty means the full frame.
    pub subscription: Vec<Rect>,
}

impl ConnectOptions {
    /// Options for `address` with everything else defaulted.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Set the encoding name.
    #[must_use]
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Set the VNC password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set quality, compression, fine quality and subsampling levels.
    #[must_use]
    pub fn levels(mut self, quality: i32, compress: i32, fine_quality: i32, subsample: i32) -> Self {
        self.quality = Some(quality);
        self.compress = Some(compress);
        self.fine_quality = Some(fine_quality);
        self.subsample = Some(subsample);
        self
    }

    /// Keep retrying a refused connect for up to `start_timeout`.
    #[must_use]
    pub fn start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = Some(start_timeout);
        self
    }

    /// Set the regions to request.
    #[must_use]
    pub fn subscription(mut self, regions: Vec<Rect>) -> Self {
        self.subscription = regions;
        self
    }
}

/// Split an address into host and port. Both `host:port` and `host::port`
/// give a literal TCP port.
pub fn parse_address(address: &str) -> Result<(String, u16), DriverError> {
    let invalid = |why: &str| DriverError::Connect(format!("invalid address '{}': {}", address, why));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(invalid("expected ':' after ']'")),
        }
    } else if let Some((host, port)) = address.split_once("::") {
        (host, Some(port))
    } else if let Some((host, port)) = address.rsplit_once(':') {
        (host, Some(port))
    } else {
        (address, None)
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| invalid("bad port"))?,
        None => DEFAULT_PORT,
    };
    if port == 0 {
        return Err(invalid("port 0"));
    }
    Ok((host.to_string(), port))
}

#[derive(Default)]
struct Registry {
    live: HashMap<String, Arc<Connection>>,
    /// Names with a connect in flight.
    connecting: HashSet<String>,
}

/// Holds a name in `connecting` until dropped.
struct Reservation<'a> {
    registry: &'a Mutex<Registry>,
    name: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.lock().connecting.remove(&self.name);
    }
}

/// Owns every connection of one driver instance.
///
/// All methods take `&self`; the registry lock is never held across an
/// await. Dropping the manager aborts every receive task and releases every
/// transport.
pub struct SessionManager {
    config: DriverConfig,
    registry: Mutex<Registry>,
    dispatcher: Dispatcher,
    sink: Box<dyn PresentationSink>,
    profiler: Mutex<Option<Profiler>>,
}

impl SessionManager {
    /// Manager that discards rendered frames.
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self::with_sink(config, Box::new(NullSink))
    }

    /// Manager that hands rendered frames to `sink`.
    #[must_use]
    pub fn with_sink(config: DriverConfig, sink: Box<dyn PresentationSink>) -> Self {
        let dispatcher = Dispatcher::new(config.dispatch.max_parallel, config.step_timeout());
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            dispatcher,
            sink,
            profiler: Mutex::new(None),
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Names of live connections, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().live.keys().cloned().collect();
        names.sort();
        names
    }

    /// True if `name` has a live connection.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registry.lock().live.contains_key(name)
    }

    /// Connect `name` to `address`. `encoding` is `"tight"`, `"zrle"`, `"raw"` or empty.
    ///
    /// On failure nothing is registered.
    pub async fn connect(
        &self,
        name: &str,
        address: &str,
        encoding: &str,
        subscription: Vec<Rect>,
    ) -> Result<(), DriverError> {
        let options = ConnectOptions::new(address)
            .encoding(encoding)
            .subscription(subscription);
        self.connect_with(name, options).await
    }

    /// Connect with the full option set.
    pub async fn connect_with(&self, name: &str, options: ConnectOptions) -> Result<(), DriverError> {
        let started = Instant::now();
        let result = self.open(name, options).await;
        self.record("connect", started.elapsed());
        if let Err(err) = &result {
            tracing::warn!("connect {} failed: {}", name, err);
        }
        result
    }

    async fn open(&self, name: &str, options: ConnectOptions) -> Result<(), DriverError> {
        let _reservation = self.reserve(name)?;
        let (host, port) = parse_address(&options.address)?;
        let config = self
            .client_config(host, port, &options)
            .map_err(|e| DriverError::Connect(e.to_string()))?;

        let connection = ConnectionBuilder::new(config)
            .name(name)
            .subscription(options.subscription)
            .build()
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;

        let (width, height) = connection.dimensions();
        tracing::info!(
            "[{}] connected to '{}' ({}x{})",
            connection.label(),
            connection.desktop_name(),
            width,
            height
        );
        self.registry
            .lock()
            .live
            .insert(name.to_string(), Arc::new(connection));
        Ok(())
    }

    fn reserve(&self, name: &str) -> Result<Reservation<'_>, DriverError> {
        let mut registry = self.registry.lock();
        if registry.live.contains_key(name) || registry.connecting.contains(name) {
            return Err(DriverError::Connect(format!(
                "connection name '{}' is already in use",
                name
            )));
        }
        registry.connecting.insert(name.to_string());
        Ok(Reservation {
            registry: &self.registry,
            name: name.to_string(),
        })
    }

    fn client_config(
        &self,
        host: String,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<Config, RfbClientError> {
        let defaults = &self.config.connection_defaults;
        let encoding = match options.encoding.as_deref().filter(|e| !e.is_empty()) {
            Some(requested) => requested.parse::<Encoding>()?,
            None => defaults.display.encoding,
        };
        let start_timeout = options
            .start_timeout
            .unwrap_or(Duration::from_millis(defaults.start_timeout_ms));

        Config::builder()
            .host(host)
            .port(port)
            .password(options.password.clone().unwrap_or_else(|| defaults.password.clone()))
            .encoding(encoding)
            .levels(
                options.quality.unwrap_or(defaults.display.quality),
                options.compress.unwrap_or(defaults.display.compress),
                options.fine_quality.unwrap_or(defaults.display.fine_quality),
                options.subsample.unwrap_or(defaults.display.subsample),
            )
            .timeout(Duration::from_millis(defaults.timeout_ms))
            .start_timeout(start_timeout)
            .updates(defaults.updates.clone())
            .build()
    }

    fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.registry.lock().live.get(name).cloned()
    }

    /// Send each connection its events and collect snapshots, counters and
    /// errors. Names without a live connection get a usage error. A
    /// connection found dead reports its error here once and is then removed.
    pub async fn step(&self, events: HashMap<String, Vec<Event>>) -> StepResult {
        let started = Instant::now();
        let mut result = StepResult::default();

        let jobs: Vec<Job> = {
            let registry = self.registry.lock();
            events
                .into_iter()
                .filter_map(|(name, events)| match registry.live.get(&name) {
                    Some(connection) => Some(Job {
                        connection: connection.clone(),
                        name,
                        events,
                    }),
                    None => {
                        result.errors.insert(name.clone(), DriverError::unknown(&name).report());
                        None
                    }
                })
                .collect()
        };

        let mut retired = Vec::new();
        for (job, outcome) in self.dispatcher.run(jobs).await {
            if let Some(snapshot) = outcome.snapshot {
                result.absorb(&job.name, snapshot);
            }
            if let Some(err) = outcome.error {
                tracing::warn!("[{}] {}", job.connection.label(), err);
                result.errors.insert(job.name.clone(), err.report());
            }
            if outcome.finished {
                retired.push(job);
            }
        }
        for job in retired {
            self.retire(&job.name, &job.connection).await;
        }

        self.record("step", started.elapsed());
        result
    }

    /// Remove `connection` if it is still the one registered under `name`,
    /// then release it.
    async fn retire(&self, name: &str, connection: &Arc<Connection>) {
        {
            let mut registry = self.registry.lock();
            if registry
                .live
                .get(name)
                .is_some_and(|current| Arc::ptr_eq(current, connection))
            {
                registry.live.remove(name);
            }
        }
        connection.close().await;
        tracing::info!("[{}] removed after failure", connection.label());
    }

    /// Replace a connection's subscription and request the new regions.
    pub async fn update(&self, name: &str, regions: Vec<Rect>) -> Result<(), DriverError> {
        let connection = self.get(name).ok_or_else(|| DriverError::unknown(name))?;
        connection
            .update_subscription(regions)
            .await
            .map_err(|err| match err {
                RfbClientError::ConnectionClosed => {
                    DriverError::Usage(format!("connection '{}' is closed", name))
                }
                other => DriverError::from_client(&other),
            })
    }

    /// Copy a connection's current frame to the presentation sink. Unknown
    /// names only log a warning.
    pub fn render(&self, name: &str) {
        let started = Instant::now();
        match self.get(name) {
            Some(connection) => {
                let frame = connection.frame();
                if let Err(err) = self.sink.present(name, &frame) {
                    tracing::warn!("[{}] render failed: {:#}", connection.label(), err);
                }
            }
            None => tracing::warn!("render: no connection named '{}'", name),
        }
        self.record("render", started.elapsed());
    }

    /// Close and forget `name`. Unknown names are ignored.
    pub async fn close(&self, name: &str) {
        let removed = self.registry.lock().live.remove(name);
        if let Some(connection) = removed {
            connection.close().await;
        }
    }

    /// Close every connection.
    pub async fn close_all(&self) {
        let all: Vec<Arc<Connection>> = self.registry.lock().live.drain().map(|(_, c)| c).collect();
        join_all(all.iter().map(|c| c.close())).await;
    }

    /// Begin collecting operation timings; `end_profile` writes them to
    /// `path`.
    pub fn start_profile(&self, path: impl Into<PathBuf>) -> Result<(), DriverError> {
        let mut profiler = self.profiler.lock();
        if let Some(active) = profiler.as_ref() {
            return Err(DriverError::Usage(format!(
                "profiling already active (writing to {})",
                active.path().display()
            )));
        }
        let path = path.into();
        tracing::info!("profiling to {}", path.display());
        *profiler = Some(Profiler::new(path));
        Ok(())
    }

    /// Stop collecting and write the summary.
    ///
    /// # Errors
    ///
    /// [`DriverError::Usage`] if no profile is active, [`DriverError::Profile`]
    /// if the summary cannot be written.
    pub fn end_profile(&self) -> Result<(), DriverError> {
        let profiler = self
            .profiler
            .lock()
            .take()
            .ok_or_else(|| DriverError::Usage("end_profile without start_profile".to_string()))?;
        profiler.write()
    }

    fn record(&self, operation: &'static str, elapsed: Duration) {
        if let Some(profiler) = self.profiler.lock().as_mut() {
            profiler.record(operation, elapsed);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        if !registry.live.is_empty() {
            tracing::debug!("dropping {} connection(s)", registry.live.len());
        }
        registry.live.clear();
    }
}
