// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SWIRL location runtime.
//!
//! Every generated location program links this library. It owns the state a
//! location shares between its tasks:
//! - the port-value table and one readiness signal per port
//! - the inbound connection table, keyed by (peer location, port)
//! - the accept loop that registers inbound connections
//!
//! Wire protocol between two locations:
//!
//! ```text
//! sender                          receiver
//!   "<src> <port>\n"   ───────▶
//!                      ◀───────   "ack"
//!   file mode only:
//!   "<basename>\n"     ───────▶
//!                      ◀───────   "ack"
//!   payload bytes until EOF ───▶
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

pub use tracing;

pub const ACK: &[u8] = b"ack";

const MAX_LINE: usize = 4096;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Environment variable holding the log filter of a location program.
pub const LOG_ENV: &str = "SWIRL_LOG";

/// A spawned unit of work.
pub type Task = JoinHandle<Result<(), RuntimeError>>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("step {step} {}: {stderr}", exit_description(.status))]
    StepFailed {
        step: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("step {step} did not produce a file or directory matching {glob}")]
    MissingArtifact { step: String, glob: String },

    #[error("step {step} produced more than one file or directory matching {glob}: {matches:?}")]
    AmbiguousArtifact {
        step: String,
        glob: String,
        matches: Vec<String>,
    },

    #[error("transferring directories is not implemented (port {port})")]
    DirectoryTransfer { port: String },

    #[error("port {port} does not hold {expected}")]
    InvalidValue {
        port: String,
        expected: &'static str,
    },

    #[error("invalid handshake: {0}")]
    Handshake(String),

    #[error("no address for location {0}")]
    UnknownLocation(String),

    #[error("a task panicked")]
    TaskPanicked,

    /// Another task of this location failed first.
    #[error("aborted after a failure in another task")]
    Aborted,
}

fn exit_description(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("failed with exit status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

fn io_context(context: impl Into<String>) -> impl FnOnce(io::Error) -> RuntimeError {
    let context = context.into();
    move |source| RuntimeError::Io { context, source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Stdout,
    File,
    Directory,
    /// Literal text, transferred like `Stdout`.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortValue {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// One positional command argument.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Literal(&'a str),
    Port(&'a str),
}

#[derive(Debug, Clone, Copy)]
pub struct Output<'a> {
    pub port: &'a str,
    pub data_type: DataType,
    pub glob: Option<&'a str>,
}

/// Everything `exec` needs to run one step.
#[derive(Debug, Clone, Copy)]
pub struct ExecSpec<'a> {
    pub step: &'a str,
    pub display_name: &'a str,
    pub command: &'a str,
    pub inputs: &'a [&'a str],
    pub arguments: &'a [Arg<'a>],
    pub outputs: &'a [Output<'a>],
}

/// Install the stderr subscriber of a location program.
///
/// The filter comes from `SWIRL_LOG` (`info` when unset or invalid). A second
/// call keeps the subscriber installed first.
pub fn init_subscriber() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false);
    let subscriber = tracing_subscriber::Registry::default()
        .with(fmt)
        .with(filter);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot signal: set once, waited on by any number of tasks.
#[derive(Default)]
struct Readiness {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl Readiness {
    fn set(&self) {
        *lock(&self.ready) = true;
        self.cond.notify_all();
    }

    fn wait(&self, failed: &AtomicBool) -> Result<(), RuntimeError> {
        let mut ready = lock(&self.ready);
        while !*ready {
            if failed.load(Ordering::SeqCst) {
                return Err(RuntimeError::Aborted);
            }
            ready = match self.cond.wait_timeout(ready, POLL_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(())
    }
}

/// State shared by every task of one location program.
pub struct LocationContext {
    name: String,
    workdir: PathBuf,
    addresses: HashMap<String, (String, u16)>,
    values: Mutex<HashMap<String, PortValue>>,
    signals: Mutex<HashMap<String, Arc<Readiness>>>,
    connections: Mutex<HashMap<(String, String), TcpStream>>,
    incoming: Condvar,
    stopping: AtomicBool,
    failed: AtomicBool,
    sequence: AtomicU64,
}

impl LocationContext {
    /// `addresses` maps location names to `(hostname, port)`.
    pub fn new(name: &str, workdir: &str, addresses: &[(&str, &str, u16)]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            workdir: resolve_workdir(workdir),
            addresses: addresses
                .iter()
                .map(|(location, host, port)| (location.to_string(), (host.to_string(), *port)))
                .collect(),
            values: Mutex::new(HashMap::new()),
            signals: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            incoming: Condvar::new(),
            stopping: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn address(&self, location: &str) -> Result<(String, u16), RuntimeError> {
        self.addresses
            .get(location)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownLocation(location.to_string()))
    }

    fn unique_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        format!(
            "{}_{}_{nanos}",
            std::process::id(),
            self.sequence.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn signal(&self, port: &str) -> Arc<Readiness> {
        let mut signals = lock(&self.signals);
        Arc::clone(signals.entry(port.to_string()).or_default())
    }

    /// Block until `port` holds a value.
    pub fn wait_ready(&self, port: &str) -> Result<(), RuntimeError> {
        self.signal(port).wait(&self.failed)
    }

    pub fn port_value(&self, port: &str) -> Option<PortValue> {
        lock(&self.values).get(port).cloned()
    }

    fn set_value(&self, port: &str, value: PortValue) {
        lock(&self.values).insert(port.to_string(), value);
        self.signal(port).set();
    }

    /// Seed `port` with data available before any step runs.
    pub fn init_dataset(&self, port: &str, data_type: DataType, value: &str) {
        let value = match data_type {
            DataType::File | DataType::Directory => PortValue::Path(self.workdir.join(value)),
            DataType::Stdout | DataType::Text => PortValue::Bytes(value.as_bytes().to_vec()),
        };
        self.set_value(port, value);
    }

    fn port_bytes(&self, port: &str) -> Result<Vec<u8>, RuntimeError> {
        match self.port_value(port) {
            Some(PortValue::Bytes(bytes)) => Ok(bytes),
            Some(PortValue::Path(path)) => {
                fs::read(&path).map_err(io_context(format!("cannot read {}", path.display())))
            }
            None => Err(RuntimeError::InvalidValue {
                port: port.to_string(),
                expected: "a value",
            }),
        }
    }

    fn port_path(&self, port: &str) -> Result<PathBuf, RuntimeError> {
        match self.port_value(port) {
            Some(PortValue::Path(path)) => Ok(path),
            _ => Err(RuntimeError::InvalidValue {
                port: port.to_string(),
                expected: "a path",
            }),
        }
    }

    fn argument_value(&self, port: &str) -> Result<String, RuntimeError> {
        match self.port_value(port) {
            Some(PortValue::Path(path)) => Ok(path.display().to_string()),
            Some(PortValue::Bytes(bytes)) => {
                Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
            }
            None => Err(RuntimeError::InvalidValue {
                port: port.to_string(),
                expected: "a value",
            }),
        }
    }

    /// Run `task` on its own thread. A failure makes every waiting task of this
    /// location give up with [`RuntimeError::Aborted`].
    pub fn spawn<F>(self: &Arc<Self>, task: F) -> Task
    where
        F: FnOnce() -> Result<(), RuntimeError> + Send + 'static,
    {
        let ctx = Arc::clone(self);
        thread::spawn(move || {
            let result = task();
            if let Err(err) = &result {
                ctx.failed.store(true, Ordering::SeqCst);
                ctx.incoming.notify_all();
                debug!(location = %ctx.name, error = %err, "Task failed");
            }
            result
        })
    }

    pub fn spawn_send(self: &Arc<Self>, port: &str, data_type: DataType, dst: &str) -> Task {
        let ctx = Arc::clone(self);
        let (port, dst) = (port.to_string(), dst.to_string());
        self.spawn(move || ctx.send(&port, data_type, &dst))
    }

    pub fn spawn_recv(self: &Arc<Self>, port: &str, data_type: DataType, src: &str) -> Task {
        let ctx = Arc::clone(self);
        let (port, src) = (port.to_string(), src.to_string());
        self.spawn(move || ctx.recv(&port, data_type, &src))
    }

    /// Bind this location's port and start accepting peers.
    pub fn listen(self: &Arc<Self>) -> Result<Task, RuntimeError> {
        let (_, port) = self.address(&self.name)?;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(io_context(format!("cannot listen on port {port}")))?;
        self.listen_with(listener)
    }

    /// Start the accept loop on an already bound listener.
    pub fn listen_with(self: &Arc<Self>, listener: TcpListener) -> Result<Task, RuntimeError> {
        listener
            .set_nonblocking(true)
            .map_err(io_context("cannot configure listener"))?;
        if let Ok(addr) = listener.local_addr() {
            debug!(location = %self.name, %addr, "Listening");
        }
        let ctx = Arc::clone(self);
        Ok(thread::spawn(move || ctx.accept_loop(listener)))
    }

    fn accept_loop(&self, listener: TcpListener) -> Result<(), RuntimeError> {
        while !self.stopping.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.register(stream) {
                        warn!(location = %self.name, %peer, error = %err, "Rejected connection");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL)
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(RuntimeError::Io {
                        context: "accept failed".to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn register(&self, mut stream: TcpStream) -> Result<(), RuntimeError> {
        stream
            .set_nonblocking(false)
            .map_err(io_context("cannot configure connection"))?;
        let line = read_line(&mut stream)?;
        let (src, port) = line
            .split_once(' ')
            .ok_or_else(|| RuntimeError::Handshake(line.clone()))?;
        stream
            .write_all(ACK)
            .map_err(io_context("cannot acknowledge handshake"))?;
        debug!(location = %self.name, src, port, "Registered connection");
        lock(&self.connections).insert((src.to_string(), port.to_string()), stream);
        self.incoming.notify_all();
        Ok(())
    }

    fn take_connection(&self, src: &str, port: &str) -> Result<TcpStream, RuntimeError> {
        let key = (src.to_string(), port.to_string());
        let mut connections = lock(&self.connections);
        loop {
            if let Some(stream) = connections.remove(&key) {
                return Ok(stream);
            }
            if self.failed.load(Ordering::SeqCst) {
                return Err(RuntimeError::Aborted);
            }
            debug!(location = %self.name, src, port, "Waiting for connection");
            connections = match self.incoming.wait_timeout(connections, POLL_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn connect(&self, dst: &str) -> Result<TcpStream, RuntimeError> {
        let (host, port) = self.address(dst)?;
        loop {
            if self.failed.load(Ordering::SeqCst) {
                return Err(RuntimeError::Aborted);
            }
            match TcpStream::connect((host.as_str(), port)) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!(
                        location = %self.name,
                        dst,
                        host = %host,
                        port,
                        error = %err,
                        "Peer not reachable, retrying"
                    );
                    thread::sleep(CONNECT_RETRY);
                }
            }
        }
    }

    /// Transfer the value of `port` to location `dst`.
    pub fn send(&self, port: &str, data_type: DataType, dst: &str) -> Result<(), RuntimeError> {
        if data_type == DataType::Directory {
            return Err(RuntimeError::DirectoryTransfer {
                port: port.to_string(),
            });
        }
        self.wait_ready(port)?;
        let mut stream = self.connect(dst)?;
        let context = format!("cannot send port {port} to {dst}");
        stream
            .write_all(format!("{} {port}\n", self.name).as_bytes())
            .map_err(io_context(context.clone()))?;
        expect_ack(&mut stream)?;
        match data_type {
            DataType::File => {
                let path = self.port_path(port)?;
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| RuntimeError::InvalidValue {
                        port: port.to_string(),
                        expected: "a file path",
                    })?;
                stream
                    .write_all(format!("{filename}\n").as_bytes())
                    .map_err(io_context(context.clone()))?;
                expect_ack(&mut stream)?;
                let mut file = File::open(&path)
                    .map_err(io_context(format!("cannot open {}", path.display())))?;
                io::copy(&mut file, &mut stream).map_err(io_context(context.clone()))?;
            }
            _ => {
                let bytes = self.port_bytes(port)?;
                stream
                    .write_all(&bytes)
                    .map_err(io_context(context.clone()))?;
            }
        }
        stream.flush().map_err(io_context(context))?;
        let _ = stream.shutdown(Shutdown::Write);
        debug!(location = %self.name, port, dst, "Sent data");
        Ok(())
    }

    /// Wait for `src` to connect on `port` and store what it sends.
    pub fn recv(&self, port: &str, data_type: DataType, src: &str) -> Result<(), RuntimeError> {
        if data_type == DataType::Directory {
            return Err(RuntimeError::DirectoryTransfer {
                port: port.to_string(),
            });
        }
        let mut stream = self.take_connection(src, port)?;
        let context = format!("cannot receive port {port} from {src}");
        let value = match data_type {
            DataType::File => {
                let line = read_line(&mut stream)?;
                let filename = Path::new(&line)
                    .file_name()
                    .map(|name| name.to_os_string())
                    .ok_or_else(|| RuntimeError::Handshake(line.clone()))?;
                stream.write_all(ACK).map_err(io_context(context.clone()))?;
                let dir = self
                    .workdir
                    .join(format!("rcv_{port}_{}", self.unique_id()));
                fs::create_dir_all(&dir)
                    .map_err(io_context(format!("cannot create {}", dir.display())))?;
                let path = dir.join(filename);
                let mut file = File::create(&path)
                    .map_err(io_context(format!("cannot create {}", path.display())))?;
                io::copy(&mut stream, &mut file).map_err(io_context(context))?;
                debug!(location = %self.name, port, src, path = %path.display(), "Received file");
                PortValue::Path(path)
            }
            _ => {
                let mut buf = Vec::new();
                stream
                    .read_to_end(&mut buf)
                    .map_err(io_context(context))?;
                debug!(location = %self.name, port, src, bytes = buf.len(), "Received data");
                PortValue::Bytes(buf)
            }
        };
        self.set_value(port, value);
        Ok(())
    }

    /// Run one step once all of its inputs are ready.
    pub fn exec(&self, spec: &ExecSpec<'_>) -> Result<(), RuntimeError> {
        for port in spec.inputs {
            self.wait_ready(port)?;
        }
        let dir = self
            .workdir
            .join(format!("exec_{}_{}", spec.step, self.unique_id()));
        fs::create_dir_all(&dir).map_err(io_context(format!("cannot create {}", dir.display())))?;
        let mut linked = Vec::new();
        for port in spec.inputs {
            if let Some(PortValue::Path(path)) = self.port_value(port) {
                linked.extend(link_input(&path, &dir)?);
            }
        }

        let mut command = vec![spec.command.to_string()];
        for arg in spec.arguments {
            command.push(match arg {
                Arg::Literal(value) => value.to_string(),
                Arg::Port(port) => self.argument_value(port)?,
            });
        }
        let command = command.join(" ");
        info!(
            location = %self.name,
            step = spec.step,
            display_name = spec.display_name,
            command = %command,
            "Executing step"
        );
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .output()
            .map_err(io_context(format!("cannot run step {}", spec.step)))?;
        if !output.status.success() {
            return Err(RuntimeError::StepFailed {
                step: spec.step.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        if spec.outputs.is_empty() {
            info!(
                location = %self.name,
                step = spec.step,
                display_name = spec.display_name,
                result = %String::from_utf8_lossy(&output.stdout).trim(),
                "Step has no output port"
            );
        }
        for out in spec.outputs {
            let value = match out.data_type {
                DataType::Stdout | DataType::Text => PortValue::Bytes(output.stdout.clone()),
                DataType::File | DataType::Directory => {
                    let glob = out.glob.unwrap_or("*");
                    PortValue::Path(match_artifact(spec.step, &dir, glob, &linked)?)
                }
            };
            debug!(location = %self.name, step = spec.step, port = out.port, "Set port");
            self.set_value(out.port, value);
        }
        Ok(())
    }

    /// Stop accepting new connections.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

/// Wait for every task and return the first failure, if any.
pub fn join_all(tasks: Vec<Task>) -> Result<(), RuntimeError> {
    let mut first = None;
    for task in tasks {
        let result = task.join().unwrap_or(Err(RuntimeError::TaskPanicked));
        if let Err(err) = result {
            first.get_or_insert(err);
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn resolve_workdir(workdir: &str) -> PathBuf {
    let expanded = match (workdir.strip_prefix('~'), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest.trim_start_matches('/')),
        _ => PathBuf::from(workdir),
    };
    if expanded.is_absolute() {
        return expanded;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(expanded),
        Err(_) => expanded,
    }
}

/// Symlink `path` into `dir` under its own name, which is returned.
fn link_input(path: &Path, dir: &Path) -> Result<Option<String>, RuntimeError> {
    let name = match path.file_name() {
        Some(name) => name,
        None => return Ok(None),
    };
    let target = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(io_context("cannot resolve current directory"))?
            .join(path)
    };
    std::os::unix::fs::symlink(&target, dir.join(name))
        .map_err(io_context(format!("cannot link {}", target.display())))?;
    Ok(Some(name.to_string_lossy().into_owned()))
}

/// Expand `glob` with the shell inside `dir`; exactly one match is accepted.
/// The step's own input links never count as artifacts.
fn match_artifact(
    step: &str,
    dir: &Path,
    glob: &str,
    inputs: &[String],
) -> Result<PathBuf, RuntimeError> {
    let script = format!("for f in {glob}; do [ -e \"$f\" ] && printf '%s\\n' \"$f\"; done; true");
    let output = Command::new("sh")
        .arg("-c")
        .arg(&script)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .map_err(io_context(format!("cannot expand {glob}")))?;
    let matches: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.is_empty() && !inputs.iter().any(|input| input == line))
        .map(str::to_string)
        .collect();
    match matches.as_slice() {
        [] => Err(RuntimeError::MissingArtifact {
            step: step.to_string(),
            glob: glob.to_string(),
        }),
        [single] => Ok(dir.join(single)),
        _ => Err(RuntimeError::AmbiguousArtifact {
            step: step.to_string(),
            glob: glob.to_string(),
            matches,
        }),
    }
}

fn read_line(stream: &mut TcpStream) -> Result<String, RuntimeError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let read = stream
            .read(&mut byte)
            .map_err(io_context("cannot read handshake"))?;
        if read == 0 || byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_LINE {
            return Err(RuntimeError::Handshake("line too long".to_string()));
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn expect_ack(stream: &mut TcpStream) -> Result<(), RuntimeError> {
    let mut buf = [0u8; 3];
    stream
        .read_exact(&mut buf)
        .map_err(io_context("cannot read acknowledgement"))?;
    if buf != ACK {
        return Err(RuntimeError::Handshake(
            String::from_utf8_lossy(&buf).into_owned(),
        ));
    }
    Ok(())
}
