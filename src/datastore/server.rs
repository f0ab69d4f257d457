//! server.rs
//! The shared data store: hosts the tag namespace and serves client sessions over TCP.
//!
//! Two kinds of threads:
//! - **Accept loop:** non-blocking listener polled every few ms so `stop()` is honoured promptly.
//! - **Sessions:** one thread per connected client, blocking on frame reads.
//!
//! All mutation is client-driven. Each tag is updated atomically on its own; there is
//! no atomicity across tags.

use std::{
    collections::HashMap,
    io::{BufReader, BufWriter, ErrorKind},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::{
    config::{ClientOptions, ClientType, ServerOptions, resolve_endpoint},
    datastore::{
        namespace::{DimensionTable, FIRST_USER_NAMESPACE, Namespace, ServerType, TagAddress},
        protocol::{self, ErrorCode, Request, Response, TagInfo},
    },
    error::{LinkError, LinkResult},
};

const ACCEPT_POLL_MS: u64 = 5;
const LISTEN_BACKLOG: i32 = 128;

/// One hosted vector.
#[derive(Debug, Clone)]
pub struct TagCell {
    pub values: Vec<f64>,
    pub writable: bool,
    pub writes: u64,
    pub updated_at: Instant,
}

impl TagCell {
    fn zeroed(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
            writable: true,
            writes: 0,
            updated_at: Instant::now(),
        }
    }
}

/// Tag table keyed by dotted path, shared by every session thread.
pub type TagTable = Arc<DashMap<String, TagCell>>;

type SessionRegistry = Arc<Mutex<HashMap<u64, TcpStream>>>;

pub struct DataStore {
    options: ServerOptions,
    dimensions: DimensionTable,
    namespace: Namespace,
    tags: TagTable,
    running: Arc<AtomicBool>,
    sessions: SessionRegistry,
    session_seq: Arc<AtomicU64>,
    accept_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl DataStore {
    /// Builds the namespace and preallocates every tag to zeros. Nothing is bound yet.
    pub fn new(options: ServerOptions, dimensions: DimensionTable) -> LinkResult<Self> {
        options.validate()?;

        match options.server_type {
            ServerType::Basic => {
                info!("[DataStore] {}: basic data store (no estimates)", options.name)
            }
            ServerType::WithEstimator => {
                info!("[DataStore] {}: storing state and parameter estimates", options.name)
            }
            ServerType::WithMonitoring => {
                info!("[DataStore] {}: full structure with monitoring tags", options.name)
            }
        }
        if options.with_db {
            warn!("[DataStore] with_db requested but persistence is not available; continuing without it");
        }

        let namespace = Namespace::build(
            FIRST_USER_NAMESPACE,
            options.server_type,
            options.store_params,
            options.store_predictions,
            &DimensionTable {
                n_steps_pred: options.n_steps_pred,
                ..dimensions
            },
        );

        let tags: TagTable = Arc::new(DashMap::new());
        for spec in &namespace.tags {
            tags.insert(spec.field.path().to_string(), TagCell::zeroed(spec.len));
        }

        debug!("[DataStore] built {} tags in namespace {}", tags.len(), namespace.index);

        Ok(Self {
            options,
            dimensions,
            namespace,
            tags,
            running: Arc::new(AtomicBool::new(false)),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            session_seq: Arc::new(AtomicU64::new(1)),
            accept_handle: None,
            local_addr: None,
        })
    }

    /// Binds the endpoint and starts accepting sessions. A failure leaves the store
    /// stopped but usable, so the caller may retry.
    pub fn start(&mut self) -> LinkResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let addr = resolve_endpoint(&self.options.address, self.options.port)?;
        let listener = bind_listener(addr).map_err(|e| {
            error!("[DataStore] {} could not be started on {}: {}", self.options.name, addr, e);
            LinkError::Server(format!("cannot listen on {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::Release);

        let tags = self.tags.clone();
        let running = self.running.clone();
        let sessions = self.sessions.clone();
        let session_seq = self.session_seq.clone();
        let ns_index = self.namespace.index;
        let namespace = self.namespace.clone();

        let handle = thread::Builder::new()
            .name("datastore-accept".to_string())
            .spawn(move || {
                accept_loop(listener, tags, running, sessions, session_seq, ns_index, namespace)
            });

        match handle {
            Ok(h) => {
                self.accept_handle = Some(h);
                self.local_addr = Some(local_addr);
                info!("[DataStore] {} started on {}", self.options.name, local_addr);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(LinkError::Server(format!("cannot spawn accept thread: {}", e)))
            }
        }
    }

    /// Stops accepting and closes every live session. Tag values are kept.
    pub fn stop(&mut self) -> LinkResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(handle) = self.accept_handle.take() {
            if handle.join().is_err() {
                error!("[DataStore] accept thread panicked");
            }
        }

        let live: Vec<TcpStream> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for stream in &live {
            let _ = stream.shutdown(Shutdown::Both);
        }

        info!(
            "[DataStore] {} stopped ({} session(s) closed)",
            self.options.name,
            live.len()
        );
        self.local_addr = None;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn dimensions(&self) -> &DimensionTable {
        &self.dimensions
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Address actually bound (differs from the configured one when port 0 was used).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Client options pointing at the bound endpoint, with a copy of the namespace.
    pub fn client_options(&self, client_type: ClientType) -> ClientOptions {
        let port = self.local_addr.map(|a| a.port()).unwrap_or(self.options.port);
        ClientOptions::new(&self.options.address, port, client_type, self.namespace.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn tag_len(&self, path: &str) -> Option<usize> {
        self.tags.get(path).map(|cell| cell.values.len())
    }

    /// Local read, bypassing the network.
    pub fn snapshot(&self, path: &str) -> Option<Vec<f64>> {
        self.tags.get(path).map(|cell| cell.values.clone())
    }

    /// Used by tests and local tooling; goes through the same checks as a client write.
    pub fn handle(&self, request: Request) -> Response {
        handle_request(&self.tags, self.namespace.index, &self.namespace, request)
    }
}

impl Drop for DataStore {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(LISTEN_BACKLOG)?;
    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn accept_loop(
    listener: TcpListener,
    tags: TagTable,
    running: Arc<AtomicBool>,
    sessions: SessionRegistry,
    session_seq: Arc<AtomicU64>,
    ns_index: u16,
    namespace: Namespace,
) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    error!("[DataStore] session from {} unusable: {}", peer, e);
                    continue;
                }
                let _ = stream.set_nodelay(true);

                let id = session_seq.fetch_add(1, Ordering::Relaxed);
                match stream.try_clone() {
                    Ok(registered) => {
                        sessions.lock().insert(id, registered);
                    }
                    Err(e) => {
                        error!("[DataStore] cannot register session from {}: {}", peer, e);
                        continue;
                    }
                }

                let tags = tags.clone();
                let sessions = sessions.clone();
                let namespace = namespace.clone();
                let spawned = thread::Builder::new()
                    .name(format!("datastore-session-{}", id))
                    .spawn(move || {
                        debug!("[DataStore] session {} opened by {}", id, peer);
                        serve_session(stream, &tags, ns_index, &namespace);
                        sessions.lock().remove(&id);
                        debug!("[DataStore] session {} closed", id);
                    });
                if let Err(e) = spawned {
                    error!("[DataStore] cannot spawn session thread: {}", e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
            Err(e) => {
                error!("[DataStore] accept error: {}", e);
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
        }
    }

    debug!("[DataStore] accept loop exiting");
}

fn serve_session(stream: TcpStream, tags: &TagTable, ns_index: u16, namespace: &Namespace) {
    let read_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!("[DataStore] cannot split session stream: {}", e);
            return;
        }
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(stream);

    loop {
        let payload = match protocol::read_frame(&mut reader) {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                // Length prefix is unusable; the stream can no longer be framed.
                warn!("[DataStore] dropping session after bad frame: {}", e);
                let _ = protocol::send(&mut writer, &Response::error(ErrorCode::BadRequest, e.to_string()));
                break;
            }
            Err(e) => {
                debug!("[DataStore] session read ended: {}", e);
                break;
            }
        };

        let response = match serde_json::from_slice::<Request>(&payload) {
            Ok(request) => handle_request(tags, ns_index, namespace, request),
            Err(e) => Response::error(ErrorCode::BadRequest, e.to_string()),
        };

        if let Err(e) = protocol::send(&mut writer, &response) {
            debug!("[DataStore] session write ended: {}", e);
            break;
        }
    }
}

fn resolve_path(raw: &str, ns_index: u16) -> Result<String, Response> {
    let addr: TagAddress = raw
        .parse()
        .map_err(|e: LinkError| Response::error(ErrorCode::BadAddress, e.to_string()))?;
    if addr.ns != ns_index {
        return Err(Response::error(
            ErrorCode::UnknownTag,
            format!("namespace {} is not hosted here (expected {})", addr.ns, ns_index),
        ));
    }
    Ok(addr.path)
}

/// Applies one request to the tag table.
pub fn handle_request(
    tags: &TagTable,
    ns_index: u16,
    namespace: &Namespace,
    request: Request,
) -> Response {
    match request {
        Request::Read { tag } => {
            let path = match resolve_path(&tag, ns_index) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            match tags.get(&path) {
                Some(cell) => Response::Values {
                    values: cell.values.clone(),
                },
                None => Response::error(ErrorCode::UnknownTag, format!("no tag {}", tag)),
            }
        }
        Request::Write { tag, values } => {
            let path = match resolve_path(&tag, ns_index) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            let Some(mut cell) = tags.get_mut(&path) else {
                return Response::error(ErrorCode::UnknownTag, format!("no tag {}", tag));
            };
            if !cell.writable {
                return Response::error(ErrorCode::NotWritable, format!("{} is read-only", tag));
            }
            if values.len() != cell.values.len() {
                return Response::error(
                    ErrorCode::LengthMismatch,
                    format!("{} holds {} values, got {}", tag, cell.values.len(), values.len()),
                );
            }
            cell.values = values;
            cell.writes += 1;
            cell.updated_at = Instant::now();
            Response::Written
        }
        Request::WriteAt { tag, index, value } => {
            let path = match resolve_path(&tag, ns_index) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            let Some(mut cell) = tags.get_mut(&path) else {
                return Response::error(ErrorCode::UnknownTag, format!("no tag {}", tag));
            };
            if !cell.writable {
                return Response::error(ErrorCode::NotWritable, format!("{} is read-only", tag));
            }
            let len = cell.values.len();
            match cell.values.get_mut(index) {
                Some(slot) => *slot = value,
                None => {
                    return Response::error(
                        ErrorCode::IndexOutOfRange,
                        format!("{} has {} values, index {} requested", tag, len, index),
                    );
                }
            }
            cell.writes += 1;
            cell.updated_at = Instant::now();
            Response::Written
        }
        Request::Browse => {
            let tags = namespace
                .tags
                .iter()
                .filter_map(|spec| {
                    let path = spec.field.path();
                    tags.get(path).map(|cell| TagInfo {
                        address: TagAddress::new(ns_index, path).to_string(),
                        len: cell.values.len(),
                        writable: cell.writable,
                        writes: cell.writes,
                        age_ms: cell.updated_at.elapsed().as_millis() as u64,
                    })
                })
                .collect();
            Response::Tags { tags }
        }
        Request::Namespace => Response::Namespace {
            namespace: namespace.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DataStore {
        let options = ServerOptions {
            address: "tcp://127.0.0.1/test".into(),
            port: 0,
            server_type: ServerType::WithEstimator,
            ..ServerOptions::default()
        };
        let dims = DimensionTable {
            n_x: 4,
            n_u: 2,
            n_y: 4,
            n_p: 2,
            ..DimensionTable::default()
        };
        DataStore::new(options, dims).unwrap()
    }

    #[test]
    fn write_then_read_returns_same_vector() {
        let store = store();
        let written = store.handle(Request::Write {
            tag: "ns=2;s=States.X".into(),
            values: vec![1.0, 0.5, 134.14, 130.0],
        });
        assert_eq!(written, Response::Written);
        let read = store.handle(Request::Read {
            tag: "ns=2;s=States.X".into(),
        });
        assert_eq!(
            read,
            Response::Values {
                values: vec![1.0, 0.5, 134.14, 130.0]
            }
        );
    }

    #[test]
    fn length_mismatch_leaves_tag_untouched() {
        let store = store();
        let resp = store.handle(Request::Write {
            tag: "ns=2;s=Inputs".into(),
            values: vec![1.0, 2.0, 3.0],
        });
        assert!(matches!(resp, Response::Error { code: ErrorCode::LengthMismatch, .. }));
        assert_eq!(store.snapshot("Inputs"), Some(vec![0.0, 0.0]));
    }

    #[test]
    fn foreign_namespace_is_unknown() {
        let store = store();
        let resp = store.handle(Request::Read {
            tag: "ns=3;s=States.X".into(),
        });
        assert!(matches!(resp, Response::Error { code: ErrorCode::UnknownTag, .. }));
    }

    #[test]
    fn write_at_updates_single_slot() {
        let store = store();
        let resp = store.handle(Request::WriteAt {
            tag: "ns=2;s=Switches".into(),
            index: 2,
            value: 1.0,
        });
        assert_eq!(resp, Response::Written);
        assert_eq!(store.snapshot("Switches"), Some(vec![0.0, 0.0, 1.0, 0.0, 0.0]));

        let resp = store.handle(Request::WriteAt {
            tag: "ns=2;s=Switches".into(),
            index: 5,
            value: 1.0,
        });
        assert!(matches!(resp, Response::Error { code: ErrorCode::IndexOutOfRange, .. }));
    }

    #[test]
    fn browse_lists_every_tag() {
        let store = store();
        match store.handle(Request::Browse) {
            Response::Tags { tags } => assert_eq!(tags.len(), store.tag_count()),
            other => panic!("unexpected response {:?}", other),
        }
    }
}
