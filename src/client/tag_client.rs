//! tag_client.rs
//! Synchronous session to a DataStore: blocking tag reads and writes over one TCP stream.
//!
//! Any I/O failure ends the session and marks the client disconnected; reconnecting is
//! an explicit `connect()` by the owner.

use std::{
    io::{BufReader, BufWriter},
    net::{Shutdown, SocketAddr, TcpStream},
};

use log::{debug, error, info, warn};

use crate::{
    config::{ClientOptions, ClientType, resolve_endpoint},
    datastore::{
        namespace::{Namespace, TagAddress, TagField},
        protocol::{self, Request, Response, TagInfo},
    },
    error::{LinkError, LinkResult},
};

struct Session {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
}

pub struct TagClient {
    options: ClientOptions,
    session: Option<Session>,
}

impl TagClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn client_type(&self) -> ClientType {
        self.options.client_type
    }

    pub fn namespace(&self) -> &Namespace {
        &self.options.namespace
    }

    pub fn endpoint(&self) -> String {
        format!("{} (port {})", self.options.address, self.options.port)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Opens the session. Already connected is a no-op.
    pub fn connect(&mut self) -> LinkResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let endpoint = self.endpoint();
        let failed = |reason: String| LinkError::Connection {
            endpoint: endpoint.clone(),
            reason,
        };

        let addr = resolve_endpoint(&self.options.address, self.options.port)
            .map_err(|e| failed(e.to_string()))?;
        let timeout = self.options.io_timeout();

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            error!(
                "[TagClient:{}] the connection to {} could not be established: {}",
                self.options.client_type.name(),
                addr,
                e
            );
            failed(e.to_string())
        })?;
        stream.set_nodelay(true).map_err(|e| failed(e.to_string()))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| failed(e.to_string()))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| failed(e.to_string()))?;
        let read_half = stream.try_clone().map_err(|e| failed(e.to_string()))?;

        self.session = Some(Session {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(stream),
            peer: addr,
        });
        info!(
            "[TagClient:{}] connected to {}",
            self.options.client_type.name(),
            addr
        );
        Ok(())
    }

    /// Closes the session. Not connected is a no-op.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.writer.get_ref().shutdown(Shutdown::Both);
            info!(
                "[TagClient:{}] disconnected from {}",
                self.options.client_type.name(),
                session.peer
            );
        }
    }

    fn roundtrip(&mut self, request: &Request) -> Result<Response, String> {
        let Some(session) = self.session.as_mut() else {
            return Err("not connected".to_string());
        };

        let result = protocol::send(&mut session.writer, request)
            .and_then(|_| protocol::receive::<_, Response>(&mut session.reader));

        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    "[TagClient:{}] session lost: {}",
                    self.options.client_type.name(),
                    e
                );
                self.session = None;
                Err(e.to_string())
            }
        }
    }

    /// Current vector of `tag`.
    pub fn read_data(&mut self, tag: &TagAddress) -> LinkResult<Vec<f64>> {
        let read_error = |reason: String| LinkError::Read {
            tag: tag.to_string(),
            reason,
        };

        match self
            .roundtrip(&Request::Read {
                tag: tag.to_string(),
            })
            .map_err(read_error)?
        {
            Response::Values { values } => Ok(values),
            Response::Error { code, message } => Err(read_error(format!("{:?}: {}", code, message))),
            other => Err(read_error(format!("unexpected response {:?}", other))),
        }
    }

    /// Replaces the whole vector of `tag`; `values` must have the tag's length and be finite.
    pub fn write_data(&mut self, values: &[f64], tag: &TagAddress) -> LinkResult<()> {
        let write_error = |reason: String| LinkError::Write {
            tag: tag.to_string(),
            reason,
        };

        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(write_error(format!(
                "non-finite value {} at index {}",
                values[index], index
            )));
        }

        if tag.ns == self.options.namespace.index {
            let expected = self
                .options
                .namespace
                .field_for_path(&tag.path)
                .and_then(|f| self.options.namespace.len_of(f));
            if let Some(expected) = expected {
                if expected != values.len() {
                    return Err(write_error(format!(
                        "tag holds {} values, got {}",
                        expected,
                        values.len()
                    )));
                }
            }
        }

        match self
            .roundtrip(&Request::Write {
                tag: tag.to_string(),
                values: values.to_vec(),
            })
            .map_err(write_error)?
        {
            Response::Written => Ok(()),
            Response::Error { code, message } => Err(write_error(format!("{:?}: {}", code, message))),
            other => Err(write_error(format!("unexpected response {:?}", other))),
        }
    }

    /// Sets one element of `tag`, leaving the others as they are on the store.
    pub fn write_at(&mut self, tag: &TagAddress, index: usize, value: f64) -> LinkResult<()> {
        let write_error = |reason: String| LinkError::Write {
            tag: tag.to_string(),
            reason,
        };

        if !value.is_finite() {
            return Err(write_error(format!("non-finite value {} at index {}", value, index)));
        }

        match self
            .roundtrip(&Request::WriteAt {
                tag: tag.to_string(),
                index,
                value,
            })
            .map_err(write_error)?
        {
            Response::Written => Ok(()),
            Response::Error { code, message } => Err(write_error(format!("{:?}: {}", code, message))),
            other => Err(write_error(format!("unexpected response {:?}", other))),
        }
    }

    fn field_address(&self, field: TagField) -> Option<TagAddress> {
        self.options.namespace.address(field)
    }

    pub fn read_field(&mut self, field: TagField) -> LinkResult<Vec<f64>> {
        let tag = self.field_address(field).ok_or_else(|| LinkError::Read {
            tag: field.path().to_string(),
            reason: "not part of the namespace".to_string(),
        })?;
        self.read_data(&tag)
    }

    pub fn write_field(&mut self, field: TagField, values: &[f64]) -> LinkResult<()> {
        let tag = self.field_address(field).ok_or_else(|| LinkError::Write {
            tag: field.path().to_string(),
            reason: "not part of the namespace".to_string(),
        })?;
        self.write_data(values, &tag)
    }

    pub fn write_field_at(&mut self, field: TagField, index: usize, value: f64) -> LinkResult<()> {
        let tag = self.field_address(field).ok_or_else(|| LinkError::Write {
            tag: field.path().to_string(),
            reason: "not part of the namespace".to_string(),
        })?;
        self.write_at(&tag, index, value)
    }

    /// Refreshes the local namespace copy from the store.
    pub fn fetch_namespace(&mut self) -> LinkResult<Namespace> {
        let read_error = |reason: String| LinkError::Read {
            tag: "namespace".to_string(),
            reason,
        };

        match self.roundtrip(&Request::Namespace).map_err(read_error)? {
            Response::Namespace { namespace } => {
                debug!(
                    "[TagClient:{}] namespace {} with {} tags",
                    self.options.client_type.name(),
                    namespace.index,
                    namespace.tag_count()
                );
                self.options.namespace = namespace.clone();
                Ok(namespace)
            }
            Response::Error { code, message } => Err(read_error(format!("{:?}: {}", code, message))),
            other => Err(read_error(format!("unexpected response {:?}", other))),
        }
    }

    pub fn browse(&mut self) -> LinkResult<Vec<TagInfo>> {
        let read_error = |reason: String| LinkError::Read {
            tag: "browse".to_string(),
            reason,
        };

        match self.roundtrip(&Request::Browse).map_err(read_error)? {
            Response::Tags { tags } => Ok(tags),
            Response::Error { code, message } => Err(read_error(format!("{:?}: {}", code, message))),
            other => Err(read_error(format!("unexpected response {:?}", other))),
        }
    }
}

impl Drop for TagClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
