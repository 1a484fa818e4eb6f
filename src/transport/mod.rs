//! Transport Session
//!
//! A [`TransportSession`] owns the connection to exactly one instrument and
//! exposes the synchronous command/response contract the rest of the engine is
//! written against (the [`Transport`] trait):
//!
//! - `connect` opens a resource manager, then an instrument scoped to the
//!   resource string. On any failure no handle is left open.
//! - `disconnect` is idempotent and returns the instrument to local control
//!   before closing its handles.
//! - `send` appends the line terminator and writes the command in one call.
//! - `query` writes, then reads up to the configured buffer size and strips the
//!   trailing terminator. Responses are decoded as Latin-1 text.
//! - `list_resources` is advisory: enumeration failures are logged and yield an
//!   empty list.
//!
//! Failures are never retried here. Retrying is a caller policy.
//!
//! # Example
//!
//! ```
//! use rust_siggen::transport::{SimulatedDriver, Transport, TransportSession};
//!
//! let mut session = TransportSession::new(SimulatedDriver::new());
//! session.connect("USB0::0x1AB1::0x0642::DG1ZA0001::INSTR")?;
//! session.send("SOUR1:FREQ 2500")?;
//! assert_eq!(session.query("SOUR1:FREQ?")?, "2500");
//! session.disconnect()?;
//! # Ok::<(), rust_siggen::error::TransportError>(())
//! ```

pub mod driver;
pub mod shared;
pub mod simulated;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use driver::InstrumentDriver;
pub use shared::SharedTransport;
pub use simulated::SimulatedDriver;
#[cfg(feature = "instrument_visa")]
pub use visa::VisaDriver;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::TransportConfig;
use crate::error::{IoFailure, TransportError};
use crate::logging::{default_sink, SharedLogSink};

/// Whether a session currently holds an open instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No handles are open.
    Disconnected,
    /// Resource manager and instrument handles are open.
    Connected,
}

/// Description of the session's link to an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Resource string the session was opened with.
    pub resource: String,
    /// Current state.
    pub state: ConnectionState,
}

/// Finite sequence of discovered resource strings.
#[derive(Debug, Default)]
pub struct ResourceList {
    inner: std::vec::IntoIter<String>,
}

impl ResourceList {
    /// A list with no resources.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl From<Vec<String>> for ResourceList {
    fn from(resources: Vec<String>) -> Self {
        Self {
            inner: resources.into_iter(),
        }
    }
}

impl Iterator for ResourceList {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// The command/response capability the engine drives.
pub trait Transport {
    /// Open the instrument identified by `resource`.
    fn connect(&mut self, resource: &str) -> Result<Connection, TransportError>;

    /// Close the instrument. Succeeds when nothing is open.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Send a command that produces no response.
    fn send(&mut self, command: &str) -> Result<(), TransportError>;

    /// Send a query and return its single-line response.
    fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Discover resources that could be connected to.
    ///
    /// Discovery never fails: a missing resource manager or a failed search
    /// is logged and yields an empty list. The names are collected before
    /// returning, so iterating never touches the driver.
    fn list_resources(&mut self) -> ResourceList;

    /// True while an instrument is open.
    fn is_connected(&self) -> bool;
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Appended to every command.
    pub line_terminator: String,
    /// Maximum response size read by a query.
    pub read_buffer_size: usize,
    /// I/O timeout handed to the driver on open.
    pub timeout: Duration,
    /// Resource filter used for discovery.
    pub resource_filter: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            line_terminator: "\n".to_string(),
            read_buffer_size: 1024,
            timeout: Duration::from_millis(2000),
            resource_filter: "?*INSTR".to_string(),
        }
    }
}

impl From<&TransportConfig> for SessionOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            line_terminator: config.line_terminator.clone(),
            read_buffer_size: config.read_buffer_size,
            timeout: Duration::from_millis(config.timeout_ms),
            resource_filter: config.resource_filter.clone(),
        }
    }
}

struct OpenInstrument<I> {
    resource: String,
    handle: I,
}

/// Transport session over an [`InstrumentDriver`].
pub struct TransportSession<D: InstrumentDriver> {
    driver: D,
    options: SessionOptions,
    log: SharedLogSink,
    rm: Option<D::ResourceManager>,
    instrument: Option<OpenInstrument<D::Instrument>>,
}

impl<D: InstrumentDriver> TransportSession<D> {
    /// Create a disconnected session with default options.
    pub fn new(driver: D) -> Self {
        Self::with_options(driver, SessionOptions::default())
    }

    /// Create a disconnected session.
    pub fn with_options(driver: D, options: SessionOptions) -> Self {
        Self {
            driver,
            options,
            log: default_sink(),
            rm: None,
            instrument: None,
        }
    }

    /// Replace the log sink.
    pub fn with_log_sink(mut self, log: SharedLogSink) -> Self {
        self.log = log;
        self
    }

    /// Session options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the underlying driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Current connection, if any.
    pub fn connection(&self) -> Option<Connection> {
        self.instrument.as_ref().map(|open| Connection {
            resource: open.resource.clone(),
            state: ConnectionState::Connected,
        })
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        if self.instrument.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn write_line(&mut self, command: &str) -> Result<(), TransportError> {
        let write_failed = |reason| TransportError::WriteFailed {
            command: command.to_string(),
            reason,
        };
        let open = self
            .instrument
            .as_mut()
            .ok_or_else(|| write_failed(IoFailure::NotConnected))?;

        let line = format!("{}{}", command, self.options.line_terminator);
        let written = self
            .driver
            .write(&mut open.handle, line.as_bytes())
            .map_err(|status| write_failed(IoFailure::Status(status)))?;
        if written != line.len() {
            return Err(write_failed(IoFailure::ShortWrite {
                written,
                expected: line.len(),
            }));
        }
        trace!(resource = %open.resource, command, "command written");
        Ok(())
    }

    fn close_all(&mut self) -> Result<(), TransportError> {
        let mut first_failure = None;
        if let Some(mut open) = self.instrument.take() {
            if let Err(status) = self.driver.go_to_local(&mut open.handle) {
                self.log
                    .log(&format!("go-to-local on {} failed: {}", open.resource, status));
            }
            if let Err(status) = self.driver.close_instrument(open.handle) {
                first_failure = Some(TransportError::CloseFailed {
                    handle: open.resource,
                    status,
                });
            }
        }
        if let Some(rm) = self.rm.take() {
            if let Err(status) = self.driver.close_rm(rm) {
                first_failure.get_or_insert(TransportError::CloseFailed {
                    handle: "resource manager".to_string(),
                    status,
                });
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<D: InstrumentDriver> Transport for TransportSession<D> {
    fn connect(&mut self, resource: &str) -> Result<Connection, TransportError> {
        if self.instrument.is_some() {
            self.close_all()?;
        }

        let rm = match self.rm.take() {
            Some(rm) => rm,
            None => self.driver.open_default_rm().map_err(|status| {
                self.log
                    .log(&format!("resource manager unavailable: {status}"));
                TransportError::ResourceManagerUnavailable { status }
            })?,
        };

        match self.driver.open(&rm, resource, self.options.timeout) {
            Ok(handle) => {
                self.rm = Some(rm);
                self.instrument = Some(OpenInstrument {
                    resource: resource.to_string(),
                    handle,
                });
                self.log.log(&format!("connected to {resource}"));
                debug!(resource, "instrument session opened");
                Ok(Connection {
                    resource: resource.to_string(),
                    state: ConnectionState::Connected,
                })
            }
            Err(status) => {
                if let Err(close_status) = self.driver.close_rm(rm) {
                    debug!(%close_status, "closing resource manager after failed open");
                }
                self.log
                    .log(&format!("failed to open {resource}: {status}"));
                Err(TransportError::InstrumentOpenFailed {
                    resource: resource.to_string(),
                    status,
                })
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let resource = self.instrument.as_ref().map(|open| open.resource.clone());
        let result = self.close_all();
        if let Some(resource) = resource {
            self.log.log(&format!("disconnected from {resource}"));
        }
        result
    }

    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        match self.write_line(command) {
            Ok(()) => {
                self.log.log(&format!("sent: {command}"));
                Ok(())
            }
            Err(err) => {
                self.log.log(&err.to_string());
                Err(err)
            }
        }
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        if let Err(err) = self.write_line(command) {
            self.log.log(&err.to_string());
            return Err(err);
        }

        let read_failed = |reason| TransportError::ReadFailed {
            command: command.to_string(),
            reason,
        };
        let open = self
            .instrument
            .as_mut()
            .ok_or_else(|| read_failed(IoFailure::NotConnected))?;

        let mut buf = vec![0u8; self.options.read_buffer_size];
        let count = match self.driver.read(&mut open.handle, &mut buf) {
            Ok(count) => count.min(buf.len()),
            Err(status) => {
                let err = read_failed(IoFailure::Status(status));
                self.log.log(&err.to_string());
                return Err(err);
            }
        };

        // Latin-1: every byte maps to the code point of the same value.
        let text: String = buf[..count].iter().map(|&b| char::from(b)).collect();
        let response = text
            .trim_end_matches(self.options.line_terminator.as_str())
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.log.log(&format!("query: {command} -> {response}"));
        Ok(response)
    }

    fn list_resources(&mut self) -> ResourceList {
        if self.rm.is_none() {
            match self.driver.open_default_rm() {
                Ok(rm) => self.rm = Some(rm),
                Err(status) => {
                    self.log
                        .log(&format!("resource discovery unavailable: {status}"));
                    return ResourceList::empty();
                }
            }
        }
        let Some(rm) = self.rm.as_ref() else {
            return ResourceList::empty();
        };
        match self.driver.find_resources(rm, &self.options.resource_filter) {
            Ok(found) => {
                self.log
                    .log(&format!("discovered {} resource(s)", found.len()));
                ResourceList::from(found)
            }
            Err(status) => {
                self.log
                    .log(&format!("resource discovery failed: {status}"));
                ResourceList::empty()
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.instrument.is_some()
    }
}

impl<D: InstrumentDriver> Drop for TransportSession<D> {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, resource: &str) -> Result<Connection, TransportError> {
        (**self).connect(resource)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect()
    }

    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).send(command)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).query(command)
    }

    fn list_resources(&mut self) -> ResourceList {
        (**self).list_resources()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
