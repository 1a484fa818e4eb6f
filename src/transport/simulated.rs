//! Simulated function generator.
//!
//! [`SimulatedDriver`] implements [`InstrumentDriver`] entirely in memory. It
//! behaves like a simple SCPI device: `HEADER value` stores `value` under
//! `HEADER`, and `HEADER?` answers with whatever is stored. A query for a header
//! that was never set produces no response, so the following read times out,
//! as on real hardware.
//!
//! The driver records every command it receives and counts handle lifetimes,
//! which is what the transport and channel tests assert against. Faults can be
//! injected per header or per operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use super::driver::{
    InstrumentDriver, STATUS_IO_ERROR, STATUS_RESOURCE_NOT_FOUND, STATUS_SYSTEM_ERROR,
    STATUS_TIMEOUT,
};
use crate::error::DriverStatus;

/// Identity string answered to `*IDN?`.
pub const SIMULATED_IDENTITY: &str = "Simulated,SG-2000,SIM0001,1.0";

/// Resource string the simulator advertises by default.
pub const SIMULATED_RESOURCE: &str = "USB0::0x1AB1::0x0642::SIM0001::INSTR";

/// Power-on register contents for each channel, `{n}` standing for the index.
const CHANNEL_DEFAULTS: &[(&str, &str)] = &[
    ("SOUR{n}:FUNC", "SIN"),
    ("SOUR{n}:FREQ", "1000"),
    ("SOUR{n}:VOLT", "5"),
    ("SOUR{n}:VOLT:OFFS", "0"),
    ("SOUR{n}:PHAS", "0"),
    ("SOUR{n}:FUNC:SQU:DCYC", "50"),
    ("SOUR{n}:FUNC:RAMP:SYMM", "50"),
    ("SOUR{n}:FUNC:PULS:DCYC", "50"),
    ("OUTP{n}:STAT", "OFF"),
    ("SOUR{n}:MOD:TYP", "AM"),
    ("SOUR{n}:MOD:STAT", "OFF"),
    ("SOUR{n}:AM:DEPT", "100"),
    ("SOUR{n}:AM:INT:FREQ", "100"),
    ("SOUR{n}:AM:INT:FUNC", "SIN"),
    ("SOUR{n}:FM:DEV", "1000"),
    ("SOUR{n}:FM:INT:FREQ", "100"),
    ("SOUR{n}:FM:INT:FUNC", "SIN"),
    ("SOUR{n}:PM:DEV", "90"),
    ("SOUR{n}:PM:INT:FREQ", "100"),
    ("SOUR{n}:PM:INT:FUNC", "SIN"),
];

/// Resource manager handle of the simulator.
#[derive(Debug)]
pub struct SimResourceManager {
    id: u32,
}

/// Instrument handle of the simulator.
#[derive(Debug)]
pub struct SimInstrument {
    id: u32,
    resource: String,
}

impl SimInstrument {
    /// Resource string the handle was opened for.
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// Handle bookkeeping, for leak assertions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandleCounts {
    /// Resource managers opened.
    pub rm_opened: u32,
    /// Resource managers closed.
    pub rm_closed: u32,
    /// Instruments opened.
    pub instruments_opened: u32,
    /// Instruments closed.
    pub instruments_closed: u32,
    /// Go-to-local requests.
    pub go_to_local: u32,
}

impl HandleCounts {
    /// True when every opened handle was closed again.
    pub fn balanced(&self) -> bool {
        self.rm_opened == self.rm_closed && self.instruments_opened == self.instruments_closed
    }
}

/// In-memory SCPI function generator.
#[derive(Debug)]
pub struct SimulatedDriver {
    registers: BTreeMap<String, String>,
    resources: Vec<String>,
    written: Vec<String>,
    pending: Option<String>,
    counts: HandleCounts,
    next_id: u32,
    rm_unavailable: bool,
    open_failure: Option<DriverStatus>,
    enumeration_fails: bool,
    failing_headers: HashSet<String>,
    garbage: HashMap<String, String>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    /// A two-channel generator at its power-on defaults.
    pub fn new() -> Self {
        Self::with_channels(2)
    }

    /// A generator with `channels` outputs at their power-on defaults.
    pub fn with_channels(channels: u8) -> Self {
        let mut registers = BTreeMap::new();
        registers.insert("*IDN".to_string(), SIMULATED_IDENTITY.to_string());
        for n in 1..=channels {
            for (header, value) in CHANNEL_DEFAULTS {
                registers.insert(header.replace("{n}", &n.to_string()), value.to_string());
            }
        }
        Self {
            registers,
            resources: vec![SIMULATED_RESOURCE.to_string()],
            written: Vec::new(),
            pending: None,
            counts: HandleCounts::default(),
            next_id: 1,
            rm_unavailable: false,
            open_failure: None,
            enumeration_fails: false,
            failing_headers: HashSet::new(),
            garbage: HashMap::new(),
        }
    }

    /// Make `open_default_rm` fail.
    pub fn fail_resource_manager(mut self) -> Self {
        self.rm_unavailable = true;
        self
    }

    /// Make `open` fail with "resource not found".
    pub fn fail_open(mut self) -> Self {
        self.open_failure = Some(DriverStatus::new(
            STATUS_RESOURCE_NOT_FOUND,
            "resource not found",
        ));
        self
    }

    /// Make resource enumeration fail.
    pub fn fail_enumeration(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    /// Make every write to `header` (command or query) fail with an I/O error.
    pub fn fail_header(mut self, header: &str) -> Self {
        self.failing_headers.insert(header.to_string());
        self
    }

    /// Stop failing writes and queries to `header`.
    pub fn restore_header(&mut self, header: &str) {
        self.failing_headers.remove(header);
    }

    /// Answer queries for `header` with `response` regardless of its value.
    pub fn respond_with(mut self, header: &str, response: &str) -> Self {
        self.garbage.insert(header.to_string(), response.to_string());
        self
    }

    /// Replace the advertised resources.
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }

    /// Commands received so far, without terminators.
    pub fn written(&self) -> &[String] {
        &self.written
    }

    /// Forget the recorded commands.
    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    /// Current value of a register.
    pub fn register(&self, header: &str) -> Option<&str> {
        self.registers.get(header).map(String::as_str)
    }

    /// Overwrite a register, as if changed on the front panel.
    pub fn set_register(&mut self, header: &str, value: &str) {
        self.registers.insert(header.to_string(), value.to_string());
    }

    /// Handle bookkeeping.
    pub fn counts(&self) -> HandleCounts {
        self.counts
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn execute(&mut self, line: &str) -> Result<(), DriverStatus> {
        let (header, argument) = match line.split_once(' ') {
            Some((header, argument)) => (header, Some(argument.trim())),
            None => (line, None),
        };
        let (header, is_query) = match header.strip_suffix('?') {
            Some(header) => (header, true),
            None => (header, false),
        };
        if self.failing_headers.contains(header) {
            return Err(DriverStatus::new(STATUS_IO_ERROR, "I/O error"));
        }

        if is_query {
            self.pending = self
                .garbage
                .get(header)
                .or_else(|| self.registers.get(header))
                .cloned();
        } else if let Some(argument) = argument {
            self.registers
                .insert(header.to_string(), argument.to_string());
        }
        Ok(())
    }
}

impl InstrumentDriver for SimulatedDriver {
    type ResourceManager = SimResourceManager;
    type Instrument = SimInstrument;

    fn open_default_rm(&mut self) -> Result<SimResourceManager, DriverStatus> {
        if self.rm_unavailable {
            return Err(DriverStatus::new(
                STATUS_SYSTEM_ERROR,
                "no VISA implementation installed",
            ));
        }
        self.counts.rm_opened += 1;
        Ok(SimResourceManager { id: self.next_id() })
    }

    fn open(
        &mut self,
        _rm: &SimResourceManager,
        resource: &str,
        _timeout: Duration,
    ) -> Result<SimInstrument, DriverStatus> {
        if let Some(status) = &self.open_failure {
            return Err(status.clone());
        }
        self.counts.instruments_opened += 1;
        self.pending = None;
        Ok(SimInstrument {
            id: self.next_id(),
            resource: resource.to_string(),
        })
    }

    fn write(&mut self, _instr: &mut SimInstrument, bytes: &[u8]) -> Result<usize, DriverStatus> {
        let text: String = bytes.iter().map(|&b| char::from(b)).collect();
        let line = text.trim_end_matches(['\r', '\n']).to_string();
        self.written.push(line.clone());
        self.execute(&line)?;
        Ok(bytes.len())
    }

    fn read(&mut self, _instr: &mut SimInstrument, buf: &mut [u8]) -> Result<usize, DriverStatus> {
        let response = self.pending.take().ok_or_else(|| {
            DriverStatus::new(STATUS_TIMEOUT, "timeout expired before operation completed")
        })?;
        let bytes = format!("{response}\n").into_bytes();
        let count = bytes.len().min(buf.len());
        buf[..count].copy_from_slice(&bytes[..count]);
        Ok(count)
    }

    fn go_to_local(&mut self, _instr: &mut SimInstrument) -> Result<(), DriverStatus> {
        self.counts.go_to_local += 1;
        Ok(())
    }

    fn close_instrument(&mut self, instr: SimInstrument) -> Result<(), DriverStatus> {
        tracing::trace!(id = instr.id, "simulated instrument closed");
        self.counts.instruments_closed += 1;
        Ok(())
    }

    fn close_rm(&mut self, rm: SimResourceManager) -> Result<(), DriverStatus> {
        tracing::trace!(id = rm.id, "simulated resource manager closed");
        self.counts.rm_closed += 1;
        Ok(())
    }

    fn find_resources(
        &mut self,
        _rm: &SimResourceManager,
        _filter: &str,
    ) -> Result<Vec<String>, DriverStatus> {
        if self.enumeration_fails {
            return Err(DriverStatus::new(
                STATUS_RESOURCE_NOT_FOUND,
                "no resources matched the filter",
            ));
        }
        Ok(self.resources.clone())
    }
}
