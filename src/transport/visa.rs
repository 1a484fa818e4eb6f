//! VISA driver for GPIB/USB/Ethernet instruments
//!
//! [`InstrumentDriver`] implementation over the `visa-rs` crate, which binds
//! the system VISA library. Enabled with the `instrument_visa` feature.
//!
//! Supports resource strings like:
//! - "GPIB0::10::INSTR" (GPIB interface)
//! - "USB0::0x1AB1::0x0642::DG1ZA0001::INSTR" (USB-TMC)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)

use std::ffi::CString;
use std::io::{Read, Write};
use std::time::Duration;

use visa_rs::prelude::*;

use super::driver::{InstrumentDriver, STATUS_IO_ERROR, STATUS_RESOURCE_NOT_FOUND};
use crate::error::DriverStatus;

fn status_of(err: visa_rs::Error) -> DriverStatus {
    DriverStatus::new(err.0 as i32, format!("{err:?}"))
}

fn io_status(err: std::io::Error) -> DriverStatus {
    DriverStatus::new(STATUS_IO_ERROR, err.to_string())
}

fn visa_string(text: &str) -> Result<VisaString, DriverStatus> {
    CString::new(text)
        .map(VisaString::from)
        .map_err(|_| DriverStatus::new(STATUS_RESOURCE_NOT_FOUND, "resource string contains NUL"))
}

/// VISA-backed driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct VisaDriver;

impl VisaDriver {
    /// Create the driver. The VISA library is loaded on the first open.
    pub fn new() -> Self {
        Self
    }
}

impl InstrumentDriver for VisaDriver {
    type ResourceManager = DefaultRM;
    type Instrument = Instrument;

    fn open_default_rm(&mut self) -> Result<DefaultRM, DriverStatus> {
        DefaultRM::new().map_err(status_of)
    }

    fn open(
        &mut self,
        rm: &DefaultRM,
        resource: &str,
        timeout: Duration,
    ) -> Result<Instrument, DriverStatus> {
        let resource = visa_string(resource)?;
        rm.open(&resource, AccessMode::NO_LOCK, timeout)
            .map_err(status_of)
    }

    fn write(&mut self, instr: &mut Instrument, bytes: &[u8]) -> Result<usize, DriverStatus> {
        instr.write(bytes).map_err(io_status)
    }

    fn read(&mut self, instr: &mut Instrument, buf: &mut [u8]) -> Result<usize, DriverStatus> {
        instr.read(buf).map_err(io_status)
    }

    fn go_to_local(&mut self, instr: &mut Instrument) -> Result<(), DriverStatus> {
        instr
            .visa_gpib_control_ren(visa_rs::enums::gpib::RenMode::AddressGtl)
            .map_err(status_of)
    }

    fn close_instrument(&mut self, instr: Instrument) -> Result<(), DriverStatus> {
        drop(instr);
        Ok(())
    }

    fn close_rm(&mut self, rm: DefaultRM) -> Result<(), DriverStatus> {
        drop(rm);
        Ok(())
    }

    fn find_resources(
        &mut self,
        rm: &DefaultRM,
        filter: &str,
    ) -> Result<Vec<String>, DriverStatus> {
        let filter = visa_string(filter)?;
        let mut list = rm.find_res_list(&filter).map_err(status_of)?;
        let mut found = Vec::new();
        while let Some(resource) = list.find_next().map_err(status_of)? {
            found.push(resource.to_string());
        }
        Ok(found)
    }
}
