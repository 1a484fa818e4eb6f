//! Native instrument library seam.
//!
//! [`InstrumentDriver`] is the narrow surface the session needs from a
//! VISA-like library: open a resource manager, open an instrument scoped to a
//! resource string, move bytes, and close everything again. Implementations
//! report failures as [`DriverStatus`] values carrying the library's own status
//! code; turning those into [`TransportError`](crate::error::TransportError)s is
//! the session's job.

use std::time::Duration;

use crate::error::DriverStatus;

/// VISA "timeout expired" status.
pub const STATUS_TIMEOUT: i32 = 0xBFFF_0015_u32 as i32;
/// VISA "resource not found" status.
pub const STATUS_RESOURCE_NOT_FOUND: i32 = 0xBFFF_0011_u32 as i32;
/// VISA "system error" status, used for unavailable resource managers.
pub const STATUS_SYSTEM_ERROR: i32 = 0xBFFF_0000_u32 as i32;
/// VISA "I/O error" status.
pub const STATUS_IO_ERROR: i32 = 0xBFFF_003E_u32 as i32;

/// Byte-level access to instruments through a native library.
pub trait InstrumentDriver {
    /// Resource manager handle.
    type ResourceManager;
    /// Open instrument handle.
    type Instrument;

    /// Open the default resource manager.
    fn open_default_rm(&mut self) -> Result<Self::ResourceManager, DriverStatus>;

    /// Open the instrument identified by `resource`.
    fn open(
        &mut self,
        rm: &Self::ResourceManager,
        resource: &str,
        timeout: Duration,
    ) -> Result<Self::Instrument, DriverStatus>;

    /// Write `bytes` in a single call; returns the number of bytes accepted.
    fn write(&mut self, instr: &mut Self::Instrument, bytes: &[u8]) -> Result<usize, DriverStatus>;

    /// Read into `buf`; returns the number of bytes received.
    fn read(&mut self, instr: &mut Self::Instrument, buf: &mut [u8]) -> Result<usize, DriverStatus>;

    /// Return the instrument to front-panel (local) control.
    fn go_to_local(&mut self, instr: &mut Self::Instrument) -> Result<(), DriverStatus>;

    /// Close an instrument handle.
    fn close_instrument(&mut self, instr: Self::Instrument) -> Result<(), DriverStatus>;

    /// Close a resource manager handle.
    fn close_rm(&mut self, rm: Self::ResourceManager) -> Result<(), DriverStatus>;

    /// Enumerate resource strings matching `filter` (e.g. `?*INSTR`).
    fn find_resources(
        &mut self,
        rm: &Self::ResourceManager,
        filter: &str,
    ) -> Result<Vec<String>, DriverStatus>;
}
