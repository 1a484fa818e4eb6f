//! Best-effort apply and refresh passes.
//!
//! A pass walks a channel's fields in order, talks to the transport once per
//! field and records failures instead of stopping at them. Finishing the pass
//! turns the recorded failures into an [`ApplyError`] or [`RefreshError`].

use tracing::debug;

use super::{ChannelCore, ChannelState};
use crate::error::{ApplyError, ConversionError, FieldFailure, FieldFailureCause, RefreshError};
use crate::transport::Transport;

pub(crate) struct ApplyPass<'a> {
    core: &'a mut ChannelCore,
    transport: &'a mut dyn Transport,
    attempted: usize,
    failures: Vec<FieldFailure>,
}

impl<'a> ApplyPass<'a> {
    pub(crate) fn begin(core: &'a mut ChannelCore, transport: &'a mut dyn Transport) -> Self {
        core.state = ChannelState::Applying;
        debug!(channel = core.index, "apply started");
        Self {
            core,
            transport,
            attempted: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn channel(&self) -> u8 {
        self.core.index
    }

    /// Send one command, recording the failure if it does not go out.
    pub(crate) fn send(&mut self, field: &'static str, command: Result<String, ConversionError>) {
        self.attempted += 1;
        let sent = command
            .map_err(FieldFailureCause::from)
            .and_then(|command| self.transport.send(&command).map_err(FieldFailureCause::from));
        if let Err(cause) = sent {
            self.core.log.log(&format!(
                "channel {}: {} not applied: {}",
                self.core.index, field, cause
            ));
            self.failures.push(FieldFailure::new(field, cause));
        }
    }

    pub(crate) fn finish(self) -> Result<(), ApplyError> {
        self.core.state = ChannelState::Idle;
        debug!(
            channel = self.core.index,
            attempted = self.attempted,
            failed = self.failures.len(),
            "apply finished"
        );
        if self.failures.is_empty() {
            self.core.log.log(&format!(
                "channel {}: applied {} setting(s)",
                self.core.index, self.attempted
            ));
            return Ok(());
        }
        Err(ApplyError {
            channel: self.core.index,
            attempted: self.attempted,
            failures: self.failures,
        })
    }
}

pub(crate) struct RefreshPass<'a> {
    core: &'a mut ChannelCore,
    transport: &'a mut dyn Transport,
    attempted: usize,
    failures: Vec<FieldFailure>,
}

impl<'a> RefreshPass<'a> {
    pub(crate) fn begin(core: &'a mut ChannelCore, transport: &'a mut dyn Transport) -> Self {
        debug!(channel = core.index, "refresh started");
        Self {
            core,
            transport,
            attempted: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn channel(&self) -> u8 {
        self.core.index
    }

    /// Query one field and hand the response to `absorb`. Fields with an
    /// unsent edit are skipped so the edit survives until it is applied.
    pub(crate) fn read(
        &mut self,
        field: &'static str,
        dirty: bool,
        command: String,
        absorb: impl FnOnce(&str) -> Result<(), FieldFailureCause>,
    ) {
        if dirty {
            self.core.log.log(&format!(
                "channel {}: {} has a pending edit, not refreshed",
                self.core.index, field
            ));
            return;
        }
        self.attempted += 1;
        let outcome = self
            .transport
            .query(&command)
            .map_err(FieldFailureCause::from)
            .and_then(|response| absorb(&response));
        if let Err(cause) = outcome {
            self.core.log.log(&format!(
                "channel {}: {} not refreshed: {}",
                self.core.index, field, cause
            ));
            self.failures.push(FieldFailure::new(field, cause));
        }
    }

    pub(crate) fn finish(self) -> Result<(), RefreshError> {
        debug!(
            channel = self.core.index,
            attempted = self.attempted,
            failed = self.failures.len(),
            "refresh finished"
        );
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(RefreshError {
            channel: self.core.index,
            attempted: self.attempted,
            failures: self.failures,
        })
    }
}
