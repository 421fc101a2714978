//! Echo protocol.
//!
//! Each execute bumps a counter and reports it as a little-endian `i32`
//! in a `STACK_OK` envelope.

use serde::{Deserialize, Serialize};

use super::{DriverTask, ProtocolDescriptor, ProtocolId, TaskEnv, TaskParams};
use crate::config::DriverConfig;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub const ECHO: ProtocolId = 0;
pub const NAME: &str = "echo";

/// Echo task parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoParams {
    /// Counter value before the first execute
    #[serde(default)]
    pub initial_count: i32,
}

impl EchoParams {
    pub fn validate(&self) -> Result<()> {
        if self.initial_count < 0 {
            return Err(Error::InvalidParameter {
                protocol: NAME,
                reason: format!("initial_count {} is negative", self.initial_count),
            });
        }
        Ok(())
    }
}

/// Decoded result of one echo execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoOutput {
    pub count: i32,
}

impl EchoOutput {
    pub fn to_bytes(self) -> [u8; 4] {
        self.count.to_le_bytes()
    }
}

impl TryFrom<&Envelope> for EchoOutput {
    type Error = Error;

    fn try_from(envelope: &Envelope) -> Result<Self> {
        envelope.check()?;
        let bytes: [u8; 4] = envelope
            .inline_bytes()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                Error::Internal(format!("echo output expected 4 inline bytes, got {envelope}"))
            })?;
        Ok(EchoOutput {
            count: i32::from_le_bytes(bytes),
        })
    }
}

struct EchoTask {
    count: i32,
}

impl DriverTask for EchoTask {
    fn execute(&mut self, _env: &TaskEnv<'_>) -> Result<Envelope> {
        self.count = self
            .count
            .checked_add(1)
            .ok_or_else(|| Error::Driver("echo counter overflow".into()))?;
        trace!(count = self.count, "Echo executed");
        Envelope::stack_ok(&EchoOutput { count: self.count }.to_bytes())
    }
}

fn init(_config: &DriverConfig) -> Result<()> {
    debug!("Echo protocol ready");
    Ok(())
}

fn create(params: TaskParams, _env: &TaskEnv<'_>) -> Result<Box<dyn DriverTask>> {
    match params {
        TaskParams::Echo(params) => {
            params.validate()?;
            Ok(Box::new(EchoTask {
                count: params.initial_count,
            }))
        }
        other => Err(Error::ParameterMismatch {
            expected: ECHO,
            given: other.protocol_name(),
        }),
    }
}

inventory::submit! {
    ProtocolDescriptor {
        id: ECHO,
        name: NAME,
        init_fn: init,
        create_fn: create,
    }
}
