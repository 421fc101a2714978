//! Loopback protocol.
//!
//! Returns the bytes it was created with on every execute. Payloads up to
//! the inline capacity come back as `STACK_OK`; larger ones as `HEAP_OK`
//! backed by a ledger buffer the task keeps until its next execute or
//! until it is destroyed.

use serde::{Deserialize, Serialize};

use super::{emit, DriverTask, ProtocolDescriptor, ProtocolId, TaskEnv, TaskParams};
use crate::config::DriverConfig;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::heap::TrackedBuffer;
use crate::tracing::prelude::*;

pub const LOOPBACK: ProtocolId = 2;
pub const NAME: &str = "loopback";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopbackParams {
    pub data: Vec<u8>,
}

impl LoopbackParams {
    pub fn validate(&self, max_len: usize) -> Result<()> {
        if self.data.len() > max_len {
            return Err(Error::InvalidParameter {
                protocol: NAME,
                reason: format!("{} bytes exceeds limit of {max_len}", self.data.len()),
            });
        }
        Ok(())
    }
}

struct LoopbackTask {
    data: Vec<u8>,
    last: Option<TrackedBuffer>,
}

impl DriverTask for LoopbackTask {
    fn execute(&mut self, env: &TaskEnv<'_>) -> Result<Envelope> {
        trace!(len = self.data.len(), "Loopback executed");
        emit(env, &mut self.last, self.data.clone())
    }
}

fn init(config: &DriverConfig) -> Result<()> {
    debug!(max_len = config.max_loopback_len, "Loopback protocol ready");
    Ok(())
}

fn create(params: TaskParams, env: &TaskEnv<'_>) -> Result<Box<dyn DriverTask>> {
    match params {
        TaskParams::Loopback(params) => {
            params.validate(env.config.max_loopback_len)?;
            Ok(Box::new(LoopbackTask {
                data: params.data,
                last: None,
            }))
        }
        other => Err(Error::ParameterMismatch {
            expected: LOOPBACK,
            given: other.protocol_name(),
        }),
    }
}

inventory::submit! {
    ProtocolDescriptor {
        id: LOOPBACK,
        name: NAME,
        init_fn: init,
        create_fn: create,
    }
}
