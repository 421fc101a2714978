//! Task handles.
//!
//! A [`TaskHandle`] is what `create_task` hands back: the creation outcome
//! as an [`Envelope`], plus the task itself when creation succeeded. The
//! handle is consumed by `destroy_task`, so a destroyed task cannot be
//! executed again.

use std::fmt;
use strum::Display;

use crate::envelope::Envelope;
use crate::protocol::{DriverTask, ProtocolId};

/// Where a handle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskPhase {
    /// Created, not yet executed.
    Created,
    /// Executed at least once.
    Executed,
    /// Creation failed; the handle only carries the error.
    Failed,
}

/// Handle to a created (or failed) task.
pub struct TaskHandle {
    protocol: ProtocolId,
    context: u64,
    token: u64,
    envelope: Envelope,
    phase: TaskPhase,
    pub(crate) task: Option<Box<dyn DriverTask>>,
}

impl TaskHandle {
    pub(crate) fn live(
        protocol: ProtocolId,
        context: u64,
        token: u64,
        task: Box<dyn DriverTask>,
    ) -> Self {
        // 8 bytes always fit inline
        let envelope = Envelope::stack_ok(&token.to_le_bytes()).unwrap_or_else(Envelope::from);
        Self {
            protocol,
            context,
            token,
            envelope,
            phase: TaskPhase::Created,
            task: Some(task),
        }
    }

    pub(crate) fn failed(
        protocol: ProtocolId,
        context: u64,
        token: u64,
        envelope: Envelope,
    ) -> Self {
        Self {
            protocol,
            context,
            token,
            envelope,
            phase: TaskPhase::Failed,
            task: None,
        }
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    /// Creation outcome: `STACK_OK` carrying the task token, or the error.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Identifier unique within the creating context.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_live(&self) -> bool {
        self.task.is_some()
    }

    pub(crate) fn context(&self) -> u64 {
        self.context
    }

    pub(crate) fn mark_executed(&mut self) {
        if self.phase == TaskPhase::Created {
            self.phase = TaskPhase::Executed;
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("protocol", &self.protocol)
            .field("token", &self.token)
            .field("phase", &self.phase)
            .field("envelope", &self.envelope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeCode;
    use crate::error::Result;
    use crate::protocol::TaskEnv;

    struct Idle;

    impl DriverTask for Idle {
        fn execute(&mut self, _env: &TaskEnv<'_>) -> Result<Envelope> {
            Ok(Envelope::empty())
        }
    }

    #[test]
    fn test_live_handle_carries_token() {
        let handle = TaskHandle::live(0, 1, 42, Box::new(Idle));
        assert_eq!(handle.envelope().code(), EnvelopeCode::StackOk);
        assert_eq!(handle.envelope().inline_bytes().unwrap(), &42u64.to_le_bytes());
        assert_eq!(handle.phase(), TaskPhase::Created);
        assert!(handle.is_live());
    }

    #[test]
    fn test_failed_handle() {
        let handle = TaskHandle::failed(1, 1, 7, Envelope::driver_err("unknown protocol 1"));
        assert_eq!(handle.phase(), TaskPhase::Failed);
        assert!(!handle.is_live());
        assert_eq!(handle.envelope().code(), EnvelopeCode::DriverError);
    }

    #[test]
    fn test_phase_advances_once() {
        let mut handle = TaskHandle::live(0, 1, 1, Box::new(Idle));
        handle.mark_executed();
        handle.mark_executed();
        assert_eq!(handle.phase(), TaskPhase::Executed);
        assert_eq!(handle.phase().to_string(), "executed");

        let mut failed = TaskHandle::failed(0, 1, 2, Envelope::driver_err("bad"));
        failed.mark_executed();
        assert_eq!(failed.phase(), TaskPhase::Failed);
    }
}
