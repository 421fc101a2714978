//! The `board_high` board: an echo-only lifecycle.

use super::Board;
use crate::config::DriverConfig;
use crate::context::DriverContext;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::protocol::echo::ECHO;
use crate::protocol::{EchoParams, TaskParams};
use crate::task::TaskHandle;
use crate::tracing::prelude::*;

pub const BOARD_HIGH_NAME: &str = "board_high";

/// Echo lifecycle on its own driver context.
pub struct BoardHigh {
    ctx: DriverContext,
}

impl BoardHigh {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            ctx: DriverContext::new(config),
        }
    }

    pub fn get_board_high_name() -> &'static str {
        BOARD_HIGH_NAME
    }

    pub fn context(&self) -> &DriverContext {
        &self.ctx
    }

    pub(crate) fn context_mut(&mut self) -> &mut DriverContext {
        &mut self.ctx
    }

    pub fn init_board_high(&mut self) -> Envelope {
        let result = self.ctx.init_protocol(ECHO);
        if result.is_ok() {
            info!(board = BOARD_HIGH_NAME, "Board initialized");
        }
        result
    }

    pub fn create_echo_task(&mut self, params: EchoParams) -> TaskHandle {
        self.ctx.create_task(ECHO, TaskParams::Echo(params))
    }

    pub fn execute_echo_task(&self, handle: &mut TaskHandle) -> Envelope {
        if handle.protocol() != ECHO {
            return Envelope::from(Error::ParameterMismatch {
                expected: ECHO,
                given: "non-echo handle",
            });
        }
        self.ctx.execute_task(handle)
    }

    pub fn destroy_echo_task(&mut self, handle: TaskHandle) {
        self.ctx.destroy_task(handle);
    }

    pub fn destroy_board_high(self) {
        debug!(board = BOARD_HIGH_NAME, "Board destroyed");
        self.ctx.shutdown();
    }
}

impl Board for BoardHigh {
    fn name(&self) -> &'static str {
        BOARD_HIGH_NAME
    }

    fn init(&mut self) -> Envelope {
        self.init_board_high()
    }
}
