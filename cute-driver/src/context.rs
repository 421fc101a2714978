//! Driver task lifecycle.
//!
//! [`DriverContext`] owns what the lifecycle needs: configuration, the set
//! of initialized protocols, and the heap ledger tasks allocate from. Every
//! operation reports through an [`Envelope`]; nothing here panics or
//! returns a Rust error across the lifecycle surface.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{DriverConfig, InitPolicy};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::heap::HeapLedger;
use crate::protocol::{
    DriverTask, ProtocolDescriptor, ProtocolId, ProtocolRegistry, TaskEnv, TaskParams,
};
use crate::task::{TaskHandle, TaskPhase};
use crate::tracing::prelude::*;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state for one driver instance.
pub struct DriverContext {
    id: u64,
    config: DriverConfig,
    registry: ProtocolRegistry,
    ledger: HeapLedger,
    initialized: BTreeSet<ProtocolId>,
    next_token: u64,
    live_tasks: usize,
}

impl DriverContext {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            config,
            registry: ProtocolRegistry,
            ledger: HeapLedger::new(),
            initialized: BTreeSet::new(),
            next_token: 1,
            live_tasks: 0,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn ledger(&self) -> &HeapLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Number of created tasks not yet destroyed.
    pub fn live_tasks(&self) -> usize {
        self.live_tasks
    }

    pub fn is_initialized(&self, protocol: ProtocolId) -> bool {
        self.initialized.contains(&protocol)
    }

    /// Bring up every registered protocol.
    ///
    /// Returns `EMPTY` on success. Once everything is up, a further call is
    /// governed by [`InitPolicy`]: a no-op under `Idempotent`, an
    /// `INTERNAL_ERROR` under `Strict`.
    pub fn init(&mut self) -> Envelope {
        let pending: Vec<_> = self
            .registry
            .descriptors()
            .into_iter()
            .filter(|desc| !self.initialized.contains(&desc.id))
            .collect();

        if pending.is_empty() {
            return self.reinit(None);
        }

        for desc in pending {
            if let Err(e) = self.bring_up(desc) {
                return Envelope::from(&e);
            }
        }
        info!(protocols = self.initialized.len(), "Driver initialized");
        Envelope::empty()
    }

    /// Bring up a single protocol.
    pub fn init_protocol(&mut self, protocol: ProtocolId) -> Envelope {
        let Some(desc) = self.registry.find(protocol) else {
            let e = Error::UnknownProtocol(protocol);
            warn!(protocol, error = %e, "Init failed");
            return Envelope::from(&e);
        };
        if self.initialized.contains(&protocol) {
            return self.reinit(Some(desc.name));
        }
        match self.bring_up(desc) {
            Ok(()) => Envelope::empty(),
            Err(e) => Envelope::from(&e),
        }
    }

    fn reinit(&self, name: Option<&str>) -> Envelope {
        match self.config.init_policy {
            InitPolicy::Idempotent => {
                debug!(protocol = name.unwrap_or("all"), "Already initialized");
                Envelope::empty()
            }
            InitPolicy::Strict => {
                warn!(protocol = name.unwrap_or("all"), "Repeated init rejected");
                Envelope::from(Error::AlreadyInitialized)
            }
        }
    }

    fn bring_up(&mut self, desc: &'static ProtocolDescriptor) -> Result<()> {
        (desc.init_fn)(&self.config).inspect_err(|e| {
            error!(protocol = desc.name, error = %e, "Protocol init failed");
        })?;
        self.initialized.insert(desc.id);
        debug!(protocol = desc.name, id = desc.id, "Protocol initialized");
        Ok(())
    }

    /// Create a task of `protocol` from typed parameters.
    ///
    /// The returned handle's envelope is `STACK_OK` (the task token) on
    /// success, `DRIVER_ERROR` for an unknown protocol or rejected
    /// parameters, `INTERNAL_ERROR` when the protocol was never initialized.
    pub fn create_task(&mut self, protocol: ProtocolId, params: TaskParams) -> TaskHandle {
        let token = self.next_token;
        self.next_token += 1;

        match self.build_task(protocol, params) {
            Ok(task) => {
                self.live_tasks += 1;
                debug!(protocol, token, "Task created");
                TaskHandle::live(protocol, self.id, token, task)
            }
            Err(e) => {
                warn!(protocol, error = %e, "Task creation failed");
                TaskHandle::failed(protocol, self.id, token, Envelope::from(&e))
            }
        }
    }

    /// Create a task from an opaque JSON parameter blob.
    pub fn create_task_raw(&mut self, protocol: ProtocolId, blob: &[u8]) -> TaskHandle {
        match TaskParams::from_json(protocol, blob) {
            Ok(params) => self.create_task(protocol, params),
            Err(e) => {
                let token = self.next_token;
                self.next_token += 1;
                warn!(protocol, error = %e, "Task parameters rejected");
                TaskHandle::failed(protocol, self.id, token, Envelope::from(&e))
            }
        }
    }

    fn build_task(&self, protocol: ProtocolId, params: TaskParams) -> Result<Box<dyn DriverTask>> {
        let desc = self.registry.find(protocol).ok_or(Error::UnknownProtocol(protocol))?;
        if !self.initialized.contains(&protocol) {
            return Err(Error::NotInitialized);
        }
        if params.protocol_id() != protocol {
            return Err(Error::ParameterMismatch {
                expected: protocol,
                given: params.protocol_name(),
            });
        }
        (desc.create_fn)(params, &self.task_env())
    }

    fn task_env(&self) -> TaskEnv<'_> {
        TaskEnv {
            ledger: &self.ledger,
            config: &self.config,
        }
    }

    /// Run one execution of the task behind `handle`.
    ///
    /// Returns a fresh envelope each call; the handle's own envelope keeps
    /// the creation outcome. A handle whose creation failed reports that
    /// same error again.
    pub fn execute_task(&self, handle: &mut TaskHandle) -> Envelope {
        if handle.context() != self.id {
            warn!(token = handle.token(), "Handle from another context");
            return Envelope::from(Error::StaleHandle);
        }
        if handle.phase() == TaskPhase::Failed {
            return handle.envelope().clone();
        }
        if !self.initialized.contains(&handle.protocol()) {
            return Envelope::from(Error::NotInitialized);
        }

        let env = self.task_env();
        let Some(task) = handle.task.as_mut() else {
            return Envelope::from(Error::StaleHandle);
        };
        let outcome = task.execute(&env);
        handle.mark_executed();

        match outcome {
            Ok(envelope) => {
                trace!(
                    protocol = handle.protocol(),
                    token = handle.token(),
                    result = %envelope,
                    "Task executed"
                );
                envelope
            }
            Err(e) => {
                warn!(
                    protocol = handle.protocol(),
                    token = handle.token(),
                    error = %e,
                    "Task execution failed"
                );
                Envelope::from(&e)
            }
        }
    }

    /// Release the task and everything it allocated.
    ///
    /// Destroying a failed handle does nothing.
    pub fn destroy_task(&mut self, mut handle: TaskHandle) {
        let Some(task) = handle.task.take() else {
            trace!(token = handle.token(), "Destroy of failed handle ignored");
            return;
        };
        if handle.context() == self.id {
            self.live_tasks = self.live_tasks.saturating_sub(1);
        } else {
            warn!(token = handle.token(), "Destroying handle from another context");
        }
        drop(task);
        debug!(protocol = handle.protocol(), token = handle.token(), "Task destroyed");
    }

    /// Tear the context down.
    ///
    /// Tasks still alive keep their buffers until their handles are dropped.
    pub fn shutdown(self) {
        if self.live_tasks > 0 {
            warn!(live = self.live_tasks, "Shutting down with live tasks");
        }
        let snap = self.ledger.snapshot();
        info!(
            allocated = snap.allocated,
            released = snap.released,
            live = snap.live,
            "Driver shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeCode, CUTE_STACK_MAXIMUM};
    use crate::protocol::{EchoOutput, EchoParams, LoopbackParams};

    fn ready() -> DriverContext {
        let mut ctx = DriverContext::new(DriverConfig::default());
        assert_eq!(ctx.init(), Envelope::empty());
        ctx
    }

    fn echo(count: i32) -> TaskParams {
        TaskParams::Echo(EchoParams { initial_count: count })
    }

    #[test]
    fn test_echo_lifecycle() {
        let mut ctx = ready();
        let mut handle = ctx.create_task(0, echo(0));
        assert_eq!(handle.envelope().code(), EnvelopeCode::StackOk);
        let created = handle.envelope().clone();

        let first = ctx.execute_task(&mut handle);
        let second = ctx.execute_task(&mut handle);
        assert_eq!(EchoOutput::try_from(&first).unwrap().count, 1);
        assert_eq!(EchoOutput::try_from(&second).unwrap().count, 2);
        assert_eq!(handle.envelope(), &created);
        assert_eq!(handle.phase(), TaskPhase::Executed);

        ctx.destroy_task(handle);
        assert_eq!(ctx.live_tasks(), 0);
    }

    #[test]
    fn test_unknown_protocol() {
        let mut ctx = ready();
        let mut handle = ctx.create_task(1, echo(0));
        assert_eq!(handle.envelope().code(), EnvelopeCode::DriverError);
        assert_eq!(handle.phase(), TaskPhase::Failed);

        let out = ctx.execute_task(&mut handle);
        assert_eq!(out.code(), EnvelopeCode::DriverError);
        assert_eq!(out.error_message().unwrap(), "unknown protocol 1");

        ctx.destroy_task(handle);
        assert_eq!(ctx.live_tasks(), 0);
    }

    #[test]
    fn test_bad_params_are_driver_errors() {
        let mut ctx = ready();
        let handle = ctx.create_task(0, echo(-3));
        assert_eq!(handle.envelope().code(), EnvelopeCode::DriverError);

        let handle = ctx.create_task(0, TaskParams::Loopback(LoopbackParams { data: vec![1] }));
        assert_eq!(handle.envelope().code(), EnvelopeCode::DriverError);

        let handle = ctx.create_task_raw(0, b"[1, 2");
        assert_eq!(handle.envelope().code(), EnvelopeCode::DriverError);
        assert_eq!(ctx.live_tasks(), 0);
    }

    #[test]
    fn test_create_before_init() {
        let mut ctx = DriverContext::new(DriverConfig::default());
        let handle = ctx.create_task(0, echo(0));
        assert_eq!(handle.envelope().code(), EnvelopeCode::InternalError);
        assert_eq!(handle.envelope().error_message().unwrap(), "driver not initialized");
    }

    #[test]
    fn test_double_init_idempotent() {
        let mut ctx = ready();
        let mut handle = ctx.create_task(0, echo(10));
        ctx.execute_task(&mut handle);

        assert_eq!(ctx.init(), Envelope::empty());
        assert_eq!(ctx.init_protocol(0), Envelope::empty());

        // Existing tasks keep their state across the repeated init.
        let out = ctx.execute_task(&mut handle);
        assert_eq!(EchoOutput::try_from(&out).unwrap().count, 12);
        ctx.destroy_task(handle);
    }

    #[test]
    fn test_double_init_strict() {
        let config = DriverConfig {
            init_policy: InitPolicy::Strict,
            ..Default::default()
        };
        let mut ctx = DriverContext::new(config);
        assert_eq!(ctx.init(), Envelope::empty());
        assert_eq!(ctx.init().code(), EnvelopeCode::InternalError);
        assert_eq!(ctx.init_protocol(2).code(), EnvelopeCode::InternalError);
    }

    #[test]
    fn test_init_single_protocol() {
        let mut ctx = DriverContext::new(DriverConfig::default());
        assert_eq!(ctx.init_protocol(0), Envelope::empty());
        assert!(ctx.is_initialized(0));
        assert!(!ctx.is_initialized(2));
        assert_eq!(ctx.init_protocol(1).code(), EnvelopeCode::DriverError);

        let handle = ctx.create_task(2, TaskParams::Loopback(LoopbackParams { data: vec![1] }));
        assert_eq!(handle.envelope().code(), EnvelopeCode::InternalError);

        // Full init picks up what is still missing.
        assert_eq!(ctx.init(), Envelope::empty());
        assert!(ctx.is_initialized(2));
    }

    #[test]
    fn test_heap_results_do_not_leak() {
        let mut ctx = ready();
        let data = vec![0x5A; CUTE_STACK_MAXIMUM * 4];
        let params = TaskParams::Loopback(LoopbackParams { data: data.clone() });
        let mut handle = ctx.create_task(2, params);

        for _ in 0..100 {
            let out = ctx.execute_task(&mut handle);
            assert_eq!(out.code(), EnvelopeCode::HeapOk);
            assert_eq!(out.heap().unwrap().to_vec(), data);
            assert!(ctx.ledger().live() <= 1);
        }
        assert_eq!(ctx.ledger().live(), 1);

        ctx.destroy_task(handle);
        let snap = ctx.ledger().snapshot();
        assert_eq!(snap.live, 0);
        assert_eq!(snap.allocated, snap.released);
    }

    #[test]
    fn test_handle_from_other_context() {
        let mut a = ready();
        let b = ready();
        let mut handle = a.create_task(0, echo(0));
        assert_eq!(b.execute_task(&mut handle).code(), EnvelopeCode::InternalError);
        assert_eq!(handle.phase(), TaskPhase::Created);
        a.destroy_task(handle);
    }

    #[test]
    fn test_tokens_unique() {
        let mut ctx = ready();
        let a = ctx.create_task(0, echo(0));
        let b = ctx.create_task(0, echo(0));
        assert_ne!(a.token(), b.token());
        assert_ne!(a.envelope(), b.envelope());
        assert_eq!(ctx.live_tasks(), 2);
        ctx.destroy_task(a);
        ctx.destroy_task(b);
        ctx.shutdown();
    }
}
