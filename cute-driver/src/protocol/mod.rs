//! Protocol backends and their typed parameters.
//!
//! Each protocol registers a static [`ProtocolDescriptor`] with `inventory`.
//! The lifecycle looks descriptors up by id, so adding a protocol means
//! adding a module here and a [`TaskParams`] variant; nothing else changes.
//!
//! Parameters are a closed enum keyed by protocol. Opaque blobs (JSON from
//! tools, `#[repr(C)]` structs from firmware) are decoded into it at the
//! boundary, before a task is created.

use serde::{Deserialize, Serialize};

use crate::config::DriverConfig;
use crate::envelope::{Envelope, CUTE_STACK_MAXIMUM};
use crate::error::{Error, Result};
use crate::heap::{HeapLedger, TrackedBuffer};

pub mod echo;
pub mod loopback;

pub use echo::{EchoOutput, EchoParams};
pub use loopback::LoopbackParams;

/// Protocol selector as it crosses the C ABI.
pub type ProtocolId = u32;

/// Typed task parameters, one variant per protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskParams {
    Echo(EchoParams),
    Loopback(LoopbackParams),
}

impl TaskParams {
    /// Id of the protocol these parameters belong to.
    pub fn protocol_id(&self) -> ProtocolId {
        match self {
            TaskParams::Echo(_) => echo::ECHO,
            TaskParams::Loopback(_) => loopback::LOOPBACK,
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            TaskParams::Echo(_) => echo::NAME,
            TaskParams::Loopback(_) => loopback::NAME,
        }
    }

    /// Check the parameters against their protocol's limits.
    pub fn validate(&self, config: &DriverConfig) -> Result<()> {
        match self {
            TaskParams::Echo(params) => params.validate(),
            TaskParams::Loopback(params) => params.validate(config.max_loopback_len),
        }
    }

    /// Decode a protocol's JSON parameter blob.
    ///
    /// An empty blob selects the protocol's defaults, where it has any.
    pub fn from_json(protocol: ProtocolId, blob: &[u8]) -> Result<Self> {
        match protocol {
            echo::ECHO => {
                if blob.is_empty() {
                    return Ok(TaskParams::Echo(EchoParams::default()));
                }
                serde_json::from_slice(blob)
                    .map(TaskParams::Echo)
                    .map_err(|e| invalid(echo::NAME, e))
            }
            loopback::LOOPBACK => {
                if blob.is_empty() {
                    return Err(Error::InvalidParameter {
                        protocol: loopback::NAME,
                        reason: "loopback requires data".into(),
                    });
                }
                serde_json::from_slice(blob)
                    .map(TaskParams::Loopback)
                    .map_err(|e| invalid(loopback::NAME, e))
            }
            other => Err(Error::UnknownProtocol(other)),
        }
    }
}

fn invalid(protocol: &'static str, e: serde_json::Error) -> Error {
    Error::InvalidParameter {
        protocol,
        reason: e.to_string(),
    }
}

/// What a task may use from its context while it runs.
pub struct TaskEnv<'a> {
    pub ledger: &'a HeapLedger,
    pub config: &'a DriverConfig,
}

/// A created task of some protocol.
///
/// Execution is synchronous and runs to completion. A task owns at most
/// one heap buffer, the one behind its latest output; it is released on
/// the next execute or when the task is dropped in `destroy_task`.
pub trait DriverTask: Send {
    fn execute(&mut self, env: &TaskEnv<'_>) -> Result<Envelope>;
}

/// Static registration record for a protocol backend.
pub struct ProtocolDescriptor {
    pub id: ProtocolId,
    pub name: &'static str,
    /// One-time bring-up before the first task of this protocol.
    pub init_fn: fn(&DriverConfig) -> Result<()>,
    /// Validate parameters and build a task.
    pub create_fn: fn(TaskParams, &TaskEnv<'_>) -> Result<Box<dyn DriverTask>>,
}

inventory::collect!(ProtocolDescriptor);

/// Registry of protocols known to this build.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolRegistry;

impl ProtocolRegistry {
    pub fn find(&self, id: ProtocolId) -> Option<&'static ProtocolDescriptor> {
        inventory::iter::<ProtocolDescriptor>().find(|desc| desc.id == id)
    }

    /// All descriptors, ordered by id.
    pub fn descriptors(&self) -> Vec<&'static ProtocolDescriptor> {
        let mut all: Vec<_> = inventory::iter::<ProtocolDescriptor>().collect();
        all.sort_by_key(|desc| desc.id);
        all
    }
}

/// Wrap task output, inline when it fits, otherwise in a ledger buffer
/// held in `last`.
///
/// Whatever `last` held from the previous output is released first.
pub fn emit(
    env: &TaskEnv<'_>,
    last: &mut Option<TrackedBuffer>,
    data: Vec<u8>,
) -> Result<Envelope> {
    *last = None;
    if data.len() <= CUTE_STACK_MAXIMUM {
        return Envelope::stack_ok(&data);
    }
    let tracked = env.ledger.allocate(data);
    let envelope = Envelope::heap_ok(tracked.buffer());
    *last = Some(tracked);
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeCode;

    #[test]
    fn test_registry_lists_builtin_protocols() {
        let registry = ProtocolRegistry;
        let ids: Vec<_> = registry.descriptors().iter().map(|d| (d.id, d.name)).collect();
        assert_eq!(ids, vec![(0, "echo"), (2, "loopback")]);
        assert!(registry.find(1).is_none());
    }

    #[test]
    fn test_from_json() {
        let params = TaskParams::from_json(0, br#"{"initial_count": 3}"#).unwrap();
        assert_eq!(params, TaskParams::Echo(EchoParams { initial_count: 3 }));
        assert_eq!(
            TaskParams::from_json(0, b"").unwrap(),
            TaskParams::Echo(EchoParams::default())
        );

        let params = TaskParams::from_json(2, br#"{"data": [1, 2, 3]}"#).unwrap();
        assert_eq!(params.protocol_id(), 2);
    }

    #[test]
    fn test_from_json_errors_are_driver_faults() {
        let err = TaskParams::from_json(0, b"{not json").unwrap_err();
        assert!(err.is_driver_fault());
        let err = TaskParams::from_json(2, b"").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { protocol: "loopback", .. }));
        let err = TaskParams::from_json(1, b"{}").unwrap_err();
        assert!(matches!(err, Error::UnknownProtocol(1)));
    }

    #[test]
    fn test_validate_dispatch() {
        let config = DriverConfig {
            max_loopback_len: 2,
            ..Default::default()
        };
        assert!(TaskParams::Echo(EchoParams { initial_count: 0 }).validate(&config).is_ok());
        assert!(TaskParams::Echo(EchoParams { initial_count: -1 }).validate(&config).is_err());
        assert!(TaskParams::Loopback(LoopbackParams { data: vec![0; 3] })
            .validate(&config)
            .is_err());
    }

    #[test]
    fn test_tagged_json_form() {
        let params: TaskParams = serde_json::from_str(r#"{"echo": {"initial_count": 7}}"#).unwrap();
        assert_eq!(params.protocol_name(), "echo");
    }

    #[test]
    fn test_emit_picks_storage_by_size() {
        let ledger = HeapLedger::new();
        let config = DriverConfig::default();
        let env = TaskEnv {
            ledger: &ledger,
            config: &config,
        };
        let mut last = None;

        let small = emit(&env, &mut last, vec![1; CUTE_STACK_MAXIMUM]).unwrap();
        assert_eq!(small.code(), EnvelopeCode::StackOk);
        assert!(last.is_none());

        let large = emit(&env, &mut last, vec![2; CUTE_STACK_MAXIMUM + 1]).unwrap();
        assert_eq!(large.code(), EnvelopeCode::HeapOk);
        assert!(last.is_some());
        assert_eq!(ledger.live(), 1);

        drop(last);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_emit_replaces_previous_buffer() {
        let ledger = HeapLedger::new();
        let config = DriverConfig::default();
        let env = TaskEnv {
            ledger: &ledger,
            config: &config,
        };
        let mut last = None;

        let first = emit(&env, &mut last, vec![3; 600]).unwrap();
        let second = emit(&env, &mut last, vec![4; 700]).unwrap();
        let snap = ledger.snapshot();
        assert_eq!(snap.live, 1);
        assert_eq!(snap.released, 1);
        // The envelope keeps its own reference to the released buffer.
        assert_eq!(first.to_vec().unwrap(), vec![3; 600]);
        assert_eq!(second.to_vec().unwrap(), vec![4; 700]);

        emit(&env, &mut last, vec![5; 8]).unwrap();
        assert!(last.is_none());
        assert_eq!(ledger.live(), 0);
    }
}
