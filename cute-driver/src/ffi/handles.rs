//! Task handles as C sees them.
//!
//! C cannot hold a [`TaskHandle`], so live handles sit in a slot map and C
//! gets a 12-byte `STACK_OK` payload: the issuing table's id followed by
//! the slot key. A removed slot invalidates the key; reuse of the slot
//! bumps its version, so a stale key never reaches a newer task. The table
//! id keeps a handle from one runtime from resolving in another.

use slotmap::{Key, KeyData, SlotMap};
use std::sync::atomic::{AtomicU32, Ordering};

use super::raw::{cute_driver_result, TASK_REF_LEN};
use crate::context::DriverContext;
use crate::envelope::{Envelope, EnvelopeCode};
use crate::error::Error;
use crate::protocol::ProtocolId;
use crate::task::TaskHandle;
use crate::tracing::prelude::*;

static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(1);

slotmap::new_key_type! {
    /// Slot key of a live task.
    pub struct TaskKey;
}

struct Slot {
    handle: TaskHandle,
    // Backing store for the last HEAP_OK pointer handed out.
    output: Vec<u8>,
}

/// Live tasks created through the C surface.
pub struct HandleTable {
    id: u32,
    slots: SlotMap<TaskKey, Slot>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            slots: SlotMap::with_key(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn to_result(&self, key: TaskKey) -> cute_driver_result {
        let mut bytes = [0u8; TASK_REF_LEN];
        bytes[..4].copy_from_slice(&self.id.to_le_bytes());
        bytes[4..].copy_from_slice(&key.data().as_ffi().to_le_bytes());
        match Envelope::stack_ok(&bytes) {
            Ok(envelope) => cute_driver_result::from(&envelope),
            Err(e) => cute_driver_result::from(&Envelope::from(e)),
        }
    }

    /// Key of a handle this table issued; `None` for anything else.
    fn resolve(&self, raw: &cute_driver_result) -> Option<TaskKey> {
        let (table, key) = raw.task_ref()?;
        if table != self.id {
            debug!(table, expected = self.id, "Handle from another table");
            return None;
        }
        Some(KeyData::from_ffi(key).into())
    }

    /// Park a freshly created handle and return what C should hold.
    ///
    /// Failed handles are not stored; C gets their error directly.
    pub fn insert(&mut self, handle: TaskHandle) -> cute_driver_result {
        if !handle.is_live() {
            return cute_driver_result::from(handle.envelope());
        }
        let key = self.slots.insert(Slot {
            handle,
            output: Vec::new(),
        });
        self.to_result(key)
    }

    /// Execute the task `raw` refers to.
    ///
    /// Error results are handed back unchanged, so executing the outcome of
    /// a failed create reports the same error again.
    pub fn execute(
        &mut self,
        ctx: &DriverContext,
        protocol: ProtocolId,
        raw: &cute_driver_result,
    ) -> cute_driver_result {
        match raw.code() {
            Some(EnvelopeCode::InternalError | EnvelopeCode::DriverError) => return *raw,
            Some(EnvelopeCode::StackOk) => {}
            _ => return cute_driver_result::from(&Envelope::internal_err("not a task handle")),
        }
        let key = self.resolve(raw);
        let Some(slot) = key.and_then(|key| self.slots.get_mut(key)) else {
            return cute_driver_result::from(&Envelope::from(Error::StaleHandle));
        };
        if slot.handle.protocol() != protocol {
            warn!(protocol, owner = slot.handle.protocol(), "Execute with wrong protocol");
            return cute_driver_result::from(&Envelope::internal_err(format!(
                "handle belongs to protocol {}",
                slot.handle.protocol()
            )));
        }
        let envelope = ctx.execute_task(&mut slot.handle);
        cute_driver_result::from_envelope(&envelope, &mut slot.output)
    }

    /// Destroy the task `raw` refers to, if this table issued it. Returns
    /// whether a task was destroyed.
    pub fn destroy(
        &mut self,
        ctx: &mut DriverContext,
        protocol: ProtocolId,
        raw: &cute_driver_result,
    ) -> bool {
        let key = self.resolve(raw);
        let Some(slot) = key.and_then(|key| self.slots.remove(key)) else {
            return false;
        };
        if slot.handle.protocol() != protocol {
            warn!(protocol, owner = slot.handle.protocol(), "Destroy with wrong protocol");
        }
        ctx.destroy_task(slot.handle);
        true
    }

    /// Destroy every remaining task.
    pub fn drain(&mut self, ctx: &mut DriverContext) {
        for (_, slot) in self.slots.drain() {
            ctx.destroy_task(slot.handle);
        }
    }
}
