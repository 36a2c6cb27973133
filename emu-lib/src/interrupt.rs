use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use common::mem::{ReadU16, ToU16P, WriteU16};

use log::trace;

// One pending interrupt request: the vector to service and the bus-request
// level it was raised at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    pub prio: u8, // 0o4 through 0o7
    pub vector: u16,
}

// Highest bus-request level first; ties broken by lowest vector.
impl Ord for Interrupt {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prio
            .cmp(&other.prio)
            .then_with(|| other.vector.cmp(&self.vector))
    }
}

impl PartialOrd for Interrupt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// The pending-interrupt queue shared between the CPU and the host threads
// (keyboard, line clock). Each device has at most one request outstanding,
// keyed by vector. The lock is held only for the few instructions it takes
// to push or pop a record.
#[derive(Clone, Default)]
pub struct InterruptQueue {
    inner: Arc<Mutex<BinaryHeap<Interrupt>>>,
}

impl InterruptQueue {
    pub fn new() -> InterruptQueue {
        Default::default()
    }

    // Posts a request unless the same vector is already pending.
    pub fn post(&self, int: Interrupt) {
        assert!(int.vector & 0x1 == 0, "odd interrupt vector {:#o}", int.vector);
        let mut heap = self.inner.lock().unwrap();
        if heap.iter().any(|pending| pending.vector == int.vector) {
            return;
        }
        trace!("Interrupt posted: vector {:#o} at BR{}", int.vector, int.prio);
        heap.push(int);
    }

    // Takes the best pending request, but only if its level is strictly
    // above the processor priority.
    pub fn take_above(&self, prio: u8) -> Option<Interrupt> {
        let mut heap = self.inner.lock().unwrap();
        if heap.peek()?.prio > prio {
            heap.pop()
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn save(&self, w: &mut impl Write) -> std::io::Result<()> {
        let heap = self.inner.lock().unwrap();
        w.write_u16(heap.len().to_u16p())?;
        let mut pending: Vec<Interrupt> = heap.iter().copied().collect();
        pending.sort();
        for int in pending {
            w.write_u16(int.vector)?;
            w.write_u16(int.prio as u16)?;
        }
        Ok(())
    }

    pub fn restore(&self, r: &mut impl Read) -> std::io::Result<()> {
        let mut heap = self.inner.lock().unwrap();
        heap.clear();
        let count = r.read_u16()?;
        for _ in 0..count {
            let vector = r.read_u16()?;
            let prio = r.read_u16()? as u8;
            heap.push(Interrupt { prio, vector });
        }
        Ok(())
    }
}
