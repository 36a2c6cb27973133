use common::constants::vector;

use thiserror::Error;

// A guest-visible fault. These are not host errors: they propagate out of
// the memory system and instruction execution via Result, and the CPU
// services them through the vector table at the instruction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("trap through vector {vector:#o}")]
pub struct Trap {
    pub vector: u16,
}

impl Trap {
    pub const fn new(vector: u16) -> Trap {
        Trap { vector }
    }

    pub const BUS_ERROR: Trap = Trap::new(vector::BUS_ERROR);
    pub const RESERVED_INS: Trap = Trap::new(vector::RESERVED_INS);
    pub const BPT: Trap = Trap::new(vector::BPT);
    pub const IOT: Trap = Trap::new(vector::IOT);
    pub const EMT: Trap = Trap::new(vector::EMT);
    pub const TRAP: Trap = Trap::new(vector::TRAP);
    pub const MMU_ABORT: Trap = Trap::new(vector::MMU_ABORT);
}
