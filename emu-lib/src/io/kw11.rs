use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::constants::{priority, vector};

use crate::emulator_state::EmulatorState;
use crate::interrupt::{Interrupt, InterruptQueue};
use crate::io::MMIOHandler;
use crate::trap::Trap;

// The latch a host thread strikes every 1/60 s of wall time. The device
// observes it at the next instruction boundary, so the CPU thread never
// shares more than this bool with the ticker.
#[derive(Default)]
pub struct ClockTicker {
    ticked: AtomicBool,
}

impl ClockTicker {
    pub fn strike(&self) {
        self.ticked.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.ticked.swap(false, Ordering::AcqRel)
    }
}

// KW11-L line-frequency clock.
pub struct Kw11 {
    interrupts: InterruptQueue,
    ticker: Arc<ClockTicker>,
    interrupt_enable: bool,
    monitor: bool,
}

impl Kw11 {
    pub const LKS: u32 = 0o777546;

    const INT_ENB_SHIFT: u16 = 6;
    const INT_ENB_MASK: u16 = 0x1 << Self::INT_ENB_SHIFT;
    const MONITOR_SHIFT: u16 = 7;
    const MONITOR_MASK: u16 = 0x1 << Self::MONITOR_SHIFT;

    pub fn new(interrupts: InterruptQueue, ticker: Arc<ClockTicker>) -> Self {
        Kw11 {
            interrupts,
            ticker,
            interrupt_enable: false,
            monitor: true,
        }
    }

    fn lks_read(&self) -> u16 {
        ((self.interrupt_enable as u16) << Self::INT_ENB_SHIFT)
            | ((self.monitor as u16) << Self::MONITOR_SHIFT)
    }

    fn lks_write(&mut self, val: u16) {
        self.interrupt_enable = (val & Self::INT_ENB_MASK) != 0;
        self.monitor = (val & Self::MONITOR_MASK) != 0;
    }

    pub fn lks(&self) -> u16 {
        self.lks_read()
    }

    pub fn set_lks(&mut self, val: u16) {
        self.lks_write(val);
    }
}

impl MMIOHandler for Kw11 {
    fn reset(&mut self, _state: &mut EmulatorState) {
        self.interrupt_enable = false;
        self.monitor = true;
        self.ticker.take();
    }

    fn tick(&mut self, _state: &mut EmulatorState) {
        if self.ticker.take() {
            self.monitor = true;
            if self.interrupt_enable {
                self.interrupts.post(Interrupt {
                    prio: priority::CLOCK,
                    vector: vector::CLOCK,
                });
            }
        }
    }

    fn read_word(&mut self, _state: &mut EmulatorState, addr: u32) -> Result<u16, Trap> {
        match addr {
            Self::LKS => Ok(self.lks_read()),
            _ => Err(Trap::BUS_ERROR),
        }
    }

    fn write_word(&mut self, _state: &mut EmulatorState, addr: u32, val: u16) -> Result<(), Trap> {
        match addr {
            Self::LKS => {
                self.lks_write(val);
                Ok(())
            }
            _ => Err(Trap::BUS_ERROR),
        }
    }

    fn default_addrs(&self) -> &[u32] {
        &[Self::LKS]
    }
}
