use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::constants::{IO_PAGE_START, PHYS_END, RAM_END};
use common::mem::IsEven;

use crate::emulator_state::EmulatorState;
use crate::io::MMIOHandler;
use crate::trap::Trap;

use log::debug;

// Routes 18-bit physical addresses to RAM or a device register. Unmapped
// addresses and odd word addresses are bus errors the guest sees as a trap
// through vector 4.
pub struct Unibus {
    handlers: HashMap<u32, Arc<Mutex<dyn MMIOHandler>>>,
    // Each device exactly once, in registration order, for tick and reset.
    devices: Vec<Arc<Mutex<dyn MMIOHandler>>>,
}

impl Unibus {
    pub fn new() -> Unibus {
        Unibus {
            handlers: HashMap::new(),
            devices: Vec::new(),
        }
    }

    pub fn add_device<M>(&mut self, handler: Arc<Mutex<M>>)
    where
        M: MMIOHandler + 'static,
    {
        let handler: Arc<Mutex<dyn MMIOHandler>> = handler;
        let addrs: Vec<u32> = handler.lock().unwrap().default_addrs().to_vec();
        assert!(!addrs.is_empty(), "device registered without addresses");
        for addr in addrs {
            self.register_handler(handler.clone(), addr);
        }
        self.devices.push(handler);
    }

    pub fn set_mmio_handler(&mut self, handler: impl MMIOHandler + 'static) {
        self.add_device(Arc::new(Mutex::new(handler)));
    }

    pub fn set_mmio_handler_for<M, I>(&mut self, handler: M, addrs: I)
    where
        M: MMIOHandler + 'static,
        I: IntoIterator<Item = u32>,
    {
        let handler = Arc::new(Mutex::new(handler));
        for addr in addrs.into_iter() {
            self.register_handler(handler.clone(), addr);
        }
        self.devices.push(handler);
    }

    fn register_handler(&mut self, handler: Arc<Mutex<dyn MMIOHandler>>, addr: u32) {
        assert!(
            (IO_PAGE_START..PHYS_END).contains(&addr),
            "MMIOHandler addr {addr:o} outside the I/O page"
        );
        assert!(addr & 0x1 == 0, "MMIOHandler addr {addr:o} not aligned");
        let prev = self.handlers.insert(addr, handler);
        assert!(prev.is_none(), "Duplicate MMIOHandler for {addr:o}");
    }

    pub fn tick_devices(&mut self, state: &mut EmulatorState) {
        for dev in self.devices.iter() {
            dev.lock().unwrap().tick(state);
        }
    }

    pub fn reset_devices(&mut self, state: &mut EmulatorState) {
        for dev in self.devices.iter() {
            dev.lock().unwrap().reset(state);
        }
    }

    ///////////////////////////////////////////////////////////////////////////

    pub fn read_word(&mut self, state: &mut EmulatorState, addr: u32) -> Result<u16, Trap> {
        if !addr.is_even() {
            debug!("Bus: word read of odd address {addr:#o}");
            return Err(Trap::BUS_ERROR);
        }
        if addr < RAM_END {
            return Ok(state.ram_read_word(addr));
        }
        if let Some(handler) = self.handlers.get_mut(&addr) {
            return handler.lock().unwrap().read_word(state, addr);
        }
        debug!("Bus: read of unmapped address {addr:#o}");
        Err(Trap::BUS_ERROR)
    }

    pub fn write_word(&mut self, state: &mut EmulatorState, addr: u32, val: u16) -> Result<(), Trap> {
        if !addr.is_even() {
            debug!("Bus: word write of odd address {addr:#o}");
            return Err(Trap::BUS_ERROR);
        }
        if addr < RAM_END {
            state.ram_write_word(addr, val);
            return Ok(());
        }
        if let Some(handler) = self.handlers.get_mut(&addr) {
            return handler.lock().unwrap().write_word(state, addr, val);
        }
        debug!("Bus: write of unmapped address {addr:#o}");
        Err(Trap::BUS_ERROR)
    }

    pub fn read_byte(&mut self, state: &mut EmulatorState, addr: u32) -> Result<u8, Trap> {
        if addr < RAM_END {
            return Ok(state.ram_read_byte(addr));
        }
        let word = self.read_word(state, addr & !1)?;
        if addr & 1 != 0 {
            Ok((word >> 8) as u8)
        } else {
            Ok(word as u8)
        }
    }

    // Byte stores to device registers are promoted to read-modify-write on
    // the containing word.
    pub fn write_byte(&mut self, state: &mut EmulatorState, addr: u32, val: u8) -> Result<(), Trap> {
        if addr < RAM_END {
            state.ram_write_byte(addr, val);
            return Ok(());
        }
        let word = self.read_word(state, addr & !1)?;
        let word = if addr & 1 != 0 {
            (word & 0x00ff) | ((val as u16) << 8)
        } else {
            (word & 0xff00) | (val as u16)
        };
        self.write_word(state, addr & !1, word)
    }
}

impl Default for Unibus {
    fn default() -> Self {
        Self::new()
    }
}
