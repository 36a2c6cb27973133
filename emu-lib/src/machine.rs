use std::sync::{Arc, Mutex};

use crate::emulator::{Emulator, ExecRet};
use crate::interrupt::InterruptQueue;
use crate::io::dl11::{Dl11, Terminal};
use crate::io::kw11::{ClockTicker, Kw11};
use crate::io::rk05::{DiskImageError, Rk05};

// A PDP-11/40 with the full V6 complement: CPU+MMU, RK05, DL11 console
// and KW11 line clock, wired to a shared interrupt queue. The host owns
// this value exclusively; the Controller runs it on a thread.
pub struct Machine {
    emu: Emulator,
    interrupts: InterruptQueue,
    rk: Arc<Mutex<Rk05>>,
    dl11: Arc<Mutex<Dl11>>,
    kw11: Arc<Mutex<Kw11>>,
    ticker: Arc<ClockTicker>,
}

pub const DEFAULT_BOOT_SECTORS: u16 = 2;

impl Machine {
    pub fn new(terminal: Arc<dyn Terminal>) -> Machine {
        let interrupts = InterruptQueue::new();
        let ticker = Arc::new(ClockTicker::default());
        let mut emu = Emulator::new(interrupts.clone());

        let rk = Arc::new(Mutex::new(Rk05::new(interrupts.clone())));
        emu.add_device(rk.clone());
        let dl11 = Arc::new(Mutex::new(Dl11::new(interrupts.clone(), terminal)));
        emu.add_device(dl11.clone());
        let kw11 = Arc::new(Mutex::new(Kw11::new(interrupts.clone(), ticker.clone())));
        emu.add_device(kw11.clone());

        Machine {
            emu,
            interrupts,
            rk,
            dl11,
            kw11,
            ticker,
        }
    }

    pub fn reset(&mut self) {
        self.emu.reset();
    }

    pub fn step(&mut self) -> ExecRet {
        self.emu.run_ins()
    }

    pub fn load_boot(&mut self, sectors: u16) {
        self.emu.load_boot(sectors);
    }

    pub fn load_disk_image(&mut self, data: &[u8]) -> Result<(), DiskImageError> {
        self.rk.lock().unwrap().load_image(data)
    }

    // Keystrokes go straight into the console FIFO; safe from any thread
    // that holds the device handle.
    pub fn post_key(&self, byte: u8) {
        self.dl11.lock().unwrap().push_key(byte);
    }

    pub fn emulator(&self) -> &Emulator {
        &self.emu
    }

    pub fn emulator_mut(&mut self) -> &mut Emulator {
        &mut self.emu
    }

    pub fn interrupts(&self) -> InterruptQueue {
        self.interrupts.clone()
    }

    pub fn ticker(&self) -> Arc<ClockTicker> {
        self.ticker.clone()
    }

    pub fn rk05(&self) -> Arc<Mutex<Rk05>> {
        self.rk.clone()
    }

    pub fn dl11(&self) -> Arc<Mutex<Dl11>> {
        self.dl11.clone()
    }

    pub(crate) fn kw11(&self) -> Arc<Mutex<Kw11>> {
        self.kw11.clone()
    }
}
