use std::io::{Read, Write};

use common::constants::{IO_APERTURE_OFFSET, IO_APERTURE_START};
use common::mem::{ReadU16, WriteU16};

use crate::emulator_state::{EmulatorState, Mode};
use crate::io::MMIOHandler;
use crate::trap::Trap;

use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

// One PAR/PDR pair. The access-control and length fields are decoded from
// the PDR on every translation; the W bit is the only field the MMU writes
// back.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageReg {
    pub par: u16,
    pub pdr: u16,
}

impl PageReg {
    const PDR_W: u16 = 1 << 6;

    fn base(self) -> u32 {
        (self.par & 0o7777) as u32
    }

    // ACF: bit 1 grants read, bits 1+2 grant write.
    fn readable(self) -> bool {
        self.pdr & 0o2 != 0
    }

    fn writable(self) -> bool {
        self.pdr & 0o6 == 0o6
    }

    fn expand_down(self) -> bool {
        self.pdr & 0o10 != 0
    }

    fn plf(self) -> u16 {
        (self.pdr >> 8) & 0x7f
    }
}

pub const NUM_PAGES: usize = 16; // 8 kernel + 8 user

pub struct Mmu {
    sr0: u16,
    sr2: u16,
    pages: [PageReg; NUM_PAGES],
}

impl Mmu {
    pub const SR0_ENABLE: u16 = 1 << 0;
    pub const SR0_NON_RESIDENT: u16 = 1 << 15;
    pub const SR0_PAGE_LENGTH: u16 = 1 << 14;
    pub const SR0_READ_ONLY: u16 = 1 << 13;
    const SR0_USER_MODE: u16 = (1 << 5) | (1 << 6);

    pub fn new() -> Mmu {
        Mmu {
            sr0: 0,
            sr2: 0,
            pages: [PageReg::default(); NUM_PAGES],
        }
    }

    pub fn reset(&mut self) {
        self.sr0 = 0;
        self.sr2 = 0;
        self.pages = [PageReg::default(); NUM_PAGES];
    }

    pub fn enabled(&self) -> bool {
        self.sr0 & Self::SR0_ENABLE != 0
    }

    pub fn sr0(&self) -> u16 {
        self.sr0
    }

    pub fn sr2(&self) -> u16 {
        self.sr2
    }

    pub fn set_sr0(&mut self, val: u16) {
        self.sr0 = val;
    }

    pub fn page(&self, idx: usize) -> PageReg {
        self.pages[idx]
    }

    pub fn set_page(&mut self, idx: usize, page: PageReg) {
        self.pages[idx] = page;
    }

    fn abort(&mut self, flag: u16, va: u16, mode: Mode, ins_pc: u16, why: &str) -> Trap {
        self.sr0 = flag | Self::SR0_ENABLE;
        self.sr0 |= (va >> 12) & !1; // faulting page number
        if mode.is_user() {
            self.sr0 |= Self::SR0_USER_MODE;
        }
        self.sr2 = ins_pc;
        debug!("MMU abort: {why} at va {va:#o} ({mode:?}), SR0 {:#o}", self.sr0);
        Trap::MMU_ABORT
    }

    // Translates a 16-bit virtual address to an 18-bit physical address, or
    // aborts without committing the access. A successful write marks the
    // page's W bit.
    pub fn translate(
        &mut self,
        va: u16,
        access: Access,
        mode: Mode,
        ins_pc: u16,
    ) -> Result<u32, Trap> {
        if !self.enabled() {
            let pa = va as u32;
            if va >= IO_APERTURE_START {
                return Ok(pa + IO_APERTURE_OFFSET);
            }
            return Ok(pa);
        }

        let idx = (va >> 13) as usize + if mode.is_user() { 8 } else { 0 };
        let page = self.pages[idx];

        if access == Access::Write && !page.writable() {
            return Err(self.abort(Self::SR0_READ_ONLY, va, mode, ins_pc, "write to read-only page"));
        }
        if !page.readable() {
            return Err(self.abort(Self::SR0_NON_RESIDENT, va, mode, ins_pc, "access to non-resident page"));
        }

        let block = (va >> 6) & 0o177;
        let disp = (va & 0o77) as u32;
        let over_length = if page.expand_down() {
            block < page.plf()
        } else {
            block > page.plf()
        };
        if over_length {
            return Err(self.abort(Self::SR0_PAGE_LENGTH, va, mode, ins_pc, "page length exceeded"));
        }

        if access == Access::Write {
            self.pages[idx].pdr |= PageReg::PDR_W;
        }
        Ok(((block as u32 + page.base()) << 6) + disp)
    }

    pub fn save(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_u16(self.sr0)?;
        w.write_u16(self.sr2)?;
        for page in self.pages {
            w.write_u16(page.par)?;
            w.write_u16(page.pdr)?;
        }
        Ok(())
    }

    pub fn restore(&mut self, r: &mut impl Read) -> std::io::Result<()> {
        self.sr0 = r.read_u16()?;
        self.sr2 = r.read_u16()?;
        for page in self.pages.iter_mut() {
            page.par = r.read_u16()?;
            page.pdr = r.read_u16()?;
        }
        Ok(())
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////

// The MMU register file as seen from the Unibus: status registers plus the
// PAR/PDR banks for both modes at their documented I/O page offsets.
#[derive(Default, Clone, Copy)]
pub struct MmuAccess();

impl MmuAccess {
    pub const SR0: u32 = 0o777572;
    pub const SR2: u32 = 0o777576;

    pub const KERNEL_PDR: u32 = 0o772300;
    pub const KERNEL_PAR: u32 = 0o772340;
    pub const USER_PDR: u32 = 0o777600;
    pub const USER_PAR: u32 = 0o777640;
    const BANK_LEN: u32 = 0o20; // eight word registers

    // All the word addresses this handler serves.
    pub fn addrs() -> impl Iterator<Item = u32> {
        let bank = |base: u32| (base..base + Self::BANK_LEN).step_by(2);
        bank(Self::KERNEL_PDR)
            .chain(bank(Self::KERNEL_PAR))
            .chain(bank(Self::USER_PDR))
            .chain(bank(Self::USER_PAR))
            .chain([Self::SR0, Self::SR2])
    }

    fn index(addr: u32) -> usize {
        ((addr & 0o17) >> 1) as usize
    }
}

impl MMIOHandler for MmuAccess {
    fn read_word(&mut self, state: &mut EmulatorState, addr: u32) -> Result<u16, Trap> {
        let mmu = state.mmu();
        let val = match addr {
            Self::SR0 => mmu.sr0(),
            Self::SR2 => mmu.sr2(),
            Self::KERNEL_PDR..=0o772316 => mmu.page(Self::index(addr)).pdr,
            Self::KERNEL_PAR..=0o772356 => mmu.page(Self::index(addr)).par,
            Self::USER_PDR..=0o777616 => mmu.page(Self::index(addr) + 8).pdr,
            Self::USER_PAR..=0o777656 => mmu.page(Self::index(addr) + 8).par,
            _ => return Err(Trap::BUS_ERROR),
        };
        Ok(val)
    }

    fn write_word(&mut self, state: &mut EmulatorState, addr: u32, val: u16) -> Result<(), Trap> {
        let mmu = state.mmu_mut();
        match addr {
            Self::SR0 => mmu.set_sr0(val),
            Self::SR2 => {
                // Read-only on the real hardware.
                warn!("Ignoring write of {val:#o} to SR2");
            }
            Self::KERNEL_PDR..=0o772316 => {
                let idx = Self::index(addr);
                mmu.set_page(idx, PageReg { par: mmu.page(idx).par, pdr: val });
            }
            Self::KERNEL_PAR..=0o772356 => {
                let idx = Self::index(addr);
                mmu.set_page(idx, PageReg { par: val, pdr: mmu.page(idx).pdr });
            }
            Self::USER_PDR..=0o777616 => {
                let idx = Self::index(addr) + 8;
                mmu.set_page(idx, PageReg { par: mmu.page(idx).par, pdr: val });
            }
            Self::USER_PAR..=0o777656 => {
                let idx = Self::index(addr) + 8;
                mmu.set_page(idx, PageReg { par: val, pdr: mmu.page(idx).pdr });
            }
            _ => return Err(Trap::BUS_ERROR),
        }
        Ok(())
    }
}
