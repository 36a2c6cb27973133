use std::io::{Read, Write};

use common::asm::{Reg, NUM_GEN_REGS, NUM_REGS};
use common::constants::{RAM_END, SWITCH_BOOT_RK05};
use common::mem::{ReadU16, WriteU16};

use crate::interrupt::{Interrupt, InterruptQueue};
use crate::mmu::Mmu;

use log::{error, trace};
use num_traits::ToPrimitive;

// Processor mode, PSW bits 15:14 (current) and 13:12 (previous). The 11/40
// has no supervisor mode and V6 never uses one; illegal encodings are
// treated as kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Kernel = 0,
    User = 3,
}

impl Mode {
    pub fn from_bits(bits: u16) -> Mode {
        match bits & 0o3 {
            0 => Mode::Kernel,
            3 => Mode::User,
            other => {
                error!("Illegal processor mode {other:#o}, treating as kernel");
                Mode::Kernel
            }
        }
    }

    pub fn is_user(self) -> bool {
        self == Mode::User
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct Status(u16);

impl Status {
    pub const CARRY_SHIFT: u16 = 0;
    pub const OVERFLOW_SHIFT: u16 = 1;
    pub const ZERO_SHIFT: u16 = 2;
    pub const NEGATIVE_SHIFT: u16 = 3;
    const T: u16 = 4;

    pub const C: u16 = 0x1 << Self::CARRY_SHIFT;
    pub const V: u16 = 0x1 << Self::OVERFLOW_SHIFT;
    pub const Z: u16 = 0x1 << Self::ZERO_SHIFT;
    pub const N: u16 = 0x1 << Self::NEGATIVE_SHIFT;

    const FLAGS_MASK: u16 = 0xf;

    const PRIO: u16 = 5;
    const PRIO_MASK: u16 = 0x7;

    const REG_SET: u16 = 11;
    const PREV_MODE: u16 = 12;
    const CUR_MODE: u16 = 14;
    const MODE_MASK: u16 = 0x3;

    pub fn new() -> Status {
        Default::default()
    }

    pub fn from_raw(raw: u16) -> Self {
        Status(raw)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn get_flags(&self) -> u16 {
        self.0 & Self::FLAGS_MASK
    }

    pub fn set_flags(&mut self, bits: u16) {
        assert_eq!(bits & !Self::FLAGS_MASK, 0);
        self.0 |= bits;
    }

    pub fn clear_flags(&mut self, bits: u16) {
        assert_eq!(bits & !Self::FLAGS_MASK, 0);
        self.0 &= !bits;
    }

    pub fn get_carry(&self) -> bool {
        (self.0 & Self::C) != 0
    }

    pub fn set_carry(&mut self, val: bool) {
        self.0 &= !(1u16 << Self::CARRY_SHIFT);
        self.0 |= (val as u16) << Self::CARRY_SHIFT;
    }

    pub fn get_overflow(&self) -> bool {
        (self.0 & Self::V) != 0
    }

    pub fn set_overflow(&mut self, val: bool) {
        self.0 &= !(1u16 << Self::OVERFLOW_SHIFT);
        self.0 |= (val as u16) << Self::OVERFLOW_SHIFT;
    }

    pub fn get_zero(&self) -> bool {
        (self.0 & Self::Z) != 0
    }

    pub fn set_zero(&mut self, val: bool) {
        self.0 &= !(1u16 << Self::ZERO_SHIFT);
        self.0 |= (val as u16) << Self::ZERO_SHIFT;
    }

    pub fn get_negative(&self) -> bool {
        (self.0 & Self::N) != 0
    }

    pub fn set_negative(&mut self, val: bool) {
        self.0 &= !(1u16 << Self::NEGATIVE_SHIFT);
        self.0 |= (val as u16) << Self::NEGATIVE_SHIFT;
    }

    pub fn flags(&self) -> (bool, bool, bool, bool) {
        (self.get_zero(), self.get_negative(), self.get_carry(), self.get_overflow())
    }

    pub fn get_t(&self) -> bool {
        ((self.0 >> Self::T) & 0x1) != 0
    }

    pub fn set_t(&mut self, val: bool) {
        self.0 &= !(1u16 << Self::T);
        self.0 |= (val as u16) << Self::T;
    }

    pub fn get_prio(&self) -> u8 {
        ((self.0 >> Self::PRIO) & Self::PRIO_MASK) as u8
    }

    pub fn set_prio(&mut self, val: u16) {
        assert!((val & !Self::PRIO_MASK) == 0);
        self.0 &= !(Self::PRIO_MASK << Self::PRIO);
        self.0 |= val << Self::PRIO;
    }

    pub fn get_reg_set(&self) -> bool {
        ((self.0 >> Self::REG_SET) & 0x1) != 0
    }

    pub fn get_mode(&self) -> Mode {
        Mode::from_bits(self.0 >> Self::CUR_MODE)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.0 &= !(Self::MODE_MASK << Self::CUR_MODE);
        self.0 |= (mode as u16) << Self::CUR_MODE;
    }

    pub fn get_prev_mode(&self) -> Mode {
        Mode::from_bits(self.0 >> Self::PREV_MODE)
    }

    pub fn set_prev_mode(&mut self, mode: Mode) {
        self.0 &= !(Self::MODE_MASK << Self::PREV_MODE);
        self.0 |= (mode as u16) << Self::PREV_MODE;
    }
}

// The machine state proper: register banks, PSW, RAM and the MMU register
// file. This is separate from the Emulator so a mutable borrow can be
// passed to the MMIO handlers.
pub struct EmulatorState {
    num_ins: u64,
    mem: Vec<u8>, // RAM only; the I/O page is dispatched to handlers
    regs: [u16; NUM_REGS],
    alt_regs: [u16; NUM_GEN_REGS], // the unselected general register set
    ksp: u16,
    usp: u16,
    status: Status,
    mmu: Mmu,
    switch_register: u16,
    display_register: u16,
    interrupts: InterruptQueue,
}

impl EmulatorState {
    pub fn new(interrupts: InterruptQueue) -> Self {
        EmulatorState {
            num_ins: 0,
            mem: vec![0; RAM_END as usize],
            regs: [0; NUM_REGS],
            alt_regs: [0; NUM_GEN_REGS],
            ksp: 0,
            usp: 0,
            status: Status::new(),
            mmu: Mmu::new(),
            switch_register: SWITCH_BOOT_RK05,
            display_register: 0,
            interrupts,
        }
    }

    pub fn reset(&mut self) {
        self.num_ins = 0;
        self.mem.fill(0);
        self.regs = [0; NUM_REGS];
        self.alt_regs = [0; NUM_GEN_REGS];
        self.ksp = 0;
        self.usp = 0;
        self.status = Status::new();
        self.mmu.reset();
        self.display_register = 0;
    }

    pub fn inc_ins(&mut self) {
        self.num_ins += 1;
    }

    pub fn num_ins(&self) -> u64 {
        self.num_ins
    }

    ///////////////////////////////////////////////////////////////////////////
    // Physical RAM. Bounds and alignment are the Unibus's business; these
    // take addresses already known to be inside RAM.

    pub fn ram_read_byte(&self, addr: u32) -> u8 {
        self.mem[addr as usize]
    }

    pub fn ram_write_byte(&mut self, addr: u32, val: u8) {
        trace!("Mem: writing {val:#o} to {addr:#o} (byte)");
        self.mem[addr as usize] = val;
    }

    pub fn ram_read_word(&self, addr: u32) -> u16 {
        debug_assert!(addr & 1 == 0);
        (self.mem[addr as usize] as u16) | ((self.mem[(addr + 1) as usize] as u16) << 8)
    }

    pub fn ram_write_word(&mut self, addr: u32, val: u16) {
        trace!("Mem: writing {val:#o} to {addr:#o} (word)");
        debug_assert!(addr & 1 == 0);
        self.mem[addr as usize] = val as u8;
        self.mem[(addr + 1) as usize] = (val >> 8) as u8;
    }

    ///////////////////////////////////////////////////////////////////////////
    // Registers.

    pub fn reg_write_word(&mut self, reg: Reg, val: u16) {
        trace!("Reg: writing {val:#o} to {reg:?} (word)");
        self.regs[reg.to_usize().unwrap()] = val;
    }

    pub fn reg_read_word(&self, reg: Reg) -> u16 {
        self.regs[reg.to_usize().unwrap()]
    }

    pub fn reg_read_byte(&self, reg: Reg) -> u8 {
        self.reg_read_word(reg) as u8
    }

    pub fn reg_write_byte(&mut self, reg: Reg, val: u8) {
        trace!("Reg: writing {val:#o} to {reg:?} (byte)");
        let mut old = self.reg_read_word(reg);
        old &= !0xff;
        old |= val as u16;
        self.reg_write_word(reg, old);
    }

    pub fn pc(&self) -> u16 {
        self.reg_read_word(Reg::PC)
    }

    pub fn sp(&self) -> u16 {
        self.reg_read_word(Reg::SP)
    }

    // The stack pointer belonging to the previous mode, as seen by
    // MFPI/MTPI.
    pub fn read_prev_sp(&self) -> u16 {
        let prev = self.status.get_prev_mode();
        if prev == self.status.get_mode() {
            self.sp()
        } else {
            match prev {
                Mode::Kernel => self.ksp,
                Mode::User => self.usp,
            }
        }
    }

    pub fn write_prev_sp(&mut self, val: u16) {
        let prev = self.status.get_prev_mode();
        if prev == self.status.get_mode() {
            self.reg_write_word(Reg::SP, val);
        } else {
            match prev {
                Mode::Kernel => self.ksp = val,
                Mode::User => self.usp = val,
            }
        }
    }

    // Banks R6 and updates the PSW mode fields. The previous-mode field
    // takes the old current mode.
    pub fn switch_mode(&mut self, new_mode: Mode) {
        let old_mode = self.status.get_mode();
        match old_mode {
            Mode::Kernel => self.ksp = self.sp(),
            Mode::User => self.usp = self.sp(),
        }
        let sp = match new_mode {
            Mode::Kernel => self.ksp,
            Mode::User => self.usp,
        };
        self.reg_write_word(Reg::SP, sp);
        self.status.set_prev_mode(old_mode);
        self.status.set_mode(new_mode);
    }

    // Loads a full PSW value, banking the stack pointers when the mode
    // field changes. Used by trap service, RTI/RTT and MMIO writes to
    // 0o777776.
    pub fn write_psw(&mut self, val: u16) {
        let new_mode = Mode::from_bits(val >> 14);
        let old_mode = self.status.get_mode();
        if new_mode != old_mode {
            match old_mode {
                Mode::Kernel => self.ksp = self.sp(),
                Mode::User => self.usp = self.sp(),
            }
            let sp = match new_mode {
                Mode::Kernel => self.ksp,
                Mode::User => self.usp,
            };
            self.reg_write_word(Reg::SP, sp);
        }
        self.status = Status::from_raw(val);
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn get_status(&self) -> &Status {
        &self.status
    }

    pub fn get_status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    ///////////////////////////////////////////////////////////////////////////

    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    pub fn switch_register(&self) -> u16 {
        self.switch_register
    }

    pub fn set_switch_register(&mut self, val: u16) {
        self.switch_register = val;
    }

    pub fn set_display_register(&mut self, val: u16) {
        self.display_register = val;
    }

    pub fn post_interrupt(&self, int: Interrupt) {
        self.interrupts.post(int);
    }

    ///////////////////////////////////////////////////////////////////////////

    pub fn save(&self, w: &mut impl Write) -> std::io::Result<()> {
        for reg in self.regs {
            w.write_u16(reg)?;
        }
        for reg in self.alt_regs {
            w.write_u16(reg)?;
        }
        w.write_u16(self.ksp)?;
        w.write_u16(self.usp)?;
        w.write_u16(self.status.to_raw())?;
        w.write_u16(self.switch_register)?;
        w.write_u16(self.display_register)?;
        self.mmu.save(w)?;
        w.write_all(&self.mem)
    }

    pub fn restore(&mut self, r: &mut impl Read) -> std::io::Result<()> {
        for reg in self.regs.iter_mut() {
            *reg = r.read_u16()?;
        }
        for reg in self.alt_regs.iter_mut() {
            *reg = r.read_u16()?;
        }
        self.ksp = r.read_u16()?;
        self.usp = r.read_u16()?;
        self.status = Status::from_raw(r.read_u16()?);
        self.switch_register = r.read_u16()?;
        self.display_register = r.read_u16()?;
        self.mmu.restore(r)?;
        r.read_exact(&mut self.mem)
    }
}
