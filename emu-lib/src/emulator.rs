
use common::asm::*;
use common::constants::{vector, BOOT_ADDR, BOOT_ENTRY, RAM_END};
use common::decoder::decode;

use crate::emulator_state::{EmulatorState, Mode};
use crate::interrupt::InterruptQueue;
use crate::io::MMIOHandler;
use crate::mmu::Access;
use crate::trap::Trap;
use crate::unibus::Unibus;

use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr};
use std::sync::{Arc, Mutex};

use log::{debug, error, trace};
use num_traits::{FromPrimitive, ToPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Size {
    Byte,
    Word,
}

impl Size {
    fn bytes(self) -> u16 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
        }
    }

    fn bits(self) -> u16 {
        self.bytes() * 8
    }

    fn mask(self) -> u32 {
        match self {
            Size::Byte => 0xff,
            Size::Word => 0xffff,
        }
    }

    fn smallest_signed(self) -> u32 {
        0x1 << (self.bits() - 1)
    }

    fn largest_signed(self) -> u32 {
        self.smallest_signed().wrapping_sub(1)
    }

    fn sign_bit(self, val: u32) -> u32 {
        match self {
            Size::Word => (val >> 15) & 0x1,
            Size::Byte => (val >> 7) & 0x1,
        }
    }
}

// An operand resolved to a location that can be read or written. Mem holds
// a virtual address; the access itself still goes through the MMU.
#[derive(Debug, Clone, Copy)]
enum ResolvedOperand {
    Reg(Reg),
    Mem(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecRet {
    Ok,
    Halt,
    Wait,
}

// The RK05 bootstrap. Reads the first sectors of drive 0 into low memory
// and jumps to zero. The word count at index 17 is patched by load_boot.
const BOOT_ROM: &[u16] = &[
    0o042113,           // "KD"
    0o012706, 0o2000,   // mov #boot_start, sp
    0o012700, 0o000000, // mov #unit, r0
    0o010003,           // mov r0, r3
    0o000303,           // swab r3
    0o006303,           // asl r3
    0o006303,           // asl r3
    0o006303,           // asl r3
    0o006303,           // asl r3
    0o006303,           // asl r3
    0o012701, 0o177412, // mov #RKDA, r1
    0o010311,           // mov r3, (r1)       ; load da
    0o005041,           // clr -(r1)          ; clear ba
    0o012741, 0o177000, // mov #-256.*2, -(r1); load wc
    0o012741, 0o000005, // mov #READ+GO, -(r1)
    0o005002,           // clr r2
    0o005003,           // clr r3
    0o012704, 0o2020,   // mov #START+20, r4
    0o005005,           // clr r5
    0o105711,           // tstb (r1)
    0o100376,           // bpl .-2
    0o105011,           // clrb (r1)
    0o005007,           // clr pc
];
const BOOT_ROM_WC_IDX: u32 = 17;

pub struct Emulator {
    state: EmulatorState,
    unibus: Unibus,
    interrupts: InterruptQueue,
    waiting: bool,
    halted: bool,
    // Address of the instruction being executed, for SR2 and diagnostics.
    cur_pc: u16,
    // RTT holds off the T-bit trap for one instruction.
    t_suppress: bool,
}

impl Emulator {
    pub fn new(interrupts: InterruptQueue) -> Emulator {
        let mut emu = Emulator {
            state: EmulatorState::new(interrupts.clone()),
            unibus: Unibus::new(),
            interrupts,
            waiting: false,
            halted: false,
            cur_pc: 0,
            t_suppress: false,
        };
        emu.unibus
            .set_mmio_handler(crate::io::status_access::StatusAccess::default());
        emu.unibus.set_mmio_handler_for(
            crate::mmu::MmuAccess::default(),
            crate::mmu::MmuAccess::addrs(),
        );
        emu
    }

    // Run until a halt.
    pub fn run(&mut self) {
        while self.run_ins() != ExecRet::Halt {}
    }

    pub fn run_at(&mut self, pc: u16) {
        self.state.reg_write_word(Reg::PC, pc);
        self.run();
    }

    // Everything back to power-up: zeroed RAM and registers, PSW 0, MMU
    // off, devices reset, no pending interrupts.
    pub fn reset(&mut self) {
        self.state.reset();
        self.unibus.reset_devices(&mut self.state);
        self.interrupts.clear();
        self.waiting = false;
        self.halted = false;
        self.t_suppress = false;
    }

    // Installs the bootstrap and points the PC at it. The loader pulls
    // `sectors` 256-word sectors from the start of the pack into memory at
    // zero and jumps there.
    pub fn load_boot(&mut self, sectors: u16) {
        for (i, word) in BOOT_ROM.iter().enumerate() {
            self.state.ram_write_word(BOOT_ADDR + 2 * i as u32, *word);
        }
        let wc = (256u16 * sectors).wrapping_neg();
        self.state.ram_write_word(BOOT_ADDR + 2 * BOOT_ROM_WC_IDX, wc);
        self.state.reg_write_word(Reg::PC, BOOT_ENTRY);
        self.halted = false;
        self.waiting = false;
    }

    pub fn load_image(&mut self, data: &[u8], start: u32) {
        assert!(start + (data.len() as u32) <= RAM_END);
        for (i, byte) in data.iter().enumerate() {
            self.state.ram_write_byte(start + i as u32, *byte);
        }
    }

    pub fn add_device<M>(&mut self, handler: Arc<Mutex<M>>)
    where
        M: MMIOHandler + 'static,
    {
        self.unibus.add_device(handler);
    }

    pub fn set_mmio_handler(&mut self, handler: impl MMIOHandler + 'static) {
        self.unibus.set_mmio_handler(handler);
    }

    pub fn get_state(&self) -> &EmulatorState {
        &self.state
    }

    pub fn get_state_mut(&mut self) -> &mut EmulatorState {
        &mut self.state
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn save(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        use common::mem::WriteU16;
        w.write_u16(self.waiting as u16)?;
        w.write_u16(self.halted as u16)?;
        w.write_u16(self.t_suppress as u16)?;
        w.write_u16(self.cur_pc)?;
        self.state.save(w)
    }

    pub fn restore(&mut self, r: &mut impl std::io::Read) -> std::io::Result<()> {
        use common::mem::ReadU16;
        self.waiting = r.read_u16()? != 0;
        self.halted = r.read_u16()? != 0;
        self.t_suppress = r.read_u16()? != 0;
        self.cur_pc = r.read_u16()?;
        self.state.restore(r)
    }

    ///////////////////////////////////////////////////////////////////////////
    // One instruction boundary: give the devices a time slice, sample the
    // pending interrupts exactly once, then fetch and execute.

    pub fn run_ins(&mut self) -> ExecRet {
        if self.halted {
            return ExecRet::Halt;
        }
        self.state.inc_ins();
        self.unibus.tick_devices(&mut self.state);

        if let Some(int) = self
            .interrupts
            .take_above(self.state.get_status().get_prio())
        {
            debug!("Interrupt: vector {:#o} at BR{}", int.vector, int.prio);
            self.waiting = false;
            if let Err(trap) = self.service_vector(int.vector) {
                return self.double_fault(trap);
            }
        }

        if self.waiting {
            return ExecRet::Wait;
        }

        let t_pending = self.state.get_status().get_t();
        let t_suppressed = self.t_suppress;
        self.t_suppress = false;

        let ret = match self.fetch_and_exec() {
            Ok(ret) => ret,
            Err(trap) => {
                debug!("Trap: vector {:#o} at pc {:#o}", trap.vector, self.cur_pc);
                return match self.service_vector(trap.vector) {
                    Ok(()) => ExecRet::Ok,
                    Err(trap) => self.double_fault(trap),
                };
            }
        };

        if ret == ExecRet::Ok && t_pending && !t_suppressed {
            if let Err(trap) = self.service_vector(vector::BPT) {
                return self.double_fault(trap);
            }
        }
        ret
    }

    fn fetch_and_exec(&mut self) -> Result<ExecRet, Trap> {
        self.cur_pc = self.state.pc();
        let word = self.fetch_word()?;
        let Some(ins) = decode(word) else {
            debug!("Reserved instruction {word:#o} at pc {:#o}", self.cur_pc);
            return Err(Trap::RESERVED_INS);
        };
        trace!("PC {:#o}: {ins:?}", self.cur_pc);
        self.exec(&ins)
    }

    // Saves PSW and PC on the kernel stack and vectors to the new PC/PSW.
    // The previous-mode field ends up holding the pre-trap mode. An error
    // here is a double fault.
    fn service_vector(&mut self, vector: u16) -> Result<(), Trap> {
        let old_ps = self.state.get_status().to_raw();
        let old_pc = self.state.pc();
        let old_mode = self.state.get_status().get_mode();

        self.state.switch_mode(Mode::Kernel);
        self.push_word(old_ps)?;
        self.push_word(old_pc)?;

        let new_pc = self.unibus.read_word(&mut self.state, vector as u32)?;
        let new_ps = self.unibus.read_word(&mut self.state, vector as u32 + 2)?;
        self.state.write_psw(new_ps);
        self.state.get_status_mut().set_prev_mode(old_mode);
        self.state.reg_write_word(Reg::PC, new_pc);
        debug!(
            "Vector {vector:#o}: saved pc {old_pc:#o} ps {old_ps:#o}; loaded pc {new_pc:#o} ps {new_ps:#o}"
        );
        Ok(())
    }

    fn double_fault(&mut self, trap: Trap) -> ExecRet {
        error!(
            "Double fault (vector {:#o}) during trap service at pc {:#o}; halting",
            trap.vector, self.cur_pc
        );
        self.halted = true;
        ExecRet::Halt
    }

    ///////////////////////////////////////////////////////////////////////////
    // Memory access. Every virtual access translates through the MMU and
    // dispatches on the Unibus; a fault propagates out as a Trap before
    // the access commits.

    fn translate(&mut self, va: u16, access: Access) -> Result<u32, Trap> {
        let mode = self.state.get_status().get_mode();
        let cur_pc = self.cur_pc;
        self.state.mmu_mut().translate(va, access, mode, cur_pc)
    }

    fn translate_prev(&mut self, va: u16, access: Access) -> Result<u32, Trap> {
        let mode = self.state.get_status().get_prev_mode();
        let cur_pc = self.cur_pc;
        self.state.mmu_mut().translate(va, access, mode, cur_pc)
    }

    pub fn mem_read_word(&mut self, va: u16) -> Result<u16, Trap> {
        let pa = self.translate(va, Access::Read)?;
        self.unibus.read_word(&mut self.state, pa)
    }

    pub fn mem_write_word(&mut self, va: u16, val: u16) -> Result<(), Trap> {
        let pa = self.translate(va, Access::Write)?;
        self.unibus.write_word(&mut self.state, pa, val)
    }

    pub fn mem_read_byte(&mut self, va: u16) -> Result<u8, Trap> {
        let pa = self.translate(va, Access::Read)?;
        self.unibus.read_byte(&mut self.state, pa)
    }

    pub fn mem_write_byte(&mut self, va: u16, val: u8) -> Result<(), Trap> {
        let pa = self.translate(va, Access::Write)?;
        self.unibus.write_byte(&mut self.state, pa, val)
    }

    // Physical access for hosts and tests; no MMU involvement.
    pub fn phys_read_word(&mut self, addr: u32) -> Result<u16, Trap> {
        self.unibus.read_word(&mut self.state, addr)
    }

    pub fn phys_write_word(&mut self, addr: u32, val: u16) -> Result<(), Trap> {
        self.unibus.write_word(&mut self.state, addr, val)
    }

    fn fetch_word(&mut self) -> Result<u16, Trap> {
        let pc = self.state.pc();
        if pc & 0x1 != 0 {
            debug!("Fetch from odd pc {pc:#o}");
            return Err(Trap::BUS_ERROR);
        }
        let val = self.mem_read_word(pc)?;
        self.state.reg_write_word(Reg::PC, pc.wrapping_add(2));
        Ok(val)
    }

    fn push_word(&mut self, val: u16) -> Result<(), Trap> {
        let sp = self.state.sp().wrapping_sub(2);
        if self.state.get_status().get_mode() == Mode::Kernel && sp < 0o400 {
            debug!("Kernel stack overflow, sp {sp:#o}");
            return Err(Trap::BUS_ERROR);
        }
        self.state.reg_write_word(Reg::SP, sp);
        self.mem_write_word(sp, val)
    }

    fn pop_word(&mut self) -> Result<u16, Trap> {
        let sp = self.state.sp();
        let val = self.mem_read_word(sp)?;
        self.state.reg_write_word(Reg::SP, sp.wrapping_add(2));
        Ok(val)
    }

    ///////////////////////////////////////////////////////////////////////////
    // Operand resolution. Auto-increment side effects commit as the
    // operand resolves; a later fault leaves them in place, which is the
    // hardware's convention too.

    // Returns the address, not the value.
    fn exec_auto(&mut self, reg: Reg, inc: bool, mut size: Size) -> u16 {
        if reg.keeps_word_alignment() {
            // Byte ops on the stack pointer or PC still move by a word.
            size = Size::Word;
        }
        let mut val = self.state.reg_read_word(reg);
        if !inc {
            val = val.wrapping_sub(size.bytes());
        }
        let ret = val;
        if inc {
            val = val.wrapping_add(size.bytes());
        }
        self.state.reg_write_word(reg, val);
        ret
    }

    // Convert an operand to a register or a memory location that can be
    // read or written. This is separate from read and write because some
    // locations get both in one instruction, and resolving is
    // side-effecting.
    fn resolve(&mut self, arg: &Operand, size: Size) -> Result<ResolvedOperand, Trap> {
        let loc = match arg.mode {
            AddrMode::Gen => return Ok(ResolvedOperand::Reg(arg.reg)),
            AddrMode::Def => self.state.reg_read_word(arg.reg),
            AddrMode::AutoInc => self.exec_auto(arg.reg, true, size),
            AddrMode::AutoIncDef => {
                let addr = self.exec_auto(arg.reg, true, Size::Word);
                self.mem_read_word(addr)?
            }
            AddrMode::AutoDec => self.exec_auto(arg.reg, false, size),
            AddrMode::AutoDecDef => {
                let addr = self.exec_auto(arg.reg, false, Size::Word);
                self.mem_read_word(addr)?
            }
            AddrMode::Index => {
                let imm = self.fetch_word()?;
                let reg_val = self.state.reg_read_word(arg.reg);
                reg_val.wrapping_add(imm)
            }
            AddrMode::IndexDef => {
                let imm = self.fetch_word()?;
                let reg_val = self.state.reg_read_word(arg.reg);
                self.mem_read_word(reg_val.wrapping_add(imm))?
            }
        };

        Ok(ResolvedOperand::Mem(loc))
    }

    fn read_resolved_word(&mut self, res: ResolvedOperand) -> Result<u16, Trap> {
        match res {
            ResolvedOperand::Reg(r) => Ok(self.state.reg_read_word(r)),
            ResolvedOperand::Mem(addr) => self.mem_read_word(addr),
        }
    }

    fn write_resolved_word(&mut self, res: ResolvedOperand, val: u16) -> Result<(), Trap> {
        match res {
            ResolvedOperand::Reg(r) => {
                self.state.reg_write_word(r, val);
                Ok(())
            }
            ResolvedOperand::Mem(addr) => self.mem_write_word(addr, val),
        }
    }

    fn read_resolved_byte(&mut self, res: ResolvedOperand) -> Result<u8, Trap> {
        match res {
            ResolvedOperand::Reg(r) => Ok(self.state.reg_read_byte(r)),
            ResolvedOperand::Mem(addr) => self.mem_read_byte(addr),
        }
    }

    fn write_resolved_byte(&mut self, res: ResolvedOperand, val: u8) -> Result<(), Trap> {
        match res {
            ResolvedOperand::Reg(r) => {
                self.state.reg_write_byte(r, val);
                Ok(())
            }
            ResolvedOperand::Mem(addr) => self.mem_write_byte(addr, val),
        }
    }

    fn read_resolved_widen(&mut self, res: ResolvedOperand, size: Size) -> Result<u32, Trap> {
        match size {
            Size::Word => Ok(self.read_resolved_word(res)? as u32),
            Size::Byte => Ok(self.read_resolved_byte(res)? as u32),
        }
    }

    fn write_resolved_narrow(
        &mut self,
        res: ResolvedOperand,
        val: u32,
        size: Size,
    ) -> Result<(), Trap> {
        match size {
            Size::Word => self.write_resolved_word(res, val as u16),
            Size::Byte => self.write_resolved_byte(res, val as u8),
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Execute.

    fn exec(&mut self, ins: &Ins) -> Result<ExecRet, Trap> {
        match ins {
            Ins::DoubleOperand(ins) => self.exec_double_operand_ins(ins)?,
            Ins::Eis(ins) => self.exec_eis_ins(ins)?,
            Ins::Sob(ins) => self.exec_sob_ins(ins),
            Ins::Branch(ins) => self.exec_branch_ins(ins),
            Ins::Jmp(ins) => self.exec_jmp_ins(ins)?,
            Ins::Jsr(ins) => self.exec_jsr_ins(ins)?,
            Ins::Rts(ins) => self.exec_rts_ins(ins)?,
            Ins::Mark(ins) => self.exec_mark_ins(ins)?,
            Ins::SingleOperand(ins) => self.exec_single_operand_ins(ins)?,
            Ins::CC(ins) => self.exec_cc_ins(ins),
            Ins::Misc(ins) => return self.exec_misc_ins(ins),
            Ins::Trap(ins) => return Err(self.exec_trap_ins(ins)),
        }
        Ok(ExecRet::Ok)
    }

    fn do_mov(&mut self, src: &Operand, dst: &Operand, size: Size) -> Result<(), Trap> {
        let src = self.resolve(src, size)?;
        let val = self.read_resolved_widen(src, size)?;
        let dst = self.resolve(dst, size)?;

        if size == Size::Byte && matches!(dst, ResolvedOperand::Reg(_)) {
            // movb to a register sign-extends into the whole word.
            let val = val as u8 as i8 as i16 as u16;
            self.write_resolved_word(dst, val)?;
        } else {
            self.write_resolved_narrow(dst, val, size)?;
        }
        self.state.get_status_mut().set_zero(val == 0);
        self.state
            .get_status_mut()
            .set_negative(size.sign_bit(val) != 0);
        self.state.get_status_mut().set_overflow(false);
        Ok(())
    }

    fn do_bitwise(
        &mut self,
        src: &Operand,
        op: fn(u32, u32) -> u32,
        dst: &Operand,
        size: Size,
        discard: bool,
    ) -> Result<(), Trap> {
        let src = self.resolve(src, size)?;
        let src_val = self.read_resolved_widen(src, size)?;
        let dst = self.resolve(dst, size)?;
        let dst_val = self.read_resolved_widen(dst, size)?;
        let res = op(src_val, dst_val);

        let status = self.state.get_status_mut();
        status.set_zero(res & size.mask() == 0);
        status.set_negative(size.sign_bit(res) != 0);
        // Carry not affected
        status.set_overflow(false);

        if !discard {
            self.write_resolved_narrow(dst, res, size)?;
        }
        Ok(())
    }

    fn do_add(&mut self, src: &Operand, dst: &Operand) -> Result<(), Trap> {
        let size = Size::Word;
        let src = self.resolve(src, size)?;
        let src_val = self.read_resolved_widen(src, size)?;
        let src_sign = size.sign_bit(src_val);
        let dst = self.resolve(dst, size)?;
        let dst_val = self.read_resolved_widen(dst, size)?;
        let dst_sign = size.sign_bit(dst_val);
        let res = src_val + dst_val;
        let res_sign = size.sign_bit(res);

        let status = self.state.get_status_mut();
        status.set_zero(res & size.mask() == 0);
        status.set_negative(res_sign != 0);
        status.set_carry(res >> size.bits() != 0);
        status.set_overflow(src_sign == dst_sign && dst_sign != res_sign);
        self.write_resolved_narrow(dst, res, size)
    }

    fn do_sub(&mut self, src: &Operand, dst: &Operand) -> Result<(), Trap> {
        let size = Size::Word;
        let src = self.resolve(src, size)?;
        let src_val = self.read_resolved_widen(src, size)?;
        let src_sign = size.sign_bit(src_val);
        let dst = self.resolve(dst, size)?;
        let dst_val = self.read_resolved_widen(dst, size)?;
        let dst_sign = size.sign_bit(dst_val);
        let res = dst_val.wrapping_add((!src_val).wrapping_add(1) & size.mask());
        let res_sign = size.sign_bit(res);

        let status = self.state.get_status_mut();
        status.set_zero(res & size.mask() == 0);
        status.set_negative(res_sign != 0);
        status.set_carry(dst_val < src_val);
        status.set_overflow(src_sign != dst_sign && src_sign == res_sign);
        self.write_resolved_narrow(dst, res, size)
    }

    // NB: args are swapped compared to sub.
    fn do_cmp(&mut self, src: &Operand, dst: &Operand, size: Size) -> Result<(), Trap> {
        let src = self.resolve(src, size)?;
        let src_val = self.read_resolved_widen(src, size)?;
        let src_sign = size.sign_bit(src_val);
        let dst = self.resolve(dst, size)?;
        let dst_val = self.read_resolved_widen(dst, size)?;
        let dst_sign = size.sign_bit(dst_val);
        let res = src_val.wrapping_add((!dst_val).wrapping_add(1) & size.mask());
        let res_sign = size.sign_bit(res);

        let status = self.state.get_status_mut();
        status.set_zero(res & size.mask() == 0);
        status.set_negative(res_sign != 0);
        status.set_carry(src_val < dst_val);
        status.set_overflow(src_sign != dst_sign && dst_sign == res_sign);
        Ok(())
    }

    fn exec_double_operand_ins(&mut self, ins: &DoubleOperandIns) -> Result<(), Trap> {
        use DoubleOperandOpcode::*;
        match ins.op {
            Mov => self.do_mov(&ins.src, &ins.dst, Size::Word),
            Cmp => self.do_cmp(&ins.src, &ins.dst, Size::Word),
            Bit => self.do_bitwise(&ins.src, u32::bitand, &ins.dst, Size::Word, true),
            Bic => self.do_bitwise(&ins.src, not_and, &ins.dst, Size::Word, false),
            Bis => self.do_bitwise(&ins.src, u32::bitor, &ins.dst, Size::Word, false),
            Add => self.do_add(&ins.src, &ins.dst),

            MovB => self.do_mov(&ins.src, &ins.dst, Size::Byte),
            CmpB => self.do_cmp(&ins.src, &ins.dst, Size::Byte),
            BitB => self.do_bitwise(&ins.src, u32::bitand, &ins.dst, Size::Byte, true),
            BicB => self.do_bitwise(&ins.src, not_and, &ins.dst, Size::Byte, false),
            BisB => self.do_bitwise(&ins.src, u32::bitor, &ins.dst, Size::Byte, false),

            Sub => self.do_sub(&ins.src, &ins.dst),
        }
    }

    fn exec_branch_ins(&mut self, ins: &BranchIns) {
        let (z, n, c, v) = self.state.get_status().flags();
        let taken = match ins.op {
            BranchOpcode::Br => true,
            BranchOpcode::Bne => !z,
            BranchOpcode::Beq => z,
            BranchOpcode::Bmi => n,
            BranchOpcode::Bpl => !n,
            BranchOpcode::Bcs => c,
            BranchOpcode::Bcc => !c,
            BranchOpcode::Bvs => v,
            BranchOpcode::Bvc => !v,
            BranchOpcode::Blt => n != v,
            BranchOpcode::Bge => n == v,
            BranchOpcode::Ble => z || (n != v),
            BranchOpcode::Bgt => !(z || (n != v)),
            BranchOpcode::Bhi => !c && !z,
            BranchOpcode::Blos => c || z,
        };

        if taken {
            let off = (ins.offset as i8 as i16) * 2;
            let pc = self.state.pc().wrapping_add(off as u16);
            self.state.reg_write_word(Reg::PC, pc);
        }
    }

    fn exec_sob_ins(&mut self, ins: &SobIns) {
        let val = self.state.reg_read_word(ins.reg).wrapping_sub(1);
        self.state.reg_write_word(ins.reg, val);
        if val != 0 {
            let pc = self.state.pc().wrapping_sub(ins.offset * 2);
            self.state.reg_write_word(Reg::PC, pc);
        }
    }

    fn exec_jmp_ins(&mut self, ins: &JmpIns) -> Result<(), Trap> {
        assert_eq!(ins.op, JmpOpcode::Jmp);
        let dst = self.resolve(&ins.dst, Size::Word)?;
        let ResolvedOperand::Mem(new_pc) = dst else {
            // Register-direct jump is a reserved instruction.
            return Err(Trap::RESERVED_INS);
        };
        trace!("PC {:#o}: JMP to {new_pc:#o}", self.cur_pc);
        self.state.reg_write_word(Reg::PC, new_pc);
        Ok(())
    }

    fn exec_jsr_ins(&mut self, ins: &JsrIns) -> Result<(), Trap> {
        assert_eq!(ins.op, JsrOpcode::Jsr);
        let dst = self.resolve(&ins.dst, Size::Word)?;
        let ResolvedOperand::Mem(new_pc) = dst else {
            return Err(Trap::RESERVED_INS);
        };
        let old_val = self.state.reg_read_word(ins.reg);
        self.push_word(old_val)?;
        self.state.reg_write_word(ins.reg, self.state.pc());
        self.state.reg_write_word(Reg::PC, new_pc);
        Ok(())
    }

    fn exec_rts_ins(&mut self, ins: &RtsIns) -> Result<(), Trap> {
        assert_eq!(ins.op, RtsOpcode::Rts);
        let new_pc = self.state.reg_read_word(ins.reg);
        self.state.reg_write_word(Reg::PC, new_pc);
        let old_val = self.pop_word()?;
        self.state.reg_write_word(ins.reg, old_val);
        Ok(())
    }

    // Stack cleanup on return from a subroutine called with arguments on
    // the stack: sp = pc + 2n, pc = r5, r5 = pop.
    fn exec_mark_ins(&mut self, ins: &MarkIns) -> Result<(), Trap> {
        let sp = self.state.pc().wrapping_add(ins.count * 2);
        self.state.reg_write_word(Reg::SP, sp);
        let r5 = self.state.reg_read_word(Reg::R5);
        self.state.reg_write_word(Reg::PC, r5);
        let old_r5 = self.pop_word()?;
        self.state.reg_write_word(Reg::R5, old_r5);
        Ok(())
    }

    fn exec_single_operand_ins(&mut self, ins: &SingleOperandIns) -> Result<(), Trap> {
        use SingleOperandOpcode::*;

        match ins.op {
            Mfpi => return self.exec_mfpi_ins(&ins.dst),
            Mtpi => return self.exec_mtpi_ins(&ins.dst),
            _ => (),
        }

        let size = if ins.is_byte() { Size::Byte } else { Size::Word };
        let dst = self.resolve(&ins.dst, size)?;
        match ins.op {
            Mfpi | Mtpi => unreachable!(),
            Swab => {
                let val = self.read_resolved_word(dst)?;
                let res = val.rotate_left(8);
                self.write_resolved_word(dst, res)?;

                let status = self.state.get_status_mut();
                status.set_zero(res & 0xff == 0);
                status.set_negative((res >> 7) & 0x1 == 1);
                status.set_carry(false);
                status.set_overflow(false);
            }
            Clr | ClrB => {
                self.write_resolved_narrow(dst, 0, size)?;
                let status = self.state.get_status_mut();
                status.set_zero(true);
                status.set_negative(false);
                status.set_carry(false);
                status.set_overflow(false);
            }
            Inc | IncB => {
                let val = self.read_resolved_widen(dst, size)?;
                let res = val.wrapping_add(1);
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res & size.mask() == 0);
                status.set_negative(size.sign_bit(res) != 0);
                // Carry not affected
                status.set_overflow(val == size.largest_signed());
            }
            Dec | DecB => {
                let val = self.read_resolved_widen(dst, size)?;
                let res = val.wrapping_sub(1);
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res & size.mask() == 0);
                status.set_negative(size.sign_bit(res) != 0);
                // Carry not affected
                status.set_overflow(val == size.smallest_signed());
            }
            Neg | NegB => {
                let val = self.read_resolved_widen(dst, size)?;
                let res = (!val).wrapping_add(1) & size.mask();
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(res != 0);
                status.set_overflow(res == size.smallest_signed());
            }
            Tst | TstB => {
                let val = self.read_resolved_widen(dst, size)?;
                let status = self.state.get_status_mut();
                status.set_zero(val & size.mask() == 0);
                status.set_negative(size.sign_bit(val) != 0);
                status.set_carry(false);
                status.set_overflow(false);
            }
            Com | ComB => {
                let val = self.read_resolved_widen(dst, size)?;
                let res = !val & size.mask();
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(true);
                status.set_overflow(false);
            }
            Adc | AdcB => {
                let carry = self.state.get_status().get_carry();
                let val = self.read_resolved_widen(dst, size)?;
                let res = val.wrapping_add(carry as u32);
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res & size.mask() == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(val == size.mask() && carry);
                status.set_overflow(val == size.largest_signed() && carry);
            }
            Sbc | SbcB => {
                let carry = self.state.get_status().get_carry();
                let val = self.read_resolved_widen(dst, size)?;
                let res = val.wrapping_sub(carry as u32) & size.mask();
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(!(val == 0 && carry));
                status.set_overflow(val == size.smallest_signed());
            }
            Ror | RorB => {
                let val = self.read_resolved_widen(dst, size)?;
                let carry = self.state.get_status().get_carry() as u32;
                let new_carry = val & 0x1;
                let res = (val >> 1) | (carry << (size.bits() - 1));
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res & size.mask() == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(new_carry != 0);
                let n = status.get_negative() as u32;
                status.set_overflow((n ^ new_carry) != 0);
            }
            Rol | RolB => {
                let val = self.read_resolved_widen(dst, size)?;
                let carry = self.state.get_status().get_carry() as u32;
                let new_carry = size.sign_bit(val);
                let res = ((val << 1) | carry) & size.mask();
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(new_carry != 0);
                let n = status.get_negative() as u32;
                status.set_overflow((n ^ new_carry) != 0);
            }
            Asr | AsrB => {
                let val = self.read_resolved_widen(dst, size)?;
                let new_carry = val & 0x1;
                // Sign-preserving right shift.
                let res = (val & size.smallest_signed()) | (val >> 1);
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res & size.mask() == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(new_carry != 0);
                let n = status.get_negative() as u32;
                status.set_overflow((n ^ new_carry) != 0);
            }
            Asl | AslB => {
                let val = self.read_resolved_widen(dst, size)?;
                let new_carry = size.sign_bit(val);
                let res = (val << 1) & size.mask();
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(res == 0);
                status.set_negative(size.sign_bit(res) != 0);
                status.set_carry(new_carry != 0);
                let n = status.get_negative() as u32;
                status.set_overflow((n ^ new_carry) != 0);
            }
            Sxt => {
                let n = self.state.get_status().get_negative();
                let res = if n { size.mask() } else { 0 };
                self.write_resolved_narrow(dst, res, size)?;

                let status = self.state.get_status_mut();
                status.set_zero(!n);
                status.set_overflow(false);
            }
        }
        Ok(())
    }

    // Move from previous instruction space: fetch a word through the
    // previous mode's mapping and push it on the current stack.
    fn exec_mfpi_ins(&mut self, dst: &Operand) -> Result<(), Trap> {
        let dst = self.resolve(dst, Size::Word)?;
        let val = match dst {
            ResolvedOperand::Reg(Reg::SP) => self.state.read_prev_sp(),
            ResolvedOperand::Reg(r) => self.state.reg_read_word(r),
            ResolvedOperand::Mem(va) => {
                let pa = self.translate_prev(va, Access::Read)?;
                self.unibus.read_word(&mut self.state, pa)?
            }
        };
        self.push_word(val)?;

        let status = self.state.get_status_mut();
        status.set_zero(val == 0);
        status.set_negative(val & 0x8000 != 0);
        status.set_overflow(false);
        status.set_carry(true);
        Ok(())
    }

    // Move to previous instruction space: pop a word from the current
    // stack and store it through the previous mode's mapping.
    fn exec_mtpi_ins(&mut self, dst: &Operand) -> Result<(), Trap> {
        let dst = self.resolve(dst, Size::Word)?;
        let val = self.pop_word()?;
        match dst {
            ResolvedOperand::Reg(Reg::SP) => self.state.write_prev_sp(val),
            ResolvedOperand::Reg(r) => self.state.reg_write_word(r, val),
            ResolvedOperand::Mem(va) => {
                let pa = self.translate_prev(va, Access::Write)?;
                self.unibus.write_word(&mut self.state, pa, val)?;
            }
        }

        let status = self.state.get_status_mut();
        status.set_zero(val == 0);
        status.set_negative(val & 0x8000 != 0);
        status.set_overflow(false);
        status.set_carry(true);
        Ok(())
    }

    fn exec_eis_ins(&mut self, ins: &EisIns) -> Result<(), Trap> {
        use EisOpcode::*;

        let operand = self.resolve(&ins.operand, Size::Word)?;
        let operand_val = self.read_resolved_word(operand)?;
        let reg_val = self.state.reg_read_word(ins.reg);
        let reg_num = ins.reg.to_u16().unwrap();
        let pair_reg = Reg::from_u16(reg_num | 1).unwrap();

        match ins.op {
            Xor => {
                let res = operand_val ^ reg_val;
                self.write_resolved_word(operand, res)?;

                let status = self.state.get_status_mut();
                status.set_negative(res & 0x8000 != 0);
                status.set_zero(res == 0);
                status.set_overflow(false);
                // Carry unaffected
            }
            Mul => {
                let res = (operand_val as i16 as i32) * (reg_val as i16 as i32);
                // High half to the register, low half to its pair; an odd
                // register keeps only the low half.
                self.state.reg_write_word(ins.reg, (res >> 16) as u16);
                self.state.reg_write_word(pair_reg, res as u16);

                let status = self.state.get_status_mut();
                status.set_negative(res < 0);
                status.set_zero(res == 0);
                status.set_overflow(false);
                status.set_carry(i16::try_from(res).is_err());
            }
            Div => {
                let upper = reg_val as u32;
                let lower = self.state.reg_read_word(pair_reg) as u32;
                let dividend = ((upper << 16) | lower) as i32;
                let divisor = operand_val as i16 as i32;

                if divisor == 0 {
                    let status = self.state.get_status_mut();
                    status.set_overflow(true);
                    status.set_carry(true);
                    return Ok(());
                }

                let quot = dividend / divisor;
                let rem = dividend % divisor;
                let fits = i16::try_from(quot).is_ok();

                let status = self.state.get_status_mut();
                status.set_negative(quot < 0);
                status.set_zero(quot == 0);
                status.set_overflow(!fits);
                status.set_carry(false);

                // The instruction aborts without storing when the quotient
                // doesn't fit in a word.
                if fits {
                    self.state.reg_write_word(ins.reg, quot as u16);
                    self.state.reg_write_word(pair_reg, rem as u16);
                }
            }
            Ash => {
                let count = sign_extend_shift(operand_val);
                let (res, carry) = match count.cmp(&0) {
                    Ordering::Equal => (reg_val, false),
                    Ordering::Greater => {
                        let wide = (reg_val as u64) << count;
                        (wide as u16, (wide >> 16) & 1 != 0)
                    }
                    Ordering::Less => {
                        let count = -count;
                        let sval = reg_val as i16 as i64;
                        let res = (sval >> count.min(63)) as u16;
                        let carry = (sval >> (count - 1)) & 1 != 0;
                        (res, carry)
                    }
                };
                self.state.reg_write_word(ins.reg, res);

                let status = self.state.get_status_mut();
                status.set_negative(res & 0x8000 != 0);
                status.set_zero(res == 0);
                status.set_overflow((res ^ reg_val) & 0x8000 != 0);
                status.set_carry(carry);
            }
            Ashc => {
                let lower = self.state.reg_read_word(pair_reg) as u32;
                let val = ((reg_val as u32) << 16) | lower;
                let count = sign_extend_shift(operand_val);
                let (res, carry) = match count.cmp(&0) {
                    Ordering::Equal => (val, false),
                    Ordering::Greater => {
                        let wide = (val as u64) << count;
                        (wide as u32, (wide >> 32) & 1 != 0)
                    }
                    Ordering::Less => {
                        let count = -count;
                        let sval = val as i32 as i64;
                        let res = (sval >> count.min(63)) as u32;
                        let carry = (sval >> (count - 1)) & 1 != 0;
                        (res, carry)
                    }
                };
                self.state.reg_write_word(ins.reg, (res >> 16) as u16);
                self.state.reg_write_word(pair_reg, res as u16);

                let status = self.state.get_status_mut();
                status.set_negative(res & 0x8000_0000 != 0);
                status.set_zero(res == 0);
                status.set_overflow((res ^ val) & 0x8000_0000 != 0);
                status.set_carry(carry);
            }
        }
        Ok(())
    }

    fn exec_cc_ins(&mut self, ins: &CCIns) {
        if ins.set {
            self.state.get_status_mut().set_flags(ins.flags);
        } else {
            self.state.get_status_mut().clear_flags(ins.flags);
        }
    }

    fn exec_trap_ins(&mut self, ins: &TrapIns) -> Trap {
        match ins.op {
            TrapOpcode::Emt => Trap::EMT,
            TrapOpcode::Trap => Trap::TRAP,
        }
    }

    fn exec_rti_ins(&mut self, inhibit_t_trap: bool) -> Result<(), Trap> {
        let new_pc = self.pop_word()?;
        let mut new_ps = self.pop_word()?;
        if self.state.get_status().get_mode().is_user() {
            // User mode can only touch the condition codes and T bit.
            let cur = self.state.get_status().to_raw();
            new_ps = (cur & !0o37) | (new_ps & 0o37);
        }
        debug!("RTI to pc {new_pc:#o}, ps {new_ps:#o}");
        self.state.write_psw(new_ps);
        self.state.reg_write_word(Reg::PC, new_pc);
        self.t_suppress = inhibit_t_trap;
        Ok(())
    }

    fn exec_misc_ins(&mut self, ins: &MiscIns) -> Result<ExecRet, Trap> {
        match ins.op {
            MiscOpcode::Halt => {
                if self.state.get_status().get_mode().is_user() {
                    return Err(Trap::BUS_ERROR);
                }
                debug!("HALT at pc {:#o}", self.cur_pc);
                self.halted = true;
                return Ok(ExecRet::Halt);
            }
            MiscOpcode::Wait => {
                if !self.state.get_status().get_mode().is_user() {
                    self.waiting = true;
                    return Ok(ExecRet::Wait);
                }
            }
            MiscOpcode::Rti => self.exec_rti_ins(false)?,
            MiscOpcode::Rtt => self.exec_rti_ins(true)?,
            MiscOpcode::Bpt => return Err(Trap::BPT),
            MiscOpcode::Iot => return Err(Trap::IOT),
            MiscOpcode::Reset => {
                if !self.state.get_status().get_mode().is_user() {
                    self.unibus.reset_devices(&mut self.state);
                    self.interrupts.clear();
                }
            }
            MiscOpcode::Setd => (), // FP11 mode bit; no FP11 here
        }
        Ok(ExecRet::Ok)
    }
}

// ASH/ASHC shift counts are six bits, sign extended: 0o77 means one place
// to the right.
fn sign_extend_shift(val: u16) -> i16 {
    let count = (val & 0o77) as i16;
    if count & 0o40 != 0 {
        count - 0o100
    } else {
        count
    }
}

fn not_and(src: u32, dst: u32) -> u32 {
    !src & dst
}
