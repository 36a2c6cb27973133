
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

pub trait InstrVariant<Opcode: FromPrimitive> {
    const OPCODE_BITS: usize;
    const LOWER_BITS: usize = 16 - Self::OPCODE_BITS;

    fn decode_opcode(input: u16) -> Option<Opcode> {
        let op = input >> Self::LOWER_BITS;
        Opcode::from_u16(op)
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum AddrMode {
    Gen = 0,
    Def, // Deferred (indirect)
    AutoInc,
    AutoIncDef,
    AutoDec,
    AutoDecDef,
    Index,
    IndexDef,
}

impl AddrMode {
    pub const NUM_BITS: usize = 3;
    pub const MASK: u16 = (1u16 << Self::NUM_BITS) - 1;
}

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum Reg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    SP,
    PC,
}

pub const NUM_REGS: usize = 8;
pub const NUM_GEN_REGS: usize = 6; // R0..R5 have an alternate bank

impl Reg {
    pub const NUM_BITS: usize = 3;
    pub const MASK: u16 = (1u16 << Self::NUM_BITS) - 1;

    // The stack-alignment rule: byte-sized auto-inc/dec on SP or PC still
    // moves by a word.
    pub fn keeps_word_alignment(self) -> bool {
        matches!(self, Reg::SP | Reg::PC)
    }
}

// One six-bit operand field: mode and register. Immediates and index words
// are fetched from the instruction stream at execution time via the PC
// auto-increment, so they are not part of the decoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub mode: AddrMode,
    pub reg: Reg,
}

impl Operand {
    pub const NUM_BITS: usize = AddrMode::NUM_BITS + Reg::NUM_BITS;
    pub const MASK: u16 = (1u16 << Self::NUM_BITS) - 1;

    pub fn from_bits(bits: u16) -> Operand {
        let reg = Reg::from_u16(bits & Reg::MASK).unwrap();
        let mode = AddrMode::from_u16((bits >> Reg::NUM_BITS) & AddrMode::MASK).unwrap();
        Operand { mode, reg }
    }
}

////////////////////////////////////////////////////////////////////////////////

// Also covers the byte variants.
#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum DoubleOperandOpcode {
    Mov = 1,
    Cmp,
    Bit,
    Bic,
    Bis,
    Add,

    MovB = 9,
    CmpB,
    BitB,
    BicB,
    BisB,
    Sub,
}

#[derive(Debug, Clone, Copy)]
pub struct DoubleOperandIns {
    pub op: DoubleOperandOpcode,
    pub src: Operand,
    pub dst: Operand,
}

impl InstrVariant<DoubleOperandOpcode> for DoubleOperandIns {
    const OPCODE_BITS: usize = 4;
}

impl DoubleOperandIns {
    pub fn is_byte(&self) -> bool {
        (self.op as u32) >= (DoubleOperandOpcode::MovB as u32)
            && self.op != DoubleOperandOpcode::Sub
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum BranchOpcode {
    Br = 1,
    Bne,
    Beq,
    Bge,
    Blt,
    Bgt,
    Ble,

    Bpl = 128,
    Bmi,
    Bhi,
    Blos,
    Bvc,
    Bvs,
    Bcc,
    Bcs,
}

#[derive(Debug, Clone, Copy)]
pub struct BranchIns {
    pub op: BranchOpcode,
    pub offset: u8, // words, signed
}

impl BranchIns {
    pub const OFFSET_NUM_BITS: usize = 8;
    pub const OFFSET_MASK: u16 = (1u16 << Self::OFFSET_NUM_BITS) - 1;
}

impl InstrVariant<BranchOpcode> for BranchIns {
    const OPCODE_BITS: usize = 8;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum JmpOpcode {
    Jmp = 1,
}

#[derive(Debug, Clone, Copy)]
pub struct JmpIns {
    pub op: JmpOpcode,
    pub dst: Operand,
}

impl InstrVariant<JmpOpcode> for JmpIns {
    const OPCODE_BITS: usize = 10;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum JsrOpcode {
    Jsr = 4,
}

#[derive(Debug, Clone, Copy)]
pub struct JsrIns {
    pub op: JsrOpcode,
    pub reg: Reg,
    pub dst: Operand,
}

impl InstrVariant<JsrOpcode> for JsrIns {
    const OPCODE_BITS: usize = 7;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum RtsOpcode {
    Rts = 16,
}

#[derive(Debug, Clone, Copy)]
pub struct RtsIns {
    pub op: RtsOpcode,
    pub reg: Reg,
}

impl InstrVariant<RtsOpcode> for RtsIns {
    const OPCODE_BITS: usize = 13;
}

////////////////////////////////////////////////////////////////////////////////

// Rotates, byte variants, and the D-format oddballs SXT/MFPI/MTPI.
#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum SingleOperandOpcode {
    Swab = 3,

    Clr = 40,
    Com,
    Inc,
    Dec,
    Neg,
    Adc,
    Sbc,
    Tst,
    Ror,
    Rol,
    Asr,
    Asl,

    Mfpi = 53,
    Mtpi,
    Sxt,

    ClrB = 552,
    ComB,
    IncB,
    DecB,
    NegB,
    AdcB,
    SbcB,
    TstB,
    RorB,
    RolB,
    AsrB,
    AslB,
}

#[derive(Debug, Clone, Copy)]
pub struct SingleOperandIns {
    pub op: SingleOperandOpcode,
    pub dst: Operand,
}

impl SingleOperandIns {
    pub fn is_byte(&self) -> bool {
        (self.op as u32) >= (SingleOperandOpcode::ClrB as u32)
    }
}

impl InstrVariant<SingleOperandOpcode> for SingleOperandIns {
    const OPCODE_BITS: usize = 10;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum EisOpcode {
    Mul = 0o70,
    Div,
    Ash,
    Ashc,
    Xor,
}

#[derive(Debug, Clone, Copy)]
pub struct EisIns {
    pub op: EisOpcode,
    pub reg: Reg,
    pub operand: Operand,
}

impl InstrVariant<EisOpcode> for EisIns {
    const OPCODE_BITS: usize = 7;
}

////////////////////////////////////////////////////////////////////////////////

// SOB shares the EIS format field-wise but takes a six-bit backward word
// offset instead of an operand.
#[derive(Debug, Clone, Copy)]
pub struct SobIns {
    pub reg: Reg,
    pub offset: u16, // words, backward
}

impl SobIns {
    pub const OPCODE: u16 = 0o77; // bits 15:9
    pub const OFFSET_MASK: u16 = 0o77;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy)]
pub struct MarkIns {
    pub count: u16, // words of arguments to discard
}

impl MarkIns {
    pub const OPCODE: u16 = 0o64; // bits 15:6
    pub const COUNT_MASK: u16 = 0o77;
}

////////////////////////////////////////////////////////////////////////////////

// Condition-code operators: bit 4 selects set/clear, bits 3:0 select flags.
// Any combination is legal (CCC and SCC included).
#[derive(Debug, Clone, Copy)]
pub struct CCIns {
    pub set: bool,
    pub flags: u16,
}

impl CCIns {
    pub const BASE: u16 = 0o240;
    pub const SET_BIT: u16 = 0o20;
    pub const FLAGS_MASK: u16 = 0o17;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum MiscOpcode {
    Halt = 0,
    Wait,
    Rti,
    Bpt,
    Iot,
    Reset,
    Rtt,

    // FP11 mode set; V6 executes it at boot, we decode and ignore it.
    Setd = 0o170011,
}

#[derive(Debug, Clone, Copy)]
pub struct MiscIns {
    pub op: MiscOpcode,
}

impl InstrVariant<MiscOpcode> for MiscIns {
    const OPCODE_BITS: usize = 16;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum TrapOpcode {
    Emt = 0o210,
    Trap,
}

#[derive(Debug, Clone, Copy)]
pub struct TrapIns {
    pub op: TrapOpcode,
    pub payload: u8, // low byte, for the handler to inspect on the stack
}

impl InstrVariant<TrapOpcode> for TrapIns {
    const OPCODE_BITS: usize = 8;
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy)]
pub enum Ins {
    DoubleOperand(DoubleOperandIns),
    Eis(EisIns),
    Sob(SobIns),
    Branch(BranchIns),
    Jmp(JmpIns),
    Jsr(JsrIns),
    Rts(RtsIns),
    Mark(MarkIns),
    SingleOperand(SingleOperandIns),
    CC(CCIns),
    Misc(MiscIns),
    Trap(TrapIns),
}
