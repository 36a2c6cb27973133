
use num_traits::FromPrimitive;

use super::asm::*;

fn decode_double_operand_ins(word: u16) -> Option<Ins> {
    let op = DoubleOperandIns::decode_opcode(word)?;
    let src = Operand::from_bits(word >> Operand::NUM_BITS);
    let dst = Operand::from_bits(word);
    Some(Ins::DoubleOperand(DoubleOperandIns { op, src, dst }))
}

fn decode_eis_ins(word: u16) -> Option<Ins> {
    let op = EisIns::decode_opcode(word)?;
    let reg = Reg::from_u16((word >> Operand::NUM_BITS) & Reg::MASK).unwrap();
    let operand = Operand::from_bits(word);
    Some(Ins::Eis(EisIns { op, reg, operand }))
}

fn decode_sob_ins(word: u16) -> Option<Ins> {
    if word >> 9 != SobIns::OPCODE {
        return None;
    }
    let reg = Reg::from_u16((word >> Operand::NUM_BITS) & Reg::MASK).unwrap();
    Some(Ins::Sob(SobIns { reg, offset: word & SobIns::OFFSET_MASK }))
}

fn decode_branch_ins(word: u16) -> Option<Ins> {
    let op = BranchIns::decode_opcode(word)?;
    Some(Ins::Branch(BranchIns { op, offset: (word & BranchIns::OFFSET_MASK) as u8 }))
}

fn decode_jmp_ins(word: u16) -> Option<Ins> {
    let op = JmpIns::decode_opcode(word)?;
    Some(Ins::Jmp(JmpIns { op, dst: Operand::from_bits(word) }))
}

fn decode_jsr_ins(word: u16) -> Option<Ins> {
    let op = JsrIns::decode_opcode(word)?;
    let reg = Reg::from_u16((word >> Operand::NUM_BITS) & Reg::MASK).unwrap();
    Some(Ins::Jsr(JsrIns { op, reg, dst: Operand::from_bits(word) }))
}

fn decode_rts_ins(word: u16) -> Option<Ins> {
    let op = RtsIns::decode_opcode(word)?;
    let reg = Reg::from_u16(word & Reg::MASK).unwrap();
    Some(Ins::Rts(RtsIns { op, reg }))
}

fn decode_mark_ins(word: u16) -> Option<Ins> {
    if word >> 6 != MarkIns::OPCODE {
        return None;
    }
    Some(Ins::Mark(MarkIns { count: word & MarkIns::COUNT_MASK }))
}

fn decode_single_operand_ins(word: u16) -> Option<Ins> {
    let op = SingleOperandIns::decode_opcode(word)?;
    Some(Ins::SingleOperand(SingleOperandIns { op, dst: Operand::from_bits(word) }))
}

fn decode_cc_ins(word: u16) -> Option<Ins> {
    if word & !(CCIns::SET_BIT | CCIns::FLAGS_MASK) != CCIns::BASE {
        return None;
    }
    Some(Ins::CC(CCIns {
        set: word & CCIns::SET_BIT != 0,
        flags: word & CCIns::FLAGS_MASK,
    }))
}

fn decode_misc_ins(word: u16) -> Option<Ins> {
    let op = MiscIns::decode_opcode(word)?;
    Some(Ins::Misc(MiscIns { op }))
}

fn decode_trap_ins(word: u16) -> Option<Ins> {
    let op = TrapIns::decode_opcode(word)?;
    Some(Ins::Trap(TrapIns { op, payload: word as u8 }))
}

type Decoder = fn(u16) -> Option<Ins>;

const DECODERS: &[Decoder] = &[
    decode_double_operand_ins,
    decode_eis_ins,
    decode_sob_ins,
    decode_branch_ins,
    decode_jmp_ins,
    decode_jsr_ins,
    decode_rts_ins,
    decode_mark_ins,
    decode_single_operand_ins,
    decode_cc_ins,
    decode_misc_ins,
    decode_trap_ins,
];

// Decode one instruction word. Immediates and index words are not consumed
// here; the emulator fetches them through the MMU as the operands resolve.
// None means a reserved instruction.
pub fn decode(word: u16) -> Option<Ins> {
    DECODERS.iter().find_map(|decoder| decoder(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_operand() {
        let ins = decode(0o010001).unwrap(); // mov r0, r1
        let Ins::DoubleOperand(ins) = ins else {
            panic!("wrong category: {ins:?}");
        };
        assert_eq!(ins.op, DoubleOperandOpcode::Mov);
        assert_eq!(ins.src, Operand { mode: AddrMode::Gen, reg: Reg::R0 });
        assert_eq!(ins.dst, Operand { mode: AddrMode::Gen, reg: Reg::R1 });
    }

    #[test]
    fn misc_exact() {
        assert!(matches!(
            decode(0o000000),
            Some(Ins::Misc(MiscIns { op: MiscOpcode::Halt }))
        ));
        assert!(matches!(
            decode(0o000001),
            Some(Ins::Misc(MiscIns { op: MiscOpcode::Wait }))
        ));
        assert!(matches!(
            decode(0o000006),
            Some(Ins::Misc(MiscIns { op: MiscOpcode::Rtt }))
        ));
        assert!(matches!(
            decode(0o170011),
            Some(Ins::Misc(MiscIns { op: MiscOpcode::Setd }))
        ));
    }

    #[test]
    fn eis_and_sob() {
        assert!(matches!(
            decode(0o070102), // mul r2, r1
            Some(Ins::Eis(EisIns { op: EisOpcode::Mul, reg: Reg::R1, .. }))
        ));
        assert!(matches!(
            decode(0o077103), // sob r1, .-6
            Some(Ins::Sob(SobIns { reg: Reg::R1, offset: 3 }))
        ));
    }

    #[test]
    fn cc_combined() {
        // ccc clears all four flags at once.
        assert!(matches!(decode(0o257), Some(Ins::CC(CCIns { set: false, flags: 0o17 }))));
        assert!(matches!(decode(0o261), Some(Ins::CC(CCIns { set: true, flags: 0o1 }))));
        // nop
        assert!(matches!(decode(0o240), Some(Ins::CC(CCIns { set: false, flags: 0 }))));
    }

    #[test]
    fn reserved() {
        assert!(decode(0o007000).is_none());
        assert!(decode(0o170001).is_none());
    }
}
