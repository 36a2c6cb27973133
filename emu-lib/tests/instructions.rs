
use common::asm::Reg;
use common::mem::as_byte_slice;
use emu_lib::{Emulator, InterruptQueue, Status};

const CODE_START: u32 = 0o1000;
const STACK_TOP: u16 = 0o4000;

// Loads a program (with a trailing halt) at CODE_START and runs it.
fn run(words: &[u16]) -> Emulator {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(words), CODE_START);
    emu.get_state_mut().reg_write_word(Reg::SP, STACK_TOP);
    emu.run_at(CODE_START as u16);
    emu
}

fn check_flags(emu: &Emulator, expected: u16) {
    assert_eq!(
        emu.get_state().get_status().get_flags(),
        expected,
        "flags (NZVC bits)"
    );
}

#[test]
fn halt() {
    let emu = run(&[0]);
    assert_eq!(emu.get_state().pc(), CODE_START as u16 + 2);
}

#[test]
fn mov_reg_reg() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o010001, 0]), CODE_START);
    emu.get_state_mut().reg_write_word(Reg::R0, 0xabcd);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0xabcd);
    check_flags(&emu, Status::N);
}

#[test]
fn mov_imm_reg() {
    let emu = run(&[
        0o012700, 0o123456, // mov #123456, r0
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o123456);
}

#[test]
fn movb_to_reg_sign_extends() {
    let emu = run(&[
        0o112700, 0o377, // movb #377, r0
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o177777);
    check_flags(&emu, Status::N);

    let emu = run(&[
        0o112700, 0o177, // movb #177, r0
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o177);
    check_flags(&emu, 0);
}

#[test]
fn add_flags() {
    // 1 + 1: no flags.
    let emu = run(&[0o012700, 1, 0o062700, 1, 0]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 2);
    check_flags(&emu, 0);

    // 0o077777 + 1 overflows to negative.
    let emu = run(&[0o012700, 0o077777, 0o062700, 1, 0]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o100000);
    check_flags(&emu, Status::N | Status::V);

    // 0o177777 + 1 carries out to zero.
    let emu = run(&[0o012700, 0o177777, 0o062700, 1, 0]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0);
    check_flags(&emu, Status::Z | Status::C);
}

#[test]
fn sub_and_cmp_flags() {
    // 5 - 3
    let emu = run(&[0o012700, 3, 0o012701, 5, 0o160001, 0]); // sub r0, r1
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 2);
    check_flags(&emu, 0);

    // 3 - 5 borrows.
    let emu = run(&[0o012700, 5, 0o012701, 3, 0o160001, 0]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0o177776);
    check_flags(&emu, Status::N | Status::C);

    // cmp 7, 7: equal, no borrow, dst untouched.
    let emu = run(&[0o012700, 7, 0o012701, 7, 0o020001, 0]); // cmp r0, r1
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 7);
    check_flags(&emu, Status::Z);
}

#[test]
fn autoinc_walk() {
    let arr = CODE_START as u16 + 0o22;
    let mut emu = run(&[
        0o012700, arr, // mov #arr, r0
        0o062720, 1,   // add #1, (r0)+
        0o062720, 1,   // add #1, (r0)+
        0o062720, 1,   // add #1, (r0)+
        0,
        // arr:
        1, 2, 3,
    ]);
    assert_eq!(emu.phys_read_word(arr as u32).unwrap(), 2);
    assert_eq!(emu.phys_read_word(arr as u32 + 2).unwrap(), 3);
    assert_eq!(emu.phys_read_word(arr as u32 + 4).unwrap(), 4);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), arr + 6);
}

#[test]
fn stack_push_pop_round_trip() {
    let emu = run(&[
        0o012700, 0o52525, // mov #52525, r0
        0o010046,          // mov r0, -(sp)
        0o012601,          // mov (sp)+, r1
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0o52525);
    assert_eq!(emu.get_state().sp(), STACK_TOP);
}

#[test]
fn byte_autoinc_on_sp_moves_a_word() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o112600, 0]), CODE_START); // movb (sp)+, r0
    emu.get_state_mut().reg_write_word(Reg::SP, 0o2000);
    emu.get_state_mut().ram_write_word(0o2000, 0o105);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o105);
    assert_eq!(emu.get_state().sp(), 0o2002);
}

#[test]
fn byte_autoinc_on_gen_reg_moves_a_byte() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o112100, 0]), CODE_START); // movb (r1)+, r0
    emu.get_state_mut().reg_write_word(Reg::R1, 0o2000);
    emu.get_state_mut().ram_write_byte(0o2000, 0o42);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o42);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0o2001);
}

#[test]
fn mov_to_pc_jumps() {
    let target = CODE_START as u16 + 0o10;
    let emu = run(&[
        0o012707, target, // mov #target, pc
        0o012700, 0o666,  // skipped
        // target:
        0o012700, 0o123,  // mov #123, r0
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o123);
}

#[test]
fn index_mode() {
    let mut emu = Emulator::new(InterruptQueue::new());
    // mov 4(r0), r1
    emu.load_image(as_byte_slice(&[0o016001, 4, 0]), CODE_START);
    emu.get_state_mut().reg_write_word(Reg::R0, 0o2000);
    emu.get_state_mut().ram_write_word(0o2004, 0o7070);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0o7070);
}

#[test]
fn branch_loop() {
    let emu = run(&[
        0o012700, 0,  // mov #0, r0
        0o012701, 10, // mov #10, r1
        0o062700, 1,  // add #1, r0
        0o162701, 1,  // sub #1, r1
        0o001373,     // bne .-10
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 10);
}

#[test]
fn sob_loop() {
    let emu = run(&[
        0o012701, 5, // mov #5, r1
        0o005200,    // inc r0
        0o077102,    // sob r1, .-4
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 5);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0);
}

#[test]
fn jsr_rts() {
    let fun = CODE_START as u16 + 0o16;
    let emu = run(&[
        0o012701, 0,   // mov #0, r1
        0o004737, fun, // jsr pc, @#fun
        0,
        0o012702, 2,   // skipped: mov #2, r2
        // fun:
        0o012701, 1,   // mov #1, r1
        0o000207,      // rts pc
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 1);
    assert_eq!(emu.get_state().reg_read_word(Reg::R2), 0);
    assert_eq!(emu.get_state().sp(), STACK_TOP);
}

#[test]
fn mul_even_reg_pair() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o070002, 0]), CODE_START); // mul r2, r0
    emu.get_state_mut().reg_write_word(Reg::R0, 0o100); // 64
    emu.get_state_mut().reg_write_word(Reg::R2, 0o4000); // 2048
    emu.run_at(CODE_START as u16);
    // 64 * 2048 = 131072 = 2 << 16: high word 2, low word 0.
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 2);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0);
    assert!(emu.get_state().get_status().get_carry());
}

#[test]
fn div_quotient_and_remainder() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o071002, 0]), CODE_START); // div r2, r0
    emu.get_state_mut().reg_write_word(Reg::R0, 0);
    emu.get_state_mut().reg_write_word(Reg::R1, 17);
    emu.get_state_mut().reg_write_word(Reg::R2, 5);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 3);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 2);
}

#[test]
fn div_by_zero_sets_v_and_c() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o071002, 0]), CODE_START);
    emu.get_state_mut().reg_write_word(Reg::R0, 0);
    emu.get_state_mut().reg_write_word(Reg::R1, 17);
    emu.get_state_mut().reg_write_word(Reg::R2, 0);
    emu.run_at(CODE_START as u16);
    assert!(emu.get_state().get_status().get_overflow());
    assert!(emu.get_state().get_status().get_carry());
}

#[test]
fn div_overflow_leaves_registers() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o071002, 0]), CODE_START);
    // 0x0002_0000 / 2 = 0x10000, too big for a word.
    emu.get_state_mut().reg_write_word(Reg::R0, 2);
    emu.get_state_mut().reg_write_word(Reg::R1, 0);
    emu.get_state_mut().reg_write_word(Reg::R2, 2);
    emu.run_at(CODE_START as u16);
    assert!(emu.get_state().get_status().get_overflow());
    assert!(!emu.get_state().get_status().get_carry());
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 2);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0);
}

#[test]
fn ash_count_zero_is_noop() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o072002, 0]), CODE_START); // ash r2, r0
    emu.get_state_mut().reg_write_word(Reg::R0, 0o1234);
    emu.get_state_mut().reg_write_word(Reg::R2, 0);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o1234);
    assert!(!emu.get_state().get_status().get_carry());
}

#[test]
fn ash_count_63_shifts_right_once() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o072002, 0]), CODE_START);
    emu.get_state_mut().reg_write_word(Reg::R0, 0o10);
    emu.get_state_mut().reg_write_word(Reg::R2, 63);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o4);
}

#[test]
fn ash_right_is_arithmetic() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o072002, 0]), CODE_START);
    emu.get_state_mut().reg_write_word(Reg::R0, 0o100000);
    emu.get_state_mut().reg_write_word(Reg::R2, 63); // right by one
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o140000);
}

#[test]
fn ashc_shifts_the_pair() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o073002, 0]), CODE_START); // ashc r2, r0
    emu.get_state_mut().reg_write_word(Reg::R0, 0);
    emu.get_state_mut().reg_write_word(Reg::R1, 0o100000);
    emu.get_state_mut().reg_write_word(Reg::R2, 1); // left by one
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 1);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0);
}

#[test]
fn xor_reg_into_operand() {
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0o074001, 0]), CODE_START); // xor r0, r1
    emu.get_state_mut().reg_write_word(Reg::R0, 0o170017);
    emu.get_state_mut().reg_write_word(Reg::R1, 0o123456);
    emu.run_at(CODE_START as u16);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0o170017 ^ 0o123456);
}

#[test]
fn swab_exchanges_bytes() {
    let emu = run(&[
        0o012700, 0o177400, // mov #177400, r0
        0o000300,           // swab r0
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o000377);
    check_flags(&emu, Status::N); // low byte is now 0o377
}

#[test]
fn sxt_fills_from_n() {
    let emu = run(&[
        0o012700, 0o100000, // mov #100000, r0 (sets N)
        0o006701,           // sxt r1
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0o177777);

    let emu = run(&[
        0o012700, 0o000001, // clears N
        0o006701,           // sxt r1
        0,
    ]);
    assert_eq!(emu.get_state().reg_read_word(Reg::R1), 0);
    assert!(emu.get_state().get_status().get_zero());
}

#[test]
fn com_neg_flags() {
    let emu = run(&[0o012700, 0o177777, 0o005100, 0]); // com r0
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0);
    check_flags(&emu, Status::Z | Status::C);

    let emu = run(&[0o012700, 1, 0o005400, 0]); // neg r0
    assert_eq!(emu.get_state().reg_read_word(Reg::R0), 0o177777);
    check_flags(&emu, Status::N | Status::C);
}

#[test]
fn condition_code_ops() {
    let emu = run(&[
        0o000277, // scc: set all four
        0,
    ]);
    check_flags(&emu, Status::N | Status::Z | Status::V | Status::C);

    let emu = run(&[
        0o000277, // scc
        0o000241, // clc
        0,
    ]);
    check_flags(&emu, Status::N | Status::Z | Status::V);

    let emu = run(&[
        0o000277, // scc
        0o000257, // ccc: clear all four
        0,
    ]);
    check_flags(&emu, 0);
}

#[test]
fn mark_unwinds_arguments() {
    // The standard MARK calling sequence leaves the stack holding, top to
    // bottom: the mark word, two arguments, the saved r5. The subroutine
    // returns with rts r5, which executes the mark off the stack; the
    // mark drops the arguments, resumes at the return address in r5, and
    // restores the old r5.
    let ret = CODE_START as u16; // resume point: a halt
    let mut emu = Emulator::new(InterruptQueue::new());
    emu.load_image(as_byte_slice(&[0]), CODE_START);

    let state = emu.get_state_mut();
    state.ram_write_word(0o3776, 0o666);    // saved r5
    state.ram_write_word(0o3774, 0o111);    // arg 2
    state.ram_write_word(0o3772, 0o222);    // arg 1
    state.ram_write_word(0o3770, 0o006402); // mark 2
    state.reg_write_word(Reg::SP, 0o3770);
    state.reg_write_word(Reg::R5, ret);
    // As after "rts r5": pc points at the mark word on the stack.
    state.reg_write_word(Reg::PC, 0o3770);
    emu.run();

    // mark 2: sp = pc + 4 (drops the args), pc = r5, r5 = pop.
    assert_eq!(emu.get_state().reg_read_word(Reg::R5), 0o666);
    assert_eq!(emu.get_state().sp(), 0o4000);
    assert_eq!(emu.get_state().pc(), ret + 2);
}
