
use std::sync::Arc;

use common::asm::Reg;
use common::constants::vector;
use common::mem::as_byte_slice;
use emu_lib::io::dl11::PipeTerminal;
use emu_lib::machine::Machine;
use emu_lib::ExecRet;

const CODE_START: u32 = 0o1000;
const HANDLER: u16 = 0o2000;

fn machine_with_program(program: &[u16]) -> (Machine, Arc<PipeTerminal>) {
    let terminal = Arc::new(PipeTerminal::default());
    let mut machine = Machine::new(terminal.clone());
    let emu = machine.emulator_mut();
    emu.load_image(as_byte_slice(program), CODE_START);
    emu.get_state_mut().reg_write_word(Reg::SP, 0o1000);
    emu.get_state_mut().reg_write_word(Reg::PC, CODE_START as u16);
    (machine, terminal)
}

fn set_vector(machine: &mut Machine, vec: u16, handler: u16, psw: u16) {
    let state = machine.emulator_mut().get_state_mut();
    state.ram_write_word(vec as u32, handler);
    state.ram_write_word(vec as u32 + 2, psw);
}

fn run_to_halt(machine: &mut Machine) {
    for _ in 0..10_000 {
        if machine.step() == ExecRet::Halt {
            return;
        }
    }
    panic!("program never halted");
}

// WAIT with the line clock enabled: the CPU idles until the 60 Hz strike
// lands, then services vector 100.
#[test]
fn wait_wakes_on_clock_interrupt() {
    let (mut machine, _terminal) = machine_with_program(&[
        0o012737, 0o100, 0o177546, // mov #100, @#177546 (enable clock ints)
        0o000001,                  // wait
        0o000000,                  // halt (only after the handler returns)
    ]);
    set_vector(&mut machine, vector::CLOCK, HANDLER, 0o340);
    let state = machine.emulator_mut().get_state_mut();
    state.ram_write_word(HANDLER as u32, 0o012700); // mov #7, r0
    state.ram_write_word(HANDLER as u32 + 2, 7);
    state.ram_write_word(HANDLER as u32 + 4, 0); // halt

    assert_eq!(machine.step(), ExecRet::Ok); // the mov
    assert_eq!(machine.step(), ExecRet::Wait);
    assert_eq!(machine.step(), ExecRet::Wait); // still nothing pending

    machine.ticker().strike();
    // The same boundary that takes the interrupt executes the handler's
    // first instruction.
    assert_eq!(machine.step(), ExecRet::Ok);
    assert!(!machine.emulator().is_waiting());
    assert_eq!(machine.emulator().get_state().reg_read_word(Reg::R0), 7);
    run_to_halt(&mut machine);
    assert_eq!(machine.emulator().get_state().pc(), HANDLER + 6);
}

#[test]
fn keyboard_interrupt_delivers_byte() {
    let (mut machine, _terminal) = machine_with_program(&[
        0o012737, 0o100, 0o177560, // mov #100, @#177560 (rx interrupt enable)
        0o000001,                  // wait
        0o000000,
    ]);
    set_vector(&mut machine, vector::TTY_IN, HANDLER, 0o340);
    let state = machine.emulator_mut().get_state_mut();
    state.ram_write_word(HANDLER as u32, 0o013700); // mov @#177562, r0
    state.ram_write_word(HANDLER as u32 + 2, 0o177562);
    state.ram_write_word(HANDLER as u32 + 4, 0); // halt

    assert_eq!(machine.step(), ExecRet::Ok);
    assert_eq!(machine.step(), ExecRet::Wait);

    machine.post_key(b'g');
    assert_eq!(machine.step(), ExecRet::Ok); // interrupt taken
    run_to_halt(&mut machine);
    assert_eq!(machine.emulator().get_state().reg_read_word(Reg::R0), b'g' as u16);
}

#[test]
fn keyboard_polling_without_interrupts() {
    let (mut machine, terminal) = machine_with_program(&[
        0o105737, 0o177560, // 1000: tstb @#177560 (done bit in the sign)
        0o100375,           // 1004: bpl 1000
        0o013700, 0o177562, // 1006: mov @#177562, r0
        0,                  // 1012: halt
    ]);
    terminal.push_key(b'z');
    run_to_halt(&mut machine);
    assert_eq!(machine.emulator().get_state().reg_read_word(Reg::R0), b'z' as u16);
}

#[test]
fn printer_output_reaches_terminal() {
    let (mut machine, terminal) = machine_with_program(&[
        0o012737, b'h' as u16, 0o177566, // mov #'h, @#177566
        0o012737, b'i' as u16, 0o177566, // mov #'i, @#177566
        0,
    ]);
    run_to_halt(&mut machine);
    assert_eq!(terminal.output_string(), "hi");
}

#[test]
fn printer_interrupt_after_write() {
    let (mut machine, terminal) = machine_with_program(&[
        0o012737, 0o100, 0o177564,       // mov #100, @#177564 (tx int enable)
        0o012737, b'x' as u16, 0o177566, // mov #'x, @#177566
        0o000240,                        // nop: boundary where the int lands
        0o000000,                        // halt (never reached)
    ]);
    set_vector(&mut machine, vector::TTY_OUT, HANDLER, 0o340);
    machine
        .emulator_mut()
        .get_state_mut()
        .ram_write_word(HANDLER as u32, 0); // halt in handler

    run_to_halt(&mut machine);
    assert_eq!(terminal.output_string(), "x");
    assert_eq!(machine.emulator().get_state().pc(), HANDLER + 2);
}

#[test]
fn clock_monitor_bit_visible_to_guest() {
    let (mut machine, _terminal) = machine_with_program(&[
        0o013700, 0o177546, // mov @#177546, r0
        0,
    ]);
    machine.ticker().strike();
    run_to_halt(&mut machine);
    // Monitor bit (bit 7) set, interrupts disabled.
    assert_eq!(machine.emulator().get_state().reg_read_word(Reg::R0), 0o200);
}
