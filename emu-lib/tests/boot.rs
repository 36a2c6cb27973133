
use std::sync::Arc;

use common::asm::Reg;
use common::mem::as_byte_slice;
use emu_lib::io::dl11::PipeTerminal;
use emu_lib::machine::Machine;
use emu_lib::ExecRet;

// The bootstrap reads the front of the pack into memory at zero and
// jumps there. Sector 0 of this image holds a two-instruction program.
#[test]
fn bootstrap_loads_sector_zero_and_jumps() {
    let mut machine = Machine::new(Arc::new(PipeTerminal::default()));

    let mut image = vec![0u8; 4096];
    let program: &[u16] = &[
        0o012700, 0o123, // mov #123, r0
        0,               // halt
    ];
    image[..6].copy_from_slice(as_byte_slice(program));
    // A marker word in sector 1, which the two-sector boot read covers.
    image[512] = 0x44;
    image[513] = 0x55;
    machine.load_disk_image(&image).unwrap();

    machine.reset();
    machine.load_boot(2);
    assert_eq!(machine.emulator().get_state().pc(), 0o2002);

    for _ in 0..10_000 {
        if machine.step() == ExecRet::Halt {
            break;
        }
    }
    assert!(machine.emulator().is_halted());

    let state = machine.emulator().get_state();
    // The loaded program ran from address zero.
    assert_eq!(state.reg_read_word(Reg::R0), 0o123);
    assert_eq!(state.pc(), 6);
    // Both sectors arrived in memory.
    assert_eq!(state.ram_read_word(0), 0o012700);
    assert_eq!(state.ram_read_word(512), 0x5544);
}
