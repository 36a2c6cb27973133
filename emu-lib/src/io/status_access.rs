
use crate::emulator_state::EmulatorState;
use crate::io::MMIOHandler;
use crate::trap::Trap;

// Access to the processor status word and the console switch register
// through the I/O page.
#[derive(Default, Clone, Copy)]
pub struct StatusAccess();

impl StatusAccess {
    pub const PSW: u32 = 0o777776;
    pub const SWITCHES: u32 = 0o777570;
}

impl MMIOHandler for StatusAccess {
    fn read_word(&mut self, state: &mut EmulatorState, addr: u32) -> Result<u16, Trap> {
        match addr {
            Self::PSW => Ok(state.get_status().to_raw()),
            Self::SWITCHES => Ok(state.switch_register()),
            _ => Err(Trap::BUS_ERROR),
        }
    }

    fn write_word(&mut self, state: &mut EmulatorState, addr: u32, val: u16) -> Result<(), Trap> {
        match addr {
            // Mode field changes bank the stack pointers.
            Self::PSW => state.write_psw(val),
            // Writes drive the console display lights.
            Self::SWITCHES => state.set_display_register(val),
            _ => return Err(Trap::BUS_ERROR),
        }
        Ok(())
    }

    fn default_addrs(&self) -> &[u32] {
        &[Self::PSW, Self::SWITCHES]
    }
}
