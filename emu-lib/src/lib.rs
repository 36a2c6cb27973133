pub mod control;
pub mod emulator;
pub mod emulator_state;
pub mod interrupt;
pub mod io;
pub mod machine;
pub mod mmu;
pub mod snapshot;
pub mod trap;
pub mod unibus;

pub use control::{ControlError, Controller};
pub use emulator::{Emulator, ExecRet};
pub use emulator_state::{EmulatorState, Mode, Status};
pub use interrupt::{Interrupt, InterruptQueue};
pub use io::MMIOHandler;
pub use machine::Machine;
pub use snapshot::SnapshotError;
pub use trap::Trap;
