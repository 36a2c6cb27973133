use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::emulator::ExecRet;
use crate::io::dl11::{Dl11, Terminal};
use crate::io::kw11::ClockTicker;
use crate::io::rk05::DiskImageError;
use crate::machine::Machine;
use crate::snapshot::SnapshotError;

use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("operation requires a stopped CPU")]
    Running,
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Disk(#[from] DiskImageError),
}

// Instructions executed per machine-lock acquisition. Short enough that
// the host never waits long for the lock, long enough that locking is
// noise.
const RUN_SLICE: usize = 1024;

// How long to doze between pending-interrupt checks in WAIT. The clock
// interrupt arrives every 16.7 ms, so this never busy-spins the host.
const WAIT_DOZE: Duration = Duration::from_micros(300);

const CLOCK_PERIOD: Duration = Duration::from_micros(16_667);

// The host control surface. Owns the machine behind a mutex, the CPU
// thread that runs it, and the thread that strikes the line clock at
// 60 Hz of wall time.
pub struct Controller {
    machine: Arc<Mutex<Machine>>,
    dl11: Arc<Mutex<Dl11>>,
    ticker: Arc<ClockTicker>,
    stop: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    cpu_thread: Option<JoinHandle<()>>,
    clock_thread: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(terminal: Arc<dyn Terminal>) -> Controller {
        let machine = Machine::new(terminal);
        let dl11 = machine.dl11();
        let ticker = machine.ticker();
        Controller {
            machine: Arc::new(Mutex::new(machine)),
            dl11,
            ticker,
            stop: Arc::new(AtomicBool::new(false)),
            halted: Arc::new(AtomicBool::new(false)),
            cpu_thread: None,
            clock_thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cpu_thread.is_some()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    // Starts the CPU and clock threads. A no-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.stop.store(false, Ordering::Release);
        self.halted.store(false, Ordering::Release);

        let machine = self.machine.clone();
        let stop = self.stop.clone();
        let halted = self.halted.clone();
        self.cpu_thread = Some(std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                let mut ret = ExecRet::Ok;
                {
                    let mut machine = machine.lock().unwrap();
                    for _ in 0..RUN_SLICE {
                        ret = machine.step();
                        if ret != ExecRet::Ok {
                            break;
                        }
                    }
                }
                match ret {
                    ExecRet::Ok => (),
                    // The stop flag is re-checked on each doze wakeup.
                    ExecRet::Wait => std::thread::sleep(WAIT_DOZE),
                    ExecRet::Halt => {
                        info!("CPU halted");
                        halted.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        }));

        let stop = self.stop.clone();
        let ticker = self.ticker.clone();
        self.clock_thread = Some(std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(CLOCK_PERIOD);
                ticker.strike();
            }
        }));
    }

    // Stops the CPU at the next instruction boundary and joins both
    // threads.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.cpu_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.clock_thread.take() {
            let _ = thread.join();
        }
    }

    pub fn reset(&mut self) -> Result<(), ControlError> {
        let mut machine = self.stopped_machine()?;
        machine.reset();
        drop(machine);
        self.halted.store(false, Ordering::Release);
        Ok(())
    }

    pub fn step(&mut self) -> Result<ExecRet, ControlError> {
        let mut machine = self.stopped_machine()?;
        Ok(machine.step())
    }

    pub fn load_boot(&mut self, sectors: u16) -> Result<(), ControlError> {
        let mut machine = self.stopped_machine()?;
        machine.load_boot(sectors);
        drop(machine);
        self.halted.store(false, Ordering::Release);
        Ok(())
    }

    pub fn load_disk_image(&mut self, data: &[u8]) -> Result<(), ControlError> {
        let mut machine = self.stopped_machine()?;
        machine.load_disk_image(data)?;
        Ok(())
    }

    pub fn save_snapshot(&mut self) -> Result<Vec<u8>, ControlError> {
        let machine = self.stopped_machine()?;
        Ok(machine.save_snapshot())
    }

    pub fn load_snapshot(&mut self, data: &[u8]) -> Result<(), ControlError> {
        let mut machine = self.stopped_machine()?;
        machine.load_snapshot(data)?;
        drop(machine);
        self.halted.store(false, Ordering::Release);
        Ok(())
    }

    // Keystrokes only touch the console device and the interrupt queue,
    // so they are fine while the CPU runs.
    pub fn post_key(&self, byte: u8) {
        self.dl11.lock().unwrap().push_key(byte);
    }

    pub fn machine(&self) -> Arc<Mutex<Machine>> {
        self.machine.clone()
    }

    fn stopped_machine(&self) -> Result<std::sync::MutexGuard<'_, Machine>, ControlError> {
        if self.is_running() {
            return Err(ControlError::Running);
        }
        Ok(self.machine.lock().unwrap())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}
