use std::collections::VecDeque;
use std::io::{stdout, Read as IoRead, Write as IoWrite};
use std::sync::{Arc, Mutex};

use common::constants::{priority, vector};
use common::mem::{ReadU16, ToU16P, WriteU16};

use crate::emulator_state::EmulatorState;
use crate::interrupt::{Interrupt, InterruptQueue};
use crate::io::MMIOHandler;
use crate::trap::Trap;

use log::{error, warn};

// The external terminal the console talks to: a plain byte sink/source.
// Key remapping (Backspace to DEL and the like) happens on this side of
// the boundary, never in the device.
pub trait Terminal: Send + Sync {
    fn write_byte(&self, val: u8);
    fn try_read_key(&self) -> Option<u8>;
}

////////////////////////////////////////////////////////////////////////////////

// In-memory terminal for tests and embedding hosts.
#[derive(Default)]
pub struct PipeTerminal {
    out_buf: Mutex<VecDeque<u8>>,
    key_buf: Mutex<VecDeque<u8>>,
}

impl PipeTerminal {
    pub fn take_output(&self) -> VecDeque<u8> {
        std::mem::take(&mut self.out_buf.lock().unwrap())
    }

    pub fn output_string(&self) -> String {
        let buf = self.take_output();
        buf.iter().map(|b| *b as char).collect()
    }

    pub fn is_out_empty(&self) -> bool {
        self.out_buf.lock().unwrap().is_empty()
    }

    pub fn push_key(&self, val: u8) {
        self.key_buf.lock().unwrap().push_back(val);
    }

    pub fn type_bytes(&self, vals: &[u8]) {
        for val in vals.iter() {
            self.push_key(*val);
        }
    }
}

impl Terminal for PipeTerminal {
    fn write_byte(&self, val: u8) {
        self.out_buf.lock().unwrap().push_back(val);
    }

    fn try_read_key(&self) -> Option<u8> {
        self.key_buf.lock().unwrap().pop_front()
    }
}

////////////////////////////////////////////////////////////////////////////////

// Terminal on the host's stdio. A reader thread feeds keystrokes into a
// queue; Backspace is remapped to DEL, the V6 interrupt key.
pub struct StdioTerminal {
    keys: Arc<Mutex<VecDeque<u8>>>,
}

impl StdioTerminal {
    pub fn new() -> Self {
        let keys: Arc<Mutex<VecDeque<u8>>> = Default::default();
        let reader = keys.clone();
        std::thread::spawn(move || {
            for byte in std::io::stdin().bytes() {
                let Ok(mut byte) = byte else {
                    return;
                };
                if byte == 0x08 {
                    byte = 0x7f;
                }
                reader.lock().unwrap().push_back(byte);
            }
        });
        StdioTerminal { keys }
    }
}

impl Default for StdioTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal for StdioTerminal {
    fn write_byte(&self, val: u8) {
        let mut out = stdout().lock();
        let _ = out.write_all(&[val]);
        let _ = out.flush();
    }

    fn try_read_key(&self) -> Option<u8> {
        self.keys.lock().unwrap().pop_front()
    }
}

////////////////////////////////////////////////////////////////////////////////

// DL11 console interface: keyboard receiver and printer transmitter, each
// with its own status/buffer register pair.
pub struct Dl11 {
    interrupts: InterruptQueue,
    terminal: Arc<dyn Terminal>,

    rx_interrupt_enable: bool,
    key_buf: VecDeque<u8>,

    tx_interrupt_enable: bool,
}

impl Dl11 {
    // Receiver status and buffer.
    pub const RCSR: u32 = 0o777560;
    pub const RBUF: u32 = 0o777562;

    // Transmitter status and buffer.
    pub const XCSR: u32 = 0o777564;
    pub const XBUF: u32 = 0o777566;

    const INT_ENB_SHIFT: u16 = 6;
    const INT_ENB_MASK: u16 = 0x1 << Self::INT_ENB_SHIFT;
    const DONE_SHIFT: u16 = 7;
    const READY_SHIFT: u16 = 7;

    const KEY_BUF_CAP: usize = 256;

    pub fn new(interrupts: InterruptQueue, terminal: Arc<dyn Terminal>) -> Self {
        Dl11 {
            interrupts,
            terminal,
            rx_interrupt_enable: false,
            key_buf: VecDeque::new(),
            tx_interrupt_enable: false,
        }
    }

    fn done(&self) -> bool {
        !self.key_buf.is_empty()
    }

    // Queue one keystroke, from the terminal poll or directly from the
    // host control surface.
    pub fn push_key(&mut self, val: u8) {
        if self.key_buf.len() >= Self::KEY_BUF_CAP {
            warn!("DL11: keyboard buffer full, dropping {val:#o}");
            return;
        }
        self.key_buf.push_back(val);
        self.post_rx_interrupt();
    }

    fn post_rx_interrupt(&self) {
        if self.done() && self.rx_interrupt_enable {
            self.interrupts.post(Interrupt {
                prio: priority::TTY,
                vector: vector::TTY_IN,
            });
        }
    }

    fn rcsr_read(&self) -> u16 {
        ((self.done() as u16) << Self::DONE_SHIFT)
            | ((self.rx_interrupt_enable as u16) << Self::INT_ENB_SHIFT)
    }

    fn rcsr_write(&mut self, val: u16) {
        self.rx_interrupt_enable = (val & Self::INT_ENB_MASK) != 0;
    }

    // Pops the next keystroke and clears done; re-raises if more are
    // queued.
    fn rbuf_read(&mut self) -> u16 {
        let Some(val) = self.key_buf.pop_front() else {
            error!("DL11: read of RBUF with no character available");
            return 0;
        };
        self.post_rx_interrupt();
        val as u16
    }

    fn xcsr_read(&self) -> u16 {
        // Ready is always set; output never blocks the processor.
        (1 << Self::READY_SHIFT) | ((self.tx_interrupt_enable as u16) << Self::INT_ENB_SHIFT)
    }

    fn xcsr_write(&mut self, val: u16) {
        self.tx_interrupt_enable = (val & Self::INT_ENB_MASK) != 0;
    }

    fn xbuf_write(&mut self, val: u16) {
        self.terminal.write_byte(val as u8);
        // Completion is immediate, so the interrupt follows the write
        // directly.
        if self.tx_interrupt_enable {
            self.interrupts.post(Interrupt {
                prio: priority::TTY,
                vector: vector::TTY_OUT,
            });
        }
    }

    pub fn save(&self, w: &mut impl IoWrite) -> std::io::Result<()> {
        w.write_u16(self.rx_interrupt_enable as u16)?;
        w.write_u16(self.tx_interrupt_enable as u16)?;
        w.write_u16(self.key_buf.len().to_u16p())?;
        for byte in self.key_buf.iter() {
            w.write_all(&[*byte])?;
        }
        Ok(())
    }

    pub fn restore(&mut self, r: &mut impl IoRead) -> std::io::Result<()> {
        self.rx_interrupt_enable = r.read_u16()? != 0;
        self.tx_interrupt_enable = r.read_u16()? != 0;
        let len = r.read_u16()? as usize;
        self.key_buf.clear();
        for _ in 0..len {
            let mut byte = [0u8; 1];
            r.read_exact(&mut byte)?;
            self.key_buf.push_back(byte[0]);
        }
        Ok(())
    }
}

impl MMIOHandler for Dl11 {
    fn reset(&mut self, _state: &mut EmulatorState) {
        self.rx_interrupt_enable = false;
        self.tx_interrupt_enable = false;
        self.key_buf.clear();
    }

    fn tick(&mut self, _state: &mut EmulatorState) {
        while self.key_buf.len() < Self::KEY_BUF_CAP {
            let Some(val) = self.terminal.try_read_key() else {
                break;
            };
            self.key_buf.push_back(val);
        }
        self.post_rx_interrupt();
    }

    fn read_word(&mut self, _state: &mut EmulatorState, addr: u32) -> Result<u16, Trap> {
        match addr {
            Self::RCSR => Ok(self.rcsr_read()),
            Self::RBUF => Ok(self.rbuf_read()),
            Self::XCSR => Ok(self.xcsr_read()),
            Self::XBUF => Ok(0),
            _ => Err(Trap::BUS_ERROR),
        }
    }

    fn write_word(&mut self, _state: &mut EmulatorState, addr: u32, val: u16) -> Result<(), Trap> {
        match addr {
            Self::RCSR => self.rcsr_write(val),
            Self::RBUF => (),
            Self::XCSR => self.xcsr_write(val),
            Self::XBUF => self.xbuf_write(val),
            _ => return Err(Trap::BUS_ERROR),
        }
        Ok(())
    }

    fn default_addrs(&self) -> &[u32] {
        &[Self::RCSR, Self::RBUF, Self::XCSR, Self::XBUF]
    }
}
