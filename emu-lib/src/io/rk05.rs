use std::io::{Read as IoRead, Write as IoWrite};

use common::constants::{priority, vector, RAM_END};
use common::mem::{ReadU16, WriteU16};

use crate::emulator_state::EmulatorState;
use crate::interrupt::{Interrupt, InterruptQueue};
use crate::io::MMIOHandler;
use crate::trap::Trap;

use log::{debug, warn};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskImageError {
    #[error("disk image is {actual} bytes, larger than an RK05 pack ({max})")]
    TooLarge { actual: usize, max: usize },
}

// RK05 moving-head disk: 203 cylinders by 2 surfaces by 12 sectors of 512
// bytes, on a flat little-endian image file.
pub struct Rk05 {
    interrupts: InterruptQueue,
    image: Vec<u8>,

    drive: u16,
    cylinder: u16,
    surface: u16,
    sector: u16,

    ds: u16,
    er: u16,
    cs: u16,
    wc: u16,
    ba: u32, // 18 bits; the top two live in RKCS 5:4
    write_locked: bool,
}

impl Rk05 {
    pub const RKDS: u32 = 0o777400;
    pub const RKER: u32 = 0o777402;
    pub const RKCS: u32 = 0o777404;
    pub const RKWC: u32 = 0o777406;
    pub const RKBA: u32 = 0o777410;
    pub const RKDA: u32 = 0o777412;
    // Maintenance and data-buffer registers exist but do nothing useful.
    pub const RKMR: u32 = 0o777414;
    pub const RKDB: u32 = 0o777416;

    pub const NUM_CYLINDERS: u16 = 0o313;
    pub const NUM_SURFACES: u16 = 2;
    pub const NUM_SECTORS: u16 = 0o14;
    pub const SECTOR_BYTES: usize = 512;
    pub const IMAGE_BYTES: usize = Self::NUM_CYLINDERS as usize
        * Self::NUM_SURFACES as usize
        * Self::NUM_SECTORS as usize
        * Self::SECTOR_BYTES;

    const CS_GO: u16 = 1 << 0;
    const CS_FN_SHIFT: u16 = 1;
    const CS_FN_MASK: u16 = 0o7;
    const CS_IDE: u16 = 1 << 6;
    const CS_RDY: u16 = 1 << 7;
    const CS_HE: u16 = 1 << 14;
    const CS_ERR: u16 = 1 << 15;
    const CS_WRITABLE: u16 = 0o17517;

    const DS_WPS: u16 = 1 << 5;
    const DS_RDY: u16 = 1 << 6;
    const DS_INIT: u16 = (1 << 11) | (1 << 7) | (1 << 6);

    pub const ER_OVR: u16 = 1 << 14;
    pub const ER_NXM: u16 = 1 << 10;
    pub const ER_WLO: u16 = 1 << 12;
    pub const ER_NXD: u16 = 1 << 7;
    pub const ER_NXC: u16 = 1 << 6;
    pub const ER_NXS: u16 = 1 << 5;

    // Function codes, RKCS bits 3:1.
    const FN_CONTROL_RESET: u16 = 0;
    const FN_WRITE: u16 = 1;
    const FN_READ: u16 = 2;
    const FN_WRITE_CHECK: u16 = 3;
    const FN_SEEK: u16 = 4;
    const FN_READ_CHECK: u16 = 5;
    const FN_DRIVE_RESET: u16 = 6;
    const FN_WRITE_LOCK: u16 = 7;

    pub fn new(interrupts: InterruptQueue) -> Self {
        Rk05 {
            interrupts,
            image: vec![0; Self::IMAGE_BYTES],
            drive: 0,
            cylinder: 0,
            surface: 0,
            sector: 0,
            ds: Self::DS_INIT,
            er: 0,
            cs: Self::CS_RDY,
            wc: 0,
            ba: 0,
            write_locked: false,
        }
    }

    // Installs a pack image, zero-padding short files out to the full
    // cartridge size.
    pub fn load_image(&mut self, data: &[u8]) -> Result<(), DiskImageError> {
        if data.len() > Self::IMAGE_BYTES {
            return Err(DiskImageError::TooLarge {
                actual: data.len(),
                max: Self::IMAGE_BYTES,
            });
        }
        self.image.fill(0);
        self.image[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    fn control_reset(&mut self) {
        self.ds = Self::DS_INIT | if self.write_locked { Self::DS_WPS } else { 0 };
        self.er = 0;
        self.cs = Self::CS_RDY;
        self.wc = 0;
        self.ba = 0;
    }

    fn not_ready(&mut self) {
        self.ds &= !Self::DS_RDY;
        self.cs &= !Self::CS_RDY;
    }

    fn ready(&mut self) {
        self.ds |= Self::DS_RDY;
        self.cs |= Self::CS_RDY;
    }

    // Completion: go clear (it is never latched), ready set, interrupt if
    // enabled.
    fn complete(&mut self) {
        self.ready();
        if self.cs & Self::CS_IDE != 0 {
            self.interrupts.post(Interrupt {
                prio: priority::RK,
                vector: vector::RK,
            });
        }
    }

    // Errors complete the operation too; the driver sees the error bits
    // when the interrupt arrives.
    fn error(&mut self, code: u16) {
        self.er |= code;
        self.cs |= Self::CS_ERR | Self::CS_HE;
        warn!("RK05: error {code:#o}, RKER now {:#o}", self.er);
        self.complete();
    }

    fn byte_pos(&self) -> usize {
        ((self.cylinder as usize * Self::NUM_SURFACES as usize + self.surface as usize)
            * Self::NUM_SECTORS as usize
            + self.sector as usize)
            * Self::SECTOR_BYTES
    }

    fn go(&mut self, state: &mut EmulatorState) {
        let func = (self.cs >> Self::CS_FN_SHIFT) & Self::CS_FN_MASK;
        debug!(
            "RK05: go, function {func} at cyl {} surf {} sec {}, wc {:#o}, ba {:#o}",
            self.cylinder, self.surface, self.sector, self.wc, self.ba
        );
        match func {
            Self::FN_CONTROL_RESET => self.control_reset(),
            Self::FN_WRITE => self.transfer(state, true),
            Self::FN_READ => self.transfer(state, false),
            Self::FN_WRITE_CHECK | Self::FN_READ_CHECK => self.complete(),
            Self::FN_SEEK => self.complete(), // position latched by RKDA
            Self::FN_DRIVE_RESET => {
                self.er = 0;
                self.ds = Self::DS_INIT | if self.write_locked { Self::DS_WPS } else { 0 };
                self.complete();
            }
            Self::FN_WRITE_LOCK => {
                self.write_locked = true;
                self.ds |= Self::DS_WPS;
                self.complete();
            }
            _ => unreachable!(),
        }
    }

    // Moves abs(RKWC) words between the pack and memory, advancing the
    // head across sector/surface/cylinder boundaries. RKWC counts up
    // toward zero, RKBA tracks the bus address.
    fn transfer(&mut self, state: &mut EmulatorState, write: bool) {
        self.not_ready();
        if self.drive != 0 {
            return self.error(Self::ER_NXD);
        }
        if write && self.write_locked {
            return self.error(Self::ER_WLO);
        }

        while self.wc != 0 {
            if self.cylinder >= Self::NUM_CYLINDERS {
                return self.error(Self::ER_NXC);
            }
            if self.sector >= Self::NUM_SECTORS {
                return self.error(Self::ER_NXS);
            }

            let mut pos = self.byte_pos();
            for _ in 0..Self::SECTOR_BYTES / 2 {
                if self.wc == 0 {
                    break;
                }
                let ba = self.ba & !1;
                if ba >= RAM_END {
                    return self.error(Self::ER_NXM);
                }
                if write {
                    let val = state.ram_read_word(ba);
                    self.image[pos] = val as u8;
                    self.image[pos + 1] = (val >> 8) as u8;
                } else {
                    let val =
                        (self.image[pos] as u16) | ((self.image[pos + 1] as u16) << 8);
                    state.ram_write_word(ba, val);
                }
                self.ba = (self.ba + 2) & 0o777777;
                self.wc = self.wc.wrapping_add(1);
                pos += 2;
            }

            self.sector += 1;
            if self.sector >= Self::NUM_SECTORS {
                self.sector = 0;
                self.surface += 1;
                if self.surface >= Self::NUM_SURFACES {
                    self.surface = 0;
                    self.cylinder += 1;
                    if self.cylinder >= Self::NUM_CYLINDERS && self.wc != 0 {
                        return self.error(Self::ER_OVR);
                    }
                }
            }
        }

        self.complete();
    }

    fn rkda_read(&self) -> u16 {
        self.sector | (self.surface << 4) | (self.cylinder << 5) | (self.drive << 13)
    }

    fn rkda_write(&mut self, val: u16) {
        self.drive = val >> 13;
        self.cylinder = (val >> 5) & 0o377;
        self.surface = (val >> 4) & 1;
        self.sector = val & 0o17;
    }

    fn rkcs_write(&mut self, state: &mut EmulatorState, val: u16) {
        // Bits 5:4 extend the bus address to 18 bits.
        self.ba = (self.ba & 0xFFFF) | (((val & 0o60) as u32) << 12);
        let val = val & Self::CS_WRITABLE;
        self.cs &= !Self::CS_WRITABLE;
        self.cs |= val & !Self::CS_GO; // go is never latched
        if val & Self::CS_GO != 0 {
            self.go(state);
        }
    }

    pub fn save(&self, w: &mut impl IoWrite) -> std::io::Result<()> {
        w.write_u16(self.drive)?;
        w.write_u16(self.cylinder)?;
        w.write_u16(self.surface)?;
        w.write_u16(self.sector)?;
        w.write_u16(self.ds)?;
        w.write_u16(self.er)?;
        w.write_u16(self.cs)?;
        w.write_u16(self.wc)?;
        w.write_u16(self.ba as u16)?;
        w.write_u16((self.ba >> 16) as u16)?;
        w.write_u16(self.write_locked as u16)?;
        Ok(())
    }

    pub fn restore(&mut self, r: &mut impl IoRead) -> std::io::Result<()> {
        self.drive = r.read_u16()?;
        self.cylinder = r.read_u16()?;
        self.surface = r.read_u16()?;
        self.sector = r.read_u16()?;
        self.ds = r.read_u16()?;
        self.er = r.read_u16()?;
        self.cs = r.read_u16()?;
        self.wc = r.read_u16()?;
        let low = r.read_u16()? as u32;
        let high = r.read_u16()? as u32;
        self.ba = low | (high << 16);
        self.write_locked = r.read_u16()? != 0;
        Ok(())
    }
}

impl MMIOHandler for Rk05 {
    fn reset(&mut self, _state: &mut EmulatorState) {
        self.control_reset();
    }

    fn read_word(&mut self, _state: &mut EmulatorState, addr: u32) -> Result<u16, Trap> {
        let val = match addr {
            Self::RKDS => self.ds,
            Self::RKER => self.er,
            Self::RKCS => self.cs | (((self.ba >> 12) as u16) & 0o60),
            Self::RKWC => self.wc,
            Self::RKBA => self.ba as u16,
            Self::RKDA => self.rkda_read(),
            Self::RKMR | Self::RKDB => 0,
            _ => return Err(Trap::BUS_ERROR),
        };
        Ok(val)
    }

    fn write_word(&mut self, state: &mut EmulatorState, addr: u32, val: u16) -> Result<(), Trap> {
        match addr {
            Self::RKDS | Self::RKER | Self::RKMR | Self::RKDB => (),
            Self::RKCS => self.rkcs_write(state, val),
            Self::RKWC => self.wc = val,
            Self::RKBA => self.ba = (self.ba & 0x30000) | val as u32,
            Self::RKDA => self.rkda_write(val),
            _ => return Err(Trap::BUS_ERROR),
        }
        Ok(())
    }

    fn default_addrs(&self) -> &[u32] {
        &[
            Self::RKDS,
            Self::RKER,
            Self::RKCS,
            Self::RKWC,
            Self::RKBA,
            Self::RKDA,
            Self::RKMR,
            Self::RKDB,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (InterruptQueue, Rk05, EmulatorState) {
        let queue = InterruptQueue::new();
        let rk = Rk05::new(queue.clone());
        let state = EmulatorState::new(queue.clone());
        (queue, rk, state)
    }

    fn start_read(rk: &mut Rk05, state: &mut EmulatorState, da: u16, ba: u16, words: u16) {
        rk.write_word(state, Rk05::RKDA, da).unwrap();
        rk.write_word(state, Rk05::RKBA, ba).unwrap();
        rk.write_word(state, Rk05::RKWC, words.wrapping_neg()).unwrap();
        let cs = (Rk05::FN_READ << 1) | Rk05::CS_GO | Rk05::CS_IDE;
        rk.write_word(state, Rk05::RKCS, cs).unwrap();
    }

    #[test]
    fn read_sector_zero() {
        let (queue, mut rk, mut state) = setup();
        let mut image = vec![0u8; 1024];
        image[0] = 0o15;
        image[1] = 0o1;
        image[512] = 0xaa;
        rk.load_image(&image).unwrap();

        start_read(&mut rk, &mut state, 0, 0o2000, 512);

        assert_eq!(state.ram_read_word(0o2000), 0o415);
        assert_eq!(state.ram_read_word(0o2000 + 512), 0xaa);
        // Completion: ready set, interrupt posted at BR5.
        let cs = rk.read_word(&mut state, Rk05::RKCS).unwrap();
        assert_ne!(cs & Rk05::CS_RDY, 0);
        assert_eq!(cs & Rk05::CS_ERR, 0);
        let int = queue.take_above(0).unwrap();
        assert_eq!(int.vector, vector::RK);
        assert_eq!(int.prio, priority::RK);
        // RKWC counted up to zero, RKBA advanced.
        assert_eq!(rk.read_word(&mut state, Rk05::RKWC).unwrap(), 0);
        assert_eq!(rk.read_word(&mut state, Rk05::RKBA).unwrap(), 0o2000 + 1024);
    }

    #[test]
    fn write_then_read_back() {
        let (_queue, mut rk, mut state) = setup();
        state.ram_write_word(0o1000, 0o123456);

        rk.write_word(&mut state, Rk05::RKDA, 0).unwrap();
        rk.write_word(&mut state, Rk05::RKBA, 0o1000).unwrap();
        rk.write_word(&mut state, Rk05::RKWC, 1u16.wrapping_neg()).unwrap();
        rk.write_word(&mut state, Rk05::RKCS, (Rk05::FN_WRITE << 1) | Rk05::CS_GO)
            .unwrap();

        assert_eq!(rk.image()[0], 0o56);
        assert_eq!(rk.image()[1], 0o247);
    }

    #[test]
    fn geometry_error_still_interrupts() {
        let (queue, mut rk, mut state) = setup();
        // Cylinder 0o377 is off the end of the pack.
        start_read(&mut rk, &mut state, 0o377 << 5, 0, 512);
        let cs = rk.read_word(&mut state, Rk05::RKCS).unwrap();
        assert_ne!(cs & Rk05::CS_ERR, 0);
        let er = rk.read_word(&mut state, Rk05::RKER).unwrap();
        assert_ne!(er & Rk05::ER_NXC, 0);
        assert!(queue.take_above(0).is_some());
    }

    #[test]
    fn crosses_track_boundary() {
        let (_queue, mut rk, mut state) = setup();
        let mut image = vec![0u8; Rk05::SECTOR_BYTES * 13];
        // Last word of sector 11 (end of surface 0) and first of the next
        // surface.
        image[Rk05::SECTOR_BYTES * 12 - 2] = 0x34;
        image[Rk05::SECTOR_BYTES * 12 - 1] = 0x12;
        image[Rk05::SECTOR_BYTES * 12] = 0x78;
        rk.load_image(&image).unwrap();

        // Read two sectors starting at the last sector of surface 0.
        start_read(&mut rk, &mut state, 0o13, 0, 512);
        assert_eq!(state.ram_read_word(510), 0x1234);
        assert_eq!(state.ram_read_word(512), 0x78);
        let da = rk.read_word(&mut state, Rk05::RKDA).unwrap();
        // Head now at cylinder 0, surface 1, sector 1.
        assert_eq!(da, (1 << 4) | 1);
    }

    #[test]
    fn image_too_large() {
        let (_queue, mut rk, _state) = setup();
        let image = vec![0u8; Rk05::IMAGE_BYTES + 1];
        assert!(rk.load_image(&image).is_err());
    }
}
