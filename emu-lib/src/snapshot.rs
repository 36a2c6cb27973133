use std::io::Cursor;

use common::mem::{ReadU16, WriteU16};

use crate::machine::Machine;

use thiserror::Error;

// Save-state stream: everything needed to resume a stopped machine except
// the disk pack, which belongs to the image file on the host side.
const MAGIC: &[u8; 8] = b"PDP11SAV";
const VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("not a save-state file")]
    BadMagic,
    #[error("unsupported save-state version {0}")]
    BadVersion(u16),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Machine {
    // The CPU must be stopped; the Controller enforces that.
    pub fn save_snapshot(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.write_u16(VERSION).unwrap();
        self.emulator().save(&mut out).unwrap();
        self.interrupts().save(&mut out).unwrap();
        self.rk05().lock().unwrap().save(&mut out).unwrap();
        self.dl11().lock().unwrap().save(&mut out).unwrap();
        let lks = self.kw11().lock().unwrap().lks();
        out.write_u16(lks).unwrap();
        out
    }

    pub fn load_snapshot(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mut r = Cursor::new(data);

        let mut magic = [0u8; 8];
        std::io::Read::read_exact(&mut r, &mut magic)?;
        if &magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(SnapshotError::BadVersion(version));
        }

        self.emulator_mut().restore(&mut r)?;
        self.interrupts().restore(&mut r)?;
        self.rk05().lock().unwrap().restore(&mut r)?;
        self.dl11().lock().unwrap().restore(&mut r)?;
        let lks = r.read_u16()?;
        self.kw11().lock().unwrap().set_lks(lks);
        Ok(())
    }
}
