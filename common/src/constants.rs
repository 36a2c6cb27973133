// Physical address space (18 bits). RAM fills everything below the I/O page.
pub const RAM_END: u32 = 0o760000; // Exclusive
pub const IO_PAGE_START: u32 = 0o760000;
pub const PHYS_END: u32 = 0o1000000; // Exclusive

// With relocation disabled, the top 8 KiB of the 16-bit space is an
// aperture onto the I/O page.
pub const IO_APERTURE_START: u16 = 0o160000;
pub const IO_APERTURE_OFFSET: u32 = 0o600000;

// Trap vectors.
pub mod vector {
    pub const BUS_ERROR: u16 = 0o4;
    pub const RESERVED_INS: u16 = 0o10;
    pub const BPT: u16 = 0o14;
    pub const IOT: u16 = 0o20;
    pub const POWER_FAIL: u16 = 0o24;
    pub const EMT: u16 = 0o30;
    pub const TRAP: u16 = 0o34;
    pub const TTY_IN: u16 = 0o60;
    pub const TTY_OUT: u16 = 0o64;
    pub const CLOCK: u16 = 0o100;
    pub const RK: u16 = 0o220;
    pub const MMU_ABORT: u16 = 0o250;
}

// Bus-request levels the devices interrupt at.
pub mod priority {
    pub const TTY: u8 = 0o4;
    pub const RK: u8 = 0o5;
    pub const CLOCK: u8 = 0o6;
}

// The RK05 bootstrap loader lives here; entry skips the signature word.
pub const BOOT_ADDR: u32 = 0o2000;
pub const BOOT_ENTRY: u16 = 0o2002;

// Console switch register setting that boots Unix from RK05 unit 0.
pub const SWITCH_BOOT_RK05: u16 = 0o173030;
