
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use emu_lib::io::dl11::StdioTerminal;
use emu_lib::machine::DEFAULT_BOOT_SECTORS;
use emu_lib::Controller;

use clap::Parser;
use log::info;

/// PDP-11/40 emulator that boots Unix V6 from an RK05 disk image.
#[derive(Parser)]
struct Args {
    /// RK05 disk image (up to 2.5 MB, sector 0 holds the boot block)
    image: PathBuf,

    /// Number of 256-word sectors the bootstrap reads
    #[arg(long, default_value_t = DEFAULT_BOOT_SECTORS)]
    boot_sectors: u16,
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    let image = std::fs::read(&args.image)
        .unwrap_or_else(|err| panic!("can't read {}: {err}", args.image.display()));

    let terminal = Arc::new(StdioTerminal::new());
    let mut controller = Controller::new(terminal);
    controller.load_disk_image(&image).unwrap();
    controller.reset().unwrap();
    controller.load_boot(args.boot_sectors).unwrap();

    info!("Booting from {}", args.image.display());
    controller.start();

    while !controller.is_halted() {
        std::thread::sleep(Duration::from_millis(50));
    }
    controller.stop();
}
