//! Command line driver: load a ROM, run the console headless for a
//! number of frames, optionally dump chip state.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use quarknes_core::{EmuError, NesConsole};

#[derive(Parser, Debug)]
#[command(name = "quarknes")]
#[command(about = "A cycle-timed NES emulator", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value = "60")]
    frames: u64,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error {}: {err}", err.code());
            // Domain codes exceed the 8-bit exit range; truncate but
            // keep the full code in the message.
            ExitCode::from((err.code() & 0xFF) as u8)
        }
    }
}

fn run(args: &Args) -> Result<(), EmuError> {
    let mut console = NesConsole::new()?;
    console.insert_cartridge(&args.rom)?;
    console.reset();

    log::info!("running {} frames", args.frames);
    console.run_frames(args.frames)?;
    println!("completed {} frames", console.frame_count());

    if args.dump_cpu {
        dump_cpu_state(&console);
    }
    if args.dump_ppu {
        dump_ppu_state(&console);
    }

    Ok(())
}

fn dump_cpu_state(console: &NesConsole) {
    let Some(cpu) = console.cpu() else {
        return;
    };

    println!("\nCPU state:");
    println!("  A:  ${:02X}", cpu.regs.a);
    println!("  X:  ${:02X}", cpu.regs.x);
    println!("  Y:  ${:02X}", cpu.regs.y);
    println!("  PC: ${:04X}", cpu.regs.pc);
    println!("  S:  ${:02X}", cpu.regs.s);
    println!("  P:  ${:02X}", cpu.regs.p.bits());
    println!("  Cycles: {}", cpu.cycle_count());
}

fn dump_ppu_state(console: &NesConsole) {
    let Some(ppu) = console.ppu() else {
        return;
    };

    println!("\nPPU state:");
    println!("  Scanline: {}", ppu.scanline());
    println!("  Dot:      {}", ppu.dot());
    println!("  Status:   {:?}", ppu.status());
    println!("  Frames:   {}", ppu.frame_count());
}
