use std::path::PathBuf;

use anyhow::{Context, bail};
use busraider_core::prelude::*;
use busraider_machines::registry;
use clap::{Parser, Subcommand};

mod config;
mod session;

use session::Session;

/// Drive a simulated Z80 target through the bus engine.
#[derive(Parser)]
#[command(name = "busraider", version)]
struct Cli {
    /// Config file (default: <config dir>/busraider/busraider.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Target profile, overriding the config file
    #[arg(long)]
    machine: Option<String>,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List target profiles
    Machines,
    /// Write a raw binary into target memory. Missing arguments come from
    /// the config's [program] table.
    Program {
        file: Option<PathBuf>,
        #[arg(long, value_parser = parse_u16)]
        addr: Option<u16>,
        /// Reset the target afterwards so it runs the program
        #[arg(long)]
        exec: bool,
        #[arg(long, value_parser = parse_u16, requires = "exec")]
        pc: Option<u16>,
        #[arg(long, value_parser = parse_u16, requires = "pc")]
        sp: Option<u16>,
    },
    /// Read and dump target memory or IO
    Peek {
        #[arg(value_parser = parse_u16)]
        addr: u16,
        #[arg(value_parser = parse_u16)]
        len: u16,
        #[arg(long)]
        io: bool,
    },
    /// Write bytes into target memory
    Poke {
        #[arg(value_parser = parse_u16)]
        addr: u16,
        #[arg(value_parser = parse_u8, required = true)]
        bytes: Vec<u8>,
    },
    /// Read the processor registers by instruction injection
    Regs,
    Reset,
    Nmi,
    Irq,
    /// Run briefly and print engine and target counters as JSON
    Status,
}

/// Accepts decimal, `0x` or `$` hex.
fn parse_u16(text: &str) -> Result<u16, String> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix('$')) {
        u16::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|e| format!("{text}: {e}"))
}

fn parse_u8(text: &str) -> Result<u8, String> {
    let value = parse_u16(text)?;
    u8::try_from(value).map_err(|_| format!("{text}: not a byte"))
}

fn hex_dump(base: u16, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let addr = base.wrapping_add((row * 16) as u16);
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let text: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        println!("{addr:04x}  {:<47}  {text}", bytes.join(" "));
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Command::Machines = cli.command {
        for profile in registry::all() {
            println!(
                "{:<16} {:>9} Hz  snippet {:04x}  {}",
                profile.name, profile.clock_hz, profile.set_regs_code_addr, profile.description
            );
        }
        return Ok(());
    }

    let config = config::load(cli.config.as_deref())?;
    let machine_name = cli
        .machine
        .or(config.machine)
        .unwrap_or_else(|| "generic".to_string());
    let Some(profile) = registry::find(&machine_name) else {
        let names: Vec<_> = registry::all().iter().map(|p| p.name).collect();
        bail!(
            "unknown machine {machine_name}, available: {}",
            names.join(", ")
        );
    };

    let mut session = Session::new(profile, config.timing)?;

    match cli.command {
        Command::Machines => {}
        Command::Program {
            file,
            addr,
            exec,
            pc,
            sp,
        } => {
            let regs = pc.map(|pc| Z80Registers {
                pc,
                sp: sp.unwrap_or(0xFFFF),
                ..Default::default()
            });
            let job = config
                .program
                .unwrap_or_default()
                .resolve(file, addr, exec, regs)?;
            let data = std::fs::read(&job.file)
                .with_context(|| format!("reading {}", job.file.display()))?;
            session.program(job.addr, &data, job.exec, job.registers)?;
            println!("programmed {} bytes at {:04x}", data.len(), job.addr);
            if job.exec {
                session.run_for(10_000);
                println!("{}", session.registers()?);
            }
        }
        Command::Peek { addr, len, io } => {
            let space = if io { AccessSpace::Io } else { AccessSpace::Memory };
            let data = session.peek(addr, len as usize, space)?;
            hex_dump(addr, &data);
        }
        Command::Poke { addr, bytes } => {
            session.poke(addr, &bytes)?;
            println!("wrote {} bytes at {addr:04x}", bytes.len());
        }
        Command::Regs => {
            session.run_for(1_000);
            println!("{}", session.registers()?);
        }
        Command::Reset => println!("{:?}", session.pulse(ActionKind::Reset)?),
        Command::Nmi => println!("{:?}", session.pulse(ActionKind::Nmi)?),
        Command::Irq => println!("{:?}", session.pulse(ActionKind::Irq)?),
        Command::Status => {
            session.run_for(10_000);
            let status = serde_json::json!({
                "machine": session.profile.name,
                "state": format!("{:?}", session.arbiter.state()),
                "engine": session.arbiter.stats(),
                "target": session.arbiter.bus().stats(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
