//! `busraider.toml`: machine choice, timing overrides and defaults for the
//! `program` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use busraider_core::config::TimingConfig;
use busraider_core::cpu::Z80Registers;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "busraider.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub machine: Option<String>,
    pub timing: TimingConfig,
    pub program: Option<ProgramConfig>,
}

/// Defaults for `busraider program`. Command-line arguments win.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    pub file: Option<PathBuf>,
    pub addr: Option<u16>,
    pub exec: bool,
    /// Registers to start with when `exec` is set.
    pub registers: Option<Z80Registers>,
}

/// A fully resolved `program` invocation.
#[derive(Debug, PartialEq)]
pub struct ProgramJob {
    pub file: PathBuf,
    pub addr: u16,
    pub exec: bool,
    pub registers: Option<Z80Registers>,
}

impl ProgramConfig {
    /// Fill in whatever the command line left out. Registers only apply
    /// when the program is executed.
    pub fn resolve(
        &self,
        file: Option<PathBuf>,
        addr: Option<u16>,
        exec: bool,
        registers: Option<Z80Registers>,
    ) -> anyhow::Result<ProgramJob> {
        let Some(file) = file.or_else(|| self.file.clone()) else {
            bail!("no program file given and no [program] file in the config");
        };
        let Some(addr) = addr.or(self.addr) else {
            bail!("no load address given and no [program] addr in the config");
        };
        let exec = exec || self.exec;
        let registers = if exec {
            registers.or(self.registers)
        } else {
            None
        };
        Ok(ProgramJob {
            file,
            addr,
            exec,
            registers,
        })
    }
}

/// `<config dir>/busraider/busraider.toml`, if the platform has one.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("busraider").join(CONFIG_FILE_NAME))
}

pub fn parse(text: &str) -> Result<FrontendConfig, toml::de::Error> {
    toml::from_str(text)
}

/// An explicit path must exist; the default location is optional.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<FrontendConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FrontendConfig::default()),
        },
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = parse(&text).with_context(|| format!("parsing config {}", path.display()))?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert!(config.machine.is_none());
        assert_eq!(config.timing, TimingConfig::default());
        assert!(config.program.is_none());
    }

    #[test]
    fn partial_timing_keeps_other_defaults() {
        let config = parse(
            r#"
            machine = "trs80"

            [timing]
            reset_t_states = 200
            busack_timeout_us = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.machine.as_deref(), Some("trs80"));
        assert_eq!(config.timing.reset_t_states, 200);
        assert_eq!(config.timing.busack_timeout_us, 1000);
        assert_eq!(config.timing.nmi_t_states, 32);
    }

    const PROGRAM_TABLE: &str = r#"
        [program]
        file = "demo.bin"
        addr = 16384
        exec = true

        [program.registers]
        pc = 16384
        sp = 32768
        int_mode = 1
        "#;

    #[test]
    fn program_table() {
        let program = parse(PROGRAM_TABLE).unwrap().program.unwrap();
        assert_eq!(program.file, Some(PathBuf::from("demo.bin")));
        assert_eq!(program.addr, Some(0x4000));
        assert!(program.exec);
        let regs = program.registers.unwrap();
        assert_eq!(regs.pc, 0x4000);
        assert_eq!(regs.sp, 0x8000);
        assert_eq!(regs.int_mode, Some(1));
        assert_eq!(regs.hl, 0);
    }

    #[test]
    fn program_table_fills_missing_arguments() {
        let program = parse(PROGRAM_TABLE).unwrap().program.unwrap();
        let job = program.resolve(None, None, false, None).unwrap();
        assert_eq!(job.file, PathBuf::from("demo.bin"));
        assert_eq!(job.addr, 0x4000);
        assert!(job.exec);
        assert_eq!(job.registers.map(|r| r.sp), Some(0x8000));
    }

    #[test]
    fn command_line_overrides_program_table() {
        let program = parse(PROGRAM_TABLE).unwrap().program.unwrap();
        let regs = Z80Registers {
            pc: 0x5000,
            ..Default::default()
        };
        let job = program
            .resolve(Some(PathBuf::from("other.bin")), Some(0x5000), true, Some(regs))
            .unwrap();
        assert_eq!(job.file, PathBuf::from("other.bin"));
        assert_eq!(job.addr, 0x5000);
        assert_eq!(job.registers, Some(regs));
    }

    #[test]
    fn program_needs_file_and_address() {
        let empty = ProgramConfig::default();
        assert!(empty.resolve(None, Some(0), false, None).is_err());
        assert!(empty.resolve(Some(PathBuf::from("a.bin")), None, false, None).is_err());

        let job = empty
            .resolve(Some(PathBuf::from("a.bin")), Some(0x100), false, None)
            .unwrap();
        assert!(!job.exec);
        assert_eq!(job.registers, None);
    }

    #[test]
    fn unknown_timing_type_is_an_error() {
        assert!(parse("[timing]\nreset_t_states = \"long\"").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/busraider.toml"))).is_err());
    }
}
