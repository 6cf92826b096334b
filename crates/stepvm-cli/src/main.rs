#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use stepvm::{programs, RunReport, StopReason, Vm, VmConfig, Width};

#[derive(Debug, Parser)]
#[command(name = "stepvm", about = "Step debugger for raw x86-64 machine code images")]
struct Args {
    /// Raw machine code, loaded as `.main` at address 0.
    #[arg(required_unless_present = "demo", conflicts_with = "demo")]
    image: Option<PathBuf>,

    /// Use the bundled Fibonacci program instead of an image file.
    #[arg(long)]
    demo: bool,

    /// JSON `VmConfig`; omitted fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Breakpoint address (decimal or `0x` hex). May be repeated.
    #[arg(long = "break", value_name = "ADDR", value_parser = parse_address)]
    breakpoints: Vec<u64>,

    /// Execute at most N single steps.
    #[arg(long, value_name = "N", conflicts_with = "run")]
    step: Option<u64>,

    /// Run until a breakpoint, `HLT`, the end of the program or the configured limit.
    #[arg(long)]
    run: bool,

    /// Register width to print.
    #[arg(long, default_value = "64", value_parser = parse_width)]
    width: Width,

    /// Print a listing of the whole program.
    #[arg(long)]
    disassemble: bool,

    /// Print every non-zero memory byte.
    #[arg(long)]
    dump_memory: bool,

    /// Print machine state as one JSON object.
    #[arg(long)]
    json: bool,
}

fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid address {s:?}: {err}"))
}

fn parse_width(s: &str) -> Result<Width, String> {
    let bits: u32 = s.parse().map_err(|_| format!("invalid width {s:?}"))?;
    Width::from_bits(bits).map_err(|err| err.to_string())
}

fn load_config(path: Option<&Path>) -> Result<VmConfig> {
    let Some(path) = path else {
        return Ok(VmConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn load_image(args: &Args) -> Result<Vec<u8>> {
    match &args.image {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
        }
        None => Ok(programs::FIBONACCI.to_vec()),
    }
}

fn execute(vm: &Vm, args: &Args) -> Result<Option<RunReport>> {
    if args.run {
        return Ok(Some(vm.run_blocking(false)?));
    }
    let Some(steps) = args.step else {
        return Ok(None);
    };
    let mut last = None;
    for _ in 0..steps {
        let report = vm.run_blocking(true)?;
        let stepped = report.stop == StopReason::Stepped;
        last = Some(report);
        if !stepped {
            break;
        }
    }
    Ok(last)
}

fn print_text(vm: &Vm, args: &Args, report: Option<&RunReport>) -> Result<()> {
    if let Some(report) = report {
        println!(
            "stop: {:?} (executed {}, ip {:#x})",
            report.stop, report.executed, report.ip
        );
        if let Some(text) = &report.last_disassembled {
            println!("last: {text}");
        }
    }
    for (name, value) in vm.registers(args.width) {
        println!("{name:<5} {value:#018x}");
    }
    let flags: Vec<String> = vm
        .flags()
        .into_iter()
        .map(|(name, set)| format!("{name}={}", u8::from(set)))
        .collect();
    println!("flags: {}", flags.join(" "));

    if args.dump_memory {
        for (addr, byte) in vm.memory() {
            println!("{addr:#018x}: {byte:#04x}");
        }
    }
    if args.disassemble {
        for item in vm.disassemble_all()? {
            println!("{item}");
        }
    }
    Ok(())
}

fn print_json(vm: &Vm, args: &Args, report: Option<&RunReport>) -> Result<()> {
    let registers: serde_json::Map<String, serde_json::Value> = vm
        .registers(args.width)
        .into_iter()
        .map(|(name, value)| (name.to_owned(), json!(value)))
        .collect();
    let flags: serde_json::Map<String, serde_json::Value> = vm
        .flags()
        .into_iter()
        .map(|(name, set)| (name.to_owned(), json!(set)))
        .collect();
    let mut out = json!({
        "report": report,
        "registers": registers,
        "flags": flags,
        "breakpoints": vm.breakpoints(),
    });
    if args.dump_memory {
        let memory: serde_json::Map<String, serde_json::Value> = vm
            .memory()
            .into_iter()
            .map(|(addr, byte)| (format!("{addr:#x}"), json!(byte)))
            .collect();
        out["memory"] = memory.into();
    }
    if args.disassemble {
        let listing: Vec<_> = vm
            .disassemble_all()?
            .into_iter()
            .map(|item| {
                json!({
                    "address": item.address,
                    "text": item.text,
                    "current": item.current,
                })
            })
            .collect();
        out["listing"] = listing.into();
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let image = load_image(&args)?;
    if image.is_empty() {
        bail!("image is empty");
    }

    let vm = Vm::with_config(&image, config)?;
    for &addr in &args.breakpoints {
        if !vm.add_breakpoint(addr) {
            tracing::warn!("duplicate breakpoint {addr:#x}");
        }
    }

    let report = execute(&vm, &args)?;
    if args.json {
        print_json(&vm, &args, report.as_ref())
    } else {
        print_text(&vm, &args, report.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_accept_hex_and_decimal() {
        assert_eq!(parse_address("0x27"), Ok(39));
        assert_eq!(parse_address("39"), Ok(39));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn width_must_be_a_register_width() {
        assert_eq!(parse_width("32"), Ok(Width::Dword));
        assert!(parse_width("12").is_err());
    }

    #[test]
    fn step_and_run_conflict() {
        assert!(Args::try_parse_from(["stepvm", "a.bin", "--step", "2", "--run"]).is_err());
        assert!(Args::try_parse_from(["stepvm"]).is_err());
        let args = Args::try_parse_from(["stepvm", "--demo", "--break", "0x27", "--break", "58"])
            .unwrap();
        assert_eq!(args.breakpoints, vec![39, 58]);
        assert_eq!(args.width, Width::Qword);
    }
}
