//! TEEM command-line launcher and REPL.
//!
//! `teem <program.s>` assembles and loads a guest program, then enters the
//! debugger REPL: `step`, `continue`, `break`, `print`, `show`, `quit`.
//! `--run` executes to completion instead. The process exit code mirrors
//! the guest's `exit` status.

use std::fs;
use std::io::{BufRead, Write as _};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use teem_core::Config;
use teem_core::common::Reg;
use teem_core::pipeline::RunState;
use teem_core::sim::{EmuIo, Emulator};

#[derive(Parser, Debug)]
#[command(
    name = "teem",
    author,
    version,
    about = "Transient-execution educational emulator",
    long_about = "Run an assembly program on a speculative out-of-order RISC-V core.\n\n\
        By default the program is loaded and the debugger REPL starts.\n\
        Use --run to execute to completion.\n\n\
        Examples:\n  teem demos/hello.s --run\n  teem demos/spectre_btb.s\n  \
        teem guest.s --config config.yml --trace-json trace.jsonl --run"
)]
struct Cli {
    /// Assembly program to load.
    program: PathBuf,

    /// YAML configuration file (defaults are used when absent).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Execute to completion instead of entering the REPL.
    #[arg(long)]
    run: bool,

    /// Append one JSON engine snapshot per cycle to this file.
    #[arg(long)]
    trace_json: Option<PathBuf>,

    /// Print run statistics on exit.
    #[arg(long)]
    stats: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TEEM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
    .unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(2);
    });

    let source = fs::read_to_string(&cli.program).unwrap_or_else(|e| {
        eprintln!("error: reading {}: {e}", cli.program.display());
        process::exit(2);
    });

    let mut emu = Emulator::from_source(&source, &config, EmuIo::stdio()).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(2);
    });

    let mut tracer = cli.trace_json.as_ref().map(|path| {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap_or_else(|e| {
                eprintln!("error: opening {}: {e}", path.display());
                process::exit(2);
            })
    });

    println!(
        "teem: {} ({} instructions, entry {:#x})",
        cli.program.display(),
        emu.program().ops.len(),
        emu.program().entry
    );

    let state = if cli.run {
        run_to_end(&mut emu, &mut tracer)
    } else {
        repl(&mut emu, &mut tracer)
    };

    if cli.stats {
        emu.stats().print();
    }

    match state {
        RunState::Exited(code) => process::exit(code & 0xFF),
        RunState::Faulted(fault) => {
            eprintln!("fault: {fault} (pc {:#x})", emu.core().arch_pc);
            process::exit(1);
        }
        _ => process::exit(0),
    }
}

/// Advances one cycle, appending a snapshot line when tracing.
fn step_traced(emu: &mut Emulator, tracer: &mut Option<fs::File>) -> bool {
    if let Err(e) = emu.step_cycle() {
        eprintln!("error: {e}");
        return false;
    }
    if let Some(file) = tracer
        && let Ok(line) = serde_json::to_string(&emu.snapshot())
        && writeln!(file, "{line}").is_err()
    {
        eprintln!("error: trace write failed; tracing disabled");
        *tracer = None;
    }
    true
}

/// Batch mode: run to exit or fault, resuming through pauses.
fn run_to_end(emu: &mut Emulator, tracer: &mut Option<fs::File>) -> RunState {
    loop {
        match emu.state() {
            RunState::Running => {
                if !step_traced(emu, tracer) {
                    return emu.state();
                }
            }
            RunState::Paused(_) => emu.resume(),
            state @ (RunState::Exited(_) | RunState::Faulted(_)) => return state,
        }
    }
}

/// Runs until the engine pauses or halts.
fn run_until_stop(emu: &mut Emulator, tracer: &mut Option<fs::File>) {
    while emu.state() == RunState::Running {
        if !step_traced(emu, tracer) {
            return;
        }
    }
    report_stop(emu);
}

fn report_stop(emu: &Emulator) {
    match emu.state() {
        RunState::Paused(reason) => println!(
            "paused: {reason:?} (pc {})",
            format_addr(emu, emu.core().arch_pc)
        ),
        RunState::Exited(code) => println!("guest exited with status {code}"),
        RunState::Faulted(fault) => println!("guest faulted: {fault}"),
        RunState::Running => {}
    }
}

/// Formats an address with its label, when one is defined there.
fn format_addr(emu: &Emulator, addr: u32) -> String {
    match emu.program().label_at(addr) {
        Some(name) => format!("{addr:#x} <{name}>"),
        None => format!("{addr:#x}"),
    }
}

/// The debugger REPL.
fn repl(emu: &mut Emulator, tracer: &mut Option<fs::File>) -> RunState {
    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        print!("(teem) ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return emu.state(), // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("error: {e}");
                return emu.state();
            }
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit" | "q" | "exit"] => return emu.state(),
            ["step" | "s", rest @ ..] => {
                let n = rest.first().and_then(|w| parse_u64(w)).unwrap_or(1);
                if matches!(emu.state(), RunState::Paused(_)) {
                    emu.resume();
                }
                for _ in 0..n {
                    if emu.state() != RunState::Running || !step_traced(emu, tracer) {
                        break;
                    }
                }
                report_stop(emu);
                println!(
                    "cycle {}: pc {}",
                    emu.core().cycles,
                    format_addr(emu, emu.core().arch_pc)
                );
            }
            ["continue" | "c"] => {
                if matches!(emu.state(), RunState::Paused(_)) {
                    emu.resume();
                }
                run_until_stop(emu, tracer);
            }
            ["break" | "b", target] => match resolve_addr(emu, target) {
                Some(addr) => {
                    emu.add_breakpoint(addr);
                    println!("breakpoint at {}", format_addr(emu, addr));
                }
                None => eprintln!("unknown address or label `{target}`"),
            },
            ["print" | "p", rest @ ..] => print_cmd(emu, rest),
            ["show", what] => show_cmd(emu, what),
            ["help" | "h"] => {
                println!("commands:");
                println!("  step [N]             advance N cycles (default 1)");
                println!("  continue             run until pause or exit");
                println!("  break <addr|label>   pause before retiring this address");
                println!("  print <reg|pc>       print a register");
                println!("  print mem <addr> [n] dump n bytes (default 16)");
                println!("  show <cache|rob|lsq|predictor>");
                println!("  quit");
            }
            _ => eprintln!("unknown command; try `help`"),
        }

        if matches!(emu.state(), RunState::Exited(_) | RunState::Faulted(_)) {
            report_stop(emu);
            return emu.state();
        }
    }
}

fn parse_u64(word: &str) -> Option<u64> {
    word.strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
        .map_or_else(|| word.parse().ok(), |hex| u64::from_str_radix(hex, 16).ok())
}

fn resolve_addr(emu: &Emulator, target: &str) -> Option<u32> {
    parse_u64(target)
        .map(|v| v as u32)
        .or_else(|| emu.program().label(target))
}

fn print_cmd(emu: &Emulator, args: &[&str]) {
    match args {
        ["pc"] => println!("pc = {}", format_addr(emu, emu.core().arch_pc)),
        ["mem", addr, rest @ ..] => {
            let Some(addr) = parse_u64(addr).map(|v| v as u32) else {
                eprintln!("bad address");
                return;
            };
            let len = rest.first().and_then(|w| parse_u64(w)).unwrap_or(16) as u32;
            match emu.core().mem.read_bytes(addr, len) {
                Ok(bytes) => {
                    for (i, chunk) in bytes.chunks(16).enumerate() {
                        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                        println!("{:#010x}: {}", addr + 16 * i as u32, hex.join(" "));
                    }
                }
                Err(fault) => eprintln!("{fault}"),
            }
        }
        [reg] => match Reg::parse(reg) {
            Some(r) => {
                let v = emu.core().read_reg(r.index());
                println!("{r} = {v:#010x} ({})", v as i32);
            }
            None => eprintln!("unknown register `{reg}`"),
        },
        _ => eprintln!("usage: print <reg|pc> | print mem <addr> [len]"),
    }
}

fn show_cmd(emu: &Emulator, what: &str) {
    let snap = emu.snapshot();
    match what {
        "rob" => {
            println!("rob ({} entries):", snap.rob.len());
            for e in &snap.rob {
                println!(
                    "  t{:<4} {:#010x}  {:<28} {}{}{}",
                    e.tag,
                    e.pc,
                    e.op,
                    if e.executed { "done" } else { "    " },
                    if e.speculative { " spec" } else { "" },
                    e.fault
                        .as_deref()
                        .map(|f| format!(" fault: {f}"))
                        .unwrap_or_default()
                );
            }
        }
        "lsq" => {
            println!("lsq ({} entries):", snap.lsq.len());
            for e in &snap.lsq {
                println!(
                    "  t{:<4} {:<5} addr {:<12} value {:<12}{}{}",
                    e.tag,
                    e.kind,
                    e.addr.map_or_else(|| "?".into(), |a| format!("{a:#x}")),
                    e.value.map_or_else(|| "?".into(), |v| format!("{v:#x}")),
                    if e.performed { " performed" } else { "" },
                    if e.speculative { " spec" } else { "" },
                );
            }
        }
        "cache" => {
            println!(
                "cache: {} sets x {} ways, {}-byte lines, {} valid",
                snap.cache.sets,
                snap.cache.ways,
                snap.cache.line_bytes,
                snap.cache.lines.len()
            );
            for (set, way, base) in &snap.cache.lines {
                println!("  set {set:<3} way {way}: {base:#010x}");
            }
        }
        "predictor" => {
            println!(
                "direction: ghr {:#x}, {}/{} counters taken",
                snap.predictor.ghr, snap.predictor.taken_counters, snap.predictor.pht_entries
            );
            println!("btb ({} occupied slots):", snap.predictor.btb.len());
            for (slot, target) in &snap.predictor.btb {
                println!("  slot {slot:<3} -> {}", format_addr(emu, *target));
            }
            println!("ras (top last): {:x?}", snap.predictor.ras);
        }
        _ => eprintln!("usage: show <cache|rob|lsq|predictor>"),
    }
}
