use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bpz_codecs::codec_by_name;
use bpz_core::{BpzError, Directory, Engine, EngineConfig, Mode};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "bpz",
    about = "Block-parallel compressor: split a file into 1 MiB blocks and (de)compress them on every core",
    version
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a bpz stream
    Compress {
        /// Source file to compress
        input: PathBuf,
        /// Destination bpz file (created or truncated)
        output: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
        /// Compression level (gzip 0–9, zstd 1–22)
        #[arg(long)]
        level: Option<i32>,
    },
    /// Restore the original file from a bpz stream
    Decompress {
        /// Source bpz file
        input: PathBuf,
        /// Destination file (created or truncated)
        output: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Print the block directory of a bpz file
    Inspect {
        /// bpz file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Codec used for every block: gzip | zstd | lz4 | passthrough.
    /// The codec is not stored in the file; decompress with the same one.
    #[arg(short, long, default_value = "gzip")]
    codec: String,
    /// Worker threads (default: 4 × CPUs)
    #[arg(long)]
    workers: Option<usize>,
    /// Maximum blocks in flight (default: 16 × CPUs)
    #[arg(long)]
    gate: Option<usize>,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(gate) = self.gate {
            config = config.with_gate_capacity(gate);
        }
        config
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// Flatten an engine error, listing every failed block on its own line.
fn describe(err: BpzError) -> anyhow::Error {
    match err {
        BpzError::Aggregate(errors) => {
            let mut message = String::from("one or more blocks failed:");
            for error in &errors {
                message.push_str("\n  ");
                message.push_str(&error.to_string());
            }
            anyhow::anyhow!(message)
        }
        other => anyhow::Error::new(other),
    }
}

fn run_engine(
    input: &Path,
    output: &Path,
    mode: Mode,
    engine_args: &EngineArgs,
    level: Option<i32>,
) -> anyhow::Result<()> {
    let codec = codec_by_name(&engine_args.codec, level)?;
    let engine = Engine::new(engine_args.config(), codec)?;

    let mut source = BufReader::new(
        File::open(input).with_context(|| format!("opening input file {:?}", input))?,
    );
    let dest = File::create(output).with_context(|| format!("creating output file {:?}", output))?;

    info!(
        ?mode,
        codec = engine.codec().name(),
        workers = engine.config().workers,
        gate = engine.config().gate_capacity,
        "starting"
    );
    let t0 = Instant::now();
    let mut stderr = io::stderr();
    let mut render = |percent: u8| {
        let _ = write!(stderr, "\rDone: {percent}%");
        let _ = stderr.flush();
    };
    let result = engine.process_with_progress(&mut source, dest, mode, &mut render);
    eprintln!();
    let dest = result.map_err(describe)?;
    let elapsed = t0.elapsed();

    dest.sync_all()
        .with_context(|| format!("flushing output file {:?}", output))?;
    let raw_size = std::fs::metadata(input)?.len();
    let out_size = std::fs::metadata(output)?.len();

    eprintln!("  codec       : {}", engine.codec().name());
    eprintln!("  input       : {}", human_bytes(raw_size));
    eprintln!("  output      : {}", human_bytes(out_size));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let mut reader = BufReader::new(
        File::open(&file).with_context(|| format!("opening {:?}", file))?,
    );
    let directory = Directory::read_from(&mut reader)?;
    let file_size = std::fs::metadata(&file)?.len();
    let raw = directory.source_len();
    let stored = directory.stored_len();

    println!("=== bpz file: {:?} ===", file);
    println!();
    println!("  block count    : {}", directory.block_count());
    println!("  directory      : {}", human_bytes(directory.self_size()));
    println!("  raw size       : {}", human_bytes(raw));
    println!("  stored         : {}", human_bytes(stored));
    println!("  file on disk   : {}", human_bytes(file_size));
    if stored > 0 {
        println!("  ratio          : {:.2}x", raw as f64 / stored as f64);
    }

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>8}  {:>14}  {:>12}  {:>12}",
            "slot", "number", "raw offset", "stored", "raw"
        );
        println!("  {}", "-".repeat(62));
        for (slot, e) in directory.entries().iter().enumerate() {
            println!(
                "  {:>8}  {:>8}  {:>14}  {:>12}  {:>12}",
                slot,
                e.number,
                directory.offset_of(e.number)?,
                human_bytes(e.size as u64),
                human_bytes(e.source_size as u64)
            );
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Compress {
            input,
            output,
            engine,
            level,
        } => run_engine(&input, &output, Mode::Compress, &engine, level),
        Commands::Decompress {
            input,
            output,
            engine,
        } => run_engine(&input, &output, Mode::Decompress, &engine, None),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
    }
}
