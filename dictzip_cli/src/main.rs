use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dictzip_core::format::{FLAG_FCOMMENT, FLAG_FEXTRA, FLAG_FHCRC, FLAG_FNAME, FLAG_FTEXT};
use dictzip_core::{compact, compress, Compression, Reader, WriterOptions, DEFAULT_BLOCK_SIZE};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dictzip",
    about = "dictzip: gzip-compatible compression with random access to any byte range",
    version
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into dictzip format
    Compress {
        /// Source file to compress ("-" reads stdin)
        input: PathBuf,
        /// Destination .dz file
        output: PathBuf,
        /// Deflate level, 0 (store) to 9 (best)
        #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: u32,
        /// Raw bytes per block
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u16,
    },
    /// Fully decompress a dictzip file back to raw bytes
    Decompress {
        /// Source .dz file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
    },
    /// Print header metadata and block index statistics
    Inspect {
        /// .dz file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
        /// Decompress everything and check the CRC-32 and size in the trailer
        #[arg(long)]
        verify: bool,
    },
    /// Read a byte range without decompressing the rest of the file
    Get {
        /// .dz file
        file: PathBuf,
        /// Raw offset of the first byte
        start: String,
        /// Number of bytes to read
        size: String,
        /// Interpret START and SIZE as compact base-64 numbers (as in .index files)
        #[arg(short, long)]
        compact: bool,
        /// Write the bytes to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Encode a number in compact base-64 form
    Encode { value: u64 },
    /// Decode a compact base-64 number
    Decode { text: String },
    /// Benchmark random range reads
    Bench {
        /// .dz file
        file: PathBuf,
        /// Number of random reads
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        /// Bytes per read
        #[arg(long, default_value_t = 4096)]
        size: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
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

fn flag_names(flags: u8) -> String {
    let names: Vec<&str> = [
        (FLAG_FTEXT, "FTEXT"),
        (FLAG_FHCRC, "FHCRC"),
        (FLAG_FEXTRA, "FEXTRA"),
        (FLAG_FNAME, "FNAME"),
        (FLAG_FCOMMENT, "FCOMMENT"),
    ]
    .iter()
    .filter(|(bit, _)| flags & bit != 0)
    .map(|&(_, name)| name)
    .collect();
    names.join(" ")
}

fn open_reader(path: &Path) -> anyhow::Result<Reader> {
    Reader::open(path).with_context(|| format!("opening dictzip file {:?}", path))
}

/// Sibling path the output is written to before being renamed into place.
fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".{}.partial", name))
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(input: PathBuf, output: PathBuf, level: u32, block_size: u16) -> anyhow::Result<()> {
    let options = WriterOptions {
        block_size,
        level: Compression::new(level),
        mtime: None,
    };

    let src: Box<dyn Read> = if input.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&input).with_context(|| format!("opening input file {:?}", input))?;
        Box::new(BufReader::new(file))
    };

    // Written beside the destination, renamed into place on success.
    let partial = partial_path(&output);
    let dst = BufWriter::new(
        File::create(&partial).with_context(|| format!("creating output file {:?}", partial))?,
    );

    let t0 = Instant::now();
    let summary = match compress(src, dst, options) {
        Ok(summary) => summary,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e).with_context(|| format!("compressing into {:?}", output));
        }
    };
    fs::rename(&partial, &output)
        .with_context(|| format!("moving {:?} into place at {:?}", partial, output))?;
    let elapsed = t0.elapsed();

    let ratio = if summary.file_size == 0 {
        1.0
    } else {
        summary.raw_size as f64 / summary.file_size as f64
    };
    eprintln!("  level       : {}", level);
    eprintln!("  block size  : {}", human_bytes(block_size as u64));
    eprintln!("  blocks      : {}", summary.block_count);
    eprintln!("  raw size    : {}", human_bytes(summary.raw_size));
    eprintln!("  compressed  : {}", human_bytes(summary.file_size));
    eprintln!("  ratio       : {:.2}x", ratio);
    eprintln!("  crc32       : {:08x}", summary.crc32);
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let reader = open_reader(&input)?;

    let dst: Box<dyn Write> = if output.to_str() == Some("-") {
        Box::new(io::stdout().lock())
    } else {
        Box::new(BufWriter::new(
            File::create(&output).with_context(|| format!("creating output file {:?}", output))?,
        ))
    };

    let t0 = Instant::now();
    let total_raw = reader.decompress_to(dst)?;
    let elapsed = t0.elapsed();

    eprintln!("  blocks      : {}", reader.block_count());
    eprintln!("  raw size    : {}", human_bytes(total_raw));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((total_raw as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool, verify: bool) -> anyhow::Result<()> {
    let reader = open_reader(&file)?;
    let header = reader.header();
    let file_size = fs::metadata(&file)?.len();

    println!("=== dictzip file: {:?} ===", file);
    println!();
    println!("  flags          : 0x{:02x} {}", header.gzip.flags, flag_names(header.gzip.flags));
    println!("  mtime          : {}", header.gzip.mtime);
    println!("  xfl / os       : {} / {}", header.gzip.xfl, header.gzip.os);
    if let Some(name) = &header.name {
        println!("  name           : {}", String::from_utf8_lossy(name));
    }
    if let Some(comment) = &header.comment {
        println!("  comment        : {}", String::from_utf8_lossy(comment));
    }
    println!("  header size    : {}", header.payload_start);
    println!("  block size     : {}", human_bytes(reader.block_size()));
    println!("  block count    : {}", reader.block_count());
    println!("  compressed     : {}", human_bytes(reader.index().compressed_size()));
    println!("  file on disk   : {}", human_bytes(file_size));
    match reader.raw_size() {
        Ok(raw) => {
            println!("  raw size       : {}", human_bytes(raw));
            if file_size > 0 {
                println!("  ratio          : {:.2}x", raw as f64 / file_size as f64);
            }
        }
        Err(e) => println!("  raw size       : unavailable ({})", e),
    }

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>12}",
            "block", "file offset", "compressed", "raw start"
        );
        println!("  {}", "-".repeat(52));
        for i in 0..reader.block_count() {
            let span = reader.index().span(i).unwrap_or(0..0);
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>12}",
                i,
                span.start,
                human_bytes(span.end - span.start),
                i as u64 * reader.block_size()
            );
        }
    }

    if verify {
        let t0 = Instant::now();
        let trailer = reader.verify().context("verification failed")?;
        println!();
        println!(
            "  verified       : crc32 {:08x}, {} in {:.3}s",
            trailer.crc32,
            human_bytes(trailer.isize as u64),
            t0.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

fn parse_number(text: &str, is_compact: bool) -> anyhow::Result<u64> {
    if is_compact {
        Ok(compact::decode_unsigned(text)?)
    } else {
        text.parse::<u64>()
            .with_context(|| format!("{:?} is not a non-negative integer", text))
    }
}

fn run_get(
    file: PathBuf,
    start: String,
    size: String,
    is_compact: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let reader = open_reader(&file)?;
    let start = parse_number(&start, is_compact)?;
    let size = parse_number(&size, is_compact)?;

    let t0 = Instant::now();
    let bytes = reader
        .get(start, size)
        .with_context(|| format!("reading {} bytes at offset {}", size, start))?;
    debug!(
        start,
        size,
        elapsed_us = t0.elapsed().as_micros() as u64,
        "range read"
    );

    match output {
        Some(path) => {
            fs::write(&path, &bytes).with_context(|| format!("writing {:?}", path))?;
            eprintln!("  {} written to {:?}", human_bytes(bytes.len() as u64), path);
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn run_bench(file: PathBuf, count: u64, size: u64, seed: u64) -> anyhow::Result<()> {
    let reader = open_reader(&file)?;
    let raw_size = reader.raw_size()?;
    if raw_size == 0 || count == 0 {
        anyhow::bail!("nothing to benchmark: file holds {} bytes", raw_size);
    }
    let size = size.min(raw_size);

    // Simple LCG for reproducible random offsets (no external dep)
    let starts: Vec<u64> = {
        let mut rng = seed;
        (0..count)
            .map(|_| {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (rng >> 33) % (raw_size - size + 1)
            })
            .collect()
    };

    eprintln!(
        "benchmarking {} random reads of {} across {} blocks...",
        count,
        human_bytes(size),
        reader.block_count()
    );

    let t0 = Instant::now();
    let mut total = 0u64;
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);
    for &start in &starts {
        let t = Instant::now();
        let bytes = reader.get(start, size)?;
        latencies_us.push(t.elapsed().as_micros() as u64);
        total += bytes.len() as u64;
    }
    let elapsed = t0.elapsed();
    latencies_us.sort_unstable();

    let pct = |p: f64| latencies_us[((latencies_us.len() as f64 * p) as usize).min(latencies_us.len() - 1)];

    println!();
    println!("=== Random Range Read Benchmark ===");
    println!("  reads       : {}", count);
    println!("  total raw   : {}", human_bytes(total));
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput  : {}/s",
        human_bytes((total as f64 / elapsed.as_secs_f64()) as u64)
    );
    println!("  latency:");
    println!("    min  : {} µs", latencies_us[0]);
    println!("    p50  : {} µs", pct(0.50));
    println!("    p95  : {} µs", pct(0.95));
    println!("    p99  : {} µs", pct(0.99));
    println!("    max  : {} µs", latencies_us[latencies_us.len() - 1]);

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
            level,
            block_size,
        } => run_compress(input, output, level, block_size),
        Commands::Decompress { input, output } => run_decompress(input, output),
        Commands::Inspect {
            file,
            blocks,
            verify,
        } => run_inspect(file, blocks, verify),
        Commands::Get {
            file,
            start,
            size,
            compact,
            output,
        } => run_get(file, start, size, compact, output),
        Commands::Encode { value } => {
            println!("{}", compact::encode(value));
            Ok(())
        }
        Commands::Decode { text } => {
            println!("{}", compact::decode(&text)?);
            Ok(())
        }
        Commands::Bench {
            file,
            count,
            size,
            seed,
        } => run_bench(file, count, size, seed),
    }
}
