//! `zs`: command-line interface for the ZS controller DMA link.
//!
//! ```text
//! USAGE:
//!   zs layer <file>                  Print the shape of every layer in a file
//!   zs status [--sim]                Decode both channel status registers
//!   zs loopback [--sim] [...]        Write a pattern, read it back, compare
//! ```
//!
//! Hardware addresses, UIO paths and the reset line come from `ZS_*`
//! environment variables (see `DeviceConfig::from_env`).

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zs_driver::chip::layout::MIN_READ_TRANSFER_BYTES;
use zs_driver::{
    open_reset_line, Channel, DeviceConfig, DmaEngine, InterruptSync, LayerStats,
    LoopbackDevice, NullGpio, PollSync, StreamingQueue, SyncMode, SyncStrategy,
};
use zs_models::Network;

/// Burst length used against the simulator
const SIM_BURST_WORDS: usize = 1024;

#[derive(Parser)]
#[command(name = "zs", about = "ZS controller DMA link CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the shape of every layer in a layer file.
    Layer {
        /// Binary layer file.
        file: PathBuf,
    },
    /// Print the decoded MM2S and S2MM status registers.
    Status {
        /// Use the simulated loopback device instead of /dev/mem.
        #[arg(long)]
        sim: bool,
    },
    /// Stream a test pattern through the accelerator and compare the echo.
    Loopback(LoopbackArgs),
}

#[derive(Args)]
struct LoopbackArgs {
    /// Use the simulated loopback device instead of /dev/mem.
    #[arg(long)]
    sim: bool,
    /// Number of 64-bit words to send.
    #[arg(long, default_value_t = 256)]
    words: usize,
    /// Wait for completion on UIO interrupts instead of polling status.
    #[arg(long)]
    interrupt: bool,
    /// Bytes per S2MM transfer.
    #[arg(long, default_value_t = MIN_READ_TRANSFER_BYTES)]
    read_len: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Layer { file } => cmd_layer(&file)?,
        Cmd::Status { sim } => cmd_status(sim)?,
        Cmd::Loopback(args) => cmd_loopback(&args)?,
    }

    Ok(())
}

fn cmd_layer(file: &Path) -> Result<()> {
    let network = Network::from_file(file)
        .with_context(|| format!("cannot load layers from {}", file.display()))?;

    println!("Layers: {}", network.len());
    println!();
    for (index, layer) in network.layers().iter().enumerate() {
        println!("[{index}] {layer}");
        println!(
            "     weights {}  biases {}  in {} words  out {} words",
            layer.weight_count(),
            layer.biases().len(),
            layer.input_words(),
            layer.output_words()
        );
    }
    println!();
    println!("Total weights    : {}", network.total_weight_count());
    println!("Largest output   : {} words", network.max_output_words());

    Ok(())
}

fn cmd_status(sim: bool) -> Result<()> {
    let engine = if sim {
        LoopbackDevice::with_window_words(4 * SIM_BURST_WORDS)
            .engine(Box::new(PollSync), SIM_BURST_WORDS)?
    } else {
        let config = DeviceConfig::from_env().context("invalid ZS_* configuration")?;
        DmaEngine::open(&config).context("cannot map the DMA block")?
    };

    println!("{}", engine.status_report(Channel::Mm2s));
    println!("{}", engine.status_report(Channel::S2mm));

    Ok(())
}

fn cmd_loopback(args: &LoopbackArgs) -> Result<()> {
    if args.words == 0 {
        bail!("--words must be at least 1");
    }

    let queue = if args.sim {
        let window_words = (4 * SIM_BURST_WORDS).max(2 * args.read_len / 8);
        let device = LoopbackDevice::with_window_words(window_words);
        let sync: Box<dyn SyncStrategy> = if args.interrupt {
            let (mm2s, s2mm) = device.interrupt_handles()?;
            Box::new(InterruptSync::new(mm2s, s2mm))
        } else {
            Box::new(PollSync)
        };
        StreamingQueue::new(device.engine(sync, SIM_BURST_WORDS)?, Box::new(NullGpio))
    } else {
        let mut config = DeviceConfig::from_env().context("invalid ZS_* configuration")?;
        if args.interrupt {
            config = config.with_sync(SyncMode::Interrupt);
        }
        let engine = DmaEngine::open(&config).context("cannot open the DMA engine")?;
        StreamingQueue::new(engine, open_reset_line(config.gpio)?)
    };

    println!(
        "Loopback: {} words, {} byte reads, {} sync",
        args.words,
        args.read_len,
        queue.engine().sync_name()
    );

    queue
        .init(args.read_len)
        .with_context(|| format!("init with {} byte reads", args.read_len))?;

    let pattern: Vec<u64> = (1..=args.words as u64)
        .map(|i| i.wrapping_mul(0x0101_0101_0101))
        .collect();
    queue.write(&pattern)?;

    let mut received = Vec::new();
    let bytes = queue.read_layer(&mut received).context("layer read failed")?;
    queue.stop();

    let stats = LayerStats::from_words(&received);
    println!("Received     : {bytes} bytes ({} words)", received.len());
    println!(
        "Control words: {} zero, {} idle, {} end-of-layer",
        stats.zero_words, stats.idle_words, stats.end_bit_words
    );
    if queue.dropped_buffers() > 0 {
        bail!("{} buffers dropped by the write worker", queue.dropped_buffers());
    }

    let mismatches = pattern
        .iter()
        .zip(&received)
        .filter(|(sent, back)| sent != back)
        .count();
    let missing = pattern.len().saturating_sub(received.len());
    if mismatches > 0 || missing > 0 {
        bail!("{mismatches} mismatched and {missing} missing words");
    }
    println!("OK: {} words echoed", pattern.len());

    Ok(())
}
