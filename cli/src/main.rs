//! chainstream CLI — inspect chunked archives and probe RPC endpoints.
//!
//! Usage:
//! ```bash
//! # List the chunks of an archive directory
//! chainstream chunks --dir ./archive --from 0 --to 5000000
//!
//! # Validate archived chain continuity
//! chainstream validate --dir ./archive --check-parent-hash
//!
//! # Send one retrying JSON-RPC call
//! chainstream probe --url https://cloudflare-eth.com --method eth_blockNumber
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use chainstream_archive::{validate_chunks, BlockRange, ChunkWalk, LocalFs, ValidateOptions};
use chainstream_rpc::{HttpTransport, RetryableRpc, RetryConfig, RpcConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "chunks" => cmd_chunks(&args[2..]).await,
        "validate" => cmd_validate(&args[2..]).await,
        "probe" => cmd_probe(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainstream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainstream {}", env!("CARGO_PKG_VERSION"));
    println!("Fork-aware block ingestion toolkit\n");
    println!("USAGE:");
    println!("    chainstream <COMMAND>\n");
    println!("COMMANDS:");
    println!("    chunks     Walk an archive and print its chunks");
    println!("    validate   Check archived chain continuity");
    println!("    probe      Send one retrying JSON-RPC call");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CHUNKS / VALIDATE FLAGS:");
    println!("    --dir <PATH>         Archive root directory  [required]");
    println!("    --from <N>           First block (default 0)");
    println!("    --to <N>             Last block (default max)");
    println!("    --reverse            Walk newest-first (chunks only)");
    println!("    --check-parent-hash  Also verify hash linkage (validate only)\n");
    println!("PROBE FLAGS:");
    println!("    --url <URL>          RPC endpoint URL  [required]");
    println!("    --method <M>         JSON-RPC method   [required]");
    println!("    --params <JSON>      Params array (default [])");
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_range(args: &[String]) -> Result<BlockRange> {
    let from = match parse_flag(args, "--from") {
        Some(v) => v.parse().context("--from must be a block number")?,
        None => 0,
    };
    let to = match parse_flag(args, "--to") {
        Some(v) => v.parse().context("--to must be a block number")?,
        None => u64::MAX,
    };
    Ok(BlockRange::new(from, to))
}

async fn cmd_chunks(args: &[String]) -> Result<()> {
    let dir = parse_flag(args, "--dir").ok_or_else(|| anyhow!("--dir is required"))?;
    let range = parse_range(args)?;
    let fs = Arc::new(LocalFs::new(dir));

    let mut walk = if has_flag(args, "--reverse") {
        ChunkWalk::reverse(fs, range)
    } else {
        ChunkWalk::forward(fs, range)
    };

    let mut count = 0usize;
    while let Some(chunk) = walk.next().await? {
        println!("{}", chunk.path());
        count += 1;
    }
    println!("{count} chunks");
    Ok(())
}

async fn cmd_validate(args: &[String]) -> Result<()> {
    let dir = parse_flag(args, "--dir").ok_or_else(|| anyhow!("--dir is required"))?;
    let range = parse_range(args)?;
    let opts = ValidateOptions {
        check_parent_hash: has_flag(args, "--check-parent-hash"),
    };

    let fs = Arc::new(LocalFs::new(dir));
    let report = validate_chunks(fs, range, &opts).await?;

    println!("  Chunks: {}", report.chunks);
    println!("  Blocks: {}", report.blocks);
    match (report.first, report.last) {
        (Some(first), Some(last)) => println!("  Range:  {first}..={last}"),
        _ => println!("  Range:  empty"),
    }
    println!("  Status: OK");
    Ok(())
}

async fn cmd_probe(args: &[String]) -> Result<()> {
    let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url is required"))?;
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params: Vec<serde_json::Value> = match parse_flag(args, "--params") {
        Some(raw) => serde_json::from_str(&raw).context("--params must be a JSON array")?,
        None => vec![],
    };

    let transport = HttpTransport::new(&url, Duration::from_secs(30))?;
    let rpc = RetryableRpc::new(
        Arc::new(transport),
        RpcConfig {
            // A one-shot probe should fail fast rather than ride the ladder.
            retry: RetryConfig { max_attempts: Some(3) },
            ..RpcConfig::default()
        },
    );

    let start = std::time::Instant::now();
    let result = rpc.call(&method, params).await?;
    let latency = start.elapsed();

    println!("{}", serde_json::to_string_pretty(&result)?);
    eprintln!("({}ms via {url})", latency.as_millis());
    Ok(())
}
