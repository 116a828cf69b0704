//! SlabKV CLI
//!
//! Runs an in-process engine either as an interactive shell or under a
//! synthetic multi-threaded workload.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rand::Rng;
use slabkv::{Command, Config, Engine, HashAlgorithm, Reply, SlabError};
use tracing_subscriber::{fmt, EnvFilter};

/// SlabKV CLI
#[derive(Parser, Debug)]
#[command(name = "slabkv-cli")]
#[command(about = "In-memory key-value engine shell and load generator")]
#[command(version)]
struct Args {
    /// Initial bucket count
    #[arg(short, long, default_value = "64")]
    buckets: usize,

    /// Hash function (xxh3, fx, fnv1a, sip)
    #[arg(long, default_value = "xxh3")]
    hash: HashAlgorithm,

    /// Abort transactions older than this many milliseconds
    #[arg(long)]
    txn_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read commands from stdin, one per line
    Shell,

    /// Run a mixed read/write/transaction workload and print stats
    Bench {
        /// Worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Operations per thread
        #[arg(short, long, default_value = "100000")]
        ops: usize,

        /// Distinct keys
        #[arg(short, long, default_value = "10000")]
        keys: usize,

        /// Value size in bytes
        #[arg(long, default_value = "64")]
        value_size: usize,

        /// Fraction of operations that are reads
        #[arg(long, default_value = "0.8")]
        read_ratio: f64,

        /// Fraction of operations that run as a two-key transaction
        #[arg(long, default_value = "0.05")]
        txn_ratio: f64,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,slabkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut builder = Config::builder()
        .initial_bucket_count(args.buckets)
        .hash_algorithm(args.hash);
    if let Some(ms) = args.txn_timeout_ms {
        builder = builder.transaction_timeout(Duration::from_millis(ms));
    }

    let engine = match Engine::new(builder.build()) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to create engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("SlabKV v{}", slabkv::VERSION);

    let result = match args.command {
        Commands::Shell => run_shell(&engine),
        Commands::Bench {
            threads,
            ops,
            keys,
            value_size,
            read_ratio,
            txn_ratio,
        } => run_bench(
            &engine,
            &BenchPlan {
                threads,
                ops,
                keys,
                value_size,
                read_ratio,
                txn_ratio,
            },
        ),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

// =============================================================================
// Shell
// =============================================================================

fn run_shell(engine: &Engine) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let output = match parse_command(line) {
            Ok(command) => render(engine.execute(command)),
            Err(usage) => format!("(error) {}", usage),
        };
        writeln!(stdout, "{}", output)?;
        stdout.flush()?;
    }
    Ok(())
}

/// Parse one whitespace-separated shell line
fn parse_command(line: &str) -> Result<Command, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (name, rest) = tokens
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let key = |i: usize| -> Result<Vec<u8>, String> {
        rest.get(i)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| format!("{} is missing an argument", name.to_uppercase()))
    };
    let txn = || -> Result<u64, String> {
        rest.first()
            .ok_or_else(|| format!("{} needs a transaction id", name.to_uppercase()))?
            .parse()
            .map_err(|_| format!("invalid transaction id '{}'", rest[0]))
    };

    let command = match name.to_ascii_uppercase().as_str() {
        "GET" => Command::Get { key: key(0)? },
        "PUT" | "SET" => Command::Put {
            key: key(0)?,
            value: key(1)?,
        },
        "PUTEX" => {
            let ms: u64 = String::from_utf8_lossy(&key(2)?)
                .parse()
                .map_err(|_| "PUTEX ttl must be milliseconds".to_string())?;
            Command::PutEx {
                key: key(0)?,
                value: key(1)?,
                ttl: Duration::from_millis(ms),
            }
        }
        "DEL" | "DELETE" => Command::Delete { key: key(0)? },
        "EXISTS" => Command::Exists { key: key(0)? },
        "BEGIN" => Command::Begin,
        "READ" => Command::Read {
            txn: txn()?,
            key: key(1)?,
        },
        "WRITE" => Command::Write {
            txn: txn()?,
            key: key(1)?,
            value: key(2)?,
        },
        "REMOVE" => Command::Remove {
            txn: txn()?,
            key: key(1)?,
        },
        "COMMIT" => Command::Commit { txn: txn()? },
        "ABORT" => Command::Abort { txn: txn()? },
        "STATS" => Command::Stats,
        "PING" => Command::Ping,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(command)
}

fn render(reply: Result<Reply, SlabError>) -> String {
    match reply {
        Ok(Reply::Ok) => "OK".to_string(),
        Ok(Reply::Pong) => "PONG".to_string(),
        Ok(Reply::Value(value)) => format!("\"{}\"", String::from_utf8_lossy(&value)),
        Ok(Reply::Bool(b)) => format!("(integer) {}", u8::from(b)),
        Ok(Reply::Txn(id)) => format!("(txn) {}", id),
        Ok(Reply::Committed { version }) => format!("OK (version {})", version),
        Ok(Reply::Stats(stats)) => serde_json::to_string_pretty(&stats)
            .unwrap_or_else(|e| format!("(error) {}", e)),
        Err(SlabError::NotFound) => "(nil)".to_string(),
        Err(e) => format!("(error) {}", e),
    }
}

// =============================================================================
// Bench
// =============================================================================

struct BenchPlan {
    threads: usize,
    ops: usize,
    keys: usize,
    value_size: usize,
    read_ratio: f64,
    txn_ratio: f64,
}

#[derive(Default)]
struct BenchCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
    errors: AtomicU64,
}

fn run_bench(engine: &Engine, plan: &BenchPlan) -> io::Result<()> {
    let keys = plan.keys.max(1);
    let value = vec![b'x'; plan.value_size];
    let counters = BenchCounters::default();

    tracing::info!(
        threads = plan.threads,
        ops = plan.ops,
        keys,
        value_size = plan.value_size,
        "starting bench"
    );

    let start = Instant::now();
    std::thread::scope(|s| {
        for _ in 0..plan.threads {
            s.spawn(|| bench_worker(engine, plan, keys, &value, &counters));
        }
    });
    let elapsed = start.elapsed();

    let total = (plan.threads * plan.ops) as f64;
    let summary = serde_json::json!({
        "elapsed_ms": elapsed.as_millis() as u64,
        "ops_per_sec": total / elapsed.as_secs_f64().max(f64::EPSILON),
        "reads": counters.reads.load(Ordering::Relaxed),
        "writes": counters.writes.load(Ordering::Relaxed),
        "commits": counters.commits.load(Ordering::Relaxed),
        "conflicts": counters.conflicts.load(Ordering::Relaxed),
        "errors": counters.errors.load(Ordering::Relaxed),
        "engine": engine.stats(),
    });

    let mut stdout = io::stdout();
    serde_json::to_writer_pretty(&mut stdout, &summary)?;
    writeln!(stdout)?;
    Ok(())
}

fn bench_worker(engine: &Engine, plan: &BenchPlan, keys: usize, value: &[u8], counters: &BenchCounters) {
    let mut rng = rand::thread_rng();

    for _ in 0..plan.ops {
        let key = format!("key:{}", rng.gen_range(0..keys));
        let roll: f64 = rng.gen();

        let outcome = if roll < plan.txn_ratio {
            let other = format!("key:{}", rng.gen_range(0..keys));
            match transfer(engine, key.as_bytes(), other.as_bytes(), value) {
                Ok(()) => {
                    counters.commits.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(e) if e.is_retriable() => {
                    counters.conflicts.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        } else if roll < plan.txn_ratio + plan.read_ratio {
            counters.reads.fetch_add(1, Ordering::Relaxed);
            engine.get(key.as_bytes()).map(|_| ())
        } else {
            counters.writes.fetch_add(1, Ordering::Relaxed);
            engine.put(key.as_bytes(), value).map(|_| ())
        };

        if let Err(e) = outcome {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "bench operation failed");
        }
    }
}

/// Read one key and write both inside a transaction
fn transfer(engine: &Engine, from: &[u8], to: &[u8], value: &[u8]) -> Result<(), SlabError> {
    let txn = engine.begin()?;
    let result = (|| {
        engine.read(txn, from)?;
        engine.write(txn, from, value)?;
        engine.write(txn, to, value)?;
        engine.commit(txn).map(|_| ())
    })();

    if result.is_err() && engine.transaction_state(txn) == Ok(slabkv::TxnState::Active) {
        engine.abort(txn)?;
    }
    result
}
