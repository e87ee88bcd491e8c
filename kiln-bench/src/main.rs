//! # Cache Load Harness
//!
//! Purpose: Provide a repeatable load driver for the cache client so its
//! pooling and admission behavior can be measured over time without a live
//! backend.
//!
//! ## Design Principles
//! 1. **Stress Profile Fidelity**: Waves of many small concurrent GETs
//!    mirror how the exec service fans out per-file cache lookups.
//! 2. **Self-Contained**: The fake backend answers every request, so runs
//!    need no external dependency.
//! 3. **Observable Output**: Throughput, errors, peak connections, and a
//!    full metrics snapshot are printed for comparison between runs.

use std::env;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use kiln_cache::{CacheClient, ClientOptions};
use kiln_testsrv::FakeBackend;

const DEFAULT_WAVES: usize = 8;
const DEFAULT_REQUESTS_PER_WAVE: usize = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct BenchConfig {
    waves: usize,
    requests_per_wave: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            waves: parse_usize(args.next(), DEFAULT_WAVES),
            requests_per_wave: parse_usize(args.next(), DEFAULT_REQUESTS_PER_WAVE),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = BenchConfig::from_args();
    let backend = FakeBackend::start().await?;
    let client = CacheClient::new(
        backend.addr().to_string(),
        ClientOptions {
            prefix: "bench:".to_string(),
            ..ClientOptions::default()
        },
    );
    info!(
        addr = %backend.addr(),
        waves = config.waves,
        requests_per_wave = config.requests_per_wave,
        "starting load"
    );

    let start = Instant::now();
    let mut errors = 0usize;
    let mut waves = Vec::with_capacity(config.waves);
    for wave in 0..config.waves {
        let client = client.clone();
        let per_wave = config.requests_per_wave;
        waves.push(tokio::spawn(async move {
            let mut requests = Vec::with_capacity(per_wave);
            for i in 0..per_wave {
                let client = client.clone();
                let key = format!("object-{wave}-{i}");
                requests.push(tokio::spawn(async move {
                    matches!(
                        tokio::time::timeout(REQUEST_TIMEOUT, client.get(&key)).await,
                        Ok(Ok(_))
                    )
                }));
            }
            let mut failed = 0usize;
            for request in requests {
                if !request.await.unwrap_or(false) {
                    failed += 1;
                }
            }
            failed
        }));
    }
    for wave in waves {
        errors += wave.await?;
    }
    let elapsed = start.elapsed();

    let total = config.waves * config.requests_per_wave;
    report("GET", total, elapsed);
    println!("errors: {errors}");
    println!("peak backend connections: {}", backend.peak_connections());
    let snapshot = client.metrics().snapshot();
    println!("metrics: {}", serde_json::to_string_pretty(&snapshot)?);

    client.close();
    backend.shutdown();
    Ok(())
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s)");
}
