// =============================================================================
// SAFEHORIZON — Load Test Tool
// =============================================================================
// Mints tourist JWTs, posts location-update bodies to the ingest endpoint at
// configurable rates and geometry, and reports acceptance counters.
// =============================================================================

use clap::Parser;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "safehorizon-loadtest")]
#[command(about = "Load test tool for the SafeHorizon backend")]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Signing secret; must match the server's JWT_SECRET
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Updates per second
    #[arg(long, default_value_t = 100)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Number of distinct simulated tourists
    #[arg(long, default_value_t = 10)]
    tourists: usize,

    /// Center latitude (degrees)
    #[arg(long, default_value_t = 28.6139)]
    lat: f64,

    /// Center longitude (degrees)
    #[arg(long, default_value_t = 77.2090)]
    lon: f64,
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    role: &'static str,
    exp: i64,
}

struct Counters {
    sent: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    not_found: AtomicU64,
    unavailable: AtomicU64,
    network_error: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }
}

fn mint_token(secret: &str, tourist_id: &str) -> String {
    let claims = Claims {
        sub: tourist_id.to_string(),
        role: "tourist",
        exp: chrono::Utc::now().timestamp() + 24 * 3600,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .expect("token encode")
}

fn build_body(rng: &mut impl Rng, lat: f64, lon: f64) -> serde_json::Value {
    // Scatter positions ~1 km around the center.
    serde_json::json!({
        "lat": lat + rng.gen_range(-0.01..0.01),
        "lon": lon + rng.gen_range(-0.01..0.01),
        "speed": rng.gen_range(0.0..3.0),
        "accuracy": rng.gen_range(3.0..50.0),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

fn main() {
    let args = Args::parse();

    println!("=== SafeHorizon Load Test ===");
    println!("Target:   {}/api/location/update", args.url);
    println!("Rate:     {} upd/s", args.rate);
    println!("Duration: {}s", args.duration);
    println!("Tourists: {}", args.tourists);
    println!("Center:   lat={} lon={}", args.lat, args.lon);
    println!();

    // Pre-mint one token per simulated tourist. Tourist rows must already
    // exist (ids LT-0000..LT-NNNN) or every post will 404.
    let tokens: Vec<String> = (0..args.tourists)
        .map(|i| mint_token(&args.jwt_secret, &format!("LT-{i:04}")))
        .collect();
    println!("Minted {} tourist tokens", tokens.len());

    let health_url = format!("{}/health", args.url);
    match reqwest::blocking::get(&health_url) {
        Ok(r) if r.status().is_success() => println!("Server health: OK"),
        Ok(r) => {
            eprintln!("Server health check failed: {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot reach server: {}", e);
            std::process::exit(1);
        }
    }

    let counters = Arc::new(Counters::new());
    let update_url = format!("{}/api/location/update", args.url);

    let interval = Duration::from_micros(1_000_000 / args.rate as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("\nSending...\n");
    let start = Instant::now();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let mut rng = rand::thread_rng();
    let mut tick = 0u64;

    while Instant::now() < deadline {
        let token = &tokens[(tick as usize) % tokens.len()];
        let body = build_body(&mut rng, args.lat, args.lon);

        let req_start = Instant::now();
        counters.sent.fetch_add(1, Ordering::Relaxed);

        match client.post(&update_url).bearer_auth(token).json(&body).send() {
            Ok(resp) => {
                let us = req_start.elapsed().as_micros() as u64;
                counters.latency_sum_us.fetch_add(us, Ordering::Relaxed);

                match resp.status().as_u16() {
                    200 => {
                        counters.accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    404 => {
                        counters.not_found.fetch_add(1, Ordering::Relaxed);
                        if tick < 5 {
                            eprintln!("404 — seed tourist rows for LT-#### ids first");
                        }
                    }
                    503 => {
                        counters.unavailable.fetch_add(1, Ordering::Relaxed);
                    }
                    other => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                        if tick < 5 {
                            eprintln!("Unexpected status: {}", other);
                        }
                    }
                }
            }
            Err(_) => {
                counters.network_error.fetch_add(1, Ordering::Relaxed);
            }
        }

        tick += 1;

        // Print progress every 500 updates
        if tick % 500 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!(
                "  [{:.1}s] sent={} accepted={} rejected={} not_found={} unavailable={} err={} ({:.0} upd/s)",
                elapsed,
                sent,
                counters.accepted.load(Ordering::Relaxed),
                counters.rejected.load(Ordering::Relaxed),
                counters.not_found.load(Ordering::Relaxed),
                counters.unavailable.load(Ordering::Relaxed),
                counters.network_error.load(Ordering::Relaxed),
                sent as f64 / elapsed,
            );
        }

        // Rate limiting
        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            std::thread::sleep(target - actual);
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    let accepted = counters.accepted.load(Ordering::Relaxed);
    let avg_lat = if sent > 0 {
        counters.latency_sum_us.load(Ordering::Relaxed) / sent
    } else {
        0
    };

    println!("\n=== Results ===");
    println!("Duration:     {:.2}s", elapsed.as_secs_f64());
    println!("Total sent:   {}", sent);
    println!("Accepted:     {} ({:.1}%)", accepted, accepted as f64 / sent.max(1) as f64 * 100.0);
    println!("Rejected:     {}", counters.rejected.load(Ordering::Relaxed));
    println!("Not found:    {}", counters.not_found.load(Ordering::Relaxed));
    println!("Unavailable:  {}", counters.unavailable.load(Ordering::Relaxed));
    println!("Net errors:   {}", counters.network_error.load(Ordering::Relaxed));
    println!("Avg latency:  {} us", avg_lat);
    println!("Throughput:   {:.1} upd/s", sent as f64 / elapsed.as_secs_f64());
}
