// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! msgchunk-stress - Stress and diagnostic tool for msgchunk
//!
//! Drives producers and a consumer over the in-memory loopback broker and
//! reports delivered, lost, evicted and expired counts.

use clap::{Parser, Subcommand};
use msgchunk::chunk::{ChunkGroupKey, ChunkSplitter};
use msgchunk::config::{
    ConsumerConfig, ProducerConfig, CHUNK_METADATA_OVERHEAD, DEFAULT_MAX_MESSAGE_SIZE,
};
use msgchunk::transport::{Frame, FrameSink, LoopbackBroker, SendMode};
use msgchunk::{ChunkMetricsSnapshot, Consumer, MessageMetadata, Producer, ProducerMessage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// msgchunk stress testing tool
#[derive(Parser, Debug)]
#[command(name = "msgchunk-stress")]
#[command(version = "0.1.0")]
#[command(about = "Stress test message chunking and reassembly")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Broker maximum frame size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE, global = true)]
    max_frame_size: usize,

    /// YAML file with producer/consumer sections (overrides defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Concurrent producers, every message chunked and reassembled
    Roundtrip {
        /// Number of producers
        #[arg(short, long, default_value = "4")]
        producers: usize,

        /// Messages per producer
        #[arg(short, long, default_value = "100")]
        messages: usize,

        /// Payload size in bytes
        #[arg(short, long, default_value = "65536")]
        size: usize,

        /// Chunk payload size in bytes
        #[arg(long, default_value = "4096")]
        chunk_size: usize,
    },

    /// Interleaved producers against a small registry (expect evictions)
    Overload {
        /// Number of producers
        #[arg(short, long, default_value = "5")]
        producers: usize,

        /// Messages per producer
        #[arg(short, long, default_value = "40")]
        messages: usize,

        /// Chunk payload size in bytes
        #[arg(long, default_value = "10")]
        chunk_size: usize,

        /// Registry capacity
        #[arg(long, default_value = "1")]
        capacity: usize,
    },

    /// Incomplete groups left to expire
    Expiry {
        /// Incomplete groups to create
        #[arg(short = 'n', long, default_value = "100")]
        groups: usize,

        /// Group TTL in milliseconds
        #[arg(long, default_value = "300")]
        ttl_ms: u64,
    },

    /// Sustained chunked traffic at a fixed rate
    Soak {
        /// Duration in seconds
        #[arg(short, long, default_value = "60")]
        duration: u64,

        /// Message rate (msg/s)
        #[arg(short, long, default_value = "100")]
        rate: u64,

        /// Payload size in bytes
        #[arg(short, long, default_value = "262144")]
        size: usize,
    },
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let (producer_base, consumer_base) = load_configs(args.config.as_ref())?;
    let setup = Setup {
        max_frame_size: args.max_frame_size,
        producer: producer_base,
        consumer: consumer_base,
    };

    match &args.mode {
        Mode::Roundtrip {
            producers,
            messages,
            size,
            chunk_size,
        } => run_roundtrip(&setup, *producers, *messages, *size, *chunk_size),
        Mode::Overload {
            producers,
            messages,
            chunk_size,
            capacity,
        } => run_overload(&setup, *producers, *messages, *chunk_size, *capacity),
        Mode::Expiry { groups, ttl_ms } => run_expiry(&setup, *groups, *ttl_ms),
        Mode::Soak {
            duration,
            rate,
            size,
        } => run_soak(&setup, *duration, *rate, *size),
    }
}

struct Setup {
    max_frame_size: usize,
    producer: ProducerConfig,
    consumer: ConsumerConfig,
}

impl Setup {
    fn producer_config(&self, name: &str, chunk_size: Option<usize>) -> ProducerConfig {
        let mut cfg = self.producer.clone();
        cfg.producer_name = name.to_string();
        cfg.enable_chunking = true;
        cfg.disable_batching = true;
        if chunk_size.is_some() {
            cfg.chunk_max_message_size = chunk_size;
        }
        cfg
    }
}

fn load_configs(
    path: Option<&PathBuf>,
) -> Result<(ProducerConfig, ConsumerConfig), Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok((
            ProducerConfig::default()
                .enable_chunking(true)
                .disable_batching(true),
            ConsumerConfig::default(),
        ));
    };
    let doc = msgchunk::config::ClientConfigDocument::load_from_file(path)?;
    println!("Loaded configuration from {}", path.display());
    Ok((doc.producer_config()?, doc.consumer_config()?))
}

/// Drain the consumer until `expected` messages arrived or the queue stays quiet.
fn drain(consumer: &Consumer, expected: u64, quiet: Duration) -> u64 {
    let mut received = 0u64;
    while received < expected {
        match consumer.receive_timeout(quiet) {
            Ok(msg) => {
                let _ = consumer.ack(&msg);
                received += 1;
            }
            Err(_) => break,
        }
    }
    received
}

fn print_metrics(m: &ChunkMetricsSnapshot) {
    println!("  Chunks received:    {}", m.chunks_received);
    println!("  Groups reassembled: {}", m.messages_reassembled);
    println!("  Bytes reassembled:  {}", m.bytes_reassembled);
    println!("  Groups evicted:     {}", m.groups_evicted);
    println!("  Groups expired:     {}", m.groups_expired);
    println!("  Groups corrupt:     {}", m.groups_corrupt);
    println!("  Orphan chunks:      {}", m.orphan_chunks);
    println!("  Invalid frames:     {}", m.invalid_frames);
}

fn run_roundtrip(
    setup: &Setup,
    producers: usize,
    messages: usize,
    size: usize,
    chunk_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "=== msgchunk Roundtrip: {} producers x {} messages of {} bytes ===\n",
        producers, messages, size
    );

    let broker = LoopbackBroker::new(setup.max_frame_size);
    let consumer = Consumer::new(setup.consumer.clone(), Arc::new(broker.clone()))?;
    broker.subscribe(consumer.handler());
    let _dispatcher = broker.start_dispatcher(Duration::from_millis(1))?;

    let start = Instant::now();
    let failures = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();
    for p in 0..producers {
        let name = format!("stress-{}", p);
        let cfg = setup.producer_config(&name, Some(chunk_size));
        let link = broker.create_producer_link(&name, cfg.max_pending_messages)?;
        let producer = Producer::new(cfg, link)?;
        let failures = failures.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..messages {
                let payload = vec![(i % 251) as u8; size];
                if producer.send(ProducerMessage::new(payload)).is_err() {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    let expected = (producers * messages) as u64;
    let received = drain(&consumer, expected, Duration::from_secs(2));
    for h in handles {
        let _ = h.join();
    }
    let elapsed = start.elapsed();

    println!("=== Results ===");
    println!("  Duration: {:?}", elapsed);
    println!("  Sent: {} (failed: {})", expected, failures.load(Ordering::Relaxed));
    println!("  Received: {}", received);
    println!(
        "  Throughput: {:.1} MiB/s",
        (received as f64 * size as f64) / (1024.0 * 1024.0) / elapsed.as_secs_f64()
    );
    print_metrics(&consumer.metrics());

    if received == expected {
        println!("\n  All messages delivered.");
    }
    Ok(())
}

fn run_overload(
    setup: &Setup,
    producers: usize,
    messages: usize,
    chunk_size: usize,
    capacity: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "=== msgchunk Overload: {} producers, registry capacity {} ===\n",
        producers, capacity
    );

    let broker = LoopbackBroker::new(setup.max_frame_size);
    let consumer = Consumer::new(
        setup
            .consumer
            .clone()
            .max_pending_chunked_message(capacity),
        Arc::new(broker.clone()),
    )?;
    broker.subscribe(consumer.handler());

    // Queue everything first so dispatch interleaves the producers' groups.
    let mut sent = 0u64;
    for p in 0..producers {
        let name = format!("overload-{}", p);
        let cfg = setup
            .producer_config(&name, Some(chunk_size))
            .max_pending_messages(usize::MAX / 2);
        let link = broker.create_producer_link(&name, messages * 64)?;
        let producer = Producer::new(cfg, link)?;
        for i in 0..messages {
            let payload = format!("chunk-{}-{}|", p, i).into_bytes();
            producer.send(ProducerMessage::new(payload))?;
            sent += 1;
        }
    }
    println!("  Queued {} messages ({} frames)", sent, broker.pending_frames());

    broker.dispatch();
    let received = drain(&consumer, sent, Duration::from_millis(200));

    println!("\n=== Results ===");
    println!("  Sent: {}", sent);
    println!("  Received: {}", received);
    println!("  Lost: {}", sent - received);
    print_metrics(&consumer.metrics());
    Ok(())
}

fn run_expiry(setup: &Setup, groups: usize, ttl_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "=== msgchunk Expiry: {} incomplete groups, TTL {}ms ===\n",
        groups, ttl_ms
    );

    let ttl = Duration::from_millis(ttl_ms);
    let broker = LoopbackBroker::new(setup.max_frame_size);
    let consumer = Consumer::new(
        setup
            .consumer
            .clone()
            .max_pending_chunked_message(groups.max(1))
            .expire_time_of_incomplete_chunk(ttl),
        Arc::new(broker.clone()),
    )?;
    broker.subscribe(consumer.handler());

    let link = broker.create_producer_link("expiry", groups.max(1))?;
    let splitter = ChunkSplitter::resolve(Some(16), setup.max_frame_size, CHUNK_METADATA_OVERHEAD)?;
    for seq in 0..groups as u64 {
        let frames = splitter.split(
            &[0u8; 64],
            ChunkGroupKey::for_message("expiry", seq),
            MessageMetadata::new("expiry", seq),
        )?;
        // First chunk only: the group can never complete.
        if let Some(first) = frames.into_iter().next() {
            link.enqueue(Frame::Chunk(first), SendMode::Blocking)?;
        }
    }
    broker.dispatch();
    println!("  Pending groups after dispatch: {}", consumer.pending_chunked_messages());

    let start = Instant::now();
    while consumer.pending_chunked_messages() > 0 && start.elapsed() < ttl * 10 {
        std::thread::sleep(Duration::from_millis(10));
    }

    println!("\n=== Results ===");
    println!("  Pending groups: {}", consumer.pending_chunked_messages());
    println!("  Reclaimed after: {:?}", start.elapsed());
    print_metrics(&consumer.metrics());
    Ok(())
}

fn run_soak(
    setup: &Setup,
    duration_secs: u64,
    rate: u64,
    size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "=== msgchunk Soak: {}s @ {} msg/s, {} bytes ===\n",
        duration_secs, rate, size
    );

    let broker = LoopbackBroker::new(setup.max_frame_size);
    let consumer = Arc::new(Consumer::new(setup.consumer.clone(), Arc::new(broker.clone()))?);
    broker.subscribe(consumer.handler());
    let _dispatcher = broker.start_dispatcher(Duration::from_millis(1))?;

    let cfg = setup.producer_config("soak", None);
    let link = broker.create_producer_link("soak", cfg.max_pending_messages)?;
    let producer = Producer::new(cfg, link)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    println!("  Press Ctrl+C to stop early\n");

    let received = Arc::new(AtomicU64::new(0));
    let reader = {
        let consumer = consumer.clone();
        let received = received.clone();
        let running = running.clone();
        std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) || consumer.queued() > 0 {
                if let Ok(msg) = consumer.receive_timeout(Duration::from_millis(100)) {
                    let _ = consumer.ack(&msg);
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    };

    let payload = vec![0u8; size];
    let interval = Duration::from_micros(1_000_000 / rate.max(1));
    let start = Instant::now();
    let end_time = start + Duration::from_secs(duration_secs);
    let mut sent = 0u64;
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) && Instant::now() < end_time {
        producer.send(ProducerMessage::new(payload.clone()))?;
        sent += 1;

        if last_report.elapsed() >= Duration::from_secs(5) {
            println!(
                "  [{:>6}s] Sent: {}, received: {}, pending groups: {}",
                start.elapsed().as_secs(),
                sent,
                received.load(Ordering::Relaxed),
                consumer.pending_chunked_messages()
            );
            last_report = Instant::now();
        }

        spin_sleep::sleep(interval);
    }

    std::thread::sleep(Duration::from_millis(500));
    running.store(false, Ordering::SeqCst);
    let _ = reader.join();

    let elapsed = start.elapsed();
    println!("\n=== Results ===");
    println!("  Duration: {:?}", elapsed);
    println!("  Sent: {}", sent);
    println!("  Received: {}", received.load(Ordering::Relaxed));
    println!("  Acked frames: {}", broker.acked_count());
    print_metrics(&consumer.metrics());

    #[cfg(target_os = "linux")]
    {
        println!("\n  Memory usage:");
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") || line.starts_with("VmHWM:") {
                    println!("    {}", line.trim());
                }
            }
        }
    }

    Ok(())
}
