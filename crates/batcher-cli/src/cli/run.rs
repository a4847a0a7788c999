//! `batcher run`: stdin -> event bus -> consumer tasks.
//!
//! The reader publishes one `PipelineEvent::Line` per input line and a final
//! `EndOfInput`, then closes the bus. Each consumer owns one subscription and
//! stops when its stream ends. A shutdown signal stops the reader early; the
//! bus is closed the same way.

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use batcher_core::event::{Bus, Subscription};
use batcher_core::shutdown::{ShutdownContext, ShutdownError};
use batcher_types::config::BatcherConfig;
use batcher_types::event::PipelineEvent;

/// What one consumer saw before its stream closed.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberSummary {
    pub index: usize,
    pub id: String,
    pub received: u64,
    pub dropped: u64,
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub lines: u64,
    pub events_published: u64,
    pub capacity: usize,
    pub subscribers: Vec<SubscriberSummary>,
    /// Set when a signal or cancellation cut the input short.
    pub interrupted: Option<String>,
}

/// Run the pipeline over stdin and print a summary.
///
/// Returns the process exit code to use when a signal ended the run.
pub async fn run(config: &BatcherConfig, json: bool) -> Result<Option<i32>> {
    let root = CancellationToken::new();
    let shutdown =
        ShutdownContext::install(&root).context("failed to install signal handlers")?;

    let summary = run_pipeline(config, tokio::io::stdin(), &shutdown).await?;
    let exit_code = match shutdown.err() {
        Some(ShutdownError::Signal(err)) => Some(err.exit_code()),
        _ => None,
    };
    shutdown.cancel();

    print_summary(&summary, json)?;
    Ok(exit_code)
}

/// Wire the bus, spawn consumers and pump `input` through it.
pub async fn run_pipeline<R>(
    config: &BatcherConfig,
    input: R,
    shutdown: &ShutdownContext,
) -> Result<RunSummary>
where
    R: AsyncRead + Unpin,
{
    let bus: Bus<PipelineEvent> = Bus::new();

    let mut consumers = Vec::with_capacity(config.bus.subscribers);
    for index in 0..config.bus.subscribers {
        let subscription = bus.subscribe(config.bus.capacity)?;
        consumers.push(tokio::spawn(consume(index, subscription)));
    }
    info!(
        subscribers = config.bus.subscribers,
        capacity = config.bus.capacity,
        "event bus ready"
    );

    let pumped = pump_lines(input, &bus, shutdown).await;

    // Closing ends every consumer stream, whether or not pumping succeeded.
    bus.close()?;
    let mut subscribers = Vec::with_capacity(consumers.len());
    for consumer in consumers {
        subscribers.push(consumer.await.context("consumer task failed")?);
    }
    let lines = pumped?;

    let interrupted = shutdown.err().map(|err| err.to_string());
    info!(lines, interrupted = ?interrupted, "pipeline finished");

    Ok(RunSummary {
        lines,
        events_published: bus.events_published(),
        capacity: config.bus.capacity,
        subscribers,
        interrupted,
    })
}

/// Publish every line of `input`, then `EndOfInput`.
///
/// Stops without publishing `EndOfInput` if `shutdown` is cancelled.
/// Returns the number of lines published.
async fn pump_lines<R>(
    input: R,
    bus: &Bus<PipelineEvent>,
    shutdown: &ShutdownContext,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut seq = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!(lines = seq, "input interrupted by shutdown");
                return Ok(seq);
            }
            next = lines.next_line() => next.context("failed to read input")?,
        };
        let Some(text) = next else { break };

        seq += 1;
        let delivery = bus.publish(PipelineEvent::Line {
            seq,
            text,
            received_at: Utc::now(),
        })?;
        if delivery.dropped > 0 {
            debug!(seq, dropped = delivery.dropped, "line dropped for slow subscribers");
        }
    }

    bus.publish(PipelineEvent::EndOfInput { total: seq })?;
    Ok(seq)
}

async fn consume(index: usize, subscription: Subscription<PipelineEvent>) -> SubscriberSummary {
    let mut received = 0u64;
    while let Some(event) = subscription.recv_async().await {
        received += 1;
        match &event {
            PipelineEvent::Line { seq, text, .. } => {
                debug!(subscriber = index, seq, text = %text, "line received");
            }
            PipelineEvent::EndOfInput { total } => {
                info!(subscriber = index, total, "end of input");
            }
        }
    }

    SubscriberSummary {
        index,
        id: subscription.id().to_string(),
        received,
        dropped: subscription.dropped(),
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", render_json(summary)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} lines, {} events published (capacity {})",
        style("⚡").bold(),
        style(summary.lines).bold(),
        summary.events_published,
        summary.capacity
    );
    if let Some(reason) = &summary.interrupted {
        println!("  {} {}", style("!").yellow().bold(), style(reason).yellow());
    }
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Subscription").fg(Color::White),
        Cell::new("Received").fg(Color::White),
        Cell::new("Dropped").fg(Color::White),
    ]);

    for subscriber in &summary.subscribers {
        let dropped = if subscriber.dropped > 0 {
            Cell::new(subscriber.dropped).fg(Color::Yellow)
        } else {
            Cell::new(subscriber.dropped).fg(Color::Green)
        };
        table.add_row(vec![
            Cell::new(subscriber.index),
            Cell::new(&subscriber.id).fg(Color::DarkGrey),
            Cell::new(subscriber.received),
            dropped,
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

/// The `--json` document; stdout carries nothing else in that mode.
fn render_json(summary: &RunSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}
