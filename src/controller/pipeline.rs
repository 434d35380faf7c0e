//! Sample → classify → reconcile loops
//!
//! The sampler and the reconciler are joined either by an in-process FIFO
//! channel ([`run_in_process`]) or by a line-oriented text stream between two
//! processes ([`produce_lines`] on one side, [`consume_lines`] on the other).
//! Records are handled strictly in order and never dropped. A failed tick is
//! logged and the loop waits for the next record.

use std::future::Future;
use std::io;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::reconciler::{Reconciler, TickReport};
use crate::classifier::classify;
use crate::config::ThresholdConfig;
use crate::error::Result;
use crate::monitor::{parse_status_line, Sampler, StatusRecord, TelemetrySource};
use crate::node::NodeClient;

/// Records buffered between the sampling task and the reconciler
pub const CHANNEL_CAPACITY: usize = 16;

/// Counters for a finished loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Ticks reconciled
    pub ticks: u64,
    /// Ticks where at least one call failed
    pub failed_ticks: u64,
    /// Records or lines skipped before classification
    pub skipped: u64,
}

impl LoopStats {
    fn count(&mut self, report: &TickReport) {
        self.ticks += 1;
        if !report.is_success() {
            self.failed_ticks += 1;
        }
    }
}

/// Classify one record and reconcile the node to the result
pub async fn run_tick<C: NodeClient>(
    reconciler: &mut Reconciler<C>,
    config: &ThresholdConfig,
    record: &StatusRecord,
) -> TickReport {
    let decision = classify(record, config);
    debug!(
        idle = record.idle,
        power_ok = record.power_ok,
        container_cpu_ratio = record.container_cpu_ratio,
        %decision,
        "Classified status record"
    );
    reconciler.reconcile(decision).await
}

/// Run sampler and reconciler in this process until `shutdown` resolves.
///
/// Sampling happens on its own task so that a slow control-plane call never
/// delays the next measurement. A tick that has started always finishes
/// before shutdown is honored.
pub async fn run_in_process<S, C, F>(
    sampler: Sampler<S>,
    reconciler: &mut Reconciler<C>,
    config: Arc<ThresholdConfig>,
    shutdown: F,
) -> Result<LoopStats>
where
    S: TelemetrySource + 'static,
    C: NodeClient,
    F: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::channel::<StatusRecord>(CHANNEL_CAPACITY);

    let producer = tokio::spawn(async move {
        let records = sampler.into_stream();
        futures::pin_mut!(records);
        while let Some(item) = records.next().await {
            match item {
                Ok(record) => {
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
                // already logged by the sampler
                Err(_) => continue,
            }
        }
    });

    let mut stats = LoopStats::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping reconciliation loop");
                break;
            }
            received = rx.recv() => match received {
                Some(record) => {
                    let report = run_tick(reconciler, &config, &record).await;
                    stats.count(&report);
                }
                None => {
                    warn!("Sampler stopped, stopping reconciliation loop");
                    break;
                }
            }
        }
    }

    producer.abort();
    Ok(stats)
}

/// Reconcile from status lines until the reader reaches EOF or `shutdown`
/// resolves. Malformed lines are logged and skipped.
pub async fn consume_lines<R, C, F>(
    reader: R,
    reconciler: &mut Reconciler<C>,
    config: &ThresholdConfig,
    shutdown: F,
) -> Result<LoopStats>
where
    R: AsyncBufRead + Unpin,
    C: NodeClient,
    F: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut stats = LoopStats::default();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping status line consumer");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Status stream closed");
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("Skipping status line that is not UTF-8: {}", e);
                stats.skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match parse_status_line(&line) {
            Ok(Some(record)) => {
                let report = run_tick(reconciler, config, &record).await;
                stats.count(&report);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping status line '{}': {}", line.trim(), e);
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

/// Write one status line per sample until `shutdown` resolves.
///
/// Each line is flushed immediately so the consumer sees it without delay.
/// Failed samples produce no line.
pub async fn produce_lines<S, W, F>(
    sampler: Sampler<S>,
    mut writer: W,
    shutdown: F,
) -> Result<LoopStats>
where
    S: TelemetrySource + 'static,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let records = sampler.into_stream();
    futures::pin_mut!(records);
    tokio::pin!(shutdown);
    let mut stats = LoopStats::default();

    loop {
        let item = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping monitor");
                break;
            }
            item = records.next() => item,
        };

        match item {
            Some(Ok(record)) => {
                writer.write_all(format!("{record}\n").as_bytes()).await?;
                writer.flush().await?;
                stats.ticks += 1;
            }
            Some(Err(_)) => stats.skipped += 1,
            None => break,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::monitor::{BatteryReading, RawSample};
    use crate::node::fake::NodeCall;
    use crate::node::{busy_taint, FakeNodeClient, NodeState};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    const NODE: &str = "laptop";

    /// Replays scripted samples, then waits forever
    struct ScriptedTelemetry {
        samples: VecDeque<Result<RawSample>>,
    }

    #[async_trait]
    impl TelemetrySource for ScriptedTelemetry {
        async fn read(&mut self, _window: Duration) -> Result<RawSample> {
            match self.samples.pop_front() {
                Some(sample) => sample,
                None => std::future::pending().await,
            }
        }
    }

    fn config() -> Arc<ThresholdConfig> {
        Arc::new(ThresholdConfig {
            sample_interval: Duration::from_millis(5),
            measurement_window: Duration::from_millis(1),
            ..Default::default()
        })
    }

    fn raw(cpu: f64, battery_percent: Option<f64>) -> RawSample {
        RawSample {
            cpu_percent: cpu,
            container_cpu: 0.0,
            total_process_cpu: 0.0,
            battery: battery_percent.map(|percent| BatteryReading {
                percent,
                plugged_in: false,
            }),
        }
    }

    #[tokio::test]
    async fn test_consume_lines_skips_malformed_and_continues() {
        let fake = FakeNodeClient::with_node(NODE, NodeState::default());
        let mut reconciler = Reconciler::new(fake.clone(), NODE);
        let input = "idle=false power_ok=true\n\
                     garbage\n\
                     \n\
                     idle=maybe power_ok=true\n\
                     idle=true power_ok=true vmem_cpu=3.0\n";

        let stats = consume_lines(
            input.as_bytes(),
            &mut reconciler,
            &ThresholdConfig::default(),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.failed_ticks, 0);

        // busy first, then idle, in line order
        let calls = fake.calls();
        assert_eq!(calls[1], NodeCall::AddTaint(busy_taint()));
        assert_eq!(calls.last(), Some(&NodeCall::RemoveTaint(busy_taint())));

        let state = fake.node(NODE).unwrap();
        assert_eq!(state.label("idle"), Some("true"));
        assert!(state.taints.is_empty());
    }

    #[tokio::test]
    async fn test_consume_lines_counts_failed_ticks() {
        let fake = FakeNodeClient::new();
        let mut reconciler = Reconciler::new(fake, "missing");

        let stats = consume_lines(
            "idle=false power_ok=false\nidle=false power_ok=false\n".as_bytes(),
            &mut reconciler,
            &ThresholdConfig::default(),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.failed_ticks, 2);
    }

    #[tokio::test]
    async fn test_in_process_pipeline_converges_to_latest_sample() {
        let fake = FakeNodeClient::with_node(NODE, NodeState::default());
        let mut reconciler = Reconciler::new(fake.clone(), NODE);
        let source = ScriptedTelemetry {
            samples: VecDeque::from(vec![
                Ok(raw(90.0, None)),
                Err(Error::TelemetryError("sensor glitch".to_string())),
                Ok(raw(3.0, Some(20.0))),
                Ok(raw(3.0, Some(95.0))),
            ]),
        };
        let config = config();
        let sampler = Sampler::new(source, config.clone());

        let stats = run_in_process(
            sampler,
            &mut reconciler,
            config,
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();

        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.failed_ticks, 0);
        let state = fake.node(NODE).unwrap();
        assert_eq!(state.label("idle"), Some("true"));
        assert!(state.taints.is_empty());
    }

    #[tokio::test]
    async fn test_produce_lines_writes_one_line_per_sample() {
        let source = ScriptedTelemetry {
            samples: VecDeque::from(vec![
                Ok(raw(5.0, None)),
                Err(Error::TelemetryError("sensor glitch".to_string())),
                Ok(raw(55.0, Some(10.0))),
            ]),
        };
        let mut out = Vec::new();

        let stats = produce_lines(
            Sampler::new(source, config()),
            &mut out,
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();

        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.skipped, 1);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("idle=true power_ok=true cpu=5.0"));
        assert!(lines[1].starts_with("idle=false power_ok=false cpu=55.0"));
    }
}
