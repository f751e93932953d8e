//! Load Engine
//!
//! Run-to-completion workers, one pipeline replica each, pushing generated
//! traffic through the configured stages and reporting what it cost.

use crate::batch::PacketBatch;
use crate::config::{ConfigError, EngineConfig, ProcessingMode};
use crate::pipeline::Pipeline;
use crate::stats::StageStatsSnapshot;
use crate::traffic::TrafficGen;
use crossbeam::channel::{unbounded, Sender};
use sase_common::SynthError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `run` called while a run is in progress
    #[error("engine already running")]
    AlreadyRunning,

    /// OS refused a worker thread
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    /// Worker thread panicked
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<EngineError> for SynthError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(c) => c.into(),
            other => SynthError::Engine(other.to_string()),
        }
    }
}

/// Cloneable handle that asks running workers to finish early
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask workers to stop after the current packet or batch
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// True while a run is in progress
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What one worker pushed and what survived
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    /// Worker index
    pub worker_id: usize,
    /// Packets generated
    pub packets_in: u64,
    /// Packets that left the last stage
    pub packets_out: u64,
    /// Wall time spent in the loop
    pub elapsed: Duration,
    /// Per-stage counters of this replica
    pub stages: Vec<StageStatsSnapshot>,
}

/// Aggregate over all workers
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    /// Workers that reported
    pub workers: usize,
    /// Processing mode used
    pub mode: ProcessingMode,
    /// Packets generated
    pub packets_in: u64,
    /// Packets forwarded by the whole pipeline
    pub packets_out: u64,
    /// Packets dropped by any stage
    pub dropped: u64,
    /// Run duration
    pub elapsed_secs: f64,
    /// Per-stage counters summed over workers
    pub stages: Vec<StageStatsSnapshot>,
}

impl EngineReport {
    fn aggregate(config: &EngineConfig, reports: &[WorkerReport], elapsed: Duration) -> Self {
        let mut stages: Vec<StageStatsSnapshot> = Vec::new();
        for report in reports {
            if stages.is_empty() {
                stages = report.stages.clone();
                continue;
            }
            for (total, s) in stages.iter_mut().zip(&report.stages) {
                total.merge(s);
            }
        }
        let packets_in: u64 = reports.iter().map(|r| r.packets_in).sum();
        let packets_out: u64 = reports.iter().map(|r| r.packets_out).sum();

        Self {
            workers: reports.len(),
            mode: config.mode,
            packets_in,
            packets_out,
            dropped: packets_in - packets_out,
            elapsed_secs: elapsed.as_secs_f64(),
            stages,
        }
    }

    /// Packet rate in Mpps over the whole run
    pub fn packet_rate_mpps(&self) -> f64 {
        if self.elapsed_secs == 0.0 {
            return 0.0;
        }
        self.packets_in as f64 / (self.elapsed_secs * 1_000_000.0)
    }
}

/// Synthetic load engine
pub struct LoadEngine {
    config: EngineConfig,
    pipeline: Pipeline,
    running: Arc<AtomicBool>,
}

impl LoadEngine {
    /// `pipeline` is the template every worker replicates
    pub fn new(config: EngineConfig, pipeline: Pipeline) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            pipeline,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle usable from other threads to end a run early
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    /// True while `run` is executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run all workers to completion (or until stopped) and aggregate
    pub fn run(&mut self) -> Result<EngineReport, EngineError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyRunning);
        }
        let result = self.run_workers();
        self.running.store(false, Ordering::Release);
        result
    }

    fn run_workers(&self) -> Result<EngineReport, EngineError> {
        let (tx, rx) = unbounded();
        let started = Instant::now();
        let mut handles = Vec::with_capacity(self.config.workers);

        tracing::info!(
            workers = self.config.workers,
            mode = ?self.config.mode,
            stages = self.pipeline.stage_count(),
            "Load engine started"
        );

        for worker_id in 0..self.config.workers {
            let worker = Worker {
                id: worker_id,
                config: self.config.clone(),
                pipeline: self.pipeline.replicate(),
                running: self.running.clone(),
                reports: tx.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("synth-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;
            handles.push((worker_id, handle));
        }
        drop(tx);

        for (worker_id, handle) in handles {
            handle.join().map_err(|_| EngineError::WorkerPanicked(worker_id))?;
        }
        let mut reports: Vec<WorkerReport> = rx.iter().collect();
        reports.sort_by_key(|r| r.worker_id);

        let report = EngineReport::aggregate(&self.config, &reports, started.elapsed());
        tracing::info!(
            packets = report.packets_in,
            dropped = report.dropped,
            mpps = report.packet_rate_mpps(),
            "Load engine stopped"
        );
        Ok(report)
    }
}

/// Per-thread worker
struct Worker {
    id: usize,
    config: EngineConfig,
    pipeline: Pipeline,
    running: Arc<AtomicBool>,
    reports: Sender<WorkerReport>,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!("Worker {} starting", self.id);
        let mut traffic = TrafficGen::new(self.config.packet_len, self.config.shared_frames);
        let total = self.config.packets_per_worker;
        let started = Instant::now();
        let mut forwarded = 0u64;

        while traffic.sent() < total && self.running.load(Ordering::Relaxed) {
            forwarded += match self.config.mode {
                ProcessingMode::Single => {
                    self.pipeline.push(traffic.next_packet()).is_some() as u64
                }
                ProcessingMode::Batch => {
                    let n = (total - traffic.sent()).min(self.config.batch_size as u64) as usize;
                    let mut batch = PacketBatch::with_capacity(n);
                    for _ in 0..n {
                        batch.push(traffic.next_packet());
                    }
                    self.pipeline.push_batch(batch).len() as u64
                }
            };
        }

        let report = WorkerReport {
            worker_id: self.id,
            packets_in: traffic.sent(),
            packets_out: forwarded,
            elapsed: started.elapsed(),
            stages: self.pipeline.stats(),
        };
        tracing::debug!("Worker {} stopped after {} packets", self.id, report.packets_in);
        // Receiver outlives every worker; a send error only means the engine gave up
        let _ = self.reports.send(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BudgetAllocator, HeapAllocator};
    use crate::clock::StepClock;
    use crate::merge::ByteSpec;
    use crate::stages::{MemoryWorkload, PayloadMutator, TimestampProbe, WorkloadSpec};

    fn test_pipeline() -> Pipeline {
        let clock = Arc::new(StepClock::new(100));
        let mut p = Pipeline::new();
        p.add_stage(Box::new(
            PayloadMutator::new(ByteSpec::replace(42, b"XY".to_vec()), Duration::from_nanos(500))
                .with_clock(clock.clone()),
        ));
        p.add_stage(Box::new(TimestampProbe::new(2, 500).with_clock(clock)));
        p.add_stage(Box::new(
            MemoryWorkload::new(
                WorkloadSpec {
                    array_bytes: 4096,
                    accesses: 8,
                    packet_read_percent: 50,
                    use_payload: true,
                    work_multiplier: 0,
                },
                Some(5),
            )
            .unwrap(),
        ));
        p
    }

    fn config(mode: ProcessingMode) -> EngineConfig {
        EngineConfig {
            workers: 3,
            batch_size: 16,
            packets_per_worker: 100,
            packet_len: 64,
            mode,
            shared_frames: false,
            seed: Some(1),
        }
    }

    #[test]
    fn test_engine_batch_run() {
        let mut engine = LoadEngine::new(config(ProcessingMode::Batch), test_pipeline()).unwrap();
        let report = engine.run().unwrap();

        assert!(!engine.is_running());
        assert_eq!(report.workers, 3);
        assert_eq!(report.packets_in, 300);
        assert_eq!(report.packets_out, 300);
        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.stages[0].rx_packets, 300);
        assert_eq!(report.stages[2].tx_packets, 300);
    }

    #[test]
    fn test_engine_single_run() {
        let mut engine = LoadEngine::new(config(ProcessingMode::Single), test_pipeline()).unwrap();
        let report = engine.run().unwrap();
        assert_eq!(report.packets_in, 300);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn test_engine_counts_drops() {
        let mut p = Pipeline::new();
        p.add_stage(Box::new(
            PayloadMutator::new(ByteSpec::replace(0, vec![1]), Duration::ZERO)
                .with_clock(Arc::new(StepClock::new(1)))
                .with_allocator(Arc::new(BudgetAllocator::new(10))),
        ));
        let mut cfg = config(ProcessingMode::Batch);
        cfg.workers = 1;
        cfg.shared_frames = true;

        let report = LoadEngine::new(cfg, p).unwrap().run().unwrap();
        assert_eq!(report.packets_out, 10);
        assert_eq!(report.dropped, 90);
        assert_eq!(report.stages[0].alloc_drops, 90);
    }

    #[test]
    fn test_stop_ends_run_early() {
        let mut p = Pipeline::new();
        p.add_stage(Box::new(
            PayloadMutator::new(ByteSpec::replace(0, vec![1]), Duration::ZERO)
                .with_clock(Arc::new(StepClock::new(1)))
                .with_allocator(Arc::new(HeapAllocator)),
        ));
        let mut cfg = config(ProcessingMode::Batch);
        cfg.packets_per_worker = u64::MAX;
        let mut engine = LoadEngine::new(cfg, p).unwrap();

        let handle = engine.stop_handle();
        let stopper = thread::spawn(move || {
            while !handle.is_running() {
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(20));
            handle.stop();
        });

        let report = engine.run().unwrap();
        stopper.join().unwrap();
        assert!(report.packets_in > 0);
        assert!(report.packets_in < u64::MAX);
        assert_eq!(report.packets_in, report.packets_out);
    }

    #[test]
    fn test_invalid_config() {
        let mut cfg = config(ProcessingMode::Batch);
        cfg.batch_size = 0;
        assert!(matches!(
            LoadEngine::new(cfg, Pipeline::new()),
            Err(EngineError::Config(ConfigError::Engine(_)))
        ));
    }
}
