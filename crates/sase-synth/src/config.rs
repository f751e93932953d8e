//! Synthetic Load Configuration
//!
//! Stage options keep their element names (`OFFSET`, `DATA`, `S`, `N`, ...).
//! Engine options are snake_case.
//!
//! ```json
//! {
//!   "engine": { "workers": 2, "mode": "batch", "batch_size": 32 },
//!   "stages": [
//!     { "element": "PayloadMutator", "OFFSET": 42, "DATA": "AB", "DELAY": 500 },
//!     { "element": "TimestampProbe", "OFFSET": 8, "DELAY": 1000 },
//!     { "element": "MemoryWorkload", "S": 4, "N": 64, "R": 20, "PAYLOAD": true, "W": 1 }
//!   ]
//! }
//! ```

use crate::buffer::{BufferAllocator, HeapAllocator, MAX_PACKET_SIZE};
use crate::clock::{MonotonicClock, TimeSource};
use crate::merge::ByteSpec;
use crate::pipeline::{Pipeline, Stage};
use crate::stages::{MemoryWorkload, PayloadMutator, TimestampProbe, WorkloadSpec};
use crate::traffic::{MIN_FRAME_LEN, UDP_PAYLOAD_OFFSET};
use crate::BATCH_SIZE;
use sase_common::{SynthError, SynthResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration; the pipeline is never built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// MASK longer than DATA
    #[error("MASK ({mask} bytes) must be no longer than DATA ({data} bytes)")]
    MaskTooLong {
        /// MASK length
        mask: usize,
        /// DATA length
        data: usize,
    },

    /// R above 100
    #[error("R must be between 0 and 100, got {0}")]
    PercentOutOfRange(u32),

    /// Array reads requested from an empty array
    #[error("workload array is empty but R < 100")]
    EmptyWorkloadArray,

    /// Array size (MB) cannot be allocated
    #[error("workload array of {0} MB does not fit in memory")]
    ArrayTooLarge(usize),

    /// Invalid engine section
    #[error("invalid engine setting: {0}")]
    Engine(String),
}

impl From<ConfigError> for SynthError {
    fn from(err: ConfigError) -> Self {
        SynthError::Config(err.to_string())
    }
}

/// Byte string option: a JSON string (its UTF-8 bytes) or an array of bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteString {
    /// `"AB"`
    Text(String),
    /// `[65, 66]`
    Raw(Vec<u8>),
}

impl ByteString {
    /// Raw bytes of the option
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ByteString::Text(s) => s.as_bytes().to_vec(),
            ByteString::Raw(b) => b.clone(),
        }
    }
}

/// PayloadMutator options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", deny_unknown_fields)]
pub struct PayloadConfig {
    /// First byte to merge into
    pub offset: usize,
    /// Bytes merged at OFFSET
    pub data: ByteString,
    /// Nanoseconds
    pub delay: u64,
    /// Bits of the packet DATA may change, per byte
    #[serde(default)]
    pub mask: Option<ByteString>,
    /// Extend the packet when DATA runs past its end
    #[serde(default)]
    pub grow: bool,
}

/// TimestampProbe options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", deny_unknown_fields)]
pub struct TimestampConfig {
    /// Record position past the UDP header
    pub offset: usize,
    /// Nanoseconds, converted to cycles at the measured counter frequency
    pub delay: u64,
}

/// MemoryWorkload options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Array size in MB
    pub s: usize,
    /// Accesses per packet
    pub n: u32,
    /// Percent of accesses that read the packet
    pub r: u32,
    /// Read the whole packet rather than the header span
    pub payload: bool,
    /// Work multiplier (x100 XOR per read)
    #[serde(default)]
    pub w: u32,
}

impl WorkloadConfig {
    /// Workload parameters in bytes
    pub fn spec(&self) -> Result<WorkloadSpec, ConfigError> {
        let array_bytes = self
            .s
            .checked_mul(1024 * 1024)
            .ok_or(ConfigError::ArrayTooLarge(self.s))?;
        Ok(WorkloadSpec {
            array_bytes,
            accesses: self.n,
            packet_read_percent: self.r,
            use_payload: self.payload,
            work_multiplier: self.w,
        })
    }
}

/// One pipeline element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "element")]
pub enum StageConfig {
    /// See [`PayloadMutator`]
    PayloadMutator(PayloadConfig),
    /// See [`TimestampProbe`]
    TimestampProbe(TimestampConfig),
    /// See [`MemoryWorkload`]
    MemoryWorkload(WorkloadConfig),
}

/// Collaborators injected into every stage built from config
#[derive(Clone)]
pub struct StageEnv {
    /// Clock for every spin
    pub clock: Arc<dyn TimeSource>,
    /// Buffer service for copies and growth
    pub alloc: Arc<dyn BufferAllocator>,
    /// Workload seed; the engine seed takes precedence
    pub seed: Option<u64>,
}

impl Default for StageEnv {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
            alloc: Arc::new(HeapAllocator),
            seed: None,
        }
    }
}

impl StageConfig {
    /// Validate and construct the stage
    pub fn build(&self, env: &StageEnv) -> Result<Box<dyn Stage>, ConfigError> {
        Ok(match self {
            StageConfig::PayloadMutator(c) => {
                let spec = ByteSpec::new(
                    c.offset,
                    c.data.to_bytes(),
                    c.mask.as_ref().map(ByteString::to_bytes),
                    c.grow,
                )?;
                Box::new(
                    PayloadMutator::new(spec, Duration::from_nanos(c.delay))
                        .with_clock(env.clock.clone())
                        .with_allocator(env.alloc.clone()),
                )
            }
            StageConfig::TimestampProbe(c) => Box::new(
                TimestampProbe::new(c.offset, c.delay)
                    .with_clock(env.clock.clone())
                    .with_allocator(env.alloc.clone()),
            ),
            StageConfig::MemoryWorkload(c) => Box::new(MemoryWorkload::new(c.spec()?, env.seed)?),
        })
    }
}

/// Packet discipline used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// One packet per push
    Single,
    /// `batch_size` packets per push
    #[default]
    Batch,
}

/// Load engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker threads, each driving its own pipeline replica
    pub workers: usize,
    /// Packets per batch in batch mode
    pub batch_size: usize,
    /// Packets each worker pushes before reporting
    pub packets_per_worker: u64,
    /// Generated frame length
    pub packet_len: usize,
    /// Single or batch
    pub mode: ProcessingMode,
    /// Hand out shared frames so writers pay for a copy
    pub shared_frames: bool,
    /// Seed for workload arrays and draws; entropy when absent
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_size: BATCH_SIZE,
            packets_per_worker: 100_000,
            packet_len: MIN_FRAME_LEN,
            mode: ProcessingMode::Batch,
            shared_frames: false,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Reject zero workers, zero batches and frames too short for headers
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Engine("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Engine("batch_size must be at least 1".into()));
        }
        if !(UDP_PAYLOAD_OFFSET..=MAX_PACKET_SIZE).contains(&self.packet_len) {
            return Err(ConfigError::Engine(format!(
                "packet_len must be between {} and {}",
                UDP_PAYLOAD_OFFSET, MAX_PACKET_SIZE
            )));
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthConfig {
    /// Engine section, defaulted when absent
    #[serde(default)]
    pub engine: EngineConfig,
    /// Stages in pipeline order
    pub stages: Vec<StageConfig>,
}

impl SynthConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> SynthResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate the engine section
    pub fn from_json(json: &str) -> SynthResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.engine.validate().map_err(SynthError::from)?;
        Ok(config)
    }

    /// Build the stage chain. Any invalid stage rejects the whole pipeline.
    pub fn build_pipeline(&self, env: &StageEnv) -> Result<Pipeline, ConfigError> {
        let env = StageEnv { seed: self.engine.seed.or(env.seed), ..env.clone() };
        let mut pipeline = Pipeline::new();
        for stage in &self.stages {
            pipeline.add_stage(stage.build(&env)?);
        }
        tracing::info!(stages = pipeline.stage_count(), "pipeline built");
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StepClock;

    fn test_env() -> StageEnv {
        StageEnv {
            clock: Arc::new(StepClock::new(10)),
            alloc: Arc::new(HeapAllocator),
            seed: Some(1),
        }
    }

    const SAMPLE: &str = r#"{
        "engine": { "workers": 2, "mode": "single", "packet_len": 128 },
        "stages": [
            { "element": "PayloadMutator", "OFFSET": 42, "DATA": "AB", "DELAY": 0, "MASK": [15] },
            { "element": "TimestampProbe", "OFFSET": 8, "DELAY": 1000 },
            { "element": "MemoryWorkload", "S": 1, "N": 16, "R": 20, "PAYLOAD": false }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = SynthConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.mode, ProcessingMode::Single);
        assert_eq!(config.engine.batch_size, BATCH_SIZE);
        assert_eq!(config.stages.len(), 3);

        match &config.stages[0] {
            StageConfig::PayloadMutator(c) => {
                assert_eq!(c.data.to_bytes(), b"AB".to_vec());
                assert_eq!(c.mask, Some(ByteString::Raw(vec![15])));
                assert!(!c.grow);
            }
            other => panic!("unexpected stage {:?}", other),
        }
        match &config.stages[2] {
            StageConfig::MemoryWorkload(c) => assert_eq!(c.w, 0),
            other => panic!("unexpected stage {:?}", other),
        }

        let pipeline = config.build_pipeline(&test_env()).unwrap();
        assert_eq!(pipeline.stage_count(), 3);
    }

    #[test]
    fn test_missing_required_option() {
        let json = r#"{ "stages": [ { "element": "TimestampProbe", "OFFSET": 0 } ] }"#;
        assert!(matches!(SynthConfig::from_json(json), Err(SynthError::Json(_))));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let json = r#"{ "stages": [ { "element": "TimestampProbe", "OFFSET": 0, "DELAY": 1, "GROW": true } ] }"#;
        assert!(SynthConfig::from_json(json).is_err());
    }

    #[test]
    fn test_mask_longer_than_data_rejected() {
        let json = r#"{ "stages": [
            { "element": "PayloadMutator", "OFFSET": 0, "DATA": "A", "DELAY": 0, "MASK": "AB" }
        ] }"#;
        let config = SynthConfig::from_json(json).unwrap();
        let err = config.build_pipeline(&test_env()).err().unwrap();
        assert_eq!(err, ConfigError::MaskTooLong { mask: 2, data: 1 });
    }

    #[test]
    fn test_percent_out_of_range_rejected() {
        let json = r#"{ "stages": [
            { "element": "MemoryWorkload", "S": 1, "N": 1, "R": 150, "PAYLOAD": true }
        ] }"#;
        let config = SynthConfig::from_json(json).unwrap();
        let err = config.build_pipeline(&test_env()).err().unwrap();
        assert_eq!(err, ConfigError::PercentOutOfRange(150));
    }

    #[test]
    fn test_oversized_workload_array_rejected() {
        let json = r#"{ "stages": [
            { "element": "MemoryWorkload", "S": 1073741824, "N": 1, "R": 0, "PAYLOAD": true }
        ] }"#;
        let config = SynthConfig::from_json(json).unwrap();
        let err = config.build_pipeline(&test_env()).err().unwrap();
        assert_eq!(err, ConfigError::ArrayTooLarge(1073741824));

        let json = r#"{ "stages": [
            { "element": "MemoryWorkload", "S": 18446744073709551615, "N": 1, "R": 0, "PAYLOAD": true }
        ] }"#;
        let config = SynthConfig::from_json(json).unwrap();
        let err = config.build_pipeline(&test_env()).err().unwrap();
        assert_eq!(err, ConfigError::ArrayTooLarge(usize::MAX));
    }

    #[test]
    fn test_engine_validation() {
        let json = r#"{ "engine": { "workers": 0 }, "stages": [] }"#;
        assert!(matches!(SynthConfig::from_json(json), Err(SynthError::Config(_))));

        let json = r#"{ "engine": { "packet_len": 20 }, "stages": [] }"#;
        assert!(matches!(SynthConfig::from_json(json), Err(SynthError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SynthConfig::load("/nonexistent/synth.json").unwrap_err();
        assert!(matches!(err, SynthError::Io(_)));
    }
}
