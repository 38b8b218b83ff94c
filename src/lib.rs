//! Tollgate - Event-Triggered Toll Processing Pipeline
//!
//! ## Architecture (10 Components)
//!
//! 1. TriggerWatcher - Sensor signal observation, run admission
//! 2. RunCoordinator - Per-vehicle pipeline state machine (SSoT for the active run)
//! 3. CaptureService - Raw video capture via external command
//! 4. TranscodeClient - ffmpeg remux + frame extraction
//! 5. RecognitionClient - External plate-reader adapter
//! 6. PlateAggregator - Cross-frame reading selection
//! 7. TollEngine - Rate table + peak-hour pricing
//! 8. LedgerGateway - Account lookup, settlement, violations
//! 9. BarrierActuator - Gate open/close commands
//! 10. WebAPI - Health and status endpoints
//!
//! ## Design Principles
//!
//! - At most one non-terminal run exists process-wide
//! - Side effects (settlement, actuation) happen at most once per run
//! - Collaborators are trait seams so the coordinator runs against fakes

pub mod barrier_actuator;
pub mod capture_service;
pub mod error;
pub mod ledger_gateway;
pub mod models;
pub mod plate_aggregator;
pub mod recognition_client;
pub mod run_coordinator;
pub mod run_log;
pub mod state;
pub mod toll_engine;
pub mod transcode_client;
pub mod trigger_watcher;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
