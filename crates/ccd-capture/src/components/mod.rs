//! Session components:
//! - exposure: single-exposure state machine
//! - worker: streaming thread and handoff queue
//! - guide: per-axis guide pulse timing
//! - temperature: cooling loop
//! - controls: adjustable camera controls
//! - compression: zlib framing for streamed frames
//! - timers: owned one-shot timers

pub mod compression;
pub mod controls;
pub mod exposure;
pub mod guide;
pub mod temperature;
pub mod timers;
pub mod worker;
