//! Process-replay capture.
//!
//! When `CAPTURE_PROCESS_REPLAY` is set, every rendered program is
//! recorded here. Persisting the registry to disk is the driver's job;
//! the records serialize with serde.

use std::sync::{Mutex, OnceLock};

use serde::Serialize;

use crate::opt::Opt;

/// One rendered kernel, enough to replay the optimization offline.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayRecord {
    pub name: String,
    pub device: String,
    pub applied_opts: Vec<Opt>,
    pub src: String,
}

static REGISTRY: OnceLock<Mutex<Vec<ReplayRecord>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<ReplayRecord>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Appends a record to the in-process registry.
pub fn capture(record: ReplayRecord) {
    registry().lock().unwrap().push(record);
}

/// Takes all captured records, leaving the registry empty.
pub fn drain() -> Vec<ReplayRecord> {
    std::mem::take(&mut *registry().lock().unwrap())
}
