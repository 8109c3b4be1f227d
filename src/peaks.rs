//! Running maxima of observed usage, per entity.
//!
//! Records are only ever raised. Entities that disappear keep their record for
//! the lifetime of the process, so the map grows with pod churn.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::{PeakKey, Usage, UsageKind};

#[derive(Debug, Default)]
pub struct PeakTracker {
    peaks: Mutex<HashMap<(PeakKey, UsageKind), u64>>,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the record for `(key, kind)` to `quantity` if it is higher and
    /// returns the resulting peak.
    pub fn update(&self, key: &PeakKey, kind: UsageKind, quantity: u64) -> u64 {
        let mut peaks = self.lock();
        let entry = peaks.entry((key.clone(), kind)).or_insert(0);
        *entry = (*entry).max(quantity);
        *entry
    }

    pub fn get(&self, key: &PeakKey, kind: UsageKind) -> Option<u64> {
        self.lock().get(&(key.clone(), kind)).copied()
    }

    /// Updates both CPU and memory records from one sample.
    pub fn record(&self, key: &PeakKey, usage: Usage) -> Usage {
        let mut peaks = self.lock();
        let mut raise = |kind: UsageKind| {
            let entry = peaks.entry((key.clone(), kind)).or_insert(0);
            *entry = (*entry).max(usage.get(kind));
            *entry
        };
        let cpu_millis = raise(UsageKind::Cpu);
        let memory_bytes = raise(UsageKind::Memory);
        Usage {
            cpu_millis,
            memory_bytes,
        }
    }

    pub fn peak(&self, key: &PeakKey) -> Option<Usage> {
        let peaks = self.lock();
        let cpu = peaks.get(&(key.clone(), UsageKind::Cpu)).copied();
        let memory = peaks.get(&(key.clone(), UsageKind::Memory)).copied();
        match (cpu, memory) {
            (None, None) => None,
            (cpu, memory) => Some(Usage::new(cpu.unwrap_or(0), memory.unwrap_or(0))),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(PeakKey, UsageKind), u64>> {
        self.peaks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
