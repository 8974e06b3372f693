//! Host metrics sampled for the system monitor.

use sysinfo::System;

use super::models::MetricsSnapshot;
use crate::errors::DesktopError;

/// Percentage (0-100) of `used` over `total`. Zero when `total` is zero.
fn calculate_percent(used: f64, total: f64) -> u8 {
    if total <= 0.0 {
        return 0;
    }
    ((used / total) * 100.0).clamp(0.0, 100.0).round() as u8
}

/// One-minute load average per CPU, as a percentage.
fn neural_percent(load_one: f64, cpu_count: usize) -> u8 {
    calculate_percent(load_one, cpu_count as f64)
}

pub struct SystemSampler {
    system: std::sync::Mutex<System>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        Self {
            system: std::sync::Mutex::new(system),
        }
    }

    /// Refresh and read CPU, memory and load. CPU usage is measured against
    /// the previous refresh, so the first sample after start may read low.
    pub fn sample(&self) -> Result<MetricsSnapshot, DesktopError> {
        let mut sys = self.system.lock().map_err(|_| DesktopError::LockPoisoned)?;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = sys.global_cpu_usage().clamp(0.0, 100.0).round() as u8;
        let memory = calculate_percent(sys.used_memory() as f64, sys.total_memory() as f64);
        let neural = neural_percent(System::load_average().one, sys.cpus().len());

        Ok(MetricsSnapshot {
            cpu,
            memory,
            neural,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_percent() {
        assert_eq!(calculate_percent(50.0, 200.0), 25);
        assert_eq!(calculate_percent(1.0, 0.0), 0);
        assert_eq!(calculate_percent(300.0, 100.0), 100);
    }

    #[test]
    fn test_neural_percent_normalizes_by_cpu_count() {
        assert_eq!(neural_percent(2.0, 4), 50);
        assert_eq!(neural_percent(8.0, 4), 100);
        assert_eq!(neural_percent(1.0, 0), 0);
    }

    #[test]
    fn test_sample_stays_in_range() {
        let sampler = SystemSampler::new();
        let snapshot = sampler.sample().expect("sample");
        assert!(snapshot.cpu <= 100);
        assert!(snapshot.memory <= 100);
        assert!(snapshot.neural <= 100);
    }
}
