//! Host resource sampling
//!
//! The scheduler asks a [`ResourceSampler`] for CPU and memory figures once
//! per flush. [`HostSampler`] reads them through `sysinfo`; embedders can
//! supply their own implementation.

use parking_lot::Mutex;
use sysinfo::System;

/// Point-in-time resource usage, both values in percent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
}

/// Source of resource figures.
///
/// `sample` may block on the host; the scheduler calls it off the async
/// worker threads.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Sampler returning the same figures every time
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSampler(pub ResourceSample);

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}

/// `sysinfo`-backed sampler.
///
/// CPU usage is the one-minute load average divided by the number of CPUs,
/// so it can exceed 100 on an overloaded host. Memory usage is used over
/// total memory. Figures the platform does not report come back as 0.
pub struct HostSampler {
    system: Mutex<System>,
    cpus: usize,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            cpus: num_cpus::get().max(1),
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSampler")
            .field("cpus", &self.cpus)
            .finish()
    }
}

impl ResourceSampler for HostSampler {
    fn sample(&self) -> ResourceSample {
        let (used, total) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            (system.used_memory(), system.total_memory())
        };

        ResourceSample {
            cpu_usage_percent: load_percent(System::load_average().one, self.cpus),
            memory_usage_percent: usage_percent(used, total),
        }
    }
}

/// Load average as a percentage of available CPUs, two decimals
fn load_percent(load: f64, cpus: usize) -> f64 {
    if !load.is_finite() || load <= 0.0 {
        return 0.0;
    }
    round2(load / cpus.max(1) as f64 * 100.0)
}

/// `used / total` in percent, two decimals; 0 when total is unknown
fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(used.min(total) as f64 / total as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_percent() {
        assert_eq!(load_percent(1.0, 4), 25.0);
        assert_eq!(load_percent(0.333, 1), 33.3);
        assert_eq!(load_percent(6.0, 4), 150.0);
        assert_eq!(load_percent(1.0, 0), 100.0);
        assert_eq!(load_percent(f64::NAN, 2), 0.0);
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(usage_percent(6_000, 8_000), 75.0);
        assert_eq!(usage_percent(2_000, 3_000), 66.67);
        assert_eq!(usage_percent(5, 0), 0.0);
        assert_eq!(usage_percent(10, 5), 100.0);
    }

    #[test]
    fn test_host_sampler_reports_sane_figures() {
        let sampler = HostSampler::new();
        let sample = sampler.sample();
        assert!((0.0..=100.0).contains(&sample.memory_usage_percent));
        assert!(sample.cpu_usage_percent >= 0.0);

        // Repeated samples reuse the same System
        let again = sampler.sample();
        assert!((0.0..=100.0).contains(&again.memory_usage_percent));
    }

    #[test]
    fn test_fixed_sampler() {
        let fixed = ResourceSample {
            cpu_usage_percent: 12.5,
            memory_usage_percent: 40.0,
        };
        assert_eq!(FixedSampler(fixed).sample(), fixed);
    }
}
