//! Resource usage reported in discovery replies

use std::sync::Mutex;
use sysinfo::System;
use tracing::warn;

/// Source of the blended CPU/memory figure a worker announces
pub enum ResourceSampler {
    /// Sample the host with sysinfo
    System(Mutex<System>),
    /// Always report the same value
    Fixed(f64),
}

impl ResourceSampler {
    pub fn system() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        ResourceSampler::System(Mutex::new(system))
    }

    pub fn fixed(usage: f64) -> Self {
        ResourceSampler::Fixed(blend(usage, usage))
    }

    /// Mean of CPU and memory utilisation in `[0, 100]`, two decimals
    pub fn sample(&self) -> f64 {
        match self {
            ResourceSampler::Fixed(usage) => *usage,
            ResourceSampler::System(system) => {
                let mut system = match system.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => {
                        warn!("Resource sampler lock poisoned; continuing");
                        poisoned.into_inner()
                    }
                };
                system.refresh_cpu_usage();
                system.refresh_memory();

                let cpu = f64::from(system.global_cpu_usage());
                let total = system.total_memory();
                let memory = if total == 0 {
                    0.0
                } else {
                    system.used_memory() as f64 / total as f64 * 100.0
                };
                blend(cpu, memory)
            }
        }
    }
}

fn blend(cpu: f64, memory: f64) -> f64 {
    let mean = (cpu + memory) / 2.0;
    if !mean.is_finite() {
        return 0.0;
    }
    (mean.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_rounds_and_clamps() {
        assert_eq!(blend(10.0, 15.0), 12.5);
        assert_eq!(blend(33.333, 33.333), 33.33);
        assert_eq!(blend(150.0, 150.0), 100.0);
        assert_eq!(blend(f64::NAN, 1.0), 0.0);
    }

    #[test]
    fn test_fixed_sampler() {
        assert_eq!(ResourceSampler::fixed(42.126).sample(), 42.13);
    }

    #[test]
    fn test_system_sample_in_range() {
        let usage = ResourceSampler::system().sample();
        assert!((0.0..=100.0).contains(&usage));
    }
}
