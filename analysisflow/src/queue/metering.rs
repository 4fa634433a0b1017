//! Conversion of reported resource samples into quota units.

use serde::{Deserialize, Serialize};

use crate::config::{ExchangeRate, MeteringConfig, ResourceKind};
use crate::errors::FlowError;

/// Smallest amount ever charged for one invocation.
pub const MINIMUM_TOTAL: f64 = 0.01;

/// Quota units charged for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    /// Units for CPU time.
    pub cpu: f64,
    /// Units for memory.
    pub memory: f64,
    /// Rounded total.
    pub total: f64,
}

/// Applies exchange rates to resource samples.
#[derive(Debug, Clone)]
pub struct Meter {
    config: MeteringConfig,
}

impl Meter {
    /// Creates a meter from a metering configuration.
    pub fn new(config: MeteringConfig) -> Result<Self, FlowError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    /// Computes the charge of one invocation.
    ///
    /// CPU samples are cpu-seconds and are charged by amount. Memory samples
    /// are bytes held for one sample interval each. A resource kind with no
    /// samples is charged its minimum.
    pub fn charge(&self, cpu_samples: &[f64], memory_samples: &[f64]) -> Result<Charge, FlowError> {
        let cpu = self.convert(ResourceKind::Cpu, cpu_samples, 1.0)?;
        let memory = self.convert(
            ResourceKind::Memory,
            memory_samples,
            self.config.sample_interval_seconds,
        )?;
        let total = ceil_cents(cpu + memory).max(MINIMUM_TOTAL);
        Ok(Charge { cpu, memory, total })
    }

    fn convert(&self, kind: ResourceKind, samples: &[f64], held_seconds: f64) -> Result<f64, FlowError> {
        let rate = self.rate(kind)?;
        if samples.is_empty() {
            return Ok(rate.minimum_charge);
        }
        let amount: f64 = samples.iter().filter(|s| s.is_finite()).map(|s| s.max(0.0)).sum();
        let window_factor = match kind {
            ResourceKind::Cpu => 1.0,
            ResourceKind::Memory => held_seconds / rate.window_seconds,
        };
        Ok(amount / rate.unit_size * rate.rate * window_factor)
    }

    fn rate(&self, kind: ResourceKind) -> Result<&ExchangeRate, FlowError> {
        self.config
            .rate_for(kind)
            .ok_or_else(|| FlowError::Config(format!("missing exchange rate for {kind}")))
    }
}

/// Rounds up to the next hundredth, ignoring float noise below it.
fn ceil_cents(value: f64) -> f64 {
    ((value * 100.0) - 1e-9).ceil() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn meter() -> Meter {
        let config = MeteringConfig::default()
            .with_sample_interval_seconds(60.0)
            .with_rate(ExchangeRate {
                resource: ResourceKind::Cpu,
                unit: "quota".into(),
                unit_size: 1.0,
                rate: 0.1,
                window_seconds: 1.0,
                minimum_charge: 0.01,
            })
            .with_rate(ExchangeRate {
                resource: ResourceKind::Memory,
                unit: "quota".into(),
                unit_size: 1024.0,
                rate: 1.0,
                window_seconds: 3600.0,
                minimum_charge: 0.02,
            });
        Meter::new(config).unwrap()
    }

    #[test]
    fn test_zero_samples_charge_minimum_per_kind() {
        let charge = meter().charge(&[], &[]).unwrap();
        assert!(approx(charge.cpu, 0.01));
        assert!(approx(charge.memory, 0.02));
        assert!(approx(charge.total, 0.03));
    }

    #[test]
    fn test_cpu_by_amount_memory_by_time() {
        // 12 cpu-seconds at 0.1 per second, 60 samples of 1 KiB held 60s each
        // at 1 unit per KiB-hour.
        let memory = vec![1024.0; 60];
        let charge = meter().charge(&[5.0, 7.0], &memory).unwrap();
        assert!(approx(charge.cpu, 1.2));
        assert!(approx(charge.memory, 1.0));
        assert!(approx(charge.total, 2.2));
    }

    #[test]
    fn test_total_rounds_up_to_cents() {
        let charge = meter().charge(&[0.011], &[1.0]).unwrap();
        assert!(charge.total >= charge.cpu + charge.memory);
        assert!(approx(charge.total, 0.01));

        let charge = meter().charge(&[0.151], &[0.0]).unwrap();
        assert!(approx(charge.total, 0.02));
    }

    #[test]
    fn test_total_is_never_zero() {
        let charge = meter().charge(&[0.0], &[0.0]).unwrap();
        assert!(approx(charge.total, MINIMUM_TOTAL));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MeteringConfig::default().with_sample_interval_seconds(0.0);
        assert!(Meter::new(config).is_err());
    }
}
