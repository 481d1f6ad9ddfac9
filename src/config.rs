use crate::error::{DrvError, DrvResult};

pub const DEFAULT_MAX_DEVICES: u32 = 4;
pub const DEFAULT_HBM_BASE: u64 = 0x1000_0000;
pub const DEFAULT_HBM_SIZE: u64 = 0x3000_0000;
pub const DEFAULT_ALLOC_ALIGN: u64 = 512;
pub const DEFAULT_QOS_LEVELS: u8 = 4;
pub const DEFAULT_QOS_QUEUE_SIZE: u32 = 512;
pub const DEFAULT_REPORT_QUEUE_SIZE: u32 = 1024;
pub const DEFAULT_TS_COMMAND_QUEUE_SIZE: u32 = 1024;
pub const DEFAULT_TS_REPORT_QUEUE_SIZE: u32 = 1024;

/// When the cached per-level credit is recomputed from the downstream cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreditPolicy {
    /// Recompute only when the cached credit is `<= 1` or above the downstream capacity.
    #[default]
    Heuristic,
    /// Recompute at the start of every drain cycle.
    EveryCycle,
}

/// Static parameters of a simulated driver instance.
#[derive(Debug, Clone, Copy)]
pub struct StubConfig {
    pub max_devices: u32,
    pub hbm_base: u64,
    pub hbm_size: u64,
    /// Allocation granularity. `1` disables rounding (fuzz builds).
    pub alloc_align: u64,
    pub qos_levels: u8,
    pub qos_queue_size: u32,
    pub report_queue_size: u32,
    pub ts_command_queue_size: u32,
    pub ts_report_queue_size: u32,
    pub credit_policy: CreditPolicy,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl StubConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_devices: DEFAULT_MAX_DEVICES,
            hbm_base: DEFAULT_HBM_BASE,
            hbm_size: DEFAULT_HBM_SIZE,
            alloc_align: DEFAULT_ALLOC_ALIGN,
            qos_levels: DEFAULT_QOS_LEVELS,
            qos_queue_size: DEFAULT_QOS_QUEUE_SIZE,
            report_queue_size: DEFAULT_REPORT_QUEUE_SIZE,
            ts_command_queue_size: DEFAULT_TS_COMMAND_QUEUE_SIZE,
            ts_report_queue_size: DEFAULT_TS_REPORT_QUEUE_SIZE,
            credit_policy: CreditPolicy::Heuristic,
        }
    }

    #[must_use]
    pub const fn with_max_devices(mut self, n: u32) -> Self {
        self.max_devices = n;
        self
    }

    #[must_use]
    pub const fn with_hbm_window(mut self, base: u64, size: u64) -> Self {
        self.hbm_base = base;
        self.hbm_size = size;
        self
    }

    #[must_use]
    pub const fn with_alloc_align(mut self, align: u64) -> Self {
        self.alloc_align = align;
        self
    }

    #[must_use]
    pub const fn with_qos_levels(mut self, levels: u8) -> Self {
        self.qos_levels = levels;
        self
    }

    #[must_use]
    pub const fn with_qos_queue_size(mut self, size: u32) -> Self {
        self.qos_queue_size = size;
        self
    }

    #[must_use]
    pub const fn with_report_queue_size(mut self, size: u32) -> Self {
        self.report_queue_size = size;
        self
    }

    #[must_use]
    pub const fn with_ts_queue_sizes(mut self, command: u32, report: u32) -> Self {
        self.ts_command_queue_size = command;
        self.ts_report_queue_size = report;
        self
    }

    #[must_use]
    pub const fn with_credit_policy(mut self, policy: CreditPolicy) -> Self {
        self.credit_policy = policy;
        self
    }

    /// End of the simulated HBM window (exclusive).
    #[must_use]
    pub const fn hbm_limit(&self) -> u64 {
        self.hbm_base + self.hbm_size
    }

    /// Checks that every size is usable by the rings and the allocator.
    ///
    /// # Errors
    /// Returns `InvalidValue` naming the first offending parameter.
    pub fn validate(&self) -> DrvResult<()> {
        if self.max_devices == 0 {
            return Err(DrvError::InvalidValue("max_devices is 0".into()));
        }
        if self.hbm_size == 0 || self.hbm_base.checked_add(self.hbm_size).is_none() {
            return Err(DrvError::InvalidValue(format!(
                "hbm window 0x{:x}+0x{:x} is empty or overflows",
                self.hbm_base, self.hbm_size
            )));
        }
        if self.hbm_base == 0 {
            return Err(DrvError::InvalidValue("hbm base must not be null".into()));
        }
        if !self.alloc_align.is_power_of_two() {
            return Err(DrvError::InvalidValue(format!(
                "alloc_align {} is not a power of two",
                self.alloc_align
            )));
        }
        if self.qos_levels == 0 {
            return Err(DrvError::InvalidValue("qos_levels is 0".into()));
        }
        // Cursors are 16-bit; a ring needs at least one usable slot plus the gap slot.
        for (name, size) in [
            ("qos_queue_size", self.qos_queue_size),
            ("report_queue_size", self.report_queue_size),
            ("ts_command_queue_size", self.ts_command_queue_size),
            ("ts_report_queue_size", self.ts_report_queue_size),
        ] {
            if !(2..=u32::from(u16::MAX) + 1).contains(&size) {
                return Err(DrvError::InvalidValue(format!(
                    "{name} {size} out of range"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = StubConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.hbm_limit(), 0x4000_0000);
    }

    #[test]
    fn rejects_bad_alignment_and_ring_sizes() {
        assert!(StubConfig::new().with_alloc_align(3).validate().is_err());
        assert!(StubConfig::new().with_qos_queue_size(1).validate().is_err());
        assert!(StubConfig::new().with_qos_queue_size(70_000).validate().is_err());
        assert!(StubConfig::new().with_max_devices(0).validate().is_err());
        assert!(StubConfig::new().with_hbm_window(0x1000, 0).validate().is_err());
        StubConfig::new().with_alloc_align(1).validate().unwrap();
    }
}
