//! Failure injection for simulated peripherals.

use parking_lot::Mutex;
use vision_hal::{HalError, HalErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Never,
    Always,
    AfterN { remaining: u32 },
}

/// Decides whether the next call of one operation fails.
#[derive(Debug)]
pub struct FaultInjector {
    device: &'static str,
    operation: &'static str,
    plan: Mutex<Plan>,
}

impl FaultInjector {
    /// Injector that never fires until armed.
    pub fn new(device: &'static str, operation: &'static str) -> Self {
        Self {
            device,
            operation,
            plan: Mutex::new(Plan::Never),
        }
    }

    /// Fail every call (`true`) or none (`false`).
    pub fn set(&self, fail: bool) {
        *self.plan.lock() = if fail { Plan::Always } else { Plan::Never };
    }

    /// Let `n` more calls succeed, then fail every call after that.
    pub fn fail_after(&self, n: u32) {
        *self.plan.lock() = Plan::AfterN { remaining: n };
    }

    /// Consumes one call.
    pub fn check(&self) -> Result<(), HalError> {
        let mut plan = self.plan.lock();
        match *plan {
            Plan::Never => Ok(()),
            Plan::AfterN { remaining } if remaining > 0 => {
                *plan = Plan::AfterN {
                    remaining: remaining - 1,
                };
                Ok(())
            }
            Plan::Always | Plan::AfterN { .. } => Err(HalError::new(
                self.device,
                HalErrorKind::Transfer,
                format!("injected failure on {}", self.operation),
            )),
        }
    }
}
