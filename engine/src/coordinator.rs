//! Units of work over a store that may or may not support transactions.
//!
//! The first unit probes the store once and caches the answer. Atomic units
//! run inside a session transaction; if the store later turns out not to
//! support transactions, the coordinator switches to degraded mode for good
//! and runs the unit again without a session. In degraded mode concurrent
//! units touching the same restaurant may interleave their writes.

use anyhow::Error;
use config::Config;
use controller::{error::ErrorKind as ControllerError, Controller, Unit};
use std::sync::atomic::{AtomicU8, Ordering};

const UNKNOWN: u8 = 0;
const ATOMIC: u8 = 1;
const DEGRADED: u8 = 2;

fn controller_error(err: &Error) -> Option<&ControllerError> {
    err.downcast_ref::<ControllerError>()
}

fn is_capability_error(err: &Error) -> bool {
    controller_error(err).map_or(false, ControllerError::is_capability_error)
}

fn is_transient(err: &Error) -> bool {
    controller_error(err).map_or(false, ControllerError::is_transient)
}

#[derive(Debug)]
pub struct Coordinator {
    capability: AtomicU8,
    max_attempts: usize,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Coordinator {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            capability: AtomicU8::new(UNKNOWN),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.transactions.max_attempts)
    }

    /// Cached capability, `None` until the first unit probed the store
    pub fn is_atomic(&self) -> Option<bool> {
        match self.capability.load(Ordering::SeqCst) {
            ATOMIC => Some(true),
            DEGRADED => Some(false),
            _ => None,
        }
    }

    /// Forget the cached capability, the next unit probes again
    pub fn reset(&self) {
        self.capability.store(UNKNOWN, Ordering::SeqCst);
    }

    fn capability<C: Controller>(&self, controller: &C) -> bool {
        if let Some(atomic) = self.is_atomic() {
            return atomic;
        }

        let supported = match controller.supports_transactions() {
            Ok(supported) => supported,
            Err(e) => {
                log::warn!("Couldn't probe transaction support, assuming none: {}", e);
                false
            }
        };

        let detected = if supported { ATOMIC } else { DEGRADED };
        if self
            .capability
            .compare_exchange(UNKNOWN, detected, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::info!("Store transaction support detected: {}", supported);
        }

        self.capability.load(Ordering::SeqCst) == ATOMIC
    }

    fn downgrade(&self) {
        if self.capability.swap(DEGRADED, Ordering::SeqCst) != DEGRADED {
            log::warn!("Store rejected transactions, running units without them from now on");
        }
    }

    /// Run `work` as one unit of work.
    ///
    /// Errors returned by `work` propagate unchanged, except the store's
    /// "transactions unsupported" error, which downgrades the coordinator and
    /// runs `work` once more without a session, and transient transaction
    /// errors, which retry the whole unit up to the configured attempts.
    pub fn run_unit<C, T, F>(&self, controller: &C, mut work: F) -> Result<T, Error>
    where
        C: Controller,
        F: FnMut(&mut Unit<'_, C::Session>) -> Result<T, Error>,
    {
        if !self.capability(controller) {
            log::debug!("Running unit without a transaction");
            return work(&mut Unit::NoTransaction);
        }

        let mut attempt = 1;
        loop {
            match self.run_atomic(controller, &mut work) {
                Err(e) if is_capability_error(&e) => {
                    log::debug!("Unit failed inside a transaction: {}", e);
                    self.downgrade();
                    return work(&mut Unit::NoTransaction);
                }

                Err(e) if is_transient(&e) && attempt < self.max_attempts => {
                    log::debug!("Retrying unit after attempt {}: {}", attempt, e);
                    attempt += 1;
                }

                result => return result,
            }
        }
    }

    // The session is released when it goes out of scope, on every path
    fn run_atomic<C, T, F>(&self, controller: &C, work: &mut F) -> Result<T, Error>
    where
        C: Controller,
        F: FnMut(&mut Unit<'_, C::Session>) -> Result<T, Error>,
    {
        let mut session = controller.start_session()?;
        controller.start_transaction(&mut session)?;

        match work(&mut Unit::InSession(&mut session)) {
            Ok(value) => {
                controller.commit_transaction(&mut session)?;
                Ok(value)
            }

            Err(e) => {
                if let Err(abort) = controller.abort_transaction(&mut session) {
                    log::debug!("Couldn't abort transaction: {}", abort);
                }

                Err(e)
            }
        }
    }
}
