// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{EngineError, Result};
use log::info;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

/// Returned by [`LeaseRegistry::release_all`].
pub const LOGGED_OUT: &str = "Logged out";

pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_millis(600_000);

struct Lease {
    token: String,
    last_activity: Instant,
}

/// Tracks the one caller identity allowed to use the service.
///
/// A lease held by someone else is honoured until its holder has been idle
/// for longer than the inactivity timeout; after that the next caller takes
/// it over.
pub struct LeaseRegistry {
    inactivity_timeout: Duration,
    lease: Mutex<Option<Lease>>,
}

impl LeaseRegistry {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            inactivity_timeout,
            lease: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Lease>> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `token` may use the service right now. Clears an expired lease.
    pub fn check_admission(&self, token: &str) -> bool {
        let mut lease = self.lock();
        self.admissible(&mut lease, token)
    }

    /// Refresh the lease for `token`, taking it over if it is free.
    /// Ignored when someone else holds a live lease.
    pub fn record_activity(&self, token: &str) {
        let mut lease = self.lock();
        if self.admissible(&mut lease, token) {
            Self::grant(&mut lease, token);
        }
    }

    /// Check and record in one critical section.
    pub fn admit(&self, token: &str) -> Result<()> {
        let mut lease = self.lock();
        if !self.admissible(&mut lease, token) {
            return Err(EngineError::AdmissionDenied);
        }
        Self::grant(&mut lease, token);
        Ok(())
    }

    pub fn release_all(&self) -> &'static str {
        if self.lock().take().is_some() {
            info!("[lease] released");
        }
        LOGGED_OUT
    }

    pub fn current_holder(&self) -> Option<String> {
        self.lock().as_ref().map(|l| l.token.clone())
    }

    fn admissible(&self, lease: &mut Option<Lease>, token: &str) -> bool {
        let Some(current) = lease.as_ref() else {
            return true;
        };
        if current.token == token {
            return true;
        }
        if current.last_activity.elapsed() > self.inactivity_timeout {
            info!(
                "[lease] holder idle for more than {}ms, lease expired",
                self.inactivity_timeout.as_millis()
            );
            *lease = None;
            return true;
        }
        false
    }

    fn grant(lease: &mut Option<Lease>, token: &str) {
        match lease {
            Some(current) if current.token == token => current.last_activity = Instant::now(),
            _ => {
                info!("[lease] granted to new holder");
                *lease = Some(Lease {
                    token: token.to_string(),
                    last_activity: Instant::now(),
                });
            }
        }
    }
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_INACTIVITY_TIMEOUT)
    }
}
