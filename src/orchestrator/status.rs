//! Status line ownership
//!
//! Every operation that writes the status becomes its owner. Resetting to
//! idle only succeeds for the current owner, so a finished speech job cannot
//! clobber a newer turn. While an older turn is still speaking, a newer
//! operation that ends hands the status back to `Speaking` instead of idle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::display::{DisplaySurface, Status};

use super::TurnId;

#[derive(Debug, Clone, Copy)]
struct Current {
    status: Status,
    owner: Option<TurnId>,
    /// Latest turn that entered `Speaking` and has not finished yet
    speaker: Option<TurnId>,
}

/// Shared status with owner tracking
pub struct StatusBoard {
    current: Mutex<Current>,
    display: Arc<dyn DisplaySurface>,
}

impl StatusBoard {
    pub fn new(display: Arc<dyn DisplaySurface>) -> Self {
        Self {
            current: Mutex::new(Current {
                status: Status::Idle,
                owner: None,
                speaker: None,
            }),
            display,
        }
    }

    /// Set the status on behalf of `owner`, taking ownership
    pub fn set(&self, owner: TurnId, status: Status) {
        let mut current = self.lock();
        current.status = status;
        current.owner = Some(owner);
        if status == Status::Speaking {
            current.speaker = Some(owner);
        }
        // Display writes happen under the lock to keep them in order
        self.display.set_status(status);
        tracing::debug!(owner = owner.0, status = %status, "status changed");
    }

    /// Release `owner`'s claim on the status
    ///
    /// Only the current owner changes what is shown: back to `Speaking` when
    /// another turn's speech is still running, otherwise idle. Returns true
    /// if the status changed.
    pub fn reset_if_owner(&self, owner: TurnId) -> bool {
        let mut current = self.lock();
        if current.speaker == Some(owner) {
            current.speaker = None;
        }
        if current.owner != Some(owner) {
            return false;
        }

        let (status, next_owner) = match current.speaker {
            Some(speaker) => (Status::Speaking, Some(speaker)),
            None => (Status::Idle, None),
        };
        current.status = status;
        current.owner = next_owner;
        self.display.set_status(status);
        tracing::debug!(owner = owner.0, status = %status, "status released");
        true
    }

    /// Current status
    pub fn current(&self) -> Status {
        self.lock().status
    }

    fn lock(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
