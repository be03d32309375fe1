// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Message constraints between workers.
//!
//! A constraint records that `sender` delivers control messages to
//! `recipient` with a fixed latency, measured in sender firings. The
//! interpreter orders firings so no delivery is missed; the compiled
//! back-end rejects any constraint touching its workers.

use crate::core::graph::WorkerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageConstraint {
    pub sender: WorkerId,
    pub recipient: WorkerId,
    /// Delivery latency in sender firings.
    pub latency: u64,
}

impl MessageConstraint {
    pub fn new(sender: WorkerId, recipient: WorkerId, latency: u64) -> Self {
        Self {
            sender,
            recipient,
            latency,
        }
    }

    /// The logical time before which a message sent at the given sender
    /// firing count must be delivered.
    pub fn delivery_time(&self, sender_executions: u64) -> u64 {
        sender_executions + self.latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_time_adds_latency() {
        let constraint = MessageConstraint::new(WorkerId(0), WorkerId(1), 3);
        assert_eq!(constraint.delivery_time(5), 8);
    }
}
