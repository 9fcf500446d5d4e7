//! One-time lifecycle signals published by registration
//!
//! Each signal is a oneshot channel: it fires at most once, and dropping
//! [`LifecycleSignals`] closes whatever has not fired so no receiver waits
//! forever.

use super::Integration;
use tokio::sync::oneshot;

/// Sending half, owned by the registrar
#[derive(Debug)]
pub struct LifecycleSignals {
    integration: Option<oneshot::Sender<Integration>>,
    health_reporting: Option<oneshot::Sender<()>>,
    inventory_reporting: Option<oneshot::Sender<()>>,
}

/// Receiving half, handed to the health reporter and the inventory loop
#[derive(Debug)]
pub struct LifecycleReceivers {
    pub integration: oneshot::Receiver<Integration>,
    pub health_reporting_enabled: oneshot::Receiver<()>,
    pub inventory_reporting_enabled: oneshot::Receiver<()>,
}

pub fn lifecycle_channels() -> (LifecycleSignals, LifecycleReceivers) {
    let (integration_tx, integration_rx) = oneshot::channel();
    let (health_tx, health_rx) = oneshot::channel();
    let (inventory_tx, inventory_rx) = oneshot::channel();

    (
        LifecycleSignals {
            integration: Some(integration_tx),
            health_reporting: Some(health_tx),
            inventory_reporting: Some(inventory_tx),
        },
        LifecycleReceivers {
            integration: integration_rx,
            health_reporting_enabled: health_rx,
            inventory_reporting_enabled: inventory_rx,
        },
    )
}

impl LifecycleSignals {
    /// Returns true only for the call that actually fired the signal
    pub fn enable_inventory_reporting(&mut self) -> bool {
        fire(&mut self.inventory_reporting, ())
    }

    pub fn inventory_reporting_enabled(&self) -> bool {
        self.inventory_reporting.is_none()
    }

    pub fn enable_health_reporting(&mut self) -> bool {
        fire(&mut self.health_reporting, ())
    }

    pub fn publish_integration(&mut self, integration: Integration) -> bool {
        fire(&mut self.integration, integration)
    }

    /// Close every signal that has not fired
    pub fn close(self) {}
}

fn fire<T>(slot: &mut Option<oneshot::Sender<T>>, value: T) -> bool {
    match slot.take() {
        // A dropped receiver still counts as fired
        Some(tx) => {
            let _ = tx.send(value);
            true
        }
        None => false,
    }
}
