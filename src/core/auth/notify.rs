//! Address change notifications
//!
//! When a refresh comes from a different IP than the one the access token was
//! issued to, the refresh still succeeds but the subject should be told about
//! it. Delivering that message (mail, push, audit log) is up to the
//! [`AddressChangeNotifier`] implementation.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// A refresh observed from an address other than the bound one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChangeEvent {
    pub subject_id: String,
    /// Address claimed in the presented access token
    pub previous_address: String,
    /// Address the refresh request came from
    pub current_address: IpAddr,
    pub observed_at: DateTime<Utc>,
}

/// Hook invoked on address changes.
///
/// Called inline on the refresh path and must return quickly. Implementations
/// that do I/O should hand the event off (e.g. `tokio::spawn` or a channel)
/// and must not panic.
pub trait AddressChangeNotifier: Send + Sync {
    fn address_changed(&self, event: AddressChangeEvent);
}

/// Default notifier: records the event as a structured warning
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl AddressChangeNotifier for LogNotifier {
    fn address_changed(&self, event: AddressChangeEvent) {
        tracing::warn!(
            subject = %event.subject_id,
            previous = %event.previous_address,
            current = %event.current_address,
            "Client address changed on refresh"
        );
    }
}

/// Forwards events into a channel for an async consumer
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: tokio::sync::mpsc::UnboundedSender<AddressChangeEvent>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<AddressChangeEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AddressChangeNotifier for ChannelNotifier {
    fn address_changed(&self, event: AddressChangeEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("Address change receiver dropped, event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> AddressChangeEvent {
        AddressChangeEvent {
            subject_id: "user-1".to_string(),
            previous_address: "10.0.0.1".to_string(),
            current_address: "10.0.0.9".parse().unwrap(),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers_event() {
        let (notifier, mut receiver) = ChannelNotifier::new();

        notifier.address_changed(sample_event());

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.subject_id, "user-1");
        assert_eq!(event.current_address.to_string(), "10.0.0.9");
    }

    #[test]
    fn test_channel_notifier_survives_dropped_receiver() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);

        notifier.address_changed(sample_event());
    }

    #[test]
    fn test_log_notifier_does_not_panic() {
        LogNotifier.address_changed(sample_event());
    }
}
