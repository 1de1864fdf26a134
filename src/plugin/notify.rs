//! Outbound plugin → host notification channel.
//!
//! Plugin callbacks push into an unbounded channel; the host drains it
//! whenever it likes.  Sending never blocks.

use crossbeam_channel::{Receiver, Sender};

use super::events::HostNotification;

/// Producer half, cloned into every plugin callback object.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<HostNotification>,
}

impl Notifier {
    pub fn notify(&self, notification: HostNotification) {
        if self.tx.send(notification).is_err() {
            log::debug!("Notification dropped, receiver gone: {:?}", notification);
        }
    }
}

/// Consumer half, owned by the session.
#[derive(Debug)]
pub struct Notifications {
    rx: Receiver<HostNotification>,
}

impl Notifications {
    pub fn drain(&self) -> Vec<HostNotification> {
        self.rx.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn channel() -> (Notifier, Notifications) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Notifier { tx }, Notifications { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order() {
        let (tx, rx) = channel();
        tx.notify(HostNotification::IoChanged);
        tx.notify(HostNotification::TailLengthChanged(64));
        assert_eq!(
            rx.drain(),
            vec![
                HostNotification::IoChanged,
                HostNotification::TailLengthChanged(64)
            ]
        );
        assert!(rx.is_empty());
    }

    #[test]
    fn test_notify_after_receiver_dropped_is_silent() {
        let (tx, rx) = channel();
        drop(rx);
        tx.notify(HostNotification::UpdateDisplay);
    }
}
