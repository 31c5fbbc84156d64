//! Delivery status transitions.
//!
//! Pure functions deciding whether a status change is applied, ignored as a
//! duplicate, or rejected as a regression. The forward order is
//! `Sending < Sent < Delivered < Read`; `Failed` may only follow `Sending`,
//! and only an explicit retry leaves `Failed`.

use homechat_proto::message::DeliveryStatus;

/// Result of evaluating a status change against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The change moves the message forward; the new status applies.
    Applied(DeliveryStatus),
    /// The message already has this status.
    Duplicate,
    /// The change would move the message backward or out of order.
    Rejected {
        /// Status the message has.
        from: DeliveryStatus,
        /// Status that was requested.
        to: DeliveryStatus,
    },
}

impl Transition {
    /// The status to store, if the transition applies.
    #[must_use]
    pub const fn applied(self) -> Option<DeliveryStatus> {
        match self {
            Self::Applied(status) => Some(status),
            Self::Duplicate | Self::Rejected { .. } => None,
        }
    }
}

/// Evaluate a status reported by the collaborator (ack, receipt, failure).
///
/// `Sending` is never reachable this way; see [`retry`].
#[must_use]
pub const fn advance(current: DeliveryStatus, requested: DeliveryStatus) -> Transition {
    if current as u8 == requested as u8 {
        return Transition::Duplicate;
    }
    let applies = match (current, requested) {
        (DeliveryStatus::Sending, DeliveryStatus::Failed) => true,
        (_, DeliveryStatus::Failed | DeliveryStatus::Sending) | (DeliveryStatus::Failed, _) => {
            false
        }
        _ => match (current.rank(), requested.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        },
    };
    if applies {
        Transition::Applied(requested)
    } else {
        Transition::Rejected {
            from: current,
            to: requested,
        }
    }
}

/// Evaluate an explicit user retry: only `Failed` goes back to `Sending`.
#[must_use]
pub const fn retry(current: DeliveryStatus) -> Transition {
    match current {
        DeliveryStatus::Failed => Transition::Applied(DeliveryStatus::Sending),
        DeliveryStatus::Sending => Transition::Duplicate,
        other => Transition::Rejected {
            from: other,
            to: DeliveryStatus::Sending,
        },
    }
}

/// Status of a pending message once its authoritative copy arrives.
///
/// The authoritative payload proves the server has the message, so it lifts
/// a local `Failed` too. The result is at least `Sent` and never behind
/// what either side already knew.
#[must_use]
pub const fn reconciled(local: DeliveryStatus, server: DeliveryStatus) -> DeliveryStatus {
    let floor = furthest(server, DeliveryStatus::Sent);
    furthest(local, floor)
}

/// The further of two statuses along the forward progression; `Failed`
/// loses to anything confirmed.
#[must_use]
pub const fn furthest(a: DeliveryStatus, b: DeliveryStatus) -> DeliveryStatus {
    match (a.rank(), b.rank()) {
        (Some(ra), Some(rb)) => {
            if rb > ra {
                b
            } else {
                a
            }
        }
        (None, Some(_)) => b,
        (Some(_) | None, None) => a,
    }
}
