use dripforge_core::types::Channel;

use crate::message::MessageStatus;

/// Describes a single valid status transition for an outbound message.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub from: MessageStatus,
    pub to: MessageStatus,
    pub trigger: &'static str,
}

/// Guards the message lifecycle by enforcing a finite set of valid forward
/// transitions. Email carries extra edges past `delivered` (open/click) and
/// fails from `sent` as `bounced`; SMS fails from `sent` as `failed`.
///
/// Out-of-order or replayed events resolve to transitions this table does
/// not contain and are idempotently ignored by callers.
#[derive(Debug, Clone)]
pub struct MessageStateMachine {
    pub channel: Channel,
    pub transitions: Vec<StatusTransition>,
}

impl MessageStateMachine {
    pub fn for_channel(channel: Channel) -> Self {
        let mut transitions = vec![
            StatusTransition {
                from: MessageStatus::Pending,
                to: MessageStatus::Queued,
                trigger: "dispatch_claim",
            },
            StatusTransition {
                from: MessageStatus::Queued,
                to: MessageStatus::Sent,
                trigger: "provider_accept",
            },
            StatusTransition {
                from: MessageStatus::Pending,
                to: MessageStatus::Failed,
                trigger: "dispatch_failure",
            },
            StatusTransition {
                from: MessageStatus::Queued,
                to: MessageStatus::Failed,
                trigger: "dispatch_failure",
            },
            StatusTransition {
                from: MessageStatus::Sent,
                to: MessageStatus::Delivered,
                trigger: "delivery_receipt",
            },
        ];

        match channel {
            Channel::Sms => {
                transitions.push(StatusTransition {
                    from: MessageStatus::Sent,
                    to: MessageStatus::Failed,
                    trigger: "delivery_failure",
                });
            }
            Channel::Email => {
                transitions.push(StatusTransition {
                    from: MessageStatus::Sent,
                    to: MessageStatus::Bounced,
                    trigger: "bounce",
                });
                transitions.push(StatusTransition {
                    from: MessageStatus::Delivered,
                    to: MessageStatus::Opened,
                    trigger: "open",
                });
                transitions.push(StatusTransition {
                    from: MessageStatus::Opened,
                    to: MessageStatus::Clicked,
                    trigger: "click",
                });
            }
        }

        Self { channel, transitions }
    }

    /// Returns `true` if the given transition is allowed for this channel.
    pub fn can_transition(&self, from: MessageStatus, to: MessageStatus) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }
}
