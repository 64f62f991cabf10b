// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Channels and sender identities.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// An external communication surface.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    /// Chat-bot channel keyed by phone number
    Whatsapp,
    /// Chat-bot channel keyed by an opaque bot user id
    Telegram,
    Email,
    /// Coach-entered messages
    Manual,
}

impl Channel {
    /// Maximum outbound message size in characters.
    pub fn message_limit(self) -> usize {
        match self {
            Channel::Whatsapp => 4096,
            Channel::Telegram => 4096,
            Channel::Email => 10_000,
            Channel::Manual => 4096,
        }
    }
}

/// Message direction relative to the coach.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Sender handle exactly as a channel adapter extracted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSender {
    /// Explicit athlete id (manual entry)
    AthleteId(i64),
    Phone(String),
    /// Provider-scoped opaque user id
    UserId(String),
    Email(String),
    Unknown(String),
}

/// Canonical sender identity produced by the Normalizer.
///
/// Each variant has its own matching strategy against athlete handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    /// Already known athlete (manual entry)
    Athlete { athlete_id: i64 },
    /// E.164 phone number, e.g. `+34600111222`
    Phone { e164: String },
    ExternalUserId { channel: Channel, id: String },
    Unresolved { raw: String },
}

impl Identity {
    /// Stable string form, stored with each message and folded into the
    /// fingerprint.
    pub fn key(&self) -> String {
        match self {
            Identity::Athlete { athlete_id } => format!("athlete:{}", athlete_id),
            Identity::Phone { e164 } => format!("phone:{}", e164),
            Identity::ExternalUserId { channel, id } => format!("{}:{}", channel, id),
            Identity::Unresolved { raw } => format!("raw:{}", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trips_through_strings() {
        assert_eq!(Channel::Whatsapp.to_string(), "whatsapp");
        assert_eq!("telegram".parse::<Channel>().unwrap(), Channel::Telegram);
        assert!("sms".parse::<Channel>().is_err());
    }

    #[test]
    fn test_identity_keys() {
        assert_eq!(Identity::Athlete { athlete_id: 42 }.key(), "athlete:42");
        assert_eq!(
            Identity::Phone {
                e164: "+34600111222".into()
            }
            .key(),
            "phone:+34600111222"
        );
        assert_eq!(
            Identity::ExternalUserId {
                channel: Channel::Telegram,
                id: "987".into()
            }
            .key(),
            "telegram:987"
        );
        assert_eq!(Identity::Unresolved { raw: "??".into() }.key(), "raw:??");
    }
}
