use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(GuildId);
id_newtype!(ChannelId);

const LIVEKIT_IDENTITY_PREFIX: &str = "user:";

impl UserId {
    /// Participant identity as minted into LiveKit access tokens.
    pub fn livekit_identity(self) -> String {
        format!("{LIVEKIT_IDENTITY_PREFIX}{}", self.0)
    }

    pub fn from_livekit_identity(identity: &str) -> Option<Self> {
        identity
            .strip_prefix(LIVEKIT_IDENTITY_PREFIX)?
            .parse::<i64>()
            .ok()
            .map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel_id: ChannelId,
    pub guild_id: GuildId,
    pub kind: ChannelKind,
    pub name: String,
}
