//! Environment-backed runtime configuration for `chat-smoke`.

use std::{env, error::Error, fmt};

use chat_core::{CurrentUser, SenderIdentity};
use chat_runtime::{EchoOrder, RuntimeConfig};

const DEFAULT_USER_ID: &str = "alice";
const DEFAULT_LOOPBACK_ECHO: EchoOrder = EchoOrder::AfterAck;

/// Runtime configuration used by the smoke app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// ID of the signed-in user.
    pub user_id: String,
    /// Optional display name of the signed-in user.
    pub user_name: Option<String>,
    /// Optional avatar URL of the signed-in user.
    pub user_avatar_url: Option<String>,
    /// Capacity of the store command queue.
    pub command_buffer: usize,
    /// Capacity of the projection broadcast buffer and the loopback inbox.
    pub event_buffer: usize,
    /// Echo ordering used by the loopback transport.
    pub loopback_echo: EchoOrder,
    /// Number of initial sends the loopback transport fails.
    pub loopback_fail_first: u32,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let user_id = optional_trimmed_env("CHATROOM_USER_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_USER_ID.to_owned());
        let user_name = optional_trimmed_env("CHATROOM_USER_NAME", &mut lookup);
        let user_avatar_url = optional_trimmed_env("CHATROOM_USER_AVATAR_URL", &mut lookup);

        let defaults = RuntimeConfig::default();
        let command_buffer = parse_optional_usize(
            "CHATROOM_COMMAND_BUFFER",
            defaults.command_buffer,
            &mut lookup,
        )?;
        let event_buffer = parse_optional_usize(
            "CHATROOM_EVENT_BUFFER",
            defaults.update_buffer,
            &mut lookup,
        )?;
        let loopback_echo = match optional_trimmed_env("CHATROOM_LOOPBACK_ECHO", &mut lookup) {
            Some(value) => value
                .parse::<EchoOrder>()
                .map_err(|reason| ConfigError::InvalidValue {
                    key: "CHATROOM_LOOPBACK_ECHO",
                    value,
                    reason,
                })?,
            None => DEFAULT_LOOPBACK_ECHO,
        };
        let loopback_fail_first =
            parse_optional_u32("CHATROOM_LOOPBACK_FAIL_FIRST", 0, &mut lookup)?;

        for (key, value) in [
            ("CHATROOM_COMMAND_BUFFER", command_buffer),
            ("CHATROOM_EVENT_BUFFER", event_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
        }

        Ok(Self {
            user_id,
            user_name,
            user_avatar_url,
            command_buffer,
            event_buffer,
            loopback_echo,
            loopback_fail_first,
        })
    }

    /// Identity of the signed-in user.
    pub fn current_user(&self) -> CurrentUser {
        CurrentUser::new(
            self.user_id.clone(),
            self.user_name.clone(),
            self.user_avatar_url.clone(),
        )
    }

    /// Sender stamped on loopback echoes of our own messages.
    pub fn loopback_sender(&self) -> SenderIdentity {
        SenderIdentity::from(&self.current_user())
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            command_buffer: self.command_buffer,
            update_buffer: self.event_buffer,
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u32<F>(
    key: &'static str,
    default: u32,
    lookup: &mut F,
) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
