//! Textual plugin commands
//!
//! The host passes one colon-delimited string per invocation:
//!
//! ```text
//! initialize : DeviceName : VendorID : ProductID [: UsagePage : Usage]
//! connect | disconnect | check | receive
//! send : HidAction [: context]
//! ```
//!
//! Tokens are trimmed and the leading action is case-insensitive.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::codec::HidAction;
use crate::identity::{DeviceIdentity, IdentityError};

/// Placeholder the host substitutes for an unset variable
pub const NOT_SET: &str = "Not set";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("'{0}' is invalid HID interface action")]
    UnknownAction(String),

    #[error("'{input}' contains invalid context for '{action}' action")]
    InvalidContext { input: String, action: PluginAction },

    #[error("Could not process '{0}' action. Not all required input was provided.")]
    MissingInput(PluginAction),

    #[error("'{value}' is invalid HidAction for '{action}' action")]
    InvalidHidAction { value: String, action: PluginAction },

    #[error("'{value}' is invalid context for HidAction '{hid_action}'")]
    InvalidActionContext { value: String, hid_action: HidAction },

    #[error("Could not process 'initialize' action. {0}")]
    Identity(#[from] IdentityError),
}

/// Leading token of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginAction {
    Initialize,
    Connect,
    Disconnect,
    Check,
    Send,
    Receive,
}

impl PluginAction {
    pub const ALL: &'static [PluginAction] = &[
        PluginAction::Initialize,
        PluginAction::Connect,
        PluginAction::Disconnect,
        PluginAction::Check,
        PluginAction::Send,
        PluginAction::Receive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PluginAction::Initialize => "initialize",
            PluginAction::Connect => "connect",
            PluginAction::Disconnect => "disconnect",
            PluginAction::Check => "check",
            PluginAction::Send => "send",
            PluginAction::Receive => "receive",
        }
    }
}

impl fmt::Display for PluginAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PluginAction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CommandError::UnknownAction(s.to_lowercase()))
    }
}

/// A parsed plugin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Initialize(DeviceIdentity),
    Connect,
    Disconnect,
    Check,
    Receive,
    Send {
        action: HidAction,
        context: Option<u8>,
    },
}

impl Command {
    /// Parse one command string
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let tokens: Vec<&str> = input.split(':').map(str::trim).collect();
        let action: PluginAction = tokens[0].parse()?;
        let invalid = || CommandError::InvalidContext {
            input: input.to_string(),
            action,
        };

        match action {
            PluginAction::Initialize => {
                if tokens.len() != 4 && tokens.len() != 6 {
                    return Err(invalid());
                }
                if tokens[1..4].iter().any(|t| *t == NOT_SET) {
                    return Err(CommandError::MissingInput(action));
                }
                let (usage_page, usage) = if tokens.len() == 6 {
                    (Some(tokens[4]), Some(tokens[5]))
                } else {
                    (None, None)
                };
                let identity =
                    DeviceIdentity::parse(tokens[1], tokens[2], tokens[3], usage_page, usage)?;
                Ok(Command::Initialize(identity))
            }
            PluginAction::Connect
            | PluginAction::Disconnect
            | PluginAction::Check
            | PluginAction::Receive => {
                if tokens.len() != 1 {
                    return Err(invalid());
                }
                Ok(match action {
                    PluginAction::Connect => Command::Connect,
                    PluginAction::Disconnect => Command::Disconnect,
                    PluginAction::Check => Command::Check,
                    _ => Command::Receive,
                })
            }
            PluginAction::Send => {
                if tokens.len() != 2 && tokens.len() != 3 {
                    return Err(invalid());
                }
                let hid_action: HidAction =
                    tokens[1]
                        .parse()
                        .map_err(|_| CommandError::InvalidHidAction {
                            value: tokens[1].to_string(),
                            action,
                        })?;
                let context = match tokens.get(2) {
                    Some(value) => Some(value.parse::<u8>().map_err(|_| {
                        CommandError::InvalidActionContext {
                            value: value.to_string(),
                            hid_action,
                        }
                    })?),
                    None => None,
                };
                Ok(Command::Send {
                    action: hid_action,
                    context,
                })
            }
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
