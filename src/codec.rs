//! Report framing for outbound actions and inbound reports
//!
//! Report layout (raw HID, no numbered reports):
//!
//! ```text
//! [0] report id, always 0
//! [1] action
//! [2] context (optional)
//! [3..] zero
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Report id byte for devices without numbered reports
pub const REPORT_ID: u8 = 0x00;

const ACTION_OFFSET: usize = 1;
const CONTEXT_OFFSET: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("report of {len} bytes cannot hold {needed} bytes of command")]
    ReportTooShort { len: usize, needed: usize },

    #[error("unknown HID action '{0}'")]
    UnknownAction(String),
}

/// Actions understood by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HidAction {
    ChangeLayer = 1,
}

impl HidAction {
    pub const ALL: &'static [HidAction] = &[HidAction::ChangeLayer];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            HidAction::ChangeLayer => "ChangeLayer",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.code() == code)
    }
}

impl fmt::Display for HidAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HidAction {
    type Err = CodecError;

    /// Accepts the action name (any case) or its numeric code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(action) = Self::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(s))
        {
            return Ok(action);
        }
        s.parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| CodecError::UnknownAction(s.to_string()))
    }
}

/// One action for the device with its optional parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundCommand {
    pub action: u8,
    pub context: Option<u8>,
}

impl OutboundCommand {
    pub fn new(action: u8, context: Option<u8>) -> Self {
        Self { action, context }
    }

    /// Bytes the framing needs, report id included
    pub fn required_len(&self) -> usize {
        if self.context.is_some() {
            CONTEXT_OFFSET + 1
        } else {
            ACTION_OFFSET + 1
        }
    }
}

/// Inbound report with the reserved byte stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReport {
    pub action: Option<u8>,
    pub context: Option<u8>,
    /// Every byte after the report id
    pub payload: Vec<u8>,
}

impl DecodedReport {
    /// Action name when the code is a known [`HidAction`]
    pub fn action_name(&self) -> Option<&'static str> {
        self.action.and_then(HidAction::from_code).map(HidAction::name)
    }

    pub fn payload_hex(&self) -> String {
        self.payload
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Encode `command` into a zero-filled report of `len` bytes
pub fn encode_report(len: usize, command: &OutboundCommand) -> Result<Vec<u8>, CodecError> {
    let needed = command.required_len();
    if len < needed {
        return Err(CodecError::ReportTooShort { len, needed });
    }

    let mut report = vec![0u8; len];
    report[0] = REPORT_ID;
    report[ACTION_OFFSET] = command.action;
    if let Some(context) = command.context {
        report[CONTEXT_OFFSET] = context;
    }
    Ok(report)
}

/// Decode an inbound report
///
/// Short reports decode to whatever fields they carry; an empty report
/// yields no action and an empty payload.
pub fn decode_report(report: &[u8]) -> DecodedReport {
    DecodedReport {
        action: report.get(ACTION_OFFSET).copied(),
        context: report.get(CONTEXT_OFFSET).copied(),
        payload: report.get(1..).map(<[u8]>::to_vec).unwrap_or_default(),
    }
}
