//! HL7 ACK generation.
//!
//! Generated ACKs swap the sending and receiving application/facility of the
//! inbound message and echo its `MSH-10` control id into `MSA-2`.

// Layer 1: Standard library imports
use std::fmt;
use std::str::FromStr;

// Layer 2: Third-party crate imports
use chrono::Utc;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::error::EngineError;
use crate::hl7::parsed::ParsedView;

/// HL7 acknowledgement codes carried in `MSA-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckCode {
    /// Application Accept.
    AA,
    /// Application Error.
    AE,
    /// Application Reject.
    AR,
    /// Commit Accept (enhanced mode).
    CA,
    /// Commit Error (enhanced mode).
    CE,
    /// Commit Reject (enhanced mode).
    CR,
}

impl AckCode {
    /// The wire form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckCode::AA => "AA",
            AckCode::AE => "AE",
            AckCode::AR => "AR",
            AckCode::CA => "CA",
            AckCode::CE => "CE",
            AckCode::CR => "CR",
        }
    }

    /// Returns `true` for the error codes (`AE`, `CE`).
    pub fn is_error(&self) -> bool {
        matches!(self, AckCode::AE | AckCode::CE)
    }

    /// Returns `true` for the reject codes (`AR`, `CR`).
    pub fn is_reject(&self) -> bool {
        matches!(self, AckCode::AR | AckCode::CR)
    }
}

impl FromStr for AckCode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AA" => Ok(AckCode::AA),
            "AE" => Ok(AckCode::AE),
            "AR" => Ok(AckCode::AR),
            "CA" => Ok(AckCode::CA),
            "CE" => Ok(AckCode::CE),
            "CR" => Ok(AckCode::CR),
            other => Err(EngineError::Validation {
                reason: format!("unknown ACK code: '{other}'"),
            }),
        }
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build an ACK for the given inbound message.
///
/// The reply's MSH swaps sending/receiving application and facility, the
/// message type becomes `ACK^<trigger>` (trigger taken from the inbound
/// `MSH-9.2` when present), a fresh control id is minted, and `MSA-2` echoes
/// the inbound `MSH-10`.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::hl7::{build_ack, AckCode, ParsedView};
///
/// let raw = b"MSH|^~\\&|SRC|F1|DST|F2|20240115120000||ADT^A01|MSG001|P|2.4\r";
/// let view = ParsedView::new(raw.to_vec());
/// let ack = build_ack(&view, AckCode::AA, "Message accepted");
///
/// let ack_view = ParsedView::new(ack);
/// assert_eq!(ack_view.get_field("MSA-1").as_deref(), Some("AA"));
/// assert_eq!(ack_view.get_field("MSA-2").as_deref(), Some("MSG001"));
/// assert_eq!(ack_view.get_field("MSH-3").as_deref(), Some("DST"));
/// assert_eq!(ack_view.get_field("MSH-5").as_deref(), Some("SRC"));
/// ```
pub fn build_ack(inbound: &ParsedView, code: AckCode, text: &str) -> Vec<u8> {
    let sending_app = inbound.receiving_application().unwrap_or_default();
    let sending_fac = inbound.receiving_facility().unwrap_or_default();
    let receiving_app = inbound.sending_application().unwrap_or_default();
    let receiving_fac = inbound.sending_facility().unwrap_or_default();

    let trigger = inbound.get_field("MSH-9.2");
    let ack_type = match &trigger {
        Some(t) => format!("ACK^{t}"),
        None => "ACK".to_string(),
    };

    let version = inbound.get_field_or("MSH-12", "2.4");
    let processing_id = inbound.get_field_or("MSH-11", "P");
    let control_id = inbound.message_control_id().unwrap_or_default();
    let new_id = Uuid::new_v4().simple().to_string();
    let new_id = &new_id[..new_id.len().min(20)];
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");

    let ack = format!(
        "MSH|^~\\&|{sending_app}|{sending_fac}|{receiving_app}|{receiving_fac}|{timestamp}||{ack_type}|{new_id}|{processing_id}|{version}\rMSA|{code}|{control_id}|{text}\r",
    );
    ack.into_bytes()
}
