//! MLLP (Minimum Lower Layer Protocol) framing.
//!
//! Wire format: `0x0B` start-of-block, HL7 ER7 payload, `0x1C 0x0D` trailer.
//! The framer is transport-agnostic: [`read_frame`] operates over any
//! [`AsyncRead`] stream.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

// Layer 3: Internal module imports
use crate::error::EngineError;

/// Start-of-block byte.
pub const START_BLOCK: u8 = 0x0b;
/// First trailer byte (end-of-block).
pub const END_BLOCK: u8 = 0x1c;
/// Second trailer byte.
pub const CARRIAGE_RETURN: u8 = 0x0d;

/// Wrap an HL7 payload in an MLLP frame.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::hl7::{wrap, unwrap_frame};
///
/// let framed = wrap(b"MSH|^~\\&|...");
/// assert_eq!(framed[0], 0x0b);
/// assert_eq!(&framed[framed.len() - 2..], &[0x1c, 0x0d]);
/// assert_eq!(unwrap_frame(&framed).unwrap(), b"MSH|^~\\&|...");
/// ```
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 3);
    framed.push(START_BLOCK);
    framed.extend_from_slice(payload);
    framed.push(END_BLOCK);
    framed.push(CARRIAGE_RETURN);
    framed
}

/// Strip MLLP framing from a complete frame.
pub fn unwrap_frame(framed: &[u8]) -> Result<Vec<u8>, EngineError> {
    if framed.len() < 3 {
        return Err(EngineError::Frame {
            reason: "frame shorter than minimum envelope".into(),
        });
    }
    if framed[0] != START_BLOCK {
        return Err(EngineError::Frame {
            reason: format!("expected start-of-block 0x0b, got 0x{:02x}", framed[0]),
        });
    }
    let trailer = &framed[framed.len() - 2..];
    if trailer != [END_BLOCK, CARRIAGE_RETURN] {
        return Err(EngineError::Frame {
            reason: "missing end-of-block trailer".into(),
        });
    }
    Ok(framed[1..framed.len() - 2].to_vec())
}

/// Read one MLLP frame from a byte stream.
///
/// Returns `Ok(Some(payload))` on a complete frame, `Ok(None)` on a clean
/// end-of-stream before any frame byte (the peer closed between messages),
/// `FrameError` on EOF mid-frame, `TimeoutError` when `deadline` elapses,
/// and `ConnectionError` on a transport fault.
pub async fn read_frame<R>(
    stream: &mut R,
    deadline: Option<Duration>,
) -> Result<Option<Vec<u8>>, EngineError>
where
    R: AsyncRead + Unpin,
{
    match deadline {
        Some(limit) => match timeout(limit, read_frame_inner(stream)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                operation: "mllp read_frame".into(),
                timeout: limit,
            }),
        },
        None => read_frame_inner(stream).await,
    }
}

async fn read_frame_inner<R>(stream: &mut R) -> Result<Option<Vec<u8>>, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];

    // Scan for start-of-block, tolerating inter-frame noise such as stray
    // carriage returns from permissive senders.
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| EngineError::Connection {
                reason: format!("read failed: {e}"),
            })?;
        if n == 0 {
            return Ok(None);
        }
        if byte[0] == START_BLOCK {
            break;
        }
    }

    let mut payload = Vec::with_capacity(512);
    let mut saw_end_block = false;
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| EngineError::Connection {
                reason: format!("read failed: {e}"),
            })?;
        if n == 0 {
            return Err(EngineError::Frame {
                reason: "end of stream inside frame".into(),
            });
        }
        match byte[0] {
            CARRIAGE_RETURN if saw_end_block => return Ok(Some(payload)),
            END_BLOCK => {
                if saw_end_block {
                    // The previous 0x1c was payload, not the trailer.
                    payload.push(END_BLOCK);
                }
                saw_end_block = true;
            }
            other => {
                if saw_end_block {
                    // 0x1c was payload, not the trailer.
                    payload.push(END_BLOCK);
                    saw_end_block = false;
                }
                payload.push(other);
            }
        }
    }
}
