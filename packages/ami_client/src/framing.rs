//! Line framing for the manager interface.
//!
//! Wire format: one banner line after connect, then blocks of
//! `Key: Value\r\n` lines, each block terminated by an empty line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::AmiError;
use crate::message::{Action, AmiMessage};

/// Upper bound on lines in one block. Rejects anything larger.
const MAX_MESSAGE_LINES: usize = 4096;

/// Upper bound on bytes in one line, terminator included.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Read one line into `line`, decoding lossily; servers send Latin-1 in
/// free-text fields such as `CallerIDName`. Returns the raw byte count,
/// 0 at EOF.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, line: &mut String) -> Result<usize, AmiError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    line.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if buf.len() > MAX_LINE_BYTES {
        return Err(AmiError::Protocol(format!(
            "line exceeds {MAX_LINE_BYTES} bytes"
        )));
    }
    line.push_str(&String::from_utf8_lossy(buf));
    Ok(n)
}

/// Read the greeting line sent right after connect (`Asterisk Call Manager/x.y`).
pub async fn read_banner<R>(reader: &mut R) -> Result<String, AmiError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut line = String::new();
    let n = read_line(reader, &mut buf, &mut line).await?;
    if n == 0 {
        return Err(AmiError::Disconnected);
    }
    let banner = line.trim_end_matches(['\r', '\n']).to_string();
    if banner.contains(": ") {
        return Err(AmiError::Protocol(format!("unexpected banner: {banner}")));
    }
    Ok(banner)
}

/// Read one message block.
///
/// Returns `None` once the peer closes the stream. Blank lines between blocks
/// are skipped; lines without a `:` separator are ignored.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<AmiMessage>, AmiError>
where
    R: AsyncBufRead + Unpin,
{
    let mut message = AmiMessage::new();
    let mut lines = 0usize;
    let mut buf = Vec::new();
    let mut line = String::new();

    loop {
        let n = read_line(reader, &mut buf, &mut line).await?;
        if n == 0 {
            // EOF: a half-read block is discarded along with the connection
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if message.is_empty() {
                continue;
            }
            return Ok(Some(message));
        }

        lines += 1;
        if lines > MAX_MESSAGE_LINES {
            return Err(AmiError::Protocol(format!(
                "message exceeds {MAX_MESSAGE_LINES} lines"
            )));
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            message.push(key.trim(), value.trim());
        }
    }
}

/// Write an action and flush it.
pub async fn write_action<W>(writer: &mut W, action: &Action) -> Result<(), AmiError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(action.encode().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_banner_then_blocks() {
        let wire = b"Asterisk Call Manager/5.0.1\r\n\
            Response: Success\r\nMessage: Authentication accepted\r\n\r\n\
            Event: DeviceStateChange\r\nDevice: PJSIP/55555\r\nState: INUSE\r\n\r\n";
        let mut reader = BufReader::new(&wire[..]);

        assert_eq!(
            read_banner(&mut reader).await.unwrap(),
            "Asterisk Call Manager/5.0.1"
        );

        let first = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.response(), Some("Success"));
        assert_eq!(first.message(), Some("Authentication accepted"));

        let second = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(second.event(), Some("DeviceStateChange"));
        assert_eq!(second.get("Device"), Some("PJSIP/55555"));
        assert_eq!(second.get("State"), Some("INUSE"));

        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tolerates_bare_newlines_and_empty_values() {
        let wire = b"\n\nEvent: DeviceState\nDevice: SIP/1234\nState:\n\n";
        let mut reader = BufReader::new(&wire[..]);
        let msg = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(msg.event(), Some("DeviceState"));
        assert_eq!(msg.get("State"), Some(""));
        assert_eq!(msg.len(), 3);
    }

    #[tokio::test]
    async fn value_may_contain_colons() {
        let wire = b"Event: Newchannel\r\nChannel: PJSIP/100-0000:01\r\n\r\n";
        let mut reader = BufReader::new(&wire[..]);
        let msg = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(msg.get("Channel"), Some("PJSIP/100-0000:01"));
    }

    #[tokio::test]
    async fn latin1_bytes_do_not_break_the_stream() {
        let wire = b"Event: Newchannel\r\nCallerIDName: Ren\xE9\r\n\r\n\
            Event: DeviceStateChange\r\nDevice: PJSIP/55555\r\nState: INUSE\r\n\r\n";
        let mut reader = BufReader::new(&wire[..]);

        let first = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.event(), Some("Newchannel"));
        assert_eq!(first.get("CallerIDName"), Some("Ren\u{FFFD}"));

        let second = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(second.event(), Some("DeviceStateChange"));
        assert_eq!(second.get("State"), Some("INUSE"));
    }

    #[tokio::test]
    async fn overlong_line_is_rejected() {
        let mut wire = b"Event: UserEvent\r\nPayload: ".to_vec();
        wire.extend(std::iter::repeat_n(b'x', MAX_LINE_BYTES));
        wire.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&wire[..]);
        assert!(matches!(
            read_message(&mut reader).await,
            Err(AmiError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn line_at_the_cap_is_accepted() {
        let prefix = b"Payload: ";
        let mut wire = prefix.to_vec();
        wire.extend(std::iter::repeat_n(b'y', MAX_LINE_BYTES - prefix.len() - 2));
        wire.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&wire[..]);
        let msg = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(msg.get("Payload").map(str::len), Some(MAX_LINE_BYTES - prefix.len() - 2));
    }

    #[tokio::test]
    async fn truncated_block_is_dropped_at_eof() {
        let wire = b"Event: DeviceState\r\nDevice: SIP/1";
        let mut reader = BufReader::new(&wire[..]);
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_header_as_banner() {
        let wire = b"Response: Success\r\n";
        let mut reader = BufReader::new(&wire[..]);
        assert!(matches!(
            read_banner(&mut reader).await,
            Err(AmiError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn write_action_flushes_encoded_block() {
        let mut out: Vec<u8> = Vec::new();
        let action = Action::new("DeviceStateList").header("ActionID", "init");
        write_action(&mut out, &action).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Action: DeviceStateList\r\nActionID: init\r\n\r\n"
        );
    }
}
