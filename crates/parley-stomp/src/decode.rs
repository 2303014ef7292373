//! STOMP frame decoder.
//!
//! One transport payload may carry any number of frames. EOLs between
//! frames are heart-beats and are dropped. A frame body is delimited by
//! `content-length` when the header is present, otherwise by the first NUL.

use crate::errors::{FrameError, Result};
use crate::frame::{Command, Frame, unescape_header};

/// Decode every frame in `input`. A heart-beat-only payload yields no frames.
pub fn decode_frames(input: &str) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = input;
    loop {
        rest = skip_heartbeats(rest);
        if rest.is_empty() {
            break;
        }
        let (frame, consumed) = decode_frame(rest)?;
        frames.push(frame);
        rest = &rest[consumed..];
    }
    Ok(frames)
}

/// Decode the first frame in `input`.
///
/// Returns the frame and the number of bytes consumed, including leading
/// heart-beats and the NUL terminator.
pub fn decode_frame(input: &str) -> Result<(Frame, usize)> {
    let mut pos = input.len() - skip_heartbeats(input).len();

    let (line, next) = read_line(input, pos).ok_or(FrameError::TruncatedHeaders)?;
    let command: Command = line.parse()?;
    pos = next;

    let mut headers = Vec::new();
    loop {
        let (line, next) = read_line(input, pos).ok_or(FrameError::TruncatedHeaders)?;
        pos = next;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = match headers.iter().find(|(n, _)| n == "content-length") {
        Some((_, raw)) => Some(
            raw.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(raw.clone()))?,
        ),
        None => None,
    };

    let rest = &input[pos..];
    let body = match content_length {
        Some(len) => {
            if rest.len() < len {
                return Err(FrameError::MissingTerminator);
            }
            let body = rest.get(..len).ok_or_else(|| {
                FrameError::InvalidContentLength(format!("{len} splits a UTF-8 character"))
            })?;
            if rest.as_bytes().get(len) != Some(&0) {
                return Err(FrameError::MissingTerminator);
            }
            body
        }
        None => {
            let end = rest.find('\0').ok_or(FrameError::MissingTerminator)?;
            &rest[..end]
        }
    };
    pos += body.len() + 1;

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        pos,
    ))
}

fn skip_heartbeats(input: &str) -> &str {
    input.trim_start_matches(['\n', '\r'])
}

/// Line starting at `pos` without its EOL, plus the offset after the EOL.
fn read_line(input: &str, pos: usize) -> Option<(&str, usize)> {
    let rest = &input[pos..];
    let idx = rest.find('\n')?;
    let line = &rest[..idx];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, pos + idx + 1))
}
