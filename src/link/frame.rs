//! Length-prefixed frames: `!{ACTION,LEN}payload` and `?{ACTION,LEN}payload`.

use thiserror::Error;

pub const PAYLOAD_CAPACITY: usize = 512;
pub const HEADER_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `!`: fire-and-forget, also used for every response.
    Message,
    /// `?`: expects exactly one response.
    Request,
}

impl FrameKind {
    pub fn from_sentinel(b: u8) -> Option<Self> {
        match b {
            b'!' => Some(FrameKind::Message),
            b'?' => Some(FrameKind::Request),
            _ => None,
        }
    }

    pub fn sentinel(self) -> u8 {
        match self {
            FrameKind::Message => b'!',
            FrameKind::Request => b'?',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub action: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, action: &str, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            kind,
            action: action.to_string(),
            payload: payload.into(),
        }
    }

    /// Device-to-host frames are always `!` frames.
    pub fn response(action: &str, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(FrameKind::Message, action, payload)
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.kind.sentinel());
        out.push(b'{');
        out.extend_from_slice(self.action.as_bytes());
        out.push(b',');
        out.extend_from_slice(self.payload.len().to_string().as_bytes());
        out.push(b'}');
        out.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.action.len() + self.payload.len() + 8);
        self.encode_into(&mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame header: {0}")]
    MalformedHeader(&'static str),
    #[error("declared payload of {declared} bytes exceeds {capacity}")]
    FrameTooLarge { declared: usize, capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

/// Fixed-capacity byte accumulator that refuses to grow past `N`.
pub struct BoundedBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedBuf<N> {
    pub const CAPACITY: usize = N;

    pub fn new() -> Self {
        BoundedBuf {
            buf: [0; N],
            len: 0,
        }
    }

    pub fn push(&mut self, b: u8) -> Result<(), Overflow> {
        if self.len == N {
            return Err(Overflow);
        }
        self.buf[self.len] = b;
        self.len += 1;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> Default for BoundedBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a sentinel byte inside a payload restarts the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncPolicy {
    /// Any `!`/`?` starts a new frame, even mid-payload. The link has no
    /// error channel, so this is how a host recovers from a cut-off frame.
    #[default]
    Always,
    /// Sentinels only restart header parsing; payload bytes are verbatim.
    HeaderOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingSentinel,
    AwaitingOpenBrace(FrameKind),
    ReadingHeader(FrameKind),
    ReadingPayload { kind: FrameKind, remaining: usize },
}

pub struct FrameParser {
    state: ParseState,
    policy: ResyncPolicy,
    header: BoundedBuf<HEADER_CAPACITY>,
    action: String,
    payload: BoundedBuf<PAYLOAD_CAPACITY>,
}

impl FrameParser {
    pub fn new(policy: ResyncPolicy) -> Self {
        FrameParser {
            state: ParseState::AwaitingSentinel,
            policy,
            header: BoundedBuf::new(),
            action: String::new(),
            payload: BoundedBuf::new(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ParseState::AwaitingSentinel;
        self.header.clear();
        self.action.clear();
        self.payload.clear();
    }

    /// Feeds one byte. Returns a frame or an error when this byte finished
    /// (or aborted) one; the parser is ready for a new sentinel either way.
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        if let Some(kind) = FrameKind::from_sentinel(byte) {
            let in_payload = matches!(self.state, ParseState::ReadingPayload { .. });
            if !in_payload || self.policy == ResyncPolicy::Always {
                if self.state != ParseState::AwaitingSentinel {
                    log::trace!("sentinel pre-empted partial frame in {:?}", self.state);
                }
                self.reset();
                self.state = ParseState::AwaitingOpenBrace(kind);
                return None;
            }
        }

        match self.state {
            ParseState::AwaitingSentinel => None,
            ParseState::AwaitingOpenBrace(kind) => {
                self.state = if byte == b'{' {
                    ParseState::ReadingHeader(kind)
                } else {
                    ParseState::AwaitingSentinel
                };
                None
            }
            ParseState::ReadingHeader(kind) => {
                if byte != b'}' {
                    if self.header.push(byte).is_err() {
                        return Some(self.fail(FrameError::MalformedHeader("header too long")));
                    }
                    return None;
                }
                match self.close_header() {
                    Ok(0) => Some(Ok(self.finish(kind))),
                    Ok(remaining) => {
                        self.state = ParseState::ReadingPayload { kind, remaining };
                        None
                    }
                    Err(e) => Some(self.fail(e)),
                }
            }
            ParseState::ReadingPayload { kind, remaining } => {
                if self.payload.push(byte).is_err() {
                    // Unreachable with the header check, kept as a hard stop.
                    return Some(self.fail(FrameError::FrameTooLarge {
                        declared: self.payload.len() + remaining,
                        capacity: PAYLOAD_CAPACITY,
                    }));
                }
                if remaining == 1 {
                    Some(Ok(self.finish(kind)))
                } else {
                    self.state = ParseState::ReadingPayload {
                        kind,
                        remaining: remaining - 1,
                    };
                    None
                }
            }
        }
    }

    fn close_header(&mut self) -> Result<usize, FrameError> {
        let header = self.header.as_slice();
        let comma = header
            .iter()
            .position(|&b| b == b',')
            .ok_or(FrameError::MalformedHeader("missing length"))?;
        let (action, digits) = (&header[..comma], &header[comma + 1..]);
        if action.is_empty() {
            return Err(FrameError::MalformedHeader("empty action"));
        }
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(FrameError::MalformedHeader("length is not a decimal number"));
        }
        let declared = digits.iter().try_fold(0usize, |acc, &d| {
            acc.checked_mul(10)?.checked_add((d - b'0') as usize)
        });
        let declared = match declared {
            Some(n) if n <= PAYLOAD_CAPACITY => n,
            Some(n) => {
                return Err(FrameError::FrameTooLarge {
                    declared: n,
                    capacity: PAYLOAD_CAPACITY,
                })
            }
            None => {
                return Err(FrameError::FrameTooLarge {
                    declared: usize::MAX,
                    capacity: PAYLOAD_CAPACITY,
                })
            }
        };
        self.action = String::from_utf8_lossy(action).into_owned();
        Ok(declared)
    }

    fn finish(&mut self, kind: FrameKind) -> Frame {
        let frame = Frame {
            kind,
            action: std::mem::take(&mut self.action),
            payload: self.payload.as_slice().to_vec(),
        };
        self.reset();
        frame
    }

    fn fail(&mut self, e: FrameError) -> Result<Frame, FrameError> {
        self.reset();
        Err(e)
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(ResyncPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut FrameParser, bytes: &[u8]) -> Vec<Result<Frame, FrameError>> {
        bytes.iter().filter_map(|&b| parser.push(b)).collect()
    }

    #[test]
    fn test_request_with_payload() {
        let mut p = FrameParser::default();
        let out = feed(&mut p, b"?{SETT,9}BAUD,9600");
        assert_eq!(
            out,
            vec![Ok(Frame::new(FrameKind::Request, "SETT", b"BAUD,9600".to_vec()))]
        );
        assert_eq!(p.state(), ParseState::AwaitingSentinel);
    }

    #[test]
    fn test_zero_length_frame_completes_on_brace() {
        let mut p = FrameParser::default();
        let out = feed(&mut p, b"!{RAMCLR,0}");
        assert_eq!(out, vec![Ok(Frame::new(FrameKind::Message, "RAMCLR", Vec::new()))]);
    }

    #[test]
    fn test_completed_frame_then_sentinel_starts_fresh() {
        let mut p = FrameParser::default();
        let out = feed(&mut p, b"!{RAMCLR,0}?{AWAKE,0}");
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], Ok(Frame::new(FrameKind::Request, "AWAKE", Vec::new())));
    }

    #[test]
    fn test_sentinel_preempts_partial_payload() {
        let mut p = FrameParser::default();
        let out = feed(&mut p, b"!{ROMLW,20}0000,A9?{AWAKE,0}");
        assert_eq!(out, vec![Ok(Frame::new(FrameKind::Request, "AWAKE", Vec::new()))]);
    }

    #[test]
    fn test_header_only_policy_keeps_payload_sentinels() {
        let mut p = FrameParser::new(ResyncPolicy::HeaderOnly);
        let out = feed(&mut p, b"?{SETT,9}NAME,Hi!?");
        assert_eq!(
            out,
            vec![Ok(Frame::new(FrameKind::Request, "SETT", b"NAME,Hi!?".to_vec()))]
        );
        let mut p = FrameParser::new(ResyncPolicy::HeaderOnly);
        let out = feed(&mut p, b"?{SE!{AWAKE,0}");
        assert_eq!(out, vec![Ok(Frame::new(FrameKind::Message, "AWAKE", Vec::new()))]);
    }

    #[test]
    fn test_noise_between_frames_is_ignored() {
        let mut p = FrameParser::default();
        let out = feed(&mut p, b"\r\nxx!x{AWAKE,0}?{AWAKE,0}");
        assert_eq!(out, vec![Ok(Frame::new(FrameKind::Request, "AWAKE", Vec::new()))]);
    }

    #[test]
    fn test_oversized_frame_yields_one_error_and_recovers() {
        let mut p = FrameParser::default();
        let out = feed(&mut p, b"!{ROMLW,513}0000,");
        assert_eq!(
            out,
            vec![Err(FrameError::FrameTooLarge {
                declared: 513,
                capacity: PAYLOAD_CAPACITY
            })]
        );
        assert_eq!(p.state(), ParseState::AwaitingSentinel);
        let out = feed(&mut p, b"?{AWAKE,0}");
        assert_eq!(out, vec![Ok(Frame::new(FrameKind::Request, "AWAKE", Vec::new()))]);
    }

    #[test]
    fn test_capacity_payload_is_accepted() {
        let mut p = FrameParser::default();
        let mut bytes = b"!{ROMLW,512}".to_vec();
        bytes.extend(std::iter::repeat(b'A').take(512));
        let out = feed(&mut p, &bytes);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().payload.len(), 512);
    }

    #[test]
    fn test_malformed_headers() {
        for bad in [&b"?{AWAKE}"[..], b"?{AWAKE,x}", b"?{AWAKE,}", b"?{,0}", b"?{A,1 }"] {
            let mut p = FrameParser::default();
            let out = feed(&mut p, bad);
            assert!(
                matches!(out.as_slice(), [Err(FrameError::MalformedHeader(_))]),
                "{:?} -> {:?}",
                String::from_utf8_lossy(bad),
                out
            );
            assert_eq!(p.state(), ParseState::AwaitingSentinel);
        }
    }

    #[test]
    fn test_header_bound() {
        let mut p = FrameParser::default();
        let mut bytes = b"?{".to_vec();
        bytes.extend(std::iter::repeat(b'A').take(HEADER_CAPACITY + 1));
        let out = feed(&mut p, &bytes);
        assert_eq!(out, vec![Err(FrameError::MalformedHeader("header too long"))]);
    }

    #[test]
    fn test_huge_declared_length_does_not_overflow() {
        let mut p = FrameParser::default();
        let out = feed(&mut p, b"?{X,99999999999999999999999}");
        assert!(matches!(out.as_slice(), [Err(FrameError::FrameTooLarge { .. })]));
    }

    #[test]
    fn test_encode() {
        let f = Frame::response("ROM", b"0010,FF".to_vec());
        assert_eq!(f.encode(), b"!{ROM,7}0010,FF");
        assert_eq!(Frame::response("AWAKE", Vec::new()).encode(), b"!{AWAKE,0}");
    }

    #[test]
    fn test_bounded_buf_rejects_overflow() {
        let mut buf: BoundedBuf<2> = BoundedBuf::new();
        assert!(buf.push(1).is_ok());
        assert!(buf.push(2).is_ok());
        assert_eq!(buf.push(3), Err(Overflow));
        assert_eq!(buf.as_slice(), &[1, 2]);
    }
}
