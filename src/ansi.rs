use bytes::BytesMut;

pub const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Upper bound on bytes held back while waiting for a sequence terminator.
/// Once the carry grows past this, the tokenizer force-consumes a byte so a
/// malformed stream can never pin unbounded memory.
pub const CARRY_CAPACITY: usize = 8 * 1024;

/// A single decoded unit of the inbound stream.
///
/// Every `Csi` is complete by construction; partial sequences stay inside the
/// tokenizer's carry buffer until the terminator arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnsiToken {
    /// A run of in-band text, including control characters such as CR/LF.
    Text(String),
    /// A complete control sequence: `ESC '[' params final`.
    Csi { params: String, final_byte: u8 },
    /// A complete operating-system-command sequence, terminated by BEL or ST.
    Osc(String),
    /// A byte that could not be classified (lone ESC, invalid UTF-8, ..).
    Raw(u8),
}

enum Step {
    /// Consume `len` bytes from the front of the buffer, yielding a token.
    Token(usize, AnsiToken),
    /// The buffer holds the prefix of a token; wait for the next chunk.
    Incomplete,
    /// Nothing left to consume.
    Empty,
}

/// Incremental tokenizer for the raw server stream.
///
/// The tokenizer is a pure transducer: it never drops or re-orders bytes,
/// and feeding the same input under any chunking yields the same token
/// sequence (up to coalescing of adjacent text runs).
#[derive(Debug, Default)]
pub struct AnsiTokenizer {
    carry: BytesMut,
}

impl AnsiTokenizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk of the inbound stream, returning every token that is
    /// now complete. Adjacent text runs within a single call are merged.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<AnsiToken> {
        self.carry.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            match try_consume(&self.carry) {
                Step::Token(len, token) => {
                    let _ = self.carry.split_to(len);
                    push_token(&mut out, token);
                }
                Step::Incomplete if self.carry.len() > CARRY_CAPACITY => {
                    // no forward progress is possible and the carry is full;
                    // give up on the pending sequence one byte at a time
                    let byte = self.carry.split_to(1)[0];
                    push_token(&mut out, AnsiToken::Raw(byte));
                }
                Step::Incomplete | Step::Empty => break,
            }
        }

        out
    }

    /// Bytes currently held back waiting for a sequence terminator.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn push_token(out: &mut Vec<AnsiToken>, token: AnsiToken) {
    if let (Some(AnsiToken::Text(prev)), AnsiToken::Text(next)) = (out.last_mut(), &token) {
        prev.push_str(next);
        return;
    }

    out.push(token);
}

fn try_consume(buf: &[u8]) -> Step {
    let Some(&first) = buf.first() else {
        return Step::Empty;
    };

    if first != ESC {
        return consume_text(buf);
    }

    let Some(&intro) = buf.get(1) else {
        return Step::Incomplete;
    };

    match intro {
        b'[' => consume_csi(buf),
        b']' => consume_osc(buf),
        // not a sequence we understand; surface the ESC on its own and let
        // the following byte re-enter the stream as text
        _ => Step::Token(1, AnsiToken::Raw(ESC)),
    }
}

fn consume_csi(buf: &[u8]) -> Step {
    let mut i = 2;
    while i < buf.len() && matches!(buf[i], b'0'..=b'9' | b';') {
        i += 1;
    }

    if i == buf.len() {
        return Step::Incomplete;
    }

    let final_byte = buf[i];
    if final_byte.is_ascii_alphabetic() {
        Step::Token(
            i + 1,
            AnsiToken::Csi {
                params: String::from_utf8_lossy(&buf[2..i]).into_owned(),
                final_byte,
            },
        )
    } else {
        // malformed escape: emit the introducer raw, re-scan the rest
        Step::Token(1, AnsiToken::Raw(ESC))
    }
}

fn consume_osc(buf: &[u8]) -> Step {
    let mut i = 2;
    while i < buf.len() {
        match buf[i] {
            BEL => {
                return Step::Token(
                    i + 1,
                    AnsiToken::Osc(String::from_utf8_lossy(&buf[2..i]).into_owned()),
                );
            }
            ESC => {
                return match buf.get(i + 1) {
                    Some(b'\\') => Step::Token(
                        i + 2,
                        AnsiToken::Osc(String::from_utf8_lossy(&buf[2..i]).into_owned()),
                    ),
                    // an ESC that doesn't begin the ST terminator aborts the
                    // sequence; surface the introducer raw
                    Some(_) => Step::Token(1, AnsiToken::Raw(ESC)),
                    None => Step::Incomplete,
                };
            }
            _ => i += 1,
        }
    }

    Step::Incomplete
}

fn consume_text(buf: &[u8]) -> Step {
    let end = buf
        .iter()
        .position(|&b| b == ESC)
        .unwrap_or(buf.len());

    match std::str::from_utf8(&buf[..end]) {
        Ok(s) => Step::Token(end, AnsiToken::Text(s.to_owned())),
        Err(e) if e.valid_up_to() > 0 => {
            let valid = e.valid_up_to();
            Step::Token(
                valid,
                AnsiToken::Text(
                    std::str::from_utf8(&buf[..valid])
                        .expect("validated by valid_up_to")
                        .to_owned(),
                ),
            )
        }
        // a rune truncated by the chunk boundary stays in the carry; a byte
        // that can never begin a rune is surfaced raw
        Err(e) if e.error_len().is_none() && end == buf.len() => Step::Incomplete,
        Err(_) => Step::Token(1, AnsiToken::Raw(buf[0])),
    }
}

/// Streaming ANSI stripper feeding the detector, parser and script triggers.
///
/// Shares the tokenizer's carry-over behaviour, so it is split-invariant for
/// the same reason the tokenizer is.
#[derive(Debug, Default)]
pub struct AnsiStripper {
    tokenizer: AnsiTokenizer,
}

impl AnsiStripper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the in-band text of `chunk`, with all escape sequences (and
    /// unclassifiable bytes) removed. Control characters such as CR/LF pass
    /// through untouched.
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        let mut out = String::new();
        for token in self.tokenizer.feed(chunk) {
            if let AnsiToken::Text(s) = token {
                out.push_str(&s);
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::{AnsiStripper, AnsiToken, AnsiTokenizer, CARRY_CAPACITY};

    fn coalesce(tokens: Vec<AnsiToken>) -> Vec<AnsiToken> {
        let mut out: Vec<AnsiToken> = Vec::new();
        for token in tokens {
            super::push_token(&mut out, token);
        }
        out
    }

    #[test]
    fn csi_split_across_chunks() {
        let mut tokenizer = AnsiTokenizer::new();

        let mut tokens = tokenizer.feed(b"content\x1b");
        tokens.extend(tokenizer.feed("[40m░\x1b[0mmore".as_bytes()));

        assert_eq!(
            tokens,
            vec![
                AnsiToken::Text("content".to_string()),
                AnsiToken::Csi {
                    params: "40".to_string(),
                    final_byte: b'm',
                },
                AnsiToken::Text("░".to_string()),
                AnsiToken::Csi {
                    params: String::new(),
                    final_byte: b'm',
                },
                AnsiToken::Text("more".to_string()),
            ]
        );
    }

    #[test]
    fn split_invariant_over_all_partitions() {
        let input = "one\x1b[1;33mtwo░\x1b[0m\r\nthree\x1b]0;title\x07tail".as_bytes();

        let mut whole = AnsiTokenizer::new();
        let expected = coalesce(whole.feed(input));

        for i in 0..=input.len() {
            for j in i..=input.len() {
                let mut tokenizer = AnsiTokenizer::new();
                let mut tokens = tokenizer.feed(&input[..i]);
                tokens.extend(tokenizer.feed(&input[i..j]));
                tokens.extend(tokenizer.feed(&input[j..]));

                assert_eq!(coalesce(tokens), expected, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn malformed_escape_surfaces_introducer() {
        let mut tokenizer = AnsiTokenizer::new();
        let tokens = tokenizer.feed(b"\x1b[12\x08rest");

        assert_eq!(
            tokens,
            vec![
                AnsiToken::Raw(super::ESC),
                AnsiToken::Text("[12\u{8}rest".to_string()),
            ]
        );
    }

    #[test]
    fn unterminated_sequence_is_bounded() {
        let mut tokenizer = AnsiTokenizer::new();

        let mut pathological = b"\x1b[".to_vec();
        pathological.extend(std::iter::repeat(b'9').take(2 * CARRY_CAPACITY));

        let _ = tokenizer.feed(&pathological);
        assert!(tokenizer.pending() <= CARRY_CAPACITY + 1);
    }

    #[test]
    fn osc_terminated_by_st() {
        let mut tokenizer = AnsiTokenizer::new();
        let tokens = tokenizer.feed(b"\x1b]0;hello\x1b\\after");

        assert_eq!(
            tokens,
            vec![
                AnsiToken::Osc("0;hello".to_string()),
                AnsiToken::Text("after".to_string()),
            ]
        );
    }

    #[test]
    fn stripper_preserves_line_breaks() {
        let mut stripper = AnsiStripper::new();

        let mut text = stripper.feed(b"\x1b[1;33mSector  : 42\r\n\x1b");
        text.push_str(&stripper.feed(b"[0mWarps to Sector(s) :  43"));

        assert_eq!(text, "Sector  : 42\r\nWarps to Sector(s) :  43");
    }

    #[test]
    fn stripper_is_split_invariant() {
        let input = "a\x1b[31mb\x1b[0mc\r\nd".as_bytes();

        let mut whole = AnsiStripper::new();
        let expected = whole.feed(input);

        for i in 0..=input.len() {
            let mut stripper = AnsiStripper::new();
            let mut text = stripper.feed(&input[..i]);
            text.push_str(&stripper.feed(&input[i..]));

            assert_eq!(text, expected, "split at {i}");
        }
    }
}
