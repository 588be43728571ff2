//! Incremental UTF-8 decoding of raw output chunks.

/// Longest possible incomplete UTF-8 tail.
const MAX_PENDING: usize = 3;

/// Turns a stream of byte chunks into text without splitting characters.
///
/// A multi-byte character cut across two chunks is held back until the rest
/// arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            // incomplete sequence at the end of the chunk
                            if after.len() <= MAX_PENDING {
                                self.pending = after.to_vec();
                            } else {
                                out.push(char::REPLACEMENT_CHARACTER);
                            }
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial character.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            self.pending.clear();
            Some(char::REPLACEMENT_CHARACTER.to_string())
        }
    }
}
