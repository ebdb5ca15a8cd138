//! Recovery of the wrapped value from decrypted plaintext.
//!
//! Plaintext has the fixed shape `{"json_wrapper":"<value>"}` but the buffer
//! still carries the cipher's block padding after the closing brace, so a
//! whole-document parse fails. Instead the bytes are read as a forward-only
//! stream of JSON tokens: the first string token is the wrapper key, the
//! second is the value, and nothing after it is examined.

use common::DecryptError;

/// Return the second string token found in `plaintext`.
///
/// # Errors
///
/// Returns [`DecryptError::Unwrap`] if a token cannot be read or the stream
/// ends before a second string token appears.
pub fn unwrap_value(plaintext: &[u8]) -> Result<String, DecryptError> {
    let mut tokens = Tokens::new(plaintext);
    let mut seen_key = false;
    loop {
        match tokens.next_token()? {
            Some(Token::String(s)) if seen_key => return Ok(s),
            Some(Token::String(_)) => seen_key = true,
            Some(Token::Punct | Token::Scalar) => {}
            None => {
                return Err(DecryptError::Unwrap(
                    "token stream ended before the wrapped value".into(),
                ))
            }
        }
    }
}

enum Token {
    /// One of `{ } [ ] : ,`.
    Punct,
    /// Number, `true`, `false` or `null`.
    Scalar,
    String(String),
}

struct Tokens<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn next_token(&mut self) -> Result<Option<Token>, DecryptError> {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
        let Some(b) = self.peek() else {
            return Ok(None);
        };
        let token = match b {
            b'{' | b'}' | b'[' | b']' | b':' | b',' => {
                self.pos += 1;
                Token::Punct
            }
            b'"' => self.string()?,
            b'-' | b'0'..=b'9' => {
                while matches!(self.peek(), Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')) {
                    self.pos += 1;
                }
                Token::Scalar
            }
            b't' | b'f' | b'n' => self.keyword()?,
            other => {
                return Err(DecryptError::Unwrap(format!(
                    "unexpected byte 0x{other:02x} at offset {}",
                    self.pos
                )))
            }
        };
        Ok(Some(token))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn string(&mut self) -> Result<Token, DecryptError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek() {
                None => {
                    return Err(DecryptError::Unwrap(format!(
                        "unterminated string starting at offset {start}"
                    )))
                }
                Some(b'\\') => self.pos += 2,
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        // The literal is complete; let serde_json handle escapes and UTF-8.
        serde_json::from_slice::<String>(&self.input[start..self.pos])
            .map(Token::String)
            .map_err(|e| {
                DecryptError::Unwrap(format!("invalid string literal at offset {start}: {e}"))
            })
    }

    fn keyword(&mut self) -> Result<Token, DecryptError> {
        let rest = &self.input[self.pos..];
        for word in [&b"true"[..], &b"false"[..], &b"null"[..]] {
            if rest.starts_with(word) {
                self.pos += word.len();
                return Ok(Token::Scalar);
            }
        }
        Err(DecryptError::Unwrap(format!(
            "invalid literal at offset {}",
            self.pos
        )))
    }
}
