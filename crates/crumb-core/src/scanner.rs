//! Argument block scanner
//!
//! Finds the end of a `{ ... }` literal block without parsing it. Quoted
//! text is opaque: braces and separators inside either quote style never
//! count, and a backslash inside quotes escapes the next byte.

use crate::error::MalformedToken;

/// Return the index of the `}` matching the `{` at `open`.
///
/// All structural characters are ASCII, so scanning bytes is safe for UTF-8
/// input: continuation bytes never collide with them.
pub fn find_block_end(text: &str, open: usize) -> Result<usize, MalformedToken> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return Err(MalformedToken::MissingBlock { at: open });
    }

    let mut depth = 0usize;
    let mut quote: Option<(u8, usize)> = None;
    let mut escaped = false;

    for (idx, &byte) in bytes.iter().enumerate().skip(open) {
        if let Some((q, _)) = quote {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == q {
                quote = None;
            }
            continue;
        }

        match byte {
            b'\'' | b'"' => quote = Some((byte, idx)),
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(idx);
                }
            }
            _ => {}
        }
    }

    match quote {
        Some((_, at)) => Err(MalformedToken::UnterminatedQuote { at }),
        None => Err(MalformedToken::UnbalancedBlock { at: open }),
    }
}
