//! Leftmost token search used to frame command responses.

/// Result of searching a buffer for a delimiter token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScan<'a> {
    /// Bytes before the first occurrence and bytes after it. The token itself is dropped.
    Found {
        prefix: &'a [u8],
        remainder: &'a [u8],
    },
    Missing,
}

/// Split `buffer` around the first occurrence of `token`.
///
/// An empty token matches at offset zero.
#[must_use]
pub fn scan<'a>(buffer: &'a [u8], token: &[u8]) -> TokenScan<'a> {
    match find_token(buffer, token) {
        Some(idx) => TokenScan::Found {
            prefix: &buffer[..idx],
            remainder: &buffer[idx + token.len()..],
        },
        None => TokenScan::Missing,
    }
}

/// Index of the leftmost occurrence of `token` in `buffer`.
#[must_use]
pub fn find_token(buffer: &[u8], token: &[u8]) -> Option<usize> {
    find_token_from(buffer, token, 0)
}

/// Like [`find_token`] but skips matches that start before `from`.
pub(crate) fn find_token_from(buffer: &[u8], token: &[u8], from: usize) -> Option<usize> {
    if token.is_empty() {
        return Some(from.min(buffer.len()));
    }
    buffer
        .get(from..)?
        .windows(token.len())
        .position(|window| window == token)
        .map(|idx| idx + from)
}

/// Earliest offset where a match could still begin once more bytes are appended to a
/// buffer of `scanned_len` bytes that has already been searched without success.
pub(crate) fn rescan_start(scanned_len: usize, token_len: usize) -> usize {
    scanned_len.saturating_sub(token_len.saturating_sub(1))
}

/// Length of the prefix of `buffer` that can never become part of a token occurrence,
/// assuming `buffer` itself contains no full match.
pub(crate) fn settled_len(buffer: &[u8], token: &[u8]) -> usize {
    let longest = token.len().saturating_sub(1).min(buffer.len());
    (1..=longest)
        .rev()
        .find(|&k| buffer.ends_with(&token[..k]))
        .map_or(buffer.len(), |k| buffer.len() - k)
}
