/// Appends `value` to `out`, doubling every occurrence of `quote`.
///
/// Works on raw bytes so that multi-byte quote sequences and already-encoded
/// field bytes are handled the same way as UTF-8 text.
pub fn push_quote_doubled<E: Extend<u8>>(out: &mut E, value: &[u8], quote: &[u8]) {
    if quote.is_empty() {
        out.extend(value.iter().copied());
        return;
    }

    let mut rest = value;
    while let Some(pos) = find(rest, quote) {
        let end = pos + quote.len();
        out.extend(rest[..end].iter().copied());
        out.extend(quote.iter().copied());
        rest = &rest[end..];
    }
    out.extend(rest.iter().copied());
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reverses [`push_quote_doubled`] for the body of a quoted field.
pub fn undouble_quotes(value: &[u8], quote: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut rest = value;
    while !rest.is_empty() {
        if !quote.is_empty() && rest.starts_with(quote) {
            out.extend_from_slice(quote);
            rest = &rest[quote.len()..];
            if rest.starts_with(quote) {
                rest = &rest[quote.len()..];
            }
        } else {
            out.push(rest[0]);
            rest = &rest[1..];
        }
    }
    out
}

/// Escapes a string literal for use inside single quotes in SQL text.
pub fn escape_sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}
