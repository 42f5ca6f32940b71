//! Case-insensitive helpers for the few headers the engine interprets
//!
//! Header names are compared ASCII case-insensitively, header values are
//! comma-separated token lists with optional whitespace.

#[inline(always)]
pub fn is_transfer_encoding(val: &str) -> bool {
    val.eq_ignore_ascii_case("transfer-encoding")
}

#[inline(always)]
pub fn is_content_length(val: &str) -> bool {
    val.eq_ignore_ascii_case("content-length")
}

#[inline(always)]
pub fn is_connection(val: &str) -> bool {
    val.eq_ignore_ascii_case("connection")
}

#[inline(always)]
pub fn is_expect(val: &str) -> bool {
    val.eq_ignore_ascii_case("expect")
}

#[inline(always)]
pub fn is_content_type(val: &str) -> bool {
    val.eq_ignore_ascii_case("content-type")
}

#[inline(always)]
pub fn is_date(val: &str) -> bool {
    val.eq_ignore_ascii_case("date")
}

fn trim(mut val: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = val.split_first() {
        match first {
            b'\r' | b'\n' | b' ' | b'\t' => val = rest,
            _ => break,
        }
    }
    while let Some((&last, rest)) = val.split_last() {
        match last {
            b'\r' | b'\n' | b' ' | b'\t' => val = rest,
            _ => break,
        }
    }
    val
}

/// Compares a single token ignoring surrounding whitespace and case
#[inline]
pub fn token_eq(val: &[u8], token: &str) -> bool {
    trim(val).eq_ignore_ascii_case(token.as_bytes())
}

/// Checks whether comma-separated header value contains `token`
pub fn has_token(val: &[u8], token: &str) -> bool {
    val.split(|&x| x == b',').any(|item| token_eq(item, token))
}

#[inline(always)]
// header value is byte sequence
// we need case insensitive comparison and strip out of the whitespace
pub fn is_close(val: &[u8]) -> bool {
    token_eq(val, "close")
}

#[inline(always)]
pub fn is_keep_alive(val: &[u8]) -> bool {
    token_eq(val, "keep-alive")
}

#[inline(always)]
// header value is byte sequence
// we need case insensitive comparison and strip out of the whitespace
pub fn is_chunked(val: &[u8]) -> bool {
    token_eq(val, "chunked")
}

#[inline(always)]
pub fn is_continue(val: &[u8]) -> bool {
    token_eq(val, "100-continue")
}

/// Returns lowercased media type of a `Content-Type` like value
pub fn media_type(val: &str) -> String {
    val.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// Finds parameter `key` in a `; key=value` list, unquoting the value
///
/// The first item (the media type or disposition type) is skipped. Quoted
/// values may contain `;` and backslash escapes.
pub fn param(val: &str, key: &str) -> Option<String> {
    let mut rest = match val.find(';') {
        Some(idx) => &val[idx+1..],
        None => return None,
    };
    loop {
        rest = rest.trim_start_matches(|c| c == ' ' || c == '\t' || c == ';');
        if rest.is_empty() {
            return None;
        }
        let eq = rest.find(|c| c == '=' || c == ';');
        let (name, after) = match eq {
            Some(idx) if rest.as_bytes()[idx] == b'=' => {
                (rest[..idx].trim(), &rest[idx+1..])
            }
            Some(idx) => {
                // parameter without a value
                rest = &rest[idx..];
                continue;
            }
            None => return None,
        };
        let after = after.trim_start();
        let (value, tail) = if after.starts_with('"') {
            let mut value = String::new();
            let mut escaped = false;
            let mut end = None;
            for (idx, ch) in after[1..].char_indices() {
                if escaped {
                    value.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    end = Some(idx + 2);
                    break;
                } else {
                    value.push(ch);
                }
            }
            match end {
                Some(end) => (value, &after[end..]),
                // unterminated quote, take everything
                None => (value, ""),
            }
        } else {
            let end = after.find(';').unwrap_or(after.len());
            (after[..end].trim().to_string(), &after[end..])
        };
        if name.eq_ignore_ascii_case(key) {
            return Some(value);
        }
        rest = tail;
    }
}

/// Checks that `name` is a valid header field name (an HTTP token)
pub fn is_token(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| match b {
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' |
        b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => true,
        _ => b.is_ascii_alphanumeric(),
    })
}

/// Checks that header value can't break the message framing
pub fn is_safe_value(value: &str) -> bool {
    !value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0)
}

#[cfg(test)]
mod test {
    use super::{is_content_length, is_transfer_encoding, is_connection};
    use super::{is_chunked, is_close, is_keep_alive, has_token};
    use super::{param, media_type, is_token, is_safe_value};

    #[test]
    fn test_content_len() {
        assert!(is_content_length("Content-Length"));
        assert!(is_content_length("content-length"));
        assert!(is_content_length("CONTENT-length"));
        assert!(is_content_length("CONTENT-LENGTH"));
        assert!(!is_content_length("Content-Lengths"));
    }

    #[test]
    fn test_transfer_encoding() {
        assert!(is_transfer_encoding("Transfer-Encoding"));
        assert!(is_transfer_encoding("transfer-ENCODING"));
        assert!(is_transfer_encoding("TRANSFER-Encoding"));
        assert!(is_transfer_encoding("TRANSFER-ENCODING"));
    }

    #[test]
    fn test_connection() {
        assert!(is_connection("Connection"));
        assert!(is_connection("CONNECTION"));
        assert!(is_connection("ConneCTION"));
        assert!(is_connection("connection"));
    }

    #[test]
    fn test_chunked() {
        assert!(is_chunked(b"chunked"));
        assert!(is_chunked(b"Chunked"));
        assert!(is_chunked(b"chuNKED"));
        assert!(is_chunked(b"CHUNKED"));
        assert!(is_chunked(b"   CHUNKED"));
        assert!(is_chunked(b"   CHUNKED  "));
        assert!(is_chunked(b"chunked  "));
        assert!(!is_chunked(b"chunkedx"));
    }

    #[test]
    fn test_close() {
        assert!(is_close(b"close"));
        assert!(is_close(b"Close"));
        assert!(is_close(b"clOSE"));
        assert!(is_close(b"CLOSE"));
        assert!(is_close(b" CLOSE"));
        assert!(is_close(b"   close   "));
        assert!(is_close(b"Close   "));
        assert!(!is_close(b"closed"));
    }

    #[test]
    fn test_token_list() {
        assert!(has_token(b"keep-alive, Upgrade", "upgrade"));
        assert!(has_token(b"TE,close", "close"));
        assert!(!has_token(b"TE,closer", "close"));
        assert!(is_keep_alive(b" Keep-Alive"));
    }

    #[test]
    fn test_param() {
        let ct = "multipart/form-data; boundary=----abc";
        assert_eq!(media_type(ct), "multipart/form-data");
        assert_eq!(param(ct, "boundary").as_deref(), Some("----abc"));
        let cd = r#"form-data; name="f;1"; filename="a \"b\".txt""#;
        assert_eq!(param(cd, "name").as_deref(), Some("f;1"));
        assert_eq!(param(cd, "FILENAME").as_deref(), Some("a \"b\".txt"));
        assert_eq!(param(cd, "size"), None);
        assert_eq!(param("text/plain", "charset"), None);
        assert_eq!(param("text/plain;flag;charset=utf-8", "charset").as_deref(),
                   Some("utf-8"));
    }

    #[test]
    fn test_validation() {
        assert!(is_token("X-Custom_Header"));
        assert!(!is_token("Bad Header"));
        assert!(!is_token(""));
        assert!(is_safe_value("text/plain; charset=utf-8"));
        assert!(!is_safe_value("evil\r\nSet-Cookie: x"));
    }
}
