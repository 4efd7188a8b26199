//! Helpers for path manipulations
//!
//! Paths are handled as raw bytes: a percent-decoded request path need not be
//! UTF-8, and neither need the names the application sees.

use crate::errors::{Error, Result};

/// Normalizes a request path.
///
/// The following operations are performed:
///
/// 1. The path must lead with a `'/'`, or the path is ill-formed for our
///    purposes and we return an `Err`. The leading slash is kept.
/// 2. Percent-encoded bytes are decoded. Bogus percent-encoding, like `b"%bo"`,
///    will return `Err`.
/// 3. Sequences of `'/'` collapse, `.` segments vanish and `..` removes the
///    segment before it. A `..` with nothing left to remove returns `Err`.
/// 4. A trailing `'/'` is kept, since it asks for a directory index.
pub fn normalize_path(path: &[u8]) -> Result<Vec<u8>> {
    if path.first() != Some(&b'/') {
        return Err(Error::PathNotInOriginForm);
    }

    let decoded = percent_decode(path)?;

    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in decoded.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => (),
            b".." => {
                if segments.pop().is_none() {
                    return Err(Error::PathEscapesRoot);
                }
            },
            _ => segments.push(segment)
        }
    }

    let mut buffer = Vec::with_capacity(decoded.len());
    for segment in &segments {
        buffer.push(b'/');
        buffer.extend_from_slice(segment);
    }
    if buffer.is_empty() || decoded.ends_with(b"/") {
        buffer.push(b'/');
    }

    Ok(buffer)
}

fn percent_decode(path: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(path.len());

    let mut i = 0;
    while i < path.len() {
        match path[i] {
            b'%' => {
                if i + 2 >= path.len() {
                    return Err(Error::IllegalPercentEncoding);
                }

                let high_nybble = path[i + 1];
                let low_nybble = path[i + 2];

                if !is_hexit(high_nybble) || !is_hexit(low_nybble) {
                    return Err(Error::IllegalPercentEncoding);
                }

                buffer.push(from_hexit(high_nybble) << 4 |
                            from_hexit(low_nybble));

                i += 3;
            },
            b => {
                buffer.push(b);
                i += 1;
            }
        }
    }

    Ok(buffer)
}

/// Lexically cleans a path: duplicate slashes collapse, `.` segments vanish,
/// `..` eats the segment before it.
///
/// A rooted path never climbs above `/`; a relative one keeps leading `..`
/// segments. An empty result is `"."`.
pub fn clean(path: &[u8]) -> Vec<u8> {
    let rooted = path.first() == Some(&b'/');

    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in path.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => (),
            b".." => match segments.last() {
                Some(&last) if last != b".." => { segments.pop(); },
                _ if rooted => (),
                _ => segments.push(segment)
            },
            _ => segments.push(segment)
        }
    }

    let mut cleaned = Vec::with_capacity(path.len());
    if rooted {
        cleaned.push(b'/');
    }
    cleaned.extend(segments.join(&b"/"[..]));

    if cleaned.is_empty() {
        cleaned.push(b'.');
    }
    cleaned
}

/// Joins two paths with a `'/'` and cleans the result
///
/// Empty elements are ignored; joining two empty paths gives an empty path.
pub fn join(base: &[u8], path: &[u8]) -> Vec<u8> {
    let parts: Vec<&[u8]> = [base, path].iter()
        .cloned()
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        return Vec::new();
    }

    clean(&parts.join(&b"/"[..]))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_keeps_the_leading_slash() {
        assert_eq!(normalize_path(b"/blah").unwrap(), b"/blah");
        assert_eq!(normalize_path(b"//bleh").unwrap(), b"/bleh");
        assert_eq!(normalize_path(b"/").unwrap(), b"/");
    }

    #[test]
    fn normalize_collapses_embedded_slash_sequences() {
        assert_eq!(normalize_path(b"/foo//bar").unwrap(), b"/foo/bar");
    }

    #[test]
    fn normalize_decodes_percents() {
        assert_eq!(normalize_path(b"/foo%20bar").unwrap(), b"/foo bar");
    }

    #[test]
    fn normalize_handles_trailing_percents_correctly() {
        assert_eq!(normalize_path(b"/trail%20").unwrap(), b"/trail ");
    }

    #[test]
    fn normalize_errors_on_bogus_percent() {
        assert!(normalize_path(b"/bog%us").is_err());
        assert!(normalize_path(b"/cut%2").is_err());
    }

    #[test]
    fn normalize_errors_without_leading_slash() {
        assert!(normalize_path(b"bogus").is_err());
        assert!(normalize_path(b"").is_err());
    }

    #[test]
    fn normalize_keeps_directory_slashes() {
        assert_eq!(normalize_path(b"/blog/").unwrap(), b"/blog/");
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        assert_eq!(normalize_path(b"/a/./b/../c").unwrap(), b"/a/c");
        match normalize_path(b"/a/../../etc/passwd") {
            Err(Error::PathEscapesRoot) => (),
            other => panic!("{:?}", other)
        }
        match normalize_path(b"/%2e%2e/etc/passwd") {
            Err(Error::PathEscapesRoot) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn clean_matches_lexical_rules() {
        assert_eq!(clean(b"/srv//www/./x/../y"), b"/srv/www/y");
        assert_eq!(clean(b"/.."), b"/");
        assert_eq!(clean(b"../a/.."), b"..");
        assert_eq!(clean(b""), b".");
        assert_eq!(clean(b"www/"), b"www");
    }

    #[test]
    fn join_skips_empty_elements() {
        assert_eq!(join(b"/srv/www", b"/extra"), b"/srv/www/extra");
        assert_eq!(join(b"/srv/www/", b""), b"/srv/www");
        assert_eq!(join(b"", b""), b"");
        assert_eq!(join(b"/srv/www", b"/blog/index.php"),
                   b"/srv/www/blog/index.php");
    }

    #[test]
    fn from_hexit_works() {
        for x in 0x0 .. 0x10 {
            let digit = ::std::char::from_digit(x, 16).unwrap() as u8;
            assert_eq!(from_hexit(digit), x as u8);
            assert_eq!(from_hexit(digit.to_ascii_uppercase()), x as u8);
        }
    }
}

/// Returns `true` iff the byte is a hexadecimal digit according to ASCII
fn is_hexit(x: u8) -> bool {
    x.is_ascii_hexdigit()
}

/// Converts from a hexadecimal digit to its value
fn from_hexit(x: u8) -> u8 {
    match x {
        b'0' ..= b'9' => x - b'0',
        b'A' ..= b'F' => x - b'A' + 10,
        b'a' ..= b'f' => x - b'a' + 10,
        _ => panic!("Contract violation: from_hexit expected a hexit, got 0x{:X}", x)
    }
}
