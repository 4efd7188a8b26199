//! Smol utilities for logging

/// Make an Ascii-safe string
pub fn ascii_escape(s: &[u8]) -> String {
    s.iter()
        .flat_map(|&b| ::std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escapes_control_and_high_bytes() {
        assert_eq!(ascii_escape(b"PHP Warning:\n\xff"), "PHP Warning:\\n\\xff");
    }
}
