//! Address patterns with `*` wildcards
//!
//! A `*` matches any run of characters inside one path segment and never
//! crosses a `/`. `/live/track/*/volume` matches `/live/track/3/volume` but
//! not `/live/track/3/send/volume`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPattern {
    raw: String,
    segments: Vec<String>,
    literal_segments: usize,
}

impl AddressPattern {
    pub fn new(pattern: &str) -> Self {
        let segments: Vec<String> = split(pattern).map(str::to_string).collect();
        let literal_segments = segments.iter().filter(|s| !s.contains('*')).count();

        Self {
            raw: pattern.to_string(),
            segments,
            literal_segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern contains no wildcard at all
    pub fn is_exact(&self) -> bool {
        !self.raw.contains('*')
    }

    /// Number of segments without a wildcard; higher is more specific
    pub fn specificity(&self) -> usize {
        self.literal_segments
    }

    pub fn matches(&self, address: &str) -> bool {
        let mut parts = split(address);
        for segment in &self.segments {
            match parts.next() {
                Some(part) if glob_match(segment, part) => {}
                _ => return false,
            }
        }
        parts.next().is_none()
    }
}

fn split(address: &str) -> impl Iterator<Item = &str> {
    address.split('/').filter(|s| !s.is_empty())
}

/// Glob match of a single segment where `*` matches zero or more characters
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let pieces: Vec<&str> = pattern.split('*').collect();
    let first = pieces[0];
    let last = pieces[pieces.len() - 1];

    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];

    for piece in &pieces[1..pieces.len() - 1] {
        match rest.find(piece) {
            Some(pos) => rest = &rest[pos + piece.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        let p = AddressPattern::new("/live/test");
        assert!(p.is_exact());
        assert!(p.matches("/live/test"));
        assert!(!p.matches("/live/test/extra"));
        assert!(!p.matches("/live"));
    }

    #[test]
    fn test_segment_wildcard() {
        let p = AddressPattern::new("/live/track/*/volume");
        assert!(!p.is_exact());
        assert_eq!(p.specificity(), 3);
        assert!(p.matches("/live/track/0/volume"));
        assert!(p.matches("/live/track/12/volume"));
        assert!(!p.matches("/live/track/0/pan"));
        assert!(!p.matches("/live/track/0/send/volume"));
    }

    #[test]
    fn test_wildcard_inside_segment() {
        let p = AddressPattern::new("/live/clip/*/*/sta*");
        assert!(p.matches("/live/clip/1/2/status"));
        assert!(p.matches("/live/clip/1/2/sta"));
        assert!(!p.matches("/live/clip/1/2/stop"));

        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abde"));
        assert!(glob_match("*", ""));
    }
}
