//! Pre-parse removal of hostile `<link>` / `<atom:link>` elements.
//!
//! Some feed generators leak `file://` or `javascript:` hrefs into channel
//! metadata. Those elements are cut out of the raw text before the document
//! ever reaches the XML parser; everything else is copied through untouched.

use std::borrow::Cow;

/// Schemes whose link elements are removed. Compared case-insensitively.
const UNSAFE_SCHEMES: [&[u8]; 4] = [b"file:", b"javascript:", b"data:", b"ftp:"];

/// Element names that are inspected, longest first.
const LINK_NAMES: [&[u8]; 2] = [b"atom:link", b"link"];

/// Attributes that carry the link target.
const TARGET_ATTRS: [&[u8]; 2] = [b"href", b"url"];

/// Strip unsafe link elements from feed text.
///
/// Returns `Cow::Borrowed` when nothing was removed.
pub fn sanitize_feed_xml(input: &str) -> Cow<'_, str> {
    match sanitize_feed_bytes(input.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(input),
        // Cuts only ever happen at ASCII '<' / '>' boundaries, so UTF-8 stays intact
        Cow::Owned(bytes) => Cow::Owned(
            String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
        ),
    }
}

/// Byte-level variant for bodies whose encoding has not been decoded yet.
///
/// Passes repeat until nothing more is removed, so the result is a fixpoint:
/// sanitizing it again returns it unchanged.
pub fn sanitize_feed_bytes(input: &[u8]) -> Cow<'_, [u8]> {
    let Some(mut current) = strip_pass(input) else {
        return Cow::Borrowed(input);
    };
    // Each productive pass removes at least one byte, so this terminates
    while let Some(next) = strip_pass(&current) {
        current = next;
    }
    Cow::Owned(current)
}

/// One left-to-right scan. `None` means the input had nothing to remove.
fn strip_pass(input: &[u8]) -> Option<Vec<u8>> {
    let mut out: Option<Vec<u8>> = None;
    let mut copied_to = 0;
    let mut pos = 0;

    while let Some(offset) = input[pos..].iter().position(|&b| b == b'<') {
        let start = pos + offset;
        let Some(name) = link_name_at(&input[start + 1..]) else {
            pos = start + 1;
            continue;
        };
        let Some(tag_end) = find_tag_end(input, start + 1 + name.len()) else {
            break;
        };

        let attrs = &input[start + 1 + name.len()..tag_end];
        if !has_unsafe_target(attrs) {
            pos = tag_end + 1;
            continue;
        }

        let mut remove_end = tag_end + 1;
        if !is_self_closing(input, tag_end) {
            if let Some(close_end) = find_matching_close(input, remove_end, name) {
                remove_end = close_end;
            }
        }

        let buf = out.get_or_insert_with(|| Vec::with_capacity(input.len()));
        buf.extend_from_slice(&input[copied_to..start]);
        copied_to = remove_end;
        pos = remove_end;
    }

    out.map(|mut buf| {
        buf.extend_from_slice(&input[copied_to..]);
        buf
    })
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

fn is_name_boundary(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'/' || b == b'>'
}

/// If `rest` (the bytes after a `<`) opens a link element, return its name.
fn link_name_at(rest: &[u8]) -> Option<&'static [u8]> {
    LINK_NAMES.into_iter().find(|name| {
        starts_with_ignore_case(rest, name)
            && rest.get(name.len()).is_some_and(|&b| is_name_boundary(b))
    })
}

/// Index of the `>` closing the tag that starts before `from`, skipping quoted values.
fn find_tag_end(input: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in input.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    None
}

fn is_self_closing(input: &[u8], tag_end: usize) -> bool {
    input[..tag_end]
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'/')
}

/// Walk the attribute section of a tag and report whether any target
/// attribute points at an unsafe scheme.
fn has_unsafe_target(attrs: &[u8]) -> bool {
    let mut i = 0;
    let len = attrs.len();

    while i < len {
        while i < len && (attrs[i].is_ascii_whitespace() || attrs[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < len && !attrs[i].is_ascii_whitespace() && attrs[i] != b'=' && attrs[i] != b'/'
        {
            i += 1;
        }
        let name = &attrs[name_start..i];
        if name.is_empty() {
            i += 1;
            continue;
        }

        while i < len && attrs[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len || attrs[i] != b'=' {
            continue;
        }
        i += 1;
        while i < len && attrs[i].is_ascii_whitespace() {
            i += 1;
        }

        let value = match attrs.get(i) {
            Some(&q) if q == b'"' || q == b'\'' => {
                let value_start = i + 1;
                let value_end = attrs[value_start..]
                    .iter()
                    .position(|&b| b == q)
                    .map_or(len, |p| value_start + p);
                i = value_end + 1;
                &attrs[value_start..value_end]
            }
            _ => {
                let value_start = i;
                while i < len && !attrs[i].is_ascii_whitespace() {
                    i += 1;
                }
                &attrs[value_start..i]
            }
        };

        let is_target = TARGET_ATTRS.iter().any(|t| name.eq_ignore_ascii_case(t));
        if is_target && has_unsafe_scheme(value) {
            return true;
        }
    }

    false
}

/// Scheme check that ignores leading whitespace and embedded tab/CR/LF,
/// the same leniency URL parsers apply.
fn has_unsafe_scheme(value: &[u8]) -> bool {
    let mut scheme = Vec::with_capacity(12);
    for &b in value.iter().skip_while(|b| b.is_ascii_whitespace()) {
        if matches!(b, b'\t' | b'\n' | b'\r') {
            continue;
        }
        scheme.push(b.to_ascii_lowercase());
        if b == b':' || scheme.len() > 11 {
            break;
        }
    }
    UNSAFE_SCHEMES.iter().any(|s| scheme.starts_with(s))
}

/// Find the end (exclusive) of the close tag matching an open `name` element
/// whose start tag ended just before `from`. Same-name elements nest.
fn find_matching_close(input: &[u8], from: usize, name: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = from;

    while let Some(offset) = input[pos..].iter().position(|&b| b == b'<') {
        let start = pos + offset;
        let rest = &input[start + 1..];

        if rest.first() == Some(&b'/')
            && starts_with_ignore_case(&rest[1..], name)
            && rest
                .get(1 + name.len())
                .is_some_and(|&b| b.is_ascii_whitespace() || b == b'>')
        {
            let end = find_tag_end(input, start + 2 + name.len())?;
            if depth == 0 {
                return Some(end + 1);
            }
            depth -= 1;
            pos = end + 1;
            continue;
        }

        if link_name_at(rest) == Some(name) {
            let end = find_tag_end(input, start + 1 + name.len())?;
            if !is_self_closing(input, end) {
                depth += 1;
            }
            pos = end + 1;
            continue;
        }

        pos = start + 1;
    }

    None
}
