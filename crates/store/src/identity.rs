//! Canonical package identities and their on-disk encoding.

use std::path::PathBuf;

/// A canonical string uniquely naming a resolved package, e.g.
/// `registry.example.org/foo/1.2.3`.
///
/// Two successful resolutions yielding equal identities must yield
/// fetches whose final on-disk content is byte-equivalent; this is the
/// invariant the whole store is keyed on.
pub type PackageIdentity = String;

/// Turn an identity into a filesystem-legal relative path under the
/// store root. Pure and stable: the same identity always yields the
/// same path, and the mapping never depends on anything but its input.
///
/// Unsafe path segments (`.`, `..`, empty segments) and characters that
/// are illegal or awkward in filenames (`/` inside a segment is the
/// natural identity separator and is kept as a path separator; `:`,
/// `*`, `?`, `"`, `<`, `>`, `|`, `\`, and whitespace are percent-escaped)
/// are normalized away.
#[must_use]
pub fn identity_to_path(identity: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for segment in identity.split('/') {
        let segment = match segment {
            "" | "." => continue,
            ".." => "__".to_string(),
            s => escape_segment(s),
        };
        out.push(segment);
    }
    out
}

fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\\' => {
                escaped.push('%');
                escaped.push_str(&format!("{:02x}", ch as u32));
            }
            c if c.is_whitespace() => escaped.push('_'),
            c => escaped.push(c),
        }
    }
    escaped
}
