//! Translation file generation, conversion and upgrading (`.dxt`).
//!
//! Two text formats exist. The *public* file is what translators receive:
//! one escaped string per line, nothing else. The *private* file is the
//! developers' master copy: strings grouped under `@key` headers,
//! interleaved with `#` comment lines from marked comments, and optionally
//! suffixed with `&XXXXXXXX` stable ids so files can be upgraded across
//! versions of the dialogue.
//!
//! Conversions bridge the two: private→public strips everything but the
//! strings; public→private re-injects translated strings into a matching
//! private file; upgrading maps an older file's strings onto a newer
//! private file by stable id, marking unmatched lines `[new]`.

use std::fmt::Write as _;

use crate::binary::BinaryWriter;
use crate::context::CompileContext;
use crate::token::escape_string;

/// Failure in a translation conversion.
#[derive(Debug)]
pub struct TranslationError {
    pub message: String,
}

impl std::fmt::Display for TranslationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TranslationError {}

/// Decodes the backslash escapes used in translation files (the inverse of
/// [`escape_string`]).
pub fn unescape_string(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('a') => out.push('\u{07}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some('f') => out.push('\u{0C}'),
            Some('b') => out.push('\u{08}'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Renders the public translation file: every localizable string, escaped,
/// one per line.
pub fn generate_public_file(ctx: &CompileContext) -> String {
    let mut out = String::new();
    for info in &ctx.translation_info {
        if !info.is_comment {
            let _ = writeln!(out, "{}", escape_string(&info.text));
        }
    }
    out
}

/// Renders the private translation file: strings grouped by key with
/// translator comments, and stable ids when the project uses them.
pub fn generate_private_file(ctx: &CompileContext) -> String {
    let mut out = String::new();
    let mut prev_key: Option<&str> = None;
    let mut written_anything = false;

    for info in &ctx.translation_info {
        if prev_key != Some(info.key.as_str()) {
            if written_anything {
                out.push('\n');
            }
            prev_key = Some(info.key.as_str());
            if !info.key.is_empty() {
                let _ = writeln!(out, "@{}", info.key);
                written_anything = true;
            }
        }

        if info.is_comment {
            for line in info.text.split('\n') {
                // Collapse leading whitespace to a single space.
                let trimmed = line.trim_start();
                if trimmed.len() != line.len() && !trimmed.is_empty() {
                    let _ = writeln!(out, "# {}", trimmed);
                } else {
                    let _ = writeln!(out, "#{}", line);
                }
            }
            written_anything = true;
        } else {
            let _ = write!(out, "\"{}\"", escape_string(&info.text));
            if ctx.project.options.use_string_ids {
                if let Some(id) = info.localized_string_id {
                    let _ = write!(out, "&{:08x}", id);
                }
            }
            out.push('\n');
            written_anything = true;
        }
    }
    out
}

/// True when the line is a string line of a private file; returns the
/// content between the outermost quotes (still escaped).
fn private_string_line(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('"') {
        return None;
    }
    let last_quote = trimmed.rfind('"')?;
    if last_quote == 0 {
        return None;
    }
    Some(&trimmed[1..last_quote])
}

/// Converts a private file to the public form: string lines only, with
/// headers, comments and ids stripped.
pub fn convert_private_to_public(private: &str) -> String {
    let mut out = String::new();
    for line in private.lines() {
        if let Some(text) = private_string_line(line) {
            let _ = writeln!(out, "{}", text);
        }
    }
    out
}

/// Converts a public file back into the private form by substituting its
/// strings into a matching private file (keeping headers, comments and id
/// suffixes intact).
pub fn convert_public_to_private(
    public: &str,
    matching_private: &str,
) -> Result<String, TranslationError> {
    let mut out = String::new();
    let mut public_lines = public.lines();
    for line in matching_private.lines() {
        if private_string_line(line).is_some() {
            let Some(replacement) = public_lines.next() else {
                return Err(TranslationError {
                    message: "Private translation file has too many strings for this public file."
                        .to_string(),
                });
            };
            let suffix_at = line.rfind('"').unwrap_or(line.len() - 1);
            let _ = writeln!(out, "\"{}{}", replacement, &line[suffix_at..]);
        } else {
            let _ = writeln!(out, "{}", line);
        }
    }
    Ok(out)
}

/// Parses the `&XXXXXXXX` suffix of a private string line.
fn line_string_id(line: &str) -> Option<u32> {
    let id_at = line.rfind('&')?;
    if id_at < line.rfind('"')? {
        return None;
    }
    u32::from_str_radix(line[id_at + 1..].trim_end().get(..8)?, 16).ok()
}

/// Upgrades an older translation file onto a newer private file: strings
/// with matching stable ids are carried over, everything else is kept from
/// the newer file and marked `[new]`.
pub fn upgrade_file(
    older: &str,
    older_is_private: bool,
    newer_private: &str,
) -> Result<String, TranslationError> {
    let mut older_by_id: std::collections::HashMap<u32, String> = std::collections::HashMap::new();

    if older_is_private {
        for line in older.lines() {
            if let Some(text) = private_string_line(line) {
                let Some(id) = line_string_id(line) else {
                    return Err(TranslationError {
                        message: "Missing string ID in private translation file!".to_string(),
                    });
                };
                older_by_id.insert(id, text.to_string());
            }
        }
    } else {
        for (index, line) in older.lines().enumerate() {
            older_by_id.insert(index as u32, line.to_string());
        }
    }

    let mut out = String::new();
    for line in newer_private.lines() {
        if private_string_line(line).is_some() {
            match line_string_id(line) {
                Some(id) => match older_by_id.get(&id) {
                    Some(text) => {
                        let _ = writeln!(out, "\"{}\"&{:08x}", text, id);
                    }
                    None => {
                        let _ = writeln!(out, "{} [new]", line);
                    }
                },
                None => {
                    let _ = writeln!(out, "{} [new]", line);
                }
            }
        } else {
            let _ = writeln!(out, "{}", line);
        }
    }
    Ok(out)
}

/// Converts a translation file into the binary string-table form: a `u32`
/// count followed by NUL-terminated unescaped strings.
pub fn convert_to_binary(input: &str, is_private: bool) -> Vec<u8> {
    let strings: Vec<String> = if is_private {
        input
            .lines()
            .filter_map(private_string_line)
            .map(unescape_string)
            .collect()
    } else {
        input.lines().map(unescape_string).collect()
    };

    let mut w = BinaryWriter::new();
    w.write_u32(strings.len() as u32);
    for s in &strings {
        w.write_cstr(s);
    }
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TranslationInfo;
    use crate::project::ProjectFormat;

    fn context_with(records: Vec<TranslationInfo>, use_ids: bool) -> CompileContext {
        let mut project = ProjectFormat::default();
        project.options.use_string_ids = use_ids;
        let mut ctx = CompileContext::new(project);
        ctx.translation_info = records;
        ctx
    }

    fn string_record(key: &str, text: &str, id: Option<u32>) -> TranslationInfo {
        TranslationInfo {
            key: key.to_string(),
            is_comment: false,
            text: text.to_string(),
            localized_string_id: id,
        }
    }

    fn comment_record(key: &str, text: &str) -> TranslationInfo {
        TranslationInfo {
            key: key.to_string(),
            is_comment: true,
            text: text.to_string(),
            localized_string_id: None,
        }
    }

    #[test]
    fn public_file_is_one_escaped_string_per_line() {
        let ctx = context_with(
            vec![
                string_record("a", "line one", None),
                comment_record("a", "hint"),
                string_record("a", "two\nlines", None),
            ],
            false,
        );
        assert_eq!(generate_public_file(&ctx), "line one\ntwo\\nlines\n");
    }

    #[test]
    fn private_file_groups_by_key_with_comments_and_ids() {
        let ctx = context_with(
            vec![
                comment_record("n.s", "  scene hint"),
                string_record("n.s", "hello", Some(0x2a)),
                string_record("n.t", "bye", None),
            ],
            true,
        );
        let text = generate_private_file(&ctx);
        assert!(text.contains("@n.s\n"));
        assert!(text.contains("# scene hint\n"));
        assert!(text.contains("\"hello\"&0000002a\n"));
        assert!(text.contains("@n.t\n"));
        assert!(text.contains("\"bye\"\n"));
    }

    #[test]
    fn convert_round_trip_preserves_strings() {
        let private = "@key\n# hint\n\"one\"&00000001\n\n@other\n\"two\"\n";
        let public = convert_private_to_public(private);
        assert_eq!(public, "one\ntwo\n");
        let back = convert_public_to_private(&public, private).unwrap();
        assert_eq!(convert_private_to_public(&back), public);
        // Headers and ids survive the round trip.
        assert!(back.contains("@key"));
        assert!(back.contains("\"one\"&00000001"));
    }

    #[test]
    fn convert_public_to_private_rejects_short_public_file() {
        let private = "\"one\"\n\"two\"\n";
        let result = convert_public_to_private("only\n", private);
        assert!(result.is_err());
    }

    #[test]
    fn upgrade_carries_strings_by_id_and_marks_new_lines() {
        let older = "\"translated\"&00000001\n";
        let newer = "@scene\n\"changed source\"&00000001\n\"brand new\"&00000002\n";
        let upgraded = upgrade_file(older, true, newer).unwrap();
        assert!(upgraded.contains("\"translated\"&00000001\n"));
        assert!(upgraded.contains("\"brand new\"&00000002 [new]\n"));
        assert!(upgraded.contains("@scene\n"));
    }

    #[test]
    fn upgrade_requires_ids_in_private_input() {
        let older = "\"no id here\"\n";
        let result = upgrade_file(older, true, "\"x\"&00000001\n");
        assert!(result.is_err());
    }

    #[test]
    fn upgrade_from_public_maps_ids_by_line_number() {
        let older_public = "first\nsecond\n";
        let newer = "\"a\"&00000000\n\"b\"&00000001\n";
        let upgraded = upgrade_file(older_public, false, newer).unwrap();
        assert!(upgraded.contains("\"first\"&00000000\n"));
        assert!(upgraded.contains("\"second\"&00000001\n"));
    }

    #[test]
    fn to_binary_counts_and_unescapes() {
        let bytes = convert_to_binary("a\\nb\n", false);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..], b"a\nb\0");
    }

    #[test]
    fn unescape_inverts_escape() {
        let original = "tab\there\nquote\"and\\slash";
        assert_eq!(unescape_string(&escape_string(original)), original);
    }
}
