//! Helpers for share-link detection, media filtering and size strings

use regex::{Regex, RegexBuilder};
use std::path::Path;
use std::sync::OnceLock;

/// Host families served by the resolution service
const SHARE_HOSTS: &[&str] = &[
    "terabox",
    "teraboxapp",
    "teraboxshare",
    "nephobox",
    "1024tera",
    "1024terabox",
    "freeterabox",
    "terasharefile",
    "terasharelink",
    "mirrobox",
    "momerybox",
    "teraboxlink",
    "teraboxurl",
];

// The pattern is built from the constants above and always compiles
#[allow(clippy::expect_used)]
fn share_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"https?://\S*?(?:{})\.\S+", SHARE_HOSTS.join("|"));
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .expect("share link pattern is valid")
    })
}

/// Find every supported share link in free text
///
/// Trailing sentence punctuation (`.`, `,`, `!`, `?`) is stripped from each match.
///
/// # Examples
///
/// ```
/// use sharelink_dl::utils::extract_share_links;
///
/// let links = extract_share_links("grab https://www.terabox.com/s/1abc, thanks!");
/// assert_eq!(links, vec!["https://www.terabox.com/s/1abc"]);
/// ```
pub fn extract_share_links(text: &str) -> Vec<String> {
    share_link_regex()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', '!', '?']).to_string())
        .filter(|link| !link.is_empty())
        .collect()
}

/// Check a file name against an allow-list of lowercase extensions
pub fn has_allowed_extension(name: &str, allowed: &[String]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Turn a resolver-provided name into a single safe path component
///
/// Path separators and control characters are replaced, leading dots are removed
/// so the result can never escape or hide inside the scratch directory.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a size string such as `"1.5 GB"`, `"700MB"` or `"1048576"` into bytes
///
/// Units are binary (1 KB = 1024 bytes). Returns `None` for anything unparseable.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        _ => return None,
    };

    Some((value * multiplier as f64).round() as u64)
}

/// Format a byte count as megabytes with two decimals
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}
