//! Upload filename sanitizer and artifact writer

use unicode_normalization::UnicodeNormalization;

/// Reduce a client-supplied filename to `[A-Za-z0-9_.-]`.
///
/// Rules, applied in order:
/// 1. NFKD-normalize and drop every non-ASCII character
/// 2. replace `/` with a space
/// 3. join whitespace-separated words with `_`
/// 4. drop characters outside `[A-Za-z0-9_.-]`
/// 5. trim leading and trailing `.` and `_`
///
/// The result can be empty.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' { ' ' } else { c })
        .collect();

    let joined = ascii
        .split(is_py_whitespace)
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// ASCII whitespace as understood by `str.split()` without arguments
const fn is_py_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r' | '\x1c'..='\x1f')
}

/// Destination path for an upload: the directory and the sanitized name,
/// concatenated with a single `/`
pub fn destination(upload_dir: &str, sanitized: &str) -> String {
    format!("{}/{sanitized}", upload_dir.trim_end_matches('/'))
}

/// Write the artifact, replacing any existing file at the same path
pub async fn save(upload_dir: &str, filename: &str, data: &[u8]) -> std::io::Result<String> {
    let path = destination(upload_dir, &secure_filename(filename));
    tokio::fs::write(&path, data).await?;
    Ok(path)
}
