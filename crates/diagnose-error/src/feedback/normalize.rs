//! Line-ending normalization for captured compiler output.

/// Canonicalize line endings: `\r\n`, `\n\r` and lone `\r` all become `\n`.
///
/// The passes run in that order over the whole text, so `\r\n\r` first
/// becomes `\n\r` and then a single `\n`.
pub fn normalize_output(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n")
        .replace("\n\r", "\n")
        .replace('\r', "\n")
}
