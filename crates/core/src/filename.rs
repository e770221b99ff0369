/// Normalize an uploaded file name for display and logging.
///
/// Whitespace runs become `_`, anything outside `[A-Za-z0-9_.]` becomes `_`,
/// repeated underscores collapse, and leading/trailing underscores are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
            ch
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(sanitize_filename("  My Holiday  Video!.mp4 "), "My_Holiday_Video_.mp4");
        assert_eq!(sanitize_filename("__a__b__"), "a_b");
        assert_eq!(sanitize_filename("ünï cødé.mkv"), "n_c_d_.mkv");
        assert_eq!(sanitize_filename("???"), "");
    }
}
