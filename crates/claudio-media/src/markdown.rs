use regex::Regex;

/// Strip markdown constructs that don't survive being read aloud: fenced
/// code blocks, inline code, emphasis markers, link syntax (kept as its
/// label), list markers, and runs of blank lines.
pub fn strip_for_speech(text: &str) -> String {
    let fenced = Regex::new(r"```[\s\S]*?```").unwrap();
    let without_fences = fenced.replace_all(text, "");

    let inline_code = Regex::new(r"`([^`]*)`").unwrap();
    let without_inline = inline_code.replace_all(&without_fences, "$1");

    let links = Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap();
    let without_links = links.replace_all(&without_inline, "$1");

    let emphasis = Regex::new(r"(\*\*\*|\*\*|\*|___|__|_)").unwrap();
    let without_emphasis = emphasis.replace_all(&without_links, "");

    let list_markers = Regex::new(r"(?m)^\s*[-*+]\s+").unwrap();
    let without_lists = list_markers.replace_all(&without_emphasis, "");

    let blank_runs = Regex::new(r"\n{3,}").unwrap();
    let collapsed = blank_runs.replace_all(&without_lists, "\n\n");

    collapsed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_fenced_code_blocks() {
        let input = "before\n```rust\nfn x() {}\n```\nafter";
        let out = strip_for_speech(input);
        assert!(!out.contains("fn x()"));
        assert!(out.contains("before"));
        assert!(out.contains("after"));
    }

    #[test]
    fn removes_inline_code_keeping_text() {
        assert_eq!(strip_for_speech("use `foo()` here"), "use foo() here");
    }

    #[test]
    fn removes_emphasis_markers() {
        assert_eq!(strip_for_speech("this is **bold** and *italic*"), "this is bold and italic");
    }

    #[test]
    fn replaces_links_with_label() {
        assert_eq!(strip_for_speech("see [docs](https://example.com)"), "see docs");
    }

    #[test]
    fn neutralises_list_markers() {
        let input = "- one\n- two\n* three";
        let out = strip_for_speech(input);
        assert!(!out.contains("- "));
        assert!(out.contains("one"));
    }

    #[test]
    fn collapses_blank_line_runs() {
        let input = "a\n\n\n\n\nb";
        assert_eq!(strip_for_speech(input), "a\n\nb");
    }
}
