// Generated Output Parser
// The model emits a ROADMAP: preamble followed by repeated
// `FILE: <name>` blocks. The parser is a pure function over the whole
// accumulated buffer: during streaming it is simply re-run on every
// progress report, so a trailing half-written file shows up with
// whatever content has arrived so far.

use crate::models::FileMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedOutput {
    pub roadmap: String,
    pub files: FileMap,
}

impl GeneratedOutput {
    pub fn is_empty(&self) -> bool {
        self.roadmap.is_empty() && self.files.is_empty()
    }
}

pub struct OutputParser;

impl OutputParser {
    /// Parse the full buffer. Markdown code fences the model wraps
    /// around blocks are dropped; everything else is taken verbatim.
    pub fn parse(buffer: &str) -> GeneratedOutput {
        let mut output = GeneratedOutput::default();
        let mut roadmap_lines: Vec<&str> = Vec::new();
        let mut current_file: Option<(String, Vec<&str>)> = None;

        for line in buffer.lines() {
            if line.trim_start().starts_with("```") {
                continue;
            }
            if let Some(name) = line.strip_prefix("FILE:") {
                if let Some((file_name, lines)) = current_file.take() {
                    output.files.insert(file_name, lines.join("\n"));
                }
                let name = name.trim();
                if !name.is_empty() {
                    current_file = Some((name.to_string(), Vec::new()));
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("ROADMAP:") {
                let rest = rest.trim();
                if !rest.is_empty() {
                    roadmap_lines.push(rest);
                }
                continue;
            }
            match current_file.as_mut() {
                Some((_, lines)) => lines.push(line),
                None => roadmap_lines.push(line),
            }
        }
        if let Some((file_name, lines)) = current_file.take() {
            output.files.insert(file_name, lines.join("\n"));
        }

        output.roadmap = roadmap_lines.join("\n").trim().to_string();
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roadmap_and_files() {
        let buffer = "ROADMAP: Landing page with pricing\n\
FILE: index.page.html\n<html><body>home</body></html>\n\
FILE: pricing.page.html\n<html><body>pricing</body></html>";
        let output = OutputParser::parse(buffer);
        assert_eq!(output.roadmap, "Landing page with pricing");
        assert_eq!(output.files.len(), 2);
        assert_eq!(
            output.files["index.page.html"],
            "<html><body>home</body></html>"
        );
    }

    #[test]
    fn test_multiline_roadmap_before_first_file() {
        let buffer = "ROADMAP:\n1. hero section\n2. pricing table\nFILE: index.page.html\n<html></html>";
        let output = OutputParser::parse(buffer);
        assert_eq!(output.roadmap, "1. hero section\n2. pricing table");
    }

    #[test]
    fn test_partial_trailing_file_grows_between_parses() {
        let early = "FILE: index.page.html\n<html><bo";
        let late = "FILE: index.page.html\n<html><body>done</body></html>";
        assert_eq!(
            OutputParser::parse(early).files["index.page.html"],
            "<html><bo"
        );
        assert_eq!(
            OutputParser::parse(late).files["index.page.html"],
            "<html><body>done</body></html>"
        );
    }

    #[test]
    fn test_reparse_is_idempotent() {
        let buffer = "ROADMAP: x\nFILE: a.page.html\n<p>a</p>";
        assert_eq!(OutputParser::parse(buffer), OutputParser::parse(buffer));
    }

    #[test]
    fn test_markdown_fences_dropped() {
        let buffer = "ROADMAP: page\nFILE: index.page.html\n```html\n<html></html>\n```";
        let output = OutputParser::parse(buffer);
        assert_eq!(output.files["index.page.html"], "<html></html>");
    }

    #[test]
    fn test_file_marker_without_name_is_ignored() {
        let buffer = "FILE:\nstray\nFILE: real.page.html\n<p>ok</p>";
        let output = OutputParser::parse(buffer);
        assert_eq!(output.files.len(), 1);
        assert!(output.files.contains_key("real.page.html"));
    }

    #[test]
    fn test_empty_buffer() {
        assert!(OutputParser::parse("").is_empty());
    }
}
