//! Trend Micro DS Agent SCTRL log parser.
//!
//! Recognized form, appearing anywhere in an SCTRL line:
//!
//! `(<trace-id>, <path>) virus found: <count>[, ...]`
//!
//! `failed: N` and `clean` variants are intentionally not cached: a failed
//! scan must not be recorded as clean, and clean paths are inferred by
//! absence rather than recorded explicitly (see the orchestrator).
//!
//! Trend Micro's SCTRL channel never names the signature on this line, so
//! detections from this parser always carry an empty `signature` (see spec
//! Open Question #2); a caller with access to the on-demand JSON output may
//! substitute a real label there instead.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::Detection;

use super::LineParser;

fn virus_found_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^,]+, (.*)\) virus found:").expect("valid regex"))
}

pub struct TrendMicroParser;

impl LineParser for TrendMicroParser {
    fn parse(&self, line: &str) -> Option<Detection> {
        let captures = virus_found_pattern().captures(line)?;
        let path = captures.get(1)?.as_str();
        Some(Detection::infected(path, "", line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_virus_found_line() {
        let line = "2026-07-28 10:15:00.123456: [ds_am/3] | [SCTRL] (42, /tmp/av-scanner/abc.com) virus found: 1";
        let det = TrendMicroParser.parse(line).unwrap();
        assert_eq!(det.absolute_path, "/tmp/av-scanner/abc.com");
        assert_eq!(det.signature, "");
    }

    #[test]
    fn path_with_spaces_is_preserved() {
        let line = "2026-07-28 10:15:00.123456: [ds_am/3] | [SCTRL] (7, /tmp/av-scanner/my file.bin) virus found: 1";
        let det = TrendMicroParser.parse(line).unwrap();
        assert_eq!(det.absolute_path, "/tmp/av-scanner/my file.bin");
    }

    #[test]
    fn skips_clean_line() {
        let line = "2026-07-28 10:15:00.123456: [ds_am/3] | [SCTRL] (7, /tmp/x.bin) clean";
        assert!(TrendMicroParser.parse(line).is_none());
    }

    #[test]
    fn skips_failed_line() {
        let line = "2026-07-28 10:15:00.123456: [ds_am/3] | [SCTRL] (7, /tmp/x.bin) failed: 2";
        assert!(TrendMicroParser.parse(line).is_none());
    }

    #[test]
    fn skips_unrelated_lines() {
        assert!(TrendMicroParser.parse("").is_none());
        assert!(TrendMicroParser.parse("ds_agent started").is_none());
    }

    #[test]
    fn every_path_without_closing_paren_round_trips() {
        for path in ["/srv/a.bin", "/srv/b c.bin", "/srv/long/nested/path.dat"] {
            let line = format!("2026-07-28 10:00:00.0: [ds_am/1] | [SCTRL] (xxx, {path}) virus found: 2 more");
            let det = TrendMicroParser.parse(&line).unwrap();
            assert_eq!(det.absolute_path, path);
            assert_eq!(det.signature, "");
        }
    }
}
