//! ClamAV on-access log parser.
//!
//! Recognized forms (after stripping an optional `[YYYY-MM-DD HH:MM:SS] `
//! timestamp prefix):
//!
//! - `<path>: <signature> FOUND` -> infected
//! - `<path>: moved to '<dest>'` -> infected, empty signature (clamd
//!   quarantined the file; this line must be honoured on its own so
//!   detections survive a clamd restart between the FOUND line and now)
//! - anything else (notably `<path>: OK`) -> skipped
//!
//! The `: ` separator is not escaped in clamd's log format, so a path that
//! itself contains `: ` is ambiguous. Per the greedy interpretation clamd's
//! own log consumers rely on, the longest possible prefix before the final
//! `: ` wins: `"/a: b: X FOUND"` parses as `path = "/a: b"`, `signature =
//! "X"`.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::Detection;

use super::LineParser;

fn timestamp_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\] ").expect("valid regex")
    })
}

fn found_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*): (.+) FOUND$").expect("valid regex"))
}

fn moved_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*): moved to '(.*)'$").expect("valid regex"))
}

pub struct ClamAvParser;

impl LineParser for ClamAvParser {
    fn parse(&self, line: &str) -> Option<Detection> {
        let stripped = timestamp_prefix().replace(line, "");
        let body = stripped.as_ref();

        if let Some(captures) = found_pattern().captures(body) {
            let path = captures.get(1)?.as_str();
            let signature = captures.get(2)?.as_str();
            return Some(Detection::infected(path, signature, line));
        }

        if let Some(captures) = moved_pattern().captures(body) {
            let path = captures.get(1)?.as_str();
            return Some(Detection::infected(path, "", line));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DetectionVerdict;

    #[test]
    fn parses_found_line() {
        let det = ClamAvParser
            .parse("/tmp/av-scanner/abc.com: Eicar-Test-Signature FOUND")
            .unwrap();
        assert_eq!(det.absolute_path, "/tmp/av-scanner/abc.com");
        assert_eq!(det.signature, "Eicar-Test-Signature");
        assert_eq!(det.verdict, DetectionVerdict::Infected);
    }

    #[test]
    fn parses_found_line_with_timestamp_prefix() {
        let det = ClamAvParser
            .parse("[2026-07-28 10:15:00] /tmp/x.exe: Win.Test.EICAR_HDB-1 FOUND")
            .unwrap();
        assert_eq!(det.absolute_path, "/tmp/x.exe");
        assert_eq!(det.signature, "Win.Test.EICAR_HDB-1");
    }

    #[test]
    fn parses_moved_line_with_empty_signature() {
        let det = ClamAvParser
            .parse("/tmp/av-scanner/abc.com: moved to '/var/lib/clamav/quarantine/abc.com'")
            .unwrap();
        assert_eq!(det.absolute_path, "/tmp/av-scanner/abc.com");
        assert_eq!(det.signature, "");
    }

    #[test]
    fn skips_ok_line() {
        assert!(ClamAvParser.parse("/tmp/av-scanner/xyz.bin: OK").is_none());
    }

    #[test]
    fn skips_unrelated_lines() {
        assert!(ClamAvParser.parse("").is_none());
        assert!(ClamAvParser.parse("clamd daemon 1.2.0 starting").is_none());
        assert!(ClamAvParser.parse("a line with no colon at all FOUND").is_none());
    }

    #[test]
    fn greedy_path_with_embedded_colon_space() {
        // Open question #1: the parser accepts the greedy interpretation.
        let det = ClamAvParser.parse("/a: b: X FOUND").unwrap();
        assert_eq!(det.absolute_path, "/a: b");
        assert_eq!(det.signature, "X");
    }

    #[test]
    fn tolerates_arbitrary_utf8_and_cr() {
        assert!(ClamAvParser.parse("caf\u{e9}: \r\u{2603} FOUND\r").is_none());
        assert!(ClamAvParser.parse("\u{1f600}\u{1f600}").is_none());
    }

    #[test]
    fn every_non_empty_path_and_signature_round_trips() {
        for path in ["/srv/uploads/one.bin", "/srv/uploads/two three.bin"] {
            for sig in ["Eicar-Test-Signature", "Win.Trojan.Agent-1"] {
                let line = format!("{path}: {sig} FOUND");
                let det = ClamAvParser.parse(&line).unwrap();
                assert_eq!(det.absolute_path, path);
                assert_eq!(det.signature, sig);
            }
        }
    }
}
