//! Evaluator for obfuscated JavaScript string expressions.
//!
//! Handles the rotation of tricks seen in `document.write(...)` IP/port
//! payloads: char-code array maps with optional offset and reverse, base64
//! `atob`, string reverse, repeat, substring and concat, and integer
//! addition/subtraction. Rewrite passes run in a fixed order until the
//! expression collapses to a bare literal.

use base64::Engine;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("jsexpr regex"))
}

fn mapchar(caps: &Captures<'_>) -> String {
    let mut chars = Vec::new();

    for part in caps[1].split(',') {
        let Ok(mut code) = part.trim().parse::<i64>() else {
            return caps[0].to_string();
        };
        match caps.get(2).map(|m| m.as_str()) {
            Some("-") => code -= caps.get(3).and_then(|m| m.as_str().parse::<i64>().ok()).unwrap_or(0),
            Some("+") => code += caps.get(3).and_then(|m| m.as_str().parse::<i64>().ok()).unwrap_or(0),
            _ => {}
        }
        match u32::try_from(code).ok().and_then(char::from_u32) {
            Some(c) => chars.push(c),
            None => return caps[0].to_string(),
        }
    }

    if caps.get(4).map(|m| m.as_str()) == Some(".reverse()") {
        chars.reverse();
    }

    format!("\"{}\"", chars.into_iter().collect::<String>())
}

fn atob(caps: &Captures<'_>) -> String {
    match base64::engine::general_purpose::STANDARD
        .decode(&caps[1])
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    {
        Some(decoded) => format!("\"{}\"", decoded),
        None => caps[0].to_string(),
    }
}

/// Reduce a JavaScript string expression to the literal it produces.
///
/// The output is the bare literal with quotes stripped, e.g. an IP address
/// or a port number.
pub fn deobfuscate_js(script: &str) -> String {
    static MAPCHAR: OnceLock<Regex> = OnceLock::new();
    static ATOB: OnceLock<Regex> = OnceLock::new();
    static REVERSE: OnceLock<Regex> = OnceLock::new();
    static ADD: OnceLock<Regex> = OnceLock::new();
    static SUB: OnceLock<Regex> = OnceLock::new();
    static REPEAT: OnceLock<Regex> = OnceLock::new();
    static SUBSTRING: OnceLock<Regex> = OnceLock::new();
    static CONCAT: OnceLock<Regex> = OnceLock::new();
    static UNQUOTE: OnceLock<Regex> = OnceLock::new();

    let mut script = re(
        &MAPCHAR,
        r#"\[(.*?)\]\.map\(\(code\).*?\(code([+\-])?(\d+)?\)\)(\.reverse\(\))?\.join\(""\)"#,
    )
    .replace_all(script, |caps: &Captures<'_>| mapchar(caps))
    .into_owned();

    script = re(&ATOB, r#"atob\("(.*?)"\)"#)
        .replace_all(&script, |caps: &Captures<'_>| atob(caps))
        .into_owned();

    script = re(&REVERSE, r#""([\.\d]*)"\.split\(""\)\.reverse\(\)\.join\(""\)"#)
        .replace_all(&script, |caps: &Captures<'_>| {
            format!("\"{}\"", caps[1].chars().rev().collect::<String>())
        })
        .into_owned();

    script = re(&ADD, r"(\d+)\+(\d+)")
        .replace_all(&script, |caps: &Captures<'_>| {
            let (a, b): (i64, i64) = (caps[1].parse().unwrap_or(0), caps[2].parse().unwrap_or(0));
            (a + b).to_string()
        })
        .into_owned();

    script = re(&SUB, r"(\d+)\-(\d+)")
        .replace_all(&script, |caps: &Captures<'_>| {
            let (a, b): (i64, i64) = (caps[1].parse().unwrap_or(0), caps[2].parse().unwrap_or(0));
            (a - b).to_string()
        })
        .into_owned();

    script = re(&REPEAT, r#""([\.\d]*)"\.repeat\((\d+)\)"#)
        .replace_all(&script, |caps: &Captures<'_>| {
            let times: usize = caps[2].parse().unwrap_or(0);
            format!("\"{}\"", caps[1].repeat(times))
        })
        .into_owned();

    script = re(&SUBSTRING, r#""([\.\d]*)"\.substring\((.*?)\)"#)
        .replace_all(&script, |caps: &Captures<'_>| {
            let source = &caps[1];
            let limits: Vec<usize> = caps[2]
                .split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect();
            let start = limits.first().copied().unwrap_or(0).min(source.len());
            let end = limits.get(1).copied().unwrap_or(source.len()).min(source.len());
            format!("\"{}\"", &source[start..end.max(start)])
        })
        .into_owned();

    let concat_re = re(&CONCAT, r#""([\.\d]*)"\.concat\("([\.\d]*)"\)"#);
    while script.contains("concat") {
        let next = concat_re
            .replace_all(&script, |caps: &Captures<'_>| format!("\"{}{}\"", &caps[1], &caps[2]))
            .into_owned();
        if next == script {
            break;
        }
        script = next;
    }

    re(&UNQUOTE, r#""([\.\d]+)""#)
        .replace_all(&script, "$1")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charcode_map() {
        // "1.2.3.4"
        let expr = r#"[49,46,50,46,51,46,52].map((code) => String.fromCharCode(code)).join("")"#;
        assert_eq!(deobfuscate_js(expr), "1.2.3.4");
    }

    #[test]
    fn charcode_map_with_offset_and_reverse() {
        // codes for "4.3.2.1" shifted by +1, then reversed -> "1.2.3.4"
        let expr = r#"[53,47,52,47,51,47,50].map((code) => String.fromCharCode(code-1)).reverse().join("")"#;
        assert_eq!(deobfuscate_js(expr), "1.2.3.4");
    }

    #[test]
    fn atob_literal() {
        // base64("10.20.30.40")
        let expr = r#"atob("MTAuMjAuMzAuNDA=")"#;
        assert_eq!(deobfuscate_js(expr), "10.20.30.40");
    }

    #[test]
    fn string_reverse() {
        let expr = r#""4.3.2.1".split("").reverse().join("")"#;
        assert_eq!(deobfuscate_js(expr), "1.2.3.4");
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(deobfuscate_js("8000+80"), "8080");
        assert_eq!(deobfuscate_js("9000-920"), "8080");
    }

    #[test]
    fn substring_and_concat() {
        let expr = r#""1.2.3.999".substring(0,6).concat("44")"#;
        assert_eq!(deobfuscate_js(expr), "1.2.3.44");
    }

    #[test]
    fn repeat() {
        let expr = r#""12".repeat(2)"#;
        assert_eq!(deobfuscate_js(expr), "1212");
    }

    #[test]
    fn combined_document_write_payload() {
        let expr = r#""23.94.5.".concat("1".concat("3"))"#;
        // inner concat first requires the loop
        let out = deobfuscate_js(expr);
        assert_eq!(out, "23.94.5.13");
    }
}
