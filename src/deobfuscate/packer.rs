//! Unpacker for the `eval(function(p,a,c,k,e,d){…})` JavaScript packer.
//!
//! The packed payload replaces every word with its base-N index into a
//! dictionary; unpacking substitutes the dictionary words back. Input that
//! does not look packed is returned unchanged, which makes the operation
//! idempotent.

use regex::Regex;
use std::sync::OnceLock;

fn packed_args_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // }('payload', base, count, 'w0|w1|…'.split('|')
        Regex::new(r"\}\s*\(\s*'(?s)(.*)',\s*(\d+)\s*,\s*(\d+)\s*,\s*'(.*?)'\.split\('\|'\)")
            .expect("packer regex")
    })
}

/// Decode a base-N word symbol as produced by the packer.
///
/// Digit alphabet: `0-9`, then `a-z`, then `A-Z` (radix up to 62).
fn decode_symbol(token: &str, radix: u64) -> Option<u64> {
    let mut value: u64 = 0;
    for c in token.chars() {
        let digit = match c {
            '0'..='9' => c as u64 - '0' as u64,
            'a'..='z' => c as u64 - 'a' as u64 + 10,
            'A'..='Z' => c as u64 - 'A' as u64 + 36,
            _ => return None,
        };
        if digit >= radix {
            return None;
        }
        value = value.checked_mul(radix)?.checked_add(digit)?;
    }
    Some(value)
}

/// Unpack a packed script. Returns the input unchanged when it does not
/// contain a packer invocation.
pub fn unpack(script: &str) -> String {
    let Some(caps) = packed_args_re().captures(script) else {
        return script.to_string();
    };

    let payload = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let radix: u64 = caps[2].parse().unwrap_or(62).max(2);
    let count: usize = caps[3].parse().unwrap_or(0);
    let words: Vec<&str> = caps[4].split('|').collect();

    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    let word_re = WORD_RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("word regex"));

    let unpacked = word_re.replace_all(payload, |token: &regex::Captures<'_>| {
        let token = token.get(0).unwrap().as_str();
        match decode_symbol(token, radix) {
            Some(idx) if (idx as usize) < count => {
                let word = words.get(idx as usize).copied().unwrap_or("");
                if word.is_empty() {
                    token.to_string()
                } else {
                    word.to_string()
                }
            }
            _ => token.to_string(),
        }
    });

    // Packed payloads escape their quotes
    unpacked.replace("\\'", "'").replace("\\\"", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKED: &str = r"eval(function(p,a,c,k,e,d){e=function(c){return c};if(!''.replace(/^/,String)){while(c--){d[c]=k[c]||c}k=[function(e){return d[e]}];e=function(){return'\\w+'};c=1};while(c--){if(k[c]){p=p.replace(new RegExp('\\b'+e(c)+'\\b','g'),k[c])}}return p}('0 1=2;',3,3,'var|port|8080'.split('|'),0,{}))";

    #[test]
    fn unpacks_simple_payload() {
        let out = unpack(PACKED);
        assert!(out.contains("var port=8080;"), "got: {out}");
    }

    #[test]
    fn idempotent_on_plain_input() {
        let plain = "var port=8080;";
        assert_eq!(unpack(plain), plain);

        let once = unpack(PACKED);
        assert_eq!(unpack(&once), once);
    }

    #[test]
    fn decode_symbol_base36() {
        assert_eq!(decode_symbol("0", 36), Some(0));
        assert_eq!(decode_symbol("z", 36), Some(35));
        assert_eq!(decode_symbol("10", 36), Some(36));
        assert_eq!(decode_symbol("A", 62), Some(36));
        assert_eq!(decode_symbol("-", 36), None);
    }
}
