//! Decoder for the XOR variable-table port obfuscation.
//!
//! The page defines a script of assignments (`i9w2=2901;a1c3=i9w2^4053;…`)
//! and each port digit is then written as an XOR pair read, e.g.
//! `(x4w3y5^x4o5)+(m3n4d4^a1c3)`. Parsing resolves the assignment table;
//! decoding evaluates the pair reads and joins the digits.

use std::collections::HashMap;

/// Parse the XOR assignment script into a variable table.
///
/// Accepts `name=number` and `name=operand^operand` assignments separated by
/// `;`, where operands are numbers or previously defined names. Unresolvable
/// assignments are skipped.
pub fn parse_crazyxor(code: &str) -> HashMap<String, i64> {
    let mut table = HashMap::new();

    for piece in code.split(';') {
        let piece = piece.trim();
        let Some((name, expr)) = piece.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            continue;
        }

        let mut value: Option<i64> = None;
        for operand in expr.split('^') {
            let Some(operand) = resolve(&table, operand.trim()) else {
                value = None;
                break;
            };
            value = Some(match value {
                Some(v) => v ^ operand,
                None => operand,
            });
        }

        if let Some(v) = value {
            table.insert(name.to_string(), v);
        }
    }

    table
}

/// Evaluate one XOR read (e.g. `x4w3y5^x4o5`) against the variable table,
/// returning the decoded number as a string. Unknown operands yield an
/// empty string.
pub fn decode_crazyxor(table: &HashMap<String, i64>, expr: &str) -> String {
    let mut value: Option<i64> = None;

    for operand in expr.split('^') {
        let Some(operand) = resolve(table, operand.trim()) else {
            return String::new();
        };
        value = Some(match value {
            Some(v) => v ^ operand,
            None => operand,
        });
    }

    value.map(|v| v.to_string()).unwrap_or_default()
}

fn resolve(table: &HashMap<String, i64>, operand: &str) -> Option<i64> {
    if let Ok(n) = operand.parse::<i64>() {
        return Some(n);
    }
    table.get(operand).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_and_chained_assignments() {
        let table = parse_crazyxor("s2e8=4691;b4y7=1266;x4w3y5=s2e8^b4y7");
        assert_eq!(table["s2e8"], 4691);
        assert_eq!(table["b4y7"], 1266);
        assert_eq!(table["x4w3y5"], 4691 ^ 1266);
    }

    #[test]
    fn decodes_pair_reads() {
        let table = parse_crazyxor("a1=13;b2=9;c3=8;d4=8");
        // 13^9 = 4, 8^8 = 0
        assert_eq!(decode_crazyxor(&table, "a1^b2"), "4");
        assert_eq!(decode_crazyxor(&table, "c3^d4"), "0");
    }

    #[test]
    fn unknown_variable_yields_empty() {
        let table = parse_crazyxor("a1=13");
        assert_eq!(decode_crazyxor(&table, "a1^nope"), "");
    }

    #[test]
    fn skips_unresolvable_assignments() {
        let table = parse_crazyxor("a1=1;bad=missing^2;b2=a1^3");
        assert!(!table.contains_key("bad"));
        assert_eq!(table["b2"], 1 ^ 3);
    }

    #[test]
    fn port_digits_join() {
        // Encode port 8080 one digit at a time.
        let table = parse_crazyxor("k1=12;k2=4;z1=9;z2=9");
        let digits = [
            decode_crazyxor(&table, "k1^k2"), // 8
            decode_crazyxor(&table, "z1^z2"), // 0
            decode_crazyxor(&table, "k1^k2"), // 8
            decode_crazyxor(&table, "z1^z2"), // 0
        ];
        assert_eq!(digits.join(""), "8080");
    }
}
