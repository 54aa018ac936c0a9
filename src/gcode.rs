// src/gcode.rs - Line-level G-code tokenizer
//
// Just enough structure for the virtual printer to interpret what the
// coordinator sends it. Comments (`;` to end of line) are stripped, the
// first word is the command, remaining `<letter><number>` words are params.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GCodeError {
    #[error("Malformed parameter '{word}' in line {line}")]
    BadParameter { word: String, line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GCodeLine {
    /// Upper-cased command word, e.g. `G1`, `M104`, `FIRMWARE_RESTART`.
    pub code: String,
    pub params: Vec<(char, Option<f64>)>,
}

impl GCodeLine {
    pub fn param(&self, letter: char) -> Option<f64> {
        self.params
            .iter()
            .find(|(l, _)| *l == letter)
            .and_then(|(_, v)| *v)
    }

    pub fn has(&self, letter: char) -> bool {
        self.params.iter().any(|(l, _)| *l == letter)
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

/// Splits a script into command lines, skipping blanks and comments.
pub fn parse_script(script: &str) -> Result<Vec<GCodeLine>, GCodeError> {
    let mut lines = Vec::new();
    for (idx, raw) in script.lines().enumerate() {
        if let Some(line) = parse_line(raw, idx + 1)? {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn parse_line(raw: &str, line: usize) -> Result<Option<GCodeLine>, GCodeError> {
    let body = match raw.find(';') {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    let mut words = body.split_whitespace();
    let code = match words.next() {
        Some(word) => normalize_code(word),
        None => return Ok(None),
    };
    let mut params = Vec::new();
    for word in words {
        let mut chars = word.chars();
        let letter = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
            _ => {
                return Err(GCodeError::BadParameter { word: word.to_string(), line });
            }
        };
        let rest = chars.as_str();
        let value = if rest.is_empty() {
            None
        } else {
            match rest.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => return Err(GCodeError::BadParameter { word: word.to_string(), line }),
            }
        };
        params.push((letter, value));
    }
    Ok(Some(GCodeLine { code, params }))
}

/// `g01` and `G1` are the same command.
fn normalize_code(word: &str) -> String {
    let upper = word.to_ascii_uppercase();
    let mut chars = upper.chars();
    match chars.next() {
        Some(letter @ ('G' | 'M')) => match chars.as_str().parse::<u32>() {
            Ok(n) => format!("{}{}", letter, n),
            Err(_) => upper,
        },
        _ => upper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_words_and_strips_comments() {
        let lines = parse_script("G91\nG1 X10 F3000 ; jog\n\n; only a comment\nG90").unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].is("G1"));
        assert_eq!(lines[1].param('X'), Some(10.0));
        assert_eq!(lines[1].param('F'), Some(3000.0));
        assert!(lines[2].is("G90"));
    }

    #[test]
    fn normalizes_leading_zeros_and_case() {
        let lines = parse_script("g01 x1.5\nm104 s200").unwrap();
        assert!(lines[0].is("G1"));
        assert_eq!(lines[0].param('X'), Some(1.5));
        assert!(lines[1].is("M104"));
        assert_eq!(lines[1].param('S'), Some(200.0));
    }

    #[test]
    fn bare_axis_flags() {
        let line = &parse_script("G28 X Z").unwrap()[0];
        assert!(line.has('X'));
        assert!(!line.has('Y'));
        assert_eq!(line.param('X'), None);
    }

    #[test]
    fn extended_commands_pass_through() {
        let line = &parse_script("firmware_restart").unwrap()[0];
        assert!(line.is("FIRMWARE_RESTART"));
    }

    #[test]
    fn rejects_garbage_parameters() {
        let err = parse_script("G1 X1\nG1 Xabc").unwrap_err();
        assert_eq!(err, GCodeError::BadParameter { word: "Xabc".to_string(), line: 2 });
    }
}
