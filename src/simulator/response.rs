//! Parser for property console replies
//!
//! A `get` is answered with a line of the form
//!
//! ```text
//! instrumentation/comm[0]/frequencies/selected-mhz = '121.500' (double)
//! ```
//!
//! followed by the `/>` prompt. The first matching line in the reply wins.

/// One `name = 'value' (type)` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyReading {
    pub name: String,
    pub value: String,
    pub kind: String,
}

/// Finds the first property line in a console reply
pub fn parse_reply(text: &str) -> Option<PropertyReading> {
    text.lines().find_map(parse_line)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '/' | '-' | '[' | ']' | '.')
}

fn parse_line(line: &str) -> Option<PropertyReading> {
    let (lhs, rhs) = line.split_once('=')?;

    // The property path is the run of path characters right before the `=`;
    // anything in front of it (a stale prompt, say) is ignored.
    let lhs = lhs.trim_end_matches(' ');
    let start = lhs
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_name_char(*c))
        .last()
        .map(|(i, _)| i)?;
    let name = &lhs[start..];

    let rhs = rhs.trim_start_matches(' ').strip_prefix('\'')?;
    let quote_end = rhs.rfind("' (")?;
    let value = &rhs[..quote_end];
    let rest = &rhs[quote_end + 3..];
    let kind = &rest[..rest.rfind(')')?];
    if kind.is_empty() {
        return None;
    }

    Some(PropertyReading {
        name: name.to_string(),
        value: value.to_string(),
        kind: kind.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_double_reply() {
        let reading = parse_reply(
            "instrumentation/comm[0]/frequencies/selected-mhz = '121.500' (double)\r\n/> ",
        )
        .unwrap();
        assert_eq!(reading.name, "instrumentation/comm[0]/frequencies/selected-mhz");
        assert_eq!(reading.value, "121.500");
        assert_eq!(reading.kind, "double");
    }

    #[test]
    fn ignores_prompt_prefix_and_noise() {
        let reading =
            parse_reply("welcome\r\n/> velocities/airspeed-kt = '0' (double)\r\n/> ").unwrap();
        assert_eq!(reading.name, "velocities/airspeed-kt");
        assert_eq!(reading.value, "0");
    }

    #[test]
    fn value_may_contain_quotes_and_spaces() {
        let reading = parse_reply("sim/description = 'Cessna 172P 'Skyhawk'' (string)").unwrap();
        assert_eq!(reading.value, "Cessna 172P 'Skyhawk'");
        assert_eq!(reading.kind, "string");
    }

    #[test]
    fn empty_value_is_allowed() {
        let reading = parse_reply("sim/aircraft = '' (none)").unwrap();
        assert_eq!(reading.value, "");
        assert_eq!(reading.kind, "none");
    }

    #[test]
    fn rejects_unrelated_text() {
        assert!(parse_reply("").is_none());
        assert!(parse_reply("/> ").is_none());
        assert!(parse_reply("unknown command").is_none());
        assert!(parse_reply("a = b").is_none());
        assert!(parse_reply("a = 'b' ()").is_none());
    }
}
