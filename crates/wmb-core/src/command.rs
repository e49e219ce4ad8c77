//! Chat command interpreter.
//!
//! Pure parsing: one inbound message in, one `Parsed` out. Authorization and
//! side effects live in the handler; everything here is testable without a
//! connection.

use chrono::NaiveDate;
use regex::Regex;

/// Calendar format accepted for explicit report ranges. Fixed per deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateFormat {
    DayMonthYear,
    YearMonthDay,
}

impl DateFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "DD-MM-YYYY" => Some(Self::DayMonthYear),
            "YYYY-MM-DD" => Some(Self::YearMonthDay),
            _ => None,
        }
    }

    /// How the format is spelled in user-facing messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::DayMonthYear => "DD-MM-YYYY",
            Self::YearMonthDay => "YYYY-MM-DD",
        }
    }

    fn chrono_pattern(self) -> &'static str {
        match self {
            Self::DayMonthYear => "%d-%m-%Y",
            Self::YearMonthDay => "%Y-%m-%d",
        }
    }

    fn shape(self) -> &'static str {
        match self {
            Self::DayMonthYear => r"^\d{2}-\d{2}-\d{4}$",
            Self::YearMonthDay => r"^\d{4}-\d{2}-\d{2}$",
        }
    }

    /// Strict parse: the text must match the format exactly (zero-padded) and
    /// name a real calendar date.
    pub fn parse_date(self, raw: &str) -> Option<NaiveDate> {
        let shape = Regex::new(self.shape()).expect("valid regex");
        if !shape.is_match(raw) {
            return None;
        }
        NaiveDate::parse_from_str(raw, self.chrono_pattern()).ok()
    }
}

/// A recognized chat intent. Consumed once, discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    SetPassword(String),
    Report(Option<(NaiveDate, NaiveDate)>),
}

/// Outcome of parsing one inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parsed {
    /// Not a recognized command; the message is dropped silently.
    Ignored,
    /// A recognized command with bad arguments; the string is the corrective
    /// message sent back to the chat.
    Invalid(String),
    Command(Command),
}

/// Strip `@123456789` mention tokens the messenger injects into the text.
pub fn scrub_mentions(text: &str) -> String {
    let re = Regex::new(r"@\d+").expect("valid regex");
    re.replace_all(text, "").trim().to_string()
}

pub fn parse(text: &str, format: DateFormat) -> Parsed {
    let text = text.trim();
    if text.is_empty() {
        return Parsed::Ignored;
    }

    let mut parts = text.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("").to_lowercase();
    let rest = parts.next().unwrap_or("").trim();

    match head.as_str() {
        "!setpassword" => {
            let value = rest.split_whitespace().next().unwrap_or("").to_string();
            Parsed::Command(Command::SetPassword(value))
        }
        "!help" if rest.is_empty() => Parsed::Command(Command::Help),
        "monitoring" => parse_report_args(rest, format),
        _ => Parsed::Ignored,
    }
}

fn parse_report_args(rest: &str, format: DateFormat) -> Parsed {
    let args: Vec<&str> = rest.split_whitespace().collect();
    match args.as_slice() {
        [] => Parsed::Command(Command::Report(None)),
        [start, end] => {
            let (Some(start), Some(end)) = (format.parse_date(start), format.parse_date(end))
            else {
                return Parsed::Invalid(format!(
                    "Invalid date format. Please use {}.",
                    format.label()
                ));
            };
            if start > end {
                return Parsed::Invalid("Start date cannot be after end date.".to_string());
            }
            Parsed::Command(Command::Report(Some((start, end))))
        }
        [_] => Parsed::Invalid(format!(
            "Please provide both a start and an end date ({0} {0}), or no dates for the daily report.",
            format.label()
        )),
        _ => Parsed::Ignored,
    }
}

pub fn help_text(format: DateFormat) -> String {
    format!(
        "*Bot Available Commands*

1. @Bot monitoring
`Generate the daily report (covers yesterday 08:31 to today 08:30).`

2. @Bot monitoring <start> <end>
`Generate a report from the start date 08:31 to the end date 08:30.`

3. @Bot !setpassword <value>
`Update the report source password (authorized users only).`

Notes:
- Dates must follow the format \"{0}\"
- The start date must be earlier than or equal to the end date
- The system automatically generates the daily report every day at 08:31 AM",
        format.label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DMY: DateFormat = DateFormat::DayMonthYear;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn scrub_removes_mention_tokens() {
        assert_eq!(scrub_mentions("@628123456789 monitoring"), "monitoring");
        assert_eq!(
            scrub_mentions("monitoring 01-03-2024 05-03-2024"),
            "monitoring 01-03-2024 05-03-2024"
        );
    }

    #[test]
    fn monitoring_without_dates_is_default_report() {
        assert_eq!(parse("monitoring", DMY), Parsed::Command(Command::Report(None)));
        // Case-insensitive, like the rest of the command surface.
        assert_eq!(parse("Monitoring", DMY), Parsed::Command(Command::Report(None)));
    }

    #[test]
    fn monitoring_with_valid_range() {
        assert_eq!(
            parse("monitoring 01-03-2024 05-03-2024", DMY),
            Parsed::Command(Command::Report(Some((date(2024, 3, 1), date(2024, 3, 5)))))
        );
    }

    #[test]
    fn monitoring_with_reversed_range_is_an_ordering_error() {
        let parsed = parse("monitoring 05-03-2024 01-03-2024", DMY);
        assert_eq!(
            parsed,
            Parsed::Invalid("Start date cannot be after end date.".to_string())
        );
    }

    #[test]
    fn monitoring_with_malformed_dates_is_a_format_error() {
        for text in [
            "monitoring 2024-03-01 2024-03-05", // wrong format for DMY
            "monitoring 1-3-2024 5-3-2024",     // not zero-padded
            "monitoring 32-01-2024 01-02-2024", // not a real date
            "monitoring foo bar",
        ] {
            assert_eq!(
                parse(text, DMY),
                Parsed::Invalid("Invalid date format. Please use DD-MM-YYYY.".to_string()),
                "{text}"
            );
        }
    }

    #[test]
    fn monitoring_with_one_date_is_a_usage_error() {
        assert!(matches!(parse("monitoring 01-03-2024", DMY), Parsed::Invalid(_)));
    }

    #[test]
    fn ymd_deployments_parse_their_own_format() {
        let ymd = DateFormat::YearMonthDay;
        assert_eq!(
            parse("monitoring 2024-03-01 2024-03-05", ymd),
            Parsed::Command(Command::Report(Some((date(2024, 3, 1), date(2024, 3, 5)))))
        );
        assert!(matches!(
            parse("monitoring 01-03-2024 05-03-2024", ymd),
            Parsed::Invalid(_)
        ));
    }

    #[test]
    fn setpassword_takes_the_first_token() {
        assert_eq!(
            parse("!setpassword secret123", DMY),
            Parsed::Command(Command::SetPassword("secret123".to_string()))
        );
        assert_eq!(
            parse("!SetPassword secret123 trailing", DMY),
            Parsed::Command(Command::SetPassword("secret123".to_string()))
        );
        assert_eq!(
            parse("!setpassword", DMY),
            Parsed::Command(Command::SetPassword(String::new()))
        );
    }

    #[test]
    fn help_only_matches_exactly() {
        assert_eq!(parse("!help", DMY), Parsed::Command(Command::Help));
        assert_eq!(parse("!HELP", DMY), Parsed::Command(Command::Help));
        assert_eq!(parse("!help me please", DMY), Parsed::Ignored);
    }

    #[test]
    fn unknown_text_is_ignored() {
        assert_eq!(parse("hello there", DMY), Parsed::Ignored);
        assert_eq!(parse("monitoringx", DMY), Parsed::Ignored);
        assert_eq!(parse("", DMY), Parsed::Ignored);
    }
}
