use std::fmt::Display;
use promql_parser::label::{MatchOp as ParserMatchOp, Matcher};
use regex::Regex;
use crate::error::{TsdbError, TsdbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    Equal,
    NotEqual,
    RegexEqual,
    RegexNotEqual,
}

impl MatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::RegexEqual => "=~",
            MatchOp::RegexNotEqual => "!~",
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, MatchOp::NotEqual | MatchOp::RegexNotEqual)
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, MatchOp::RegexEqual | MatchOp::RegexNotEqual)
    }
}

impl Display for MatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
enum StringMatchHandler {
    MatchAll,
    Literal(String),
    Regex(Regex),
}

impl StringMatchHandler {
    fn new(op: MatchOp, value: &str) -> TsdbResult<Self> {
        if !op.is_regex() {
            return Ok(StringMatchHandler::Literal(value.to_string()));
        }
        if value == ".*" {
            return Ok(StringMatchHandler::MatchAll);
        }
        // a pattern without metacharacters matches only itself
        if regex_syntax::escape(value) == value {
            return Ok(StringMatchHandler::Literal(value.to_string()));
        }
        // label regexes are fully anchored
        let anchored = format!("^(?:{value})$");
        Regex::new(&anchored)
            .map(StringMatchHandler::Regex)
            .map_err(|e| TsdbError::InvalidMatcher(format!("invalid regex \"{value}\": {e}")))
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            StringMatchHandler::MatchAll => true,
            StringMatchHandler::Literal(literal) => literal == value,
            StringMatchHandler::Regex(re) => re.is_match(value),
        }
    }
}

/// A predicate over the value of one label. A series without the label is treated as having
/// the empty value for it.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub op: MatchOp,
    pub name: String,
    pub value: String,
    handler: StringMatchHandler,
}

impl LabelMatcher {
    pub fn new(op: MatchOp, name: &str, value: &str) -> TsdbResult<Self> {
        if name.is_empty() {
            return Err(TsdbError::InvalidMatcher("empty label name".to_string()));
        }
        let handler = StringMatchHandler::new(op, value)?;
        Ok(Self {
            op,
            name: name.to_string(),
            value: value.to_string(),
            handler,
        })
    }

    pub fn equal(name: &str, value: &str) -> Self {
        Self {
            op: MatchOp::Equal,
            name: name.to_string(),
            value: value.to_string(),
            handler: StringMatchHandler::Literal(value.to_string()),
        }
    }

    pub fn not_equal(name: &str, value: &str) -> Self {
        Self {
            op: MatchOp::NotEqual,
            ..Self::equal(name, value)
        }
    }

    pub fn regex(name: &str, pattern: &str) -> TsdbResult<Self> {
        Self::new(MatchOp::RegexEqual, name, pattern)
    }

    pub fn not_regex(name: &str, pattern: &str) -> TsdbResult<Self> {
        Self::new(MatchOp::RegexNotEqual, name, pattern)
    }

    pub fn matches(&self, value: &str) -> bool {
        let res = self.handler.matches(value);
        if self.op.is_negative() {
            !res
        } else {
            res
        }
    }

    /// Whether a series lacking the label would be selected.
    pub fn matches_empty(&self) -> bool {
        self.matches("")
    }

    pub fn is_negative(&self) -> bool {
        self.op.is_negative()
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.name == other.name && self.value == other.value
    }
}

impl Display for LabelMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.name, self.op, enquote::enquote('"', &self.value))
    }
}

impl TryFrom<&Matcher> for LabelMatcher {
    type Error = TsdbError;

    fn try_from(matcher: &Matcher) -> Result<Self, Self::Error> {
        let op = match &matcher.op {
            ParserMatchOp::Equal => MatchOp::Equal,
            ParserMatchOp::NotEqual => MatchOp::NotEqual,
            ParserMatchOp::Re(_) => MatchOp::RegexEqual,
            ParserMatchOp::NotRe(_) => MatchOp::RegexNotEqual,
        };
        LabelMatcher::new(op, &matcher.name, &matcher.value)
    }
}

/// A selection must name at least one matcher that rejects the empty value, otherwise it would
/// select every series in the head.
pub fn validate_matchers(matchers: &[LabelMatcher]) -> TsdbResult<()> {
    if matchers.is_empty() {
        return Err(TsdbError::InvalidMatcher("no matchers specified".to_string()));
    }
    if matchers.iter().all(|m| m.matches_empty()) {
        let list = matchers
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(TsdbError::InvalidMatcher(format!(
            "{{{list}}}: at least one matcher must not match the empty string"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(MatchOp::Equal, "api", "api", true)]
    #[test_case(MatchOp::Equal, "api", "apiserver", false)]
    #[test_case(MatchOp::NotEqual, "api", "web", true)]
    #[test_case(MatchOp::NotEqual, "api", "api", false)]
    #[test_case(MatchOp::RegexEqual, "a.*", "api", true)]
    #[test_case(MatchOp::RegexEqual, "pi", "api", false ; "regex is anchored")]
    #[test_case(MatchOp::RegexEqual, "api|web", "web", true)]
    #[test_case(MatchOp::RegexNotEqual, "api|web", "db", true)]
    #[test_case(MatchOp::RegexNotEqual, ".*", "anything", false)]
    #[test_case(MatchOp::RegexEqual, "plain", "plain", true ; "literal regex")]
    fn test_matches(op: MatchOp, pattern: &str, value: &str, expected: bool) {
        let matcher = LabelMatcher::new(op, "job", pattern).unwrap();
        assert_eq!(matcher.matches(value), expected);
    }

    #[test_case(MatchOp::Equal, "", true)]
    #[test_case(MatchOp::Equal, "x", false)]
    #[test_case(MatchOp::NotEqual, "x", true)]
    #[test_case(MatchOp::RegexEqual, ".*", true)]
    #[test_case(MatchOp::RegexEqual, ".+", false)]
    #[test_case(MatchOp::RegexNotEqual, "", false)]
    fn test_matches_empty(op: MatchOp, pattern: &str, expected: bool) {
        let matcher = LabelMatcher::new(op, "job", pattern).unwrap();
        assert_eq!(matcher.matches_empty(), expected);
    }

    #[test]
    fn test_invalid_regex() {
        let res = LabelMatcher::regex("job", "(unclosed");
        assert!(matches!(res, Err(TsdbError::InvalidMatcher(_))));
    }

    #[test]
    fn test_validate_matchers() {
        assert!(validate_matchers(&[]).is_err());
        let only_empty = vec![
            LabelMatcher::regex("job", ".*").unwrap(),
            LabelMatcher::not_equal("env", "prod"),
        ];
        assert!(matches!(validate_matchers(&only_empty), Err(TsdbError::InvalidMatcher(_))));
        let ok = vec![LabelMatcher::equal("__name__", "up"), LabelMatcher::not_equal("env", "prod")];
        assert!(validate_matchers(&ok).is_ok());
    }

    #[test]
    fn test_display() {
        let matcher = LabelMatcher::regex("path", "/api/\"v1\"").unwrap();
        assert_eq!(matcher.to_string(), r#"path=~"/api/\"v1\"""#);
    }
}
