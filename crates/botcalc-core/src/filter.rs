//! Filter-tag parser and matching.
//!
//! A filter tag is a tag *name* of the form `event(#tag:"value")`. It is
//! used both as an event subscription key (`+(#name:"Joe")` fires for `+`
//! events involving bots named Joe) and as a declarative selector.
//!
//! The grammar is recoverable: a tag that has started to look like a
//! filter but is not finished yet (`+(#name`) parses as *partial*, so
//! editors can accept it while the user is still typing.

use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};

use crate::bot::PrecalculatedBot;
use crate::literal::{self, coerce};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The `(tag, value)` selector of a filter tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagFilter {
    pub tag: String,
    pub value: Value,
}

/// A fully parsed filter tag.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTag {
    pub event_name: String,
    pub filter: TagFilter,
}

/// Outcome of [`parse_filter_tag`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterParse {
    /// The whole filter parsed.
    Complete(FilterTag),
    /// An event name and `(` were found but the selector is incomplete.
    Partial { event_name: String },
    /// Not a filter tag.
    Invalid,
}

impl FilterParse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Complete(parsed) => Some(&parsed.event_name),
            Self::Partial { event_name } => Some(event_name),
            Self::Invalid => None,
        }
    }

    #[must_use]
    pub const fn filter(&self) -> Option<&TagFilter> {
        match self {
            Self::Complete(parsed) => Some(&parsed.filter),
            _ => None,
        }
    }
}

impl Serialize for FilterParse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("FilterParse", 4)?;
        s.serialize_field("success", &self.is_success())?;
        s.serialize_field("partialSuccess", &self.is_partial())?;
        s.serialize_field("eventName", &self.event_name())?;
        s.serialize_field("filter", &self.filter())?;
        s.end()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a filter tag of the shape `eventName ( # tagName : "value" )`.
///
/// Missing closing quotes and parentheses are tolerated. The value is the
/// raw text between the first and last `"` (falling back to the `:` and the
/// last `)` when unquoted) and is coerced like a literal tag value.
#[must_use]
pub fn parse_filter_tag(tag: &str) -> FilterParse {
    let tag = tag.trim();

    let Some(paren) = tag.find('(') else {
        return FilterParse::Invalid;
    };
    let hash = tag.find('#');
    if hash.is_some_and(|hash| hash < paren) {
        return FilterParse::Invalid;
    }

    let event_name = tag[..paren].trim();
    if event_name.is_empty() {
        return FilterParse::Invalid;
    }
    let partial = || FilterParse::Partial {
        event_name: event_name.to_string(),
    };

    let Some(hash) = hash else {
        return partial();
    };
    let Some(colon) = tag[hash..].find(':').map(|offset| hash + offset) else {
        return partial();
    };

    let tag_name = tag[hash + 1..colon].trim();
    if tag_name.is_empty() {
        return partial();
    }

    let first_quote = tag.find('"');
    let last_quote = tag.rfind('"');
    let (start, end) = match (first_quote, last_quote) {
        (Some(first), Some(last)) if first != last => (first + 1, last),
        (Some(first), _) => (first + 1, tag.len()),
        (None, _) => (colon + 1, tag.rfind(')').unwrap_or(tag.len())),
    };
    let raw_value = if start <= end { &tag[start..end] } else { "" };

    FilterParse::Complete(FilterTag {
        event_name: event_name.to_string(),
        filter: TagFilter {
            tag: tag_name.to_string(),
            value: coerce(raw_value),
        },
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Why a tag name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagError {
    /// Empty or whitespace-only.
    Required,
    /// Contains `#` outside a (possibly partial) filter tag.
    InvalidChar,
}

/// Result of [`validate_tag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TagError>,
}

/// Validate a tag name.
///
/// Whitespace-only names are invalid as required. A name containing `#` is
/// invalid unless it parses as a full or partial filter tag.
#[must_use]
pub fn validate_tag(tag: &str) -> TagValidation {
    let mut errors = Vec::new();
    if tag.trim().is_empty() {
        errors.push(TagError::Required);
    } else if tag.contains('#') {
        let parsed = parse_filter_tag(tag);
        if !parsed.is_success() && !parsed.is_partial() {
            errors.push(TagError::InvalidChar);
        }
    }
    TagValidation {
        valid: errors.is_empty(),
        errors,
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Returns `true` if `parsed` is a complete filter for `event_name` whose
/// selector matches `bot`.
///
/// The bot's computed value must equal the filter value. Array filters
/// also match against the raw tag.
#[must_use]
pub fn value_matches_filter(parsed: &FilterParse, bot: &PrecalculatedBot, event_name: &str) -> bool {
    let FilterParse::Complete(filter_tag) = parsed else {
        return false;
    };
    if filter_tag.event_name != event_name {
        return false;
    }

    let filter = &filter_tag.filter;
    let computed = bot.values.get(&filter.tag).unwrap_or(&Value::Null);
    if *computed == filter.value {
        return true;
    }
    matches!(filter.value, Value::Array(_))
        && bot
            .tags
            .get(&filter.tag)
            .is_some_and(|raw| literal_matches(raw, &filter.value))
}

fn literal_matches(raw: &Value, expected: &Value) -> bool {
    match raw {
        Value::String(s) if literal::is_array(s) => coerce(s) == *expected,
        other => other == expected,
    }
}

/// Returns `true` if the tag name `tag` is a filter for `event_name` that
/// matches `bot`.
#[must_use]
pub fn tag_matches_filter(tag: &str, bot: &PrecalculatedBot, event_name: &str) -> bool {
    value_matches_filter(&parse_filter_tag(tag), bot, event_name)
}

/// Tags on `subject` that are filters for `event_name` matching `other`.
#[must_use]
pub fn tags_matching_filter(
    subject: &PrecalculatedBot,
    other: &PrecalculatedBot,
    event_name: &str,
) -> Vec<String> {
    subject
        .tag_names()
        .into_iter()
        .filter(|tag| tag_matches_filter(tag, other, event_name))
        .collect()
}

/// Every complete filter tag on `bot` for `event_name`.
#[must_use]
pub fn filters_matching_event(bot: &PrecalculatedBot, event_name: &str) -> Vec<FilterTag> {
    bot.tag_names()
        .iter()
        .filter_map(|tag| match parse_filter_tag(tag) {
            FilterParse::Complete(parsed) if parsed.event_name == event_name => Some(parsed),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;

    fn complete(tag: &str) -> FilterTag {
        match parse_filter_tag(tag) {
            FilterParse::Complete(parsed) => parsed,
            other => panic!("expected complete parse of {tag:?}, got {other:?}"),
        }
    }

    fn precalculated(id: &str, tags: &[(&str, Value)]) -> PrecalculatedBot {
        let mut bot = PrecalculatedBot::from_bot(&Bot::new(id));
        for (tag, value) in tags {
            bot.tags.insert((*tag).to_string(), value.clone());
            bot.values.insert((*tag).to_string(), value.clone());
        }
        bot
    }

    #[test]
    fn parses_quoted_value() {
        let parsed = complete(r#"+(#name:"Joe")"#);
        assert_eq!(parsed.event_name, "+");
        assert_eq!(parsed.filter.tag, "name");
        assert_eq!(parsed.filter.value, Value::from("Joe"));
    }

    #[test]
    fn tolerates_missing_paren_and_quote() {
        let parsed = complete(r#"+ ( # lal alal : "abc"#);
        assert_eq!(parsed.event_name, "+");
        assert_eq!(parsed.filter.tag, "lal alal");
        assert_eq!(parsed.filter.value, Value::from("abc"));
    }

    #[test]
    fn unquoted_value_runs_to_last_paren() {
        let parsed = complete("onClick(#count:12)");
        assert_eq!(parsed.filter.value, Value::Number(12.0));

        let parsed = complete("onClick(#flag:true");
        assert_eq!(parsed.filter.value, Value::Bool(true));
    }

    #[test]
    fn value_is_not_retrimmed() {
        let parsed = complete("+(#name: Joe)");
        assert_eq!(parsed.filter.value, Value::from(" Joe"));
    }

    #[test]
    fn array_values_are_coerced() {
        let parsed = complete(r#"+(#list:"[1,2,x]")"#);
        assert_eq!(
            parsed.filter.value,
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::from("x")])
        );
    }

    #[test]
    fn partial_parses() {
        assert_eq!(
            parse_filter_tag("+(#name"),
            FilterParse::Partial {
                event_name: "+".into()
            }
        );
        assert!(parse_filter_tag("+(").is_partial());
        assert!(parse_filter_tag("+(#:abc)").is_partial());
    }

    #[test]
    fn invalid_parses() {
        assert_eq!(parse_filter_tag("name"), FilterParse::Invalid);
        assert_eq!(parse_filter_tag("#name(abc)"), FilterParse::Invalid);
        assert_eq!(parse_filter_tag("(#name:1)"), FilterParse::Invalid);
    }

    #[test]
    fn serializes_flags() {
        let json = serde_json::to_value(parse_filter_tag("+(#a")).expect("serialize");
        assert_eq!(json["success"], false);
        assert_eq!(json["partialSuccess"], true);
        assert_eq!(json["eventName"], "+");
        assert!(json["filter"].is_null());
    }

    #[test]
    fn validation() {
        assert!(validate_tag("name").valid);
        assert!(validate_tag("+(#name:\"x\")").valid);
        assert!(validate_tag("+(#name").valid);
        assert_eq!(validate_tag("   ").errors, vec![TagError::Required]);
        assert_eq!(validate_tag("").errors, vec![TagError::Required]);
        assert_eq!(validate_tag("#name").errors, vec![TagError::InvalidChar]);
    }

    #[test]
    fn matches_exact_value_only() {
        let tag = r#"+(#name:"Joe")"#;
        assert!(tag_matches_filter(tag, &precalculated("a", &[("name", "Joe".into())]), "+"));
        assert!(!tag_matches_filter(tag, &precalculated("a", &[("name", "joe".into())]), "+"));
        assert!(!tag_matches_filter(tag, &precalculated("a", &[("name", "Joe".into())]), "-"));
        assert!(!tag_matches_filter(tag, &precalculated("a", &[]), "+"));
    }

    #[test]
    fn array_filters_match_raw_literal() {
        let mut bot = precalculated("a", &[]);
        bot.tags.insert("list".into(), Value::from("[1,2]"));
        bot.values.insert(
            "list".into(),
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
        );
        assert!(tag_matches_filter(r#"+(#list:"[1,2]")"#, &bot, "+"));
    }

    #[test]
    fn finds_matching_tags_on_subject() {
        let subject = precalculated(
            "s",
            &[
                (r#"+(#name:"Joe")"#, "=1".into()),
                (r#"+(#name:"Bob")"#, "=2".into()),
                ("plain", "x".into()),
            ],
        );
        let other = precalculated("o", &[("name", "Joe".into())]);
        assert_eq!(
            tags_matching_filter(&subject, &other, "+"),
            vec![r#"+(#name:"Joe")"#.to_string()]
        );
        assert_eq!(filters_matching_event(&subject, "+").len(), 2);
    }
}
