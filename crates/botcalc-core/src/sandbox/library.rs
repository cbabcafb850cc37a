//! Library functions injected into every formula scope.
//!
//! Query functions record the selectors they read before scanning bots, so
//! a formula that matched nothing still learns which future bots matter.
//!
//! | function                        | selector recorded                |
//! |---------------------------------|----------------------------------|
//! | `getBots()`                     | `All`                            |
//! | `getBots("#tag")`               | `Tag(tag)`                       |
//! | `getBots("#tag", value)`        | `TagValue(tag, value)`           |
//! | `getBots("#tag", fn)`           | `Tag(tag)`                       |
//! | `getBots(filter, ...)`          | union of the filters' selectors  |
//! | `getBotTagValues("#tag", f?)`   | `Tag(tag)` or `TagValue`         |
//! | `getTag(bot, "#a", ...)`        | `BotTag(bot, a)` per hop         |
//! | `bot.space`, exported bot       | `BotSpace(bot)`                  |

use std::collections::BTreeMap;
use std::iter;

use super::interpreter::{
    Function, Interpreter, RtValue, function, import, primitive, strict_equals,
    to_js_string, to_number, truthy,
};
use crate::dependency::Dependency;
use crate::error::EvalError;

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    GetBots,
    GetBot,
    GetBotTagValues,
    GetTag,
    ByTag,
    InSpace,
    Not,
    Either,
    Uuid,
    Math(MathFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MathFn {
    Sum,
    Avg,
    Min,
    Max,
    Abs,
    Round,
    Floor,
    Ceil,
    Sqrt,
}

const GLOBALS: &[(&str, Builtin)] = &[
    ("getBots", Builtin::GetBots),
    ("getBot", Builtin::GetBot),
    ("getBotTagValues", Builtin::GetBotTagValues),
    ("getTag", Builtin::GetTag),
    ("byTag", Builtin::ByTag),
    ("inSpace", Builtin::InSpace),
    ("not", Builtin::Not),
    ("either", Builtin::Either),
    ("uuid", Builtin::Uuid),
];

const MATH: &[(&str, MathFn)] = &[
    ("sum", MathFn::Sum),
    ("avg", MathFn::Avg),
    ("min", MathFn::Min),
    ("max", MathFn::Max),
    ("abs", MathFn::Abs),
    ("round", MathFn::Round),
    ("floor", MathFn::Floor),
    ("ceil", MathFn::Ceil),
    ("sqrt", MathFn::Sqrt),
];

impl Builtin {
    pub(crate) fn lookup(name: &str) -> Option<Self> {
        GLOBALS
            .iter()
            .find(|(global, _)| *global == name)
            .map(|(_, builtin)| *builtin)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Math(f) => MATH
                .iter()
                .find(|(_, candidate)| *candidate == f)
                .map_or("math", |(name, _)| *name),
            other => GLOBALS
                .iter()
                .find(|(_, candidate)| *candidate == other)
                .map_or("builtin", |(name, _)| *name),
        }
    }
}

/// The `math` object.
pub(crate) fn math_namespace() -> RtValue {
    RtValue::Object(
        MATH.iter()
            .map(|(name, f)| ((*name).to_string(), function(Function::Builtin(Builtin::Math(*f)))))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn strip_hash(tag: &str) -> String {
    tag.strip_prefix('#').unwrap_or(tag).to_string()
}

// ---------------------------------------------------------------------------
// Bot filters
// ---------------------------------------------------------------------------

/// A predicate over bots, built by `byTag`, `inSpace`, `not` and `either`
/// or from the arguments of a query.
#[derive(Debug, Clone)]
pub(crate) enum BotFilter {
    ByTag { tag: String, expected: Expected },
    InSpace(String),
    Not(Box<BotFilter>),
    Either(Vec<BotFilter>),
    /// A user function called with each bot view.
    Predicate(RtValue),
}

#[derive(Debug, Clone)]
pub(crate) enum Expected {
    Present,
    Equals(RtValue),
    Matches(RtValue),
}

impl Expected {
    fn from_arg(arg: Option<RtValue>) -> Self {
        match arg {
            None | Some(RtValue::Undefined) => Self::Present,
            Some(RtValue::Function(f)) if !matches!(*f, Function::Filter(_)) => {
                Self::Matches(RtValue::Function(f))
            }
            Some(value) => Self::Equals(value),
        }
    }
}

impl BotFilter {
    fn by_tag(tag: &str, expected: Expected) -> Self {
        Self::ByTag {
            tag: strip_hash(tag),
            expected,
        }
    }

    fn dependencies(&self, out: &mut Vec<Dependency>) {
        match self {
            Self::ByTag {
                tag,
                expected: Expected::Equals(value),
            } => out.push(
                primitive(value).map_or_else(|| Dependency::tag(tag), |v| Dependency::tag_value(tag, v)),
            ),
            Self::ByTag { tag, .. } => out.push(Dependency::tag(tag)),
            Self::InSpace(_) | Self::Not(_) | Self::Predicate(_) => out.push(Dependency::All),
            Self::Either(filters) => {
                for filter in filters {
                    filter.dependencies(out);
                }
            }
        }
    }
}

/// Interpret a query argument as a filter. `null` and `undefined` are
/// skipped, plain functions become predicates.
fn as_filter(arg: RtValue) -> Result<Option<BotFilter>, EvalError> {
    match arg {
        RtValue::Undefined | RtValue::Null => Ok(None),
        RtValue::Function(f) => Ok(Some(match &*f {
            Function::Filter(filter) => filter.clone(),
            _ => BotFilter::Predicate(RtValue::Function(f)),
        })),
        other => Err(EvalError::type_error(format!(
            "{} is not a valid bot filter",
            to_js_string(&other)
        ))),
    }
}

fn filters_from_args(args: Vec<RtValue>) -> Result<Vec<BotFilter>, EvalError> {
    let mut args = args.into_iter();
    match args.next() {
        None => Ok(Vec::new()),
        Some(RtValue::Str(tag)) => Ok(vec![BotFilter::by_tag(&tag, Expected::from_arg(args.next()))]),
        Some(first) => {
            let mut filters = Vec::new();
            for arg in iter::once(first).chain(args) {
                filters.extend(as_filter(arg)?);
            }
            Ok(filters)
        }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

impl Interpreter<'_> {
    pub(super) fn call_builtin(&mut self, builtin: Builtin, args: Vec<RtValue>) -> Result<RtValue, EvalError> {
        match builtin {
            Builtin::GetBots => Ok(RtValue::Array(
                self.query(args)?.into_iter().map(RtValue::Bot).collect(),
            )),
            Builtin::GetBot => Ok(self
                .query(args)?
                .into_iter()
                .next()
                .map_or(RtValue::Null, RtValue::Bot)),
            Builtin::GetBotTagValues => self.bot_tag_values(args),
            Builtin::GetTag => self.get_tag(args),
            Builtin::ByTag => {
                let mut args = args.into_iter();
                let tag = args.next().map(|tag| to_js_string(&tag)).unwrap_or_default();
                if tag.is_empty() {
                    return Err(EvalError::type_error("byTag() requires a tag name"));
                }
                Ok(filter(BotFilter::by_tag(&tag, Expected::from_arg(args.next()))))
            }
            Builtin::InSpace => {
                let space = args.first().map(to_js_string).unwrap_or_default();
                Ok(filter(BotFilter::InSpace(space)))
            }
            Builtin::Not => {
                let inner = args
                    .into_iter()
                    .next()
                    .map(as_filter)
                    .transpose()?
                    .flatten()
                    .ok_or_else(|| EvalError::type_error("not() requires a filter"))?;
                Ok(filter(BotFilter::Not(Box::new(inner))))
            }
            Builtin::Either => {
                let mut filters = Vec::new();
                for arg in args {
                    filters.extend(as_filter(arg)?);
                }
                Ok(filter(BotFilter::Either(filters)))
            }
            Builtin::Uuid => Ok(RtValue::Str(self.host.uuid())),
            Builtin::Math(f) => Ok(RtValue::Number(math(f, &args))),
        }
    }

    /// Ids of every bot passing all filters built from `args`.
    fn query(&mut self, args: Vec<RtValue>) -> Result<Vec<String>, EvalError> {
        let filters = filters_from_args(args)?;

        let mut dependencies = Vec::new();
        if filters.is_empty() {
            dependencies.push(Dependency::All);
        }
        for filter in &filters {
            filter.dependencies(&mut dependencies);
        }
        for dependency in dependencies {
            self.host.record(dependency);
        }

        let mut found = Vec::new();
        'bots: for id in self.host.bot_ids() {
            for filter in &filters {
                if !self.filter_matches(filter, &id)? {
                    continue 'bots;
                }
            }
            found.push(id);
        }
        Ok(found)
    }

    pub(super) fn filter_matches(&mut self, filter: &BotFilter, id: &str) -> Result<bool, EvalError> {
        match filter {
            BotFilter::ByTag { tag, expected } => {
                let value = self.host.tag_value(id, tag)?;
                if value.is_empty() {
                    return Ok(false);
                }
                match expected {
                    Expected::Present => Ok(true),
                    Expected::Equals(wanted) => Ok(strict_equals(&import(value), wanted)),
                    Expected::Matches(predicate) => {
                        let verdict = self.invoke(predicate, vec![import(value)])?;
                        Ok(truthy(&verdict))
                    }
                }
            }
            BotFilter::InSpace(space) => Ok(self.host.bot_space(id).as_deref() == Some(space.as_str())),
            BotFilter::Not(inner) => Ok(!self.filter_matches(inner, id)?),
            BotFilter::Either(filters) => {
                for inner in filters {
                    if self.filter_matches(inner, id)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            BotFilter::Predicate(predicate) => {
                let verdict = self.invoke(predicate, vec![RtValue::Bot(id.to_string())])?;
                Ok(truthy(&verdict))
            }
        }
    }

    fn bot_tag_values(&mut self, args: Vec<RtValue>) -> Result<RtValue, EvalError> {
        let mut args = args.into_iter();
        let tag = match args.next() {
            Some(RtValue::Str(tag)) if !tag.is_empty() => strip_hash(&tag),
            _ => return Err(EvalError::type_error("getBotTagValues() requires a tag name")),
        };
        let expected = Expected::from_arg(args.next());

        match &expected {
            Expected::Equals(value) => match primitive(value) {
                Some(value) => self.host.record(Dependency::tag_value(&tag, value)),
                None => self.host.record(Dependency::tag(&tag)),
            },
            Expected::Present | Expected::Matches(_) => self.host.record(Dependency::tag(&tag)),
        }

        let mut values = Vec::new();
        for id in self.host.bot_ids() {
            let value = self.host.tag_value(&id, &tag)?;
            if value.is_empty() {
                continue;
            }
            let value = import(value);
            let keep = match &expected {
                Expected::Present => true,
                Expected::Equals(wanted) => strict_equals(&value, wanted),
                Expected::Matches(predicate) => truthy(&self.invoke(predicate, vec![value.clone()])?),
            };
            if keep {
                values.push(value);
            }
        }

        if values.len() == 1 {
            Ok(values.swap_remove(0))
        } else {
            Ok(RtValue::Array(values))
        }
    }

    /// Walk `getTag(bot, "#a", "#b")`: each hop reads a tag on the bot the
    /// previous value refers to.
    fn get_tag(&mut self, args: Vec<RtValue>) -> Result<RtValue, EvalError> {
        let mut args = args.into_iter();
        let mut current = args.next().unwrap_or(RtValue::Undefined);
        for tag in args {
            let tag = strip_hash(&to_js_string(&tag));
            current = match self.bot_id_of(&current) {
                Some(id) => self.read_tag(&id, &tag)?,
                None => match current {
                    RtValue::Object(mut map) => map.remove(&tag).unwrap_or(RtValue::Undefined),
                    // Not a bot yet; the read still has to be recorded so the
                    // bot's arrival reaches this formula.
                    RtValue::Str(id) => self.read_tag(&id, &tag)?,
                    _ => return Ok(RtValue::Undefined),
                },
            };
        }
        Ok(current)
    }

    /// The bot a value refers to: a bot view, an `{ id }` object naming a
    /// known bot, or a known bot id.
    pub(super) fn bot_id_of(&self, value: &RtValue) -> Option<String> {
        match value {
            RtValue::Bot(id) | RtValue::Tags(id) => Some(id.clone()),
            RtValue::Object(map) => match map.get("id") {
                Some(RtValue::Str(id)) if self.host.contains_bot(id) => Some(id.clone()),
                _ => None,
            },
            RtValue::Str(id) if self.host.contains_bot(id) => Some(id.clone()),
            _ => None,
        }
    }
}

fn filter(filter: BotFilter) -> RtValue {
    function(Function::Filter(filter))
}

// ---------------------------------------------------------------------------
// Math
// ---------------------------------------------------------------------------

/// Numeric arguments with arrays flattened one level.
fn numbers(args: &[RtValue]) -> Vec<f64> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            RtValue::Array(items) => out.extend(items.iter().map(to_number)),
            other => out.push(to_number(other)),
        }
    }
    out
}

fn math(f: MathFn, args: &[RtValue]) -> f64 {
    let first = args.first().map_or(f64::NAN, to_number);
    match f {
        MathFn::Sum => numbers(args).into_iter().sum(),
        MathFn::Avg => {
            let values = numbers(args);
            if values.is_empty() {
                f64::NAN
            } else {
                values.iter().sum::<f64>() / super::interpreter::count(values.len())
            }
        }
        MathFn::Min => numbers(args)
            .into_iter()
            .fold(f64::INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(n) }),
        MathFn::Max => numbers(args)
            .into_iter()
            .fold(f64::NEG_INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(n) }),
        MathFn::Abs => first.abs(),
        MathFn::Round => (first + 0.5).floor(),
        MathFn::Floor => first.floor(),
        MathFn::Ceil => first.ceil(),
        MathFn::Sqrt => first.sqrt(),
    }
}
