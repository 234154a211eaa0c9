//! Rule evaluation
//!
//! A [`Rule`] tree is compiled once per query into a boxed predicate.
//! Compilation resolves field names, coerces datetime literals to
//! microseconds and builds case-insensitive patterns, so evaluating a track
//! is only comparisons.
//!
//! Compilation returns `None` for the null predicate (the tree places no
//! restriction), which is what an empty `all`/`any` compiles to.

use crate::error::{LibraryError, Result};
use crate::models::{
    field_kind, Condition, FieldKind, Operator, PlaylistRef, Rule, RuleValue, Track, TrackField,
};
use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Compiled rule.
pub type Predicate<'a> = Box<dyn Fn(&Track) -> bool + Send + Sync + 'a>;

/// Resolves `playlist` rules to the track ids of the referenced playlist.
pub trait MembershipLookup: Send + Sync {
    /// Track ids in `reference`, or `None` when the playlist is unknown.
    fn members(&self, reference: &PlaylistRef) -> Option<&HashSet<String>>;
}

impl MembershipLookup for HashMap<PlaylistRef, HashSet<String>> {
    fn members(&self, reference: &PlaylistRef) -> Option<&HashSet<String>> {
        self.get(reference)
    }
}

/// Lookup for rule trees without playlist references.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemberships;

impl MembershipLookup for NoMemberships {
    fn members(&self, _reference: &PlaylistRef) -> Option<&HashSet<String>> {
        None
    }
}

/// Inputs a rule may depend on besides the track itself.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    /// Anchor for relative datetime literals ("3 days ago")
    pub now: DateTime<Utc>,
    pub memberships: &'a dyn MembershipLookup,
}

impl<'a> EvalContext<'a> {
    pub fn new(now: DateTime<Utc>, memberships: &'a dyn MembershipLookup) -> Self {
        Self { now, memberships }
    }
}

/// Compile `rule`. `Ok(None)` means every track matches.
pub fn compile<'a>(rule: &Rule, ctx: &EvalContext<'a>) -> Result<Option<Predicate<'a>>> {
    match rule {
        Rule::All { all } => {
            let mut parts = Vec::with_capacity(all.len());
            for child in all {
                // A null child constrains nothing inside a conjunction.
                if let Some(predicate) = compile(child, ctx)? {
                    parts.push(predicate);
                }
            }
            Ok(match parts.len() {
                0 => None,
                1 => parts.pop(),
                _ => Some(Box::new(move |track: &Track| parts.iter().all(|p| p(track)))),
            })
        }
        Rule::Any { any } => {
            let mut parts = Vec::with_capacity(any.len());
            for child in any {
                match compile(child, ctx)? {
                    Some(predicate) => parts.push(predicate),
                    // One unrestricted alternative makes the disjunction unrestricted.
                    None => return Ok(None),
                }
            }
            Ok(match parts.len() {
                0 => None,
                1 => parts.pop(),
                _ => Some(Box::new(move |track: &Track| parts.iter().any(|p| p(track)))),
            })
        }
        Rule::Condition(condition) => compile_condition(condition, ctx).map(Some),
    }
}

/// Evaluate `rule` against a single track.
pub fn matches(rule: &Rule, track: &Track, ctx: &EvalContext<'_>) -> Result<bool> {
    Ok(compile(rule, ctx)?.map_or(true, |predicate| predicate(track)))
}

fn invalid(condition: &Condition, message: impl Into<String>) -> LibraryError {
    LibraryError::InvalidInput {
        field: condition.name.clone(),
        message: message.into(),
    }
}

fn compile_condition<'a>(condition: &Condition, ctx: &EvalContext<'a>) -> Result<Predicate<'a>> {
    let kind = field_kind(&condition.name)
        .ok_or_else(|| invalid(condition, "unknown rule field"))?;
    let op = condition.operator;
    if !op.applies_to(kind) {
        return Err(invalid(
            condition,
            format!("operator {:?} is not valid for {:?} fields", op, kind),
        ));
    }

    if kind == FieldKind::Playlist {
        return compile_membership(condition, ctx);
    }

    let field: TrackField = condition
        .name
        .parse()
        .map_err(|e: String| invalid(condition, e))?;

    match kind {
        FieldKind::Numeric => {
            let rhs = numeric_literal(&condition.value)
                .ok_or_else(|| invalid(condition, "expected a number"))?;
            Ok(Box::new(move |track: &Track| {
                let lhs = track.number(field);
                match op {
                    Operator::Eq => lhs == rhs,
                    Operator::Neq => lhs != rhs,
                    Operator::Lt => lhs < rhs,
                    Operator::Lte => lhs <= rhs,
                    Operator::Gt => lhs > rhs,
                    _ => lhs >= rhs,
                }
            }))
        }
        FieldKind::Datetime => {
            let rhs = coerce_datetime(&condition.value, ctx.now)
                .ok_or_else(|| invalid(condition, "expected a timestamp, RFC 3339 date or '<n> <unit> ago'"))?;
            Ok(Box::new(move |track: &Track| {
                let lhs = track.number(field);
                if op == Operator::Before {
                    lhs < rhs
                } else {
                    lhs > rhs
                }
            }))
        }
        _ => compile_text(condition, field),
    }
}

fn compile_text<'a>(condition: &Condition, field: TrackField) -> Result<Predicate<'a>> {
    let literal = match &condition.value {
        RuleValue::Text(text) => text.clone(),
        RuleValue::Number(n) => n.to_string(),
    };

    let predicate: Predicate<'a> = match condition.operator {
        Operator::Eq => Box::new(move |track: &Track| track.text(field) == literal),
        Operator::Neq => Box::new(move |track: &Track| track.text(field) != literal),
        Operator::Contains => Box::new(move |track: &Track| track.text(field).contains(&*literal)),
        Operator::NotContains => {
            Box::new(move |track: &Track| !track.text(field).contains(&*literal))
        }
        op => {
            let escaped = regex::escape(&literal);
            let anchored = matches!(op, Operator::EqIgnoreCase | Operator::NeqIgnoreCase);
            let pattern = if anchored {
                format!("(?i)^{}$", escaped)
            } else {
                format!("(?i){}", escaped)
            };
            let regex = Regex::new(&pattern).map_err(|e| invalid(condition, e.to_string()))?;
            let negate = matches!(op, Operator::NeqIgnoreCase | Operator::NotContainsIgnoreCase);
            Box::new(move |track: &Track| regex.is_match(track.text(field)) != negate)
        }
    };
    Ok(predicate)
}

fn compile_membership<'a>(condition: &Condition, ctx: &EvalContext<'a>) -> Result<Predicate<'a>> {
    let reference = condition
        .playlist_ref()
        .ok_or_else(|| invalid(condition, "expected local:<id> or remote:<id>"))?;
    let members = ctx.memberships.members(&reference);
    let negate = condition.operator == Operator::Neq;

    Ok(Box::new(move |track: &Track| {
        let is_member = members.is_some_and(|ids| ids.contains(&track.id));
        is_member != negate
    }))
}

fn numeric_literal(value: &RuleValue) -> Option<i64> {
    match value {
        RuleValue::Number(n) => Some(*n),
        RuleValue::Text(text) => text.trim().parse().ok(),
    }
}

/// Coerce a datetime literal to microseconds since the epoch.
///
/// Accepts integer microseconds, RFC 3339 strings and
/// `"<n> <minutes|hours|days|weeks|months|years> ago"` relative to `now`.
pub fn coerce_datetime(value: &RuleValue, now: DateTime<Utc>) -> Option<i64> {
    let text = match value {
        RuleValue::Number(micros) => return Some(*micros),
        RuleValue::Text(text) => text.trim(),
    };

    if let Ok(micros) = text.parse::<i64>() {
        return Some(micros);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc).timestamp_micros());
    }

    relative_to(text, now).map(|at| at.timestamp_micros())
}

fn relative_to(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();
    let mut words = lower.split_whitespace();
    let amount: u32 = words.next()?.parse().ok()?;
    let unit = words.next()?;
    if words.next()? != "ago" || words.next().is_some() {
        return None;
    }

    let unit = unit.strip_suffix('s').unwrap_or(unit);
    match unit {
        "minute" => now.checked_sub_signed(Duration::minutes(amount.into())),
        "hour" => now.checked_sub_signed(Duration::hours(amount.into())),
        "day" => now.checked_sub_signed(Duration::days(amount.into())),
        "week" => now.checked_sub_signed(Duration::weeks(amount.into())),
        "month" => now.checked_sub_months(Months::new(amount)),
        "year" => now.checked_sub_months(Months::new(amount.checked_mul(12)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> EvalContext<'static> {
        EvalContext::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), &NoMemberships)
    }

    fn track() -> Track {
        Track {
            id: "t1".to_string(),
            title: "Blue in Green".to_string(),
            artist: "Miles Davis".to_string(),
            year: 1959,
            rating: 5,
            last_played: Utc
                .with_ymd_and_hms(2024, 5, 30, 0, 0, 0)
                .unwrap()
                .timestamp_micros(),
            ..Default::default()
        }
    }

    fn text(name: &str, op: Operator, value: &str) -> Rule {
        Rule::condition(name, op, RuleValue::Text(value.to_string()))
    }

    fn num(name: &str, op: Operator, value: i64) -> Rule {
        Rule::condition(name, op, RuleValue::Number(value))
    }

    fn eval(rule: &Rule) -> bool {
        matches(rule, &track(), &ctx()).unwrap()
    }

    #[test]
    fn test_numeric_operators() {
        assert!(eval(&num("year", Operator::Eq, 1959)));
        assert!(eval(&num("year", Operator::Neq, 1960)));
        assert!(eval(&num("year", Operator::Lt, 1960)));
        assert!(eval(&num("year", Operator::Lte, 1959)));
        assert!(!eval(&num("year", Operator::Gt, 1959)));
        assert!(eval(&num("rating", Operator::Gte, 5)));
        assert!(eval(&text("rating", Operator::Gte, "4")));
    }

    #[test]
    fn test_string_operators() {
        assert!(eval(&text("artist", Operator::Eq, "Miles Davis")));
        assert!(!eval(&text("artist", Operator::Eq, "miles davis")));
        assert!(eval(&text("title", Operator::Contains, "in G")));
        assert!(eval(&text("title", Operator::NotContains, "Red")));
        assert!(eval(&text("artist", Operator::EqIgnoreCase, "MILES DAVIS")));
        assert!(!eval(&text("artist", Operator::EqIgnoreCase, "miles")));
        assert!(eval(&text("artist", Operator::NeqIgnoreCase, "miles")));
        assert!(eval(&text("title", Operator::ContainsIgnoreCase, "BLUE")));
        assert!(!eval(&text("title", Operator::NotContainsIgnoreCase, "green")));
    }

    #[test]
    fn test_case_insensitive_literal_is_escaped() {
        let mut t = track();
        t.title = "What? (Live)".to_string();
        let rule = text("title", Operator::EqIgnoreCase, "what? (live)");
        assert!(matches(&rule, &t, &ctx()).unwrap());

        let wildcard = text("title", Operator::ContainsIgnoreCase, ".*");
        assert!(!matches(&wildcard, &t, &ctx()).unwrap());
    }

    #[test]
    fn test_datetime_coercion() {
        assert!(eval(&text("lastPlayed", Operator::After, "1 week ago")));
        assert!(!eval(&text("lastPlayed", Operator::After, "1 day ago")));
        assert!(eval(&text("lastPlayed", Operator::Before, "2024-05-31T00:00:00Z")));
        assert!(eval(&num("lastPlayed", Operator::After, 0)));

        let now = ctx().now;
        assert_eq!(
            coerce_datetime(&RuleValue::Text("2 months ago".to_string()), now),
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap().timestamp_micros())
        );
        assert_eq!(coerce_datetime(&RuleValue::Text("soon".to_string()), now), None);
        assert_eq!(coerce_datetime(&RuleValue::Text("3 days".to_string()), now), None);
    }

    #[test]
    fn test_empty_compound_selects_everything() {
        assert!(compile(&Rule::all(vec![]), &ctx()).unwrap().is_none());
        assert!(compile(&Rule::any(vec![]), &ctx()).unwrap().is_none());
        assert!(eval(&Rule::all(vec![])));
    }

    #[test]
    fn test_null_child_semantics() {
        let never = num("year", Operator::Eq, 1);
        let all = Rule::all(vec![Rule::any(vec![]), never.clone()]);
        assert!(!eval(&all));

        let any = Rule::any(vec![Rule::all(vec![]), never]);
        assert!(compile(&any, &ctx()).unwrap().is_none());
    }

    #[test]
    fn test_compound_logic() {
        let rule = Rule::all(vec![
            text("artist", Operator::ContainsIgnoreCase, "davis"),
            Rule::any(vec![num("year", Operator::Lt, 1950), num("rating", Operator::Eq, 5)]),
        ]);
        assert!(eval(&rule));

        let rule = Rule::any(vec![num("year", Operator::Lt, 1950), num("rating", Operator::Lt, 3)]);
        assert!(!eval(&rule));
    }

    #[test]
    fn test_membership() {
        let mut sets = HashMap::new();
        sets.insert(
            PlaylistRef::Remote("r1".to_string()),
            HashSet::from(["t1".to_string()]),
        );
        let ctx = EvalContext::new(Utc::now(), &sets);

        let member = text("playlist", Operator::Eq, "remote:r1");
        let not_member = text("playlist", Operator::Neq, "remote:r1");
        let unknown = text("playlist", Operator::Eq, "local:99");

        assert!(matches(&member, &track(), &ctx).unwrap());
        assert!(!matches(&not_member, &track(), &ctx).unwrap());
        assert!(!matches(&unknown, &track(), &ctx).unwrap());
    }

    #[test]
    fn test_invalid_rules_fail_to_compile() {
        assert!(compile(&text("mood", Operator::Eq, "x"), &ctx()).is_err());
        assert!(compile(&num("title", Operator::Gt, 3), &ctx()).is_err());
        assert!(compile(&text("year", Operator::Eq, "nineteen"), &ctx()).is_err());
        assert!(compile(&text("lastPlayed", Operator::Before, "whenever"), &ctx()).is_err());
    }
}
