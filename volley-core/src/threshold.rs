use crate::Tags;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("missing comparison operator (expected one of <, <=, >, >=, ==, !=)")]
    MissingOperator,

    #[error("unknown aggregation `{0}`")]
    UnknownAggregation(String),

    #[error("percentile `{0}` is not a number between 0 and 100")]
    InvalidPercentile(String),

    #[error("bound `{0}` is not a finite number")]
    InvalidBound(String),

    #[error("metric selector `{0}` is malformed")]
    InvalidSelector(String),
}

/// The statistic a threshold looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    Percentile(f64),
}

impl FromStr for Aggregation {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let agg = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            "value" => Aggregation::Value,
            _ => {
                // Both `p(99.9)` and the short `p99` are accepted.
                let raw = if let Some(inner) = s.strip_prefix("p(") {
                    inner
                        .strip_suffix(')')
                        .ok_or_else(|| ExpressionError::InvalidPercentile(s.to_string()))?
                } else if let Some(inner) = s.strip_prefix('p') {
                    inner
                } else {
                    return Err(ExpressionError::UnknownAggregation(s.to_string()));
                };

                let pct: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ExpressionError::InvalidPercentile(s.to_string()))?;
                if !(0. ..=100.).contains(&pct) {
                    return Err(ExpressionError::InvalidPercentile(s.to_string()));
                }
                Aggregation::Percentile(pct)
            }
        };
        Ok(agg)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Value => f.write_str("value"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
            Comparison::Ne => (observed - bound).abs() >= f64::EPSILON,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// A comparison predicate over one aggregation, e.g. `p(99)<500`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expression {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
}

impl Expression {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.bound)
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op_start = s
            .find(|c: char| matches!(c, '<' | '>' | '=' | '!'))
            .ok_or(ExpressionError::MissingOperator)?;
        let (lhs, rest) = s.split_at(op_start);

        let (comparison, rhs) = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ]
        .into_iter()
        .find_map(|(token, cmp)| rest.strip_prefix(token).map(|rhs| (cmp, rhs)))
        .ok_or(ExpressionError::MissingOperator)?;

        let aggregation = lhs.parse()?;
        let bound: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| ExpressionError::InvalidBound(rhs.trim().to_string()))?;
        if !bound.is_finite() {
            return Err(ExpressionError::InvalidBound(rhs.trim().to_string()));
        }

        Ok(Self {
            aggregation,
            comparison,
            bound,
        })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.as_str(),
            self.bound
        )
    }
}

/// A metric name with an optional tag filter: `http_req_duration{status:200}`.
///
/// A selector with tags names a sub-metric that only receives samples of
/// the parent metric carrying every listed tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricSelector {
    pub metric: String,
    pub tags: Tags,
}

impl MetricSelector {
    pub fn new(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_submetric(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn matches(&self, name: &str, tags: &Tags) -> bool {
        self.metric == name
            && self
                .tags
                .iter()
                .all(|(k, v)| tags.get(k).is_some_and(|found| found == v))
    }
}

impl FromStr for MetricSelector {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ExpressionError::InvalidSelector(s.to_string());

        let Some((metric, rest)) = s.split_once('{') else {
            if s.is_empty() || s.contains('}') {
                return Err(invalid());
            }
            return Ok(Self::new(s));
        };

        let body = rest.strip_suffix('}').ok_or_else(invalid)?;
        let metric = metric.trim();
        if metric.is_empty() || body.trim().is_empty() {
            return Err(invalid());
        }

        // A segment without a `key:` prefix continues the previous value, so
        // values such as check names may contain `,`, `:` and braces.
        let mut selector = Self::new(metric);
        let mut pending: Option<(&str, String)> = None;
        for segment in body.split(',') {
            match segment.split_once(':') {
                Some((key, value)) if is_tag_key(key.trim()) => {
                    if let Some((key, value)) = pending.take() {
                        selector.tags.insert(key.to_string(), value.trim().to_string());
                    }
                    pending = Some((key.trim(), value.to_string()));
                }
                _ => match &mut pending {
                    Some((_, value)) => {
                        value.push(',');
                        value.push_str(segment);
                    }
                    None => return Err(invalid()),
                },
            }
        }
        if let Some((key, value)) = pending {
            selector.tags.insert(key.to_string(), value.trim().to_string());
        }
        Ok(selector)
    }
}

fn is_tag_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.metric)?;
        if self.is_submetric() {
            f.write_str("{")?;
            for (idx, (k, v)) in self.tags.iter().enumerate() {
                if idx > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{k}:{v}")?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

impl Serialize for MetricSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A parsed, validated threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub selector: MetricSelector,
    pub expression: Expression,
    /// The expression as written in the configuration
    pub source: String,
    pub abort_on_fail: bool,
}

impl Threshold {
    /// Key of the (sub-)metric this threshold reads in a snapshot.
    pub fn metric_key(&self) -> String {
        self.selector.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_percentile_expression() {
        let expr: Expression = "p(99)<500".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(99.));
        assert_eq!(expr.comparison, Comparison::Lt);
        assert_eq!(expr.bound, 500.);
        assert!(expr.holds(499.9));
        assert!(!expr.holds(500.));
    }

    #[test]
    fn parse_with_whitespace_and_short_percentile() {
        let expr: Expression = " p95 <= 200 ".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(95.));
        assert_eq!(expr.comparison, Comparison::Le);

        let expr: Expression = "p(99.9) >= 1.5".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(expr.comparison, Comparison::Ge);
    }

    #[test]
    fn parse_rate_expression() {
        let expr: Expression = "rate<0.01".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Rate);
        assert!(expr.holds(0.0));
        assert!(!expr.holds(0.02));
    }

    #[test]
    fn reject_malformed_expressions() {
        assert_eq!(
            "p99 500".parse::<Expression>(),
            Err(ExpressionError::MissingOperator)
        );
        assert!(matches!(
            "mean<5".parse::<Expression>(),
            Err(ExpressionError::UnknownAggregation(_))
        ));
        assert!(matches!(
            "p(101)<5".parse::<Expression>(),
            Err(ExpressionError::InvalidPercentile(_))
        ));
        assert!(matches!(
            "p(9<5".parse::<Expression>(),
            Err(ExpressionError::InvalidPercentile(_))
        ));
        assert!(matches!(
            "avg<fast".parse::<Expression>(),
            Err(ExpressionError::InvalidBound(_))
        ));
        assert!(matches!(
            "avg<inf".parse::<Expression>(),
            Err(ExpressionError::InvalidBound(_))
        ));
    }

    #[test]
    fn expression_display_round_trips() {
        let expr: Expression = "p(99) < 500".parse().unwrap();
        assert_eq!(expr.to_string(), "p(99)<500");
        assert_eq!(expr.to_string().parse::<Expression>().unwrap(), expr);
    }

    #[test]
    fn comparisons() {
        assert!(Comparison::Eq.holds(1., 1.));
        assert!(Comparison::Ne.holds(1., 2.));
        assert!(Comparison::Gt.holds(2., 1.));
        assert!(!Comparison::Ge.holds(0.5, 1.));
    }

    #[test]
    fn parse_selectors() {
        let plain: MetricSelector = "http_req_duration".parse().unwrap();
        assert!(!plain.is_submetric());
        assert_eq!(plain.to_string(), "http_req_duration");

        let sub: MetricSelector = "http_req_duration{ status:200 , method:GET }"
            .parse()
            .unwrap();
        assert_eq!(sub.metric, "http_req_duration");
        assert_eq!(sub.tags.get("status").map(String::as_str), Some("200"));
        assert_eq!(sub.to_string(), "http_req_duration{method:GET,status:200}");

        assert!("http_req_duration{status}".parse::<MetricSelector>().is_err());
        assert!("http_req_duration{status:200".parse::<MetricSelector>().is_err());
        assert!("{status:200}".parse::<MetricSelector>().is_err());
        assert!("".parse::<MetricSelector>().is_err());
        assert!("http_req_duration{:200}".parse::<MetricSelector>().is_err());
    }

    #[test]
    fn check_names_with_separators() {
        let name = "status 200, body ok: {14_1.txt}";
        let key = MetricSelector::new("checks").with_tag("check", name).to_string();
        assert_eq!(key, "checks{check:status 200, body ok: {14_1.txt}}");

        let parsed: MetricSelector = key.parse().unwrap();
        assert_eq!(parsed.tags.len(), 1);
        assert_eq!(parsed.tags["check"], name);
        assert_eq!(parsed.to_string(), key);

        // A segment that looks like `key:value` still starts a new tag.
        let two: MetricSelector = "checks{check:a,b, status:200}".parse().unwrap();
        assert_eq!(two.tags["check"], "a,b");
        assert_eq!(two.tags["status"], "200");
    }

    #[test]
    fn selector_matching() {
        let sel = MetricSelector::new("checks").with_tag("check", "status is 200");
        let mut tags = Tags::new();
        tags.insert("check".to_string(), "status is 200".to_string());
        assert!(sel.matches("checks", &tags));
        assert!(!sel.matches("http_reqs", &tags));
        tags.insert("check".to_string(), "other".to_string());
        assert!(!sel.matches("checks", &tags));
        assert!(MetricSelector::new("checks").matches("checks", &Tags::new()));
    }
}
