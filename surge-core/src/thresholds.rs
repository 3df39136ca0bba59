use surge_metrics::{MetricSeriesSummary, MetricValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl ThresholdOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStat {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    P(u32),
}

impl std::fmt::Display for ThresholdStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Count => write!(f, "count"),
            Self::Rate => write!(f, "rate"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub stat: ThresholdStat,
    pub op: ThresholdOp,
    pub value: f64,
}

impl std::fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.stat, self.op.as_str(), self.value)
    }
}

/// A pass/fail rule over one aggregated metric series.
///
/// `tags` selects a tagged series by exact tag-set match; empty selects the
/// untagged base series.
#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub metric: String,
    pub tags: Vec<(String, String)>,
    pub expr: ThresholdExpr,
}

impl ThresholdRule {
    /// Parse the compact forms used by load scripts:
    /// selector `"http_req_duration"` or `"http_req_duration{endpoint:products}"`,
    /// expression `"p(95)<500"`, `"rate<0.01"`, `"count>100"`.
    pub fn parse(selector: &str, expr: &str) -> Result<Self, String> {
        let (metric, mut tags) = parse_metric_selector(selector)?;
        tags.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let expr = parse_threshold_expr(expr)?;
        Ok(Self { metric, tags, expr })
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub tags: Vec<(String, String)>,
    pub expression: String,
    /// The statistic the rule was compared against; `None` when the series
    /// was absent or the statistic does not apply to its kind.
    pub observed: Option<f64>,
    pub passed: bool,
}

fn parse_metric_selector(raw: &str) -> Result<(String, Vec<(String, String)>), String> {
    let raw = raw.trim();
    let Some(open) = raw.find('{') else {
        if raw.is_empty() {
            return Err("empty metric selector".to_string());
        }
        return Ok((raw.to_string(), Vec::new()));
    };

    let name = raw[..open].trim();
    if name.is_empty() {
        return Err(format!("invalid metric selector: {raw}"));
    }

    let rest = raw[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| format!("invalid metric selector (missing `}}`): {raw}"))?;

    let mut tags = Vec::new();
    for pair in rest.split(',') {
        let (k, v) = pair
            .split_once(':')
            .ok_or_else(|| format!("invalid tag selector `{pair}` in: {raw}"))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() || v.is_empty() {
            return Err(format!("invalid tag selector `{pair}` in: {raw}"));
        }
        tags.push((k.to_string(), v.to_string()));
    }

    Ok((name.to_string(), tags))
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Find operator
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let stat = if left.eq_ignore_ascii_case("avg") {
        ThresholdStat::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdStat::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdStat::Max
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdStat::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdStat::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: u32 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if p > 100 {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdStat::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { stat, op, value })
}

/// Judge every rule against a metrics snapshot.
///
/// Pure and deterministic: an absent series or a statistic that does not
/// apply to the series kind fails that rule closed. The boolean result is
/// the conjunction of all rule outcomes.
pub fn evaluate_thresholds(
    rules: &[ThresholdRule],
    metrics: &[MetricSeriesSummary],
) -> (Vec<ThresholdOutcome>, bool) {
    let mut outcomes = Vec::with_capacity(rules.len());
    let mut all_passed = true;

    for rule in rules {
        let series = metrics
            .iter()
            .find(|m| m.name == rule.metric && tags_match(&m.tags, &rule.tags));

        let observed = series.and_then(|s| observed_value(&s.values, rule.expr.stat));
        let passed = observed.is_some_and(|v| compare(v, rule.expr.op, rule.expr.value));
        all_passed &= passed;

        outcomes.push(ThresholdOutcome {
            metric: rule.metric.clone(),
            tags: rule.tags.clone(),
            expression: rule.expr.to_string(),
            observed,
            passed,
        });
    }

    (outcomes, all_passed)
}

fn tags_match(series_tags: &[(String, String)], rule_tags: &[(String, String)]) -> bool {
    // Both sides are sorted (snapshot tags by the registry, rule tags at
    // parse time), so exact match is a plain comparison.
    series_tags == rule_tags
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(values: &MetricValue, stat: ThresholdStat) -> Option<f64> {
    match (values, stat) {
        (MetricValue::Trend(t), ThresholdStat::Avg) => t.avg,
        (MetricValue::Trend(t), ThresholdStat::Min) => t.min,
        (MetricValue::Trend(t), ThresholdStat::Max) => t.max,
        (MetricValue::Trend(t), ThresholdStat::Count) => Some(t.count as f64),
        (MetricValue::Trend(t), ThresholdStat::P(p)) => t.percentile(f64::from(p)),

        (MetricValue::Counter { value }, ThresholdStat::Count) => Some(*value),

        (MetricValue::Rate { rate, .. }, ThresholdStat::Rate) => *rate,
        (MetricValue::Rate { total, .. }, ThresholdStat::Count) => Some(*total as f64),

        // Non-sensical combinations fail closed.
        (_, _) => None,
    }
}
