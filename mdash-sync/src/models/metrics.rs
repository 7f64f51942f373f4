//! Per-field aggregation rules and mergeable metric sets
//!
//! Same-day rows, chunk totals and individual→aggregate conversion all merge
//! through [`MetricSet::merge`], so each path applies one rule table. Merging
//! is associative: folding days then chunks gives the same values as folding
//! all days in one pass. Ratio fields are recomputed from the merged
//! numerator and denominator after every merge, never averaged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How two observations of one field combine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AggregationRule {
    Sum,
    /// Mean weighted by sample count
    Average,
    /// Chronologically later value wins
    Last,
    Max,
    Min,
    /// `numerator * scale / denominator`
    Ratio {
        numerator: String,
        denominator: String,
        #[serde(default = "default_scale")]
        scale: f64,
    },
}

fn default_scale() -> f64 {
    1.0
}

/// (field, numerator, denominator, scale)
const BUILTIN_RATIOS: &[(&str, &str, &str, f64)] = &[
    ("ctr", "clicks", "impressions", 100.0),
    ("cpc", "spend", "clicks", 1.0),
    ("cpm", "spend", "impressions", 1000.0),
    ("cpl", "spend", "leads", 1.0),
    ("cost_per_lead", "spend", "leads", 1.0),
    ("roas", "revenue", "spend", 1.0),
    ("frequency", "impressions", "reach", 1.0),
    ("conversion_rate", "conversions", "clicks", 100.0),
    ("show_rate", "appointments_showed", "appointments_booked", 100.0),
    ("win_rate", "deals_won", "deals_total", 100.0),
];

const MAX_FIELDS: &[&str] = &["reach", "unique_reach"];

const LAST_FIELDS: &[&str] = &[
    "budget",
    "daily_budget",
    "lifetime_budget",
    "balance",
    "followers",
];

/// Rule used for a field with no mapping override
pub fn builtin_rule(field: &str) -> AggregationRule {
    if let Some((_, numerator, denominator, scale)) =
        BUILTIN_RATIOS.iter().find(|(name, ..)| *name == field)
    {
        return AggregationRule::Ratio {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            scale: *scale,
        };
    }
    if MAX_FIELDS.contains(&field) {
        return AggregationRule::Max;
    }
    if LAST_FIELDS.contains(&field) {
        return AggregationRule::Last;
    }
    if field.starts_with("avg_")
        || field.starts_with("average_")
        || field.ends_with("_rate")
        || field.ends_with("_pct")
    {
        return AggregationRule::Average;
    }
    // Counters, spend, revenue and unknown numeric fields
    AggregationRule::Sum
}

/// Built-in rules plus per-project overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTable {
    overrides: BTreeMap<String, AggregationRule>,
}

impl RuleTable {
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, field: impl Into<String>, rule: AggregationRule) -> Self {
        self.overrides.insert(field.into(), rule);
        self
    }

    /// Collect rule overrides declared on field maps
    pub fn from_field_maps(maps: &[crate::models::FieldMap]) -> Self {
        let overrides = maps
            .iter()
            .filter_map(|m| m.aggregation.clone().map(|rule| (m.target.clone(), rule)))
            .collect();
        Self { overrides }
    }

    pub fn rule_for(&self, field: &str) -> AggregationRule {
        self.overrides
            .get(field)
            .cloned()
            .unwrap_or_else(|| builtin_rule(field))
    }

    fn ratio_fields(&self) -> Vec<(String, String, String, f64)> {
        let mut ratios: BTreeMap<String, (String, String, f64)> = BUILTIN_RATIOS
            .iter()
            .map(|(f, n, d, s)| (f.to_string(), (n.to_string(), d.to_string(), *s)))
            .collect();
        for (field, rule) in &self.overrides {
            match rule {
                AggregationRule::Ratio {
                    numerator,
                    denominator,
                    scale,
                } => {
                    ratios.insert(field.clone(), (numerator.clone(), denominator.clone(), *scale));
                }
                _ => {
                    ratios.remove(field);
                }
            }
        }
        ratios
            .into_iter()
            .map(|(f, (n, d, s))| (f, n, d, s))
            .collect()
    }
}

/// Metric values with the number of observations behind each
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct MetricSet {
    values: BTreeMap<String, f64>,
    samples: BTreeMap<String, u64>,
}

impl From<BTreeMap<String, f64>> for MetricSet {
    fn from(values: BTreeMap<String, f64>) -> Self {
        let samples = values.keys().map(|k| (k.clone(), 1)).collect();
        Self { values, samples }
    }
}

impl From<MetricSet> for BTreeMap<String, f64> {
    fn from(set: MetricSet) -> Self {
        set.values
    }
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }

    pub fn samples(&self, field: &str) -> u64 {
        self.samples.get(field).copied().unwrap_or(0)
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn into_values(self) -> BTreeMap<String, f64> {
        self.values
    }

    /// Record one raw observation of `field`
    pub fn observe(&mut self, field: &str, value: f64, rules: &RuleTable) {
        let mut single = MetricSet::new();
        single.values.insert(field.to_string(), value);
        single.samples.insert(field.to_string(), 1);
        self.merge(&single, rules);
    }

    /// Merge `later` into `self`; `later` must not precede `self` in time
    pub fn merge(&mut self, later: &MetricSet, rules: &RuleTable) {
        for (field, &b) in &later.values {
            let nb = later.samples.get(field).copied().unwrap_or(1).max(1);
            let merged = match self.values.get(field).copied() {
                None => (b, nb),
                Some(a) => {
                    let na = self.samples.get(field).copied().unwrap_or(1).max(1);
                    let value = match rules.rule_for(field) {
                        AggregationRule::Sum => a + b,
                        AggregationRule::Average | AggregationRule::Ratio { .. } => {
                            (a * na as f64 + b * nb as f64) / (na + nb) as f64
                        }
                        AggregationRule::Last => b,
                        AggregationRule::Max => a.max(b),
                        AggregationRule::Min => a.min(b),
                    };
                    (value, na + nb)
                }
            };
            self.values.insert(field.clone(), merged.0);
            self.samples.insert(field.clone(), merged.1);
        }
        self.recompute_ratios(rules);
    }

    /// Fold sets in chronological order
    pub fn merge_all<'a, I>(sets: I, rules: &RuleTable) -> MetricSet
    where
        I: IntoIterator<Item = &'a MetricSet>,
    {
        let mut total = MetricSet::new();
        for set in sets {
            total.merge(set, rules);
        }
        total
    }

    /// Derive ratio fields from numerator/denominator where both are known
    ///
    /// A zero denominator removes the ratio; a missing input keeps whatever
    /// value the source supplied.
    pub fn recompute_ratios(&mut self, rules: &RuleTable) {
        for (field, numerator, denominator, scale) in rules.ratio_fields() {
            let (Some(num), Some(den)) = (self.get(&numerator), self.get(&denominator)) else {
                continue;
            };
            if den == 0.0 {
                self.values.remove(&field);
                self.samples.remove(&field);
                continue;
            }
            let samples = self.samples(&denominator).max(1);
            self.values.insert(field.clone(), num * scale / den);
            self.samples.insert(field, samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, f64)]) -> MetricSet {
        let rules = RuleTable::builtin();
        let mut s = MetricSet::new();
        for (field, value) in pairs {
            s.observe(field, *value, &rules);
        }
        s
    }

    #[test]
    fn test_builtin_rules() {
        assert_eq!(builtin_rule("spend"), AggregationRule::Sum);
        assert_eq!(builtin_rule("appointments_showed"), AggregationRule::Sum);
        assert_eq!(builtin_rule("reach"), AggregationRule::Max);
        assert_eq!(builtin_rule("daily_budget"), AggregationRule::Last);
        assert_eq!(builtin_rule("bounce_rate"), AggregationRule::Average);
        assert!(matches!(builtin_rule("ctr"), AggregationRule::Ratio { .. }));
    }

    #[test]
    fn test_sum_same_day() {
        let s = set(&[("spend", 50.0), ("spend", 30.0)]);
        assert_eq!(s.get("spend"), Some(80.0));
        assert_eq!(s.samples("spend"), 2);
    }

    #[test]
    fn test_ctr_recomputed_not_averaged() {
        let rules = RuleTable::builtin();
        // 10% on 100 impressions, 50% on 900 impressions
        let a = set(&[("impressions", 100.0), ("clicks", 10.0)]);
        let b = set(&[("impressions", 900.0), ("clicks", 450.0)]);
        assert_eq!(a.get("ctr"), Some(10.0));

        let mut merged = a.clone();
        merged.merge(&b, &rules);
        assert_eq!(merged.get("ctr"), Some(46.0));
    }

    #[test]
    fn test_ratio_dropped_on_zero_denominator() {
        let s = set(&[("spend", 10.0), ("clicks", 0.0)]);
        assert_eq!(s.get("cpc"), None);
    }

    #[test]
    fn test_weighted_average() {
        let rules = RuleTable::builtin();
        let a = set(&[("bounce_rate", 10.0), ("bounce_rate", 20.0)]);
        let b = set(&[("bounce_rate", 40.0)]);
        let mut merged = a.clone();
        merged.merge(&b, &rules);
        assert!((merged.get("bounce_rate").unwrap() - 70.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_last_and_max() {
        let rules = RuleTable::builtin();
        let mut a = set(&[("daily_budget", 100.0), ("reach", 500.0)]);
        let b = set(&[("daily_budget", 80.0), ("reach", 300.0)]);
        a.merge(&b, &rules);
        assert_eq!(a.get("daily_budget"), Some(80.0));
        assert_eq!(a.get("reach"), Some(500.0));
    }

    #[test]
    fn test_override_takes_precedence() {
        let rules = RuleTable::builtin().with_override("spend", AggregationRule::Max);
        let mut s = MetricSet::new();
        s.observe("spend", 5.0, &rules);
        s.observe("spend", 7.0, &rules);
        assert_eq!(s.get("spend"), Some(7.0));
    }

    #[test]
    fn test_merge_is_associative() {
        let rules = RuleTable::builtin();
        let days: Vec<MetricSet> = (1..=6)
            .map(|i| {
                set(&[
                    ("spend", i as f64 * 10.0),
                    ("clicks", i as f64),
                    ("impressions", i as f64 * 100.0),
                    ("bounce_rate", i as f64),
                ])
            })
            .collect();

        let single = MetricSet::merge_all(days.iter(), &rules);
        let left = MetricSet::merge_all(days[..4].iter(), &rules);
        let right = MetricSet::merge_all(days[4..].iter(), &rules);
        let chunked = MetricSet::merge_all([&left, &right], &rules);

        assert_eq!(single.get("spend"), chunked.get("spend"));
        assert_eq!(single.get("clicks"), chunked.get("clicks"));
        assert!((single.get("ctr").unwrap() - chunked.get("ctr").unwrap()).abs() < 1e-9);
        assert!(
            (single.get("bounce_rate").unwrap() - chunked.get("bounce_rate").unwrap()).abs() < 1e-9
        );
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let s = set(&[("spend", 12.5)]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json, serde_json::json!({"spend": 12.5}));
    }
}
