//! Aggregations over fast numeric fields
//!
//! Requests use the Elasticsearch-style JSON shape, one named entry per
//! aggregation:
//!
//! ```json
//! {
//!   "by_year": { "histogram": { "field": "year", "interval": 10 } },
//!   "prices":  { "stats": { "field": "price" } }
//! }
//! ```
//!
//! Bucket aggregations (terms, histogram, range) count matching documents;
//! a document with several values in one bucket counts once. Metric
//! aggregations (avg, min, max, sum, count, stats) run over every value.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::executor;
use crate::error::{LoupeError, QueryError, Result};
use crate::index::Generation;
use crate::query::QueryPlan;
use crate::schema::{u64_to_f64, u64_to_i64, FieldId, FieldKind, Schema};
use crate::segment::{FastColumn, TERMINATED};

/// Most buckets one histogram may produce
pub const MAX_BUCKETS: usize = 65_535;

/// Named aggregation requests
pub type Aggregations = BTreeMap<String, Aggregation>;

/// Results keyed by request name
pub type AggregationResults = BTreeMap<String, AggregationResult>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Terms(TermsAggregation),
    Histogram(HistogramAggregation),
    Range(RangeAggregation),
    Avg(FieldAggregation),
    Min(FieldAggregation),
    Max(FieldAggregation),
    Sum(FieldAggregation),
    Count(FieldAggregation),
    Stats(FieldAggregation),
}

impl Aggregation {
    pub fn field(&self) -> &str {
        match self {
            Aggregation::Terms(agg) => &agg.field,
            Aggregation::Histogram(agg) => &agg.field,
            Aggregation::Range(agg) => &agg.field,
            Aggregation::Avg(agg)
            | Aggregation::Min(agg)
            | Aggregation::Max(agg)
            | Aggregation::Sum(agg)
            | Aggregation::Count(agg)
            | Aggregation::Stats(agg) => &agg.field,
        }
    }
}

/// One bucket per distinct value, most frequent first
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TermsAggregation {
    pub field: String,
    #[serde(default = "default_terms_size")]
    pub size: usize,
    #[serde(default = "default_min_doc_count")]
    pub min_doc_count: u64,
}

/// Fixed-width buckets keyed by their lower bound
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramAggregation {
    pub field: String,
    pub interval: f64,
    /// 0 also returns the empty buckets between the first and last one
    #[serde(default = "default_min_doc_count")]
    pub min_doc_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeAggregation {
    pub field: String,
    pub ranges: Vec<RangeSpec>,
}

/// `from` is inclusive, `to` exclusive; a missing bound is open
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeSpec {
    #[serde(default)]
    pub from: Option<f64>,
    #[serde(default)]
    pub to: Option<f64>,
    #[serde(default)]
    pub key: Option<String>,
}

impl RangeSpec {
    fn contains(&self, value: f64) -> bool {
        self.from.map_or(true, |from| value >= from) && self.to.map_or(true, |to| value < to)
    }

    /// `key`, or `from-to` with `*` for an open side
    fn label(&self) -> String {
        if let Some(key) = &self.key {
            return key.clone();
        }
        let side = |bound: Option<f64>| bound.map_or_else(|| "*".to_string(), |v| v.to_string());
        format!("{}-{}", side(self.from), side(self.to))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldAggregation {
    pub field: String,
}

fn default_terms_size() -> usize {
    10
}

fn default_min_doc_count() -> u64 {
    1
}

/// Parse a JSON object of named aggregation requests
pub fn parse_aggregations(json: &str) -> Result<Aggregations> {
    Ok(serde_json::from_str(json)?)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregationResult {
    Terms {
        buckets: Vec<Bucket>,
        /// Documents in buckets cut by `size`
        sum_other_doc_count: u64,
    },
    Buckets {
        buckets: Vec<Bucket>,
    },
    Stats(Stats),
    /// `None` when no value was seen (avg, min, max)
    Value {
        value: Option<f64>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bucket {
    pub key: JsonValue,
    pub doc_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<f64>,
}

impl Bucket {
    fn new(key: impl Into<JsonValue>, doc_count: u64) -> Self {
        Self {
            key: key.into(),
            doc_count,
            from: None,
            to: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub sum: f64,
}

/// Decode a column value to f64
fn to_f64(kind: FieldKind, value: u64) -> f64 {
    match kind {
        FieldKind::U64 => value as f64,
        FieldKind::I64 => u64_to_i64(value) as f64,
        _ => u64_to_f64(value),
    }
}

/// Decode a column value to a JSON number of the field's own type
fn to_json(kind: FieldKind, value: u64) -> JsonValue {
    match kind {
        FieldKind::U64 => JsonValue::from(value),
        FieldKind::I64 => JsonValue::from(u64_to_i64(value)),
        _ => JsonValue::from(u64_to_f64(value)),
    }
}

/// Running metrics. Integer fields sum exactly in i128; min and max stay in
/// the order-preserving column form.
#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    int_sum: i128,
    float_sum: f64,
    min: Option<u64>,
    max: Option<u64>,
}

impl Accumulator {
    fn add(&mut self, kind: FieldKind, value: u64) {
        self.count += 1;
        match kind {
            FieldKind::U64 => self.int_sum += value as i128,
            FieldKind::I64 => self.int_sum += u64_to_i64(value) as i128,
            _ => self.float_sum += u64_to_f64(value),
        }
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    fn sum(&self, kind: FieldKind) -> f64 {
        match kind {
            FieldKind::U64 | FieldKind::I64 => self.int_sum as f64,
            _ => self.float_sum,
        }
    }

    fn stats(&self, kind: FieldKind) -> Stats {
        let sum = self.sum(kind);
        Stats {
            count: self.count,
            min: self.min.map(|v| to_f64(kind, v)),
            max: self.max.map(|v| to_f64(kind, v)),
            avg: (self.count > 0).then(|| sum / self.count as f64),
            sum,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Metric {
    Avg,
    Min,
    Max,
    Sum,
    Count,
    Stats,
}

#[derive(Debug)]
enum State {
    Terms {
        size: usize,
        min_doc_count: u64,
        counts: HashMap<u64, u64>,
    },
    Histogram {
        interval: f64,
        min_doc_count: u64,
        counts: BTreeMap<i64, u64>,
    },
    Range {
        ranges: Vec<RangeSpec>,
        counts: Vec<u64>,
    },
    Metric {
        metric: Metric,
        acc: Accumulator,
    },
}

/// One aggregation being collected across segments
#[derive(Debug)]
struct Collector {
    name: String,
    field: FieldId,
    kind: FieldKind,
    state: State,
}

impl Collector {
    fn new(schema: &Schema, name: &str, request: &Aggregation) -> Result<Self> {
        let field_name = request.field();
        let field = schema
            .field(field_name)
            .ok_or_else(|| QueryError::UnknownField(field_name.to_string()))?;
        let entry = schema.entry(field);
        if !entry.kind.is_numeric() || !entry.is_fast() {
            return Err(QueryError::TypeMismatch {
                field: field_name.to_string(),
                reason: "aggregations need a fast numeric field".to_string(),
            }
            .into());
        }
        let invalid = |reason: &str| {
            LoupeError::InvalidArgument(format!("aggregation '{}': {}", name, reason))
        };

        let state = match request {
            Aggregation::Terms(agg) => State::Terms {
                size: agg.size,
                min_doc_count: agg.min_doc_count,
                counts: HashMap::new(),
            },
            Aggregation::Histogram(agg) => {
                if !agg.interval.is_finite() || agg.interval <= 0.0 {
                    return Err(invalid("interval must be a positive number"));
                }
                State::Histogram {
                    interval: agg.interval,
                    min_doc_count: agg.min_doc_count,
                    counts: BTreeMap::new(),
                }
            }
            Aggregation::Range(agg) => {
                if agg.ranges.is_empty() {
                    return Err(invalid("at least one range is required"));
                }
                for range in &agg.ranges {
                    let finite = [range.from, range.to]
                        .into_iter()
                        .flatten()
                        .all(f64::is_finite);
                    let ordered = match (range.from, range.to) {
                        (Some(from), Some(to)) => from <= to,
                        _ => true,
                    };
                    if !finite || !ordered {
                        return Err(invalid("range bounds must be finite with from <= to"));
                    }
                }
                State::Range {
                    counts: vec![0; agg.ranges.len()],
                    ranges: agg.ranges.clone(),
                }
            }
            Aggregation::Avg(_) => Self::metric(Metric::Avg),
            Aggregation::Min(_) => Self::metric(Metric::Min),
            Aggregation::Max(_) => Self::metric(Metric::Max),
            Aggregation::Sum(_) => Self::metric(Metric::Sum),
            Aggregation::Count(_) => Self::metric(Metric::Count),
            Aggregation::Stats(_) => Self::metric(Metric::Stats),
        };
        Ok(Self {
            name: name.to_string(),
            field,
            kind: entry.kind,
            state,
        })
    }

    fn metric(metric: Metric) -> State {
        State::Metric {
            metric,
            acc: Accumulator::default(),
        }
    }

    /// Add the values one matching document holds
    fn collect(&mut self, values: &[u64]) -> Result<()> {
        let kind = self.kind;
        match &mut self.state {
            State::Terms { counts, .. } => {
                for (i, value) in values.iter().enumerate() {
                    if !values[..i].contains(value) {
                        *counts.entry(*value).or_insert(0) += 1;
                    }
                }
            }
            State::Histogram {
                interval, counts, ..
            } => {
                let mut seen: Vec<i64> = Vec::with_capacity(values.len());
                for &value in values {
                    let bucket = (to_f64(kind, value) / *interval).floor() as i64;
                    if !seen.contains(&bucket) {
                        seen.push(bucket);
                        *counts.entry(bucket).or_insert(0) += 1;
                    }
                }
                if counts.len() > MAX_BUCKETS {
                    return Err(self.too_many_buckets());
                }
            }
            State::Range { ranges, counts } => {
                for (range, count) in ranges.iter().zip(counts.iter_mut()) {
                    if values.iter().any(|&v| range.contains(to_f64(kind, v))) {
                        *count += 1;
                    }
                }
            }
            State::Metric { acc, .. } => {
                for &value in values {
                    acc.add(kind, value);
                }
            }
        }
        Ok(())
    }

    fn too_many_buckets(&self) -> LoupeError {
        LoupeError::InvalidArgument(format!(
            "aggregation '{}' exceeds {} buckets",
            self.name, MAX_BUCKETS
        ))
    }

    fn finish(self) -> Result<AggregationResult> {
        let kind = self.kind;
        match self.state {
            State::Terms {
                size,
                min_doc_count,
                counts,
            } => {
                let mut entries: Vec<(u64, u64)> = counts
                    .into_iter()
                    .filter(|(_, count)| *count >= min_doc_count)
                    .collect();
                // column order is numeric order
                entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                let sum_other_doc_count = entries.iter().skip(size).map(|(_, count)| count).sum();
                entries.truncate(size);
                Ok(AggregationResult::Terms {
                    buckets: entries
                        .into_iter()
                        .map(|(value, count)| Bucket::new(to_json(kind, value), count))
                        .collect(),
                    sum_other_doc_count,
                })
            }
            State::Histogram {
                interval,
                min_doc_count,
                ref counts,
            } => {
                let mut buckets = Vec::new();
                if min_doc_count == 0 {
                    if let (Some((&first, _)), Some((&last, _))) =
                        (counts.first_key_value(), counts.last_key_value())
                    {
                        if last.abs_diff(first) >= MAX_BUCKETS as u64 {
                            return Err(self.too_many_buckets());
                        }
                        for bucket in first..=last {
                            let count = counts.get(&bucket).copied().unwrap_or(0);
                            buckets.push(Bucket::new(bucket as f64 * interval, count));
                        }
                    }
                } else {
                    for (&bucket, &count) in counts {
                        if count >= min_doc_count {
                            buckets.push(Bucket::new(bucket as f64 * interval, count));
                        }
                    }
                }
                Ok(AggregationResult::Buckets { buckets })
            }
            State::Range { ranges, counts } => Ok(AggregationResult::Buckets {
                buckets: ranges
                    .iter()
                    .zip(counts)
                    .map(|(range, count)| Bucket {
                        key: JsonValue::from(range.label()),
                        doc_count: count,
                        from: range.from,
                        to: range.to,
                    })
                    .collect(),
            }),
            State::Metric { metric, acc } => {
                let stats = acc.stats(kind);
                Ok(match metric {
                    Metric::Stats => AggregationResult::Stats(stats),
                    Metric::Avg => AggregationResult::Value { value: stats.avg },
                    Metric::Min => AggregationResult::Value { value: stats.min },
                    Metric::Max => AggregationResult::Value { value: stats.max },
                    Metric::Sum => AggregationResult::Value {
                        value: Some(stats.sum),
                    },
                    Metric::Count => AggregationResult::Value {
                        value: Some(stats.count as f64),
                    },
                })
            }
        }
    }
}

/// Run every request over the live documents `plan` matches
pub(crate) fn collect(
    plan: &QueryPlan,
    schema: &Schema,
    generation: &Generation,
    tf_saturation_k: f32,
    requests: &Aggregations,
) -> Result<AggregationResults> {
    let mut collectors = requests
        .iter()
        .map(|(name, request)| Collector::new(schema, name, request))
        .collect::<Result<Vec<_>>>()?;

    executor::for_each_segment(plan, schema, generation, tf_saturation_k, |_, _, segment, scorer| {
        let columns: Vec<Option<&FastColumn>> = collectors
            .iter()
            .map(|collector| segment.reader().fast_column(collector.field))
            .collect();
        let mut doc = scorer.doc();
        while doc != TERMINATED {
            for (collector, column) in collectors.iter_mut().zip(&columns) {
                if let Some(column) = column {
                    collector.collect(column.values(doc))?;
                }
            }
            doc = scorer.advance()?;
        }
        Ok(())
    })?;

    collectors
        .into_iter()
        .map(|collector| {
            let name = collector.name.clone();
            Ok((name, collector.finish()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::Document;
    use crate::index::Index;
    use crate::schema::{FieldOptions, FAST, INDEXED, STORED, TEXT};

    fn index() -> Index {
        let mut builder = Schema::builder();
        builder.add_text_field("title", TEXT | STORED).unwrap();
        builder.add_u64_field("year", FieldOptions::fast_stored()).unwrap();
        builder.add_i64_field("delta", FAST).unwrap();
        builder.add_f64_field("rating", FAST).unwrap();
        builder.add_u64_field("pages", INDEXED).unwrap();
        let index = Index::create_in_ram(builder.freeze()).unwrap();

        let mut writer = index.writer().unwrap();
        let docs = [
            ("rust in action", 2021u64, -3i64, 4.5f64),
            ("rust rust rust", 2018, 7, 3.0),
            ("the go book", 2015, 0, 4.0),
            ("cooking with rust", 2020, -3, 2.5),
        ];
        for (i, (title, year, delta, rating)) in docs.into_iter().enumerate() {
            writer
                .add_document(
                    Document::new()
                        .with("title", title)
                        .with("year", year)
                        .with("delta", delta)
                        .with("rating", rating)
                        .with("pages", 100u64),
                )
                .unwrap();
            if i == 1 {
                writer.commit().unwrap();
            }
        }
        writer.commit().unwrap();
        index
    }

    fn run(index: &Index, query: &str, request: JsonValue) -> JsonValue {
        let searcher = index.searcher();
        let plan = searcher.parse_query(query).unwrap();
        let requests = parse_aggregations(&request.to_string()).unwrap();
        serde_json::to_value(searcher.aggregate(&plan, &requests).unwrap()).unwrap()
    }

    #[test]
    fn test_terms_counts_documents() {
        let index = index();
        let result = run(&index, "*", json!({"deltas": {"terms": {"field": "delta", "size": 2}}}));
        assert_eq!(
            result["deltas"],
            json!({
                "buckets": [{"key": -3, "doc_count": 2}, {"key": 0, "doc_count": 1}],
                "sum_other_doc_count": 1
            })
        );

        let result = run(
            &index,
            "title:rust",
            json!({"years": {"terms": {"field": "year", "min_doc_count": 1}}}),
        );
        let keys: Vec<u64> = result["years"]["buckets"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["key"].as_u64().unwrap())
            .collect();
        assert_eq!(keys, vec![2018, 2020, 2021]);
    }

    #[test]
    fn test_histogram_buckets() {
        let index = index();
        let result = run(&index, "*", json!({"h": {"histogram": {"field": "year", "interval": 5}}}));
        assert_eq!(
            result["h"]["buckets"],
            json!([
                {"key": 2015.0, "doc_count": 2},
                {"key": 2020.0, "doc_count": 2}
            ])
        );

        let result = run(
            &index,
            "*",
            json!({"h": {"histogram": {"field": "delta", "interval": 5, "min_doc_count": 0}}}),
        );
        assert_eq!(
            result["h"]["buckets"],
            json!([
                {"key": -5.0, "doc_count": 2},
                {"key": 0.0, "doc_count": 1},
                {"key": 5.0, "doc_count": 1}
            ])
        );
    }

    #[test]
    fn test_range_buckets() {
        let index = index();
        let result = run(
            &index,
            "*",
            json!({"r": {"range": {"field": "rating", "ranges": [
                {"to": 3.0},
                {"from": 3.0, "to": 4.5},
                {"from": 4.5, "key": "top"}
            ]}}}),
        );
        assert_eq!(
            result["r"]["buckets"],
            json!([
                {"key": "*-3", "doc_count": 1, "to": 3.0},
                {"key": "3-4.5", "doc_count": 2, "from": 3.0, "to": 4.5},
                {"key": "top", "doc_count": 1, "from": 4.5}
            ])
        );
    }

    #[test]
    fn test_metrics() {
        let index = index();
        let result = run(
            &index,
            "title:rust",
            json!({
                "s": {"stats": {"field": "delta"}},
                "avg": {"avg": {"field": "rating"}},
                "n": {"count": {"field": "year"}},
                "top": {"max": {"field": "year"}}
            }),
        );
        assert_eq!(
            result["s"],
            json!({"count": 3, "min": -3.0, "max": 7.0, "avg": 1.0 / 3.0, "sum": 1.0})
        );
        assert_eq!(result["avg"]["value"], json!(10.0 / 3.0));
        assert_eq!(result["n"]["value"], json!(3.0));
        assert_eq!(result["top"]["value"], json!(2021.0));

        let empty = run(&index, "title:nothing", json!({"m": {"min": {"field": "year"}}}));
        assert_eq!(empty["m"], json!({"value": null}));
    }

    #[test]
    fn test_deleted_documents_are_skipped() {
        let index = index();
        let mut writer = index.writer().unwrap();
        let title = index.schema().field("title").unwrap();
        writer
            .delete_documents(crate::schema::Term::from_field_text(title, "go"))
            .unwrap();
        writer.commit().unwrap();
        let result = run(&index, "*", json!({"n": {"count": {"field": "year"}}}));
        assert_eq!(result["n"]["value"], json!(3.0));
    }

    #[test]
    fn test_invalid_requests() {
        let index = index();
        let searcher = index.searcher();
        let all = QueryPlan::all();
        let aggregate = |json: JsonValue| {
            let requests = parse_aggregations(&json.to_string())?;
            searcher.aggregate(&all, &requests)
        };
        assert!(matches!(
            aggregate(json!({"a": {"avg": {"field": "nope"}}})),
            Err(LoupeError::Query(QueryError::UnknownField(_)))
        ));
        // indexed but not fast, and not numeric
        for field in ["pages", "title"] {
            assert!(matches!(
                aggregate(json!({"a": {"sum": {"field": field}}})),
                Err(LoupeError::Query(QueryError::TypeMismatch { .. }))
            ));
        }
        assert!(matches!(
            aggregate(json!({"h": {"histogram": {"field": "year", "interval": 0}}})),
            Err(LoupeError::InvalidArgument(_))
        ));
        assert!(matches!(
            aggregate(json!({"h": {"histogram": {"field": "year", "interval": 0.00001, "min_doc_count": 0}}})),
            Err(LoupeError::InvalidArgument(_))
        ));
        assert!(matches!(
            aggregate(json!({"r": {"range": {"field": "year", "ranges": [{"from": 5, "to": 1}]}}})),
            Err(LoupeError::InvalidArgument(_))
        ));
        assert!(matches!(
            aggregate(json!({"x": {"median": {"field": "year"}}})),
            Err(LoupeError::Json(_))
        ));
    }
}
