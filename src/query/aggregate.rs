//! Vertical and horizontal aggregation
//!
//! Vertical aggregation reduces across objects at equal timestamps within
//! one day; the result is keyed under the synthetic object id 0. Horizontal
//! aggregation reduces each object's series across time into interval-sized
//! buckets anchored at the query's `from`.
//!
//! Reductions are defined for every numeric value variant: `avg` always
//! yields a float64, `count` an int64, and `sum`/`min`/`max` preserve the
//! input variant. One counter has one logical type, so a mixed-variant
//! group cannot normally occur; if one does the group is skipped with a
//! warning rather than coerced.

use crate::query::Aggregation;
use crate::storage::{DataPoint, Value};
use std::collections::{BTreeMap, HashMap};

/// Object id the vertically aggregated series is keyed under.
pub const AGGREGATED_OBJECT_ID: u32 = 0;

/// Reduce one day's per-object data across objects, grouping points by
/// timestamp. Output is a single series under [`AGGREGATED_OBJECT_ID`],
/// sorted by timestamp.
pub fn aggregate_objects(
    day: &HashMap<u32, Vec<DataPoint>>,
    agg: Aggregation,
) -> HashMap<u32, Vec<DataPoint>> {
    let mut by_timestamp: BTreeMap<u32, Vec<&Value>> = BTreeMap::new();
    for points in day.values() {
        for point in points {
            by_timestamp.entry(point.timestamp).or_default().push(&point.value);
        }
    }

    let series = reduce_groups(by_timestamp, agg);

    let mut out = HashMap::with_capacity(1);
    if !series.is_empty() {
        out.insert(AGGREGATED_OBJECT_ID, series);
    }
    out
}

/// Reduce each object's series across time into buckets of `interval`
/// seconds anchored at `from`. `interval == 0` collapses the object's whole
/// series into a single bucket at timestamp 0. Output series are sorted by
/// bucket timestamp.
pub fn aggregate_timestamps(
    data: HashMap<u32, Vec<DataPoint>>,
    agg: Aggregation,
    from: u32,
    interval: u32,
) -> HashMap<u32, Vec<DataPoint>> {
    let mut out = HashMap::with_capacity(data.len());

    for (object_id, points) in data {
        let mut buckets: BTreeMap<u32, Vec<&Value>> = BTreeMap::new();
        for point in &points {
            let bucket = bucket_timestamp(point.timestamp, from, interval);
            buckets.entry(bucket).or_default().push(&point.value);
        }

        let series = reduce_groups(buckets, agg);
        if !series.is_empty() {
            out.insert(object_id, series);
        }
    }

    out
}

/// Bucket a timestamp relative to the range start.
fn bucket_timestamp(timestamp: u32, from: u32, interval: u32) -> u32 {
    if interval == 0 {
        return 0;
    }
    let elapsed = timestamp.saturating_sub(from);
    from + (elapsed - elapsed % interval)
}

fn reduce_groups(groups: BTreeMap<u32, Vec<&Value>>, agg: Aggregation) -> Vec<DataPoint> {
    let mut series = Vec::with_capacity(groups.len());
    for (timestamp, values) in groups {
        match reduce(&values, agg) {
            Some(value) => series.push(DataPoint::new(timestamp, value)),
            None => {
                tracing::warn!(timestamp, ?agg, "skipping non-reducible group");
            }
        }
    }
    series
}

/// Reduce one group of values. Returns `None` for empty groups, string
/// values, mixed variants, or `Aggregation::None`.
fn reduce(values: &[&Value], agg: Aggregation) -> Option<Value> {
    let (first, rest) = values.split_first()?;

    match agg {
        Aggregation::None => None,
        Aggregation::Count => Some(Value::I64(values.len() as i64)),
        Aggregation::Avg => {
            let mut sum = as_f64(first)?;
            for v in rest {
                sum += as_f64(v)?;
            }
            Some(Value::F64(sum / values.len() as f64))
        }
        Aggregation::Sum | Aggregation::Min | Aggregation::Max => match first {
            Value::I64(x) => fold(*x, rest, agg, |v| match v {
                Value::I64(x) => Some(*x),
                _ => None,
            })
            .map(Value::I64),
            Value::F64(x) => fold(*x, rest, agg, |v| match v {
                Value::F64(x) => Some(*x),
                _ => None,
            })
            .map(Value::F64),
            Value::I32(x) => fold(*x, rest, agg, |v| match v {
                Value::I32(x) => Some(*x),
                _ => None,
            })
            .map(Value::I32),
            Value::F32(x) => fold(*x, rest, agg, |v| match v {
                Value::F32(x) => Some(*x),
                _ => None,
            })
            .map(Value::F32),
            Value::Str(_) => None,
        },
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::I64(x) => Some(*x as f64),
        Value::F64(x) => Some(*x),
        Value::I32(x) => Some(f64::from(*x)),
        Value::F32(x) => Some(f64::from(*x)),
        Value::Str(_) => None,
    }
}

fn fold<T: Reducible>(
    first: T,
    rest: &[&Value],
    agg: Aggregation,
    extract: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let mut acc = first;
    for v in rest {
        let x = extract(v)?;
        acc = match agg {
            Aggregation::Sum => acc.add(x),
            Aggregation::Min => acc.min_of(x),
            Aggregation::Max => acc.max_of(x),
            _ => return None,
        };
    }
    Some(acc)
}

/// The numeric operations sum/min/max need, implemented per value width.
trait Reducible: Copy {
    fn add(self, other: Self) -> Self;
    fn min_of(self, other: Self) -> Self;
    fn max_of(self, other: Self) -> Self;
}

impl Reducible for i64 {
    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

impl Reducible for i32 {
    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

impl Reducible for f64 {
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

impl Reducible for f32 {
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(entries: Vec<(u32, Vec<(u32, i64)>)>) -> HashMap<u32, Vec<DataPoint>> {
        entries
            .into_iter()
            .map(|(object_id, points)| {
                (
                    object_id,
                    points
                        .into_iter()
                        .map(|(ts, v)| DataPoint::new(ts, Value::I64(v)))
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_vertical_aggregation_values() {
        // Object A has values 1 and 3 at t, object B has 5 at t
        let t = 1000;
        let data = day(vec![(7, vec![(t, 1), (t, 3)]), (8, vec![(t, 5)])]);

        let sum = aggregate_objects(&data, Aggregation::Sum);
        assert_eq!(
            sum[&AGGREGATED_OBJECT_ID],
            vec![DataPoint::new(t, Value::I64(9))]
        );

        let avg = aggregate_objects(&data, Aggregation::Avg);
        assert_eq!(
            avg[&AGGREGATED_OBJECT_ID],
            vec![DataPoint::new(t, Value::F64(3.0))]
        );

        let max = aggregate_objects(&data, Aggregation::Max);
        assert_eq!(
            max[&AGGREGATED_OBJECT_ID],
            vec![DataPoint::new(t, Value::I64(5))]
        );

        let count = aggregate_objects(&data, Aggregation::Count);
        assert_eq!(
            count[&AGGREGATED_OBJECT_ID],
            vec![DataPoint::new(t, Value::I64(3))]
        );
    }

    #[test]
    fn test_vertical_keeps_distinct_timestamps_apart() {
        let data = day(vec![(1, vec![(100, 1)]), (2, vec![(200, 2)])]);
        let sum = aggregate_objects(&data, Aggregation::Sum);

        assert_eq!(
            sum[&AGGREGATED_OBJECT_ID],
            vec![
                DataPoint::new(100, Value::I64(1)),
                DataPoint::new(200, Value::I64(2)),
            ]
        );
    }

    #[test]
    fn test_vertical_empty_input() {
        let data = HashMap::new();
        assert!(aggregate_objects(&data, Aggregation::Sum).is_empty());
    }

    #[test]
    fn test_horizontal_bucket_boundaries() {
        let from = 10_000;
        let data = day(vec![(1, vec![(from + 5, 1), (from + 12, 2), (from + 19, 4)])]);

        let sum = aggregate_timestamps(data, Aggregation::Sum, from, 10);
        assert_eq!(
            sum[&1],
            vec![
                DataPoint::new(from, Value::I64(1)),
                DataPoint::new(from + 10, Value::I64(6)),
            ]
        );
    }

    #[test]
    fn test_horizontal_zero_interval_single_bucket() {
        let from = 10_000;
        let data = day(vec![(1, vec![(from, 1), (from + 500, 2), (from + 999, 3)])]);

        let sum = aggregate_timestamps(data, Aggregation::Sum, from, 0);
        assert_eq!(sum[&1], vec![DataPoint::new(0, Value::I64(6))]);
    }

    #[test]
    fn test_horizontal_is_per_object() {
        let from = 0;
        let data = day(vec![(1, vec![(5, 1)]), (2, vec![(5, 10)])]);

        let sum = aggregate_timestamps(data, Aggregation::Sum, from, 10);
        assert_eq!(sum[&1], vec![DataPoint::new(0, Value::I64(1))]);
        assert_eq!(sum[&2], vec![DataPoint::new(0, Value::I64(10))]);
    }

    #[test]
    fn test_avg_of_floats() {
        let data: HashMap<u32, Vec<DataPoint>> = [(
            1u32,
            vec![
                DataPoint::new(10, Value::F64(1.5)),
                DataPoint::new(11, Value::F64(2.5)),
            ],
        )]
        .into_iter()
        .collect();

        let avg = aggregate_timestamps(data, Aggregation::Avg, 0, 0);
        assert_eq!(avg[&1], vec![DataPoint::new(0, Value::F64(2.0))]);
    }

    #[test]
    fn test_sum_preserves_narrow_variants() {
        let data: HashMap<u32, Vec<DataPoint>> = [(
            1u32,
            vec![
                DataPoint::new(10, Value::I32(3)),
                DataPoint::new(11, Value::I32(4)),
            ],
        )]
        .into_iter()
        .collect();

        let sum = aggregate_timestamps(data, Aggregation::Sum, 0, 0);
        assert_eq!(sum[&1], vec![DataPoint::new(0, Value::I32(7))]);
    }

    #[test]
    fn test_strings_are_not_reduced() {
        let data: HashMap<u32, Vec<DataPoint>> = [(
            1u32,
            vec![DataPoint::new(10, Value::Str("up".to_string()))],
        )]
        .into_iter()
        .collect();

        assert!(aggregate_objects(&data, Aggregation::Sum).is_empty());
        assert!(aggregate_timestamps(data, Aggregation::Sum, 0, 0).is_empty());
    }

    #[test]
    fn test_mixed_variants_skip_group() {
        let data: HashMap<u32, Vec<DataPoint>> = [
            (1u32, vec![DataPoint::new(10, Value::I64(1))]),
            (2u32, vec![DataPoint::new(10, Value::F64(2.0))]),
        ]
        .into_iter()
        .collect();

        assert!(aggregate_objects(&data, Aggregation::Sum).is_empty());
    }
}
