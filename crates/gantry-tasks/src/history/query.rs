//! Filter and sort criteria over recorded runs
//!
//! Criteria are validated when they are built, so a store only ever sees
//! combinations it can evaluate.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RunRecord, RunResult};

/// Queryable property of a [`RunRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    AppName,
    TaskName,
    Duration,
    StartTime,
    Id,
    /// Any of the literal input strings
    InputString,
    /// Any of the recorded input file paths
    InputFilePath,
    Fingerprint,
    Result,
}

impl Field {
    /// All fields, in declaration order
    pub const ALL: [Field; 9] = [
        Field::AppName,
        Field::TaskName,
        Field::Duration,
        Field::StartTime,
        Field::Id,
        Field::InputString,
        Field::InputFilePath,
        Field::Fingerprint,
        Field::Result,
    ];

    /// Name used on the command line and in errors
    pub fn name(self) -> &'static str {
        match self {
            Self::AppName => "app_name",
            Self::TaskName => "task_name",
            Self::Duration => "duration",
            Self::StartTime => "start_time",
            Self::Id => "id",
            Self::InputString => "input_string",
            Self::InputFilePath => "input_file_path",
            Self::Fingerprint => "fingerprint",
            Self::Result => "result",
        }
    }

    /// Whether `GT`/`LT` apply to this field
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Duration | Self::StartTime | Self::Id)
    }

    /// Whether a record holds several values for this field
    pub fn is_multi_valued(self) -> bool {
        matches!(self, Self::InputString | Self::InputFilePath)
    }

    fn values(self, record: &RunRecord) -> Vec<FilterValue> {
        match self {
            Self::AppName => vec![FilterValue::Text(record.app_name.clone())],
            Self::TaskName => vec![FilterValue::Text(record.task_name.clone())],
            Self::Duration => vec![FilterValue::Duration(record.duration())],
            Self::StartTime => vec![FilterValue::Time(record.started_at)],
            Self::Id => vec![FilterValue::Integer(record.id)],
            Self::InputString => record
                .input_strings
                .iter()
                .cloned()
                .map(FilterValue::Text)
                .collect(),
            Self::InputFilePath => record
                .input_files
                .iter()
                .map(|f| FilterValue::Text(f.path.clone()))
                .collect(),
            Self::Fingerprint => vec![FilterValue::Text(record.fingerprint.to_string())],
            Self::Result => vec![FilterValue::Text(record.result.to_string())],
        }
    }

    /// Normalize a scalar for this field, or `None` when the kind is wrong
    fn accept(self, value: FilterValue) -> Option<FilterValue> {
        match (self, value) {
            (Self::Duration, FilterValue::Integer(secs)) => {
                Some(FilterValue::Duration(Duration::from_secs(secs)))
            }
            (Self::Duration, v @ FilterValue::Duration(_)) => Some(v),
            (Self::StartTime, v @ FilterValue::Time(_)) => Some(v),
            (Self::Id, v @ FilterValue::Integer(_)) => Some(v),
            (Self::Result, FilterValue::Text(text)) => {
                text.parse::<RunResult>().ok().map(|r| FilterValue::Text(r.to_string()))
            }
            (
                Self::AppName
                | Self::TaskName
                | Self::InputString
                | Self::InputFilePath
                | Self::Fingerprint,
                v @ FilterValue::Text(_),
            ) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| QueryError::UnknownField(s.to_string()))
    }
}

/// Comparison applied by a [`Filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Gt,
    Lt,
    In,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "EQ",
            Self::Gt => "GT",
            Self::Lt => "LT",
            Self::In => "IN",
        };
        f.write_str(s)
    }
}

/// Operand of a [`Filter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    Text(String),
    Integer(u64),
    Time(DateTime<Utc>),
    Duration(Duration),
    Set(Vec<FilterValue>),
}

impl FilterValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Time(_) => "time",
            Self::Duration(_) => "duration",
            Self::Set(_) => "set",
        }
    }

    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Duration(a), Self::Duration(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for FilterValue {
    fn from(value: u64) -> Self {
        Self::Integer(value)
    }
}

impl From<Duration> for FilterValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::Set(values.into_iter().map(Into::into).collect())
    }
}

/// Invalid filter or sorter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// `GT`/`LT` on a field without an order
    #[error("Operator {operator} needs an ordered field; {field} is not ordered")]
    OrderedOperatorOnUnorderedField { field: Field, operator: Operator },

    /// `IN` with a scalar operand
    #[error("Operator IN on {field} needs a set of values, got {kind}")]
    InNeedsSet { field: Field, kind: &'static str },

    /// Operand kind does not fit the field
    #[error("Field {field} cannot be compared with a {kind} value")]
    ValueTypeMismatch { field: Field, kind: &'static str },

    /// Sorting on a field that holds several values per record
    #[error("Cannot sort by {0}: it holds several values per run")]
    UnsortableField(Field),

    /// Field name not recognized
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Sort order not recognized
    #[error("Unknown sort order '{0}', expected asc or desc")]
    UnknownOrder(String),
}

/// A validated `{field, operator, value}` criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    field: Field,
    operator: Operator,
    value: FilterValue,
}

impl Filter {
    /// Build a filter, rejecting combinations that cannot be evaluated
    pub fn new(
        field: Field,
        operator: Operator,
        value: impl Into<FilterValue>,
    ) -> Result<Self, QueryError> {
        let value = value.into();

        if matches!(operator, Operator::Gt | Operator::Lt) && !field.is_ordered() {
            return Err(QueryError::OrderedOperatorOnUnorderedField { field, operator });
        }

        let value = match (operator, value) {
            (Operator::In, FilterValue::Set(items)) => FilterValue::Set(
                items
                    .into_iter()
                    .map(|item| {
                        let kind = item.kind();
                        field
                            .accept(item)
                            .ok_or(QueryError::ValueTypeMismatch { field, kind })
                    })
                    .collect::<Result<_, _>>()?,
            ),
            (Operator::In, other) => {
                return Err(QueryError::InNeedsSet {
                    field,
                    kind: other.kind(),
                })
            }
            (_, other) => {
                let kind = other.kind();
                field
                    .accept(other)
                    .ok_or(QueryError::ValueTypeMismatch { field, kind })?
            }
        };

        Ok(Self {
            field,
            operator,
            value,
        })
    }

    /// `field EQ value`
    pub fn eq(field: Field, value: impl Into<FilterValue>) -> Result<Self, QueryError> {
        Self::new(field, Operator::Eq, value)
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &FilterValue {
        &self.value
    }

    /// Whether a record satisfies this filter.
    ///
    /// Multi-valued fields match when any of their values does.
    pub fn matches(&self, record: &RunRecord) -> bool {
        self.field
            .values(record)
            .iter()
            .any(|candidate| self.test(candidate))
    }

    fn test(&self, candidate: &FilterValue) -> bool {
        match (&self.operator, &self.value) {
            (Operator::In, FilterValue::Set(items)) => items
                .iter()
                .any(|item| candidate.compare(item) == Some(Ordering::Equal)),
            (Operator::Eq, value) => candidate.compare(value) == Some(Ordering::Equal),
            (Operator::Gt, value) => candidate.compare(value) == Some(Ordering::Greater),
            (Operator::Lt, value) => candidate.compare(value) == Some(Ordering::Less),
            (Operator::In, _) => false,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.field, self.operator, self.value)
    }
}

/// Whether all filters accept a record
pub fn matches_all(filters: &[Filter], record: &RunRecord) -> bool {
    filters.iter().all(|filter| filter.matches(record))
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl FromStr for Order {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(QueryError::UnknownOrder(s.to_string())),
        }
    }
}

/// A validated `{field, order}` sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    field: Field,
    order: Order,
}

impl Sorter {
    /// Build a sorter; multi-valued fields have no single sort key
    pub fn new(field: Field, order: Order) -> Result<Self, QueryError> {
        if field.is_multi_valued() {
            return Err(QueryError::UnsortableField(field));
        }
        Ok(Self { field, order })
    }

    /// Parse `field` or `field:asc|desc`
    pub fn parse(s: &str) -> Result<Self, QueryError> {
        match s.split_once(':') {
            Some((field, order)) => Self::new(field.parse()?, order.parse()?),
            None => Self::new(s.parse()?, Order::Asc),
        }
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Compare two records by this key
    pub fn compare(&self, a: &RunRecord, b: &RunRecord) -> Ordering {
        let left = self.field.values(a);
        let right = self.field.values(b);
        let ordering = match (left.first(), right.first()) {
            (Some(l), Some(r)) => l.compare(r).unwrap_or(Ordering::Equal),
            (l, r) => l.is_some().cmp(&r.is_some()),
        };
        match self.order {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        }
    }
}

/// Sort records by each sorter in turn; ties keep their store order
pub fn sort_records(records: &mut [RunRecord], sorters: &[Sorter]) {
    records.sort_by(|a, b| {
        sorters
            .iter()
            .map(|sorter| sorter.compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::InputFile;
    use gantry_core::Digest;

    fn record(id: u64, app: &str, secs: u64) -> RunRecord {
        let mut record = RunRecord::new(
            app,
            "build",
            Digest::of_bytes(app.as_bytes()),
            Utc::now(),
            Duration::from_secs(secs),
            RunResult::Success,
        );
        record.id = id;
        record
    }

    #[test]
    fn test_duration_gt_integer_accepted() {
        let filter = Filter::new(Field::Duration, Operator::Gt, 5u64).unwrap();
        assert_eq!(filter.value(), &FilterValue::Duration(Duration::from_secs(5)));

        assert!(filter.matches(&record(1, "api", 6)));
        assert!(!filter.matches(&record(2, "api", 5)));
    }

    #[test]
    fn test_gt_on_unordered_field_rejected() {
        let err = Filter::new(Field::AppName, Operator::Gt, "x").unwrap_err();
        assert_eq!(
            err,
            QueryError::OrderedOperatorOnUnorderedField {
                field: Field::AppName,
                operator: Operator::Gt,
            }
        );
        assert!(Filter::new(Field::InputFilePath, Operator::Lt, "a").is_err());
    }

    #[test]
    fn test_in_requires_set() {
        let err = Filter::new(Field::Id, Operator::In, "not-a-set").unwrap_err();
        assert!(matches!(err, QueryError::InNeedsSet { field: Field::Id, .. }));

        let filter = Filter::new(Field::Id, Operator::In, vec![1u64, 3]).unwrap();
        assert!(filter.matches(&record(3, "api", 1)));
        assert!(!filter.matches(&record(2, "api", 1)));
    }

    #[test]
    fn test_value_kind_must_fit_field() {
        assert!(matches!(
            Filter::eq(Field::AppName, 5u64),
            Err(QueryError::ValueTypeMismatch { .. })
        ));
        assert!(matches!(
            Filter::eq(Field::Id, "seven"),
            Err(QueryError::ValueTypeMismatch { .. })
        ));
        assert!(matches!(
            Filter::new(Field::Id, Operator::In, vec!["a"]),
            Err(QueryError::ValueTypeMismatch { .. })
        ));
        assert!(matches!(
            Filter::eq(Field::Id, vec![1u64]),
            Err(QueryError::ValueTypeMismatch { .. })
        ));
        assert!(Filter::eq(Field::Result, "bogus").is_err());
        assert!(Filter::eq(Field::Result, "success").is_ok());
    }

    #[test]
    fn test_multi_valued_field_matches_any() {
        let mut rec = record(1, "api", 1);
        rec.input_strings = vec!["debug".to_string(), "linux".to_string()];
        rec.input_files = vec![InputFile {
            path: "src/main.go".to_string(),
            digest: Digest::of_bytes(b"main"),
        }];

        assert!(Filter::eq(Field::InputString, "linux").unwrap().matches(&rec));
        assert!(!Filter::eq(Field::InputString, "darwin").unwrap().matches(&rec));
        assert!(Filter::eq(Field::InputFilePath, "src/main.go").unwrap().matches(&rec));
    }

    #[test]
    fn test_fingerprint_and_result_filters() {
        let rec = record(1, "api", 1);
        let fingerprint = rec.fingerprint.to_string();

        assert!(matches_all(
            &[
                Filter::eq(Field::Fingerprint, fingerprint).unwrap(),
                Filter::eq(Field::Result, "success").unwrap(),
            ],
            &rec
        ));
        assert!(!Filter::eq(Field::Result, "failure").unwrap().matches(&rec));
    }

    #[test]
    fn test_start_time_range() {
        let rec = record(1, "api", 1);
        let before = rec.started_at - chrono::Duration::seconds(10);
        assert!(Filter::new(Field::StartTime, Operator::Gt, before).unwrap().matches(&rec));
        assert!(!Filter::new(Field::StartTime, Operator::Lt, before).unwrap().matches(&rec));
    }

    #[test]
    fn test_sorter_rejects_multi_valued() {
        assert_eq!(
            Sorter::new(Field::InputString, Order::Asc).unwrap_err(),
            QueryError::UnsortableField(Field::InputString)
        );
    }

    #[test]
    fn test_sorter_parse() {
        let sorter = Sorter::parse("duration:desc").unwrap();
        assert_eq!(sorter.field(), Field::Duration);
        assert_eq!(sorter.order(), Order::Desc);

        assert_eq!(Sorter::parse("start-time").unwrap().field(), Field::StartTime);
        assert!(Sorter::parse("nope").is_err());
        assert!(Sorter::parse("id:sideways").is_err());
    }

    #[test]
    fn test_sort_records_with_tiebreak() {
        let mut records = vec![record(1, "web", 3), record(2, "api", 3), record(3, "api", 9)];
        sort_records(
            &mut records,
            &[
                Sorter::new(Field::Duration, Order::Desc).unwrap(),
                Sorter::new(Field::AppName, Order::Asc).unwrap(),
            ],
        );
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
