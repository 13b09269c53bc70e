use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
	Eq,
	Gt,
	Gte,
	Lt,
	Lte,
}

/// A predicate on one field of a JSON record.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
	pub field: String,
	pub op: FilterOp,
	pub value: Value,
}

impl Filter {
	pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
		Self {
			field: field.into(),
			op,
			value: value.into(),
		}
	}

	pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, FilterOp::Eq, value)
	}

	pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, FilterOp::Gt, value)
	}

	pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, FilterOp::Gte, value)
	}

	pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, FilterOp::Lt, value)
	}

	pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::new(field, FilterOp::Lte, value)
	}

	/// Records without the field, or with a value of a different kind, never
	/// match.
	pub fn matches(&self, record: &Value) -> bool {
		let Some(field) = record.get(&self.field) else {
			return false;
		};
		let Some(ordering) = compare_values(field, &self.value) else {
			return false;
		};
		match self.op {
			FilterOp::Eq => ordering == Ordering::Equal,
			FilterOp::Gt => ordering == Ordering::Greater,
			FilterOp::Gte => ordering != Ordering::Less,
			FilterOp::Lt => ordering == Ordering::Less,
			FilterOp::Lte => ordering != Ordering::Greater,
		}
	}
}

/// Sort order on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
	pub field: String,
	pub descending: bool,
}

impl Sort {
	pub fn ascending(field: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			descending: false,
		}
	}

	pub fn descending(field: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			descending: true,
		}
	}
}

/// Filters, ordering and paging for a record selection. An `offset` or
/// `limit` of 0 is not applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
	pub filters: Vec<Filter>,
	pub sort: Option<Sort>,
	pub offset: usize,
	pub limit: usize,
}

impl Query {
	pub fn matches(&self, record: &Value) -> bool {
		self.filters.iter().all(|filter| filter.matches(record))
	}

	pub fn apply<'a>(&self, records: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
		let mut selected: Vec<&Value> = records.into_iter().filter(|r| self.matches(r)).collect();

		if let Some(sort) = &self.sort {
			selected.sort_by(|a, b| match (a.get(&sort.field), b.get(&sort.field)) {
				(Some(a), Some(b)) => {
					let ordering = compare_values(a, b).unwrap_or(Ordering::Equal);
					if sort.descending { ordering.reverse() } else { ordering }
				}
				(Some(_), None) => Ordering::Less,
				(None, Some(_)) => Ordering::Greater,
				(None, None) => Ordering::Equal,
			});
		}

		let limit = if self.limit > 0 { self.limit } else { usize::MAX };
		selected
			.into_iter()
			.skip(self.offset)
			.take(limit)
			.cloned()
			.collect()
	}
}

/// Order two JSON scalars of the same kind. Numbers compare numerically.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
	match (a, b) {
		(Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
			(Some(a), Some(b)) => Some(a.cmp(&b)),
			_ => a.as_f64()?.partial_cmp(&b.as_f64()?),
		},
		(Value::String(a), Value::String(b)) => Some(a.cmp(b)),
		(Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
		(Value::Null, Value::Null) => Some(Ordering::Equal),
		_ => None,
	}
}
