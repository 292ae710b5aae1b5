//! In-memory query evaluation: predicates, ordering, pagination.

use crate::context::Context;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use reldb_storage::Record;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::str::FromStr;

/// Comparison operator for a query condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Case-insensitive substring match, regardless of field type.
    Like,
}

impl FromStr for Operator {
    type Err = CoreError;

    /// Parses an operator token.
    ///
    /// Recognized tokens: `=`, `==`, `!=`, `<>`, `<`, `<=`, `>`, `>=`
    /// and `like` (case-insensitive). Anything else is an
    /// [`CoreError::UnsupportedOperator`], never a silently-false
    /// condition.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            _ if token.eq_ignore_ascii_case("like") => Ok(Self::Like),
            _ => Err(CoreError::unsupported_operator(token)),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        };
        f.write_str(token)
    }
}

/// One predicate over a field value. Conditions in a query are ANDed.
#[derive(Debug, Clone)]
pub(crate) struct QueryCondition {
    pub(crate) field: String,
    pub(crate) operator: Operator,
    pub(crate) value: String,
}

impl QueryCondition {
    /// Evaluates the condition against a record.
    ///
    /// A record lacking the field satisfies only `Ne`: absence is not
    /// equal to anything and otherwise incomparable.
    pub(crate) fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return self.operator == Operator::Ne;
        };
        match self.operator {
            Operator::Like => actual.to_lowercase().contains(&self.value.to_lowercase()),
            Operator::Eq => compare_values(actual, &self.value) == Ordering::Equal,
            Operator::Ne => compare_values(actual, &self.value) != Ordering::Equal,
            Operator::Lt => compare_values(actual, &self.value) == Ordering::Less,
            Operator::Le => compare_values(actual, &self.value) != Ordering::Greater,
            Operator::Gt => compare_values(actual, &self.value) == Ordering::Greater,
            Operator::Ge => compare_values(actual, &self.value) != Ordering::Less,
        }
    }
}

/// One ordering key; earlier keys dominate, later keys break ties.
#[derive(Debug, Clone)]
pub(crate) struct OrderKey {
    pub(crate) field: String,
    pub(crate) descending: bool,
}

/// Compares two field values: as decimal numbers when both parse, as
/// case-insensitive strings otherwise.
pub(crate) fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Stable-sorts records by the ordering keys in declaration order.
pub(crate) fn order_records(records: &mut [Record], order: &[OrderKey]) {
    if order.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for key in order {
            let left = a.get(&key.field).unwrap_or_default();
            let right = b.get(&key.field).unwrap_or_default();
            let mut ordering = compare_values(left, right);
            if key.descending {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// A chainable query over one entity type.
///
/// Built by [`Context::query`]; nothing touches the store until
/// [`QueryBuilder::execute`]. Every returned entity has been run
/// through relationship loading and is tracked by its entity set.
///
/// # Example
///
/// ```rust,ignore
/// let expensive: Vec<Car> = ctx
///     .query::<Car>()
///     .filter("price", Operator::Gt, "40000")
///     .order_by("price", true)
///     .skip(1)
///     .take(1)
///     .execute()?;
/// ```
pub struct QueryBuilder<'a, T: Entity> {
    context: &'a mut Context,
    conditions: Vec<QueryCondition>,
    order: Vec<OrderKey>,
    skip: Option<usize>,
    take: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Entity> QueryBuilder<'a, T> {
    pub(crate) fn new(context: &'a mut Context) -> Self {
        Self {
            context,
            conditions: Vec::new(),
            order: Vec::new(),
            skip: None,
            take: None,
            _marker: PhantomData,
        }
    }

    /// Appends a condition; all conditions are ANDed.
    ///
    /// Operator tokens can be parsed with [`Operator::from_str`], which
    /// rejects unrecognized tokens.
    #[must_use]
    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<String>,
    ) -> Self {
        self.conditions.push(QueryCondition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Appends an ordering key. Keys apply in declaration order; later
    /// keys are tie-breakers.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order.push(OrderKey {
            field: field.into(),
            descending,
        });
        self
    }

    /// Skips the first `n` records after filtering and ordering.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Limits the result to `n` records, applied after `skip`.
    #[must_use]
    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// Evaluates the query and returns the matching entities in final
    /// order, tracked by their entity set.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unregistered, a stored record is
    /// malformed, or the store fails.
    pub fn execute(self) -> CoreResult<Vec<T>> {
        self.context
            .run_query::<T>(&self.conditions, &self.order, self.skip, self.take)
    }
}
