//! Index selection policy and DDL rendering.
//!
//! An [`IndexSpec`] describes one secondary index: the table, the key
//! columns, an optional partial-index predicate, and a deterministic name.
//! [`select_indexes`] turns per-table query access patterns into specs:
//! every join key, filter, or lookup column receives an index, and columns
//! whose values are mostly `NULL` receive a partial index restricted to the
//! non-null minority.
//!
//! Identifiers are restricted to lowercase ASCII letters, digits, and
//! underscores so rendered DDL never needs quoting and cannot carry injected
//! SQL.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

/// PostgreSQL truncates identifiers beyond `NAMEDATALEN - 1` bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Prefix applied to every derived index name.
pub const INDEX_NAME_PREFIX: &str = "ix";

/// Errors raised while building index specs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexPolicyError {
    /// An identifier was empty.
    #[error("identifier must not be empty")]
    EmptyIdentifier,
    /// An identifier used characters outside `[a-z0-9_]` or began with a digit.
    #[error("identifier '{value}' must match [a-z_][a-z0-9_]*")]
    InvalidIdentifier {
        /// Rejected identifier.
        value: String,
    },
    /// An identifier exceeded the PostgreSQL length limit.
    #[error("identifier '{value}' exceeds {max} bytes", max = MAX_IDENTIFIER_LEN)]
    IdentifierTooLong {
        /// Rejected identifier.
        value: String,
    },
    /// An index was declared without key columns.
    #[error("index on table '{table}' needs at least one key column")]
    NoColumns {
        /// Table the index was declared on.
        table: String,
    },
    /// An index listed the same key column twice.
    #[error("index on table '{table}' lists column '{column}' more than once")]
    DuplicateColumn {
        /// Table the index was declared on.
        table: String,
        /// Repeated column.
        column: String,
    },
    /// Two specs in one plan derived the same index name.
    #[error("index name '{name}' appears more than once")]
    DuplicateIndexName {
        /// Colliding index name.
        name: String,
    },
}

/// Validated, unquoted SQL identifier.
///
/// # Examples
///
/// ```rust
/// use insightball_migrations::domain::Identifier;
///
/// let column = Identifier::new("club_id").expect("valid identifier");
/// assert_eq!(column.as_str(), "club_id");
/// assert!(Identifier::new("Club Id").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap an identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, IndexPolicyError> {
        let value = value.into();
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(IndexPolicyError::EmptyIdentifier);
        };
        let first_ok = first.is_ascii_lowercase() || first == '_';
        let rest_ok =
            chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
        if !(first_ok && rest_ok) {
            return Err(IndexPolicyError::InvalidIdentifier { value });
        }
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(IndexPolicyError::IdentifierTooLong { value });
        }
        Ok(Self(value))
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IndexPolicyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Deterministic index name: `ix_<table>_<column>[_<column>...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IndexName(Identifier);

impl IndexName {
    /// Derive the name for an index on `table` over `columns`.
    ///
    /// Names longer than [`MAX_IDENTIFIER_LEN`] are rejected rather than
    /// truncated, since PostgreSQL truncation could make two specs collide.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use insightball_migrations::domain::{Identifier, IndexName};
    ///
    /// let table = Identifier::new("club_members").expect("table");
    /// let columns = [Identifier::new("invite_token").expect("column")];
    /// let name = IndexName::derive(&table, &columns).expect("name");
    /// assert_eq!(name.as_str(), "ix_club_members_invite_token");
    /// ```
    pub fn derive(table: &Identifier, columns: &[Identifier]) -> Result<Self, IndexPolicyError> {
        let mut name = format!("{INDEX_NAME_PREFIX}_{table}");
        for column in columns {
            name.push('_');
            name.push_str(column.as_str());
        }
        Identifier::new(name).map(Self)
    }

    /// Wrap an existing identifier as an index name.
    pub fn from_identifier(identifier: Identifier) -> Self {
        Self(identifier)
    }

    /// Borrow the name text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Row filter restricting a partial index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum IndexPredicate {
    /// Only rows where the column is not `NULL`.
    IsNotNull(Identifier),
}

impl IndexPredicate {
    /// Column the predicate reads.
    pub fn column(&self) -> &Identifier {
        match self {
            Self::IsNotNull(column) => column,
        }
    }
}

impl fmt::Display for IndexPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IsNotNull(column) => write!(f, "{column} IS NOT NULL"),
        }
    }
}

/// One secondary index to be built concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    name: IndexName,
    table: Identifier,
    columns: Vec<Identifier>,
    predicate: Option<IndexPredicate>,
}

impl IndexSpec {
    /// Build a full (non-partial) index spec.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use insightball_migrations::domain::IndexSpec;
    ///
    /// let spec = IndexSpec::new("matches", &["user_id"]).expect("spec");
    /// assert_eq!(spec.name().as_str(), "ix_matches_user_id");
    /// assert_eq!(
    ///     spec.create_statement(),
    ///     "CREATE INDEX CONCURRENTLY IF NOT EXISTS ix_matches_user_id ON matches (user_id)"
    /// );
    /// ```
    pub fn new(table: &str, columns: &[&str]) -> Result<Self, IndexPolicyError> {
        let table = Identifier::new(table)?;
        if columns.is_empty() {
            return Err(IndexPolicyError::NoColumns {
                table: table.to_string(),
            });
        }

        let mut key_columns: Vec<Identifier> = Vec::with_capacity(columns.len());
        for raw in columns {
            let column = Identifier::new(*raw)?;
            if key_columns.contains(&column) {
                return Err(IndexPolicyError::DuplicateColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
            key_columns.push(column);
        }

        let name = IndexName::derive(&table, &key_columns)?;
        Ok(Self {
            name,
            table,
            columns: key_columns,
            predicate: None,
        })
    }

    /// Build a single-column partial index covering only non-null rows.
    pub fn partial_not_null(table: &str, column: &str) -> Result<Self, IndexPolicyError> {
        let spec = Self::new(table, &[column])?;
        let predicate = IndexPredicate::IsNotNull(Identifier::new(column)?);
        Ok(spec.with_predicate(predicate))
    }

    /// Attach a partial-index predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: IndexPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Deterministic index name.
    pub fn name(&self) -> &IndexName {
        &self.name
    }

    /// Target table.
    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// Key columns in index order.
    pub fn columns(&self) -> &[Identifier] {
        &self.columns
    }

    /// Optional partial-index predicate.
    pub fn predicate(&self) -> Option<&IndexPredicate> {
        self.predicate.as_ref()
    }

    /// Every column the index touches: key columns, then the predicate column
    /// when it is not already a key column.
    pub fn referenced_columns(&self) -> Vec<&Identifier> {
        let mut referenced: Vec<&Identifier> = self.columns.iter().collect();
        if let Some(column) = self.predicate.as_ref().map(IndexPredicate::column) {
            if !referenced.contains(&column) {
                referenced.push(column);
            }
        }
        referenced
    }

    /// Render the non-blocking, idempotent `CREATE INDEX` statement.
    ///
    /// The statement must run outside any explicit transaction block.
    pub fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(Identifier::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut statement = format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS {} ON {} ({columns})",
            self.name, self.table
        );
        if let Some(predicate) = &self.predicate {
            statement.push_str(" WHERE ");
            statement.push_str(&predicate.to_string());
        }
        statement
    }

    /// Render the non-blocking `DROP INDEX` statement used to clear an
    /// invalid index before a rebuild.
    pub fn drop_statement(&self) -> String {
        drop_statement(&self.name)
    }
}

/// Render `DROP INDEX CONCURRENTLY IF EXISTS` for an index name.
pub fn drop_statement(name: &IndexName) -> String {
    format!("DROP INDEX CONCURRENTLY IF EXISTS {name}")
}

/// Reject plans in which two specs share an index name.
pub fn ensure_unique_names<'a>(
    specs: impl IntoIterator<Item = &'a IndexSpec>,
) -> Result<(), IndexPolicyError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name()) {
            return Err(IndexPolicyError::DuplicateIndexName {
                name: spec.name().to_string(),
            });
        }
    }
    Ok(())
}

/// How a hot query path uses a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnUsage {
    /// Foreign key joined against its parent table.
    JoinKey,
    /// Equality or range filter on a hot endpoint.
    Filter,
    /// Point lookup, such as token redemption or login by email.
    Lookup,
}

/// Shape of a column's value distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDistribution {
    /// Most rows carry a value.
    Dense,
    /// Most rows are `NULL`; queries target the non-null minority.
    MostlyNull,
}

/// One column access on a hot query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnAccess<'a> {
    /// Accessed column.
    pub column: &'a str,
    /// How the query uses the column.
    pub usage: ColumnUsage,
    /// Value distribution of the column.
    pub distribution: ValueDistribution,
}

impl<'a> ColumnAccess<'a> {
    /// Column used as a join key.
    pub const fn join_key(column: &'a str) -> Self {
        Self::dense(column, ColumnUsage::JoinKey)
    }

    /// Column used in an equality or range filter.
    pub const fn filter(column: &'a str) -> Self {
        Self::dense(column, ColumnUsage::Filter)
    }

    /// Column used for point lookups.
    pub const fn lookup(column: &'a str) -> Self {
        Self::dense(column, ColumnUsage::Lookup)
    }

    /// Mark the column as mostly `NULL`.
    #[must_use]
    pub const fn mostly_null(mut self) -> Self {
        self.distribution = ValueDistribution::MostlyNull;
        self
    }

    const fn dense(column: &'a str, usage: ColumnUsage) -> Self {
        Self {
            column,
            usage,
            distribution: ValueDistribution::Dense,
        }
    }
}

/// Known hot access patterns of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAccessPattern<'a> {
    /// Table the accesses target.
    pub table: &'a str,
    /// Column accesses, in the order indexes should be built.
    pub accesses: Vec<ColumnAccess<'a>>,
}

/// Turn access patterns into index specs.
///
/// Each accessed column yields one single-column index, in first-access
/// order. A column accessed several times still yields one index, and that
/// index is partial only when every access marks the column mostly `NULL`.
///
/// # Examples
///
/// ```rust
/// use insightball_migrations::domain::{ColumnAccess, TableAccessPattern, select_indexes};
///
/// let specs = select_indexes(&[TableAccessPattern {
///     table: "users",
///     accesses: vec![
///         ColumnAccess::lookup("email"),
///         ColumnAccess::filter("deleted_at").mostly_null(),
///     ],
/// }])
/// .expect("specs");
///
/// assert_eq!(specs.len(), 2);
/// assert!(specs[0].predicate().is_none());
/// assert!(specs[1].predicate().is_some());
/// ```
pub fn select_indexes(
    patterns: &[TableAccessPattern<'_>],
) -> Result<Vec<IndexSpec>, IndexPolicyError> {
    let mut specs = Vec::new();
    for pattern in patterns {
        let mut columns: Vec<(&str, bool)> = Vec::new();
        for access in &pattern.accesses {
            let sparse = access.distribution == ValueDistribution::MostlyNull;
            match columns
                .iter_mut()
                .find(|(column, _)| *column == access.column)
            {
                Some((_, all_sparse)) => *all_sparse &= sparse,
                None => columns.push((access.column, sparse)),
            }
        }

        for (column, sparse) in columns {
            let spec = if sparse {
                IndexSpec::partial_not_null(pattern.table, column)?
            } else {
                IndexSpec::new(pattern.table, &[column])?
            };
            specs.push(spec);
        }
    }

    ensure_unique_names(&specs)?;
    Ok(specs)
}

#[cfg(test)]
#[path = "index_policy_tests.rs"]
mod tests;
