use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

use crate::dump::RawValue;

/// SQL data type of a destination column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Text,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Interval,
    Uuid,
    Bytea,
}

/// Type category for SQL type conversion strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypeCategory {
    /// Parsed to a Rust numeric or boolean and bound natively
    NativeNumeric,
    /// Bound as text inside `CAST(<placeholder> AS <type>)`
    StringCast,
    /// Bound as text
    DirectString,
}

impl SqlType {
    /// Map a declared column type, as reported by the destination, onto a `SqlType`
    ///
    /// Length and precision modifiers are ignored; unknown types are treated as text.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or_default().trim();
        match base {
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "SMALLINT" | "INT2" | "TINYINT" => SqlType::SmallInt,
            "INTEGER" | "INT" | "INT4" | "MEDIUMINT" | "SERIAL" => SqlType::Integer,
            "BIGINT" | "INT8" | "BIGSERIAL" => SqlType::BigInt,
            "REAL" | "FLOAT4" => SqlType::Real,
            "DOUBLE PRECISION" | "DOUBLE" | "FLOAT8" | "FLOAT" => SqlType::DoublePrecision,
            "NUMERIC" | "DECIMAL" => SqlType::Numeric,
            "DATE" => SqlType::Date,
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" | "DATETIME" => SqlType::Timestamp,
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => SqlType::TimestampTz,
            "TIME" | "TIME WITHOUT TIME ZONE" => SqlType::Time,
            "INTERVAL" => SqlType::Interval,
            "UUID" => SqlType::Uuid,
            "BYTEA" => SqlType::Bytea,
            _ => SqlType::Text,
        }
    }

    /// Returns the Postgres type name
    pub fn to_postgres(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Numeric => "NUMERIC",
            SqlType::Text => "TEXT",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Interval => "INTERVAL",
            SqlType::Uuid => "UUID",
            SqlType::Bytea => "BYTEA",
        }
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            SqlType::Boolean
            | SqlType::SmallInt
            | SqlType::Integer
            | SqlType::BigInt
            | SqlType::Real
            | SqlType::DoublePrecision => TypeCategory::NativeNumeric,
            SqlType::Numeric
            | SqlType::Timestamp
            | SqlType::TimestampTz
            | SqlType::Date
            | SqlType::Time
            | SqlType::Interval
            | SqlType::Uuid
            | SqlType::Bytea => TypeCategory::StringCast,
            SqlType::Text => TypeCategory::DirectString,
        }
    }
}

/// A column of an existing destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    pub sql_type: SqlType,
}

/// Column types of an existing table, in ordinal order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnType>,
}

impl TableSchema {
    pub fn from_declared(rows: Vec<(String, String)>) -> Self {
        Self {
            columns: rows
                .into_iter()
                .map(|(name, declared)| ColumnType {
                    sql_type: SqlType::from_declared(&declared),
                    name,
                })
                .collect(),
        }
    }

    /// Type of the value at `position` of a row, given the statement's column list
    pub fn type_at(&self, columns: Option<&[String]>, position: usize) -> Option<&SqlType> {
        match columns {
            Some(names) => {
                let name = names.get(position)?;
                self.columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .map(|c| &c.sql_type)
            }
            None => self.columns.get(position).map(|c| &c.sql_type),
        }
    }
}

/// A value ready to be bound to a statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// NULL typed after the target column
    Null(SqlType),
    Bool(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Text(String),
    /// Decoded hex or bit literal
    Bytes(Vec<u8>),
}

impl SqlParam {
    /// Convert a quoted or numeric dump value into the parameter type the column expects
    pub fn coerce(raw: &RawValue, sql_type: &SqlType) -> Result<Self, String> {
        let Some(text) = raw.as_text() else {
            return Ok(SqlParam::Null(sql_type.clone()));
        };
        let trimmed = text.trim();
        Ok(match sql_type {
            SqlType::Boolean => SqlParam::Bool(parse_bool(trimmed)?),
            SqlType::SmallInt => SqlParam::SmallInt(parse(trimmed, sql_type)?),
            SqlType::Integer => SqlParam::Integer(parse(trimmed, sql_type)?),
            SqlType::BigInt => SqlParam::BigInt(parse(trimmed, sql_type)?),
            SqlType::Real => SqlParam::Real(parse(trimmed, sql_type)?),
            SqlType::DoublePrecision => SqlParam::Double(parse(trimmed, sql_type)?),
            // Everything else binds as text, wrapped in CAST() where the adapter asks for it
            _ => SqlParam::Text(text.to_string()),
        })
    }

    /// Bind onto a query through the `Any` driver
    pub fn bind<'q>(
        self,
        query: Query<'q, Any, AnyArguments<'q>>,
    ) -> Query<'q, Any, AnyArguments<'q>> {
        match self {
            SqlParam::Null(sql_type) => bind_null(query, &sql_type),
            SqlParam::Bool(v) => query.bind(v),
            SqlParam::SmallInt(v) => query.bind(v),
            SqlParam::Integer(v) => query.bind(v),
            SqlParam::BigInt(v) => query.bind(v),
            SqlParam::Real(v) => query.bind(v),
            SqlParam::Double(v) => query.bind(v),
            SqlParam::Text(v) => query.bind(v),
            SqlParam::Bytes(v) => query.bind(v),
        }
    }
}

/// How one dump value appears in a generated INSERT
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    /// Bound to the next placeholder
    Bind(SqlParam),
    /// Written into the statement text as is (keywords, function calls, expressions)
    Inline(String),
}

impl InsertValue {
    /// Pass-through conversion: strings and numbers bind as text, binary literals
    /// bind as bytes and any other unquoted token is inlined
    pub fn untyped(raw: &RawValue) -> Self {
        match raw {
            RawValue::Null => InsertValue::Bind(SqlParam::Null(SqlType::Text)),
            RawValue::Quoted(text) => InsertValue::Bind(SqlParam::Text(text.clone())),
            RawValue::Bare(token) => match BareToken::classify(token) {
                BareToken::Number => InsertValue::Bind(SqlParam::Text(token.clone())),
                BareToken::Bytes(bytes) => InsertValue::Bind(SqlParam::Bytes(bytes)),
                BareToken::Expression => InsertValue::Inline(token.clone()),
            },
        }
    }

    /// Typed conversion against the target column; only quoted values and plain
    /// numbers go through `SqlParam::coerce`
    pub fn coerce(raw: &RawValue, sql_type: &SqlType) -> Result<Self, String> {
        if let RawValue::Bare(token) = raw {
            match BareToken::classify(token) {
                BareToken::Number => {}
                BareToken::Bytes(bytes) => return Ok(InsertValue::Bind(SqlParam::Bytes(bytes))),
                BareToken::Expression => return Ok(InsertValue::Inline(token.clone())),
            }
        }
        SqlParam::coerce(raw, sql_type).map(InsertValue::Bind)
    }
}

/// An unquoted dump token, sorted by how it reaches the destination
#[derive(Debug, PartialEq)]
enum BareToken {
    Number,
    /// `0x..`, `X'..'`, `0b..` or `b'..'`
    Bytes(Vec<u8>),
    Expression,
}

impl BareToken {
    fn classify(token: &str) -> Self {
        if is_plain_number(token) {
            return BareToken::Number;
        }
        match decode_binary_literal(token) {
            Some(bytes) => BareToken::Bytes(bytes),
            None => BareToken::Expression,
        }
    }
}

/// Optional sign, digits with an optional fraction, optional exponent
fn is_plain_number(token: &str) -> bool {
    let unsigned = token.strip_prefix(['-', '+']).unwrap_or(token);
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], Some(&unsigned[at + 1..])),
        None => (unsigned, None),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok = !(whole.is_empty() && fraction.is_empty()) && digits(whole) && digits(fraction);
    let exponent_ok = exponent.is_none_or(|e| {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        !e.is_empty() && digits(e)
    });
    mantissa_ok && exponent_ok
}

fn decode_binary_literal(token: &str) -> Option<Vec<u8>> {
    let quoted = |prefix: char| {
        let rest = token.strip_prefix([prefix, prefix.to_ascii_uppercase()])?;
        rest.strip_prefix('\'')?.strip_suffix('\'')
    };
    // 0x and 0b need at least one digit; X'' and b'' are empty strings
    let prefixed = |prefix: &str| token.strip_prefix(prefix).filter(|d| !d.is_empty());
    if let Some(hex) = prefixed("0x").or_else(|| quoted('x')) {
        return decode_digits(hex, 4);
    }
    if let Some(bits) = prefixed("0b").or_else(|| quoted('b')) {
        return decode_digits(bits, 1);
    }
    None
}

/// Big-endian bytes from hex (4 bits per digit) or binary (1 bit per digit) digits,
/// left-padded with zeros to a whole byte
fn decode_digits(digits: &str, bits_per_digit: u32) -> Option<Vec<u8>> {
    let radix = 1u32 << bits_per_digit;
    let values = digits
        .chars()
        .map(|c| c.to_digit(radix))
        .collect::<Option<Vec<u32>>>()?;

    let per_byte = (8 / bits_per_digit) as usize;
    let padding = (per_byte - values.len() % per_byte) % per_byte;
    let padded: Vec<u32> = std::iter::repeat_n(0, padding).chain(values).collect();
    Some(
        padded
            .chunks(per_byte)
            .map(|chunk| chunk.iter().fold(0u32, |acc, d| (acc << bits_per_digit) | d) as u8)
            .collect(),
    )
}

/// Bind NULL value for the appropriate type
fn bind_null<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    sql_type: &SqlType,
) -> Query<'q, Any, AnyArguments<'q>> {
    match sql_type {
        SqlType::Boolean => query.bind(None::<bool>),
        SqlType::SmallInt => query.bind(None::<i16>),
        SqlType::Integer => query.bind(None::<i32>),
        SqlType::BigInt => query.bind(None::<i64>),
        SqlType::Real => query.bind(None::<f32>),
        SqlType::DoublePrecision => query.bind(None::<f64>),
        SqlType::Bytea => query.bind(None::<Vec<u8>>),
        // Text NULL; CAST() in the statement supplies the type
        _ => query.bind(None::<String>),
    }
}

fn parse<T: std::str::FromStr>(value: &str, sql_type: &SqlType) -> Result<T, String>
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    value.parse().map_err(|e| {
        format!(
            "cannot convert '{}' to {}: {}",
            value,
            sql_type.to_postgres(),
            e
        )
    })
}

fn parse_bool(value: &str) -> Result<bool, String> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("t") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("f") || value == "0"
    {
        Ok(false)
    } else {
        Err(format!("cannot convert '{}' to BOOLEAN", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_declared() {
        let test_cases = [
            ("integer", SqlType::Integer),
            ("INT(11)", SqlType::Integer),
            ("bigint", SqlType::BigInt),
            ("character varying", SqlType::Text),
            ("VARCHAR(20)", SqlType::Text),
            ("numeric(10,2)", SqlType::Numeric),
            ("double precision", SqlType::DoublePrecision),
            ("timestamp with time zone", SqlType::TimestampTz),
            ("timestamp without time zone", SqlType::Timestamp),
            ("boolean", SqlType::Boolean),
            ("uuid", SqlType::Uuid),
            ("bytea", SqlType::Bytea),
            ("", SqlType::Text),
            ("USER-DEFINED", SqlType::Text),
        ];

        for (declared, expected) in test_cases {
            assert_eq!(
                SqlType::from_declared(declared),
                expected,
                "Failed for declared type '{}'",
                declared
            );
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(SqlType::BigInt.category(), TypeCategory::NativeNumeric);
        assert_eq!(SqlType::Date.category(), TypeCategory::StringCast);
        assert_eq!(SqlType::Numeric.category(), TypeCategory::StringCast);
        assert_eq!(SqlType::Text.category(), TypeCategory::DirectString);
    }

    #[test]
    fn test_coerce_values() {
        let bare = |s: &str| RawValue::Bare(s.to_string());
        let quoted = |s: &str| RawValue::Quoted(s.to_string());

        assert_eq!(
            SqlParam::coerce(&bare("42"), &SqlType::Integer),
            Ok(SqlParam::Integer(42))
        );
        assert_eq!(
            SqlParam::coerce(&quoted("42"), &SqlType::BigInt),
            Ok(SqlParam::BigInt(42))
        );
        assert_eq!(
            SqlParam::coerce(&bare("1"), &SqlType::Boolean),
            Ok(SqlParam::Bool(true))
        );
        assert_eq!(
            SqlParam::coerce(&quoted("f"), &SqlType::Boolean),
            Ok(SqlParam::Bool(false))
        );
        assert_eq!(
            SqlParam::coerce(&bare("2.5"), &SqlType::DoublePrecision),
            Ok(SqlParam::Double(2.5))
        );
        assert_eq!(
            SqlParam::coerce(&quoted("2024-01-15"), &SqlType::Date),
            Ok(SqlParam::Text("2024-01-15".to_string()))
        );
        assert_eq!(
            SqlParam::coerce(&RawValue::Null, &SqlType::Integer),
            Ok(SqlParam::Null(SqlType::Integer))
        );
    }

    #[test]
    fn test_coerce_rejects_invalid_values() {
        assert!(SqlParam::coerce(&RawValue::Quoted("abc".into()), &SqlType::Integer).is_err());
        assert!(SqlParam::coerce(&RawValue::Bare("70000".into()), &SqlType::SmallInt).is_err());
        assert!(SqlParam::coerce(&RawValue::Quoted("maybe".into()), &SqlType::Boolean).is_err());
    }

    #[test]
    fn test_untyped_passthrough() {
        let bare = |s: &str| RawValue::Bare(s.to_string());

        assert_eq!(
            InsertValue::untyped(&bare("42")),
            InsertValue::Bind(SqlParam::Text("42".to_string()))
        );
        assert_eq!(
            InsertValue::untyped(&bare("-1.5e3")),
            InsertValue::Bind(SqlParam::Text("-1.5e3".to_string()))
        );
        assert_eq!(
            InsertValue::untyped(&RawValue::Quoted("0x41".into())),
            InsertValue::Bind(SqlParam::Text("0x41".to_string()))
        );
        assert_eq!(
            InsertValue::untyped(&RawValue::Null),
            InsertValue::Bind(SqlParam::Null(SqlType::Text))
        );
    }

    #[test]
    fn test_binary_literals_decode_to_bytes() {
        let bytes = |s: &str| InsertValue::untyped(&RawValue::Bare(s.to_string()));
        let expected = |b: &[u8]| InsertValue::Bind(SqlParam::Bytes(b.to_vec()));

        assert_eq!(bytes("0x4142"), expected(b"AB"));
        assert_eq!(bytes("X'4142'"), expected(b"AB"));
        assert_eq!(bytes("x'00ff'"), expected(&[0x00, 0xff]));
        assert_eq!(bytes("0xABC"), expected(&[0x0a, 0xbc]));
        assert_eq!(bytes("X''"), expected(&[]));
        assert_eq!(bytes("b'1'"), expected(&[1]));
        assert_eq!(bytes("B'101000001'"), expected(&[0x01, 0x41]));
        assert_eq!(bytes("0b01000001"), expected(b"A"));
    }

    #[test]
    fn test_other_bare_tokens_are_inlined() {
        for token in ["TRUE", "CURRENT_TIMESTAMP", "now()", "0x", "0xZZ", "X'4G'", "1 + 1", "-"] {
            assert_eq!(
                InsertValue::untyped(&RawValue::Bare(token.to_string())),
                InsertValue::Inline(token.to_string()),
                "Failed for token '{}'",
                token
            );
        }
    }

    #[test]
    fn test_coerce_keeps_literals_and_expressions() {
        assert_eq!(
            InsertValue::coerce(&RawValue::Bare("0x4142".into()), &SqlType::Bytea),
            Ok(InsertValue::Bind(SqlParam::Bytes(b"AB".to_vec())))
        );
        assert_eq!(
            InsertValue::coerce(&RawValue::Bare("TRUE".into()), &SqlType::Boolean),
            Ok(InsertValue::Inline("TRUE".to_string()))
        );
        assert_eq!(
            InsertValue::coerce(&RawValue::Bare("7".into()), &SqlType::SmallInt),
            Ok(InsertValue::Bind(SqlParam::SmallInt(7)))
        );
        assert!(InsertValue::coerce(&RawValue::Quoted("x".into()), &SqlType::Integer).is_err());
    }

    #[test]
    fn test_type_at_with_and_without_column_list() {
        let schema = TableSchema::from_declared(vec![
            ("id".to_string(), "INTEGER".to_string()),
            ("name".to_string(), "TEXT".to_string()),
        ]);
        assert_eq!(schema.type_at(None, 0), Some(&SqlType::Integer));
        assert_eq!(schema.type_at(None, 2), None);

        let columns = vec!["name".to_string(), "ID".to_string()];
        assert_eq!(schema.type_at(Some(&columns), 0), Some(&SqlType::Text));
        assert_eq!(schema.type_at(Some(&columns), 1), Some(&SqlType::Integer));
    }
}
