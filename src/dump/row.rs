/// A single field value as it appeared in the dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// The `NULL` keyword
    Null,
    /// A quoted string literal, already unescaped
    Quoted(String),
    /// An unquoted token (number, hex literal, expression) kept verbatim
    Bare(String),
}

impl RawValue {
    /// Text content of the value, `None` for NULL
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Null => None,
            RawValue::Quoted(s) | RawValue::Bare(s) => Some(s),
        }
    }

    fn approx_size(&self) -> usize {
        std::mem::size_of::<RawValue>() + self.as_text().map_or(0, str::len)
    }
}

/// A single row (tuple) destined for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub values: Vec<RawValue>,
}

impl Row {
    pub fn new(values: Vec<RawValue>) -> Self {
        Self { values }
    }

    /// Approximate heap footprint, used for the per-table memory ceiling
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Row>() + self.values.iter().map(RawValue::approx_size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_size_grows_with_content() {
        let small = Row::new(vec![RawValue::Bare("1".into())]);
        let large = Row::new(vec![
            RawValue::Bare("1".into()),
            RawValue::Quoted("x".repeat(1000)),
        ]);
        assert!(large.approx_size() > small.approx_size() + 1000);
    }

    #[test]
    fn test_as_text() {
        assert_eq!(RawValue::Null.as_text(), None);
        assert_eq!(RawValue::Quoted("a".into()).as_text(), Some("a"));
        assert_eq!(RawValue::Bare("42".into()).as_text(), Some("42"));
    }
}
