use regex::Regex;

use crate::error::LoadError;

/// Placeholder standing for the table name inside a record identifier
const TABLE_PLACEHOLDER: char = '?';

/// Marker identifying where a data-insertion statement begins
///
/// Built from a template such as ``INSERT INTO `?` VALUES``. Keywords match
/// case-insensitively, whitespace runs match any whitespace, and an optional
/// column list in front of `VALUES` is captured.
#[derive(Debug, Clone)]
pub struct RecordPattern {
    template: String,
    one_insert_per_row: bool,
    regex: Regex,
}

/// A statement recognized as data insertion
#[derive(Debug, PartialEq, Eq)]
pub struct PatternMatch<'s> {
    pub table: String,
    pub columns: Option<Vec<String>>,
    /// Everything after the pattern, i.e. the tuple list
    pub body: &'s str,
}

impl RecordPattern {
    pub fn new(template: &str, one_insert_per_row: bool) -> Result<Self, LoadError> {
        let template = template.trim();
        if template.matches(TABLE_PLACEHOLDER).count() != 1 {
            return Err(LoadError::Configuration(format!(
                "Record identifier '{}' must contain exactly one '{}' standing for the table name",
                template, TABLE_PLACEHOLDER
            )));
        }
        let (prefix, suffix) = template
            .split_once(TABLE_PLACEHOLDER)
            .ok_or_else(|| LoadError::Configuration("Empty record identifier".to_string()))?;

        let suffix_re = match strip_values_keyword(suffix) {
            Some(head) => format!(
                r"{}(?:\s*\((?P<columns>[^)]*)\))?\s*VALUES",
                literal_pattern(head.trim_end())
            ),
            None => literal_pattern(suffix),
        };
        let source = format!(
            r"(?i)^\s*{}(?P<table>[^\r\n(]+?){}",
            literal_pattern(prefix),
            suffix_re
        );
        let regex = Regex::new(&source).map_err(|e| {
            LoadError::Configuration(format!("Invalid record identifier '{}': {}", template, e))
        })?;

        Ok(Self {
            template: template.to_string(),
            one_insert_per_row,
            regex,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn one_insert_per_row(&self) -> bool {
        self.one_insert_per_row
    }

    /// Match the beginning of `statement`, returning the table and the tuple list
    pub fn match_statement<'s>(&self, statement: &'s str) -> Option<PatternMatch<'s>> {
        let caps = self.regex.captures(statement)?;
        let table = normalize_table_name(caps.name("table")?.as_str());
        if table.is_empty() {
            return None;
        }
        let columns = caps.name("columns").map(|m| {
            m.as_str()
                .split(',')
                .map(|c| strip_identifier_quotes(c.trim()).to_string())
                .filter(|c| !c.is_empty())
                .collect()
        });
        let end = caps.get(0)?.end();

        Some(PatternMatch {
            table,
            columns,
            body: &statement[end..],
        })
    }
}

/// Normalize a captured table name: quotes removed, schema qualifier kept
pub fn normalize_table_name(raw: &str) -> String {
    raw.trim()
        .split('.')
        .map(|part| strip_identifier_quotes(part.trim()))
        .collect::<Vec<_>>()
        .join(".")
}

fn strip_identifier_quotes(part: &str) -> &str {
    part.trim_matches(|c| matches!(c, '`' | '"' | '[' | ']'))
}

/// Returns the suffix without its trailing `VALUES` keyword, if it has one
fn strip_values_keyword(suffix: &str) -> Option<&str> {
    let trimmed = suffix.trim_end();
    let split = trimmed.len().checked_sub("VALUES".len())?;
    if trimmed.is_char_boundary(split) && trimmed[split..].eq_ignore_ascii_case("VALUES") {
        Some(&trimmed[..split])
    } else {
        None
    }
}

/// Escape a template fragment, letting any whitespace run match `\s+`
fn literal_pattern(fragment: &str) -> String {
    let mut out = String::new();
    let mut in_whitespace = false;
    for c in fragment.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push_str(r"\s+");
                in_whitespace = true;
            }
        } else {
            in_whitespace = false;
            out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql() -> RecordPattern {
        RecordPattern::new("INSERT INTO `?` VALUES", false).unwrap()
    }

    #[test]
    fn test_matches_mysql_extended_insert() {
        let stmt = "INSERT INTO `cities` VALUES (1,'A'),(2,'B');";
        let m = mysql().match_statement(stmt).unwrap();
        assert_eq!(m.table, "cities");
        assert_eq!(m.columns, None);
        assert_eq!(m.body, " (1,'A'),(2,'B');");
    }

    #[test]
    fn test_keywords_are_case_insensitive_and_whitespace_flexible() {
        let stmt = "insert  into `cities`\nvalues (1)";
        let m = mysql().match_statement(stmt).unwrap();
        assert_eq!(m.table, "cities");
        assert_eq!(m.body, " (1)");
    }

    #[test]
    fn test_captures_column_list() {
        let stmt = "INSERT INTO `cities` (`id`, `name`) VALUES (1,'A');";
        let m = mysql().match_statement(stmt).unwrap();
        assert_eq!(m.table, "cities");
        assert_eq!(
            m.columns,
            Some(vec!["id".to_string(), "name".to_string()])
        );
        assert_eq!(m.body, " (1,'A');");
    }

    #[test]
    fn test_unquoted_pattern_with_schema_qualifier() {
        let pattern = RecordPattern::new("INSERT INTO ? VALUES", true).unwrap();
        let m = pattern
            .match_statement("INSERT INTO public.\"Cities\" VALUES (1, 'A');")
            .unwrap();
        assert_eq!(m.table, "public.Cities");
        assert!(pattern.one_insert_per_row());
    }

    #[test]
    fn test_non_matching_statements() {
        assert!(mysql().match_statement("CREATE TABLE `cities` (id int);").is_none());
        assert!(mysql().match_statement("LOCK TABLES `cities` WRITE;").is_none());
    }

    #[test]
    fn test_template_requires_single_placeholder() {
        assert!(matches!(
            RecordPattern::new("INSERT INTO cities VALUES", false),
            Err(LoadError::Configuration(_))
        ));
        assert!(matches!(
            RecordPattern::new("INSERT INTO ?.? VALUES", false),
            Err(LoadError::Configuration(_))
        ));
    }

    #[test]
    fn test_pattern_without_values_keyword() {
        let pattern = RecordPattern::new("REPLACE INTO `?`", false).unwrap();
        let m = pattern
            .match_statement("REPLACE INTO `t` VALUES (1);")
            .unwrap();
        assert_eq!(m.table, "t");
        assert_eq!(m.body, " VALUES (1);");
    }
}
