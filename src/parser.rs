//! Extraction of SQL and annotations from free-form provider responses.

use crate::error::{Result, SqlBuddyError};
use crate::prompt::{GenerationMode, VARIATION_SEPARATOR};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").expect("static regex");
}

/// Info strings accepted as SQL fences; an empty info string counts too
const SQL_INFO_STRINGS: &[&str] = &["sql", "mysql", "postgresql", "postgres", "psql", "pgsql"];

/// Leading keywords used to spot unfenced SQL
const SQL_LEADING_WORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "TRUNCATE",
    "EXPLAIN", "SHOW", "DESCRIBE",
];

const SECTION_HEADERS: &[&str] = &[
    "SQL QUERY",
    "OPTIMIZED QUERY",
    "EXPLANATION",
    "TABLES USED",
    "POTENTIAL OPTIMIZATIONS",
    "PERFORMANCE IMPACT",
];

/// One SQL candidate with whatever annotations the provider supplied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub sql: String,
    pub explanation: Option<String>,
    pub tables_used: Vec<String>,
    pub optimizations: Option<String>,
}

impl ParsedQuery {
    fn bare(sql: String) -> Self {
        Self {
            sql,
            explanation: None,
            tables_used: Vec::new(),
            optimizations: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOutput {
    Single(ParsedQuery),
    Variations {
        candidates: Vec<ParsedQuery>,
        warnings: Vec<String>,
    },
    /// Analysis text from `explain` mode
    Analysis(String),
}

#[derive(Debug, Clone, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse `raw` according to `mode`. `variation_count` only matters for `Variations`.
    pub fn parse(
        &self,
        raw: &str,
        mode: GenerationMode,
        variation_count: usize,
    ) -> Result<ParsedOutput> {
        match mode {
            GenerationMode::Generate | GenerationMode::Optimize => {
                self.parse_query(raw).map(ParsedOutput::Single)
            }
            GenerationMode::Variations => {
                let (candidates, warnings) = self.parse_variations(raw, variation_count)?;
                Ok(ParsedOutput::Variations {
                    candidates,
                    warnings,
                })
            }
            GenerationMode::Explain => self.parse_analysis(raw).map(ParsedOutput::Analysis),
        }
    }

    /// Extract one SQL statement plus the optional annotation sections.
    pub fn parse_query(&self, raw: &str) -> Result<ParsedQuery> {
        let sql = extract_sql(raw).ok_or_else(|| {
            SqlBuddyError::Parse("No SQL found in provider response".to_string())
        })?;

        let tables_used = section(raw, "TABLES USED")
            .map(|text| split_table_list(&text))
            .unwrap_or_default();

        Ok(ParsedQuery {
            sql,
            explanation: section(raw, "EXPLANATION"),
            tables_used,
            optimizations: section(raw, "POTENTIAL OPTIMIZATIONS")
                .or_else(|| section(raw, "PERFORMANCE IMPACT")),
        })
    }

    /// Split a multi-candidate response, keeping at most `expected` candidates.
    ///
    /// Segments without SQL are skipped with a warning; an error is returned only when no
    /// segment yields SQL.
    pub fn parse_variations(
        &self,
        raw: &str,
        expected: usize,
    ) -> Result<(Vec<ParsedQuery>, Vec<String>)> {
        let mut warnings = Vec::new();
        let mut candidates = Vec::new();

        if raw.contains(VARIATION_SEPARATOR) {
            for (index, segment) in raw.split(VARIATION_SEPARATOR).enumerate() {
                if segment.trim().is_empty() {
                    continue;
                }
                match self.parse_query(segment) {
                    Ok(candidate) => candidates.push(candidate),
                    Err(err) => warnings.push(format!("Variation {} skipped: {}", index + 1, err)),
                }
            }
        } else {
            candidates = fenced_sql_blocks(raw)
                .into_iter()
                .map(ParsedQuery::bare)
                .collect();
            if candidates.is_empty() {
                candidates.push(self.parse_query(raw)?);
            }
        }

        if candidates.is_empty() {
            return Err(SqlBuddyError::Parse(
                "No SQL found in any variation of the provider response".to_string(),
            ));
        }

        if candidates.len() > expected {
            warnings.push(format!(
                "Provider returned {} variations, keeping the first {}",
                candidates.len(),
                expected
            ));
            candidates.truncate(expected);
        } else if candidates.len() < expected {
            warnings.push(format!(
                "Provider returned {} of {} requested variations",
                candidates.len(),
                expected
            ));
        }

        Ok((candidates, warnings))
    }

    pub fn parse_analysis(&self, raw: &str) -> Result<String> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(SqlBuddyError::Parse(
                "Provider returned an empty analysis".to_string(),
            ));
        }
        Ok(text.to_string())
    }
}

/// Body of a fenced block with the framing newline removed. A `\r` before it is framing
/// only when the opening fence line also ended in `\r\n`.
fn block_body<'a>(info: &str, body: &'a str) -> &'a str {
    let Some(body) = body.strip_suffix('\n') else {
        return body;
    };
    if info.ends_with('\r') {
        body.strip_suffix('\r').unwrap_or(body)
    } else {
        body
    }
}

fn is_sql_info(info: &str) -> bool {
    let info = info.trim();
    info.is_empty() || SQL_INFO_STRINGS.iter().any(|s| info.eq_ignore_ascii_case(s))
}

/// Non-empty SQL-fenced blocks in order of appearance
fn fenced_sql_blocks(raw: &str) -> Vec<String> {
    FENCED_BLOCK
        .captures_iter(raw)
        .filter(|caps| is_sql_info(&caps[1]))
        .map(|caps| block_body(&caps[1], &caps[2]).to_string())
        .filter(|body| !body.trim().is_empty())
        .collect()
}

fn extract_sql(raw: &str) -> Option<String> {
    if let Some(first) = fenced_sql_blocks(raw).into_iter().next() {
        return Some(first);
    }
    unfenced_sql(raw)
}

/// First run of lines starting with a SQL keyword, up to the next blank line
fn unfenced_sql(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.iter().position(|line| {
        let first = line
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("");
        SQL_LEADING_WORDS
            .iter()
            .any(|w| first.eq_ignore_ascii_case(w))
    })?;

    let body: Vec<&str> = lines[start..]
        .iter()
        .take_while(|line| !line.trim().is_empty())
        .copied()
        .collect();
    let sql = body.join("\n").trim().to_string();
    if sql.is_empty() {
        None
    } else {
        Some(sql)
    }
}

/// Match a section header line such as `EXPLANATION:`, `**Tables used:**` or
/// `2. EXPLANATION: ...`, returning the header and the text after the colon.
fn header_of(line: &str) -> Option<(&'static str, String)> {
    let trimmed = line
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '#' || c == '*')
        .trim_start();
    let upper = trimmed.to_ascii_uppercase();

    SECTION_HEADERS.iter().find_map(|header| {
        let rest = upper.strip_prefix(header)?;
        let rest = rest.trim_start_matches('*');
        let rest = rest.strip_prefix(':')?;
        // same byte offsets in `trimmed`; ASCII uppercasing keeps lengths
        let offset = trimmed.len() - rest.len();
        let tail = trimmed[offset..].trim_start_matches('*').trim().to_string();
        Some((*header, tail))
    })
}

/// Text of the named section, outside fenced blocks, up to the next known header
fn section(raw: &str, wanted: &str) -> Option<String> {
    let without_code = FENCED_BLOCK.replace_all(raw, "");
    let mut collected: Option<Vec<String>> = None;

    for line in without_code.lines() {
        if let Some((header, tail)) = header_of(line) {
            if collected.is_some() {
                break;
            }
            if header == wanted {
                collected = Some(if tail.is_empty() { Vec::new() } else { vec![tail] });
            }
            continue;
        }
        if let Some(lines) = collected.as_mut() {
            lines.push(line.to_string());
        }
    }

    let text = collected?.join("\n").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn split_table_list(text: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for item in text.split(|c| c == '\n' || c == ',') {
        let name = item
            .trim()
            .trim_start_matches(|c| c == '-' || c == '*' || c == '•')
            .trim()
            .trim_matches('`')
            .trim();
        if name.is_empty() || name.starts_with('[') {
            continue;
        }
        if !tables.iter().any(|t| t == name) {
            tables.push(name.to_string());
        }
    }
    tables
}
