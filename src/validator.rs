//! Query Safety Validation
//!
//! Inspects a candidate SQL string (usually LLM output) and reports a verdict:
//! - structural corruption (unbalanced parentheses / quotes) and destructive leading
//!   keywords are errors and make the statement invalid
//! - unqualified DELETE/UPDATE, injection patterns, unknown schema references and grammar
//!   problems are warnings only
//!
//! The validator never executes anything and never consults the network; it is a pure
//! function of the SQL text, the optional schema snapshot and its own settings.

use crate::config::DatabaseKind;
use crate::schema::SchemaSnapshot;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref TABLE_REF: Regex = Regex::new(
        r#"(?i)\b(?:from|join|into|update)\s+((?:[a-z_][\w$]*|`[^`]+`|"[^"]+")(?:\s*\.\s*(?:[a-z_][\w$]*|`[^`]+`|"[^"]+"))?)"#
    )
    .expect("static regex");
    static ref ALIAS: Regex =
        Regex::new(r"(?i)^\s+(?:as\s+)?([a-z_][\w$]*)").expect("static regex");
    static ref CTE_NAME: Regex =
        Regex::new(r"(?i)(?:\bwith\s+(?:recursive\s+)?|,\s*)([a-z_]\w*)\s+as\s*\(").expect("static regex");
    static ref DERIVED_ALIAS: Regex =
        Regex::new(r"(?i)\)\s+(?:as\s+)?([a-z_]\w*)").expect("static regex");
    static ref QUALIFIED_COLUMN: Regex =
        Regex::new(r"(?i)\b([a-z_]\w*)\.([a-z_]\w*)\b(\s*\()?").expect("static regex");
    static ref TAUTOLOGY: Regex =
        Regex::new(r"(?i)\bor\s+('[^']*'|\d+)\s*=\s*('[^']*'|\d+)").expect("static regex");
    static ref OR_TRUE: Regex = Regex::new(r"(?i)\bor\s+true\b").expect("static regex");
    static ref DELAY_OR_EXEC: Regex = Regex::new(
        r"(?i)\b(sleep|pg_sleep|benchmark|exec|execute|xp_cmdshell)\s*\(|\bwaitfor\s+delay\b"
    )
    .expect("static regex");
    static ref CTE_WRITE: Regex = Regex::new(
        r"(?i)\bas\s*(?:(?:not\s+)?materialized\s*)?\(\s*(delete|update)\b"
    )
    .expect("static regex");
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").expect("static regex");
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").expect("static regex");
}

/// Leading keywords that always make a statement invalid
const DESTRUCTIVE_KEYWORDS: &[&str] = &["DROP", "TRUNCATE", "ALTER"];

/// Statements `EXPLAIN` / `DESCRIBE` can wrap
const EXPLAINABLE: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "REPLACE", "MERGE", "WITH", "VALUES", "TABLE",
    "CREATE", "EXECUTE", "DECLARE",
];

/// Leading keywords that change privileges; destructive but advisory
const PRIVILEGE_KEYWORDS: &[&str] = &["GRANT", "REVOKE"];

const KNOWN_VERBS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "WITH", "CREATE", "ALTER", "DROP", "TRUNCATE",
    "REPLACE", "MERGE", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "GRANT", "REVOKE", "VALUES",
    "CALL", "SET", "USE",
];

/// Schemas whose tables never appear in an application snapshot
const SYSTEM_SCHEMAS: &[&str] = &[
    "information_schema",
    "pg_catalog",
    "mysql",
    "sys",
    "performance_schema",
];

/// Words that can follow a table name but are not aliases
const NOT_AN_ALIAS: &[&str] = &[
    "where", "on", "using", "join", "inner", "left", "right", "full", "outer", "cross",
    "natural", "group", "order", "having", "limit", "offset", "union", "intersect", "except",
    "set", "values", "select", "as", "for", "window", "returning", "partition", "straight_join",
    "default", "lateral", "from",
];

/// Immutable result of validating one statement.
///
/// Only [`SafetyValidator::validate`] builds a verdict. It serializes for reporting but
/// cannot be read back, so a verdict can never be forged from JSON:
///
/// ```compile_fail
/// let forged: sqlbuddy::ValidationVerdict =
///     serde_json::from_str(r#"{"is_valid":true,"is_destructive":false,"errors":[],"warnings":[]}"#)
///         .unwrap();
/// ```
///
/// Nor from a struct literal outside this module:
///
/// ```compile_fail
/// let forged = sqlbuddy::ValidationVerdict {
///     statement: "DROP TABLE users".to_string(),
///     is_valid: true,
///     is_destructive: false,
///     errors: vec![],
///     warnings: vec![],
///     destructive_reasons: vec![],
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    #[serde(skip_serializing)]
    statement: String,
    is_valid: bool,
    is_destructive: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    #[serde(skip_serializing)]
    destructive_reasons: Vec<String>,
}

impl ValidationVerdict {
    /// The exact SQL text this verdict was computed for
    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_destructive(&self) -> bool {
        self.is_destructive
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The findings (errors or warnings) that set `is_destructive`
    pub fn destructive_reasons(&self) -> &[String] {
        &self.destructive_reasons
    }
}

/// Accumulates findings while the checks run; frozen into a verdict at the end
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
    destructive_reasons: Vec<String>,
}

impl Findings {
    fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            destructive_reasons: Vec::new(),
        }
    }

    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn destructive_error(&mut self, message: String) {
        self.destructive_reasons.push(message.clone());
        self.errors.push(message);
    }

    fn destructive_warning(&mut self, message: String) {
        self.destructive_reasons.push(message.clone());
        self.warn(message);
    }

    fn into_verdict(self, statement: &str) -> ValidationVerdict {
        ValidationVerdict {
            statement: statement.to_string(),
            is_valid: self.errors.is_empty(),
            is_destructive: !self.destructive_reasons.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            destructive_reasons: self.destructive_reasons,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SafetyValidator {
    grammar: Option<DatabaseKind>,
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also run an advisory grammar check with the dialect of `kind`.
    /// Grammar failures are reported as warnings and never invalidate a statement.
    pub fn with_grammar_check(mut self, kind: DatabaseKind) -> Self {
        self.grammar = Some(kind);
        self
    }

    /// Validate `sql`, optionally against a schema snapshot.
    pub fn validate(&self, sql: &str, schema: Option<&SchemaSnapshot>) -> ValidationVerdict {
        let mut findings = Findings::new();

        if sql.trim().is_empty() {
            findings.errors.push("Query is empty".to_string());
            return findings.into_verdict(sql);
        }

        let scan = scan(sql);
        let statements = split_statements(&scan.keywords);

        check_balance(sql, &mut findings);
        check_destructive_keywords(&statements, &mut findings);
        check_unqualified_writes(&statements, &mut findings);
        check_injection_patterns(sql, &scan, &statements, &mut findings);

        if let Some(schema) = schema.filter(|s| !s.is_empty()) {
            check_schema_references(&scan.code, schema, &mut findings);
        }

        if !statements.iter().any(|s| {
            statement_verb(s.code)
                .map(|verb| KNOWN_VERBS.contains(&verb.as_str()))
                .unwrap_or(false)
        }) {
            findings.warn("No recognised SQL command found".to_string());
        }

        if let Some(kind) = self.grammar {
            if findings.errors.is_empty() {
                check_grammar(sql, kind, &mut findings);
            }
        }

        findings.into_verdict(sql)
    }
}

/// Step 1: raw character balance
fn check_balance(sql: &str, findings: &mut Findings) {
    let open = sql.matches('(').count();
    let close = sql.matches(')').count();
    if open != close {
        findings.errors.push(format!(
            "Unbalanced parentheses: {} '(' vs {} ')'",
            open, close
        ));
    }

    let single = sql.matches('\'').count();
    if single % 2 != 0 {
        findings.errors.push(format!(
            "Unbalanced single quotes: {} ' characters",
            single
        ));
    }

    let double = sql.matches('"').count();
    if double % 2 != 0 {
        findings.errors.push(format!(
            "Unbalanced double quotes: {} \" characters",
            double
        ));
    }
}

/// Step 2: leading keyword of every statement
fn check_destructive_keywords(statements: &[Statement<'_>], findings: &mut Findings) {
    for (idx, stmt) in statements.iter().enumerate() {
        let Some(verb) = statement_verb(stmt.code) else {
            continue;
        };
        if DESTRUCTIVE_KEYWORDS.contains(&verb.as_str()) {
            findings.destructive_error(format!(
                "Destructive operation detected: {} (statement {})",
                verb,
                idx + 1
            ));
        } else if PRIVILEGE_KEYWORDS.contains(&verb.as_str()) {
            findings.destructive_warning(format!(
                "Privilege change detected: {} (statement {})",
                verb,
                idx + 1
            ));
        }
    }
}

/// Step 3: DELETE / UPDATE without a top-level WHERE clause
fn check_unqualified_writes(statements: &[Statement<'_>], findings: &mut Findings) {
    for (idx, stmt) in statements.iter().enumerate() {
        let Some(verb) = statement_verb(stmt.code) else {
            continue;
        };
        if (verb == "DELETE" || verb == "UPDATE") && !has_top_level_where(body_of(stmt.code, &verb)) {
            findings.destructive_warning(format!(
                "{} statement without WHERE clause affects all rows (statement {})",
                verb,
                idx + 1
            ));
        }

        for caps in CTE_WRITE.captures_iter(stmt.code) {
            let Some(inner) = caps.get(1) else {
                continue;
            };
            if !has_top_level_where(up_to_group_end(&stmt.code[inner.start()..])) {
                findings.destructive_warning(format!(
                    "{} inside WITH without WHERE clause affects all rows (statement {})",
                    inner.as_str().to_uppercase(),
                    idx + 1
                ));
            }
        }
    }
}

/// Part of a statement from its executed `verb` onwards, so an `EXPLAIN` or `WITH`
/// prefix cannot lend it a WHERE clause
fn body_of<'a>(code: &'a str, verb: &str) -> &'a str {
    words(code)
        .iter()
        .find(|w| w.depth == 0 && w.text.eq_ignore_ascii_case(verb))
        .map(|w| &code[w.start..])
        .unwrap_or(code)
}

/// Step 4: heuristics; never invalidates the statement
fn check_injection_patterns(
    sql: &str,
    scan: &Scan,
    statements: &[Statement<'_>],
    findings: &mut Findings,
) {
    if statements.len() > 1 {
        findings.warn(format!(
            "Stacked statements detected: {} statements separated by ';'",
            statements.len()
        ));
    }
    if scan.line_comments > 0 {
        findings.warn("Line comment '--' detected; comments can truncate a statement".to_string());
    }
    if scan.block_comments > 0 {
        findings.warn("Block comment '/*' detected; comments can hide statement parts".to_string());
    }
    for caps in TAUTOLOGY.captures_iter(sql) {
        if caps[1] == caps[2] {
            findings.warn(format!("Always-true condition detected: {}", &caps[0]));
        }
    }
    if let Some(m) = OR_TRUE.find(&scan.keywords) {
        findings.warn(format!("Always-true condition detected: {}", m.as_str()));
    }
    for caps in DELAY_OR_EXEC.captures_iter(&scan.keywords) {
        findings.warn(format!(
            "Suspicious function or command detected: {}",
            caps[0].trim_end_matches('(').trim()
        ));
    }
}

/// Step 5: best-effort check of table and qualified column references
fn check_schema_references(code: &str, schema: &SchemaSnapshot, findings: &mut Findings) {
    let mut local_names: HashSet<String> = HashSet::new();
    for caps in CTE_NAME.captures_iter(code) {
        local_names.insert(caps[1].to_lowercase());
    }
    for caps in DERIVED_ALIAS.captures_iter(code) {
        local_names.insert(caps[1].to_lowercase());
    }

    let known_columns: HashSet<String> = schema
        .tables()
        .iter()
        .flat_map(|t| t.columns.iter().map(|c| c.name.to_lowercase()))
        .collect();

    // alias (lowercase) -> table name as it appears in the snapshot
    let mut aliases: HashMap<String, String> = HashMap::new();

    for caps in TABLE_REF.captures_iter(code) {
        let reference = &caps[1];
        let parts: Vec<&str> = reference.split('.').map(|p| p.trim()).collect();
        let name = strip_identifier_quotes(parts.last().copied().unwrap_or(reference));
        let qualifier = if parts.len() > 1 {
            Some(strip_identifier_quotes(parts[0]).to_lowercase())
        } else {
            None
        };

        if qualifier
            .as_deref()
            .map(|q| SYSTEM_SCHEMAS.contains(&q))
            .unwrap_or(false)
        {
            continue;
        }

        match schema.table(name) {
            Some(table) => {
                aliases.insert(table.name.to_lowercase(), table.name.clone());
                if let Some(alias) = alias_after(code, caps.get(0).map(|m| m.end()).unwrap_or(0)) {
                    aliases.insert(alias, table.name.clone());
                }
            }
            None => {
                let lowered = name.to_lowercase();
                // EXTRACT(YEAR FROM col), ON DUPLICATE KEY UPDATE col = ... look like table
                // references but name columns
                if !local_names.contains(&lowered) && !known_columns.contains(&lowered) {
                    findings.warn(format!("Unknown table referenced: {}", name));
                }
            }
        }
    }

    for caps in QUALIFIED_COLUMN.captures_iter(code) {
        if caps.get(3).is_some() {
            // schema-qualified function call
            continue;
        }
        let qualifier = caps[1].to_lowercase();
        let column = &caps[2];
        let Some(table_name) = aliases.get(&qualifier) else {
            continue;
        };
        if let Some(table) = schema.table(table_name) {
            if table.column(column).is_none() && schema.table(column).is_none() {
                findings.warn(format!(
                    "Unknown column referenced: {}.{}",
                    table.name, column
                ));
            }
        }
    }
}

fn check_grammar(sql: &str, kind: DatabaseKind, findings: &mut Findings) {
    let dialect: Box<dyn Dialect> = match kind {
        DatabaseKind::MySql => Box::new(MySqlDialect {}),
        DatabaseKind::Postgres => Box::new(PostgreSqlDialect {}),
    };
    if let Err(e) = Parser::parse_sql(dialect.as_ref(), sql) {
        findings.warn(format!("{} grammar check failed: {}", kind, e));
    }
}

/// Alias following a table reference that ends at byte `end`, lowercased
fn alias_after(code: &str, end: usize) -> Option<String> {
    let caps = ALIAS.captures(code.get(end..)?)?;
    let alias = caps[1].to_lowercase();
    if NOT_AN_ALIAS.contains(&alias.as_str()) {
        None
    } else {
        Some(alias)
    }
}

fn strip_identifier_quotes(identifier: &str) -> &str {
    identifier.trim_matches(|c| c == '`' || c == '"')
}

/// Result of scanning a statement once
struct Scan {
    /// Same byte length as the input; string-literal contents and comments are blanked
    code: String,
    /// `code` with the contents of quoted identifiers blanked as well
    keywords: String,
    line_comments: usize,
    block_comments: usize,
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Code,
    Literal,
    QuotedIdent(char),
    LineComment,
    BlockComment,
}

fn push_blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}

fn scan(sql: &str) -> Scan {
    let chars: Vec<char> = sql.chars().collect();
    let mut code = String::with_capacity(sql.len());
    let mut keywords = String::with_capacity(sql.len());
    let mut line_comments = 0;
    let mut block_comments = 0;
    let mut state = ScanState::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let mark = code.len();
        let mut consumed = 1;
        let mut hidden = false;

        match state {
            ScanState::Code => match c {
                '\'' => {
                    state = ScanState::Literal;
                    code.push(c);
                }
                '"' | '`' => {
                    state = ScanState::QuotedIdent(c);
                    code.push(c);
                }
                '-' if next == Some('-') => {
                    state = ScanState::LineComment;
                    line_comments += 1;
                    code.push_str("  ");
                    consumed = 2;
                }
                '/' if next == Some('*') => {
                    state = ScanState::BlockComment;
                    block_comments += 1;
                    code.push_str("  ");
                    consumed = 2;
                }
                _ => code.push(c),
            },
            ScanState::Literal => match c {
                '\'' if next == Some('\'') => {
                    code.push_str("  ");
                    consumed = 2;
                }
                '\'' => {
                    state = ScanState::Code;
                    code.push(c);
                }
                '\\' => {
                    code.push(' ');
                    if let Some(escaped) = next {
                        push_blank(&mut code, escaped);
                        consumed = 2;
                    }
                }
                _ => push_blank(&mut code, c),
            },
            ScanState::QuotedIdent(quote) => {
                if c == quote {
                    state = ScanState::Code;
                } else {
                    hidden = true;
                }
                code.push(c);
            }
            ScanState::LineComment => {
                if c == '\n' {
                    state = ScanState::Code;
                    code.push(c);
                } else {
                    push_blank(&mut code, c);
                }
            }
            ScanState::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = ScanState::Code;
                    code.push_str("  ");
                    consumed = 2;
                } else {
                    push_blank(&mut code, c);
                }
            }
        }

        if hidden {
            push_blank(&mut keywords, c);
        } else {
            keywords.push_str(&code[mark..]);
        }
        i += consumed;
    }

    Scan {
        code,
        keywords,
        line_comments,
        block_comments,
    }
}

/// One `;`-separated statement of scanned code
struct Statement<'a> {
    code: &'a str,
}

/// Split on `;` outside literals and comments, dropping empty statements.
fn split_statements(code: &str) -> Vec<Statement<'_>> {
    code.split(';')
        .filter(|part| !part.trim().is_empty())
        .map(|part| Statement { code: part })
        .collect()
}

struct Word<'a> {
    text: &'a str,
    /// Byte offset in the scanned code
    start: usize,
    depth: i32,
}

/// Identifier-like words with their parenthesis depth
fn words(code: &str) -> Vec<Word<'_>> {
    let mut out = Vec::new();
    let mut depth = 0;
    let mut start: Option<usize> = None;

    for (i, ch) in code.char_indices() {
        if ch.is_alphanumeric() || ch == '_' {
            if start.is_none() {
                start = Some(i);
            }
            continue;
        }
        if let Some(s) = start.take() {
            out.push(Word {
                text: &code[s..i],
                start: s,
                depth,
            });
        }
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(Word {
            text: &code[s..],
            start: s,
            depth,
        });
    }
    out
}

/// Uppercased command of a statement. `EXPLAIN` / `DESCRIBE` wrapping another statement
/// report the wrapped command; for `WITH ...` the first top-level DML verb after the
/// common table expressions is returned.
fn statement_verb(code: &str) -> Option<String> {
    let words = words(code);
    let mut verb = words.first()?.text.to_uppercase();
    let mut rest = &words[1..];

    if matches!(verb.as_str(), "EXPLAIN" | "DESCRIBE" | "DESC") {
        let wrapped = rest.iter().position(|w| {
            w.depth == 0 && EXPLAINABLE.contains(&w.text.to_uppercase().as_str())
        });
        if let Some(pos) = wrapped {
            verb = rest[pos].text.to_uppercase();
            rest = &rest[pos + 1..];
        }
    }

    if verb != "WITH" {
        return Some(verb);
    }
    rest.iter()
        .filter(|w| w.depth == 0)
        .map(|w| w.text.to_uppercase())
        .find(|w| matches!(w.as_str(), "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "MERGE"))
        .or(Some(verb))
}

fn has_top_level_where(code: &str) -> bool {
    words(code)
        .iter()
        .any(|w| w.depth == 0 && w.text.eq_ignore_ascii_case("WHERE"))
}

/// Prefix of `code` up to the `)` closing the group it starts in
fn up_to_group_end(code: &str) -> &str {
    let mut depth = 0;
    for (i, ch) in code.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' if depth == 0 => return &code[..i],
            ')' => depth -= 1,
            _ => {}
        }
    }
    code
}

/// How the first statement of a SQL string reads once comments, literals and quoted
/// identifiers are set aside
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandShape {
    /// First keyword as written (`EXPLAIN`, `WITH`, `SELECT`, ...)
    pub leading: String,
    /// Command that actually runs
    pub verb: String,
    /// A top-level `RETURNING` clause is present
    pub returning: bool,
}

pub(crate) fn command_shape(sql: &str) -> Option<CommandShape> {
    let scan = scan(sql);
    let statements = split_statements(&scan.keywords);
    let code = statements.first()?.code;
    let words = words(code);
    let leading = words.first()?.text.to_uppercase();
    let returning = words
        .iter()
        .any(|w| w.depth == 0 && w.text.eq_ignore_ascii_case("RETURNING"));
    Some(CommandShape {
        leading,
        verb: statement_verb(code)?,
        returning,
    })
}

/// Strip comments, collapse whitespace and drop a trailing `;`.
pub fn sanitize_query(sql: &str) -> String {
    let without_block = BLOCK_COMMENT.replace_all(sql, " ");
    let without_line = LINE_COMMENT.replace_all(&without_block, " ");
    let collapsed = without_line.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').trim().to_string()
}

/// Table names referenced after FROM / JOIN / INTO / UPDATE, in order of first appearance.
pub fn extract_tables(sql: &str) -> Vec<String> {
    let code = scan(sql).code;
    let mut seen = HashSet::new();
    let mut tables = Vec::new();
    for caps in TABLE_REF.captures_iter(&code) {
        let reference = &caps[1];
        let name = strip_identifier_quotes(reference.rsplit('.').next().unwrap_or(reference).trim());
        if seen.insert(name.to_lowercase()) {
            tables.push(name.to_string());
        }
    }
    tables
}
