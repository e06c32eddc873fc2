//! Query synthesis and result judgement through the inference backend.
//!
//! [`Generator::generate_query`] turns a question plus context into a single
//! SQL statement; [`Generator::verify_result`] asks the model whether an
//! executed result answers the question. Response parsing lives in
//! [`ResponseParser`] so it can be exercised without a model.

use std::sync::Arc;

use anyhow::Context as _;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
use crate::error::{ConversionError, Result};
use crate::inference::{GenerateRequest, InferenceBackend};
use crate::models::{OutputFormat, QueryResult, Verdict};
use crate::render::render_to_string;

const GENERATION_SYSTEM_PROMPT: &str = r#"You are an expert SQL query generator for SQLite. Convert natural language questions into precise, correct SQL queries.

CRITICAL RULES:
1. ONLY output the SQL query - no explanations, no markdown, no code blocks
2. Analyze the database schema, sample data and date ranges carefully
3. Match column names and table names EXACTLY as shown in the schema
4. Always end queries with a semicolon

RAW DATA vs AGGREGATION:
- "total", "sum", "average", "avg", "count", "how many", "per", "for each", "breakdown" mean aggregation with SUM/AVG/COUNT and GROUP BY
  Example: "total south sales" -> SELECT SUM(amount) FROM sales WHERE LOWER(region) = 'south';
- "[value] sales", "[value] data", "show me", "list" without aggregation words mean raw rows with a WHERE filter
  Example: "south sales" -> SELECT * FROM sales WHERE LOWER(region) = 'south';
- "X and Y sales" or "X or Y" mean WHERE column IN ('X', 'Y')

DATES (SQLite):
- Use strftime('%Y', date), strftime('%m', date) and date('now', '-N days')
- "January sales" without a year includes every January: strftime('%m', date) = '01'
- "January 2025" filters that exact year and month: strftime('%Y-%m', date) = '2025-01'
- Check AVAILABLE YEARS and DATE RANGE in the context before filtering by period

SPECIAL PATTERNS:
- "all [items]" -> SELECT * with no LIMIT
- "top N" or "best" -> ORDER BY ... DESC LIMIT N"#;

const VERIFICATION_SYSTEM_PROMPT: &str = "You are a SQL verification expert. Analyze query results strictly and precisely. Check if the data returned actually answers the user's question correctly.";

/// Sampling options for completion calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens per completion
    pub num_predict: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from(&InferenceConfig::default())
    }
}

impl From<&InferenceConfig> for GenerationOptions {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            temperature: config.temperature,
            num_predict: config.num_predict,
        }
    }
}

/// Reduces raw model output to a statement or a verdict
#[derive(Debug)]
pub struct ResponseParser {
    sql_fence: Regex,
    any_fence: Regex,
    statement: Regex,
    leading_keyword: Regex,
    select_word: Regex,
    reason: Regex,
    fix: Regex,
}

impl ResponseParser {
    const PREFIXES: [&'static str; 5] = ["SQL:", "Query:", "Answer:", "Here is", "The SQL query"];

    /// Compile the parsing patterns
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            sql_fence: Regex::new(r"(?is)```sql\s*(.*?)\s*```").context("sql fence pattern")?,
            any_fence: Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)\s*```").context("fence pattern")?,
            statement: Regex::new(r"(?is)\b((?:WITH|SELECT)\s+.*?;)").context("statement pattern")?,
            leading_keyword: Regex::new(r"^(?i)(?:SELECT|WITH)\b").context("leading keyword pattern")?,
            select_word: Regex::new(r"(?i)\bSELECT\b").context("select pattern")?,
            reason: Regex::new(r"(?is)REASON:\s*(.+?)(?:FIX:|$)").context("reason pattern")?,
            fix: Regex::new(r"(?is)FIX:\s*(.+?)$").context("fix pattern")?,
        })
    }

    /// Extract a single statement from a completion.
    ///
    /// Strips code fences and explanatory prefixes, cuts trailing prose after
    /// the first `;`, and rejects anything that does not start with the
    /// word `SELECT` or `WITH` or is shorter than 10 characters.
    #[must_use]
    pub fn extract_sql(&self, response: &str) -> Option<String> {
        let mut text = response.trim().to_string();

        let fenced = self
            .sql_fence
            .captures(&text)
            .or_else(|| self.any_fence.captures(&text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());
        if let Some(inner) = fenced {
            text = inner;
        }

        for prefix in Self::PREFIXES {
            let matches_prefix = text
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matches_prefix {
                text = text[prefix.len()..].trim().to_string();
            }
        }

        if self.leading_keyword.is_match(&text) {
            if let Some(end) = text.find(';') {
                text.truncate(end + 1);
            }
        } else if let Some(statement) = self.statement.captures(&text).and_then(|c| c.get(1)) {
            text = statement.as_str().to_string();
        } else if let Some(start) = self.select_word.find(&text).map(|m| m.start()) {
            text = text[start..].to_string();
            if let Some(end) = text.find(';') {
                text.truncate(end + 1);
            }
        } else {
            return None;
        }

        let mut sql = text.trim().to_string();
        if !sql.ends_with(';') {
            sql.push(';');
        }

        if sql.len() < 10 {
            return None;
        }
        Some(sql)
    }

    /// Parse the `CORRECT:` / `REASON:` / `FIX:` verdict format
    #[must_use]
    pub fn parse_verdict(&self, response: &str) -> Verdict {
        let upper = response.to_uppercase();
        let is_correct = !(upper.contains("CORRECT: NO")
            || upper.contains("CORRECT:NO")
            || (upper.contains("INCORRECT") && !upper.contains("CORRECT: YES")));

        let reason = self
            .reason
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "No reason given by verifier".to_string());

        let suggested_fix = self
            .fix
            .captures(response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|f| !f.is_empty() && !matches!(f.to_lowercase().as_str(), "none" | "n/a" | "-"));

        Verdict {
            is_correct,
            reason,
            suggested_fix,
        }
    }
}

/// Candidate synthesis and result judgement
pub struct Generator {
    backend: Arc<dyn InferenceBackend>,
    options: GenerationOptions,
    parser: ResponseParser,
}

impl Generator {
    /// Wrap an inference backend
    pub fn new(backend: Arc<dyn InferenceBackend>, options: GenerationOptions) -> anyhow::Result<Self> {
        Ok(Self {
            backend,
            options,
            parser: ResponseParser::new()?,
        })
    }

    /// Whether the backend passed its capability probe
    pub fn is_enabled(&self) -> bool {
        self.backend.is_available()
    }

    /// Generate a candidate statement for a question
    pub fn generate_query(&self, question: &str, context: &str) -> Result<String> {
        if !self.is_enabled() {
            return Err(ConversionError::GenerationUnavailable(
                "inference backend is not available".to_string(),
            ));
        }

        let prompt = format!(
            "DATABASE CONTEXT:\n{context}\n\n\
             USER QUESTION: {question}\n\n\
             Generate the SQL query that precisely answers this question. Consider:\n\
             1. What data does the user want to see?\n\
             2. Should it be filtered? By what criteria?\n\
             3. For DATE queries: check the AVAILABLE YEARS and DATE RANGE above\n\
             4. Should it be aggregated? How?\n\
             5. Should it be sorted or limited?\n\n\
             SQL QUERY:"
        );

        let response = self.backend.generate(&GenerateRequest {
            system: Some(GENERATION_SYSTEM_PROMPT.to_string()),
            prompt,
            temperature: self.options.temperature,
            num_predict: self.options.num_predict,
        })?;

        if response.trim().is_empty() {
            return Err(ConversionError::GenerationUnavailable("empty completion".to_string()));
        }

        match self.parser.extract_sql(&response) {
            Some(sql) => {
                info!(sql = %sql.chars().take(100).collect::<String>(), "Generated SQL");
                Ok(sql)
            }
            None => {
                warn!(response = %response.chars().take(200).collect::<String>(), "Could not extract SQL");
                Err(ConversionError::ExtractionFailure(
                    "response did not contain a SELECT or WITH statement".to_string(),
                ))
            }
        }
    }

    /// Judge whether an executed result answers the question.
    ///
    /// Never fails: when the judge cannot be reached the verdict is an
    /// optimistic pass whose reason says verification was unavailable.
    pub fn verify_result(
        &self,
        question: &str,
        sql: &str,
        result: &QueryResult,
        context: &str,
        expected_stats: &str,
    ) -> Verdict {
        if !self.is_enabled() {
            return Verdict::unavailable("Verification unavailable: inference backend is not available");
        }

        let result_summary = if result.is_empty() {
            "EMPTY RESULT (0 rows returned)".to_string()
        } else {
            let table = render_to_string(result, OutputFormat::Txt).unwrap_or_default();
            format!(
                "RESULT STATISTICS:\n- Total rows returned: {}\n- Columns: {}\n\nCOMPLETE RESULT DATA:\n{table}",
                result.row_count(),
                result.columns.join(", ")
            )
        };

        let expected = if expected_stats.trim().is_empty() {
            String::new()
        } else {
            format!("\nEXPECTED DATA INFO:\n{expected_stats}")
        };

        let prompt = format!(
            "VERIFICATION TASK: Determine if this SQL query and result correctly answer the user's question.\n\n\
             USER QUESTION: {question}\n\n\
             GENERATED SQL:\n{sql}\n\n\
             {result_summary}\n{expected}\n\n\
             DATABASE CONTEXT (for reference):\n{context}\n\n\
             VERIFICATION CHECKLIST:\n\
             1. Does the SQL query correctly interpret the user's question?\n\
             2. If user asked for \"all\" data, are ALL rows returned (no LIMIT)?\n\
             3. If filtering by a value (e.g., region, product), is ONLY that value in results?\n\
             4. Are the correct columns selected for the question asked?\n\
             5. Is aggregation correct if the question implies totals/averages/counts?\n\
             6. Does the number of rows returned make logical sense?\n\
             7. Look at the actual data - does it match what the question asks for?\n\n\
             BE STRICT: If there's ANY mismatch between question intent and result, mark as INCORRECT.\n\n\
             RESPOND IN EXACTLY THIS FORMAT:\n\
             CORRECT: YES or NO\n\
             REASON: [One sentence explanation]\n\
             FIX: [If incorrect, what SQL change is needed - be specific]"
        );

        let response = match self.backend.generate(&GenerateRequest {
            system: Some(VERIFICATION_SYSTEM_PROMPT.to_string()),
            prompt,
            temperature: self.options.temperature,
            num_predict: self.options.num_predict,
        }) {
            Ok(response) if !response.trim().is_empty() => response,
            Ok(_) => return Verdict::unavailable("Verification unavailable: empty response"),
            Err(e) => {
                let unavailable = ConversionError::VerificationUnavailable(e.to_string());
                warn!(error = %unavailable, "Treating result as correct");
                return Verdict::unavailable(unavailable.to_string());
            }
        };

        let verdict = self.parser.parse_verdict(&response);
        debug!(is_correct = verdict.is_correct, reason = %verdict.reason, "Verification parsed");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ResponseParser {
        ResponseParser::new().unwrap()
    }

    #[test]
    fn test_extract_from_sql_fence() {
        let response = "Here you go:\n```sql\nSELECT * FROM sales WHERE region = 'North';\n```\nThis lists northern sales.";
        assert_eq!(
            parser().extract_sql(response).as_deref(),
            Some("SELECT * FROM sales WHERE region = 'North';")
        );
    }

    #[test]
    fn test_extract_strips_prefix_and_trailing_prose() {
        let response = "SQL: SELECT SUM(amount) FROM sales; -- total of all rows";
        assert_eq!(parser().extract_sql(response).as_deref(), Some("SELECT SUM(amount) FROM sales;"));
    }

    #[test]
    fn test_extract_finds_statement_inside_prose() {
        let response = "To answer this, run select product from sales; and read the rows.";
        assert_eq!(parser().extract_sql(response).as_deref(), Some("select product from sales;"));
    }

    #[test]
    fn test_extract_appends_semicolon_and_rejects_junk() {
        assert_eq!(
            parser().extract_sql("SELECT COUNT(*) FROM sales").as_deref(),
            Some("SELECT COUNT(*) FROM sales;")
        );
        assert_eq!(parser().extract_sql("I cannot help with that."), None);
        assert_eq!(parser().extract_sql("SELECT 1"), None);
    }

    #[test]
    fn test_extract_ignores_words_that_only_start_like_keywords() {
        assert_eq!(
            parser().extract_sql("Selecting every row is enough: SELECT * FROM sales;").as_deref(),
            Some("SELECT * FROM sales;")
        );
        assert_eq!(
            parser().extract_sql("Without a filter you get everything: SELECT * FROM sales;").as_deref(),
            Some("SELECT * FROM sales;")
        );
        assert_eq!(parser().extract_sql("Withdrawn orders are not stored in this table"), None);
        assert_eq!(parser().extract_sql("Selecting from sales is not possible here"), None);
    }

    #[test]
    fn test_parse_incorrect_verdict() {
        let verdict = parser().parse_verdict(
            "CORRECT: NO\nREASON: The query returns every region.\nFIX: Add WHERE LOWER(region) = 'north'",
        );
        assert!(!verdict.is_correct);
        assert_eq!(verdict.reason, "The query returns every region.");
        assert_eq!(verdict.suggested_fix.as_deref(), Some("Add WHERE LOWER(region) = 'north'"));
    }

    #[test]
    fn test_parse_correct_verdict() {
        let verdict = parser().parse_verdict("CORRECT: YES\nREASON: Matches the question.\nFIX: None");
        assert!(verdict.is_correct);
        assert_eq!(verdict.suggested_fix, None);
    }

    #[test]
    fn test_parse_bare_incorrect() {
        assert!(!parser().parse_verdict("This result is INCORRECT.").is_correct);
    }
}
