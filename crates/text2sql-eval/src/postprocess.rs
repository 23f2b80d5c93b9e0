use once_cell::sync::OnceCell;
use regex::Regex;
use text2sql_contracts::SQL_PROMPT_MARKER;

static SQL_START: OnceCell<Regex> = OnceCell::new();

fn sql_start() -> Option<&'static Regex> {
    SQL_START
        .get_or_try_init(|| Regex::new(r"(?i)\b(?:SELECT|INSERT|UPDATE|DELETE|WITH)\b"))
        .ok()
}

/// Pulls the SQL statement out of raw model output.
///
/// Keeps the text after the last `# SQL:` marker, drops an opening markdown fence, starts at the
/// first SQL keyword and stops at a closing fence. Applying it twice gives the same text as
/// applying it once, and bare SQL passes through unchanged apart from surrounding whitespace.
pub fn extract_sql(output: &str) -> String {
    let mut text = match output.rfind(SQL_PROMPT_MARKER) {
        Some(pos) => &output[pos + SQL_PROMPT_MARKER.len()..],
        None => output,
    }
    .trim();

    if text.starts_with("```") {
        text = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    }
    if let Some(m) = sql_start().and_then(|re| re.find(text)) {
        text = &text[m.start()..];
    }
    if let Some(end) = text.find("```") {
        text = &text[..end];
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_sql_is_unchanged() {
        assert_eq!(extract_sql("SELECT id FROM t"), "SELECT id FROM t");
        assert_eq!(extract_sql("  select 1;\n"), "select 1;");
    }

    #[test]
    fn chatter_and_fences_are_removed() {
        let raw = "Sure! Here is the query:\n```sql\nSELECT name FROM users WHERE id = 3;\n```\nHope it helps.";
        assert_eq!(extract_sql(raw), "SELECT name FROM users WHERE id = 3;");
    }

    #[test]
    fn echoed_prompt_keeps_the_last_answer() {
        let raw = "# Question: how many?\n# SQL: SELECT 1\n# SQL: WITH x AS (SELECT 2) SELECT * FROM x";
        assert_eq!(extract_sql(raw), "WITH x AS (SELECT 2) SELECT * FROM x");
    }

    #[test]
    fn keywords_inside_words_do_not_count() {
        assert_eq!(
            extract_sql("The selection:\nSELECT deleted FROM t"),
            "SELECT deleted FROM t"
        );
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "SELECT 1",
            "```\nno sql here\n```",
            "answer:\n```sql\nupdate t set a = 1\n```",
            "# SQL: ```sql\nSELECT 2\n``` trailing",
            "",
            "```",
        ];
        for raw in inputs {
            let once = extract_sql(raw);
            assert_eq!(extract_sql(&once), once, "input {raw:?}");
        }
    }
}
