//! Questions file written by the tool when it needs the operator
//!
//! Each question is a block:
//!
//! ```text
//! ### Question 1: Database
//! Which database should the service use?
//!
//! **Your Answer:** _____
//! ```
//!
//! A block ends at the next question heading, a `---` rule, or end of file.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Default file name, relative to the project root
pub const QUESTIONS_FILE: &str = "Questions_For_You.md";

/// Content written when the questions file is reset
pub const FRESH_TEMPLATE: &str =
    "# Questions For You\n\n_No questions yet. Claude will write questions here if clarification is needed._\n";

/// Answer recorded when the operator skips
pub const SKIPPED_ANSWER: &str = "(Skipped - Claude will decide)";

const ANSWER_MARKER: &str = "**Your Answer:**";

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^### Question (\d+):[ \t]*(.*?)[ \t]*\r?$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub number: u32,
    pub topic: String,
    pub question: String,
    /// Empty when unanswered
    pub answer: String,
}

struct Block {
    question: Question,
    /// Byte range of the raw answer text, leading and trailing whitespace excluded
    answer_span: Range<usize>,
}

fn is_placeholder(answer: &str) -> bool {
    answer.is_empty() || answer.chars().all(|c| c == '_')
}

fn blocks(content: &str) -> Vec<Block> {
    let headings: Vec<_> = HEADING_RE.captures_iter(content).collect();
    let mut out = Vec::new();

    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Ok(number)) = (caps.get(0), caps[1].parse::<u32>()) else {
            continue;
        };
        let next_heading = headings
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map_or(content.len(), |m| m.start());
        let body_start = whole.end();
        let end = content[body_start..next_heading]
            .find("\n---")
            .map_or(next_heading, |offset| body_start + offset);
        let body = &content[body_start..end];

        let Some(marker) = body.find(ANSWER_MARKER) else {
            continue;
        };
        let question = body[..marker].trim();
        if question.is_empty() {
            continue;
        }

        let raw_start = body_start + marker + ANSWER_MARKER.len();
        let raw = &content[raw_start..end];
        let answer_span = if raw.trim().is_empty() {
            raw_start..raw_start
        } else {
            let lead = raw.len() - raw.trim_start().len();
            (raw_start + lead)..(raw_start + raw.trim_end().len())
        };
        let answer = content[answer_span.clone()].to_string();

        out.push(Block {
            question: Question {
                number,
                topic: caps[2].trim().to_string(),
                question: question.to_string(),
                answer: if is_placeholder(&answer) { String::new() } else { answer },
            },
            answer_span,
        });
    }
    out
}

/// Every well-formed question in `content`, in file order
pub fn parse(content: &str) -> Vec<Question> {
    blocks(content).into_iter().map(|b| b.question).collect()
}

/// Questions have been written and none of them is answered yet
pub fn has_pending(content: &str) -> bool {
    let questions = parse(content);
    !questions.is_empty() && questions.iter().all(|q| q.answer.is_empty())
}

/// Write `answers` (question number to text) into the matching blocks
///
/// Numbers with no matching question are ignored.
pub fn answer(content: &str, answers: &BTreeMap<u32, String>) -> String {
    rewrite(content, |q| answers.get(&q.number).map(|a| a.trim().to_string()))
}

/// Mark every unanswered question as skipped
pub fn skip(content: &str) -> String {
    rewrite(content, |q| q.answer.is_empty().then(|| SKIPPED_ANSWER.to_string()))
}

fn rewrite(content: &str, mut replacement: impl FnMut(&Question) -> Option<String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for block in blocks(content) {
        let Some(text) = replacement(&block.question) else {
            continue;
        };
        // The marker keeps a single space before the answer
        let marker_end = content[..block.answer_span.start].trim_end().len();
        out.push_str(&content[cursor..marker_end]);
        out.push(' ');
        out.push_str(&text);
        cursor = block.answer_span.end;
    }
    out.push_str(&content[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Questions For You

### Question 1: Database
Which database should the service use?

**Your Answer:** _____

### Question 2: Auth
Should login support SSO?
Keep it simple if unsure.

**Your Answer:**

---

_Answer above, then continue._
";

    #[test]
    fn test_parse_questions() {
        let questions = parse(SAMPLE);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].number, 1);
        assert_eq!(questions[0].topic, "Database");
        assert_eq!(questions[0].question, "Which database should the service use?");
        assert_eq!(questions[0].answer, "");
        assert_eq!(questions[1].question, "Should login support SSO?\nKeep it simple if unsure.");
        assert_eq!(questions[1].answer, "");
        assert!(has_pending(SAMPLE));
    }

    #[test]
    fn test_template_has_no_questions() {
        assert!(parse(FRESH_TEMPLATE).is_empty());
        assert!(!has_pending(FRESH_TEMPLATE));
    }

    #[test]
    fn test_answer_rewrites_only_named_questions() {
        let mut answers = BTreeMap::new();
        answers.insert(2, "Yes, via OIDC".to_string());
        answers.insert(9, "ignored".to_string());
        let updated = answer(SAMPLE, &answers);

        let questions = parse(&updated);
        assert_eq!(questions[0].answer, "");
        assert_eq!(questions[1].answer, "Yes, via OIDC");
        assert!(updated.contains("**Your Answer:** Yes, via OIDC\n\n---"));
        assert!(updated.ends_with("_Answer above, then continue._\n"));
        // One answered question is enough to clear the pending flag
        assert!(!has_pending(&updated));
    }

    #[test]
    fn test_answer_replaces_existing_answer() {
        let mut answers = BTreeMap::new();
        answers.insert(1, "Postgres".to_string());
        let first = answer(SAMPLE, &answers);
        answers.insert(1, "SQLite".to_string());
        let second = answer(&first, &answers);
        assert_eq!(parse(&second)[0].answer, "SQLite");
        assert!(!second.contains("Postgres"));
    }

    #[test]
    fn test_skip_keeps_given_answers() {
        let mut answers = BTreeMap::new();
        answers.insert(1, "Postgres".to_string());
        let skipped = skip(&answer(SAMPLE, &answers));
        let questions = parse(&skipped);
        assert_eq!(questions[0].answer, "Postgres");
        assert_eq!(questions[1].answer, SKIPPED_ANSWER);
    }

    #[test]
    fn test_block_without_answer_marker_is_ignored() {
        assert!(parse("### Question 1: Topic\nNo marker here\n").is_empty());
    }
}
