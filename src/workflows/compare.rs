use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use time::OffsetDateTime;

use crate::aggregate::{average_rating, rated_steps};
use crate::models::*;

const PROMPT_PREVIEW_CHARS: usize = 150;
const RESPONSE_PREVIEW_CHARS: usize = 200;

/// Oldest first. Versions without a readable `created_at` go last, in the
/// order they came.
pub fn sort_versions(versions: &mut [ChainVersion]) {
    versions.sort_by_key(created_order);
}

/// Dropdown badges for versions already in display order: `INITIAL` for the
/// snapshot taken when a trace was first imported, `V1`, `V2`, ... for the rest.
pub fn version_badges(versions: &[ChainVersion]) -> Vec<String> {
    let mut next = 1;
    versions
        .iter()
        .map(|v| {
            if v.version_id.ends_with("_initial") {
                "INITIAL".to_string()
            } else {
                let badge = format!("V{next}");
                next += 1;
                badge
            }
        })
        .collect()
}

fn created_order(version: &ChainVersion) -> (bool, Option<OffsetDateTime>) {
    let created = version.created_at_parsed();
    (created.is_none(), created)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionColumn {
    /// 1-based position after sorting.
    pub number: usize,
    pub version_id: String,
    pub created_at: Option<String>,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepCell {
    pub model: String,
    pub prompt_preview: String,
    pub response_preview: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost: Option<f64>,
    pub latency: Option<f64>,
    pub rating: Option<Rating>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSummary {
    pub number: usize,
    pub total_steps: usize,
    pub rated_steps: usize,
    pub average_rating: Option<f64>,
}

/// Side-by-side view of saved versions: one column per version, one row per
/// step index. `rows[step][column]` is `None` where a version is shorter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonTable {
    pub columns: Vec<VersionColumn>,
    pub rows: Vec<Vec<Option<StepCell>>>,
    pub summaries: Vec<VersionSummary>,
}

impl ComparisonTable {
    pub fn build(versions: &[ChainVersion]) -> Self {
        let mut sorted: Vec<&ChainVersion> = versions.iter().collect();
        sorted.sort_by_key(|v| created_order(v));

        let columns = sorted
            .iter()
            .enumerate()
            .map(|(i, v)| VersionColumn {
                number: i + 1,
                version_id: v.version_id.clone(),
                created_at: v.created_at.clone(),
                tokens_input: v.total_tokens_input.unwrap_or(0),
                tokens_output: v.total_tokens_output.unwrap_or(0),
                cost: v.total_cost.unwrap_or(0.0),
            })
            .collect();

        let max_steps = sorted.iter().map(|v| v.steps.len()).max().unwrap_or(0);
        let rows = (0..max_steps)
            .map(|step| {
                sorted
                    .iter()
                    .map(|v| v.steps.get(step).map(StepCell::from_step))
                    .collect()
            })
            .collect();

        let summaries = sorted
            .iter()
            .enumerate()
            .map(|(i, v)| VersionSummary {
                number: i + 1,
                total_steps: v.steps.len(),
                rated_steps: rated_steps(&v.steps),
                average_rating: average_rating(&v.steps),
            })
            .collect();

        Self { columns, rows, summaries }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        if self.is_empty() {
            return "No versions to compare\n".to_string();
        }

        let mut out = String::new();
        out.push_str("| Step |");
        for c in &self.columns {
            let _ = write!(
                out,
                " Version {}<br>{}<br>Tokens: {} in / {} out<br>Cost: ${:.4} |",
                c.number,
                escape(c.created_at.as_deref().unwrap_or("")),
                c.tokens_input,
                c.tokens_output,
                c.cost
            );
        }
        out.push('\n');
        out.push_str("| --- |");
        out.push_str(&" --- |".repeat(self.columns.len()));
        out.push('\n');

        for (i, row) in self.rows.iter().enumerate() {
            let _ = write!(out, "| Step {} |", i + 1);
            for cell in row {
                match cell {
                    Some(cell) => {
                        let _ = write!(out, " {} |", cell.to_markdown());
                    }
                    None => out.push_str(" N/A |"),
                }
            }
            out.push('\n');
        }

        out.push_str("\n## Summary\n\n");
        for s in &self.summaries {
            let _ = write!(
                out,
                "- Version {}: Steps: {}, Rated: {}/{}, ",
                s.number, s.total_steps, s.rated_steps, s.total_steps
            );
            match s.average_rating {
                Some(avg) => {
                    let _ = writeln!(out, "Avg Rating: {avg:.1}/10");
                }
                None => out.push_str("No ratings\n"),
            }
        }
        out
    }
}

impl StepCell {
    fn from_step(step: &ChainStep) -> Self {
        let response = match &step.assistant_response {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Object(_) | Value::Array(_))) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
            Some(v) => v.to_string(),
        };
        let metrics = step.metrics.as_ref();

        Self {
            model: step.model.clone().unwrap_or_else(|| "Unknown model".to_string()),
            prompt_preview: truncate(&step.user_prompt, PROMPT_PREVIEW_CHARS),
            response_preview: truncate(&response, RESPONSE_PREVIEW_CHARS),
            input_tokens: metrics.map(|m| m.input_tokens),
            output_tokens: metrics.map(|m| m.output_tokens),
            cost: metrics.map(|m| m.cost_usd),
            latency: metrics.and_then(|m| m.latency),
            rating: step.rating.clone(),
        }
    }

    fn to_markdown(&self) -> String {
        let mut parts = vec![
            format!("**{}**", escape(&self.model)),
            escape(&self.prompt_preview),
            format!("`{}`", escape(&self.response_preview).replace('`', "'")),
        ];
        if let (Some(input), Some(output)) = (self.input_tokens, self.output_tokens) {
            let latency = self
                .latency
                .map(|l| format!("{l:.2}s"))
                .unwrap_or_else(|| "N/A".to_string());
            parts.push(format!(
                "Tokens: {input} / {output}, Cost: ${:.4}, Latency: {latency}",
                self.cost.unwrap_or(0.0)
            ));
        }
        match &self.rating {
            Some(rating) => {
                let mut fields = Vec::new();
                if let Some(overall) = rating.overall {
                    fields.push(format!("Overall {overall}/10"));
                }
                for (name, score) in &rating.parameters {
                    fields.push(format!("{}: {score}/10", escape(name)));
                }
                if let Some(review) = &rating.review {
                    fields.push(format!("\"{}\"", escape(review)));
                }
                parts.push(format!("Rating: {}", fields.join(", ")));
            }
            None => parts.push("No rating".to_string()),
        }
        parts.join("<br>")
    }
}

/// Cuts to `max` characters and appends "..." when anything was dropped.
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte, _)) => format!("{}...", &s[..byte]),
        None => s.to_string(),
    }
}

/// Keeps cell text on one table row.
fn escape(s: &str) -> String {
    s.replace('|', "\\|").replace("\r\n", "<br>").replace('\n', "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn version(id: &str, created_at: Option<&str>, steps: Vec<ChainStep>) -> ChainVersion {
        ChainVersion {
            version_id: id.to_string(),
            trace_id: "trace".to_string(),
            chain_name: None,
            steps,
            total_tokens_input: Some(10),
            total_tokens_output: Some(5),
            total_cost: Some(0.00123),
            rating: None,
            metadata: Default::default(),
            created_at: created_at.map(str::to_string),
        }
    }

    fn step(prompt: &str, response: Value, overall: Option<u8>) -> ChainStep {
        ChainStep {
            user_prompt: prompt.to_string(),
            assistant_response: Some(response),
            model: Some("gpt-4o".to_string()),
            rating: overall.map(|o| Rating { overall: Some(o), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn test_columns_sorted_oldest_first() {
        let versions = vec![
            version("b", Some("2025-02-01 10:00:00"), vec![]),
            version("none", None, vec![]),
            version("a", Some("2025-01-01T10:00:00Z"), vec![]),
        ];
        let table = ComparisonTable::build(&versions);
        let ids: Vec<&str> = table.columns.iter().map(|c| c.version_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "none"]);
        assert_eq!(table.columns[0].number, 1);
        // Input order untouched.
        assert_eq!(versions[0].version_id, "b");
    }

    #[test]
    fn test_version_badges() {
        let versions = vec![
            version("t_initial", None, vec![]),
            version("t_1", None, vec![]),
            version("t_2", None, vec![]),
        ];
        assert_eq!(version_badges(&versions), vec!["INITIAL", "V1", "V2"]);
    }

    #[test]
    fn test_shorter_versions_get_na_cells() {
        let versions = vec![
            version("a", Some("2025-01-01 00:00:00"), vec![step("p1", json!("r1"), None)]),
            version(
                "b",
                Some("2025-01-02 00:00:00"),
                vec![step("p1", json!("r1"), Some(8)), step("p2", json!("r2"), Some(6))],
            ),
        ];
        let table = ComparisonTable::build(&versions);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows[1][0].is_none());
        assert!(table.rows[1][1].is_some());

        assert_eq!(table.summaries[0].rated_steps, 0);
        assert_eq!(table.summaries[0].average_rating, None);
        assert_eq!(table.summaries[1].rated_steps, 2);
        assert_eq!(table.summaries[1].average_rating, Some(7.0));
    }

    #[test]
    fn test_previews_truncated() {
        let long_prompt = "p".repeat(151);
        let long_response = "r".repeat(200);
        let cell = StepCell::from_step(&step(&long_prompt, json!(long_response), None));
        assert_eq!(cell.prompt_preview, format!("{}...", "p".repeat(150)));
        assert_eq!(cell.response_preview, "r".repeat(200));
        assert_eq!(truncate("héllo", 2), "hé...");
    }

    #[test]
    fn test_object_response_pretty_printed() {
        let cell = StepCell::from_step(&step("p", json!({"a": 1}), None));
        assert_eq!(cell.response_preview, "{\n  \"a\": 1\n}");
        let mut missing = step("p", Value::Null, None);
        missing.model = None;
        let cell = StepCell::from_step(&missing);
        assert_eq!(cell.response_preview, "");
        assert_eq!(cell.model, "Unknown model");
    }

    #[test]
    fn test_markdown_render() {
        let versions = vec![version(
            "a",
            Some("2025-01-01 00:00:00"),
            vec![step("a | b", json!("line1\nline2"), Some(9))],
        )];
        let md = ComparisonTable::build(&versions).to_markdown();
        assert!(md.starts_with("| Step | Version 1<br>2025-01-01 00:00:00<br>Tokens: 10 in / 5 out<br>Cost: $0.0012 |\n| --- | --- |\n"));
        assert!(md.contains("a \\| b"));
        assert!(md.contains("`line1<br>line2`"));
        assert!(md.contains("Rating: Overall 9/10"));
        assert!(md.contains("- Version 1: Steps: 1, Rated: 1/1, Avg Rating: 9.0/10"));
        assert_eq!(ComparisonTable::build(&[]).to_markdown(), "No versions to compare\n");
    }
}
