//! Tabular query tool — cross-validated analytics over one bound table.
//!
//! The model decides *which* operations answer the question; every
//! operation is executed by two independent engines that must agree
//! (see [`crate::table_ops`]). The model may only use computed results,
//! never prior knowledge, and the visible answer always ends with an
//! explanation naming the columns involved.

use std::sync::Arc;

use async_trait::async_trait;
use docpilot_core::action::{AgentAction, parse_action};
use docpilot_core::document::TabularDataset;
use docpilot_core::error::ToolError;
use docpilot_core::message::Message;
use docpilot_core::provider::{Provider, ProviderRequest};
use docpilot_core::retry::{MAX_ATTEMPTS, retry};
use docpilot_core::tool::Tool;
use tracing::{info, warn};

use crate::table_ops::{
    ColumnarEvaluator, OpOutcome, RowScanEvaluator, TableEvaluator, TableOp, cross_validate,
};

/// Invocation token for this tool.
pub const TOKEN: &str = "@csvsearch";

/// Sub-action name the analysis loop exposes to the model.
const QUERY_ACTION: &str = "run_query";

/// Hard cap on model round-trips per attempt.
const MAX_STEPS: usize = 8;

const ANALYSIS_PROMPT: &str = r#"You answer analytical questions about one bound table. First look at the column names, then answer the question using executed queries only.

To execute a query, respond with exactly one JSON blob:
{"action": "run_query", "action_input": <op>}

where <op> is one of:
- {"op": "describe"}
- {"op": "aggregate", "column": "<name>", "agg": "count|sum|mean|min|max", "filters": [{"column": "<name>", "op": "eq|ne|lt|le|gt|ge|contains", "value": <value>}]}
- {"op": "group_aggregate", "group_by": "<name>", "column": "<name>", "agg": "count|sum|mean|min|max"}
- {"op": "plot", "series": ["<name>", ...]}

To finish, respond with:
{"action": "Final Answer", "action_input": "<your answer>"}

Rules:
- DO NOT MAKE UP AN ANSWER OR USE PRIOR KNOWLEDGE; ONLY USE THE RESULTS OF THE QUERIES YOU HAVE RUN. Every executed query is verified through two independent computation methods before you see the result.
- Never return a code snippet or a raw query as the final answer; write a narrative result.
- When plotting more than one column, each series gets its own distinct color; name the colors in your answer.
- As part of your Final Answer, add a section that starts with "Explanation:" and mention the column names you used to get to the answer.
- If you are not sure of the answer, say so instead of guessing."#;

/// Tool that answers analytical questions about the bound table.
pub struct TabularQueryTool {
    provider: Arc<dyn Provider>,
    model: String,
    table: TabularDataset,
    eval_a: Arc<dyn TableEvaluator>,
    eval_b: Arc<dyn TableEvaluator>,
}

impl TabularQueryTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        table: TabularDataset,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            table,
            eval_a: Arc::new(RowScanEvaluator),
            eval_b: Arc::new(ColumnarEvaluator),
        }
    }

    /// Swap the evaluation engines (used to exercise the disagreement path).
    pub fn with_evaluators(
        mut self,
        eval_a: Arc<dyn TableEvaluator>,
        eval_b: Arc<dyn TableEvaluator>,
    ) -> Self {
        self.eval_a = eval_a;
        self.eval_b = eval_b;
        self
    }

    fn system_prompt(&self) -> String {
        format!(
            "{ANALYSIS_PROMPT}\n\nThe bound table is '{}' with columns: {}.",
            self.table.name,
            self.table.schema_summary()
        )
    }

    async fn run_analysis_loop(&self, input: &str) -> Result<String, ToolError> {
        let mut messages = vec![Message::system(self.system_prompt()), Message::user(input)];
        let mut validated: Vec<(TableOp, OpOutcome)> = Vec::new();

        for _ in 0..MAX_STEPS {
            let request = ProviderRequest::new(&self.model, messages.clone());
            let response = self.provider.complete(request).await.map_err(|e| {
                ToolError::ExecutionFailed {
                    token: TOKEN.into(),
                    reason: e.to_string(),
                }
            })?;

            let action =
                parse_action(&response.content).map_err(|e| ToolError::ExecutionFailed {
                    token: TOKEN.into(),
                    reason: e.to_string(),
                })?;

            match action {
                AgentAction::Final { answer } => {
                    if validated.is_empty() {
                        messages.push(Message::assistant(&response.content));
                        messages.push(Message::user(
                            "Do not answer from prior knowledge. Run at least one query \
                             and base the answer on its result.",
                        ));
                        continue;
                    }
                    info!(queries = validated.len(), "tabular analysis finished");
                    return Ok(finalize_answer(&answer, &validated));
                }
                AgentAction::UseTool { token, input: raw } if token == QUERY_ACTION => {
                    messages.push(Message::assistant(&response.content));

                    let observation = match serde_json::from_value::<TableOp>(raw) {
                        Err(e) => {
                            format!("The query could not be read: {e}. Use the documented op format.")
                        }
                        Ok(op) => {
                            match cross_validate(&op, &self.table, &*self.eval_a, &*self.eval_b) {
                                Ok(outcome) => {
                                    let rendered = outcome.render();
                                    validated.push((op, outcome));
                                    format!("Result (verified by two methods): {rendered}")
                                }
                                // Disagreement fails the whole attempt; the
                                // retry shell decides what happens next.
                                Err(e @ ToolError::Inconsistent { .. }) => return Err(e),
                                Err(e) => format!("Error: {e}"),
                            }
                        }
                    };

                    messages.push(Message::user(observation));
                }
                AgentAction::UseTool { token, .. } => {
                    messages.push(Message::assistant(&response.content));
                    messages.push(Message::user(format!(
                        "Unknown action '{token}'. Use \"{QUERY_ACTION}\" or \"Final Answer\"."
                    )));
                }
            }
        }

        Err(ToolError::ExecutionFailed {
            token: TOKEN.into(),
            reason: format!("analysis loop did not reach a final answer within {MAX_STEPS} steps"),
        })
    }
}

/// Clean the final answer and guarantee the explanation section.
fn finalize_answer(answer: &str, validated: &[(TableOp, OpOutcome)]) -> String {
    let cleaned = strip_code_fences(answer);

    if cleaned.contains("Explanation:") {
        return cleaned;
    }

    let mut columns: Vec<String> = Vec::new();
    for (op, _) in validated {
        for col in op.columns_used() {
            if !columns.contains(&col) {
                columns.push(col);
            }
        }
    }

    let explanation = if columns.is_empty() {
        "The answer was derived from the table's schema and row count.".to_string()
    } else {
        format!(
            "The answer was computed from the column(s): {}. Every value was \
             verified by two independent computation methods.",
            columns.join(", ")
        )
    };

    format!("{}\n\nExplanation:\n{explanation}", cleaned.trim_end())
}

/// Remove fenced code blocks — raw code is never part of a visible answer.
fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    text.split("```")
        .enumerate()
        .filter_map(|(i, part)| (i % 2 == 0).then_some(part))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

/// The uncertainty message surfaced on persistent disagreement. Contains no
/// numbers — a figure that failed its cross-check is never shown.
fn uncertainty_message(method_a: &str, method_b: &str) -> String {
    format!(
        "I am not sure of the answer: the {method_a} and {method_b} computation \
         methods disagreed even after retrying, so no reliable figure can be \
         given. Please rephrase or narrow the question."
    )
}

#[async_trait]
impl Tool for TabularQueryTool {
    fn token(&self) -> &str {
        TOKEN
    }

    fn description(&self) -> &str {
        "useful when the question includes the term: @csvsearch"
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        match retry(MAX_ATTEMPTS, |_| self.run_analysis_loop(input)).await {
            Ok(answer) => Ok(answer),
            Err(ToolError::Inconsistent {
                method_a, method_b, ..
            }) => {
                warn!("tabular cross-check disagreed after retries");
                Ok(uncertainty_message(&method_a, &method_b))
            }
            Err(e) => Ok(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_ops::AggregateFn;
    use crate::test_helpers::*;
    use docpilot_core::document::{CellValue, Column, ColumnType};

    fn sample_table() -> TabularDataset {
        TabularDataset {
            name: "sales.csv".into(),
            columns: vec![
                Column { name: "city".into(), dtype: ColumnType::Text },
                Column { name: "revenue".into(), dtype: ColumnType::Float },
                Column { name: "units".into(), dtype: ColumnType::Int },
            ],
            rows: vec![
                vec![
                    CellValue::Text("Oslo".into()),
                    CellValue::Float(100.0),
                    CellValue::Int(3),
                ],
                vec![
                    CellValue::Text("Bergen".into()),
                    CellValue::Float(300.0),
                    CellValue::Int(7),
                ],
            ],
        }
    }

    fn sum_revenue_op() -> serde_json::Value {
        serde_json::json!({"op": "aggregate", "column": "revenue", "agg": "sum"})
    }

    #[tokio::test]
    async fn computes_and_appends_explanation() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action(QUERY_ACTION, sum_revenue_op()),
            &final_action("The total revenue across both cities is 400."),
        ]));
        let tool = TabularQueryTool::new(provider, "mock-model", sample_table());

        let answer = tool.invoke("what is the total revenue?").await.unwrap();
        assert!(answer.contains("400"));
        assert!(answer.contains("Explanation:"));
        assert!(answer.contains("revenue"));
    }

    #[tokio::test]
    async fn model_supplied_explanation_is_kept() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action(QUERY_ACTION, sum_revenue_op()),
            &final_action("Total: 400.\n\nExplanation:\nI summed the revenue column."),
        ]));
        let tool = TabularQueryTool::new(provider, "mock-model", sample_table());

        let answer = tool.invoke("total revenue?").await.unwrap();
        assert_eq!(answer.matches("Explanation:").count(), 1);
        assert!(answer.contains("I summed the revenue column."));
    }

    #[tokio::test]
    async fn final_answer_without_computation_is_refused() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &final_action("It is probably around 400."),
            &tool_action(QUERY_ACTION, sum_revenue_op()),
            &final_action("The total revenue is 400."),
        ]));
        let tool = TabularQueryTool::new(provider.clone(), "mock-model", sample_table());

        let answer = tool.invoke("total revenue?").await.unwrap();
        assert!(answer.contains("400"));
        // All three scripted responses were needed: the bare guess was
        // rejected and a computation demanded first.
        assert_eq!(provider.call_count(), 3);
    }

    /// An engine that skews every scalar — simulates a broken method.
    struct SkewedEvaluator;

    impl TableEvaluator for SkewedEvaluator {
        fn name(&self) -> &str {
            "skewed"
        }
        fn evaluate(&self, op: &TableOp, table: &TabularDataset) -> Result<OpOutcome, ToolError> {
            match RowScanEvaluator.evaluate(op, table)? {
                OpOutcome::Scalar(v) => Ok(OpOutcome::Scalar(v + 1.0)),
                other => Ok(other),
            }
        }
    }

    #[tokio::test]
    async fn persistent_disagreement_yields_uncertainty_not_a_number() {
        // One query per attempt; both attempts disagree.
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action(QUERY_ACTION, sum_revenue_op()),
            &tool_action(QUERY_ACTION, sum_revenue_op()),
        ]));
        let tool = TabularQueryTool::new(provider, "mock-model", sample_table())
            .with_evaluators(Arc::new(RowScanEvaluator), Arc::new(SkewedEvaluator));

        let answer = tool.invoke("total revenue?").await.unwrap();
        assert!(answer.contains("not sure"));
        assert!(
            !answer.chars().any(|c| c.is_ascii_digit()),
            "uncertainty message must not contain a figure: {answer}"
        );
    }

    #[tokio::test]
    async fn unknown_column_is_fed_back_for_correction() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action(
                QUERY_ACTION,
                serde_json::json!({"op": "aggregate", "column": "price", "agg": "sum"}),
            ),
            &tool_action(QUERY_ACTION, sum_revenue_op()),
            &final_action("The total revenue is 400."),
        ]));
        let tool = TabularQueryTool::new(provider, "mock-model", sample_table());

        let answer = tool.invoke("total revenue?").await.unwrap();
        assert!(answer.contains("400"));
    }

    #[tokio::test]
    async fn code_fences_are_stripped_from_the_answer() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action(QUERY_ACTION, sum_revenue_op()),
            &final_action("The total is 400.\n```\ndf[\"revenue\"].sum()\n```"),
        ]));
        let tool = TabularQueryTool::new(provider, "mock-model", sample_table());

        let answer = tool.invoke("total revenue?").await.unwrap();
        assert!(!answer.contains("```"));
        assert!(!answer.contains("df["));
        assert!(answer.contains("400"));
    }

    #[tokio::test]
    async fn plot_request_reports_distinct_colors() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action(
                QUERY_ACTION,
                serde_json::json!({"op": "plot", "series": ["revenue", "units"]}),
            ),
            &final_action("Plotted revenue in blue and units in red over the row index."),
        ]));
        let tool = TabularQueryTool::new(provider, "mock-model", sample_table());

        let answer = tool.invoke("plot revenue and units").await.unwrap();
        assert!(answer.contains("blue"));
        assert!(answer.contains("red"));
        assert!(answer.contains("Explanation:"));
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_failure_text() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            "no action here",
            "still nothing",
        ]));
        let tool = TabularQueryTool::new(provider, "mock-model", sample_table());

        let answer = tool.invoke("total revenue?").await.unwrap();
        assert!(answer.contains(TOKEN));
    }

    #[test]
    fn strip_code_fences_keeps_prose() {
        let text = "Before.\n```python\nx = 1\n```\nAfter.";
        let stripped = strip_code_fences(text);
        assert!(stripped.contains("Before."));
        assert!(stripped.contains("After."));
        assert!(!stripped.contains("x = 1"));
    }

    #[test]
    fn explanation_lists_each_column_once() {
        let validated = vec![
            (
                TableOp::Aggregate {
                    column: "revenue".into(),
                    agg: AggregateFn::Sum,
                    filters: vec![],
                },
                OpOutcome::Scalar(400.0),
            ),
            (
                TableOp::Aggregate {
                    column: "revenue".into(),
                    agg: AggregateFn::Mean,
                    filters: vec![],
                },
                OpOutcome::Scalar(200.0),
            ),
        ];
        let answer = finalize_answer("The total is 400.", &validated);
        assert_eq!(answer.matches("revenue").count(), 1);
    }
}
