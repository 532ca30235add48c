//! End-to-end agent behaviour with a scripted model

mod common;

use common::{iris, query, text, tool, ScriptedProvider};
use databot::agent::{AgentSettings, Answer, DataAgent};
use databot::llm::{LlmError, MessageContent, Role};
use serde_json::json;

fn agent(provider: std::sync::Arc<ScriptedProvider>) -> DataAgent {
    DataAgent::new(provider, iris(), AgentSettings::default())
}

#[tokio::test]
async fn test_agent_returns_expected_series() {
    let provider = ScriptedProvider::new(vec![
        query(
            "c1",
            "SELECT Species, AVG(PetalWidthCm) AS PetalWidthCm FROM df GROUP BY Species ORDER BY Species",
        ),
        text("Virginica has the widest petals on average."),
    ]);
    let mut agent = agent(provider.clone());

    let answer = agent
        .ask("What is the average PetalWidthCm for each species?")
        .await;

    let Answer::Table { text, table, truncated } = answer else {
        panic!("expected a table answer, got {answer:?}");
    };
    assert_eq!(text, "Virginica has the widest petals on average.");
    assert!(!truncated);
    assert_eq!(table.columns, vec!["Species", "PetalWidthCm"]);

    let expected = [
        ("Iris-setosa", 0.2),
        ("Iris-versicolor", 1.44),
        ("Iris-virginica", 2.1),
    ];
    assert_eq!(table.rows.len(), expected.len());
    for (row, (species, mean)) in table.rows.iter().zip(expected) {
        assert_eq!(row[0], json!(species));
        let value = row[1].as_f64().unwrap();
        assert!((value - mean).abs() < 1e-9, "{species}: {value} != {mean}");
    }
    assert_eq!(provider.remaining(), 0);
}

#[tokio::test]
async fn test_agent_returns_statistical_summary() {
    let provider = ScriptedProvider::new(vec![
        query(
            "c1",
            "SELECT COUNT(SepalLengthCm) AS count, AVG(SepalLengthCm) AS mean, \
             MIN(SepalLengthCm) AS min, MAX(SepalLengthCm) AS max FROM df",
        ),
        text("Sepal length ranges from 4.6 to 7.1 cm."),
    ]);
    let mut agent = agent(provider);

    let answer = agent.ask("What is the statistical summary of the dataset?").await;
    let Answer::Table { table, .. } = answer else {
        panic!("expected a table answer, got {answer:?}");
    };
    assert_eq!(table.columns, vec!["count", "mean", "min", "max"]);
    assert_eq!(table.rows[0][0], json!(15));
    assert_eq!(table.rows[0][2].as_f64(), Some(4.6));
    assert_eq!(table.rows[0][3].as_f64(), Some(7.1));
}

#[tokio::test]
async fn test_chart_answer() {
    let provider = ScriptedProvider::new(vec![
        tool(
            "c1",
            "plot_chart",
            json!({
                "query": "SELECT Species, AVG(PetalLengthCm) AS mean_length FROM df GROUP BY Species",
                "kind": "bar",
                "x": "Species",
                "y": "mean_length",
                "title": "Mean petal length"
            }),
        ),
        text("Here is the bar chart of mean petal length per species."),
    ]);
    let mut agent = agent(provider);

    let answer = agent.ask("Plot the mean petal length per species").await;
    let Answer::Image { chart, .. } = answer else {
        panic!("expected an image answer, got {answer:?}");
    };
    assert_eq!(chart.title, "Mean petal length");
    assert_eq!(chart.mime_type, "image/svg+xml");
    assert!(chart.svg.starts_with("<svg"));
    assert!(chart.svg.contains("Iris-virginica"));
}

#[tokio::test]
async fn test_last_artifact_wins() {
    let provider = ScriptedProvider::new(vec![
        query("c1", "SELECT * FROM df LIMIT 3"),
        tool(
            "c2",
            "plot_chart",
            json!({
                "query": "SELECT Id, SepalLengthCm FROM df",
                "kind": "line",
                "x": "Id",
                "y": "SepalLengthCm"
            }),
        ),
        text("Done."),
    ]);
    let mut agent = agent(provider);
    assert_eq!(agent.ask("show and plot").await.kind(), "image");
}

#[tokio::test]
async fn test_direct_answer_has_no_artifact() {
    let provider = ScriptedProvider::new(vec![text("I can answer questions about iris.csv.")]);
    let mut agent = agent(provider);
    assert_eq!(
        agent.ask("What can you do?").await,
        Answer::Text {
            text: "I can answer questions about iris.csv.".to_string(),
            error: false
        }
    );
}

#[tokio::test]
async fn test_failing_query_is_observed_and_recovered() {
    let provider = ScriptedProvider::new(vec![
        query("c1", "SELECT revenue FROM df"),
        query("c2", "SELECT COUNT(*) AS n FROM df"),
        text("There are 15 rows."),
    ]);
    let mut agent = agent(provider.clone());

    let answer = agent.ask("How many rows?").await;
    assert_eq!(answer.text(), "There are 15 rows.");
    assert_eq!(answer.kind(), "table");

    // The second model call saw the failed query as an error observation
    let calls = provider.calls();
    let observation = calls[1]
        .iter()
        .rev()
        .find(|m| m.role == Role::Tool)
        .and_then(|m| m.content.as_text())
        .unwrap();
    assert!(observation.starts_with("Error"), "{observation}");
    assert!(observation.contains("revenue"));
}

#[tokio::test]
async fn test_write_statements_are_refused() {
    let provider = ScriptedProvider::new(vec![
        query("c1", "DELETE FROM df"),
        text("I can't modify the data."),
    ]);
    let mut agent = agent(provider.clone());

    let answer = agent.ask("Delete everything").await;
    assert_eq!(answer.text(), "I can't modify the data.");
    assert_eq!(agent.dataset().row_count(), 15);

    let calls = provider.calls();
    let observation = calls[1].last().and_then(|m| m.content.as_text()).unwrap();
    assert!(observation.starts_with("Error"));
}

#[tokio::test]
async fn test_llm_error_does_not_end_session() {
    let provider = ScriptedProvider::new(vec![
        query("c1", "SELECT * FROM df"),
        Err(LlmError::ServiceError("503 unavailable".to_string())),
        text("The dataset has 15 rows."),
    ]);
    let mut agent = agent(provider.clone());

    let failed = agent.ask("first question").await;
    assert!(failed.is_error());
    assert!(failed.text().contains("503 unavailable"));

    let ok = agent.ask("second question").await;
    assert!(!ok.is_error());

    // The failed turn left nothing behind in the conversation
    let calls = provider.calls();
    let last_call = calls.last().unwrap();
    let questions: Vec<&str> = last_call
        .iter()
        .filter(|m| m.role == Role::User && matches!(m.content, MessageContent::Text(_)))
        .filter_map(|m| m.content.as_text())
        .collect();
    assert_eq!(questions, vec!["second question"]);
}

#[tokio::test]
async fn test_failed_turn_after_trimming_restores_history() {
    let long_first = "a".repeat(240_000);
    let long_second = "b".repeat(240_000);
    let provider = ScriptedProvider::new(vec![
        text("ok"),
        query("c1", "SELECT 1"),
        Err(LlmError::RateLimited("quota".to_string())),
        text("fine"),
    ]);
    let mut agent = agent(provider.clone());

    assert_eq!(agent.ask(&long_first).await.text(), "ok");
    // The second question alone pushes the first turn out of the budget
    assert!(agent.ask(&long_second).await.is_error());

    let history: Vec<(Role, Option<&str>)> = agent
        .context()
        .messages()
        .iter()
        .map(|m| (m.role, m.content.as_text()))
        .collect();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1], (Role::User, Some(long_first.as_str())));
    assert_eq!(history[2], (Role::Assistant, Some("ok")));

    let answer = agent.ask("and now?").await;
    assert_eq!(answer.text(), "fine");

    // No tool call without its result is sent to the model
    let calls = provider.calls();
    let last_call = calls.last().unwrap();
    assert!(last_call
        .iter()
        .all(|m| matches!(m.content, MessageContent::Text(_))));
    assert_eq!(last_call.len(), 4);
}

#[tokio::test]
async fn test_small_context_budget_from_settings() {
    let provider = ScriptedProvider::new(vec![text("one"), text("two")]);
    let settings = AgentSettings {
        max_context_tokens: 1,
        ..AgentSettings::default()
    };
    let mut agent = DataAgent::new(provider.clone(), iris(), settings);
    agent.ask("first").await;
    agent.ask("second").await;

    // Only the system prompt and the current question survive the trim
    let calls = provider.calls();
    assert_eq!(calls[1].len(), 2);
    assert_eq!(calls[1][1].content.as_text(), Some("second"));
}

#[tokio::test]
async fn test_one_answer_per_question() {
    let provider = ScriptedProvider::new(vec![
        text("one"),
        query("c1", "SELECT 1"),
        text("two"),
        text("three"),
    ]);
    let mut agent = agent(provider);

    let mut answers = Vec::new();
    for q in ["a", "b", "c"] {
        answers.push(agent.ask(q).await);
    }
    let texts: Vec<&str> = answers.iter().map(Answer::text).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_history_carries_between_questions() {
    let provider = ScriptedProvider::new(vec![text("first"), text("second")]);
    let mut agent = agent(provider.clone());
    agent.ask("q1").await;
    agent.ask("q2").await;

    let calls = provider.calls();
    // system, q1, a1, q2
    assert_eq!(calls[1].len(), 4);
    assert_eq!(calls[1][0].role, Role::System);
    let prompt = calls[1][0].content.as_text().unwrap();
    assert!(prompt.contains("PetalWidthCm"));
    assert!(prompt.contains("15 entries"));
}
