//! Analyzer Integration Tests
//!
//! Exercises the tool-calling loop against a scripted provider:
//! - tool responses follow their calls in emission order
//! - a newer call supersedes an in-flight one for the same document
//! - aborted and failed calls leave history exactly as it was
//! - checkpoint restore rewinds the conversation

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use marginalia::models::settings::AnalyzerConfig;
use marginalia::services::{AnalysisOutcome, AnalysisRequest, Analyzer, CheckpointManager};
use marginalia::storage::database::Database;
use marginalia_llm::{LlmError, MessageRole, ToolCall};
use marginalia_tools::{AnnotationResult, ToolTable};

use crate::support::{annotate_args, text, tool_calls, ScriptedProvider, Step};

fn analyzer(provider: &Arc<ScriptedProvider>) -> Analyzer {
    Analyzer::new(
        provider.clone(),
        ToolTable::annotation(),
        AnalyzerConfig::default(),
    )
}

// ============================================================================
// Tool turn ordering
// ============================================================================

#[tokio::test]
async fn test_tool_responses_match_calls_in_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Step::reply(tool_calls(vec![
            ToolCall::new("t1", "annotate", annotate_args("Church-Turing thesis")),
            ToolCall::new("t2", "extendList", r#"{"textSpan":"Languages:","extensions":["OCaml","Haskell"]}"#),
            ToolCall::new("t3", "lookupWeather", "{}"),
        ])),
        Step::reply(tool_calls(vec![ToolCall::new(
            "t4",
            "annotate",
            annotate_args("lambda calculus."),
        )])),
        Step::reply(text("Annotated three passages.")),
    ]));
    let analyzer = analyzer(&provider);

    let content = "The Church-Turing thesis and the lambda calculus.\nLanguages:\n- ML";
    let outcome = analyzer
        .analyze(AnalysisRequest::new("doc", content, content).with_title("Computability"))
        .await
        .unwrap();

    let annotations = outcome.annotations();
    let spans: Vec<&str> = annotations.iter().map(|a| a.text_span()).collect();
    assert_eq!(spans, vec!["Church-Turing thesis", "Languages", "lambda calculus"]);
    assert!(matches!(annotations[1], AnnotationResult::List { .. }));

    let conv = analyzer.conversation("doc").unwrap();
    let msgs = conv.messages();
    // user, assistant(3 calls), 3 tool, assistant(1 call), 1 tool, final
    assert_eq!(msgs.len(), 8);
    for (assistant_at, count) in [(1usize, 3usize), (5, 1)] {
        let assistant = &msgs[assistant_at];
        assert_eq!(assistant.role, MessageRole::Assistant);
        assert!(assistant.content.is_none());
        let call_ids: Vec<&str> = assistant.tool_calls.iter().map(|c| c.id.as_str()).collect();
        let response_ids: Vec<&str> = msgs[assistant_at + 1..assistant_at + 1 + count]
            .iter()
            .map(|m| {
                assert_eq!(m.role, MessageRole::Tool);
                m.tool_call_id.as_deref().unwrap()
            })
            .collect();
        assert_eq!(call_ids, response_ids);
    }
    assert!(msgs[4].text_content().contains("Unknown tool: lookupWeather"));
    assert_eq!(msgs[7].text_content(), "Annotated three passages.");

    // The second request replayed the first tool batch verbatim
    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(&requests[1][..], &msgs[..5]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_new_call_supersedes_in_flight_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Step::held(text("stale")),
        Step::reply(tool_calls(vec![ToolCall::new(
            "t1",
            "annotate",
            annotate_args("fresh"),
        )])),
        Step::reply(text("done")),
    ]));
    let analyzer = analyzer(&provider);

    let first = analyzer.analyze(AnalysisRequest::new("doc", "+stale text", "stale text"));
    let second = async {
        provider.started.notified().await;
        analyzer
            .analyze(AnalysisRequest::new("doc", "+fresh text", "fresh text"))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), AnalysisOutcome::Aborted);
    let second = second.unwrap();
    assert_eq!(second.annotations().len(), 1);

    // Only the second call's turn is in history, framed as the first turn
    let conv = analyzer.conversation("doc").unwrap();
    assert_eq!(conv.len(), 4);
    assert!(conv.messages()[0].text_content().contains("<note>\nfresh text\n</note>"));
    assert!(!conv
        .messages()
        .iter()
        .any(|m| m.text_content().contains("stale")));
}

#[tokio::test]
async fn test_abort_and_failure_restore_prior_history() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Step::reply(text("first turn")),
        Step::held(text("never committed")),
        Step::reply(Err(LlmError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(2),
        })),
    ]));
    let analyzer = analyzer(&provider);

    analyzer
        .analyze(AnalysisRequest::new("doc", "+one", "one"))
        .await
        .unwrap();
    let before = analyzer.conversation("doc").unwrap();

    let held = analyzer.analyze(AnalysisRequest::new("doc", "+two", "one\ntwo"));
    let failing = async {
        provider.started.notified().await;
        analyzer
            .analyze(AnalysisRequest::new("doc", "+three", "one\ntwo\nthree"))
            .await
    };
    let (held, failing) = tokio::join!(held, failing);

    assert!(held.unwrap().is_aborted());
    assert!(matches!(
        failing.unwrap_err(),
        marginalia::AppError::Llm(LlmError::RateLimited { .. })
    ));
    assert_eq!(analyzer.conversation("doc").unwrap(), before);
}

#[tokio::test]
async fn test_documents_do_not_cancel_each_other() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Step::held(text("a")),
        Step::reply(text("b")),
    ]));
    let analyzer = analyzer(&provider);

    let first = analyzer.analyze(AnalysisRequest::new("doc-a", "+a", "a"));
    let second = async {
        provider.started.notified().await;
        let outcome = analyzer
            .analyze(AnalysisRequest::new("doc-b", "+b", "b"))
            .await;
        provider.release.notify_one();
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert!(!first.unwrap().is_aborted());
    assert!(!second.unwrap().is_aborted());
    assert_eq!(analyzer.conversation("doc-a").unwrap().len(), 2);
    assert_eq!(analyzer.conversation("doc-b").unwrap().len(), 2);
}

#[tokio::test]
async fn test_caller_token_aborts_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Step::held(text("never committed")),
        Step::reply(text("second")),
    ]));
    let analyzer = analyzer(&provider);
    let interrupt = CancellationToken::new();

    let run = analyzer.analyze_with_cancellation(
        AnalysisRequest::new("doc", "+one", "one"),
        interrupt.clone(),
    );
    let cancel = async {
        provider.started.notified().await;
        interrupt.cancel();
    };
    let (outcome, ()) = tokio::join!(run, cancel);

    assert!(outcome.unwrap().is_aborted());
    assert!(analyzer.conversation("doc").unwrap().is_empty());

    // A fresh token starts a fresh call
    let outcome = analyzer
        .analyze_with_cancellation(
            AnalysisRequest::new("doc", "+one", "one"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(!outcome.is_aborted());
    assert_eq!(analyzer.conversation("doc").unwrap().len(), 2);
}

#[tokio::test]
async fn test_superseding_leaves_caller_token_alone() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Step::held(text("stale")),
        Step::reply(text("fresh")),
    ]));
    let analyzer = analyzer(&provider);
    let interrupt = CancellationToken::new();

    let first = analyzer.analyze_with_cancellation(
        AnalysisRequest::new("doc", "+stale", "stale"),
        interrupt.clone(),
    );
    let second = async {
        provider.started.notified().await;
        analyzer
            .analyze(AnalysisRequest::new("doc", "+fresh", "fresh"))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.unwrap().is_aborted());
    assert!(!second.unwrap().is_aborted());
    assert!(!interrupt.is_cancelled());
}

// ============================================================================
// Checkpoints
// ============================================================================

#[tokio::test]
async fn test_restore_checkpoint_rewinds_conversation() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Step::reply(text("r1")),
        Step::reply(text("r2")),
        Step::reply(text("r3")),
    ]));
    let db = Database::new_in_memory().unwrap();
    let analyzer = analyzer(&provider).with_store(db.clone());
    let checkpoints = CheckpointManager::with_store(db.clone());

    let mut created = Vec::new();
    for (i, line) in ["one", "two", "three"].iter().enumerate() {
        analyzer
            .analyze(AnalysisRequest::new("doc", format!("+{}", line), *line))
            .await
            .unwrap();
        let index = analyzer.last_message_index("doc").unwrap().unwrap();
        assert_eq!(index, 2 * i + 1);
        let cp = checkpoints
            .create("doc", index, *line, vec![format!("span-{}", i)])
            .unwrap()
            .unwrap();
        created.push(cp);
    }
    assert_eq!(analyzer.conversation("doc").unwrap().len(), 6);

    // Second checkpoint sits at message index 3
    let restored = checkpoints
        .restore("doc", &created[1].id, |index| {
            analyzer.truncate_conversation("doc", index).map(|_| ())
        })
        .unwrap()
        .unwrap();

    assert_eq!(restored.content, "two");
    assert_eq!(restored.annotation_ids, vec!["span-1".to_string()]);
    assert_eq!(analyzer.conversation("doc").unwrap().len(), 4);
    assert_eq!(checkpoints.list("doc").unwrap().len(), 2);
    assert_eq!(
        checkpoints.current("doc").unwrap().unwrap().id,
        created[1].id
    );

    // Both stores reflect the rewind
    assert_eq!(db.load_conversation("doc").unwrap().unwrap().len(), 4);
    assert_eq!(db.list_checkpoints("doc").unwrap().len(), 2);
}
