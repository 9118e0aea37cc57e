//! Block Analysis Integration Tests
//!
//! Streams a keyed JSON answer through `BlockAnalyzer` and checks that
//! blocks surface before the stream ends, that stream-end recovery picks up
//! the rest, and that cancellation aborts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use marginalia::models::document::{split_blocks, DocumentBlock};
use marginalia::models::settings::AnalyzerConfig;
use marginalia::services::{BlockAnalysisOutcome, BlockAnalyzer};
use marginalia_tools::AnnotationResult;

use crate::support::{ScriptedProvider, Step};

const MARKDOWN: &str = "Fruits:\n- apple\n\nMonads are monoids.\n\nThe end.";

fn blocks() -> Vec<DocumentBlock> {
    split_blocks(MARKDOWN)
}

#[tokio::test]
async fn test_blocks_surface_before_stream_ends() {
    let provider = Arc::new(ScriptedProvider::new(vec![Step::stream(&[
        "```json\n{\"b1\": [{\"type\":\"list\",\"textSpan\":\"Fruits:\",",
        "\"extensions\":[\"pear\",\"plum\"]}],\n \"b",
        "2\": [{\"type\":\"reference\",\"textSpan\":\"monoids.\",\"records\":[{\"description\":\"d\",\"title\":\"t\"}]}],\n",
        " \"b3\": []}\n```",
    ])
    .hold_after(3)]));
    let analyzer = BlockAnalyzer::new(provider.clone(), AnalyzerConfig::default());
    let (tx, mut rx) = mpsc::channel(8);
    let doc_blocks = blocks();

    let run = analyzer.analyze(&doc_blocks, MARKDOWN, CancellationToken::new(), Some(tx));
    let watch = async {
        // The last chunk is held back until a block has been delivered
        let early = rx.recv().await;
        provider.release.notify_one();
        let mut rest = Vec::new();
        while let Some(update) = rx.recv().await {
            rest.push(update);
        }
        (early, rest)
    };
    let (outcome, (early, rest)) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(run, watch)
    })
    .await
    .expect("first block was not delivered while streaming");

    let early = early.unwrap();
    assert_eq!(early.block_id, "b1");
    assert_eq!(early.annotations[0].text_span(), "Fruits");
    // b2 completed from the same chunk; b3 only closes with the object
    let rest_ids: Vec<&str> = rest.iter().map(|b| b.block_id.as_str()).collect();
    assert_eq!(rest_ids, vec!["b2"]);

    match outcome.unwrap() {
        BlockAnalysisOutcome::Completed { blocks, usage } => {
            let ids: Vec<&str> = blocks.iter().map(|b| b.block_id.as_str()).collect();
            assert_eq!(ids, vec!["b1", "b2", "b3"]);
            assert!(blocks[2].annotations.is_empty());
            match &blocks[1].annotations[0] {
                AnnotationResult::Reference { text_span, records } => {
                    assert_eq!(text_span, "monoids");
                    assert_eq!(records[0].title, "t");
                }
                other => panic!("Expected reference, got {:?}", other),
            }
            assert_eq!(usage.total_tokens(), 16);
        }
        other => panic!("Expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_answer_is_recovered_at_stream_end() {
    // Out of order keys and a trailing comma
    let provider = Arc::new(ScriptedProvider::new(vec![Step::stream(&[
        "{\"b3\": [], \"b1\": [{\"type\":\"list\",\"textSpan\":\"Fruits\",\"extensions\":[\"fig\"]},],",
        " \"b2\": [{\"type\":\"bogus\"}, {\"type\":\"list\",\"textSpan\":\"...\",\"extensions\":[\"x\"]}]}",
    ])]));
    let analyzer = BlockAnalyzer::new(provider, AnalyzerConfig::default());

    let outcome = analyzer
        .analyze(&blocks(), MARKDOWN, CancellationToken::new(), None)
        .await
        .unwrap();

    match outcome {
        BlockAnalysisOutcome::Completed { blocks, .. } => {
            let ids: Vec<&str> = blocks.iter().map(|b| b.block_id.as_str()).collect();
            assert_eq!(ids, vec!["b1", "b2", "b3"]);
            assert_eq!(blocks[0].annotations.len(), 1);
            // Both b2 entries are dropped: unknown type, and a span of only punctuation
            assert!(blocks[1].annotations.is_empty());
        }
        other => panic!("Expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_mid_stream_aborts() {
    let provider = Arc::new(ScriptedProvider::new(vec![Step::stream(&[
        "{\"b1\": [],",
        " \"b2\": [],",
        " \"b3\": []}",
    ])
    .hold_after(1)]));
    let analyzer = BlockAnalyzer::new(provider.clone(), AnalyzerConfig::default());
    let token = CancellationToken::new();
    let doc_blocks = blocks();

    let run = analyzer.analyze(&doc_blocks, MARKDOWN, token.clone(), None);
    let cancel = async {
        provider.started.notified().await;
        token.cancel();
    };
    let (outcome, ()) = tokio::join!(run, cancel);

    assert_eq!(outcome.unwrap(), BlockAnalysisOutcome::Aborted);
}

#[tokio::test]
async fn test_prompt_lists_every_block() {
    let provider = Arc::new(ScriptedProvider::new(vec![Step::stream(&["{}"])]));
    let analyzer = BlockAnalyzer::new(provider.clone(), AnalyzerConfig::default());

    let outcome = analyzer
        .analyze(&blocks(), MARKDOWN, CancellationToken::new(), None)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        BlockAnalysisOutcome::Completed { ref blocks, .. } if blocks.is_empty()
    ));

    let requests = provider.requests();
    let prompt = requests[0][0].text_content();
    for id in ["[b1]", "[b2]", "[b3]"] {
        assert!(prompt.contains(id));
    }
    assert!(prompt.contains(MARKDOWN));
}

#[tokio::test]
async fn test_unparseable_answer_is_an_error() {
    let provider = Arc::new(ScriptedProvider::new(vec![Step::stream(&[
        "I'm sorry, I can't produce ",
        "annotations for this note.",
    ])]));
    let analyzer = BlockAnalyzer::new(provider, AnalyzerConfig::default());

    let err = analyzer
        .analyze(&blocks(), MARKDOWN, CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, marginalia::AppError::Serialization(_)));
}

#[tokio::test]
async fn test_blocks_found_early_survive_a_bad_tail() {
    // Every block completes while streaming, so the garbled tail is never parsed
    let provider = Arc::new(ScriptedProvider::new(vec![Step::stream(&[
        "{\"b1\": [], \"b2\": [], \"b3\": [],",
        " \"b4\": oops",
    ])]));
    let analyzer = BlockAnalyzer::new(provider, AnalyzerConfig::default());

    let outcome = analyzer
        .analyze(&blocks(), MARKDOWN, CancellationToken::new(), None)
        .await
        .unwrap();
    match outcome {
        BlockAnalysisOutcome::Completed { blocks, .. } => assert_eq!(blocks.len(), 3),
        other => panic!("Expected completion, got {:?}", other),
    }
}
