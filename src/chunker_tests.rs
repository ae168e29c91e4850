    use super::*;
    use pretty_assertions::assert_eq;

    use crate::blocks::{RichTextElement, SectionElement};

    /// Polls `consume` until it neither emits nor makes progress,
    /// collecting every emission. Mirrors how the executor drains.
    async fn drain<F: FixRendered>(chunker: &mut Chunker<F>) -> Vec<Emitted> {
        let mut out = Vec::new();
        loop {
            let before = chunker.emitted_index();
            match chunker.consume().await.expect("consume") {
                Some(emitted) => out.push(emitted),
                None if chunker.emitted_index() == before => break,
                None => {}
            }
        }
        out
    }

    #[tokio::test]
    async fn test_chunker_streaming_boundary() {
        let mut chunker = Chunker::new(5);
        chunker.feed("para one.");
        // Nothing committed yet: no newline seen.
        assert!(chunker.consume().await.expect("consume").is_none());

        chunker.feed("\n\npara two");
        let first = chunker.consume().await.expect("consume").expect("first paragraph ready");
        assert_eq!(first.reference_md.trim(), "para one.");
        assert!(!first.blocks.is_empty());

        // The second paragraph is still buffered (no trailing newline).
        assert!(chunker.consume().await.expect("consume").is_none());

        chunker.finish();
        let second = chunker.consume().await.expect("consume").expect("drained after finish");
        assert_eq!(second.reference_md.trim(), "para two");
        assert!(chunker.consume().await.expect("consume").is_none());
    }

    #[tokio::test]
    async fn test_chunker_waits_below_target_size() {
        // A lone ready group is held back while the stream is live and
        // the committed source is still below the target size.
        let mut chunker = Chunker::new(1024);
        chunker.feed("short paragraph\n\nnext");
        assert!(chunker.consume().await.expect("consume").is_none());
        chunker.finish();
        let groups = drain(&mut chunker).await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].reference_md.trim(), "short paragraph\n\nnext");
    }

    #[tokio::test]
    async fn test_chunker_holds_open_code_fence() {
        let mut chunker = Chunker::new(1);
        chunker.feed("```python\nprint(1)\n");
        assert!(chunker.consume().await.expect("consume").is_none());

        // Closed, but a fence could still be reopened by a later line of
        // the same list... the parser can't tell, so it stays held.
        chunker.feed("```\n");
        assert!(chunker.consume().await.expect("consume").is_none());

        chunker.feed("\nafter\n");
        let emitted =
            chunker.consume().await.expect("consume").expect("fence closed and followed");
        assert_eq!(
            emitted.blocks,
            vec![crate::blocks::Block::RichText {
                elements: vec![RichTextElement::Preformatted {
                    elements: vec![SectionElement::text("print(1)")],
                }],
            }]
        );
        assert_eq!(emitted.reference_md.trim_end(), "```python\nprint(1)\n```");
    }

    #[tokio::test]
    async fn test_chunker_holds_open_list_until_finish() {
        let mut chunker = Chunker::new(1);
        chunker.feed("- a\n- b\n");
        assert!(chunker.consume().await.expect("consume").is_none());

        chunker.finish();
        let groups = drain(&mut chunker).await;
        assert_eq!(groups.len(), 1);
        match &groups[0].blocks[0] {
            crate::blocks::Block::RichText { elements } => match &elements[0] {
                RichTextElement::List { elements, .. } => assert_eq!(elements.len(), 2),
                other => panic!("expected list element, got {other:?}"),
            },
        }
    }

    #[tokio::test]
    async fn test_chunker_thematic_break_groups_and_swallows() {
        let mut chunker = Chunker::new(1);
        chunker.feed("alpha\n\n---\n\nbeta\n");
        chunker.finish();
        let groups = drain(&mut chunker).await;

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].reference_md.trim(), "alpha");
        assert!(groups[1].reference_md.contains("beta"));
        for group in &groups {
            assert!(!group.blocks.is_empty());
        }
    }

    #[tokio::test]
    async fn test_chunker_separator_only_tail_is_swallowed() {
        let mut chunker = Chunker::new(1);
        chunker.feed("alpha\n\n---\n");
        chunker.finish();
        let groups = drain(&mut chunker).await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].reference_md.trim(), "alpha");
        // The separator group advanced the index without emitting.
        assert!(chunker.consume().await.expect("consume").is_none());
    }

    #[tokio::test]
    async fn test_chunker_blank_document_emits_nothing() {
        let mut chunker = Chunker::new(1);
        chunker.feed("\n\n\n");
        chunker.finish();
        assert!(drain(&mut chunker).await.is_empty());
    }

    struct EmbedStub;

    #[async_trait]
    impl FixRendered for EmbedStub {
        async fn fix_rendered(
            &mut self,
            rendered: Vec<Rendered>,
        ) -> Result<Vec<Rendered>, BoxError> {
            if rendered.len() == 1 && matches!(rendered[0], Rendered::EmbedFile { .. }) {
                return Ok(vec![Rendered::Element(RichTextElement::Section {
                    elements: vec![SectionElement::text("[table embedded]")],
                })]);
            }
            Ok(rendered)
        }
    }

    #[tokio::test]
    async fn test_chunker_table_is_isolated_and_fixed() {
        let mut chunker = Chunker::with_fixer(1, EmbedStub);
        chunker.feed("before\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\nafter\n");
        chunker.finish();
        let groups = drain(&mut chunker).await;

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].reference_md.trim(), "before");
        assert!(groups[1].reference_md.contains("| a | b |"));
        assert_eq!(
            groups[1].blocks,
            vec![crate::blocks::Block::RichText {
                elements: vec![RichTextElement::Section {
                    elements: vec![SectionElement::text("[table embedded]")],
                }],
            }]
        );
        assert!(groups[2].reference_md.contains("after"));
    }

    #[tokio::test]
    async fn test_chunker_unfixed_table_is_hard_error() {
        let mut chunker = Chunker::new(1);
        chunker.feed("| a | b |\n|---|---|\n| 1 | 2 |\n\nx\n");
        let result = chunker.consume().await;
        assert!(matches!(result, Err(ChunkerError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_chunker_inline_fence_fixup() {
        let mut chunker = Chunker::new(DEFAULT_MAX_CHUNK_SIZE);
        chunker.feed("prose```\ncode\n");
        let lines: Vec<&str> = chunker.finish().iter().map(String::as_str).collect();
        assert_eq!(lines, vec!["prose", "```", "code"]);
    }

    #[tokio::test]
    async fn test_chunker_lines_are_right_trimmed() {
        let mut chunker = Chunker::new(DEFAULT_MAX_CHUNK_SIZE);
        chunker.feed("trailing spaces   \nnext\n");
        let lines: Vec<&str> = chunker.finish().iter().map(String::as_str).collect();
        assert_eq!(lines, vec!["trailing spaces", "next"]);
    }

    #[tokio::test]
    async fn test_chunker_round_trip_char_by_char() {
        let doc = "# Title\n\nfirst paragraph with some text\n\n- a\n- b\n    - c\n\n> quoted\n\nlast paragraph\n";

        let mut streamed = Chunker::new(8);
        let mut streamed_refs: Vec<String> = Vec::new();
        for ch in doc.chars() {
            streamed.feed(&ch.to_string());
            for emitted in drain(&mut streamed).await {
                assert!(!emitted.blocks.is_empty());
                streamed_refs.push(emitted.reference_md);
            }
        }
        streamed.finish();
        for emitted in drain(&mut streamed).await {
            assert!(!emitted.blocks.is_empty());
            streamed_refs.push(emitted.reference_md);
        }

        let mut whole = Chunker::new(8);
        whole.feed(doc);
        whole.finish();
        let whole_refs: Vec<String> =
            drain(&mut whole).await.into_iter().map(|e| e.reference_md).collect();

        // Same content in the same order, modulo whitespace at the
        // group seams.
        let streamed_words: Vec<&str> =
            streamed_refs.iter().flat_map(|r| r.split_whitespace()).collect();
        let whole_words: Vec<&str> =
            whole_refs.iter().flat_map(|r| r.split_whitespace()).collect();
        let doc_words: Vec<&str> = doc.split_whitespace().collect();
        assert_eq!(streamed_words, whole_words);
        assert_eq!(whole_words, doc_words);
    }

    #[tokio::test]
    async fn test_chunker_consume_exhausts_then_stays_empty() {
        let mut chunker = Chunker::new(1);
        chunker.feed("one\n\ntwo\n\nthree\n");
        chunker.finish();
        let groups = drain(&mut chunker).await;
        assert_eq!(groups.len(), 3);

        let index = chunker.emitted_index();
        for _ in 0..3 {
            assert!(chunker.consume().await.expect("consume").is_none());
            assert_eq!(chunker.emitted_index(), index);
        }
    }
