    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::slack::{MessageMetadata, RepliesPage};

    const BOT: &str = "UBOT";

    struct StubSlack {
        replies: RepliesPage,
        posts: Mutex<Vec<PostMessage>>,
    }

    impl StubSlack {
        fn new(replies: RepliesPage) -> Self {
            Self { replies, posts: Mutex::new(Vec::new()) }
        }

        fn empty() -> Self {
            Self::new(RepliesPage::default())
        }
    }

    #[async_trait]
    impl SlackApi for StubSlack {
        async fn post_message(&self, message: PostMessage) -> Result<(), SlackError> {
            self.posts.lock().expect("posts lock").push(message);
            Ok(())
        }

        async fn files_upload(
            &self,
            _channel: &str,
            _thread_ts: &str,
            _filename: &str,
            _content: Vec<u8>,
        ) -> Result<(), SlackError> {
            Ok(())
        }

        async fn conversations_replies(
            &self,
            _channel: &str,
            _ts: &str,
        ) -> Result<RepliesPage, SlackError> {
            Ok(self.replies.clone())
        }

        async fn users_info(&self, _user: &str) -> Result<Option<String>, SlackError> {
            Ok(Some("en-US".to_string()))
        }
    }

    fn event(user: &str, text: &str, thread_ts: Option<&str>) -> MessageEvent {
        MessageEvent {
            channel: "C1".to_string(),
            ts: "200.1".to_string(),
            thread_ts: thread_ts.map(str::to_string),
            user: user.to_string(),
            text: text.to_string(),
            subtype: None,
        }
    }

    fn message(user: &str, text: &str, ts: &str) -> HistoryMessage {
        HistoryMessage {
            user: Some(user.to_string()),
            text: text.to_string(),
            ts: ts.to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_gate_ignores_own_messages() {
        let slack = StubSlack::empty();
        let trigger = event(BOT, "hello", None);
        let context = evaluate(&slack, BOT, &trigger, EventKind::Mention).await.expect("gate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_gate_ignores_edits_and_deletions() {
        let slack = StubSlack::empty();
        for subtype in ["message_changed", "message_deleted"] {
            let mut trigger = event("U1", "hello", Some("100.1"));
            trigger.subtype = Some(subtype.to_string());
            let context =
                evaluate(&slack, BOT, &trigger, EventKind::Message).await.expect("gate");
            assert!(context.is_none(), "subtype {subtype} should be dropped");
        }
    }

    #[tokio::test]
    async fn test_gate_ignores_empty_mention() {
        let slack = StubSlack::empty();
        let trigger = event("U1", "<@UBOT>   ", None);
        let context = evaluate(&slack, BOT, &trigger, EventKind::Mention).await.expect("gate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_gate_mention_outside_thread_starts_new_reply() {
        let slack = StubSlack::empty();
        let trigger = event("U1", "<@UBOT> hi", None);
        let context = evaluate(&slack, BOT, &trigger, EventKind::Mention)
            .await
            .expect("gate")
            .expect("reply context");

        assert_eq!(context.thread_ts, "200.1");
        assert_eq!(context.messages.len(), 1);
        assert_eq!(context.messages[0].text, "<@UBOT> hi");
        assert_eq!(context.locale.as_deref(), Some("en-US"));
    }

    #[tokio::test]
    async fn test_gate_mention_in_thread_collects_history() {
        let slack = StubSlack::new(RepliesPage {
            messages: vec![
                message("U1", "earlier question", "100.1"),
                message("U2", "side comment", "100.2"),
                // The trigger itself appears in the fetched history.
                message("U1", "<@UBOT> and now?", "200.1"),
            ],
            has_more: false,
        });
        let trigger = event("U1", "<@UBOT> and now?", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Mention)
            .await
            .expect("gate")
            .expect("reply context");

        assert_eq!(context.thread_ts, "100.1");
        let texts: Vec<&str> = context.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["earlier question", "side comment", "<@UBOT> and now?"]);
    }

    #[tokio::test]
    async fn test_gate_message_with_mention_token_is_deferred() {
        let slack = StubSlack::empty();
        let trigger = event("U1", "<@UBOT> hi", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Message).await.expect("gate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_gate_message_outside_thread_is_ignored() {
        let slack = StubSlack::empty();
        let trigger = event("U1", "just chatting", None);
        let context = evaluate(&slack, BOT, &trigger, EventKind::Message).await.expect("gate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_gate_message_requires_bot_participation() {
        let slack = StubSlack::new(RepliesPage {
            messages: vec![message("U1", "humans talking", "100.1")],
            has_more: false,
        });
        let trigger = event("U2", "more talk", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Message).await.expect("gate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_gate_message_in_participating_thread_replies() {
        let slack = StubSlack::new(RepliesPage {
            messages: vec![
                message("U1", "<@UBOT> hello", "100.1"),
                message(BOT, "hi!", "100.2"),
            ],
            has_more: false,
        });
        let trigger = event("U1", "follow-up", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Message)
            .await
            .expect("gate")
            .expect("reply context");

        let texts: Vec<&str> = context.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["<@UBOT> hello", "hi!", "follow-up"]);
    }

    #[tokio::test]
    async fn test_gate_paginated_thread_posts_notice_and_stops() {
        let slack = StubSlack::new(RepliesPage { messages: Vec::new(), has_more: true });
        let trigger = event("U1", "<@UBOT> hi", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Mention).await.expect("gate");
        assert!(context.is_none());

        let posts = slack.posts.lock().expect("posts lock");
        assert_eq!(posts.len(), 1);
        assert!(posts[0].text.as_deref().expect("text").contains("too long"));
        assert_eq!(posts[0].thread_ts.as_deref(), Some("100.1"));
    }

    #[tokio::test]
    async fn test_gate_user_abort_freezes_thread() {
        let slack = StubSlack::new(RepliesPage {
            messages: vec![
                message("U1", "<@UBOT> hello", "100.1"),
                message(BOT, "hi!", "100.2"),
                message("U1", "  abort  ", "100.3"),
            ],
            has_more: false,
        });
        let trigger = event("U1", "are you still there?", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Message).await.expect("gate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_gate_bot_abort_marker_freezes_thread() {
        let mut marker = message(BOT, "stopping here", "100.2");
        marker.metadata = Some(MessageMetadata {
            event_type: "slackdown_control".to_string(),
            event_payload: json!({CONTROL_MARKER_KEY: ABORT_MARKER}),
        });
        let slack = StubSlack::new(RepliesPage {
            messages: vec![message("U1", "<@UBOT> hello", "100.1"), marker],
            has_more: false,
        });
        let trigger = event("U1", "continue?", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Message).await.expect("gate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_gate_bot_saying_abort_is_not_a_marker() {
        let slack = StubSlack::new(RepliesPage {
            messages: vec![
                message("U1", "<@UBOT> hello", "100.1"),
                message(BOT, "abort", "100.2"),
            ],
            has_more: false,
        });
        let trigger = event("U1", "continue?", Some("100.1"));
        let context = evaluate(&slack, BOT, &trigger, EventKind::Message).await.expect("gate");
        assert!(context.is_some());
    }

    #[tokio::test]
    async fn test_gate_report_error_posts_chain() {
        let slack = StubSlack::empty();
        let error = SlackError::Api("bad_request".to_string());
        report_error(&slack, "C1", "100.1", &error).await;

        let posts = slack.posts.lock().expect("posts lock");
        assert_eq!(posts.len(), 1);
        let text = posts[0].text.as_deref().expect("text");
        assert!(text.starts_with("An error occurred"));
        assert!(text.contains("bad_request"));
    }
