use std::sync::Arc;
use std::time::Duration;

use agent_provider::{cancel, cancel_signal, is_cancelled, Attachment, ContentPart, Role};
use agent_provider_mock::{MockProvider, MockStep};
use attachment_resolver::InMemoryAttachmentSource;
use frame_codec::{decode, Frame};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use stream_producer::{
    spawn_producer, ProducerState, StreamProducer, TurnMessage, TurnRequest, VecSink,
    CANCELLED_MESSAGE,
};

fn producer(provider: Arc<MockProvider>) -> StreamProducer {
    StreamProducer::new(provider, Arc::new(InMemoryAttachmentSource::new()))
}

fn ask(text: &str) -> TurnRequest {
    TurnRequest::new(1, vec![TurnMessage::new("u1", Role::User, text)])
}

fn text(value: &str) -> Frame {
    Frame::TextDelta(value.to_string())
}

fn assert_single_terminal(frames: &[Frame]) {
    assert_eq!(frames.first(), Some(&Frame::Start));
    let terminals = frames.iter().filter(|frame| frame.is_terminal()).count();
    assert_eq!(terminals, 1, "{frames:?}");
    assert!(frames.last().is_some_and(Frame::is_terminal), "{frames:?}");
}

async fn run_to_vec(mut producer: StreamProducer, request: TurnRequest) -> (Vec<Frame>, ProducerState) {
    let mut sink = VecSink::default();
    let outcome = producer.run(request, &mut sink, cancel_signal()).await;
    assert_eq!(producer.state(), outcome.state);
    (sink.frames, outcome.state)
}

#[tokio::test]
async fn text_deltas_stream_then_finish() {
    let provider = Arc::new(MockProvider::new(vec![
        MockStep::Text("a".to_string()),
        MockStep::Text("b".to_string()),
    ]));

    let (frames, state) = run_to_vec(producer(provider), ask("hi")).await;

    assert_eq!(frames, vec![Frame::Start, text("a"), text("b"), Frame::stop()]);
    assert_eq!(state, ProducerState::Finished);
}

#[tokio::test]
async fn inline_reasoning_becomes_reasoning_frames() {
    let provider = Arc::new(MockProvider::from_words("<thinking>plan it</thinking>Answer."));

    let (frames, _) = run_to_vec(producer(provider), ask("hi")).await;

    assert_eq!(
        frames,
        vec![
            Frame::Start,
            Frame::ReasoningDelta("plan it".to_string()),
            text("Answer."),
            Frame::stop(),
        ]
    );
}

#[tokio::test]
async fn declared_reasoning_is_forwarded() {
    let provider = Arc::new(MockProvider::new(vec![
        MockStep::Reasoning("weigh options".to_string()),
        MockStep::Text("Done".to_string()),
    ]));

    let (frames, _) = run_to_vec(producer(provider), ask("hi")).await;

    assert_eq!(
        frames,
        vec![
            Frame::Start,
            Frame::ReasoningDelta("weigh options".to_string()),
            text("Done"),
            Frame::stop(),
        ]
    );
}

#[tokio::test]
async fn rejected_provider_ends_with_error_frame() {
    let provider = Arc::new(MockProvider::rejecting("missing API key"));

    let (frames, state) = run_to_vec(producer(provider), ask("hi")).await;

    assert_eq!(
        frames,
        vec![
            Frame::Start,
            Frame::Error("provider rejected request: missing API key".to_string()),
        ]
    );
    assert_eq!(state, ProducerState::Failed);
}

#[tokio::test]
async fn provider_failure_keeps_partial_output() {
    let provider = Arc::new(MockProvider::new(vec![
        MockStep::Text("partial".to_string()),
        MockStep::Fail("upstream overloaded".to_string()),
    ]));

    let (frames, state) = run_to_vec(producer(provider), ask("hi")).await;

    assert_single_terminal(&frames);
    assert_eq!(
        frames,
        vec![
            Frame::Start,
            text("partial"),
            Frame::Error("upstream overloaded".to_string()),
        ]
    );
    assert_eq!(state, ProducerState::Failed);
}

#[tokio::test]
async fn attachments_reach_the_provider_as_prompt_parts() {
    let source = InMemoryAttachmentSource::new();
    source.insert("att-1", b"hello file".to_vec());
    let provider = Arc::new(MockProvider::new(vec![MockStep::Text("ok".to_string())]));
    let producer = StreamProducer::new(provider.clone(), Arc::new(source));

    let request = TurnRequest::new(
        9,
        vec![
            TurnMessage::new("u1", Role::User, "first"),
            TurnMessage::new("a1", Role::Assistant, "reply"),
            TurnMessage::new("u2", Role::User, "Read this"),
        ],
    )
    .with_attachments(vec![Attachment::new("att-1", "notes.txt", "text/plain", 10)]);

    let (frames, _) = run_to_vec(producer, request).await;
    assert_single_terminal(&frames);

    let seen = provider.last_request().expect("provider should have been called");
    assert_eq!(seen.run_id, 9);
    assert_eq!(seen.messages.len(), 3);
    assert_eq!(seen.messages[0].parts, vec![ContentPart::text("first")]);
    assert_eq!(
        seen.messages[2].parts,
        vec![
            ContentPart::text("Read this"),
            ContentPart::text("notes.txt:\nhello file"),
        ]
    );
}

#[tokio::test]
async fn oversized_attachment_is_a_notice_not_a_failure() {
    let provider = Arc::new(MockProvider::new(vec![MockStep::Text("ok".to_string())]));
    let producer = StreamProducer::new(provider.clone(), Arc::new(InMemoryAttachmentSource::new()));
    let request = ask("").with_attachments(vec![Attachment::new(
        "big",
        "scan.png",
        "image/png",
        31 * 1024 * 1024,
    )]);

    let (frames, state) = run_to_vec(producer, request).await;

    assert_eq!(state, ProducerState::Finished);
    assert_eq!(frames.last(), Some(&Frame::stop()));
    let seen = provider.last_request().expect("provider should have been called");
    let parts = &seen.messages[0].parts;
    assert_eq!(parts.len(), 1);
    assert!(matches!(&parts[0], ContentPart::Text { text } if text.contains("exceeds")));
}

#[tokio::test]
async fn cancellation_ends_stream_with_error_frame() {
    let provider = Arc::new(
        MockProvider::new(
            (0..5)
                .map(|index| MockStep::Text(format!("t{index} ")))
                .collect(),
        )
        .with_token_delay(Duration::from_millis(20)),
    );

    let (mut body, handle, cancel_flag) = spawn_producer(producer(provider), ask("hi"), 16);

    let mut frames = Vec::new();
    while let Some(line) = body.next().await {
        let frame = decode(&line).expect("producer emits valid lines");
        let first_text = matches!(frame, Frame::TextDelta(_));
        frames.push(frame);
        if first_text {
            cancel(&cancel_flag);
        }
    }

    let outcome = handle.await.expect("producer task should not panic");
    assert_eq!(outcome.state, ProducerState::Failed);
    assert_eq!(outcome.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert_single_terminal(&frames);
    assert_eq!(frames.last(), Some(&Frame::Error(CANCELLED_MESSAGE.to_string())));
    assert!(frames.len() < 7, "{frames:?}");
}

#[tokio::test]
async fn dropped_body_cancels_the_run() {
    let provider = Arc::new(
        MockProvider::from_words("one two three four five")
            .with_token_delay(Duration::from_millis(10)),
    );

    let (mut body, handle, cancel_flag) = spawn_producer(producer(provider), ask("hi"), 1);
    assert_eq!(body.next().await.as_deref(), Some("f:{}\n"));
    drop(body);

    let outcome = handle.await.expect("producer task should not panic");
    assert_eq!(outcome.state, ProducerState::Failed);
    assert!(is_cancelled(&cancel_flag));
}
