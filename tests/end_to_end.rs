use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use agent_provider::{cancel, cancel_signal, RunId};
use agent_provider_mock::{MockProvider, MockStep};
use attachment_resolver::InMemoryAttachmentSource;
use chat_stream::{
    ChatSession, DurableId, DurableThreadId, GenerationState, Message, MessageOrigin, MessageStore,
    SessionHost, StreamConsumer, StreamRequest, Thread, Timestamp,
};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use session_store::InMemoryMessageStore;
use stream_producer::{spawn_producer, ProducerState, StreamProducer, TurnMessage, TurnRequest};

#[derive(Default)]
struct RecordingHost {
    next_run: RunId,
    started: Vec<(RunId, StreamRequest)>,
}

impl SessionHost for RecordingHost {
    fn start_stream(&mut self, request: StreamRequest) -> Result<RunId, String> {
        self.next_run += 1;
        self.started.push((self.next_run, request));
        Ok(self.next_run)
    }

    fn cancel_stream(&mut self, _run_id: RunId) {}

    fn request_overwrite(&mut self, _thread: &DurableThreadId, _ids: Vec<DurableId>) {}

    fn request_render(&mut self) {}
}

fn turn_request(run_id: RunId, request: &StreamRequest) -> TurnRequest {
    TurnRequest::new(
        run_id,
        request
            .history
            .iter()
            .map(|message| TurnMessage::new(message.id.as_str(), message.role, message.content.clone()))
            .collect(),
    )
    .with_attachments(request.attachments.clone())
}

fn producer(provider: MockProvider) -> StreamProducer {
    StreamProducer::new(Arc::new(provider), Arc::new(InMemoryAttachmentSource::new()))
}

/// Runs one producer/consumer pair for the host's latest request and feeds
/// every update back into the session.
async fn stream_reply(session: &mut ChatSession, host: &RecordingHost, provider: MockProvider) -> GenerationState {
    let (run_id, request) = host.started.last().cloned().expect("a run was started");
    let (body, handle, _cancel) = spawn_producer(producer(provider), turn_request(run_id, &request), 16);

    let mut consumer = StreamConsumer::new(request.assistant.clone());
    let state = consumer
        .consume(body.map(Ok::<_, Infallible>), &cancel_signal(), |message| {
            session.on_stream_update(run_id, message);
        })
        .await;
    handle.await.expect("producer task should not panic");
    state
}

fn session() -> ChatSession {
    ChatSession::new(Thread::default()).with_clock(|| Timestamp::from_millis(1_000))
}

#[tokio::test]
async fn streamed_reply_lands_in_the_timeline() {
    let mut host = RecordingHost::default();
    let mut session = session();
    session.submit(&mut host, "hello", None, Vec::new()).expect("submit");

    let provider = MockProvider::new(vec![
        MockStep::Text("a".to_string()),
        MockStep::Text("b".to_string()),
    ]);
    let state = stream_reply(&mut session, &host, provider).await;

    assert_eq!(state, GenerationState::Complete);
    let contents: Vec<&str> = session.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hello", "ab"]);
    assert_eq!(session.messages()[1].generation_state, GenerationState::Complete);
    assert_eq!(session.active_run(), None);
}

#[tokio::test]
async fn inline_reasoning_arrives_as_completed_reasoning() {
    let mut host = RecordingHost::default();
    let mut session = session();
    session.submit(&mut host, "why?", None, Vec::new()).expect("submit");

    let provider = MockProvider::from_words("<thinking>consider the sky</thinking>Because.");
    stream_reply(&mut session, &host, provider).await;

    let reply = &session.messages()[1];
    assert_eq!(reply.content, "Because.");
    assert_eq!(reply.reasoning().as_deref(), Some("consider the sky"));
    assert!(!reply.has_open_reasoning());
}

#[tokio::test]
async fn abort_after_two_deltas_keeps_exactly_those_deltas() {
    let provider = MockProvider::new(
        (0..5)
            .map(|index| MockStep::Text(format!("t{index} ")))
            .collect(),
    )
    .with_token_delay(Duration::from_millis(20));
    let request = TurnRequest::new(1, vec![TurnMessage::new("u1", chat_stream::Role::User, "go")]);
    let (body, handle, _) = spawn_producer(producer(provider), request, 16);

    let abort = cancel_signal();
    let flag = abort.clone();
    let mut deltas = 0;
    let mut consumer = StreamConsumer::new(Message::assistant_placeholder(None, Timestamp::from_millis(1)));
    let state = consumer
        .consume(body.map(Ok::<_, Infallible>), &abort, move |_| {
            deltas += 1;
            if deltas == 2 {
                cancel(&flag);
            }
        })
        .await;

    assert_eq!(state, GenerationState::Stopped);
    assert_eq!(consumer.message().content, "t0 t1 ");

    let outcome = handle.await.expect("producer task should not panic");
    assert_eq!(outcome.state, ProducerState::Failed);
}

#[tokio::test]
async fn provider_error_keeps_partial_reply_with_error() {
    let mut host = RecordingHost::default();
    let mut session = session();
    session.submit(&mut host, "hello", None, Vec::new()).expect("submit");

    let provider = MockProvider::new(vec![
        MockStep::Text("half".to_string()),
        MockStep::Fail("rate limited".to_string()),
    ]);
    let state = stream_reply(&mut session, &host, provider).await;

    assert_eq!(state, GenerationState::Stopped);
    let reply = &session.messages()[1];
    assert_eq!(reply.content, "half");
    assert_eq!(reply.error.as_deref(), Some("rate limited"));
    assert!(session.regeneration_state() == chat_stream::RegenerationState::Idle);
}

#[tokio::test]
async fn persisted_reply_swaps_ids_without_duplicates() {
    let store = InMemoryMessageStore::new().with_timestamp_offset(5);
    let mut host = RecordingHost::default();
    let mut session = session();
    session.submit(&mut host, "hello", None, Vec::new()).expect("submit");
    stream_reply(&mut session, &host, MockProvider::from_words("hi there")).await;
    let before: Vec<String> = session.messages().iter().map(|m| m.content.clone()).collect();

    let stored = session.persist_pending(&store).await.expect("persist");
    assert_eq!(stored, 2);
    assert!(session.messages().iter().all(|message| message.id.is_durable()));

    let thread = session.thread().key.durable().cloned().expect("thread persisted");
    assert_eq!(store.title(&thread).as_deref(), Some("hello"));
    let snapshot = store.get_messages(&thread).await.expect("snapshot");
    session.on_store_snapshot(snapshot.clone());

    let after: Vec<String> = session.messages().iter().map(|m| m.content.clone()).collect();
    assert_eq!(before, after);
    assert!(session.timeline().origins.iter().all(|origin| *origin == MessageOrigin::Merged));

    let settled = session.messages().to_vec();
    session.on_store_snapshot(snapshot);
    assert_eq!(session.messages(), settled.as_slice());
}

#[tokio::test]
async fn server_side_persistence_is_matched_by_expectation() {
    let store = InMemoryMessageStore::new().with_timestamp_offset(5);
    let mut host = RecordingHost::default();
    let mut session = session();
    session.submit(&mut host, "hello", None, Vec::new()).expect("submit");
    stream_reply(&mut session, &host, MockProvider::from_words("hi there")).await;
    let thread = session.persist_thread(&store).await.expect("thread");

    // The server stores both messages without telling the session their ids.
    for message in session.messages().to_vec() {
        store.append_message(&thread, message).await.expect("append");
    }
    let snapshot = store.get_messages(&thread).await.expect("snapshot");
    session.on_store_snapshot(snapshot.clone());

    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.timeline().promotions.len(), 2);
    let ids: Vec<_> = session.messages().iter().map(|m| m.id.clone()).collect();
    let stored_ids: Vec<_> = snapshot.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, stored_ids);
    assert_eq!(session.messages()[0].created_at, Timestamp::from_millis(1_005));
}
