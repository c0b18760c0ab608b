//! Backend fragments → OpenAI completion payloads.

use dsk_protocol::{completion_id, unix_now, ChatCompletionChunk, ChatCompletionResponse};
use dsk_providers::{BackendResult, RawFragment};
use futures::{Stream, StreamExt};

/// What a finished turn leaves behind for the session registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    pub last_message_id: Option<String>,
    /// A terminal fragment was seen.
    pub terminated: bool,
}

impl TurnOutcome {
    /// The parent pointer to commit, only for terminated turns.
    pub fn committable_id(&self) -> Option<&str> {
        if self.terminated {
            self.last_message_id.as_deref()
        } else {
            None
        }
    }
}

/// Incremental translator for one completion.
///
/// Every chunk of a completion shares one id, creation time and model.
#[derive(Debug)]
pub struct ChunkTranslator {
    id: String,
    created: i64,
    model: String,
    outcome: TurnOutcome,
    finished: bool,
}

impl ChunkTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_identity(completion_id(), unix_now(), model)
    }

    pub fn with_identity(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
            outcome: TurnOutcome::default(),
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn outcome(&self) -> &TurnOutcome {
        &self.outcome
    }

    /// Feed one fragment. Yields its content chunk (if non-empty) and, for a
    /// terminal fragment, the stop chunk. Fragments after the stop chunk are
    /// ignored.
    pub fn push(&mut self, fragment: &RawFragment) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }
        if let Some(id) = &fragment.raw_id {
            self.outcome.last_message_id = Some(id.clone());
        }

        let mut chunks = Vec::with_capacity(2);
        if !fragment.content.is_empty() {
            chunks.push(ChatCompletionChunk::content(
                &self.id,
                self.created,
                &self.model,
                fragment.content.as_str(),
            ));
        }
        if fragment.is_terminal() {
            self.outcome.terminated = true;
            self.finished = true;
            chunks.push(self.stop_chunk());
        }
        chunks
    }

    /// Close the sequence when the source ended. Emits the stop chunk unless
    /// a terminal fragment already did; the turn stays unterminated.
    pub fn finish(&mut self) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.stop_chunk())
    }

    fn stop_chunk(&self) -> ChatCompletionChunk {
        ChatCompletionChunk::stop(&self.id, self.created, &self.model)
    }
}

/// Lazily translate a fragment stream into chunks.
///
/// `on_complete` runs once the stream is exhausted (after the stop chunk, or
/// after an error item). It never runs if the returned stream is dropped
/// early.
pub fn translate<S, F>(
    fragments: S,
    mut translator: ChunkTranslator,
    on_complete: F,
) -> impl Stream<Item = BackendResult<ChatCompletionChunk>> + Send
where
    S: Stream<Item = BackendResult<RawFragment>> + Send + 'static,
    F: FnOnce(TurnOutcome) + Send + 'static,
{
    async_stream::stream! {
        futures::pin_mut!(fragments);
        let mut failed = false;

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    for chunk in translator.push(&fragment) {
                        yield Ok(chunk);
                    }
                    if translator.is_finished() {
                        break;
                    }
                }
                Err(err) => {
                    failed = true;
                    yield Err(err);
                    break;
                }
            }
        }

        if !failed {
            if let Some(stop) = translator.finish() {
                yield Ok(stop);
            }
        }
        on_complete(translator.outcome().clone());
    }
}

/// Drain a fragment stream into a single `chat.completion` response.
pub async fn aggregate<S>(
    fragments: S,
    mut translator: ChunkTranslator,
) -> BackendResult<(ChatCompletionResponse, TurnOutcome)>
where
    S: Stream<Item = BackendResult<RawFragment>>,
{
    futures::pin_mut!(fragments);
    let mut content = String::new();

    while let Some(fragment) = fragments.next().await {
        for chunk in translator.push(&fragment?) {
            if let Some(delta) = chunk.delta_content() {
                content.push_str(delta);
            }
        }
        if translator.is_finished() {
            break;
        }
    }
    translator.finish();

    let response = ChatCompletionResponse::stop(
        translator.id().to_string(),
        translator.created(),
        translator.model().to_string(),
        content,
    );
    Ok((response, translator.outcome().clone()))
}
