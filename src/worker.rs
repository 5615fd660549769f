//! Analysis worker
//!
//! Drives one analysis from `pending` to `completed` or `failed`: opens the
//! completion stream, feeds every chunk through [`StreamIngest`] and writes a
//! redacted snapshot into the store after each one.

use std::sync::Arc;

use futures::StreamExt;

use crate::models::{AnalysisError, AnalysisId, AnalysisResult, AnalysisStatus, Core};
use crate::provider::{CompletionSource, ProviderError};
use crate::stream::StreamIngest;

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] AnalysisError),

    #[error("stream produced no data")]
    EmptyStream,
}

/// Processes one analysis to completion.
///
/// Stream and provider failures are recorded on the analysis as `failed`; the
/// returned error only covers the analysis itself being unknown.
pub async fn process_analysis(
    core: Core,
    source: Arc<dyn CompletionSource>,
    id: AnalysisId,
) -> Result<(), AnalysisError> {
    let paper_url = core.get_analysis(id)?.paper_url;
    core.set_status(id, AnalysisStatus::Processing)?;

    match stream_analysis(&core, source.as_ref(), id, &paper_url).await {
        Ok(()) => {
            tracing::info!(%id, "analysis completed");
            Ok(())
        }
        Err(WorkerError::Store(e)) => Err(e),
        Err(e) => {
            tracing::error!(%id, error = %e, "analysis failed");
            core.fail(id, e.to_string())
        }
    }
}

/// Runs [`process_analysis`] on the tokio runtime
pub fn spawn_analysis(
    core: Core,
    source: Arc<dyn CompletionSource>,
    id: AnalysisId,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = process_analysis(core, source, id).await {
            tracing::error!(%id, error = %e, "could not process analysis");
        }
    })
}

async fn stream_analysis(
    core: &Core,
    source: &dyn CompletionSource,
    id: AnalysisId,
    paper_url: &str,
) -> Result<(), WorkerError> {
    let mut chunks = source.open(paper_url).await?;
    let mut ingest = StreamIngest::new();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        ingest.push_bytes(&chunk);
        let tick = ingest.tick();
        core.record_progress(id, ingest.snapshot(tick.redacted, true), ingest.tokens())?;
    }

    ingest.finish();
    if ingest.content().trim().is_empty() {
        return Err(WorkerError::EmptyStream);
    }

    let tick = ingest.tick();
    if tick.response.is_none() {
        tracing::warn!(%id, "final buffer did not decode, keeping raw text only");
    }
    core.record_progress(id, ingest.snapshot(tick.redacted, false), ingest.tokens())?;
    core.complete(
        id,
        AnalysisResult {
            response: tick.response,
            raw: ingest.content().to_string(),
        },
        ingest.tokens(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChunkStream;
    use crate::redact::PRESENCE_MARKER;
    use serde_json::json;

    /// Replays fixed chunks, optionally failing partway through
    struct CannedSource {
        chunks: Vec<Vec<u8>>,
        fail_after: Option<usize>,
        refuse: bool,
    }

    impl CannedSource {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks,
                fail_after: None,
                refuse: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl CompletionSource for CannedSource {
        async fn open(&self, _paper_url: &str) -> Result<ChunkStream, ProviderError> {
            if self.refuse {
                return Err(ProviderError::Status {
                    status: 500,
                    body: "down".to_string(),
                });
            }
            let mut items: Vec<Result<Vec<u8>, ProviderError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            if let Some(at) = self.fail_after {
                items.truncate(at);
                items.push(Err(ProviderError::Status {
                    status: 502,
                    body: "connection reset".to_string(),
                }));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn frames(document: &str, pieces: usize) -> Vec<Vec<u8>> {
        let chars: Vec<char> = document.chars().collect();
        let size = chars.len().div_ceil(pieces);
        chars
            .chunks(size)
            .map(|piece| {
                let content: String = piece.iter().collect();
                format!(
                    "data: {}\n\n",
                    json!({"choices": [{"delta": {"content": content}}]})
                )
                .into_bytes()
            })
            .collect()
    }

    fn document() -> String {
        json!({
            "reasoning": [
                {
                    "thought": "find related surveys",
                    "title": "Surveys",
                    "tooluse": {"tool_name": "SearchTool", "parameters": {"query": "q"}, "tool_result": "results"}
                },
                {
                    "thought": "compare",
                    "subtasks": [{"thought": "a", "conclusion": "same"}, {"thought": "b"}]
                }
            ],
            "answer": "novel enough"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_process_completes_analysis() {
        let core = Core::new();
        let id = core.create_analysis("https://arxiv.org/abs/2303.18223".to_string()).unwrap();
        let source = Arc::new(CannedSource::new(frames(&document(), 7)));

        process_analysis(core.clone(), source, id).await.unwrap();

        let analysis = core.get_analysis(id).unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Completed);
        assert_eq!(analysis.error, None);

        let result = analysis.result.clone().unwrap();
        assert_eq!(result.raw, document());
        let response = result.response.unwrap();
        assert_eq!(response.answer, "novel enough");
        assert_eq!(
            response.reasoning[0].tool_use.as_ref().unwrap().tool_result,
            Some(json!("results"))
        );

        let snapshot = analysis.snapshot.clone().unwrap();
        assert_eq!(snapshot.iteration_count, 7);
        assert!(!snapshot.is_streaming);
        let redacted = snapshot.content.unwrap();
        assert_eq!(
            redacted.reasoning[0].tool_use.as_ref().unwrap().tool_result,
            Some(json!(PRESENCE_MARKER))
        );
        assert_eq!(
            analysis.tokens_read,
            Some((document().chars().count() as u64).div_ceil(2))
        );
        assert_eq!(analysis.latest_reasoning().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_stream_fails() {
        let core = Core::new();
        let id = core.create_analysis("u".to_string()).unwrap();
        let source = Arc::new(CannedSource::new(vec![b"data: [DONE]\n\n".to_vec()]));

        process_analysis(core.clone(), source, id).await.unwrap();

        let analysis = core.get_analysis(id).unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Failed);
        assert_eq!(analysis.error.as_deref(), Some("stream produced no data"));
    }

    #[tokio::test]
    async fn test_refused_request_fails() {
        let core = Core::new();
        let id = core.create_analysis("u".to_string()).unwrap();
        let source = Arc::new(CannedSource {
            refuse: true,
            ..CannedSource::new(Vec::new())
        });

        process_analysis(core.clone(), source, id).await.unwrap();

        let analysis = core.get_analysis(id).unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Failed);
        assert_eq!(analysis.error.as_deref(), Some("API request failed: 500 down"));
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_progress() {
        let core = Core::new();
        let id = core.create_analysis("u".to_string()).unwrap();
        let source = Arc::new(CannedSource {
            fail_after: Some(5),
            ..CannedSource::new(frames(&document(), 7))
        });

        process_analysis(core.clone(), source, id).await.unwrap();

        let analysis = core.get_analysis(id).unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Failed);
        assert!(analysis.error.unwrap().contains("connection reset"));
        let snapshot = analysis.snapshot.unwrap();
        assert_eq!(snapshot.iteration_count, 5);
        assert!(!snapshot.is_streaming);
        assert!(snapshot.content.is_some());
        assert!(analysis.result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_analysis_is_an_error() {
        let core = Core::new();
        let source = Arc::new(CannedSource::new(Vec::new()));
        assert!(matches!(
            process_analysis(core, source, AnalysisId::new(9)).await,
            Err(AnalysisError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_spawned_analysis_notifies_subscribers() {
        let core = Core::new();
        let id = core.create_analysis("u".to_string()).unwrap();
        let mut rx = core.subscribe();
        let source = Arc::new(CannedSource::new(frames(&document(), 3)));

        spawn_analysis(core.clone(), source, id).await.unwrap();

        let mut updates = 0;
        while let Ok(updated) = rx.try_recv() {
            assert_eq!(updated, id);
            updates += 1;
        }
        // processing, three ticks, final snapshot, completion
        assert_eq!(updates, 6);
    }
}
