use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use vigil_core::{decode_probe, Embedder, InferenceResult, InferenceSession, Matcher, SessionError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Identify {
        request_id: Uuid,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<InferenceResult, SessionError>>,
    },
}

/// Options for the engine thread and its handles.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub timeout: Duration,
    pub queue_depth: usize,
    pub capture_dir: Option<PathBuf>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Identify the face in `image`. The timeout covers time spent queued
    /// behind other requests as well as the inference itself.
    pub async fn identify(&self, image: Vec<u8>) -> Result<InferenceResult, EngineError> {
        let request_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = EngineRequest::Identify {
            request_id,
            image,
            reply: reply_tx,
        };

        let exchange = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
            Ok::<_, EngineError>(result?)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%request_id, timeout = ?self.timeout, "identify request timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the embedder (and with it the device graph) and serves
/// requests strictly one at a time. It exits, releasing the device, once every
/// [`EngineHandle`] has been dropped.
pub fn spawn_engine<E, M>(
    mut embedder: E,
    mut session: InferenceSession<M>,
    options: EngineOptions,
) -> Result<(EngineHandle, JoinHandle<()>), EngineError>
where
    E: Embedder + Send + 'static,
    M: Matcher + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(options.queue_depth.max(1));
    let capture_dir = options.capture_dir;

    let thread = std::thread::Builder::new()
        .name("vigil-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Identify {
                        request_id,
                        image,
                        reply,
                    } => {
                        // The caller already timed out; don't spend the device on it.
                        if reply.is_closed() {
                            tracing::debug!(%request_id, "caller gone before start; skipping");
                            continue;
                        }
                        let span = tracing::info_span!("identify", %request_id);
                        let result = span.in_scope(|| {
                            run_identify(
                                &mut embedder,
                                &mut session,
                                &image,
                                capture_dir.as_deref(),
                                request_id,
                            )
                        });
                        if reply.send(result).is_err() {
                            tracing::debug!(%request_id, "caller gone; dropping reply");
                        }
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok((
        EngineHandle {
            tx,
            timeout: options.timeout,
        },
        thread,
    ))
}

fn run_identify<E: Embedder, M: Matcher>(
    embedder: &mut E,
    session: &mut InferenceSession<M>,
    image: &[u8],
    capture_dir: Option<&Path>,
    request_id: Uuid,
) -> Result<InferenceResult, SessionError> {
    let started = Instant::now();
    tracing::info!(bytes = image.len(), "inference started");

    let probe = decode_probe(image)?;
    if let Some(dir) = capture_dir {
        capture_probe(dir, &probe, request_id);
    }

    let result = session.identify_image(embedder, &probe);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(r) => tracing::info!(
            identified = r.identified,
            person = %r.person,
            confidence = r.confidence,
            elapsed_ms,
            "inference finished"
        ),
        Err(e) => tracing::warn!(error = %e, elapsed_ms, "inference failed"),
    }
    result
}

/// Save the decoded probe as PNG. Failures are logged, never propagated.
fn capture_probe(dir: &Path, probe: &DynamicImage, request_id: Uuid) {
    let name = format!(
        "{}-{}.png",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
        request_id
    );
    let path = dir.join(name);
    let saved = std::fs::create_dir_all(dir)
        .map_err(image::ImageError::IoError)
        .and_then(|_| probe.save(&path));
    match saved {
        Ok(()) => tracing::debug!(path = %path.display(), "probe captured"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "probe capture failed"),
    }
}
