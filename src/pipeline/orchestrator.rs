use std::sync::{Arc, Mutex, MutexGuard};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    core::{
        config::PipelineSettings,
        errors::{AppError, AppResult},
        types::{
            DocumentIdentity, GeneratedSegment, GenerationReport, Notification, Segment, StoreKey,
            Variant, ORIGINAL_STORE,
        },
    },
    db::{repositories::segments, Database},
    document::surface::DocumentSurface,
    rewriter::Rewriter,
    security::credentials::CredentialStrategy,
    segmenter::{self, address::StructuralPath},
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    Collected,
    VariantSelected,
    Generating,
}

/// Everything the orchestrator remembers between messages.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub identity: Option<DocumentIdentity>,
    pub variant: Option<Variant>,
    pub state: PipelineState,
    pub user_key: Option<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
    surface: Arc<dyn DocumentSurface>,
    rewriter: Rewriter,
    credentials: Arc<dyn CredentialStrategy>,
    settings: PipelineSettings,
    session: Arc<Mutex<Session>>,
    events: broadcast::Sender<Notification>,
}

struct GenerationTicket {
    identity: DocumentIdentity,
    variant: Variant,
    user_key: Option<String>,
    prior: PipelineState,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        surface: Arc<dyn DocumentSurface>,
        rewriter: Rewriter,
        credentials: Arc<dyn CredentialStrategy>,
        settings: PipelineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            surface,
            rewriter,
            credentials,
            settings,
            session: Arc::new(Mutex::new(Session::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn state(&self) -> AppResult<PipelineState> {
        Ok(self.lock_session()?.state)
    }

    pub fn session(&self) -> AppResult<Session> {
        Ok(self.lock_session()?.clone())
    }

    pub fn set_user_key(&self, key: Option<String>) -> AppResult<()> {
        let key = key.map(|key| key.trim().to_string()).filter(|key| !key.is_empty());
        self.lock_session()?.user_key = key;
        Ok(())
    }

    /// Prepares the page's stores, extracts its segments and caches them as `original`.
    pub async fn setup(&self, identity: DocumentIdentity, variant_names: &[String]) -> AppResult<usize> {
        if variant_names.iter().any(|name| name == ORIGINAL_STORE) {
            return Err(AppError::InvalidInput(format!(
                "variant name \"{ORIGINAL_STORE}\" is reserved"
            )));
        }

        segments::ensure_schema(self.db.pool(), &identity, variant_names).await?;
        let tree = self.surface.collect_tree().await?;
        let collected = segmenter::collect_segments(&tree, self.settings.min_visible_text);
        segments::replace_all(self.db.pool(), &StoreKey::original(&identity), &collected).await?;

        {
            let mut session = self.lock_session()?;
            if session.identity.as_ref() != Some(&identity) {
                session.variant = None;
            }
            session.identity = Some(identity.clone());
            if session.state != PipelineState::Generating {
                session.state = PipelineState::Collected;
            }
        }

        info!(identity = %identity, segments = collected.len(), "page set up");
        Ok(collected.len())
    }

    /// Shows the cached rewrite of `variant` if there is one, else restores the original.
    pub async fn select_variant(&self, variant: Variant) -> AppResult<usize> {
        if variant.name.trim().is_empty() || variant.name == ORIGINAL_STORE {
            return Err(AppError::InvalidInput(format!("invalid variant name {:?}", variant.name)));
        }
        let identity = {
            let session = self.lock_session()?;
            if session.state == PipelineState::Generating {
                return Err(AppError::InvalidState("a generation is still running".to_string()));
            }
            session
                .identity
                .clone()
                .ok_or_else(|| AppError::InvalidState("no page has been set up".to_string()))?
        };

        let generated: Vec<GeneratedSegment> =
            self.fetch_or_empty(&StoreKey::new(&identity, variant.name.clone())).await?;
        let replayed = if generated.is_empty() {
            let originals: Vec<Segment> = self.fetch_or_empty(&StoreKey::original(&identity)).await?;
            debug!(variant = %variant.name, "no cached rewrite, restoring original");
            self.replay(originals.iter().map(|segment| (&segment.path, segment.html.as_str())))
                .await
        } else {
            self.replay(generated.iter().map(|segment| (&segment.path, segment.html.as_str())))
                .await
        };

        {
            let mut session = self.lock_session()?;
            session.variant = Some(variant);
            session.state = PipelineState::VariantSelected;
        }
        Ok(replayed)
    }

    /// Rewrites every cached segment of the current page under the selected
    /// variant, writing each result back as it arrives and caching the batch.
    pub async fn generate(&self, fallback_key: &str) -> AppResult<GenerationReport> {
        let run_id = Uuid::new_v4().to_string();
        let ticket = match self.begin_generation() {
            Ok(ticket) => ticket,
            Err(err) => {
                self.emit_failure(&run_id, &err);
                return Err(err);
            }
        };
        self.emit(Notification::GenerationInitialized {
            run_id: run_id.clone(),
        });

        let outcome = self
            .run_generation(&run_id, &ticket, fallback_key)
            .instrument(info_span!("generate", run_id = %run_id, variant = %ticket.variant.name))
            .await;

        if let Ok(mut session) = self.lock_session() {
            if session.state == PipelineState::Generating {
                session.state = ticket.prior;
            }
        }

        match &outcome {
            Ok(report) => {
                if report.cached {
                    self.emit(Notification::TemplateCached {
                        template_name: ticket.variant.name.clone(),
                    });
                }
                self.emit(Notification::GenerationCompleted {
                    run_id,
                    rewritten: report.rewritten,
                });
            }
            Err(err) => self.emit_failure(&run_id, err),
        }
        outcome
    }

    /// Drops the page's cache entirely.
    pub async fn clear_cache(&self, identity: &DocumentIdentity) -> AppResult<bool> {
        let removed = segments::destroy(self.db.pool(), identity).await?;
        {
            let mut session = self.lock_session()?;
            if session.identity.as_ref() == Some(identity) {
                session.identity = None;
                session.variant = None;
            }
            session.state = PipelineState::Idle;
        }
        self.emit(Notification::CacheDeleted);
        Ok(removed)
    }

    /// Empties the stores of the page being left and of the page just loaded.
    pub async fn navigation_completed(&self, url: &str) -> AppResult<()> {
        let navigated = DocumentIdentity::from_url(url)?;
        let previous = {
            let mut session = self.lock_session()?;
            session.variant = None;
            session.state = PipelineState::Idle;
            session.identity.take()
        };

        if let Some(previous) = previous.filter(|previous| *previous != navigated) {
            segments::clear_all(self.db.pool(), &previous).await?;
        }
        segments::clear_all(self.db.pool(), &navigated).await?;

        self.emit(Notification::ClosePopup);
        Ok(())
    }

    fn begin_generation(&self) -> AppResult<GenerationTicket> {
        let mut session = self.lock_session()?;
        if session.state == PipelineState::Generating {
            return Err(AppError::InvalidState("a generation is already running".to_string()));
        }
        let identity = session
            .identity
            .clone()
            .ok_or_else(|| AppError::InvalidState("no page has been set up".to_string()))?;
        let variant = session
            .variant
            .clone()
            .ok_or_else(|| AppError::InvalidState("no variant has been selected".to_string()))?;
        let prior = session.state;
        session.state = PipelineState::Generating;
        Ok(GenerationTicket {
            identity,
            variant,
            user_key: session.user_key.clone(),
            prior,
        })
    }

    async fn run_generation(
        &self,
        run_id: &str,
        ticket: &GenerationTicket,
        fallback_key: &str,
    ) -> AppResult<GenerationReport> {
        let version = segments::current_version(self.db.pool(), &ticket.identity)
            .await?
            .ok_or_else(|| AppError::InvalidState(format!("page {} has no cache", ticket.identity)))?;
        let originals: Vec<Segment> = self.fetch_or_empty(&StoreKey::original(&ticket.identity)).await?;
        let attempted = originals.len();

        let credential: Arc<str> = self
            .credentials
            .resolve(ticket.user_key.as_deref(), fallback_key)
            .await
            .into();

        let limiter = self
            .settings
            .max_concurrent_rewrites
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let timeout = self.settings.rewrite_timeout();
        let (tx, mut rx) = mpsc::unbounded_channel::<(StructuralPath, Option<String>)>();

        for segment in originals {
            let tx = tx.clone();
            let rewriter = self.rewriter.clone();
            let variant = ticket.variant.clone();
            let credential = Arc::clone(&credential);
            let limiter = limiter.clone();
            let span = info_span!("rewrite", run_id = %run_id, path = %segment.path);

            tokio::spawn(
                async move {
                    let _permit = match limiter {
                        Some(limiter) => limiter.acquire_owned().await.ok(),
                        None => None,
                    };
                    let rewrite = rewriter.rewrite(&credential, &variant, &segment.html);
                    let html = match timeout {
                        Some(limit) => tokio::time::timeout(limit, rewrite).await.unwrap_or_else(|_| {
                            warn!(seconds = limit.as_secs(), "rewrite timed out");
                            None
                        }),
                        None => rewrite.await,
                    };
                    let _ = tx.send((segment.path, html));
                }
                .instrument(span),
            );
        }
        drop(tx);

        let mut generated = Vec::new();
        let mut written_back = 0usize;
        while let Some((path, html)) = rx.recv().await {
            let Some(html) = html else {
                continue;
            };
            match self.surface.replace_markup(&path, &html).await {
                Ok(true) => written_back += 1,
                Ok(false) => warn!(path = %path, "segment no longer in the document, skipping write-back"),
                Err(err) => warn!(path = %path, error = %err, "write-back failed"),
            }
            generated.push(GeneratedSegment { path, html });
        }

        let cached = segments::replace_all_at_version(
            self.db.pool(),
            &StoreKey::new(&ticket.identity, ticket.variant.name.clone()),
            version,
            &generated,
        )
        .await?;

        info!(attempted, rewritten = generated.len(), written_back, cached, "generation finished");
        Ok(GenerationReport {
            run_id: run_id.to_string(),
            attempted,
            rewritten: generated.len(),
            written_back,
            cached,
        })
    }

    async fn replay<'a>(&self, items: impl Iterator<Item = (&'a StructuralPath, &'a str)>) -> usize {
        let mut replayed = 0usize;
        for (path, html) in items {
            match self.surface.replace_markup(path, html).await {
                Ok(true) => replayed += 1,
                Ok(false) => debug!(path = %path, "cached segment no longer resolves"),
                Err(err) => warn!(path = %path, error = %err, "replay failed"),
            }
        }
        replayed
    }

    async fn fetch_or_empty<T: DeserializeOwned>(&self, key: &StoreKey) -> AppResult<Vec<T>> {
        match segments::fetch_all(self.db.pool(), key).await {
            Err(AppError::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    fn emit_failure(&self, run_id: &str, err: &AppError) {
        warn!(run_id = %run_id, code = err.code(), error = %err, "generation failed");
        self.emit(Notification::GenerationFailed {
            run_id: run_id.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.retryable(),
        });
    }

    fn emit(&self, notification: Notification) {
        let _ = self.events.send(notification);
    }

    fn lock_session(&self) -> AppResult<MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|_| AppError::Internal("pipeline session lock poisoned".to_string()))
    }
}
