//! Upload session manager.
//!
//! An upload moves through `Created -> Negotiating -> Transferring ->
//! Finalizing -> Complete`, or ends in `Failed`. Everything that can be
//! rejected without I/O (size, metadata) is rejected before the payment gate
//! is asked, and the payment gate is asked before any provider is contacted.
//! Only the transfer itself is retried, and only when the source can be
//! replayed from its first byte.

use crate::error::{TransferError, TransferStage, UploadError};
use crate::payment::{self, PaymentGate, PaymentRequirements};
use crate::pipeline::{ByteSource, PipeOptions, TransferReport, pipe};
use crate::progress::{self, ProgressObserver};
use crate::provider::{DealTerms, StorageProvider, UploadSink};
use crate::retry::RetryPolicy;
use crate::source::HashingSource;
use depot_core::config::TransferConfig;
use depot_core::{ObjectMetadata, ObjectRecord, PieceCid, UploadPhase};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Per-upload options.
#[derive(Clone)]
pub struct UploadOptions {
    /// Ask for CDN-backed retrieval.
    pub with_cdn: bool,
    pub cancel: CancellationToken,
    pub observer: Arc<dyn ProgressObserver>,
}

impl UploadOptions {
    pub fn with_cdn(mut self, with_cdn: bool) -> Self {
        self.with_cdn = with_cdn;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            with_cdn: false,
            cancel: CancellationToken::new(),
            observer: progress::noop(),
        }
    }
}

/// Proof of a completed upload.
#[derive(Clone, Debug)]
pub struct UploadReceipt {
    pub identifier: PieceCid,
    pub size: u64,
    /// Provider that stored the object.
    pub provider: String,
    /// Transfer attempts made, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
    pub report: TransferReport,
}

/// Tracks the phase of one upload and reports transitions.
struct PhaseTracker {
    phase: UploadPhase,
    observer: Arc<dyn ProgressObserver>,
}

impl PhaseTracker {
    fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            phase: UploadPhase::Created,
            observer,
        }
    }

    fn advance(&mut self, next: UploadPhase) {
        debug_assert!(
            self.phase.can_transition_to(&next),
            "illegal upload transition {} -> {}",
            self.phase,
            next
        );
        debug!(from = self.phase.as_str(), to = next.as_str(), "upload phase");
        self.observer.on_phase(&next);
        self.phase = next;
    }
}

/// Drives uploads through payment, negotiation, transfer and commit.
pub struct UploadManager {
    config: TransferConfig,
    payment: Arc<dyn PaymentGate>,
    requirements: PaymentRequirements,
    providers: Vec<Arc<dyn StorageProvider>>,
    retry: RetryPolicy,
}

impl UploadManager {
    pub fn new(
        config: TransferConfig,
        payment: Arc<dyn PaymentGate>,
        requirements: PaymentRequirements,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            config,
            payment,
            requirements,
            providers: Vec::new(),
            retry,
        }
    }

    /// Add a provider. Providers are tried in the order they were added.
    pub fn with_provider(mut self, provider: Arc<dyn StorageProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn providers(&self) -> &[Arc<dyn StorageProvider>] {
        &self.providers
    }

    /// Upload everything `source` produces.
    ///
    /// `declared_size`, when given, must match the bytes produced exactly.
    /// A failed or cancelled upload leaves nothing retrievable.
    #[instrument(skip_all, fields(declared_size = ?declared_size, with_cdn = opts.with_cdn))]
    pub async fn upload<S: ByteSource>(
        &self,
        source: S,
        declared_size: Option<u64>,
        metadata: ObjectMetadata,
        opts: &UploadOptions,
    ) -> Result<UploadReceipt, UploadError> {
        let mut tracker = PhaseTracker::new(Arc::clone(&opts.observer));
        let result = self
            .run(source, declared_size, metadata, opts, &mut tracker)
            .await;
        if let Err(e) = &result {
            warn!(error = %e, code = e.code(), "upload failed");
            tracker.advance(UploadPhase::Failed {
                reason: e.to_string(),
            });
        }
        result
    }

    async fn run<S: ByteSource>(
        &self,
        source: S,
        declared_size: Option<u64>,
        metadata: ObjectMetadata,
        opts: &UploadOptions,
        tracker: &mut PhaseTracker,
    ) -> Result<UploadReceipt, UploadError> {
        let started = Instant::now();
        let cancel = &opts.cancel;

        metadata.validate()?;
        let expected_size = declared_size.or_else(|| source.size_hint());
        if let Some(size) = expected_size {
            self.config.check_size(size)?;
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            ready = payment::ensure_ready(self.payment.as_ref(), &self.requirements) => {
                ready.map_err(UploadError::PaymentNotReady)?
            }
        }

        tracker.advance(UploadPhase::Negotiating);
        let terms = DealTerms {
            size: expected_size,
            metadata,
            with_cdn: opts.with_cdn,
        };
        let provider = self.negotiate(&terms, cancel).await?;

        let mut source = HashingSource::new(source);
        let pipe_opts = PipeOptions::new(self.config.chunk_size)
            .with_total(declared_size)
            .with_limit(self.config.max_object_size)
            .with_cancel(cancel.clone())
            .with_observer(Arc::clone(&opts.observer));

        let mut attempt = 1u32;
        let (report, sink) = loop {
            tracker.advance(UploadPhase::Transferring);
            match self
                .transfer_once(&mut source, provider.as_ref(), &terms, &pipe_opts)
                .await
            {
                Ok(done) => break done,
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    match source.rewind().await {
                        Ok(true) => {}
                        Ok(false) => return Err(self.transfer_error(e)),
                        Err(rewind_err) => {
                            warn!(error = %rewind_err, "source rewind failed");
                            return Err(self.transfer_error(e));
                        }
                    }
                    warn!(attempt, error = %e, delay = ?self.retry.delay(attempt), "retrying transfer");
                    if !self.retry.wait(attempt, cancel).await {
                        return Err(UploadError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(self.transfer_error(e)),
            }
        };

        tracker.advance(UploadPhase::Finalizing);
        let size = report.bytes;
        if declared_size.is_none()
            && let Err(e) = self.config.check_size(size)
        {
            sink.abort().await;
            return Err(e.into());
        }
        let identifier = match source.finalize() {
            Ok(identifier) => identifier,
            Err(e) => {
                sink.abort().await;
                return Err(e.into());
            }
        };
        if cancel.is_cancelled() {
            sink.abort().await;
            return Err(UploadError::Cancelled);
        }

        let record = ObjectRecord {
            identifier,
            size,
            metadata: terms.metadata,
            with_cdn: terms.with_cdn,
            provider: provider.name().to_string(),
            stored_at: OffsetDateTime::now_utc(),
        };
        sink.commit(&record).await.map_err(UploadError::finalize)?;

        tracker.advance(UploadPhase::Complete);
        info!(
            %identifier,
            size,
            provider = provider.name(),
            attempts = attempt,
            "upload complete"
        );

        Ok(UploadReceipt {
            identifier,
            size,
            provider: provider.name().to_string(),
            attempts: attempt,
            elapsed: started.elapsed(),
            report,
        })
    }

    /// Ask each provider once, in order. The first acceptance wins.
    async fn negotiate(
        &self,
        terms: &DealTerms,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn StorageProvider>, UploadError> {
        let timeout = self.config.negotiation_timeout();
        for provider in &self.providers {
            let answer = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                answer = tokio::time::timeout(timeout, provider.negotiate(terms)) => answer,
            };
            match answer {
                Ok(Ok(true)) => {
                    debug!(provider = provider.name(), "deal accepted");
                    return Ok(Arc::clone(provider));
                }
                Ok(Ok(false)) => debug!(provider = provider.name(), "deal declined"),
                Ok(Err(e)) => warn!(provider = provider.name(), error = %e, "negotiation failed"),
                Err(_) => warn!(provider = provider.name(), ?timeout, "negotiation timed out"),
            }
        }
        Err(UploadError::NoProviderAvailable {
            tried: self.providers.len(),
        })
    }

    /// One transfer attempt. The sink is aborted on failure.
    async fn transfer_once<S: ByteSource>(
        &self,
        source: &mut HashingSource<S>,
        provider: &dyn StorageProvider,
        terms: &DealTerms,
        opts: &PipeOptions,
    ) -> Result<(TransferReport, Box<dyn UploadSink>), TransferError> {
        let mut sink = provider
            .open_upload(terms)
            .await
            .map_err(|source| TransferError::Failed {
                stage: TransferStage::Negotiate,
                source,
            })?;

        let timeout = self.config.transfer_timeout();
        let result = match tokio::time::timeout(timeout, pipe(source, sink.as_mut(), opts)).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::write(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("transfer exceeded {timeout:?}"),
            ))),
        };

        match result {
            Ok(report) => Ok((report, sink)),
            Err(e) => {
                sink.abort().await;
                Err(e)
            }
        }
    }

    fn transfer_error(&self, err: TransferError) -> UploadError {
        match err {
            TransferError::LimitExceeded { limit } => UploadError::InvalidSize {
                size: limit.saturating_add(1),
                min: self.config.min_object_size,
                max: self.config.max_object_size,
            },
            other => other.into(),
        }
    }
}
