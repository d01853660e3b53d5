use async_trait::async_trait;
use bytes::Bytes;
use depot_client::payment::{Approval, PaymentError, PaymentGate};
use depot_client::ByteSource;
use depot_core::config::TransferConfig;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    Bytes::from(data)
}

/// Transfer settings with near-zero backoff.
pub fn test_config() -> TransferConfig {
    TransferConfig {
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        ..TransferConfig::default()
    }
}

/// Payment gate that counts queries.
pub struct CountingGate {
    pub balance: u128,
    pub approved: bool,
    pub calls: AtomicUsize,
}

impl CountingGate {
    pub fn funded() -> Self {
        Self {
            balance: 1_000,
            approved: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGate for CountingGate {
    async fn check_balance(&self, _token: &str) -> Result<u128, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.balance)
    }

    async fn check_approval(&self, _operator: &str, _token: &str) -> Result<Approval, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Approval {
            approved: self.approved,
            rate_allowance: 1_000,
            lockup_allowance: 1_000,
        })
    }
}

/// Source that trips a cancellation token after a number of reads.
pub struct CancelAfter<S> {
    pub inner: S,
    pub reads: usize,
    pub cancel: CancellationToken,
}

#[async_trait]
impl<S: ByteSource> ByteSource for CancelAfter<S> {
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        if self.reads == 0 {
            self.cancel.cancel();
        } else {
            self.reads -= 1;
        }
        self.inner.read_chunk(max_len).await
    }

    fn size_hint(&self) -> Option<u64> {
        self.inner.size_hint()
    }

    async fn rewind(&mut self) -> io::Result<bool> {
        self.inner.rewind().await
    }
}
