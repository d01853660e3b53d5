use bytes::Bytes;
use depot_storage::{ByteStream, FilesystemBackend, MemoryBackend, ObjectStore};
use futures::TryStreamExt;
use std::sync::Arc;
use tempfile::TempDir;

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

/// Drain a byte stream into one buffer.
pub async fn collect(stream: ByteStream) -> Vec<u8> {
    let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
    parts.concat()
}

/// One instance of every backend. The TempDir must outlive the filesystem backend.
pub async fn backends() -> (TempDir, Vec<Arc<dyn ObjectStore>>) {
    let temp = tempfile::tempdir().unwrap();
    let fs: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());
    let mem: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
    (temp, vec![fs, mem])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
        assert_eq!(seeded_bytes(1, 13).len(), 13);
    }
}
