//! Property test: encrypt then decrypt is the identity for any payload
//! within the configured size limit, across chunk boundaries.

use proptest::prelude::*;
use tempfile::tempdir;

use arx_crypto::{ChunkingOptions, CryptoEngine, CryptoOptions};

fn engine_with_chunk_kb(dir: &std::path::Path, chunk_kb: usize) -> CryptoEngine {
    CryptoEngine::open(CryptoOptions {
        enabled: true,
        use_kek: true,
        kek_path: dir.join("kek.key"),
        dek_path: dir.join("dek.ring"),
        chunking: ChunkingOptions {
            enabled: true,
            max_chunk_size_kb: chunk_kb,
            max_chunks_per_secret: 32,
        },
    })
    .expect("engine opens")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn encrypt_decrypt_identity(payload in proptest::collection::vec(any::<u8>(), 0..8192)) {
        let dir = tempdir().unwrap();
        let engine = engine_with_chunk_kb(dir.path(), 1);

        let (ciphertext, metadata) = engine.encrypt(&payload).unwrap();
        let decrypted = engine.decrypt(&ciphertext, &metadata).unwrap();
        prop_assert_eq!(decrypted, payload);
    }

    #[test]
    fn identity_survives_dek_rotation(payload in proptest::collection::vec(any::<u8>(), 1..4096)) {
        let dir = tempdir().unwrap();
        let engine = engine_with_chunk_kb(dir.path(), 1);

        let (ciphertext, metadata) = engine.encrypt(&payload).unwrap();
        engine.rotate_dek().unwrap();
        let decrypted = engine.decrypt(&ciphertext, &metadata).unwrap();
        prop_assert_eq!(decrypted, payload);
    }
}

#[test]
fn exact_boundary_sizes() {
    let dir = tempdir().unwrap();
    let engine = engine_with_chunk_kb(dir.path(), 1);
    let chunk = 1024usize;

    for size in [0, 1, chunk - 1, chunk, chunk + 1, 2 * chunk, 2 * chunk + 1] {
        let payload: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
        let (ciphertext, metadata) = engine.encrypt(&payload).unwrap();
        assert_eq!(
            engine.decrypt(&ciphertext, &metadata).unwrap(),
            payload,
            "size {size}"
        );
    }
}
