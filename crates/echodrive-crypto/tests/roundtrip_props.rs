//! Property tests for the encrypted stream layout

use std::io::{Cursor, Read, Seek, SeekFrom};

use echodrive_crypto::{encrypted_len, Cryptonizer, IV_LEN};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn decrypt_inverts_encrypt(plain in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let crypto = Cryptonizer::generate(256).unwrap();
        let cipher = crypto.encrypt_bytes(&plain).unwrap();
        prop_assert_eq!(crypto.decrypt_bytes(&cipher).unwrap(), plain);
    }

    #[test]
    fn reported_length_equals_emitted_length(len in 0usize..3000) {
        let crypto = Cryptonizer::generate(128).unwrap();
        let mut stream = crypto.encrypt_stream(Cursor::new(vec![0x5Au8; len]), len as u64).unwrap();
        let declared = stream.len();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        prop_assert_eq!(out.len() as u64, declared);
        prop_assert_eq!(declared, encrypted_len(len as u64));
        prop_assert_eq!(declared % IV_LEN as u64, 0);
    }

    #[test]
    fn unaligned_length_matches_ceil_formula(len in 0u64..100_000) {
        prop_assume!(len % IV_LEN as u64 != 0);
        let iv = IV_LEN as u64;
        prop_assert_eq!(encrypted_len(len), (len + iv).div_ceil(iv) * iv);
    }

    #[test]
    fn small_reads_produce_same_bytes(plain in proptest::collection::vec(any::<u8>(), 0..600), step in 1usize..40) {
        let crypto = Cryptonizer::generate(256).unwrap();
        let mut stream = crypto.encrypt_stream(Cursor::new(plain.clone()), plain.len() as u64).unwrap();

        let mut bulk = Vec::new();
        stream.read_to_end(&mut bulk).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        let mut pieces = Vec::new();
        let mut buf = vec![0u8; step];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            pieces.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(&pieces, &bulk);

        let mut decrypted = Vec::new();
        let mut reader = crypto.decrypt_stream(Cursor::new(bulk)).unwrap();
        let mut buf = vec![0u8; step];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            decrypted.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(decrypted, plain);
    }
}

#[test]
fn test_block_aligned_inputs_round_trip() {
    let crypto = Cryptonizer::generate(256).unwrap();
    for len in [0usize, IV_LEN, 2 * IV_LEN, 1024] {
        let plain = vec![0x11u8; len];
        let cipher = crypto.encrypt_bytes(&plain).unwrap();
        assert_eq!(cipher.len(), IV_LEN + len + IV_LEN);
        assert_eq!(crypto.decrypt_bytes(&cipher).unwrap(), plain);
    }
}
