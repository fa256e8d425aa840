//! Property-based tests for the crypto layer.
//!
//! - Sealing is reversible with the same key and context
//! - Any other key fails to open
//! - Exported keys parse back to the same key

use logins_crypto::{EncryptionKey, EncryptorDecryptor, KEY_SIZE, KeyEncryptor, open, seal};
use proptest::prelude::*;

fn key_strategy() -> impl Strategy<Value = EncryptionKey> {
    prop::array::uniform32(any::<u8>()).prop_map(EncryptionKey::from_bytes)
}

proptest! {
    #[test]
    fn roundtrip_preserves_data(
        key in key_strategy(),
        plaintext in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let sealed = seal(&key, b"ctx", &plaintext).unwrap();
        prop_assert_eq!(open(&key, b"ctx", &sealed).unwrap(), plaintext);
    }

    #[test]
    fn other_keys_fail(a in key_strategy(), b in key_strategy(), text in ".{1,64}") {
        prop_assume!(a != b);
        let enc_a = KeyEncryptor::new(a);
        let enc_b = KeyEncryptor::new(b);
        let ct = enc_a.encrypt(text.as_bytes()).unwrap();
        prop_assert!(enc_b.decrypt(&ct).is_err());
    }

    #[test]
    fn key_export_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
        let key = EncryptionKey::from_bytes(bytes);
        let parsed = EncryptionKey::parse(&key.to_base64()).unwrap();
        prop_assert_eq!(parsed.as_bytes(), &bytes);
        prop_assert_eq!(parsed.as_bytes().len(), KEY_SIZE);
    }
}
