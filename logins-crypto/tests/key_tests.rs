use logins_crypto::{
    CanaryCheck, CryptoError, EncryptionKey, EncryptorDecryptor, EncryptorDecryptorExt,
    KEY_SIZE, KeyEncryptor, check_canary, create_canary,
};
use serde::{Deserialize, Serialize};

// ── EncryptionKey ────────────────────────────────────────────────

#[test]
fn generated_keys_differ() {
    assert_ne!(EncryptionKey::generate(), EncryptionKey::generate());
}

#[test]
fn export_parse_roundtrip() {
    let key = EncryptionKey::generate();
    let exported = key.to_base64();
    assert_eq!(exported.len(), 43);
    assert_eq!(EncryptionKey::parse(&exported).unwrap(), key);
}

#[test]
fn parse_tolerates_padding() {
    let key = EncryptionKey::from_bytes([7u8; KEY_SIZE]);
    let padded = format!("{}=", key.to_base64().as_str());
    assert_eq!(EncryptionKey::parse(&padded).unwrap(), key);
}

#[test]
fn parse_rejects_garbage() {
    assert!(matches!(
        EncryptionKey::parse("not a key!"),
        Err(CryptoError::InvalidKey(_))
    ));
}

#[test]
fn parse_rejects_wrong_length() {
    assert!(matches!(
        EncryptionKey::parse("AAAA"),
        Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: 3
        })
    ));
}

#[test]
fn debug_is_redacted() {
    let key = EncryptionKey::from_bytes([0xab; KEY_SIZE]);
    let s = format!("{key:?}");
    assert!(s.contains("REDACTED"));
    assert!(!s.contains("171"));
}

// ── KeyEncryptor ─────────────────────────────────────────────────

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Secret {
    username: String,
    password: String,
}

#[test]
fn struct_roundtrip() {
    let enc = KeyEncryptor::new(EncryptionKey::generate());
    let secret = Secret {
        username: "alice".into(),
        password: "hunter2".into(),
    };
    let ct = enc.encrypt_struct(&secret).unwrap();
    assert!(!ct.contains("hunter2"));
    let back: Secret = enc.decrypt_struct(&ct).unwrap();
    assert_eq!(back, secret);
}

#[test]
fn works_through_trait_object() {
    let enc: std::sync::Arc<dyn EncryptorDecryptor> =
        std::sync::Arc::new(KeyEncryptor::new(EncryptionKey::generate()));
    let ct = enc.encrypt(b"bytes").unwrap();
    assert_eq!(enc.decrypt(&ct).unwrap(), b"bytes");
    let n: u32 = enc.decrypt_struct(&enc.encrypt_struct(&42u32).unwrap()).unwrap();
    assert_eq!(n, 42);
}

#[test]
fn from_key_str_rejects_invalid() {
    assert!(KeyEncryptor::from_key_str("").is_err());
}

// ── Canary ───────────────────────────────────────────────────────

#[test]
fn canary_matches_its_key() {
    let key = EncryptionKey::generate();
    let canary = create_canary(&key).unwrap();
    assert_eq!(check_canary(&canary, &key).unwrap(), CanaryCheck::Match);
}

#[test]
fn canary_rejects_other_key() {
    let canary = create_canary(&EncryptionKey::generate()).unwrap();
    assert_eq!(
        check_canary(&canary, &EncryptionKey::generate()).unwrap(),
        CanaryCheck::WrongKey
    );
}

#[test]
fn canary_is_not_interchangeable_with_field_ciphertext() {
    let key = EncryptionKey::generate();
    let enc = KeyEncryptor::new(key.clone());
    let field_ct = enc.encrypt(logins_crypto::CANARY_TEXT.as_bytes()).unwrap();
    assert_eq!(check_canary(&field_ct, &key).unwrap(), CanaryCheck::WrongKey);
}

#[test]
fn malformed_canary_is_an_error() {
    assert!(check_canary("###", &EncryptionKey::generate()).is_err());
}
