use logins_crypto::{CryptoError, EncryptionKey, NONCE_SIZE, SealedBox, TAG_SIZE, open, seal};

const CTX: &[u8] = b"test/context";

// ── Seal / open ──────────────────────────────────────────────────

#[test]
fn seal_open_roundtrip() {
    let key = EncryptionKey::generate();
    let sealed = seal(&key, CTX, b"hunter2").unwrap();
    assert_eq!(open(&key, CTX, &sealed).unwrap(), b"hunter2");
}

#[test]
fn ciphertext_includes_tag() {
    let key = EncryptionKey::generate();
    let sealed = seal(&key, CTX, b"abc").unwrap();
    assert_eq!(sealed.ciphertext.len(), 3 + TAG_SIZE);
}

#[test]
fn wrong_key_fails() {
    let sealed = seal(&EncryptionKey::generate(), CTX, b"secret").unwrap();
    let err = open(&EncryptionKey::generate(), CTX, &sealed).unwrap_err();
    assert!(matches!(err, CryptoError::Decryption(_)));
}

#[test]
fn wrong_context_fails() {
    let key = EncryptionKey::generate();
    let sealed = seal(&key, CTX, b"secret").unwrap();
    assert!(open(&key, b"other/context", &sealed).is_err());
}

#[test]
fn tampering_is_detected() {
    let key = EncryptionKey::generate();
    let mut sealed = seal(&key, CTX, b"secret").unwrap();
    sealed.ciphertext[0] ^= 0xff;
    assert!(open(&key, CTX, &sealed).is_err());
}

#[test]
fn nonces_are_fresh() {
    let key = EncryptionKey::generate();
    let a = seal(&key, CTX, b"same").unwrap();
    let b = seal(&key, CTX, b"same").unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

// ── Encoding ─────────────────────────────────────────────────────

#[test]
fn encode_decode() {
    let key = EncryptionKey::generate();
    let sealed = seal(&key, CTX, b"payload").unwrap();
    let decoded = SealedBox::decode(&sealed.encode()).unwrap();
    assert_eq!(decoded, sealed);
}

#[test]
fn decode_rejects_short_input() {
    use base64::Engine;
    let short = base64::engine::general_purpose::STANDARD.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]);
    assert!(matches!(
        SealedBox::decode(&short),
        Err(CryptoError::Malformed(_))
    ));
}

#[test]
fn decode_rejects_bad_base64() {
    assert!(matches!(
        SealedBox::decode("!!not base64!!"),
        Err(CryptoError::Malformed(_))
    ));
}
