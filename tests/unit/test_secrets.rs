//! SecretBox unit tests

use ployer::errors::PloyerError;
use ployer::secrets::SecretBox;

#[test]
fn test_roundtrip() {
    let secrets = SecretBox::from_root_secret("root-secret");

    let sealed = secrets.encrypt("DATABASE_URL=postgres://db").unwrap();
    let opened = secrets.decrypt(&sealed).unwrap();

    assert_eq!(opened, "DATABASE_URL=postgres://db");
}

#[test]
fn test_empty_plaintext_roundtrip() {
    let secrets = SecretBox::from_root_secret("root-secret");
    let sealed = secrets.encrypt("").unwrap();
    assert_eq!(secrets.decrypt(&sealed).unwrap(), "");
}

#[test]
fn test_same_plaintext_differs_per_encryption() {
    let secrets = SecretBox::from_root_secret("root-secret");

    let first = secrets.encrypt("value").unwrap();
    let second = secrets.encrypt("value").unwrap();

    assert_ne!(first, second);
    assert_eq!(secrets.decrypt(&first).unwrap(), "value");
    assert_eq!(secrets.decrypt(&second).unwrap(), "value");
}

#[test]
fn test_tampered_ciphertext_fails_closed() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let secrets = SecretBox::from_root_secret("root-secret");
    let sealed = secrets.encrypt("secret value").unwrap();

    // Flip one bit in the middle of the sealed blob
    let mut raw = BASE64.decode(&sealed).unwrap();
    let middle = raw.len() / 2;
    raw[middle] ^= 0x01;
    let tampered = BASE64.encode(&raw);

    let result = secrets.decrypt(&tampered);
    assert!(matches!(result, Err(PloyerError::Crypto(_))));
}

#[test]
fn test_truncated_ciphertext_fails_closed() {
    let secrets = SecretBox::from_root_secret("root-secret");
    let result = secrets.decrypt("AAAA");
    assert!(matches!(result, Err(PloyerError::Crypto(_))));
}

#[test]
fn test_garbage_encoding_fails_closed() {
    let secrets = SecretBox::from_root_secret("root-secret");
    let result = secrets.decrypt("not base64 at all!!!");
    assert!(matches!(result, Err(PloyerError::Crypto(_))));
}

#[test]
fn test_different_root_secret_cannot_decrypt() {
    let sealed = SecretBox::from_root_secret("alpha").encrypt("v").unwrap();
    let result = SecretBox::from_root_secret("beta").decrypt(&sealed);
    assert!(matches!(result, Err(PloyerError::Crypto(_))));
}
