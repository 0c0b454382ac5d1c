//! Sealing and opening of item secrets.

use crate::content_type::ContentType;
use crate::crypto::CryptoEngine;
use crate::error::{Result, VaultError};
use crate::models::{EncryptedSecret, Recipient, SecretDocument};
use crate::passphrase::{Passphrase, PassphraseProvider};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Turns secret documents into per-recipient ciphertexts and back.
pub struct SecretCodec {
    engine: Arc<dyn CryptoEngine>,
    passphrases: Arc<dyn PassphraseProvider>,
}

impl SecretCodec {
    pub fn new(engine: Arc<dyn CryptoEngine>, passphrases: Arc<dyn PassphraseProvider>) -> Self {
        Self {
            engine,
            passphrases,
        }
    }

    fn passphrase(&self) -> Result<Passphrase> {
        self.passphrases
            .get()
            .ok_or(VaultError::PassphraseNotPresent)
    }

    /// Sign with the acting key and encrypt for one recipient.
    pub async fn seal(
        &self,
        doc: &SecretDocument,
        content_type: ContentType,
        recipient_public_key: &str,
        acting_private_key: &str,
    ) -> Result<String> {
        let passphrase = self.passphrase()?;
        let plaintext = Zeroizing::new(doc.to_plaintext(content_type)?);
        Ok(self
            .engine
            .sign_encrypt(
                &plaintext,
                recipient_public_key,
                acting_private_key,
                passphrase.as_bytes(),
            )
            .await?)
    }

    /// Decrypt a secret addressed to the acting user.
    pub async fn open(
        &self,
        ciphertext: &str,
        content_type: ContentType,
        acting_private_key: &str,
    ) -> Result<SecretDocument> {
        let passphrase = self.passphrase()?;
        let plaintext = Zeroizing::new(
            self.engine
                .decrypt(ciphertext, acting_private_key, passphrase.as_bytes())
                .await?,
        );
        SecretDocument::from_plaintext(content_type, &plaintext)
    }

    /// Seal the same secret once per recipient.
    ///
    /// The first failing recipient cancels the others and is named in the error.
    pub async fn seal_for_recipients(
        &self,
        doc: &SecretDocument,
        content_type: ContentType,
        recipients: &[Recipient],
        acting_private_key: &str,
    ) -> Result<Vec<EncryptedSecret>> {
        let passphrase = self.passphrase()?;
        let plaintext = Zeroizing::new(doc.to_plaintext(content_type)?);
        debug!(recipients = recipients.len(), %content_type, "sealing secret");

        let sealed = try_join_all(recipients.iter().map(|recipient| {
            let engine = Arc::clone(&self.engine);
            let plaintext = &plaintext;
            let passphrase = &passphrase;
            async move {
                engine
                    .sign_encrypt(
                        plaintext,
                        &recipient.public_key,
                        acting_private_key,
                        passphrase.as_bytes(),
                    )
                    .await
                    .map(|data| EncryptedSecret {
                        user_id: recipient.user_id.clone(),
                        data,
                    })
                    .map_err(|source| VaultError::RecipientSeal {
                        user_id: recipient.user_id.clone(),
                        source,
                    })
            }
        }))
        .await?;

        if sealed.len() != recipients.len() {
            return Err(VaultError::Other(format!(
                "sealed {} secrets for {} recipients",
                sealed.len(),
                recipients.len()
            )));
        }
        Ok(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{HybridEngine, KdfParams};
    use crate::passphrase::PassphraseMemoryCache;

    fn engine() -> Arc<HybridEngine> {
        Arc::new(HybridEngine::new(KdfParams {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }))
    }

    #[tokio::test]
    async fn test_seal_open_every_content_type() {
        let engine = engine();
        let pair = engine.generate_key_pair(b"pass").unwrap();
        let codec = SecretCodec::new(
            engine,
            Arc::new(PassphraseMemoryCache::holding(Passphrase::from("pass"))),
        );
        let defaults = Default::default();

        for ct in ContentType::ALL {
            let mut doc = SecretDocument::empty_password();
            doc.password = Some("pw".to_string());
            doc.normalize(ct, &defaults);

            let sealed = codec
                .seal(&doc, ct, &pair.public_key, &pair.private_key)
                .await
                .unwrap();
            let opened = codec.open(&sealed, ct, &pair.private_key).await.unwrap();
            assert_eq!(opened, doc, "round trip failed for {ct}");
        }
    }

    #[tokio::test]
    async fn test_missing_passphrase_fails_fast() {
        let engine = engine();
        let pair = engine.generate_key_pair(b"pass").unwrap();
        let codec = SecretCodec::new(engine, Arc::new(PassphraseMemoryCache::new()));

        let err = codec
            .seal(
                &SecretDocument::empty_password(),
                ContentType::V5Default,
                &pair.public_key,
                &pair.private_key,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::PassphraseNotPresent));
    }

    #[tokio::test]
    async fn test_bad_recipient_is_named() {
        let engine = engine();
        let pair = engine.generate_key_pair(b"pass").unwrap();
        let codec = SecretCodec::new(
            engine,
            Arc::new(PassphraseMemoryCache::holding(Passphrase::from("pass"))),
        );
        let recipients = vec![
            Recipient {
                user_id: "alice".to_string(),
                public_key: pair.public_key.clone(),
            },
            Recipient {
                user_id: "mallory".to_string(),
                public_key: "garbage".to_string(),
            },
        ];

        let err = codec
            .seal_for_recipients(
                &SecretDocument::empty_password(),
                ContentType::V5PasswordString,
                &recipients,
                &pair.private_key,
            )
            .await
            .unwrap_err();
        match err {
            VaultError::RecipientSeal { user_id, .. } => assert_eq!(user_id, "mallory"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
