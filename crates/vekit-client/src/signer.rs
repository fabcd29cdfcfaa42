//! Signing strategies for the connected user account.
//!
//! The embedded-wallet provider is a black box. Which strategy wraps it is decided
//! once, when the connection is established, and the chosen `AccountSigner` is
//! injected everywhere signatures are needed.

use std::rc::Rc;

use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vekit_types::{signature_bytes, Address, Bytes, B256};

use crate::authorization::AuthorizationTypedData;

/// UI strings shown by the wallet while asking for a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningPrompt {
    pub title: Option<String>,
    pub description: Option<String>,
    pub button_text: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("user rejected the signature request: {0}")]
    Rejected(String),
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
    #[error("signing failed: {0}")]
    Failed(String),
}

/// Signs on behalf of the connected owner.
#[async_trait(?Send)]
pub trait AccountSigner {
    fn address(&self) -> Address;

    async fn sign_typed_data(
        &self,
        data: &AuthorizationTypedData,
        prompt: &SigningPrompt,
    ) -> Result<Bytes, SignerError>;

    async fn sign_hash(&self, hash: B256, prompt: &SigningPrompt) -> Result<Bytes, SignerError>;
}

#[async_trait(?Send)]
impl<T: AccountSigner + ?Sized> AccountSigner for Rc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_typed_data(
        &self,
        data: &AuthorizationTypedData,
        prompt: &SigningPrompt,
    ) -> Result<Bytes, SignerError> {
        (**self).sign_typed_data(data, prompt).await
    }

    async fn sign_hash(&self, hash: B256, prompt: &SigningPrompt) -> Result<Bytes, SignerError> {
        (**self).sign_hash(hash, prompt).await
    }
}

/// Embedded wallet / auth provider. Login state and key custody are its concern.
#[async_trait(?Send)]
pub trait EmbeddedWalletProvider {
    fn address(&self) -> Address;

    async fn sign_typed_data(
        &self,
        data: &AuthorizationTypedData,
        ui: Option<&SigningPrompt>,
    ) -> Result<Bytes, SignerError>;

    async fn sign_hash(&self, hash: B256, ui: Option<&SigningPrompt>) -> Result<Bytes, SignerError>;

    async fn export_wallet(&self) -> Result<(), SignerError>;
}

/// How the user's wallet is attached to this application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionKind {
    EmbeddedWallet,
    CrossApp,
}

/// Signer for a wallet embedded in this app; forwards the prompt so the wallet modal shows it.
pub struct EmbeddedWalletSigner<P> {
    provider: P,
}

impl<P: EmbeddedWalletProvider> EmbeddedWalletSigner<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait(?Send)]
impl<P: EmbeddedWalletProvider> AccountSigner for EmbeddedWalletSigner<P> {
    fn address(&self) -> Address {
        self.provider.address()
    }

    async fn sign_typed_data(
        &self,
        data: &AuthorizationTypedData,
        prompt: &SigningPrompt,
    ) -> Result<Bytes, SignerError> {
        self.provider.sign_typed_data(data, Some(prompt)).await
    }

    async fn sign_hash(&self, hash: B256, prompt: &SigningPrompt) -> Result<Bytes, SignerError> {
        self.provider.sign_hash(hash, Some(prompt)).await
    }
}

/// Signer for a wallet owned by another app; that app renders its own confirmation UI.
pub struct CrossAppSigner<P> {
    provider: P,
}

impl<P: EmbeddedWalletProvider> CrossAppSigner<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait(?Send)]
impl<P: EmbeddedWalletProvider> AccountSigner for CrossAppSigner<P> {
    fn address(&self) -> Address {
        self.provider.address()
    }

    async fn sign_typed_data(
        &self,
        data: &AuthorizationTypedData,
        _prompt: &SigningPrompt,
    ) -> Result<Bytes, SignerError> {
        self.provider.sign_typed_data(data, None).await
    }

    async fn sign_hash(&self, hash: B256, _prompt: &SigningPrompt) -> Result<Bytes, SignerError> {
        self.provider.sign_hash(hash, None).await
    }
}

/// Picks the signing strategy for a freshly established connection.
pub fn signer_for_connection<P>(kind: ConnectionKind, provider: P) -> Rc<dyn AccountSigner>
where
    P: EmbeddedWalletProvider + 'static,
{
    match kind {
        ConnectionKind::EmbeddedWallet => Rc::new(EmbeddedWalletSigner::new(provider)),
        ConnectionKind::CrossApp => Rc::new(CrossAppSigner::new(provider)),
    }
}

/// Provider holding a raw secp256k1 key in memory. For local development and tests.
#[derive(Debug, Clone)]
pub struct LocalKeyProvider {
    signer: PrivateKeySigner,
}

impl LocalKeyProvider {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn from_key(key: &[u8; 32]) -> Result<Self, SignerError> {
        let signer =
            PrivateKeySigner::from_slice(key).map_err(|err| SignerError::Failed(err.to_string()))?;
        Ok(Self::new(signer))
    }
}

#[async_trait(?Send)]
impl EmbeddedWalletProvider for LocalKeyProvider {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_typed_data(
        &self,
        data: &AuthorizationTypedData,
        _ui: Option<&SigningPrompt>,
    ) -> Result<Bytes, SignerError> {
        self.sign_hash(data.signing_hash(), None).await
    }

    async fn sign_hash(
        &self,
        hash: B256,
        _ui: Option<&SigningPrompt>,
    ) -> Result<Bytes, SignerError> {
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(|err| SignerError::Failed(err.to_string()))?;
        Ok(Bytes::from(signature_bytes(&signature).to_vec()))
    }

    async fn export_wallet(&self) -> Result<(), SignerError> {
        Err(SignerError::Unavailable(
            "local keys are not exportable".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use async_trait::async_trait;
    use vekit_types::{Address, Bytes, B256};

    use super::{
        signer_for_connection, ConnectionKind, EmbeddedWalletProvider, LocalKeyProvider,
        SignerError, SigningPrompt,
    };
    use crate::authorization::AuthorizationTypedData;

    #[derive(Default)]
    struct RecordingProvider {
        prompts: Rc<RefCell<Vec<Option<SigningPrompt>>>>,
    }

    #[async_trait(?Send)]
    impl EmbeddedWalletProvider for RecordingProvider {
        fn address(&self) -> Address {
            Address::repeat_byte(0x01)
        }

        async fn sign_typed_data(
            &self,
            _data: &AuthorizationTypedData,
            ui: Option<&SigningPrompt>,
        ) -> Result<Bytes, SignerError> {
            self.prompts.borrow_mut().push(ui.cloned());
            Ok(Bytes::from(vec![0u8; 65]))
        }

        async fn sign_hash(
            &self,
            _hash: B256,
            ui: Option<&SigningPrompt>,
        ) -> Result<Bytes, SignerError> {
            self.prompts.borrow_mut().push(ui.cloned());
            Ok(Bytes::from(vec![0u8; 65]))
        }

        async fn export_wallet(&self) -> Result<(), SignerError> {
            Ok(())
        }
    }

    fn prompt() -> SigningPrompt {
        SigningPrompt {
            title: Some("Confirm".to_string()),
            description: None,
            button_text: Some("Sign".to_string()),
        }
    }

    #[tokio::test]
    async fn embedded_wallet_forwards_prompt_and_cross_app_drops_it() {
        let embedded = RecordingProvider::default();
        let embedded_log = embedded.prompts.clone();
        let signer = signer_for_connection(ConnectionKind::EmbeddedWallet, embedded);
        signer
            .sign_hash(B256::ZERO, &prompt())
            .await
            .expect("must sign");
        assert_eq!(embedded_log.borrow()[0], Some(prompt()));

        let cross = RecordingProvider::default();
        let cross_log = cross.prompts.clone();
        let signer = signer_for_connection(ConnectionKind::CrossApp, cross);
        signer
            .sign_hash(B256::ZERO, &prompt())
            .await
            .expect("must sign");
        assert_eq!(cross_log.borrow()[0], None);
    }

    #[tokio::test]
    async fn local_key_signatures_recover_to_owner() {
        let provider = LocalKeyProvider::from_key(&[0x11; 32]).expect("valid key");
        let hash = B256::repeat_byte(0xab);
        let sig = provider.sign_hash(hash, None).await.expect("must sign");
        assert_eq!(sig.len(), 65);
        let parsed = alloy_primitives::Signature::from_bytes_and_parity(&sig[..64], sig[64] != 0);
        assert_eq!(
            parsed.recover_address_from_prehash(&hash).expect("recovers"),
            provider.address()
        );
        assert!(matches!(
            provider.export_wallet().await,
            Err(SignerError::Unavailable(_))
        ));
    }
}
