//! Settlement client for interacting with Solana
//!
//! Supports two modes:
//! - **Mock Mode**: For development/testing without Solana. Roots and claim
//!   transactions are tracked in-memory.
//! - **Live Mode**: Actual Solana RPC calls to the claim program.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use solana_sdk_ids::system_program;
use solana_transaction_status::UiTransactionEncoding;

use claimcraft_core::Hash;

use crate::{
    set_epoch_root_data, ClaimTxVerifier, CommitmentBridge, EpochRootAccount, Result,
    SettlementError, TxVerdict, CONFIG_SEED, DEFAULT_PROGRAM_ID, EPOCH_ROOT_SEED,
};

/// Settlement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// Mock mode for development - state is in-memory
    Mock,
    /// Live Solana mode (requires deployed program)
    Live,
}

/// Settlement client configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Settlement mode (Mock or Live)
    pub mode: SettlementMode,
    /// Solana RPC endpoint (only used in Live mode)
    pub rpc_url: String,
    /// Program ID of the claim program
    pub program_id: [u8; 32],
    /// Commitment level for reads and transactions
    pub commitment: String,
    /// When set, a claim transaction must reference this program
    pub claim_program_id: Option<[u8; 32]>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            mode: SettlementMode::Mock,
            rpc_url: "https://api.devnet.solana.com".to_string(),
            program_id: Self::default_program_id(),
            commitment: "confirmed".to_string(),
            claim_program_id: None,
        }
    }
}

impl SettlementConfig {
    pub const COMMITMENT_LEVELS: [&'static str; 3] = ["processed", "confirmed", "finalized"];

    /// Create a mock configuration for development
    pub fn mock() -> Self {
        Self {
            mode: SettlementMode::Mock,
            ..Default::default()
        }
    }

    /// Create a live configuration for Solana devnet
    pub fn devnet(program_id: [u8; 32]) -> Self {
        Self {
            mode: SettlementMode::Live,
            rpc_url: "https://api.devnet.solana.com".to_string(),
            program_id,
            ..Default::default()
        }
    }

    /// Create a live configuration for Solana mainnet
    pub fn mainnet(program_id: [u8; 32]) -> Self {
        Self {
            mode: SettlementMode::Live,
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            program_id,
            commitment: "finalized".to_string(),
            claim_program_id: None,
        }
    }

    /// Decode a base58 program id.
    pub fn parse_program_id(s: &str) -> Result<[u8; 32]> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| SettlementError::InvalidProgramId(format!("{}: {}", s, e)))?;
        bytes
            .try_into()
            .map_err(|_| SettlementError::InvalidProgramId(format!("{}: not 32 bytes", s)))
    }

    fn default_program_id() -> [u8; 32] {
        Self::parse_program_id(DEFAULT_PROGRAM_ID).unwrap_or([0u8; 32])
    }

    pub fn is_known_commitment(level: &str) -> bool {
        Self::COMMITMENT_LEVELS.contains(&level)
    }

    /// Get commitment config for Solana client
    fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "finalized" => CommitmentConfig::finalized(),
            "confirmed" => CommitmentConfig::confirmed(),
            "processed" => CommitmentConfig::processed(),
            _ => CommitmentConfig::confirmed(),
        }
    }
}

/// In-memory state for mock mode
#[derive(Debug, Default)]
struct MockState {
    /// Published roots by epoch number (simulates EpochRoot PDAs)
    roots: HashMap<u64, Hash>,
    /// Claim transactions that should fail verification, with the reason
    rejected_txs: HashMap<String, String>,
    /// Programs referenced by each mock claim transaction
    tx_programs: HashMap<String, Vec<[u8; 32]>>,
    /// Transaction counter for generating mock signatures
    tx_counter: u64,
}

/// Settlement client for on-chain operations
///
/// This client abstracts the Solana RPC calls and transaction building.
/// In mock mode, state is tracked in-memory.
pub struct SettlementClient {
    config: SettlementConfig,
    /// Admin keypair for publishing roots
    signer_keypair: Option<Keypair>,
    /// Solana RPC client (only used in Live mode)
    rpc_client: Option<Arc<RpcClient>>,
    /// Mock state (only used in Mock mode)
    mock_state: Arc<RwLock<MockState>>,
}

impl SettlementClient {
    /// Create a read-only client (cannot publish roots in live mode)
    pub fn new(config: SettlementConfig) -> Self {
        let rpc_client = Self::rpc_for(&config);
        Self {
            config,
            signer_keypair: None,
            rpc_client,
            mock_state: Arc::new(RwLock::new(MockState::default())),
        }
    }

    /// Create a client with the admin keypair used to sign `set_epoch_root`
    pub fn with_keypair(config: SettlementConfig, keypair: Keypair) -> Self {
        let mut client = Self::new(config);
        client.signer_keypair = Some(keypair);
        client
    }

    fn rpc_for(config: &SettlementConfig) -> Option<Arc<RpcClient>> {
        if config.mode == SettlementMode::Live {
            Some(Arc::new(RpcClient::new_with_commitment(
                config.rpc_url.clone(),
                config.commitment_config(),
            )))
        } else {
            None
        }
    }

    /// Check if running in mock mode
    pub fn is_mock(&self) -> bool {
        self.config.mode == SettlementMode::Mock
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Get program ID as Pubkey
    fn program_id(&self) -> Pubkey {
        Pubkey::new_from_array(self.config.program_id)
    }

    fn rpc(&self) -> Result<&RpcClient> {
        self.rpc_client
            .as_deref()
            .ok_or_else(|| SettlementError::RpcError("RPC client not initialized".to_string()))
    }

    /// Derive PDA for the program config: ["config"]
    fn config_pda(&self) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[CONFIG_SEED], &self.program_id())
    }

    /// Derive PDA for an epoch root account: ["epoch_root", epoch_le]
    pub fn epoch_root_pda(&self, epoch_number: u64) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[EPOCH_ROOT_SEED, &epoch_number.to_le_bytes()],
            &self.program_id(),
        )
    }

    /// Generate mock signature (when already holding lock)
    fn generate_mock_signature(state: &mut MockState) -> String {
        state.tx_counter += 1;
        let mut sig = [0u8; 64];
        sig[0..8].copy_from_slice(&state.tx_counter.to_le_bytes());
        sig[8..16].copy_from_slice(b"mocktxn!");
        bs58::encode(sig).into_string()
    }

    /// Send a transaction to Solana
    async fn send_transaction(&self, instruction: Instruction) -> Result<String> {
        let rpc = self.rpc()?;
        let keypair = self
            .signer_keypair
            .as_ref()
            .ok_or(SettlementError::NotAuthorized)?;

        let blockhash = rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| SettlementError::RpcError(e.to_string()))?;

        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&keypair.pubkey()),
            &[keypair],
            blockhash,
        );

        let signature = rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| SettlementError::TransactionFailed(e.to_string()))?;

        info!("Transaction confirmed: {}", signature);
        Ok(signature.to_string())
    }

    // ==================== Mock helpers ====================

    /// Publish a root in mock state without going through `commit_root`.
    pub fn set_mock_root(&self, epoch_number: u64, root: Hash) -> Result<()> {
        let mut state = self
            .mock_state
            .write()
            .map_err(|_| SettlementError::LockPoisoned)?;
        state.roots.insert(epoch_number, root);
        Ok(())
    }

    /// A fresh claim transaction signature that verifies as confirmed.
    ///
    /// The transaction references the configured claim program, if any.
    pub fn mock_claim_signature(&self) -> Result<String> {
        let programs: Vec<[u8; 32]> = self.config.claim_program_id.into_iter().collect();
        self.mock_tx_with_programs(&programs)
    }

    /// A fresh transaction signature whose account keys hold `programs`.
    pub fn mock_tx_with_programs(&self, programs: &[[u8; 32]]) -> Result<String> {
        let mut state = self
            .mock_state
            .write()
            .map_err(|_| SettlementError::LockPoisoned)?;
        let sig = Self::generate_mock_signature(&mut state);
        state.tx_programs.insert(sig.clone(), programs.to_vec());
        Ok(sig)
    }

    /// Make verification of `tx_ref` fail with `reason`.
    pub fn reject_mock_tx(&self, tx_ref: &str, reason: &str) -> Result<()> {
        let mut state = self
            .mock_state
            .write()
            .map_err(|_| SettlementError::LockPoisoned)?;
        state
            .rejected_txs
            .insert(tx_ref.to_string(), reason.to_string());
        Ok(())
    }
}

#[async_trait]
impl CommitmentBridge for SettlementClient {
    async fn commit_root(&self, epoch_number: u64, root: &Hash) -> Result<String> {
        info!(
            "Committing root {} for epoch {}",
            hex_encode(&root[..8]),
            epoch_number
        );

        if self.is_mock() {
            let mut state = self
                .mock_state
                .write()
                .map_err(|_| SettlementError::LockPoisoned)?;
            if state.roots.contains_key(&epoch_number) {
                return Err(SettlementError::TransactionFailed(format!(
                    "epoch root account for epoch {} already exists",
                    epoch_number
                )));
            }
            state.roots.insert(epoch_number, *root);
            let signature = Self::generate_mock_signature(&mut state);
            info!("[MOCK] Root for epoch {} committed: {}", epoch_number, signature);
            return Ok(signature);
        }

        // Live mode
        let keypair = self
            .signer_keypair
            .as_ref()
            .ok_or(SettlementError::NotAuthorized)?;
        let admin = keypair.pubkey();
        let (config_pda, _) = self.config_pda();
        let (epoch_root_pda, _) = self.epoch_root_pda(epoch_number);

        let instruction = Instruction {
            program_id: self.program_id(),
            accounts: vec![
                AccountMeta::new(config_pda, false),
                AccountMeta::new(epoch_root_pda, false),
                AccountMeta::new_readonly(admin, true),
                AccountMeta::new(admin, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: set_epoch_root_data(epoch_number, root),
        };

        self.send_transaction(instruction).await
    }

    async fn committed_root(&self, epoch_number: u64) -> Result<Option<Hash>> {
        debug!("Fetching epoch root for epoch {}", epoch_number);

        if self.is_mock() {
            let state = self
                .mock_state
                .read()
                .map_err(|_| SettlementError::LockPoisoned)?;
            return Ok(state.roots.get(&epoch_number).copied());
        }

        let rpc = self.rpc()?;
        let (epoch_root_pda, _) = self.epoch_root_pda(epoch_number);

        let response = rpc
            .get_account_with_commitment(&epoch_root_pda, self.config.commitment_config())
            .await
            .map_err(|e| SettlementError::RpcError(format!("get_account: {}", e)))?;

        let Some(account) = response.value else {
            return Ok(None);
        };

        if account.owner != self.program_id() {
            return Err(SettlementError::InvalidAccountData(format!(
                "epoch root {} owned by {}",
                epoch_root_pda, account.owner
            )));
        }

        let parsed = EpochRootAccount::parse(&account.data).ok_or_else(|| {
            SettlementError::InvalidAccountData(format!("epoch root {} is malformed", epoch_root_pda))
        })?;

        if parsed.epoch != epoch_number {
            return Err(SettlementError::InvalidAccountData(format!(
                "epoch root {} records epoch {}, expected {}",
                epoch_root_pda, parsed.epoch, epoch_number
            )));
        }

        Ok(Some(parsed.root))
    }
}

#[async_trait]
impl ClaimTxVerifier for SettlementClient {
    async fn verify_claim_tx(&self, tx_ref: &str) -> Result<TxVerdict> {
        let signature = match Signature::from_str(tx_ref.trim()) {
            Ok(sig) => sig,
            Err(_) => return Ok(TxVerdict::rejected(TxVerdict::INVALID_SIGNATURE)),
        };

        if self.is_mock() {
            let state = self
                .mock_state
                .read()
                .map_err(|_| SettlementError::LockPoisoned)?;
            if let Some(reason) = state.rejected_txs.get(tx_ref) {
                return Ok(TxVerdict::Rejected(reason.clone()));
            }
            return Ok(match (self.config.claim_program_id, state.tx_programs.get(tx_ref)) {
                (None, _) => TxVerdict::Confirmed,
                (Some(_), None) => TxVerdict::rejected(TxVerdict::NOT_FOUND),
                (Some(program), Some(keys)) if keys.contains(&program) => TxVerdict::Confirmed,
                (Some(_), Some(_)) => TxVerdict::rejected(TxVerdict::WRONG_PROGRAM),
            });
        }

        let rpc = self.rpc()?;
        let response = rpc
            .get_signature_statuses(&[signature])
            .await
            .map_err(|e| SettlementError::RpcError(format!("get_signature_statuses: {}", e)))?;

        let verdict = match response.value.into_iter().next().flatten() {
            None => TxVerdict::rejected(TxVerdict::NOT_FOUND),
            Some(status) if status.err.is_some() => TxVerdict::rejected(TxVerdict::FAILED),
            Some(status) if !status.satisfies_commitment(CommitmentConfig::confirmed()) => {
                TxVerdict::rejected(TxVerdict::NOT_CONFIRMED)
            }
            Some(_) => match self.config.claim_program_id {
                Some(program) => self.check_claim_program(rpc, &signature, program).await?,
                None => TxVerdict::Confirmed,
            },
        };

        if let TxVerdict::Rejected(reason) = &verdict {
            warn!("Claim transaction {} rejected: {}", tx_ref, reason);
        }
        Ok(verdict)
    }
}

impl SettlementClient {
    /// Confirmed transactions must also invoke the claim program.
    async fn check_claim_program(
        &self,
        rpc: &RpcClient,
        signature: &Signature,
        program: [u8; 32],
    ) -> Result<TxVerdict> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let fetched = rpc
            .get_transaction_with_config(signature, config)
            .await
            .map_err(|e| SettlementError::RpcError(format!("get_transaction: {}", e)))?;

        let Some(tx) = fetched.transaction.transaction.decode() else {
            return Ok(TxVerdict::rejected(TxVerdict::NOT_FOUND));
        };
        let program = Pubkey::new_from_array(program);
        if tx.message.static_account_keys().contains(&program) {
            Ok(TxVerdict::Confirmed)
        } else {
            debug!("Transaction {} does not reference program {}", signature, program);
            Ok(TxVerdict::rejected(TxVerdict::WRONG_PROGRAM))
        }
    }
}

/// Helper to hex-encode bytes
fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_client() -> SettlementClient {
        SettlementClient::new(SettlementConfig::mock())
    }

    #[test]
    fn test_config_presets() {
        let mock = SettlementConfig::mock();
        assert_eq!(mock.mode, SettlementMode::Mock);

        let devnet = SettlementConfig::devnet([7u8; 32]);
        assert_eq!(devnet.mode, SettlementMode::Live);
        assert_eq!(devnet.program_id, [7u8; 32]);
        assert_eq!(devnet.commitment, "confirmed");

        let mainnet = SettlementConfig::mainnet([7u8; 32]);
        assert_eq!(mainnet.commitment, "finalized");
        assert!(mainnet.rpc_url.contains("mainnet"));
    }

    #[test]
    fn test_default_program_id_decodes() {
        let id = SettlementConfig::parse_program_id(DEFAULT_PROGRAM_ID).unwrap();
        assert_eq!(SettlementConfig::default().program_id, id);
        assert_eq!(Pubkey::new_from_array(id).to_string(), DEFAULT_PROGRAM_ID);

        assert!(SettlementConfig::parse_program_id("not base58 0OIl").is_err());
        assert!(SettlementConfig::parse_program_id("abc").is_err());
    }

    #[test]
    fn test_mode_serde_lowercase() {
        assert_eq!(serde_json::to_string(&SettlementMode::Live).unwrap(), "\"live\"");
        let mode: SettlementMode = serde_json::from_str("\"mock\"").unwrap();
        assert_eq!(mode, SettlementMode::Mock);
    }

    #[test]
    fn test_epoch_root_pda_deterministic() {
        let client = mock_client();
        let (a, bump_a) = client.epoch_root_pda(5);
        let (b, bump_b) = client.epoch_root_pda(5);
        assert_eq!(a, b);
        assert_eq!(bump_a, bump_b);
        assert_ne!(client.epoch_root_pda(6).0, a);
    }

    #[tokio::test]
    async fn test_mock_commit_and_read() {
        let client = mock_client();
        assert!(!client.is_committed(1).await.unwrap());

        let root = [0x11; 32];
        let sig = client.commit_root(1, &root).await.unwrap();
        assert!(Signature::from_str(&sig).is_ok());

        assert!(client.is_committed(1).await.unwrap());
        assert_eq!(client.committed_root(1).await.unwrap(), Some(root));
    }

    #[tokio::test]
    async fn test_mock_commit_is_once_per_epoch() {
        let client = mock_client();
        client.commit_root(1, &[0x11; 32]).await.unwrap();

        let err = client.commit_root(1, &[0x22; 32]).await.unwrap_err();
        assert!(matches!(err, SettlementError::TransactionFailed(_)));
        assert_eq!(client.committed_root(1).await.unwrap(), Some([0x11; 32]));
    }

    #[tokio::test]
    async fn test_find_latest_committed_epoch_with_gaps() {
        let client = mock_client();
        assert_eq!(client.find_latest_committed_epoch(1024, 10).await.unwrap(), 0);

        for epoch in [1, 2, 3, 5] {
            client.set_mock_root(epoch, [epoch as u8; 32]).unwrap();
        }
        assert_eq!(client.find_latest_committed_epoch(1024, 10).await.unwrap(), 5);

        // Past the gap limit: 6..=15 missing, so 20 is never reached
        client.set_mock_root(20, [20; 32]).unwrap();
        assert_eq!(client.find_latest_committed_epoch(1024, 10).await.unwrap(), 5);
        assert_eq!(client.find_latest_committed_epoch(1024, 20).await.unwrap(), 20);

        // Scan bound
        assert_eq!(client.find_latest_committed_epoch(3, 10).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_mock_claim_tx_verification() {
        let client = mock_client();

        let good = client.mock_claim_signature().unwrap();
        assert_eq!(client.verify_claim_tx(&good).await.unwrap(), TxVerdict::Confirmed);

        let bad = client.mock_claim_signature().unwrap();
        client.reject_mock_tx(&bad, TxVerdict::FAILED).unwrap();
        assert_eq!(
            client.verify_claim_tx(&bad).await.unwrap(),
            TxVerdict::rejected(TxVerdict::FAILED)
        );

        assert_eq!(
            client.verify_claim_tx("not-a-signature").await.unwrap(),
            TxVerdict::rejected(TxVerdict::INVALID_SIGNATURE)
        );
    }

    #[tokio::test]
    async fn test_mock_claim_tx_must_reference_claim_program() {
        let program = [9u8; 32];
        let client = SettlementClient::new(SettlementConfig {
            claim_program_id: Some(program),
            ..SettlementConfig::mock()
        });

        let good = client.mock_claim_signature().unwrap();
        assert_eq!(client.verify_claim_tx(&good).await.unwrap(), TxVerdict::Confirmed);

        let unrelated = client.mock_tx_with_programs(&[[3u8; 32]]).unwrap();
        assert_eq!(
            client.verify_claim_tx(&unrelated).await.unwrap(),
            TxVerdict::rejected(TxVerdict::WRONG_PROGRAM)
        );

        let with_program = client.mock_tx_with_programs(&[[3u8; 32], program]).unwrap();
        assert!(client.verify_claim_tx(&with_program).await.unwrap().is_confirmed());

        // A well-formed signature the chain never saw
        let unknown = mock_client().mock_claim_signature().unwrap();
        let other = SettlementClient::new(SettlementConfig {
            claim_program_id: Some(program),
            ..SettlementConfig::mock()
        });
        assert_eq!(
            other.verify_claim_tx(&unknown).await.unwrap(),
            TxVerdict::rejected(TxVerdict::NOT_FOUND)
        );

        // Without a claim program any confirmed transaction passes
        assert!(mock_client().verify_claim_tx(&unrelated).await.unwrap().is_confirmed());
    }

    #[tokio::test]
    async fn test_live_commit_requires_keypair() {
        let client = SettlementClient::new(SettlementConfig::devnet([1u8; 32]));
        let err = client.commit_root(1, &[0u8; 32]).await.unwrap_err();
        assert!(matches!(err, SettlementError::NotAuthorized));
    }
}
