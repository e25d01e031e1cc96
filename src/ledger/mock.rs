//! In-memory ledger for tests and local runs without a chain.
//!
//! Records every call, mints deterministic transaction hashes, and can be told
//! to fail specific operations.

use super::{ExpectedTransfer, Ledger, LedgerError, ObservedTransfer};
use crate::domain::{Address, Deal, DealId, DealTerms, Decimal, TokenMetadata, TxHash};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Ledger operation kinds, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    CreateDeal,
    Activate,
    Join,
    MarkDealEnded,
    UpdateCount,
    Balance,
    TokenDetails,
    TokenPrice,
    Verify,
}

/// A recorded call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    CreateDeal(DealId),
    Activate(DealId),
    Join(DealId, Address),
    MarkDealEnded(DealId),
    UpdateCount(DealId, Address),
    Balance(Address, Address),
    TokenDetails(Address),
    TokenPrice(Address),
    Verify(DealId, TxHash),
}

impl LedgerCall {
    pub fn op(&self) -> LedgerOp {
        match self {
            LedgerCall::CreateDeal(_) => LedgerOp::CreateDeal,
            LedgerCall::Activate(_) => LedgerOp::Activate,
            LedgerCall::Join(..) => LedgerOp::Join,
            LedgerCall::MarkDealEnded(_) => LedgerOp::MarkDealEnded,
            LedgerCall::UpdateCount(..) => LedgerOp::UpdateCount,
            LedgerCall::Balance(..) => LedgerOp::Balance,
            LedgerCall::TokenDetails(_) => LedgerOp::TokenDetails,
            LedgerCall::TokenPrice(_) => LedgerOp::TokenPrice,
            LedgerCall::Verify(..) => LedgerOp::Verify,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    transfers: HashMap<TxHash, ObservedTransfer>,
    balances: HashMap<(Address, Address), Decimal>,
    tokens: HashMap<Address, TokenMetadata>,
    prices: HashMap<Address, Decimal>,
    failing: HashSet<LedgerOp>,
    calls: Vec<LedgerCall>,
    minted: u64,
}

#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a confirmed transfer the ledger will report for `tx_hash`.
    pub fn with_transfer(self, tx_hash: TxHash, transfer: ObservedTransfer) -> Self {
        self.lock().transfers.insert(tx_hash, transfer);
        self
    }

    pub fn with_token(self, token: Address, metadata: TokenMetadata, price: Decimal) -> Self {
        {
            let mut state = self.lock();
            state.tokens.insert(token.clone(), metadata);
            state.prices.insert(token, price);
        }
        self
    }

    pub fn with_balance(self, player: Address, token: Address, amount: Decimal) -> Self {
        self.set_balance(player, token, amount);
        self
    }

    pub fn set_balance(&self, player: Address, token: Address, amount: Decimal) {
        self.lock().balances.insert((player, token), amount);
    }

    pub fn set_price(&self, token: Address, price: Decimal) {
        self.lock().prices.insert(token, price);
    }

    pub fn remove_token(&self, token: &Address) {
        self.lock().tokens.remove(token);
    }

    pub fn add_transfer(&self, tx_hash: TxHash, transfer: ObservedTransfer) {
        self.lock().transfers.insert(tx_hash, transfer);
    }

    /// Make every subsequent call of `op` fail until cleared.
    pub fn fail_on(&self, op: LedgerOp) {
        self.lock().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: LedgerOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call, then fail if `op` is configured to fail.
    fn enter(&self, call: LedgerCall) -> Result<MutexGuard<'_, MockState>, LedgerError> {
        let op = call.op();
        let mut state = self.lock();
        state.calls.push(call);
        if state.failing.contains(&op) {
            return Err(LedgerError::Rejected(format!("mock failure for {:?}", op)));
        }
        Ok(state)
    }

    fn mint(state: &mut MockState, label: &str) -> TxHash {
        state.minted += 1;
        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        hasher.update(state.minted.to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        TxHash::from_bytes(&digest)
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn create_deal(&self, deal_id: DealId, _terms: &DealTerms) -> Result<TxHash, LedgerError> {
        let mut state = self.enter(LedgerCall::CreateDeal(deal_id))?;
        Ok(Self::mint(&mut state, "create"))
    }

    async fn activate(&self, deal_id: DealId) -> Result<(), LedgerError> {
        self.enter(LedgerCall::Activate(deal_id))?;
        Ok(())
    }

    async fn join(&self, deal_id: DealId, player: &Address) -> Result<TxHash, LedgerError> {
        let mut state = self.enter(LedgerCall::Join(deal_id, player.clone()))?;
        Ok(Self::mint(&mut state, "join"))
    }

    async fn mark_deal_ended(&self, deal_id: DealId) -> Result<TxHash, LedgerError> {
        let mut state = self.enter(LedgerCall::MarkDealEnded(deal_id))?;
        Ok(Self::mint(&mut state, "end"))
    }

    async fn update_count(&self, deal_id: DealId, player: &Address) -> Result<TxHash, LedgerError> {
        let mut state = self.enter(LedgerCall::UpdateCount(deal_id, player.clone()))?;
        Ok(Self::mint(&mut state, "reward"))
    }

    async fn does_user_have_balance(
        &self,
        player: &Address,
        token: &Address,
        minimum: Decimal,
    ) -> Result<bool, LedgerError> {
        let state = self.enter(LedgerCall::Balance(player.clone(), token.clone()))?;
        let balance = state
            .balances
            .get(&(player.clone(), token.clone()))
            .copied()
            .unwrap_or_default();
        Ok(balance >= minimum)
    }

    async fn token_details(&self, token: &Address) -> Result<Option<TokenMetadata>, LedgerError> {
        let state = self.enter(LedgerCall::TokenDetails(token.clone()))?;
        Ok(state.tokens.get(token).cloned())
    }

    async fn token_price(&self, token: &Address) -> Result<Option<Decimal>, LedgerError> {
        let state = self.enter(LedgerCall::TokenPrice(token.clone()))?;
        Ok(state.prices.get(token).copied())
    }

    async fn verify_transaction(
        &self,
        deal: &Deal,
        tx_hash: &TxHash,
        expected: &ExpectedTransfer,
    ) -> Result<bool, LedgerError> {
        let state = self.enter(LedgerCall::Verify(deal.id, tx_hash.clone()))?;
        Ok(state
            .transfers
            .get(tx_hash)
            .map(|t| t.satisfies(expected))
            .unwrap_or(false))
    }
}
