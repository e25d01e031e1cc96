//! Deal lifecycle engine.
//!
//! Every state transition of a deal or a participation goes through
//! [`DealEngine`]. Operations that write to both the ledger and storage keep
//! the storage side in one transaction that is only committed after the
//! ledger call succeeds.

mod error;

pub use error::{AddressField, DealError};

use crate::clock::Clock;
use crate::db::{is_unique_violation, Repository};
use crate::domain::{
    start_of_day, Address, Chain, Deal, DealId, DealTerms, Decimal, NewDeal, Participation,
    TransferPurpose, TxHash,
};
use crate::ledger::{ExpectedTransfer, Ledger, LedgerError};
use crate::referral::ReferralTracker;
use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Share of the reward pool charged as commission before activation.
pub const COMMISSION_RATE: Decimal = Decimal::from_scaled(10, 2);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub commission_rate: Decimal,
    /// Recipient of commission payments.
    pub commission_account: Address,
    /// Recipient of reward-pool deposits.
    pub custody_address: Address,
    /// Chain new deals are created on.
    pub chain: Chain,
}

impl EngineConfig {
    pub fn new(commission_account: Address, custody_address: Address, chain: Chain) -> Self {
        Self {
            commission_rate: COMMISSION_RATE,
            commission_account,
            custody_address,
            chain,
        }
    }
}

/// Result of one counter advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced { counter: u32 },
    /// Threshold reached and the payout was issued.
    Rewarded { counter: u32, tx_hash: TxHash },
    /// Row missing or already rewarded; nothing changed.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct DealEngine {
    repo: Arc<Repository>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    referrals: Arc<dyn ReferralTracker>,
    config: EngineConfig,
}

impl DealEngine {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        referrals: Arc<dyn ReferralTracker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repo,
            ledger,
            clock,
            referrals,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate, persist and register a new deal on the ledger.
    ///
    /// # Errors
    /// Validation errors leave no row behind; so does a failed ledger call.
    pub async fn create(&self, new: NewDeal) -> Result<DealId, DealError> {
        let coin_owner_address = self.parse_address(&new.coin_owner_address, AddressField::CoinOwner)?;
        let contract_address = self.parse_address(&new.contract_address, AddressField::Contract)?;

        if !new.minimum_amount_to_hold.is_positive() {
            return Err(DealError::NonPositiveTerm("Minimum amount to hold"));
        }
        if new.minimum_days_to_hold == 0 {
            return Err(DealError::NonPositiveTerm("Minimum days to hold"));
        }
        if !new.reward.is_positive() {
            return Err(DealError::NonPositiveTerm("Reward"));
        }
        if new.max_rewards == 0 {
            return Err(DealError::NonPositiveTerm("Max rewards to give out"));
        }

        let now = self.clock.now();
        let today = start_of_day(now);
        if new.start_date < today || new.end_date < today {
            return Err(DealError::InvalidDate);
        }
        match new.start_date.checked_add_signed(Duration::days(1)) {
            Some(earliest_end) if new.end_date >= earliest_end => {}
            _ => return Err(DealError::InvalidEndDate),
        }

        let terms = DealTerms {
            name: new.name,
            description: new.description,
            contract_address,
            coin_owner_address,
            minimum_amount_to_hold: new.minimum_amount_to_hold,
            minimum_days_to_hold: new.minimum_days_to_hold,
            reward: new.reward,
            max_rewards: new.max_rewards,
            start_date: new.start_date,
            end_date: new.end_date,
            chain: self.config.chain.clone(),
            referral_code: new.referral_code,
        };
        if terms.checked_settlement_deadline().is_none() {
            return Err(DealError::HoldingPeriodOutOfRange);
        }
        let pool = terms.reward_pool().ok_or(DealError::RewardPoolTooLarge)?;
        if pool.checked_mul(self.config.commission_rate).is_none() {
            return Err(DealError::RewardPoolTooLarge);
        }

        let mut tx = self.repo.begin().await?;
        let deal_id = Repository::insert_deal(&mut tx, &terms, now).await?;

        let tx_hash = self
            .ledger
            .create_deal(deal_id, &terms)
            .await
            .map_err(|e| ledger_failed("create_deal", deal_id, e))?;

        if let Err(e) = Repository::set_creation_tx_hash(&mut tx, deal_id, &tx_hash).await {
            return Err(diverged("create_deal", deal_id, Some(&tx_hash), e));
        }
        tx.commit()
            .await
            .map_err(|e| diverged("create_deal", deal_id, Some(&tx_hash), e))?;

        info!(deal_id = %deal_id, tx_hash = %tx_hash, "Deal created");
        Ok(deal_id)
    }

    /// Accept `tx_hash` as the deal's commission payment.
    pub async fn store_commission(&self, deal_id: DealId, tx_hash: &str) -> Result<(), DealError> {
        let deal = self.load(deal_id).await?;
        if deal.commission_paid() {
            return Err(DealError::CommissionAlreadyPaid);
        }

        let tx_hash = self
            .verified_payment(&deal, tx_hash, TransferPurpose::Commission)
            .await?;

        self.record_payment(&deal, TransferPurpose::Commission, &tx_hash)
            .await?;

        info!(deal_id = %deal_id, tx_hash = %tx_hash, "Commission recorded");
        Ok(())
    }

    /// Accept `tx_hash` as the reward-pool deposit and activate the deal.
    ///
    /// `referral_code` overrides the code stored with the deal. Conversion
    /// reporting never fails the activation.
    pub async fn mark_as_activated(
        &self,
        deal_id: DealId,
        tx_hash: &str,
        referral_code: Option<&str>,
    ) -> Result<(), DealError> {
        let deal = self.load(deal_id).await?;
        if !deal.commission_paid() {
            return Err(DealError::DealNotCommissionPaid);
        }
        if deal.activated() {
            return Err(DealError::DealAlreadyActivated);
        }

        let tx_hash = self
            .verified_payment(&deal, tx_hash, TransferPurpose::Activation)
            .await?;

        self.ledger
            .activate(deal_id)
            .await
            .map_err(|e| ledger_failed("activate", deal_id, e))?;

        self.record_payment(&deal, TransferPurpose::Activation, &tx_hash)
            .await
            .map_err(|e| match e {
                DealError::Storage(err) => diverged("activate", deal_id, Some(&tx_hash), err),
                other => other,
            })?;

        info!(deal_id = %deal_id, tx_hash = %tx_hash, "Deal activated");

        let code = referral_code.or(deal.terms.referral_code.as_deref());
        if let Some(code) = code {
            if let Err(e) = self.referrals.record_conversion(code, deal_id).await {
                warn!(deal_id = %deal_id, code, error = %e, "Failed to record referral conversion");
            }
        }

        Ok(())
    }

    /// Enroll `player` in a live deal.
    ///
    /// Returns whether the player currently holds the minimum balance. The
    /// balance does not gate joining.
    pub async fn join(&self, player: &str, deal_id: DealId) -> Result<bool, DealError> {
        let player = self.parse_address(player, AddressField::Player)?;
        let deal = self.load(deal_id).await?;
        if !deal.is_live() {
            return Err(DealError::DealNotActivated);
        }
        if self.repo.get_participation(deal_id, &player).await?.is_some() {
            return Err(DealError::AlreadyJoined);
        }

        let now = self.clock.now();
        if now < deal.terms.start_date {
            return Err(DealError::DealNotYetStarted);
        }
        if now > deal.terms.end_date {
            return Err(DealError::DealEnded);
        }

        let has_balance = self
            .ledger
            .does_user_have_balance(
                &player,
                &deal.terms.contract_address,
                deal.terms.minimum_amount_to_hold,
            )
            .await
            .map_err(|e| ledger_failed("does_user_have_balance", deal_id, e))?;

        let mut tx = self.repo.begin().await?;
        if let Err(e) = Repository::insert_participation(&mut tx, deal_id, &player, now).await {
            if is_unique_violation(&e) {
                return Err(DealError::AlreadyJoined);
            }
            return Err(e.into());
        }

        let tx_hash = self
            .ledger
            .join(deal_id, &player)
            .await
            .map_err(|e| ledger_failed("join", deal_id, e))?;

        if let Err(e) = Repository::set_join_tx_hash(&mut tx, deal_id, &player, &tx_hash).await {
            return Err(diverged("join", deal_id, Some(&tx_hash), e));
        }
        tx.commit()
            .await
            .map_err(|e| diverged("join", deal_id, Some(&tx_hash), e))?;

        info!(deal_id = %deal_id, player = %player, tx_hash = %tx_hash, has_balance, "Player joined");
        Ok(has_balance)
    }

    /// Close the deal on the ledger and mark it done.
    pub async fn mark_ended(&self, deal_id: DealId) -> Result<TxHash, DealError> {
        let deal = self.load(deal_id).await?;
        if deal.done {
            return Err(DealError::DealEnded);
        }

        let tx_hash = self
            .ledger
            .mark_deal_ended(deal_id)
            .await
            .map_err(|e| ledger_failed("mark_deal_ended", deal_id, e))?;

        let updated = self
            .repo
            .mark_deal_ended(deal_id, &tx_hash)
            .await
            .map_err(|e| diverged("mark_deal_ended", deal_id, Some(&tx_hash), e))?;
        if !updated {
            warn!(deal_id = %deal_id, tx_hash = %tx_hash, "Deal was already marked done");
        }

        info!(deal_id = %deal_id, tx_hash = %tx_hash, "Deal ended");
        Ok(tx_hash)
    }

    /// Zero a player's streak after a failed balance check.
    ///
    /// Returns `false` if the row is missing or already rewarded.
    pub async fn reset_count(&self, deal_id: DealId, player: &Address) -> Result<bool, DealError> {
        let reset = self
            .repo
            .reset_count(deal_id, player, self.clock.now())
            .await?;
        Ok(reset)
    }

    /// Advance a player's streak by one day, paying out once it reaches
    /// `minimum_days`.
    ///
    /// Skipped when the row is rewarded or was already counted within the
    /// last day, whatever `participation` says. The counter change is rolled
    /// back if the payout call fails.
    pub async fn advance_count(
        &self,
        deal_id: DealId,
        participation: &Participation,
        minimum_days: u32,
    ) -> Result<AdvanceOutcome, DealError> {
        let player = &participation.player;
        let mut tx = self.repo.begin().await?;

        let Some(counter) =
            Repository::advance_count(&mut tx, deal_id, player, self.clock.now()).await?
        else {
            return Ok(AdvanceOutcome::Skipped);
        };

        if counter < minimum_days {
            tx.commit().await?;
            return Ok(AdvanceOutcome::Advanced { counter });
        }

        let tx_hash = self
            .ledger
            .update_count(deal_id, player)
            .await
            .map_err(|e| ledger_failed("update_count", deal_id, e))?;

        let set = match Repository::set_reward_tx_hash(&mut tx, deal_id, player, &tx_hash).await {
            Ok(set) => set,
            Err(e) => return Err(diverged("update_count", deal_id, Some(&tx_hash), e)),
        };
        tx.commit()
            .await
            .map_err(|e| diverged("update_count", deal_id, Some(&tx_hash), e))?;
        if !set {
            warn!(deal_id = %deal_id, player = %player, "Reward hash was already set");
        }

        info!(deal_id = %deal_id, player = %player, counter, tx_hash = %tx_hash, "Reward sent");
        Ok(AdvanceOutcome::Rewarded { counter, tx_hash })
    }

    /// The transfer a payment of `purpose` must match for `deal`.
    ///
    /// # Errors
    /// `RewardPoolTooLarge` if the amount does not fit in a `Decimal`.
    pub fn expected_transfer(
        &self,
        deal: &Deal,
        purpose: TransferPurpose,
    ) -> Result<ExpectedTransfer, DealError> {
        let pool = deal.terms.reward_pool().ok_or(DealError::RewardPoolTooLarge)?;
        let (to, minimum_amount) = match purpose {
            TransferPurpose::Commission => (
                self.config.commission_account.clone(),
                pool
                    .checked_mul(self.config.commission_rate)
                    .ok_or(DealError::RewardPoolTooLarge)?,
            ),
            TransferPurpose::Activation => (self.config.custody_address.clone(), pool),
        };
        Ok(ExpectedTransfer {
            purpose,
            token: deal.terms.contract_address.clone(),
            from: deal.terms.coin_owner_address.clone(),
            to,
            minimum_amount,
        })
    }

    async fn load(&self, deal_id: DealId) -> Result<Deal, DealError> {
        self.repo
            .get_deal(deal_id)
            .await?
            .ok_or(DealError::DealNotFound)
    }

    fn parse_address(&self, raw: &str, field: AddressField) -> Result<Address, DealError> {
        if !self.ledger.is_valid_address(raw) {
            return Err(DealError::InvalidAddress(field));
        }
        Address::parse(raw).map_err(|_| DealError::InvalidAddress(field))
    }

    /// Parse, check unused, and verify a payment hash against the ledger.
    async fn verified_payment(
        &self,
        deal: &Deal,
        raw: &str,
        purpose: TransferPurpose,
    ) -> Result<TxHash, DealError> {
        let tx_hash = TxHash::parse(raw).map_err(|_| DealError::MalformedTransactionHash)?;

        if self.repo.is_transaction_used(&tx_hash).await? {
            return Err(DealError::TransactionUsedBefore);
        }

        let expected = self.expected_transfer(deal, purpose)?;
        let valid = self
            .ledger
            .verify_transaction(deal, &tx_hash, &expected)
            .await
            .map_err(|e| ledger_failed("verify_transaction", deal.id, e))?;
        if !valid {
            warn!(deal_id = %deal.id, tx_hash = %tx_hash, %purpose, "Payment transaction rejected");
            return Err(DealError::InvalidTransactionHash);
        }

        Ok(tx_hash)
    }

    async fn record_payment(
        &self,
        deal: &Deal,
        purpose: TransferPurpose,
        tx_hash: &TxHash,
    ) -> Result<(), DealError> {
        match self
            .repo
            .record_payment(deal.id, purpose, tx_hash, self.clock.now())
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(match purpose {
                TransferPurpose::Commission => DealError::CommissionAlreadyPaid,
                TransferPurpose::Activation => DealError::DealAlreadyActivated,
            }),
            Err(e) if is_unique_violation(&e) => Err(DealError::TransactionUsedBefore),
            Err(e) => Err(e.into()),
        }
    }
}

fn ledger_failed(op: &'static str, deal_id: DealId, err: LedgerError) -> DealError {
    error!(op, deal_id = %deal_id, error = %err, "Ledger call failed");
    DealError::Ledger(err)
}

/// The ledger accepted a write whose result could not be stored.
fn diverged(
    op: &'static str,
    deal_id: DealId,
    tx_hash: Option<&TxHash>,
    err: sqlx::Error,
) -> DealError {
    error!(
        divergence = true,
        op,
        deal_id = %deal_id,
        tx_hash = tx_hash.map(|h| h.as_str()),
        error = %err,
        "Ledger write succeeded but storage write failed"
    );
    DealError::Storage(err)
}
