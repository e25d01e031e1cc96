use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use zendo::db::init_db;
use zendo::domain::{Address, Chain, DealId, Decimal, NewDeal, TokenMetadata, TxHash};
use zendo::ledger::{LedgerOp, ObservedTransfer};
use zendo::{
    DealFilter, DealStatus, EngineConfig, ManualClock, MockLedger, NoopReferralTracker,
    Repository, Services,
};

struct Harness {
    services: Services,
    ledger: Arc<MockLedger>,
    clock: Arc<ManualClock>,
    _temp: TempDir,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 3, 1, 9, 0, 0).unwrap()
}

fn addr(c: char) -> Address {
    Address::parse(&format!("0x{}", c.to_string().repeat(40))).unwrap()
}

fn hash(b: u8) -> TxHash {
    TxHash::from_bytes(&[b; 32])
}

async fn setup() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let ledger = Arc::new(MockLedger::new().with_token(
        addr('1'),
        TokenMetadata {
            name: "Zen".to_string(),
            symbol: "ZEN".to_string(),
            decimals: 18,
            logo: None,
        },
        Decimal::from(1u32),
    ));
    let clock = Arc::new(ManualClock::new(t0()));
    let services = Services::new(
        Arc::new(Repository::new(pool)),
        ledger.clone(),
        clock.clone(),
        Arc::new(NoopReferralTracker),
        EngineConfig::new(addr('c'), addr('d'), Chain::new("arbitrum")),
    );

    Harness {
        services,
        ledger,
        clock,
        _temp: temp_dir,
    }
}

impl Harness {
    /// A live deal: 3 holding days, ends a week after t0.
    async fn live_deal(&self) -> DealId {
        let engine = &self.services.engine;
        let id = engine
            .create(NewDeal {
                name: "Hold ZEN".to_string(),
                description: None,
                contract_address: addr('1').to_string(),
                coin_owner_address: addr('2').to_string(),
                minimum_amount_to_hold: Decimal::from(100u32),
                minimum_days_to_hold: 3,
                reward: Decimal::from(5u32),
                max_rewards: 10,
                start_date: t0(),
                end_date: t0() + Duration::days(7),
                referral_code: None,
            })
            .await
            .unwrap();

        let transfer = |to: Address, amount: u32| ObservedTransfer {
            token: addr('1'),
            from: addr('2'),
            to,
            amount: Decimal::from(amount),
        };
        self.ledger.add_transfer(hash(1), transfer(addr('c'), 5));
        self.ledger.add_transfer(hash(2), transfer(addr('d'), 50));
        engine.store_commission(id, hash(1).as_str()).await.unwrap();
        engine
            .mark_as_activated(id, hash(2).as_str(), None)
            .await
            .unwrap();
        id
    }

    fn hold(&self, player: Address, amount: u32) {
        self.ledger
            .set_balance(player, addr('1'), Decimal::from(amount));
    }

    async fn next_day(&self) -> zendo::RunSummary {
        self.clock.advance(Duration::days(1) + Duration::minutes(1));
        self.services.reconciler.run_once().await.unwrap()
    }
}

#[tokio::test]
async fn test_holder_rewarded_seller_reset() {
    let h = setup().await;
    let id = h.live_deal().await;
    let holder = addr('e');
    let seller = addr('f');
    h.hold(holder.clone(), 500);
    h.hold(seller.clone(), 500);
    h.services.engine.join(holder.as_str(), id).await.unwrap();
    h.services.engine.join(seller.as_str(), id).await.unwrap();

    // Inside the join grace period nobody is evaluated.
    let summary = h.services.reconciler.run_once().await.unwrap();
    assert_eq!(summary.players_advanced, 0);

    let summary = h.next_day().await;
    assert_eq!(summary.players_advanced, 2);

    h.hold(seller.clone(), 10);
    let summary = h.next_day().await;
    assert_eq!(summary.players_advanced, 1);
    assert_eq!(summary.players_reset, 1);

    let summary = h.next_day().await;
    assert_eq!(summary.players_rewarded, 1);
    assert_eq!(h.ledger.count(LedgerOp::UpdateCount), 1);

    // The rewarded row is terminal.
    let summary = h.next_day().await;
    assert_eq!(summary.players_rewarded, 0);
    assert_eq!(summary.rewards_already_sent, 1);
    assert_eq!(h.ledger.count(LedgerOp::UpdateCount), 1);

    let listed = h
        .services
        .queries
        .list(DealFilter::ByPlayer(holder))
        .await
        .unwrap();
    assert_eq!(listed[0].rewarded, Some(true));
    let listed = h
        .services
        .queries
        .list(DealFilter::ByPlayer(seller))
        .await
        .unwrap();
    assert_eq!(listed[0].rewarded, Some(false));
}

#[tokio::test]
async fn test_deal_ended_once_after_holding_window() {
    let h = setup().await;
    let id = h.live_deal().await;

    h.clock.set(t0() + Duration::days(10));
    let summary = h.services.reconciler.run_once().await.unwrap();
    assert_eq!(summary.deals_ended, 1);

    let summary = h.services.reconciler.run_once().await.unwrap();
    assert_eq!(summary.deals_seen, 0);
    assert_eq!(h.ledger.count(LedgerOp::MarkDealEnded), 1);

    let details = h.services.queries.get(id).await.unwrap().unwrap();
    assert!(details.done);
    assert_eq!(details.status, DealStatus::Ended);
}

#[tokio::test]
async fn test_failed_payout_retried_next_run() {
    let h = setup().await;
    let id = h.live_deal().await;
    let player = addr('e');
    h.hold(player.clone(), 500);
    h.services.engine.join(player.as_str(), id).await.unwrap();

    h.next_day().await;
    h.next_day().await;

    h.ledger.fail_on(LedgerOp::UpdateCount);
    let summary = h.next_day().await;
    assert_eq!(summary.players_failed, 1);
    assert_eq!(summary.players_rewarded, 0);

    h.ledger.clear_failures();
    let summary = h.services.reconciler.run_once().await.unwrap();
    assert_eq!(summary.players_rewarded, 1);
}
