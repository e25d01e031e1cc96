use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;
use zendo::api;
use zendo::db::init_db;
use zendo::domain::{Address, Chain, Decimal, TokenMetadata, TxHash};
use zendo::ledger::{LedgerOp, ObservedTransfer};
use zendo::referral::MockReferralTracker;
use zendo::{EngineConfig, ManualClock, MockLedger, Repository, Services};

struct TestApp {
    app: axum::Router,
    ledger: Arc<MockLedger>,
    referrals: Arc<MockReferralTracker>,
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

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let ledger = Arc::new(
        MockLedger::new()
            .with_token(
                addr('1'),
                TokenMetadata {
                    name: "Zen".to_string(),
                    symbol: "ZEN".to_string(),
                    decimals: 18,
                    logo: None,
                },
                Decimal::from(2u32),
            )
            .with_balance(addr('e'), addr('1'), Decimal::from(1000u32)),
    );
    let referrals = Arc::new(MockReferralTracker::new());
    let services = Services::new(
        Arc::new(Repository::new(pool)),
        ledger.clone(),
        Arc::new(ManualClock::new(t0())),
        referrals.clone(),
        EngineConfig::new(addr('c'), addr('d'), Chain::new("arbitrum")),
    );

    TestApp {
        app: api::create_router(services.app_state()),
        ledger,
        referrals,
        _temp: temp_dir,
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_deal(&self) -> i64 {
        let (status, body) = self.send("POST", "/deals", Some(deal_body())).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["dealId"].as_i64().unwrap()
    }

    /// Register the owner's commission (5) and pool (50) transfers.
    fn fund(&self, commission: u8, pool: u8) {
        let transfer = |to: Address, amount: u32| ObservedTransfer {
            token: addr('1'),
            from: addr('2'),
            to,
            amount: Decimal::from(amount),
        };
        self.ledger.add_transfer(hash(commission), transfer(addr('c'), 5));
        self.ledger.add_transfer(hash(pool), transfer(addr('d'), 50));
    }

    async fn pay(&self, path: &str, deal_id: i64, tx: TxHash) -> (StatusCode, Value) {
        self.send(
            "POST",
            path,
            Some(json!({"dealId": deal_id, "transactionHash": tx.to_string()})),
        )
        .await
    }
}

fn deal_body() -> Value {
    json!({
        "name": "Diamond hands",
        "description": "Hold ZEN for three days",
        "contractAddress": addr('1').to_string(),
        "coinOwnerAddress": addr('2').to_string(),
        "minimumAmountToHold": 250.5,
        "minimumDaysToHold": 3,
        "reward": 5,
        "maxRewards": 10,
        "startDate": "2030-03-01T09:00:00Z",
        "endDate": "2030-03-08T09:00:00Z",
        "code": "friend"
    })
}

#[tokio::test]
async fn test_deal_lifecycle_over_http() {
    let app = setup_test_app().await;
    let id = app.create_deal().await;

    let (status, deal) = app.send("GET", &format!("/deals/id/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deal["commissionPaid"], json!(false));
    assert_eq!(deal["activated"], json!(false));
    assert_eq!(deal["code"], json!("friend"));
    assert_eq!(deal["tokenSymbol"], json!("ZEN"));

    let (status, body) = app.pay("/deals/commission", id, hash(1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid transaction hash"));

    app.fund(1, 2);
    let (status, body) = app.pay("/deals/commission", id, hash(1)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], json!("Deal commission paid"));

    let (status, body) = app.pay("/deals/activate", id, hash(1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Transaction hash has been used before"));

    let (status, body) = app.pay("/deals/activate", id, hash(2)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], json!("Deal marked as activated"));
    assert_eq!(app.ledger.count(LedgerOp::Activate), 1);
    assert_eq!(app.referrals.conversions().len(), 1);

    let join = json!({"dealId": id, "address": addr('e').to_string()});
    let (status, body) = app.send("POST", "/deals/join", Some(join.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["hasBalance"], json!(true));

    let (status, body) = app.send("POST", "/deals/join", Some(join)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Player has already joined this deal"));

    let (status, listed) = app
        .send("GET", &format!("/deals/player/{}", addr('e')), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["id"], json!(id));
    assert_eq!(listed[0]["rewarded"], json!(false));
    assert_eq!(listed[0]["totalPlayers"], json!(1));

    let (_, all) = app.send("GET", "/deals/all", None).await;
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (_, featured) = app.send("GET", "/deals/featured", None).await;
    assert_eq!(featured["active"], json!(1));
    assert_eq!(featured["featured"][0]["id"], json!(id));
}

#[tokio::test]
async fn test_create_rejections() {
    let app = setup_test_app().await;

    let mut body = deal_body();
    body["coinOwnerAddress"] = json!("0x1234");
    let (status, resp) = app.send("POST", "/deals", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], json!("Coin owner address is not valid"));

    let mut body = deal_body();
    body["endDate"] = json!("2030-03-01T21:00:00Z");
    let (status, resp) = app.send("POST", "/deals", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        resp["error"],
        json!("End date should be at least a day after start date")
    );

    let mut body = deal_body();
    body["minimumDaysToHold"] = json!(u32::MAX);
    let (status, resp) = app.send("POST", "/deals", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], json!("Minimum days to hold is out of range"));

    assert_eq!(app.ledger.count(LedgerOp::CreateDeal), 0);
}

#[tokio::test]
async fn test_activation_requires_commission() {
    let app = setup_test_app().await;
    let id = app.create_deal().await;
    app.fund(1, 2);

    let (status, body) = app.pay("/deals/activate", id, hash(2)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Deal commission has not been paid"));
    assert_eq!(app.ledger.count(LedgerOp::Activate), 0);
}

#[tokio::test]
async fn test_unknown_deal_is_not_found() {
    let app = setup_test_app().await;

    let (status, _) = app.send("GET", "/deals/id/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.pay("/deals/commission", 42, hash(1)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("Deal does not exist"));
}

#[tokio::test]
async fn test_invalid_address_in_path() {
    let app = setup_test_app().await;
    let (status, body) = app.send("GET", "/deals/player/not-an-address", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid address"));
}

#[tokio::test]
async fn test_ledger_failure_is_internal_error() {
    let app = setup_test_app().await;
    app.ledger.fail_on(LedgerOp::CreateDeal);

    let (status, body) = app.send("POST", "/deals", Some(deal_body())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!("Internal server error"));

    app.ledger.clear_failures();
    let (_, deals) = app
        .send("GET", &format!("/deals/owner/{}", addr('2')), None)
        .await;
    assert!(deals.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_token_details() {
    let app = setup_test_app().await;

    let (status, token) = app
        .send("GET", &format!("/tokens/details/{}", addr('1')), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(token["symbol"], json!("ZEN"));
    assert_eq!(token["price"], json!(2.0));

    let (status, _) = app
        .send("GET", &format!("/tokens/details/{}", addr('9')), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dates_in_the_past_rejected() {
    let app = setup_test_app().await;
    let mut body = deal_body();
    let yesterday = t0() - Duration::days(1);
    body["startDate"] = json!(yesterday.to_rfc3339());
    let (status, resp) = app.send("POST", "/deals", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], json!("Dates can't be before today"));
}
