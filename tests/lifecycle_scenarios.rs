//! Integration tests for the lifecycle engine
//!
//! These tests drive the public API end to end:
//! - Engine wiring from config (memory and SQLite journals)
//! - Settlement through the oracle relay task
//! - Scripted scenarios through the simulator

use riskhedge_backend::config::EngineConfig;
use riskhedge_backend::lifecycle::{
    spawn_oracle_relay, Address, AssetLedger, InMemoryAsset, LifecycleError, ManualClock, MarketId,
    OracleUpdate, Phase, PhaseErrorKind, PriceSample, RelayStats, SqliteJournal,
};
use riskhedge_backend::simulation::{Script, Simulator};
use riskhedge_backend::Engine;
use std::sync::Arc;
use tokio::sync::mpsc;

const T: i64 = 1_700_000_000;

fn addr(name: &str) -> Address {
    Address::new(name)
}

struct Setup {
    clock: Arc<ManualClock>,
    asset: Arc<InMemoryAsset>,
    engine: Engine,
}

fn setup(config: EngineConfig) -> Setup {
    let clock = Arc::new(ManualClock::new(T));
    let asset = Arc::new(InMemoryAsset::new("USDC"));
    let engine = Engine::build(config, clock.clone(), asset.clone()).unwrap();
    Setup {
        clock,
        asset,
        engine,
    }
}

/// Window [T+3600, T+7200], trigger 1000, 100 in risk, 50 in hedge, started.
fn started_market(s: &Setup) -> MarketId {
    let pair = s.engine.factory.create_pair(T + 3600, T + 7200, 1000).unwrap();
    s.asset.mint(&addr("alice"), 100).unwrap();
    s.asset.mint(&addr("bob"), 50).unwrap();
    pair.risk.deposit(&addr("alice"), 100, &addr("alice")).unwrap();
    pair.hedge.deposit(&addr("bob"), 50, &addr("bob")).unwrap();

    s.clock.set(T + 3600);
    s.engine.controller.start_market(pair.market_id).unwrap();
    pair.market_id
}

#[test]
fn test_liquidation_pays_hedge_holders() {
    let s = setup(EngineConfig::default());
    let id = started_market(&s);
    let pair = s.engine.factory.get_pair(id).unwrap();

    let err = pair.hedge.deposit(&addr("bob"), 1, &addr("bob")).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Phase {
            kind: PhaseErrorKind::DepositNotAllowed,
            ..
        }
    ));

    s.clock.set(T + 7201);
    s.engine
        .controller
        .process_price_update(&addr("oracle"), id, 900, T + 7201)
        .unwrap();

    assert_eq!(s.engine.controller.phase(id).unwrap(), Phase::Liquidated);
    assert_eq!(pair.risk.total_balance(), 0);
    assert_eq!(pair.hedge.total_balance(), 150);

    // Risk claims survive but are worth nothing; hedge holders take the pot.
    assert_eq!(pair.risk.max_redeem(&addr("alice")), 100);
    assert_eq!(pair.risk.preview_redeem(100).unwrap(), 0);
    let paid = pair
        .hedge
        .redeem(&addr("bob"), 50, &addr("bob"), &addr("bob"))
        .unwrap();
    assert_eq!(paid, 150);
    assert_eq!(s.asset.balance_of(&addr("bob")), 150);
}

#[test]
fn test_maturation_pays_risk_holders() {
    let s = setup(EngineConfig::default());
    let id = started_market(&s);
    let pair = s.engine.factory.get_pair(id).unwrap();

    s.clock.set(T + 7201);
    s.engine
        .controller
        .process_price_update(&addr("oracle"), id, 1100, T + 7201)
        .unwrap();

    assert_eq!(s.engine.controller.phase(id).unwrap(), Phase::Matured);
    assert_eq!(pair.hedge.total_balance(), 0);
    assert_eq!(pair.risk.total_balance(), 150);

    let paid = pair
        .risk
        .withdraw(&addr("alice"), 150, &addr("alice"), &addr("alice"))
        .unwrap();
    assert_eq!(paid, 100);
    assert_eq!(pair.risk.total_claims(), 0);
}

#[test]
fn test_replay_after_settlement_is_noop() {
    let s = setup(EngineConfig::default());
    let id = started_market(&s);
    let pair = s.engine.factory.get_pair(id).unwrap();

    s.clock.set(T + 7201);
    let oracle = addr("oracle");
    s.engine
        .controller
        .process_price_update(&oracle, id, 900, T + 7201)
        .unwrap();
    let again = s
        .engine
        .controller
        .process_price_update(&oracle, id, 900, T + 7201)
        .unwrap();
    assert!(again.report().is_none());
    assert_eq!(pair.hedge.total_balance(), 150);

    assert_eq!(
        s.engine.controller.mature_market(id).unwrap_err(),
        LifecycleError::AlreadySettled { market_id: id }
    );
}

#[test]
fn test_create_in_past_leaves_no_trace() {
    let s = setup(EngineConfig::default());
    let err = s.engine.factory.create_pair(T, T + 100, 1000).unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
    assert!(matches!(
        s.engine.factory.get_pair(MarketId(1)),
        Err(LifecycleError::NotFound { .. })
    ));
    assert!(matches!(
        s.engine.controller.market(MarketId(1)),
        Err(LifecycleError::NotFound { .. })
    ));
}

#[test]
fn test_sqlite_journal_records_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("journal.db");
    let mut config = EngineConfig::default();
    config.journal.sqlite_path = Some(db_path.to_string_lossy().into_owned());

    let s = setup(config);
    let id = started_market(&s);
    s.clock.set(T + 7201);
    s.engine.controller.mature_market(id).unwrap();

    let kinds: Vec<&str> = s
        .engine
        .journal
        .entries()
        .unwrap()
        .iter()
        .map(|e| e.event.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "market_created",
            "deposited",
            "deposited",
            "market_started",
            "market_settled"
        ]
    );

    drop(s);
    let reopened = SqliteJournal::open(&db_path.to_string_lossy()).unwrap();
    assert_eq!(reopened.count_for(id).unwrap(), 5);
}

#[tokio::test]
async fn test_relay_settles_once_and_counts_rejections() {
    let s = setup(EngineConfig::default());
    let id = started_market(&s);
    let pair = s.engine.factory.get_pair(id).unwrap();
    s.clock.set(T + 5000);

    let (tx, rx) = mpsc::channel(8);
    let relay = spawn_oracle_relay(s.engine.controller.clone(), addr("oracle"), rx);

    let updates = [
        // above trigger inside the window
        OracleUpdate {
            market_id: id,
            sample: PriceSample {
                price: 1200,
                observed_at: T + 4000,
            },
        },
        // future timestamp
        OracleUpdate {
            market_id: id,
            sample: PriceSample {
                price: 500,
                observed_at: T + 9000,
            },
        },
        // unknown market
        OracleUpdate {
            market_id: MarketId(42),
            sample: PriceSample {
                price: 500,
                observed_at: T + 4000,
            },
        },
        // breach
        OracleUpdate {
            market_id: id,
            sample: PriceSample {
                price: 800,
                observed_at: T + 4999,
            },
        },
        // replay after settlement
        OracleUpdate {
            market_id: id,
            sample: PriceSample {
                price: 700,
                observed_at: T + 5000,
            },
        },
    ];
    for update in updates {
        tx.send(update).await.unwrap();
    }
    drop(tx);

    let stats = relay.await.unwrap();
    assert_eq!(
        stats,
        RelayStats {
            received: 5,
            settled: 1,
            ignored: 2,
            rejected: 2,
        }
    );
    assert_eq!(s.engine.controller.phase(id).unwrap(), Phase::Liquidated);
    assert_eq!(pair.hedge.total_balance(), 150);
}

#[tokio::test]
async fn test_relay_with_unlisted_oracle_rejects_everything() {
    let s = setup(EngineConfig::default());
    let id = started_market(&s);
    s.clock.set(T + 7201);

    let (tx, rx) = mpsc::channel(2);
    let relay = spawn_oracle_relay(s.engine.controller.clone(), addr("mallory"), rx);
    tx.send(OracleUpdate {
        market_id: id,
        sample: PriceSample {
            price: 1,
            observed_at: T + 7201,
        },
    })
    .await
    .unwrap();
    drop(tx);

    let stats = relay.await.unwrap();
    assert_eq!(stats.rejected, 1);
    assert_eq!(s.engine.controller.phase(id).unwrap(), Phase::InProgress);
}

#[test]
fn test_script_maturation_and_payout() {
    let script = Script::from_toml_str(
        r#"
        start_time = 1700000000

        [[steps]]
        action = "create_pair"
        window_start = 60
        window_end = 120
        trigger_price = 50

        [[steps]]
        action = "fund"
        account = "carol"
        amount = 30

        [[steps]]
        action = "fund"
        account = "dave"
        amount = 10

        [[steps]]
        action = "deposit"
        market_id = 1
        side = "risk"
        account = "carol"
        amount = 30

        [[steps]]
        action = "deposit"
        market_id = 1
        side = "hedge"
        account = "dave"
        amount = 10

        [[steps]]
        action = "mature"
        market_id = 1

        [[steps]]
        action = "advance_to"
        at = 60

        [[steps]]
        action = "start"
        market_id = 1

        [[steps]]
        action = "advance"
        secs = 61

        [[steps]]
        action = "mature"
        market_id = 1

        [[steps]]
        action = "redeem"
        market_id = 1
        side = "risk"
        account = "carol"
        "#,
    )
    .unwrap();

    let sim = Simulator::new(EngineConfig::default(), script.start_time).unwrap();
    let report = sim.run(&script);

    let failed: Vec<_> = report.failed_steps().map(|s| s.index).collect();
    assert_eq!(failed, vec![5]);
    assert_eq!(report.steps[5].error_code.as_deref(), Some("phase"));

    let market = &report.markets[0];
    assert_eq!(market.phase, Some(Phase::Matured));
    assert_eq!(market.risk_balance, 0);
    assert_eq!(market.hedge_balance, 0);
    assert_eq!(market.hedge_claims, 10);
    assert_eq!(sim.asset().balance_of(&addr("carol")), 40);
}
