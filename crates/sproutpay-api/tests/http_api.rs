mod common;

use std::sync::Arc;

use actix_web::{test, web, App};
use serde_json::{json, Value};

use sproutpay::settlement::SettlementNetwork;
use sproutpay_api::db::Database;
use sproutpay_api::routes;
use sproutpay_api::state::AppState;

use common::{config, MockNetwork, Wallet};

fn make_state(network: &Arc<MockNetwork>, extra: &[(&str, &str)]) -> web::Data<AppState> {
    let network: Arc<dyn SettlementNetwork> = network.clone();
    web::Data::new(AppState::new(
        config(extra),
        Database::new(":memory:").unwrap(),
        network,
    ))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .app_data(routes::json_config())
                .configure(routes::configure),
        )
        .await
    };
}

fn create_body(creator: &Wallet) -> Value {
    json!({
        "linkType": "receiver",
        "creatorAddress": creator.address,
        "signature": creator.sign("Create SproutPay link"),
        "message": "Create SproutPay link",
        "amount": "100.50000000",
        "token": "USDC",
        "chain": "ethereum",
        "escrowType": "time_locked",
        "escrowHours": 48,
        "description": "Website redesign",
        "attachWorkContract": true,
        "contractTerms": "Three revisions included",
        "disputeResolution": true,
        "arbitrationFee": "2.5"
    })
}

fn signed_body(field: &str, wallet: &Wallet, message: &str) -> Value {
    json!({
        field: wallet.address,
        "signature": wallet.sign(message),
        "message": message,
    })
}

#[actix_rt::test]
async fn test_health_reports_network_state() {
    let network = MockNetwork::new();
    network.set_authenticated(false);
    let state = make_state(&network, &[]);
    let app = app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "sproutpay-api");
    assert_eq!(body["settlementNetwork"], "disconnected");
}

#[actix_rt::test]
async fn test_create_and_get_link() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[("FRONTEND_URL", "https://app.sproutpay.test/")]);
    let app = app!(state);
    let creator = Wallet::random();

    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(create_body(&creator))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    let link = &body["paymentLink"];
    assert_eq!(link["status"], "created");
    assert_eq!(link["amount"], "100.50000000");
    assert_eq!(link["escrowHours"], 48);
    let short_id = link["shortId"].as_str().unwrap().to_string();
    assert_eq!(
        link["shareUrl"],
        format!("https://app.sproutpay.test/link/{short_id}")
    );

    let req = test::TestRequest::get()
        .uri(&format!("/api/payment-links/{short_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    let link = &body["paymentLink"];
    assert_eq!(link["contractInfo"]["contractTerms"], "Three revisions included");
    assert_eq!(link["contractInfo"]["arbitrationFee"], "2.5");
    assert!(link["channelInfo"].is_null());
}

#[actix_rt::test]
async fn test_create_rejects_invalid_input() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[]);
    let app = app!(state);
    let creator = Wallet::random();

    let mut body = create_body(&creator);
    body["amount"] = json!("1e5");
    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "validation_error");

    // unknown enum value fails in the extractor, same error shape
    let mut body = create_body(&creator);
    body["escrowType"] = json!("forever");
    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");

    let mut body = create_body(&creator);
    body["escrowHours"] = Value::Null;
    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "missing_escrow_hours");

    let mut body = create_body(&creator);
    body["signature"] = json!(Wallet::random().sign("Create SproutPay link"));
    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_rt::test]
async fn test_unknown_link_is_404() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[]);
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/api/payment-links/ZZZZZZZZ")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_found");
}

#[actix_rt::test]
async fn test_accept_then_conflict() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[]);
    let app = app!(state);
    let creator = Wallet::random();
    let payer = Wallet::random();
    let latecomer = Wallet::random();

    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(create_body(&creator))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = body["paymentLink"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/payment-links/{id}/accept"))
        .set_json(signed_body("acceptorAddress", &payer, "Accept link"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Payment link accepted successfully");
    assert_eq!(body["paymentLink"]["status"], "channel_active");
    assert_eq!(body["paymentLink"]["yellowNetworkStatus"], "active");
    assert_eq!(body["yellowChannel"]["isVirtual"], false);
    let channel_id = body["yellowChannel"]["channelId"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/payment-links/{id}/accept"))
        .set_json(signed_body("acceptorAddress", &latecomer, "Accept link"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "already_processed");
    assert_eq!(body["currentStatus"], "channel_active");

    let req = test::TestRequest::get()
        .uri(&format!("/api/channels/{channel_id}/status"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["channel"]["status"], "active");
    assert_eq!(body["linkStatus"], "channel_active");

    let req = test::TestRequest::get().uri("/api/channels/stats").to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["stats"]["totalChannels"], 1);
    assert_eq!(body["stats"]["activeChannels"], 1);
    assert!(body["stats"]["lastUpdate"].is_string());
}

#[actix_rt::test]
async fn test_release_by_non_payer_is_forbidden() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[]);
    let app = app!(state);
    let creator = Wallet::random();
    let payer = Wallet::random();

    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(create_body(&creator))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = body["paymentLink"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/payment-links/{id}/accept"))
        .set_json(signed_body("acceptorAddress", &payer, "Accept link"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // the creator of a receiver link is the payee
    let req = test::TestRequest::post()
        .uri(&format!("/api/payment-links/{id}/early-release"))
        .set_json(signed_body("releaserAddress", &creator, "Release early"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_payer");
    assert_eq!(body["currentStatus"], "channel_active");

    let req = test::TestRequest::post()
        .uri(&format!("/api/payment-links/{id}/early-release"))
        .set_json(signed_body("releaserAddress", &payer, "Release early"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["paymentLink"]["status"], "early_released");
    assert_eq!(body["settlement"]["transactionHash"], common::SETTLEMENT_HASH);
}

#[actix_rt::test]
async fn test_dispute_route() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[]);
    let app = app!(state);
    let creator = Wallet::random();
    let payer = Wallet::random();

    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(create_body(&creator))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = body["paymentLink"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/payment-links/{id}/accept"))
        .set_json(signed_body("acceptorAddress", &payer, "Accept link"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let mut dispute = signed_body("disputerAddress", &creator, "Dispute link");
    dispute["reason"] = json!("Payment never arrived in the channel");
    let req = test::TestRequest::post()
        .uri(&format!("/api/payment-links/{id}/dispute"))
        .set_json(dispute)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["paymentLink"]["status"], "disputed");
    assert_eq!(body["dispute"]["initiatedBy"], creator.address);
}

#[actix_rt::test]
async fn test_settle_requires_target_chain() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[]);
    let app = app!(state);
    let payer = Wallet::random();

    let mut settle = signed_body("senderAddress", &payer, "Settle channel");
    settle["targetChain"] = json!("");
    let req = test::TestRequest::post()
        .uri("/api/channels/0xsession0001/settle")
        .set_json(settle)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let mut settle = signed_body("senderAddress", &payer, "Settle channel");
    settle["targetChain"] = json!("polygon");
    let req = test::TestRequest::post()
        .uri("/api/channels/0xsession0001/settle")
        .set_json(settle)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn test_settle_is_payer_only() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[]);
    let app = app!(state);
    let creator = Wallet::random();
    let payer = Wallet::random();
    let stranger = Wallet::random();

    let mut create = create_body(&creator);
    create["allowEarlyRelease"] = json!(false);
    let req = test::TestRequest::post()
        .uri("/api/payment-links")
        .set_json(create)
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let short_id = body["paymentLink"]["shortId"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/payment-links/{short_id}/accept"))
        .set_json(signed_body("acceptorAddress", &payer, "Accept link"))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let channel_id = body["yellowChannel"]["channelId"].as_str().unwrap().to_string();
    let uri = format!("/api/channels/{channel_id}/settle");

    // no signer at all
    let req = test::TestRequest::post()
        .uri(&uri)
        .set_json(json!({ "targetChain": "polygon" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // payer's address, stranger's signature
    let mut forged = signed_body("senderAddress", &payer, "Settle channel");
    forged["signature"] = json!(stranger.sign("Settle channel"));
    forged["targetChain"] = json!("polygon");
    let req = test::TestRequest::post().uri(&uri).set_json(forged).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let mut settle = signed_body("senderAddress", &stranger, "Settle channel");
    settle["targetChain"] = json!("polygon");
    let req = test::TestRequest::post().uri(&uri).set_json(settle).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_payer");
    assert_eq!(body["currentStatus"], "channel_active");

    // the payer still cannot open a locked escrow early
    let mut settle = signed_body("senderAddress", &payer, "Settle channel");
    settle["targetChain"] = json!("polygon");
    let req = test::TestRequest::post().uri(&uri).set_json(settle).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "early_release_not_allowed");

    let req = test::TestRequest::get()
        .uri(&format!("/api/payment-links/{short_id}"))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["paymentLink"]["status"], "channel_active");
    assert_eq!(network.calls(), vec!["open_session".to_string()]);
}

#[actix_rt::test]
async fn test_metrics_token_gate() {
    let network = MockNetwork::new();
    let state = make_state(&network, &[("METRICS_TOKEN", "scrape-secret")]);
    let app = app!(state);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer wrong"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer scrape-secret"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn test_links_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sproutpay.db");
    let path = path.to_str().unwrap();
    let creator = Wallet::random();

    let short_id = {
        let network = MockNetwork::new();
        let state = web::Data::new(AppState::new(
            config(&[]),
            Database::new(path).unwrap(),
            network as Arc<dyn SettlementNetwork>,
        ));
        let app = app!(state);
        let req = test::TestRequest::post()
            .uri("/api/payment-links")
            .set_json(create_body(&creator))
            .to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        body["paymentLink"]["shortId"].as_str().unwrap().to_string()
    };

    let db = Database::new(path).unwrap();
    let link = db.find_link(&short_id).unwrap().unwrap();
    assert_eq!(link.creator_address, creator.address);
    assert_eq!(link.amount.to_string(), "100.50000000");
    assert!(db.get_contract_details(&link.id).unwrap().is_some());
}
