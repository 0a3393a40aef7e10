// End-to-end edit flow against the in-memory API stub

use chrono::NaiveDate;
use hotel_backoffice::api::paths;
use hotel_backoffice::stub::{self, StubState};
use hotel_backoffice::{
    ApiClient, ApiError, BookingResource, EditError, EditPhase, EditWorkflow, ExpenseResource,
    FixedClock, LoginRequest, LoginType, NoticeBuffer, NoticeLevel, Resource, SalesIncomeResource,
    SqliteAuditLog, UpdateBody,
};
use serde_json::json;
use std::sync::Arc;

const OTP: &str = "482913";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

async fn spawn_stub() -> (String, StubState) {
    let state = StubState::seeded(Arc::new(FixedClock(today()))).with_fixed_otp(OTP);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(stub::serve(listener, state.clone()));
    (format!("http://{}", addr), state)
}

async fn logged_in(base_url: &str) -> ApiClient {
    let mut client = ApiClient::new(base_url);
    client
        .login(&LoginRequest {
            login_type: LoginType::Admin,
            username: "admin".to_string(),
            password: "admin123".to_string(),
            staff_unique_id: None,
        })
        .await
        .unwrap();
    client
}

fn workflow<R: Resource>(resource: R, client: &ApiClient, notices: Arc<NoticeBuffer>) -> EditWorkflow<R> {
    EditWorkflow::new(resource, Arc::new(client.clone()))
        .with_clock(Arc::new(FixedClock(today())))
        .with_notifier(notices)
        .with_actor("admin")
}

#[tokio::test]
async fn test_login_and_list() {
    let (url, _state) = spawn_stub().await;
    let client = logged_in(&url).await;
    assert!(client.session().and_then(|s| s.bearer()).is_some());

    let bookings = BookingResource::new(client.clone()).list().await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(bookings[0].guest_name, "Asha Rao");

    let mut bad = ApiClient::new(&url);
    let err = bad
        .login(&LoginRequest {
            login_type: LoginType::Admin,
            username: "admin".to_string(),
            password: "nope".to_string(),
            staff_unique_id: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.user_message("Login failed"), "Invalid credentials");
}

#[tokio::test]
async fn test_full_income_edit() {
    let (url, state) = spawn_stub().await;
    let client = logged_in(&url).await;
    let notices = Arc::new(NoticeBuffer::new());
    let audit = Arc::new(SqliteAuditLog::open_in_memory().unwrap());
    let workflow = workflow(SalesIncomeResource::new(client.clone()), &client, notices.clone())
        .with_audit(audit.clone());

    let records = workflow.list().await.unwrap();
    let record = records.iter().find(|r| r.id == 20).unwrap().clone();

    let mut session = workflow.session();
    session.begin(&record).await.unwrap();
    assert_eq!(session.phase(), EditPhase::OtpPendingEntry);

    // Wrong code keeps the session waiting for another try
    let err = session.submit_otp("000000").await.unwrap_err();
    assert_eq!(err, EditError::VerificationFailed("Invalid OTP".to_string()));
    assert_eq!(session.phase(), EditPhase::OtpPendingEntry);
    assert_eq!(session.otp_code(), "");

    session.submit_otp(OTP).await.unwrap();
    assert_eq!(session.phase(), EditPhase::EditUnlocked);

    session.set_field("amount", "1750").unwrap();
    let outcome = session.save().await.unwrap();
    assert_eq!(outcome.record_id, 20);
    assert_eq!(session.phase(), EditPhase::Idle);

    let refreshed = outcome.records.unwrap();
    let updated = refreshed.iter().find(|r| r.id == 20).unwrap();
    assert_eq!(updated.amount, 1750.0);

    assert_eq!(state.hits("request-otp"), 1);
    assert_eq!(state.hits("verify-otp"), 2);
    assert_eq!(state.hits("update-sales-income"), 1);

    let last = notices.drain().pop().unwrap();
    assert_eq!(last.level, NoticeLevel::Success);

    let events = audit.events_for_entity("sales_income_edit", "20").unwrap();
    assert!(events.iter().any(|e| e.event_type == "record_updated"));
    assert!(events.iter().all(|e| !e.data.to_string().contains(OTP)));

    println!("✅ Income edit flow PASSED");
}

#[tokio::test]
async fn test_old_record_never_requests_otp() {
    let (url, state) = spawn_stub().await;
    let client = logged_in(&url).await;
    let notices = Arc::new(NoticeBuffer::new());
    let workflow = workflow(BookingResource::new(client.clone()), &client, notices.clone());

    let records = workflow.list().await.unwrap();
    let old = records.iter().find(|b| b.id == 2).unwrap().clone();
    assert!(!workflow.is_editable(&old));

    let mut session = workflow.session();
    let err = session.begin(&old).await.unwrap_err();
    assert!(matches!(err, EditError::NotEditable { .. }));
    assert_eq!(session.phase(), EditPhase::Idle);
    assert_eq!(state.hits("request-otp"), 0);
    assert_eq!(
        notices.last().unwrap().message,
        "Editing allowed only for records up to 2 days old"
    );
}

#[tokio::test]
async fn test_expense_edit_with_voucher_upload() {
    let (url, state) = spawn_stub().await;
    let client = logged_in(&url).await;
    let workflow = workflow(ExpenseResource::new(client.clone()), &client, Arc::new(NoticeBuffer::new()));

    let voucher = std::env::temp_dir().join(format!("voucher-{}.pdf", uuid::Uuid::new_v4()));
    std::fs::write(&voucher, b"%PDF-1.4 test").unwrap();

    let records = workflow.list().await.unwrap();
    let record = records.iter().find(|e| e.id == 10).unwrap().clone();

    let mut session = workflow.session();
    session.begin(&record).await.unwrap();
    session.submit_otp(OTP).await.unwrap();

    // Voucher file without a number is refused locally
    session.set_field("voucher_file", voucher.to_str().unwrap()).unwrap();
    let err = session.save().await.unwrap_err();
    assert!(matches!(err, EditError::Validation(_)));
    assert_eq!(session.phase(), EditPhase::EditUnlocked);
    assert_eq!(state.hits("update-expense"), 0);

    session.set_field("voucher_no", "V-77").unwrap();
    session.save().await.unwrap();

    let stored = state.expenses().into_iter().find(|e| e.id == 10).unwrap();
    assert_eq!(stored.voucher_no.as_deref(), Some("V-77"));
    assert!(stored.voucher_file.unwrap().starts_with("/media/vouchers/10_voucher-"));

    std::fs::remove_file(&voucher).ok();
}

#[tokio::test]
async fn test_update_without_otp_is_rejected() {
    let (url, _state) = spawn_stub().await;
    let client = logged_in(&url).await;

    let body = UpdateBody::Json(json!({"amount": 10, "description": "x"}));
    let err = client
        .update(paths::UPDATE_OTHER_INCOME, 30, &body)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert_eq!(err.user_message("Failed to update record"), "OTP verification required");
}

#[tokio::test]
async fn test_unreachable_server() {
    let client = ApiClient::new("http://127.0.0.1:1").with_session(hotel_backoffice::Session::from_token("t"));
    let err = BookingResource::new(client).list().await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
    assert_eq!(err.user_message("Failed to load records"), "Failed to load records");
}
