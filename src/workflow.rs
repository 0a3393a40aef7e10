// 🔏 Edit workflow - OTP-gated editing of financial records
//
// Phases:
//   Idle → OtpRequested → OtpPendingEntry → OtpVerifying → EditUnlocked → Saving → Idle
//
// Fallbacks on failure:
//   request-otp fails → Idle
//   verify-otp fails  → OtpPendingEntry (OTP cleared)
//   update fails      → EditUnlocked
//
// Each transition takes `&mut self`, so one session has at most one call in
// flight. If the future driving a call is dropped, the next operation settles
// the leftover transient phase to its fallback.

use crate::audit::{AuditEvent, AuditSink, NoAudit};
use crate::editable::{is_editable, Clock, SystemClock};
use crate::error::{ApiError, EditError, FieldError};
use crate::notify::{Notice, Notifier, TracingNotifier};
use crate::otp::{OtpGateway, OtpIssued, OtpRequest, OtpVerification};
use crate::records::{EditForm, EditableRecord};
use crate::resources::Resource;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const REQUEST_FAILED: &str = "Failed to request OTP";
const VERIFY_FAILED: &str = "OTP verification failed";
const NOT_VERIFIED: &str = "OTP not verified";
const UPDATE_FAILED: &str = "Failed to update record";
const REFRESH_FAILED: &str = "Failed to refresh records";

// ============================================================================
// PHASE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    Idle,
    OtpRequested,
    OtpPendingEntry,
    OtpVerifying,
    EditUnlocked,
    Saving,
}

impl EditPhase {
    /// Phases that only exist while a call is in flight
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EditPhase::OtpRequested | EditPhase::OtpVerifying | EditPhase::Saving
        )
    }

    /// Where a dropped call leaves the session
    fn fallback(&self) -> EditPhase {
        match self {
            EditPhase::OtpRequested => EditPhase::Idle,
            EditPhase::OtpVerifying => EditPhase::OtpPendingEntry,
            EditPhase::Saving => EditPhase::EditUnlocked,
            other => *other,
        }
    }
}

impl std::fmt::Display for EditPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            EditPhase::Idle => "idle",
            EditPhase::OtpRequested => "requesting OTP",
            EditPhase::OtpPendingEntry => "waiting for OTP",
            EditPhase::OtpVerifying => "verifying OTP",
            EditPhase::EditUnlocked => "editing",
            EditPhase::Saving => "saving",
        };
        f.write_str(text)
    }
}

// ============================================================================
// ABORT
// ============================================================================

/// Aborts whatever call the session has in flight and tears it down to Idle.
///
/// Fires once; after an abort has been observed the session issues a new handle.
#[derive(Debug, Clone)]
pub struct AbortHandle(CancellationToken);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// None when the token fired before `fut` finished
async fn guarded<F: Future>(abort: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = abort.cancelled() => None,
        out = fut => Some(out),
    }
}

// ============================================================================
// WORKFLOW (shared configuration)
// ============================================================================

/// Collaborators shared by every edit session on one resource
pub struct EditWorkflow<R: Resource> {
    resource: Arc<R>,
    gateway: Arc<dyn OtpGateway>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    actor: String,
}

impl<R: Resource> Clone for EditWorkflow<R> {
    fn clone(&self) -> Self {
        EditWorkflow {
            resource: Arc::clone(&self.resource),
            gateway: Arc::clone(&self.gateway),
            clock: Arc::clone(&self.clock),
            notifier: Arc::clone(&self.notifier),
            audit: Arc::clone(&self.audit),
            actor: self.actor.clone(),
        }
    }
}

impl<R: Resource> EditWorkflow<R> {
    pub fn new(resource: R, gateway: Arc<dyn OtpGateway>) -> Self {
        EditWorkflow {
            resource: Arc::new(resource),
            gateway,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(TracingNotifier),
            audit: Arc::new(NoAudit),
            actor: "unknown".to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn is_editable(&self, record: &R::Record) -> bool {
        is_editable(record.record_date(), self.clock.today())
    }

    pub async fn list(&self) -> Result<Vec<R::Record>, ApiError> {
        self.resource.list().await
    }

    /// Fresh session in Idle
    pub fn session(&self) -> EditSession<R> {
        EditSession {
            id: Uuid::new_v4(),
            workflow: self.clone(),
            phase: EditPhase::Idle,
            target: None,
            otp_code: String::new(),
            form: None,
            abort: CancellationToken::new(),
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Result of a successful save
#[derive(Debug, Clone)]
pub struct SaveOutcome<T> {
    pub record_id: i64,
    /// Full re-fetch after the update; None when the refresh failed
    pub records: Option<Vec<T>>,
}

/// One edit attempt on one record
pub struct EditSession<R: Resource> {
    id: Uuid,
    workflow: EditWorkflow<R>,
    phase: EditPhase,
    target: Option<R::Record>,
    otp_code: String,
    form: Option<R::Form>,
    abort: CancellationToken,
}

impl<R: Resource> EditSession<R> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> EditPhase {
        self.phase
    }

    /// Snapshot taken when the edit began
    pub fn target(&self) -> Option<&R::Record> {
        self.target.as_ref()
    }

    pub fn otp_code(&self) -> &str {
        &self.otp_code
    }

    pub fn set_otp_code(&mut self, code: impl Into<String>) {
        self.otp_code = code.into();
    }

    pub fn form(&self) -> Option<&R::Form> {
        self.form.as_ref()
    }

    /// Form access is only granted once the OTP has been verified
    pub fn form_mut(&mut self) -> Option<&mut R::Form> {
        if self.phase == EditPhase::EditUnlocked {
            self.form.as_mut()
        } else {
            None
        }
    }

    /// Set one form field from text input
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), EditError> {
        let phase = self.phase;
        let form = self.form_mut().ok_or(EditError::InvalidState {
            action: "edit fields",
            phase,
        })?;
        form.set_field(name, value)
            .map_err(|e: FieldError| EditError::Validation(vec![e]))
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Idle → OtpPendingEntry: check the window, snapshot the record, request one OTP
    pub async fn begin(&mut self, record: &R::Record) -> Result<OtpIssued, EditError> {
        self.prepare()?;
        self.expect_phase(EditPhase::Idle, "request an OTP")?;

        let today = self.workflow.clock.today();
        let record_date = record.record_date();
        if !is_editable(record_date, today) {
            let err = EditError::NotEditable { record_date, today };
            warn!(session = %self.id, record_id = record.id(), %record_date, "edit refused: outside window");
            self.audit("edit_refused", record.id(), json!({"record_date": record_date}));
            self.fail(&err);
            return Err(err);
        }

        self.target = Some(record.clone());
        self.otp_code.clear();
        self.form = None;
        self.phase = EditPhase::OtpRequested;

        let resource = Arc::clone(&self.workflow.resource);
        let request = OtpRequest {
            verification_type: resource.verification_type(),
            object_id: record.id(),
            category: resource.otp_category(record),
        };
        info!(
            session = %self.id,
            verification_type = %request.verification_type,
            object_id = request.object_id,
            "requesting OTP"
        );
        self.audit("otp_requested", record.id(), json!({"category": request.category}));

        let gateway = Arc::clone(&self.workflow.gateway);
        let abort = self.abort.clone();
        match guarded(&abort, gateway.request_otp(&request)).await {
            None => Err(self.aborted()),
            Some(Ok(issued)) => {
                self.phase = EditPhase::OtpPendingEntry;
                let sent = issued.message.as_deref().unwrap_or("OTP sent to admin");
                self.workflow.notifier.notify(Notice::success(format!(
                    "{} for {} #{} (expires in 10 min)",
                    sent,
                    resource.label(),
                    record.id()
                )));
                self.audit("otp_sent", record.id(), json!({}));
                Ok(issued)
            }
            Some(Err(source)) => {
                let err = EditError::api(source, REQUEST_FAILED);
                warn!(session = %self.id, error = %err, "OTP request failed");
                self.audit("otp_request_failed", record.id(), json!({"message": err.message()}));
                self.teardown();
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Set the code and verify it
    pub async fn submit_otp(&mut self, code: &str) -> Result<(), EditError> {
        self.set_otp_code(code);
        self.verify().await
    }

    /// OtpPendingEntry → EditUnlocked, prefilling the form from the snapshot
    pub async fn verify(&mut self) -> Result<(), EditError> {
        self.prepare()?;
        self.expect_phase(EditPhase::OtpPendingEntry, "verify an OTP")?;

        let otp = self.otp_code.trim().to_string();
        if otp.is_empty() {
            let err = EditError::EmptyOtp;
            self.fail(&err);
            return Err(err);
        }

        let record_id = self.target_id();
        self.phase = EditPhase::OtpVerifying;
        info!(session = %self.id, object_id = record_id, "verifying OTP");

        let verification = OtpVerification {
            verification_type: self.workflow.resource.verification_type(),
            otp,
        };

        let gateway = Arc::clone(&self.workflow.gateway);
        let abort = self.abort.clone();
        let outcome = guarded(&abort, gateway.verify_otp(&verification)).await;

        let err = match outcome {
            None => return Err(self.aborted()),
            Some(Ok(verdict)) if verdict.verified => {
                let resource = Arc::clone(&self.workflow.resource);
                let Some(form) = self.target.as_ref().map(|record| resource.prefill(record)) else {
                    self.teardown();
                    return Err(EditError::InvalidState {
                        action: "unlock the form",
                        phase: EditPhase::Idle,
                    });
                };
                self.form = Some(form);
                self.otp_code.clear();
                self.phase = EditPhase::EditUnlocked;
                self.workflow.notifier.notify(Notice::success(
                    verdict.message.unwrap_or_else(|| "OTP verified".to_string()),
                ));
                self.audit("otp_verified", record_id, json!({}));
                return Ok(());
            }
            Some(Ok(verdict)) => {
                EditError::VerificationFailed(verdict.message.unwrap_or_else(|| NOT_VERIFIED.to_string()))
            }
            Some(Err(source)) => EditError::api(source, VERIFY_FAILED),
        };

        warn!(session = %self.id, error = %err, "OTP verification failed");
        self.otp_code.clear();
        self.phase = EditPhase::OtpPendingEntry;
        self.audit("otp_rejected", record_id, json!({"message": err.message()}));
        self.fail(&err);
        Err(err)
    }

    /// EditUnlocked → Idle: validate, send one update, re-fetch the list
    pub async fn save(&mut self) -> Result<SaveOutcome<R::Record>, EditError> {
        self.prepare()?;
        self.expect_phase(EditPhase::EditUnlocked, "save")?;

        let form = match self.form.clone() {
            Some(form) => form,
            None => {
                return Err(EditError::InvalidState {
                    action: "save without a form",
                    phase: self.phase,
                })
            }
        };
        let record_id = self.target_id();

        if let Err(errors) = form.validate() {
            let err = EditError::Validation(errors);
            self.audit("validation_failed", record_id, json!({"message": err.message()}));
            self.fail(&err);
            return Err(err);
        }

        self.phase = EditPhase::Saving;
        info!(session = %self.id, object_id = record_id, "saving record");

        let resource = Arc::clone(&self.workflow.resource);
        let abort = self.abort.clone();
        match guarded(&abort, resource.update(record_id, &form)).await {
            None => Err(self.aborted()),
            Some(Err(source)) => {
                let err = EditError::api(source, UPDATE_FAILED);
                warn!(session = %self.id, error = %err, "update failed");
                self.phase = EditPhase::EditUnlocked;
                self.audit("save_failed", record_id, json!({"message": err.message()}));
                self.fail(&err);
                Err(err)
            }
            Some(Ok(())) => {
                let changes: serde_json::Map<String, serde_json::Value> = form
                    .fields()
                    .into_iter()
                    .filter(|f| f.editable)
                    .map(|f| (f.name.to_string(), json!(f.value)))
                    .collect();
                self.audit("record_updated", record_id, json!({"fields": changes}));
                self.workflow.notifier.notify(Notice::success(format!(
                    "{} updated successfully",
                    resource.label()
                )));
                info!(session = %self.id, object_id = record_id, "record updated");
                self.teardown();

                let records = match guarded(&abort, resource.list()).await {
                    None => {
                        info!(session = %self.id, object_id = record_id, "refresh aborted");
                        None
                    }
                    Some(Ok(records)) => Some(records),
                    Some(Err(e)) => {
                        warn!(error = %e, "refresh after update failed");
                        self.workflow
                            .notifier
                            .notify(Notice::error(e.user_message(REFRESH_FAILED)));
                        None
                    }
                };
                if self.abort.is_cancelled() {
                    self.abort = CancellationToken::new();
                }

                Ok(SaveOutcome { record_id, records })
            }
        }
    }

    /// Discard OTP, snapshot and form without any server call.
    ///
    /// A save in flight borrows the session mutably, so it cannot be cancelled
    /// from here; use the [`AbortHandle`] for that.
    pub fn cancel(&mut self) {
        self.settle();
        if self.phase != EditPhase::Idle {
            let record_id = self.target_id();
            info!(session = %self.id, object_id = record_id, phase = %self.phase, "edit cancelled");
            self.audit("edit_cancelled", record_id, json!({"phase": self.phase.to_string()}));
        }
        self.teardown();
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Settle leftovers of a dropped call, then honour a pending abort
    fn prepare(&mut self) -> Result<(), EditError> {
        self.settle();
        if self.abort.is_cancelled() {
            let was_active = self.phase != EditPhase::Idle;
            self.abort = CancellationToken::new();
            if was_active {
                return Err(self.aborted());
            }
        }
        Ok(())
    }

    fn settle(&mut self) {
        if self.phase.is_transient() {
            let fallback = self.phase.fallback();
            warn!(session = %self.id, from = %self.phase, to = %fallback, "settling interrupted call");
            if fallback == EditPhase::OtpPendingEntry {
                self.otp_code.clear();
            }
            if fallback == EditPhase::Idle {
                self.teardown();
            } else {
                self.phase = fallback;
            }
        }
    }

    fn expect_phase(&self, expected: EditPhase, action: &'static str) -> Result<(), EditError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(EditError::InvalidState {
                action,
                phase: self.phase,
            })
        }
    }

    fn teardown(&mut self) {
        self.phase = EditPhase::Idle;
        self.target = None;
        self.otp_code.clear();
        self.form = None;
    }

    fn aborted(&mut self) -> EditError {
        let record_id = self.target_id();
        info!(session = %self.id, object_id = record_id, phase = %self.phase, "edit aborted");
        if self.phase != EditPhase::Idle {
            self.audit("edit_aborted", record_id, json!({"phase": self.phase.to_string()}));
        }
        self.teardown();
        if self.abort.is_cancelled() {
            self.abort = CancellationToken::new();
        }
        EditError::Aborted
    }

    fn target_id(&self) -> i64 {
        self.target.as_ref().map(|r| r.id()).unwrap_or_default()
    }

    fn fail(&self, err: &EditError) {
        self.workflow.notifier.notify(Notice::error(err.message()));
    }

    fn audit(&self, event_type: &str, record_id: i64, mut data: serde_json::Value) {
        if let Some(map) = data.as_object_mut() {
            map.insert("session_id".to_string(), json!(self.id.to_string()));
        }
        let event = AuditEvent::new(
            event_type,
            self.workflow.resource.verification_type().as_str(),
            &record_id.to_string(),
            data,
            &self.workflow.actor,
        );
        if let Err(e) = self.workflow.audit.record(&event) {
            warn!(error = %e, event_type, "audit write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editable::FixedClock;
    use crate::notify::{NoticeBuffer, NoticeLevel};
    use crate::otp::{OtpVerdict, VerificationType};
    use crate::records::{IncomeEntry, IncomeForm};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(id: i64, date: NaiveDate) -> IncomeEntry {
        IncomeEntry {
            id,
            date,
            amount: 1200.0,
            description: "Room service".to_string(),
            category: "Food".to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeGateway {
        requests: AtomicUsize,
        verifications: AtomicUsize,
        fail_request: Mutex<Option<ApiError>>,
        /// Code the fake accepts
        accept: Mutex<String>,
        hang_request: std::sync::atomic::AtomicBool,
        last_request: Mutex<Option<OtpRequest>>,
    }

    impl FakeGateway {
        fn accepting(code: &str) -> Arc<Self> {
            let gateway = FakeGateway::default();
            *gateway.accept.lock().unwrap() = code.to_string();
            Arc::new(gateway)
        }
    }

    #[async_trait]
    impl OtpGateway for FakeGateway {
        async fn request_otp(&self, request: &OtpRequest) -> Result<OtpIssued, ApiError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if self.hang_request.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if let Some(err) = self.fail_request.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(OtpIssued { message: None })
        }

        async fn verify_otp(&self, verification: &OtpVerification) -> Result<OtpVerdict, ApiError> {
            self.verifications.fetch_add(1, Ordering::SeqCst);
            let accepted = *self.accept.lock().unwrap() == verification.otp;
            Ok(OtpVerdict {
                verified: accepted,
                message: if accepted { None } else { Some("Invalid OTP".to_string()) },
            })
        }
    }

    #[derive(Default)]
    struct FakeIncome {
        lists: AtomicUsize,
        updates: AtomicUsize,
        fail_update: Mutex<Option<ApiError>>,
        saved: Mutex<Vec<(i64, IncomeForm)>>,
        hang_list: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Resource for Arc<FakeIncome> {
        type Record = IncomeEntry;
        type Form = IncomeForm;

        fn verification_type(&self) -> VerificationType {
            VerificationType::SalesIncomeEdit
        }

        fn label(&self) -> &'static str {
            "Sales Income"
        }

        fn prefill(&self, record: &IncomeEntry) -> IncomeForm {
            record.to_form()
        }

        async fn list(&self) -> Result<Vec<IncomeEntry>, ApiError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if self.hang_list.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(vec![entry(1, d(2024, 6, 10))])
        }

        async fn update(&self, id: i64, form: &IncomeForm) -> Result<(), ApiError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.fail_update.lock().unwrap().clone() {
                return Err(err);
            }
            self.saved.lock().unwrap().push((id, form.clone()));
            Ok(())
        }
    }

    struct Harness {
        gateway: Arc<FakeGateway>,
        resource: Arc<FakeIncome>,
        notices: Arc<NoticeBuffer>,
        workflow: EditWorkflow<Arc<FakeIncome>>,
    }

    fn harness() -> Harness {
        let gateway = FakeGateway::accepting("123456");
        let resource = Arc::new(FakeIncome::default());
        let notices = Arc::new(NoticeBuffer::new());
        let workflow = EditWorkflow::new(Arc::clone(&resource), gateway.clone() as Arc<dyn OtpGateway>)
            .with_clock(Arc::new(FixedClock(d(2024, 6, 10))))
            .with_notifier(notices.clone())
            .with_actor("tester");
        Harness {
            gateway,
            resource,
            notices,
            workflow,
        }
    }

    fn calls(h: &Harness) -> (usize, usize, usize) {
        (
            h.gateway.requests.load(Ordering::SeqCst),
            h.gateway.verifications.load(Ordering::SeqCst),
            h.resource.updates.load(Ordering::SeqCst),
        )
    }

    // ------------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_edit_cycle() {
        let h = harness();
        let record = entry(7, d(2024, 6, 9));
        let mut session = h.workflow.session();

        session.begin(&record).await.unwrap();
        assert_eq!(session.phase(), EditPhase::OtpPendingEntry);
        assert!(session.form().is_none(), "form stays locked until verification");

        session.submit_otp(" 123456 ").await.unwrap();
        assert_eq!(session.phase(), EditPhase::EditUnlocked);
        assert_eq!(session.otp_code(), "");

        session.set_field("amount", "1500").unwrap();
        let outcome = session.save().await.unwrap();

        assert_eq!(outcome.record_id, 7);
        assert_eq!(outcome.records.unwrap().len(), 1);
        assert_eq!(session.phase(), EditPhase::Idle);
        assert!(session.target().is_none());
        assert_eq!(calls(&h), (1, 1, 1));
        assert_eq!(h.resource.lists.load(Ordering::SeqCst), 1);

        let saved = h.resource.saved.lock().unwrap();
        assert_eq!(saved[0].0, 7);
        assert_eq!(saved[0].1.amount, Some(1500.0));

        println!("✅ Full edit cycle test PASSED");
    }

    #[tokio::test]
    async fn test_non_editable_record_makes_no_calls() {
        let h = harness();
        let mut session = h.workflow.session();

        let err = session.begin(&entry(3, d(2024, 6, 7))).await.unwrap_err();

        assert!(matches!(err, EditError::NotEditable { .. }));
        assert_eq!(err.message(), "Editing allowed only for records up to 2 days old");
        assert_eq!(session.phase(), EditPhase::Idle);
        assert!(session.target().is_none());
        assert_eq!(calls(&h), (0, 0, 0));
        assert_eq!(h.notices.last().unwrap().level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_future_record_is_refused() {
        let h = harness();
        let mut session = h.workflow.session();
        assert!(session.begin(&entry(3, d(2024, 6, 11))).await.is_err());
        assert_eq!(calls(&h), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_request_failure_returns_to_idle() {
        let h = harness();
        *h.gateway.fail_request.lock().unwrap() = Some(ApiError::Rejected {
            status: 429,
            message: Some("Too many OTP requests".to_string()),
        });
        let mut session = h.workflow.session();

        let err = session.begin(&entry(1, d(2024, 6, 10))).await.unwrap_err();

        assert_eq!(err.message(), "Too many OTP requests");
        assert_eq!(session.phase(), EditPhase::Idle);
        assert!(session.target().is_none());
    }

    #[tokio::test]
    async fn test_request_transport_failure_is_generic() {
        let h = harness();
        *h.gateway.fail_request.lock().unwrap() =
            Some(ApiError::Transport("Server error 502: Bad Gateway".to_string()));
        let mut session = h.workflow.session();

        let err = session.begin(&entry(1, d(2024, 6, 10))).await.unwrap_err();
        assert_eq!(err.message(), "Failed to request OTP");
    }

    #[tokio::test]
    async fn test_empty_otp_is_refused_locally() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();

        let err = session.submit_otp("   ").await.unwrap_err();

        assert_eq!(err, EditError::EmptyOtp);
        assert_eq!(session.phase(), EditPhase::OtpPendingEntry);
        assert_eq!(calls(&h), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_unverified_response_is_failure() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();

        let err = session.submit_otp("000000").await.unwrap_err();

        assert_eq!(err, EditError::VerificationFailed("Invalid OTP".to_string()));
        assert_eq!(session.phase(), EditPhase::OtpPendingEntry);
        assert_eq!(session.otp_code(), "", "OTP field is cleared after a failure");
        assert!(session.form().is_none());

        // A second attempt with the right code still works
        session.submit_otp("123456").await.unwrap();
        assert_eq!(session.phase(), EditPhase::EditUnlocked);
        assert_eq!(calls(&h), (1, 2, 0));
    }

    #[tokio::test]
    async fn test_form_matches_snapshot() {
        let h = harness();
        let record = entry(4, d(2024, 6, 8));
        let mut session = h.workflow.session();

        session.begin(&record).await.unwrap();
        session.submit_otp("123456").await.unwrap();

        assert_eq!(session.form(), Some(&record.to_form()));
        assert_eq!(session.target(), Some(&record));
        assert_eq!(h.resource.lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_update() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        session.submit_otp("123456").await.unwrap();

        session.set_field("amount", "0").unwrap();
        let err = session.save().await.unwrap_err();
        assert!(matches!(err, EditError::Validation(_)));

        session.set_field("amount", "10").unwrap();
        session.set_field("description", "  ").unwrap();
        assert!(session.save().await.is_err());

        assert_eq!(session.phase(), EditPhase::EditUnlocked);
        assert_eq!(calls(&h).2, 0);
    }

    #[tokio::test]
    async fn test_update_failure_keeps_form() {
        let h = harness();
        *h.resource.fail_update.lock().unwrap() = Some(ApiError::Rejected {
            status: 403,
            message: Some("OTP verification required".to_string()),
        });
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        session.submit_otp("123456").await.unwrap();

        let err = session.save().await.unwrap_err();

        assert_eq!(err.message(), "OTP verification required");
        assert_eq!(session.phase(), EditPhase::EditUnlocked);
        assert!(session.form().is_some());
        assert_eq!(h.resource.lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_makes_no_calls() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        session.set_otp_code("12");

        session.cancel();

        assert_eq!(session.phase(), EditPhase::Idle);
        assert_eq!(session.otp_code(), "");
        assert!(session.target().is_none());
        assert_eq!(calls(&h), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_cancel_from_unlocked_form_makes_no_calls() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        session.submit_otp("123456").await.unwrap();
        session.set_field("amount", "999").unwrap();

        session.cancel();

        assert_eq!(session.phase(), EditPhase::Idle);
        assert!(session.form().is_none());
        assert!(session.target().is_none());
        assert_eq!(calls(&h), (1, 1, 0));
        assert_eq!(h.resource.lists.load(Ordering::SeqCst), 0);
        assert!(h.resource.saved.lock().unwrap().is_empty());

        println!("✅ Cancel from edit form test PASSED");
    }

    #[tokio::test]
    async fn test_abort_during_refresh_keeps_save() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        session.submit_otp("123456").await.unwrap();
        h.resource.hang_list.store(true, Ordering::SeqCst);

        let handle = session.abort_handle();
        let aborter = tokio::spawn(async move {
            tokio::task::yield_now().await;
            handle.abort();
        });

        let outcome = session.save().await.unwrap();
        aborter.await.unwrap();

        assert_eq!(outcome.record_id, 1);
        assert!(outcome.records.is_none());
        assert_eq!(calls(&h), (1, 1, 1));
        assert_eq!(h.resource.lists.load(Ordering::SeqCst), 1);
        assert_eq!(session.phase(), EditPhase::Idle);
        assert!(!session.abort_handle().is_aborted());
    }

    #[tokio::test]
    async fn test_sequential_sessions_each_request_once() {
        let h = harness();
        let record = entry(1, d(2024, 6, 10));

        let mut first = h.workflow.session();
        first.begin(&record).await.unwrap();
        first.cancel();

        let mut second = h.workflow.session();
        second.begin(&record).await.unwrap();
        second.submit_otp("123456").await.unwrap();
        second.save().await.unwrap();

        assert_eq!(calls(&h), (2, 1, 1));
    }

    #[tokio::test]
    async fn test_wrong_phase_is_refused() {
        let h = harness();
        let mut session = h.workflow.session();

        let err = session.save().await.unwrap_err();
        assert_eq!(
            err,
            EditError::InvalidState {
                action: "save",
                phase: EditPhase::Idle
            }
        );

        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        assert!(session.begin(&entry(1, d(2024, 6, 10))).await.is_err());
        assert!(session.set_field("amount", "5").is_err());
        assert_eq!(calls(&h), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_abort_in_flight_request() {
        let h = harness();
        h.gateway.hang_request.store(true, Ordering::SeqCst);
        let mut session = h.workflow.session();
        let handle = session.abort_handle();

        let aborter = tokio::spawn(async move {
            tokio::task::yield_now().await;
            handle.abort();
        });

        let err = session.begin(&entry(1, d(2024, 6, 10))).await.unwrap_err();
        aborter.await.unwrap();

        assert_eq!(err, EditError::Aborted);
        assert_eq!(session.phase(), EditPhase::Idle);
        assert!(session.target().is_none());

        // The session is usable again with a fresh handle
        h.gateway.hang_request.store(false, Ordering::SeqCst);
        assert!(!session.abort_handle().is_aborted());
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        assert_eq!(session.phase(), EditPhase::OtpPendingEntry);
    }

    #[tokio::test]
    async fn test_abort_between_calls_tears_down() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();

        session.abort_handle().abort();
        let err = session.submit_otp("123456").await.unwrap_err();

        assert_eq!(err, EditError::Aborted);
        assert_eq!(session.phase(), EditPhase::Idle);
        assert_eq!(calls(&h), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_dropped_request_settles_to_idle() {
        let h = harness();
        h.gateway.hang_request.store(true, Ordering::SeqCst);
        let mut session = h.workflow.session();

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            session.begin(&entry(1, d(2024, 6, 10))),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(session.phase(), EditPhase::OtpRequested);

        h.gateway.hang_request.store(false, Ordering::SeqCst);
        session.begin(&entry(1, d(2024, 6, 10))).await.unwrap();
        assert_eq!(session.phase(), EditPhase::OtpPendingEntry);
        assert_eq!(calls(&h).0, 2);
    }

    #[tokio::test]
    async fn test_request_carries_identity() {
        let h = harness();
        let mut session = h.workflow.session();
        session.begin(&entry(42, d(2024, 6, 10))).await.unwrap();

        let request = h.gateway.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.verification_type, VerificationType::SalesIncomeEdit);
        assert_eq!(request.object_id, 42);
        assert_eq!(request.category, None);

        let notice = h.notices.last().unwrap();
        assert!(notice.message.contains("#42"));
    }

    #[tokio::test]
    async fn test_audit_never_sees_otp() {
        let journal = Arc::new(crate::audit::SqliteAuditLog::open_in_memory().unwrap());
        let h = harness();
        let workflow = h.workflow.clone().with_audit(journal.clone());
        let mut session = workflow.session();

        session.begin(&entry(5, d(2024, 6, 10))).await.unwrap();
        session.submit_otp("000000").await.unwrap_err();
        session.submit_otp("123456").await.unwrap();
        session.save().await.unwrap();

        let events = journal.events_for_entity("sales_income_edit", "5").unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"otp_requested"));
        assert!(types.contains(&"otp_rejected"));
        assert!(types.contains(&"record_updated"));
        for event in &events {
            let data = event.data.to_string();
            assert!(!data.contains("123456"));
            assert!(!data.contains("000000"));
            assert_eq!(event.actor, "tester");
        }
    }
}
