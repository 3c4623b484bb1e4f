// test_support.rs - deterministic fake ledger for tests (spec §9: "ledger
// client as capability" says to accept it as an injected trait so tests
// supply a deterministic fake). Gated behind the `test-util` feature so
// unit tests inside the crate and `tests/*.rs` integration tests can both
// reach it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::NodeError;
use crate::ledger::{ApplicationInfo, GlobalStateSchema, LedgerAdapter, PendingId, SignedTransaction, SuggestedParams};

#[derive(Default)]
struct State {
    applications: HashMap<u64, ApplicationInfo>,
    balances: HashMap<String, u64>,
    sent_groups: Vec<Vec<SignedTransaction>>,
}

/// A fully in-memory stand-in for the ledger node, deterministic across runs.
pub struct FakeLedger {
    state: Mutex<State>,
    next_app_id: AtomicU64,
    next_pending_id: AtomicU64,
}

impl Default for FakeLedger {
    fn default() -> Self {
        FakeLedger {
            state: Mutex::new(State::default()),
            next_app_id: AtomicU64::new(1),
            next_pending_id: AtomicU64::new(1),
        }
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        FakeLedger::default()
    }

    /// Test setup helper: directly sets a global-state key/value pair
    /// (value is given raw; this stores it base64-encoded, matching the
    /// real ledger's wire representation).
    pub fn set_global_state_bytes(&self, app_id: u64, key: &str, raw: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let app = state.applications.entry(app_id).or_default();
        app.global_state.insert(key.to_string(), STANDARD.encode(raw));
    }

    pub fn set_global_state_uint(&self, app_id: u64, key: &str, value: u64) {
        self.set_global_state_bytes(app_id, key, value.to_string().as_bytes());
    }

    pub fn set_global_state_address(&self, app_id: u64, key: &str, address_hex: &str) {
        let bytes = hex::decode(address_hex).expect("valid hex address in test setup");
        self.set_global_state_bytes(app_id, key, &bytes);
    }

    pub fn seed_application(&self, app_id: u64, approval: Vec<u8>, clear: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let app = state.applications.entry(app_id).or_default();
        app.approval_bytes = approval;
        app.clear_bytes = clear;
    }

    pub fn set_balance(&self, address: &str, amount: u64) {
        self.state.lock().unwrap().balances.insert(address.to_string(), amount);
    }

    pub fn sent_group_count(&self) -> usize {
        self.state.lock().unwrap().sent_groups.len()
    }

    /// The app id `create_application` will assign on its next call. Lets
    /// test setup seed an application's global state before the node that
    /// creates it actually runs, simulating a contract that initialises its
    /// own state atomically with creation.
    pub fn peek_next_app_id(&self) -> u64 {
        self.next_app_id.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerAdapter for FakeLedger {
    async fn suggested_params(&self) -> Result<SuggestedParams, NodeError> {
        Ok(SuggestedParams(vec![]))
    }

    async fn send_group(&self, transactions: &[SignedTransaction]) -> Result<PendingId, NodeError> {
        let id = self.next_pending_id.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().sent_groups.push(transactions.to_vec());
        Ok(PendingId(format!("pending-{id}")))
    }

    async fn wait_confirmed(&self, _pending: &PendingId) -> Result<(), NodeError> {
        Ok(())
    }

    async fn get_application(&self, app_id: u64) -> Result<ApplicationInfo, NodeError> {
        self.state
            .lock()
            .unwrap()
            .applications
            .get(&app_id)
            .cloned()
            .ok_or_else(|| NodeError::LedgerFailure(format!("no such application {app_id}")))
    }

    async fn account_balance(&self, address: &str) -> Result<u64, NodeError> {
        Ok(self.state.lock().unwrap().balances.get(address).copied().unwrap_or(0))
    }

    async fn compile(&self, source: &str) -> Result<Vec<u8>, NodeError> {
        // Deterministic stand-in for bytecode: every caller compiling the
        // same source gets byte-identical output, which is all the §4.6
        // open-security recompile check relies on.
        Ok(source.as_bytes().to_vec())
    }

    async fn create_application(
        &self,
        approval: &[u8],
        clear: &[u8],
        _schema: GlobalStateSchema,
        _args: &[Vec<u8>],
    ) -> Result<u64, NodeError> {
        let app_id = self.next_app_id.fetch_add(1, Ordering::SeqCst);
        self.seed_application(app_id, approval.to_vec(), clear.to_vec());
        Ok(app_id)
    }

    async fn pay(&self, to: &str, amount: u64) -> Result<(), NodeError> {
        let mut state = self.state.lock().unwrap();
        *state.balances.entry(to.to_string()).or_insert(0) += amount;
        Ok(())
    }
}
