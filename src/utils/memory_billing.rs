//! In-memory billing system for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone)]
enum InjectedFailure {
    Refused(String),
    Unreachable(String),
}

/// In-memory billing system with failure injection
///
/// Applied payments update the stored invoice the way a billing system would
/// (partially paid, then paid) and are kept in an audit log.
#[derive(Debug, Clone, Default)]
pub struct MemoryBilling {
    invoices: Arc<RwLock<BTreeMap<u64, Invoice>>>,
    payments: Arc<RwLock<Vec<ApplyPaymentRequest>>>,
    failures: Arc<RwLock<VecDeque<InjectedFailure>>>,
    list_calls: Arc<AtomicUsize>,
}

impl MemoryBilling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an invoice
    pub fn add_invoice(&self, invoice: Invoice) -> ReconResult<()> {
        self.invoices
            .write()
            .map_err(|_| poisoned())?
            .insert(invoice.id, invoice);
        Ok(())
    }

    /// Get the current state of an invoice
    pub fn invoice(&self, invoice_id: u64) -> ReconResult<Option<Invoice>> {
        Ok(self
            .invoices
            .read()
            .map_err(|_| poisoned())?
            .get(&invoice_id)
            .cloned())
    }

    /// Make the next apply call return a business-level refusal
    pub fn fail_next_apply(&self, reason: impl Into<String>) -> ReconResult<()> {
        self.failures
            .write()
            .map_err(|_| poisoned())?
            .push_back(InjectedFailure::Refused(reason.into()));
        Ok(())
    }

    /// Make the next apply call fail at the transport level
    pub fn fail_next_apply_unreachable(&self, message: impl Into<String>) -> ReconResult<()> {
        self.failures
            .write()
            .map_err(|_| poisoned())?
            .push_back(InjectedFailure::Unreachable(message.into()));
        Ok(())
    }

    /// Payments successfully applied so far
    pub fn applied_payments(&self) -> ReconResult<Vec<ApplyPaymentRequest>> {
        Ok(self.payments.read().map_err(|_| poisoned())?.clone())
    }

    /// Number of invoice list queries served
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

fn poisoned() -> ReconError {
    ReconError::Billing("billing state lock poisoned".to_string())
}

#[async_trait]
impl BillingSystem for MemoryBilling {
    async fn list_unpaid_invoices(
        &self,
        tenant_id: &str,
        currency: &str,
    ) -> ReconResult<Vec<Invoice>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let invoices = self.invoices.read().map_err(|_| poisoned())?;
        Ok(invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .filter(|i| i.currency.eq_ignore_ascii_case(currency))
            .filter(|i| i.status.is_payable())
            .cloned()
            .collect())
    }

    async fn apply_payment(
        &self,
        request: &ApplyPaymentRequest,
    ) -> ReconResult<ApplyPaymentResult> {
        if let Some(failure) = self.failures.write().map_err(|_| poisoned())?.pop_front() {
            return match failure {
                InjectedFailure::Refused(reason) => Ok(ApplyPaymentResult::Failed { reason }),
                InjectedFailure::Unreachable(message) => Err(ReconError::Billing(message)),
            };
        }

        let mut invoices = self.invoices.write().map_err(|_| poisoned())?;
        let invoice = match invoices.get_mut(&request.invoice_id) {
            Some(invoice) if invoice.tenant_id == request.tenant_id => invoice,
            _ => {
                return Ok(ApplyPaymentResult::Failed {
                    reason: format!("invoice {} not found", request.invoice_id),
                })
            }
        };

        if !invoice.status.is_payable() {
            return Ok(ApplyPaymentResult::Failed {
                reason: format!("invoice {} is not payable", invoice.id),
            });
        }
        if !invoice.currency.eq_ignore_ascii_case(&request.currency) {
            return Ok(ApplyPaymentResult::Failed {
                reason: format!(
                    "currency {} does not match invoice currency {}",
                    request.currency, invoice.currency
                ),
            });
        }

        invoice.amount_paid += request.amount;
        invoice.status = if invoice.amount_paid >= invoice.total_amount {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };

        self.payments
            .write()
            .map_err(|_| poisoned())?
            .push(request.clone());
        Ok(ApplyPaymentResult::Applied)
    }
}
