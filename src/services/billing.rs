//! Billing: gateway customers, payment methods, charges and their settlement into
//! the user's wallet.

use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use super::flutterwave::{
    validate_charge, ChargeAuthorization, ChargeRequest, CustomerName, CustomerRequest,
    EncryptedPin, GatewayCharge, GatewayError, OtpCode, PaymentGateway, PaymentMethodDetails,
    WebhookData,
};
use super::ledger::{LedgerError, LedgerService, PostingRequest};
use super::notifications::OtpNotifier;
use super::tasks::BestEffort;
use super::WebhookOutcome;
use crate::models::{
    fits_money_scale, BillingUser, Charge, ChargeId, ChargeStatus, Currency, EntryType,
    OperationIds, PaymentMethod, PaymentMethodId, UserId, Wallet, MONEY_SCALE,
};
use crate::store::{BillingStore, StoreError};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Payment method not found")]
    PaymentMethodNotFound,
    #[error("Charge not found")]
    ChargeNotFound,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Profile fields pushed to the gateway customer. Missing fields fall back to the user record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPaymentMethod {
    #[serde(flatten)]
    pub details: PaymentMethodDetails,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeInput {
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Currency,
    /// Defaults to the user's default payment method.
    pub payment_method_id: Option<PaymentMethodId>,
    pub redirect_url: Option<String>,
    /// Client retry key. A repeated request with the same key resumes the stored charge
    /// instead of creating another one.
    pub idempotency_key: Option<String>,
}

const MAX_CLIENT_KEY_LEN: usize = 128;

/// Answer to a charge's `next_action`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorizationInput {
    /// Without a code, one is generated and emailed to the user first.
    Otp { code: Option<String> },
    Pin { nonce: String, encrypted_pin: String },
    #[serde(rename = "external_3ds")]
    External3ds,
}

pub fn generate_otp() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn split_name(name: Option<&str>) -> Option<CustomerName> {
    let name = name?.trim();
    if name.is_empty() {
        return None;
    }
    let (first, last) = name.split_once(' ').unwrap_or((name, ""));
    Some(CustomerName {
        first: first.to_string(),
        last: last.trim().to_string(),
    })
}

pub struct BillingService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<LedgerService>,
    notifier: Arc<dyn OtpNotifier>,
    tasks: BestEffort,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<LedgerService>,
        notifier: Arc<dyn OtpNotifier>,
        tasks: BestEffort,
    ) -> Self {
        Self {
            store,
            gateway,
            ledger,
            notifier,
            tasks,
        }
    }

    async fn user(&self, user_id: UserId) -> Result<BillingUser, BillingError> {
        self.store.user(user_id).await?.ok_or(BillingError::UserNotFound)
    }

    /// Create the gateway customer, or update it when one is already on file.
    pub async fn sync_customer(
        &self,
        user_id: UserId,
        profile: CustomerProfile,
    ) -> Result<BillingUser, BillingError> {
        let mut user = self.user(user_id).await?;

        let name = match (profile.first_name, profile.last_name) {
            (Some(first), last) => Some(CustomerName {
                first,
                last: last.unwrap_or_default(),
            }),
            (None, Some(last)) => Some(CustomerName {
                first: String::new(),
                last,
            }),
            (None, None) => split_name(user.name.as_deref()),
        };
        let request = CustomerRequest {
            email: user.email.clone(),
            name,
            phone_number: profile.phone_number.or_else(|| user.phone.clone()),
        };
        let ids = OperationIds::generate();

        let customer = match &user.flw_customer_id {
            Some(customer_id) => self.gateway.update_customer(customer_id, &request, &ids).await?,
            None => self.gateway.create_customer(&request, &ids).await?,
        };

        self.store.set_customer_id(user.id, &customer.id).await?;
        tracing::info!(%user_id, customer_id = %customer.id, trace_id = %ids.trace_id, "Gateway customer synced");
        user.flw_customer_id = Some(customer.id);
        Ok(user)
    }

    pub async fn add_payment_method(
        &self,
        user_id: UserId,
        input: NewPaymentMethod,
    ) -> Result<PaymentMethod, BillingError> {
        let user = self.user(user_id).await?;
        let customer_id = user
            .flw_customer_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(GatewayError::MissingCustomer)?;

        let ids = OperationIds::generate();
        let registered = self
            .gateway
            .add_payment_method(customer_id, &input.details, &ids)
            .await?;

        let method = self
            .store
            .insert_payment_method(PaymentMethod {
                id: uuid::Uuid::new_v4(),
                user_id,
                label: registered.label(),
                external_id: registered.id,
                method_type: input.details.method_type(),
                is_default: input.is_default,
                is_active: true,
                created_at: chrono::Utc::now(),
            })
            .await?;
        tracing::info!(%user_id, payment_method_id = %method.id, is_default = method.is_default, "Payment method added");
        Ok(method)
    }

    pub async fn payment_methods(&self, user_id: UserId) -> Result<Vec<PaymentMethod>, BillingError> {
        Ok(self.store.payment_methods(user_id).await?)
    }

    pub async fn set_default_payment_method(
        &self,
        user_id: UserId,
        id: PaymentMethodId,
    ) -> Result<PaymentMethod, BillingError> {
        self.store
            .set_default_payment_method(user_id, id)
            .await?
            .ok_or(BillingError::PaymentMethodNotFound)
    }

    /// Start a charge. The charge row, with its reference and idempotency key, is
    /// stored before the gateway is called.
    ///
    /// With a client `idempotency_key`, a repeat of a request whose answer was lost
    /// resends the stored charge under its original reference and gateway key.
    pub async fn initiate_charge(&self, user_id: UserId, input: ChargeInput) -> Result<Charge, BillingError> {
        if !fits_money_scale(input.amount) {
            return Err(BillingError::Validation(format!(
                "Amount cannot have more than {} decimal places",
                MONEY_SCALE
            )));
        }
        let client_key = match input.idempotency_key.as_deref().map(str::trim) {
            Some("") => None,
            Some(key) if key.len() > MAX_CLIENT_KEY_LEN => {
                return Err(BillingError::Validation(format!(
                    "Idempotency key cannot be longer than {} characters",
                    MAX_CLIENT_KEY_LEN
                )));
            }
            key => key.map(str::to_string),
        };
        let user = self.user(user_id).await?;
        validate_charge(input.amount, user.flw_customer_id.as_deref())?;
        let customer_id = user.flw_customer_id.clone().unwrap_or_default();

        let methods = self.store.payment_methods(user_id).await?;
        let method = match input.payment_method_id {
            Some(id) => methods.into_iter().find(|m| m.id == id && m.is_active),
            None => methods.into_iter().find(|m| m.is_default && m.is_active),
        }
        .ok_or(BillingError::PaymentMethodNotFound)?;

        let fresh = Charge::new(user_id, method.id, input.amount, input.currency)
            .with_client_key(client_key);
        let fresh_id = fresh.id;
        let charge = self.store.insert_charge(fresh).await?;
        if charge.id != fresh_id {
            if !charge.matches_request(method.id, input.amount, input.currency) {
                return Err(BillingError::Validation(
                    "Idempotency key was already used for a different charge".to_string(),
                ));
            }
            if charge.external_id.is_some() || charge.status != ChargeStatus::Pending {
                tracing::info!(charge_id = %charge.id, "Charge request repeated; returning stored charge");
                return Ok(charge);
            }
            tracing::info!(
                charge_id = %charge.id,
                trace_id = %charge.operation.trace_id,
                "Resending unanswered charge"
            );
        }

        let request = ChargeRequest {
            customer_id,
            payment_method_id: method.external_id,
            amount: charge.amount,
            currency: charge.currency,
            reference: charge.reference.clone(),
            redirect_url: input.redirect_url,
        };
        let response = match self.gateway.initiate_charge(&request, &charge.operation).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    charge_id = %charge.id,
                    trace_id = %charge.operation.trace_id,
                    "Charge initiation failed: {}",
                    e
                );
                return Err(e.into());
            }
        };

        self.apply_gateway_charge(charge, response).await
    }

    /// Submit the step-up answer for a pending charge.
    pub async fn authorize_charge(
        &self,
        user_id: UserId,
        charge_id: ChargeId,
        input: AuthorizationInput,
    ) -> Result<Charge, BillingError> {
        let charge = self
            .store
            .charge(charge_id)
            .await?
            .filter(|c| c.user_id == user_id)
            .ok_or(BillingError::ChargeNotFound)?;
        if charge.status != ChargeStatus::Pending {
            return Err(BillingError::Validation(format!(
                "Charge is already {}",
                charge.status.as_str()
            )));
        }
        let external_id = charge.external_id.clone().ok_or_else(|| {
            BillingError::Validation("Charge has not been accepted by the gateway".to_string())
        })?;

        let authorization = match input {
            AuthorizationInput::Otp { code: Some(code) } => ChargeAuthorization::Otp {
                otp: OtpCode { code },
            },
            AuthorizationInput::Otp { code: None } => {
                let user = self.user(user_id).await?;
                let code = generate_otp();
                let notifier = self.notifier.clone();
                let (email, sent) = (user.email, code.clone());
                self.tasks.spawn("otp_email", async move {
                    notifier.send_otp(&email, &sent).await
                });
                ChargeAuthorization::Otp {
                    otp: OtpCode { code },
                }
            }
            AuthorizationInput::Pin { nonce, encrypted_pin } => ChargeAuthorization::Pin {
                pin: EncryptedPin { nonce, encrypted_pin },
            },
            AuthorizationInput::External3ds => ChargeAuthorization::External3ds,
        };

        // Kept across retries until the gateway answers, so a resent authorization is deduplicated.
        let ids = self
            .store
            .begin_charge_authorization(charge.id, OperationIds::generate())
            .await?
            .ok_or(BillingError::ChargeNotFound)?;
        let response = match self.gateway.update_charge(&external_id, &authorization, &ids).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(%charge_id, trace_id = %ids.trace_id, "Charge authorization failed: {}", e);
                if e.is_rejection() {
                    // Refused outright; the next answer is a new request.
                    self.store
                        .record_charge_response(charge.id, None, charge.status, charge.next_action.as_ref())
                        .await?;
                }
                return Err(e.into());
            }
        };

        self.apply_gateway_charge(charge, response).await
    }

    async fn apply_gateway_charge(&self, charge: Charge, response: GatewayCharge) -> Result<Charge, BillingError> {
        let status = response.charge_status();
        let updated = self
            .store
            .record_charge_response(charge.id, Some(&response.id), status, response.next_action.as_ref())
            .await?
            .ok_or(BillingError::ChargeNotFound)?;
        tracing::info!(
            charge_id = %updated.id,
            external_id = %response.id,
            status = status.as_str(),
            next_action = updated.next_action.is_some(),
            "Charge updated from gateway"
        );

        if status == ChargeStatus::Succeeded {
            self.settle(&updated).await?;
            return self.store.charge(updated.id).await?.ok_or(BillingError::ChargeNotFound);
        }
        Ok(updated)
    }

    /// Credit the wallet for a successful charge and mark it settled.
    ///
    /// The credit is keyed by the gateway charge id, so settling twice posts once.
    async fn settle(&self, charge: &Charge) -> Result<Wallet, BillingError> {
        let external_id = charge
            .external_id
            .clone()
            .unwrap_or_else(|| charge.reference.clone());
        let wallet = self
            .ledger
            .credit_available(
                PostingRequest::new(
                    charge.user_id,
                    charge.currency,
                    charge.amount,
                    EntryType::Charge,
                    charge.reference.clone(),
                )
                .external_id(external_id)
                .description("Card charge settlement")
                .metadata(serde_json::json!({ "charge_id": charge.id })),
            )
            .await?;

        if self.store.mark_charge_settled(charge.id).await? {
            tracing::info!(charge_id = %charge.id, wallet_id = %wallet.id, "Charge settled into wallet");
        }
        Ok(wallet)
    }

    /// Apply a `charge.completed` event.
    pub async fn handle_charge_event(&self, data: &WebhookData) -> Result<WebhookOutcome, BillingError> {
        let mut charge = None;
        if let Some(id) = data.id.as_deref() {
            charge = self.store.charge_by_external_id(id).await?;
        }
        if charge.is_none() {
            if let Some(reference) = data.reference.as_deref() {
                charge = self.store.charge_by_reference(reference).await?;
            }
        }
        let Some(charge) = charge else {
            tracing::warn!(external_id = ?data.id, reference = ?data.reference, "Charge event for unknown charge");
            return Ok(WebhookOutcome::Ignored("unknown charge".to_string()));
        };

        if charge.settled_at.is_some() {
            return Ok(WebhookOutcome::AlreadyProcessed);
        }
        let status = ChargeStatus::from_gateway(data.status.as_deref().unwrap_or_default());
        let charge = if charge.status != status || charge.external_id.is_none() {
            self.store
                .record_charge_response(charge.id, data.id.as_deref(), status, None)
                .await?
                .ok_or(BillingError::ChargeNotFound)?
        } else {
            charge
        };

        match status {
            ChargeStatus::Succeeded => {
                self.settle(&charge).await?;
                Ok(WebhookOutcome::Applied("Charge settled".to_string()))
            }
            ChargeStatus::Failed => {
                tracing::info!(charge_id = %charge.id, "Charge failed at gateway");
                Ok(WebhookOutcome::Applied("Charge failed".to_string()))
            }
            ChargeStatus::Pending => Ok(WebhookOutcome::Ignored("charge still pending".to_string())),
        }
    }
}
