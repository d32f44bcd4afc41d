// Library root - exports for the server binary, the admin tool and tests

pub mod background;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

pub use config::Config;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use services::{BestEffort, BillingService, LedgerService, OtpNotifier, PaymentGateway, PayrollService};
use store::{BillingStore, PayrollStore, WalletLedgerStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<LedgerService>,
    pub billing: Arc<BillingService>,
    pub payroll: Arc<PayrollService>,
    pub payroll_store: Arc<dyn PayrollStore>,
}

impl AppState {
    /// Wire the services over one store implementing every port.
    pub fn new<S>(
        config: Arc<Config>,
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn OtpNotifier>,
        tasks: BestEffort,
    ) -> Self
    where
        S: WalletLedgerStore + BillingStore + PayrollStore + Clone + 'static,
    {
        let ledger = Arc::new(LedgerService::new(Arc::new(store.clone())));
        let billing = Arc::new(BillingService::new(
            Arc::new(store.clone()),
            gateway.clone(),
            ledger.clone(),
            notifier,
            tasks,
        ));
        let payroll_store: Arc<dyn PayrollStore> = Arc::new(store);
        let payroll = Arc::new(PayrollService::new(payroll_store.clone(), gateway));

        Self {
            config,
            ledger,
            billing,
            payroll,
            payroll_store,
        }
    }
}

/// All routes with auth, CORS and request tracing applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/webhook/flutterwave", post(handlers::webhook::flutterwave_webhook))
        .route("/payroll", post(handlers::payroll::create_payroll))
        .route(
            "/payroll/:payroll_id",
            get(handlers::payroll::get_payroll).put(handlers::payroll::update_payroll),
        )
        .route("/payroll/trigger/:payroll_id", post(handlers::payroll::trigger_payment))
        .route("/billing/customer", post(handlers::billing::sync_customer))
        .route(
            "/billing/payment-methods",
            get(handlers::billing::list_payment_methods).post(handlers::billing::add_payment_method),
        )
        .route(
            "/billing/payment-methods/:id/default",
            put(handlers::billing::set_default_payment_method),
        )
        .route("/billing/initiate-charge", post(handlers::billing::initiate_charge))
        .route("/billing/charges/:id/authorize", post(handlers::billing::authorize_charge))
        .route("/billing/wallets", get(handlers::billing::list_wallets))
        .route("/billing/wallets/:currency/ledger", get(handlers::billing::wallet_ledger))
        .route("/admin/wallets/adjust", post(handlers::admin::adjust_wallet))
        .route("/admin/wallets/:wallet_id/rebuild", post(handlers::admin::rebuild_wallet))
        .route("/admin/ledger/audit", get(handlers::admin::ledger_audit))
        .route("/admin/float", post(handlers::admin::fund_float))
        .route("/admin/float/:currency", get(handlers::admin::get_float))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
