use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn, create_orm_conn},
    services::checkout_service::CheckoutService,
    store::SqlStore,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub store: Arc<SqlStore>,
    pub checkout: Arc<CheckoutService<SqlStore>>,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig) -> Self {
        let orm = create_orm_conn(&pool);
        let store = Arc::new(SqlStore::new(orm.clone()));
        let checkout = Arc::new(CheckoutService::new(store.clone(), config.checkout.clone()));
        Self {
            pool,
            orm,
            config: Arc::new(config),
            store,
            checkout,
        }
    }
}
