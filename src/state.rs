use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    events::EventHub,
    services::scb::ScbClient,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: AppConfig,
    pub gateway: ScbClient,
    pub events: EventHub,
}
