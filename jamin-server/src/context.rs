use std::sync::Arc;

use axum::extract::FromRef;
use jamin_collab::{Collab, HttpStorage, PgDatabase};

/// The concrete collab system the server runs against
pub type JaminCollab = Collab<PgDatabase, HttpStorage>;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<JaminCollab>,
}
