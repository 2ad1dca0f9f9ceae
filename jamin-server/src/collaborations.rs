use axum::{
    extract::{Path, State},
    routing::get,
    Json,
};
use jamin_collab::PrimaryKey;

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    serialized::{Collaboration, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/collaborations",
    tag = "collaborations",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Collaboration>, description = "Every cumulative collaboration snapshot, most recently modified first")
    )
)]
async fn list_collaborations(
    _session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<Json<Vec<Collaboration>>> {
    let snapshots = context.collab.collaborations.list().await?;

    Ok(Json(snapshots.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/collaborations/{layer_id}",
    tag = "collaborations",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Collaboration)
    )
)]
async fn collaboration(
    _session: Session,
    State(context): State<ServerContext>,
    Path(layer_id): Path<PrimaryKey>,
) -> ServerResult<Json<Collaboration>> {
    let snapshot = context.collab.collaborations.by_layer_id(layer_id).await?;

    Ok(Json(snapshot.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_collaborations))
        .route("/:layer_id", get(collaboration))
}
