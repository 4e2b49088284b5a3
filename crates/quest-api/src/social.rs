use axum::{
    Extension, Json,
    extract::{Query, State},
};
use axum_extra::extract::WithRejection;

use quest_types::api::{
    ActionResponse, Claims, FollowCheckQuery, FollowCheckResponse, FollowListQuery, FollowRequest,
    PageResponse,
};
use quest_types::models::FollowEntry;

use crate::AppState;
use crate::error::ApiError;

/// POST /social/follow
pub async fn follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<FollowRequest>, ApiError>,
) -> Result<Json<ActionResponse>, ApiError> {
    let graph = state.follows.clone();
    state
        .blocking(move || graph.follow(claims.sub, req.followee_id))
        .await?;
    Ok(Json(ActionResponse {
        success: true,
        message: "followed".to_string(),
    }))
}

/// POST /social/unfollow
pub async fn unfollow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<FollowRequest>, ApiError>,
) -> Result<Json<ActionResponse>, ApiError> {
    let graph = state.follows.clone();
    let removed = state
        .blocking(move || graph.unfollow(claims.sub, req.followee_id))
        .await?;
    Ok(Json(ActionResponse {
        success: true,
        message: (if removed { "unfollowed" } else { "not following" }).to_string(),
    }))
}

/// GET /social/follow/check. Whether the caller follows `followeeId`.
pub async fn check_follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Query(query), _): WithRejection<Query<FollowCheckQuery>, ApiError>,
) -> Result<Json<FollowCheckResponse>, ApiError> {
    let graph = state.follows.clone();
    let is_following = state
        .blocking(move || graph.is_following(claims.sub, query.followee_id))
        .await?;
    Ok(Json(FollowCheckResponse {
        success: true,
        is_following,
    }))
}

/// GET /social/following. Defaults to the caller when `userId` is absent.
pub async fn following(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Query(query), _): WithRejection<Query<FollowListQuery>, ApiError>,
) -> Result<Json<PageResponse<FollowEntry>>, ApiError> {
    let user_id = query.user_id.unwrap_or(claims.sub);
    let graph = state.follows.clone();
    let page = state
        .blocking(move || graph.following(user_id, query.page, query.page_size))
        .await?;
    Ok(Json(page.into()))
}

/// GET /social/followers
pub async fn followers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Query(query), _): WithRejection<Query<FollowListQuery>, ApiError>,
) -> Result<Json<PageResponse<FollowEntry>>, ApiError> {
    let user_id = query.user_id.unwrap_or(claims.sub);
    let graph = state.follows.clone();
    let page = state
        .blocking(move || graph.followers(user_id, query.page, query.page_size))
        .await?;
    Ok(Json(page.into()))
}
