//! `POST /delete-account`: end-user initiated account deletion.
//!
//! The shared application secret plays no part here. The caller proves who they are with
//! their own identity-provider token and the gateway performs the deletion with the
//! service key.
use async_trait::async_trait;
use axum::{
    Json,
    extract::Request,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::info;

use crate::AppState;
use crate::auth::bearer_token;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::identity::IdentityClient;
use crate::pipeline::Endpoint;
use crate::settings::Settings;

pub struct DeleteAccount;

#[async_trait]
impl Endpoint for DeleteAccount {
    const NAME: &'static str = "delete_account";
    const NEEDS_UPSTREAM_KEY: bool = false;

    /// The caller's own token.
    type Params = String;
    type Outcome = ();

    fn guard(_headers: &HeaderMap, settings: &Settings) -> Result<(), GatewayError> {
        settings.require_identity().map(|_| ())
    }

    async fn normalize(req: Request) -> Result<String, GatewayError> {
        bearer_token(req.headers())
            .map(str::to_owned)
            .ok_or_else(|| {
                GatewayError::Unauthenticated("Missing or invalid authorization header.".into())
            })
    }

    async fn invoke<T>(state: &AppState<T>, user_token: String) -> Result<(), GatewayError>
    where
        T: HttpClient + Send + Sync,
    {
        let identity = state.settings.require_identity()?;
        let client = IdentityClient::new(identity, &state.http_client);

        let user_id = client.current_user(&user_token).await?;
        // The identity is only removed once its data is gone.
        client.delete_user_data(&user_id).await?;
        client.delete_user(&user_id).await?;

        info!(user_id = %user_id, "Account deleted");
        Ok(())
    }

    async fn relay(_outcome: ()) -> Result<Response, GatewayError> {
        Ok(Json(json!({ "success": true })).into_response())
    }
}
