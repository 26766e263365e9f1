use async_graphql::{Context, Object, SimpleObject};

use crate::auth::Principal;
use crate::context::{Caller, IssuedSessionToken};

/// The resolved caller, as the gateway sees it.
#[derive(SimpleObject, Clone, Debug)]
pub struct Viewer {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub auth_scheme: String,
    pub anonymous: bool,
    /// Bearer token minted by a wallet login during the WebSocket handshake.
    /// HTTP callers get it in `X-Access-Token` instead.
    pub session_token: Option<String>,
}

impl From<&Principal> for Viewer {
    fn from(p: &Principal) -> Self {
        Self {
            tenant_id: p.tenant_id().to_string(),
            user_id: p.user_id().map(str::to_string),
            email: p.email().map(str::to_string),
            role: p.role().map(str::to_string),
            permissions: p.permissions().map(<[String]>::to_vec),
            auth_scheme: p.scheme().as_str().to_string(),
            anonymous: p.is_anonymous(),
            session_token: None,
        }
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn health(&self) -> &'static str {
        "ok"
    }

    /// Principal attached to this request or connection.
    async fn viewer(&self, ctx: &Context<'_>) -> Viewer {
        let mut viewer = match ctx.data_opt::<Caller>() {
            Some(Caller(principal)) => Viewer::from(principal.as_ref()),
            None => Viewer::from(&Principal::anonymous()),
        };
        viewer.session_token = ctx
            .data_opt::<IssuedSessionToken>()
            .map(|IssuedSessionToken(token)| token.clone());
        viewer
    }
}
