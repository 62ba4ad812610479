//! Action routing and dispatch
//!
//! A static table maps flattened `"category/resource/verb"` paths to handler
//! descriptors, each declaring its authentication and permission
//! preconditions. The table is built once at startup and never mutated.
//! Handlers are external collaborators: the router guarantees delivery and
//! correlation, not business correctness, and every failure mode short of a
//! transport fault becomes a structured reply rather than an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use wavelink_core::frame::error_code;
use wavelink_core::{Frame, Value};

// ----------------------------------------------------------------------------
// Authenticated Identity
// ----------------------------------------------------------------------------

/// Identity bound to a connection after a successful authentication action
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedIdentity {
    /// Stable identity key used by the session registry
    pub id: String,
    /// Cached permission flags checked by permission-gated routes
    pub permissions: HashSet<String>,
    /// Cached profile fields, opaque to the core
    pub profile: Value,
}

impl AuthenticatedIdentity {
    pub fn new<I: Into<String>>(id: I) -> Self {
        Self {
            id: id.into(),
            permissions: HashSet::new(),
            profile: Value::Null,
        }
    }

    pub fn with_permission<P: Into<String>>(mut self, permission: P) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

// ----------------------------------------------------------------------------
// Handler Contract
// ----------------------------------------------------------------------------

/// Domain error surfaced verbatim as a structured reply
#[derive(Debug, Clone, PartialEq)]
pub struct DomainError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl DomainError {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// Connection-level state change requested by a handler
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    /// Bind this identity to the connection (successful authentication)
    Login(AuthenticatedIdentity),
    /// Release the connection's identity binding (explicit logout)
    Logout,
}

/// Successful handler outcome: the reply value plus an optional session
/// change for the connection to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub value: Value,
    pub session_change: Option<SessionChange>,
}

impl ActionOutcome {
    /// Plain reply with no session change
    pub fn reply(value: Value) -> Self {
        Self {
            value,
            session_change: None,
        }
    }

    /// Reply that also binds an authenticated identity to the connection
    pub fn login(identity: AuthenticatedIdentity, value: Value) -> Self {
        Self {
            value,
            session_change: Some(SessionChange::Login(identity)),
        }
    }

    /// Reply that also releases the connection's identity binding
    pub fn logout(value: Value) -> Self {
        Self {
            value,
            session_change: Some(SessionChange::Logout),
        }
    }
}

pub type HandlerResult = core::result::Result<ActionOutcome, DomainError>;

/// External collaborator invoked for a routed action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, identity: Option<AuthenticatedIdentity>, payload: Value)
        -> HandlerResult;
}

/// Adapter so plain async closures can serve as handlers
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Option<AuthenticatedIdentity>, Value) -> Fut + Send + Sync,
    Fut: core::future::Future<Output = HandlerResult> + Send,
{
    async fn handle(
        &self,
        identity: Option<AuthenticatedIdentity>,
        payload: Value,
    ) -> HandlerResult {
        (self.0)(identity, payload).await
    }
}

// ----------------------------------------------------------------------------
// Route Table
// ----------------------------------------------------------------------------

struct RouteEntry {
    handler: Arc<dyn ActionHandler>,
    requires_auth: bool,
    required_permission: Option<String>,
}

/// Builder for the immutable route table, populated once at process start
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<String, RouteEntry>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open route (no authentication required)
    pub fn route<P, H>(mut self, path: P, handler: H) -> Self
    where
        P: Into<String>,
        H: ActionHandler + 'static,
    {
        self.routes.insert(
            path.into(),
            RouteEntry {
                handler: Arc::new(handler),
                requires_auth: false,
                required_permission: None,
            },
        );
        self
    }

    /// Register a route requiring an authenticated identity
    pub fn route_authed<P, H>(mut self, path: P, handler: H) -> Self
    where
        P: Into<String>,
        H: ActionHandler + 'static,
    {
        self.routes.insert(
            path.into(),
            RouteEntry {
                handler: Arc::new(handler),
                requires_auth: true,
                required_permission: None,
            },
        );
        self
    }

    /// Register a route requiring a named permission flag
    pub fn route_with_permission<P, Q, H>(mut self, path: P, permission: Q, handler: H) -> Self
    where
        P: Into<String>,
        Q: Into<String>,
        H: ActionHandler + 'static,
    {
        self.routes.insert(
            path.into(),
            RouteEntry {
                handler: Arc::new(handler),
                requires_auth: true,
                required_permission: Some(permission.into()),
            },
        );
        self
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------------

/// Result of dispatching one inbound frame
pub struct Dispatch {
    /// Reply frame, tagged with the inbound correlation id
    pub reply: Frame,
    /// Session change for the connection to apply, if any
    pub session_change: Option<SessionChange>,
}

/// Immutable action router
pub struct Router {
    routes: HashMap<String, RouteEntry>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch one decrypted inbound action frame.
    ///
    /// Unknown paths and failed preconditions produce structured error
    /// replies without invoking the handler; handler domain errors pass
    /// through verbatim. The connection always stays alive.
    pub async fn dispatch(
        &self,
        identity: Option<&AuthenticatedIdentity>,
        frame: &Frame,
    ) -> Dispatch {
        let Some(path) = frame.route_key() else {
            return Dispatch {
                reply: Frame::error_reply_to(frame, error_code::NO_SUCH_ACTION, "missing action"),
                session_change: None,
            };
        };

        let Some(entry) = self.routes.get(&path) else {
            tracing::debug!(%path, "no such action");
            return Dispatch {
                reply: Frame::error_reply_to(
                    frame,
                    error_code::NO_SUCH_ACTION,
                    format!("no handler for {path}"),
                ),
                session_change: None,
            };
        };

        if entry.requires_auth && identity.is_none() {
            return Dispatch {
                reply: Frame::error_reply_to(
                    frame,
                    error_code::NOT_AUTHENTICATED,
                    "action requires authentication",
                ),
                session_change: None,
            };
        }

        if let Some(permission) = &entry.required_permission {
            let allowed = identity
                .map(|ident| ident.has_permission(permission))
                .unwrap_or(false);
            if !allowed {
                return Dispatch {
                    reply: Frame::error_reply_to(
                        frame,
                        error_code::FORBIDDEN,
                        format!("missing permission: {permission}"),
                    ),
                    session_change: None,
                };
            }
        }

        let payload = frame.payload.clone().unwrap_or(Value::Null);
        match entry.handler.handle(identity.cloned(), payload).await {
            Ok(outcome) => Dispatch {
                reply: Frame::reply_to(frame, outcome.value),
                session_change: outcome.session_change,
            },
            Err(domain) => {
                let mut reply = Frame::error_reply_to(frame, domain.code, domain.message);
                if let Some(error) = reply.error.as_mut() {
                    error.details = domain.details;
                }
                Dispatch {
                    reply,
                    session_change: None,
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(category: &str, action: &str) -> Frame {
        let mut frame = Frame::action(category, action, Some(Value::Null));
        frame.correlation_id = Some("t-0001".into());
        frame
    }

    fn test_router() -> Router {
        Router::builder()
            .route(
                "social/posts/load",
                FnHandler(|_identity, _payload| async {
                    Ok(ActionOutcome::reply(Value::from("posts")))
                }),
            )
            .route_authed(
                "messenger/dialogs/list",
                FnHandler(|identity: Option<AuthenticatedIdentity>, _payload| async move {
                    let who = identity.map(|i| i.id).unwrap_or_default();
                    Ok(ActionOutcome::reply(Value::from(who)))
                }),
            )
            .route_with_permission(
                "social/moderation/ban",
                "moderate",
                FnHandler(|_identity, _payload| async {
                    Ok(ActionOutcome::reply(Value::Bool(true)))
                }),
            )
            .route(
                "auth/session/login",
                FnHandler(|_identity, payload: Value| async move {
                    let name = payload
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("anonymous")
                        .to_string();
                    let identity = AuthenticatedIdentity::new(name.clone());
                    Ok(ActionOutcome::login(identity, Value::from(name)))
                }),
            )
            .route(
                "social/gifts/send",
                FnHandler(|_identity, _payload| async {
                    Err(DomainError::new("insufficient_funds", "not enough currency"))
                }),
            )
            .build()
    }

    #[tokio::test]
    async fn test_dispatch_known_route() {
        let router = test_router();
        let frame = inbound("social", "posts/load");
        let dispatch = router.dispatch(None, &frame).await;

        assert_eq!(dispatch.reply.correlation_id.as_deref(), Some("t-0001"));
        assert_eq!(dispatch.reply.payload, Some(Value::from("posts")));
        assert!(dispatch.reply.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_structured_reply() {
        let router = test_router();
        let frame = inbound("social", "posts/destroy_all");
        let dispatch = router.dispatch(None, &frame).await;

        let error = dispatch.reply.error.expect("expected error reply");
        assert_eq!(error.code, error_code::NO_SUCH_ACTION);
        assert_eq!(dispatch.reply.correlation_id.as_deref(), Some("t-0001"));
    }

    #[tokio::test]
    async fn test_auth_precondition() {
        let router = test_router();
        let frame = inbound("messenger", "dialogs/list");

        let denied = router.dispatch(None, &frame).await;
        assert_eq!(
            denied.reply.error.unwrap().code,
            error_code::NOT_AUTHENTICATED
        );

        let identity = AuthenticatedIdentity::new("alice");
        let allowed = router.dispatch(Some(&identity), &frame).await;
        assert_eq!(allowed.reply.payload, Some(Value::from("alice")));
    }

    #[tokio::test]
    async fn test_permission_precondition() {
        let router = test_router();
        let frame = inbound("social", "moderation/ban");

        let plain = AuthenticatedIdentity::new("bob");
        let denied = router.dispatch(Some(&plain), &frame).await;
        assert_eq!(denied.reply.error.unwrap().code, error_code::FORBIDDEN);

        let moderator = AuthenticatedIdentity::new("carol").with_permission("moderate");
        let allowed = router.dispatch(Some(&moderator), &frame).await;
        assert_eq!(allowed.reply.payload, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_login_outcome_produces_session_change() {
        let router = test_router();
        let mut frame = inbound("auth", "session/login");
        frame.payload = Some(Value::map([("name", Value::from("dave"))]));

        let dispatch = router.dispatch(None, &frame).await;
        match dispatch.session_change {
            Some(SessionChange::Login(identity)) => assert_eq!(identity.id, "dave"),
            other => panic!("expected login change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_domain_error_passes_through_verbatim() {
        let router = test_router();
        let frame = inbound("social", "gifts/send");
        let dispatch = router.dispatch(None, &frame).await;

        let error = dispatch.reply.error.unwrap();
        assert_eq!(error.code, "insufficient_funds");
        assert_eq!(error.message, "not enough currency");
    }
}
