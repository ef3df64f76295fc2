//! Authorization: access checks on the actions a subject performs.
//!
//! An [`Authorizes`] callback asks every authorizer of the action type
//! whether the [`Subject`] may perform it. Authorizers are `authorizes`
//! bindings returning `bool`; access is granted only when at least one
//! authorizer answered and none refused.
//!
//! Bindings opt into checks with `Anchor::policy("name")`, which installs
//! the [`Authorizer`] filter. Only authorizers registered under that name
//! (`Anchor::named("name")`) are asked.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::binding::{Binding, Output};
use crate::callback::{Callback, CallbackBase, CallbackRef, Resolution};
use crate::constraint::{Constraint, Named};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterProvider, Next, stage};
use crate::foundation::{Deferred, Key, Payload};
use crate::handle_context::HandleContext;
use crate::handler::{BoxHandler, Provider, WithHandler, dispatch};
use crate::handles::Handles;
use crate::options::{Merge, get_options};
use crate::policy::{AUTHORIZES, Policy};
use crate::provides::Provides;

// ============================================================================
// Subject
// ============================================================================

/// An identity held by a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// Internal callers that bypass every check.
    System,
    User(String),
    Role(String),
    Group(String),
}

/// Whoever requests access: a user, a service or the system itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    principals: Vec<Principal>,
}

impl Subject {
    pub fn new(principals: impl IntoIterator<Item = Principal>) -> Self {
        Self {
            principals: principals.into_iter().collect(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn system() -> Self {
        Self::new([Principal::System])
    }

    pub fn principals(&self) -> &[Principal] {
        &self.principals
    }

    pub fn is_system(&self) -> bool {
        self.principals.contains(&Principal::System)
    }

    pub fn has_all<'a>(&self, principals: impl IntoIterator<Item = &'a Principal>) -> bool {
        principals.into_iter().all(|p| self.principals.contains(p))
    }

    pub fn has_any<'a>(&self, principals: impl IntoIterator<Item = &'a Principal>) -> bool {
        principals.into_iter().any(|p| self.principals.contains(p))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.principals
            .iter()
            .any(|p| matches!(p, Principal::Role(r) if r == role))
    }
}

// ============================================================================
// Authorizes
// ============================================================================

/// Asks authorizers whether `subject` may perform `action`.
pub struct Authorizes {
    action: Payload,
    subject: Subject,
    base: CallbackBase,
}

impl Authorizes {
    pub fn new(action: Payload, subject: Subject) -> Self {
        Self {
            action,
            subject,
            base: CallbackBase::new(true),
        }
    }

    /// Only asks authorizers registered under `policy`.
    pub fn with_policy(mut self, policy: &str) -> Self {
        let constraint: Arc<dyn Constraint> = Arc::new(Named::new(policy));
        self.base = CallbackBase::new(true).with_constraints(vec![constraint]);
        self
    }

    pub fn action(&self) -> &Payload {
        &self.action
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// True when some authorizer answered and every answer granted access.
    fn granted(values: &[Payload]) -> bool {
        !values.is_empty() && values.iter().all(|v| v.downcast_ref::<bool>() == Some(&true))
    }
}

impl Callback for Authorizes {
    fn key(&self) -> Key {
        Key::Type(self.action.key())
    }

    fn policy(&self) -> &'static dyn Policy {
        &AUTHORIZES
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn source(&self) -> Option<Payload> {
        Some(self.action.clone())
    }

    fn can_batch(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Options of the authorization process.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationOptions {
    /// Denies actions no authorizer answers for.
    pub require_policy: Option<bool>,
}

impl Merge for AuthorizationOptions {
    fn merge(&mut self, other: &Self) {
        if self.require_policy.is_none() {
            self.require_policy = other.require_policy;
        }
    }
}

/// Checks whether `subject` may perform `action`.
pub fn authorize(handler: &BoxHandler, action: Payload, subject: &Subject) -> Result<Resolution<bool>> {
    check(handler, Authorizes::new(action, subject.clone()))
}

/// Checks `action` against the authorizers of `policy`.
pub fn authorize_policy(
    handler: &BoxHandler,
    action: Payload,
    subject: &Subject,
    policy: &str,
) -> Result<Resolution<bool>> {
    check(handler, Authorizes::new(action, subject.clone()).with_policy(policy))
}

fn check(handler: &BoxHandler, authorizes: Authorizes) -> Result<Resolution<bool>> {
    let require_policy = get_options::<AuthorizationOptions>(handler)
        .and_then(|o| o.require_policy)
        .unwrap_or(false);
    let handler: BoxHandler = Arc::new(WithHandler::new(
        handler.clone(),
        Arc::new(Provider::new(authorizes.subject.clone())),
    ));
    let authorizes = Arc::new(authorizes);
    let callback: CallbackRef = authorizes.clone();
    let result = dispatch(&handler, &callback, true);
    let handled = result.is_handled();
    if let Some(err) = result.into_error() {
        return Err(err);
    }
    if !handled {
        return Ok(Resolution::Ready(!require_policy));
    }
    Ok(authorizes
        .base()
        .results()
        .map(|values: Vec<Payload>| Authorizes::granted(&values)))
}

// ============================================================================
// Authorizer filter
// ============================================================================

/// Guards a `handles` binding with an authorization check.
///
/// The subject is resolved through the composer; a dispatch without one
/// is anonymous. The system subject is always allowed.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    policy: Option<String>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(name: impl Into<String>) -> Self {
        Self {
            policy: Some(name.into()),
        }
    }
}

impl FilterProvider for Authorizer {
    fn required(&self) -> bool {
        true
    }

    fn applies_to(&self, callback: &dyn Callback) -> bool {
        callback.as_any().is::<Handles>()
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        Ok(vec![Arc::new(AuthorizeFilter {
            policy: self.policy.clone(),
        })])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AuthorizeFilter {
    policy: Option<String>,
}

impl AuthorizeFilter {
    fn subject(composer: &BoxHandler) -> Result<Subject> {
        let subject = Arc::new(Provides::of::<Subject>().build())
            .resolve(composer)?
            .ready()
            .flatten()
            .and_then(|p| p.downcast_ref::<Subject>().cloned());
        Ok(subject.unwrap_or_default())
    }
}

impl Filter for AuthorizeFilter {
    fn order(&self) -> i32 {
        stage::AUTHORIZATION
    }

    fn next(&self, next: Next, ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
        let Some(action) = ctx.callback().source() else {
            return next.pipe();
        };
        let composer = ctx.composer();
        let subject = Self::subject(composer)?;
        if subject.is_system() {
            return next.pipe();
        }
        let denied = Denied(ctx.callback().describe());
        let grant = match &self.policy {
            Some(policy) => authorize_policy(composer, action, &subject, policy)?,
            None => authorize(composer, action, &subject)?,
        };
        match grant {
            Resolution::Ready(true) => next.pipe(),
            Resolution::Ready(false) => Err(denied.into()),
            Resolution::Pending(pending) => Ok(Output::Pending(Deferred::from_future(async move {
                if !pending.await? {
                    return Err(denied.into());
                }
                next.pipe()?.into_deferred().await
            }))),
        }
    }
}

struct Denied(String);

impl From<Denied> for Error {
    fn from(denied: Denied) -> Self {
        debug!(action = %denied, "access denied");
        Error::access_denied(denied)
    }
}

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
