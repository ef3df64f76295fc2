//! Structured validation.
//!
//! A [`Validates`] callback carries the value to check and an [`Outcome`]
//! every matching validator reports into. Validators are ordinary bindings
//! declared with `validates`; the dispatch is greedy so all of them run.
//!
//! Types deriving `Validate` register a validator automatically through
//! [`DERIVED_VALIDATORS`]. The [`Validator`] filter validates the source of
//! a binding (and optionally its output) before the binding runs and fails
//! with [`Error::Validation`] when the outcome has errors.
//!
//! ```rust,ignore
//! impl Describe for UserRules {
//!     fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
//!         handler.validates(UserRules::check)
//!     }
//! }
//!
//! impl UserRules {
//!     fn check(&self, user: &CreateUser, validation: Arc<Validates>) {
//!         if user.age < 18 {
//!             validation.add_error("Age", "must be at least 18");
//!         }
//!     }
//! }
//!
//! let outcome = validate(&handler, Payload::new(user))?.await?;
//! ```

mod outcome;
pub mod rules;

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use linkme::distributed_slice;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::binding::{Anchor, Binding, Output, Reply};
use crate::callback::{Callback, CallbackBase, CallbackRef, Resolution};
use crate::constraint::Constraint;
use crate::descriptor::{DescriptorFactory, HandlerSpec};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterProvider, Next, stage};
use crate::foundation::{Deferred, Key, Payload};
use crate::handle_context::HandleContext;
use crate::handler::{BoxHandler, dispatch};
use crate::policy::{Policy, VALIDATES};

pub use outcome::Outcome;

// ============================================================================
// Validates
// ============================================================================

/// Asks validators to check `target`.
pub struct Validates {
    target: Payload,
    outcome: Mutex<Outcome>,
    base: CallbackBase,
}

impl Validates {
    pub fn new(target: Payload) -> Self {
        Self {
            target,
            outcome: Mutex::new(Outcome::new()),
            base: CallbackBase::new(true),
        }
    }

    /// Restricts validation to validators in one of `groups`.
    pub fn in_groups(mut self, groups: Group) -> Self {
        self.base = CallbackBase::new(true).with_constraints(vec![Arc::new(groups)]);
        self
    }

    pub fn target(&self) -> &Payload {
        &self.target
    }

    pub fn add_error(&self, path: &str, message: impl Into<String>) {
        self.outcome.lock().add_error(path, message);
    }

    /// Reports into the outcome.
    pub fn report<R>(&self, f: impl FnOnce(&mut Outcome) -> R) -> R {
        f(&mut self.outcome.lock())
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome.lock().clone()
    }
}

impl Callback for Validates {
    fn key(&self) -> Key {
        Key::Type(self.target.key())
    }

    fn policy(&self) -> &'static dyn Policy {
        &VALIDATES
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn source(&self) -> Option<Payload> {
        Some(self.target.clone())
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

/// Runs every validator of `target` and returns the combined outcome.
///
/// A target nobody validates is valid.
pub fn validate(handler: &BoxHandler, target: Payload) -> Result<Resolution<Outcome>> {
    run(handler, Validates::new(target))
}

/// Like [`validate`], limited to validators of the given groups.
pub fn validate_groups(handler: &BoxHandler, target: Payload, groups: Group) -> Result<Resolution<Outcome>> {
    run(handler, Validates::new(target).in_groups(groups))
}

fn run(handler: &BoxHandler, validates: Validates) -> Result<Resolution<Outcome>> {
    let validates = Arc::new(validates);
    let callback: CallbackRef = validates.clone();
    if let Some(err) = dispatch(handler, &callback, true).into_error() {
        return Err(err);
    }
    Ok(match validates.base().results() {
        Resolution::Ready(_) => Resolution::Ready(validates.outcome()),
        Resolution::Pending(pending) => Resolution::Pending(pending.then(move |_| validates.outcome())),
    })
}

fn check(outcome: Outcome) -> Result<()> {
    if outcome.is_valid() {
        Ok(())
    } else {
        debug!(outcome = %outcome, "validation failed");
        Err(Error::Validation(outcome))
    }
}

// ============================================================================
// Groups
// ============================================================================

/// Validators that only run when one of their groups is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group(BTreeSet<String>);

/// Matches every group.
pub const ANY_GROUP: &str = "*";

impl Group {
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(groups.into_iter().map(Into::into).collect())
    }

    pub fn any() -> Self {
        Self::new([ANY_GROUP])
    }

    pub fn contains(&self, group: &str) -> bool {
        self.0.contains(group)
    }
}

impl Constraint for Group {
    fn required(&self) -> bool {
        true
    }

    fn satisfies(&self, required: Option<&dyn Constraint>, _callback: &dyn Callback) -> bool {
        let Some(required) = required.and_then(|r| r.as_any().downcast_ref::<Group>()) else {
            return false;
        };
        self.contains(ANY_GROUP)
            || required
                .0
                .iter()
                .any(|group| group == ANY_GROUP || self.contains(group))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Derived validators
// ============================================================================

/// Field rules of a type, usually generated by `#[derive(Validate)]`.
pub trait Validate: Send + Sync + 'static {
    fn validate(&self, outcome: &mut Outcome);
}

fn run_derived<T: Validate>(target: &T, validates: Arc<Validates>) {
    validates.report(|outcome| target.validate(outcome));
}

/// A validator binding running the [`Validate`] rules of `T`.
pub fn derived<T: Validate>() -> HandlerSpec {
    HandlerSpec::validates_fn(Anchor::new(), run_derived::<T>)
}

/// Validators of every type deriving `Validate`.
#[distributed_slice]
pub static DERIVED_VALIDATORS: [fn() -> HandlerSpec];

/// Registers the derived validators with `factory` and returns how many
/// were added.
pub fn register_derived(factory: &DescriptorFactory) -> Result<usize> {
    let mut added = 0;
    for spec in DERIVED_VALIDATORS.iter() {
        if factory.register_spec(spec())?.1 {
            added += 1;
        }
    }
    debug!(added, "derived validators registered");
    Ok(added)
}

// ============================================================================
// Validator filter
// ============================================================================

/// Validates a binding's input, and optionally its output, before the
/// binding result is accepted.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    output: bool,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also validates every value the binding returns.
    pub fn with_output() -> Self {
        Self { output: true }
    }
}

impl FilterProvider for Validator {
    fn applies_to(&self, callback: &dyn Callback) -> bool {
        !callback.as_any().is::<Validates>()
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        Ok(vec![Arc::new(ValidateFilter { output: self.output })])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ValidateFilter {
    output: bool,
}

impl Filter for ValidateFilter {
    fn order(&self) -> i32 {
        stage::VALIDATION
    }

    fn next(&self, next: Next, ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
        let composer = ctx.composer().clone();
        let output = self.output;
        let input = match ctx.callback().source() {
            Some(source) => validate(&composer, source)?,
            None => Resolution::Ready(Outcome::new()),
        };
        match input {
            Resolution::Ready(outcome) => {
                check(outcome)?;
                let result = next.pipe()?;
                if output { validate_output(&composer, result) } else { Ok(result) }
            }
            Resolution::Pending(pending) => Ok(Output::Pending(Deferred::from_future(async move {
                check(pending.await?)?;
                let result = next.pipe()?;
                let result = if output { validate_output(&composer, result)? } else { result };
                result.into_deferred().await
            }))),
        }
    }
}

fn validate_output(composer: &BoxHandler, output: Output) -> Result<Output> {
    match output {
        Output::Ready(reply) => {
            let checked = validate_reply(composer, reply);
            match checked.peek() {
                Some(Ok(reply)) => Ok(Output::Ready(reply)),
                Some(Err(err)) => Err(err),
                None => Ok(Output::Pending(checked)),
            }
        }
        Output::Pending(pending) => {
            let composer = composer.clone();
            Ok(Output::Pending(pending.and_then(move |reply| validate_reply(&composer, reply))))
        }
    }
}

fn validate_reply(composer: &BoxHandler, reply: Reply) -> Deferred<Reply> {
    let mut pending = Vec::new();
    for value in reply.values() {
        match validate(composer, value.clone()) {
            Ok(Resolution::Ready(outcome)) => {
                if let Err(err) = check(outcome) {
                    return Deferred::rejected(err);
                }
            }
            Ok(Resolution::Pending(outcome)) => pending.push(outcome),
            Err(err) => {
                warn!(error = %err, "output validation failed");
                return Deferred::rejected(err);
            }
        }
    }
    if pending.is_empty() {
        return Deferred::resolved(reply);
    }
    Deferred::all(pending).try_then(move |outcomes| {
        outcomes.into_iter().try_for_each(check)?;
        Ok(reply)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Describe, HandlerType};
    use crate::handler::{Handlers, Instance};
    use crate::handles::Handles;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Signup {
        name: String,
        age: u32,
    }

    struct Rules;

    impl Rules {
        fn name(&self, signup: &Signup, validation: Arc<Validates>) {
            if signup.name.is_empty() {
                validation.add_error("Name", "is required");
            }
        }

        fn age(&self, signup: &Signup, validation: Arc<Validates>) {
            if signup.age < 18 {
                validation.add_error("Age", "must be at least 18");
            }
        }

        fn strict(&self, signup: &Signup, validation: Arc<Validates>) {
            if signup.name.len() < 3 {
                validation.add_error("Name", "is too short");
            }
        }
    }

    impl Describe for Rules {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler
                .validates(Rules::name)
                .validates(Rules::age)
                .validates_with(Anchor::new().constraint(Group::new(["strict"])), Rules::strict)
        }
    }

    #[derive(Default)]
    struct Accounts {
        created: AtomicUsize,
    }

    impl Accounts {
        fn signup(&self, _: &Signup) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Describe for Accounts {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler.handles_with(Anchor::new().filter(Validator::new()), Accounts::signup)
        }
    }

    fn setup() -> (Arc<Accounts>, BoxHandler) {
        let factory = DescriptorFactory::new();
        let accounts = Arc::new(Accounts::default());
        let handler: BoxHandler = Arc::new(Handlers::new([
            Arc::new(Instance::with_factory(&factory, Arc::new(Rules)).unwrap()) as BoxHandler,
            Arc::new(Instance::with_factory(&factory, accounts.clone()).unwrap()),
        ]));
        (accounts, handler)
    }

    fn signup(name: &str, age: u32) -> Payload {
        Payload::new(Signup {
            name: name.to_string(),
            age,
        })
    }

    #[test]
    fn test_all_validators_report() {
        let (_, handler) = setup();
        let outcome = validate(&handler, signup("", 12)).unwrap().ready().unwrap();
        assert_eq!(outcome.paths(), ["Age", "Name"]);
        let outcome = validate(&handler, signup("ann", 30)).unwrap().ready().unwrap();
        assert!(outcome.is_valid());
    }

    #[test]
    fn test_grouped_validators_run_on_request() {
        let (_, handler) = setup();
        let outcome = validate(&handler, signup("al", 30)).unwrap().ready().unwrap();
        assert!(outcome.is_valid());
        let outcome = validate_groups(&handler, signup("al", 30), Group::new(["strict"]))
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(outcome.field_errors("Name"), ["is too short"]);
    }

    #[test]
    fn test_invalid_input_never_reaches_the_handler() {
        let (accounts, handler) = setup();
        let err = Arc::new(Handles::from_payload(signup("", 30)))
            .execute(&handler, false)
            .unwrap_err();
        assert_eq!(err.outcome().map(Outcome::paths), Some(vec!["Name".to_string()]));
        assert_eq!(accounts.created.load(Ordering::SeqCst), 0);

        Arc::new(Handles::from_payload(signup("ann", 30)))
            .execute(&handler, false)
            .unwrap();
        assert_eq!(accounts.created.load(Ordering::SeqCst), 1);
    }

    struct Email(String);

    impl Validate for Email {
        fn validate(&self, outcome: &mut Outcome) {
            if !rules::is_email(&self.0) {
                outcome.add_error("Email", rules::INVALID_EMAIL);
            }
        }
    }

    #[test]
    fn test_derived_specs_are_function_validators() {
        let factory = DescriptorFactory::new();
        let (descriptor, _) = factory.register_spec(derived::<Email>()).unwrap();
        let composer: BoxHandler = Arc::new(Handlers::new([]));
        let validates = Arc::new(Validates::new(Payload::new(Email("nope".into()))));
        let callback: CallbackRef = validates.clone();
        assert!(descriptor.dispatch(None, &callback, true, &composer, None).is_handled());
        assert_eq!(validates.outcome().field_errors("Email"), [rules::INVALID_EMAIL]);
    }
}
