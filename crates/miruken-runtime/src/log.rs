//! Logging filter for handled messages.
//!
//! [`LogProvider`] wraps every binding reached by a [`Handles`] callback
//! with a [`stage::LOGGING`] filter that records the message, the outcome
//! and the elapsed time. Verbosity maps onto tracing levels:
//!
//! | verbosity | level   |
//! |-----------|---------|
//! | 0         | `INFO`  |
//! | 1         | `DEBUG` |
//! | 2+        | `TRACE` |
//!
//! A binding declared with [`Anchor::log`](miruken_core::Anchor::log), or
//! tagged `log = "verbosity=N"`, overrides the provider's verbosity.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use miruken_core::binding::{Binding, Output};
use miruken_core::filter::stage;
use miruken_core::{
    BoxHandler, Callback, Deferred, Filter, FilterProvider, HandleContext, Handles, Next, Result,
};
use tracing::{debug, info, trace};

use crate::error::RuntimeResult;
use crate::setup::{Feature, Setup};

macro_rules! log_at {
    ($verbosity:expr, $($arg:tt)+) => {
        match $verbosity {
            0 => info!($($arg)+),
            1 => debug!($($arg)+),
            _ => trace!($($arg)+),
        }
    };
}

/// Provides a [`LogFilter`] for every handled message.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProvider {
    verbosity: u8,
}

impl LogProvider {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    fn verbosity_for(&self, binding: &Binding) -> u8 {
        binding
            .tag("log")
            .map(|tag| tag.trim_start_matches("verbosity="))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.verbosity)
    }
}

impl FilterProvider for LogProvider {
    fn applies_to(&self, callback: &dyn Callback) -> bool {
        callback.as_any().is::<Handles>()
    }

    fn filters(
        &self,
        binding: &Binding,
        _callback: &dyn Callback,
        _composer: &BoxHandler,
    ) -> Result<Vec<Arc<dyn Filter>>> {
        Ok(vec![Arc::new(LogFilter {
            verbosity: self.verbosity_for(binding),
        })])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Logs a binding call and how it ended.
#[derive(Debug, Clone, Copy)]
pub struct LogFilter {
    verbosity: u8,
}

impl Filter for LogFilter {
    fn order(&self) -> i32 {
        stage::LOGGING
    }

    fn next(&self, next: Next, ctx: &HandleContext, _provider: &Arc<dyn FilterProvider>) -> Result<Output> {
        let verbosity = self.verbosity;
        let callback = ctx.callback().describe();
        let binding = ctx.binding().to_string();
        log_at!(verbosity, callback = %callback, binding = %binding, "handling");

        let started = Instant::now();
        match next.pipe() {
            Ok(Output::Ready(reply)) => {
                log_at!(verbosity, callback = %callback, elapsed = ?started.elapsed(), "completed");
                Ok(Output::Ready(reply))
            }
            Ok(Output::Pending(pending)) => Ok(Output::Pending(Deferred::from_future(async move {
                let result = pending.await;
                match &result {
                    Ok(_) => log_at!(verbosity, callback = %callback, elapsed = ?started.elapsed(), "completed"),
                    Err(err) => log_at!(verbosity, callback = %callback, error = %err, "failed"),
                }
                result
            }))),
            Err(err) => {
                log_at!(verbosity, callback = %callback, error = %err, "failed");
                Err(err)
            }
        }
    }
}

/// Installs a [`LogProvider`] on every handler the setup builds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFeature {
    verbosity: u8,
}

impl LogFeature {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }
}

impl Feature for LogFeature {
    fn name(&self) -> &str {
        "log"
    }

    fn install(&self, setup: &mut Setup) -> RuntimeResult<()> {
        if setup.can_install::<LogFeature>() {
            setup.filters([Arc::new(LogProvider::new(self.verbosity)) as Arc<dyn FilterProvider>]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miruken_core::prelude::*;
    use miruken_core::{DescriptorFactory, Error as CoreError, Provides};
    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
    use tracing_subscriber::Layer;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<(Level, String)>>>);

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().push((*event.metadata().level(), visitor.0));
        }
    }

    struct Transfer(u32);
    struct Refund(u32);
    struct Audit;

    #[derive(Default)]
    struct Ledger;

    impl Ledger {
        fn transfer(&self, transfer: &Transfer) -> String {
            format!("moved {}", transfer.0)
        }

        fn refund(&self, _refund: &Refund) -> miruken_core::Result<String> {
            Err(CoreError::custom("refunds are closed"))
        }

        fn audit(&self, _audit: &Audit) {}
    }

    impl Describe for Ledger {
        fn describe(handler: HandlerType<Self>) -> HandlerType<Self> {
            handler
                .default_constructor()
                .handles(Ledger::transfer)
                .handles_with(Anchor::new().log(2), Ledger::refund)
                .handles_with(Anchor::new().tag("log", "verbosity=1"), Ledger::audit)
        }
    }

    fn ledger(verbosity: u8) -> BoxHandler {
        Instance::with_factory(&DescriptorFactory::new(), Arc::new(Ledger))
            .unwrap()
            .boxed()
            .provide_filters([Arc::new(LogProvider::new(verbosity)) as Arc<dyn FilterProvider>])
    }

    fn captured(f: impl FnOnce()) -> Vec<(Level, String)> {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::with_default(subscriber, f);
        let events = capture.0.lock().clone();
        events
    }

    #[test]
    fn test_logs_handling_and_completion() {
        let events = captured(|| {
            let reply = ledger(0).execute::<String, _>(Transfer(5)).unwrap().ready().unwrap();
            assert_eq!(reply.as_str(), "moved 5");
        });
        let messages: Vec<_> = events
            .iter()
            .filter(|(level, _)| *level == Level::INFO)
            .map(|(_, m)| m.as_str())
            .collect();
        assert_eq!(messages, vec!["handling", "completed"]);
    }

    #[test]
    fn test_binding_tag_overrides_verbosity() {
        let events = captured(|| {
            assert!(ledger(0).execute::<String, _>(Refund(1)).is_err());
        });
        assert!(events.contains(&(Level::TRACE, "failed".to_string())));
        assert!(!events.iter().any(|(level, m)| *level == Level::INFO && m == "handling"));

        let events = captured(|| {
            assert!(ledger(0).command(Audit).is_ok());
        });
        assert!(events.contains(&(Level::DEBUG, "handling".to_string())));
        assert!(events.contains(&(Level::DEBUG, "completed".to_string())));
    }

    #[test]
    fn test_applies_only_to_handles() {
        let provider = LogProvider::new(1);
        assert!(provider.applies_to(&Handles::new(Transfer(1))));
        assert!(!provider.applies_to(&Provides::of::<String>().build()));
    }
}
