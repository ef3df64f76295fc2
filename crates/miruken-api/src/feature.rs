//! Installing the messaging handlers.

use std::sync::Arc;

use miruken_core::BoxHandler;
use miruken_runtime::{Feature, RuntimeResult, Setup};

use crate::route::PassThroughRouter;
use crate::schedule::Scheduler;
use crate::stash::Stash;

/// Installs the [`Scheduler`], the [`PassThroughRouter`] and a root
/// [`Stash`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiFeature;

impl Feature for ApiFeature {
    fn name(&self) -> &str {
        "api"
    }

    fn install(&self, setup: &mut Setup) -> RuntimeResult<()> {
        if setup.can_install::<ApiFeature>() {
            setup
                .spec::<Scheduler>()
                .spec::<PassThroughRouter>()
                .handlers([Arc::new(Stash::new(true)) as BoxHandler]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduledResult, SequentialBatch};
    use crate::send;
    use crate::stash::stash_get;

    #[tokio::test]
    async fn test_installs_scheduler_and_root_stash() {
        let handler = Setup::new([Arc::new(ApiFeature) as Arc<dyn Feature>, Arc::new(ApiFeature)])
            .handler()
            .unwrap();
        assert!(stash_get::<String>(&handler).unwrap().is_none());
        let result = send::<ScheduledResult, _>(&handler, SequentialBatch::default())
            .unwrap()
            .await
            .unwrap();
        assert!(result.responses.is_empty());
    }
}
