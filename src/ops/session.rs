//! The services one cellar operation runs against.

use std::sync::Arc;

use anyhow::Context;

use crate::builder::{NullReporter, Reporter};
use crate::core::{Layout, Registry};
use crate::install::{InstallError, Installer};
use crate::sources::{DefaultTransport, Transport};
use crate::util::process::{ProcessRunner, SystemRunner};
use crate::util::{Config, GlobalContext};

/// Context plus the process runner, transport and event sink.
///
/// Operations reach processes, the network and the registry only
/// through a session.
pub struct Session<'a> {
    ctx: &'a GlobalContext,
    runner: Arc<dyn ProcessRunner>,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn Reporter>,
    /// Preloaded registry, used instead of the registry directories
    registry: Option<Registry>,
}

impl<'a> Session<'a> {
    /// A session running real processes and downloads.
    pub fn new(ctx: &'a GlobalContext, reporter: Arc<dyn Reporter>) -> anyhow::Result<Self> {
        let transport = DefaultTransport::new(ctx.config().net_timeout())
            .context("failed to set up the download client")?;

        Ok(Session {
            ctx,
            runner: Arc::new(SystemRunner),
            transport: Arc::new(transport),
            reporter,
            registry: None,
        })
    }

    /// A session with explicit services.
    pub fn with_services(
        ctx: &'a GlobalContext,
        runner: Arc<dyn ProcessRunner>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Session {
            ctx,
            runner,
            transport,
            reporter: Arc::new(NullReporter),
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ctx(&self) -> &GlobalContext {
        self.ctx
    }

    pub fn layout(&self) -> &Layout {
        self.ctx.layout()
    }

    pub fn config(&self) -> &Config {
        self.ctx.config()
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn reporter(&self) -> Arc<dyn Reporter> {
        Arc::clone(&self.reporter)
    }

    /// Load the registry. Parse errors name the offending descriptor.
    pub fn registry(&self) -> anyhow::Result<Registry> {
        match &self.registry {
            Some(registry) => Ok(registry.clone()),
            None => self.ctx.load_registry(),
        }
    }

    /// Open the install record under the root.
    pub fn installer(&self) -> Result<Installer, InstallError> {
        Installer::open(self.layout())
    }
}
