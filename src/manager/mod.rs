//! Enumerates installed extensions, loads them and hands their descriptors
//! to the host.
//!
//! For every extension the sequence is: open the module, load it through
//! the [`StreamLoader`], make its resident sections safe with the
//! [`ResidencyPatcher`], call its entry point with the GOT base primed and
//! register the descriptor it returns. Callers serialize every use of a
//! manager; nothing here is reentrant.

mod descriptor;
mod manifest;
mod store;

pub use descriptor::{
    AppRegistry, Capabilities, DESCRIPTOR_WORDS, ExtensionDescriptor, Lifecycle, LoadedExtension,
    MAX_NAME_LEN,
};
pub use manifest::Manifest;
#[cfg(feature = "std")]
pub use store::FsStore;
pub use store::{ExtensionStore, MemStore, validate_id};

use crate::{
    Error, LoaderConfig, ManagerConfig, Result, TargetAddr,
    context::LoadContext,
    error::custom_error,
    exports::HostExports,
    flash::FlashDevice,
    loader::StreamLoader,
    residency::{ResidencyPatcher, ResidencyReport},
    runtime::ModuleRuntime,
};
use alloc::{string::String, vec::Vec};

/// Outcome of [`ExtensionManager::init`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitSummary {
    /// Extensions loaded and registered.
    pub loaded: usize,
    /// Extensions whose load or entry point failed.
    pub failed: usize,
    /// Directories skipped without trying: no module, a bad name or over
    /// the limit.
    pub skipped: usize,
}

/// Owns the load context and every resident extension.
pub struct ExtensionManager<X, I, S, R, G = ()> {
    config: ManagerConfig,
    loader: StreamLoader,
    ctx: LoadContext<X, I>,
    store: S,
    runtime: R,
    exports: HostExports,
    registry: G,
    extensions: Vec<LoadedExtension>,
}

impl<X, I, S, R> ExtensionManager<X, I, S, R>
where
    X: FlashDevice,
    I: FlashDevice,
    S: ExtensionStore,
    R: ModuleRuntime,
{
    /// Creates a manager with default configuration and no registry.
    pub fn new(ctx: LoadContext<X, I>, store: S, runtime: R, exports: HostExports) -> Result<Self> {
        Ok(Self {
            config: ManagerConfig::default(),
            loader: StreamLoader::new(LoaderConfig::default())?,
            ctx,
            store,
            runtime,
            exports,
            registry: (),
            extensions: Vec::new(),
        })
    }
}

impl<X, I, S, R, G> ExtensionManager<X, I, S, R, G>
where
    X: FlashDevice,
    I: FlashDevice,
    S: ExtensionStore,
    R: ModuleRuntime,
    G: AppRegistry,
{
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_loader_config(mut self, config: LoaderConfig) -> Result<Self> {
        self.loader = StreamLoader::new(config)?;
        Ok(self)
    }

    /// Replaces the registry descriptors are handed to.
    pub fn with_registry<G2: AppRegistry>(self, registry: G2) -> ExtensionManager<X, I, S, R, G2> {
        ExtensionManager {
            config: self.config,
            loader: self.loader,
            ctx: self.ctx,
            store: self.store,
            runtime: self.runtime,
            exports: self.exports,
            registry,
            extensions: self.extensions,
        }
    }

    /// Loads every installed extension. Failures are logged and skipped.
    pub fn init(&mut self) -> Result<InitSummary> {
        self.store.ensure_base()?;
        let ids = self.store.list()?;
        info!("[manager] {} extension directories", ids.len());
        let mut summary = InitSummary::default();
        for id in ids {
            if self.is_loaded(&id) {
                continue;
            }
            if let Err(e) = validate_id(&id, self.config.max_id_len) {
                warn!("[manager] skipping: {e}");
                summary.skipped += 1;
                continue;
            }
            if self.extensions.len() >= self.config.max_extensions {
                warn!("[manager] skipping {id}: limit of {} extensions", self.config.max_extensions);
                summary.skipped += 1;
                continue;
            }
            match self.load_one(&id) {
                Ok(true) => summary.loaded += 1,
                Ok(false) => {
                    debug!("[manager] {id}: no module file");
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("[manager] {id}: {e}");
                    summary.failed += 1;
                }
            }
        }
        info!(
            "[manager] init done: {} loaded, {} failed, {} skipped",
            summary.loaded, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// Loads one newly installed extension.
    pub fn hot_load(&mut self, id: &str) -> Result<&LoadedExtension> {
        validate_id(id, self.config.max_id_len)?;
        if self.is_loaded(id) {
            return Err(Error::AlreadyLoaded { id: id.into() });
        }
        if self.extensions.len() >= self.config.max_extensions {
            return Err(Error::TooManyExtensions {
                limit: self.config.max_extensions,
            });
        }
        if !self.load_one(id)? {
            return Err(crate::error::io_error(alloc::format!("{id} has no module file")));
        }
        self.get(id)
            .ok_or_else(|| custom_error(alloc::format!("{id} vanished after loading")))
    }

    /// Creates the directory a new extension is installed into.
    pub fn prepare(&mut self, id: &str) -> Result<()> {
        validate_id(id, self.config.max_id_len)?;
        self.store.prepare(id)
    }

    /// Deletes an extension's files. A resident module stays resident
    /// until the next reset.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        validate_id(id, self.config.max_id_len)?;
        if self.is_loaded(id) {
            warn!("[manager] {id} stays resident until reset");
        }
        self.store.remove(id)
    }

    fn load_one(&mut self, id: &str) -> Result<bool> {
        let Some(mut reader) = self.store.open_module(id)? else {
            return Ok(false);
        };
        let manifest = self
            .store
            .read_manifest(id)?
            .map(|bytes| Manifest::parse(&bytes))
            .transpose()?;
        let entry: String = manifest
            .as_ref()
            .and_then(|m| m.entry_symbol.clone())
            .unwrap_or_else(|| self.config.entry_symbol.clone());

        let checkpoint = self.ctx.checkpoint();
        let loaded = self
            .loader
            .load_as(&mut self.ctx, &mut reader, id, &self.exports, &entry);
        let image = match loaded {
            Ok(image) => image,
            Err(e) => {
                self.ctx.rollback(checkpoint);
                return Err(e);
            }
        };
        let residency = ResidencyPatcher::new(&image)
            .run(&mut self.ctx, &mut self.runtime)
            .unwrap_or_else(|e| {
                warn!("[manager] {id}: residency failed, resident code needs XIP: {e}");
                ResidencyReport::default()
            });

        let mut ext = LoadedExtension {
            id: id.into(),
            image,
            manifest,
            descriptor: None,
            residency,
        };
        let result = self.call_entry(&mut ext);
        self.extensions.push(ext);
        result.map(|()| true)
    }

    fn call_entry(&mut self, ext: &mut LoadedExtension) -> Result<()> {
        let ret = self
            .runtime
            .call(&mut self.ctx, ext.entry(), ext.got_base(), &[])?;
        if ret == 0 {
            return Err(Error::EntryFailed {
                name: ext.id.clone(),
            });
        }
        let descriptor = ExtensionDescriptor::read(&mut self.ctx, ret)?;
        info!(
            "[manager] {}: registered '{}' ({:?})",
            ext.id,
            descriptor.name(),
            descriptor.capabilities()
        );
        self.registry.register(&ext.id, &descriptor);
        ext.descriptor = Some(descriptor);
        Ok(())
    }

    /// Invokes a lifecycle callback of a registered extension.
    pub fn invoke(&mut self, id: &str, event: Lifecycle, args: &[u32]) -> Result<Option<u32>> {
        let ext = self
            .extensions
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| custom_error(alloc::format!("{id} is not loaded")))?;
        ext.invoke(&mut self.runtime, &mut self.ctx, event, args)
    }

    /// Creates a trampoline into module `id` for a callback it registers
    /// after load, so the callback runs with the module's GOT base.
    pub fn create_trampoline(&mut self, id: &str, target: TargetAddr) -> Result<TargetAddr> {
        let base = self
            .get(id)
            .map(|ext| ext.got_base())
            .ok_or_else(|| custom_error(alloc::format!("{id} is not loaded")))?;
        let tramp = self
            .ctx
            .trampolines
            .make_trampoline(&mut self.ctx.iflash, target, base)?;
        self.runtime.invalidate_instructions();
        Ok(tramp)
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&LoadedExtension> {
        self.extensions.iter().find(|e| e.id == id)
    }

    #[inline]
    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    #[inline]
    pub fn context(&self) -> &LoadContext<X, I> {
        &self.ctx
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut LoadContext<X, I> {
        &mut self.ctx
    }

    #[inline]
    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[inline]
    pub fn registry(&self) -> &G {
        &self.registry
    }

    /// Forgets every extension and empties both flash regions and the
    /// pool. Addresses handed out before become invalid.
    pub fn reset(&mut self) {
        self.extensions.clear();
        self.ctx.reset();
    }
}
